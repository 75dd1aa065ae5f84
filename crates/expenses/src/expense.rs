use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use forgeerp_core::{
    AnalyticAccountId, AnalyticTagId, CompanyId, CurrencyId, EmployeeId, Entity, ProductId, UomId,
};

use crate::staging::PrLine;

/// Persisted expense line of an expense report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseLine {
    /// Position within the owning expense report (never reused).
    pub line_no: u32,
    pub employee_id: EmployeeId,
    pub name: String,
    pub product_id: ProductId,
    pub product_uom_id: UomId,
    pub unit_amount: Decimal,
    pub quantity: Decimal,
    pub company_id: CompanyId,
    pub currency_id: CurrencyId,
    pub analytic_account_id: Option<AnalyticAccountId>,
    pub analytic_tag_ids: Vec<AnalyticTagId>,
    pub description: Option<String>,
    pub reference: Option<String>,
}

impl ExpenseLine {
    /// Materialize a staging row as an expense line of `employee_id`.
    pub fn from_staged(line_no: u32, employee_id: EmployeeId, staged: &PrLine) -> Self {
        Self {
            line_no,
            employee_id,
            name: staged.name.clone(),
            product_id: staged.product_id,
            product_uom_id: staged.product_uom_id,
            unit_amount: staged.unit_amount,
            quantity: staged.quantity,
            company_id: staged.company_id,
            currency_id: staged.currency_id,
            analytic_account_id: staged.analytic_account_id,
            analytic_tag_ids: staged.analytic_tag_ids.clone(),
            description: staged.description.clone(),
            reference: staged.reference.clone(),
        }
    }

    pub fn total_amount(&self) -> Decimal {
        self.unit_amount * self.quantity
    }
}

impl Entity for ExpenseLine {
    type Id = u32;

    fn id(&self) -> &Self::Id {
        &self.line_no
    }
}

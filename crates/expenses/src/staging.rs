//! Staging rows: purchase-request lines projected into the expense-line shape.
//!
//! A [`PrLine`] exists only between the employee picking a purchase request
//! and the expense report being saved. It has no identity of its own; every
//! value is copied from the source line at selection time.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use forgeerp_core::{
    AnalyticAccountId, AnalyticTagId, CompanyId, CurrencyId, DomainError, DomainResult,
    ProductId, UomId, ValueObject,
};
use forgeerp_purchasing::PurchaseRequestLine;

/// Product master-data lookup needed when a staging row's product is changed.
pub trait ProductCatalog {
    /// Default unit of measure of a product, `None` if the product is unknown.
    fn default_uom(&self, product_id: ProductId) -> Option<UomId>;
}

/// Staging row (PR line).
///
/// Field set mirrors [`crate::ExpenseLine`] minus the sheet-owned fields
/// (line number, employee), so conversion is a straight copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrLine {
    pub name: String,
    pub product_id: ProductId,
    pub product_uom_id: UomId,
    pub unit_amount: Decimal,
    pub quantity: Decimal,
    pub company_id: CompanyId,
    pub currency_id: CurrencyId,
    pub analytic_account_id: Option<AnalyticAccountId>,
    pub analytic_tag_ids: Vec<AnalyticTagId>,
    /// Free-text notes.
    pub description: Option<String>,
    /// Bill reference.
    pub reference: Option<String>,
}

impl ValueObject for PrLine {}

impl PrLine {
    /// Copy a purchase-request line into a staging row.
    ///
    /// The request line carries the estimated cost of the whole line, so the
    /// unit price is `estimated_cost / product_qty`, or zero when the quantity
    /// is not positive.
    pub fn from_request_line(line: &PurchaseRequestLine) -> Self {
        Self {
            name: line.name.clone(),
            product_id: line.product_id,
            product_uom_id: line.product_uom_id,
            unit_amount: unit_amount(line.estimated_cost, line.product_qty),
            quantity: line.product_qty,
            company_id: line.company_id,
            currency_id: line.currency_id,
            analytic_account_id: line.analytic_account_id,
            analytic_tag_ids: line.analytic_tag_ids.clone(),
            description: line.description.clone(),
            reference: line.specifications.clone(),
        }
    }

    /// Computed total: unit price × quantity.
    pub fn total_amount(&self) -> Decimal {
        self.unit_amount * self.quantity
    }

    /// Change the product and reset the unit of measure to the product's default.
    pub fn change_product(
        &mut self,
        product_id: ProductId,
        catalog: &impl ProductCatalog,
    ) -> DomainResult<()> {
        let uom = catalog
            .default_uom(product_id)
            .ok_or_else(|| DomainError::validation(format!("unknown product {product_id}")))?;
        self.product_id = product_id;
        self.product_uom_id = uom;
        Ok(())
    }
}

fn unit_amount(estimated_cost: Decimal, quantity: Decimal) -> Decimal {
    if quantity > Decimal::ZERO {
        estimated_cost.checked_div(quantity).unwrap_or(Decimal::ZERO)
    } else {
        Decimal::ZERO
    }
}

/// Stage every line of a purchase request, preserving line order.
pub fn stage_request_lines(lines: &[PurchaseRequestLine]) -> Vec<PrLine> {
    lines.iter().map(PrLine::from_request_line).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn request_line(qty: Decimal, cost: Decimal) -> PurchaseRequestLine {
        PurchaseRequestLine {
            line_no: 1,
            name: "Office chair".to_string(),
            product_id: ProductId::new(),
            product_uom_id: UomId::new(),
            product_qty: qty,
            estimated_cost: cost,
            company_id: CompanyId::new(),
            currency_id: CurrencyId::new(),
            analytic_account_id: Some(AnalyticAccountId::new()),
            analytic_tag_ids: vec![AnalyticTagId::new()],
            description: Some("ergonomic".to_string()),
            specifications: Some("INV-0042".to_string()),
        }
    }

    struct Catalog(HashMap<ProductId, UomId>);

    impl ProductCatalog for Catalog {
        fn default_uom(&self, product_id: ProductId) -> Option<UomId> {
            self.0.get(&product_id).copied()
        }
    }

    #[test]
    fn copies_every_field_per_the_correspondence() {
        let source = request_line(dec!(4), dec!(1000));
        let row = PrLine::from_request_line(&source);

        assert_eq!(row.name, source.name);
        assert_eq!(row.product_id, source.product_id);
        assert_eq!(row.product_uom_id, source.product_uom_id);
        assert_eq!(row.unit_amount, dec!(250));
        assert_eq!(row.quantity, dec!(4));
        assert_eq!(row.company_id, source.company_id);
        assert_eq!(row.currency_id, source.currency_id);
        assert_eq!(row.analytic_account_id, source.analytic_account_id);
        assert_eq!(row.analytic_tag_ids, source.analytic_tag_ids);
        assert_eq!(row.description.as_deref(), Some("ergonomic"));
        assert_eq!(row.reference.as_deref(), Some("INV-0042"));
        assert_eq!(row.total_amount(), dec!(1000));
    }

    #[test]
    fn zero_quantity_yields_zero_unit_price() {
        let row = PrLine::from_request_line(&request_line(dec!(0), dec!(500)));
        assert_eq!(row.unit_amount, Decimal::ZERO);
        assert_eq!(row.total_amount(), Decimal::ZERO);
    }

    #[test]
    fn product_change_resets_unit_of_measure() {
        let mut row = PrLine::from_request_line(&request_line(dec!(1), dec!(10)));
        let product = ProductId::new();
        let uom = UomId::new();
        let catalog = Catalog(HashMap::from([(product, uom)]));

        row.change_product(product, &catalog).unwrap();
        assert_eq!(row.product_id, product);
        assert_eq!(row.product_uom_id, uom);
    }

    #[test]
    fn unknown_product_leaves_row_untouched() {
        let mut row = PrLine::from_request_line(&request_line(dec!(1), dec!(10)));
        let before = row.clone();

        let err = row
            .change_product(ProductId::new(), &Catalog(HashMap::new()))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
        assert_eq!(row, before);
    }

    fn amount() -> impl Strategy<Value = Decimal> {
        (0i64..10_000_000).prop_map(|cents| Decimal::new(cents, 2))
    }

    fn quantity() -> impl Strategy<Value = Decimal> {
        (0i64..100_000).prop_map(|milli| Decimal::new(milli, 3))
    }

    proptest! {
        #[test]
        fn unit_price_divides_cost_by_positive_quantity(qty in quantity(), cost in amount()) {
            let row = PrLine::from_request_line(&request_line(qty, cost));
            if qty > Decimal::ZERO {
                prop_assert_eq!(row.unit_amount, cost / qty);
            } else {
                prop_assert_eq!(row.unit_amount, Decimal::ZERO);
            }
            prop_assert_eq!(row.total_amount(), row.unit_amount * row.quantity);
        }

        #[test]
        fn one_staging_row_per_source_line(qtys in proptest::collection::vec(quantity(), 0..20)) {
            let lines: Vec<_> = qtys.iter().map(|q| request_line(*q, dec!(99.99))).collect();
            let staged = stage_request_lines(&lines);
            prop_assert_eq!(staged.len(), lines.len());
            for (row, line) in staged.iter().zip(&lines) {
                prop_assert_eq!(row.quantity, line.product_qty);
            }
        }
    }
}

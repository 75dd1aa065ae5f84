//! Editing buffer for an expense report.
//!
//! The form holds the values a user is editing before they are saved, and
//! runs the change handlers that keep dependent fields consistent:
//!
//! - changing the employee clears the purchase-request selection
//! - selecting a purchase request regenerates the staged rows
//! - changing a staged row's product resets its unit of measure
//!
//! Saving turns the form into a create or update command for [`ExpenseSheet`].

use chrono::{DateTime, Utc};

use forgeerp_core::{DomainError, DomainResult, EmployeeId, ProductId, TenantId, UserId};
use forgeerp_purchasing::{PurchaseRequestId, PurchaseRequestStatus};

use crate::sheet::{
    CreateExpenseSheet, EmployeeAssignment, ExpenseSheet, ExpenseSheetId, PrUsage,
    RequestSelection, SheetChanges, UpdateExpenseSheet,
};
use crate::source::PurchaseRequestSource;
use crate::staging::{PrLine, ProductCatalog, stage_request_lines};

/// Which purchase requests an employee may pick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionPolicy {
    /// Only requests raised by the employee's own user.
    pub restrict_to_requester: bool,
    /// Only approved requests.
    pub approved_only: bool,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self {
            restrict_to_requester: true,
            approved_only: false,
        }
    }
}

impl SelectionPolicy {
    pub fn check(
        &self,
        request: &impl PurchaseRequestSource,
        employee_user_id: Option<UserId>,
    ) -> DomainResult<()> {
        match request.status() {
            PurchaseRequestStatus::Deleted => {
                return Err(DomainError::validation("purchase request no longer exists"));
            }
            PurchaseRequestStatus::Approved => {}
            status if self.approved_only => {
                return Err(DomainError::validation(format!(
                    "purchase request must be approved (status: {status:?})"
                )));
            }
            _ => {}
        }

        if self.restrict_to_requester
            && (employee_user_id.is_none() || request.requested_by() != employee_user_id)
        {
            return Err(DomainError::validation(
                "purchase request was not raised by this employee",
            ));
        }

        Ok(())
    }
}

/// Values persisted on the sheet when the form was opened.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Saved {
    sheet_id: ExpenseSheetId,
    name: String,
    employee: Option<EmployeeAssignment>,
    purchase_request_id: Option<PurchaseRequestId>,
    pr_for: PrUsage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpenseSheetForm {
    saved: Option<Saved>,
    name: String,
    employee: EmployeeAssignment,
    purchase_request_id: Option<PurchaseRequestId>,
    pr_for: PrUsage,
    pr_lines: Vec<PrLine>,
    pr_lines_dirty: bool,
}

impl ExpenseSheetForm {
    /// Form for a new expense report.
    pub fn new(
        name: impl Into<String>,
        employee_id: EmployeeId,
        employee_user_id: Option<UserId>,
    ) -> Self {
        Self {
            saved: None,
            name: name.into(),
            employee: EmployeeAssignment {
                employee_id,
                employee_user_id,
            },
            purchase_request_id: None,
            pr_for: PrUsage::default(),
            pr_lines: Vec::new(),
            pr_lines_dirty: false,
        }
    }

    /// Form over an existing expense report.
    pub fn edit(sheet: &ExpenseSheet) -> DomainResult<Self> {
        let Some(employee_id) = sheet.employee_id() else {
            return Err(DomainError::not_found());
        };
        let employee = EmployeeAssignment {
            employee_id,
            employee_user_id: sheet.employee_user_id(),
        };

        Ok(Self {
            saved: Some(Saved {
                sheet_id: sheet.id_typed(),
                name: sheet.name().to_string(),
                employee: Some(employee),
                purchase_request_id: sheet.purchase_request_id(),
                pr_for: sheet.pr_for(),
            }),
            name: sheet.name().to_string(),
            employee,
            purchase_request_id: sheet.purchase_request_id(),
            pr_for: sheet.pr_for(),
            pr_lines: sheet.pr_lines().to_vec(),
            pr_lines_dirty: false,
        })
    }

    pub fn sheet_id(&self) -> Option<ExpenseSheetId> {
        self.saved.as_ref().map(|s| s.sheet_id)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn employee_id(&self) -> EmployeeId {
        self.employee.employee_id
    }

    pub fn employee_user_id(&self) -> Option<UserId> {
        self.employee.employee_user_id
    }

    pub fn purchase_request_id(&self) -> Option<PurchaseRequestId> {
        self.purchase_request_id
    }

    pub fn pr_for(&self) -> PrUsage {
        self.pr_for
    }

    /// Staged rows currently previewed on the form.
    pub fn pr_lines(&self) -> &[PrLine] {
        &self.pr_lines
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn set_pr_for(&mut self, pr_for: PrUsage) {
        self.pr_for = pr_for;
    }

    /// Employee change handler: drops the selected purchase request and its staged rows.
    pub fn change_employee(&mut self, employee_id: EmployeeId, employee_user_id: Option<UserId>) {
        self.employee = EmployeeAssignment {
            employee_id,
            employee_user_id,
        };
        self.clear_purchase_request();
    }

    /// Purchase-request change handler: one staged row per request line.
    ///
    /// On a policy violation the form is left unchanged.
    pub fn select_purchase_request(
        &mut self,
        request: &impl PurchaseRequestSource,
        policy: &SelectionPolicy,
    ) -> DomainResult<()> {
        policy.check(request, self.employee.employee_user_id)?;

        self.purchase_request_id = Some(request.request_id());
        self.pr_lines = stage_request_lines(request.lines());
        self.pr_lines_dirty = true;
        Ok(())
    }

    pub fn clear_purchase_request(&mut self) {
        if self.purchase_request_id.is_some() || !self.pr_lines.is_empty() {
            self.pr_lines_dirty = true;
        }
        self.purchase_request_id = None;
        self.pr_lines.clear();
    }

    /// Product change handler of the staged row at `index`.
    pub fn change_line_product(
        &mut self,
        index: usize,
        product_id: ProductId,
        catalog: &impl ProductCatalog,
    ) -> DomainResult<()> {
        let row = self
            .pr_lines
            .get_mut(index)
            .ok_or_else(|| DomainError::validation(format!("no staged row at index {index}")))?;
        row.change_product(product_id, catalog)?;
        self.pr_lines_dirty = true;
        Ok(())
    }

    /// Create command for a new report (fails on a form opened over an existing one).
    pub fn to_create_command(
        &self,
        tenant_id: TenantId,
        sheet_id: ExpenseSheetId,
        occurred_at: DateTime<Utc>,
    ) -> DomainResult<CreateExpenseSheet> {
        if self.saved.is_some() {
            return Err(DomainError::conflict("expense report already exists"));
        }

        Ok(CreateExpenseSheet {
            tenant_id,
            sheet_id,
            name: self.name.clone(),
            employee: self.employee,
            purchase_request_id: self.purchase_request_id,
            pr_for: self.pr_for,
            pr_lines: self.pr_lines.clone(),
            occurred_at,
        })
    }

    /// Update command carrying only the fields that changed since the form was opened.
    pub fn to_update_command(
        &self,
        tenant_id: TenantId,
        occurred_at: DateTime<Utc>,
    ) -> DomainResult<UpdateExpenseSheet> {
        let Some(saved) = &self.saved else {
            return Err(DomainError::not_found());
        };

        // Freshly staged rows re-link the current request so the save converts them.
        let relink = self.pr_lines_dirty && !self.pr_lines.is_empty();
        let purchase_request = (relink || self.purchase_request_id != saved.purchase_request_id)
            .then(|| match self.purchase_request_id {
                Some(id) => RequestSelection::Link(id),
                None => RequestSelection::Clear,
            });

        let changes = SheetChanges {
            name: (self.name != saved.name).then(|| self.name.clone()),
            employee: (Some(self.employee) != saved.employee).then_some(self.employee),
            purchase_request,
            pr_for: (self.pr_for != saved.pr_for).then_some(self.pr_for),
            pr_lines: self.pr_lines_dirty.then(|| self.pr_lines.clone()),
        };

        Ok(UpdateExpenseSheet {
            tenant_id,
            sheet_id: saved.sheet_id,
            changes,
            occurred_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forgeerp_core::{AggregateId, CompanyId, CurrencyId, UomId};
    use forgeerp_events::execute;
    use forgeerp_purchasing::PurchaseRequestLine;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use crate::sheet::ExpenseSheetCommand;

    struct Request {
        id: PurchaseRequestId,
        requested_by: Option<UserId>,
        status: PurchaseRequestStatus,
        lines: Vec<PurchaseRequestLine>,
    }

    impl PurchaseRequestSource for Request {
        fn request_id(&self) -> PurchaseRequestId {
            self.id
        }
        fn requested_by(&self) -> Option<UserId> {
            self.requested_by
        }
        fn status(&self) -> PurchaseRequestStatus {
            self.status
        }
        fn lines(&self) -> &[PurchaseRequestLine] {
            &self.lines
        }
    }

    fn line(line_no: u32, qty: Decimal, cost: Decimal) -> PurchaseRequestLine {
        PurchaseRequestLine {
            line_no,
            name: format!("item {line_no}"),
            product_id: ProductId::new(),
            product_uom_id: UomId::new(),
            product_qty: qty,
            estimated_cost: cost,
            company_id: CompanyId::new(),
            currency_id: CurrencyId::new(),
            analytic_account_id: None,
            analytic_tag_ids: vec![],
            description: None,
            specifications: None,
        }
    }

    fn request(requested_by: Option<UserId>, lines: Vec<PurchaseRequestLine>) -> Request {
        Request {
            id: PurchaseRequestId::new(AggregateId::new()),
            requested_by,
            status: PurchaseRequestStatus::Draft,
            lines,
        }
    }

    #[test]
    fn selecting_a_request_stages_one_row_per_line() {
        let user = UserId::new();
        let mut form = ExpenseSheetForm::new("May expenses", EmployeeId::new(), Some(user));
        let pr = request(
            Some(user),
            vec![line(1, dec!(2), dec!(50)), line(2, dec!(0), dec!(10))],
        );

        form.select_purchase_request(&pr, &SelectionPolicy::default())
            .unwrap();

        assert_eq!(form.purchase_request_id(), Some(pr.id));
        assert_eq!(form.pr_lines().len(), 2);
        assert_eq!(form.pr_lines()[0].unit_amount, dec!(25));
        assert_eq!(form.pr_lines()[1].unit_amount, Decimal::ZERO);
    }

    #[test]
    fn reselecting_replaces_previous_rows() {
        let user = UserId::new();
        let mut form = ExpenseSheetForm::new("May expenses", EmployeeId::new(), Some(user));
        let first = request(Some(user), vec![line(1, dec!(1), dec!(1)); 3]);
        let second = request(Some(user), vec![line(1, dec!(1), dec!(7))]);

        form.select_purchase_request(&first, &SelectionPolicy::default())
            .unwrap();
        form.select_purchase_request(&second, &SelectionPolicy::default())
            .unwrap();

        assert_eq!(form.purchase_request_id(), Some(second.id));
        assert_eq!(form.pr_lines().len(), 1);
        assert_eq!(form.pr_lines()[0].unit_amount, dec!(7));
    }

    #[test]
    fn requests_of_other_users_are_refused_by_default() {
        let mut form =
            ExpenseSheetForm::new("May expenses", EmployeeId::new(), Some(UserId::new()));
        let pr = request(Some(UserId::new()), vec![line(1, dec!(1), dec!(1))]);

        let err = form
            .select_purchase_request(&pr, &SelectionPolicy::default())
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
        assert!(form.pr_lines().is_empty());

        let open = SelectionPolicy {
            restrict_to_requester: false,
            approved_only: false,
        };
        form.select_purchase_request(&pr, &open).unwrap();
        assert_eq!(form.pr_lines().len(), 1);
    }

    #[test]
    fn approved_only_policy_refuses_drafts() {
        let user = UserId::new();
        let mut form = ExpenseSheetForm::new("May expenses", EmployeeId::new(), Some(user));
        let mut pr = request(Some(user), vec![line(1, dec!(1), dec!(1))]);
        let policy = SelectionPolicy {
            restrict_to_requester: true,
            approved_only: true,
        };

        assert!(form.select_purchase_request(&pr, &policy).is_err());
        pr.status = PurchaseRequestStatus::Approved;
        assert!(form.select_purchase_request(&pr, &policy).is_ok());
    }

    #[test]
    fn changing_employee_clears_selection() {
        let user = UserId::new();
        let mut form = ExpenseSheetForm::new("May expenses", EmployeeId::new(), Some(user));
        let pr = request(Some(user), vec![line(1, dec!(1), dec!(1))]);
        form.select_purchase_request(&pr, &SelectionPolicy::default())
            .unwrap();

        let other = EmployeeId::new();
        form.change_employee(other, Some(UserId::new()));

        assert_eq!(form.employee_id(), other);
        assert_eq!(form.purchase_request_id(), None);
        assert!(form.pr_lines().is_empty());
    }

    #[test]
    fn saving_an_edited_form_sends_only_changed_fields() {
        let user = UserId::new();
        let tenant_id = TenantId::new();
        let sheet_id = ExpenseSheetId::new(AggregateId::new());

        let form = ExpenseSheetForm::new("May expenses", EmployeeId::new(), Some(user));
        let mut sheet = ExpenseSheet::empty(sheet_id);
        let create = form.to_create_command(tenant_id, sheet_id, Utc::now()).unwrap();
        execute(&mut sheet, &ExpenseSheetCommand::Create(create)).unwrap();

        let mut form = ExpenseSheetForm::edit(&sheet).unwrap();
        let unchanged = form.to_update_command(tenant_id, Utc::now()).unwrap();
        assert!(unchanged.changes.is_empty());

        let pr = request(Some(user), vec![line(1, dec!(4), dec!(100))]);
        form.select_purchase_request(&pr, &SelectionPolicy::default())
            .unwrap();
        let update = form.to_update_command(tenant_id, Utc::now()).unwrap();
        assert_eq!(
            update.changes.purchase_request,
            Some(RequestSelection::Link(pr.id))
        );
        assert_eq!(update.changes.pr_lines.as_ref().map(Vec::len), Some(1));
        assert!(update.changes.name.is_none());

        execute(&mut sheet, &ExpenseSheetCommand::Update(update)).unwrap();
        assert_eq!(sheet.expense_lines().len(), 1);
        assert_eq!(sheet.expense_lines()[0].unit_amount, dec!(25));
        assert!(sheet.pr_lines().is_empty());
    }

    #[test]
    fn reselecting_the_saved_request_relinks_it() {
        let user = UserId::new();
        let tenant_id = TenantId::new();
        let sheet_id = ExpenseSheetId::new(AggregateId::new());
        let first = request(Some(user), vec![line(1, dec!(1), dec!(30)); 2]);
        let second = request(Some(user), vec![line(1, dec!(1), dec!(90))]);

        let mut form = ExpenseSheetForm::new("May expenses", EmployeeId::new(), Some(user));
        form.select_purchase_request(&first, &SelectionPolicy::default())
            .unwrap();
        let mut sheet = ExpenseSheet::empty(sheet_id);
        let create = form.to_create_command(tenant_id, sheet_id, Utc::now()).unwrap();
        execute(&mut sheet, &ExpenseSheetCommand::Create(create)).unwrap();

        let mut form = ExpenseSheetForm::edit(&sheet).unwrap();
        form.select_purchase_request(&second, &SelectionPolicy::default())
            .unwrap();
        form.select_purchase_request(&first, &SelectionPolicy::default())
            .unwrap();
        let update = form.to_update_command(tenant_id, Utc::now()).unwrap();
        assert_eq!(
            update.changes.purchase_request,
            Some(RequestSelection::Link(first.id))
        );

        execute(&mut sheet, &ExpenseSheetCommand::Update(update)).unwrap();
        assert!(sheet.pr_lines().is_empty());
        assert_eq!(sheet.purchase_request_id(), Some(first.id));
        assert_eq!(sheet.expense_lines().len(), 2);
    }

    #[test]
    fn edit_form_cannot_create() {
        let tenant_id = TenantId::new();
        let sheet_id = ExpenseSheetId::new(AggregateId::new());
        let mut sheet = ExpenseSheet::empty(sheet_id);
        let create = ExpenseSheetForm::new("x", EmployeeId::new(), None)
            .to_create_command(tenant_id, sheet_id, Utc::now())
            .unwrap();
        execute(&mut sheet, &ExpenseSheetCommand::Create(create)).unwrap();

        let form = ExpenseSheetForm::edit(&sheet).unwrap();
        assert!(matches!(
            form.to_create_command(tenant_id, sheet_id, Utc::now()),
            Err(DomainError::Conflict(_))
        ));
    }
}

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use forgeerp_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, EmployeeId, TenantId, UserId,
};
use forgeerp_events::Event;
use forgeerp_purchasing::PurchaseRequestId;

use crate::expense::ExpenseLine;
use crate::staging::PrLine;

/// Expense report identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExpenseSheetId(pub AggregateId);

impl ExpenseSheetId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ExpenseSheetId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// What the linked purchase request is used for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrUsage {
    /// Staged rows become expense lines of this report.
    #[default]
    Expense,
}

/// Employee of the report together with the employee's user account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmployeeAssignment {
    pub employee_id: EmployeeId,
    pub employee_user_id: Option<UserId>,
}

/// Purchase-request field of an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestSelection {
    Link(PurchaseRequestId),
    Clear,
}

/// Aggregate root: ExpenseSheet (expense report).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpenseSheet {
    id: ExpenseSheetId,
    tenant_id: Option<TenantId>,
    name: String,
    employee_id: Option<EmployeeId>,
    employee_user_id: Option<UserId>,
    purchase_request_id: Option<PurchaseRequestId>,
    pr_for: PrUsage,
    pr_lines: Vec<PrLine>,
    expense_lines: Vec<ExpenseLine>,
    last_line_no: u32,
    version: u64,
    created: bool,
}

impl ExpenseSheet {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: ExpenseSheetId) -> Self {
        Self {
            id,
            tenant_id: None,
            name: String::new(),
            employee_id: None,
            employee_user_id: None,
            purchase_request_id: None,
            pr_for: PrUsage::Expense,
            pr_lines: Vec::new(),
            expense_lines: Vec::new(),
            last_line_no: 0,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ExpenseSheetId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn employee_id(&self) -> Option<EmployeeId> {
        self.employee_id
    }

    /// User account of the employee (read-only, follows the employee).
    pub fn employee_user_id(&self) -> Option<UserId> {
        self.employee_user_id
    }

    pub fn purchase_request_id(&self) -> Option<PurchaseRequestId> {
        self.purchase_request_id
    }

    pub fn pr_for(&self) -> PrUsage {
        self.pr_for
    }

    /// Staged rows not yet converted. Empty after every successful write.
    pub fn pr_lines(&self) -> &[PrLine] {
        &self.pr_lines
    }

    pub fn expense_lines(&self) -> &[ExpenseLine] {
        &self.expense_lines
    }

    pub fn is_created(&self) -> bool {
        self.created
    }
}

impl AggregateRoot for ExpenseSheet {
    type Id = ExpenseSheetId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateExpenseSheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateExpenseSheet {
    pub tenant_id: TenantId,
    pub sheet_id: ExpenseSheetId,
    pub name: String,
    pub employee: EmployeeAssignment,
    pub purchase_request_id: Option<PurchaseRequestId>,
    pub pr_for: PrUsage,
    pub pr_lines: Vec<PrLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Fields written by an update. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetChanges {
    pub name: Option<String>,
    pub employee: Option<EmployeeAssignment>,
    pub purchase_request: Option<RequestSelection>,
    pub pr_for: Option<PrUsage>,
    /// Replacement set of staged rows.
    pub pr_lines: Option<Vec<PrLine>>,
}

impl SheetChanges {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.employee.is_none()
            && self.purchase_request.is_none()
            && self.pr_for.is_none()
            && self.pr_lines.is_none()
    }
}

/// Command: UpdateExpenseSheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateExpenseSheet {
    pub tenant_id: TenantId,
    pub sheet_id: ExpenseSheetId,
    pub changes: SheetChanges,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddExpenseLine (manual entry, same field set as a staged row).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddExpenseLine {
    pub tenant_id: TenantId,
    pub sheet_id: ExpenseSheetId,
    pub values: PrLine,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RemoveExpenseLine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveExpenseLine {
    pub tenant_id: TenantId,
    pub sheet_id: ExpenseSheetId,
    pub line_no: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpenseSheetCommand {
    Create(CreateExpenseSheet),
    Update(UpdateExpenseSheet),
    AddExpenseLine(AddExpenseLine),
    RemoveExpenseLine(RemoveExpenseLine),
}

/// Event: ExpenseSheetCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseSheetCreated {
    pub tenant_id: TenantId,
    pub sheet_id: ExpenseSheetId,
    pub name: String,
    pub employee: EmployeeAssignment,
    pub pr_for: PrUsage,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseSheetRenamed {
    pub tenant_id: TenantId,
    pub sheet_id: ExpenseSheetId,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmployeeAssigned {
    pub tenant_id: TenantId,
    pub sheet_id: ExpenseSheetId,
    pub employee: EmployeeAssignment,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PurchaseRequestSelected (`None` when the selection was cleared).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseRequestSelected {
    pub tenant_id: TenantId,
    pub sheet_id: ExpenseSheetId,
    pub purchase_request_id: Option<PurchaseRequestId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrUsageChanged {
    pub tenant_id: TenantId,
    pub sheet_id: ExpenseSheetId,
    pub pr_for: PrUsage,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PrLinesStaged (replaces the whole staged set).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrLinesStaged {
    pub tenant_id: TenantId,
    pub sheet_id: ExpenseSheetId,
    pub lines: Vec<PrLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ExpenseLinesCleared (existing lines dropped ahead of a conversion).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseLinesCleared {
    pub tenant_id: TenantId,
    pub sheet_id: ExpenseSheetId,
    pub line_nos: Vec<u32>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseLineAdded {
    pub tenant_id: TenantId,
    pub sheet_id: ExpenseSheetId,
    pub line: ExpenseLine,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseLineRemoved {
    pub tenant_id: TenantId,
    pub sheet_id: ExpenseSheetId,
    pub line_no: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PrLinesDiscarded (staged rows deleted after use).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrLinesDiscarded {
    pub tenant_id: TenantId,
    pub sheet_id: ExpenseSheetId,
    pub count: usize,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpenseSheetEvent {
    ExpenseSheetCreated(ExpenseSheetCreated),
    ExpenseSheetRenamed(ExpenseSheetRenamed),
    EmployeeAssigned(EmployeeAssigned),
    PurchaseRequestSelected(PurchaseRequestSelected),
    PrUsageChanged(PrUsageChanged),
    PrLinesStaged(PrLinesStaged),
    ExpenseLinesCleared(ExpenseLinesCleared),
    ExpenseLineAdded(ExpenseLineAdded),
    ExpenseLineRemoved(ExpenseLineRemoved),
    PrLinesDiscarded(PrLinesDiscarded),
}

impl ExpenseSheetEvent {
    /// Tenant and sheet the event belongs to.
    pub fn stream(&self) -> (TenantId, ExpenseSheetId) {
        match self {
            ExpenseSheetEvent::ExpenseSheetCreated(e) => (e.tenant_id, e.sheet_id),
            ExpenseSheetEvent::ExpenseSheetRenamed(e) => (e.tenant_id, e.sheet_id),
            ExpenseSheetEvent::EmployeeAssigned(e) => (e.tenant_id, e.sheet_id),
            ExpenseSheetEvent::PurchaseRequestSelected(e) => (e.tenant_id, e.sheet_id),
            ExpenseSheetEvent::PrUsageChanged(e) => (e.tenant_id, e.sheet_id),
            ExpenseSheetEvent::PrLinesStaged(e) => (e.tenant_id, e.sheet_id),
            ExpenseSheetEvent::ExpenseLinesCleared(e) => (e.tenant_id, e.sheet_id),
            ExpenseSheetEvent::ExpenseLineAdded(e) => (e.tenant_id, e.sheet_id),
            ExpenseSheetEvent::ExpenseLineRemoved(e) => (e.tenant_id, e.sheet_id),
            ExpenseSheetEvent::PrLinesDiscarded(e) => (e.tenant_id, e.sheet_id),
        }
    }
}

impl Event for ExpenseSheetEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ExpenseSheetEvent::ExpenseSheetCreated(_) => "expenses.sheet.created",
            ExpenseSheetEvent::ExpenseSheetRenamed(_) => "expenses.sheet.renamed",
            ExpenseSheetEvent::EmployeeAssigned(_) => "expenses.sheet.employee_assigned",
            ExpenseSheetEvent::PurchaseRequestSelected(_) => {
                "expenses.sheet.purchase_request_selected"
            }
            ExpenseSheetEvent::PrUsageChanged(_) => "expenses.sheet.pr_usage_changed",
            ExpenseSheetEvent::PrLinesStaged(_) => "expenses.sheet.pr_lines_staged",
            ExpenseSheetEvent::ExpenseLinesCleared(_) => "expenses.sheet.expense_lines_cleared",
            ExpenseSheetEvent::ExpenseLineAdded(_) => "expenses.sheet.expense_line_added",
            ExpenseSheetEvent::ExpenseLineRemoved(_) => "expenses.sheet.expense_line_removed",
            ExpenseSheetEvent::PrLinesDiscarded(_) => "expenses.sheet.pr_lines_discarded",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ExpenseSheetEvent::ExpenseSheetCreated(e) => e.occurred_at,
            ExpenseSheetEvent::ExpenseSheetRenamed(e) => e.occurred_at,
            ExpenseSheetEvent::EmployeeAssigned(e) => e.occurred_at,
            ExpenseSheetEvent::PurchaseRequestSelected(e) => e.occurred_at,
            ExpenseSheetEvent::PrUsageChanged(e) => e.occurred_at,
            ExpenseSheetEvent::PrLinesStaged(e) => e.occurred_at,
            ExpenseSheetEvent::ExpenseLinesCleared(e) => e.occurred_at,
            ExpenseSheetEvent::ExpenseLineAdded(e) => e.occurred_at,
            ExpenseSheetEvent::ExpenseLineRemoved(e) => e.occurred_at,
            ExpenseSheetEvent::PrLinesDiscarded(e) => e.occurred_at,
        }
    }
}

impl Aggregate for ExpenseSheet {
    type Command = ExpenseSheetCommand;
    type Event = ExpenseSheetEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ExpenseSheetEvent::ExpenseSheetCreated(e) => {
                self.id = e.sheet_id;
                self.tenant_id = Some(e.tenant_id);
                self.name = e.name.clone();
                self.employee_id = Some(e.employee.employee_id);
                self.employee_user_id = e.employee.employee_user_id;
                self.pr_for = e.pr_for;
                self.purchase_request_id = None;
                self.pr_lines.clear();
                self.expense_lines.clear();
                self.last_line_no = 0;
                self.created = true;
            }
            ExpenseSheetEvent::ExpenseSheetRenamed(e) => {
                self.name = e.name.clone();
            }
            ExpenseSheetEvent::EmployeeAssigned(e) => {
                self.employee_id = Some(e.employee.employee_id);
                self.employee_user_id = e.employee.employee_user_id;
            }
            ExpenseSheetEvent::PurchaseRequestSelected(e) => {
                self.purchase_request_id = e.purchase_request_id;
            }
            ExpenseSheetEvent::PrUsageChanged(e) => {
                self.pr_for = e.pr_for;
            }
            ExpenseSheetEvent::PrLinesStaged(e) => {
                self.pr_lines = e.lines.clone();
            }
            ExpenseSheetEvent::ExpenseLinesCleared(e) => {
                self.expense_lines.retain(|l| !e.line_nos.contains(&l.line_no));
            }
            ExpenseSheetEvent::ExpenseLineAdded(e) => {
                self.last_line_no = self.last_line_no.max(e.line.line_no);
                self.expense_lines.push(e.line.clone());
            }
            ExpenseSheetEvent::ExpenseLineRemoved(e) => {
                self.expense_lines.retain(|l| l.line_no != e.line_no);
            }
            ExpenseSheetEvent::PrLinesDiscarded(_) => {
                self.pr_lines.clear();
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ExpenseSheetCommand::Create(cmd) => self.handle_create(cmd),
            ExpenseSheetCommand::Update(cmd) => self.handle_update(cmd),
            ExpenseSheetCommand::AddExpenseLine(cmd) => self.handle_add_line(cmd),
            ExpenseSheetCommand::RemoveExpenseLine(cmd) => self.handle_remove_line(cmd),
        }
    }
}

impl ExpenseSheet {
    fn ensure_existing(
        &self,
        tenant_id: TenantId,
        sheet_id: ExpenseSheetId,
    ) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.id != sheet_id {
            return Err(DomainError::invariant("sheet_id mismatch"));
        }
        Ok(())
    }

    fn handle_create(
        &self,
        cmd: &CreateExpenseSheet,
    ) -> Result<Vec<ExpenseSheetEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("expense report already exists"));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("expense report name is required"));
        }
        if cmd.purchase_request_id.is_none() && !cmd.pr_lines.is_empty() {
            return Err(DomainError::validation(
                "staged rows require a linked purchase request",
            ));
        }

        let mut decided = vec![ExpenseSheetEvent::ExpenseSheetCreated(ExpenseSheetCreated {
            tenant_id: cmd.tenant_id,
            sheet_id: cmd.sheet_id,
            name: cmd.name.clone(),
            employee: cmd.employee,
            pr_for: cmd.pr_for,
            occurred_at: cmd.occurred_at,
        })];
        if cmd.purchase_request_id.is_some() {
            decided.push(ExpenseSheetEvent::PurchaseRequestSelected(
                PurchaseRequestSelected {
                    tenant_id: cmd.tenant_id,
                    sheet_id: cmd.sheet_id,
                    purchase_request_id: cmd.purchase_request_id,
                    occurred_at: cmd.occurred_at,
                },
            ));
        }
        if !cmd.pr_lines.is_empty() {
            decided.push(ExpenseSheetEvent::PrLinesStaged(PrLinesStaged {
                tenant_id: cmd.tenant_id,
                sheet_id: cmd.sheet_id,
                lines: cmd.pr_lines.clone(),
                occurred_at: cmd.occurred_at,
            }));
        }

        if cmd.purchase_request_id.is_some() {
            let preview = self.preview(&decided);
            decided.extend(preview.convert_staged_lines(cmd.occurred_at));
        }

        Ok(decided)
    }

    fn handle_update(
        &self,
        cmd: &UpdateExpenseSheet,
    ) -> Result<Vec<ExpenseSheetEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.sheet_id)?;

        let changes = &cmd.changes;
        let (tenant_id, sheet_id, occurred_at) = (cmd.tenant_id, cmd.sheet_id, cmd.occurred_at);
        let mut decided = Vec::new();

        if let Some(name) = &changes.name {
            if name.trim().is_empty() {
                return Err(DomainError::validation("expense report name is required"));
            }
            if *name != self.name {
                decided.push(ExpenseSheetEvent::ExpenseSheetRenamed(ExpenseSheetRenamed {
                    tenant_id,
                    sheet_id,
                    name: name.clone(),
                    occurred_at,
                }));
            }
        }

        let employee_changed = changes
            .employee
            .is_some_and(|e| Some(e.employee_id) != self.employee_id);
        let assignment_changed = changes.employee.filter(|e| {
            Some(e.employee_id) != self.employee_id || e.employee_user_id != self.employee_user_id
        });
        if let Some(employee) = assignment_changed {
            decided.push(ExpenseSheetEvent::EmployeeAssigned(EmployeeAssigned {
                tenant_id,
                sheet_id,
                employee,
                occurred_at,
            }));
        }

        if let Some(pr_for) = changes.pr_for {
            if pr_for != self.pr_for {
                decided.push(ExpenseSheetEvent::PrUsageChanged(PrUsageChanged {
                    tenant_id,
                    sheet_id,
                    pr_for,
                    occurred_at,
                }));
            }
        }

        // A new employee invalidates the previous selection unless the same write picks a new one.
        let selection = match changes.purchase_request {
            None if employee_changed && self.purchase_request_id.is_some() => {
                Some(RequestSelection::Clear)
            }
            other => other,
        };
        if let Some(selection) = selection {
            let purchase_request_id = match selection {
                RequestSelection::Link(id) => Some(id),
                RequestSelection::Clear => None,
            };
            if purchase_request_id != self.purchase_request_id {
                decided.push(ExpenseSheetEvent::PurchaseRequestSelected(
                    PurchaseRequestSelected {
                        tenant_id,
                        sheet_id,
                        purchase_request_id,
                        occurred_at,
                    },
                ));
            }
        }

        let staged = changes.pr_lines.as_ref().filter(|lines| !lines.is_empty());
        if let Some(lines) = staged {
            decided.push(ExpenseSheetEvent::PrLinesStaged(PrLinesStaged {
                tenant_id,
                sheet_id,
                lines: lines.clone(),
                occurred_at,
            }));
        }

        // Every write leaves the sheet without staged rows: they are either
        // converted against the linked request or discarded.
        let after = self.preview(&decided);
        if matches!(selection, Some(RequestSelection::Link(_))) || staged.is_some() {
            if after.purchase_request_id.is_none() {
                return Err(DomainError::validation(
                    "staged rows require a linked purchase request",
                ));
            }
            decided.extend(after.convert_staged_lines(occurred_at));
        } else if !after.pr_lines.is_empty() {
            decided.push(ExpenseSheetEvent::PrLinesDiscarded(PrLinesDiscarded {
                tenant_id,
                sheet_id,
                count: after.pr_lines.len(),
                occurred_at,
            }));
        }

        Ok(decided)
    }

    fn handle_add_line(
        &self,
        cmd: &AddExpenseLine,
    ) -> Result<Vec<ExpenseSheetEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.sheet_id)?;

        if cmd.values.name.trim().is_empty() {
            return Err(DomainError::validation("expense description is required"));
        }
        if cmd.values.quantity < Decimal::ZERO {
            return Err(DomainError::validation("quantity cannot be negative"));
        }
        let Some(employee_id) = self.employee_id else {
            return Err(DomainError::invariant("expense report has no employee"));
        };

        Ok(vec![ExpenseSheetEvent::ExpenseLineAdded(ExpenseLineAdded {
            tenant_id: cmd.tenant_id,
            sheet_id: cmd.sheet_id,
            line: ExpenseLine::from_staged(self.last_line_no + 1, employee_id, &cmd.values),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove_line(
        &self,
        cmd: &RemoveExpenseLine,
    ) -> Result<Vec<ExpenseSheetEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.sheet_id)?;

        if !self.expense_lines.iter().any(|l| l.line_no == cmd.line_no) {
            return Err(DomainError::not_found());
        }

        Ok(vec![ExpenseSheetEvent::ExpenseLineRemoved(ExpenseLineRemoved {
            tenant_id: cmd.tenant_id,
            sheet_id: cmd.sheet_id,
            line_no: cmd.line_no,
            occurred_at: cmd.occurred_at,
        })])
    }

    /// State after `events`, without touching `self`.
    fn preview(&self, events: &[ExpenseSheetEvent]) -> Self {
        let mut next = self.clone();
        for ev in events {
            next.apply(ev);
        }
        next
    }

    /// Replace the expense lines with the staged rows, then drop the staged rows.
    ///
    /// Existing expense lines are removed even when they were entered by hand.
    fn convert_staged_lines(&self, occurred_at: DateTime<Utc>) -> Vec<ExpenseSheetEvent> {
        let (Some(tenant_id), sheet_id) = (self.tenant_id, self.id) else {
            return vec![];
        };
        let mut decided = Vec::new();

        if !self.expense_lines.is_empty() {
            decided.push(ExpenseSheetEvent::ExpenseLinesCleared(ExpenseLinesCleared {
                tenant_id,
                sheet_id,
                line_nos: self.expense_lines.iter().map(|l| l.line_no).collect(),
                occurred_at,
            }));
        }

        if let (PrUsage::Expense, Some(employee_id)) = (self.pr_for, self.employee_id) {
            let mut line_no = self.last_line_no;
            for staged in &self.pr_lines {
                line_no += 1;
                tracing::debug!(%sheet_id, line_no, name = %staged.name, "converting staged row");
                decided.push(ExpenseSheetEvent::ExpenseLineAdded(ExpenseLineAdded {
                    tenant_id,
                    sheet_id,
                    line: ExpenseLine::from_staged(line_no, employee_id, staged),
                    occurred_at,
                }));
            }
        }

        if !self.pr_lines.is_empty() {
            decided.push(ExpenseSheetEvent::PrLinesDiscarded(PrLinesDiscarded {
                tenant_id,
                sheet_id,
                count: self.pr_lines.len(),
                occurred_at,
            }));
        }

        decided
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forgeerp_core::{CompanyId, CurrencyId, ProductId, UomId};
    use forgeerp_events::execute;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn staged(name: &str, unit: Decimal, qty: Decimal) -> PrLine {
        PrLine {
            name: name.to_string(),
            product_id: ProductId::new(),
            product_uom_id: UomId::new(),
            unit_amount: unit,
            quantity: qty,
            company_id: CompanyId::new(),
            currency_id: CurrencyId::new(),
            analytic_account_id: None,
            analytic_tag_ids: vec![],
            description: None,
            reference: None,
        }
    }

    fn employee() -> EmployeeAssignment {
        EmployeeAssignment {
            employee_id: EmployeeId::new(),
            employee_user_id: Some(UserId::new()),
        }
    }

    fn create_cmd(
        tenant_id: TenantId,
        sheet_id: ExpenseSheetId,
        purchase_request_id: Option<PurchaseRequestId>,
        pr_lines: Vec<PrLine>,
    ) -> ExpenseSheetCommand {
        ExpenseSheetCommand::Create(CreateExpenseSheet {
            tenant_id,
            sheet_id,
            name: "Trip to Bangkok".to_string(),
            employee: employee(),
            purchase_request_id,
            pr_for: PrUsage::Expense,
            pr_lines,
            occurred_at: test_time(),
        })
    }

    fn new_sheet() -> (ExpenseSheet, TenantId) {
        let sheet_id = ExpenseSheetId::new(AggregateId::new());
        (ExpenseSheet::empty(sheet_id), TenantId::new())
    }

    fn request_id() -> PurchaseRequestId {
        PurchaseRequestId::new(AggregateId::new())
    }

    #[test]
    fn create_with_request_converts_staged_rows() {
        let (mut sheet, tenant_id) = new_sheet();
        let rows = vec![
            staged("Hotel", dec!(120), dec!(3)),
            staged("Taxi", dec!(15.5), dec!(2)),
        ];

        let cmd = create_cmd(tenant_id, sheet.id_typed(), Some(request_id()), rows.clone());
        execute(&mut sheet, &cmd).unwrap();

        assert!(sheet.pr_lines().is_empty());
        assert_eq!(sheet.expense_lines().len(), rows.len());
        assert_eq!(sheet.expense_lines()[0].name, "Hotel");
        assert_eq!(sheet.expense_lines()[0].total_amount(), dec!(360));
        assert_eq!(sheet.expense_lines()[1].line_no, 2);
        assert_eq!(sheet.expense_lines()[1].total_amount(), dec!(31.0));
        assert_eq!(
            sheet.expense_lines()[0].employee_id,
            sheet.employee_id().unwrap()
        );
    }

    #[test]
    fn create_rejects_staged_rows_without_request() {
        let (sheet, tenant_id) = new_sheet();
        let cmd = create_cmd(
            tenant_id,
            sheet.id_typed(),
            None,
            vec![staged("Hotel", dec!(120), dec!(1))],
        );

        let err = sheet.handle(&cmd).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn restaging_rows_for_the_linked_request_converts_them() {
        let (mut sheet, tenant_id) = new_sheet();
        let sheet_id = sheet.id_typed();
        let linked = request_id();
        execute(
            &mut sheet,
            &create_cmd(
                tenant_id,
                sheet_id,
                Some(linked),
                vec![staged("Hotel", dec!(100), dec!(1))],
            ),
        )
        .unwrap();

        // Same request picked again: only the rows travel with the write.
        let update = ExpenseSheetCommand::Update(UpdateExpenseSheet {
            tenant_id,
            sheet_id: sheet.id_typed(),
            changes: SheetChanges {
                pr_lines: Some(vec![
                    staged("Hotel", dec!(100), dec!(1)),
                    staged("Parking", dec!(12), dec!(2)),
                ]),
                ..SheetChanges::default()
            },
            occurred_at: test_time(),
        });
        let events = execute(&mut sheet, &update).unwrap();

        assert!(sheet.pr_lines().is_empty());
        assert_eq!(sheet.purchase_request_id(), Some(linked));
        let names: Vec<_> = sheet.expense_lines().iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["Hotel", "Parking"]);
        assert!(
            !events
                .iter()
                .any(|e| matches!(e, ExpenseSheetEvent::PurchaseRequestSelected(_)))
        );
    }

    #[test]
    fn staging_rows_on_an_unlinked_sheet_is_rejected() {
        let (mut sheet, tenant_id) = new_sheet();
        let sheet_id = sheet.id_typed();
        execute(&mut sheet, &create_cmd(tenant_id, sheet_id, None, vec![])).unwrap();

        let err = sheet
            .handle(&ExpenseSheetCommand::Update(UpdateExpenseSheet {
                tenant_id,
                sheet_id: sheet.id_typed(),
                changes: SheetChanges {
                    pr_lines: Some(vec![staged("Hotel", dec!(100), dec!(1))]),
                    ..SheetChanges::default()
                },
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn handle_does_not_mutate_state() {
        let (sheet, tenant_id) = new_sheet();
        let before = sheet.clone();
        let cmd = create_cmd(
            tenant_id,
            sheet.id_typed(),
            Some(request_id()),
            vec![staged("Hotel", dec!(120), dec!(1))],
        );

        let events = sheet.handle(&cmd).unwrap();
        assert_eq!(sheet, before);
        assert_eq!(events.len(), 5);
    }

    #[test]
    fn reselecting_a_request_replaces_manual_lines() {
        let (mut sheet, tenant_id) = new_sheet();
        let sheet_id = sheet.id_typed();
        execute(&mut sheet, &create_cmd(tenant_id, sheet_id, None, vec![])).unwrap();
        execute(
            &mut sheet,
            &ExpenseSheetCommand::AddExpenseLine(AddExpenseLine {
                tenant_id,
                sheet_id: sheet_id,
                values: staged("Lunch", dec!(20), dec!(1)),
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert_eq!(sheet.expense_lines().len(), 1);

        let update = ExpenseSheetCommand::Update(UpdateExpenseSheet {
            tenant_id,
            sheet_id: sheet.id_typed(),
            changes: SheetChanges {
                purchase_request: Some(RequestSelection::Link(request_id())),
                pr_lines: Some(vec![
                    staged("Flight", dec!(400), dec!(1)),
                    staged("Visa", dec!(30), dec!(1)),
                ]),
                ..SheetChanges::default()
            },
            occurred_at: test_time(),
        });
        execute(&mut sheet, &update).unwrap();

        let names: Vec<_> = sheet.expense_lines().iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["Flight", "Visa"]);
        assert!(sheet.pr_lines().is_empty());
        // Line numbers keep increasing across conversions.
        assert_eq!(sheet.expense_lines()[0].line_no, 2);
    }

    #[test]
    fn update_without_request_field_does_not_convert() {
        let (mut sheet, tenant_id) = new_sheet();
        let sheet_id = sheet.id_typed();
        execute(
            &mut sheet,
            &create_cmd(
                tenant_id,
                sheet_id,
                Some(request_id()),
                vec![staged("Hotel", dec!(100), dec!(1))],
            ),
        )
        .unwrap();

        let rename = ExpenseSheetCommand::Update(UpdateExpenseSheet {
            tenant_id,
            sheet_id: sheet.id_typed(),
            changes: SheetChanges {
                name: Some("Trip to Chiang Mai".to_string()),
                ..SheetChanges::default()
            },
            occurred_at: test_time(),
        });
        let events = execute(&mut sheet, &rename).unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(sheet.name(), "Trip to Chiang Mai");
        assert_eq!(sheet.expense_lines().len(), 1);
    }

    #[test]
    fn changing_employee_clears_selection_and_keeps_lines() {
        let (mut sheet, tenant_id) = new_sheet();
        let sheet_id = sheet.id_typed();
        execute(
            &mut sheet,
            &create_cmd(
                tenant_id,
                sheet_id,
                Some(request_id()),
                vec![staged("Hotel", dec!(100), dec!(1))],
            ),
        )
        .unwrap();
        assert!(sheet.purchase_request_id().is_some());

        let new_employee = employee();
        execute(
            &mut sheet,
            &ExpenseSheetCommand::Update(UpdateExpenseSheet {
                tenant_id,
                sheet_id: sheet_id,
                changes: SheetChanges {
                    employee: Some(new_employee),
                    ..SheetChanges::default()
                },
                occurred_at: test_time(),
            }),
        )
        .unwrap();

        assert_eq!(sheet.employee_id(), Some(new_employee.employee_id));
        assert_eq!(sheet.purchase_request_id(), None);
        assert!(sheet.pr_lines().is_empty());
        assert_eq!(sheet.expense_lines().len(), 1);
    }

    #[test]
    fn unchanged_employee_emits_nothing() {
        let (mut sheet, tenant_id) = new_sheet();
        let sheet_id = sheet.id_typed();
        execute(&mut sheet, &create_cmd(tenant_id, sheet_id, None, vec![])).unwrap();
        let current = EmployeeAssignment {
            employee_id: sheet.employee_id().unwrap(),
            employee_user_id: sheet.employee_user_id(),
        };

        let events = sheet
            .handle(&ExpenseSheetCommand::Update(UpdateExpenseSheet {
                tenant_id,
                sheet_id: sheet.id_typed(),
                changes: SheetChanges {
                    employee: Some(current),
                    ..SheetChanges::default()
                },
                occurred_at: test_time(),
            }))
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn negative_zero_quantity_is_accepted() {
        let (mut sheet, tenant_id) = new_sheet();
        let sheet_id = sheet.id_typed();
        execute(&mut sheet, &create_cmd(tenant_id, sheet_id, None, vec![])).unwrap();
        let mut quantity = Decimal::ZERO;
        quantity.set_sign_negative(true);

        execute(
            &mut sheet,
            &ExpenseSheetCommand::AddExpenseLine(AddExpenseLine {
                tenant_id,
                sheet_id: sheet_id,
                values: staged("Tip", dec!(5), quantity),
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert_eq!(sheet.expense_lines().len(), 1);
    }

    #[test]
    fn empty_update_emits_nothing() {
        let (mut sheet, tenant_id) = new_sheet();
        let sheet_id = sheet.id_typed();
        execute(&mut sheet, &create_cmd(tenant_id, sheet_id, None, vec![])).unwrap();

        let events = sheet
            .handle(&ExpenseSheetCommand::Update(UpdateExpenseSheet {
                tenant_id,
                sheet_id: sheet.id_typed(),
                changes: SheetChanges::default(),
                occurred_at: test_time(),
            }))
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn removing_an_unknown_line_is_not_found() {
        let (mut sheet, tenant_id) = new_sheet();
        let sheet_id = sheet.id_typed();
        execute(&mut sheet, &create_cmd(tenant_id, sheet_id, None, vec![])).unwrap();

        let err = sheet
            .handle(&ExpenseSheetCommand::RemoveExpenseLine(RemoveExpenseLine {
                tenant_id,
                sheet_id: sheet.id_typed(),
                line_no: 9,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert_eq!(err, DomainError::NotFound);
    }

    #[test]
    fn update_before_create_is_not_found() {
        let (sheet, tenant_id) = new_sheet();
        let err = sheet
            .handle(&ExpenseSheetCommand::Update(UpdateExpenseSheet {
                tenant_id,
                sheet_id: sheet.id_typed(),
                changes: SheetChanges::default(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert_eq!(err, DomainError::NotFound);
    }
}

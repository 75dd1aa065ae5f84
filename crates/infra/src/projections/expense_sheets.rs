use rust_decimal::Decimal;
use serde_json::Value as JsonValue;

use forgeerp_core::{EmployeeId, TenantId, UserId};
use forgeerp_events::EventEnvelope;
use forgeerp_expenses::{ExpenseLine, ExpenseSheetEvent, ExpenseSheetId, PrUsage};
use forgeerp_purchasing::PurchaseRequestId;

use super::ProjectionError;
use super::cursor::{Position, StreamCursors};
use crate::read_model::TenantStore;

pub const AGGREGATE_TYPE: &str = "expenses.sheet";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpenseSheetReadModel {
    pub sheet_id: ExpenseSheetId,
    pub name: String,
    pub employee_id: EmployeeId,
    pub employee_user_id: Option<UserId>,
    pub purchase_request_id: Option<PurchaseRequestId>,
    pub pr_for: PrUsage,
    /// Staged rows still waiting for conversion.
    pub staged_lines: usize,
    pub expense_lines: Vec<ExpenseLine>,
}

impl ExpenseSheetReadModel {
    pub fn total_amount(&self) -> Decimal {
        self.expense_lines.iter().map(ExpenseLine::total_amount).sum()
    }
}

#[derive(Debug)]
pub struct ExpenseSheetsProjection<S>
where
    S: TenantStore<ExpenseSheetId, ExpenseSheetReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> ExpenseSheetsProjection<S>
where
    S: TenantStore<ExpenseSheetId, ExpenseSheetReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::default(),
        }
    }

    pub fn get(
        &self,
        tenant_id: TenantId,
        sheet_id: &ExpenseSheetId,
    ) -> Option<ExpenseSheetReadModel> {
        self.store.get(tenant_id, sheet_id)
    }

    /// Expense reports currently pointing at `request_id`.
    pub fn referencing(
        &self,
        tenant_id: TenantId,
        request_id: PurchaseRequestId,
    ) -> Vec<ExpenseSheetId> {
        self.store
            .list(tenant_id)
            .into_iter()
            .filter(|s| s.purchase_request_id == Some(request_id))
            .map(|s| s.sheet_id)
            .collect()
    }

    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != AGGREGATE_TYPE {
            return Ok(());
        }

        let tenant_id = envelope.tenant_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        if let Position::Seen = self.cursors.check(tenant_id, aggregate_id, seq)? {
            return Ok(());
        }

        let ev: ExpenseSheetEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;

        let (event_tenant, sheet_id) = ev.stream();
        if event_tenant != tenant_id {
            return Err(ProjectionError::TenantIsolation(
                "event tenant_id does not match envelope tenant_id".to_string(),
            ));
        }
        if sheet_id.0 != aggregate_id {
            return Err(ProjectionError::TenantIsolation(
                "event sheet_id does not match envelope aggregate_id".to_string(),
            ));
        }

        match ev {
            ExpenseSheetEvent::ExpenseSheetCreated(e) => {
                self.store.upsert(
                    tenant_id,
                    e.sheet_id,
                    ExpenseSheetReadModel {
                        sheet_id: e.sheet_id,
                        name: e.name,
                        employee_id: e.employee.employee_id,
                        employee_user_id: e.employee.employee_user_id,
                        purchase_request_id: None,
                        pr_for: e.pr_for,
                        staged_lines: 0,
                        expense_lines: vec![],
                    },
                );
            }
            ExpenseSheetEvent::ExpenseSheetRenamed(e) => {
                self.update(tenant_id, sheet_id, |rm| rm.name = e.name);
            }
            ExpenseSheetEvent::EmployeeAssigned(e) => {
                self.update(tenant_id, sheet_id, |rm| {
                    rm.employee_id = e.employee.employee_id;
                    rm.employee_user_id = e.employee.employee_user_id;
                });
            }
            ExpenseSheetEvent::PurchaseRequestSelected(e) => {
                self.update(tenant_id, sheet_id, |rm| {
                    rm.purchase_request_id = e.purchase_request_id
                });
            }
            ExpenseSheetEvent::PrUsageChanged(e) => {
                self.update(tenant_id, sheet_id, |rm| rm.pr_for = e.pr_for);
            }
            ExpenseSheetEvent::PrLinesStaged(e) => {
                self.update(tenant_id, sheet_id, |rm| rm.staged_lines = e.lines.len());
            }
            ExpenseSheetEvent::ExpenseLinesCleared(e) => {
                self.update(tenant_id, sheet_id, |rm| {
                    rm.expense_lines.retain(|l| !e.line_nos.contains(&l.line_no))
                });
            }
            ExpenseSheetEvent::ExpenseLineAdded(e) => {
                self.update(tenant_id, sheet_id, |rm| rm.expense_lines.push(e.line));
            }
            ExpenseSheetEvent::ExpenseLineRemoved(e) => {
                self.update(tenant_id, sheet_id, |rm| {
                    rm.expense_lines.retain(|l| l.line_no != e.line_no)
                });
            }
            ExpenseSheetEvent::PrLinesDiscarded(_) => {
                self.update(tenant_id, sheet_id, |rm| rm.staged_lines = 0);
            }
        }

        self.cursors.advance(tenant_id, aggregate_id, seq);
        Ok(())
    }

    /// Drop the read models of every tenant in `envelopes` and replay them in stream order.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), ProjectionError> {
        let mut envs: Vec<_> = envelopes.into_iter().collect();

        let mut tenants = envs.iter().map(|e| e.tenant_id()).collect::<Vec<_>>();
        tenants.sort_by_key(|t| *t.as_uuid().as_bytes());
        tenants.dedup();
        for t in tenants {
            self.store.clear_tenant(t);
            self.cursors.clear_tenant(t);
        }

        envs.sort_by_key(|e| {
            (
                *e.tenant_id().as_uuid().as_bytes(),
                *e.aggregate_id().as_uuid().as_bytes(),
                e.sequence_number(),
            )
        });

        for env in &envs {
            self.apply_envelope(env)?;
        }
        Ok(())
    }

    fn update(
        &self,
        tenant_id: TenantId,
        sheet_id: ExpenseSheetId,
        f: impl FnOnce(&mut ExpenseSheetReadModel),
    ) {
        if let Some(mut rm) = self.store.get(tenant_id, &sheet_id) {
            f(&mut rm);
            self.store.upsert(tenant_id, sheet_id, rm);
        }
    }
}

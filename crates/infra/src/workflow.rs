//! Expense workflow: the host side of the purchase-request → expense-report link.
//!
//! Wires the command dispatcher, the bus and the read models together and
//! enforces what the aggregates cannot see on their own:
//!
//! - a request selected on a form must exist (and pass the selection policy)
//! - a request referenced by an expense report cannot be deleted
//!
//! Every mutating call folds the committed events into the read models before
//! returning, so reads are consistent with the caller's own writes.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;
use serde_json::Value as JsonValue;
use thiserror::Error;

use forgeerp_core::{AggregateId, DomainError, ProductId, TenantId, UomId, UserId};
use forgeerp_events::{EventBus, EventEnvelope, InMemoryEventBus, Subscription};
use forgeerp_expenses::{
    AddExpenseLine, ExpenseSheet, ExpenseSheetCommand, ExpenseSheetForm, ExpenseSheetId,
    ProductCatalog, RemoveExpenseLine, RequestSelection,
};
use forgeerp_purchasing::{
    AddRequestLine, ApproveRequest, CreatePurchaseRequest, DeleteRequest, PurchaseRequest,
    PurchaseRequestCommand, PurchaseRequestId, PurchaseRequestStatus, RejectRequest,
};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::config::ExpensesConfig;
use crate::event_store::{EventStore, InMemoryEventStore};
use crate::projections::{
    ExpenseSheetReadModel, ExpenseSheetsProjection, ProjectionError, PurchaseRequestReadModel,
    PurchaseRequestsProjection, expense_sheets, purchase_requests,
};
use crate::read_model::InMemoryTenantStore;

type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
type RequestStore = InMemoryTenantStore<PurchaseRequestId, PurchaseRequestReadModel>;
type SheetStore = InMemoryTenantStore<ExpenseSheetId, ExpenseSheetReadModel>;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Projection(#[from] ProjectionError),
    #[error("purchase request {0} not found")]
    UnknownRequest(PurchaseRequestId),
    #[error("purchase request {request_id} is referenced by {sheets} expense report(s)")]
    RequestInUse {
        request_id: PurchaseRequestId,
        sheets: usize,
    },
}

impl From<DomainError> for WorkflowError {
    fn from(value: DomainError) -> Self {
        Self::Dispatch(DispatchError::from(value))
    }
}

/// Product master data (default units of measure) kept in memory.
#[derive(Debug, Default)]
pub struct InMemoryProductCatalog {
    uoms: RwLock<HashMap<ProductId, UomId>>,
}

impl InMemoryProductCatalog {
    pub fn register(&self, product_id: ProductId, default_uom: UomId) {
        if let Ok(mut uoms) = self.uoms.write() {
            uoms.insert(product_id, default_uom);
        }
    }
}

impl ProductCatalog for InMemoryProductCatalog {
    fn default_uom(&self, product_id: ProductId) -> Option<UomId> {
        self.uoms.read().ok()?.get(&product_id).copied()
    }
}

pub struct ExpenseWorkflow<S = InMemoryEventStore> {
    dispatcher: CommandDispatcher<S, Bus>,
    subscription: Subscription<EventEnvelope<JsonValue>>,
    requests: PurchaseRequestsProjection<RequestStore>,
    sheets: ExpenseSheetsProjection<SheetStore>,
    catalog: InMemoryProductCatalog,
    config: ExpensesConfig,
}

impl ExpenseWorkflow<InMemoryEventStore> {
    pub fn in_memory(config: ExpensesConfig) -> Self {
        Self::new(InMemoryEventStore::new(), config)
    }
}

impl<S: EventStore> ExpenseWorkflow<S> {
    pub fn new(store: S, config: ExpensesConfig) -> Self {
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        // Subscribe before the first dispatch so no envelope is missed.
        let subscription = bus.subscribe();

        Self {
            dispatcher: CommandDispatcher::new(store, bus),
            subscription,
            requests: PurchaseRequestsProjection::new(InMemoryTenantStore::new()),
            sheets: ExpenseSheetsProjection::new(InMemoryTenantStore::new()),
            catalog: InMemoryProductCatalog::default(),
            config,
        }
    }

    pub fn config(&self) -> &ExpensesConfig {
        &self.config
    }

    pub fn catalog(&self) -> &InMemoryProductCatalog {
        &self.catalog
    }

    // -- purchase requests ------------------------------------------------

    pub fn create_purchase_request(
        &self,
        cmd: CreatePurchaseRequest,
    ) -> Result<PurchaseRequestId, WorkflowError> {
        let (tenant_id, request_id) = (cmd.tenant_id, cmd.request_id);
        self.dispatch_request(
            tenant_id,
            request_id,
            PurchaseRequestCommand::CreatePurchaseRequest(cmd),
        )?;
        tracing::info!(%tenant_id, %request_id, "purchase request created");
        Ok(request_id)
    }

    pub fn add_purchase_request_line(&self, cmd: AddRequestLine) -> Result<(), WorkflowError> {
        self.dispatch_request(cmd.tenant_id, cmd.request_id, PurchaseRequestCommand::AddLine(cmd))
    }

    pub fn approve_purchase_request(&self, cmd: ApproveRequest) -> Result<(), WorkflowError> {
        self.dispatch_request(cmd.tenant_id, cmd.request_id, PurchaseRequestCommand::Approve(cmd))
    }

    pub fn reject_purchase_request(&self, cmd: RejectRequest) -> Result<(), WorkflowError> {
        self.dispatch_request(cmd.tenant_id, cmd.request_id, PurchaseRequestCommand::Reject(cmd))
    }

    /// Delete a purchase request unless an expense report still points at it.
    pub fn delete_purchase_request(&self, cmd: DeleteRequest) -> Result<(), WorkflowError> {
        let (tenant_id, request_id) = (cmd.tenant_id, cmd.request_id);
        let referencing = self.sheets.referencing(tenant_id, request_id);
        if !referencing.is_empty() {
            tracing::warn!(
                %tenant_id,
                %request_id,
                sheets = referencing.len(),
                "refusing to delete referenced purchase request"
            );
            return Err(WorkflowError::RequestInUse {
                request_id,
                sheets: referencing.len(),
            });
        }

        self.dispatch_request(tenant_id, request_id, PurchaseRequestCommand::Delete(cmd))?;
        tracing::info!(%tenant_id, %request_id, "purchase request deleted");
        Ok(())
    }

    pub fn purchase_request(
        &self,
        tenant_id: TenantId,
        request_id: PurchaseRequestId,
    ) -> Option<PurchaseRequestReadModel> {
        self.requests.get(tenant_id, &request_id)
    }

    /// Requests the given user could pick on an expense report.
    pub fn selectable_requests(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
    ) -> Vec<PurchaseRequestReadModel> {
        self.requests
            .list_for_requester(tenant_id, user_id)
            .into_iter()
            .filter(|r| {
                !self.config.selection.approved_only || r.status == PurchaseRequestStatus::Approved
            })
            .collect()
    }

    // -- expense report form ----------------------------------------------

    /// Open a form over an existing expense report.
    pub fn open_form(
        &self,
        tenant_id: TenantId,
        sheet_id: ExpenseSheetId,
    ) -> Result<ExpenseSheetForm, WorkflowError> {
        let sheet = self.load_sheet(tenant_id, sheet_id)?;
        if !sheet.is_created() {
            return Err(DispatchError::NotFound.into());
        }
        Ok(ExpenseSheetForm::edit(&sheet)?)
    }

    /// Purchase-request change handler, fed from the read model.
    pub fn select_purchase_request(
        &self,
        tenant_id: TenantId,
        form: &mut ExpenseSheetForm,
        request_id: PurchaseRequestId,
    ) -> Result<(), WorkflowError> {
        let request = self
            .requests
            .get(tenant_id, &request_id)
            .ok_or(WorkflowError::UnknownRequest(request_id))?;
        form.select_purchase_request(&request, &self.config.selection)?;
        tracing::debug!(
            %tenant_id,
            %request_id,
            staged = form.pr_lines().len(),
            "staged purchase request lines"
        );
        Ok(())
    }

    pub fn change_line_product(
        &self,
        form: &mut ExpenseSheetForm,
        index: usize,
        product_id: ProductId,
    ) -> Result<(), WorkflowError> {
        Ok(form.change_line_product(index, product_id, &self.catalog)?)
    }

    /// Save a new expense report (create hook: converts staged rows when a request is set).
    pub fn create_sheet(
        &self,
        tenant_id: TenantId,
        form: &ExpenseSheetForm,
    ) -> Result<ExpenseSheetId, WorkflowError> {
        if let Some(request_id) = form.purchase_request_id() {
            self.ensure_request_exists(tenant_id, request_id)?;
        }

        let sheet_id = ExpenseSheetId::new(AggregateId::new());
        let cmd = form.to_create_command(tenant_id, sheet_id, Utc::now())?;
        self.dispatch_sheet(tenant_id, sheet_id, ExpenseSheetCommand::Create(cmd))?;

        tracing::info!(
            %tenant_id,
            %sheet_id,
            purchase_request = ?form.purchase_request_id(),
            "expense report created"
        );
        Ok(sheet_id)
    }

    /// Save an edited expense report (write hook: converts any staged rows it carries).
    pub fn update_sheet(
        &self,
        tenant_id: TenantId,
        form: &ExpenseSheetForm,
    ) -> Result<(), WorkflowError> {
        let cmd = form.to_update_command(tenant_id, Utc::now())?;
        if cmd.changes.is_empty() {
            return Ok(());
        }
        if let Some(RequestSelection::Link(request_id)) = cmd.changes.purchase_request {
            self.ensure_request_exists(tenant_id, request_id)?;
        }

        let sheet_id = cmd.sheet_id;
        self.dispatch_sheet(tenant_id, sheet_id, ExpenseSheetCommand::Update(cmd))?;
        tracing::info!(%tenant_id, %sheet_id, "expense report updated");
        Ok(())
    }

    pub fn add_expense_line(&self, cmd: AddExpenseLine) -> Result<(), WorkflowError> {
        self.dispatch_sheet(
            cmd.tenant_id,
            cmd.sheet_id,
            ExpenseSheetCommand::AddExpenseLine(cmd),
        )
    }

    pub fn remove_expense_line(&self, cmd: RemoveExpenseLine) -> Result<(), WorkflowError> {
        self.dispatch_sheet(
            cmd.tenant_id,
            cmd.sheet_id,
            ExpenseSheetCommand::RemoveExpenseLine(cmd),
        )
    }

    pub fn sheet(
        &self,
        tenant_id: TenantId,
        sheet_id: ExpenseSheetId,
    ) -> Option<ExpenseSheetReadModel> {
        self.sheets.get(tenant_id, &sheet_id)
    }

    /// Current aggregate state, including staged rows not yet converted.
    pub fn load_sheet(
        &self,
        tenant_id: TenantId,
        sheet_id: ExpenseSheetId,
    ) -> Result<ExpenseSheet, WorkflowError> {
        Ok(self
            .dispatcher
            .load(tenant_id, sheet_id.0, |_, id| ExpenseSheet::empty(ExpenseSheetId::new(id)))?)
    }

    pub fn load_purchase_request(
        &self,
        tenant_id: TenantId,
        request_id: PurchaseRequestId,
    ) -> Result<PurchaseRequest, WorkflowError> {
        Ok(self.dispatcher.load(tenant_id, request_id.0, |_, id| {
            PurchaseRequest::empty(PurchaseRequestId::new(id))
        })?)
    }

    // -- internals ----------------------------------------------------------

    fn ensure_request_exists(
        &self,
        tenant_id: TenantId,
        request_id: PurchaseRequestId,
    ) -> Result<(), WorkflowError> {
        match self.requests.get(tenant_id, &request_id) {
            Some(r) if r.status != PurchaseRequestStatus::Deleted => Ok(()),
            _ => Err(WorkflowError::UnknownRequest(request_id)),
        }
    }

    fn dispatch_request(
        &self,
        tenant_id: TenantId,
        request_id: PurchaseRequestId,
        command: PurchaseRequestCommand,
    ) -> Result<(), WorkflowError> {
        self.dispatcher.dispatch(
            tenant_id,
            request_id.0,
            purchase_requests::AGGREGATE_TYPE,
            command,
            |_, id| PurchaseRequest::empty(PurchaseRequestId::new(id)),
        )?;
        self.sync()
    }

    fn dispatch_sheet(
        &self,
        tenant_id: TenantId,
        sheet_id: ExpenseSheetId,
        command: ExpenseSheetCommand,
    ) -> Result<(), WorkflowError> {
        self.dispatcher.dispatch(
            tenant_id,
            sheet_id.0,
            expense_sheets::AGGREGATE_TYPE,
            command,
            |_, id| ExpenseSheet::empty(ExpenseSheetId::new(id)),
        )?;
        self.sync()
    }

    /// Fold every published envelope into the read models.
    fn sync(&self) -> Result<(), WorkflowError> {
        for envelope in self.subscription.drain() {
            self.requests.apply_envelope(&envelope)?;
            self.sheets.apply_envelope(&envelope)?;
        }
        Ok(())
    }
}

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use forgeerp_core::{
    Aggregate, AggregateId, AggregateRoot, AnalyticAccountId, AnalyticTagId, CompanyId,
    CurrencyId, DomainError, ProductId, TenantId, UomId, UserId,
};
use forgeerp_events::Event;

/// Purchase request identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PurchaseRequestId(pub AggregateId);

impl PurchaseRequestId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for PurchaseRequestId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Purchase request status lifecycle.
///
/// `Draft → Approved | Rejected`; any non-deleted request can be deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PurchaseRequestStatus {
    Draft,
    Approved,
    Rejected,
    Deleted,
}

/// Purchase request line.
///
/// `estimated_cost` is the expected cost of the whole line, not per unit.
/// Company and currency are inherited from the request header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseRequestLine {
    pub line_no: u32,
    pub name: String,
    pub product_id: ProductId,
    pub product_uom_id: UomId,
    pub product_qty: Decimal,
    pub estimated_cost: Decimal,
    pub company_id: CompanyId,
    pub currency_id: CurrencyId,
    pub analytic_account_id: Option<AnalyticAccountId>,
    pub analytic_tag_ids: Vec<AnalyticTagId>,
    pub description: Option<String>,
    pub specifications: Option<String>,
}

/// Line payload supplied by the requester (header-derived fields are filled in by the aggregate).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRequestLine {
    pub name: String,
    pub product_id: ProductId,
    pub product_uom_id: UomId,
    pub product_qty: Decimal,
    pub estimated_cost: Decimal,
    pub analytic_account_id: Option<AnalyticAccountId>,
    pub analytic_tag_ids: Vec<AnalyticTagId>,
    pub description: Option<String>,
    pub specifications: Option<String>,
}

/// Aggregate root: PurchaseRequest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseRequest {
    id: PurchaseRequestId,
    tenant_id: Option<TenantId>,
    name: String,
    requested_by: Option<UserId>,
    company_id: Option<CompanyId>,
    currency_id: Option<CurrencyId>,
    status: PurchaseRequestStatus,
    lines: Vec<PurchaseRequestLine>,
    version: u64,
    created: bool,
}

impl PurchaseRequest {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: PurchaseRequestId) -> Self {
        Self {
            id,
            tenant_id: None,
            name: String::new(),
            requested_by: None,
            company_id: None,
            currency_id: None,
            status: PurchaseRequestStatus::Draft,
            lines: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> PurchaseRequestId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn requested_by(&self) -> Option<UserId> {
        self.requested_by
    }

    pub fn status(&self) -> PurchaseRequestStatus {
        self.status
    }

    pub fn lines(&self) -> &[PurchaseRequestLine] {
        &self.lines
    }

    pub fn is_created(&self) -> bool {
        self.created
    }
}

impl AggregateRoot for PurchaseRequest {
    type Id = PurchaseRequestId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreatePurchaseRequest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePurchaseRequest {
    pub tenant_id: TenantId,
    pub request_id: PurchaseRequestId,
    pub name: String,
    pub requested_by: UserId,
    pub company_id: CompanyId,
    pub currency_id: CurrencyId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddRequestLine (only allowed in Draft).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddRequestLine {
    pub tenant_id: TenantId,
    pub request_id: PurchaseRequestId,
    pub line: NewRequestLine,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ApproveRequest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveRequest {
    pub tenant_id: TenantId,
    pub request_id: PurchaseRequestId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RejectRequest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectRequest {
    pub tenant_id: TenantId,
    pub request_id: PurchaseRequestId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeleteRequest.
///
/// Whether the request is still referenced by an expense report is checked by
/// the application layer before this command is dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub tenant_id: TenantId,
    pub request_id: PurchaseRequestId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseRequestCommand {
    CreatePurchaseRequest(CreatePurchaseRequest),
    AddLine(AddRequestLine),
    Approve(ApproveRequest),
    Reject(RejectRequest),
    Delete(DeleteRequest),
}

/// Event: PurchaseRequestCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseRequestCreated {
    pub tenant_id: TenantId,
    pub request_id: PurchaseRequestId,
    pub name: String,
    pub requested_by: UserId,
    pub company_id: CompanyId,
    pub currency_id: CurrencyId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PurchaseRequestLineAdded (carries the fully resolved line).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseRequestLineAdded {
    pub tenant_id: TenantId,
    pub request_id: PurchaseRequestId,
    pub line: PurchaseRequestLine,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseRequestApproved {
    pub tenant_id: TenantId,
    pub request_id: PurchaseRequestId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseRequestRejected {
    pub tenant_id: TenantId,
    pub request_id: PurchaseRequestId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseRequestDeleted {
    pub tenant_id: TenantId,
    pub request_id: PurchaseRequestId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseRequestEvent {
    PurchaseRequestCreated(PurchaseRequestCreated),
    PurchaseRequestLineAdded(PurchaseRequestLineAdded),
    PurchaseRequestApproved(PurchaseRequestApproved),
    PurchaseRequestRejected(PurchaseRequestRejected),
    PurchaseRequestDeleted(PurchaseRequestDeleted),
}

impl PurchaseRequestEvent {
    /// Tenant and request the event belongs to.
    pub fn stream(&self) -> (TenantId, PurchaseRequestId) {
        match self {
            PurchaseRequestEvent::PurchaseRequestCreated(e) => (e.tenant_id, e.request_id),
            PurchaseRequestEvent::PurchaseRequestLineAdded(e) => (e.tenant_id, e.request_id),
            PurchaseRequestEvent::PurchaseRequestApproved(e) => (e.tenant_id, e.request_id),
            PurchaseRequestEvent::PurchaseRequestRejected(e) => (e.tenant_id, e.request_id),
            PurchaseRequestEvent::PurchaseRequestDeleted(e) => (e.tenant_id, e.request_id),
        }
    }
}

impl Event for PurchaseRequestEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PurchaseRequestEvent::PurchaseRequestCreated(_) => "purchasing.request.created",
            PurchaseRequestEvent::PurchaseRequestLineAdded(_) => "purchasing.request.line_added",
            PurchaseRequestEvent::PurchaseRequestApproved(_) => "purchasing.request.approved",
            PurchaseRequestEvent::PurchaseRequestRejected(_) => "purchasing.request.rejected",
            PurchaseRequestEvent::PurchaseRequestDeleted(_) => "purchasing.request.deleted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PurchaseRequestEvent::PurchaseRequestCreated(e) => e.occurred_at,
            PurchaseRequestEvent::PurchaseRequestLineAdded(e) => e.occurred_at,
            PurchaseRequestEvent::PurchaseRequestApproved(e) => e.occurred_at,
            PurchaseRequestEvent::PurchaseRequestRejected(e) => e.occurred_at,
            PurchaseRequestEvent::PurchaseRequestDeleted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for PurchaseRequest {
    type Command = PurchaseRequestCommand;
    type Event = PurchaseRequestEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PurchaseRequestEvent::PurchaseRequestCreated(e) => {
                self.id = e.request_id;
                self.tenant_id = Some(e.tenant_id);
                self.name = e.name.clone();
                self.requested_by = Some(e.requested_by);
                self.company_id = Some(e.company_id);
                self.currency_id = Some(e.currency_id);
                self.status = PurchaseRequestStatus::Draft;
                self.lines.clear();
                self.created = true;
            }
            PurchaseRequestEvent::PurchaseRequestLineAdded(e) => {
                self.lines.push(e.line.clone());
            }
            PurchaseRequestEvent::PurchaseRequestApproved(_) => {
                self.status = PurchaseRequestStatus::Approved;
            }
            PurchaseRequestEvent::PurchaseRequestRejected(_) => {
                self.status = PurchaseRequestStatus::Rejected;
            }
            PurchaseRequestEvent::PurchaseRequestDeleted(_) => {
                self.status = PurchaseRequestStatus::Deleted;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            PurchaseRequestCommand::CreatePurchaseRequest(cmd) => self.handle_create(cmd),
            PurchaseRequestCommand::AddLine(cmd) => self.handle_add_line(cmd),
            PurchaseRequestCommand::Approve(cmd) => self.handle_approve(cmd),
            PurchaseRequestCommand::Reject(cmd) => self.handle_reject(cmd),
            PurchaseRequestCommand::Delete(cmd) => self.handle_delete(cmd),
        }
    }
}

impl PurchaseRequest {
    /// Existing, non-deleted request addressed by the right tenant and id.
    fn ensure_live(
        &self,
        tenant_id: TenantId,
        request_id: PurchaseRequestId,
    ) -> Result<(), DomainError> {
        if !self.created || self.status == PurchaseRequestStatus::Deleted {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.id != request_id {
            return Err(DomainError::invariant("request_id mismatch"));
        }
        Ok(())
    }

    fn handle_create(
        &self,
        cmd: &CreatePurchaseRequest,
    ) -> Result<Vec<PurchaseRequestEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("purchase request already exists"));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("purchase request name is required"));
        }

        Ok(vec![PurchaseRequestEvent::PurchaseRequestCreated(
            PurchaseRequestCreated {
                tenant_id: cmd.tenant_id,
                request_id: cmd.request_id,
                name: cmd.name.clone(),
                requested_by: cmd.requested_by,
                company_id: cmd.company_id,
                currency_id: cmd.currency_id,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_add_line(
        &self,
        cmd: &AddRequestLine,
    ) -> Result<Vec<PurchaseRequestEvent>, DomainError> {
        self.ensure_live(cmd.tenant_id, cmd.request_id)?;

        if self.status != PurchaseRequestStatus::Draft {
            return Err(DomainError::invariant(
                "cannot modify purchase request once approved or rejected",
            ));
        }

        let line = &cmd.line;
        if line.name.trim().is_empty() {
            return Err(DomainError::validation("line description is required"));
        }
        if line.product_qty < Decimal::ZERO {
            return Err(DomainError::validation("quantity cannot be negative"));
        }
        if line.estimated_cost < Decimal::ZERO {
            return Err(DomainError::validation("estimated cost cannot be negative"));
        }

        let (Some(company_id), Some(currency_id)) = (self.company_id, self.currency_id) else {
            return Err(DomainError::invariant("company and currency must be set"));
        };

        let mut analytic_tag_ids = line.analytic_tag_ids.clone();
        analytic_tag_ids.sort();
        analytic_tag_ids.dedup();

        let next_line_no = (self.lines.len() as u32) + 1;
        Ok(vec![PurchaseRequestEvent::PurchaseRequestLineAdded(
            PurchaseRequestLineAdded {
                tenant_id: cmd.tenant_id,
                request_id: cmd.request_id,
                line: PurchaseRequestLine {
                    line_no: next_line_no,
                    name: line.name.clone(),
                    product_id: line.product_id,
                    product_uom_id: line.product_uom_id,
                    product_qty: line.product_qty,
                    estimated_cost: line.estimated_cost,
                    company_id,
                    currency_id,
                    analytic_account_id: line.analytic_account_id,
                    analytic_tag_ids,
                    description: line.description.clone(),
                    specifications: line.specifications.clone(),
                },
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_approve(
        &self,
        cmd: &ApproveRequest,
    ) -> Result<Vec<PurchaseRequestEvent>, DomainError> {
        self.ensure_live(cmd.tenant_id, cmd.request_id)?;

        if self.status != PurchaseRequestStatus::Draft {
            return Err(DomainError::invariant(
                "only draft purchase requests can be approved",
            ));
        }
        if self.lines.is_empty() {
            return Err(DomainError::validation(
                "cannot approve purchase request without lines",
            ));
        }

        Ok(vec![PurchaseRequestEvent::PurchaseRequestApproved(
            PurchaseRequestApproved {
                tenant_id: cmd.tenant_id,
                request_id: cmd.request_id,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_reject(
        &self,
        cmd: &RejectRequest,
    ) -> Result<Vec<PurchaseRequestEvent>, DomainError> {
        self.ensure_live(cmd.tenant_id, cmd.request_id)?;

        if self.status == PurchaseRequestStatus::Rejected {
            return Err(DomainError::invariant("purchase request is already rejected"));
        }

        Ok(vec![PurchaseRequestEvent::PurchaseRequestRejected(
            PurchaseRequestRejected {
                tenant_id: cmd.tenant_id,
                request_id: cmd.request_id,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_delete(
        &self,
        cmd: &DeleteRequest,
    ) -> Result<Vec<PurchaseRequestEvent>, DomainError> {
        self.ensure_live(cmd.tenant_id, cmd.request_id)?;

        Ok(vec![PurchaseRequestEvent::PurchaseRequestDeleted(
            PurchaseRequestDeleted {
                tenant_id: cmd.tenant_id,
                request_id: cmd.request_id,
                occurred_at: cmd.occurred_at,
            },
        )])
    }
}

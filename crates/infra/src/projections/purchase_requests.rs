use serde_json::Value as JsonValue;

use forgeerp_core::{TenantId, UserId};
use forgeerp_events::EventEnvelope;
use forgeerp_expenses::PurchaseRequestSource;
use forgeerp_purchasing::{
    PurchaseRequestEvent, PurchaseRequestId, PurchaseRequestLine, PurchaseRequestStatus,
};

use super::ProjectionError;
use super::cursor::{Position, StreamCursors};
use crate::read_model::TenantStore;

pub const AGGREGATE_TYPE: &str = "purchasing.request";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseRequestReadModel {
    pub request_id: PurchaseRequestId,
    pub name: String,
    pub requested_by: UserId,
    pub status: PurchaseRequestStatus,
    pub lines: Vec<PurchaseRequestLine>,
}

impl PurchaseRequestSource for PurchaseRequestReadModel {
    fn request_id(&self) -> PurchaseRequestId {
        self.request_id
    }

    fn requested_by(&self) -> Option<UserId> {
        Some(self.requested_by)
    }

    fn status(&self) -> PurchaseRequestStatus {
        self.status
    }

    fn lines(&self) -> &[PurchaseRequestLine] {
        &self.lines
    }
}

/// Purchase requests as seen by the expense form.
///
/// Deleted requests stay in the read model with status `Deleted` so a stale
/// selection is refused explicitly instead of looking like a typo.
#[derive(Debug)]
pub struct PurchaseRequestsProjection<S>
where
    S: TenantStore<PurchaseRequestId, PurchaseRequestReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> PurchaseRequestsProjection<S>
where
    S: TenantStore<PurchaseRequestId, PurchaseRequestReadModel>,
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
        request_id: &PurchaseRequestId,
    ) -> Option<PurchaseRequestReadModel> {
        self.store.get(tenant_id, request_id)
    }

    /// Non-deleted requests raised by `user_id`.
    pub fn list_for_requester(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
    ) -> Vec<PurchaseRequestReadModel> {
        self.store
            .list(tenant_id)
            .into_iter()
            .filter(|r| r.requested_by == user_id && r.status != PurchaseRequestStatus::Deleted)
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

        let ev: PurchaseRequestEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;

        let (event_tenant, request_id) = ev.stream();
        if event_tenant != tenant_id {
            return Err(ProjectionError::TenantIsolation(
                "event tenant_id does not match envelope tenant_id".to_string(),
            ));
        }
        if request_id.0 != aggregate_id {
            return Err(ProjectionError::TenantIsolation(
                "event request_id does not match envelope aggregate_id".to_string(),
            ));
        }

        match ev {
            PurchaseRequestEvent::PurchaseRequestCreated(e) => {
                self.store.upsert(
                    tenant_id,
                    e.request_id,
                    PurchaseRequestReadModel {
                        request_id: e.request_id,
                        name: e.name,
                        requested_by: e.requested_by,
                        status: PurchaseRequestStatus::Draft,
                        lines: vec![],
                    },
                );
            }
            PurchaseRequestEvent::PurchaseRequestLineAdded(e) => {
                self.update(tenant_id, e.request_id, |rm| rm.lines.push(e.line));
            }
            PurchaseRequestEvent::PurchaseRequestApproved(e) => {
                self.update(tenant_id, e.request_id, |rm| {
                    rm.status = PurchaseRequestStatus::Approved
                });
            }
            PurchaseRequestEvent::PurchaseRequestRejected(e) => {
                self.update(tenant_id, e.request_id, |rm| {
                    rm.status = PurchaseRequestStatus::Rejected
                });
            }
            PurchaseRequestEvent::PurchaseRequestDeleted(e) => {
                self.update(tenant_id, e.request_id, |rm| {
                    rm.status = PurchaseRequestStatus::Deleted
                });
            }
        }

        self.cursors.advance(tenant_id, aggregate_id, seq);
        Ok(())
    }

    fn update(
        &self,
        tenant_id: TenantId,
        request_id: PurchaseRequestId,
        f: impl FnOnce(&mut PurchaseRequestReadModel),
    ) {
        // Created always precedes the other events of a stream.
        if let Some(mut rm) = self.store.get(tenant_id, &request_id) {
            f(&mut rm);
            self.store.upsert(tenant_id, request_id, rm);
        }
    }

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
}

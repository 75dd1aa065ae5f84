use std::collections::HashMap;
use std::sync::RwLock;

use forgeerp_core::{AggregateId, TenantId};

use super::ProjectionError;

/// Last applied sequence number per stream.
#[derive(Debug, Default)]
pub(crate) struct StreamCursors {
    inner: RwLock<HashMap<(TenantId, AggregateId), u64>>,
}

pub(crate) enum Position {
    /// Already applied (duplicate delivery).
    Seen,
    /// Next event of the stream.
    Next,
}

impl StreamCursors {
    pub(crate) fn get(&self, tenant_id: TenantId, aggregate_id: AggregateId) -> u64 {
        self.inner
            .read()
            .ok()
            .and_then(|c| c.get(&(tenant_id, aggregate_id)).copied())
            .unwrap_or(0)
    }

    pub(crate) fn check(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        seq: u64,
    ) -> Result<Position, ProjectionError> {
        let last = self.get(tenant_id, aggregate_id);
        if seq == 0 {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(Position::Seen);
        }
        if seq != last + 1 && last != 0 {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        }
        Ok(Position::Next)
    }

    pub(crate) fn advance(&self, tenant_id: TenantId, aggregate_id: AggregateId, seq: u64) {
        if let Ok(mut cursors) = self.inner.write() {
            cursors.insert((tenant_id, aggregate_id), seq);
        }
    }

    pub(crate) fn clear_tenant(&self, tenant_id: TenantId) {
        if let Ok(mut cursors) = self.inner.write() {
            cursors.retain(|(t, _), _| *t != tenant_id);
        }
    }
}

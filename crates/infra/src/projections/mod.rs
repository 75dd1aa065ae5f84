//! Projection implementations (read model builders).
//!
//! Projections consume published envelopes and build query-side read models.
//! All projections are rebuildable from the event stream, tenant-isolated and
//! idempotent under at-least-once delivery.

mod cursor;
pub mod expense_sheets;
pub mod purchase_requests;

use thiserror::Error;

pub use expense_sheets::{ExpenseSheetReadModel, ExpenseSheetsProjection};
pub use purchase_requests::{PurchaseRequestReadModel, PurchaseRequestsProjection};

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("failed to deserialize event: {0}")]
    Deserialize(String),
    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),
    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

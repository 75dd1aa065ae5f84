//! Purchasing domain module (Purchase Requests, event-sourced).
//!
//! A purchase request is the pre-approval document an employee raises before
//! buying. Its lines are the source that expense reports copy from. This crate
//! contains business rules only (no IO, no HTTP, no storage).

pub mod request;

pub use request::{
    AddRequestLine, ApproveRequest, CreatePurchaseRequest, DeleteRequest, NewRequestLine,
    PurchaseRequest, PurchaseRequestApproved, PurchaseRequestCommand, PurchaseRequestCreated,
    PurchaseRequestDeleted, PurchaseRequestEvent, PurchaseRequestId, PurchaseRequestLine,
    PurchaseRequestLineAdded, PurchaseRequestRejected, PurchaseRequestStatus, RejectRequest,
};

//! `forgeerp-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the domain error model and the aggregate/entity/value-object
//! traits the business modules are written against.

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod id;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{
    AggregateId, AnalyticAccountId, AnalyticTagId, CompanyId, CurrencyId, EmployeeId, ProductId,
    TenantId, UomId, UserId,
};
pub use value_object::ValueObject;

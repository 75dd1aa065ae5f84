//! Infrastructure layer: event store, command dispatch, read models, config,
//! and the expense workflow that ties them together.

pub mod command_dispatcher;
pub mod config;
pub mod event_store;
pub mod projections;
pub mod read_model;
pub mod workflow;


pub use command_dispatcher::{CommandDispatcher, DispatchError};
pub use config::{ConfigError, ExpensesConfig};
pub use workflow::{ExpenseWorkflow, InMemoryProductCatalog};

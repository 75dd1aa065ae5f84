//! Expenses domain module (Expense Reports fed from Purchase Requests, event-sourced).
//!
//! An employee picks one of their purchase requests on an expense report; the
//! request lines are copied into staging rows ([`PrLine`]) for preview, and on
//! save the staging rows become real [`ExpenseLine`]s and are discarded.
//!
//! - [`ExpenseSheetForm`]: the editing buffer with its change handlers.
//! - [`ExpenseSheet`]: the aggregate whose create/update commands perform the
//!   staging-to-expense conversion.
//!
//! Pure domain logic only (no IO, no storage).

pub mod expense;
pub mod form;
pub mod sheet;
pub mod source;
pub mod staging;

pub use expense::ExpenseLine;
pub use form::{ExpenseSheetForm, SelectionPolicy};
pub use sheet::{
    AddExpenseLine, CreateExpenseSheet, EmployeeAssigned, EmployeeAssignment, ExpenseLineAdded,
    ExpenseLineRemoved, ExpenseLinesCleared, ExpenseSheet, ExpenseSheetCommand,
    ExpenseSheetCreated, ExpenseSheetEvent, ExpenseSheetId, ExpenseSheetRenamed, PrLinesDiscarded,
    PrLinesStaged, PrUsage, PrUsageChanged, PurchaseRequestSelected, RemoveExpenseLine,
    RequestSelection, SheetChanges, UpdateExpenseSheet,
};
pub use source::PurchaseRequestSource;
pub use staging::{PrLine, ProductCatalog, stage_request_lines};

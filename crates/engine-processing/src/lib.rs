//! Table migration workflow: the controller that walks the source table by
//! primary key, and the activities that list and copy each batch.

pub mod activities;
pub mod controller;
pub mod error;
pub mod retry;

pub use controller::{MigrateTable, TASK_QUEUE};

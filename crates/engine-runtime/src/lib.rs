//! Embedded durable-execution host.
//!
//! Workflows are replayed from their recorded history after a restart, so
//! their local state survives crashes without being stored explicitly.
//! Activities do the side effects, under per-attempt timeouts and a retry
//! policy.

pub mod activity;
pub mod actor;
pub mod client;
pub mod context;
pub mod control;
pub mod error;
pub mod worker;
pub mod workflow;

#[cfg(test)]
mod tests;

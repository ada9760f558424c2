//! Core types and pipeline components for declaring received waste to the
//! national waste registry (LMA, reached through AMICE).

/// Bundle of adapters a deployment runs on.
pub mod adapters;
/// Approval and submission of single declarations.
pub mod approval;
/// Waste stream compatibility for batched submissions.
pub mod compatibility;
/// Batched first receival submissions.
pub mod declarator;
/// Detection of undeclared weight tickets.
pub mod detector;
/// Registry message payloads.
pub mod mapping;
/// In-memory adapters.
pub mod memory;
/// Domain models and identifiers.
pub mod model;
/// Reporting periods and the detection cutoff.
pub mod period;
/// Traits describing the storage and registry interfaces.
pub mod ports;
/// Reconciliation of registry session results.
pub mod resolver;
/// Periodic declaration jobs.
pub mod scheduler;
/// High-level service facade used by clients.
pub mod service;
/// Single-use tokens with a time to live.
pub mod state_store;

#[cfg(test)]
mod tests;

pub use adapters::*;
pub use approval::*;
pub use declarator::*;
pub use detector::*;
pub use model::*;
pub use period::{Period, PeriodError};
pub use ports::*;
pub use resolver::*;
pub use scheduler::*;
pub use service::*;

//! Admission, enrichment and status reconciliation for the notification gateway.

pub mod admission;
pub mod enrichment;
pub mod idempotency;
pub mod memory;
pub mod pipeline;
pub mod reconciler;
pub mod store;

//! Background tasks.

pub mod reconciliation;

pub use reconciliation::{run_reconciliation, start_reconciliation};

//! Refund channel providers.
//!
//! Production providers (wallet ledger, credit ledger, wire transfer, gateway)
//! live with their transports; this module carries the simulated provider
//! used by dev wiring, tests and benchmarks.

mod simulated;

pub use simulated::{SimulatedOutcome, SimulatedRefundChannel};

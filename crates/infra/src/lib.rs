//! Infrastructure layer: storage, code generation, channel providers, config
//! and wiring for the payment engine.

pub mod channels;
pub mod codegen;
pub mod config;
pub mod persistence;
pub mod wiring;

mod integration_tests;

pub use channels::{SimulatedOutcome, SimulatedRefundChannel};
pub use codegen::SequenceCodeGenerator;
pub use config::EngineConfig;
pub use persistence::InMemoryOrderStore;
pub use wiring::{Engine, InMemoryEngine, bootstrap_from_env};

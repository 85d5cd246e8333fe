//! Storage adapters for the order store port.

mod in_memory;

pub use in_memory::InMemoryOrderStore;

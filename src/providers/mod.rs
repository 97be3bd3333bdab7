//! Provider configuration records and their registry.

pub mod records;
pub mod registry;

pub use records::{AIProvider, ProviderFamily};
pub use registry::ProviderRegistry;

//! Node kinds and the registry that builds them from saved configs.

pub mod builtin;
pub mod registry;

pub use registry::{NodeRegistry, RegistryEntry};

//! Whole-graph validation.
//!
//! Connect-time hooks catch most problems as they happen; the pipeline re-checks
//! a complete graph, for instance one that was just loaded.

pub mod pipeline;
pub mod stages;

pub use pipeline::ValidationPipeline;
pub use stages::{ArityValidation, ConnectivityValidation, StructuralValidation, ValidationStage};

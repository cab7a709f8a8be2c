//! Evaluation of node graphs.
//!
//! [`memo`] answers single pulls; [`engine`] pushes changes through the
//! downstream closure of edited nodes.

pub mod engine;
pub mod memo;
pub mod progress;

pub use engine::{EngineOptions, PropagationReport};
pub use memo::{EvalState, MemoStats, MemoStatus};
pub use progress::{ProgressTracker, ProgressUpdate};

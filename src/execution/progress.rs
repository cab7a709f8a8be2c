//! Progress tracking for propagation passes.

use crate::core::error::{EvalError, NodeId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// A progress update event.
#[derive(Debug, Clone)]
pub enum ProgressUpdate {
    /// A pass has started from `roots` root nodes.
    Started { roots: usize },
    /// A node evaluated successfully.
    NodeCompleted {
        node_id: NodeId,
        duration_ms: u64,
        completed: usize,
    },
    /// A node resolved with a failure.
    NodeFailed { node_id: NodeId, error: EvalError },
    /// The pass has finished.
    Completed {
        total_duration_ms: u64,
        nodes_evaluated: usize,
        nodes_failed: usize,
    },
}

/// Callback type for progress updates.
pub type ProgressCallback = Box<dyn Fn(ProgressUpdate) + Send + Sync>;

/// Counts node completions within one pass and forwards updates.
pub struct ProgressTracker {
    completed_nodes: AtomicU64,
    failed_nodes: AtomicU64,
    start_time: Option<Instant>,
    callback: Option<Arc<ProgressCallback>>,
}

impl ProgressTracker {
    /// Create a tracker without a callback.
    pub fn new() -> Self {
        Self {
            completed_nodes: AtomicU64::new(0),
            failed_nodes: AtomicU64::new(0),
            start_time: None,
            callback: None,
        }
    }

    /// Forward every update to `callback`.
    pub fn with_callback(mut self, callback: Option<Arc<ProgressCallback>>) -> Self {
        self.callback = callback;
        self
    }

    /// Start tracking.
    pub fn start(&mut self, roots: usize) {
        self.start_time = Some(Instant::now());
        self.send_update(ProgressUpdate::Started { roots });
    }

    /// Report that a node evaluated successfully.
    pub fn node_completed(&self, node_id: NodeId, duration_ms: u64) {
        let completed = self.completed_nodes.fetch_add(1, Ordering::Relaxed) as usize + 1;
        self.send_update(ProgressUpdate::NodeCompleted {
            node_id,
            duration_ms,
            completed,
        });
    }

    /// Report that a node resolved with a failure.
    pub fn node_failed(&self, node_id: NodeId, error: EvalError) {
        self.failed_nodes.fetch_add(1, Ordering::Relaxed);
        self.send_update(ProgressUpdate::NodeFailed { node_id, error });
    }

    /// Nodes evaluated so far, successful or not.
    pub fn finished(&self) -> usize {
        (self.completed_nodes.load(Ordering::Relaxed) + self.failed_nodes.load(Ordering::Relaxed))
            as usize
    }

    /// Milliseconds since [`start`](ProgressTracker::start).
    pub fn elapsed_ms(&self) -> u64 {
        self.start_time
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0)
    }

    /// Complete tracking.
    pub fn complete(&self) {
        self.send_update(ProgressUpdate::Completed {
            total_duration_ms: self.elapsed_ms(),
            nodes_evaluated: self.finished(),
            nodes_failed: self.failed_nodes.load(Ordering::Relaxed) as usize,
        });
    }

    fn send_update(&self, update: ProgressUpdate) {
        if let Some(ref callback) = self.callback {
            callback(update);
        }
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

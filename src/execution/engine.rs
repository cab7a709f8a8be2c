//! Propagation engine.
//!
//! A propagation pass invalidates the forward closure of its roots, then walks
//! it again from the roots: every finished node pushes its direct successors
//! onto the worklist. Outstanding evaluations are polled together and handled
//! in whatever order they finish.

use crate::core::error::{EvalError, NodeId};
use crate::core::phase::Phase;
use crate::execution::memo::{self, EvalOutcome};
use crate::execution::progress::{ProgressCallback, ProgressTracker, ProgressUpdate};
use crate::graph::context::Context;
use futures::stream::{FuturesUnordered, StreamExt};
use indexmap::{IndexMap, IndexSet};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Propagation options.
#[derive(Clone, Default)]
pub struct EngineOptions {
    /// Maximum number of outstanding node evaluations (`None` = unbounded).
    pub max_in_flight: Option<usize>,
    /// Progress callback.
    pub progress_callback: Option<Arc<ProgressCallback>>,
}

impl std::fmt::Debug for EngineOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineOptions")
            .field("max_in_flight", &self.max_in_flight)
            .field("progress_callback", &self.progress_callback.as_ref().map(|_| "<callback>"))
            .finish()
    }
}

impl EngineOptions {
    /// Create default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap the number of outstanding evaluations. Zero is treated as one.
    pub fn with_max_in_flight(mut self, max: usize) -> Self {
        self.max_in_flight = Some(max.max(1));
        self
    }

    /// Set progress callback.
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(ProgressUpdate) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Arc::new(Box::new(callback)));
        self
    }
}

/// Outcome of one propagation pass.
#[derive(Debug, Clone, Default)]
pub struct PropagationReport {
    /// Nodes evaluated by this pass, in completion order.
    pub evaluated: Vec<NodeId>,
    /// Nodes that resolved with a failure. The error keeps its origin.
    pub failures: IndexMap<NodeId, EvalError>,
    /// Wall time of the pass.
    pub duration: Duration,
}

impl PropagationReport {
    /// Whether every evaluated node succeeded.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// One-line summary.
    pub fn summary(&self) -> String {
        format!(
            "{} node(s) evaluated, {} failed in {:.2?}",
            self.evaluated.len(),
            self.failures.len(),
            self.duration
        )
    }
}

fn evaluate(ctx: &Context, node: NodeId) -> impl Future<Output = (NodeId, EvalOutcome, Duration)> {
    let pending = memo::do_eval(ctx, node);
    async move {
        let started = Instant::now();
        let outcome = pending.await;
        (node, outcome, started.elapsed())
    }
}

/// Invalidate the forward closure of `roots` and re-evaluate it.
///
/// Each node is evaluated at most once per pass, and only after one of its
/// predecessors (or the node itself, for roots) was scheduled and finished.
/// Failures are recorded and the rest of the pass continues; successors of a
/// failed node are not scheduled from it.
///
/// Must not be awaited while the caller holds the evaluate phase, since the
/// invalidation step waits for evaluation to drain.
pub async fn propagate(ctx: &Context, roots: &[NodeId], options: &EngineOptions) -> PropagationReport {
    let start = Instant::now();

    {
        let _edit = ctx.gate().enter(Phase::Edit, "propagate").await;
        let cleared = ctx.graph().lock().invalidate_closure(roots);
        log::debug!("propagate: invalidated {} node(s)", cleared.len());
    }

    let _eval = ctx.gate().enter(Phase::Eval, "propagate").await;

    let mut tracker = ProgressTracker::new().with_callback(options.progress_callback.clone());
    tracker.start(roots.len());

    let mut scheduled: IndexSet<NodeId> = IndexSet::new();
    let mut queue: VecDeque<NodeId> = VecDeque::new();
    for &root in roots {
        if scheduled.insert(root) {
            queue.push_back(root);
        }
    }

    let mut tasks = FuturesUnordered::new();
    let mut report = PropagationReport::default();

    loop {
        while options.max_in_flight.map_or(true, |cap| tasks.len() < cap) {
            let Some(node) = queue.pop_front() else {
                break;
            };
            tasks.push(evaluate(ctx, node));
        }

        let Some((node, outcome, elapsed)) = tasks.next().await else {
            break;
        };
        report.evaluated.push(node);

        match outcome {
            Ok(_) => {
                tracker.node_completed(node, elapsed.as_millis() as u64);
                let successors = ctx.graph().lock().successors(node);
                for next in successors {
                    if scheduled.insert(next) {
                        queue.push_back(next);
                    }
                }
            }
            Err(err) => {
                log::debug!("propagate: {node} failed: {err}");
                tracker.node_failed(node, err.clone());
                report.failures.insert(node, err);
            }
        }
    }

    report.duration = start.elapsed();
    tracker.complete();
    log::info!("propagate: {}", report.summary());
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::EvalContext;
    use crate::core::error::EvalResult;
    use crate::core::node::{Category, NodeKind, NodeMetadata, Pinout};
    use crate::core::port::ChannelDef;
    use crate::nodes::builtin::{BinOpNode, ConstNode, ProbeNode};
    use futures::future::{BoxFuture, FutureExt};
    use parking_lot::Mutex;
    use std::any::Any;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::{Context as TaskContext, Poll};

    struct YieldOnce(bool);

    impl Future for YieldOnce {
        type Output = ();

        fn poll(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<()> {
            if self.0 {
                return Poll::Ready(());
            }
            self.0 = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }

    /// Forwards its input after yielding `yields` times.
    #[derive(Clone)]
    struct Relay {
        yields: usize,
        runs: Arc<AtomicUsize>,
    }

    impl Relay {
        fn new(yields: usize) -> Self {
            Self {
                yields,
                runs: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl NodeKind for Relay {
        fn metadata(&self) -> NodeMetadata {
            NodeMetadata::builder("relay", "Relay")
                .category(Category::View)
                .input(ChannelDef::new("o"))
                .output(ChannelDef::new("o"))
                .build()
        }

        fn eval(&self, io: EvalContext) -> BoxFuture<'static, EvalResult<Pinout>> {
            let yields = self.yields;
            let runs = Arc::clone(&self.runs);
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                let tensor = io.input("o").await?;
                for _ in 0..yields {
                    YieldOnce(false).await;
                }
                Ok(Pinout::new().with("o", tensor))
            }
            .boxed()
        }

        fn config(&self) -> serde_json::Value {
            serde_json::json!({ "kind": "relay", "yields": self.yields })
        }

        fn clone_box(&self) -> Box<dyn NodeKind> {
            Box::new(self.clone())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    fn chain(ctx: &Context) -> (NodeId, NodeId, crate::nodes::builtin::ProbeHandle) {
        let src = ctx.add_node(Box::new(ConstNode::with_data(vec![2], vec![1.0, 2.0])));
        let add = ctx.add_node(Box::new(BinOpNode::default()));
        let probe = ProbeNode::new();
        let handle = probe.handle();
        let sink = ctx.add_node(Box::new(probe));
        ctx.link(src, "o", add, "a").unwrap();
        ctx.link(src, "o", add, "b").unwrap();
        ctx.link(add, "c", sink, "o").unwrap();
        (src, add, handle)
    }

    #[test]
    fn test_propagate_reaches_every_descendant() {
        let ctx = Context::new();
        let (src, add, handle) = chain(&ctx);

        let report = pollster::block_on(ctx.propagate(&[src]));
        assert!(report.is_success());
        assert_eq!(report.evaluated.len(), 3);
        assert_eq!(report.evaluated[0], src);
        assert_eq!(report.evaluated[1], add);
        assert_eq!(handle.latest().unwrap().to_vec(), vec![2.0, 4.0]);
    }

    #[test]
    fn test_diamond_join_evaluates_once() {
        let ctx = Context::new();
        let slow = Relay::new(20);
        let fast = Relay::new(0);
        let (slow_runs, fast_runs) = (Arc::clone(&slow.runs), Arc::clone(&fast.runs));

        let a = ctx.add_node(Box::new(ConstNode::with_data(vec![2], vec![1.0, 2.0])));
        let b = ctx.add_node(Box::new(slow));
        let c = ctx.add_node(Box::new(fast));
        let d = ctx.add_node(Box::new(BinOpNode::default()));
        ctx.link(a, "o", b, "o").unwrap();
        ctx.link(a, "o", c, "o").unwrap();
        ctx.link(b, "o", d, "a").unwrap();
        ctx.link(c, "o", d, "b").unwrap();

        let report = pollster::block_on(ctx.propagate(&[a]));
        assert!(report.is_success(), "{:?}", report.failures);
        assert_eq!(report.evaluated.len(), 4);
        assert_eq!(report.evaluated[0], a);
        let unique: IndexSet<NodeId> = report.evaluated.iter().copied().collect();
        assert_eq!(unique.len(), 4);

        let at = |node| report.evaluated.iter().position(|&n| n == node);
        assert!(at(c) < at(b), "fast branch should finish first: {:?}", report.evaluated);
        assert_eq!(slow_runs.load(Ordering::SeqCst), 1);
        assert_eq!(fast_runs.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.memo_stats().computations, 4);

        let sum = pollster::block_on(ctx.get(d, "c")).unwrap();
        assert_eq!(sum.to_vec(), vec![2.0, 4.0]);
        assert_eq!(ctx.memo_stats().computations, 4);
    }

    #[test]
    fn test_sibling_failure_does_not_stop_pass() {
        let ctx = Context::new();
        let src = ctx.add_node(Box::new(ConstNode::new(1.0, vec![3])));
        let broken = ctx.add_node(Box::new(BinOpNode::default()));
        let probe = ProbeNode::new();
        let handle = probe.handle();
        let sink = ctx.add_node(Box::new(probe));
        ctx.link(src, "o", broken, "a").unwrap();
        ctx.link(src, "o", sink, "o").unwrap();

        let report = pollster::block_on(ctx.propagate(&[src]));
        assert_eq!(report.evaluated.len(), 3);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[&broken].origin(), broken);
        assert!(handle.latest().is_some());
    }

    #[test]
    fn test_bounded_in_flight_with_progress() {
        let ctx = Context::new();
        let (src, _, handle) = chain(&ctx);

        let updates = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&updates);
        let options = EngineOptions::new()
            .with_max_in_flight(1)
            .with_progress(move |update| {
                if let ProgressUpdate::NodeCompleted { .. } = update {
                    *counter.lock() += 1;
                }
            });

        let report = pollster::block_on(ctx.propagate_with(&[src], &options));
        assert!(report.is_success());
        assert_eq!(*updates.lock(), 3);
        assert!(handle.latest().is_some());
    }

    #[test]
    fn test_destroyed_root_is_reported() {
        let ctx = Context::new();
        let src = ctx.add_node(Box::new(ConstNode::new(0.0, vec![1])));
        ctx.destroy(src).unwrap();

        let report = pollster::block_on(ctx.propagate(&[src]));
        assert_eq!(report.failures.len(), 1);
    }

    #[test]
    fn test_options_builder() {
        let options = EngineOptions::new().with_max_in_flight(0);
        assert_eq!(options.max_in_flight, Some(1));
        assert!(options.progress_callback.is_none());
    }
}

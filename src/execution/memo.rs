//! Per-node memoization.
//!
//! Each node slot carries an [`EvalState`]. The first requester of an empty
//! node starts its evaluation and parks the shared future in the slot; every
//! later requester awaits that same future until it resolves. The resolved
//! bag or failure is kept until the node is invalidated.

use crate::core::context::EvalContext;
use crate::core::error::{EvalError, EvalErrorKind, EvalResult, NodeId};
use crate::core::node::Pinout;
use crate::core::phase::Phase;
use crate::graph::context::Context;
use crate::graph::structure::NodeGraph;
use futures::future::{BoxFuture, FutureExt, Shared};

/// Result of one node evaluation: the output bag or a failure.
pub type EvalOutcome = EvalResult<Pinout>;

/// A node evaluation that other requesters can join.
pub type SharedEval = Shared<BoxFuture<'static, EvalOutcome>>;

/// Memoized evaluation state of one node.
#[derive(Default)]
pub enum EvalState {
    /// No cached result.
    #[default]
    Empty,
    /// An evaluation has started; requesters await the same future.
    InFlight(SharedEval),
    /// Cached output bag or cached failure.
    Resolved(EvalOutcome),
}

/// Coarse view of an [`EvalState`], for inspection and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoStatus {
    Empty,
    InFlight,
    Resolved,
    Failed,
}

impl EvalState {
    /// Coarse status of this state.
    pub fn status(&self) -> MemoStatus {
        match self {
            EvalState::Empty => MemoStatus::Empty,
            EvalState::InFlight(_) => MemoStatus::InFlight,
            EvalState::Resolved(Ok(_)) => MemoStatus::Resolved,
            EvalState::Resolved(Err(_)) => MemoStatus::Failed,
        }
    }
}

/// Memo statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoStats {
    /// Evaluations actually started.
    pub computations: u64,
    /// Requests answered from a resolved memo.
    pub hits: u64,
    /// Requests that joined an in-flight evaluation.
    pub joins: u64,
    /// Memo entries reset by invalidation.
    pub invalidations: u64,
}

impl MemoStats {
    /// Fraction of requests that did not start a computation.
    pub fn reuse_ratio(&self) -> f64 {
        let total = self.computations + self.hits + self.joins;
        if total == 0 {
            return 0.0;
        }
        (self.hits + self.joins) as f64 / total as f64
    }
}

enum Claim {
    Cached(EvalOutcome),
    Await(SharedEval, u64),
}

/// Claim the memo of `node`: a cached outcome, or a future to await.
fn claim(graph: &mut NodeGraph, ctx: &Context, node: NodeId) -> Claim {
    let destroyed = || Claim::Cached(Err(EvalError::new(node, EvalErrorKind::NodeDestroyed)));

    let Some(slot) = graph.slot(node) else {
        return destroyed();
    };
    match &slot.state {
        EvalState::Resolved(outcome) => {
            let outcome = outcome.clone();
            graph.stats.hits += 1;
            return Claim::Cached(outcome);
        }
        EvalState::InFlight(shared) => {
            let claim = Claim::Await(shared.clone(), slot.epoch);
            graph.stats.joins += 1;
            return claim;
        }
        EvalState::Empty => {}
    }

    let io = EvalContext::new(ctx, node, graph.input_snapshot(node));
    let Some(slot) = graph.slot_mut(node) else {
        return destroyed();
    };
    let shared = slot.kind.eval(io).shared();
    slot.state = EvalState::InFlight(shared.clone());
    let epoch = slot.epoch;
    graph.stats.computations += 1;
    log::trace!("memo: started evaluation of {node}");
    Claim::Await(shared, epoch)
}

/// Evaluate `node` through its memo.
///
/// Holds the evaluate phase for the whole call. At most one evaluation of a
/// node is outstanding at a time; concurrent callers share it.
pub(crate) fn do_eval(ctx: &Context, node: NodeId) -> BoxFuture<'static, EvalOutcome> {
    let gate = ctx.gate().clone();
    let pending = pull(ctx, node);
    async move {
        let _phase = gate.enter(Phase::Eval, "do_eval").await;
        pending.await
    }
    .boxed()
}

/// [`do_eval`] without the phase gate, for reads made by a node future.
///
/// Node futures only run while a requester polls them, and every requester
/// holds the evaluate phase. The returned future keeps the context weakly
/// and holds no phase guard, so an abandoned evaluation parked in a memo slot
/// neither keeps the context alive nor blocks later edits.
pub(crate) fn pull(ctx: &Context, node: NodeId) -> BoxFuture<'static, EvalOutcome> {
    let weak = ctx.downgrade();
    async move {
        let Some(ctx) = weak.upgrade() else {
            return Err(EvalError::new(node, EvalErrorKind::NodeDestroyed));
        };
        let claim = claim(&mut ctx.graph().lock(), &ctx, node);
        drop(ctx);
        let (shared, epoch) = match claim {
            Claim::Cached(outcome) => return outcome,
            Claim::Await(shared, epoch) => (shared, epoch),
        };

        let outcome = shared.await;
        if let Some(ctx) = weak.upgrade() {
            settle(&mut ctx.graph().lock(), node, epoch, &outcome);
        }
        outcome
    }
    .boxed()
}

/// Store `outcome` as the memo of `node` if it was claimed at `epoch`.
///
/// An invalidation since the claim bumps the epoch; the stale outcome is then
/// dropped and whatever the slot holds now is left alone.
fn settle(graph: &mut NodeGraph, node: NodeId, epoch: u64, outcome: &EvalOutcome) -> bool {
    let Some(slot) = graph.slot_mut(node) else {
        return false;
    };
    if slot.epoch != epoch || !matches!(slot.state, EvalState::InFlight(_)) {
        log::trace!("memo: dropped stale result of {node}");
        return false;
    }
    if let Err(err) = outcome {
        log::debug!("memo: {node} resolved with failure: {err}");
    }
    slot.state = EvalState::Resolved(outcome.clone());
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::node::{Category, NodeKind, NodeMetadata};
    use crate::core::port::ChannelDef;
    use crate::nodes::builtin::{BinOpNode, ConstNode};
    use std::any::Any;

    /// Source whose evaluation never finishes.
    #[derive(Clone)]
    struct Parked;

    impl NodeKind for Parked {
        fn metadata(&self) -> NodeMetadata {
            NodeMetadata::builder("parked", "Parked")
                .category(Category::Input)
                .output(ChannelDef::new("o"))
                .build()
        }

        fn eval(&self, io: EvalContext) -> BoxFuture<'static, EvalResult<Pinout>> {
            async move {
                futures::future::pending::<()>().await;
                Err(io.fail(EvalErrorKind::Other("unreachable".into())))
            }
            .boxed()
        }

        fn config(&self) -> serde_json::Value {
            serde_json::json!({ "kind": "parked" })
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

    fn claimed(ctx: &Context, node: NodeId) -> (SharedEval, u64) {
        match claim(&mut ctx.graph().lock(), ctx, node) {
            Claim::Await(shared, epoch) => (shared, epoch),
            Claim::Cached(_) => panic!("node {node} already had a memo"),
        }
    }

    #[test]
    fn test_result_finishing_after_invalidation_is_dropped() {
        let ctx = Context::new();
        let node = ctx.add_node(Box::new(ConstNode::with_data(vec![1], vec![3.0])));

        let (stale, old_epoch) = claimed(&ctx, node);
        assert_eq!(ctx.memo_status(node), Some(MemoStatus::InFlight));
        pollster::block_on(ctx.invalidate(&[node]));
        assert_eq!(ctx.memo_status(node), Some(MemoStatus::Empty));

        let late = pollster::block_on(stale);
        assert!(late.is_ok());
        assert!(!settle(&mut ctx.graph().lock(), node, old_epoch, &late));
        assert_eq!(ctx.memo_status(node), Some(MemoStatus::Empty));

        let (fresh, epoch) = claimed(&ctx, node);
        assert!(epoch > old_epoch);
        assert!(!settle(&mut ctx.graph().lock(), node, old_epoch, &late));
        assert_eq!(ctx.memo_status(node), Some(MemoStatus::InFlight));

        let outcome = pollster::block_on(fresh);
        assert!(settle(&mut ctx.graph().lock(), node, epoch, &outcome));
        assert_eq!(ctx.memo_status(node), Some(MemoStatus::Resolved));
        assert_eq!(ctx.memo_stats().computations, 2);
    }

    #[test]
    fn test_abandoned_evaluation_releases_phase_and_context() {
        let ctx = Context::new();
        let parked = ctx.add_node(Box::new(Parked));
        let node = ctx.add_node(Box::new(BinOpNode::default()));
        ctx.link(parked, "o", node, "a").unwrap();
        ctx.link(parked, "o", node, "b").unwrap();

        assert!(ctx.eval(node).now_or_never().is_none());
        assert_eq!(ctx.memo_status(node), Some(MemoStatus::InFlight));
        assert_eq!(ctx.memo_status(parked), Some(MemoStatus::InFlight));
        assert!(ctx.phase().is_none());

        let weak = ctx.downgrade();
        drop(ctx);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(EvalState::Empty.status(), MemoStatus::Empty);
        assert_eq!(
            EvalState::Resolved(Ok(Pinout::new())).status(),
            MemoStatus::Resolved
        );
        let failed = EvalState::Resolved(Err(EvalError::new(
            NodeId(0),
            EvalErrorKind::Other("boom".into()),
        )));
        assert_eq!(failed.status(), MemoStatus::Failed);
    }

    #[test]
    fn test_reuse_ratio() {
        let stats = MemoStats {
            computations: 1,
            hits: 2,
            joins: 1,
            invalidations: 0,
        };
        assert!((stats.reuse_ratio() - 0.75).abs() < f64::EPSILON);
        assert_eq!(MemoStats::default().reuse_ratio(), 0.0);
    }
}

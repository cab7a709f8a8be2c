//! Two-phase gate for the whole registry.
//!
//! Structural edits and evaluation are mutually exclusive. Either phase may
//! be held by any number of nested or concurrent holders at once; it is
//! released when the last [`PhaseGuard`] drops, at which point callers waiting
//! for the other phase are woken.

use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

/// The two registry-wide phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Graph structure may change; no node evaluates.
    Edit,
    /// Nodes evaluate; structure is frozen.
    Eval,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Edit => f.write_str("structural-edit"),
            Phase::Eval => f.write_str("evaluate"),
        }
    }
}

#[derive(Default)]
struct GateState {
    active: Option<Phase>,
    depth: usize,
    waiters: Vec<Waker>,
}

impl GateState {
    fn admits(&self, phase: Phase) -> bool {
        self.active.map_or(true, |active| active == phase)
    }
}

/// Cloneable handle to a shared phase gate.
#[derive(Clone, Default)]
pub struct PhaseGate {
    state: Arc<Mutex<GateState>>,
}

impl PhaseGate {
    /// Create an idle gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until `phase` may be held, then hold it.
    ///
    /// Resolves immediately when the gate is idle or already in `phase`.
    pub fn enter(&self, phase: Phase, site: &'static str) -> Enter {
        Enter {
            gate: self.clone(),
            phase,
            site,
        }
    }

    /// Hold `phase` without waiting.
    ///
    /// # Panics
    ///
    /// Panics if the opposite phase is active. Callers that may race with the
    /// other phase must `enter(..).await` first; reaching this with the other
    /// phase held is a programming error.
    pub fn enter_now(&self, phase: Phase, site: &'static str) -> PhaseGuard {
        let mut state = self.state.lock();
        if let Some(active) = state.active.filter(|&active| active != phase) {
            drop(state);
            panic!(
                "phase contract violation: {site} requires the {phase} phase \
                 while the {active} phase is active"
            );
        }
        self.acquire(&mut state, phase, site)
    }

    /// The phase currently held, if any.
    pub fn active(&self) -> Option<Phase> {
        self.state.lock().active
    }

    /// Number of guards currently holding the active phase.
    pub fn depth(&self) -> usize {
        self.state.lock().depth
    }

    fn acquire(&self, state: &mut GateState, phase: Phase, site: &'static str) -> PhaseGuard {
        if state.active.is_none() {
            log::debug!("phase gate: {phase} begins ({site})");
        }
        state.active = Some(phase);
        state.depth += 1;
        PhaseGuard {
            gate: self.clone(),
            phase,
        }
    }
}

/// Future returned by [`PhaseGate::enter`].
pub struct Enter {
    gate: PhaseGate,
    phase: Phase,
    site: &'static str,
}

impl Future for Enter {
    type Output = PhaseGuard;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<PhaseGuard> {
        let this = self.get_mut();
        let mut state = this.gate.state.lock();
        if state.admits(this.phase) {
            return Poll::Ready(this.gate.acquire(&mut state, this.phase, this.site));
        }
        if !state.waiters.iter().any(|w| w.will_wake(cx.waker())) {
            state.waiters.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

/// Holds one level of a phase; releases it on drop.
pub struct PhaseGuard {
    gate: PhaseGate,
    phase: Phase,
}

impl PhaseGuard {
    /// The phase this guard holds.
    pub fn phase(&self) -> Phase {
        self.phase
    }
}

impl Drop for PhaseGuard {
    fn drop(&mut self) {
        let waiters = {
            let mut state = self.gate.state.lock();
            state.depth -= 1;
            if state.depth > 0 {
                return;
            }
            state.active = None;
            log::debug!("phase gate: {} drained", self.phase);
            std::mem::take(&mut state.waiters)
        };
        for waker in waiters {
            waker.wake();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    #[test]
    fn test_same_phase_nests() {
        let gate = PhaseGate::new();
        let outer = gate.enter_now(Phase::Eval, "outer");
        let inner = pollster::block_on(gate.enter(Phase::Eval, "inner"));

        assert_eq!(gate.active(), Some(Phase::Eval));
        assert_eq!(gate.depth(), 2);

        drop(inner);
        assert_eq!(gate.active(), Some(Phase::Eval));
        drop(outer);
        assert_eq!(gate.active(), None);
        assert_eq!(gate.depth(), 0);
    }

    #[test]
    fn test_other_phase_waits_for_drain() {
        let gate = PhaseGate::new();
        let eval = gate.enter_now(Phase::Eval, "eval");

        let mut edit = gate.enter(Phase::Edit, "edit");
        assert!((&mut edit).now_or_never().is_none());

        drop(eval);
        let guard = edit.now_or_never().expect("edit phase should be free");
        assert_eq!(guard.phase(), Phase::Edit);
        assert_eq!(gate.active(), Some(Phase::Edit));
    }

    #[test]
    #[should_panic(expected = "phase contract violation")]
    fn test_enter_now_rejects_other_phase() {
        let gate = PhaseGate::new();
        let _eval = gate.enter_now(Phase::Eval, "eval");
        let _edit = gate.enter_now(Phase::Edit, "connect");
    }
}

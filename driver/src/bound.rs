use kestrel_core::{ExecutionGraph, LabelKind};

use crate::config::BoundType;

// BOUND DECIDER
// ================================================================================================

/// How strictly a bound check treats a not-yet-complete execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoundStrategy {
    /// Partial check run mid-execution: admits executions that may still fit the budget and
    /// rejects only those that already cannot.
    Slacked,
    /// Full check run at execution end, for reporting.
    NonSlacked,
}

/// Computes a scheduling metric of the current graph and compares it against the user budget.
///
/// Block labels never contribute to either metric (under both strategies), so blocking a
/// thread cannot by itself push an execution over the bound.
#[derive(Clone, Copy, Debug)]
pub struct BoundDecider {
    kind: BoundType,
}

impl BoundDecider {
    /// Returns a decider for the given metric.
    pub fn new(kind: BoundType) -> Self {
        Self { kind }
    }

    /// Returns true if the graph's metric exceeds `bound` under the given strategy.
    pub fn exceeds(&self, g: &ExecutionGraph, bound: u32, strategy: BoundStrategy) -> bool {
        let metric = match self.kind {
            BoundType::Context => self.context_switches(g, strategy),
            BoundType::Round => self.rounds(g, strategy),
        };
        metric > bound
    }

    /// Commit order projected to threads, without events that do not occupy scheduler time.
    fn schedule_projection(&self, g: &ExecutionGraph) -> Vec<u32> {
        g.labels_by_stamp()
            .filter(|lab| {
                !matches!(
                    lab.kind(),
                    LabelKind::Init
                        | LabelKind::Empty
                        | LabelKind::Block(_)
                        | LabelKind::ThreadStart(_)
                )
            })
            .map(|lab| lab.thread())
            .collect()
    }

    /// Counts the preemptive context switches of the commit order: a switch away from a
    /// thread that could have continued.
    fn context_switches(&self, g: &ExecutionGraph, _strategy: BoundStrategy) -> u32 {
        let projection = self.schedule_projection(g);
        let mut switches = 0;
        for pair in projection.windows(2) {
            let [prev, next] = [pair[0], pair[1]];
            if prev == next {
                continue;
            }
            // Switching away from a finished (or blocked) thread costs nothing.
            let forced = g
                .last_label(prev)
                .is_some_and(|lab| lab.is_terminator() || lab.is_block());
            let prev_done = forced && !thread_runs_again(&projection, prev, next);
            if !prev_done {
                switches += 1;
            }
        }
        switches
    }

    /// Counts the round-robin rounds needed to schedule the commit order left to right.
    fn rounds(&self, g: &ExecutionGraph, _strategy: BoundStrategy) -> u32 {
        let projection = self.schedule_projection(g);
        if projection.is_empty() {
            return 0;
        }
        let mut rounds = 1;
        for pair in projection.windows(2) {
            if pair[1] < pair[0] {
                rounds += 1;
            }
        }
        rounds
    }
}

/// Returns true if `thread` shows up again in the projection after the first occurrence of
/// the handover to `next`.
fn thread_runs_again(projection: &[u32], thread: u32, next: u32) -> bool {
    let mut seen_handover = false;
    for &t in projection {
        if seen_handover && t == thread {
            return true;
        }
        if t == next {
            seen_handover = true;
        }
    }
    false
}

// TESTS
// ================================================================================================

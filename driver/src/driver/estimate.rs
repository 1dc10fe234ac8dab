use kestrel_core::Event;
use rand::Rng;
use tracing::debug;

use super::{Driver, Mode};
use crate::revisit::Revisit;

impl Driver {
    // RANDOM CHOICES
    // --------------------------------------------------------------------------------------------

    /// Estimation: binds the read at `pos` to a random consistent candidate.
    ///
    /// Returns `None` when no candidate survives validation (only possible for RMW reads,
    /// whose maximal choice may settle an atomicity violation); a rerun is scheduled so the
    /// estimation keeps sampling.
    pub(crate) fn pick_random_rf(&mut self, pos: Event, stores: &mut Vec<Event>) -> Option<Event> {
        let mut valid = Vec::with_capacity(stores.len());
        for rf in stores.drain(..) {
            self.bind_rf(pos, rf);
            if self.is_execution_valid(pos) {
                valid.push(rf);
            }
        }
        if valid.is_empty() {
            debug_assert!(self.exec().graph.label(pos).read().is_some_and(|r| r.is_rmw()));
            self.exec_mut().worklist.add(Revisit::Rerun);
            return None;
        }
        let pick = valid[self.est_rng.random_range(0..valid.len())];
        self.bind_rf(pos, pick);
        Some(pick)
    }

    /// Estimation: places the write at `pos` after a random consistent predecessor.
    pub(crate) fn pick_random_co(&mut self, pos: Event, cos: &mut Vec<Event>) -> Option<Event> {
        let addr = self.exec().graph.label(pos).write().expect("placing a non-write").addr;
        let first = *cos.last().expect("at least one placement");
        self.exec_mut().graph.co_insert_after(addr, pos, first);

        let mut valid = Vec::with_capacity(cos.len());
        for pred in cos.drain(..) {
            self.exec_mut().graph.co_move_after(addr, pos, pred);
            if self.is_execution_valid(pos) {
                valid.push(pred);
            }
        }
        if valid.is_empty() {
            debug_assert!(self.exec().graph.label(pos).write().is_some_and(|w| w.is_rmw()));
            self.exec_mut().worklist.add(Revisit::Rerun);
            return None;
        }
        let pick = valid[self.est_rng.random_range(0..valid.len())];
        self.exec_mut().graph.co_move_after(addr, pos, pick);
        let maximal = self.exec().graph.co_max(addr) == pos;
        self.exec_mut().graph.label_mut(pos).set_added_max(maximal);
        Some(pick)
    }

    // STATE-SPACE ESTIMATION
    // --------------------------------------------------------------------------------------------

    /// Folds the finished execution's choice structure into the running estimate: the product
    /// of the per-event choice counts approximates the state-space size this sample implies.
    pub(crate) fn update_state_space_estimation(&mut self) {
        let sample: f64 = self
            .exec()
            .choices
            .iter()
            .map(|(_, options)| options.len().max(1) as f64)
            .product();

        self.est_samples += 1;
        let n = self.est_samples as f64;
        let delta = sample - self.result.estimation_mean;
        self.result.estimation_mean += delta / n;
        self.est_m2 += delta * (sample - self.result.estimation_mean);
        self.result.estimation_variance = self.est_m2 / n;
        debug!(sample, mean = self.result.estimation_mean, "updated estimation");
    }

    /// Returns true once the estimation budget is spent or the estimate has stabilized.
    pub(crate) fn should_stop_estimating(&mut self) -> bool {
        let Mode::Estimation { budget } = &mut self.mode else {
            return true;
        };
        *budget = budget.saturating_sub(1);
        if *budget == 0 {
            return true;
        }

        let total = self.result.explored + self.result.explored_blocked;
        let sd = self.result.estimation_variance.sqrt();
        total >= u64::from(self.opts().estimation_min())
            && (sd <= self.result.estimation_mean / f64::from(self.opts().sd_threshold())
                || total as f64 > self.result.estimation_mean)
    }
}

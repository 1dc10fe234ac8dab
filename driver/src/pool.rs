use std::sync::{
    Condvar, Mutex,
    atomic::{AtomicBool, AtomicU32, Ordering},
};

use tracing::debug;

use crate::driver::Execution;

// SHARED POOL STATE
// ================================================================================================

/// State shared among the workers of an exploration: the global queue of execution snapshots,
/// the outstanding-task counter, and the cooperative halt flag.
///
/// Each snapshot on the queue is an independent copy — workers never alias each other's
/// graphs. A worker finishes when the counter reaches zero and the queue is empty; halting is
/// cooperative (a worker finishes its current execution before observing the flag).
pub struct PoolShared {
    queue: Mutex<Vec<Execution>>,
    state_changed: Condvar,
    remaining_tasks: AtomicU32,
    halt: AtomicBool,
    num_workers: u32,
}

impl PoolShared {
    /// Returns pool state for `num_workers` workers, with `initial` seeded on the queue.
    pub(crate) fn new(num_workers: usize, initial: Execution) -> Self {
        let shared = Self {
            queue: Mutex::new(Vec::new()),
            state_changed: Condvar::new(),
            remaining_tasks: AtomicU32::new(0),
            halt: AtomicBool::new(false),
            num_workers: num_workers as u32,
        };
        shared.submit(initial);
        shared
    }

    // TASK ACCOUNTING
    // --------------------------------------------------------------------------------------------

    /// Publishes an execution snapshot for any worker to pick up.
    pub(crate) fn submit(&self, exec: Execution) {
        self.remaining_tasks.fetch_add(1, Ordering::SeqCst);
        let mut queue = self.queue.lock().expect("pool queue poisoned");
        queue.push(exec);
        drop(queue);
        self.state_changed.notify_all();
    }

    /// Pops the next snapshot, blocking until one arrives or the exploration is over.
    /// Returns `None` when every task is done (or the pool is halting).
    pub(crate) fn pop_task(&self) -> Option<Execution> {
        let mut queue = self.queue.lock().expect("pool queue poisoned");
        loop {
            if self.should_halt() {
                return None;
            }
            if let Some(task) = queue.pop() {
                return Some(task);
            }
            if self.remaining_tasks.load(Ordering::SeqCst) == 0 {
                return None;
            }
            queue = self.state_changed.wait(queue).expect("pool queue poisoned");
        }
    }

    /// Marks one popped task as finished, waking the workers waiting for the end.
    pub(crate) fn task_done(&self) {
        let left = self.remaining_tasks.fetch_sub(1, Ordering::SeqCst) - 1;
        if left == 0 {
            self.state_changed.notify_all();
        }
    }

    /// Returns the number of tasks popped or queued but not yet finished.
    pub(crate) fn remaining_tasks(&self) -> u32 {
        self.remaining_tasks.load(Ordering::SeqCst)
    }

    /// Returns true if handing surplus frames to the pool is worthwhile (idle capacity).
    pub(crate) fn wants_more_tasks(&self) -> bool {
        self.num_workers > 1 && self.remaining_tasks() < 8 * self.num_workers
    }

    // HALTING
    // --------------------------------------------------------------------------------------------

    /// Requests a cooperative stop of every worker.
    pub(crate) fn halt(&self) {
        debug!("halting worker pool");
        self.halt.store(true, Ordering::SeqCst);
        self.state_changed.notify_all();
    }

    /// Returns true once a stop was requested.
    pub(crate) fn should_halt(&self) -> bool {
        self.halt.load(Ordering::SeqCst)
    }
}

// TESTS
// ================================================================================================

#[cfg(test)]
mod tests {
    use kestrel_core::ExecutionGraph;

    use super::*;

    #[test]
    fn queue_drains_to_none_when_tasks_finish() {
        let pool = PoolShared::new(1, Execution::new(ExecutionGraph::new()));
        let task = pool.pop_task();
        assert!(task.is_some());
        pool.task_done();
        assert!(pool.pop_task().is_none());
    }

    #[test]
    fn halt_wakes_poppers() {
        let pool = PoolShared::new(1, Execution::new(ExecutionGraph::new()));
        pool.halt();
        assert!(pool.pop_task().is_none());
    }
}

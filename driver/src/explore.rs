use std::sync::Arc;
use std::thread;

use kestrel_checker::ConsistencyChecker;
use kestrel_core::{Event, ExecutionGraph};
use tracing::{debug, instrument};

use crate::{
    config::{VerificationOptions, VerificationOptionsError},
    driver::{Driver, Execution, Mode},
    interp::{Interpreter, MemorySource},
    pool::PoolShared,
    result::VerificationResult,
};

// ENTRY POINTS
// ================================================================================================

/// Verifies the program behind `interp` under `opts`, single-worker.
///
/// The interpreter is driven through every observably distinct execution the memory model
/// admits; the result carries the execution counts, warnings, and the first hard error.
pub fn verify<I: Interpreter>(
    opts: VerificationOptions,
    mem: Arc<dyn MemorySource>,
    interp: &mut I,
) -> Result<VerificationResult, VerificationOptionsError> {
    let opts = Arc::new(opts.validate()?);
    let mut driver = Driver::new(opts, mem);
    explore(&mut driver, interp);
    Ok(driver.into_result())
}

/// Estimates the size of the program's state space by sampling random executions until the
/// budget is spent or the estimate stabilizes.
pub fn estimate<I: Interpreter>(
    opts: VerificationOptions,
    mem: Arc<dyn MemorySource>,
    interp: &mut I,
    budget: u32,
) -> Result<VerificationResult, VerificationOptionsError> {
    let opts = Arc::new(opts.validate()?);
    let mut driver = Driver::with_mode(opts, mem, Mode::Estimation { budget });
    explore(&mut driver, interp);
    Ok(driver.into_result())
}

/// Verifies the program with the configured number of worker threads, each owning an
/// interpreter produced by `make_interp`.
///
/// The set of executions discovered is independent of the worker count; only the discovery
/// order differs.
pub fn verify_parallel<I, F>(
    opts: VerificationOptions,
    mem: Arc<dyn MemorySource>,
    make_interp: F,
) -> Result<VerificationResult, VerificationOptionsError>
where
    I: Interpreter,
    F: Fn() -> I + Send + Sync,
{
    let opts = Arc::new(opts.validate()?);
    if opts.num_workers() == 1 {
        let mut driver = Driver::new(opts, mem);
        let mut interp = make_interp();
        explore(&mut driver, &mut interp);
        return Ok(driver.into_result());
    }

    // Seed the queue with the empty execution before any worker starts.
    let checker = ConsistencyChecker::new(opts.model());
    let mut graph = ExecutionGraph::new();
    checker.update_views(&mut graph, Event::INIT);
    let shared = Arc::new(PoolShared::new(opts.num_workers(), Execution::new(graph)));

    let mut result = VerificationResult::default();
    thread::scope(|scope| {
        let mut handles = Vec::with_capacity(opts.num_workers());
        for worker in 0..opts.num_workers() {
            let opts = Arc::clone(&opts);
            let mem = Arc::clone(&mem);
            let shared = Arc::clone(&shared);
            let make_interp = &make_interp;
            handles.push(scope.spawn(move || {
                let mut interp = make_interp();
                let mut driver = Driver::new(opts, mem);
                driver.set_pool(shared.clone());
                worker_loop(worker, &mut driver, &mut interp, &shared);
                driver.into_result()
            }));
        }
        for handle in handles {
            if let Ok(worker_result) = handle.join() {
                result.absorb(worker_result);
            }
        }
    });
    Ok(result)
}

// WORKER LOOPS
// ================================================================================================

/// Pops execution snapshots from the global queue and explores each to exhaustion.
#[instrument(level = "debug", skip_all, fields(worker))]
fn worker_loop<I: Interpreter>(
    worker: usize,
    driver: &mut Driver,
    interp: &mut I,
    shared: &PoolShared,
) {
    while let Some(task) = shared.pop_task() {
        debug!(worker, "worker picked up a task");
        driver.init_from_state(task);
        explore(driver, interp);
        shared.task_done();
    }
}

/// Explores every execution reachable from the driver's current frame stack.
///
/// Each round runs one execution to completion (replaying the restored prefix first), then
/// lets the driver backtrack to the next pending alternative; the loop ends when every frame
/// has been exhausted or a hard error halted the exploration.
pub(crate) fn explore<I: Interpreter>(driver: &mut Driver, interp: &mut I) {
    let mut runnable = Vec::new();
    loop {
        driver.handle_execution_start();

        // Fastpath: the whole continuation may already sit in the label cache.
        if !driver.run_from_cache() {
            interp.reset();
            loop {
                runnable.clear();
                interp.collect_runnable(&mut runnable);
                match driver.schedule_next(&runnable) {
                    Some(thread) => interp.step(thread, driver),
                    None => break,
                }
            }
        }

        driver.handle_execution_end();
        if driver.done() {
            break;
        }
    }
}

use std::sync::Arc;

use kestrel_checker::{ConsistencyChecker, SymmetryChecker};
use kestrel_core::{
    Action, BlockType, Event, EventLabel, ExecutionGraph, LabelKind, SAddrAllocator, SVal, Stamp,
    ViewKind,
};
use rand::{SeedableRng, rngs::SmallRng};
use tracing::{debug, instrument, trace};

use crate::{
    bound::{BoundDecider, BoundStrategy},
    choices::ChoiceMap,
    config::VerificationOptions,
    errors::VerificationError,
    interp::{HandleResult, MemorySource},
    pool::PoolShared,
    result::VerificationResult,
    revisit::WorkList,
    scheduler::{CacheLookup, Scheduler},
};

mod checks;
mod estimate;
mod handlers;
mod revisits;

// EXECUTION FRAME
// ================================================================================================

/// The exploration state at one point of the search tree: a graph, the revisits still pending
/// on it, the choices that were available, and the address allocator matching the graph.
#[derive(Clone, Debug)]
pub struct Execution {
    pub(crate) graph: ExecutionGraph,
    pub(crate) worklist: WorkList,
    pub(crate) choices: ChoiceMap,
    pub(crate) allocator: SAddrAllocator,
    pub(crate) last_added: Event,
}

impl Execution {
    pub(crate) fn new(graph: ExecutionGraph) -> Self {
        Self {
            graph,
            worklist: WorkList::new(),
            choices: ChoiceMap::new(),
            allocator: SAddrAllocator::new(),
            last_added: Event::INIT,
        }
    }

    /// Removes every label with stamp greater than `stamp`, keeping the choice map and the
    /// allocator in sync. Returns the reads that were re-bound in the process.
    pub(crate) fn restrict(&mut self, stamp: Stamp) -> Vec<Event> {
        self.graph.cut_to_stamp(stamp);
        let repaired = self.graph.repair_dangling_reads();
        let view = ViewKind::Plain(self.graph.view_from_stamp(stamp));
        self.choices.cut(&view);
        self.allocator.restrict(self.graph.allocations());
        repaired
    }
}

// DRIVER MODE
// ================================================================================================

/// The operating mode of a driver.
#[derive(Clone, Copy, Debug)]
pub enum Mode {
    /// Exhaustive exploration.
    Verification,
    /// Randomized state-space estimation with the given rerun budget.
    Estimation { budget: u32 },
}

// DRIVER
// ================================================================================================

/// The exploration engine.
///
/// The driver owns a stack of [`Execution`] frames (the top one is current), commits the
/// events the interpreter reports, enumerates the alternative continuations each commit
/// exposes, and backtracks between them through the work list. One driver serves one worker
/// thread; drivers share nothing but the pool state.
pub struct Driver {
    opts: Arc<VerificationOptions>,
    mode: Mode,
    mem: Arc<dyn MemorySource>,
    exec_stack: Vec<Execution>,
    scheduler: Scheduler,
    checker: ConsistencyChecker,
    symm: SymmetryChecker,
    bounder: Option<BoundDecider>,
    result: VerificationResult,
    /// Whether the current execution is moot (guaranteed to re-find known behavior).
    moot: bool,
    /// Whether this driver is shutting down.
    halted: bool,
    /// State shared with the other workers of a pool, if any.
    pool: Option<Arc<PoolShared>>,
    /// RNG for estimation-mode choices.
    est_rng: SmallRng,
    /// Estimation bookkeeping: sample count and the running sum of squared deviations.
    est_samples: u64,
    est_m2: f64,
    /// Whether the large-graph advice has been emitted already.
    large_graph_warned: bool,
    /// Whether the driver is currently dispatching cached labels (which are fresh commits
    /// even while a replay schedule is pending).
    dispatching_cached: bool,
}

impl Driver {
    // CONSTRUCTOR
    // --------------------------------------------------------------------------------------------

    /// Returns a driver exploring from the empty execution.
    pub fn new(opts: Arc<VerificationOptions>, mem: Arc<dyn MemorySource>) -> Self {
        Self::with_mode(opts, mem, Mode::Verification)
    }

    /// Returns a driver in the given operating mode.
    pub fn with_mode(
        opts: Arc<VerificationOptions>,
        mem: Arc<dyn MemorySource>,
        mode: Mode,
    ) -> Self {
        let checker = ConsistencyChecker::new(opts.model());
        let mut graph = ExecutionGraph::new();
        checker.update_views(&mut graph, Event::INIT);

        let est_rng = match opts.schedule_seed() {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_os_rng(),
        };
        Self {
            scheduler: Scheduler::new(&opts),
            bounder: opts.bound().map(|(kind, _)| BoundDecider::new(kind)),
            checker,
            symm: SymmetryChecker::new(),
            mem,
            mode,
            exec_stack: vec![Execution::new(graph)],
            result: VerificationResult::default(),
            moot: false,
            halted: false,
            pool: None,
            est_rng,
            est_samples: 0,
            est_m2: 0.0,
            large_graph_warned: false,
            dispatching_cached: false,
            opts,
        }
    }

    /// Attaches this driver to a worker pool.
    pub(crate) fn set_pool(&mut self, pool: Arc<PoolShared>) {
        self.pool = Some(pool);
    }

    /// Replaces the execution stack with a snapshot popped from the pool queue.
    pub(crate) fn init_from_state(&mut self, exec: Execution) {
        self.exec_stack.clear();
        self.exec_stack.push(exec);
        self.moot = false;
    }

    /// Extracts the current execution as an independent snapshot (structural clone). The
    /// pending work list stays behind: revisits are never shared across workers.
    pub(crate) fn extract_state(&self) -> Execution {
        let exec = self.exec();
        Execution {
            graph: exec.graph.clone(),
            worklist: WorkList::new(),
            choices: exec.choices.clone(),
            allocator: exec.allocator.clone(),
            last_added: exec.last_added,
        }
    }

    // ACCESSORS
    // --------------------------------------------------------------------------------------------

    /// Returns the current execution frame.
    pub(crate) fn exec(&self) -> &Execution {
        self.exec_stack.last().expect("the execution stack is never empty while exploring")
    }

    pub(crate) fn exec_mut(&mut self) -> &mut Execution {
        self.exec_stack.last_mut().expect("the execution stack is never empty while exploring")
    }

    /// Returns the verification result accumulated so far.
    pub fn result(&self) -> &VerificationResult {
        &self.result
    }

    /// Consumes the driver, yielding its result.
    pub fn into_result(self) -> VerificationResult {
        self.result
    }

    pub(crate) fn opts(&self) -> &VerificationOptions {
        &self.opts
    }

    /// Returns true if the driver runs in estimation mode.
    pub(crate) fn in_estimation_mode(&self) -> bool {
        matches!(self.mode, Mode::Estimation { .. })
    }

    /// Returns true if this driver (or its pool) is shutting down.
    pub fn is_halting(&self) -> bool {
        self.halted || self.pool.as_ref().is_some_and(|p| p.should_halt())
    }

    /// Returns true if the current execution is moot.
    pub fn is_moot(&self) -> bool {
        self.moot
    }

    pub(crate) fn moot(&mut self) {
        self.moot = true;
    }

    /// Returns true if some thread of the current graph is blocked.
    pub fn is_execution_blocked(&self) -> bool {
        self.exec().graph.is_blocked()
    }

    /// Stops the exploration, recording `error` as the verdict.
    pub(crate) fn halt(&mut self, error: VerificationError) {
        debug!(%error, "halting exploration");
        self.halted = true;
        self.result.status = Some(error);
        if let Some(pool) = &self.pool {
            pool.halt();
        }
    }

    // SCHEDULING
    // --------------------------------------------------------------------------------------------

    /// Returns the next thread the interpreter should step, or `None` if the current
    /// execution is over (completed, blocked, moot, or halting).
    pub fn schedule_next(&mut self, runnable: &[Action]) -> Option<u32> {
        if self.moot || self.is_halting() {
            return None;
        }
        let exec = self.exec_stack.last_mut().expect("have execution");
        self.scheduler.schedule(&mut exec.graph, runnable)
    }

    /// Attempts to complete the current execution from the value-prefix cache alone.
    /// Returns true if no interpreter stepping is needed anymore.
    pub fn run_from_cache(&mut self) -> bool {
        if !self.opts.instruction_caching() || self.in_estimation_mode() {
            return false;
        }
        loop {
            let mem = Arc::clone(&self.mem);
            let value_of = move |g: &ExecutionGraph, lab: &EventLabel| label_value(g, lab, &*mem);
            let exec = self.exec_stack.last_mut().expect("have execution");
            let lookup = self.scheduler.schedule_from_cache(&mut exec.graph, &value_of);
            match lookup {
                CacheLookup::Done => return true,
                CacheLookup::Miss => return false,
                CacheLookup::Hit(labels) => {
                    self.dispatching_cached = true;
                    self.add_cached_labels(labels);
                    self.dispatching_cached = false;
                },
            }
            if self.moot || self.is_halting() {
                return true;
            }
        }
    }

    /// Returns true if the graph already carries a (real) label at `pos`: the interpreter is
    /// replaying and the driver serves cached results.
    pub(crate) fn is_execution_driven_by_graph(&self, pos: Event) -> bool {
        self.exec().graph.contains_real(pos)
    }

    /// Returns true if the interpreter is still replaying a restored prefix. Labels pulled
    /// from the cache are new commits, not replays, even while replay entries are pending.
    pub(crate) fn in_replay(&self) -> bool {
        !self.dispatching_cached && self.scheduler.in_replay()
    }

    // COMMITTING
    // --------------------------------------------------------------------------------------------

    /// Adds `label` to the graph, maintaining views, the label cache, and `last_added`.
    pub(crate) fn add_label_to_graph(&mut self, label: EventLabel) -> Event {
        if self.opts.instruction_caching() && !self.in_estimation_mode() {
            let mem = Arc::clone(&self.mem);
            let value_of = move |g: &ExecutionGraph, lab: &EventLabel| label_value(g, lab, &*mem);
            let exec = self.exec_stack.last().expect("have execution");
            self.scheduler.cache_event_label(&exec.graph, &label, &value_of);
        }

        let exec = self.exec_stack.last_mut().expect("have execution");
        let pos = exec.graph.append(label);
        self.checker.update_views(&mut exec.graph, pos);
        if self.opts.symmetry_reduction() {
            self.symm.update_prefix_with_symmetries(&mut exec.graph, pos);
        }
        exec.last_added = pos;

        if pos.index >= self.opts.warn_on_graph_size() && !self.large_graph_warned {
            self.large_graph_warned = true;
            tracing::warn!(
                thread = pos.thread,
                size = pos.index,
                "the execution graph is getting large; consider bounding all loops"
            );
        }
        trace!(%pos, "committed label");
        pos
    }

    /// Recomputes the cached views of the label at `pos` (after its reads-from changed).
    pub(crate) fn refresh_views(&mut self, pos: Event) {
        let exec = self.exec_stack.last_mut().expect("have execution");
        self.checker.update_views(&mut exec.graph, pos);
        if self.opts.symmetry_reduction() {
            self.symm.update_prefix_with_symmetries(&mut exec.graph, pos);
        }
    }

    /// Replays a chunk of cached labels through the regular handlers.
    fn add_cached_labels(&mut self, labels: Vec<EventLabel>) {
        for label in labels {
            if !self.is_execution_driven_by_graph(label.pos()) {
                self.dispatch_cached(label);
            }
            let blocked = self
                .exec()
                .graph
                .last_label(self.exec().last_added.thread)
                .is_some_and(|lab| lab.is_block());
            if self.moot || self.is_halting() || blocked {
                return;
            }
        }

        // Graph well-formedness: RMW pairs must be committed as one; the next cache round
        // cannot be trusted to schedule the same thread.
        let last = self.exec().last_added;
        if self.exec().graph.label(last).read().is_some() {
            self.complete_pending_rmw(last);
        }
    }

    // VALUE RESOLUTION
    // --------------------------------------------------------------------------------------------

    /// Returns the value the read at `pos` observes.
    pub(crate) fn read_value(&self, pos: Event) -> Option<SVal> {
        let g = &self.exec().graph;
        let read = g.label(pos).read()?;
        let rf = read.rf?;
        let raw = if rf.is_init() {
            self.mem.initial_value_of(read.addr)
        } else {
            g.write_value(rf)?
        };
        Some(raw.truncated(read.size))
    }

    /// Returns the value the read at `pos` hands back to the interpreter, blocking the thread
    /// when an annotation or barrier keeps the value from being usable.
    pub(crate) fn get_read_ret_value(&mut self, pos: Event) -> HandleResult<SVal> {
        let g = &self.exec().graph;
        let Some(read) = g.label(pos).read() else {
            return HandleResult::Invalid;
        };
        if read.rf.is_none() {
            // Bottom is an acceptable binding only while replaying.
            debug_assert!(self.in_replay());
            return HandleResult::Invalid;
        }
        let kind = read.kind;
        let annot = read.annot;
        let val = self.read_value(pos).expect("read has a source");

        // Annotated reads whose value fails the annotation park their thread; a later write
        // may revisit them in place.
        if self.opts.ipr()
            && let Some(annot) = annot
            && !annot.holds(val)
        {
            let cause = match kind {
                kestrel_core::ReadKind::LockCas => BlockType::LockNotAcq,
                _ => BlockType::Assume(kestrel_core::AssumeType::User),
            };
            self.block_thread_try_moot(pos.next(), cause);
            return HandleResult::Reset;
        }
        if matches!(kind, kestrel_core::ReadKind::BWait) && !barrier_unblocks(val) {
            self.block_thread_try_moot(pos.next(), BlockType::Barrier);
            return HandleResult::Reset;
        }
        HandleResult::Ok(val)
    }

    // EXECUTION LIFECYCLE
    // --------------------------------------------------------------------------------------------

    /// Resets the per-execution exploration state; called when an execution (re)starts.
    #[instrument(level = "debug", skip(self))]
    pub fn handle_execution_start(&mut self) {
        self.moot = false;
        let exec = self.exec_stack.last().expect("have execution");
        self.scheduler.reset_exploration(&exec.graph);
    }

    /// Accounts for the execution that just ran to completion (or blocked).
    #[instrument(level = "debug", skip(self))]
    pub fn handle_execution_end(&mut self) {
        if self.is_halting() {
            return;
        }
        if self.moot {
            self.result.explored_moot += 1;
            return;
        }

        if self.opts.helper() {
            self.check_helping_cas_annotation();
        }

        if self.in_estimation_mode() {
            self.update_state_space_estimation();
            if !self.should_stop_estimating() {
                self.exec_mut().worklist.add(crate::revisit::Revisit::Rerun);
            }
        }

        if self.exec().graph.is_blocked() {
            self.result.explored_blocked += 1;
            if self.opts.check_liveness() {
                self.check_liveness();
            }
            return;
        }

        if self.opts.warn_unfreed_memory() {
            self.check_unfreed_memory();
        }

        debug_assert!(self.checker.is_consistent(&self.exec().graph));
        self.result.explored += 1;
        if self.full_execution_exceeds_bound() {
            self.result.bound_exceeding += 1;
        }
        debug!(explored = self.result.explored, "execution complete");
    }

    /// Pops and applies revisits until a valid execution is restored. Returns true when the
    /// exploration is over (every frame exhausted, or halting).
    pub fn done(&mut self) -> bool {
        let mut valid = false;
        while !self.is_halting() && !valid {
            let Some(item) = self.exec_mut().worklist.next() else {
                self.exec_stack.pop();
                if self.exec_stack.is_empty() {
                    return true;
                }
                continue;
            };
            valid = self.restrict_and_revisit(item.clone()) && self.is_revisit_valid(&item);
        }
        self.is_halting()
    }

    // BOUNDING
    // --------------------------------------------------------------------------------------------

    fn execution_exceeds_bound(&self, strategy: BoundStrategy) -> bool {
        let Some((_, budget)) = self.opts.bound() else { return false };
        if self.in_estimation_mode() {
            return false;
        }
        let bounder = self.bounder.as_ref().expect("bounder exists when bounding");
        bounder.exceeds(&self.exec().graph, budget, strategy)
    }

    /// Full (non-slacked) bound check; used for reporting at execution end.
    pub(crate) fn full_execution_exceeds_bound(&self) -> bool {
        self.execution_exceeds_bound(BoundStrategy::NonSlacked)
    }

    /// Partial (slacked) bound check; exceeding it mid-execution moots the frame.
    pub(crate) fn partial_execution_exceeds_bound(&self) -> bool {
        self.execution_exceeds_bound(BoundStrategy::Slacked)
    }

    // VALIDITY
    // --------------------------------------------------------------------------------------------

    /// Returns true if the graph around `pos` passes symmetry, consistency and bound checks.
    pub(crate) fn is_execution_valid(&self, pos: Event) -> bool {
        (!self.opts.symmetry_reduction() || self.symm.is_symmetry_ok(&self.exec().graph, pos))
            && self.checker.is_consistent(&self.exec().graph)
            && !self.partial_execution_exceeds_bound()
    }
}

// FREE FUNCTIONS
// ================================================================================================

/// Resolves the value a committed label handed back to the program.
pub(crate) fn label_value(g: &ExecutionGraph, lab: &EventLabel, mem: &dyn MemorySource) -> SVal {
    match lab.kind() {
        LabelKind::Read(r) => match r.rf {
            Some(rf) if rf.is_init() => mem.initial_value_of(r.addr).truncated(r.size),
            Some(rf) => g.write_value(rf).unwrap_or_default().truncated(r.size),
            None => SVal::default(),
        },
        LabelKind::ThreadJoin(tj) => tj.ret,
        LabelKind::ThreadCreate(tc) => SVal::new(tc.child.into()),
        LabelKind::Malloc(m) => SVal::new(m.addr.get()),
        _ => SVal::default(),
    }
}

/// Returns true if a barrier-wait read observing `val` passes the barrier.
pub(crate) fn barrier_unblocks(val: SVal) -> bool {
    val == SVal::new(0)
}

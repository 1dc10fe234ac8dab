use kestrel_core::{
    AddrPool, AssumeType, BlockType, Event, EventDeps, EventLabel, FreeKind, FreeLabel,
    HelpingCas, HpProtect, LabelKind, MallocLabel, MemOrdering, MethodCall, OptionalLabel,
    ReadKind, ReadLabel, SAddr, SVal, ThreadCreate, ThreadFinish, ThreadInfo, ThreadJoin,
    ThreadStart, WriteLabel,
};
use tracing::debug;

use super::Driver;
use crate::{
    errors::{ErrorDetails, VerificationError},
    interp::{HandleResult, LoadRequest, StoreRequest},
    revisit::Revisit,
};

impl Driver {
    // LOADS
    // --------------------------------------------------------------------------------------------

    /// Commits (or replays) a load and returns the value it observes.
    pub fn handle_load(&mut self, pos: Event, req: LoadRequest) -> HandleResult<SVal> {
        if self.is_execution_driven_by_graph(pos) {
            return self.get_read_ret_value(pos);
        }
        let label = EventLabel::new(
            pos,
            req.ordering,
            LabelKind::Read(ReadLabel {
                addr: req.addr,
                size: req.size,
                kind: req.kind,
                rf: None,
                annot: req.annot,
            }),
        )
        .with_deps(req.deps);
        self.handle_load_label(label)
    }

    pub(crate) fn handle_load_label(&mut self, label: EventLabel) -> HandleResult<SVal> {
        let pos = self.add_label_to_graph(label);
        let (addr, _) = self.exec().graph.label(pos).access().expect("read has an access");

        if let Some(err) = self.check_access_validity(pos) {
            return HandleResult::Err(err);
        }
        if let Some(err) = self.check_ipr_validity(pos) {
            return HandleResult::Err(err);
        }

        // The load may break the assumptions of a thread blocked on a potential spinloop.
        self.check_reconsider_fai_spinloop(pos);

        // An annotated CAS that cannot be added maximally parks its thread until a write to
        // the location shows up.
        if !self.scheduler.is_rescheduled_read(pos) {
            let co_max = self.exec().graph.co_max(addr);
            if self.remove_cas_read_if_blocks(pos, co_max) {
                return HandleResult::Reset;
            }
        } else {
            self.scheduler.clear_rescheduled_read();
        }

        // Gather the coherent rf candidates and thin them out.
        let mut stores = self.checker.coherent_rfs(&self.exec().graph, pos);
        debug_assert!(!stores.is_empty());
        self.filter_optimize_rfs(pos, &mut stores);

        let rf = if self.in_estimation_mode() {
            self.exec_mut().choices.update(pos, stores.iter().copied());
            self.filter_atomicity_violations(pos, &mut stores);
            self.pick_random_rf(pos, &mut stores)
        } else {
            let rf = self.find_consistent_rf(pos, &mut stores);
            // Every other candidate becomes a deferred alternative.
            for store in stores.drain(..) {
                self.exec_mut().worklist.add(Revisit::ForwardRead { pos, rf: store });
            }
            rf
        };

        let Some(_rf) = rf else {
            self.moot();
            return HandleResult::Invalid;
        };

        if let Some(err) = self.check_for_races(pos) {
            return HandleResult::Err(err);
        }
        if let Some(err) = self.check_initialized_mem_read(pos) {
            return HandleResult::Err(err);
        }

        debug!(%pos, "added load");
        self.get_read_ret_value(pos)
    }

    /// Binds the read to the coherence-maximal candidate (which extensibility guarantees
    /// consistent), or searches for a consistent one under bounding. The chosen candidate is
    /// removed from `stores`.
    fn find_consistent_rf(&mut self, pos: Event, stores: &mut Vec<Event>) -> Option<Event> {
        if !self.opts().is_bounded() {
            let rf = stores.pop().expect("at least one rf candidate");
            self.bind_rf(pos, rf);
            return Some(rf);
        }
        while let Some(rf) = stores.pop() {
            self.bind_rf(pos, rf);
            if self.is_execution_valid(pos) {
                return Some(rf);
            }
        }
        None
    }

    /// Binds `pos` to read from `rf` and refreshes the read's views.
    pub(crate) fn bind_rf(&mut self, pos: Event, rf: Event) {
        let exec = self.exec_mut();
        let addr = exec.graph.label(pos).read().expect("binding a non-read").addr;
        let maximal = exec.graph.co_max(addr) == rf;
        exec.graph.set_rf(pos, Some(rf));
        exec.graph.label_mut(pos).set_added_max(maximal);
        self.refresh_views(pos);
    }

    // STORES
    // --------------------------------------------------------------------------------------------

    /// Commits (or replays) a store.
    pub fn handle_store(&mut self, pos: Event, req: StoreRequest) -> HandleResult<()> {
        if self.is_execution_driven_by_graph(pos) {
            return HandleResult::Ok(());
        }
        let label = EventLabel::new(
            pos,
            req.ordering,
            LabelKind::Write(WriteLabel {
                addr: req.addr,
                size: req.size,
                val: req.val,
                kind: req.kind,
                readers: Default::default(),
                ww_racy: false,
                is_final: req.is_final,
                is_local: false,
            }),
        )
        .with_deps(req.deps);
        self.handle_store_label(label)
    }

    pub(crate) fn handle_store_label(&mut self, label: EventLabel) -> HandleResult<()> {
        let pos = self.add_label_to_graph(label);

        if let Some(err) = self.check_access_validity(pos) {
            return HandleResult::Err(err);
        }
        if let Some(err) = self.check_initialized_mem_write(pos) {
            return HandleResult::Err(err);
        }
        if let Some(err) = self.check_final_annotations(pos) {
            return HandleResult::Err(err);
        }
        if let Some(err) = self.check_for_races(pos) {
            return HandleResult::Err(err);
        }

        self.check_reconsider_fai_spinloop(pos);
        self.unblock_waiting_helping(pos);
        self.check_reconsider_read_opts(pos);

        // Find all possible coherence placings for this store; more than one placement means
        // the writes are unordered (a ww-race worth warning about).
        let mut cos = self.checker.coherent_placements(&self.exec().graph, pos);
        debug_assert!(!cos.is_empty());
        if cos.len() > 1 {
            let racy = cos.iter().find(|e| !e.is_init()).copied();
            if self.report_warning_once(pos, VerificationError::WWRace, racy) {
                return HandleResult::Err(VerificationError::WWRace);
            }
        }

        let co = if self.in_estimation_mode() {
            self.exec_mut().choices.update(pos, cos.iter().copied());
            self.pick_random_co(pos, &mut cos)
        } else {
            let co = self.find_consistent_co(pos, &mut cos);
            for pred in cos.drain(..) {
                self.exec_mut().worklist.add(Revisit::ForwardWrite { pos, pred });
            }
            co
        };

        debug!(%pos, "added store");
        if self.in_replay() {
            return HandleResult::Ok(());
        }

        self.calc_revisits(pos);
        if co.is_none() || self.exec().graph.violates_atomicity(pos) {
            self.moot();
            return HandleResult::Invalid;
        }
        HandleResult::Ok(())
    }

    /// Places the write at the coherence-maximal slot (or searches under bounding); the chosen
    /// predecessor is removed from `cos`.
    fn find_consistent_co(&mut self, pos: Event, cos: &mut Vec<Event>) -> Option<Event> {
        let addr = self.exec().graph.label(pos).write().expect("placing a non-write").addr;
        if !self.opts().is_bounded() {
            let pred = cos.pop().expect("at least one placement");
            self.exec_mut().graph.co_insert_after(addr, pos, pred);
            self.exec_mut().graph.label_mut(pos).set_added_max(true);
            return Some(pred);
        }

        let first = cos.pop().expect("at least one placement");
        self.exec_mut().graph.co_insert_after(addr, pos, first);
        if self.is_execution_valid(pos) {
            self.exec_mut().graph.label_mut(pos).set_added_max(true);
            return Some(first);
        }
        while let Some(pred) = cos.pop() {
            self.exec_mut().graph.co_move_after(addr, pos, pred);
            if self.is_execution_valid(pos) {
                return Some(pred);
            }
        }
        None
    }

    // FENCES & DUMMY EVENTS
    // --------------------------------------------------------------------------------------------

    /// Commits a fence.
    pub fn handle_fence(&mut self, pos: Event, ord: MemOrdering, deps: EventDeps) {
        if !self.is_execution_driven_by_graph(pos) {
            self.add_label_to_graph(EventLabel::new(pos, ord, LabelKind::Fence).with_deps(deps));
        }
    }

    /// Commits a loop-begin marker.
    pub fn handle_loop_begin(&mut self, pos: Event) {
        if !self.is_execution_driven_by_graph(pos) {
            self.add_label_to_graph(EventLabel::new(
                pos,
                MemOrdering::NotAtomic,
                LabelKind::LoopBegin,
            ));
        }
    }

    /// Commits a spin-start marker.
    pub fn handle_spin_start(&mut self, pos: Event) {
        if !self.is_execution_driven_by_graph(pos) {
            self.add_label_to_graph(EventLabel::new(
                pos,
                MemOrdering::NotAtomic,
                LabelKind::SpinStart,
            ));
        }
    }

    /// Ends a potential FAI-ZNE spinloop round: blocks the thread if the loop demonstrably
    /// spins, and commits a plain end marker otherwise.
    pub fn handle_fai_zne_spin_end(&mut self, pos: Event) {
        if self.is_execution_driven_by_graph(pos) {
            return;
        }
        if self.thread_reads_maximal(pos.thread) {
            self.block_thread_try_moot(pos, BlockType::Spinloop);
        } else {
            self.add_label_to_graph(EventLabel::new(
                pos,
                MemOrdering::NotAtomic,
                LabelKind::FaiZneSpinEnd,
            ));
        }
    }

    /// Like [`Self::handle_fai_zne_spin_end`], for lock-guarded spinloops.
    pub fn handle_lock_zne_spin_end(&mut self, pos: Event) {
        if self.is_execution_driven_by_graph(pos) {
            return;
        }
        if self.thread_reads_maximal(pos.thread) {
            self.block_thread_try_moot(pos, BlockType::Spinloop);
        } else {
            self.add_label_to_graph(EventLabel::new(
                pos,
                MemOrdering::NotAtomic,
                LabelKind::LockZneSpinEnd,
            ));
        }
    }

    /// Commits a hazard-pointer protection marker.
    pub fn handle_hp_protect(&mut self, pos: Event, hp_addr: SAddr, prot_addr: SAddr) {
        if !self.is_execution_driven_by_graph(pos) {
            self.add_label_to_graph(EventLabel::new(
                pos,
                MemOrdering::NotAtomic,
                LabelKind::HpProtect(HpProtect { hp_addr, prot_addr }),
            ));
        }
    }

    /// Commits a method-begin marker (specification collection).
    pub fn handle_method_begin(&mut self, pos: Event, name: impl Into<String>, arg: i64) {
        if !self.is_execution_driven_by_graph(pos) {
            self.add_label_to_graph(EventLabel::new(
                pos,
                MemOrdering::NotAtomic,
                LabelKind::MethodBegin(MethodCall { name: name.into(), value: arg }),
            ));
        }
    }

    /// Commits a method-end marker.
    pub fn handle_method_end(&mut self, pos: Event, name: impl Into<String>, ret: i64) {
        if !self.is_execution_driven_by_graph(pos) {
            self.add_label_to_graph(EventLabel::new(
                pos,
                MemOrdering::NotAtomic,
                LabelKind::MethodEnd(MethodCall { name: name.into(), value: ret }),
            ));
        }
    }

    // ALLOCATION
    // --------------------------------------------------------------------------------------------

    /// Commits an allocation and returns its address.
    pub fn handle_malloc(&mut self, pos: Event, size: u64, alignment: u64, pool: AddrPool) -> SVal {
        if self.is_execution_driven_by_graph(pos) {
            let g = &self.exec().graph;
            let LabelKind::Malloc(m) = g.label(pos).kind() else {
                unreachable!("replayed a malloc over a non-malloc label");
            };
            return SVal::new(m.addr.get());
        }
        let allocator = &mut self.exec_mut().allocator;
        let addr = match pool {
            AddrPool::Automatic => allocator.alloc_automatic(pos.thread, size, alignment),
            _ => allocator.alloc_heap(pos.thread, size, alignment),
        };
        let label = EventLabel::new(
            pos,
            MemOrdering::NotAtomic,
            LabelKind::Malloc(MallocLabel { addr, size, alignment, pool }),
        );
        self.handle_malloc_label(label)
    }

    pub(crate) fn handle_malloc_label(&mut self, label: EventLabel) -> SVal {
        let LabelKind::Malloc(m) = label.kind() else { unreachable!("not a malloc label") };
        let addr = m.addr;
        self.add_label_to_graph(label);
        SVal::new(addr.get())
    }

    /// Commits a free.
    pub fn handle_free(&mut self, pos: Event, addr: SAddr, deps: EventDeps) {
        if self.is_execution_driven_by_graph(pos) {
            return;
        }
        let label = EventLabel::new(
            pos,
            MemOrdering::NotAtomic,
            LabelKind::Free(FreeLabel { addr, kind: FreeKind::Free }),
        )
        .with_deps(deps);
        self.handle_free_label(label);
    }

    /// Commits a hazard-pointer retirement.
    pub fn handle_retire(&mut self, pos: Event, addr: SAddr, deps: EventDeps) {
        if self.is_execution_driven_by_graph(pos) {
            return;
        }
        let label = EventLabel::new(
            pos,
            MemOrdering::NotAtomic,
            LabelKind::Free(FreeLabel { addr, kind: FreeKind::HazptrRetire }),
        )
        .with_deps(deps);
        self.handle_free_label(label);
    }

    pub(crate) fn handle_free_label(&mut self, label: EventLabel) {
        let pos = label.pos();
        if let Some(err) = self.check_free_validity(&label) {
            self.report_error(ErrorDetails::new(pos, err));
            return;
        }
        self.add_label_to_graph(label);
    }

    // THREAD MANAGEMENT
    // --------------------------------------------------------------------------------------------

    /// Commits a thread creation and returns the spawned thread's id.
    pub fn handle_thread_create(&mut self, pos: Event, info: ThreadInfo, deps: EventDeps) -> u32 {
        if self.is_execution_driven_by_graph(pos) {
            let LabelKind::ThreadCreate(tc) = self.exec().graph.label(pos).kind() else {
                unreachable!("replayed a thread create over a different label");
            };
            return tc.child;
        }
        let label = EventLabel::new(pos, MemOrdering::Release, LabelKind::ThreadCreate(
            ThreadCreate { info, child: 0 },
        ))
        .with_deps(deps);
        self.handle_thread_create_label(label)
    }

    pub(crate) fn handle_thread_create_label(&mut self, label: EventLabel) -> u32 {
        let pos = label.pos();
        let LabelKind::ThreadCreate(tc) = label.kind() else {
            unreachable!("not a thread-create label")
        };
        let mut info = tc.info;

        let child = self.exec_mut().graph.add_new_thread();
        info.id = child;
        let mut create = label;
        match create.kind_mut() {
            LabelKind::ThreadCreate(tc) => {
                tc.child = child;
                tc.info = info;
            },
            _ => unreachable!("checked above"),
        }
        self.add_label_to_graph(create);

        // Is the new thread symmetric to an existing one?
        let symm = if self.opts().symmetry_reduction() {
            self.symm.symmetric_tid(&self.exec().graph, pos, &info)
        } else {
            None
        };
        self.add_label_to_graph(EventLabel::new(
            Event::new(child, 0),
            MemOrdering::Acquire,
            LabelKind::ThreadStart(ThreadStart { create: pos, info, symm_pred: symm, symm_succ: None }),
        ));
        if let Some(symm) = symm
            && let LabelKind::ThreadStart(ts) =
                self.exec_mut().graph.label_mut(Event::new(symm, 0)).kind_mut()
        {
            ts.symm_succ = Some(child);
        }
        child
    }

    /// Commits (or retries) a join on `child`; blocks until the child finishes.
    pub fn handle_thread_join(
        &mut self,
        pos: Event,
        child: u32,
        deps: EventDeps,
    ) -> HandleResult<SVal> {
        if self.is_execution_driven_by_graph(pos) {
            let LabelKind::ThreadJoin(tj) = self.exec().graph.label(pos).kind() else {
                unreachable!("replayed a join over a different label");
            };
            return HandleResult::Ok(tj.ret);
        }

        if child == pos.thread || !self.exec().graph.thread_ids().any(|t| t == child) {
            let msg = format!(
                "invalid TID in join: {child}{}",
                if child == pos.thread { " (cannot join the calling thread)" } else { "" }
            );
            let err = VerificationError::InvalidJoin(msg);
            self.report_error(ErrorDetails::new(pos, err.clone()));
            return HandleResult::Err(err);
        }

        let finished = self
            .exec()
            .graph
            .last_label(child)
            .is_some_and(|lab| matches!(lab.kind(), LabelKind::ThreadFinish(_)));
        if !finished {
            self.block_thread_try_moot(pos, BlockType::Join(child));
            return HandleResult::Reset;
        }

        let ret = match self.exec().graph.last_label(child).map(|lab| lab.kind()) {
            Some(LabelKind::ThreadFinish(tf)) => tf.ret,
            _ => unreachable!("checked above"),
        };
        let join = self.add_label_to_graph(
            EventLabel::new(pos, MemOrdering::Acquire, LabelKind::ThreadJoin(ThreadJoin {
                child,
                ret,
            }))
            .with_deps(deps),
        );

        // Back-link the finish to its join (used by liveness and replay bookkeeping).
        let fin_pos = self.exec().graph.last_label(child).expect("child finished").pos();
        if let LabelKind::ThreadFinish(tf) = self.exec_mut().graph.label_mut(fin_pos).kind_mut() {
            tf.parent_join = Some(join);
        }

        if self.partial_execution_exceeds_bound() {
            self.moot();
            return HandleResult::Invalid;
        }
        HandleResult::Ok(ret)
    }

    /// Commits a thread's termination.
    pub fn handle_thread_finish(&mut self, pos: Event, ret: SVal) {
        if self.is_execution_driven_by_graph(pos) {
            return;
        }
        self.add_label_to_graph(EventLabel::new(
            pos,
            MemOrdering::Release,
            LabelKind::ThreadFinish(ThreadFinish { ret, parent_join: None }),
        ));

        // If a parent is waiting on this thread, release it.
        let finished = pos.thread;
        for t in self.exec().graph.thread_ids().collect::<Vec<_>>() {
            let blocked = self
                .exec()
                .graph
                .blocked_with(t, |b| matches!(b, BlockType::Join(child) if *child == finished));
            if let Some(bpos) = blocked {
                self.exec_mut().graph.unblock_thread(bpos);
            }
        }

        if self.partial_execution_exceeds_bound() {
            self.moot();
        }
    }

    /// Commits an abnormal thread termination.
    pub fn handle_thread_kill(&mut self, pos: Event) {
        if !self.is_execution_driven_by_graph(pos) {
            self.add_label_to_graph(EventLabel::new(
                pos,
                MemOrdering::NotAtomic,
                LabelKind::ThreadKill,
            ));
        }
    }

    // BLOCKING
    // --------------------------------------------------------------------------------------------

    /// Blocks the current thread because an `assume` failed.
    pub fn handle_assume(&mut self, pos: Event, kind: AssumeType) {
        if !self.is_execution_driven_by_graph(pos) {
            self.block_thread_try_moot(pos, BlockType::Assume(kind));
        }
    }

    /// Commits an optional block; returns whether the block should expand.
    pub fn handle_optional(&mut self, pos: Event) -> bool {
        if self.is_execution_driven_by_graph(pos) {
            return match self.exec().graph.label(pos).kind() {
                LabelKind::Optional(o) => o.expanded,
                _ => false,
            };
        }
        self.add_label_to_graph(EventLabel::new(
            pos,
            MemOrdering::NotAtomic,
            LabelKind::Optional(OptionalLabel { expandable: true, expanded: false }),
        ));
        if !self.in_estimation_mode() {
            self.exec_mut().worklist.add(Revisit::ForwardOptional { pos });
        }
        false
    }

    /// Appends a block label (caching it first) and moots the execution if every thread is
    /// stuck for good.
    pub(crate) fn block_thread_try_moot(&mut self, pos: Event, cause: BlockType) {
        let label = EventLabel::new(pos, MemOrdering::NotAtomic, LabelKind::Block(cause));
        if self.exec().graph.contains(pos) {
            self.exec_mut().graph.block_thread(label);
            self.refresh_views(pos);
        } else {
            self.add_label_to_graph(label);
        }
        self.moot_if_fully_blocked(pos);
    }

    // HELPING CAS
    // --------------------------------------------------------------------------------------------

    /// Commits a helping CAS; returns whether a matching helped CAS is present.
    pub fn handle_helping_cas(&mut self, pos: Event, helping: HelpingCas, deps: EventDeps) -> bool {
        debug_assert!(self.opts().helper());
        if self.is_execution_driven_by_graph(pos) {
            return true;
        }
        if !self.check_helping_cas_condition(&helping) {
            self.block_thread_try_moot(pos, BlockType::HelpedCas);
            return false;
        }
        self.add_label_to_graph(
            EventLabel::new(pos, MemOrdering::AcqRel, LabelKind::HelpingCas(helping))
                .with_deps(deps),
        );
        true
    }

    /// Returns true if a helped CAS matching `helping` exists in another thread. A helped CAS
    /// on the same location with different operands indicates annotation misuse.
    fn check_helping_cas_condition(&mut self, helping: &HelpingCas) -> bool {
        let mut found = false;
        let mut misuse = None;
        for lab in self.exec().graph.labels() {
            let Some(read) = lab.read() else { continue };
            let ReadKind::HelpedCas(cas) = read.kind else { continue };
            if read.addr != helping.addr {
                continue;
            }
            if cas == helping.cas {
                found = true;
            } else {
                misuse = Some(lab.pos());
            }
        }
        if let Some(pos) = misuse {
            self.report_error(ErrorDetails::new(
                pos,
                VerificationError::HelpingCasMisuse(
                    "helped and helping CAS disagree on their operands".into(),
                ),
            ));
        }
        found
    }

    /// Wakes up the threads blocked on a helped CAS once its write part is committed.
    pub(crate) fn unblock_waiting_helping(&mut self, pos: Event) {
        let is_helped = self
            .exec()
            .graph
            .label(pos)
            .write()
            .is_some_and(|w| matches!(w.kind, kestrel_core::WriteKind::HelpedCas));
        if !is_helped {
            return;
        }
        // The annotation does not identify which helped CAS got helped, so wake every
        // waiting thread and let them re-run.
        for t in self.exec().graph.thread_ids().collect::<Vec<_>>() {
            if let Some(bpos) =
                self.exec().graph.blocked_with(t, |b| matches!(b, BlockType::HelpedCas))
            {
                self.exec_mut().graph.unblock_thread(bpos);
            }
        }
    }

    // ASSERTIONS
    // --------------------------------------------------------------------------------------------

    /// Reports an assertion violation observed by the interpreter.
    pub fn report_assert_violation(&mut self, pos: Event, msg: impl Into<String>) {
        let err = VerificationError::Assertion(msg.into());
        self.report_error(ErrorDetails::new(pos, err));
    }

    // CACHED DISPATCH
    // --------------------------------------------------------------------------------------------

    /// Routes a cached label through the regular commit logic.
    pub(crate) fn dispatch_cached(&mut self, label: EventLabel) {
        match label.kind() {
            LabelKind::Read(_) => {
                let _ = self.handle_load_label(label);
            },
            LabelKind::Write(_) => {
                let _ = self.handle_store_label(label);
            },
            LabelKind::Malloc(_) => {
                let _ = self.handle_malloc_label(label);
            },
            LabelKind::Free(_) => self.handle_free_label(label),
            LabelKind::ThreadCreate(_) => {
                let _ = self.handle_thread_create_label(label);
            },
            LabelKind::ThreadJoin(tj) => {
                let _ = self.handle_thread_join(label.pos(), tj.child, label.deps().clone());
            },
            LabelKind::ThreadFinish(tf) => self.handle_thread_finish(label.pos(), tf.ret),
            LabelKind::Block(cause) => {
                let cause = *cause;
                self.block_thread_try_moot(label.pos(), cause);
            },
            _ => {
                self.add_label_to_graph(label);
            },
        }
    }
}

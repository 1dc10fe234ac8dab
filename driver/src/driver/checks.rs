use kestrel_core::{BlockType, Event, LabelKind, ReadKind, WriteKind};
use tracing::warn;

use super::Driver;
use crate::errors::{ErrorDetails, VerificationError};

impl Driver {
    // ACCESS VALIDITY
    // --------------------------------------------------------------------------------------------

    /// Checks that the access at `pos` touches mapped, unfreed memory.
    pub(crate) fn check_access_validity(&mut self, pos: Event) -> Option<VerificationError> {
        let g = &self.exec().graph;
        let (addr, _) = g.label(pos).access()?;

        if addr.is_static() {
            if !self.mem_is_static(addr) {
                let err = VerificationError::AccessNonMalloc;
                self.report_error(ErrorDetails::new(pos, err.clone()));
                return Some(err);
            }
            return None;
        }

        // Dynamic accesses must land inside an allocation visible to the access...
        let Some(alloc) = g.find_allocating(addr) else {
            let err = VerificationError::AccessNonMalloc;
            self.report_error(ErrorDetails::new(pos, err.clone()));
            return Some(err);
        };
        let _ = alloc;

        // ...and must not follow (or race with) a free of the same block.
        if let Some(free) = g.find_freeing(addr) {
            let free_pos = free.pos();
            let err = VerificationError::AccessFreed;
            let details = ErrorDetails::new(pos, err.clone()).with_racy(free_pos);
            self.report_error(details);
            return Some(err);
        }
        None
    }

    /// Checks that a free/retire label deallocates a live allocation.
    pub(crate) fn check_free_validity(
        &self,
        label: &kestrel_core::EventLabel,
    ) -> Option<VerificationError> {
        let LabelKind::Free(f) = label.kind() else { return None };
        let g = &self.exec().graph;
        if g.find_allocating(f.addr).is_none() {
            return Some(VerificationError::AccessNonMalloc);
        }
        if g.find_freeing(f.addr).is_some() {
            return Some(VerificationError::AccessFreed);
        }
        None
    }

    fn mem_is_static(&self, addr: kestrel_core::SAddr) -> bool {
        self.mem_source().is_statically_allocated(addr)
    }

    pub(crate) fn mem_source(&self) -> &dyn crate::interp::MemorySource {
        &*self.mem
    }

    // INITIALIZATION & ANNOTATIONS
    // --------------------------------------------------------------------------------------------

    /// Checks that the read at `pos` observes initialized memory and matches its source's
    /// access size.
    pub(crate) fn check_initialized_mem_read(&mut self, pos: Event) -> Option<VerificationError> {
        let g = &self.exec().graph;
        let read = g.label(pos).read()?;
        let rf = read.rf?;

        if self.mem_source().skip_uninit_check(g.label(pos).ordering()) {
            return None;
        }

        // Dynamic locations have no initializing write: reading INIT there is a bug.
        if read.addr.is_dynamic() && rf.is_init() {
            let err = VerificationError::UninitializedMem;
            self.report_error(ErrorDetails::new(pos, err.clone()));
            return Some(err);
        }

        if !rf.is_init()
            && let Some(src) = g.label(rf).write()
            && src.size != read.size
        {
            let err = VerificationError::MixedSize;
            let msg = format!(
                "tried to read {} through a {}-bit access",
                src.size.bits(),
                read.size.bits()
            );
            self.report_error(ErrorDetails::new(pos, err.clone()).with_msg(msg));
            return Some(err);
        }
        None
    }

    /// Checks that an unlock write releases a mutex this thread holds.
    pub(crate) fn check_initialized_mem_write(&mut self, pos: Event) -> Option<VerificationError> {
        let g = &self.exec().graph;
        let write = g.label(pos).write()?;
        if !matches!(write.kind, WriteKind::Unlock) {
            return None;
        }

        // Walk this thread's po-prefix: the nearest lock/unlock on this mutex must be an
        // un-released acquisition.
        let addr = write.addr;
        let holds_lock = (0..pos.index).rev().find_map(|i| {
            let lab = g.label(Event::new(pos.thread, i));
            match lab.kind() {
                LabelKind::Write(w) if w.addr == addr && matches!(w.kind, WriteKind::LockCas) => {
                    Some(true)
                },
                LabelKind::Write(w) if w.addr == addr && matches!(w.kind, WriteKind::Unlock) => {
                    Some(false)
                },
                _ => None,
            }
        });
        if holds_lock != Some(true) {
            let err = VerificationError::InvalidUnlock;
            self.report_error(ErrorDetails::new(pos, err.clone()));
            return Some(err);
        }
        None
    }

    /// Checks the final-write annotation: a final location admits no other store.
    pub(crate) fn check_final_annotations(&mut self, pos: Event) -> Option<VerificationError> {
        let g = &self.exec().graph;
        let write = g.label(pos).write()?;
        let addr = write.addr;
        let other_store = g.co(addr).iter().any(|w| *w != pos);
        let other_final = g
            .co(addr)
            .iter()
            .any(|w| *w != pos && g.label(*w).write().is_some_and(|other| other.is_final));
        if (write.is_final && other_store) || (!write.is_final && other_final) {
            let err = VerificationError::Annotation("multiple stores at a final location".into());
            self.report_error(ErrorDetails::new(pos, err.clone()));
            return Some(err);
        }
        None
    }

    /// IPR soundness: an annotated read may not target a location with unordered writes.
    pub(crate) fn check_ipr_validity(&mut self, pos: Event) -> Option<VerificationError> {
        if !self.opts().ipr() {
            return None;
        }
        let g = &self.exec().graph;
        let read = g.label(pos).read()?;
        if read.annot.is_none() {
            return None;
        }
        let racy = g
            .co(read.addr)
            .iter()
            .find(|w| g.label(**w).write().is_some_and(|wl| wl.ww_racy))
            .copied();
        if let Some(racy) = racy {
            let err = VerificationError::WWRace;
            let msg = "this warning is treated as an error due to in-place revisiting (IPR); \
                       disable IPR to continue past it";
            self.report_error(ErrorDetails::new(racy, err.clone()).with_msg(msg));
            return Some(err);
        }
        None
    }

    // RACES
    // --------------------------------------------------------------------------------------------

    /// Looks for a race involving the freshly committed access at `pos`, reporting it as a
    /// warn-once (or as a hard error when the configuration promotes it).
    pub(crate) fn check_for_races(&mut self, pos: Event) -> Option<VerificationError> {
        if !self.opts().race_detection() || self.in_estimation_mode() {
            return None;
        }
        let racy = self.checker.find_race(&self.exec().graph, pos)?;
        let err = VerificationError::RaceNotAtomic;
        if self.report_warning_once(pos, err.clone(), Some(racy)) {
            return Some(err);
        }
        None
    }

    // ERROR REPORTING
    // --------------------------------------------------------------------------------------------

    /// Reports an error: renders the report, records it on the result, and (for hard
    /// occurrences) halts every worker.
    pub(crate) fn report_error(&mut self, details: ErrorDetails) {
        // One error report is enough; replays of the offending instruction must not loop.
        if self.is_halting() || self.in_replay() {
            return;
        }
        if !details.should_halt && self.in_estimation_mode() {
            return;
        }

        // An invalid access must not have its value resolved while the report renders.
        let g = &mut self.exec_mut().graph;
        if matches!(
            details.error,
            VerificationError::AccessNonMalloc | VerificationError::AccessFreed
        ) && g.contains_real(details.pos)
            && g.label(details.pos).read().is_some()
        {
            g.set_rf(details.pos, None);
        }

        let mut out = String::new();
        let severity = if details.error.is_hard() { "Error" } else { "Warning" };
        out.push_str(&format!("{severity}: {}!\n", details.error));
        if !details.pos.is_bottom() {
            out.push_str(&format!("Event {} ", details.pos));
            if let Some(racy) = details.racy {
                out.push_str(&format!("conflicts with event {racy} "));
            }
            out.push_str("in graph:\n");
        }
        out.push_str(&format!("{}", self.exec().graph));
        if !details.msg.is_empty() {
            out.push_str(&details.msg);
            out.push('\n');
        }
        self.result.message.push_str(&out);

        if details.should_halt {
            self.halt(details.error);
        } else {
            warn!(error = %details.error, "soft verification error");
        }
    }

    /// Reports a warning unless its code was already reported; returns true if the warning is
    /// promoted to a hard error by the configuration.
    pub(crate) fn report_warning_once(
        &mut self,
        pos: Event,
        code: VerificationError,
        racy: Option<Event>,
    ) -> bool {
        debug_assert!(!code.is_hard());

        // WW-races void the assumptions of IPR and symmetry reduction: with either enabled
        // (and exercised), the warning must halt the exploration.
        let upgrade = code == VerificationError::WWRace
            && ((self.opts().symmetry_reduction()
                && self.exec().graph.thread_ids().any(|t| {
                    matches!(
                        self.exec().graph.first_label(t).map(|lab| lab.kind()),
                        Some(LabelKind::ThreadStart(ts)) if ts.symm_pred.is_some()
                    )
                }))
                || (self.opts().ipr() && {
                    let g = &self.exec().graph;
                    let addr = g.label(pos).access().map(|(a, _)| a);
                    addr.is_some_and(|addr| {
                        g.same_loc_labels(addr)
                            .any(|lab| lab.read().is_some_and(|r| r.annot.is_some()))
                    })
                }));

        let fresh = !self.result.warnings.contains(&code);
        if upgrade || fresh {
            let mut details = ErrorDetails::new(pos, code.clone());
            details.racy = racy;
            details.should_halt = upgrade;
            if upgrade {
                details.msg = "unordered writes are treated as an error because an enabled \
                               optimization (IPR/symmetry reduction) relies on ordered writes"
                    .into();
            }
            self.report_error(details);
        }
        if fresh {
            self.result.warnings.insert(code.clone());
        }
        if code == VerificationError::WWRace
            && let Some(w) = self.exec_mut().graph.label_mut(pos).write_mut()
        {
            w.ww_racy = true;
        }
        upgrade
    }

    // SPINLOOPS & LIVENESS
    // --------------------------------------------------------------------------------------------

    /// Returns true if every read of `thread` since its last spin-start observes the
    /// coherence maximum (the spin assumption still holds).
    pub(crate) fn thread_reads_maximal(&self, thread: u32) -> bool {
        let g = &self.exec().graph;
        let size = g.thread_size(thread);
        for i in (1..size).rev() {
            let lab = g.label(Event::new(thread, i));
            if matches!(lab.kind(), LabelKind::SpinStart) {
                return true;
            }
            if let Some(read) = lab.read()
                && read.rf != Some(g.co_max(read.addr))
            {
                return false;
            }
        }
        true
    }

    /// A same-address access may break the assumption of a thread blocked on a potential
    /// FAI spinloop; wake such threads up.
    pub(crate) fn check_reconsider_fai_spinloop(&mut self, pos: Event) {
        let Some((addr, _)) = self.exec().graph.label(pos).access() else { return };
        let is_fai = self.exec().graph.label(pos).read().is_some_and(|r| {
            matches!(r.kind, ReadKind::Fai(_) | ReadKind::BIncFai(_))
        }) || self
            .exec()
            .graph
            .label(pos)
            .write()
            .is_some_and(|w| matches!(w.kind, WriteKind::Fai | WriteKind::BIncFai));
        if is_fai {
            // FAIs on the same variable keep the loop spinning.
            return;
        }

        for t in self.exec().graph.thread_ids().collect::<Vec<_>>() {
            let Some(bpos) =
                self.exec().graph.blocked_with(t, |b| matches!(b, BlockType::Spinloop))
            else {
                continue;
            };
            // Find the FAI the spinloop revolves around.
            let g = &self.exec().graph;
            let fai_addr = (0..bpos.index).rev().find_map(|i| {
                let lab = g.label(Event::new(t, i));
                lab.write().and_then(|w| {
                    matches!(w.kind, WriteKind::Fai | WriteKind::BIncFai).then_some(w.addr)
                })
            });
            if fai_addr != Some(addr) {
                continue;
            }
            self.exec_mut().graph.unblock_thread(bpos);
            self.add_label_to_graph(kestrel_core::EventLabel::new(
                bpos,
                kestrel_core::MemOrdering::NotAtomic,
                LabelKind::FaiZneSpinEnd,
            ));
        }
    }

    /// Liveness: every spin-blocked thread observing only maximal values spins forever.
    pub(crate) fn check_liveness(&mut self) {
        if self.is_halting() {
            return;
        }
        let g = &self.exec().graph;
        let spin_blocked: Vec<u32> = g
            .thread_ids()
            .filter(|t| g.blocked_with(*t, |b| matches!(b, BlockType::Spinloop)).is_some())
            .collect();
        if spin_blocked.is_empty() {
            return;
        }
        if spin_blocked.iter().all(|t| self.thread_reads_maximal(*t)) {
            let tid = spin_blocked[0];
            let pos = self.exec().graph.last_label(tid).expect("blocked thread").pos();
            let err =
                VerificationError::Liveness(format!("non-terminating spinloop: thread {tid}"));
            self.report_error(ErrorDetails::new(pos, err));
        }
    }

    /// Reports allocations still live when an execution ends (opt-in, warn-once).
    pub(crate) fn check_unfreed_memory(&mut self) {
        if self.is_halting() {
            return;
        }
        let leaked = self.exec().graph.labels().find_map(|lab| match lab.kind() {
            LabelKind::Malloc(m) => {
                let freed = self.exec().graph.find_freeing(m.addr).is_some();
                (!freed).then_some(lab.pos())
            },
            _ => None,
        });
        if let Some(pos) = leaked {
            self.report_warning_once(pos, VerificationError::UnfreedMemory, None);
        }
    }

    // BLOCK-RELATED OPTIMIZATIONS
    // --------------------------------------------------------------------------------------------

    /// Blocks an annotated CAS that would fail against the current coherence maximum: nothing
    /// is learned by adding it, so the thread parks until the location changes.
    pub(crate) fn remove_cas_read_if_blocks(&mut self, pos: Event, src: Event) -> bool {
        let g = &self.exec().graph;
        let Some(read) = g.label(pos).read() else { return false };
        let cas_like = matches!(read.kind, ReadKind::Cas(_) | ReadKind::LockCas);
        let ipr_gated = self.opts().ipr() || matches!(read.kind, ReadKind::LockCas);
        if read.annot.is_none() || !cas_like || !ipr_gated || self.opts().is_bounded() {
            return false;
        }
        // Uninitialized reads must surface as errors, not as parked threads.
        if read.addr.is_dynamic() && src.is_init() {
            return false;
        }

        let addr = read.addr;
        let size = read.size;
        let val = if src.is_init() {
            self.mem_source().initial_value_of(addr).truncated(size)
        } else {
            g.write_value(src).unwrap_or_default().truncated(size)
        };
        if g.label(pos).read().expect("still a read").value_makes_assume_succeed(val) {
            return false;
        }

        self.exec_mut().graph.block_thread(kestrel_core::EventLabel::new(
            pos,
            kestrel_core::MemOrdering::NotAtomic,
            LabelKind::Block(BlockType::ReadOpt(addr)),
        ));
        self.refresh_views(pos);
        self.moot_if_fully_blocked(pos);
        true
    }

    /// A write may unblock read-opt-parked threads waiting on its location.
    pub(crate) fn check_reconsider_read_opts(&mut self, pos: Event) {
        let Some(addr) = self.exec().graph.label(pos).write().map(|w| w.addr) else { return };
        for t in self.exec().graph.thread_ids().collect::<Vec<_>>() {
            let blocked = self
                .exec()
                .graph
                .blocked_with(t, |b| matches!(b, BlockType::ReadOpt(a) if *a == addr));
            if let Some(bpos) = blocked {
                self.exec_mut().graph.unblock_thread(bpos);
            }
        }
    }

    /// Moots the execution when the thread blocked at `pos` can never be unblocked by a
    /// revisit: its last visible access is settled (non-revisitable or non-maximal).
    pub(crate) fn moot_if_fully_blocked(&mut self, pos: Event) {
        let g = &self.exec().graph;
        let settled = (0..pos.index).rev().find_map(|i| {
            let lab = g.label(Event::new(pos.thread, i));
            if let Some(read) = lab.read() {
                if read.is_confirming() {
                    return None;
                }
                if let Some(rf) = read.rf
                    && !rf.is_init()
                    && g.label(rf).write().is_some_and(|w| w.is_local || w.is_final)
                {
                    return None;
                }
                return Some(!lab.is_revisitable() || !lab.was_added_max());
            }
            if lab.write().is_some_and(|w| !w.is_final && !w.is_local) {
                return Some(false);
            }
            None
        });
        if settled == Some(true) {
            self.moot();
        }
    }

    // RF FILTERS
    // --------------------------------------------------------------------------------------------

    /// Thins out the rf candidates of the read at `pos`: barrier-aware filtering, symmetry
    /// pruning, and annotation-based (SAVER) value filtering.
    pub(crate) fn filter_optimize_rfs(&mut self, pos: Event, stores: &mut Vec<Event>) {
        if self.opts().bam() {
            self.filter_conflicting_barriers(pos, stores);
        }
        if self.opts().symmetry_reduction() {
            self.symm.filter_symmetric_stores(&self.exec().graph, pos, stores);
        }
        self.filter_values_from_annot(pos, stores);
        debug_assert!(!stores.is_empty());
    }

    /// BAM: barrier FAIs never read from writes another barrier FAI already consumed, and a
    /// barrier wait reads the round-maximal increment directly.
    fn filter_conflicting_barriers(&mut self, pos: Event, stores: &mut Vec<Event>) {
        let g = &self.exec().graph;
        let Some(read) = g.label(pos).read() else { return };
        match read.kind {
            ReadKind::BIncFai(_) => {
                let addr = read.addr;
                stores.retain(|s| {
                    !g.readers(addr, *s).iter().any(|r| {
                        g.label(*r).read().is_some_and(|other| other.is_rmw()) && *r != pos
                    })
                });
                if stores.is_empty() {
                    // Never filter out everything; keep the maximal candidate.
                    stores.push(g.co_max(addr));
                }
            },
            ReadKind::BWait => {
                // The wait's own barrier increment sits right before it; follow the arrival
                // chain to the round's last increment.
                let addr = read.addr;
                let mut w = pos.prev();
                loop {
                    let Some(wlab) = g.label(w).write() else { break };
                    if super::barrier_unblocks(wlab.val) {
                        break;
                    }
                    let next = g.readers(addr, w).iter().find_map(|r| {
                        let is_inc = g
                            .label(*r)
                            .read()
                            .is_some_and(|other| matches!(other.kind, ReadKind::BIncFai(_)));
                        is_inc.then(|| r.next())
                    });
                    match next {
                        Some(n) if g.contains_real(n) => w = n,
                        _ => break,
                    }
                }
                stores.clear();
                stores.push(w);
            },
            _ => {},
        }
    }

    /// SAVER: candidates that fail the read's annotation all lead to the same parked thread;
    /// keep only the maximal one of them.
    fn filter_values_from_annot(&mut self, pos: Event, stores: &mut Vec<Event>) {
        let g = &self.exec().graph;
        let Some(read) = g.label(pos).read() else { return };
        let Some(annot) = read.annot else { return };
        let addr = read.addr;
        let size = read.size;
        debug_assert!(!stores.is_empty());

        let maximal = *stores.last().expect("nonempty");
        let co_max = g.co_max(addr);
        let value = |s: &Event| {
            if s.is_init() {
                self.mem_source().initial_value_of(addr).truncated(size)
            } else {
                g.write_value(*s).unwrap_or_default().truncated(size)
            }
        };
        stores.retain(|s| *s == maximal || *s == co_max || annot.holds(value(s)));
    }

    /// Estimation: drops candidates whose choice would settle an atomicity violation.
    pub(crate) fn filter_atomicity_violations(&mut self, pos: Event, stores: &mut Vec<Event>) {
        let g = &self.exec().graph;
        let Some(read) = g.label(pos).read() else { return };
        if !read.is_rmw() {
            return;
        }
        let addr = read.addr;
        stores.retain(|s| {
            !g.readers(addr, *s).iter().any(|r| {
                *r != pos
                    && g.label(*r).read().is_some_and(|other| other.is_rmw())
                    && g.contains_real(r.next())
                    && g.label(r.next()).write().is_some_and(|w| w.is_rmw())
            })
        });
        if stores.is_empty() {
            stores.push(g.co_max(addr));
        }
    }

    // HELPING CAS (EXECUTION END)
    // --------------------------------------------------------------------------------------------

    /// Sanity-checks the helped/helping annotations at execution end: every helping CAS must
    /// have a matching helped CAS somewhere in the graph.
    pub(crate) fn check_helping_cas_annotation(&mut self) {
        if self.is_halting() {
            return;
        }
        let g = &self.exec().graph;
        let orphan = g.labels().find_map(|lab| match lab.kind() {
            LabelKind::HelpingCas(h) => {
                let matched = g.same_loc_labels(h.addr).any(|other| {
                    other
                        .read()
                        .is_some_and(|r| matches!(r.kind, ReadKind::HelpedCas(cas) if cas == h.cas))
                });
                (!matched).then_some(lab.pos())
            },
            _ => None,
        });
        if let Some(pos) = orphan {
            let err = VerificationError::HelpingCasMisuse(
                "helping CAS without a corresponding helped CAS".into(),
            );
            self.report_error(ErrorDetails::new(pos, err));
        }
    }
}

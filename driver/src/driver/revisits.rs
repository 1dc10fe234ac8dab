use kestrel_core::{
    BlockType, DepView, Event, EventLabel, ExecutionGraph, LabelKind, ReadKind, SVal, ViewKind,
    WriteLabel,
};
use tracing::{debug, trace};

use super::{Driver, Execution, barrier_unblocks};
use crate::{
    errors::{ErrorDetails, VerificationError},
    revisit::Revisit,
};

impl Driver {
    // REVISIT CALCULATION
    // --------------------------------------------------------------------------------------------

    /// Enumerates the backward revisits the freshly placed write at `w` enables and pushes
    /// the ones that survive the maximal-extension gate.
    pub(crate) fn calc_revisits(&mut self, w: Event) {
        let mut loads = self.revisitable_approximation(w);
        trace!(%w, ?loads, "revisitable loads");

        if self.try_optimize_revisits(w, &mut loads) {
            return;
        }

        // In estimation mode, record the alternatives without actually revisiting.
        if self.in_estimation_mode() {
            self.exec_mut().choices.extend_each(loads, w);
            return;
        }

        for r in loads {
            let view = self.revisit_view(r, w);
            let item = Revisit::Backward { pos: r, rev: w, view };
            if !self.is_maximal_extension(&item) {
                break;
            }
            trace!(%r, %w, "pushing backward revisit");
            self.exec_mut().worklist.add(item);
        }
    }

    /// Returns the revisitable reads of `w`'s location, coherence-filtered and ordered in
    /// reverse addition order (newest first).
    fn revisitable_approximation(&mut self, w: Event) -> Vec<Event> {
        let g = &self.exec().graph;
        let wlab = g.label(w);
        let addr = wlab.write().expect("revisits from a non-write").addr;
        let before = wlab.porf_view().clone();

        let mut loads: Vec<Event> = Vec::new();

        // Fastpath: when the previous coherence maximum is already in our prefix, only its
        // readers can still be revisited.
        let prev_co_max = g.co(addr).iter().rev().find(|e| **e != w).copied();
        let fast = prev_co_max.is_some_and(|prev| before.contains(prev));
        if fast {
            let prev = prev_co_max.expect("checked above");
            for r in g.readers(addr, prev) {
                let rlab = g.label(*r);
                if rlab.is_revisitable() && !before.contains(*r) {
                    loads.push(*r);
                }
            }
        } else {
            // Slowpath: consider every same-location read committed before `w`.
            let wstamp = wlab.stamp();
            for lab in g.same_loc_labels(addr) {
                if lab.stamp() >= wstamp {
                    continue;
                }
                if lab.read().is_some() && lab.is_revisitable() && !before.contains(lab.pos()) {
                    loads.push(lab.pos());
                }
            }
        }

        // Reads committed after a conflicting pending RMW would only settle the violation.
        if let Some(conf) = self.find_pending_rmw(w) {
            let conf_stamp = self.exec().graph.label(conf).stamp();
            let g = &self.exec().graph;
            loads.retain(|r| g.label(*r).stamp() <= conf_stamp);
        }

        let exec = self.exec_stack.last().expect("have execution");
        self.checker.filter_coherent_revisits(&exec.graph, w, &mut loads);
        let g = &self.exec().graph;
        loads.sort_by_key(|r| std::cmp::Reverse(g.label(*r).stamp()));
        loads
    }

    /// Returns a conflicting RMW read whose completion the write at `w` would orphan: another
    /// RMW reading from the same source as `w`'s read part.
    fn find_pending_rmw(&self, w: Event) -> Option<Event> {
        let g = &self.exec().graph;
        if !g.label(w).write().is_some_and(|wl| wl.is_rmw()) {
            return None;
        }
        let read = g.po_imm_pred(w).and_then(|lab| lab.read())?;
        let rf = read.rf?;
        g.readers(read.addr, rf)
            .iter()
            .find(|r| **r != w.prev() && g.label(**r).read().is_some_and(|other| other.is_rmw()))
            .copied()
    }

    // REVISIT OPTIMIZATIONS
    // --------------------------------------------------------------------------------------------

    /// Applies BAM, IPR and confirmation shortcuts; returns true if the revisits are fully
    /// handled and nothing should be pushed.
    fn try_optimize_revisits(&mut self, w: Event, loads: &mut Vec<Event>) -> bool {
        if self.opts().bam()
            && self
                .exec()
                .graph
                .label(w)
                .write()
                .is_some_and(|wl| matches!(wl.kind, kestrel_core::WriteKind::BIncFai))
            && self.try_optimize_barrier_revisits(w, loads)
        {
            return true;
        }

        self.try_optimize_iprs(w, loads);

        if self.opts().confirmation() {
            self.optimize_unconfirmed_revisits(w, loads);
        }
        false
    }

    /// BAM: barrier rounds synchronize as one unit. Only the round's last increment revisits,
    /// and it revisits the round's waiting reads in place.
    fn try_optimize_barrier_revisits(&mut self, w: Event, _loads: &mut [Event]) -> bool {
        if !self.check_barrier_well_formedness(w) {
            return true;
        }
        let g = &self.exec().graph;
        if !g.label(w).write().is_some_and(|wl| barrier_unblocks(wl.val)) {
            // Not the last arrival of its round: intra-round revisits are redundant.
            return true;
        }

        // Walk the arrival chain backwards and collect the earlier arrivals' waiting reads.
        let mut to_revisit = Vec::new();
        let mut cur = g.po_imm_pred(w).and_then(|lab| lab.read()).and_then(|r| r.rf);
        while let Some(wpos) = cur {
            if wpos.is_init() {
                break;
            }
            let Some(wlab) = g.label(wpos).write() else { break };
            if !matches!(wlab.kind, kestrel_core::WriteKind::BIncFai)
                || barrier_unblocks(wlab.val)
            {
                break;
            }
            if let Some(next) = g.po_imm_succ(wpos)
                && next.read().is_some_and(|r| matches!(r.kind, ReadKind::BWait))
            {
                to_revisit.push(next.pos());
            }
            cur = g.po_imm_pred(wpos).and_then(|lab| lab.read()).and_then(|r| r.rf);
        }

        for r in to_revisit {
            self.revisit_in_place(r, w);
        }
        true
    }

    /// Reports malformed barrier usage (a barrier cell written by anything but barrier
    /// increments). Returns false when the execution must not continue.
    fn check_barrier_well_formedness(&mut self, w: Event) -> bool {
        let g = &self.exec().graph;
        let addr = g.label(w).write().expect("barrier write").addr;
        let malformed = g
            .co(addr)
            .iter()
            .any(|e| {
                !g.label(*e)
                    .write()
                    .is_some_and(|wl| matches!(wl.kind, kestrel_core::WriteKind::BIncFai))
            });
        if malformed {
            self.report_error(ErrorDetails::new(w, VerificationError::BarrierWellFormedness));
            return false;
        }
        true
    }

    /// IPR: assume-blocked (non-CAS) annotated reads get re-bound in place instead of through
    /// a new frame.
    fn try_optimize_iprs(&mut self, w: Event, loads: &mut Vec<Event>) {
        if !self.opts().ipr() {
            return;
        }

        let mut to_ipr = Vec::new();
        {
            let g = &self.exec().graph;
            loads.retain(|r| {
                let read = g.label(*r).read().expect("revisitable load");
                let cas_like = matches!(
                    read.kind,
                    ReadKind::Cas(_)
                        | ReadKind::LockCas
                        | ReadKind::Confirming(_)
                        | ReadKind::HelpedCas(_)
                );
                let blocked = !cas_like
                    && read.annot.is_some()
                    && !self
                        .read_value(*r)
                        .is_some_and(|val| read.value_makes_assume_succeed(val));
                if blocked {
                    to_ipr.push(*r);
                }
                !blocked
            });
        }
        for r in to_ipr {
            self.revisit_in_place(r, w);
        }

        // With a conflicting RMW pending, annotated reads bound forward to later writes
        // outside our prefix cannot be meaningfully revisited either.
        if self.find_pending_rmw(w).is_some() {
            let g = &self.exec().graph;
            let prefix = g.label(w).porf_view();
            loads.retain(|r| {
                let rlab = g.label(*r);
                let read = rlab.read().expect("revisitable load");
                let Some(rf) = read.rf else { return true };
                !(read.annot.is_some()
                    && !rf.is_init()
                    && g.label(rf).stamp() > rlab.stamp()
                    && !prefix.contains(rf))
            });
        }
    }

    /// Confirmation: revisiting a confirming read is pointless unless its speculation read
    /// from the same write.
    fn optimize_unconfirmed_revisits(&mut self, w: Event, loads: &mut Vec<Event>) {
        let mut annotation_error = None;
        {
            let g = &self.exec().graph;
            loads.retain(|r| {
                let rlab = g.label(*r);
                let read = rlab.read().expect("revisitable load");
                if !read.is_confirming() {
                    return true;
                }
                let speculation = (0..r.index).rev().find_map(|i| {
                    let plab = g.label(Event::new(r.thread, i));
                    plab.read()
                        .filter(|p| {
                            matches!(p.kind, ReadKind::Speculative) && p.addr == read.addr
                        })
                        .map(|p| (plab.pos(), p.rf))
                });
                let Some((_, spec_rf)) = speculation else {
                    annotation_error = Some(*r);
                    return false;
                };
                spec_rf == Some(w)
            });
        }
        if let Some(pos) = annotation_error {
            let err = VerificationError::Annotation(
                "confirming CAS without a preceding speculative read".into(),
            );
            self.report_error(ErrorDetails::new(pos, err));
        }
    }

    // REVISIT VIEWS & THE MAXIMAL-EXTENSION GATE
    // --------------------------------------------------------------------------------------------

    /// Returns the restriction view of the revisit `r <- w`: everything committed up to `r`,
    /// joined with `w`'s prefix (rfi-closed for dependency-tracking models).
    pub(crate) fn revisit_view(&self, r: Event, w: Event) -> ViewKind {
        let g = &self.exec().graph;
        let rstamp = g.label(r).stamp();
        let cut = g.view_from_stamp(rstamp);

        let mut preds = if self.checker.model().is_dep_tracking() {
            let mut dv = DepView::new();
            for t in 0..cut.num_threads() {
                if cut.cut(t) > 0 {
                    dv.include(Event::new(t, cut.cut(t) - 1));
                }
            }
            ViewKind::Dep(dv)
        } else {
            ViewKind::Plain(cut)
        };

        update_preds_with_prefix_view(g, &mut preds, g.label(w).porf_view());
        preds
    }

    /// The soundness-and-completeness gate: the revisit may only proceed if every label it
    /// would delete was added maximally, is still revisitable, and is not coherence-ordered
    /// before the saved prefix.
    pub(crate) fn is_maximal_extension(&self, item: &Revisit) -> bool {
        let Revisit::Backward { pos: r, rev: w, view } = item else {
            return true;
        };
        if !self.coherence_succ_remains_in_graph(*w, view) {
            return false;
        }

        let g = &self.exec().graph;
        for lab in g.labels() {
            if matches!(lab.kind(), LabelKind::Empty) {
                continue;
            }
            // Labels the revisit keeps (other than the revisited read itself) are exempt.
            if (lab.pos() != *r && view.contains(lab.pos()))
                || self.prefix_contains_same_loc(*w, lab)
            {
                continue;
            }
            if !lab.is_revisitable() {
                return false;
            }
            if !was_added_maximally(lab) {
                return false;
            }
            if self.is_co_before_saved_prefix(*w, view, lab) {
                return false;
            }
        }
        true
    }

    /// Revisits must not merely re-shuffle the revisiting write's placement: its immediate
    /// coherence successor (if any) has to survive.
    fn coherence_succ_remains_in_graph(&self, w: Event, view: &ViewKind) -> bool {
        let g = &self.exec().graph;
        let wlab = g.label(w).write().expect("backward revisit from a non-write");
        if wlab.is_rmw() {
            return true;
        }
        match g.co_imm_succ(wlab.addr, w) {
            Some(succ) => view.contains(succ),
            None => true,
        }
    }

    /// Returns true if a to-be-deleted label sits coherence-before an event the revisit keeps
    /// (which would leave the kept prefix observing a deleted past).
    fn is_co_before_saved_prefix(&self, rev: Event, view: &ViewKind, lab: &EventLabel) -> bool {
        let g = &self.exec().graph;
        let Some((addr, _)) = lab.access() else { return false };

        let succs: &[Event] = if let Some(read) = lab.read() {
            match read.rf {
                Some(rf) if !rf.is_init() => g.co_succs(addr, rf),
                Some(_) => g.co(addr),
                None => &[],
            }
        } else {
            g.co_succs(addr, lab.pos())
        };

        succs.iter().any(|s| {
            *s != rev
                && view.contains(*s)
                && (!self.checker.model().is_dep_tracking()
                    || lab.index() >= g.label(*s).porf_view().cut(lab.thread()))
        })
    }

    /// Dependency-tracking models: holes of the prefix that are nevertheless fixed by it
    /// (same-location reads of the same write, observed RMWs) are exempt from the gate.
    fn prefix_contains_same_loc(&self, rev: Event, lab: &EventLabel) -> bool {
        if !self.checker.model().is_dep_tracking() {
            return false;
        }
        let g = &self.exec().graph;
        let Some(prefix) = g.label(rev).porf_view().as_dep() else { return false };
        if lab.index() >= prefix.cut().cut(lab.thread()) {
            return false;
        }
        is_fixed_hole(g, lab, prefix)
    }

    // RESTRICT & REVISIT
    // --------------------------------------------------------------------------------------------

    /// Adjusts the graph and work list according to the popped revisit; returns true if the
    /// resulting graph should be explored.
    pub(crate) fn restrict_and_revisit(&mut self, item: Revisit) -> bool {
        let stamp = {
            let g = &self.exec().graph;
            match &item {
                Revisit::Backward { rev, .. } => g.label(*rev).stamp(),
                Revisit::Rerun => g.label(Event::INIT).stamp(),
                other => g.label(other.pos()).stamp(),
            }
        };
        let repaired = self.exec_mut().restrict(stamp);
        for pos in repaired {
            self.refresh_views(pos);
        }
        self.exec_mut().last_added = item.pos();

        match item {
            Revisit::ForwardRead { pos, rf } => self.revisit_read(pos, rf, false),
            Revisit::ForwardWrite { pos, pred } => self.revisit_write(pos, pred),
            Revisit::ForwardOptional { pos } => self.revisit_optional(pos),
            Revisit::Rerun => true,
            Revisit::Backward { pos, rev, .. } => self.backward_revisit(pos, rev),
        }
    }

    /// Re-places the write at `pos` after `pred` and re-enumerates its revisits.
    fn revisit_write(&mut self, pos: Event, pred: Event) -> bool {
        let addr = self.exec().graph.label(pos).write().expect("forward-revisited write").addr;
        let exec = self.exec_mut();
        exec.graph.co_move_after(addr, pos, pred);
        exec.graph.label_mut(pos).set_added_max(false);
        debug!(%pos, %pred, "forward-revisited write placement");
        self.calc_revisits(pos);
        !self.exec().graph.violates_atomicity(pos)
    }

    /// Expands the optional block at `pos`.
    fn revisit_optional(&mut self, pos: Event) -> bool {
        if let LabelKind::Optional(o) = self.exec_mut().graph.label_mut(pos).kind_mut() {
            o.expandable = false;
            o.expanded = true;
        }
        true
    }

    /// Re-binds the read at `pos` to `rev`, completing a now-successful RMW and re-checking
    /// its consequences. Returns true if the resulting graph should be explored.
    fn revisit_read(&mut self, pos: Event, rev: Event, backward: bool) -> bool {
        let exec = self.exec_mut();
        let addr = exec.graph.label(pos).read().expect("revisited read").addr;
        let maximal = backward && exec.graph.co_max(addr) == rev;
        exec.graph.set_rf(pos, Some(rev));
        exec.graph.label_mut(pos).set_added_max(maximal);
        self.refresh_views(pos);
        debug!(%pos, %rev, backward, "revisited read");

        // The new binding may park the thread right away.
        if self.remove_cas_read_if_blocks(pos, rev) {
            return true;
        }
        if self.check_initialized_mem_read(pos).is_some() {
            return false;
        }

        // If the read became a successful RMW, add its write part and revisit from there.
        if let Some(wpos) = self.complete_revisited_rmw(pos) {
            self.calc_revisits(wpos);
            return !self.exec().graph.violates_atomicity(wpos);
        }

        // A barrier wait that still does not observe the release value re-blocks.
        let g = &self.exec().graph;
        if g.label(pos).read().is_some_and(|r| matches!(r.kind, ReadKind::BWait))
            && let Some(val) = self.read_value(pos)
            && !barrier_unblocks(val)
        {
            self.block_thread_try_moot(pos.next(), BlockType::Barrier);
        }
        true
    }

    /// Creates the sibling frame of a backward revisit and re-binds the read there.
    fn backward_revisit(&mut self, pos: Event, rev: Event) -> bool {
        // Recompute the view: the restriction may have dropped block labels that the pushed
        // view still contained.
        let view = self.revisit_view(pos, rev);

        // Dependency holes gate the revisit but are not carved out of the copy: the sibling
        // keeps the po-closure, so thread timelines replay without placeholders.
        let copy_view = match &view {
            ViewKind::Dep(dv) => ViewKind::Plain(dv.cut().clone()),
            plain => plain.clone(),
        };
        let (graph, mut choices, mut allocator) = {
            let exec = self.exec();
            (exec.graph.copy_up_to(&copy_view), exec.choices.clone(), exec.allocator.clone())
        };
        choices.cut(&view);
        allocator.restrict(graph.allocations());

        let mut sibling = Execution::new(graph);
        sibling.choices = choices;
        sibling.allocator = allocator;
        sibling.last_added = pos;
        self.exec_stack.push(sibling);

        let repaired = self.exec_mut().graph.repair_dangling_reads();
        for repaired_pos in repaired {
            self.refresh_views(repaired_pos);
        }

        // Events in the revisiting write's prefix are now part of this frame's past and may
        // not be revisited by anything that already observes them.
        let prefix = self.exec().graph.label(rev).porf_view().clone();
        let exec = self.exec_mut();
        let positions: Vec<Event> =
            exec.graph.labels().map(|lab| lab.pos()).filter(|p| prefix.contains(*p)).collect();
        for p in positions {
            exec.graph.label_mut(p).set_revisitable(false);
        }

        let ok = self.revisit_read(pos, rev, true);
        debug_assert!(ok, "backward revisits never fail to re-bind");

        // With idle pool capacity, hand the fresh frame to another worker instead.
        if let Some(pool) = self.pool.clone()
            && pool.wants_more_tasks()
        {
            if self.is_revisit_valid(&Revisit::Backward {
                pos,
                rev,
                view: self.revisit_view(pos, rev),
            }) {
                pool.submit(self.extract_state());
            }
            return false;
        }
        ok
    }

    /// In-place revisit: re-binds a blocked annotated read to `rev` without a frame copy.
    pub(crate) fn revisit_in_place(&mut self, pos: Event, rev: Event) {
        debug_assert!(!self.opts().is_bounded());
        let exec = self.exec_mut();

        // Drop the block label parked right after the read.
        if exec.graph.contains_real(pos.next()) {
            debug_assert!(exec.graph.label(pos.next()).is_block());
            exec.graph.remove_last(pos.thread);
        }
        exec.graph.set_rf(pos, Some(rev));
        exec.graph.label_mut(pos).set_added_max(true);
        self.refresh_views(pos);
        debug!(%pos, %rev, "in-place revisit");
    }

    /// Checks that the just-restored revisit target still passes symmetry/consistency/bound
    /// checks (and, for completed RMWs, that the write part does too).
    pub(crate) fn is_revisit_valid(&mut self, item: &Revisit) -> bool {
        let pos = item.pos();
        let g = &self.exec().graph;
        if !g.contains_real(pos) || !g.label(pos).is_mem_access() {
            return true;
        }
        if !self.is_execution_valid(pos) {
            return false;
        }

        // If re-binding added an RMW write part, it must be re-validated as well.
        let g = &self.exec().graph;
        let next = pos.next();
        let has_rmw_part = g.label(pos).read().is_some()
            && g.contains_real(next)
            && g.label(next).write().is_some_and(|w| w.is_rmw());
        if has_rmw_part {
            return self.is_execution_valid(next) && self.check_for_races(next).is_none();
        }
        true
    }

    // RMW COMPLETION
    // --------------------------------------------------------------------------------------------

    /// If the read at `pos` is the read part of an RMW that now succeeds, appends the matching
    /// write part (coherence-adjacent to the read's source) and returns its position.
    pub(crate) fn complete_revisited_rmw(&mut self, pos: Event) -> Option<Event> {
        let g = &self.exec().graph;
        if g.contains_real(pos.next()) {
            return None;
        }
        let lab = g.label(pos);
        let read = lab.read()?;
        let rf = read.rf?;
        let val = self.read_value(pos)?;
        if !read.value_makes_rmw_succeed(val) {
            return None;
        }

        let wkind = read.kind.matching_write_kind()?;
        let new_val = match read.kind {
            ReadKind::Cas(cas) | ReadKind::Confirming(cas) | ReadKind::HelpedCas(cas) => {
                cas.new_val
            },
            ReadKind::LockCas => SVal::new(1),
            ReadKind::Fai(fai) | ReadKind::BIncFai(fai) => {
                fai.op.apply(val, fai.operand, read.size)
            },
            ReadKind::Plain | ReadKind::Speculative | ReadKind::BWait => return None,
        };

        let addr = read.addr;
        let size = read.size;
        let ordering = lab.ordering();
        let write = EventLabel::new(
            pos.next(),
            ordering,
            LabelKind::Write(WriteLabel {
                addr,
                size,
                val: new_val,
                kind: wkind,
                readers: Default::default(),
                ww_racy: false,
                is_final: false,
                is_local: false,
            }),
        );
        let wpos = self.add_label_to_graph(write);
        self.exec_mut().graph.co_insert_after(addr, wpos, rf);
        let maximal = self.exec().graph.co_imm_succ(addr, wpos).is_none();
        self.exec_mut().graph.label_mut(wpos).set_added_max(maximal);
        Some(wpos)
    }

    /// Completes an RMW whose read part was just replayed from the cache; routes the write
    /// part through the regular store handler so its revisits are enumerated.
    pub(crate) fn complete_pending_rmw(&mut self, pos: Event) {
        let g = &self.exec().graph;
        if g.contains_real(pos.next()) {
            return;
        }
        let Some(read) = g.label(pos).read() else { return };
        let Some(val) = self.read_value(pos) else { return };
        if !read.value_makes_rmw_succeed(val) {
            return;
        }
        let read = g.label(pos).read().expect("still a read");
        let Some(wkind) = read.kind.matching_write_kind() else { return };
        let new_val = match read.kind {
            ReadKind::Cas(cas) | ReadKind::Confirming(cas) | ReadKind::HelpedCas(cas) => {
                cas.new_val
            },
            ReadKind::LockCas => SVal::new(1),
            ReadKind::Fai(fai) | ReadKind::BIncFai(fai) => {
                fai.op.apply(val, fai.operand, read.size)
            },
            ReadKind::Plain | ReadKind::Speculative | ReadKind::BWait => return,
        };
        let label = EventLabel::new(
            pos.next(),
            self.exec().graph.label(pos).ordering(),
            LabelKind::Write(WriteLabel {
                addr: read.addr,
                size: read.size,
                val: new_val,
                kind: wkind,
                readers: Default::default(),
                ww_racy: false,
                is_final: false,
                is_local: false,
            }),
        );
        let _ = self.handle_store_label(label);
    }
}

// FREE FUNCTIONS
// ================================================================================================

/// Returns true if `lab` was "added maximally" for the purposes of the maximal-extension gate.
fn was_added_maximally(lab: &EventLabel) -> bool {
    if lab.is_mem_access() {
        return lab.was_added_max();
    }
    match lab.kind() {
        LabelKind::Optional(o) => !o.expanded,
        _ => true,
    }
}

/// Joins a prefix view into a revisit's predecessor view, restoring the rf-internal edges
/// that dependency tracking elides.
fn update_preds_with_prefix_view(g: &ExecutionGraph, preds: &mut ViewKind, pporf: &ViewKind) {
    preds.update(pporf);

    let (ViewKind::Dep(preds), ViewKind::Dep(pporf)) = (preds, pporf) else {
        return;
    };
    for t in 0..pporf.cut().num_threads() {
        for j in 1..pporf.cut().cut(t) {
            let e = Event::new(t, j);
            let lab = g.label(e);
            if let Some(read) = lab.read()
                && let Some(rf) = read.rf
                && preds.contains(e)
                && !preds.contains(rf)
                && rf.thread == e.thread
            {
                preds.remove_hole(rf);
            }
            if lab.write().is_some_and(|w| w.is_rmw()) && pporf.contains(e.prev()) {
                preds.remove_hole(e);
            }
        }
    }
}

/// Returns true if a hole of a dependency prefix is nevertheless fixed by it: a write some
/// kept read observes, or a read whose source a kept same-location read shares.
fn is_fixed_hole(g: &ExecutionGraph, lab: &EventLabel, v: &DepView) -> bool {
    if let Some(write) = lab.write() {
        return g.readers(write.addr, lab.pos()).iter().any(|r| v.contains(*r));
    }
    let Some(read) = lab.read() else { return false };

    // If the prefix has a same-address load of the same write, this read is pinned.
    for t in 0..v.cut().num_threads() {
        for j in 0..v.cut().cut(t) {
            let e = Event::new(t, j);
            if !v.contains(e) {
                continue;
            }
            if let Some(other) = g.label(e).read()
                && other.addr == read.addr
                && other.rf == read.rf
            {
                return true;
            }
        }
    }

    if read.is_rmw() && g.contains_real(lab.pos().next()) {
        let wpos = lab.pos().next();
        if let Some(w) = g.label(wpos).write() {
            return g.readers(w.addr, wpos).iter().any(|r| v.contains(*r));
        }
    }
    false
}

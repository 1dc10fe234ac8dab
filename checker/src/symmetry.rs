use alloc::vec::Vec;

use kestrel_core::{Event, EventLabel, ExecutionGraph, LabelKind, ThreadInfo};

// SYMMETRY CHECKER
// ================================================================================================

/// Detects isomorphic thread prefixes and prunes the continuations that would only replay an
/// already-explored execution with two indistinguishable threads swapped.
///
/// Two threads form a symmetric pair when they were spawned with the same function and
/// argument by the same parent, with no memory access between the two spawn events; the later
/// one records the earlier as its symmetric predecessor.
#[derive(Clone, Debug, Default)]
pub struct SymmetryChecker;

impl SymmetryChecker {
    pub fn new() -> Self {
        Self
    }

    // PAIR DETECTION
    // --------------------------------------------------------------------------------------------

    /// Returns the greatest thread id that is symmetric to a thread about to be spawned at
    /// `create_pos` with `info`, if any.
    pub fn symmetric_tid(
        &self,
        g: &ExecutionGraph,
        create_pos: Event,
        info: &ThreadInfo,
    ) -> Option<u32> {
        (0..g.num_threads())
            .rev()
            .find(|&candidate| self.is_symmetric_candidate(g, candidate, create_pos, info))
    }

    fn is_symmetric_candidate(
        &self,
        g: &ExecutionGraph,
        candidate: u32,
        create_pos: Event,
        info: &ThreadInfo,
    ) -> bool {
        let Some(LabelKind::ThreadStart(ts)) = g.first_label(candidate).map(|lab| lab.kind())
        else {
            return false;
        };
        if ts.info.fun_id != info.fun_id
            || ts.info.arg != info.arg
            || ts.info.parent != info.parent
            || ts.create.thread != create_pos.thread
        {
            return false;
        }
        // No memory access may separate the two spawns.
        (ts.create.index + 1..create_pos.index)
            .all(|i| !g.label(Event::new(create_pos.thread, i)).is_mem_access())
    }

    /// Returns the symmetric predecessor recorded on `thread`'s start label.
    pub fn symm_pred(&self, g: &ExecutionGraph, thread: u32) -> Option<u32> {
        match g.first_label(thread)?.kind() {
            LabelKind::ThreadStart(ts) => ts.symm_pred,
            _ => None,
        }
    }

    /// Returns the symmetric successor recorded on `thread`'s start label.
    pub fn symm_succ(&self, g: &ExecutionGraph, thread: u32) -> Option<u32> {
        match g.first_label(thread)?.kind() {
            LabelKind::ThreadStart(ts) => ts.symm_succ,
            _ => None,
        }
    }

    // PREFIX SHARING
    // --------------------------------------------------------------------------------------------

    /// Returns the length of the longest common prefix of thread `symm` and the thread of
    /// `lab`, up to `lab`'s index.
    ///
    /// Two positions agree when their kinds match, reads read from the same write (or from
    /// each other's mirrored positions), and no global write intervenes.
    fn largest_symm_prefix_before(&self, g: &ExecutionGraph, symm: u32, lab: &EventLabel) -> u32 {
        let limit = lab.index().min(g.thread_size(symm).saturating_sub(1));
        for j in 0..limit {
            let a = g.label(Event::new(symm, j));
            let b = g.label(Event::new(lab.thread(), j));
            if core::mem::discriminant(a.kind()) != core::mem::discriminant(b.kind()) {
                return j;
            }
            if let (Some(ra), Some(rb)) = (a.read(), b.read()) {
                let mirrored = match (ra.rf, rb.rf) {
                    (Some(rfa), Some(rfb)) => {
                        rfa.thread == symm && rfb.thread == lab.thread() && rfa.index == rfb.index
                    },
                    _ => false,
                };
                if !mirrored && ra.rf != rb.rf {
                    return j;
                }
            }
            if a.write().is_some_and(|w| !w.is_local) {
                return j;
            }
        }
        limit
    }

    /// Returns true if thread `symm` and `lab`'s thread share their whole po-prefix up to
    /// `lab`'s index.
    pub fn share_prefix(&self, g: &ExecutionGraph, symm: u32, lab: &EventLabel) -> bool {
        self.largest_symm_prefix_before(g, symm, lab) == lab.index()
    }

    // SYMMETRY VALIDITY
    // --------------------------------------------------------------------------------------------

    /// Returns true if `lab`'s extended-coherence successors include its mirrored position in
    /// thread `tid` (i.e., the pair is ordered the "wrong way round" for canonicity).
    fn is_eco_before(&self, g: &ExecutionGraph, lab: &EventLabel, tid: u32) -> bool {
        let symm_pos = Event::new(tid, lab.index());
        let hits = |w: Event| {
            let addr = lab.access().expect("eco over non-access").0;
            w == symm_pos || g.readers(addr, w).contains(&symm_pos)
        };

        if let Some(w) = lab.write() {
            return g.co_succs(w.addr, lab.pos()).iter().any(|succ| hits(*succ));
        }
        if let Some(r) = lab.read()
            && let Some(rf) = r.rf
        {
            return g.co_succs(r.addr, rf).iter().any(|succ| hits(*succ));
        }
        false
    }

    fn is_pred_symmetry_ok(&self, g: &ExecutionGraph, lab: &EventLabel, symm: u32) -> bool {
        let mirror = Event::new(symm, lab.index());
        if !self.share_prefix(g, symm, lab) || !g.contains(mirror) {
            return true;
        }
        let symm_lab = g.label(mirror);
        if core::mem::discriminant(symm_lab.kind()) != core::mem::discriminant(lab.kind()) {
            return true;
        }
        !self.is_eco_before(g, lab, symm)
    }

    fn is_succ_symmetry_ok(&self, g: &ExecutionGraph, lab: &EventLabel, symm: u32) -> bool {
        let mirror = Event::new(symm, lab.index());
        if !self.share_prefix(g, symm, lab) || !g.contains(mirror) {
            return true;
        }
        let symm_lab = g.label(mirror);
        if core::mem::discriminant(symm_lab.kind()) != core::mem::discriminant(lab.kind()) {
            return true;
        }
        !self.is_eco_before(g, symm_lab, lab.thread())
    }

    /// Returns true if the graph remains a canonical representative after `pos` was added:
    /// no symmetric pair is ordered against the thread-id order.
    pub fn is_symmetry_ok(&self, g: &ExecutionGraph, pos: Event) -> bool {
        let lab = g.label(pos);
        if !lab.is_mem_access() {
            return true;
        }

        let mut symm = self.symm_pred(g, lab.thread());
        while let Some(t) = symm {
            if !self.is_pred_symmetry_ok(g, lab, t) {
                return false;
            }
            symm = self.symm_pred(g, t);
        }
        let mut symm = self.symm_succ(g, lab.thread());
        while let Some(t) = symm {
            if !self.is_succ_symmetry_ok(g, lab, t) {
                return false;
            }
            symm = self.symm_succ(g, t);
        }
        true
    }

    // PRUNING & PREFIX WIDENING
    // --------------------------------------------------------------------------------------------

    /// Drops rf candidates that would turn the read at `read_pos` into a copy of its symmetric
    /// twin's RMW read; the twin's exploration already covers them.
    pub fn filter_symmetric_stores(
        &self,
        g: &ExecutionGraph,
        read_pos: Event,
        stores: &mut Vec<Event>,
    ) {
        let lab = g.label(read_pos);
        let Some(symm) = self.symm_pred(g, lab.thread()) else { return };
        if !self.share_prefix(g, symm, lab) {
            return;
        }

        let mirror = Event::new(symm, lab.index());
        if !g.contains(mirror) {
            return;
        }
        let Some(twin) = g.label(mirror).read() else { return };
        let my = lab.read().expect("filtering stores for a non-read");
        if twin.addr != my.addr || twin.size != my.size || !twin.is_rmw() {
            return;
        }
        if let Some(twin_rf) = twin.rf {
            stores.retain(|s| *s != twin_rf);
        }
    }

    /// Widens the prefix view of the label at `pos` with its symmetric twin's prefix, so that
    /// revisits treat the twin's history as already fixed.
    pub fn update_prefix_with_symmetries(&self, g: &mut ExecutionGraph, pos: Event) {
        let lab = g.label(pos);
        let Some(symm) = self.symm_pred(g, lab.thread()) else { return };

        let si = self.largest_symm_prefix_before(g, symm, lab);
        let mirror = Event::new(symm, si);
        if !g.contains(mirror) {
            return;
        }

        let mut view = lab.porf_view().clone();
        let symm_lab = g.label(mirror);
        if !symm_lab.is_block() {
            if let Some(porf) = symm_lab.porf() {
                view.update(porf);
            }
        }
        if let Some(r) = symm_lab.read()
            && let Some(rf) = r.rf
            && !rf.is_init()
            && let Some(porf) = g.label(rf).porf()
        {
            view.update(porf);
        }
        g.label_mut(pos).set_porf(view);
    }
}

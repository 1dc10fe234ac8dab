use alloc::vec;
use alloc::vec::Vec;

use kestrel_core::{
    DepView, Event, ExecutionGraph, LabelKind, MemOrdering, SAddr, View, ViewKind,
};

use crate::{MemoryModel, acyclic};

// CONSISTENCY CHECKER
// ================================================================================================

/// Memory-model-specific consistency queries over an execution graph.
///
/// The checker is stateless apart from the chosen model: all views it consumes are cached on
/// the labels themselves (and maintained through [`ConsistencyChecker::update_views`]), so a
/// checker can be shared by every execution frame of a worker.
#[derive(Clone, Debug)]
pub struct ConsistencyChecker {
    model: MemoryModel,
}

impl ConsistencyChecker {
    /// Returns a new checker for the given memory model.
    pub fn new(model: MemoryModel) -> Self {
        Self { model }
    }

    /// Returns the model this checker implements.
    pub fn model(&self) -> MemoryModel {
        self.model
    }

    // VIEW MAINTENANCE
    // --------------------------------------------------------------------------------------------

    /// Computes and caches the prefix and happens-before views of the label at `pos`.
    ///
    /// Must be called when a label is appended, and again whenever a revisit re-binds a read
    /// (which drops the read's cached views).
    pub fn update_views(&self, g: &mut ExecutionGraph, pos: Event) {
        let porf = if self.model.is_dep_tracking() {
            ViewKind::Dep(self.compute_porf_dep(g, pos))
        } else {
            ViewKind::Plain(self.compute_porf_plain(g, pos))
        };
        let hb = self.compute_hb(g, pos);
        let label = g.label_mut(pos);
        label.set_porf(porf);
        label.set_hb(hb);
    }

    /// Returns (a clone of) the cached prefix view of the label at `pos`.
    pub fn prefix_view(&self, g: &ExecutionGraph, pos: Event) -> ViewKind {
        g.label(pos).porf_view().clone()
    }

    /// Plain prefixes: the po-predecessor's prefix joined with external porf edges.
    fn compute_porf_plain(&self, g: &ExecutionGraph, pos: Event) -> View {
        let mut v = match g.po_imm_pred(pos) {
            Some(pred) => pred.porf_view().as_plain().clone(),
            None => View::new(),
        };
        for ext in self.external_prefix_sources(g, pos) {
            v.update(g.label(ext).porf_view().as_plain());
        }
        v.include(pos);
        v
    }

    /// Dependency-refined prefixes: only dependency, synchronization and rf edges contribute;
    /// unrelated po-predecessors become holes.
    fn compute_porf_dep(&self, g: &ExecutionGraph, pos: Event) -> DepView {
        let lab = g.label(pos);
        let mut v = DepView::new();

        let contribute = |g: &ExecutionGraph, e: Event, v: &mut DepView| {
            if let Some(ViewKind::Dep(dep)) = g.label(e).porf() {
                v.update(dep);
            }
            v.include_isolated(e);
        };

        for ext in self.external_prefix_sources(g, pos) {
            contribute(g, ext, &mut v);
        }
        for dep in lab.deps().iter() {
            contribute(g, dep, &mut v);
        }
        // The read part of an RMW always orders its write part.
        if lab.write().is_some_and(|w| w.is_rmw()) {
            contribute(g, pos.prev(), &mut v);
        }
        // Barrier-ordered po-predecessors: fences and acquire reads order every later event;
        // a release write (or fence) orders every earlier one.
        let orders_all_preds = matches!(lab.kind(), LabelKind::Fence)
            || (lab.write().is_some() && lab.ordering().is_at_least_release());
        for i in 0..pos.index {
            let p = Event::new(pos.thread, i);
            let plab = g.label(p);
            let pred_orders = matches!(plab.kind(), LabelKind::Fence)
                || plab.read().is_some() && plab.ordering().is_at_least_acquire()
                || matches!(plab.kind(), LabelKind::ThreadStart(_) | LabelKind::Init);
            if orders_all_preds || pred_orders {
                contribute(g, p, &mut v);
            }
        }
        v.include_isolated(pos);
        v
    }

    /// Returns the non-po events feeding directly into `pos`'s prefix.
    fn external_prefix_sources(&self, g: &ExecutionGraph, pos: Event) -> Vec<Event> {
        let lab = g.label(pos);
        let mut sources = Vec::new();
        match lab.kind() {
            LabelKind::ThreadStart(ts) => sources.push(ts.create),
            LabelKind::ThreadJoin(tj) => {
                if let Some(fin) = g.last_label(tj.child) {
                    sources.push(fin.pos());
                }
            },
            LabelKind::Read(r) => {
                if let Some(rf) = r.rf
                    && !rf.is_init()
                {
                    sources.push(rf);
                }
            },
            _ => {},
        }
        sources
    }

    /// Computes the happens-before view of the label at `pos`.
    fn compute_hb(&self, g: &ExecutionGraph, pos: Event) -> View {
        let lab = g.label(pos);
        let mut hb = match g.po_imm_pred(pos) {
            Some(pred) => pred.hb_view().clone(),
            None => View::new(),
        };
        match lab.kind() {
            LabelKind::ThreadStart(ts) => hb.update(g.label(ts.create).hb_view()),
            LabelKind::ThreadJoin(tj) => {
                if let Some(fin) = g.last_label(tj.child) {
                    hb.update(fin.hb_view());
                }
            },
            LabelKind::Read(r) => {
                if let Some(rf) = r.rf
                    && !rf.is_init()
                    && self.read_synchronizes(lab.ordering())
                {
                    hb.update(&self.msg_view(g, rf));
                }
            },
            LabelKind::Fence if lab.ordering().is_at_least_acquire() => {
                // An acquire fence turns every po-prior read into an acquire.
                if matches!(self.model, MemoryModel::Rc11 | MemoryModel::Imm) {
                    for i in 0..pos.index {
                        let plab = g.label(Event::new(pos.thread, i));
                        if let Some(r) = plab.read()
                            && let Some(rf) = r.rf
                            && !rf.is_init()
                        {
                            hb.update(&self.msg_view(g, rf));
                        }
                    }
                }
            },
            _ => {},
        }
        hb.include(pos);
        hb
    }

    /// Returns the view an acquire read of `w` synchronizes with.
    ///
    /// Under SC/RA every write releases its whole hb view. Under RC11/IMM a relaxed write
    /// releases only what a po-prior release fence covers, plus (for RMWs) whatever the release
    /// sequence it extends had released.
    pub fn msg_view(&self, g: &ExecutionGraph, w: Event) -> View {
        if w.is_init() {
            return View::new();
        }
        let lab = g.label(w);
        debug_assert!(lab.write().is_some());
        match self.model {
            MemoryModel::Sc | MemoryModel::Ra => lab.hb_view().clone(),
            MemoryModel::Rc11 | MemoryModel::Imm => {
                let mut msg = View::new();
                if lab.ordering().is_at_least_release() {
                    msg.update(lab.hb_view());
                } else if let Some(fence) = self.last_release_fence_before(g, w) {
                    msg.update(g.label(fence).hb_view());
                }
                if lab.write().is_some_and(|wl| wl.is_rmw())
                    && let Some(read) = g.label(w.prev()).read()
                    && let Some(rf) = read.rf
                    && !rf.is_init()
                {
                    msg.update(&self.msg_view(g, rf));
                }
                msg
            },
        }
    }

    fn last_release_fence_before(&self, g: &ExecutionGraph, pos: Event) -> Option<Event> {
        (0..pos.index).rev().map(|i| Event::new(pos.thread, i)).find(|e| {
            let lab = g.label(*e);
            matches!(lab.kind(), LabelKind::Fence) && lab.ordering().is_at_least_release()
        })
    }

    /// Returns true if a read with the given ordering synchronizes with its source.
    fn read_synchronizes(&self, ord: MemOrdering) -> bool {
        match self.model {
            // SC and RA strengthen every atomic access; non-atomics never synchronize.
            MemoryModel::Sc | MemoryModel::Ra => !ord.is_not_atomic(),
            MemoryModel::Rc11 | MemoryModel::Imm => ord.is_at_least_acquire(),
        }
    }

    // RF CANDIDATES
    // --------------------------------------------------------------------------------------------

    /// Returns all writes the (just committed) read at `pos` may observe without violating
    /// coherence, ordered along coherence so that the last entry is the maximal choice.
    pub fn coherent_rfs(&self, g: &ExecutionGraph, pos: Event) -> Vec<Event> {
        let read = g.label(pos).read().expect("rf candidates for a non-read");
        let addr = read.addr;
        let co = g.co(addr);

        // Everything up to the coherence-latest (rf?;hb)-before write is overwritten for us;
        // anything from there on is a coherent choice.
        let beg = self.split_loc_mo_before(g, addr, pos);
        let end = if self.model.supports_out_of_order() {
            self.split_loc_mo_after_hb(g, addr, pos)
        } else {
            co.len()
        };

        let end = end.max(beg);
        let mut stores = Vec::with_capacity(end - beg + 1);
        if beg == 0 {
            stores.push(Event::INIT);
        } else {
            stores.push(co[beg - 1]);
        }
        stores.extend_from_slice(&co[beg..end]);
        stores
    }

    /// Returns the index of the first store at `addr` that is not (rf?;hb)-before the event
    /// preceding `pos`.
    fn split_loc_mo_before(&self, g: &ExecutionGraph, addr: SAddr, pos: Event) -> usize {
        let co = g.co(addr);
        debug_assert!(pos.index > 0, "accesses never occupy a thread's first slot");
        let hb = g.label(pos.prev()).hb_view();
        co.iter()
            .rposition(|w| self.is_write_rf_before(g, addr, *w, hb))
            .map_or(0, |idx| idx + 1)
    }

    /// Returns true if `w` or one of its readers is contained in `hb`.
    fn is_write_rf_before(&self, g: &ExecutionGraph, addr: SAddr, w: Event, hb: &View) -> bool {
        hb.contains(w) || g.readers(addr, w).iter().any(|r| hb.contains(*r))
    }

    /// Returns true if `e` is hb-before `w` or hb-before one of `w`'s readers.
    fn is_hb_opt_rf_before(&self, g: &ExecutionGraph, addr: SAddr, e: Event, w: Event) -> bool {
        if !w.is_init() && g.label(w).hb_view().contains(e) {
            return true;
        }
        g.readers(addr, w).iter().any(|r| g.label(*r).hb_view().contains(e))
    }

    /// Returns the index just past the last store a read at `pos` may observe when events can
    /// be committed out of program order.
    fn split_loc_mo_after_hb(&self, g: &ExecutionGraph, addr: SAddr, pos: Event) -> usize {
        let co = g.co(addr);
        if g.readers(addr, Event::INIT)
            .iter()
            .any(|r| g.label(*r).hb_view().contains(pos))
        {
            return 0;
        }
        match co.iter().position(|w| self.is_hb_opt_rf_before(g, addr, pos, *w)) {
            Some(idx) if g.label(co[idx]).hb_view().contains(pos) => idx,
            Some(idx) => idx + 1,
            None => co.len(),
        }
    }

    // CO PLACEMENTS
    // --------------------------------------------------------------------------------------------

    /// Returns all coherence predecessors after which the (just committed, not yet placed)
    /// write at `pos` may be inserted; the last entry is the maximal choice.
    ///
    /// RMW writes have exactly one placement: immediately after their read's source.
    pub fn coherent_placements(&self, g: &ExecutionGraph, pos: Event) -> Vec<Event> {
        let write = g.label(pos).write().expect("placements for a non-write");
        let addr = write.addr;

        if write.is_rmw() {
            let read = g
                .po_imm_pred(pos)
                .and_then(|lab| lab.read())
                .expect("RMW write without a read part");
            let rf = read.rf.expect("RMW read left dangling");
            return vec![rf];
        }

        let co = g.co(addr);
        let beg = self.split_loc_mo_before(g, addr, pos);
        let end = if self.model.supports_out_of_order() {
            self.split_loc_mo_after(g, addr, pos)
        } else {
            co.len()
        };

        // Insertion offset k corresponds to the predecessor co[k-1] (INIT for k == 0).
        (beg..=end).map(|k| if k == 0 { Event::INIT } else { co[k - 1] }).collect()
    }

    /// Like [`Self::split_loc_mo_after_hb`], but for placing a new store: returns the index of
    /// the first store that is hb-after `pos` (or read by something hb-after `pos`).
    fn split_loc_mo_after(&self, g: &ExecutionGraph, addr: SAddr, pos: Event) -> usize {
        let co = g.co(addr);
        co.iter()
            .position(|w| self.is_hb_opt_rf_before(g, addr, pos, *w))
            .unwrap_or(co.len())
    }

    // REVISIT FILTERING
    // --------------------------------------------------------------------------------------------

    /// Removes from `loads` the reads that cannot coherently be revisited by the write at `w`.
    pub fn filter_coherent_revisits(&self, g: &ExecutionGraph, w: Event, loads: &mut Vec<Event>) {
        let addr = g.label(w).write().expect("revisits from a non-write").addr;

        // A po- and co-maximal store can revisit anything still on the table.
        if !self.model.supports_out_of_order() && g.co_max(addr) == w {
            return;
        }

        // Exclude reads that happen after some (co;rf?)-successor of the store.
        let mut opt_rfs: Vec<Event> = Vec::new();
        for succ in g.co_succs(addr, w) {
            opt_rfs.push(*succ);
            opt_rfs.extend_from_slice(g.readers(addr, *succ));
        }
        loads.retain(|r| {
            let hb = g.label(*r).hb_view();
            !opt_rfs.iter().any(|o| hb.contains(*o))
        });

        if !self.model.supports_out_of_order() {
            return;
        }

        // Out-of-order models must additionally drop hb-before loads.
        let whb = g.label(w).hb_view().clone();
        loads.retain(|r| !whb.contains(*r));
    }

    // CONSISTENCY
    // --------------------------------------------------------------------------------------------

    /// Returns true if the graph is consistent under this checker's model.
    pub fn is_consistent(&self, g: &ExecutionGraph) -> bool {
        match self.model {
            MemoryModel::Sc => acyclic::sc_acyclic(g),
            MemoryModel::Ra => self.is_coherent(g),
            MemoryModel::Rc11 => self.is_coherent(g) && acyclic::psc_acyclic(g),
            MemoryModel::Imm => self.is_coherent(g) && acyclic::imm_ar_acyclic(g),
        }
    }

    /// Checks the per-location coherence axioms (CoWW, CoWR, CoRW, CoRR) against hb.
    fn is_coherent(&self, g: &ExecutionGraph) -> bool {
        for label in g.labels() {
            let Some(read) = label.read() else { continue };
            let Some(rf) = read.rf else { continue };
            // CoWR/CoRW: no coherence successor of the source may happen before the read,
            // and the source itself must not happen after the read.
            if g.co_succs(read.addr, rf)
                .iter()
                .any(|w| label.hb_view().contains(*w))
            {
                return false;
            }
            if !rf.is_init() && g.label(rf).hb_view().contains(label.pos()) {
                return false;
            }
        }

        // CoWW: coherence never contradicts hb.
        for label in g.labels() {
            let Some(write) = label.write() else { continue };
            if g.co_succs(write.addr, label.pos())
                .iter()
                .any(|later| label.hb_view().contains(*later))
            {
                return false;
            }
        }

        // CoRR: same-location reads ordered by hb observe coherence-ordered sources.
        for r1 in g.labels() {
            let Some(read1) = r1.read() else { continue };
            let Some(rf1) = read1.rf else { continue };
            for r2 in g.same_loc_labels(read1.addr) {
                let Some(read2) = r2.read() else { continue };
                let Some(rf2) = read2.rf else { continue };
                if r2.hb_view().contains(r1.pos()) && !r1.hb_view().contains(r2.pos()) {
                    let rank1 = co_rank(g, read1.addr, rf1);
                    let rank2 = co_rank(g, read1.addr, rf2);
                    if rank2 < rank1 {
                        return false;
                    }
                }
            }
        }
        true
    }

    // RACE DETECTION
    // --------------------------------------------------------------------------------------------

    /// Returns a racy access conflicting with the (just committed) access at `pos`, if any:
    /// same location, at least one write, at least one non-atomic, unordered by hb.
    pub fn find_race(&self, g: &ExecutionGraph, pos: Event) -> Option<Event> {
        let lab = g.label(pos);
        let (addr, _) = lab.access()?;
        let is_write = lab.write().is_some();
        let is_na = lab.ordering().is_not_atomic();
        let hb = lab.hb_view();

        g.same_loc_labels(addr)
            .filter(|other| other.pos() != pos && !hb.contains(other.pos()))
            .find(|other| {
                (is_write || other.write().is_some())
                    && (is_na || other.ordering().is_not_atomic())
            })
            .map(|other| other.pos())
    }
}

/// Position of `w` in the coherence order at `addr`, counting `INIT` as 0.
pub(crate) fn co_rank(g: &ExecutionGraph, addr: SAddr, w: Event) -> usize {
    if w.is_init() {
        0
    } else {
        g.co_index(addr, w).map_or(0, |idx| idx + 1)
    }
}

// TESTS
// ================================================================================================

#[cfg(test)]
mod tests;

use alloc::{collections::BTreeMap, vec::Vec};
use core::fmt::{self, Display};

use smallvec::SmallVec;

use crate::{
    addr::SAddr,
    event::{Event, Stamp},
    label::{BlockType, EventLabel, LabelKind, MallocLabel},
    ordering::MemOrdering,
    value::SVal,
    view::{View, ViewKind},
};

#[cfg(any(test, debug_assertions))]
mod validate;

// EXECUTION GRAPH
// ================================================================================================

/// A (partial) execution of the program under verification.
///
/// The graph owns per-thread label timelines, the per-address coherence order over writes, and
/// the reads-from relation recovered by dereferencing each read's `rf` field. Thread 0's label
/// at index 0 is the [`LabelKind::Init`] label: it acts as the virtual initializing write of
/// every static location and as the main thread's start label, so [`Event::INIT`] is contained
/// in every non-empty prefix view.
///
/// The coherence order per address is total over the address's writes and implicitly begins at
/// `INIT`; `INIT` itself is never stored in the order.
#[derive(Clone, Debug)]
pub struct ExecutionGraph {
    threads: Vec<Vec<EventLabel>>,
    coherence: BTreeMap<SAddr, Vec<Event>>,
    init_readers: BTreeMap<SAddr, SmallVec<[Event; 2]>>,
    next_stamp: Stamp,
}

impl Default for ExecutionGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionGraph {
    // CONSTRUCTOR
    // --------------------------------------------------------------------------------------------

    /// Returns a new graph containing only the initializing event.
    pub fn new() -> Self {
        let mut init = EventLabel::new(Event::INIT, MemOrdering::SeqCst, LabelKind::Init);
        init.set_revisitable(false);
        init.set_added_max(true);
        Self {
            threads: vec![vec![init]],
            coherence: BTreeMap::new(),
            init_readers: BTreeMap::new(),
            next_stamp: Stamp::from(1),
        }
    }

    // BASIC ACCESSORS
    // --------------------------------------------------------------------------------------------

    /// Returns the number of threads (including empty trailing ones removed by restriction).
    pub fn num_threads(&self) -> u32 {
        self.threads.len() as u32
    }

    /// Returns an iterator over all thread ids.
    pub fn thread_ids(&self) -> impl Iterator<Item = u32> + use<> {
        0..self.threads.len() as u32
    }

    /// Returns the number of events committed in `thread`.
    pub fn thread_size(&self, thread: u32) -> u32 {
        self.threads.get(thread as usize).map_or(0, |t| t.len() as u32)
    }

    /// Returns true if the graph contains an event at the given position.
    pub fn contains(&self, e: Event) -> bool {
        e.index < self.thread_size(e.thread)
    }

    /// Returns true if the position holds a real (non-placeholder) label.
    pub fn contains_real(&self, e: Event) -> bool {
        self.try_label(e).is_some_and(|lab| !matches!(lab.kind(), LabelKind::Empty))
    }

    /// Returns the label at the given position, if present.
    pub fn try_label(&self, e: Event) -> Option<&EventLabel> {
        self.threads.get(e.thread as usize)?.get(e.index as usize)
    }

    /// Returns the label at the given position. Panics on out-of-bounds positions.
    pub fn label(&self, e: Event) -> &EventLabel {
        &self.threads[e.thread as usize][e.index as usize]
    }

    /// Returns a mutable reference to the label at the given position.
    pub fn label_mut(&mut self, e: Event) -> &mut EventLabel {
        &mut self.threads[e.thread as usize][e.index as usize]
    }

    /// Returns the last label of `thread`, if the thread is non-empty.
    pub fn last_label(&self, thread: u32) -> Option<&EventLabel> {
        self.threads.get(thread as usize)?.last()
    }

    /// Returns the first label of `thread` (its start label), if any.
    pub fn first_label(&self, thread: u32) -> Option<&EventLabel> {
        self.threads.get(thread as usize)?.first()
    }

    /// Returns the po-immediate predecessor of `e`, if any.
    pub fn po_imm_pred(&self, e: Event) -> Option<&EventLabel> {
        if e.index == 0 { None } else { self.try_label(e.prev()) }
    }

    /// Returns the po-immediate successor of `e`, if any.
    pub fn po_imm_succ(&self, e: Event) -> Option<&EventLabel> {
        self.try_label(e.next())
    }

    /// Returns the stamp the next appended label will receive.
    pub fn next_stamp(&self) -> Stamp {
        self.next_stamp
    }

    // ITERATORS
    // --------------------------------------------------------------------------------------------

    /// Iterates over all labels, thread by thread in program order.
    pub fn labels(&self) -> impl Iterator<Item = &EventLabel> {
        self.threads.iter().flatten()
    }

    /// Iterates over the labels of `thread` in program order.
    pub fn po(&self, thread: u32) -> impl Iterator<Item = &EventLabel> {
        self.threads.get(thread as usize).into_iter().flatten()
    }

    /// Iterates over all labels in stamp (addition) order.
    pub fn labels_by_stamp(&self) -> impl Iterator<Item = &EventLabel> {
        let mut all: Vec<&EventLabel> = self.labels().collect();
        all.sort_by_key(|lab| lab.stamp());
        all.into_iter()
    }

    /// Iterates over all memory accesses to `addr`.
    pub fn same_loc_labels(&self, addr: SAddr) -> impl Iterator<Item = &EventLabel> {
        self.labels().filter(move |lab| lab.access().is_some_and(|(a, _)| a == addr))
    }

    // THREAD MANAGEMENT
    // --------------------------------------------------------------------------------------------

    /// Adds a new, empty thread and returns its id.
    pub fn add_new_thread(&mut self) -> u32 {
        self.threads.push(Vec::new());
        self.threads.len() as u32 - 1
    }

    /// Returns true if `thread` has no events.
    pub fn is_thread_empty(&self, thread: u32) -> bool {
        self.thread_size(thread) == 0
    }

    // LABEL ADDITION & REMOVAL
    // --------------------------------------------------------------------------------------------

    /// Appends `label` at the next free index of its thread, assigning a fresh stamp.
    ///
    /// Reads with a bound `rf` are linked into the source's reader list. Writes are *not*
    /// entered into coherence here; the caller places them explicitly once the checker has
    /// produced the coherent placements.
    pub fn append(&mut self, mut label: EventLabel) -> Event {
        let pos = label.pos();
        debug_assert!((pos.thread as usize) < self.threads.len(), "unknown thread");
        debug_assert_eq!(pos.index, self.thread_size(pos.thread), "non-contiguous append");

        label.set_stamp(self.next_stamp);
        self.next_stamp = self.next_stamp.next();

        let rf = label.read().and_then(|r| r.rf.map(|rf| (r.addr, rf)));
        self.threads[pos.thread as usize].push(label);
        if let Some((addr, rf)) = rf {
            self.link_reader(addr, rf, pos);
        }
        pos
    }

    /// Removes the last label of `thread`, unlinking it from coherence and reader lists.
    ///
    /// Readers of a removed write are left dangling (`rf = None`); the caller repairs or
    /// re-binds them.
    pub fn remove_last(&mut self, thread: u32) {
        let Some(label) = self.threads.get_mut(thread as usize).and_then(|t| t.pop()) else {
            return;
        };
        if let Some(r) = label.read()
            && let Some(rf) = r.rf
        {
            self.unlink_reader(r.addr, rf, label.pos());
        }
        if let Some(w) = label.write() {
            let readers: Vec<Event> = w.readers.iter().copied().collect();
            if let Some(co) = self.coherence.get_mut(&w.addr) {
                co.retain(|e| *e != label.pos());
            }
            for reader in readers {
                if let Some(rlab) = self.label_mut(reader).read_mut() {
                    rlab.rf = None;
                }
                self.label_mut(reader).reset_views();
            }
        }
    }

    /// Re-binds the read at `pos` to `rf`, maintaining reader lists on both sides and dropping
    /// the read's cached views.
    pub fn set_rf(&mut self, pos: Event, rf: Option<Event>) {
        let read = self.label(pos).read().expect("set_rf on a non-read");
        let addr = read.addr;
        let old = read.rf;
        if old == rf {
            return;
        }
        if let Some(old) = old {
            self.unlink_reader(addr, old, pos);
        }
        if let Some(new) = rf {
            self.link_reader(addr, new, pos);
        }
        let label = self.label_mut(pos);
        label.read_mut().expect("checked above").rf = rf;
        label.reset_views();
    }

    fn link_reader(&mut self, addr: SAddr, rf: Event, reader: Event) {
        if rf.is_init() {
            self.init_readers.entry(addr).or_default().push(reader);
        } else if let Some(w) = self.label_mut(rf).write_mut() {
            w.readers.push(reader);
        } else {
            debug_assert!(false, "rf source is not a write");
        }
    }

    fn unlink_reader(&mut self, addr: SAddr, rf: Event, reader: Event) {
        if rf.is_init() {
            if let Some(readers) = self.init_readers.get_mut(&addr) {
                readers.retain(|e| *e != reader);
            }
        } else if let Some(w) = self.label_mut(rf).write_mut() {
            w.readers.retain(|e| *e != reader);
        }
    }

    // COHERENCE ORDER
    // --------------------------------------------------------------------------------------------

    /// Returns the coherence order at `addr` (excluding the implicit `INIT` minimum).
    pub fn co(&self, addr: SAddr) -> &[Event] {
        self.coherence.get(&addr).map_or(&[], |v| v.as_slice())
    }

    /// Returns the coherence-maximal write at `addr` (`INIT` if there are no writes).
    pub fn co_max(&self, addr: SAddr) -> Event {
        self.co(addr).last().copied().unwrap_or(Event::INIT)
    }

    /// Returns the position of `w` within the coherence order at `addr`.
    ///
    /// `INIT` is reported as position `None`-of-index: callers use [`Self::co_succs`] for
    /// traversal instead of raw indices when `INIT` may be involved.
    pub fn co_index(&self, addr: SAddr, w: Event) -> Option<usize> {
        self.co(addr).iter().position(|e| *e == w)
    }

    /// Inserts the write `w` into coherence immediately after `pred` (`INIT` for the minimum).
    pub fn co_insert_after(&mut self, addr: SAddr, w: Event, pred: Event) {
        let co = self.coherence.entry(addr).or_default();
        let at = if pred.is_init() {
            0
        } else {
            co.iter().position(|e| *e == pred).expect("co predecessor not tracked") + 1
        };
        co.insert(at, w);
    }

    /// Moves the write `w` so that it immediately follows `pred` in coherence.
    pub fn co_move_after(&mut self, addr: SAddr, w: Event, pred: Event) {
        let co = self.coherence.entry(addr).or_default();
        let from = co.iter().position(|e| *e == w).expect("write not tracked in co");
        co.remove(from);
        let at = if pred.is_init() {
            0
        } else {
            co.iter().position(|e| *e == pred).expect("co predecessor not tracked") + 1
        };
        co.insert(at, w);
    }

    /// Returns the coherence successors of `w` at `addr` (all writes for `w == INIT`).
    pub fn co_succs(&self, addr: SAddr, w: Event) -> &[Event] {
        let co = self.co(addr);
        if w.is_init() {
            return co;
        }
        match self.co_index(addr, w) {
            Some(idx) => &co[idx + 1..],
            None => &[],
        }
    }

    /// Returns the coherence predecessors of `w` at `addr`, excluding `INIT`.
    pub fn co_preds(&self, addr: SAddr, w: Event) -> &[Event] {
        let co = self.co(addr);
        match self.co_index(addr, w) {
            Some(idx) => &co[..idx],
            None => &[],
        }
    }

    /// Returns the immediate coherence successor of `w` at `addr`, if any.
    pub fn co_imm_succ(&self, addr: SAddr, w: Event) -> Option<Event> {
        self.co_succs(addr, w).first().copied()
    }

    /// Returns the readers of the write `w` at `addr` (`INIT`'s readers for `w == INIT`).
    pub fn readers(&self, addr: SAddr, w: Event) -> &[Event] {
        if w.is_init() {
            self.init_readers.get(&addr).map_or(&[], |v| v.as_slice())
        } else {
            self.label(w).write().map_or(&[], |wl| wl.readers.as_slice())
        }
    }

    /// Returns the value written by `w`, or `None` for `INIT` (whose value the memory source
    /// supplies) and non-writes.
    pub fn write_value(&self, w: Event) -> Option<SVal> {
        if w.is_init() {
            return None;
        }
        self.try_label(w)?.write().map(|wl| wl.val)
    }

    // BLOCKING
    // --------------------------------------------------------------------------------------------

    /// Returns true if some thread is blocked.
    pub fn is_blocked(&self) -> bool {
        self.thread_ids().any(|t| self.is_thread_blocked(t))
    }

    /// Returns true if `thread`'s last label is a block label.
    pub fn is_thread_blocked(&self, thread: u32) -> bool {
        self.last_label(thread).is_some_and(|lab| lab.is_block())
    }

    /// Blocks the thread of `label`'s position, replacing the label currently at that position
    /// if one exists (a read removed in favor of a read-opt block).
    pub fn block_thread(&mut self, label: EventLabel) {
        debug_assert!(label.is_block());
        let pos = label.pos();
        if self.contains(pos) {
            debug_assert_eq!(pos.index + 1, self.thread_size(pos.thread));
            self.remove_last(pos.thread);
        }
        self.append(label);
    }

    /// Unblocks the thread blocked at `pos` by removing its block label.
    pub fn unblock_thread(&mut self, pos: Event) {
        debug_assert!(self.label(pos).is_block());
        debug_assert_eq!(pos.index + 1, self.thread_size(pos.thread));
        self.remove_last(pos.thread);
    }

    /// Returns the block label position of a thread blocked with the given cause, if any.
    pub fn blocked_with(&self, thread: u32, pred: impl Fn(&BlockType) -> bool) -> Option<Event> {
        let lab = self.last_label(thread)?;
        match lab.kind() {
            LabelKind::Block(b) if pred(b) => Some(lab.pos()),
            _ => None,
        }
    }

    // ALLOCATION TRACKING
    // --------------------------------------------------------------------------------------------

    /// Returns the malloc label whose allocation covers `addr`, if any.
    pub fn find_allocating(&self, addr: SAddr) -> Option<&EventLabel> {
        self.labels().find(|lab| match lab.kind() {
            LabelKind::Malloc(m) => m.covers(addr),
            _ => false,
        })
    }

    /// Returns the free/retire label for the allocation covering `addr`, if any.
    pub fn find_freeing(&self, addr: SAddr) -> Option<&EventLabel> {
        let base = self.find_allocating(addr).and_then(|lab| match lab.kind() {
            LabelKind::Malloc(m) => Some(m.addr),
            _ => None,
        });
        self.labels().find(|lab| match lab.kind() {
            LabelKind::Free(f) => Some(f.addr) == base || f.addr == addr,
            _ => false,
        })
    }

    /// Iterates over all live allocations as `(base, size)` pairs.
    pub fn allocations(&self) -> impl Iterator<Item = (SAddr, u64)> + '_ {
        self.labels().filter_map(|lab| match lab.kind() {
            LabelKind::Malloc(MallocLabel { addr, size, .. }) => Some((*addr, *size)),
            _ => None,
        })
    }

    // RESTRICTION & COPYING
    // --------------------------------------------------------------------------------------------

    /// Returns the view containing every event with stamp at most `s`.
    pub fn view_from_stamp(&self, s: Stamp) -> View {
        let mut view = View::new();
        for (t, labels) in self.threads.iter().enumerate() {
            // Stamps are monotone within each thread, so the kept prefix is contiguous.
            let cut = labels.partition_point(|lab| lab.stamp() <= s);
            view.set_cut(t as u32, cut as u32);
        }
        view
    }

    /// Removes every label with stamp greater than `s`, adjusting coherence and reader lists.
    ///
    /// Reads whose source was removed are left dangling; call
    /// [`Self::repair_dangling_reads`] once the caller is done mutating.
    pub fn cut_to_stamp(&mut self, s: Stamp) {
        for labels in self.threads.iter_mut() {
            let cut = labels.partition_point(|lab| lab.stamp() <= s);
            labels.truncate(cut);
        }
        while self.threads.len() > 1 && self.threads.last().is_some_and(|t| t.is_empty()) {
            self.threads.pop();
        }
        self.prune_external_links();
    }

    /// Produces a structural clone restricted to the events of `view`.
    ///
    /// Positions under the view's cut that the view excludes (dependency holes) are kept as
    /// [`LabelKind::Empty`] placeholders so thread indices stay contiguous.
    pub fn copy_up_to(&self, view: &ViewKind) -> Self {
        let mut threads = Vec::with_capacity(self.threads.len());
        for (t, labels) in self.threads.iter().enumerate() {
            let cut = (view.cut(t as u32) as usize).min(labels.len());
            let mut copied = Vec::with_capacity(cut);
            for (i, label) in labels.iter().take(cut).enumerate() {
                if view.contains(Event::new(t as u32, i as u32)) {
                    copied.push(label.clone());
                } else {
                    let mut empty =
                        EventLabel::new(label.pos(), MemOrdering::NotAtomic, LabelKind::Empty);
                    empty.set_stamp(label.stamp());
                    empty.set_revisitable(false);
                    copied.push(empty);
                }
            }
            threads.push(copied);
        }
        while threads.len() > 1 && threads.last().is_some_and(|t| t.is_empty()) {
            threads.pop();
        }

        let mut copy = Self {
            threads,
            coherence: self.coherence.clone(),
            init_readers: self.init_readers.clone(),
            next_stamp: self.next_stamp,
        };
        copy.prune_external_links();
        copy
    }

    /// Re-binds every dangling read (a thread-maximal read whose source was removed) to the
    /// coherence maximum of its address, returning the repaired positions so the caller can
    /// recompute their views.
    pub fn repair_dangling_reads(&mut self) -> Vec<Event> {
        let mut repaired = Vec::new();
        for t in self.thread_ids().collect::<Vec<_>>() {
            let Some(lab) = self.last_label(t) else { continue };
            let pos = lab.pos();
            let Some(read) = lab.read() else { continue };
            if read.rf.is_none() {
                let max = self.co_max(read.addr);
                self.set_rf(pos, Some(max));
                self.label_mut(pos).set_added_max(true);
                repaired.push(pos);
            }
        }
        repaired
    }

    /// Drops coherence entries, reader links and rf bindings that point outside the graph
    /// (used after truncation and restricted copying).
    fn prune_external_links(&mut self) {
        let real: Vec<Vec<bool>> = self
            .threads
            .iter()
            .map(|labels| {
                labels.iter().map(|lab| !matches!(lab.kind(), LabelKind::Empty)).collect()
            })
            .collect();
        let is_real = |e: Event| {
            real.get(e.thread as usize)
                .and_then(|t| t.get(e.index as usize))
                .copied()
                .unwrap_or(false)
        };

        for co in self.coherence.values_mut() {
            co.retain(|e| is_real(*e));
        }
        for readers in self.init_readers.values_mut() {
            readers.retain(|e| is_real(*e));
        }
        for label in self.threads.iter_mut().flatten() {
            if let Some(w) = label.write_mut() {
                w.readers.retain(|e| is_real(*e));
            }
            let dangling = label
                .read()
                .is_some_and(|r| r.rf.is_some_and(|rf| !rf.is_init() && !is_real(rf)));
            if dangling {
                label.read_mut().expect("checked above").rf = None;
                label.reset_views();
            }
        }
    }

    // RMW HELPERS
    // --------------------------------------------------------------------------------------------

    /// Returns true if the write `w` (an RMW write part) violates atomicity: some other
    /// completed RMW reads from the same source.
    pub fn violates_atomicity(&self, w: Event) -> bool {
        let Some(wlab) = self.label(w).write() else { return false };
        if !wlab.is_rmw() {
            return false;
        }
        let Some(read) = self.po_imm_pred(w).and_then(|lab| lab.read()) else { return false };
        let Some(rf) = read.rf else { return false };
        self.readers(read.addr, rf).iter().any(|r| {
            *r != w.prev()
                && self.label(*r).read().is_some_and(|other| other.is_rmw())
                && self.contains_real(r.next())
                && self.label(r.next()).write().is_some_and(|next| next.is_rmw())
        })
    }

}

impl Display for ExecutionGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (t, labels) in self.threads.iter().enumerate() {
            writeln!(f, "thread {t}:")?;
            for label in labels {
                writeln!(f, "  {} {}", label.stamp(), label)?;
            }
        }
        Ok(())
    }
}

// TESTS
// ================================================================================================

#[cfg(test)]
mod tests;

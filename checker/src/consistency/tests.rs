use alloc::vec::Vec;

use kestrel_core::{
    ASize, Event, EventLabel, ExecutionGraph, LabelKind, MemOrdering, ReadKind, ReadLabel, SAddr,
    SVal, ThreadCreate, ThreadInfo, ThreadStart, WriteKind, WriteLabel,
};
use pretty_assertions::assert_eq;

use super::ConsistencyChecker;
use crate::MemoryModel;

// A tiny graph builder that mimics the driver's commit discipline: append, link coherence at
// the maximal position (unless told otherwise), recompute views.
struct Builder {
    g: ExecutionGraph,
    ck: ConsistencyChecker,
}

impl Builder {
    fn new(model: MemoryModel) -> Self {
        let mut g = ExecutionGraph::new();
        let ck = ConsistencyChecker::new(model);
        ck.update_views(&mut g, Event::INIT);
        Self { g, ck }
    }

    fn spawn(&mut self) -> u32 {
        let pos = Event::new(0, self.g.thread_size(0));
        let child = self.g.add_new_thread();
        let info = ThreadInfo { id: child, parent: 0, fun_id: 0, arg: SVal::new(0) };
        self.g.append(EventLabel::new(
            pos,
            MemOrdering::Relaxed,
            LabelKind::ThreadCreate(ThreadCreate { info, child }),
        ));
        self.ck.update_views(&mut self.g, pos);

        let start = Event::new(child, 0);
        self.g.append(EventLabel::new(
            start,
            MemOrdering::Acquire,
            LabelKind::ThreadStart(ThreadStart {
                create: pos,
                info,
                symm_pred: None,
                symm_succ: None,
            }),
        ));
        self.ck.update_views(&mut self.g, start);
        child
    }

    fn write(&mut self, t: u32, addr: SAddr, val: u64, ord: MemOrdering) -> Event {
        let pos = Event::new(t, self.g.thread_size(t));
        self.g.append(EventLabel::new(
            pos,
            ord,
            LabelKind::Write(WriteLabel {
                addr,
                size: ASize::new(4),
                val: SVal::new(val),
                kind: WriteKind::Plain,
                readers: Default::default(),
                ww_racy: false,
                is_final: false,
                is_local: false,
            }),
        ));
        let pred = self.g.co_max(addr);
        self.g.co_insert_after(addr, pos, pred);
        self.ck.update_views(&mut self.g, pos);
        pos
    }

    /// Appends a write without placing it in coherence, as the driver sees it when asking for
    /// coherent placements.
    fn write_unplaced(&mut self, t: u32, addr: SAddr, val: u64, ord: MemOrdering) -> Event {
        let pos = Event::new(t, self.g.thread_size(t));
        self.g.append(EventLabel::new(
            pos,
            ord,
            LabelKind::Write(WriteLabel {
                addr,
                size: ASize::new(4),
                val: SVal::new(val),
                kind: WriteKind::Plain,
                readers: Default::default(),
                ww_racy: false,
                is_final: false,
                is_local: false,
            }),
        ));
        self.ck.update_views(&mut self.g, pos);
        pos
    }

    fn read_from(&mut self, t: u32, addr: SAddr, ord: MemOrdering, rf: Event) -> Event {
        let pos = Event::new(t, self.g.thread_size(t));
        self.g.append(EventLabel::new(
            pos,
            ord,
            LabelKind::Read(ReadLabel {
                addr,
                size: ASize::new(4),
                kind: ReadKind::Plain,
                rf: Some(rf),
                annot: None,
            }),
        ));
        self.ck.update_views(&mut self.g, pos);
        pos
    }

    fn fence(&mut self, t: u32, ord: MemOrdering) -> Event {
        let pos = Event::new(t, self.g.thread_size(t));
        self.g.append(EventLabel::new(pos, ord, LabelKind::Fence));
        self.ck.update_views(&mut self.g, pos);
        pos
    }
}

fn x() -> SAddr {
    SAddr::new_static(0, 0)
}

fn y() -> SAddr {
    SAddr::new_static(0, 8)
}

// MESSAGE PASSING
// ------------------------------------------------------------------------------------------------

/// Builds the MP graph up to (but not including) the second read of t2:
/// t1: x = 1; y = 1    t2: r1 = y (reads wy).
fn mp_prefix(model: MemoryModel, ord: MemOrdering) -> (Builder, u32) {
    let mut b = Builder::new(model);
    let t1 = b.spawn();
    let t2 = b.spawn();
    let _wx = b.write(t1, x(), 1, ord);
    let wy = b.write(t1, y(), 1, ord);
    b.read_from(t2, y(), ord, wy);
    (b, t2)
}

#[test]
fn ra_reads_synchronize_and_prune_stale_sources() {
    let (mut b, t2) = mp_prefix(MemoryModel::Ra, MemOrdering::Relaxed);

    // Commit the second read tentatively; under RA the first read acquired t1's prefix, so
    // only x = 1 remains coherent.
    let wx = b.g.co_max(x());
    let r2 = b.read_from(t2, x(), MemOrdering::Relaxed, wx);
    let rfs = b.ck.coherent_rfs(&b.g, r2);
    assert_eq!(rfs, Vec::from([wx]));
}

#[test]
fn rc11_relaxed_reads_do_not_synchronize() {
    let (mut b, t2) = mp_prefix(MemoryModel::Rc11, MemOrdering::Relaxed);

    let wx = b.g.co_max(x());
    let r2 = b.read_from(t2, x(), MemOrdering::Relaxed, wx);
    let rfs = b.ck.coherent_rfs(&b.g, r2);
    assert_eq!(rfs, Vec::from([Event::INIT, wx]));
}

#[test]
fn rc11_acquire_release_synchronizes() {
    let (mut b, t2) = mp_prefix(MemoryModel::Rc11, MemOrdering::AcqRel);

    let wx = b.g.co_max(x());
    let r2 = b.read_from(t2, x(), MemOrdering::Acquire, wx);
    let rfs = b.ck.coherent_rfs(&b.g, r2);
    assert_eq!(rfs, Vec::from([wx]));
}

#[test]
fn rc11_release_fence_makes_relaxed_writes_release() {
    let mut b = Builder::new(MemoryModel::Rc11);
    let t1 = b.spawn();
    let t2 = b.spawn();

    let _wx = b.write(t1, x(), 1, MemOrdering::Relaxed);
    b.fence(t1, MemOrdering::Release);
    let wy = b.write(t1, y(), 1, MemOrdering::Relaxed);

    // An acquire read of wy picks up everything before the release fence.
    b.read_from(t2, y(), MemOrdering::Acquire, wy);
    let wx = b.g.co_max(x());
    let r2 = b.read_from(t2, x(), MemOrdering::Relaxed, wx);
    let rfs = b.ck.coherent_rfs(&b.g, r2);
    assert_eq!(rfs, Vec::from([wx]));
}

// CONSISTENCY
// ------------------------------------------------------------------------------------------------

/// Builds the full store-buffering graph with both reads observing the initial values.
fn sb_graph(model: MemoryModel, ord: MemOrdering) -> Builder {
    let mut b = Builder::new(model);
    let t1 = b.spawn();
    let t2 = b.spawn();
    b.write(t1, x(), 1, ord);
    b.read_from(t1, y(), ord, Event::INIT);
    b.write(t2, y(), 1, ord);
    b.read_from(t2, x(), ord, Event::INIT);
    b
}

#[test]
fn store_buffering_is_forbidden_under_sc() {
    let b = sb_graph(MemoryModel::Sc, MemOrdering::SeqCst);
    assert!(!b.ck.is_consistent(&b.g));
}

#[test]
fn store_buffering_is_allowed_under_ra() {
    let b = sb_graph(MemoryModel::Ra, MemOrdering::SeqCst);
    assert!(b.ck.is_consistent(&b.g));
}

#[test]
fn store_buffering_with_sc_accesses_is_forbidden_under_rc11() {
    let b = sb_graph(MemoryModel::Rc11, MemOrdering::SeqCst);
    assert!(!b.ck.is_consistent(&b.g));
}

#[test]
fn store_buffering_with_relaxed_accesses_is_allowed_under_rc11() {
    let b = sb_graph(MemoryModel::Rc11, MemOrdering::Relaxed);
    assert!(b.ck.is_consistent(&b.g));
}

#[test]
fn store_buffering_with_sc_fences_is_forbidden_under_rc11() {
    let mut b = Builder::new(MemoryModel::Rc11);
    let t1 = b.spawn();
    let t2 = b.spawn();
    b.write(t1, x(), 1, MemOrdering::Relaxed);
    b.fence(t1, MemOrdering::SeqCst);
    b.read_from(t1, y(), MemOrdering::Relaxed, Event::INIT);
    b.write(t2, y(), 1, MemOrdering::Relaxed);
    b.fence(t2, MemOrdering::SeqCst);
    b.read_from(t2, x(), MemOrdering::Relaxed, Event::INIT);
    assert!(!b.ck.is_consistent(&b.g));
}

#[test]
fn coherence_rejects_reading_an_overwritten_value_through_hb() {
    // t1: x = 1; x = 2   t2: r = x (acquire, reads 2); r' = x must not read 1.
    let mut b = Builder::new(MemoryModel::Rc11);
    let t1 = b.spawn();
    let t2 = b.spawn();
    let w1 = b.write(t1, x(), 1, MemOrdering::Release);
    let w2 = b.write(t1, x(), 2, MemOrdering::Release);
    b.read_from(t2, x(), MemOrdering::Acquire, w2);
    b.read_from(t2, x(), MemOrdering::Relaxed, w1);
    assert!(!b.ck.is_consistent(&b.g));
}

#[test]
fn load_buffering_with_dependencies_is_forbidden_under_imm() {
    // t1: r1 = x; y = r1   t2: r2 = y; x = r2 — both RMW-style data dependencies.
    let mut b = Builder::new(MemoryModel::Imm);
    let t1 = b.spawn();
    let t2 = b.spawn();

    let r1 = b.read_from(t1, x(), MemOrdering::Relaxed, Event::INIT);
    let wy_pos = Event::new(t1, b.g.thread_size(t1));
    let mut wy = EventLabel::new(
        wy_pos,
        MemOrdering::Relaxed,
        LabelKind::Write(WriteLabel {
            addr: y(),
            size: ASize::new(4),
            val: SVal::new(1),
            kind: WriteKind::Plain,
            readers: Default::default(),
            ww_racy: false,
            is_final: false,
            is_local: false,
        }),
    );
    wy = wy.with_deps(kestrel_core::EventDeps {
        addr: Vec::new(),
        data: Vec::from([r1]),
        ctrl: Vec::new(),
    });
    b.g.append(wy);
    b.g.co_insert_after(y(), wy_pos, Event::INIT);
    b.ck.update_views(&mut b.g, wy_pos);

    let r2 = b.read_from(t2, y(), MemOrdering::Relaxed, wy_pos);
    let wx_pos = Event::new(t2, b.g.thread_size(t2));
    let mut wx = EventLabel::new(
        wx_pos,
        MemOrdering::Relaxed,
        LabelKind::Write(WriteLabel {
            addr: x(),
            size: ASize::new(4),
            val: SVal::new(1),
            kind: WriteKind::Plain,
            readers: Default::default(),
            ww_racy: false,
            is_final: false,
            is_local: false,
        }),
    );
    wx = wx.with_deps(kestrel_core::EventDeps {
        addr: Vec::new(),
        data: Vec::from([r2]),
        ctrl: Vec::new(),
    });
    b.g.append(wx);
    b.g.co_insert_after(x(), wx_pos, Event::INIT);
    b.ck.update_views(&mut b.g, wx_pos);

    // Close the cycle: r1 reads from t2's write.
    b.g.set_rf(r1, Some(wx_pos));
    b.ck.update_views(&mut b.g, r1);

    assert!(!b.ck.is_consistent(&b.g));
}

// PLACEMENTS
// ------------------------------------------------------------------------------------------------

#[test]
fn unordered_writes_get_every_placement() {
    let mut b = Builder::new(MemoryModel::Rc11);
    let t1 = b.spawn();
    let t2 = b.spawn();
    let w1 = b.write(t1, x(), 1, MemOrdering::Relaxed);
    let w2 = b.write_unplaced(t2, x(), 2, MemOrdering::Relaxed);
    let placements = b.ck.coherent_placements(&b.g, w2);
    assert_eq!(placements, Vec::from([Event::INIT, w1]));
}

#[test]
fn hb_ordered_writes_get_one_placement() {
    let mut b = Builder::new(MemoryModel::Ra);
    let t1 = b.spawn();
    let w1 = b.write(t1, x(), 1, MemOrdering::Relaxed);
    let w2 = b.write_unplaced(t1, x(), 2, MemOrdering::Relaxed);
    let placements = b.ck.coherent_placements(&b.g, w2);
    assert_eq!(placements, Vec::from([w1]));
}

// RACES
// ------------------------------------------------------------------------------------------------

#[test]
fn concurrent_non_atomic_accesses_race() {
    let mut b = Builder::new(MemoryModel::Rc11);
    let t1 = b.spawn();
    let t2 = b.spawn();
    let w = b.write(t1, x(), 1, MemOrdering::NotAtomic);
    let r = b.read_from(t2, x(), MemOrdering::NotAtomic, w);
    assert_eq!(b.ck.find_race(&b.g, r), Some(w));
}

#[test]
fn synchronized_accesses_do_not_race() {
    let mut b = Builder::new(MemoryModel::Rc11);
    let t1 = b.spawn();
    let t2 = b.spawn();
    let wd = b.write(t1, x(), 1, MemOrdering::NotAtomic);
    let wf = b.write(t1, y(), 1, MemOrdering::Release);
    b.read_from(t2, y(), MemOrdering::Acquire, wf);
    let r = b.read_from(t2, x(), MemOrdering::NotAtomic, wd);
    assert_eq!(b.ck.find_race(&b.g, r), None);
}

#[test]
fn atomic_accesses_never_race() {
    let mut b = Builder::new(MemoryModel::Rc11);
    let t1 = b.spawn();
    let t2 = b.spawn();
    let w = b.write(t1, x(), 1, MemOrdering::Relaxed);
    let r = b.read_from(t2, x(), MemOrdering::Relaxed, w);
    assert_eq!(b.ck.find_race(&b.g, r), None);
}

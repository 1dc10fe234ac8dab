use pretty_assertions::assert_eq;

use super::*;
use crate::{
    label::{ReadKind, ReadLabel, WriteLabel},
    value::ASize,
};

fn addr(off: u64) -> SAddr {
    SAddr::new_static(0, off)
}

fn read_label(pos: Event, a: SAddr, rf: Option<Event>) -> EventLabel {
    EventLabel::new(
        pos,
        MemOrdering::SeqCst,
        LabelKind::Read(ReadLabel {
            addr: a,
            size: ASize::new(4),
            kind: ReadKind::Plain,
            rf,
            annot: None,
        }),
    )
}

fn write_label(pos: Event, a: SAddr, val: u64) -> EventLabel {
    EventLabel::new(
        pos,
        MemOrdering::SeqCst,
        LabelKind::Write(WriteLabel {
            addr: a,
            size: ASize::new(4),
            val: SVal::new(val),
            kind: crate::label::WriteKind::Plain,
            readers: Default::default(),
            ww_racy: false,
            is_final: false,
            is_local: false,
        }),
    )
}

fn start_label(thread: u32, create: Event) -> EventLabel {
    EventLabel::new(
        Event::new(thread, 0),
        MemOrdering::Acquire,
        LabelKind::ThreadStart(crate::label::ThreadStart {
            create,
            info: Default::default(),
            symm_pred: None,
            symm_succ: None,
        }),
    )
}

/// Builds a two-thread graph: t1 writes x twice, t0 reads x from the second write.
fn sample_graph() -> (ExecutionGraph, SAddr) {
    let x = addr(0);
    let mut g = ExecutionGraph::new();

    let t1 = g.add_new_thread();
    g.append(start_label(t1, Event::INIT));

    let w1 = g.append(write_label(Event::new(t1, 1), x, 1));
    g.co_insert_after(x, w1, Event::INIT);
    let w2 = g.append(write_label(Event::new(t1, 2), x, 2));
    g.co_insert_after(x, w2, w1);

    g.append(read_label(Event::new(0, 1), x, Some(w2)));
    (g, x)
}

#[test]
fn new_graph_contains_only_init() {
    let g = ExecutionGraph::new();
    assert_eq!(g.num_threads(), 1);
    assert_eq!(g.thread_size(0), 1);
    assert!(matches!(g.label(Event::INIT).kind(), LabelKind::Init));
    g.validate();
}

#[test]
fn append_assigns_monotone_stamps() {
    let (g, _) = sample_graph();
    let mut prev = None;
    for lab in g.labels_by_stamp() {
        if let Some(prev) = prev {
            assert!(prev < lab.stamp());
        }
        prev = Some(lab.stamp());
    }
    g.validate();
}

#[test]
fn co_insert_and_move_keep_order() {
    let (mut g, x) = sample_graph();
    let [w1, w2] = g.co(x) else { panic!("expected two writes") };
    let (w1, w2) = (*w1, *w2);
    assert_eq!(g.co_max(x), w2);

    g.co_move_after(x, w2, Event::INIT);
    assert_eq!(g.co(x), &[w2, w1]);
    assert_eq!(g.co_imm_succ(x, w2), Some(w1));
    assert_eq!(g.co_succs(x, w1), &[]);
}

#[test]
fn set_rf_maintains_reader_lists() {
    let (mut g, x) = sample_graph();
    let r = Event::new(0, 1);
    let [w1, w2] = [g.co(x)[0], g.co(x)[1]];

    assert_eq!(g.readers(x, w2), &[r]);
    g.set_rf(r, Some(w1));
    assert_eq!(g.readers(x, w2), &[]);
    assert_eq!(g.readers(x, w1), &[r]);

    g.set_rf(r, Some(Event::INIT));
    assert_eq!(g.readers(x, w1), &[]);
    assert_eq!(g.readers(x, Event::INIT), &[r]);
    g.validate();
}

#[test]
fn cut_to_stamp_drops_suffix_and_leaves_read_dangling() {
    let (mut g, x) = sample_graph();
    let w1 = g.co(x)[0];
    let cut_at = g.label(w1).stamp();

    g.cut_to_stamp(cut_at);

    // Thread 0 lost its read (larger stamp), t1 lost w2.
    assert_eq!(g.thread_size(0), 1);
    assert_eq!(g.thread_size(1), 2);
    assert_eq!(g.co(x), &[w1]);
    g.validate();
}

#[test]
fn cut_to_stamp_repairs_dangling_reads_to_co_max() {
    // A read bound to a write committed after it, as a backward revisit leaves things.
    let x = addr(0);
    let mut g = ExecutionGraph::new();
    let r = g.append(read_label(Event::new(0, 1), x, Some(Event::INIT)));
    let t1 = g.add_new_thread();
    g.append(start_label(t1, Event::INIT));
    let w1 = g.append(write_label(Event::new(t1, 1), x, 1));
    g.co_insert_after(x, w1, Event::INIT);
    g.set_rf(r, Some(w1));

    // Cutting at the read's stamp removes w1 and leaves the read dangling.
    g.cut_to_stamp(g.label(r).stamp());
    assert_eq!(g.label(r).read().expect("read").rf, None);

    g.repair_dangling_reads();
    assert_eq!(g.label(r).read().expect("read").rf, Some(Event::INIT));
    assert!(g.label(r).was_added_max());
    g.validate();
}

#[test]
fn copy_up_to_restricts_to_the_view() {
    let (g, x) = sample_graph();
    let w1 = g.co(x)[0];

    // View: everything in t1 up to w1, nothing from t0 beyond init.
    let mut v = View::new();
    v.include(Event::INIT);
    v.include(w1);
    let copy = g.copy_up_to(&ViewKind::Plain(v));

    assert_eq!(copy.thread_size(0), 1);
    assert_eq!(copy.thread_size(1), 2);
    assert_eq!(copy.co(x), &[w1]);
    assert_eq!(copy.readers(x, w1), &[]);
    assert_eq!(copy.next_stamp(), g.next_stamp());
    copy.validate();
}

#[test]
fn copy_preserves_stamps_of_kept_labels() {
    let (g, x) = sample_graph();
    let w1 = g.co(x)[0];
    let mut v = View::new();
    v.include(Event::INIT);
    v.include(w1);

    let copy = g.copy_up_to(&ViewKind::Plain(v));
    assert_eq!(copy.label(w1).stamp(), g.label(w1).stamp());
}

#[test]
fn view_from_stamp_is_a_commit_order_prefix() {
    let (g, x) = sample_graph();
    let w2 = g.co(x)[1];
    let v = g.view_from_stamp(g.label(w2).stamp());

    assert!(v.contains(Event::INIT));
    assert!(v.contains(w2));
    assert!(!v.contains(Event::new(0, 1)), "the read was committed after w2");
}

#[test]
fn block_and_unblock_round_trip() {
    let (mut g, _) = sample_graph();
    let pos = Event::new(1, 3);
    g.block_thread(EventLabel::new(
        pos,
        MemOrdering::NotAtomic,
        LabelKind::Block(BlockType::Join(0)),
    ));
    assert!(g.is_thread_blocked(1));
    assert!(g.is_blocked());

    g.unblock_thread(pos);
    assert!(!g.is_blocked());
    g.validate();
}

#[test]
fn violates_atomicity_detects_duplicated_rmw_sources() {
    let x = addr(0);
    let mut g = ExecutionGraph::new();
    let t1 = g.add_new_thread();
    g.append(start_label(t1, Event::INIT));
    let t2 = g.add_new_thread();
    g.append(start_label(t2, Event::INIT));

    let fai = |pos| {
        EventLabel::new(
            pos,
            MemOrdering::SeqCst,
            LabelKind::Read(ReadLabel {
                addr: x,
                size: ASize::new(4),
                kind: ReadKind::Fai(crate::label::FaiInfo {
                    op: crate::value::RmwBinOp::Add,
                    operand: SVal::new(1),
                }),
                rf: Some(Event::INIT),
                annot: None,
            }),
        )
    };
    let fai_write = |pos: Event| {
        let mut w = write_label(pos, x, 1);
        w.write_mut().expect("write").kind = crate::label::WriteKind::Fai;
        w
    };

    g.append(fai(Event::new(t1, 1)));
    let w1 = g.append(fai_write(Event::new(t1, 2)));
    g.co_insert_after(x, w1, Event::INIT);
    assert!(!g.violates_atomicity(w1));

    g.append(fai(Event::new(t2, 1)));
    let w2 = g.append(fai_write(Event::new(t2, 2)));
    g.co_insert_after(x, w2, Event::INIT);
    assert!(g.violates_atomicity(w2));
    assert!(g.violates_atomicity(w1));
}

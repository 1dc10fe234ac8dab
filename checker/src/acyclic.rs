//! Acyclicity checks backing the per-model consistency queries.
//!
//! All three checks materialize the relevant relation over the (small) graphs the driver
//! explores and run a depth-first cycle search. They are called on revisit validation and at
//! execution end, not on every commit, so clarity wins over incrementality here.

use alloc::{collections::BTreeMap, vec, vec::Vec};

use itertools::Itertools;
use kestrel_core::{Event, ExecutionGraph, LabelKind};

use crate::consistency::co_rank;

// RELATION GRAPH
// ================================================================================================

/// A finite relation over events, with cycle detection.
struct Relation {
    index: BTreeMap<Event, usize>,
    nodes: Vec<Event>,
    succs: Vec<Vec<usize>>,
}

impl Relation {
    fn new(nodes: Vec<Event>) -> Self {
        let index = nodes.iter().copied().enumerate().map(|(i, e)| (e, i)).collect();
        let succs = nodes.iter().map(|_| Vec::new()).collect();
        Self { index, nodes, succs }
    }

    fn add_edge(&mut self, from: Event, to: Event) {
        let (Some(&f), Some(&t)) = (self.index.get(&from), self.index.get(&to)) else {
            return;
        };
        if f != t {
            self.succs[f].push(t);
        }
    }

    /// Returns true if the relation contains no cycle (iterative three-color DFS).
    fn is_acyclic(&self) -> bool {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }
        let mut color = vec![Color::White; self.nodes.len()];
        let mut stack: Vec<(usize, usize)> = Vec::new();

        for start in 0..self.nodes.len() {
            if color[start] != Color::White {
                continue;
            }
            color[start] = Color::Gray;
            stack.push((start, 0));
            while let Some((node, edge)) = stack.pop() {
                if edge < self.succs[node].len() {
                    stack.push((node, edge + 1));
                    let next = self.succs[node][edge];
                    match color[next] {
                        Color::Gray => return false,
                        Color::White => {
                            color[next] = Color::Gray;
                            stack.push((next, 0));
                        },
                        Color::Black => {},
                    }
                } else {
                    color[node] = Color::Black;
                }
            }
        }
        true
    }
}

/// Collects every real (non-placeholder) event of the graph.
fn real_events(g: &ExecutionGraph) -> Vec<Event> {
    g.labels()
        .filter(|lab| !matches!(lab.kind(), LabelKind::Empty))
        .map(|lab| lab.pos())
        .collect()
}

/// Adds the po / rf / co / fr skeleton shared by the SC check.
fn add_execution_order_edges(g: &ExecutionGraph, rel: &mut Relation) {
    for lab in g.labels() {
        let pos = lab.pos();
        if pos.index > 0 {
            rel.add_edge(pos.prev(), pos);
        }
        match lab.kind() {
            LabelKind::ThreadStart(ts) => rel.add_edge(ts.create, pos),
            LabelKind::ThreadJoin(tj) => {
                if let Some(fin) = g.last_label(tj.child) {
                    rel.add_edge(fin.pos(), pos);
                }
            },
            LabelKind::Read(r) => {
                if let Some(rf) = r.rf {
                    rel.add_edge(rf, pos);
                    // fr: the read precedes whatever overwrites its source.
                    if let Some(succ) = g.co_imm_succ(r.addr, rf) {
                        rel.add_edge(pos, succ);
                    } else if rf.is_init()
                        && let Some(first) = g.co(r.addr).first()
                    {
                        rel.add_edge(pos, *first);
                    }
                }
            },
            LabelKind::Write(w) => {
                if let Some(succ) = g.co_imm_succ(w.addr, pos) {
                    rel.add_edge(pos, succ);
                }
            },
            _ => {},
        }
    }
}

// SC
// ================================================================================================

/// SC consistency: po ∪ rf ∪ co ∪ fr has a linearization iff it is acyclic.
pub(crate) fn sc_acyclic(g: &ExecutionGraph) -> bool {
    let mut rel = Relation::new(real_events(g));
    add_execution_order_edges(g, &mut rel);
    rel.is_acyclic()
}

// RC11 PSC
// ================================================================================================

/// RC11's partial-SC axiom over SeqCst events: acyclicity of
/// `sb ∪ sb;hb;sb ∪ hb|loc ∪ co ∪ fr ∪ rf` restricted to SC events, plus the fence rule
/// `[F]; hb; eco; hb; [F]`.
pub(crate) fn psc_acyclic(g: &ExecutionGraph) -> bool {
    let sc_events: Vec<Event> = g
        .labels()
        .filter(|lab| {
            lab.ordering().is_sc() && (lab.is_mem_access() || matches!(lab.kind(), LabelKind::Fence))
        })
        .map(|lab| lab.pos())
        .collect();
    if sc_events.len() < 2 {
        return true;
    }

    let mut rel = Relation::new(sc_events.clone());
    for (&x, &y) in sc_events.iter().cartesian_product(sc_events.iter()) {
        if x == y {
            continue;
        }
        if scb_edge(g, x, y) {
            rel.add_edge(x, y);
        }
    }
    rel.is_acyclic()
}

/// Returns true if RC11's `scb` (or the fence eco rule) orders `x` before `y`.
fn scb_edge(g: &ExecutionGraph, x: Event, y: Event) -> bool {
    // sb
    if x.thread == y.thread {
        return x.index < y.index;
    }

    // sb; hb; sb — some strict po-predecessor of y happens after a strict po-successor of x.
    for j in 0..y.index {
        let b = g.label(Event::new(y.thread, j));
        if b.hb_view().cut(x.thread) >= x.index + 2 {
            return true;
        }
    }

    let xlab = g.label(x);
    let ylab = g.label(y);

    // hb|loc, co, fr, rf between same-location SC accesses.
    if let (Some((xaddr, _)), Some((yaddr, _))) = (xlab.access(), ylab.access())
        && xaddr == yaddr
    {
        if ylab.hb_view().contains(x) {
            return true;
        }
        if eco_step(g, x, y) {
            return true;
        }
    }

    // [F]; hb; eco; hb; [F]
    if matches!(xlab.kind(), LabelKind::Fence) && matches!(ylab.kind(), LabelKind::Fence) {
        for u in g.labels().filter(|lab| lab.is_mem_access()) {
            if !u.hb_view().contains(x) {
                continue;
            }
            let (uaddr, _) = u.access().expect("filtered to accesses");
            for v in g.same_loc_labels(uaddr) {
                if ylab.hb_view().contains(v.pos())
                    && (u.pos() == v.pos() || eco_step(g, u.pos(), v.pos()))
                {
                    return true;
                }
            }
        }
    }
    false
}

/// Returns true if `eco` (extended coherence: `(co ∪ rf ∪ fr)+` per location) orders `u`
/// before `v`. Both must access the same location.
fn eco_step(g: &ExecutionGraph, u: Event, v: Event) -> bool {
    let ulab = g.label(u);
    let vlab = g.label(v);
    let (addr, _) = ulab.access().expect("eco over non-access");

    let rank_of_write = |e: Event| g.co_index(addr, e).map(|i| i + 1);
    match (ulab.read(), vlab.read()) {
        // W -> W: co
        (None, None) => {
            let (Some(ur), Some(vr)) = (rank_of_write(u), rank_of_write(v)) else { return false };
            ur < vr
        },
        // W -> R: rf or co;rf
        (None, Some(vread)) => {
            let Some(vrf) = vread.rf else { return false };
            let Some(ur) = rank_of_write(u) else { return false };
            co_rank(g, addr, vrf) >= ur
        },
        // R -> W: fr
        (Some(uread), None) => {
            let Some(urf) = uread.rf else { return false };
            let Some(vr) = rank_of_write(v) else { return false };
            co_rank(g, addr, urf) < vr
        },
        // R -> R: fr;rf
        (Some(uread), Some(vread)) => {
            let (Some(urf), Some(vrf)) = (uread.rf, vread.rf) else { return false };
            co_rank(g, addr, urf) < co_rank(g, addr, vrf)
        },
    }
}

// IMM
// ================================================================================================

/// The dependency-ordered acyclicity approximation of IMM's `ar` axiom: syntactic
/// dependencies, barrier-ordered program order (bob), RMW pairs and external reads-from must
/// not form a cycle.
pub(crate) fn imm_ar_acyclic(g: &ExecutionGraph) -> bool {
    let mut rel = Relation::new(real_events(g));

    for lab in g.labels() {
        let pos = lab.pos();
        for dep in lab.deps().iter() {
            rel.add_edge(dep, pos);
        }
        match lab.kind() {
            LabelKind::ThreadStart(ts) => rel.add_edge(ts.create, pos),
            LabelKind::ThreadJoin(tj) => {
                if let Some(fin) = g.last_label(tj.child) {
                    rel.add_edge(fin.pos(), pos);
                }
            },
            LabelKind::Read(r) => {
                if let Some(rf) = r.rf
                    && rf.thread != pos.thread
                {
                    rel.add_edge(rf, pos);
                }
            },
            LabelKind::Write(w) if w.is_rmw() => rel.add_edge(pos.prev(), pos),
            _ => {},
        }
    }

    // bob: fences order both ways, acquire reads order later events, release writes earlier.
    for t in g.thread_ids() {
        let thread: Vec<_> = g.po(t).collect();
        for (i, early) in thread.iter().enumerate() {
            for late in thread.iter().skip(i + 1) {
                let ordered = matches!(early.kind(), LabelKind::Fence)
                    || matches!(late.kind(), LabelKind::Fence)
                    || (early.read().is_some() && early.ordering().is_at_least_acquire())
                    || (late.write().is_some() && late.ordering().is_at_least_release());
                if ordered {
                    rel.add_edge(early.pos(), late.pos());
                }
            }
        }
    }
    rel.is_acyclic()
}

use alloc::{collections::BTreeSet, vec::Vec};
use core::fmt::{self, Display};

use crate::event::Event;

// PLAIN VIEW
// ================================================================================================

/// A per-thread index cut: for each thread, the number of leading events included.
///
/// Views summarize downward-closed (under program order) event sets, and are the vector-clock
/// currency of the checker: prefix views, happens-before views and restriction views are all
/// instances. A view `contains` an event when the event's index lies under the thread's cut.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct View {
    cuts: Vec<u32>,
}

impl View {
    /// Returns an empty view.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if this view contains the given event.
    pub fn contains(&self, e: Event) -> bool {
        self.cuts.get(e.thread as usize).is_some_and(|&cut| e.index < cut)
    }

    /// Returns the number of events of `thread` included in this view.
    pub fn cut(&self, thread: u32) -> u32 {
        self.cuts.get(thread as usize).copied().unwrap_or(0)
    }

    /// Returns the number of threads this view has an opinion about.
    pub fn num_threads(&self) -> u32 {
        self.cuts.len() as u32
    }

    /// Extends the cut of `e.thread` so that `e` (and its po-prefix) is included.
    pub fn include(&mut self, e: Event) {
        let t = e.thread as usize;
        if self.cuts.len() <= t {
            self.cuts.resize(t + 1, 0);
        }
        if self.cuts[t] < e.index + 1 {
            self.cuts[t] = e.index + 1;
        }
    }

    /// Sets the cut of `thread` to exactly `cut` events.
    pub fn set_cut(&mut self, thread: u32, cut: u32) {
        let t = thread as usize;
        if self.cuts.len() <= t {
            self.cuts.resize(t + 1, 0);
        }
        self.cuts[t] = cut;
    }

    /// Merges `other` into this view (pointwise maximum).
    pub fn update(&mut self, other: &View) {
        if self.cuts.len() < other.cuts.len() {
            self.cuts.resize(other.cuts.len(), 0);
        }
        for (mine, theirs) in self.cuts.iter_mut().zip(other.cuts.iter()) {
            if *mine < *theirs {
                *mine = *theirs;
            }
        }
    }

    /// Returns true if this view contains every event `other` contains.
    pub fn dominates(&self, other: &View) -> bool {
        (0..other.cuts.len()).all(|t| self.cut(t as u32) >= other.cuts[t])
    }
}

impl Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (t, cut) in self.cuts.iter().enumerate() {
            if t > 0 {
                write!(f, " ")?;
            }
            write!(f, "{t}:{cut}")?;
        }
        write!(f, "]")
    }
}

// DEPENDENCY VIEW
// ================================================================================================

/// A view refined with per-thread "holes" for dependency-tracking memory models.
///
/// Under IMM an event's prefix is not po-downward-closed: po-predecessors that the event does
/// not depend on are excluded. A `DepView` represents such sets as an upper cut plus the set of
/// excluded positions underneath it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DepView {
    cut: View,
    holes: Vec<BTreeSet<u32>>,
}

impl DepView {
    /// Returns an empty dependency view.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if this view contains the given event.
    pub fn contains(&self, e: Event) -> bool {
        self.cut.contains(e)
            && !self
                .holes
                .get(e.thread as usize)
                .is_some_and(|holes| holes.contains(&e.index))
    }

    /// Returns the underlying index cut (ignoring holes).
    pub fn cut(&self) -> &View {
        &self.cut
    }

    /// Includes `e` itself, removing any hole at its position.
    pub fn include(&mut self, e: Event) {
        self.cut.include(e);
        if let Some(holes) = self.holes.get_mut(e.thread as usize) {
            holes.remove(&e.index);
        }
    }

    /// Includes `e` alone: the cut is raised to cover it, and every newly covered position
    /// underneath becomes a hole.
    pub fn include_isolated(&mut self, e: Event) {
        let old_cut = self.cut.cut(e.thread);
        for i in old_cut..e.index {
            self.add_hole(Event::new(e.thread, i));
        }
        self.include(e);
    }

    /// Punches a hole at `e`, keeping the cut unchanged.
    pub fn add_hole(&mut self, e: Event) {
        let t = e.thread as usize;
        if self.holes.len() <= t {
            self.holes.resize_with(t + 1, BTreeSet::new);
        }
        self.holes[t].insert(e.index);
    }

    /// Removes the hole at `e`, if any.
    pub fn remove_hole(&mut self, e: Event) {
        if let Some(holes) = self.holes.get_mut(e.thread as usize) {
            holes.remove(&e.index);
        }
    }

    /// Merges `other` into this view.
    ///
    /// The union contains an event iff either side contains it, so a position stays a hole only
    /// when it is excluded from (or above the cut of) both sides.
    pub fn update(&mut self, other: &DepView) {
        let threads = self.cut.num_threads().max(other.cut.num_threads());
        for t in 0..threads {
            let my_cut = self.cut.cut(t);
            let their_cut = other.cut.cut(t);
            let new_cut = my_cut.max(their_cut);

            let mut merged = BTreeSet::new();
            for i in 0..new_cut {
                let e = Event::new(t, i);
                let in_self = i < my_cut && self.contains(e);
                let in_other = i < their_cut && other.contains(e);
                if !in_self && !in_other {
                    merged.insert(i);
                }
            }
            if self.holes.len() <= t as usize {
                self.holes.resize_with(t as usize + 1, BTreeSet::new);
            }
            self.holes[t as usize] = merged;
            self.cut.set_cut(t, new_cut);
        }
    }
}

// VIEW KIND
// ================================================================================================

/// A prefix view of either kind.
///
/// Plain models summarize prefixes with [`View`]s; dependency-tracking models use [`DepView`]s.
/// Algorithms that are generic over the view kind accept this wrapper.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ViewKind {
    Plain(View),
    Dep(DepView),
}

impl ViewKind {
    /// Returns true if this view contains the given event.
    pub fn contains(&self, e: Event) -> bool {
        match self {
            ViewKind::Plain(v) => v.contains(e),
            ViewKind::Dep(v) => v.contains(e),
        }
    }

    /// Returns the index cut of `thread` (holes ignored).
    pub fn cut(&self, thread: u32) -> u32 {
        match self {
            ViewKind::Plain(v) => v.cut(thread),
            ViewKind::Dep(v) => v.cut().cut(thread),
        }
    }

    /// Includes `e` in this view.
    pub fn include(&mut self, e: Event) {
        match self {
            ViewKind::Plain(v) => v.include(e),
            ViewKind::Dep(v) => v.include(e),
        }
    }

    /// Merges `other` into this view. Both sides must be of the same kind.
    pub fn update(&mut self, other: &ViewKind) {
        match (self, other) {
            (ViewKind::Plain(a), ViewKind::Plain(b)) => a.update(b),
            (ViewKind::Dep(a), ViewKind::Dep(b)) => a.update(b),
            _ => unreachable!("mismatched view kinds"),
        }
    }

    /// Returns the plain view, panicking on a dependency view.
    pub fn as_plain(&self) -> &View {
        match self {
            ViewKind::Plain(v) => v,
            ViewKind::Dep(_) => unreachable!("expected a plain view"),
        }
    }

    /// Returns the dependency view, if this is one.
    pub fn as_dep(&self) -> Option<&DepView> {
        match self {
            ViewKind::Plain(_) => None,
            ViewKind::Dep(v) => Some(v),
        }
    }

    /// Returns the dependency view, panicking on a plain view.
    pub fn as_dep_mut(&mut self) -> &mut DepView {
        match self {
            ViewKind::Plain(_) => unreachable!("expected a dependency view"),
            ViewKind::Dep(v) => v,
        }
    }
}

// TESTS
// ================================================================================================

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn include_is_po_downward_closed() {
        let mut v = View::new();
        v.include(Event::new(1, 3));
        assert!(v.contains(Event::new(1, 0)));
        assert!(v.contains(Event::new(1, 3)));
        assert!(!v.contains(Event::new(1, 4)));
        assert!(!v.contains(Event::new(0, 0)));
    }

    #[test]
    fn dep_view_holes_exclude_events_under_the_cut() {
        let mut v = DepView::new();
        v.include(Event::new(0, 4));
        v.add_hole(Event::new(0, 2));
        assert!(v.contains(Event::new(0, 1)));
        assert!(!v.contains(Event::new(0, 2)));
        assert!(v.contains(Event::new(0, 4)));

        v.remove_hole(Event::new(0, 2));
        assert!(v.contains(Event::new(0, 2)));
    }

    #[test]
    fn dep_view_union_keeps_only_shared_holes() {
        let mut a = DepView::new();
        a.include(Event::new(0, 3));
        a.add_hole(Event::new(0, 1));
        a.add_hole(Event::new(0, 2));

        let mut b = DepView::new();
        b.include(Event::new(0, 2));
        b.add_hole(Event::new(0, 2));

        a.update(&b);
        // 1 is included in b, 2 is a hole on both sides.
        assert!(a.contains(Event::new(0, 1)));
        assert!(!a.contains(Event::new(0, 2)));
        assert!(a.contains(Event::new(0, 3)));
    }

    fn arb_view() -> impl Strategy<Value = View> {
        proptest::collection::vec(0u32..8, 0..4).prop_map(|cuts| {
            let mut v = View::new();
            for (t, c) in cuts.into_iter().enumerate() {
                v.set_cut(t as u32, c);
            }
            v
        })
    }

    proptest! {
        #[test]
        fn update_is_commutative(a in arb_view(), b in arb_view()) {
            let mut ab = a.clone();
            ab.update(&b);
            let mut ba = b.clone();
            ba.update(&a);
            prop_assert!(ab.dominates(&ba) && ba.dominates(&ab));
        }

        #[test]
        fn update_is_idempotent(a in arb_view(), b in arb_view()) {
            let mut once = a.clone();
            once.update(&b);
            let mut twice = once.clone();
            twice.update(&b);
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn update_dominates_both_operands(a in arb_view(), b in arb_view()) {
            let mut u = a.clone();
            u.update(&b);
            prop_assert!(u.dominates(&a));
            prop_assert!(u.dominates(&b));
        }
    }
}

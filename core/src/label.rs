use alloc::{string::String, vec::Vec};
use core::fmt::{self, Display};

use smallvec::SmallVec;

use crate::{
    addr::{AddrPool, SAddr},
    event::{Event, Stamp},
    ordering::MemOrdering,
    thread::ThreadInfo,
    value::{ASize, Annotation, AssumeType, RmwBinOp, SVal},
    view::{View, ViewKind},
};

// EVENT DEPENDENCIES
// ================================================================================================

/// Syntactic dependencies of an event, supplied by the interpreter.
///
/// Only dependency-tracking memory models (IMM) consume these; the plain models ignore them.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventDeps {
    pub addr: Vec<Event>,
    pub data: Vec<Event>,
    pub ctrl: Vec<Event>,
}

impl EventDeps {
    /// Returns an empty dependency set.
    pub fn none() -> Self {
        Self::default()
    }

    /// Iterates over all dependency events, irrespective of their kind.
    pub fn iter(&self) -> impl Iterator<Item = Event> + '_ {
        self.addr.iter().chain(self.data.iter()).chain(self.ctrl.iter()).copied()
    }
}

// LABEL PAYLOADS
// ================================================================================================

/// Payload of a thread-start label.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThreadStart {
    /// The thread-create event that spawned this thread.
    pub create: Event,
    pub info: ThreadInfo,
    /// Symmetric-predecessor thread, when symmetry reduction identified one.
    pub symm_pred: Option<u32>,
    /// Symmetric-successor thread.
    pub symm_succ: Option<u32>,
}

/// Payload of a thread-finish label.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThreadFinish {
    /// The thread's exit value.
    pub ret: SVal,
    /// The join event that collected this thread, once one did.
    pub parent_join: Option<Event>,
}

/// Payload of a thread-create label.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThreadCreate {
    /// Info of the thread being spawned.
    pub info: ThreadInfo,
    /// Identifier assigned to the spawned thread at commit time.
    pub child: u32,
}

/// Payload of a thread-join label.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThreadJoin {
    pub child: u32,
    /// The exit value observed from the child.
    pub ret: SVal,
}

/// Expected/new value pair of a compare-and-swap.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CasInfo {
    pub expected: SVal,
    pub new_val: SVal,
}

/// Operation/operand pair of a fetch-and-modify.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FaiInfo {
    pub op: RmwBinOp,
    pub operand: SVal,
}

/// Discriminates the flavors of read events.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadKind {
    /// An ordinary load.
    Plain,
    /// The read part of a compare-and-swap.
    Cas(CasInfo),
    /// The read part of a mutex-acquire CAS (expects 0, writes 1).
    LockCas,
    /// The read part of a fetch-and-modify.
    Fai(FaiInfo),
    /// The read part of a barrier-increment FAI.
    BIncFai(FaiInfo),
    /// A barrier-wait load; blocks its thread unless it reads the unblocking value.
    BWait,
    /// A speculative read (confirmation optimization).
    Speculative,
    /// The read part of a confirming CAS.
    Confirming(CasInfo),
    /// The read part of a CAS that other threads may help complete.
    HelpedCas(CasInfo),
}

/// Payload of a read label.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadLabel {
    pub addr: SAddr,
    pub size: ASize,
    pub kind: ReadKind,
    /// The write this read observes; `None` only transiently (dangling after a cut, or while an
    /// invalid access is being reported).
    pub rf: Option<Event>,
    /// Symbolic predicate the surrounding `assume`/spin-loop imposes on the returned value.
    pub annot: Option<Annotation>,
}

impl ReadLabel {
    /// Returns true if this is the read part of some RMW operation.
    pub fn is_rmw(&self) -> bool {
        !matches!(self.kind, ReadKind::Plain | ReadKind::Speculative | ReadKind::BWait)
    }

    /// Returns true if reading `val` makes the RMW part of this read succeed.
    ///
    /// FAI-style reads always succeed; CAS-style reads succeed when the expected value shows up.
    /// Plain reads never have a write part.
    pub fn value_makes_rmw_succeed(&self, val: SVal) -> bool {
        match self.kind {
            ReadKind::Plain | ReadKind::Speculative | ReadKind::BWait => false,
            ReadKind::Fai(_) | ReadKind::BIncFai(_) => true,
            ReadKind::Cas(cas) | ReadKind::Confirming(cas) | ReadKind::HelpedCas(cas) => {
                val == cas.expected
            },
            ReadKind::LockCas => val == SVal::new(0),
        }
    }

    /// Returns true if reading `val` satisfies the annotation (if any).
    pub fn value_makes_assume_succeed(&self, val: SVal) -> bool {
        self.annot.is_none_or(|annot| annot.holds(val))
    }

    /// Returns true if this is a confirming read.
    pub fn is_confirming(&self) -> bool {
        matches!(self.kind, ReadKind::Confirming(_))
    }
}

impl ReadKind {
    /// Returns the write kind of this read's RMW write part, if it has one.
    pub fn matching_write_kind(&self) -> Option<WriteKind> {
        match self {
            ReadKind::Plain | ReadKind::Speculative | ReadKind::BWait => None,
            ReadKind::Cas(_) | ReadKind::Confirming(_) => Some(WriteKind::Cas),
            ReadKind::LockCas => Some(WriteKind::LockCas),
            ReadKind::Fai(_) => Some(WriteKind::Fai),
            ReadKind::BIncFai(_) => Some(WriteKind::BIncFai),
            ReadKind::HelpedCas(_) => Some(WriteKind::HelpedCas),
        }
    }
}

/// Discriminates the flavors of write events.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteKind {
    /// An ordinary store.
    Plain,
    /// The write part of a compare-and-swap.
    Cas,
    /// The write part of a mutex-acquire CAS.
    LockCas,
    /// The write part of a fetch-and-modify.
    Fai,
    /// The write part of a barrier-increment FAI.
    BIncFai,
    /// A mutex release.
    Unlock,
    /// The write part of a helped CAS.
    HelpedCas,
}

/// Payload of a write label.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteLabel {
    pub addr: SAddr,
    pub size: ASize,
    pub val: SVal,
    pub kind: WriteKind,
    /// Positions of the reads observing this write.
    pub readers: SmallVec<[Event; 2]>,
    /// Set when this write participated in a write-write race (IPR soundness gate).
    pub ww_racy: bool,
    /// Set for writes annotated as final (no later same-location store expected).
    pub is_final: bool,
    /// Set for writes that no other thread can observe.
    pub is_local: bool,
}

impl WriteLabel {
    /// Returns true if this is the write part of some RMW operation.
    pub fn is_rmw(&self) -> bool {
        !matches!(self.kind, WriteKind::Plain | WriteKind::Unlock)
    }
}

/// Payload of a malloc label.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MallocLabel {
    /// Base address assigned at commit time.
    pub addr: SAddr,
    pub size: u64,
    pub alignment: u64,
    pub pool: AddrPool,
}

impl MallocLabel {
    /// Returns true if `addr` lies within this allocation.
    pub fn covers(&self, addr: SAddr) -> bool {
        self.addr.pool() == addr.pool()
            && self.addr.thread() == addr.thread()
            && (self.addr.offset()..self.addr.offset() + self.size).contains(&addr.offset())
    }
}

/// Discriminates ordinary frees from hazard-pointer retirements.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FreeKind {
    Free,
    HazptrRetire,
}

/// Payload of a free/retire label.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FreeLabel {
    pub addr: SAddr,
    pub kind: FreeKind,
}

/// Payload of a hazard-pointer protect label.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HpProtect {
    pub hp_addr: SAddr,
    pub prot_addr: SAddr,
}

/// Payload of a helping-CAS label.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HelpingCas {
    pub addr: SAddr,
    pub size: ASize,
    pub cas: CasInfo,
}

/// The cause recorded on a blocked thread's block label.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockType {
    /// An `assume` (or an annotated read) failed.
    Assume(AssumeType),
    /// A potential FAI-ZNE spin-loop is blocked.
    Spinloop,
    /// A mutex acquisition failed.
    LockNotAcq,
    /// A barrier wait has not been released.
    Barrier,
    /// A helped CAS is waiting for its helper.
    HelpedCas,
    /// An annotated read was removed and the thread parked until a same-location write shows up.
    ReadOpt(SAddr),
    /// A join is waiting for its child to finish.
    Join(u32),
}

/// Payload of an optional-block (speculation) label.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OptionalLabel {
    /// Whether a revisit may still expand this block.
    pub expandable: bool,
    /// Whether the block has been expanded.
    pub expanded: bool,
}

/// Payload of the method-begin/end markers used for specification collection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodCall {
    pub name: String,
    pub value: i64,
}

// LABEL KIND
// ================================================================================================

/// The typed payload of a label; one variant per event kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LabelKind {
    /// The initializing event: the virtual write of every static location, doubling as the main
    /// thread's start label.
    Init,
    ThreadStart(ThreadStart),
    ThreadFinish(ThreadFinish),
    ThreadCreate(ThreadCreate),
    ThreadJoin(ThreadJoin),
    ThreadKill,
    Read(ReadLabel),
    Write(WriteLabel),
    Fence,
    Malloc(MallocLabel),
    Free(FreeLabel),
    HpProtect(HpProtect),
    HelpingCas(HelpingCas),
    Block(BlockType),
    Optional(OptionalLabel),
    LoopBegin,
    SpinStart,
    FaiZneSpinEnd,
    LockZneSpinEnd,
    MethodBegin(MethodCall),
    MethodEnd(MethodCall),
    /// Placeholder for a position excluded from a dependency-restricted copy.
    Empty,
}

// EVENT LABEL
// ================================================================================================

/// A committed event: its position, payload and the bookkeeping the exploration relies on.
#[derive(Clone, Debug)]
pub struct EventLabel {
    pos: Event,
    stamp: Stamp,
    ordering: MemOrdering,
    kind: LabelKind,
    deps: EventDeps,
    /// Cached `(po ∪ rf)*` (or dependency-refined) prefix view; set by the consistency checker.
    porf: Option<ViewKind>,
    /// Cached happens-before view.
    hb: View,
    revisitable: bool,
    added_max: bool,
}

impl EventLabel {
    /// Returns a new label with the given position, ordering and payload.
    ///
    /// The stamp is assigned when the label is appended to a graph.
    pub fn new(pos: Event, ordering: MemOrdering, kind: LabelKind) -> Self {
        Self {
            pos,
            stamp: Stamp::default(),
            ordering,
            kind,
            deps: EventDeps::none(),
            porf: None,
            hb: View::new(),
            revisitable: true,
            added_max: false,
        }
    }

    /// Attaches interpreter-supplied dependencies to this label.
    pub fn with_deps(mut self, deps: EventDeps) -> Self {
        self.deps = deps;
        self
    }

    // ACCESSORS
    // --------------------------------------------------------------------------------------------

    pub fn pos(&self) -> Event {
        self.pos
    }

    pub fn thread(&self) -> u32 {
        self.pos.thread
    }

    pub fn index(&self) -> u32 {
        self.pos.index
    }

    pub fn stamp(&self) -> Stamp {
        self.stamp
    }

    pub fn ordering(&self) -> MemOrdering {
        self.ordering
    }

    pub fn kind(&self) -> &LabelKind {
        &self.kind
    }

    pub fn kind_mut(&mut self) -> &mut LabelKind {
        &mut self.kind
    }

    pub fn deps(&self) -> &EventDeps {
        &self.deps
    }

    /// Returns true if this label may still be the target of a backward revisit.
    pub fn is_revisitable(&self) -> bool {
        self.revisitable
    }

    pub fn set_revisitable(&mut self, value: bool) {
        self.revisitable = value;
    }

    /// Returns true if this label read/placed maximally when it was added.
    pub fn was_added_max(&self) -> bool {
        self.added_max
    }

    pub fn set_added_max(&mut self, value: bool) {
        self.added_max = value;
    }

    // PAYLOAD VIEWS
    // --------------------------------------------------------------------------------------------

    /// Returns the read payload, if this is a read.
    pub fn read(&self) -> Option<&ReadLabel> {
        match &self.kind {
            LabelKind::Read(r) => Some(r),
            _ => None,
        }
    }

    pub fn read_mut(&mut self) -> Option<&mut ReadLabel> {
        match &mut self.kind {
            LabelKind::Read(r) => Some(r),
            _ => None,
        }
    }

    /// Returns the write payload, if this is a write.
    pub fn write(&self) -> Option<&WriteLabel> {
        match &self.kind {
            LabelKind::Write(w) => Some(w),
            _ => None,
        }
    }

    pub fn write_mut(&mut self) -> Option<&mut WriteLabel> {
        match &mut self.kind {
            LabelKind::Write(w) => Some(w),
            _ => None,
        }
    }

    /// Returns the address and size accessed, for read and write labels.
    pub fn access(&self) -> Option<(SAddr, ASize)> {
        match &self.kind {
            LabelKind::Read(r) => Some((r.addr, r.size)),
            LabelKind::Write(w) => Some((w.addr, w.size)),
            _ => None,
        }
    }

    /// Returns true if this is a memory access (read or write).
    pub fn is_mem_access(&self) -> bool {
        self.access().is_some()
    }

    /// Returns true if this label terminates its thread (finish, kill, or any block).
    pub fn is_terminator(&self) -> bool {
        matches!(
            self.kind,
            LabelKind::ThreadFinish(_) | LabelKind::ThreadKill | LabelKind::Block(_)
        )
    }

    /// Returns true if this is a block label.
    pub fn is_block(&self) -> bool {
        matches!(self.kind, LabelKind::Block(_))
    }

    /// Returns the block cause, if this is a block label.
    pub fn block_type(&self) -> Option<BlockType> {
        match self.kind {
            LabelKind::Block(b) => Some(b),
            _ => None,
        }
    }

    /// Returns true if this label is a non-atomic access.
    pub fn is_not_atomic(&self) -> bool {
        self.is_mem_access() && self.ordering.is_not_atomic()
    }

    /// Returns true if this event hands a value back to the interpreter (used by the
    /// value-prefix scheduling cache).
    pub fn returns_value(&self) -> bool {
        matches!(
            self.kind,
            LabelKind::Read(_)
                | LabelKind::ThreadJoin(_)
                | LabelKind::ThreadCreate(_)
                | LabelKind::Malloc(_)
        )
    }

    // VIEW CACHE
    // --------------------------------------------------------------------------------------------

    /// Returns the cached prefix view, if it has been computed.
    pub fn porf(&self) -> Option<&ViewKind> {
        self.porf.as_ref()
    }

    /// Returns the cached prefix view, which must have been computed.
    pub fn porf_view(&self) -> &ViewKind {
        self.porf.as_ref().expect("prefix view not yet computed")
    }

    pub fn set_porf(&mut self, view: ViewKind) {
        self.porf = Some(view);
    }

    /// Returns the cached happens-before view.
    pub fn hb_view(&self) -> &View {
        &self.hb
    }

    pub fn set_hb(&mut self, view: View) {
        self.hb = view;
    }

    /// Drops the cached views; used when a revisit re-binds this label's reads-from.
    pub fn reset_views(&mut self) {
        self.porf = None;
        self.hb = View::new();
    }

    /// Strips everything the graph computed for this label (stamp, views, links, flags),
    /// leaving only the payload; used when a label is copied into the scheduling cache.
    pub fn reset(&mut self) {
        self.stamp = Stamp::default();
        self.reset_views();
        self.revisitable = true;
        self.added_max = false;
        match &mut self.kind {
            LabelKind::Read(r) => r.rf = None,
            LabelKind::Write(w) => {
                w.readers.clear();
                w.ww_racy = false;
            },
            _ => {},
        }
    }

    // CRATE-INTERNAL MUTATORS
    // --------------------------------------------------------------------------------------------

    pub(crate) fn set_stamp(&mut self, stamp: Stamp) {
        self.stamp = stamp;
    }
}

impl Display for EventLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            LabelKind::Init => write!(f, "INIT"),
            LabelKind::ThreadStart(_) => write!(f, "{} B", self.pos),
            LabelKind::ThreadFinish(tf) => write!(f, "{} E({})", self.pos, tf.ret),
            LabelKind::ThreadCreate(tc) => write!(f, "{} TC({})", self.pos, tc.child),
            LabelKind::ThreadJoin(tj) => write!(f, "{} TJ({})", self.pos, tj.child),
            LabelKind::ThreadKill => write!(f, "{} KILL", self.pos),
            LabelKind::Read(r) => match r.rf {
                Some(rf) => write!(f, "{} R{}({}) [{}]", self.pos, self.ordering, r.addr, rf),
                None => write!(f, "{} R{}({}) [⊥]", self.pos, self.ordering, r.addr),
            },
            LabelKind::Write(w) => {
                write!(f, "{} W{}({}, {})", self.pos, self.ordering, w.addr, w.val)
            },
            LabelKind::Fence => write!(f, "{} F{}", self.pos, self.ordering),
            LabelKind::Malloc(m) => write!(f, "{} M({}, {})", self.pos, m.addr, m.size),
            LabelKind::Free(_) => write!(f, "{} FREE", self.pos),
            LabelKind::HpProtect(_) => write!(f, "{} HPPROT", self.pos),
            LabelKind::HelpingCas(_) => write!(f, "{} HELPCAS", self.pos),
            LabelKind::Block(b) => write!(f, "{} BLOCK({b:?})", self.pos),
            LabelKind::Optional(_) => write!(f, "{} OPT", self.pos),
            LabelKind::LoopBegin => write!(f, "{} LOOPBEG", self.pos),
            LabelKind::SpinStart => write!(f, "{} SPINSTART", self.pos),
            LabelKind::FaiZneSpinEnd => write!(f, "{} FAIZNEEND", self.pos),
            LabelKind::LockZneSpinEnd => write!(f, "{} LOCKZNEEND", self.pos),
            LabelKind::MethodBegin(m) => write!(f, "{} MBEG({})", self.pos, m.name),
            LabelKind::MethodEnd(m) => write!(f, "{} MEND({})", self.pos, m.name),
            LabelKind::Empty => write!(f, "{} ⋅", self.pos),
        }
    }
}

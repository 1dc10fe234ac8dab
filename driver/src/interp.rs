use kestrel_core::{
    ASize, Action, Annotation, EventDeps, MemOrdering, ReadKind, SAddr, SVal, WriteKind,
};

use crate::{Driver, errors::VerificationError};

// HANDLER RESULTS
// ================================================================================================

/// What a driver handler tells the interpreter to do next.
#[derive(Clone, Debug)]
pub enum HandleResult<T> {
    /// The event committed (or replayed); `T` carries its result.
    Ok(T),
    /// The event produced an error; the offending thread is blocked or the exploration halts.
    Err(VerificationError),
    /// The driver changed state under the interpreter's feet (a blocked read, a join on an
    /// unfinished thread); the interpreter must retry the current instruction later.
    Reset,
    /// The event cannot be part of a meaningful execution (the execution is moot); the
    /// interpreter should stop stepping this execution.
    Invalid,
}

impl<T> HandleResult<T> {
    /// Returns the committed value, panicking on any other outcome.
    pub fn unwrap_ok(self) -> T {
        match self {
            HandleResult::Ok(v) => v,
            HandleResult::Err(e) => panic!("handler failed: {e}"),
            HandleResult::Reset => panic!("handler requested a reset"),
            HandleResult::Invalid => panic!("handler invalidated the execution"),
        }
    }
}

// EVENT REQUESTS
// ================================================================================================

/// Payload of a load request.
#[derive(Clone, Debug)]
pub struct LoadRequest {
    pub addr: SAddr,
    pub size: ASize,
    pub ordering: MemOrdering,
    pub kind: ReadKind,
    /// Predicate a surrounding `assume`/spin-loop imposes on the value read.
    pub annot: Option<Annotation>,
    pub deps: EventDeps,
}

/// Payload of a store request.
#[derive(Clone, Debug)]
pub struct StoreRequest {
    pub addr: SAddr,
    pub size: ASize,
    pub ordering: MemOrdering,
    pub kind: WriteKind,
    pub val: SVal,
    /// Write annotated as final (no later same-location store expected).
    pub is_final: bool,
    pub deps: EventDeps,
}

// INTERPRETER SURFACE
// ================================================================================================

/// Read-only queries the driver makes about the program's static memory.
///
/// The interpreter owns the program image; the driver asks it for initial values and for
/// diagnostics metadata.
pub trait MemorySource: Send + Sync {
    /// Returns the initial value of a statically allocated location.
    fn initial_value_of(&self, addr: SAddr) -> SVal;

    /// Returns true if `addr` belongs to static storage known to the program.
    fn is_statically_allocated(&self, addr: SAddr) -> bool;

    /// Returns the source-level name of a static location, for error reports.
    fn static_name_of(&self, _addr: SAddr) -> Option<String> {
        None
    }

    /// Escape hatch: the interpreter may vouch that accesses with this ordering are
    /// initialized even when the graph cannot prove it.
    fn skip_uninit_check(&self, _ord: MemOrdering) -> bool {
        false
    }
}

/// The surface the driver needs from whatever single-steps the program.
///
/// One interpreter instance serves one worker. The driver calls [`Interpreter::reset`] between
/// executions and then repeatedly schedules threads; [`Interpreter::step`] executes one
/// instruction of the chosen thread, reporting the resulting events through the driver's
/// `handle_*` methods.
pub trait Interpreter {
    /// Rewinds the program to its initial state (registers, program counters, bookkeeping).
    ///
    /// Called before every execution, including replays: the committed graph prefix drives
    /// re-execution, so no interpreter state survives a backtrack.
    fn reset(&mut self);

    /// Reports the runnable action of every thread the interpreter currently knows, in thread
    /// order (index `t` describes thread `t`).
    fn collect_runnable(&self, out: &mut Vec<Action>);

    /// Executes the next instruction of `thread`, committing its events through `driver`.
    fn step(&mut self, thread: u32, driver: &mut Driver);
}

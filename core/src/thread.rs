use crate::{event::Event, value::SVal};

// THREAD INFO
// ================================================================================================

/// Static information about a thread of the program under verification.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ThreadInfo {
    /// The thread's identifier within the execution graph.
    pub id: u32,
    /// The thread that spawned this one.
    pub parent: u32,
    /// Identifier of the function the thread runs.
    pub fun_id: u32,
    /// The argument the thread was spawned with.
    pub arg: SVal,
}

impl ThreadInfo {
    /// Returns the info of the main thread.
    pub fn main() -> Self {
        Self::default()
    }
}

// RUNNABLE ACTIONS
// ================================================================================================

/// The kind of the next step a thread would take, as reported by the interpreter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActionKind {
    /// The next step performs a load (or the load part of an RMW).
    Load,
    /// The next step performs a store.
    Store,
    /// Anything else (fences, allocations, thread management, local steps).
    Other,
}

/// One runnable thread: its id, the kind of its next step, and the position the next event
/// would occupy in the thread's timeline (as counted by the interpreter).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Action {
    pub kind: ActionKind,
    pub next: Event,
}

impl Action {
    /// Returns a new action for the given position.
    pub fn new(kind: ActionKind, next: Event) -> Self {
        Self { kind, next }
    }
}

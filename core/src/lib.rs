#![no_std]

//! Core data model of the Kestrel model checker: events, labels, views, abstract addresses,
//! and the execution graph the exploration engine mutates.
//!
//! This crate is purely structural. Memory-model semantics live in `kestrel-checker`, and the
//! exploration algorithm in `kestrel-driver`.

#[macro_use]
extern crate alloc;

#[cfg(any(feature = "std", test))]
extern crate std;

mod addr;
mod allocator;
mod event;
mod label;
mod ordering;
mod thread;
mod value;
mod view;

pub mod graph;

// RE-EXPORTS
// ================================================================================================

pub use addr::{AddrPool, SAddr};
pub use allocator::SAddrAllocator;
pub use event::{Event, Stamp};
pub use graph::ExecutionGraph;
pub use label::{
    BlockType, CasInfo, EventDeps, EventLabel, FaiInfo, FreeKind, FreeLabel, HelpingCas,
    HpProtect, LabelKind, MallocLabel, MethodCall, OptionalLabel, ReadKind, ReadLabel,
    ThreadCreate, ThreadFinish, ThreadJoin, ThreadStart, WriteKind, WriteLabel,
};
pub use ordering::MemOrdering;
pub use thread::{Action, ActionKind, ThreadInfo};
pub use value::{ASize, Annotation, AssumeType, RmwBinOp, SVal};
pub use view::{DepView, View, ViewKind};

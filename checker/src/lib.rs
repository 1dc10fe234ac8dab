#![no_std]

//! Memory-model semantics for the Kestrel model checker.
//!
//! The [`ConsistencyChecker`] answers the three queries the exploration engine needs: which
//! writes a new read may observe, where a new write may sit in coherence, and whether a graph
//! is consistent under the chosen model. It also maintains the per-label prefix and
//! happens-before views the queries are computed from. The [`SymmetryChecker`] prunes
//! continuations that only differ by a permutation of indistinguishable threads.

extern crate alloc;

#[cfg(any(feature = "std", test))]
extern crate std;

mod acyclic;
mod consistency;
mod symmetry;

use core::fmt::{self, Display};

pub use consistency::ConsistencyChecker;
pub use symmetry::SymmetryChecker;

// MEMORY MODEL
// ================================================================================================

/// The memory model an exploration runs under.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum MemoryModel {
    /// Sequential consistency.
    Sc,
    /// Release/acquire: every atomic access synchronizes.
    Ra,
    /// The repaired C11 model.
    #[default]
    Rc11,
    /// The intermediate memory model (dependency-tracking).
    Imm,
}

impl MemoryModel {
    /// Returns true if this model tracks syntactic dependencies (and thus uses dependency
    /// views for prefixes).
    pub fn is_dep_tracking(&self) -> bool {
        matches!(self, MemoryModel::Imm)
    }

    /// Returns true if the model may commit events out of program order, which makes the
    /// "later than" side of coherence splits non-trivial.
    pub fn supports_out_of_order(&self) -> bool {
        self.is_dep_tracking()
    }
}

impl Display for MemoryModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MemoryModel::Sc => "SC",
            MemoryModel::Ra => "RA",
            MemoryModel::Rc11 => "RC11",
            MemoryModel::Imm => "IMM",
        };
        f.write_str(s)
    }
}

use core::fmt::{self, Display};

// MEMORY ORDERING
// ================================================================================================

/// Memory ordering attached to an event.
///
/// `NotAtomic` marks plain (racy) accesses; the remaining values mirror the C/C++ atomic
/// orderings. Which orderings actually induce synchronization is decided by the active memory
/// model: SC and RA strengthen every access, while RC11 and IMM interpret them literally.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MemOrdering {
    NotAtomic,
    #[default]
    Relaxed,
    Acquire,
    Release,
    AcqRel,
    SeqCst,
}

impl MemOrdering {
    /// Returns true if this ordering is `NotAtomic`.
    pub fn is_not_atomic(&self) -> bool {
        matches!(self, MemOrdering::NotAtomic)
    }

    /// Returns true if this ordering is at least `Acquire` (on the read side).
    pub fn is_at_least_acquire(&self) -> bool {
        matches!(self, MemOrdering::Acquire | MemOrdering::AcqRel | MemOrdering::SeqCst)
    }

    /// Returns true if this ordering is at least `Release` (on the write side).
    pub fn is_at_least_release(&self) -> bool {
        matches!(self, MemOrdering::Release | MemOrdering::AcqRel | MemOrdering::SeqCst)
    }

    /// Returns true if this ordering is `SeqCst`.
    pub fn is_sc(&self) -> bool {
        matches!(self, MemOrdering::SeqCst)
    }
}

impl Display for MemOrdering {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MemOrdering::NotAtomic => "na",
            MemOrdering::Relaxed => "rlx",
            MemOrdering::Acquire => "acq",
            MemOrdering::Release => "rel",
            MemOrdering::AcqRel => "ar",
            MemOrdering::SeqCst => "sc",
        };
        f.write_str(s)
    }
}

use core::fmt::{self, Display};

// SCALAR VALUE
// ================================================================================================

/// A scalar value flowing through the program under verification.
///
/// All accesses are at most 64 bits wide; narrower accesses mask the relevant low bytes via
/// [`ASize`]. Signedness is the interpreter's concern, so comparisons in annotations treat the
/// raw bits as unsigned.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SVal(u64);

impl SVal {
    /// Returns a new value holding the given bits.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw bits of this value.
    pub const fn get(&self) -> u64 {
        self.0
    }

    /// Returns this value truncated to the given access size.
    pub fn truncated(&self, size: ASize) -> SVal {
        SVal(self.0 & size.mask())
    }
}

impl From<u64> for SVal {
    fn from(value: u64) -> Self {
        SVal(value)
    }
}

impl From<u32> for SVal {
    fn from(value: u32) -> Self {
        SVal(value.into())
    }
}

impl From<bool> for SVal {
    fn from(value: bool) -> Self {
        SVal(value.into())
    }
}

impl Display for SVal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

// ACCESS SIZE
// ================================================================================================

/// The size of a memory access, in bytes (1, 2, 4 or 8).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ASize(u32);

impl ASize {
    /// Returns a new access size of the given number of bytes.
    pub const fn new(bytes: u32) -> Self {
        debug_assert!(bytes == 1 || bytes == 2 || bytes == 4 || bytes == 8);
        Self(bytes)
    }

    /// Returns the number of bytes accessed.
    pub const fn bytes(&self) -> u32 {
        self.0
    }

    /// Returns the number of bits accessed.
    pub const fn bits(&self) -> u32 {
        self.0 * 8
    }

    /// Returns a mask selecting the low `bytes()` bytes of a value.
    pub const fn mask(&self) -> u64 {
        if self.0 >= 8 { u64::MAX } else { (1u64 << (self.0 * 8)) - 1 }
    }
}

impl Default for ASize {
    fn default() -> Self {
        ASize(8)
    }
}

impl Display for ASize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}B", self.0)
    }
}

// RMW OPCODES
// ================================================================================================

/// Binary operation performed by a fetch-and-modify event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RmwBinOp {
    Xchg,
    Add,
    Sub,
    And,
    Or,
    Xor,
}

impl RmwBinOp {
    /// Applies this operation to the old value and the supplied operand.
    pub fn apply(&self, old: SVal, operand: SVal, size: ASize) -> SVal {
        let result = match self {
            RmwBinOp::Xchg => operand.get(),
            RmwBinOp::Add => old.get().wrapping_add(operand.get()),
            RmwBinOp::Sub => old.get().wrapping_sub(operand.get()),
            RmwBinOp::And => old.get() & operand.get(),
            RmwBinOp::Or => old.get() | operand.get(),
            RmwBinOp::Xor => old.get() ^ operand.get(),
        };
        SVal(result).truncated(size)
    }
}

// READ ANNOTATIONS
// ================================================================================================

/// Symbolic predicate over the value returned by a read.
///
/// Annotations summarize the condition under which the surrounding `assume`/spin-loop makes
/// progress. A read whose annotation fails for the chosen reads-from blocks its thread; a later
/// same-location write may revisit the read in place and unblock it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Annotation {
    Eq(SVal),
    Ne(SVal),
    Lt(SVal),
    Le(SVal),
    Gt(SVal),
    Ge(SVal),
}

impl Annotation {
    /// Evaluates this predicate for the given read value.
    pub fn holds(&self, value: SVal) -> bool {
        match self {
            Annotation::Eq(v) => value == *v,
            Annotation::Ne(v) => value != *v,
            Annotation::Lt(v) => value < *v,
            Annotation::Le(v) => value <= *v,
            Annotation::Gt(v) => value > *v,
            Annotation::Ge(v) => value >= *v,
        }
    }
}

/// The reason a thread blocked on an `assume`-style condition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AssumeType {
    /// A user-supplied `assume()` failed.
    User,
    /// A spin-loop assumption failed.
    Spinloop,
    /// A barrier wait has not been released yet.
    Barrier,
}

// TESTS
// ================================================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_masks_high_bytes() {
        let v = SVal::new(0xdead_beef_0000_01ff);
        assert_eq!(v.truncated(ASize::new(1)), SVal::new(0xff));
        assert_eq!(v.truncated(ASize::new(4)), SVal::new(0x0000_01ff));
        assert_eq!(v.truncated(ASize::new(8)), v);
    }

    #[test]
    fn fai_wraps_at_access_size() {
        let old = SVal::new(0xff);
        let res = RmwBinOp::Add.apply(old, SVal::new(1), ASize::new(1));
        assert_eq!(res, SVal::new(0));
    }
}

use kestrel_core::Event;

// VERIFICATION ERRORS
// ================================================================================================

/// Everything the checker can report about an execution.
///
/// Errors split into *hard* ones, which halt the whole exploration, and *soft* ones
/// (warnings), which are recorded once per code and reported without stopping. The split is
/// queried through [`VerificationError::is_hard`]; `WWRace` is the one code whose severity
/// depends on the configuration (it is promoted when IPR or symmetry reduction rely on ordered
/// writes).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, thiserror::Error, miette::Diagnostic)]
pub enum VerificationError {
    // Hard errors.
    #[error("attempt to access non-allocated memory")]
    #[diagnostic(help("the address was never returned by an allocation visible to this access"))]
    AccessNonMalloc,
    #[error("attempt to access already-freed memory")]
    AccessFreed,
    #[error("attempt to read uninitialized memory")]
    #[diagnostic(help("dynamic allocations must be written before they are read"))]
    UninitializedMem,
    #[error("mixed-size accesses to the same location")]
    MixedSize,
    #[error("invalid unlock: mutex not locked by this thread")]
    InvalidUnlock,
    #[error("invalid join: {0}")]
    InvalidJoin(String),
    #[error("assertion violation: {0}")]
    Assertion(String),
    #[error("liveness violation: {0}")]
    Liveness(String),
    #[error("barrier is not well-formed")]
    #[diagnostic(help(
        "barrier initialization must be unique and barrier_wait counts must match the \
         initializing value"
    ))]
    BarrierWellFormedness,
    #[error("helping-CAS annotation misused: {0}")]
    HelpingCasMisuse(String),
    #[error("annotation misused: {0}")]
    Annotation(String),

    // Soft errors (warnings).
    #[error("non-atomic race detected")]
    RaceNotAtomic,
    #[error("unordered same-location writes (ww-race)")]
    #[diagnostic(help(
        "unordered writes are not a bug per se, though they often indicate faulty design"
    ))]
    WWRace,
    #[error("memory allocated but not freed at program exit")]
    UnfreedMemory,
}

impl VerificationError {
    /// Returns true if this error halts the exploration unconditionally.
    pub fn is_hard(&self) -> bool {
        !matches!(
            self,
            VerificationError::RaceNotAtomic
                | VerificationError::WWRace
                | VerificationError::UnfreedMemory
        )
    }
}

// ERROR DETAILS
// ================================================================================================

/// Everything needed to report one error occurrence.
#[derive(Clone, Debug)]
pub struct ErrorDetails {
    /// Position of the offending event ([`Event::BOTTOM`] when no single event is at fault).
    pub pos: Event,
    pub error: VerificationError,
    /// Extra message appended to the report.
    pub msg: String,
    /// The conflicting event, for race-like errors.
    pub racy: Option<Event>,
    /// Whether this occurrence halts the exploration.
    pub should_halt: bool,
}

impl ErrorDetails {
    /// Returns details for a hard occurrence of `error` at `pos`.
    pub fn new(pos: Event, error: VerificationError) -> Self {
        Self { pos, error, msg: String::new(), racy: None, should_halt: true }
    }

    /// Attaches a free-form message.
    pub fn with_msg(mut self, msg: impl Into<String>) -> Self {
        self.msg = msg.into();
        self
    }

    /// Records the conflicting event.
    pub fn with_racy(mut self, racy: Event) -> Self {
        self.racy = Some(racy);
        self
    }

    /// Marks this occurrence as non-halting (a warning).
    pub fn soft(mut self) -> Self {
        self.should_halt = false;
        self
    }
}

use kestrel_checker::MemoryModel;

// SCHEDULING & BOUNDING KNOBS
// ================================================================================================

/// Policy used to pick the next thread to step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SchedulePolicy {
    /// Always run the leftmost (lowest-id) runnable thread.
    #[default]
    Ltr,
    /// Prefer threads whose next step is a store.
    WriteFirst,
    /// Like `WriteFirst`, but break ties with the seeded RNG.
    WriteFirstRandom,
    /// Pick a runnable thread at random (seeded).
    Arbitrary,
}

/// Metric used to bound the exploration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoundType {
    /// Number of (non-mandatory) context switches.
    Context,
    /// Number of round-robin rounds.
    Round,
}

// VERIFICATION OPTIONS
// ================================================================================================

/// A set of parameters the exploration engine runs under.
///
/// Options are assembled with the builder-style `with_*` methods and validated by
/// [`VerificationOptions::validate`], which rejects combinations the engine cannot honor
/// soundly (these mirror the configuration checks of the original tool).
#[derive(Clone, Debug)]
pub struct VerificationOptions {
    model: MemoryModel,
    bound: Option<(BoundType, u32)>,
    symmetry_reduction: bool,
    ipr: bool,
    bam: bool,
    confirmation: bool,
    helper: bool,
    disable_race_detection: bool,
    check_liveness: bool,
    warn_unfreed_memory: bool,
    instruction_caching: bool,
    schedule_policy: SchedulePolicy,
    schedule_seed: Option<u64>,
    num_workers: usize,
    warn_on_graph_size: u32,
    estimation_min: u32,
    sd_threshold: u32,
}

impl Default for VerificationOptions {
    fn default() -> Self {
        VerificationOptions {
            model: MemoryModel::default(),
            bound: None,
            symmetry_reduction: false,
            ipr: true,
            bam: true,
            confirmation: false,
            helper: false,
            disable_race_detection: false,
            check_liveness: false,
            warn_unfreed_memory: false,
            instruction_caching: true,
            schedule_policy: SchedulePolicy::default(),
            schedule_seed: None,
            num_workers: 1,
            warn_on_graph_size: 16384,
            estimation_min: 32,
            sd_threshold: 10,
        }
    }
}

impl VerificationOptions {
    // CONSTRUCTOR
    // --------------------------------------------------------------------------------------------

    /// Returns the default options for the given memory model.
    pub fn new(model: MemoryModel) -> Self {
        VerificationOptions { model, ..Self::default() }
    }

    // BUILDER METHODS
    // --------------------------------------------------------------------------------------------

    /// Bounds the exploration by the given metric and budget.
    ///
    /// Bounding disables IPR and symmetry reduction implicitly unsound shortcuts; see
    /// [`Self::validate`].
    pub fn with_bound(mut self, bound: BoundType, value: u32) -> Self {
        self.bound = Some((bound, value));
        self
    }

    /// Enables or disables symmetry reduction.
    pub fn with_symmetry_reduction(mut self, enable: bool) -> Self {
        self.symmetry_reduction = enable;
        self
    }

    /// Enables or disables in-place revisiting of blocked annotated reads.
    pub fn with_ipr(mut self, enable: bool) -> Self {
        self.ipr = enable;
        self
    }

    /// Enables or disables the barrier-aware optimization.
    pub fn with_bam(mut self, enable: bool) -> Self {
        self.bam = enable;
        self
    }

    /// Enables or disables confirmation-aware revisit filtering.
    pub fn with_confirmation(mut self, enable: bool) -> Self {
        self.confirmation = enable;
        self
    }

    /// Enables or disables helping-CAS support.
    pub fn with_helper(mut self, enable: bool) -> Self {
        self.helper = enable;
        self
    }

    /// Disables data-race reporting.
    pub fn with_race_detection(mut self, enable: bool) -> Self {
        self.disable_race_detection = !enable;
        self
    }

    /// Enables liveness checking for spin-blocked executions.
    pub fn with_liveness_check(mut self, enable: bool) -> Self {
        self.check_liveness = enable;
        self
    }

    /// Reports allocations that are still live when an execution ends.
    pub fn with_unfreed_memory_warnings(mut self, enable: bool) -> Self {
        self.warn_unfreed_memory = enable;
        self
    }

    /// Enables or disables the value-prefix instruction cache.
    pub fn with_instruction_caching(mut self, enable: bool) -> Self {
        self.instruction_caching = enable;
        self
    }

    /// Selects the scheduling policy.
    pub fn with_schedule_policy(mut self, policy: SchedulePolicy) -> Self {
        self.schedule_policy = policy;
        self
    }

    /// Seeds the randomized scheduling policies (and estimation).
    pub fn with_schedule_seed(mut self, seed: u64) -> Self {
        self.schedule_seed = Some(seed);
        self
    }

    /// Sets the number of worker threads used for the exploration.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.num_workers = workers.max(1);
        self
    }

    // VALIDATION
    // --------------------------------------------------------------------------------------------

    /// Checks cross-option invariants, normalizing options that other options subsume.
    pub fn validate(mut self) -> Result<Self, VerificationOptionsError> {
        if self.num_workers == 0 {
            return Err(VerificationOptionsError::NoWorkers);
        }
        if let Some((_, 0)) = self.bound {
            return Err(VerificationOptionsError::ZeroBound);
        }
        if self.bound.is_some() {
            // Bounded exploration cannot use optimizations that assume maximal extensibility.
            self.ipr = false;
            self.symmetry_reduction = false;
            self.bam = false;
            self.instruction_caching = false;
        }
        if self.helper && !self.ipr {
            return Err(VerificationOptionsError::HelperRequiresIpr);
        }
        if self.check_liveness && self.bound.is_some() {
            return Err(VerificationOptionsError::LivenessUnderBounding);
        }
        Ok(self)
    }

    // ACCESSORS
    // --------------------------------------------------------------------------------------------

    pub fn model(&self) -> MemoryModel {
        self.model
    }

    pub fn bound(&self) -> Option<(BoundType, u32)> {
        self.bound
    }

    pub fn is_bounded(&self) -> bool {
        self.bound.is_some()
    }

    pub fn symmetry_reduction(&self) -> bool {
        self.symmetry_reduction
    }

    pub fn ipr(&self) -> bool {
        self.ipr
    }

    pub fn bam(&self) -> bool {
        self.bam
    }

    pub fn confirmation(&self) -> bool {
        self.confirmation
    }

    pub fn helper(&self) -> bool {
        self.helper
    }

    pub fn race_detection(&self) -> bool {
        !self.disable_race_detection
    }

    pub fn check_liveness(&self) -> bool {
        self.check_liveness
    }

    pub fn warn_unfreed_memory(&self) -> bool {
        self.warn_unfreed_memory
    }

    pub fn instruction_caching(&self) -> bool {
        self.instruction_caching
    }

    pub fn schedule_policy(&self) -> SchedulePolicy {
        self.schedule_policy
    }

    pub fn schedule_seed(&self) -> Option<u64> {
        self.schedule_seed
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    pub fn warn_on_graph_size(&self) -> u32 {
        self.warn_on_graph_size
    }

    pub fn estimation_min(&self) -> u32 {
        self.estimation_min
    }

    pub fn sd_threshold(&self) -> u32 {
        self.sd_threshold
    }
}

// ERRORS
// ================================================================================================

/// Invalid option combinations rejected before an exploration starts.
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum VerificationOptionsError {
    #[error("at least one worker thread is required")]
    NoWorkers,
    #[error("the exploration bound must be positive")]
    #[diagnostic(help("a bound of 0 would reject every execution; omit the bound instead"))]
    ZeroBound,
    #[error("helper mode requires in-place revisiting")]
    #[diagnostic(help("helped-CAS threads are unblocked through IPR; do not disable it"))]
    HelperRequiresIpr,
    #[error("liveness checking is incompatible with bounded exploration")]
    #[diagnostic(help(
        "bounding cuts executions early, so spin-blocked threads cannot be classified reliably"
    ))]
    LivenessUnderBounding,
}

// TESTS
// ================================================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounding_disables_unsound_optimizations() {
        let opts = VerificationOptions::new(MemoryModel::Rc11)
            .with_symmetry_reduction(true)
            .with_bound(BoundType::Context, 2)
            .validate()
            .expect("valid options");
        assert!(!opts.ipr());
        assert!(!opts.symmetry_reduction());
        assert!(!opts.bam());
    }

    #[test]
    fn zero_bound_is_rejected() {
        let err = VerificationOptions::default().with_bound(BoundType::Round, 0).validate();
        assert!(matches!(err, Err(VerificationOptionsError::ZeroBound)));
    }

    #[test]
    fn helper_requires_ipr() {
        let err = VerificationOptions::default()
            .with_helper(true)
            .with_ipr(false)
            .validate();
        assert!(matches!(err, Err(VerificationOptionsError::HelperRequiresIpr)));
    }
}

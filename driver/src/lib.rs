//! The execution-graph exploration engine of the Kestrel model checker.
//!
//! Given a program that an [`Interpreter`] can single-step, the [`Driver`] enumerates every
//! observably distinct execution the chosen memory model admits, reporting data races,
//! invalid accesses, deadlocks and assertion violations along the way. Exploration is
//! stateless in the DPOR sense: one execution lives in memory at a time (per worker), and
//! alternatives are revisited by restricting the execution graph and replaying.
//!
//! The crate's surface mirrors the architecture: [`verify`] / [`estimate`] /
//! [`verify_parallel`] are the entry points, [`VerificationOptions`] configures them, and
//! [`VerificationResult`] is what comes back.

mod bound;
mod choices;
mod config;
mod driver;
mod errors;
mod explore;
mod interp;
mod pool;
mod result;
mod revisit;
mod scheduler;

#[cfg(test)]
mod test_utils;

#[cfg(test)]
mod tests;

// RE-EXPORTS
// ================================================================================================

pub use kestrel_checker::MemoryModel;

pub use crate::{
    bound::{BoundDecider, BoundStrategy},
    config::{BoundType, SchedulePolicy, VerificationOptions, VerificationOptionsError},
    driver::{Driver, Execution, Mode},
    errors::{ErrorDetails, VerificationError},
    explore::{estimate, verify, verify_parallel},
    interp::{HandleResult, Interpreter, LoadRequest, MemorySource, StoreRequest},
    result::VerificationResult,
    revisit::{Revisit, WorkList},
    scheduler::Scheduler,
};

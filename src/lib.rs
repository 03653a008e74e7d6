//! Long-run classification of small Turing machines without running them
//! step by step.
//!
//! Nearly every small machine either stops quickly or falls into a
//! provably eternal pattern; the point of this crate is deciding both
//! extremes without executing billions (or towers-of-exponents) of
//! elementary transitions. The pieces, leaf to root:
//!
//! - [`core::count`]: exact symbolic integers with modular reduction, for
//!   step counts and run lengths too large to materialize.
//! - [`core::tape`]: a run-length tape that crosses a whole run of equal
//!   cells in one move.
//! - [`provers::macro_machine`]: lazily compiled transition tables whose
//!   single transition stands for many base steps.
//! - [`provers::prover`]: detection of repeating tape shapes, induction of
//!   per-block growth laws, and their closed-form application.
//! - [`core::history`]: proof of exact periodic repetition (and of
//!   quasi-halting, where states drop out of the loop).
//! - [`simulator`]: the step loop tying it together and classifying the
//!   outcome.
//!
//! Everything is per-run: one description in, one [`simulator::RunReport`]
//! out, no state shared between runs.

pub mod core;
pub mod provers;
pub mod simulator;

pub use crate::core::{Count, Machine, Program};
pub use crate::simulator::{run_prover, run_recurrence, RunOutcome, RunReport};

//! Define the hard, per-run limits on our simulation and proof search space.

/// A tape color (macro colors can be as large as `colors^cells`).
pub type Color = u64;
/// A number indexing a machine state (macro states grow the same way).
pub type State = u64;
/// A head movement: `true` is rightward.
pub type Shift = bool;

/// A `(state, scanned color)` pair, the key of the instruction table.
pub type Slot = (State, Color);
/// What a filled table slot holds: color to write, shift, next state.
pub type Instr = (Color, Shift, State);

/// The designated terminal pseudo-state ("halt target").
pub const HALT: State = State::MAX;

/// How many distinct signatures one run may cache before proving is abandoned.
pub const CONFIG_CACHE_LIMIT: usize = 10_000;
/// Cycle deltas beyond this are not worth re-simulating to sample a rule.
pub const DELTA_LIMIT: u64 = 90_000;
/// A count whose expression tree has more leaves than this aborts proving.
pub const RULE_LEAF_LIMIT: usize = 120;
/// Multiplicative-order searches in modular reduction give up past this.
pub const ORDER_SEARCH_LIMIT: u64 = 1 << 20;
/// Exponents at or below this are folded to literals instead of kept symbolic.
pub const EXP_FOLD_LIMIT: u64 = 16;

//! The data model: machine descriptions, symbolic counts, the run-length
//! tape, and the recurrence history.

pub mod count;
pub mod history;
pub mod limits;
pub mod machine;
pub mod tape;

pub use count::{Count, CountError};
pub use history::{History, Recurrence};
pub use limits::{
    Color, Instr, Shift, Slot, State, CONFIG_CACHE_LIMIT, DELTA_LIMIT, EXP_FOLD_LIMIT, HALT,
    ORDER_SEARCH_LIMIT, RULE_LEAF_LIMIT,
};
pub use machine::{BadMachineText, Machine, Program};
pub use tape::{
    Block, ColorRun, HeadTape, Index, IndexTape, MinSig, Pos, RawTape, Signature, SimTape, Tape,
    TracedTape,
};

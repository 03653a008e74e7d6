//! The reasoning engines layered over the data model: the macro compiler
//! and the rule-induction prover with its growth laws.

pub mod macro_machine;
pub mod prover;
pub mod rules;

pub use macro_machine::{
    make_backsymbol_macro, make_block_macro, BacksymbolFold, BlockFold, MacroMachine,
};
pub use prover::{Prover, ProverVerdict};
pub use rules::{make_rule, ApplyRule, Counts, Op, PrimOp, Rule, RuleFail};

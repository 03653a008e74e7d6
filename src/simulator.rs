//! The step loop: drive one machine description from the blank tape to a
//! terminal classification.
//!
//! Two entry points, matching the two ways a run can be decided. The
//! prover run works on the compressed tape, consults the rule prover
//! before every cycle, and leaps over proved cycles in closed form; it
//! settles halts, spin-outs, erasures, and proofs of eternal growth. The
//! recurrence run steps elementarily with a position-tracking tape and
//! feeds the history detector, settling exact periodic repetition and
//! quasi-halts. Exceeding a budget is a reportable outcome, not an error.

use crate::core::{
    Count, HeadTape, History, Program, Slot, State, Tape, HALT,
};
use crate::provers::{ApplyRule as _, Prover, ProverVerdict, RuleFail};
use serde::Serialize;
use std::collections::BTreeSet;

/// How a run ended.
#[derive(Serialize, Clone, Debug, Eq, PartialEq)]
pub enum RunOutcome {
    /// Reached the halt target.
    Halted,
    /// Entered a self-loop at the written tape's edge: an eternal
    /// one-directional walk.
    SpunOut,
    /// Returned to a blank tape in a state that had already seen one.
    Blanked { states: Vec<State> },
    /// Exact periodic repetition with every state still visited.
    Recurred { start: usize, period: usize },
    /// Eternal looping that leaves some states permanently unreachable.
    QuasiHalted { start: usize, period: usize },
    /// A proved rule never decreases any block: the machine runs forever.
    InfiniteRule,
    /// The description has no instruction for this slot.
    Undefined { slot: Slot },
    /// Budget exhausted without a verdict. Not a proof of anything.
    StepLimited,
}

/// A finished run: the verdict plus the counters every caller wants.
#[derive(Serialize, Debug)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub steps: Count,
    pub marks: Count,
    pub cycles: u64,
}

use RunOutcome::*;

/**************************************/

/// Run with the rule prover, up to `sim_lim` cycles. A cycle is one
/// accelerated transition: a single step, a run-crossing skip, or a whole
/// proved rule application.
pub fn run_prover(prog: &impl Program, sim_lim: u64) -> RunReport {
    let mut tape = Tape::init();
    let mut prover = Prover::new(prog);

    let mut proving = true;
    let mut state: State = 0;
    let mut steps = Count::zero();

    let mut blanks: BTreeSet<State> = BTreeSet::new();

    let report = |outcome, steps, marks, cycles| RunReport {
        outcome,
        steps,
        marks,
        cycles,
    };

    for cycle in 0..sim_lim {
        if proving {
            match prover.try_rule(cycle, state, &tape) {
                None => {},
                Some(ProverVerdict::ConfigLimit) => {
                    log::debug!("config cache full; proving disabled");
                    proving = false;
                },
                Some(ProverVerdict::InfiniteRule) => {
                    return report(InfiniteRule, steps, tape.marks(), cycle);
                },
                Some(ProverVerdict::Got(rule)) => match tape.apply_rule(&rule) {
                    Ok(times) => {
                        steps += times;
                        continue;
                    },
                    Err(RuleFail::Inapplicable) => {},
                    Err(RuleFail::Limit) => {
                        log::debug!("expression budget hit; proving disabled");
                        proving = false;
                    },
                },
            }
        }

        let slot = (state, tape.scan);

        let Some((color, shift, next_state)) = prog.instr(slot) else {
            return report(Undefined { slot }, steps, tape.marks(), cycle);
        };

        let same = state == next_state;

        if same && tape.at_edge(shift) {
            return report(SpunOut, steps, tape.marks(), cycle);
        }

        steps += tape.step(shift, color, same);
        state = next_state;

        if state == HALT {
            return report(Halted, steps, tape.marks(), cycle);
        }

        if tape.blank() && !blanks.insert(state) {
            let states = blanks.into_iter().collect();
            return report(Blanked { states }, steps, tape.marks(), cycle);
        }
    }

    report(StepLimited, steps, tape.marks(), sim_lim)
}

/**************************************/

/// Run elementarily, feeding the recurrence detector. Snapshots are only
/// kept from step `settle` on; the detector needs them, and the cheap
/// early steps are not worth storing.
pub fn run_recurrence(prog: &impl Program, sim_lim: usize, settle: usize) -> RunReport {
    let mut tape = HeadTape::init();
    let mut history = History::new();

    let mut state: State = 0;
    let mut steps: u64 = 0;

    let report = |outcome, steps: u64, marks| RunReport {
        outcome,
        steps: Count::from(steps),
        marks,
        cycles: steps,
    };

    for step in 0..sim_lim {
        history.record(state, tape.head());

        let slot = (state, tape.scan());

        if step >= settle {
            history.add_snapshot(step, slot, &tape);

            if let Some((start, period)) = history.check_recurrence(step, slot) {
                let outcome = if history.quasihalt(start) {
                    QuasiHalted { start, period }
                } else {
                    Recurred { start, period }
                };

                return report(outcome, steps, tape.marks());
            }
        }

        let Some((color, shift, next_state)) = prog.instr(slot) else {
            return report(Undefined { slot }, steps, tape.marks());
        };

        if state == next_state && tape.at_edge(shift) {
            return report(SpunOut, steps, tape.marks());
        }

        // No skip: the detector's bookkeeping is per elementary step.
        steps += tape.step(shift, color, false);
        state = next_state;

        if state == HALT {
            return report(Halted, steps, tape.marks());
        }

        if tape.blank() {
            return report(Blanked { states: vec![state] }, steps, tape.marks());
        }
    }

    report(StepLimited, steps, tape.marks())
}

/**************************************/

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Machine;
    use crate::provers::make_block_macro;
    use num_bigint::BigInt;
    use std::cmp::Ordering;

    fn machine(text: &str) -> Machine {
        text.parse().unwrap()
    }

    #[test]
    fn test_halts_in_one_step() {
        let report = run_prover(&machine("1R_ ...  ... ..."), 100);

        assert_eq!(report.outcome, RunOutcome::Halted);
        assert_eq!(report.steps, Count::from(1u64));
        assert_eq!(report.marks, Count::from(1u64));
    }

    #[test]
    fn test_bb3_shift_champion() {
        // Halts after exactly 21 steps leaving 5 marks.
        let bb3 = machine("1RB 1R_  1LB 0RC  1LC 1LA");

        let exact = run_recurrence(&bb3, 100, usize::MAX);

        assert_eq!(exact.outcome, RunOutcome::Halted);
        assert_eq!(exact.steps, Count::from(21u64));
        assert_eq!(exact.marks, Count::from(5u64));

        let accelerated = run_prover(&bb3, 100);

        assert_eq!(accelerated.outcome, RunOutcome::Halted);
        assert_eq!(accelerated.marks, Count::from(5u64));

        // The same table with the halt slot left unfilled reports the gap.
        let gapped = run_recurrence(&machine("1RB ...  1LB 0RC  1LC 1LA"), 100, usize::MAX);

        assert_eq!(gapped.outcome, RunOutcome::Undefined { slot: (0, 1) });
        assert_eq!(gapped.marks, Count::from(5u64));
    }

    #[test]
    fn test_recurrence_within_horizon() {
        let report = run_recurrence(&machine("1RB 0LB  1LA 0RB"), 60, 0);

        assert_eq!(
            report.outcome,
            RunOutcome::Recurred { start: 9, period: 3 },
        );
    }

    #[test]
    fn test_quasihalt() {
        let report = run_recurrence(&machine("1RB ...  1LB 0LC  1RC 1RB"), 100, 0);

        assert_eq!(
            report.outcome,
            RunOutcome::QuasiHalted { start: 5, period: 13 },
        );
    }

    #[test]
    fn test_spin_out() {
        // B0 is a self-loop; it reaches the right edge immediately.
        let report = run_prover(&machine("1RB ...  1RB 0LA"), 100);

        assert_eq!(report.outcome, RunOutcome::SpunOut);
    }

    #[test]
    fn test_blanked() {
        let report = run_prover(&machine("1RB 0RB  0LA ..."), 100);

        let RunOutcome::Blanked { states } = &report.outcome else {
            panic!("expected erasure, got {:?}", report.outcome);
        };

        assert_eq!(states, &vec![0, 1]);
        assert_eq!(report.steps, Count::from(7u64));
    }

    #[test]
    fn test_infinite_rule() {
        // A two-cell shuttle: the same signature recurs every other cycle
        // with nothing changing, so the prover's fitted rule has no
        // decreasing block.
        let report = run_prover(&machine("1RB 1RB  1LA 1LA"), 100);

        assert_eq!(report.outcome, RunOutcome::InfiniteRule);
        assert!(report.cycles <= 20, "should settle quickly");
    }

    #[test]
    fn test_accelerated_spin_out_grows_huge() {
        // Published result: spins out after 222 + 11 * 2^41 steps with the
        // tape erased. The run must settle in a few hundred cycles, which
        // is only possible if run-length skips and proved rules carry it
        // across the doublings.
        let report = run_prover(&machine("1RB 0LB 1LA  2LC 0LB 2LB  2RC 2RA 0LC"), 5_000);

        assert_eq!(report.outcome, RunOutcome::SpunOut);
        assert_eq!(
            report.steps.cmp_int(&BigInt::from(1_000_000_000u64)),
            Ordering::Greater,
        );
    }

    #[test]
    fn test_macro_outcome_equivalence() {
        // Halts after 107 steps with 13 marks.
        let bb4 = machine("1RB 1LB  1LA 0LC  1R_ 1LD  1RD 0RA");

        let base = run_recurrence(&bb4, 1_000, usize::MAX);

        assert_eq!(base.outcome, RunOutcome::Halted);
        assert_eq!(base.steps, Count::from(107u64));
        assert_eq!(base.marks, Count::from(13u64));

        // A 1-cell block macro is the base machine with the entry edge
        // folded into the state: same verdict at the same step count.
        let block_1 = make_block_macro(&bb4, (4, 2), 1);
        let one = run_recurrence(&block_1, 1_000, usize::MAX);

        assert_eq!(one.outcome, RunOutcome::Halted);
        assert_eq!(one.steps, Count::from(107u64));

        // Wider blocks change the units but not the verdict.
        for cells in [2, 3] {
            let block = make_block_macro(&bb4, (4, 2), cells);
            let report = run_prover(&block, 10_000);

            assert_eq!(
                report.outcome,
                RunOutcome::Halted,
                "{cells}-cell macro",
            );
        }
    }

    #[test]
    fn test_report_serialization() {
        let report = run_prover(&machine("1R_ ...  ... ..."), 100);

        let json = serde_json::to_string(&report).unwrap();

        assert!(json.contains("\"outcome\":\"Halted\""));
        assert!(json.contains("\"steps\":\"1\""));
    }
}

//! The rule-induction engine. Watches for a signature recurring at cycle
//! gaps that extrapolate cleanly, re-simulates the gap three times to
//! sample how every block count moves, fits the samples to a growth law,
//! confirms the law by replaying it against an independent clone, and only
//! then hands the caller a rule it may apply.
//!
//! Everything here is per-run state; a prover is built fresh for each
//! machine description and dropped with it.

use super::rules::{make_rule, ApplyRule as _, Rule, RuleFail};
use crate::core::tape::SimTape;
use crate::core::{
    MinSig, Program, Signature, Slot, State, Tape, TracedTape, CONFIG_CACHE_LIMIT, DELTA_LIMIT,
    HALT,
};
use ahash::AHashMap;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

pub enum ProverVerdict {
    /// Too many distinct signatures; stop proving for this run.
    ConfigLimit,
    /// The fitted rule never decreases anything: proof of eternal growth.
    InfiniteRule,
    /// A confirmed rule for the current configuration.
    Got(Rule),
}

pub struct Prover<'p, P: Program> {
    prog: &'p P,

    /// Confirmed rules, keyed by slot, guarded by their minimized signature.
    rules: BTreeMap<Slot, Vec<(MinSig, Rule)>>,

    /// Signatures seen this run, with the cycles they were seen at.
    configs: AHashMap<Signature, PastConfigs>,
}

impl<'p, P: Program> Prover<'p, P> {
    pub fn new(prog: &'p P) -> Self {
        Prover {
            prog,
            rules: BTreeMap::new(),
            configs: AHashMap::new(),
        }
    }

    fn get_rule(&self, slot: Slot, sig: &Signature) -> Option<&Rule> {
        self.rules
            .get(&slot)?
            .iter()
            .find(|(min_sig, _)| sig.matches(min_sig))
            .map(|(_, rule)| rule)
    }

    /// Run `cycles` cycles forward on any tape flavor, applying already
    /// confirmed rules where they match. `None` if the table runs out or a
    /// count blows the budget.
    fn replay(&self, cycles: u64, mut state: State, tape: &mut impl SimTape) -> Option<State> {
        for _ in 0..cycles {
            let sig = tape.signature();

            if let Some(rule) = self.get_rule((state, tape.scan()), &sig) {
                match tape.apply_rule(rule) {
                    Ok(_) => continue,
                    Err(RuleFail::Inapplicable) => {},
                    Err(RuleFail::Limit) => return None,
                }
            }

            let (color, shift, next_state) = self.prog.instr((state, tape.scan()))?;

            if next_state == HALT {
                return None;
            }

            tape.step(shift, color, state == next_state);

            state = next_state;
        }

        Some(state)
    }

    /// The per-cycle hook: look up a confirmed rule for the current
    /// configuration, or try to prove one.
    pub fn try_rule(&mut self, cycle: u64, state: State, tape: &Tape) -> Option<ProverVerdict> {
        let sig = tape.signature();

        if let Some(known) = self.get_rule((state, tape.scan), &sig) {
            return Some(ProverVerdict::Got(known.clone()));
        }

        if !self.configs.contains_key(&sig) {
            if self.configs.len() >= CONFIG_CACHE_LIMIT {
                return Some(ProverVerdict::ConfigLimit);
            }

            self.configs.insert(sig, PastConfigs::new(state, cycle));

            return None;
        }

        let deltas = self.configs.get_mut(&sig)?.next_deltas(state, cycle)?;

        if deltas.iter().any(|&delta| delta > DELTA_LIMIT) {
            return None;
        }

        // Sample the next three sightings without committing the real tape.
        let mut probe = tape.clone();
        let mut counts = vec![tape.counts()];
        let mut first_pass: Option<Tape> = None;

        for (i, &delta) in deltas.iter().enumerate() {
            if self.replay(delta, state, &mut probe)? != state || !probe.sig_compatible(&sig) {
                return None;
            }

            counts.push(probe.counts());

            if i == 0 {
                first_pass = Some(probe.clone());
            }
        }

        let rule = make_rule(&counts[0], &counts[1], &counts[2], &counts[3])?;

        if rule.is_infinite() {
            log::debug!("infinite rule at slot ({state}, {})", tape.scan);
            return Some(ProverVerdict::InfiniteRule);
        }

        // Confirm: one application must reproduce the first sampled pass.
        let mut check = tape.clone();

        if check.apply_once(&rule).is_err() || Some(check.counts()) != first_pass.map(|t| t.counts())
        {
            return None;
        }

        // Minimize the signature the rule is pinned to: only the spans the
        // cycle actually reads need to match in the future.
        let mut traced = TracedTape::from(tape);

        self.replay(deltas[0], state, &mut traced)?;

        let min_sig = traced.min_sig(&sig);

        self.configs.get_mut(&sig)?.delete_configs(state);

        log::debug!("proved rule at slot ({state}, {}): {rule:?}", tape.scan);

        self.rules
            .entry((state, tape.scan))
            .or_default()
            .push((min_sig, rule.clone()));

        Some(ProverVerdict::Got(rule))
    }
}

/**************************************/

const PAST_WINDOW: usize = 5;

/// Cycle numbers at which one state saw one signature, with quadratic
/// extrapolation of the next three gaps.
struct PastConfig {
    cycles: Vec<u64>,
}

impl PastConfig {
    fn new(cycle: u64) -> Self {
        let mut cycles = Vec::with_capacity(PAST_WINDOW);
        cycles.push(cycle);

        PastConfig { cycles }
    }

    /// With five sightings, look for gaps following a second-difference
    /// pattern at strides 1 through 4, and predict the next three gaps.
    fn next_deltas(&mut self, cycle: u64) -> Option<[u64; 3]> {
        self.cycles.push(cycle);

        if self.cycles.len() < PAST_WINDOW {
            return None;
        }

        let [e, d, c, b, a] = [
            self.cycles[0] as i64,
            self.cycles[1] as i64,
            self.cycles[2] as i64,
            self.cycles[3] as i64,
            self.cycles[4] as i64,
        ];

        self.cycles.remove(0);

        for i in 1..=4 {
            let p1 = a - b * i;
            let p2 = b - c * i;

            let diff = p1 - p2;

            if c - d * i != p2 - diff || d - e * i != (c - d * i) - diff {
                continue;
            }

            let nxt1 = a * i + p1 + diff;
            let nxt2 = nxt1 * i + p1 + 2 * diff;
            let nxt3 = nxt2 * i + p1 + 3 * diff;

            if a > nxt1 || nxt1 > nxt2 || nxt2 > nxt3 {
                return None;
            }

            return Some([
                (nxt1 - a) as u64,
                (nxt2 - nxt1) as u64,
                (nxt3 - nxt2) as u64,
            ]);
        }

        None
    }
}

/// Per-signature sighting records, one per state.
pub struct PastConfigs {
    per_state: BTreeMap<State, PastConfig>,
}

impl PastConfigs {
    fn new(state: State, cycle: u64) -> Self {
        PastConfigs {
            per_state: BTreeMap::from([(state, PastConfig::new(cycle))]),
        }
    }

    fn next_deltas(&mut self, state: State, cycle: u64) -> Option<[u64; 3]> {
        match self.per_state.entry(state) {
            Entry::Occupied(mut seen) => seen.get_mut().next_deltas(cycle),
            Entry::Vacant(fresh) => {
                fresh.insert(PastConfig::new(cycle));
                None
            },
        }
    }

    /// A rule was confirmed for this state; its sightings are spent.
    fn delete_configs(&mut self, state: State) {
        self.per_state.remove(&state);
    }
}

/**************************************/

#[cfg(test)]
mod tests {
    use super::super::rules::Op;
    use super::*;
    use crate::core::tape::{Block, ColorRun, SimTape, SpanBlock as _};
    use crate::core::{Count, Machine};
    use num_bigint::BigInt;

    #[test]
    fn test_constant_gaps() {
        let mut config = PastConfig::new(1);

        for cycle in [3, 5, 7] {
            assert_eq!(config.next_deltas(cycle), None);
        }

        assert_eq!(config.next_deltas(9), Some([2, 2, 2]));
    }

    #[test]
    fn test_geometric_gaps() {
        let mut config = PastConfig::new(1);

        for cycle in [2, 4, 8] {
            assert_eq!(config.next_deltas(cycle), None);
        }

        // Doubling cycles match stride 2.
        assert_eq!(config.next_deltas(16), Some([16, 32, 64]));
    }

    #[test]
    fn test_ragged_gaps_rejected() {
        let mut config = PastConfig::new(1);

        for cycle in [2, 5, 6] {
            assert_eq!(config.next_deltas(cycle), None);
        }

        assert_eq!(config.next_deltas(12), None);
    }

    #[test]
    fn test_rule_lookup_ignores_counts() {
        let machine: Machine = "1RB ...  1LB 0RC  1LC 1LA".parse().unwrap();
        let mut prover = Prover::new(&machine);

        let min_sig: MinSig = (
            Signature {
                scan: 0,
                lspan: vec![ColorRun::Many(1)],
                rspan: vec![],
            },
            (false, false),
        );

        let rule = Rule::from_ops(&[((false, 0), Op::Plus(BigInt::from(2)))]);

        prover.rules.insert((1, 0), vec![(min_sig, rule)]);

        let small = Tape::from_blocks(0, vec![Block::make(1, Count::from(5u64))], vec![]);
        let large = Tape::from_blocks(0, vec![Block::make(1, Count::from(500_000u64))], vec![]);

        // Same signature, wildly different counts: same decision.
        for tape in [&small, &large] {
            assert!(prover.get_rule((1, 0), &SimTape::signature(tape)).is_some());
            assert!(prover.get_rule((2, 0), &SimTape::signature(tape)).is_none());
        }

        let wrong_shape = Tape::from_blocks(1, vec![Block::make(1, Count::from(5u64))], vec![]);
        assert!(prover
            .get_rule((1, 1), &SimTape::signature(&wrong_shape))
            .is_none());
    }
}

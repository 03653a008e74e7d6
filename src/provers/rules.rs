//! Per-block growth laws and their closed-form application.
//!
//! A rule maps block positions to how their counts change across one
//! traversal of a detected cycle: a fixed increment, an affine
//! `mul * count + add` law, or (for counts that are already symbolic) an
//! ordered sequence of primitive operations peeled off the expressions
//! themselves. Applying a rule computes the number of whole cycles before
//! any decreasing block underflows and jumps every count there in one shot.

use crate::core::count::{difference, power, product, quotient, sum, Term};
use crate::core::{Count, CountError, Index, IndexTape, RULE_LEAF_LIMIT};
use num_bigint::BigInt;
use num_integer::Integer as _;
use num_traits::{Signed, ToPrimitive, Zero};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use thiserror::Error;

/// Count lists for both sides, nearest-first, as `Tape::counts` yields them.
pub type Counts = (Vec<Count>, Vec<Count>);

#[derive(Error, Debug, Eq, PartialEq)]
pub enum RuleFail {
    /// The rule holds but cannot advance this tape (nothing to decrease,
    /// or a peel does not divide). The caller just steps normally.
    #[error("rule does not apply to this tape")]
    Inapplicable,
    /// A count outgrew the expression budget or two symbolic bounds could
    /// not be ordered. The caller abandons proving for the rest of the run.
    #[error("expression budget exceeded")]
    Limit,
}

impl From<CountError> for RuleFail {
    fn from(_: CountError) -> Self {
        RuleFail::Limit
    }
}

/**************************************/

/// A primitive transformation of one count, applied left to right.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PrimOp {
    Add(i64),
    Mul(u64),
    Div(u64),
    /// The count becomes the exponent: `c -> base^c`.
    Exp(u64),
    /// Descend through an exponent: `base^e -> e`.
    Log(u64),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Op {
    Plus(BigInt),
    Mult(u64, BigInt),
    Seq(Vec<PrimOp>),
}

/// A confirmed growth law, one op per changing block.
#[derive(Clone, Debug, Default)]
pub struct Rule(BTreeMap<Index, Op>);

impl Rule {
    /// No block ever decreases: the cycle repeats forever, which proves
    /// the machine never halts by this path.
    pub fn is_infinite(&self) -> bool {
        self.0.values().all(|op| match op {
            Op::Plus(diff) => !diff.is_negative(),
            Op::Mult(..) => true,
            Op::Seq(_) => false,
        })
    }

    fn has_seq(&self) -> bool {
        self.0.values().any(|op| matches!(op, Op::Seq(_)))
    }

    #[cfg(test)]
    pub fn from_ops(ops: &[(Index, Op)]) -> Self {
        Rule(ops.iter().cloned().collect())
    }
}

/**************************************/

enum Fit {
    NoChange,
    Got(Op),
    Unknown,
}

/// Fit one block's four sampled counts to a supported law.
fn fit(a: &Count, b: &Count, c: &Count, d: &Count) -> Fit {
    if a == b && b == c && c == d {
        return Fit::NoChange;
    }

    if let (Some(a), Some(b), Some(c), Some(d)) =
        (a.as_int(), b.as_int(), c.as_int(), d.as_int())
    {
        let diff = b - a;

        if diff == c - b && diff == d - c {
            return Fit::Got(Op::Plus(diff));
        }

        if !a.is_zero() && !b.is_zero() && !c.is_zero() {
            let divmod = b.div_mod_floor(a);

            if divmod == c.div_mod_floor(b) && divmod == d.div_mod_floor(c) {
                let (mul, add) = divmod;

                if let Some(mul) = mul.to_u64().filter(|&m| m >= 2) {
                    return Fit::Got(Op::Mult(mul, add));
                }
            }
        }

        return Fit::Unknown;
    }

    // Symbolic samples: try to express the change structurally and check
    // that the same operations carry each sample to the next. Both peel
    // orders are tried; only a sequence the samples confirm survives.
    for outside_in in [false, true] {
        let Some(ops) = fit_ops(a, b, 12, outside_in) else {
            continue;
        };

        let holds = |x: &Count, y: &Count| {
            apply_ops(x.clone(), &ops).is_ok_and(|applied| applied == *y)
        };

        if holds(b, c) && holds(c, d) {
            return Fit::Got(Op::Seq(ops));
        }
    }

    Fit::Unknown
}

/// Peel the outermost layer of the target, recording the op that rebuilds it.
fn peel_target(b: &Count) -> Option<(&Count, PrimOp)> {
    let Count::Sym(term) = b else { return None };

    match &**term {
        Term::Add(Count::Int(k), r) => Some((r, PrimOp::Add(k.to_i64()?))),
        Term::Mul(Count::Int(k), r) => Some((r, PrimOp::Mul(k.to_u64()?))),
        Term::Div(n, d) => Some((n, PrimOp::Div(*d))),
        Term::Exp(base, e) => Some((e, PrimOp::Exp(*base))),
        _ => None,
    }
}

/// Peel the outermost layer of the source, recording the inverse op.
fn peel_source(a: &Count) -> Option<(&Count, PrimOp)> {
    let Count::Sym(term) = a else { return None };

    match &**term {
        Term::Add(Count::Int(k), r) => Some((r, PrimOp::Add(k.to_i64()?.checked_neg()?))),
        Term::Mul(Count::Int(k), r) => Some((r, PrimOp::Div(k.to_u64()?))),
        Term::Div(n, d) => Some((n, PrimOp::Mul(*d))),
        Term::Exp(base, e) => Some((e, PrimOp::Log(*base))),
        _ => None,
    }
}

/// Operations carrying `a` to `b`, found by peeling layers off both
/// expressions until they align. `source_first` flips which side is
/// peeled preferentially, which matters when either order would align.
fn fit_ops(a: &Count, b: &Count, budget: usize, source_first: bool) -> Option<Vec<PrimOp>> {
    if a == b {
        return Some(vec![]);
    }

    if budget == 0 {
        return None;
    }

    let try_target = |budget: usize| {
        peel_target(b).and_then(|(inner, op)| {
            let mut ops = fit_ops(a, inner, budget, source_first)?;
            ops.push(op);
            Some(ops)
        })
    };

    let try_source = |budget: usize| {
        peel_source(a).and_then(|(inner, op)| {
            let ops = fit_ops(inner, b, budget, source_first)?;
            let mut full = vec![op];
            full.extend(ops);
            Some(full)
        })
    };

    if source_first {
        try_source(budget - 1).or_else(|| try_target(budget - 1))
    } else {
        try_target(budget - 1).or_else(|| try_source(budget - 1))
    }
}

/// Fit four count samples (original plus three re-simulated) to a rule.
/// `None` means some block's growth fits no supported law.
pub fn make_rule(c0: &Counts, c1: &Counts, c2: &Counts, c3: &Counts) -> Option<Rule> {
    let mut rule = Rule::default();

    for (side, quads) in [
        (false, (&c0.0, &c1.0, &c2.0, &c3.0)),
        (true, (&c0.1, &c1.1, &c2.1, &c3.1)),
    ] {
        let (a, b, c, d) = quads;

        for (pos, (((a, b), c), d)) in
            a.iter().zip(b.iter()).zip(c.iter()).zip(d.iter()).enumerate()
        {
            match fit(a, b, c, d) {
                Fit::NoChange => {},
                Fit::Unknown => return None,
                Fit::Got(op) => {
                    rule.0.insert((side, pos), op);
                },
            }
        }
    }

    Some(rule)
}

/**************************************/

fn apply_plus(count: &Count, times: &Count, diff: &BigInt) -> Count {
    sum(count.clone(), product(Count::from(diff.clone()), times.clone()))
}

/// `count -> mul^n * count + add * (mul^n - 1) / (mul - 1)` in closed form.
fn apply_mult(count: &Count, times: &Count, mul: u64, add: &BigInt) -> Result<Count, RuleFail> {
    if mul < 2 {
        return Err(RuleFail::Inapplicable);
    }

    let term = power(mul, times.clone());

    let geometric = sum(
        Count::from(1u64),
        quotient(difference(term.clone(), Count::from(mul)), mul - 1),
    );

    Ok(sum(
        product(count.clone(), term),
        product(Count::from(add.clone()), geometric),
    ))
}

fn apply_ops(mut count: Count, ops: &[PrimOp]) -> Result<Count, RuleFail> {
    for op in ops {
        count = match op {
            PrimOp::Add(k) => sum(count, Count::from(*k)),
            PrimOp::Mul(k) => product(count, Count::from(*k)),
            PrimOp::Div(k) => {
                if count.modulo(*k)? != 0 {
                    return Err(RuleFail::Inapplicable);
                }

                quotient(count, *k)
            },
            PrimOp::Exp(base) => power(*base, count),
            PrimOp::Log(base) => descend(count, *base)?,
        };
    }

    Ok(count)
}

/// Invert `base^e`: recover `e`.
fn descend(count: Count, base: u64) -> Result<Count, RuleFail> {
    match &count {
        Count::Sym(term) => {
            if let Term::Exp(b, e) = &**term {
                if *b == base {
                    return Ok(e.clone());
                }
            }

            Err(RuleFail::Inapplicable)
        },
        Count::Int(x) => {
            let mut x = x.clone();
            let big_base = BigInt::from(base);
            let mut log = 0u64;

            while x > BigInt::from(1u64) && (&x % &big_base).is_zero() {
                x /= &big_base;
                log += 1;
            }

            if x == BigInt::from(1u64) {
                Ok(Count::from(log))
            } else {
                Err(RuleFail::Inapplicable)
            }
        },
    }
}

/**************************************/

pub trait ApplyRule: IndexTape {
    /// Apply a confirmed rule for as many whole cycles as the decreasing
    /// blocks allow, updating every count in closed form. Returns the
    /// number of cycles skipped.
    fn apply_rule(&mut self, rule: &Rule) -> Result<Count, RuleFail> {
        let (times, min_pos, min_res) = self.count_apps(rule)?;

        // Op sequences have no closed form over n cycles; take one.
        let times = if rule.has_seq() { Count::from(1u64) } else { times };

        let mut updates = vec![];

        for (pos, op) in &rule.0 {
            let count = self.get_count(*pos).clone();

            let next = match op {
                Op::Plus(diff) => {
                    if *pos == min_pos && !rule.has_seq() {
                        min_res.clone()
                    } else {
                        apply_plus(&count, &times, diff)
                    }
                },
                Op::Mult(mul, add) => apply_mult(&count, &times, *mul, add)?,
                Op::Seq(ops) => apply_ops(count, ops)?,
            };

            if next.leaves() > RULE_LEAF_LIMIT {
                return Err(RuleFail::Limit);
            }

            updates.push((*pos, next));
        }

        for (pos, val) in updates {
            self.set_count(pos, val);
        }

        Ok(times)
    }

    /// Apply the rule for exactly one cycle. Used to confirm a freshly
    /// fitted rule against an actually simulated pass before trusting it.
    fn apply_once(&mut self, rule: &Rule) -> Result<(), RuleFail> {
        let once = Count::from(1u64);

        let mut updates = vec![];

        for (pos, op) in &rule.0 {
            let count = self.get_count(*pos).clone();

            let next = match op {
                Op::Plus(diff) => apply_plus(&count, &once, diff),
                Op::Mult(mul, add) => apply_mult(&count, &once, *mul, add)?,
                Op::Seq(ops) => apply_ops(count, ops)?,
            };

            updates.push((*pos, next));
        }

        for (pos, val) in updates {
            self.set_count(pos, val);
        }

        Ok(())
    }

    /// The tightest underflow bound over all decreasing blocks: how many
    /// whole cycles fit, which block bottoms out, and at what residue.
    fn count_apps(&self, rule: &Rule) -> Result<(Count, Index, Count), RuleFail> {
        let mut apps: Option<(Count, Index, Count)> = None;

        for (pos, op) in &rule.0 {
            let Op::Plus(diff) = op else { continue };

            if !diff.is_negative() {
                continue;
            }

            let absdiff = (-diff).to_u64().ok_or(RuleFail::Inapplicable)?;

            let count = self.get_count(*pos);

            if count.cmp_int(&BigInt::from(absdiff)) != Ordering::Greater {
                return Err(RuleFail::Inapplicable);
            }

            let (div, rem) = count.div_rem(absdiff)?;

            let (times, min_res) = if rem == 0 {
                (
                    difference(div, Count::from(1u64)),
                    Count::from(absdiff),
                )
            } else {
                (div, Count::from(rem))
            };

            match &apps {
                None => apps = Some((times, *pos, min_res)),
                Some((least, ..)) => match times.try_cmp(least) {
                    Ok(Ordering::Less) => apps = Some((times, *pos, min_res)),
                    Ok(_) => {},
                    // Two incomparable symbolic bounds: fail loudly, the
                    // caller turns acceleration off.
                    Err(_) => return Err(RuleFail::Limit),
                },
            }
        }

        apps.ok_or(RuleFail::Inapplicable)
    }
}

impl<T: IndexTape> ApplyRule for T {}

/**************************************/

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tape::{Block, SimTape, SpanBlock as _};
    use crate::core::Tape;

    fn tape(scan: u64, lspan: &[(u64, u64)], rspan: &[(u64, u64)]) -> Tape {
        let blocks = |side: &[(u64, u64)]| {
            side.iter()
                .map(|&(color, count)| Block::make(color, Count::from(count)))
                .collect()
        };

        Tape::from_blocks(scan, blocks(lspan), blocks(rspan))
    }

    fn counts_of(vals: (&[u64], &[u64])) -> Counts {
        (
            vals.0.iter().map(|&v| Count::from(v)).collect(),
            vals.1.iter().map(|&v| Count::from(v)).collect(),
        )
    }

    #[test]
    fn test_apply_additive() {
        let mut tape = tape(3, &[(1, 12), (2, 3)], &[(4, 15), (5, 2), (6, 2)]);

        assert_eq!(tape.to_string(), "2^3 1^12 [3] 4^15 5^2 6^2");

        let rule = Rule::from_ops(&[
            ((false, 1), Op::Plus(BigInt::from(3))),
            ((true, 0), Op::Plus(BigInt::from(-2))),
        ]);

        let times = tape.apply_rule(&rule).unwrap();

        assert_eq!(times, Count::from(7u64));
        assert_eq!(tape.to_string(), "2^24 1^12 [3] 4 5^2 6^2");
        assert_eq!(tape.marks(), Count::from(42u64));
    }

    #[test]
    fn test_apply_exact_underflow() {
        let mut tape = tape(4, &[(4, 2)], &[(5, 60), (2, 1), (4, 1), (5, 7), (1, 1)]);

        let rule = Rule::from_ops(&[
            ((false, 0), Op::Plus(BigInt::from(4))),
            ((true, 0), Op::Plus(BigInt::from(-2))),
        ]);

        // 60 divides evenly, so one application must be held back.
        let times = tape.apply_rule(&rule).unwrap();

        assert_eq!(times, Count::from(29u64));
        assert_eq!(tape.to_string(), "4^118 [4] 5^2 2 4 5^7 1");
        assert_eq!(tape.marks(), Count::from(131u64));
    }

    #[test]
    fn test_apply_mult_closed_form() {
        let mut tape = tape(0, &[(1, 100)], &[(3, 5)]);

        let rule = Rule::from_ops(&[
            ((false, 0), Op::Plus(BigInt::from(-1))),
            ((true, 0), Op::Mult(2, BigInt::from(1))),
        ]);

        let times = tape.apply_rule(&rule).unwrap();

        assert_eq!(times, Count::from(99u64));

        // 5 doublings-plus-one, 99 times: 6 * 2^99 - 1.
        let expected = BigInt::from(6u64) * BigInt::from(2u64).pow(99) - 1;
        assert_eq!(tape.get_count((true, 0)).eval().unwrap(), expected);

        // The count is symbolic now, and the signature still reads 3-many.
        assert!(tape.get_count((true, 0)).as_int().is_none());
        assert_eq!(SimTape::signature(&tape).rspan.len(), 1);
    }

    /// One closed-form application must land on the same tape as applying
    /// the cycle that many times one by one.
    #[test]
    fn test_leap_matches_iterated_cycles() {
        let rule = Rule::from_ops(&[
            ((false, 1), Op::Plus(BigInt::from(3))),
            ((true, 0), Op::Plus(BigInt::from(-2))),
        ]);

        let mut leap = tape(3, &[(1, 12), (2, 3)], &[(4, 15), (5, 2), (6, 2)]);
        let mut walk = leap.clone();

        let times = leap.apply_rule(&rule).unwrap();

        for _ in 0..times.to_u64().unwrap() {
            walk.apply_once(&rule).unwrap();
        }

        assert_eq!(leap, walk);
    }

    #[test]
    fn test_fit_additive() {
        let rule = make_rule(
            &counts_of((&[10], &[50])),
            &counts_of((&[13], &[47])),
            &counts_of((&[16], &[44])),
            &counts_of((&[19], &[41])),
        )
        .unwrap();

        assert!(!rule.is_infinite());
        assert_eq!(rule.0[&(false, 0)], Op::Plus(BigInt::from(3)));
        assert_eq!(rule.0[&(true, 0)], Op::Plus(BigInt::from(-3)));
    }

    #[test]
    fn test_fit_affine() {
        let rule = make_rule(
            &counts_of((&[5], &[40])),
            &counts_of((&[11], &[30])),
            &counts_of((&[23], &[20])),
            &counts_of((&[47], &[10])),
        )
        .unwrap();

        assert_eq!(rule.0[&(false, 0)], Op::Mult(2, BigInt::from(1)));
    }

    #[test]
    fn test_fit_rejects_ambiguous_growth() {
        assert!(make_rule(
            &counts_of((&[1], &[])),
            &counts_of((&[2], &[])),
            &counts_of((&[4], &[])),
            &counts_of((&[7], &[])),
        )
        .is_none());
    }

    #[test]
    fn test_infinite_rule() {
        let rule = make_rule(
            &counts_of((&[10], &[3])),
            &counts_of((&[12], &[3])),
            &counts_of((&[14], &[3])),
            &counts_of((&[16], &[3])),
        )
        .unwrap();

        assert!(rule.is_infinite());
    }

    #[test]
    fn test_fit_symbolic_tower() {
        // Counts already symbolic, growing k -> 2^k.
        let base = power(3, Count::from(50u64));
        let b = power(2, base.clone());
        let c = power(2, b.clone());
        let d = power(2, c.clone());

        let rule = make_rule(
            &counts_of((&[], &[])),
            &counts_of((&[], &[])),
            &counts_of((&[], &[])),
            &counts_of((&[], &[])),
        )
        .unwrap();
        assert!(rule.0.is_empty());

        let Fit::Got(op) = fit(&base, &b, &c, &d) else {
            panic!("tower growth should fit an op sequence");
        };

        assert_eq!(op, Op::Seq(vec![PrimOp::Exp(2)]));

        // And the inverse direction descends through the exponent.
        let Fit::Got(op) = fit(&d, &c, &b, &base) else {
            panic!("tower shrinkage should fit an op sequence");
        };

        assert_eq!(op, Op::Seq(vec![PrimOp::Log(2)]));
    }

    #[test]
    fn test_ops_application() {
        let ops = [PrimOp::Add(7), PrimOp::Div(3), PrimOp::Exp(2)];

        // (20 + 7) / 3 = 9, then 2^9 = 512.
        assert_eq!(
            apply_ops(Count::from(20u64), &ops).unwrap(),
            Count::from(512u64),
        );

        // 22 + 7 is not divisible by 3.
        assert_eq!(
            apply_ops(Count::from(22u64), &ops),
            Err(RuleFail::Inapplicable),
        );
    }
}

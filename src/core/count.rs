//! Exact symbolic integers for step counts and run lengths too large to
//! materialize. A `Count` is either a literal (arbitrary precision) or a
//! persistent expression node; arithmetic always folds literal operands and
//! keeps a canonical-ish shape so that structurally equal values compare equal.
//!
//! The ordering is deliberately partial: a symbolic count dominates every
//! literal (the only comparisons the simulation needs are "does this count
//! exceed that bound"), and ordering two unrelated symbolic counts is a
//! contract violation that fails loudly instead of guessing.

use super::{EXP_FOLD_LIMIT, ORDER_SEARCH_LIMIT};
use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{One, Signed, ToPrimitive, Zero};
use serde_with::SerializeDisplay;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::ops::{Add, AddAssign, Mul, Sub};
use std::rc::Rc;
use std::str::FromStr;
use thiserror::Error;

/// Literals at least this large display as an order-of-magnitude marker.
const SHOW_CUTOFF: u64 = 1_000_000_000_000;

/// Exponent gaps up to this are bridged when merging `c1*b^e1 + c2*b^e2`.
const MERGE_GAP_LIMIT: u64 = 1_000;

#[derive(Error, Debug, Eq, PartialEq)]
pub enum CountError {
    /// Two symbolic counts with no structural relation cannot be ordered.
    #[error("two symbolic counts cannot be ordered")]
    Incomparable,
    /// Modular reduction found no closed form and no safe fallback.
    #[error("no closed-form modular reduction")]
    NoReduction,
    /// An exact evaluation would not fit in memory.
    #[error("value too large to materialize")]
    Overflow,
}

/// An exact integer, literal or symbolic.
#[derive(SerializeDisplay, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Count {
    Int(BigInt),
    Sym(Rc<Term>),
}

/// A symbolic node. `Div` denominators and `Exp` bases stay machine words:
/// that is the only shape the simulation ever produces.
#[derive(PartialEq, Eq, Hash, Debug)]
pub enum Term {
    Add(Count, Count),
    Mul(Count, Count),
    Div(Count, u64),
    Exp(u64, Count),
}

use Count::{Int, Sym};

impl From<u64> for Count {
    fn from(val: u64) -> Self {
        Int(BigInt::from(val))
    }
}

impl From<i64> for Count {
    fn from(val: i64) -> Self {
        Int(BigInt::from(val))
    }
}

impl From<BigInt> for Count {
    fn from(val: BigInt) -> Self {
        Int(val)
    }
}

fn node(term: Term) -> Count {
    Sym(Rc::new(term))
}

impl Count {
    pub fn zero() -> Self {
        Int(BigInt::zero())
    }

    pub fn is_zero(&self) -> bool {
        matches!(self, Int(x) if x.is_zero())
    }

    pub fn is_one(&self) -> bool {
        matches!(self, Int(x) if x.is_one())
    }

    pub fn as_int(&self) -> Option<&BigInt> {
        match self {
            Int(x) => Some(x),
            Sym(_) => None,
        }
    }

    pub fn to_u64(&self) -> Option<u64> {
        self.as_int().and_then(BigInt::to_u64)
    }

    /// Leaf count of the expression tree, the prover's size gauge.
    pub fn leaves(&self) -> usize {
        match self {
            Int(_) => 1,
            Sym(term) => match &**term {
                Term::Add(l, r) | Term::Mul(l, r) => l.leaves() + r.leaves(),
                Term::Div(n, _) => 1 + n.leaves(),
                Term::Exp(_, e) => 1 + e.leaves(),
            },
        }
    }

    /// Total order against a literal: any symbolic count dominates.
    pub fn cmp_int(&self, other: &BigInt) -> Ordering {
        match self {
            Int(x) => x.cmp(other),
            Sym(_) => Ordering::Greater,
        }
    }

    /// The partial order. Ordering two distinct symbolic counts is a
    /// programming error and must not be guessed at.
    pub fn try_cmp(&self, other: &Self) -> Result<Ordering, CountError> {
        match (self, other) {
            (Int(x), Int(y)) => Ok(x.cmp(y)),
            (Sym(_), Int(_)) => Ok(Ordering::Greater),
            (Int(_), Sym(_)) => Ok(Ordering::Less),
            (Sym(_), Sym(_)) => {
                if self == other {
                    Ok(Ordering::Equal)
                } else {
                    Err(CountError::Incomparable)
                }
            },
        }
    }

    /// Floor division with remainder by a machine word, without
    /// materializing symbolic values.
    pub fn div_rem(&self, den: u64) -> Result<(Self, u64), CountError> {
        if let Int(x) = self {
            let (q, r) = x.div_mod_floor(&BigInt::from(den));
            return Ok((Int(q), r.to_u64().ok_or(CountError::Overflow)?));
        }

        let rem = self.modulo(den)?;
        let quot = quotient(difference(self.clone(), Count::from(rem)), den);

        Ok((quot, rem))
    }

    /// Reduce modulo a machine word without evaluating the full value.
    pub fn modulo(&self, m: u64) -> Result<u64, CountError> {
        if m == 1 {
            return Ok(0);
        }

        match self {
            Int(x) => x
                .mod_floor(&BigInt::from(m))
                .to_u64()
                .ok_or(CountError::Overflow),
            Sym(term) => match &**term {
                Term::Add(l, r) => {
                    let (lm, rm) = (l.modulo(m)?, r.modulo(m)?);
                    Ok(((u128::from(lm) + u128::from(rm)) % u128::from(m)) as u64)
                },
                Term::Mul(l, r) => {
                    let (lm, rm) = (l.modulo(m)?, r.modulo(m)?);
                    Ok(((u128::from(lm) * u128::from(rm)) % u128::from(m)) as u64)
                },
                Term::Div(num, den) => div_modulo(num, *den, m),
                Term::Exp(base, exp) => exp_modulo(*base, exp, m),
            },
        }
    }

    /// Evaluate to an exact literal. The last resort for reductions with no
    /// closed form; errors out rather than building a number with millions
    /// of digits.
    pub fn eval(&self) -> Result<BigInt, CountError> {
        match self {
            Int(x) => Ok(x.clone()),
            Sym(term) => match &**term {
                Term::Add(l, r) => Ok(l.eval()? + r.eval()?),
                Term::Mul(l, r) => Ok(l.eval()? * r.eval()?),
                Term::Div(n, d) => Ok(n.eval()?.div_floor(&BigInt::from(*d))),
                Term::Exp(b, e) => {
                    let exp = e.eval()?.to_u32().ok_or(CountError::Overflow)?;

                    if u64::from(exp) * u64::from(64 - b.leading_zeros()) > 1 << 24 {
                        return Err(CountError::Overflow);
                    }

                    Ok(BigInt::from(*b).pow(exp))
                },
            },
        }
    }
}

/**************************************/

/// Split off a literal coefficient: `k * x` yields `(k, x)`, anything else
/// is its own core with coefficient one.
fn split_coeff(count: &Count) -> (BigInt, Count) {
    if let Sym(term) = count {
        if let Term::Mul(Int(k), r) = &**term {
            return (k.clone(), r.clone());
        }
    }

    (BigInt::from(1), count.clone())
}

/// Split `k * base^e` into its parts, if the count has that shape.
fn split_exp(count: &Count) -> Option<(BigInt, u64, Count)> {
    let (coeff, core) = split_coeff(count);

    if let Sym(term) = &core {
        if let Term::Exp(base, exp) = &**term {
            return Some((coeff, *base, exp.clone()));
        }
    }

    None
}

fn contains_div(count: &Count) -> bool {
    match count {
        Int(_) => false,
        Sym(term) => match &**term {
            Term::Add(l, r) | Term::Mul(l, r) => contains_div(l) || contains_div(r),
            Term::Div(..) => true,
            Term::Exp(_, e) => contains_div(e),
        },
    }
}

pub fn sum(a: Count, b: Count) -> Count {
    if a.is_zero() {
        return b;
    }

    if b.is_zero() {
        return a;
    }

    match (&a, &b) {
        (Int(x), Int(y)) => return Int(x + y),
        (Int(_), Sym(_)) => return int_sum(a, b),
        (Sym(_), Int(_)) => return int_sum(b, a),
        (Sym(_), Sym(_)) => {},
    }

    // Lift a leading literal so every mixed sum ends up as (int + rest).
    if let Sym(term) = &a {
        if let Term::Add(l @ Int(_), r) = &**term {
            return sum(l.clone(), sum(r.clone(), b));
        }
    }

    if let Sym(term) = &b {
        if let Term::Add(l @ Int(_), r) = &**term {
            return sum(l.clone(), sum(a, r.clone()));
        }
    }

    // Common denominators fold together.
    if let (Sym(ta), Sym(tb)) = (&a, &b) {
        if let (Term::Div(n1, d1), Term::Div(n2, d2)) = (&**ta, &**tb) {
            return div_sum(n1, *d1, n2, *d2);
        }
    }

    if let Sym(term) = &a {
        if let Term::Div(n, d) = &**term {
            if !contains_div(&b) {
                let scaled = product(Count::from(*d), b);
                return quotient(sum(n.clone(), scaled), *d);
            }
        }
    }

    if let Sym(term) = &b {
        if let Term::Div(n, d) = &**term {
            if !contains_div(&a) {
                let scaled = product(Count::from(*d), a);
                return quotient(sum(n.clone(), scaled), *d);
            }
        }
    }

    // Like terms: k1*x + k2*x.
    let ((ca, xa), (cb, xb)) = (split_coeff(&a), split_coeff(&b));

    if xa == xb {
        return product(Int(ca + cb), xa);
    }

    // Powers of a common base merge across a small literal exponent gap.
    if let (Some((ca, base_a, ea)), Some((cb, base_b, eb))) = (split_exp(&a), split_exp(&b)) {
        if base_a == base_b {
            if let Some(merged) = merge_exponents(base_a, (ca, ea), (cb, eb)) {
                return merged;
            }
        }
    }

    node(Term::Add(a, b))
}

/// `a` is a literal, `b` symbolic.
fn int_sum(a: Count, b: Count) -> Count {
    if let Sym(term) = &b {
        match &**term {
            Term::Add(Int(l), r) => {
                let Int(k) = &a else { unreachable!() };
                return sum(Int(k + l), r.clone());
            },
            Term::Div(n, d) => {
                let scaled = product(Count::from(*d), a);
                return quotient(sum(scaled, n.clone()), *d);
            },
            _ => {},
        }
    }

    node(Term::Add(a, b))
}

fn div_sum(n1: &Count, d1: u64, n2: &Count, d2: u64) -> Count {
    if d1 == d2 {
        return quotient(sum(n1.clone(), n2.clone()), d1);
    }

    if d1 % d2 == 0 {
        let scaled = product(Count::from(d1 / d2), n2.clone());
        return quotient(sum(n1.clone(), scaled), d1);
    }

    if d2 % d1 == 0 {
        let scaled = product(Count::from(d2 / d1), n1.clone());
        return quotient(sum(scaled, n2.clone()), d2);
    }

    match d1.checked_mul(d2) {
        Some(den) => {
            let l = product(Count::from(d2), n1.clone());
            let r = product(Count::from(d1), n2.clone());
            quotient(sum(l, r), den)
        },
        None => node(Term::Add(
            node(Term::Div(n1.clone(), d1)),
            node(Term::Div(n2.clone(), d2)),
        )),
    }
}

/// `c1*b^e1 + c2*b^e2` with a small literal gap between the exponents
/// factors through the smaller power.
fn merge_exponents(
    base: u64,
    (c1, e1): (BigInt, Count),
    (c2, e2): (BigInt, Count),
) -> Option<Count> {
    let ord = e1.try_cmp(&e2).ok()?;

    let ((lo_c, lo_e), (hi_c, hi_e)) = if ord == Ordering::Greater {
        ((c2, e2), (c1, e1))
    } else {
        ((c1, e1), (c2, e2))
    };

    let gap = difference(hi_e, lo_e.clone());
    let lit = gap.to_u64()?;

    if lit > MERGE_GAP_LIMIT {
        return None;
    }

    let bridged = product(Int(hi_c), power(base, Count::from(lit)));

    Some(product(sum(Int(lo_c), bridged), power(base, lo_e)))
}

pub fn negate(a: Count) -> Count {
    match &a {
        Int(x) => Int(-x),
        Sym(term) => match &**term {
            Term::Add(l, r) => sum(negate(l.clone()), negate(r.clone())),
            Term::Mul(Int(k), r) => product(Int(-k), r.clone()),
            Term::Div(n, d) => quotient(negate(n.clone()), *d),
            _ => node(Term::Mul(Count::from(-1i64), a)),
        },
    }
}

pub fn difference(a: Count, b: Count) -> Count {
    if b.is_zero() {
        return a;
    }

    if a == b {
        return Count::zero();
    }

    sum(a, negate(b))
}

pub fn product(a: Count, b: Count) -> Count {
    if a.is_zero() || b.is_zero() {
        return Count::zero();
    }

    if a.is_one() {
        return b;
    }

    if b.is_one() {
        return a;
    }

    match (&a, &b) {
        (Int(x), Int(y)) => return Int(x * y),
        (Int(_), Sym(_)) => return int_product(a, b),
        (Sym(_), Int(_)) => return int_product(b, a),
        (Sym(_), Sym(_)) => {},
    }

    // Lift literal coefficients leftward.
    if let Sym(term) = &a {
        if let Term::Mul(l @ Int(_), r) = &**term {
            return product(l.clone(), product(r.clone(), b));
        }
    }

    if let Sym(term) = &b {
        if let Term::Mul(l @ Int(_), r) = &**term {
            return product(l.clone(), product(a, r.clone()));
        }
    }

    // Exponent law for a shared base.
    if let (Sym(ta), Sym(tb)) = (&a, &b) {
        if let (Term::Exp(b1, e1), Term::Exp(b2, e2)) = (&**ta, &**tb) {
            if b1 == b2 {
                return power(*b1, sum(e1.clone(), e2.clone()));
            }
        }
    }

    // Distribute over sums so equal values stay structurally equal.
    if let Sym(term) = &a {
        if let Term::Add(l, r) = &**term {
            return sum(product(l.clone(), b.clone()), product(r.clone(), b));
        }
    }

    if let Sym(term) = &b {
        if let Term::Add(l, r) = &**term {
            return sum(product(a.clone(), l.clone()), product(a, r.clone()));
        }
    }

    if let Sym(term) = &a {
        if let Term::Div(n, d) = &**term {
            return quotient(product(n.clone(), b), *d);
        }
    }

    if let Sym(term) = &b {
        if let Term::Div(n, d) = &**term {
            return quotient(product(a, n.clone()), *d);
        }
    }

    node(Term::Mul(a, b))
}

/// `a` is a literal, `b` symbolic.
fn int_product(a: Count, b: Count) -> Count {
    let Int(k) = &a else { unreachable!() };

    if let Sym(term) = &b {
        match &**term {
            Term::Add(l, r) => {
                return sum(product(a.clone(), l.clone()), product(a, r.clone()));
            },
            Term::Mul(Int(m), r) => return product(Int(k * m), r.clone()),
            Term::Div(n, d) => {
                let g = gcd_u64(*d, k);
                let lead = Int(k / BigInt::from(g));
                return quotient(product(lead, n.clone()), d / g);
            },
            Term::Exp(base, exp) => {
                // Fold factors of the base into the exponent.
                let big_base = BigInt::from(*base);
                let mut k = k.clone();
                let mut lifted = 0u64;

                while (&k % &big_base).is_zero() && !k.is_zero() {
                    k /= &big_base;
                    lifted += 1;
                }

                if lifted > 0 {
                    let raised = power(*base, sum(exp.clone(), Count::from(lifted)));
                    return product(Int(k), raised);
                }
            },
            _ => {},
        }
    }

    node(Term::Mul(a, b))
}

fn gcd_u64(d: u64, k: &BigInt) -> u64 {
    if k.is_zero() {
        return d;
    }

    k.abs().gcd(&BigInt::from(d)).to_u64().unwrap_or(1)
}

/// The largest divisor of `d` that provably divides `count`.
fn common_divisor(d: u64, count: &Count) -> u64 {
    if d == 1 {
        return 1;
    }

    match count {
        Int(x) => gcd_u64(d, x),
        Sym(term) => match &**term {
            Term::Add(l, r) => common_divisor(d, l).gcd(&common_divisor(d, r)),
            Term::Mul(l, r) => {
                let g = common_divisor(d, l);
                g * common_divisor(d / g, r)
            },
            Term::Div(..) => 1,
            Term::Exp(base, exp) => {
                let mut g = 1u64;
                let mut rest = d;
                let mut depth = 0u64;

                while rest % base == 0 {
                    g *= base;
                    rest /= base;
                    depth += 1;
                }

                // A literal exponent may be too shallow for every factor.
                if let Some(e) = exp.to_u64() {
                    if e < depth {
                        g = base.pow(e as u32);
                    }
                }

                g
            },
        },
    }
}

/// Floor division by a machine word. Exact in this domain except on
/// literals, where floor semantics apply.
pub fn quotient(a: Count, den: u64) -> Count {
    assert!(den > 0);

    if den == 1 {
        return a;
    }

    match &a {
        Int(x) => Int(x.div_floor(&BigInt::from(den))),
        Sym(term) => match &**term {
            Term::Add(l, r) => {
                let g = common_divisor(den, l).gcd(&common_divisor(den, r));

                if g > 1 {
                    let reduced = sum(quotient(l.clone(), g), quotient(r.clone(), g));
                    quotient(reduced, den / g)
                } else {
                    node(Term::Div(a, den))
                }
            },
            Term::Mul(l, r) => {
                let lg = common_divisor(den, l);

                if lg > 1 {
                    return quotient(product(quotient(l.clone(), lg), r.clone()), den / lg);
                }

                let rg = common_divisor(den, r);

                if rg > 1 {
                    return quotient(product(l.clone(), quotient(r.clone(), rg)), den / rg);
                }

                node(Term::Div(a, den))
            },
            Term::Div(n, d0) => match d0.checked_mul(den) {
                Some(d) => quotient(n.clone(), d),
                None => node(Term::Div(a, den)),
            },
            Term::Exp(base, exp) => {
                let mut rest = den;
                let mut stripped = 0u64;

                while rest % base == 0 {
                    rest /= base;
                    stripped += 1;
                }

                if stripped == 0 || matches!(exp.to_u64(), Some(e) if e < stripped) {
                    return node(Term::Div(a, den));
                }

                let lowered = difference(exp.clone(), Count::from(stripped));

                if rest == 1 {
                    power(*base, lowered)
                } else if base % rest == 0 {
                    let lead = Count::from(base / rest);
                    product(lead, power(*base, difference(lowered, Count::from(1u64))))
                } else {
                    node(Term::Div(a, den))
                }
            },
        },
    }
}

/// Raise a machine-word base to a symbolic-or-literal exponent. Perfect
/// power bases are normalized so equal values share a representation.
pub fn power(mut base: u64, mut exp: Count) -> Count {
    if base == 0 {
        return Count::zero();
    }

    if base == 1 {
        return Count::from(1u64);
    }

    loop {
        if base == 8 {
            base = 2;
            exp = product(Count::from(3u64), exp);
            break;
        }

        let root = (base as f64).sqrt().round() as u64;

        if root > 1 && root * root == base {
            base = root;
            exp = product(Count::from(2u64), exp);
        } else {
            break;
        }
    }

    if let Some(e) = exp.to_u64() {
        if e == 0 {
            return Count::from(1u64);
        }

        if e == 1 {
            return Count::from(base);
        }

        if e <= EXP_FOLD_LIMIT {
            return Int(BigInt::from(base).pow(e as u32));
        }
    }

    node(Term::Exp(base, exp))
}

/**************************************/

fn pow_mod(base: u64, mut exp: u64, m: u64) -> u64 {
    let (mut result, mut base) = (1u128, u128::from(base % m));
    let m = u128::from(m);

    while exp > 0 {
        if exp & 1 == 1 {
            result = result * base % m;
        }

        base = base * base % m;
        exp >>= 1;
    }

    result as u64
}

/// `num / den mod m`, using that the division is exact: reduce the
/// numerator modulo `m * den`, divide, reduce. Falls back to the exact
/// value as a last resort.
fn div_modulo(num: &Count, den: u64, m: u64) -> Result<u64, CountError> {
    if let Some(lifted) = m.checked_mul(den) {
        let r = num.modulo(lifted)?;

        if r % den == 0 {
            return Ok((r / den) % m);
        }
    }

    let exact = num.eval()?.div_floor(&BigInt::from(den));

    exact
        .mod_floor(&BigInt::from(m))
        .to_u64()
        .ok_or(CountError::Overflow)
}

/// `base^exp mod m` by bringing the exponent down to the eventually
/// periodic part of the power sequence, then repeated squaring. Sound for
/// non-coprime moduli too: the preperiod is always dominated by a symbolic
/// exponent, and literal exponents are powered directly.
fn exp_modulo(base: u64, exp: &Count, m: u64) -> Result<u64, CountError> {
    if base % m == 0 {
        return Ok(0);
    }

    if let Some(e) = exp.to_u64() {
        return Ok(pow_mod(base, e, m));
    }

    let (tail, period) = power_cycle(base, m)?;

    // Any symbolic exponent (or over-u64 literal) exceeds the preperiod.
    let reduced = match exp {
        Int(e) => (e - BigInt::from(tail))
            .mod_floor(&BigInt::from(period))
            .to_u64(),
        Sym(_) => {
            let r = exp.modulo(period)?;
            Some((r + period - tail % period) % period)
        },
    }
    .ok_or(CountError::Overflow)?;

    Ok(pow_mod(base, tail + reduced, m))
}

/// Find the preperiod and period of `base^k mod m` for `k >= 1`.
fn power_cycle(base: u64, m: u64) -> Result<(u64, u64), CountError> {
    let mut seen: HashMap<u64, u64> = HashMap::new();
    let mut val = 1u64;

    for k in 1..ORDER_SEARCH_LIMIT.min(2 * m + 2) {
        val = (u128::from(val) * u128::from(base % m) % u128::from(m)) as u64;

        if let Some(&first) = seen.get(&val) {
            return Ok((first, k - first));
        }

        seen.insert(val, k);
    }

    Err(CountError::NoReduction)
}

/**************************************/

impl Add for Count {
    type Output = Count;

    fn add(self, other: Count) -> Count {
        sum(self, other)
    }
}

impl AddAssign for Count {
    fn add_assign(&mut self, other: Count) {
        *self = sum(std::mem::replace(self, Count::zero()), other);
    }
}

impl Sub for Count {
    type Output = Count;

    fn sub(self, other: Count) -> Count {
        difference(self, other)
    }
}

impl Mul for Count {
    type Output = Count;

    fn mul(self, other: Count) -> Count {
        product(self, other)
    }
}

/**************************************/

fn show_int(x: &BigInt, f: &mut Formatter) -> std::fmt::Result {
    if x.abs() < BigInt::from(SHOW_CUTOFF) {
        write!(f, "{x}")
    } else {
        let digits = x.abs().to_string().len() - 1;
        write!(f, "{}(~10^{digits})", if x.is_negative() { "-" } else { "" })
    }
}

impl Display for Count {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Int(x) => show_int(x, f),
            Sym(term) => match &**term {
                Term::Add(l, r) => write!(f, "({l} + {r})"),
                Term::Mul(l, r) => write!(f, "({l} * {r})"),
                Term::Div(n, d) => write!(f, "({n} // {d})"),
                Term::Exp(b, e) => write!(f, "({b} ** {e})"),
            },
        }
    }
}

/// Parse a plain literal; symbolic shapes are display-only.
impl FromStr for Count {
    type Err = CountError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        BigInt::from_str(text)
            .map(Int)
            .map_err(|_| CountError::NoReduction)
    }
}

/**************************************/

//! The run-length tape: blocks of repeated colors on both sides of the
//! scanned cell, over an infinite background of color 0. A block count is a
//! `Count`, so a single block can stand for an astronomically long run.
//!
//! Three flavors share the span machinery: the plain working tape, a traced
//! tape that records which blocks a re-simulation touched (for minimizing a
//! proved rule's scope), and a head-position tape for the recurrence
//! detector.

use super::count::{difference, sum};
use super::{Color, Count, Shift};
use serde::Serialize;
use std::cell::Cell;
use std::fmt::{Display, Formatter};
use std::iter::once;

/**************************************/

/// The block representation seam between the plain and traced tapes.
pub trait SpanBlock {
    fn make(color: Color, count: Count) -> Self;

    fn color(&self) -> Color;
    fn set_color(&mut self, color: Color);

    fn count(&self) -> &Count;
    fn set_count(&mut self, count: Count);

    fn is_single(&self) -> bool {
        self.count().is_one()
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Block {
    pub color: Color,
    pub count: Count,
}

impl SpanBlock for Block {
    fn make(color: Color, count: Count) -> Self {
        Block { color, count }
    }

    fn color(&self) -> Color {
        self.color
    }

    fn set_color(&mut self, color: Color) {
        self.color = color;
    }

    fn count(&self) -> &Count {
        &self.count
    }

    fn set_count(&mut self, count: Count) {
        self.count = count;
    }
}

impl Display for Block {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        if self.is_single() {
            write!(f, "{}", self.color)
        } else {
            write!(f, "{}^{}", self.color, self.count)
        }
    }
}

/**************************************/

/// One side of the tape. Blocks are stored farthest-from-head first, so the
/// nearest block is push/pop cheap.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Span<B>(Vec<B>);

impl<B: SpanBlock> Span<B> {
    fn blank() -> Self {
        Span(vec![])
    }

    fn from_nearest(mut blocks: Vec<B>) -> Self {
        blocks.reverse();
        Span(blocks)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The block nearest the head.
    fn top(&self) -> Option<&B> {
        self.0.last()
    }

    fn top_mut(&mut self) -> Option<&mut B> {
        self.0.last_mut()
    }

    fn pop_top(&mut self) -> Option<B> {
        self.0.pop()
    }

    fn push_top(&mut self, block: B) {
        self.0.push(block);
    }

    /// Block at distance `pos` from the head (0 is nearest).
    pub fn block(&self, pos: usize) -> &B {
        &self.0[self.0.len() - 1 - pos]
    }

    fn block_mut(&mut self, pos: usize) -> &mut B {
        let last = self.0.len() - 1;
        &mut self.0[last - pos]
    }

    /// Iterate nearest-first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &B> {
        self.0.iter().rev()
    }

    /// Absorb the scanned cell plus, when `skip` holds, a whole same-colored
    /// run. Returns the next scanned color and the elementary steps taken.
    fn pull(&mut self, scan: Color, skip: bool) -> (Color, Count) {
        let stepped = if skip && self.top().is_some_and(|b| b.color() == scan) {
            let run = self.pop_top().map_or_else(Count::zero, |b| b.count().clone());
            sum(Count::from(1u64), run)
        } else {
            Count::from(1u64)
        };

        let next_scan = match self.top_mut() {
            None => 0,
            Some(block) => {
                let color = block.color();

                if block.is_single() {
                    self.pop_top();
                } else {
                    let lowered = difference(block.count().clone(), Count::from(1u64));
                    block.set_count(lowered);
                }

                color
            },
        };

        (next_scan, stepped)
    }

    /// Receive `stepped` cells of `color`, coalescing with the nearest block.
    /// A zero block is only stored when interior (the background is zero).
    fn push(&mut self, color: Color, stepped: &Count) {
        match self.top_mut() {
            Some(block) if block.color() == color => {
                let raised = sum(block.count().clone(), stepped.clone());
                block.set_count(raised);
            },
            None if color == 0 => {},
            _ => self.push_top(B::make(color, stepped.clone())),
        }
    }

    fn shape(&self) -> Vec<ColorRun> {
        self.iter()
            .map(|b| {
                if b.is_single() {
                    ColorRun::One(b.color())
                } else {
                    ColorRun::Many(b.color())
                }
            })
            .collect()
    }

    fn counts(&self) -> Vec<Count> {
        self.iter().map(|b| b.count().clone()).collect()
    }
}

/**************************************/

/// A block's contribution to a signature: its color, counts abstracted to
/// "exactly one" vs "at least one".
#[derive(Serialize, Clone, PartialEq, Eq, Hash, Debug)]
pub enum ColorRun {
    One(Color),
    Many(Color),
}

impl ColorRun {
    pub fn color(&self) -> Color {
        match self {
            ColorRun::One(c) | ColorRun::Many(c) => *c,
        }
    }
}

/// The head-relative abstract shape of a tape. Many tapes map to one
/// signature; it is the pattern matcher's cache key.
#[derive(Serialize, Clone, PartialEq, Eq, Hash, Debug)]
pub struct Signature {
    pub scan: Color,
    pub lspan: Vec<ColorRun>,
    pub rspan: Vec<ColorRun>,
}

/// A signature restricted to the spans a rule actually reads, with a flag
/// per side marking whether the whole side must match exactly (the
/// re-simulation ran off that edge).
pub type MinSig = (Signature, (bool, bool));

impl Signature {
    pub fn matches(&self, (other, (lex, rex)): &MinSig) -> bool {
        self.scan == other.scan
            && (if *lex {
                self.lspan == other.lspan
            } else {
                self.lspan.starts_with(&other.lspan)
            })
            && (if *rex {
                self.rspan == other.rspan
            } else {
                self.rspan.starts_with(&other.rspan)
            })
    }
}

/**************************************/

/// A block position: which side, and how far from the head (0 is nearest).
pub type Index = (Shift, usize);

/// Count access by block position, the seam rule application goes through.
pub trait IndexTape {
    fn get_count(&self, index: Index) -> &Count;
    fn set_count(&mut self, index: Index, val: Count);
}

/// Stepping and shape access, the seam the prover's re-simulation uses.
pub trait SimTape: IndexTape {
    fn scan(&self) -> Color;
    fn step(&mut self, shift: Shift, color: Color, skip: bool) -> Count;
    fn signature(&self) -> Signature;
    fn sig_compatible(&self, sig: &Signature) -> bool;
}

/**************************************/

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct RawTape<B> {
    pub scan: Color,
    pub lspan: Span<B>,
    pub rspan: Span<B>,
}

/// The plain working tape.
pub type Tape = RawTape<Block>;

impl<B: SpanBlock> RawTape<B> {
    pub fn init() -> Self {
        RawTape {
            scan: 0,
            lspan: Span::blank(),
            rspan: Span::blank(),
        }
    }

    /// The configuration after the conventional first `1RB` step.
    pub fn init_stepped() -> Self {
        RawTape {
            scan: 0,
            lspan: Span(vec![B::make(1, Count::from(1u64))]),
            rspan: Span::blank(),
        }
    }

    /// Build from nearest-first block lists.
    pub fn from_blocks(scan: Color, lspan: Vec<B>, rspan: Vec<B>) -> Self {
        RawTape {
            scan,
            lspan: Span::from_nearest(lspan),
            rspan: Span::from_nearest(rspan),
        }
    }

    pub fn blank(&self) -> bool {
        self.scan == 0 && self.lspan.is_empty() && self.rspan.is_empty()
    }

    /// Would moving further this way read nothing but background?
    pub fn at_edge(&self, edge: Shift) -> bool {
        self.scan == 0 && (if edge { &self.rspan } else { &self.lspan }).is_empty()
    }

    /// Total count of nonzero cells.
    pub fn marks(&self) -> Count {
        let mut total = Count::from(u64::from(self.scan != 0));

        for block in self.lspan.iter().chain(self.rspan.iter()) {
            if block.color() != 0 {
                total += block.count().clone();
            }
        }

        total
    }

    pub fn counts(&self) -> (Vec<Count>, Vec<Count>) {
        (self.lspan.counts(), self.rspan.counts())
    }

    /// Write, move, coalesce. Returns the elementary steps represented:
    /// 1, or a whole run's worth when `skip` collapses a same-colored run.
    pub fn step(&mut self, shift: Shift, color: Color, skip: bool) -> Count {
        let (pull, push) = if shift {
            (&mut self.rspan, &mut self.lspan)
        } else {
            (&mut self.lspan, &mut self.rspan)
        };

        let (next_scan, stepped) = pull.pull(self.scan, skip);

        push.push(color, &stepped);

        self.scan = next_scan;

        stepped
    }

    /// Flatten to a plain cell array, left to right. `None` if any count is
    /// too large to materialize.
    pub fn unroll(&self) -> Option<Vec<Color>> {
        let mut cells = vec![];

        for block in self.lspan.iter().rev() {
            let count = block.count().to_u64()?;
            cells.extend(std::iter::repeat(block.color()).take(count as usize));
        }

        cells.push(self.scan);

        for block in self.rspan.iter() {
            let count = block.count().to_u64()?;
            cells.extend(std::iter::repeat(block.color()).take(count as usize));
        }

        Some(cells)
    }
}

impl<B: SpanBlock> IndexTape for RawTape<B> {
    fn get_count(&self, (side, pos): Index) -> &Count {
        (if side { &self.rspan } else { &self.lspan }).block(pos).count()
    }

    fn set_count(&mut self, (side, pos): Index, val: Count) {
        (if side { &mut self.rspan } else { &mut self.lspan })
            .block_mut(pos)
            .set_count(val);
    }
}

impl<B: SpanBlock> SimTape for RawTape<B> {
    fn scan(&self) -> Color {
        self.scan
    }

    fn step(&mut self, shift: Shift, color: Color, skip: bool) -> Count {
        RawTape::step(self, shift, color, skip)
    }

    fn signature(&self) -> Signature {
        Signature {
            scan: self.scan,
            lspan: self.lspan.shape(),
            rspan: self.rspan.shape(),
        }
    }

    /// Same scan, same span lengths, same colors; counts (and the one-vs-many
    /// distinction) are free.
    fn sig_compatible(&self, sig: &Signature) -> bool {
        self.scan == sig.scan
            && self.lspan.len() == sig.lspan.len()
            && self.rspan.len() == sig.rspan.len()
            && self
                .lspan
                .iter()
                .zip(&sig.lspan)
                .all(|(b, run)| b.color() == run.color())
            && self
                .rspan
                .iter()
                .zip(&sig.rspan)
                .all(|(b, run)| b.color() == run.color())
    }
}

impl<B: SpanBlock + Display> Display for RawTape<B> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        let parts: Vec<String> = self
            .lspan
            .iter()
            .rev()
            .map(ToString::to_string)
            .chain(once(format!("[{}]", self.scan)))
            .chain(self.rspan.iter().map(ToString::to_string))
            .collect();

        write!(f, "{}", parts.join(" "))
    }
}

/**************************************/

struct TracedBlock {
    color: Color,
    count: Count,
    source: Option<Index>,
}

impl SpanBlock for TracedBlock {
    fn make(color: Color, count: Count) -> Self {
        TracedBlock {
            color,
            count,
            source: None,
        }
    }

    fn color(&self) -> Color {
        self.color
    }

    fn set_color(&mut self, color: Color) {
        self.color = color;
    }

    fn count(&self) -> &Count {
        &self.count
    }

    fn set_count(&mut self, count: Count) {
        self.count = count;
    }
}

/// A tape that records how deep into each span a re-simulation reached, and
/// whether it fell off either stored edge. Those observations bound the
/// spans a proved rule is allowed to require.
pub struct TracedTape {
    tape: RawTape<TracedBlock>,

    l_used: Cell<usize>,
    r_used: Cell<usize>,

    l_edge: Cell<bool>,
    r_edge: Cell<bool>,
}

impl From<&Tape> for TracedTape {
    fn from(tape: &Tape) -> Self {
        let trace = |span: &Span<Block>, side: Shift| {
            Span(
                span.0
                    .iter()
                    .enumerate()
                    .map(|(raw, b)| TracedBlock {
                        color: b.color,
                        count: b.count.clone(),
                        // Raw storage is farthest-first; provenance is
                        // 1-based distance from the head.
                        source: Some((side, span.0.len() - raw)),
                    })
                    .collect(),
            )
        };

        TracedTape {
            tape: RawTape {
                scan: tape.scan,
                lspan: trace(&tape.lspan, false),
                rspan: trace(&tape.rspan, true),
            },
            l_used: Cell::new(0),
            r_used: Cell::new(0),
            l_edge: Cell::new(false),
            r_edge: Cell::new(false),
        }
    }
}

impl TracedTape {
    pub fn used(&self) -> (usize, usize) {
        (self.l_used.get(), self.r_used.get())
    }

    pub fn edges(&self) -> (bool, bool) {
        (self.l_edge.get(), self.r_edge.get())
    }

    fn note_edge(&self, shift: Shift) {
        (if shift { &self.r_edge } else { &self.l_edge }).set(true);
    }

    fn note_block(&self, block: &TracedBlock) {
        let Some((side, depth)) = block.source else {
            return;
        };

        let used = if side { &self.r_used } else { &self.l_used };

        if depth > used.get() {
            used.set(depth);
        }
    }

    /// What the coming step is about to touch, recorded before it happens.
    fn observe(&self, shift: Shift, color: Color, skip: bool) {
        let (pull, push) = if shift {
            (&self.tape.rspan, &self.tape.lspan)
        } else {
            (&self.tape.lspan, &self.tape.rspan)
        };

        match pull.top() {
            None => self.note_edge(shift),
            Some(near) => {
                self.note_block(near);

                if skip && near.color == self.tape.scan {
                    if pull.len() == 1 {
                        self.note_edge(shift);
                    } else {
                        self.note_block(pull.block(1));
                    }
                }
            },
        }

        if let Some(top) = push.top() {
            if top.color == color {
                self.note_block(top);
            }
        }
    }

    /// Restrict a signature to the observed spans.
    pub fn min_sig(&self, sig: &Signature) -> MinSig {
        let sig = Signature {
            scan: sig.scan,
            lspan: sig.lspan[..self.l_used.get().min(sig.lspan.len())].to_vec(),
            rspan: sig.rspan[..self.r_used.get().min(sig.rspan.len())].to_vec(),
        };

        (sig, self.edges())
    }
}

impl IndexTape for TracedTape {
    fn get_count(&self, index: Index) -> &Count {
        let block = (if index.0 {
            &self.tape.rspan
        } else {
            &self.tape.lspan
        })
        .block(index.1);

        self.note_block(block);

        block.count()
    }

    fn set_count(&mut self, index: Index, val: Count) {
        self.tape.set_count(index, val);
    }
}

impl SimTape for TracedTape {
    fn scan(&self) -> Color {
        self.tape.scan
    }

    fn step(&mut self, shift: Shift, color: Color, skip: bool) -> Count {
        self.observe(shift, color, skip);
        self.tape.step(shift, color, skip)
    }

    fn signature(&self) -> Signature {
        SimTape::signature(&self.tape)
    }

    fn sig_compatible(&self, sig: &Signature) -> bool {
        self.tape.sig_compatible(sig)
    }
}

/**************************************/

pub type Pos = i64;

/// A tape that also tracks the head's absolute position, for the
/// recurrence detector. Its counts stay literal: it is only ever driven by
/// plain steps.
#[derive(Clone)]
pub struct HeadTape {
    head: Pos,
    tape: Tape,
}

impl HeadTape {
    pub fn init() -> Self {
        HeadTape {
            head: 0,
            tape: Tape::init(),
        }
    }

    pub fn init_stepped() -> Self {
        HeadTape {
            head: 1,
            tape: Tape::init_stepped(),
        }
    }

    pub fn marks(&self) -> Count {
        self.tape.marks()
    }

    pub fn head(&self) -> Pos {
        self.head
    }

    pub fn scan(&self) -> Color {
        self.tape.scan
    }

    pub fn blank(&self) -> bool {
        self.tape.blank()
    }

    pub fn at_edge(&self, edge: Shift) -> bool {
        self.tape.at_edge(edge)
    }

    pub fn step(&mut self, shift: Shift, color: Color, skip: bool) -> u64 {
        let stepped = self.tape.step(shift, color, skip).to_u64().unwrap_or(1);

        if shift {
            self.head += stepped as Pos;
        } else {
            self.head -= stepped as Pos;
        }

        stepped
    }

    /// Flatten to `(cells, origin)` where `origin` is the absolute position
    /// of the first cell.
    pub fn flatten(&self) -> (Vec<Color>, Pos) {
        let cells = self.tape.unroll().unwrap_or_default();

        let left: u64 = self
            .tape
            .lspan
            .iter()
            .map(|b| b.count().to_u64().unwrap_or(0))
            .sum();

        (cells, self.head - left as Pos)
    }
}

/**************************************/

#[cfg(test)]
mod tests {
    use super::super::machine::{Machine, Program as _};
    use super::*;

    fn tape(scan: Color, lspan: &[(Color, u64)], rspan: &[(Color, u64)]) -> Tape {
        // Builder input is nearest-first, storage farthest-first.
        let span = |blocks: &[(Color, u64)]| {
            Span(
                blocks
                    .iter()
                    .rev()
                    .map(|&(color, count)| Block::make(color, Count::from(count)))
                    .collect(),
            )
        };

        RawTape {
            scan,
            lspan: span(lspan),
            rspan: span(rspan),
        }
    }

    fn assert_tape(tape: &Tape, marks: u64, shown: &str) {
        assert_eq!(tape.marks(), Count::from(marks));
        assert_eq!(tape.blank(), marks == 0);
        assert_eq!(tape.to_string(), shown);
    }

    #[test]
    fn test_init() {
        assert_tape(&Tape::init(), 0, "[0]");

        let mut tape = Tape::init_stepped();

        assert_tape(&tape, 1, "1 [0]");

        tape.step(false, 1, false);
        assert_tape(&tape, 2, "1^2 [0]");

        tape.step(false, 0, false);
        assert_tape(&tape, 2, "1 [1]");

        tape.step(false, 0, true);
        assert_tape(&tape, 0, "[0]");
    }

    #[test]
    fn test_skip_crosses_run() {
        let mut t = tape(2, &[(1, 11), (4, 1)], &[(2, 30)]);

        assert_tape(&t, 43, "4 1^11 [2] 2^30");

        // A self-loop crossing the whole right run in one call.
        let stepped = t.step(true, 2, true);

        assert_eq!(stepped, Count::from(31u64));
        assert_tape(&t, 43, "4 1^11 2^31 [0]");

        assert!(t.at_edge(true));
        assert!(!t.at_edge(false));
    }

    #[test]
    fn test_signature() {
        let t = tape(3, &[(1, 12), (2, 1)], &[(4, 15), (5, 2), (6, 1)]);

        let sig = SimTape::signature(&t);

        assert_eq!(sig.scan, 3);
        assert_eq!(sig.lspan, vec![ColorRun::Many(1), ColorRun::One(2)]);
        assert_eq!(
            sig.rspan,
            vec![ColorRun::Many(4), ColorRun::Many(5), ColorRun::One(6)],
        );

        assert!(t.sig_compatible(&sig));

        // Counts are free, lengths and colors are not.
        let other = tape(3, &[(1, 99), (2, 7)], &[(4, 1), (5, 9), (6, 3)]);
        assert!(other.sig_compatible(&sig));

        let narrow = tape(3, &[(1, 12)], &[(4, 15), (5, 2), (6, 1)]);
        assert!(!narrow.sig_compatible(&sig));
    }

    #[test]
    fn test_min_sig_matching() {
        let t = tape(3, &[(1, 12), (2, 1)], &[(4, 15), (5, 2)]);
        let sig = SimTape::signature(&t);

        let min: MinSig = (
            Signature {
                scan: 3,
                lspan: vec![ColorRun::Many(1)],
                rspan: vec![ColorRun::Many(4)],
            },
            (false, false),
        );

        assert!(sig.matches(&min));

        let exact: MinSig = (min.0.clone(), (true, false));
        assert!(!sig.matches(&exact), "a spent left edge demands the whole span");
    }

    #[test]
    fn test_index_counts() {
        let mut t = tape(3, &[(1, 12), (2, 3)], &[(4, 15), (5, 2), (6, 2)]);

        assert_eq!(t.get_count((false, 1)), &Count::from(3u64));
        assert_eq!(t.get_count((true, 0)), &Count::from(15u64));

        t.set_count((true, 0), Count::from(7u64));
        assert_eq!(t.to_string(), "2^3 1^12 [3] 4^7 5^2 6^2");
    }

    #[test]
    fn test_traced_offsets() {
        let base = tape(0, &[(1, 11), (4, 1), (3, 11), (2, 1)], &[]);
        let mut t = TracedTape::from(&base);

        t.step(false, 0, false);
        assert_eq!(t.used(), (1, 0));

        t.step(false, 2, true);
        assert_eq!(t.used(), (2, 0));

        t.step(false, 2, true);
        assert_eq!(t.used(), (3, 0));

        t.step(false, 2, false);
        assert_eq!(t.used(), (3, 0));

        t.step(true, 4, false);
        assert_eq!(t.used(), (3, 0));

        t.step(true, 1, true);
        assert_eq!(t.used(), (3, 0));
        assert_eq!(t.edges(), (false, true));
    }

    #[test]
    fn test_traced_edges() {
        let mut t = TracedTape::from(&tape(1, &[(1, 3)], &[]));

        t.step(false, 2, true);

        assert_eq!(t.edges(), (true, false));
        assert_eq!(t.used(), (1, 0));
    }

    /// Drive the block tape and a plain cell array side by side and make
    /// sure they agree cell for cell after every elementary move.
    #[test]
    fn test_unroll_round_trip() {
        let machine: Machine = "1RB ...  1LB 0RC  1LC 1LA".parse().unwrap();

        let mut tape = Tape::init();
        let mut state = 0;

        let mut cells = vec![0u64; 64];
        let mut head = 32usize;

        for _ in 0..21 {
            let (color, shift, next) = machine.instr((state, tape.scan)).unwrap();

            let skip = state == next;
            let stepped = tape.step(shift, color, skip).to_u64().unwrap();

            for _ in 0..stepped {
                cells[head] = color;
                head = if shift { head + 1 } else { head - 1 };
            }

            state = next;

            // Compare against the same window of the array.
            let flat = tape.unroll().unwrap();
            let left: usize = tape
                .lspan
                .iter()
                .map(|b| b.count().to_u64().unwrap() as usize)
                .sum();
            let start = head - left;

            assert_eq!(flat, cells[start..start + flat.len()].to_vec());
        }
    }

    #[test]
    fn test_head_tape() {
        let mut t = HeadTape::init_stepped();

        assert_eq!(t.head(), 1);
        assert_eq!(t.scan(), 0);

        t.step(true, 0, false);
        assert_eq!(t.head(), 2);

        t.step(false, 1, false);
        t.step(false, 1, false);
        assert_eq!(t.head(), 0);

        // Tape is now: scanning 1 at position 0, with 1^2 to the right.
        let (cells, origin) = t.flatten();
        assert_eq!(cells, vec![1, 1, 1]);
        assert_eq!(origin, 0);
    }
}

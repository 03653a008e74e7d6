//! Per-run history for the linear-recurrence detector: states and head
//! positions at every step, flattened tape snapshots past a settle
//! threshold. A recurrence is proved by slicing two snapshots with the same
//! `(state, scanned color)` to the window actually visited between them
//! (shifted by the net head displacement) and comparing cell for cell.

use super::tape::{HeadTape, Pos};
use super::{Color, Slot, State};
use std::collections::{BTreeMap, BTreeSet};

/// A flattened tape: concrete cells plus the absolute position of the first
/// one. Everything outside reads as background.
pub struct PtrTape {
    cells: Vec<Color>,
    origin: Pos,
}

impl PtrTape {
    fn get(&self, pos: Pos) -> Color {
        let index = pos - self.origin;

        if (0..self.cells.len() as Pos).contains(&index) {
            self.cells[index as usize]
        } else {
            0
        }
    }

    fn r_end(&self) -> Pos {
        self.origin + self.cells.len() as Pos
    }
}

impl From<&HeadTape> for PtrTape {
    fn from(tape: &HeadTape) -> Self {
        let (cells, origin) = tape.flatten();

        PtrTape { cells, origin }
    }
}

/**************************************/

/// A proved repetition: first occurrence step and period.
pub type Recurrence = (usize, usize);

#[derive(Default)]
pub struct History {
    states: Vec<State>,
    positions: Vec<Pos>,

    snapshots: BTreeMap<usize, PtrTape>,
    slots: BTreeMap<Slot, Vec<usize>>,
}

impl History {
    pub fn new() -> Self {
        History::default()
    }

    /// Record the configuration entering this step.
    pub fn record(&mut self, state: State, pos: Pos) {
        self.states.push(state);
        self.positions.push(pos);
    }

    /// Store a snapshot and register its slot as a recurrence candidate.
    pub fn add_snapshot(&mut self, step: usize, slot: Slot, tape: &HeadTape) {
        self.snapshots.insert(step, tape.into());
        self.slots.entry(slot).or_default().push(step);
    }

    /// Look for an earlier snapshot with the same slot whose tape window
    /// matches this step's.
    pub fn check_recurrence(&self, step: usize, slot: Slot) -> Option<Recurrence> {
        let prior = self.slots.get(&slot)?;

        prior
            .iter()
            .take_while(|&&pstep| pstep < step)
            .find(|&&pstep| self.windows_match(pstep, step))
            .map(|&pstep| (pstep, step - pstep))
    }

    fn windows_match(&self, start: usize, end: usize) -> bool {
        let (t1, t2) = (&self.snapshots[&start], &self.snapshots[&end]);

        let (p1, p2) = (self.positions[start], self.positions[end]);
        let diff = p2 - p1;

        let visited = &self.positions[start..=end];

        let (lo, hi) = if diff > 0 {
            // Drifting right: everything from the leftmost visited cell on.
            let lo = *visited.iter().min().unwrap_or(&p1);
            (lo, t1.r_end().max(t2.r_end() - diff))
        } else if diff < 0 {
            // Drifting left: everything up to the rightmost visited cell.
            let hi = *visited.iter().max().unwrap_or(&p1) + 1;
            (t1.origin.min(t2.origin - diff), hi)
        } else {
            let lo = *visited.iter().min().unwrap_or(&p1);
            let hi = *visited.iter().max().unwrap_or(&p1) + 1;
            (lo, hi)
        };

        (lo..hi).all(|p| t1.get(p) == t2.get(p + diff))
    }

    /// After a recurrence starting at `start`: does some state entered
    /// before the loop never appear inside it? Such states are permanently
    /// unreachable, which makes this a quasi-halt rather than a plain
    /// recurrence.
    pub fn quasihalt(&self, start: usize) -> bool {
        let looped: BTreeSet<State> = self.states[start..].iter().copied().collect();

        self.states[..start].iter().any(|st| !looped.contains(st))
    }
}

/**************************************/

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ptr_tape() {
        let tape = PtrTape {
            cells: vec![2, 1, 1],
            origin: -1,
        };

        assert_eq!(tape.get(-2), 0);
        assert_eq!(tape.get(-1), 2);
        assert_eq!(tape.get(1), 1);
        assert_eq!(tape.get(2), 0);
        assert_eq!(tape.r_end(), 2);
    }

    #[test]
    fn test_quasihalt_states() {
        let mut history = History::new();

        for state in [0, 1, 2, 1, 2, 1, 2] {
            history.record(state, 0);
        }

        // State 0 never recurs after step 1.
        assert!(history.quasihalt(1));
        assert!(!history.quasihalt(0));
    }
}

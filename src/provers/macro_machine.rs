//! Macro compilation: present an instruction table over an enlarged
//! state/color space in which one transition stands for many base steps.
//!
//! Exactly two foldings exist. The block variant packs `k` adjacent cells
//! into one macro color and doubles the state space to remember which edge
//! the head entered from. The backsymbol variant folds the cell behind the
//! head into the macro state instead, trading state-space growth for a
//! second color dimension. Both are built lazily: the first query for a
//! macro slot reconstructs a concrete base window, re-simulates the base
//! table up to a fixed bound, and memoizes the resulting macro instruction
//! (or its absence). Compiled machines are themselves `Program`s, so the
//! two foldings compose.

use crate::core::{Color, Instr, Program, Slot, State, HALT};
use std::cell::RefCell;
use std::collections::BTreeMap;

/// A concrete base-tape window: state, whether the head sits at the right
/// edge, and the window's cells.
type Config = (State, bool, Vec<Color>);

pub fn make_block_macro<P: Program>(
    base: &P,
    params: (usize, usize),
    cells: usize,
) -> MacroMachine<'_, P, BlockFold> {
    MacroMachine::new(base, BlockFold::new(cells, params))
}

pub fn make_backsymbol_macro<P: Program>(
    base: &P,
    params: (usize, usize),
    cells: usize,
) -> MacroMachine<'_, P, BacksymbolFold> {
    MacroMachine::new(base, BacksymbolFold::new(cells, params))
}

/**************************************/

/// How macro slots map to base windows and back. Two implementations, fixed
/// at construction; nothing else ever folds.
pub trait Fold {
    fn new(cells: usize, params: (usize, usize)) -> Self;

    fn cells(&self) -> usize;

    fn macro_states(&self) -> usize;
    fn macro_colors(&self) -> usize;

    /// Base steps the inner simulation may take before giving up.
    fn sim_lim(&self) -> usize;

    fn unpack(&self, slot: Slot) -> Config;
    fn pack(&self, config: Config) -> Instr;
}

/**************************************/

/// Pure base-`colors` positional encoding between windows and macro colors.
struct Codec {
    colors: u64,
    cells: usize,
}

impl Codec {
    fn encode(&self, window: &[Color]) -> Color {
        window
            .iter()
            .fold(0, |acc, &color| acc * self.colors + color)
    }

    fn decode(&self, mut color: Color) -> Vec<Color> {
        let mut window = vec![0; self.cells];

        for cell in window.iter_mut().rev() {
            *cell = color % self.colors;
            color /= self.colors;
        }

        window
    }
}

/**************************************/

pub struct BlockFold {
    cells: usize,
    base_states: usize,
    base_colors: usize,
    codec: Codec,
}

impl Fold for BlockFold {
    fn new(cells: usize, (base_states, base_colors): (usize, usize)) -> Self {
        BlockFold {
            cells,
            base_states,
            base_colors,
            codec: Codec {
                colors: base_colors as u64,
                cells,
            },
        }
    }

    fn cells(&self) -> usize {
        self.cells
    }

    fn macro_states(&self) -> usize {
        2 * self.base_states
    }

    fn macro_colors(&self) -> usize {
        self.base_colors.saturating_pow(self.cells as u32)
    }

    fn sim_lim(&self) -> usize {
        self.base_states
            .saturating_mul(self.cells)
            .saturating_mul(self.macro_colors())
    }

    fn unpack(&self, (macro_state, macro_color): Slot) -> Config {
        (
            macro_state / 2,
            macro_state % 2 == 1,
            self.codec.decode(macro_color),
        )
    }

    fn pack(&self, (state, right_edge, window): Config) -> Instr {
        let macro_state = if state == HALT {
            HALT
        } else {
            2 * state + State::from(!right_edge)
        };

        (self.codec.encode(&window), right_edge, macro_state)
    }
}

/**************************************/

pub struct BacksymbolFold {
    cells: usize,
    base_states: usize,
    base_colors: usize,
    backsymbols: usize,
    codec: Codec,
}

impl Fold for BacksymbolFold {
    fn new(cells: usize, (base_states, base_colors): (usize, usize)) -> Self {
        BacksymbolFold {
            cells,
            base_states,
            base_colors,
            backsymbols: base_colors.saturating_pow(cells as u32),
            codec: Codec {
                colors: base_colors as u64,
                cells,
            },
        }
    }

    fn cells(&self) -> usize {
        // The window also holds the scanned cell.
        1 + self.cells
    }

    fn macro_states(&self) -> usize {
        2 * self.base_states * self.backsymbols
    }

    fn macro_colors(&self) -> usize {
        self.base_colors
    }

    fn sim_lim(&self) -> usize {
        self.macro_states().saturating_mul(self.macro_colors())
    }

    fn unpack(&self, (macro_state, macro_color): Slot) -> Config {
        let (st_co, at_right) = (macro_state / 2, macro_state % 2 == 1);

        let state = st_co / self.backsymbols as State;
        let backspan = self.codec.decode(st_co % self.backsymbols as State);

        let window: Vec<Color> = if at_right {
            std::iter::once(macro_color).chain(backspan).collect()
        } else {
            backspan.into_iter().chain(std::iter::once(macro_color)).collect()
        };

        (state, !at_right, window)
    }

    fn pack(&self, (state, right_edge, window): Config) -> Instr {
        let (macro_color, backspan) = if right_edge {
            (window[0], &window[1..])
        } else {
            (window[window.len() - 1], &window[..window.len() - 1])
        };

        let macro_state = if state == HALT {
            HALT
        } else {
            State::from(!right_edge)
                + 2 * (state * self.backsymbols as State + self.codec.encode(backspan))
        };

        (macro_color, !right_edge, macro_state)
    }
}

/**************************************/

pub struct MacroMachine<'p, P: Program, L: Fold> {
    base: &'p P,
    fold: L,

    /// Lazily built transition table; `None` records a slot the base table
    /// cannot get through.
    cache: RefCell<BTreeMap<Slot, Option<Instr>>>,
}

impl<P: Program, L: Fold> Program for MacroMachine<'_, P, L> {
    fn instr(&self, slot: Slot) -> Option<Instr> {
        if let Some(&known) = self.cache.borrow().get(&slot) {
            return known;
        }

        let instr = self
            .simulate(self.fold.unpack(slot))
            .map(|config| self.fold.pack(config));

        self.cache.borrow_mut().insert(slot, instr);

        instr
    }
}

impl<'p, P: Program, L: Fold> MacroMachine<'p, P, L> {
    fn new(base: &'p P, fold: L) -> Self {
        MacroMachine {
            base,
            fold,
            cache: RefCell::new(BTreeMap::new()),
        }
    }

    pub fn params(&self) -> (usize, usize) {
        (self.fold.macro_states(), self.fold.macro_colors())
    }

    /// Run the base table inside the window until the head falls off an
    /// edge or halts. `None` if the base table has no instruction for some
    /// reached slot, or the bound runs out (an inner loop).
    fn simulate(&self, (mut state, right_edge, mut window): Config) -> Option<Config> {
        let cells = window.len();

        let mut pos = if right_edge { cells - 1 } else { 0 };

        for _ in 0..self.fold.sim_lim() {
            let scan = window[pos];

            let (color, shift, next_state) = self.base.instr((state, scan))?;

            if next_state == state {
                // A self-loop sweeps the whole same-colored stretch at once.
                if shift {
                    while window[pos] == scan {
                        window[pos] = color;
                        pos += 1;

                        if pos == cells {
                            return Some((state, true, window));
                        }
                    }
                } else {
                    while window[pos] == scan {
                        window[pos] = color;

                        if pos == 0 {
                            return Some((state, false, window));
                        }

                        pos -= 1;
                    }
                }

                continue;
            }

            window[pos] = color;
            state = next_state;

            if shift {
                pos += 1;

                if state == HALT || pos == cells {
                    return Some((state, true, window));
                }
            } else {
                if pos == 0 || state == HALT {
                    return Some((state, false, window));
                }

                pos -= 1;
            }
        }

        None
    }
}

/**************************************/

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Machine;

    const BB3: &str = "1RB ...  1LB 0RC  1LC 1LA";
    const BB5: &str = "1RB 1LC  1RC 1RB  1RD 0LE  1LA 1LD  ... 0LA";

    #[test]
    fn test_block_one_cell_mirrors_base() {
        let base: Machine = BB3.parse().unwrap();
        let block = make_block_macro(&base, (3, 2), 1);

        // Entering a 1-cell window from the left: the macro instruction is
        // the base instruction with the edge folded into the state.
        assert_eq!(block.instr((0, 0)), Some((1, true, 2)));
        assert_eq!(block.instr((2, 1)), Some((0, true, 4)));
        assert_eq!(block.instr((4, 1)), Some((1, false, 1)));

        // The base gap stays a gap.
        assert_eq!(block.instr((0, 1)), None);
    }

    #[test]
    fn test_block_two_cells() {
        let base: Machine = BB3.parse().unwrap();
        let block = make_block_macro(&base, (3, 2), 2);

        assert_eq!(block.params(), (6, 4));

        // From a blank window in state A, entered from the left, the base
        // table shuttles inside the window for six steps and leaves
        // rightward in state C with the window holding [1, 0].
        assert_eq!(block.instr((0, 0)), Some((2, true, 4)));
    }

    #[test]
    fn test_halt_passes_through() {
        let halting: Machine = "1R_ ...  ... ...".parse().unwrap();
        let block = make_block_macro(&halting, (1, 2), 2);

        let (color, shift, state) = block.instr((0, 0)).unwrap();

        assert_eq!(state, HALT);
        assert!(shift);
        assert_eq!(color, 2, "window [1, 0] encodes as 2");
    }

    #[test]
    fn test_backsymbol_construction() {
        let base: Machine = BB5.parse().unwrap();
        let back = make_backsymbol_macro(&base, (5, 2), 1);

        assert_eq!(back.params(), (20, 2));
        assert!(back.instr((0, 0)).is_some());

        // Composed: block over backsymbol.
        let block = make_block_macro(&back, back.params(), 2);
        assert!(block.instr((0, 0)).is_some());
    }

    #[test]
    fn test_codec_round_trip() {
        let codec = Codec { colors: 3, cells: 4 };

        for color in 0..81 {
            let window = codec.decode(color);
            assert_eq!(window.len(), 4);
            assert_eq!(codec.encode(&window), color);
        }
    }
}

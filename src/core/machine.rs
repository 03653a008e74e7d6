//! A Turing machine description: a finite partial instruction table in the
//! space-delimited grid format (`1RB 1LB  1LA ...`). One row per state, one
//! column per color; `...` marks an unfilled slot and `_` the halt target.

use super::{Color, Instr, Slot, State, HALT};
use serde_with::{DeserializeFromStr, SerializeDisplay};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

const UNDEFINED: char = '.';
const HALT_MARK: char = '_';
const LEFT: char = 'L';
const RIGHT: char = 'R';

#[derive(Error, Debug, Eq, PartialEq)]
#[error("not a space-delimited instruction grid")]
pub struct BadMachineText;

/// The seam between table consumers and table providers: base descriptions
/// and compiled macro machines both answer slot lookups through it.
pub trait Program {
    fn instr(&self, slot: Slot) -> Option<Instr>;
}

/// An immutable machine description of known state/color cardinality.
#[derive(SerializeDisplay, DeserializeFromStr, Clone, Debug, Eq, PartialEq)]
pub struct Machine {
    code: Vec<Vec<Option<Instr>>>,
    colors: usize,
}

impl Machine {
    pub fn states(&self) -> usize {
        self.code.len()
    }

    pub fn colors(&self) -> usize {
        self.colors
    }

    /// The `(states, colors)` pair, as macro construction wants it.
    pub fn params(&self) -> (usize, usize) {
        (self.states(), self.colors())
    }
}

impl Program for Machine {
    fn instr(&self, (state, color): Slot) -> Option<Instr> {
        *self.code.get(state as usize)?.get(color as usize)?
    }
}

fn read_cell(cell: &str) -> Result<Option<Instr>, BadMachineText> {
    if cell.contains(UNDEFINED) {
        return Ok(None);
    }

    let mut chars = cell.chars();

    let color = chars
        .next()
        .and_then(|c| c.to_digit(10))
        .ok_or(BadMachineText)?;

    let shift = match chars.next() {
        Some(RIGHT) => true,
        Some(LEFT) => false,
        _ => return Err(BadMachineText),
    };

    let state = match chars.next() {
        Some(HALT_MARK) => HALT,
        Some(c) if c.is_ascii_uppercase() => State::from(c as u8 - b'A'),
        _ => return Err(BadMachineText),
    };

    Ok(Some((Color::from(color), shift, state)))
}

fn show_cell(cell: Option<Instr>) -> String {
    match cell {
        None => "...".to_owned(),
        Some((color, shift, state)) => format!(
            "{}{}{}",
            color,
            if shift { RIGHT } else { LEFT },
            if state == HALT {
                HALT_MARK
            } else {
                char::from(state as u8 + b'A')
            },
        ),
    }
}

impl FromStr for Machine {
    type Err = BadMachineText;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let code = text
            .trim()
            .split("  ")
            .map(|row| row.split(' ').map(read_cell).collect())
            .collect::<Result<Vec<Vec<_>>, _>>()?;

        let colors = code.first().map_or(0, Vec::len);

        if colors < 2 || code.iter().any(|row| row.len() != colors) {
            return Err(BadMachineText);
        }

        Ok(Machine { code, colors })
    }
}

impl Display for Machine {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        let rows: Vec<String> = self
            .code
            .iter()
            .map(|row| {
                row.iter()
                    .map(|&cell| show_cell(cell))
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect();

        write!(f, "{}", rows.join("  "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        for text in [
            "1R_ ...  ... ...",
            "1RB 1LB  1LA ...",
            "1RB ...  1LB 0RC  1LC 1LA",
            "1RB 2LB ...  2LA 2RB 1LB",
            "1RB 1LC  1RC 1RB  1RD 0LE  1LA 1LD  ... 0LA",
        ] {
            let machine = Machine::from_str(text).unwrap();
            assert_eq!(machine.to_string(), text);

            let json = serde_json::to_string(&machine).unwrap();
            assert_eq!(serde_json::from_str::<Machine>(&json).unwrap(), machine);
        }
    }

    #[test]
    fn test_lookup() {
        let machine = Machine::from_str("1RB ...  1LB 0RC  1LC 1LA").unwrap();

        assert_eq!(machine.params(), (3, 2));
        assert_eq!(machine.instr((0, 0)), Some((1, true, 1)));
        assert_eq!(machine.instr((0, 1)), None);
        assert_eq!(machine.instr((1, 1)), Some((0, true, 2)));
        assert_eq!(machine.instr((2, 1)), Some((1, false, 0)));
        assert_eq!(machine.instr((3, 0)), None, "out of range is undefined");

        let halting = Machine::from_str("1R_ ...  ... ...").unwrap();
        assert_eq!(halting.instr((0, 0)), Some((1, true, HALT)));
    }

    #[test]
    fn test_rejects_garbage() {
        for text in ["", "1RB", "1RB 1LB  1LA", "xRB 1LB  1LA 0RA", "1QB 1LB  1LA 0RA"] {
            assert!(Machine::from_str(text).is_err(), "{text}");
        }
    }
}

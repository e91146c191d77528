//! Physical quantity kinds and their closed sets of accepted unit symbols.
//!
//! Symbols are stored exactly as given (`"mV"`, `"kHz"`), so validation is a
//! case-sensitive membership test. A field may accept the union of several
//! kinds, e.g. signal units are either a potential or a current.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{NeoError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantityKind {
    Time,
    Distance,
    Rate,
    Potential,
    Current,
}

// (symbol, long name) pairs, in the order they are offered to users
const TIME: &[(&str, &str)] = &[
    ("h", "hours"),
    ("m", "minutes"),
    ("s", "seconds"),
    ("ms", "milliseconds"),
    ("us", "microseconds"),
];
const DISTANCE: &[(&str, &str)] = &[
    ("m", "meters"),
    ("mm", "millimeters"),
    ("cm", "centimeters"),
    ("um", "micrometers"),
    ("nm", "nanometers"),
];
const RATE: &[(&str, &str)] = &[("Hz", "hertz"), ("kHz", "kilohertz")];
const POTENTIAL: &[(&str, &str)] = &[("V", "volts"), ("mV", "millivolts"), ("uV", "microvolts")];
const CURRENT: &[(&str, &str)] = &[
    ("A", "amps"),
    ("mA", "milliamps"),
    ("uA", "microamps"),
    ("nA", "nanoamps"),
];

/// Units accepted for sampled signal values.
pub const SIGNAL_UNITS: &[QuantityKind] = &[QuantityKind::Potential, QuantityKind::Current];
pub const TIME_UNITS: &[QuantityKind] = &[QuantityKind::Time];
pub const DISTANCE_UNITS: &[QuantityKind] = &[QuantityKind::Distance];
pub const WAVEFORM_UNITS: &[QuantityKind] = &[QuantityKind::Potential];

impl QuantityKind {
    pub const ALL: [QuantityKind; 5] = [
        QuantityKind::Time,
        QuantityKind::Distance,
        QuantityKind::Rate,
        QuantityKind::Potential,
        QuantityKind::Current,
    ];

    fn table(self) -> &'static [(&'static str, &'static str)] {
        match self {
            Self::Time => TIME,
            Self::Distance => DISTANCE,
            Self::Rate => RATE,
            Self::Potential => POTENTIAL,
            Self::Current => CURRENT,
        }
    }
    pub fn symbols(self) -> impl Iterator<Item = &'static str> {
        self.table().iter().map(|(symbol, _)| *symbol)
    }
    pub fn accepts(self, symbol: &str) -> bool {
        self.symbols().any(|s| s == symbol)
    }
    pub fn name(self) -> &'static str {
        match self {
            Self::Time => "time",
            Self::Distance => "distance",
            Self::Rate => "rate",
            Self::Potential => "potential",
            Self::Current => "current",
        }
    }
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }
}
impl fmt::Display for QuantityKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

pub fn is_valid_unit(kind: QuantityKind, symbol: &str) -> bool {
    kind.accepts(symbol)
}

pub fn validate_unit(kind: QuantityKind, symbol: &str) -> Result<()> {
    if kind.accepts(symbol) {
        Ok(())
    } else {
        Err(NeoError::InvalidUnit { kind, symbol: symbol.to_string() })
    }
}

/// Validates against the union of `kinds`. The error names the first kind,
/// which is the one a field is primarily documented with.
pub fn validate_unit_in(kinds: &[QuantityKind], symbol: &str) -> Result<()> {
    if kinds.iter().any(|k| k.accepts(symbol)) {
        return Ok(());
    }
    let kind = kinds.first().copied().unwrap_or(QuantityKind::Time);
    Err(NeoError::InvalidUnit { kind, symbol: symbol.to_string() })
}

/// Long name of a symbol within a kind, e.g. `("mV", potential) -> "millivolts"`.
pub fn describe_unit(kind: QuantityKind, symbol: &str) -> Option<&'static str> {
    kind.table().iter().find(|(s, _)| *s == symbol).map(|(_, name)| *name)
}

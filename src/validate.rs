//! Batch validation of entities before they reach storage.
//!
//! A [`Checker`] collects every violated rule of one mutation attempt rather
//! than stopping at the first, so a caller can present all problems at once.
//! Referential checks go through [`Referents`], which the persistence layer
//! implements on the transaction the mutation runs in.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::error::{NeoError, Result};
use crate::model::{
    AnalogSignal, Base, Block, Entity, EntityId, EntityKind, Event, EventLabel,
    IrregularlySampledSignal, RecordingChannel, RecordingChannelGroup, Segment, SpikeTrain,
    SpikeTrainFull, Unit,
};
use crate::units::{self, QuantityKind};

pub const MAX_TEXT_LENGTH: usize = 255;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum Violation {
    MissingField { field: String },
    InvalidUnit { field: String, kind: QuantityKind, symbol: String },
    LengthMismatch { field: String, expected: usize, found: usize },
    NotPositive { field: String, value: f64 },
    Negative { field: String, value: f64 },
    NonFinite { field: String },
    NotIncreasing { field: String, position: usize },
    OutOfBounds { field: String, position: usize, value: f64 },
    TimeOrder { t_start: f64, t_stop: f64 },
    RaggedArray { field: String, position: usize },
    DanglingReference { field: String, target: EntityKind, id: EntityId },
    Duplicate { field: String, value: String },
    TooLong { field: String, max: usize },
    UnknownField { field: String },
    UnsupportedOperator { field: String, op: String },
    InvalidValue { field: String, message: String },
    Malformed { message: String },
}

impl Violation {
    /// The field a violation is about, when there is a single one.
    pub fn field(&self) -> Option<&str> {
        match self {
            Violation::MissingField { field }
            | Violation::InvalidUnit { field, .. }
            | Violation::LengthMismatch { field, .. }
            | Violation::NotPositive { field, .. }
            | Violation::Negative { field, .. }
            | Violation::NonFinite { field }
            | Violation::NotIncreasing { field, .. }
            | Violation::OutOfBounds { field, .. }
            | Violation::RaggedArray { field, .. }
            | Violation::DanglingReference { field, .. }
            | Violation::Duplicate { field, .. }
            | Violation::TooLong { field, .. }
            | Violation::UnknownField { field }
            | Violation::UnsupportedOperator { field, .. }
            | Violation::InvalidValue { field, .. } => Some(field),
            Violation::TimeOrder { .. } | Violation::Malformed { .. } => None,
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Violation::MissingField { field } => write!(f, "{field} is required"),
            Violation::InvalidUnit { field, kind, symbol } => {
                write!(f, "{field}: '{symbol}' is not a {kind} unit")
            }
            Violation::LengthMismatch { field, expected, found } => {
                write!(f, "{field} has {found} elements, expected {expected}")
            }
            Violation::NotPositive { field, value } => write!(f, "{field} must be > 0, got {value}"),
            Violation::Negative { field, value } => write!(f, "{field} must be >= 0, got {value}"),
            Violation::NonFinite { field } => write!(f, "{field} contains a non-finite value"),
            Violation::NotIncreasing { field, position } => {
                write!(f, "{field} is not strictly increasing at position {position}")
            }
            Violation::OutOfBounds { field, position, value } => {
                write!(f, "{field}[{position}] = {value} lies outside [t_start, t_stop]")
            }
            Violation::TimeOrder { t_start, t_stop } => {
                write!(f, "t_start {t_start} is after t_stop {t_stop}")
            }
            Violation::RaggedArray { field, position } => {
                write!(f, "{field}[{position}] does not match the shape of {field}[0]")
            }
            Violation::DanglingReference { field, target, id } => {
                write!(f, "{field} refers to missing {target} {id}")
            }
            Violation::Duplicate { field, value } => write!(f, "{field} '{value}' is already taken"),
            Violation::TooLong { field, max } => write!(f, "{field} is longer than {max} characters"),
            Violation::UnknownField { field } => write!(f, "unknown field {field}"),
            Violation::UnsupportedOperator { field, op } => {
                write!(f, "operator {op} is not supported on {field}")
            }
            Violation::InvalidValue { field, message } => write!(f, "{field}: {message}"),
            Violation::Malformed { message } => write!(f, "{message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub struct ValidationError {
    pub kind: EntityKind,
    pub violations: Vec<Violation>,
}
impl ValidationError {
    pub fn new(kind: EntityKind, violations: Vec<Violation>) -> Self {
        Self { kind, violations }
    }
    pub fn fields(&self) -> Vec<&str> {
        self.violations.iter().filter_map(Violation::field).collect()
    }
}
impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let listed: Vec<String> = self.violations.iter().map(ToString::to_string).collect();
        write!(f, "{} failed validation: {}", self.kind, listed.join("; "))
    }
}

/// Existence and uniqueness lookups needed while validating.
pub trait Referents {
    fn exists(&self, kind: EntityKind, id: EntityId) -> Result<bool>;
    fn label_taken(&self, name: &str, except: Option<EntityId>) -> Result<bool>;
}

pub struct Checker<'r> {
    refs: &'r dyn Referents,
    violations: Vec<Violation>,
}

impl<'r> Checker<'r> {
    pub fn new(refs: &'r dyn Referents) -> Self {
        Self { refs, violations: Vec::new() }
    }
    pub fn push(&mut self, violation: Violation) {
        self.violations.push(violation);
    }
    pub fn text(&mut self, field: &str, value: Option<&str>) {
        if value.is_some_and(|v| v.chars().count() > MAX_TEXT_LENGTH) {
            self.push(Violation::TooLong { field: field.to_string(), max: MAX_TEXT_LENGTH });
        }
    }
    pub fn unit(&mut self, field: &str, kinds: &[QuantityKind], symbol: Option<&str>) {
        let Some(symbol) = symbol else { return };
        if let Err(NeoError::InvalidUnit { kind, symbol }) = units::validate_unit_in(kinds, symbol) {
            self.push(Violation::InvalidUnit { field: field.to_string(), kind, symbol });
        }
    }
    pub fn finite(&mut self, field: &str, values: &[f64]) -> bool {
        if values.iter().all(|v| v.is_finite()) {
            true
        } else {
            self.push(Violation::NonFinite { field: field.to_string() });
            false
        }
    }
    pub fn positive(&mut self, field: &str, value: f64) {
        if !self.finite(field, &[value]) {
            return;
        }
        if value <= 0.0 {
            self.push(Violation::NotPositive { field: field.to_string(), value });
        }
    }
    pub fn non_negative(&mut self, field: &str, value: f64) {
        if self.finite(field, &[value]) && value < 0.0 {
            self.push(Violation::Negative { field: field.to_string(), value });
        }
    }
    pub fn same_len(&mut self, field: &str, expected: usize, found: usize) {
        if expected != found {
            self.push(Violation::LengthMismatch { field: field.to_string(), expected, found });
        }
    }
    pub fn increasing(&mut self, field: &str, values: &[f64]) {
        if let Some(position) = values.windows(2).position(|w| w[1] <= w[0]) {
            self.push(Violation::NotIncreasing { field: field.to_string(), position: position + 1 });
        }
    }
    pub fn reference(&mut self, field: &str, target: EntityKind, id: Option<EntityId>) -> Result<()> {
        if let Some(id) = id {
            if !self.refs.exists(target, id)? {
                self.push(Violation::DanglingReference { field: field.to_string(), target, id });
            }
        }
        Ok(())
    }
    pub fn references(&mut self, field: &str, target: EntityKind, ids: &[EntityId]) -> Result<()> {
        for id in ids {
            self.reference(field, target, Some(*id))?;
        }
        Ok(())
    }
    pub fn finish(self, kind: EntityKind) -> Result<()> {
        if self.violations.is_empty() {
            Ok(())
        } else {
            Err(NeoError::Validation(ValidationError::new(kind, self.violations)))
        }
    }
}

pub trait Validate {
    fn check(&self, checker: &mut Checker) -> Result<()>;
}

/// Runs every rule for `entity` and fails with all violations found.
pub fn validate<T: Entity + Validate>(entity: &T, refs: &dyn Referents) -> Result<()> {
    let mut checker = Checker::new(refs);
    entity.check(&mut checker)?;
    checker.finish(T::KIND)
}

fn check_base(base: &Base, checker: &mut Checker) {
    checker.text("name", base.name.as_deref());
    checker.text("file_origin", base.file_origin.as_deref());
}

impl Validate for Block {
    fn check(&self, checker: &mut Checker) -> Result<()> {
        check_base(&self.base, checker);
        Ok(())
    }
}

impl Validate for Segment {
    fn check(&self, checker: &mut Checker) -> Result<()> {
        check_base(&self.base, checker);
        checker.reference("block", EntityKind::Block, self.block)
    }
}

impl Validate for RecordingChannelGroup {
    fn check(&self, checker: &mut Checker) -> Result<()> {
        check_base(&self.base, checker);
        checker.reference("block", EntityKind::Block, self.block)?;
        checker.references("recording_channels", EntityKind::RecordingChannel, &self.recording_channels)
    }
}

impl Validate for RecordingChannel {
    fn check(&self, checker: &mut Checker) -> Result<()> {
        check_base(&self.base, checker);
        let coordinates: Vec<f64> = [self.x, self.y, self.z].into_iter().flatten().collect();
        checker.finite("coordinate", &coordinates);
        checker.unit("coord_units", units::DISTANCE_UNITS, self.coord_units.as_deref());
        Ok(())
    }
}

impl Validate for Unit {
    fn check(&self, checker: &mut Checker) -> Result<()> {
        check_base(&self.base, checker);
        checker.references(
            "recording_channel_groups",
            EntityKind::RecordingChannelGroup,
            &self.recording_channel_groups,
        )
    }
}

impl Validate for AnalogSignal {
    fn check(&self, checker: &mut Checker) -> Result<()> {
        check_base(&self.base, checker);
        checker.finite("signal", &self.signal);
        checker.unit("signal_units", units::SIGNAL_UNITS, self.signal_units.as_deref());
        checker.finite("t_start", &[self.t_start]);
        checker.unit("t_units", units::TIME_UNITS, self.t_units.as_deref());
        checker.positive("sampling_rate", self.sampling_rate);
        checker.reference("segment", EntityKind::Segment, Some(self.segment))?;
        checker.reference("recording_channel", EntityKind::RecordingChannel, self.recording_channel)
    }
}

impl Validate for IrregularlySampledSignal {
    fn check(&self, checker: &mut Checker) -> Result<()> {
        check_base(&self.base, checker);
        checker.same_len("signal", self.times.len(), self.signal.len());
        if checker.finite("times", &self.times) {
            checker.increasing("times", &self.times);
        }
        checker.finite("signal", &self.signal);
        checker.unit("t_units", units::TIME_UNITS, self.t_units.as_deref());
        checker.unit("signal_units", units::SIGNAL_UNITS, self.signal_units.as_deref());
        checker.reference("segment", EntityKind::Segment, Some(self.segment))?;
        checker.reference("recording_channel", EntityKind::RecordingChannel, self.recording_channel)
    }
}

impl Validate for SpikeTrain {
    fn check(&self, checker: &mut Checker) -> Result<()> {
        check_base(&self.base, checker);
        let bounded = checker.finite("t_start", &[self.t_start]) & checker.finite("t_stop", &[self.t_stop]);
        if bounded && self.t_start > self.t_stop {
            checker.push(Violation::TimeOrder { t_start: self.t_start, t_stop: self.t_stop });
        }
        if checker.finite("times", &self.times) && bounded {
            if let Some((position, value)) = self
                .times
                .iter()
                .enumerate()
                .find(|(_, t)| **t < self.t_start || **t > self.t_stop)
            {
                checker.push(Violation::OutOfBounds { field: "times".to_string(), position, value: *value });
            }
        }
        checker.unit("t_units", units::TIME_UNITS, self.t_units.as_deref());
        checker.reference("segment", EntityKind::Segment, Some(self.segment))?;
        checker.reference("unit", EntityKind::Unit, self.unit)
    }
}

impl Validate for SpikeTrainFull {
    fn check(&self, checker: &mut Checker) -> Result<()> {
        self.train.check(checker)?;
        checker.same_len("waveforms", self.train.times.len(), self.waveforms.len());
        let (_, channels, samples) = self.waveform_shape();
        let ragged = self.waveforms.iter().position(|spike| {
            spike.len() != channels || spike.iter().any(|channel| channel.len() != samples)
        });
        if let Some(position) = ragged {
            checker.push(Violation::RaggedArray { field: "waveforms".to_string(), position });
        }
        let flat: Vec<f64> = self.waveforms.iter().flatten().flatten().copied().collect();
        checker.finite("waveforms", &flat);
        checker.unit("waveform_units", units::WAVEFORM_UNITS, Some(self.waveform_units.as_str()));
        checker.positive("sampling_rate", self.sampling_rate);
        checker.finite("left_sweep", &[self.left_sweep]);
        Ok(())
    }
}

impl Validate for Event {
    fn check(&self, checker: &mut Checker) -> Result<()> {
        check_base(&self.base, checker);
        checker.finite("time", &[self.time]);
        if let Some(duration) = self.duration {
            checker.non_negative("duration", duration);
        }
        checker.reference("segment", EntityKind::Segment, Some(self.segment))?;
        checker.reference("label", EntityKind::EventLabel, Some(self.label))
    }
}

impl Validate for EventLabel {
    fn check(&self, checker: &mut Checker) -> Result<()> {
        if self.name.trim().is_empty() {
            checker.push(Violation::MissingField { field: "name".to_string() });
            return Ok(());
        }
        checker.text("name", Some(&self.name));
        if checker.refs.label_taken(&self.name, self.id)? {
            checker.push(Violation::Duplicate { field: "name".to_string(), value: self.name.clone() });
        }
        Ok(())
    }
}

///
/// The Neo entity schema for electrophysiology recordings.
///
/// Entities fall into four families:
/// - Containers: Block, Segment
/// - Groups: RecordingChannelGroup, RecordingChannel, Unit
/// - Data: AnalogSignal, IrregularlySampledSignal, SpikeTrain, SpikeTrainFull, Event
/// - Lookups: EventLabel
///
/// Shared attributes are factored into embedded structs (`Base`,
/// `ContainerFields`) that are flattened when an entity is serialized, so a
/// record reads as one flat field map. Fetching "the concrete subtype" of a
/// family is a match on the tagged unions at the bottom of this module.
///
/// Relationships are plain identities. Ownership edges (Segment -> Block,
/// Data -> Segment) and references (AnalogSignal -> RecordingChannel) are
/// single ids, many-to-many associations are id lists that the persistence
/// layer keeps in link tables.
///
/// Derived sampling quantities are methods, never fields.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::derive;
use crate::error::{NeoError, Result};
use crate::schema;
use crate::validate::{ValidationError, Violation};

// ------------- Identity -------------
pub type EntityId = u64;
pub type Annotations = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Block,
    Segment,
    RecordingChannelGroup,
    RecordingChannel,
    Unit,
    AnalogSignal,
    IrregularlySampledSignal,
    SpikeTrain,
    SpikeTrainFull,
    Event,
    EventLabel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Family {
    Container,
    Group,
    Data,
    Lookup,
}

impl EntityKind {
    pub const ALL: [EntityKind; 11] = [
        EntityKind::Block,
        EntityKind::Segment,
        EntityKind::RecordingChannelGroup,
        EntityKind::RecordingChannel,
        EntityKind::Unit,
        EntityKind::AnalogSignal,
        EntityKind::IrregularlySampledSignal,
        EntityKind::SpikeTrain,
        EntityKind::SpikeTrainFull,
        EntityKind::Event,
        EntityKind::EventLabel,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Block => "block",
            Self::Segment => "segment",
            Self::RecordingChannelGroup => "recording_channel_group",
            Self::RecordingChannel => "recording_channel",
            Self::Unit => "unit",
            Self::AnalogSignal => "analog_signal",
            Self::IrregularlySampledSignal => "irregularly_sampled_signal",
            Self::SpikeTrain => "spike_train",
            Self::SpikeTrainFull => "spike_train_full",
            Self::Event => "event",
            Self::EventLabel => "event_label",
        }
    }
    /// Name of the backing table, which is also the prefix of its identity column.
    pub fn table(self) -> &'static str {
        match self {
            Self::Block => "Block",
            Self::Segment => "Segment",
            Self::RecordingChannelGroup => "RecordingChannelGroup",
            Self::RecordingChannel => "RecordingChannel",
            Self::Unit => "Unit",
            Self::AnalogSignal => "AnalogSignal",
            Self::IrregularlySampledSignal => "IrregularlySampledSignal",
            Self::SpikeTrain => "SpikeTrain",
            Self::SpikeTrainFull => "SpikeTrainFull",
            Self::Event => "Event",
            Self::EventLabel => "EventLabel",
        }
    }
    pub fn family(self) -> Family {
        match self {
            Self::Block | Self::Segment => Family::Container,
            Self::RecordingChannelGroup | Self::RecordingChannel | Self::Unit => Family::Group,
            Self::EventLabel => Family::Lookup,
            _ => Family::Data,
        }
    }
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }
}
impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A `(kind, id)` pair addressing any entity. Used as a lookup key only,
/// for example by annotation stores, never as an ownership edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: EntityId,
}
impl EntityRef {
    pub fn new(kind: EntityKind, id: EntityId) -> Self {
        Self { kind, id }
    }
}
impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.id)
    }
}

// ------------- Shared attributes -------------
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Base {
    #[serde(default)]
    pub id: Option<EntityId>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub file_origin: Option<String>,
    #[serde(default)]
    pub annotations: Annotations,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modified: Option<DateTime<Utc>>,
}
impl Base {
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: Some(name.into()), ..Self::default() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerFields {
    #[serde(default)]
    pub file_datetime: Option<DateTime<Utc>>,
    #[serde(default)]
    pub rec_datetime: Option<DateTime<Utc>>,
    #[serde(default)]
    pub index: Option<u32>,
}

pub trait Entity: Clone + fmt::Debug + Serialize + DeserializeOwned + Send + 'static {
    const KIND: EntityKind;
    fn id(&self) -> Option<EntityId>;
    fn set_id(&mut self, id: EntityId);
    /// Lookups carry no base attributes.
    fn base(&self) -> Option<&Base> {
        None
    }
    fn base_mut(&mut self) -> Option<&mut Base> {
        None
    }
    /// Brings the entity into the canonical form it is stored in.
    fn normalize(&mut self) {}
    fn into_record(self) -> Record;
    fn from_record(record: Record) -> Option<Self>;
    fn entity_ref(&self) -> Option<EntityRef> {
        self.id().map(|id| EntityRef::new(Self::KIND, id))
    }
}

macro_rules! entity_with_base {
    ($ty:ident, $($base:ident).+) => {
        const KIND: EntityKind = EntityKind::$ty;
        fn id(&self) -> Option<EntityId> {
            self.$($base).+.id
        }
        fn set_id(&mut self, id: EntityId) {
            self.$($base).+.id = Some(id);
        }
        fn base(&self) -> Option<&Base> {
            Some(&self.$($base).+)
        }
        fn base_mut(&mut self) -> Option<&mut Base> {
            Some(&mut self.$($base).+)
        }
        fn into_record(self) -> Record {
            Record::$ty(self)
        }
        fn from_record(record: Record) -> Option<Self> {
            match record {
                Record::$ty(entity) => Some(entity),
                _ => None,
            }
        }
    };
}

// ------------- Containers -------------
/// The top-level container of one recording session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Block {
    #[serde(flatten)]
    pub base: Base,
    #[serde(flatten)]
    pub container: ContainerFields,
}
impl Block {
    pub fn named(name: impl Into<String>) -> Self {
        Self { base: Base::named(name), ..Self::default() }
    }
}
impl Entity for Block {
    entity_with_base!(Block, base);
}

/// One epoch sharing a common clock, e.g. a trial. May be unattached.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    #[serde(flatten)]
    pub base: Base,
    #[serde(flatten)]
    pub container: ContainerFields,
    #[serde(default)]
    pub block: Option<EntityId>,
}
impl Segment {
    pub fn new(block: Option<EntityId>) -> Self {
        Self { block, ..Self::default() }
    }
    pub fn named(name: impl Into<String>, block: Option<EntityId>) -> Self {
        Self { base: Base::named(name), block, ..Self::default() }
    }
}
impl Entity for Segment {
    entity_with_base!(Segment, base);
}

// ------------- Groups -------------
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordingChannelGroup {
    #[serde(flatten)]
    pub base: Base,
    #[serde(default)]
    pub block: Option<EntityId>,
    #[serde(default)]
    pub recording_channels: Vec<EntityId>,
}
impl RecordingChannelGroup {
    pub fn new(block: Option<EntityId>, recording_channels: Vec<EntityId>) -> Self {
        Self { block, recording_channels, ..Self::default() }
    }
}
impl Entity for RecordingChannelGroup {
    entity_with_base!(RecordingChannelGroup, base);
    fn normalize(&mut self) {
        self.recording_channels.sort_unstable();
        self.recording_channels.dedup();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordingChannel {
    #[serde(flatten)]
    pub base: Base,
    pub index: u32,
    #[serde(default)]
    pub x: Option<f64>,
    #[serde(default)]
    pub y: Option<f64>,
    #[serde(default)]
    pub z: Option<f64>,
    #[serde(default)]
    pub coord_units: Option<String>,
}
impl RecordingChannel {
    pub fn new(index: u32) -> Self {
        Self { index, ..Self::default() }
    }
    pub fn coordinate(&self) -> (Option<f64>, Option<f64>, Option<f64>) {
        (self.x, self.y, self.z)
    }
}
impl Entity for RecordingChannel {
    entity_with_base!(RecordingChannel, base);
}

/// A putative single neural source detected across one or more channel groups.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    #[serde(flatten)]
    pub base: Base,
    #[serde(default)]
    pub recording_channel_groups: Vec<EntityId>,
}
impl Unit {
    pub fn new(recording_channel_groups: Vec<EntityId>) -> Self {
        Self { recording_channel_groups, ..Self::default() }
    }
}
impl Entity for Unit {
    entity_with_base!(Unit, base);
    fn normalize(&mut self) {
        self.recording_channel_groups.sort_unstable();
        self.recording_channel_groups.dedup();
    }
}

// ------------- Data -------------
/// A regular sampling of a continuous signal. Only `sampling_rate` is
/// stored; period, duration and stop time are derived from it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalogSignal {
    #[serde(flatten)]
    pub base: Base,
    pub segment: EntityId,
    pub signal: Vec<f64>,
    #[serde(default)]
    pub signal_units: Option<String>,
    #[serde(default)]
    pub t_start: f64,
    #[serde(default)]
    pub t_units: Option<String>,
    pub sampling_rate: f64,
    #[serde(default)]
    pub recording_channel: Option<EntityId>,
}
impl AnalogSignal {
    pub fn new(segment: EntityId, signal: Vec<f64>, sampling_rate: f64) -> Self {
        Self { segment, signal, sampling_rate, ..Self::default() }
    }
    pub fn sampling_period(&self) -> Result<f64> {
        derive::sampling_period(self.sampling_rate)
    }
    pub fn set_sampling_period(&mut self, period: f64) -> Result<()> {
        self.sampling_rate = derive::sampling_rate_from_period(period)?;
        Ok(())
    }
    pub fn duration(&self) -> Result<f64> {
        Ok(derive::duration(self.signal.len(), self.sampling_period()?))
    }
    pub fn t_stop(&self) -> Result<f64> {
        Ok(derive::t_stop(self.t_start, self.duration()?))
    }
}
impl Entity for AnalogSignal {
    entity_with_base!(AnalogSignal, base);
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IrregularlySampledSignal {
    #[serde(flatten)]
    pub base: Base,
    pub segment: EntityId,
    pub times: Vec<f64>,
    pub signal: Vec<f64>,
    #[serde(default)]
    pub t_units: Option<String>,
    #[serde(default)]
    pub signal_units: Option<String>,
    #[serde(default)]
    pub recording_channel: Option<EntityId>,
}
impl IrregularlySampledSignal {
    pub fn new(segment: EntityId, times: Vec<f64>, signal: Vec<f64>) -> Self {
        Self { segment, times, signal, ..Self::default() }
    }
    pub fn t_start(&self) -> Option<f64> {
        self.times.first().copied()
    }
    pub fn t_stop(&self) -> Option<f64> {
        self.times.last().copied()
    }
}
impl Entity for IrregularlySampledSignal {
    entity_with_base!(IrregularlySampledSignal, base);
}

/// Spike times emitted by one unit within `[t_start, t_stop]`. Times may be
/// written in any order and are stored sorted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpikeTrain {
    #[serde(flatten)]
    pub base: Base,
    pub segment: EntityId,
    pub times: Vec<f64>,
    #[serde(default)]
    pub t_start: f64,
    pub t_stop: f64,
    #[serde(default)]
    pub t_units: Option<String>,
    #[serde(default)]
    pub unit: Option<EntityId>,
}
impl SpikeTrain {
    pub fn new(segment: EntityId, times: Vec<f64>, t_stop: f64) -> Self {
        Self { segment, times, t_stop, ..Self::default() }
    }
    pub fn duration(&self) -> f64 {
        self.t_stop - self.t_start
    }
}
impl Entity for SpikeTrain {
    entity_with_base!(SpikeTrain, base);
    fn normalize(&mut self) {
        self.times.sort_by(f64::total_cmp);
    }
}

/// A spike train with per-spike waveforms laid out as `[spike][channel][time]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpikeTrainFull {
    #[serde(flatten)]
    pub train: SpikeTrain,
    pub waveforms: Vec<Vec<Vec<f64>>>,
    pub waveform_units: String,
    pub sampling_rate: f64,
    pub left_sweep: f64,
    #[serde(default)]
    pub sort: bool,
}
impl SpikeTrainFull {
    pub fn new(
        train: SpikeTrain,
        waveforms: Vec<Vec<Vec<f64>>>,
        waveform_units: impl Into<String>,
        sampling_rate: f64,
        left_sweep: f64,
    ) -> Self {
        Self {
            train,
            waveforms,
            waveform_units: waveform_units.into(),
            sampling_rate,
            left_sweep,
            sort: false,
        }
    }
    pub fn sampling_period(&self) -> Result<f64> {
        derive::sampling_period(self.sampling_rate)
    }
    pub fn set_sampling_period(&mut self, period: f64) -> Result<()> {
        self.sampling_rate = derive::sampling_rate_from_period(period)?;
        Ok(())
    }
    /// `(spikes, channels, samples)`, taken from the first waveform.
    pub fn waveform_shape(&self) -> (usize, usize, usize) {
        let channels = self.waveforms.first().map_or(0, Vec::len);
        let samples = self
            .waveforms
            .first()
            .and_then(|w| w.first())
            .map_or(0, Vec::len);
        (self.waveforms.len(), channels, samples)
    }
}
impl Entity for SpikeTrainFull {
    entity_with_base!(SpikeTrainFull, train.base);
    // Waveforms travel with their spike times. When the pairing is already
    // broken the record is left alone for validation to report.
    fn normalize(&mut self) {
        if self.waveforms.len() != self.train.times.len() {
            return;
        }
        let mut order: Vec<usize> = (0..self.train.times.len()).collect();
        order.sort_by(|a, b| self.train.times[*a].total_cmp(&self.train.times[*b]));
        let times: Vec<f64> = order.iter().map(|i| self.train.times[*i]).collect();
        let mut waveforms: Vec<Option<Vec<Vec<f64>>>> =
            std::mem::take(&mut self.waveforms).into_iter().map(Some).collect();
        self.waveforms = order.iter().filter_map(|i| waveforms[*i].take()).collect();
        self.train.times = times;
        self.sort = true;
    }
}

/// A labeled point in time, optionally with a duration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(flatten)]
    pub base: Base,
    pub segment: EntityId,
    pub time: f64,
    pub label: EntityId,
    #[serde(default)]
    pub duration: Option<f64>,
}
impl Event {
    pub fn new(segment: EntityId, time: f64, label: EntityId) -> Self {
        Self { segment, time, label, ..Self::default() }
    }
}
impl Entity for Event {
    entity_with_base!(Event, base);
}

// ------------- Lookups -------------
/// Globally shared classification tag for events, unique by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventLabel {
    #[serde(default)]
    pub id: Option<EntityId>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}
impl EventLabel {
    pub fn new(name: impl Into<String>) -> Self {
        Self { id: None, name: name.into(), description: None }
    }
}
impl Entity for EventLabel {
    const KIND: EntityKind = EntityKind::EventLabel;
    fn id(&self) -> Option<EntityId> {
        self.id
    }
    fn set_id(&mut self, id: EntityId) {
        self.id = Some(id);
    }
    fn into_record(self) -> Record {
        Record::EventLabel(self)
    }
    fn from_record(record: Record) -> Option<Self> {
        match record {
            Record::EventLabel(label) => Some(label),
            _ => None,
        }
    }
}

// ------------- Tagged unions -------------
#[derive(Debug, Clone, PartialEq)]
pub enum Container {
    Block(Block),
    Segment(Segment),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Group {
    RecordingChannelGroup(RecordingChannelGroup),
    RecordingChannel(RecordingChannel),
    Unit(Unit),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Data {
    AnalogSignal(AnalogSignal),
    IrregularlySampledSignal(IrregularlySampledSignal),
    SpikeTrain(SpikeTrain),
    SpikeTrainFull(SpikeTrainFull),
    Event(Event),
}
impl Data {
    pub fn kind(&self) -> EntityKind {
        match self {
            Data::AnalogSignal(_) => EntityKind::AnalogSignal,
            Data::IrregularlySampledSignal(_) => EntityKind::IrregularlySampledSignal,
            Data::SpikeTrain(_) => EntityKind::SpikeTrain,
            Data::SpikeTrainFull(_) => EntityKind::SpikeTrainFull,
            Data::Event(_) => EntityKind::Event,
        }
    }
    pub fn base(&self) -> &Base {
        match self {
            Data::AnalogSignal(d) => &d.base,
            Data::IrregularlySampledSignal(d) => &d.base,
            Data::SpikeTrain(d) => &d.base,
            Data::SpikeTrainFull(d) => &d.train.base,
            Data::Event(d) => &d.base,
        }
    }
    pub fn segment(&self) -> EntityId {
        match self {
            Data::AnalogSignal(d) => d.segment,
            Data::IrregularlySampledSignal(d) => d.segment,
            Data::SpikeTrain(d) => d.segment,
            Data::SpikeTrainFull(d) => d.train.segment,
            Data::Event(d) => d.segment,
        }
    }
}

/// Any entity, tagged by its kind. This is the loosely typed form used by
/// generic collaborators and by bulk imports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Record {
    Block(Block),
    Segment(Segment),
    RecordingChannelGroup(RecordingChannelGroup),
    RecordingChannel(RecordingChannel),
    Unit(Unit),
    AnalogSignal(AnalogSignal),
    IrregularlySampledSignal(IrregularlySampledSignal),
    SpikeTrain(SpikeTrain),
    SpikeTrainFull(SpikeTrainFull),
    Event(Event),
    EventLabel(EventLabel),
}

impl Record {
    pub fn kind(&self) -> EntityKind {
        match self {
            Record::Block(_) => EntityKind::Block,
            Record::Segment(_) => EntityKind::Segment,
            Record::RecordingChannelGroup(_) => EntityKind::RecordingChannelGroup,
            Record::RecordingChannel(_) => EntityKind::RecordingChannel,
            Record::Unit(_) => EntityKind::Unit,
            Record::AnalogSignal(_) => EntityKind::AnalogSignal,
            Record::IrregularlySampledSignal(_) => EntityKind::IrregularlySampledSignal,
            Record::SpikeTrain(_) => EntityKind::SpikeTrain,
            Record::SpikeTrainFull(_) => EntityKind::SpikeTrainFull,
            Record::Event(_) => EntityKind::Event,
            Record::EventLabel(_) => EntityKind::EventLabel,
        }
    }
    pub fn id(&self) -> Option<EntityId> {
        match self {
            Record::Block(e) => e.id(),
            Record::Segment(e) => e.id(),
            Record::RecordingChannelGroup(e) => e.id(),
            Record::RecordingChannel(e) => e.id(),
            Record::Unit(e) => e.id(),
            Record::AnalogSignal(e) => e.id(),
            Record::IrregularlySampledSignal(e) => e.id(),
            Record::SpikeTrain(e) => e.id(),
            Record::SpikeTrainFull(e) => e.id(),
            Record::Event(e) => e.id(),
            Record::EventLabel(e) => e.id(),
        }
    }

    /// Builds a record from a loose field map. Every absent required field
    /// is reported at once. Names the kind does not store, and values of the
    /// wrong shape, become a validation error. A `sampling_period` is
    /// accepted wherever a `sampling_rate` is stored and replaces it.
    pub fn from_fields(kind: EntityKind, fields: &Map<String, Value>) -> Result<Record> {
        let described = schema::describe(kind);
        let mut fields = fields.clone();
        let mut violations = Vec::new();
        if let Some(tag) = fields.remove("kind") {
            if tag.as_str() != Some(kind.name()) {
                violations.push(Violation::InvalidValue {
                    field: "kind".to_string(),
                    message: format!("{tag} does not name a {kind}"),
                });
            }
        }
        if let Some(period) = fields.remove("sampling_period") {
            match rate_from_period(kind, &period) {
                Ok(rate) => {
                    fields.insert("sampling_rate".to_string(), rate);
                }
                Err(violation) => violations.push(violation),
            }
        }
        for name in fields.keys() {
            match described.field(name) {
                None => violations.push(Violation::UnknownField { field: name.clone() }),
                Some(field) if !field.writable() => violations.push(Violation::InvalidValue {
                    field: name.clone(),
                    message: "is read from the related rows and cannot be set".to_string(),
                }),
                Some(_) => {}
            }
        }
        if !violations.is_empty() {
            return Err(ValidationError::new(kind, violations).into());
        }
        let missing: Vec<String> = described
            .required_fields()
            .filter(|f| fields.get(f.name).is_none_or(Value::is_null))
            .map(|f| f.name.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(NeoError::MissingField { kind, fields: missing });
        }
        fields.insert("kind".to_string(), Value::String(kind.name().to_string()));
        serde_json::from_value(Value::Object(fields)).map_err(|e| {
            NeoError::Validation(ValidationError::new(
                kind,
                vec![Violation::Malformed { message: e.to_string() }],
            ))
        })
    }

    pub fn to_fields(&self) -> Result<Map<String, Value>> {
        match serde_json::to_value(self)? {
            Value::Object(mut fields) => {
                fields.remove("kind");
                Ok(fields)
            }
            _ => Err(NeoError::StorageUnavailable(format!(
                "{} did not serialize to a field map",
                self.kind()
            ))),
        }
    }

    pub fn into_container(self) -> Option<Container> {
        match self {
            Record::Block(e) => Some(Container::Block(e)),
            Record::Segment(e) => Some(Container::Segment(e)),
            _ => None,
        }
    }
    pub fn into_group(self) -> Option<Group> {
        match self {
            Record::RecordingChannelGroup(e) => Some(Group::RecordingChannelGroup(e)),
            Record::RecordingChannel(e) => Some(Group::RecordingChannel(e)),
            Record::Unit(e) => Some(Group::Unit(e)),
            _ => None,
        }
    }
    pub fn into_data(self) -> Option<Data> {
        match self {
            Record::AnalogSignal(e) => Some(Data::AnalogSignal(e)),
            Record::IrregularlySampledSignal(e) => Some(Data::IrregularlySampledSignal(e)),
            Record::SpikeTrain(e) => Some(Data::SpikeTrain(e)),
            Record::SpikeTrainFull(e) => Some(Data::SpikeTrainFull(e)),
            Record::Event(e) => Some(Data::Event(e)),
            _ => None,
        }
    }
}

fn rate_from_period(kind: EntityKind, period: &Value) -> std::result::Result<Value, Violation> {
    let field = "sampling_period".to_string();
    if schema::describe(kind).field("sampling_rate").is_none() {
        return Err(Violation::UnknownField { field });
    }
    let Some(period) = period.as_f64() else {
        return Err(Violation::InvalidValue { field, message: format!("{period} is not a number") });
    };
    derive::sampling_rate_from_period(period)
        .map(Value::from)
        .map_err(|e| Violation::InvalidValue { field, message: e.to_string() })
}

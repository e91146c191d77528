//! Field catalogue per entity kind.
//!
//! A generic collaborator (a form builder, a resource layer) can render or
//! filter any entity from this description alone: field names, value types,
//! whether a field is required, which unit quantity kinds it accepts and
//! where a relation field points. The query layer compiles filters and
//! ordering from the same tables, so what is described is what is
//! filterable.

use serde::Serialize;

use crate::model::{EntityKind, Family};
use crate::units::{self, QuantityKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Id,
    Text,
    Integer,
    Float,
    Boolean,
    DateTime,
    FloatArray,
    WaveformArray,
    Annotations,
    ToOne,
    ToMany,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "via", rename_all = "snake_case")]
pub enum Relation {
    /// A column of this entity holds the target's id.
    Reference { target: EntityKind },
    /// Rows of `target` point back at this entity through `column`.
    Children {
        target: EntityKind,
        #[serde(skip)]
        column: &'static str,
    },
    /// Association rows in a link table. `stored` tells whether this side's
    /// struct carries the id list; the other side only reads it.
    Link {
        target: EntityKind,
        #[serde(skip)]
        table: &'static str,
        #[serde(skip)]
        own: &'static str,
        #[serde(skip)]
        other: &'static str,
        stored: bool,
    },
}
impl Relation {
    pub fn target(&self) -> EntityKind {
        match self {
            Relation::Reference { target }
            | Relation::Children { target, .. }
            | Relation::Link { target, .. } => *target,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct FieldInfo {
    pub name: &'static str,
    pub field_type: FieldType,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub units: Option<&'static [QuantityKind]>,
    #[serde(skip)]
    pub column: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relation: Option<Relation>,
}

impl FieldInfo {
    /// Whether a record carries this field. Relations read from other rows
    /// (children and the non-owning side of a link) only exist in the store.
    pub fn writable(&self) -> bool {
        !matches!(self.relation, Some(Relation::Children { .. } | Relation::Link { stored: false, .. }))
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct OrderKey {
    pub field: &'static str,
    pub descending: bool,
}

#[derive(Debug, Serialize)]
pub struct EntitySchema {
    pub kind: EntityKind,
    pub family: Family,
    pub fields: &'static [FieldInfo],
    /// Default ordering; the id ascending always breaks remaining ties.
    pub natural_order: &'static [OrderKey],
}
impl EntitySchema {
    pub fn field(&self, name: &str) -> Option<&'static FieldInfo> {
        self.fields.iter().find(|f| f.name == name)
    }
    pub fn required_fields(&self) -> impl Iterator<Item = &'static FieldInfo> {
        self.fields.iter().filter(|f| f.required)
    }
}

const fn scalar(name: &'static str, field_type: FieldType, column: &'static str) -> FieldInfo {
    FieldInfo { name, field_type, required: false, units: None, column: Some(column), relation: None }
}
const fn required(field: FieldInfo) -> FieldInfo {
    FieldInfo { required: true, ..field }
}
const fn measured(name: &'static str, column: &'static str, kinds: &'static [QuantityKind]) -> FieldInfo {
    FieldInfo { units: Some(kinds), ..scalar(name, FieldType::Text, column) }
}
const fn reference(name: &'static str, column: &'static str, target: EntityKind) -> FieldInfo {
    FieldInfo {
        name,
        field_type: FieldType::ToOne,
        required: false,
        units: None,
        column: Some(column),
        relation: Some(Relation::Reference { target }),
    }
}
const fn children(name: &'static str, target: EntityKind, column: &'static str) -> FieldInfo {
    FieldInfo {
        name,
        field_type: FieldType::ToMany,
        required: false,
        units: None,
        column: None,
        relation: Some(Relation::Children { target, column }),
    }
}
const fn link(
    name: &'static str,
    target: EntityKind,
    table: &'static str,
    own: &'static str,
    other: &'static str,
    stored: bool,
) -> FieldInfo {
    FieldInfo {
        name,
        field_type: FieldType::ToMany,
        required: false,
        units: None,
        column: None,
        relation: Some(Relation::Link { target, table, own, other, stored }),
    }
}

// link tables
pub const GROUP_CHANNEL_LINK: &str = "RecordingChannelGroup_RecordingChannel";
pub const UNIT_GROUP_LINK: &str = "Unit_RecordingChannelGroup";

// base attributes
const ID: FieldInfo = FieldInfo {
    name: "id",
    field_type: FieldType::Id,
    required: false,
    units: None,
    column: None,
    relation: None,
};
const NAME: FieldInfo = scalar("name", FieldType::Text, "Name");
const DESCRIPTION: FieldInfo = scalar("description", FieldType::Text, "Description");
const FILE_ORIGIN: FieldInfo = scalar("file_origin", FieldType::Text, "FileOrigin");
const ANNOTATIONS: FieldInfo = scalar("annotations", FieldType::Annotations, "Annotations");
const CREATED: FieldInfo = scalar("created", FieldType::DateTime, "Created");
const MODIFIED: FieldInfo = scalar("modified", FieldType::DateTime, "Modified");
// container attributes
const FILE_DATETIME: FieldInfo = scalar("file_datetime", FieldType::DateTime, "FileDatetime");
const REC_DATETIME: FieldInfo = scalar("rec_datetime", FieldType::DateTime, "RecDatetime");
const POSITION: FieldInfo = scalar("index", FieldType::Integer, "Position");
// data attributes
const SEGMENT: FieldInfo = required(reference("segment", "Segment_Identity", EntityKind::Segment));
const SIGNAL: FieldInfo = required(scalar("signal", FieldType::FloatArray, "Signal"));
const TIMES: FieldInfo = required(scalar("times", FieldType::FloatArray, "Times"));
const SIGNAL_UNITS: FieldInfo = measured("signal_units", "SignalUnits", units::SIGNAL_UNITS);
const T_START: FieldInfo = scalar("t_start", FieldType::Float, "TStart");
const T_STOP: FieldInfo = required(scalar("t_stop", FieldType::Float, "TStop"));
const T_UNITS: FieldInfo = measured("t_units", "TUnits", units::TIME_UNITS);
const SAMPLING_RATE: FieldInfo = required(scalar("sampling_rate", FieldType::Float, "SamplingRate"));
const RECORDING_CHANNEL: FieldInfo =
    reference("recording_channel", "RecordingChannel_Identity", EntityKind::RecordingChannel);
const UNIT: FieldInfo = reference("unit", "Unit_Identity", EntityKind::Unit);

const CONTAINER_ORDER: &[OrderKey] = &[
    OrderKey { field: "rec_datetime", descending: true },
    OrderKey { field: "file_datetime", descending: true },
    OrderKey { field: "index", descending: false },
];

static BLOCK: EntitySchema = EntitySchema {
    kind: EntityKind::Block,
    family: Family::Container,
    fields: &[
        ID, NAME, DESCRIPTION, FILE_ORIGIN, ANNOTATIONS, CREATED, MODIFIED,
        FILE_DATETIME, REC_DATETIME, POSITION,
        children("segments", EntityKind::Segment, "Block_Identity"),
        children("recording_channel_groups", EntityKind::RecordingChannelGroup, "Block_Identity"),
    ],
    natural_order: CONTAINER_ORDER,
};

static SEGMENT_SCHEMA: EntitySchema = EntitySchema {
    kind: EntityKind::Segment,
    family: Family::Container,
    fields: &[
        ID, NAME, DESCRIPTION, FILE_ORIGIN, ANNOTATIONS, CREATED, MODIFIED,
        FILE_DATETIME, REC_DATETIME, POSITION,
        reference("block", "Block_Identity", EntityKind::Block),
        children("analog_signals", EntityKind::AnalogSignal, "Segment_Identity"),
        children("irregularly_sampled_signals", EntityKind::IrregularlySampledSignal, "Segment_Identity"),
        children("spike_trains", EntityKind::SpikeTrain, "Segment_Identity"),
        children("spike_trains_full", EntityKind::SpikeTrainFull, "Segment_Identity"),
        children("events", EntityKind::Event, "Segment_Identity"),
    ],
    natural_order: CONTAINER_ORDER,
};

static RECORDING_CHANNEL_GROUP: EntitySchema = EntitySchema {
    kind: EntityKind::RecordingChannelGroup,
    family: Family::Group,
    fields: &[
        ID, NAME, DESCRIPTION, FILE_ORIGIN, ANNOTATIONS, CREATED, MODIFIED,
        reference("block", "Block_Identity", EntityKind::Block),
        link(
            "recording_channels",
            EntityKind::RecordingChannel,
            GROUP_CHANNEL_LINK,
            "RecordingChannelGroup_Identity",
            "RecordingChannel_Identity",
            true,
        ),
        link(
            "units",
            EntityKind::Unit,
            UNIT_GROUP_LINK,
            "RecordingChannelGroup_Identity",
            "Unit_Identity",
            false,
        ),
    ],
    natural_order: &[],
};

static RECORDING_CHANNEL_SCHEMA: EntitySchema = EntitySchema {
    kind: EntityKind::RecordingChannel,
    family: Family::Group,
    fields: &[
        ID, NAME, DESCRIPTION, FILE_ORIGIN, ANNOTATIONS, CREATED, MODIFIED,
        required(POSITION),
        scalar("x", FieldType::Float, "X"),
        scalar("y", FieldType::Float, "Y"),
        scalar("z", FieldType::Float, "Z"),
        measured("coord_units", "CoordUnits", units::DISTANCE_UNITS),
        link(
            "recording_channel_groups",
            EntityKind::RecordingChannelGroup,
            GROUP_CHANNEL_LINK,
            "RecordingChannel_Identity",
            "RecordingChannelGroup_Identity",
            false,
        ),
        children("analog_signals", EntityKind::AnalogSignal, "RecordingChannel_Identity"),
        children(
            "irregularly_sampled_signals",
            EntityKind::IrregularlySampledSignal,
            "RecordingChannel_Identity",
        ),
    ],
    natural_order: &[OrderKey { field: "index", descending: false }],
};

static UNIT_SCHEMA: EntitySchema = EntitySchema {
    kind: EntityKind::Unit,
    family: Family::Group,
    fields: &[
        ID, NAME, DESCRIPTION, FILE_ORIGIN, ANNOTATIONS, CREATED, MODIFIED,
        link(
            "recording_channel_groups",
            EntityKind::RecordingChannelGroup,
            UNIT_GROUP_LINK,
            "Unit_Identity",
            "RecordingChannelGroup_Identity",
            true,
        ),
        children("spike_trains", EntityKind::SpikeTrain, "Unit_Identity"),
        children("spike_trains_full", EntityKind::SpikeTrainFull, "Unit_Identity"),
    ],
    natural_order: &[],
};

static ANALOG_SIGNAL: EntitySchema = EntitySchema {
    kind: EntityKind::AnalogSignal,
    family: Family::Data,
    fields: &[
        ID, NAME, DESCRIPTION, FILE_ORIGIN, ANNOTATIONS, CREATED, MODIFIED,
        SEGMENT, SIGNAL, SIGNAL_UNITS, T_START, T_UNITS, SAMPLING_RATE, RECORDING_CHANNEL,
    ],
    natural_order: &[],
};

static IRREGULARLY_SAMPLED_SIGNAL: EntitySchema = EntitySchema {
    kind: EntityKind::IrregularlySampledSignal,
    family: Family::Data,
    fields: &[
        ID, NAME, DESCRIPTION, FILE_ORIGIN, ANNOTATIONS, CREATED, MODIFIED,
        SEGMENT, TIMES, SIGNAL, T_UNITS, SIGNAL_UNITS, RECORDING_CHANNEL,
    ],
    natural_order: &[],
};

static SPIKE_TRAIN: EntitySchema = EntitySchema {
    kind: EntityKind::SpikeTrain,
    family: Family::Data,
    fields: &[
        ID, NAME, DESCRIPTION, FILE_ORIGIN, ANNOTATIONS, CREATED, MODIFIED,
        SEGMENT, TIMES, T_START, T_STOP, T_UNITS, UNIT,
    ],
    natural_order: &[],
};

static SPIKE_TRAIN_FULL: EntitySchema = EntitySchema {
    kind: EntityKind::SpikeTrainFull,
    family: Family::Data,
    fields: &[
        ID, NAME, DESCRIPTION, FILE_ORIGIN, ANNOTATIONS, CREATED, MODIFIED,
        SEGMENT, TIMES, T_START, T_STOP, T_UNITS, UNIT,
        required(scalar("waveforms", FieldType::WaveformArray, "Waveforms")),
        required(measured("waveform_units", "WaveformUnits", units::WAVEFORM_UNITS)),
        SAMPLING_RATE,
        required(scalar("left_sweep", FieldType::Float, "LeftSweep")),
        scalar("sort", FieldType::Boolean, "Sorted"),
    ],
    natural_order: &[],
};

static EVENT: EntitySchema = EntitySchema {
    kind: EntityKind::Event,
    family: Family::Data,
    fields: &[
        ID, NAME, DESCRIPTION, FILE_ORIGIN, ANNOTATIONS, CREATED, MODIFIED,
        SEGMENT,
        required(scalar("time", FieldType::Float, "Time")),
        required(reference("label", "EventLabel_Identity", EntityKind::EventLabel)),
        scalar("duration", FieldType::Float, "Duration"),
    ],
    natural_order: &[],
};

static EVENT_LABEL: EntitySchema = EntitySchema {
    kind: EntityKind::EventLabel,
    family: Family::Lookup,
    fields: &[
        ID,
        required(NAME),
        DESCRIPTION,
        children("events", EntityKind::Event, "EventLabel_Identity"),
    ],
    natural_order: &[OrderKey { field: "name", descending: false }],
};

pub fn describe(kind: EntityKind) -> &'static EntitySchema {
    match kind {
        EntityKind::Block => &BLOCK,
        EntityKind::Segment => &SEGMENT_SCHEMA,
        EntityKind::RecordingChannelGroup => &RECORDING_CHANNEL_GROUP,
        EntityKind::RecordingChannel => &RECORDING_CHANNEL_SCHEMA,
        EntityKind::Unit => &UNIT_SCHEMA,
        EntityKind::AnalogSignal => &ANALOG_SIGNAL,
        EntityKind::IrregularlySampledSignal => &IRREGULARLY_SAMPLED_SIGNAL,
        EntityKind::SpikeTrain => &SPIKE_TRAIN,
        EntityKind::SpikeTrainFull => &SPIKE_TRAIN_FULL,
        EntityKind::Event => &EVENT,
        EntityKind::EventLabel => &EVENT_LABEL,
    }
}

pub fn catalog() -> Vec<&'static EntitySchema> {
    EntityKind::ALL.into_iter().map(describe).collect()
}

/// Relations on other kinds that point at `kind` through a column, i.e. the
/// rows that would dangle if an entity of `kind` disappeared.
pub fn inbound(kind: EntityKind) -> impl Iterator<Item = (EntityKind, &'static FieldInfo)> {
    EntityKind::ALL.into_iter().flat_map(move |owner| {
        describe(owner)
            .fields
            .iter()
            .filter(move |f| matches!(f.relation, Some(Relation::Reference { target }) if target == kind))
            .map(move |f| (owner, f))
    })
}

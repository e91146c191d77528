// used for persistence
use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{Connection, OptionalExtension, Row, Transaction, TransactionBehavior, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{NeoError, Result};
use crate::model::{
    AnalogSignal, Base, Block, ContainerFields, Entity, EntityId, EntityKind, Event, EventLabel,
    IrregularlySampledSignal, RecordingChannel, RecordingChannelGroup, Segment, SpikeTrain,
    SpikeTrainFull, Unit,
};
use crate::schema::{self, Relation};
use crate::validate::Referents;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f%:z";
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistenceMode {
    InMemory,
    File(String),
}
impl PersistenceMode {
    /// `":memory:"` selects the in-memory mode, anything else is a file path.
    pub fn from_path(path: &str) -> Self {
        if path == ":memory:" {
            Self::InMemory
        } else {
            Self::File(path.to_string())
        }
    }
}

// The "STRICT" keyword introduced in 3.37.0 breaks JDBC connections, which makes
// debugging using an external tool like DBeaver impossible
const SCHEMA: &str = "
    create table if not exists Thing (
        Thing_Identity integer primary key autoincrement,
        Kind text not null
    );-- STRICT;
    create table if not exists Block (
        Block_Identity integer not null,
        Name text null,
        Description text null,
        FileOrigin text null,
        Annotations text not null default '{}',
        Created text not null,
        Modified text not null,
        FileDatetime text null,
        RecDatetime text null,
        Position integer null,
        constraint Block_is_Thing foreign key (
            Block_Identity
        ) references Thing(Thing_Identity),
        constraint referenceable_Block_Identity primary key (
            Block_Identity
        )
    );-- STRICT;
    create table if not exists Segment (
        Segment_Identity integer not null,
        Name text null,
        Description text null,
        FileOrigin text null,
        Annotations text not null default '{}',
        Created text not null,
        Modified text not null,
        FileDatetime text null,
        RecDatetime text null,
        Position integer null,
        Block_Identity integer null,
        constraint Segment_is_Thing foreign key (
            Segment_Identity
        ) references Thing(Thing_Identity),
        constraint Segment_in_Block foreign key (
            Block_Identity
        ) references Block(Block_Identity),
        constraint referenceable_Segment_Identity primary key (
            Segment_Identity
        )
    );-- STRICT;
    create index if not exists Segment_by_Block on Segment (Block_Identity);
    create table if not exists RecordingChannelGroup (
        RecordingChannelGroup_Identity integer not null,
        Name text null,
        Description text null,
        FileOrigin text null,
        Annotations text not null default '{}',
        Created text not null,
        Modified text not null,
        Block_Identity integer null,
        constraint RecordingChannelGroup_is_Thing foreign key (
            RecordingChannelGroup_Identity
        ) references Thing(Thing_Identity),
        constraint RecordingChannelGroup_in_Block foreign key (
            Block_Identity
        ) references Block(Block_Identity),
        constraint referenceable_RecordingChannelGroup_Identity primary key (
            RecordingChannelGroup_Identity
        )
    );-- STRICT;
    create table if not exists RecordingChannel (
        RecordingChannel_Identity integer not null,
        Name text null,
        Description text null,
        FileOrigin text null,
        Annotations text not null default '{}',
        Created text not null,
        Modified text not null,
        Position integer not null,
        X real null,
        Y real null,
        Z real null,
        CoordUnits text null,
        constraint RecordingChannel_is_Thing foreign key (
            RecordingChannel_Identity
        ) references Thing(Thing_Identity),
        constraint referenceable_RecordingChannel_Identity primary key (
            RecordingChannel_Identity
        )
    );-- STRICT;
    create table if not exists Unit (
        Unit_Identity integer not null,
        Name text null,
        Description text null,
        FileOrigin text null,
        Annotations text not null default '{}',
        Created text not null,
        Modified text not null,
        constraint Unit_is_Thing foreign key (
            Unit_Identity
        ) references Thing(Thing_Identity),
        constraint referenceable_Unit_Identity primary key (
            Unit_Identity
        )
    );-- STRICT;
    create table if not exists RecordingChannelGroup_RecordingChannel (
        RecordingChannelGroup_Identity integer not null,
        RecordingChannel_Identity integer not null,
        constraint linked_RecordingChannelGroup foreign key (
            RecordingChannelGroup_Identity
        ) references RecordingChannelGroup(RecordingChannelGroup_Identity) on delete cascade,
        constraint linked_RecordingChannel foreign key (
            RecordingChannel_Identity
        ) references RecordingChannel(RecordingChannel_Identity) on delete cascade,
        constraint unique_RecordingChannelGroup_RecordingChannel primary key (
            RecordingChannelGroup_Identity,
            RecordingChannel_Identity
        )
    );-- STRICT;
    create table if not exists Unit_RecordingChannelGroup (
        Unit_Identity integer not null,
        RecordingChannelGroup_Identity integer not null,
        constraint linked_Unit foreign key (
            Unit_Identity
        ) references Unit(Unit_Identity) on delete cascade,
        constraint linked_RecordingChannelGroup foreign key (
            RecordingChannelGroup_Identity
        ) references RecordingChannelGroup(RecordingChannelGroup_Identity) on delete cascade,
        constraint unique_Unit_RecordingChannelGroup primary key (
            Unit_Identity,
            RecordingChannelGroup_Identity
        )
    );-- STRICT;
    create table if not exists EventLabel (
        EventLabel_Identity integer not null,
        Name text not null,
        Description text null,
        constraint EventLabel_is_Thing foreign key (
            EventLabel_Identity
        ) references Thing(Thing_Identity),
        constraint referenceable_EventLabel_Identity primary key (
            EventLabel_Identity
        ),
        constraint unique_EventLabel_Name unique (
            Name
        )
    );-- STRICT;
    create table if not exists AnalogSignal (
        AnalogSignal_Identity integer not null,
        Name text null,
        Description text null,
        FileOrigin text null,
        Annotations text not null default '{}',
        Created text not null,
        Modified text not null,
        Segment_Identity integer not null,
        Signal text not null,
        SignalUnits text null,
        TStart real not null,
        TUnits text null,
        SamplingRate real not null,
        RecordingChannel_Identity integer null,
        constraint AnalogSignal_is_Thing foreign key (
            AnalogSignal_Identity
        ) references Thing(Thing_Identity),
        constraint AnalogSignal_in_Segment foreign key (
            Segment_Identity
        ) references Segment(Segment_Identity),
        constraint AnalogSignal_on_RecordingChannel foreign key (
            RecordingChannel_Identity
        ) references RecordingChannel(RecordingChannel_Identity),
        constraint referenceable_AnalogSignal_Identity primary key (
            AnalogSignal_Identity
        )
    );-- STRICT;
    create index if not exists AnalogSignal_by_Segment on AnalogSignal (Segment_Identity);
    create table if not exists IrregularlySampledSignal (
        IrregularlySampledSignal_Identity integer not null,
        Name text null,
        Description text null,
        FileOrigin text null,
        Annotations text not null default '{}',
        Created text not null,
        Modified text not null,
        Segment_Identity integer not null,
        Times text not null,
        Signal text not null,
        TUnits text null,
        SignalUnits text null,
        RecordingChannel_Identity integer null,
        constraint IrregularlySampledSignal_is_Thing foreign key (
            IrregularlySampledSignal_Identity
        ) references Thing(Thing_Identity),
        constraint IrregularlySampledSignal_in_Segment foreign key (
            Segment_Identity
        ) references Segment(Segment_Identity),
        constraint IrregularlySampledSignal_on_RecordingChannel foreign key (
            RecordingChannel_Identity
        ) references RecordingChannel(RecordingChannel_Identity),
        constraint referenceable_IrregularlySampledSignal_Identity primary key (
            IrregularlySampledSignal_Identity
        )
    );-- STRICT;
    create index if not exists IrregularlySampledSignal_by_Segment on IrregularlySampledSignal (Segment_Identity);
    create table if not exists SpikeTrain (
        SpikeTrain_Identity integer not null,
        Name text null,
        Description text null,
        FileOrigin text null,
        Annotations text not null default '{}',
        Created text not null,
        Modified text not null,
        Segment_Identity integer not null,
        Times text not null,
        TStart real not null,
        TStop real not null,
        TUnits text null,
        Unit_Identity integer null,
        constraint SpikeTrain_is_Thing foreign key (
            SpikeTrain_Identity
        ) references Thing(Thing_Identity),
        constraint SpikeTrain_in_Segment foreign key (
            Segment_Identity
        ) references Segment(Segment_Identity),
        constraint SpikeTrain_of_Unit foreign key (
            Unit_Identity
        ) references Unit(Unit_Identity),
        constraint referenceable_SpikeTrain_Identity primary key (
            SpikeTrain_Identity
        )
    );-- STRICT;
    create index if not exists SpikeTrain_by_Segment on SpikeTrain (Segment_Identity);
    create table if not exists SpikeTrainFull (
        SpikeTrainFull_Identity integer not null,
        Name text null,
        Description text null,
        FileOrigin text null,
        Annotations text not null default '{}',
        Created text not null,
        Modified text not null,
        Segment_Identity integer not null,
        Times text not null,
        TStart real not null,
        TStop real not null,
        TUnits text null,
        Unit_Identity integer null,
        Waveforms text not null,
        WaveformUnits text not null,
        SamplingRate real not null,
        LeftSweep real not null,
        Sorted integer not null,
        constraint SpikeTrainFull_is_Thing foreign key (
            SpikeTrainFull_Identity
        ) references Thing(Thing_Identity),
        constraint SpikeTrainFull_in_Segment foreign key (
            Segment_Identity
        ) references Segment(Segment_Identity),
        constraint SpikeTrainFull_of_Unit foreign key (
            Unit_Identity
        ) references Unit(Unit_Identity),
        constraint referenceable_SpikeTrainFull_Identity primary key (
            SpikeTrainFull_Identity
        )
    );-- STRICT;
    create index if not exists SpikeTrainFull_by_Segment on SpikeTrainFull (Segment_Identity);
    create table if not exists Event (
        Event_Identity integer not null,
        Name text null,
        Description text null,
        FileOrigin text null,
        Annotations text not null default '{}',
        Created text not null,
        Modified text not null,
        Segment_Identity integer not null,
        Time real not null,
        EventLabel_Identity integer not null,
        Duration real null,
        constraint Event_is_Thing foreign key (
            Event_Identity
        ) references Thing(Thing_Identity),
        constraint Event_in_Segment foreign key (
            Segment_Identity
        ) references Segment(Segment_Identity),
        constraint Event_has_EventLabel foreign key (
            EventLabel_Identity
        ) references EventLabel(EventLabel_Identity),
        constraint referenceable_Event_Identity primary key (
            Event_Identity
        )
    );-- STRICT;
    create index if not exists Event_by_Segment on Event (Segment_Identity);
";

// ------------- Persistence -------------
pub struct Persistor {
    connection: Connection,
    mode: PersistenceMode,
}
impl Persistor {
    pub fn new(mode: PersistenceMode, busy_timeout: Duration) -> Result<Persistor> {
        let connection = match &mode {
            PersistenceMode::InMemory => Connection::open_in_memory()?,
            PersistenceMode::File(path) => {
                let connection = Connection::open(path)?;
                connection.pragma_update_and_check(None, "journal_mode", "wal", |_| Ok(()))?;
                connection
            }
        };
        connection.busy_timeout(busy_timeout)?;
        connection.execute_batch("pragma foreign_keys = on;")?;
        connection.execute_batch(SCHEMA)?;
        info!(mode = ?mode, "schema ready");
        Ok(Persistor { connection, mode })
    }
    pub fn mode(&self) -> &PersistenceMode {
        &self.mode
    }
    /// Runs `work` in one immediate transaction, committing only when it succeeds.
    pub fn write<R>(&mut self, work: impl FnOnce(&Transaction) -> Result<R>) -> Result<R> {
        let tx = self
            .connection
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let result = work(&tx)?;
        tx.commit()?;
        Ok(result)
    }
    /// Runs `work` against one consistent snapshot.
    pub fn read<R>(&mut self, work: impl FnOnce(&Transaction) -> Result<R>) -> Result<R> {
        let tx = self
            .connection
            .transaction_with_behavior(TransactionBehavior::Deferred)?;
        let result = work(&tx)?;
        tx.finish()?;
        Ok(result)
    }
}

// ------------- Column helpers -------------
pub fn id_value(id: EntityId) -> Value {
    Value::Integer(id as i64)
}
fn opt_id(id: Option<EntityId>) -> Value {
    id.map_or(Value::Null, id_value)
}
fn opt_text(text: Option<&String>) -> Value {
    text.map_or(Value::Null, |t| Value::Text(t.clone()))
}
fn opt_real(value: Option<f64>) -> Value {
    value.map_or(Value::Null, Value::Real)
}
/// The current time at the precision timestamps are stored with.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}
pub fn timestamp(time: &DateTime<Utc>) -> Value {
    Value::Text(time.format(TIMESTAMP_FORMAT).to_string())
}
fn opt_timestamp(time: Option<&DateTime<Utc>>) -> Value {
    time.map_or(Value::Null, timestamp)
}
fn json<T: Serialize>(value: &T) -> Result<Value> {
    Ok(Value::Text(serde_json::to_string(value)?))
}

fn get_id(row: &Row, column: &str) -> rusqlite::Result<EntityId> {
    Ok(row.get::<_, i64>(column)? as EntityId)
}
fn get_opt_id(row: &Row, column: &str) -> rusqlite::Result<Option<EntityId>> {
    Ok(row.get::<_, Option<i64>>(column)?.map(|id| id as EntityId))
}
fn get_json<T: DeserializeOwned>(row: &Row, column: &str) -> rusqlite::Result<T> {
    let text: String = row.get(column)?;
    serde_json::from_str(&text).map_err(|e| {
        let index = row.as_ref().column_index(column).unwrap_or_default();
        rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(e))
    })
}

fn identity_column(kind: EntityKind) -> String {
    format!("{}_Identity", kind.table())
}

fn base_columns(base: &Base) -> Result<Vec<(&'static str, Value)>> {
    Ok(vec![
        ("Name", opt_text(base.name.as_ref())),
        ("Description", opt_text(base.description.as_ref())),
        ("FileOrigin", opt_text(base.file_origin.as_ref())),
        ("Annotations", json(&base.annotations)?),
        ("Created", opt_timestamp(base.created.as_ref())),
        ("Modified", opt_timestamp(base.modified.as_ref())),
    ])
}
fn base_from_row(row: &Row, kind: EntityKind) -> rusqlite::Result<Base> {
    Ok(Base {
        id: Some(get_id(row, &identity_column(kind))?),
        name: row.get("Name")?,
        description: row.get("Description")?,
        file_origin: row.get("FileOrigin")?,
        annotations: get_json(row, "Annotations")?,
        created: row.get("Created")?,
        modified: row.get("Modified")?,
    })
}
fn container_columns(container: &ContainerFields) -> Vec<(&'static str, Value)> {
    vec![
        ("FileDatetime", opt_timestamp(container.file_datetime.as_ref())),
        ("RecDatetime", opt_timestamp(container.rec_datetime.as_ref())),
        ("Position", container.index.map_or(Value::Null, |i| Value::Integer(i.into()))),
    ]
}
fn container_from_row(row: &Row) -> rusqlite::Result<ContainerFields> {
    Ok(ContainerFields {
        file_datetime: row.get("FileDatetime")?,
        rec_datetime: row.get("RecDatetime")?,
        index: row.get("Position")?,
    })
}

/// How an entity maps onto its table. Column names match the `column`
/// entries of its schema description, which the query layer relies on.
pub trait Stored: Entity {
    /// Every column except the identity.
    fn to_columns(&self) -> Result<Vec<(&'static str, Value)>>;
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
    /// Many-to-many id lists kept by this side, by relation field name.
    fn links(&self) -> Vec<(&'static str, &[EntityId])> {
        Vec::new()
    }
    fn links_mut(&mut self, _field: &str) -> Option<&mut Vec<EntityId>> {
        None
    }
}

impl Stored for Block {
    fn to_columns(&self) -> Result<Vec<(&'static str, Value)>> {
        let mut columns = base_columns(&self.base)?;
        columns.extend(container_columns(&self.container));
        Ok(columns)
    }
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Block { base: base_from_row(row, Self::KIND)?, container: container_from_row(row)? })
    }
}

impl Stored for Segment {
    fn to_columns(&self) -> Result<Vec<(&'static str, Value)>> {
        let mut columns = base_columns(&self.base)?;
        columns.extend(container_columns(&self.container));
        columns.push(("Block_Identity", opt_id(self.block)));
        Ok(columns)
    }
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Segment {
            base: base_from_row(row, Self::KIND)?,
            container: container_from_row(row)?,
            block: get_opt_id(row, "Block_Identity")?,
        })
    }
}

impl Stored for RecordingChannelGroup {
    fn to_columns(&self) -> Result<Vec<(&'static str, Value)>> {
        let mut columns = base_columns(&self.base)?;
        columns.push(("Block_Identity", opt_id(self.block)));
        Ok(columns)
    }
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(RecordingChannelGroup {
            base: base_from_row(row, Self::KIND)?,
            block: get_opt_id(row, "Block_Identity")?,
            recording_channels: Vec::new(),
        })
    }
    fn links(&self) -> Vec<(&'static str, &[EntityId])> {
        vec![("recording_channels", &self.recording_channels)]
    }
    fn links_mut(&mut self, field: &str) -> Option<&mut Vec<EntityId>> {
        (field == "recording_channels").then_some(&mut self.recording_channels)
    }
}

impl Stored for RecordingChannel {
    fn to_columns(&self) -> Result<Vec<(&'static str, Value)>> {
        let mut columns = base_columns(&self.base)?;
        columns.extend([
            ("Position", Value::Integer(self.index.into())),
            ("X", opt_real(self.x)),
            ("Y", opt_real(self.y)),
            ("Z", opt_real(self.z)),
            ("CoordUnits", opt_text(self.coord_units.as_ref())),
        ]);
        Ok(columns)
    }
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(RecordingChannel {
            base: base_from_row(row, Self::KIND)?,
            index: row.get("Position")?,
            x: row.get("X")?,
            y: row.get("Y")?,
            z: row.get("Z")?,
            coord_units: row.get("CoordUnits")?,
        })
    }
}

impl Stored for Unit {
    fn to_columns(&self) -> Result<Vec<(&'static str, Value)>> {
        base_columns(&self.base)
    }
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Unit { base: base_from_row(row, Self::KIND)?, recording_channel_groups: Vec::new() })
    }
    fn links(&self) -> Vec<(&'static str, &[EntityId])> {
        vec![("recording_channel_groups", &self.recording_channel_groups)]
    }
    fn links_mut(&mut self, field: &str) -> Option<&mut Vec<EntityId>> {
        (field == "recording_channel_groups").then_some(&mut self.recording_channel_groups)
    }
}

impl Stored for AnalogSignal {
    fn to_columns(&self) -> Result<Vec<(&'static str, Value)>> {
        let mut columns = base_columns(&self.base)?;
        columns.extend([
            ("Segment_Identity", id_value(self.segment)),
            ("Signal", json(&self.signal)?),
            ("SignalUnits", opt_text(self.signal_units.as_ref())),
            ("TStart", Value::Real(self.t_start)),
            ("TUnits", opt_text(self.t_units.as_ref())),
            ("SamplingRate", Value::Real(self.sampling_rate)),
            ("RecordingChannel_Identity", opt_id(self.recording_channel)),
        ]);
        Ok(columns)
    }
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(AnalogSignal {
            base: base_from_row(row, Self::KIND)?,
            segment: get_id(row, "Segment_Identity")?,
            signal: get_json(row, "Signal")?,
            signal_units: row.get("SignalUnits")?,
            t_start: row.get("TStart")?,
            t_units: row.get("TUnits")?,
            sampling_rate: row.get("SamplingRate")?,
            recording_channel: get_opt_id(row, "RecordingChannel_Identity")?,
        })
    }
}

impl Stored for IrregularlySampledSignal {
    fn to_columns(&self) -> Result<Vec<(&'static str, Value)>> {
        let mut columns = base_columns(&self.base)?;
        columns.extend([
            ("Segment_Identity", id_value(self.segment)),
            ("Times", json(&self.times)?),
            ("Signal", json(&self.signal)?),
            ("TUnits", opt_text(self.t_units.as_ref())),
            ("SignalUnits", opt_text(self.signal_units.as_ref())),
            ("RecordingChannel_Identity", opt_id(self.recording_channel)),
        ]);
        Ok(columns)
    }
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(IrregularlySampledSignal {
            base: base_from_row(row, Self::KIND)?,
            segment: get_id(row, "Segment_Identity")?,
            times: get_json(row, "Times")?,
            signal: get_json(row, "Signal")?,
            t_units: row.get("TUnits")?,
            signal_units: row.get("SignalUnits")?,
            recording_channel: get_opt_id(row, "RecordingChannel_Identity")?,
        })
    }
}

fn spike_train_columns(train: &SpikeTrain) -> Result<Vec<(&'static str, Value)>> {
    let mut columns = base_columns(&train.base)?;
    columns.extend([
        ("Segment_Identity", id_value(train.segment)),
        ("Times", json(&train.times)?),
        ("TStart", Value::Real(train.t_start)),
        ("TStop", Value::Real(train.t_stop)),
        ("TUnits", opt_text(train.t_units.as_ref())),
        ("Unit_Identity", opt_id(train.unit)),
    ]);
    Ok(columns)
}
fn spike_train_from_row(row: &Row, kind: EntityKind) -> rusqlite::Result<SpikeTrain> {
    Ok(SpikeTrain {
        base: base_from_row(row, kind)?,
        segment: get_id(row, "Segment_Identity")?,
        times: get_json(row, "Times")?,
        t_start: row.get("TStart")?,
        t_stop: row.get("TStop")?,
        t_units: row.get("TUnits")?,
        unit: get_opt_id(row, "Unit_Identity")?,
    })
}

impl Stored for SpikeTrain {
    fn to_columns(&self) -> Result<Vec<(&'static str, Value)>> {
        spike_train_columns(self)
    }
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        spike_train_from_row(row, Self::KIND)
    }
}

impl Stored for SpikeTrainFull {
    fn to_columns(&self) -> Result<Vec<(&'static str, Value)>> {
        let mut columns = spike_train_columns(&self.train)?;
        columns.extend([
            ("Waveforms", json(&self.waveforms)?),
            ("WaveformUnits", Value::Text(self.waveform_units.clone())),
            ("SamplingRate", Value::Real(self.sampling_rate)),
            ("LeftSweep", Value::Real(self.left_sweep)),
            ("Sorted", Value::Integer(self.sort.into())),
        ]);
        Ok(columns)
    }
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(SpikeTrainFull {
            train: spike_train_from_row(row, Self::KIND)?,
            waveforms: get_json(row, "Waveforms")?,
            waveform_units: row.get("WaveformUnits")?,
            sampling_rate: row.get("SamplingRate")?,
            left_sweep: row.get("LeftSweep")?,
            sort: row.get("Sorted")?,
        })
    }
}

impl Stored for Event {
    fn to_columns(&self) -> Result<Vec<(&'static str, Value)>> {
        let mut columns = base_columns(&self.base)?;
        columns.extend([
            ("Segment_Identity", id_value(self.segment)),
            ("Time", Value::Real(self.time)),
            ("EventLabel_Identity", id_value(self.label)),
            ("Duration", opt_real(self.duration)),
        ]);
        Ok(columns)
    }
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Event {
            base: base_from_row(row, Self::KIND)?,
            segment: get_id(row, "Segment_Identity")?,
            time: row.get("Time")?,
            label: get_id(row, "EventLabel_Identity")?,
            duration: row.get("Duration")?,
        })
    }
}

impl Stored for EventLabel {
    fn to_columns(&self) -> Result<Vec<(&'static str, Value)>> {
        Ok(vec![
            ("Name", Value::Text(self.name.clone())),
            ("Description", opt_text(self.description.as_ref())),
        ])
    }
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(EventLabel {
            id: Some(get_id(row, &identity_column(Self::KIND))?),
            name: row.get("Name")?,
            description: row.get("Description")?,
        })
    }
}

// ------------- Row operations -------------
fn link_relation(kind: EntityKind, field: &str) -> Result<(&'static str, &'static str, &'static str)> {
    match schema::describe(kind).field(field).and_then(|f| f.relation) {
        Some(Relation::Link { table, own, other, .. }) => Ok((table, own, other)),
        _ => Err(NeoError::StorageUnavailable(format!("{kind}.{field} is not a link relation"))),
    }
}

fn store_links<T: Stored>(conn: &Connection, entity: &T, id: EntityId) -> Result<()> {
    for (field, ids) in entity.links() {
        let (table, own, other) = link_relation(T::KIND, field)?;
        conn.prepare_cached(&format!("delete from {table} where {own} = ?"))?
            .execute([id_value(id)])?;
        let mut add = conn.prepare_cached(&format!(
            "insert or ignore into {table} ({own}, {other}) values (?, ?)"
        ))?;
        for linked in ids {
            add.execute([id_value(id), id_value(*linked)])?;
        }
    }
    Ok(())
}

pub fn linked_ids(conn: &Connection, kind: EntityKind, field: &str, id: EntityId) -> Result<Vec<EntityId>> {
    let (table, own, other) = link_relation(kind, field)?;
    let mut statement =
        conn.prepare_cached(&format!("select {other} from {table} where {own} = ? order by {other}"))?;
    let ids = statement
        .query_map([id_value(id)], |row| row.get::<_, i64>(0))?
        .map(|r| r.map(|id| id as EntityId))
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(ids)
}

fn load_links<T: Stored>(conn: &Connection, entity: &mut T) -> Result<()> {
    let Some(id) = entity.id() else { return Ok(()) };
    let fields: Vec<&'static str> = entity.links().into_iter().map(|(field, _)| field).collect();
    for field in fields {
        let ids = linked_ids(conn, T::KIND, field, id)?;
        if let Some(slot) = entity.links_mut(field) {
            *slot = ids;
        }
    }
    Ok(())
}

pub fn insert<T: Stored>(conn: &Connection, entity: &T) -> Result<EntityId> {
    conn.prepare_cached("insert into Thing (Kind) values (?)")?
        .execute(params![T::KIND.name()])?;
    let id = conn.last_insert_rowid() as EntityId;
    let columns = entity.to_columns()?;
    let names: Vec<&str> = columns.iter().map(|(name, _)| *name).collect();
    let sql = format!(
        "insert into {} ({}, {}) values (?{})",
        T::KIND.table(),
        identity_column(T::KIND),
        names.join(", "),
        ", ?".repeat(names.len())
    );
    let mut values = vec![id_value(id)];
    values.extend(columns.into_iter().map(|(_, value)| value));
    conn.prepare_cached(&sql)?
        .execute(rusqlite::params_from_iter(values))?;
    store_links(conn, entity, id)?;
    debug!(kind = %T::KIND, id, "inserted");
    Ok(id)
}

pub fn update<T: Stored>(conn: &Connection, id: EntityId, entity: &T) -> Result<()> {
    let columns = entity.to_columns()?;
    let assignments: Vec<String> = columns.iter().map(|(name, _)| format!("{name} = ?")).collect();
    let sql = format!(
        "update {} set {} where {} = ?",
        T::KIND.table(),
        assignments.join(", "),
        identity_column(T::KIND)
    );
    let mut values: Vec<Value> = columns.into_iter().map(|(_, value)| value).collect();
    values.push(id_value(id));
    let changed = conn.prepare_cached(&sql)?
        .execute(rusqlite::params_from_iter(values))?;
    if changed == 0 {
        return Err(NeoError::NotFound { kind: T::KIND, id });
    }
    store_links(conn, entity, id)?;
    debug!(kind = %T::KIND, id, "updated");
    Ok(())
}

pub fn load<T: Stored>(conn: &Connection, id: EntityId) -> Result<Option<T>> {
    let sql = format!(
        "select * from {} where {} = ?",
        T::KIND.table(),
        identity_column(T::KIND)
    );
    let entity = conn.prepare_cached(&sql)?
        .query_row([id_value(id)], |row| T::from_row(row))
        .optional()?;
    match entity {
        Some(mut entity) => {
            load_links(conn, &mut entity)?;
            Ok(Some(entity))
        }
        None => Ok(None),
    }
}

/// Selects rows with an already compiled `where`/`order by` clause.
pub fn select<T: Stored>(
    conn: &Connection,
    condition: &str,
    order: &str,
    params: Vec<Value>,
    limit: Option<usize>,
    offset: usize,
) -> Result<Vec<T>> {
    let sql = format!(
        "select * from {} where {} order by {} limit ? offset ?",
        T::KIND.table(),
        condition,
        order
    );
    let mut values = params;
    values.push(Value::Integer(limit.map_or(-1, |l| l as i64)));
    values.push(Value::Integer(offset as i64));
    let mut statement = conn.prepare_cached(&sql)?;
    let mut entities = statement
        .query_map(rusqlite::params_from_iter(values), |row| T::from_row(row))?
        .collect::<rusqlite::Result<Vec<T>>>()?;
    for entity in entities.iter_mut() {
        load_links(conn, entity)?;
    }
    Ok(entities)
}

pub fn count(conn: &Connection, kind: EntityKind, condition: &str, params: Vec<Value>) -> Result<usize> {
    let sql = format!("select count(*) from {} where {}", kind.table(), condition);
    let n: i64 = conn.prepare_cached(&sql)?
        .query_row(rusqlite::params_from_iter(params), |row| row.get(0))?;
    Ok(n as usize)
}

/// Ids of `kind` rows whose `column` holds `id`.
pub fn referencing(conn: &Connection, kind: EntityKind, column: &str, id: EntityId) -> Result<Vec<EntityId>> {
    let sql = format!(
        "select {} from {} where {} = ? order by 1",
        identity_column(kind),
        kind.table(),
        column
    );
    let mut statement = conn.prepare_cached(&sql)?;
    let ids = statement
        .query_map([id_value(id)], |row| row.get::<_, i64>(0))?
        .map(|r| r.map(|id| id as EntityId))
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(ids)
}

pub fn clear_reference(conn: &Connection, kind: EntityKind, column: &str, id: EntityId) -> Result<usize> {
    let sql = format!("update {} set {} = null where {} = ?", kind.table(), column, column);
    Ok(conn.prepare_cached(&sql)?.execute([id_value(id)])?)
}

/// Removes the entity row and its identity. Link rows go with it.
pub fn delete_row(conn: &Connection, kind: EntityKind, id: EntityId) -> Result<bool> {
    let sql = format!("delete from {} where {} = ?", kind.table(), identity_column(kind));
    let removed = conn.prepare_cached(&sql)?.execute([id_value(id)])?;
    if removed > 0 {
        conn.prepare_cached("delete from Thing where Thing_Identity = ?")?
            .execute([id_value(id)])?;
        debug!(%kind, id, "deleted");
    }
    Ok(removed > 0)
}

pub fn annotations(conn: &Connection, kind: EntityKind, id: EntityId) -> Result<Option<String>> {
    let sql = format!("select Annotations from {} where {} = ?", kind.table(), identity_column(kind));
    Ok(conn.prepare_cached(&sql)?
        .query_row([id_value(id)], |row| row.get(0))
        .optional()?)
}

pub fn store_annotations(
    conn: &Connection,
    kind: EntityKind,
    id: EntityId,
    annotations: &str,
    modified: &DateTime<Utc>,
) -> Result<()> {
    let sql = format!(
        "update {} set Annotations = ?, Modified = ? where {} = ?",
        kind.table(),
        identity_column(kind)
    );
    conn.prepare_cached(&sql)?
        .execute([Value::Text(annotations.to_string()), timestamp(modified), id_value(id)])?;
    Ok(())
}

pub fn find_label(conn: &Connection, name: &str) -> Result<Option<EventLabel>> {
    Ok(conn.prepare_cached("select * from EventLabel where Name = ?")?
        .query_row([name], |row| EventLabel::from_row(row))
        .optional()?)
}

impl Referents for Connection {
    fn exists(&self, kind: EntityKind, id: EntityId) -> Result<bool> {
        let sql = format!("select 1 from {} where {} = ?", kind.table(), identity_column(kind));
        Ok(self.prepare_cached(&sql)?
            .query_row([id_value(id)], |_| Ok(()))
            .optional()?
            .is_some())
    }
    fn label_taken(&self, name: &str, except: Option<EntityId>) -> Result<bool> {
        Ok(find_label(self, name)?.is_some_and(|label| label.id != except))
    }
}

/// The identity column of a kind, also used by the query layer.
pub fn identity(kind: EntityKind) -> String {
    identity_column(kind)
}

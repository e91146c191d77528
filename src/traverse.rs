//! Navigation between related entities.
//!
//! One-to-many and many-to-many accessors return a [`Query`], so the related
//! rows are only read when the caller fetches, and can be refined with more
//! filters or another ordering first. To-one accessors read immediately.

use roaring::RoaringTreemap;

use crate::error::Result;
use crate::model::{
    AnalogSignal, Block, Data, Entity, EntityId, Event, EventLabel, IrregularlySampledSignal,
    RecordingChannel, RecordingChannelGroup, Segment, SpikeTrain, SpikeTrainFull, Unit,
};
use crate::persist;
use crate::query::{Condition, FilterValue, Op, Query};
use crate::repository::{Database, Model};

// Rows of `T` whose `field` holds `owner`. An unsaved owner has no related rows.
fn related<'db, T: Model>(db: &'db Database, field: &str, owner: Option<EntityId>) -> Query<'db, T> {
    match owner {
        Some(id) => db.query::<T>().filter(Condition::equals(field, id)),
        None => among(db, Vec::new()),
    }
}

fn among<'db, T: Model>(db: &'db Database, ids: Vec<EntityId>) -> Query<'db, T> {
    db.query::<T>().filter(Condition::new("id", Op::In, FilterValue::from(ids)))
}

fn referenced<T: Model>(db: &Database, id: Option<EntityId>) -> Result<Option<T>> {
    id.map(|id| db.get::<T>(id)).transpose()
}

fn union(sets: impl IntoIterator<Item = Vec<EntityId>>) -> Vec<EntityId> {
    let mut ids = RoaringTreemap::new();
    for set in sets {
        ids.extend(set);
    }
    ids.iter().collect()
}

impl Block {
    pub fn segments<'db>(&self, db: &'db Database) -> Query<'db, Segment> {
        related(db, "block", self.id())
    }
    pub fn recording_channel_groups<'db>(&self, db: &'db Database) -> Query<'db, RecordingChannelGroup> {
        related(db, "block", self.id())
    }
    /// Every channel of every group in this block, each listed once.
    pub fn recording_channels<'db>(&self, db: &'db Database) -> Result<Query<'db, RecordingChannel>> {
        Ok(among(db, across_groups(db, self.id(), "recording_channels")?))
    }
    /// Every unit detected on a group of this block, each listed once.
    pub fn units<'db>(&self, db: &'db Database) -> Result<Query<'db, Unit>> {
        Ok(among(db, across_groups(db, self.id(), "units")?))
    }
}

// Ids linked through `field` from every channel group of `block`, read in one transaction.
fn across_groups(db: &Database, block: Option<EntityId>, field: &str) -> Result<Vec<EntityId>> {
    let Some(block) = block else { return Ok(Vec::new()) };
    db.read(|tx| {
        let groups =
            persist::referencing(tx, RecordingChannelGroup::KIND, &persist::identity(Block::KIND), block)?;
        let linked = groups
            .into_iter()
            .map(|group| persist::linked_ids(tx, RecordingChannelGroup::KIND, field, group))
            .collect::<Result<Vec<_>>>()?;
        Ok(union(linked))
    })
}

impl Segment {
    pub fn block(&self, db: &Database) -> Result<Option<Block>> {
        referenced(db, self.block)
    }
    pub fn analog_signals<'db>(&self, db: &'db Database) -> Query<'db, AnalogSignal> {
        related(db, "segment", self.id())
    }
    pub fn irregularly_sampled_signals<'db>(&self, db: &'db Database) -> Query<'db, IrregularlySampledSignal> {
        related(db, "segment", self.id())
    }
    pub fn spike_trains<'db>(&self, db: &'db Database) -> Query<'db, SpikeTrain> {
        related(db, "segment", self.id())
    }
    pub fn spike_trains_full<'db>(&self, db: &'db Database) -> Query<'db, SpikeTrainFull> {
        related(db, "segment", self.id())
    }
    pub fn events<'db>(&self, db: &'db Database) -> Query<'db, Event> {
        related(db, "segment", self.id())
    }
    /// All data of the segment, kind by kind, each kind in id order.
    pub fn data(&self, db: &Database) -> Result<Vec<Data>> {
        let mut data: Vec<Data> = Vec::new();
        data.extend(self.analog_signals(db).fetch()?.into_iter().map(Data::AnalogSignal));
        data.extend(
            self.irregularly_sampled_signals(db)
                .fetch()?
                .into_iter()
                .map(Data::IrregularlySampledSignal),
        );
        data.extend(self.spike_trains(db).fetch()?.into_iter().map(Data::SpikeTrain));
        data.extend(self.spike_trains_full(db).fetch()?.into_iter().map(Data::SpikeTrainFull));
        data.extend(self.events(db).fetch()?.into_iter().map(Data::Event));
        Ok(data)
    }
}

impl RecordingChannelGroup {
    pub fn block(&self, db: &Database) -> Result<Option<Block>> {
        referenced(db, self.block)
    }
    pub fn channels<'db>(&self, db: &'db Database) -> Query<'db, RecordingChannel> {
        related(db, "recording_channel_groups", self.id())
    }
    pub fn units<'db>(&self, db: &'db Database) -> Query<'db, Unit> {
        related(db, "recording_channel_groups", self.id())
    }
    /// Names of the member channels in channel index order. Unnamed channels
    /// contribute an empty string.
    pub fn channel_names(&self, db: &Database) -> Result<Vec<String>> {
        Ok(self
            .channels(db)
            .fetch()?
            .into_iter()
            .map(|c| c.base.name.unwrap_or_default())
            .collect())
    }
    pub fn channel_indexes(&self, db: &Database) -> Result<Vec<u32>> {
        Ok(self.channels(db).fetch()?.into_iter().map(|c| c.index).collect())
    }
}

impl RecordingChannel {
    pub fn recording_channel_groups<'db>(&self, db: &'db Database) -> Query<'db, RecordingChannelGroup> {
        related(db, "recording_channels", self.id())
    }
    pub fn analog_signals<'db>(&self, db: &'db Database) -> Query<'db, AnalogSignal> {
        related(db, "recording_channel", self.id())
    }
    pub fn irregularly_sampled_signals<'db>(&self, db: &'db Database) -> Query<'db, IrregularlySampledSignal> {
        related(db, "recording_channel", self.id())
    }
}

impl Unit {
    pub fn groups<'db>(&self, db: &'db Database) -> Query<'db, RecordingChannelGroup> {
        related(db, "units", self.id())
    }
    pub fn spike_trains<'db>(&self, db: &'db Database) -> Query<'db, SpikeTrain> {
        related(db, "unit", self.id())
    }
    pub fn spike_trains_full<'db>(&self, db: &'db Database) -> Query<'db, SpikeTrainFull> {
        related(db, "unit", self.id())
    }
}

impl AnalogSignal {
    pub fn segment(&self, db: &Database) -> Result<Segment> {
        db.get(self.segment)
    }
    pub fn recording_channel(&self, db: &Database) -> Result<Option<RecordingChannel>> {
        referenced(db, self.recording_channel)
    }
}

impl IrregularlySampledSignal {
    pub fn segment(&self, db: &Database) -> Result<Segment> {
        db.get(self.segment)
    }
    pub fn recording_channel(&self, db: &Database) -> Result<Option<RecordingChannel>> {
        referenced(db, self.recording_channel)
    }
}

impl SpikeTrain {
    pub fn segment(&self, db: &Database) -> Result<Segment> {
        db.get(self.segment)
    }
    pub fn unit(&self, db: &Database) -> Result<Option<Unit>> {
        referenced(db, self.unit)
    }
}

impl Event {
    pub fn segment(&self, db: &Database) -> Result<Segment> {
        db.get(self.segment)
    }
    pub fn label(&self, db: &Database) -> Result<EventLabel> {
        db.get(self.label)
    }
}

impl EventLabel {
    pub fn events<'db>(&self, db: &'db Database) -> Query<'db, Event> {
        related(db, "label", self.id)
    }
}

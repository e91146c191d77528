use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::annotation::AnnotationStore;
use crate::error::{NeoError, Result};
use crate::model::{
    AnalogSignal, Block, Entity, EntityId, EntityKind, EntityRef, Event, EventLabel, Family,
    IrregularlySampledSignal, Record, RecordingChannel, RecordingChannelGroup, Segment, SpikeTrain,
    SpikeTrainFull, Unit,
};
use crate::persist::{self, DEFAULT_BUSY_TIMEOUT_MS, PersistenceMode, Persistor, Stored};
use crate::query::{self, Filter, OrderBy, Query};
use crate::validate::{self, Validate};

/// What happens to rows that depend on a deleted entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeletePolicy {
    /// Refuse while anything still owns a reference to the entity.
    #[default]
    Restrict,
    /// Delete owned descendants, clear optional references.
    Cascade,
}

/// Lookup rows are shared, so callers ask for a label by name and get the
/// existing row when there is one.
pub trait LabelResolver {
    fn resolve_or_create_label(&self, name: &str, description: Option<&str>) -> Result<EventLabel>;
}

/// Everything the repository needs to handle one entity type generically.
pub trait Model: Stored + Validate {}
impl<T: Stored + Validate> Model for T {}

// ------------- Database -------------
pub struct Database {
    persistor: Mutex<Persistor>,
    annotations: Option<Arc<dyn AnnotationStore>>,
}

impl Database {
    pub fn new(mode: PersistenceMode) -> Result<Database> {
        Self::with_busy_timeout(mode, Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))
    }
    pub fn with_busy_timeout(mode: PersistenceMode, busy_timeout: Duration) -> Result<Database> {
        let persistor = Persistor::new(mode, busy_timeout)?;
        Ok(Database { persistor: Mutex::new(persistor), annotations: None })
    }
    /// Routes entity annotations to `store` instead of the inline column.
    pub fn with_annotation_store(mut self, store: Arc<dyn AnnotationStore>) -> Database {
        self.annotations = Some(store);
        self
    }
    pub fn mode(&self) -> Result<PersistenceMode> {
        Ok(self.lock()?.mode().clone())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Persistor>> {
        self.persistor
            .lock()
            .map_err(|_| NeoError::StorageUnavailable("database lock poisoned".to_string()))
    }
    pub(crate) fn write<R>(&self, work: impl FnOnce(&Connection) -> Result<R>) -> Result<R> {
        self.lock()?.write(|tx| work(tx))
    }
    pub(crate) fn read<R>(&self, work: impl FnOnce(&Connection) -> Result<R>) -> Result<R> {
        self.lock()?.read(|tx| work(tx))
    }
    pub(crate) fn external_annotations(&self) -> Option<Arc<dyn AnnotationStore>> {
        self.annotations.clone()
    }

    // ------------- Reads -------------
    pub fn get<T: Model>(&self, id: EntityId) -> Result<T> {
        let mut entity = self
            .read(|tx| persist::load::<T>(tx, id))?
            .ok_or(NeoError::NotFound { kind: T::KIND, id })?;
        self.attach_annotations(&mut entity)?;
        Ok(entity)
    }

    pub fn query<T: Model>(&self) -> Query<'_, T> {
        Query::new(self)
    }

    pub fn list<T: Model>(
        &self,
        filter: &Filter,
        order: &[OrderBy],
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<T>> {
        let compiled = query::compile(T::KIND, filter, order)?;
        debug!(kind = %T::KIND, condition = %compiled.condition, order = %compiled.order, "select");
        let mut entities = self.read(|tx| {
            persist::select::<T>(tx, &compiled.condition, &compiled.order, compiled.params, limit, offset)
        })?;
        for entity in entities.iter_mut() {
            self.attach_annotations(entity)?;
        }
        Ok(entities)
    }

    pub fn count<T: Model>(&self, filter: &Filter) -> Result<usize> {
        let compiled = query::compile(T::KIND, filter, &[])?;
        self.read(|tx| persist::count(tx, T::KIND, &compiled.condition, compiled.params))
    }

    /// Row counts per kind, in catalogue order.
    pub fn summary(&self) -> Result<Vec<(EntityKind, usize)>> {
        self.read(|tx| {
            EntityKind::ALL
                .into_iter()
                .map(|kind| -> Result<(EntityKind, usize)> {
                    Ok((kind, persist::count(tx, kind, "1", Vec::new())?))
                })
                .collect()
        })
    }

    // ------------- Mutations -------------
    pub fn create<T: Model>(&self, mut entity: T) -> Result<T> {
        let annotations = self.detach_annotations(&mut entity);
        let now = persist::now();
        let id = self
            .write(|tx| insert_entity(tx, &mut entity, now))
            .inspect_err(|e| warn!(kind = %T::KIND, error = %e, "create rejected"))?;
        self.store_annotations(EntityRef::new(T::KIND, id), annotations.as_ref())?;
        if let (Some(base), Some(annotations)) = (entity.base_mut(), annotations) {
            base.annotations = annotations;
        }
        info!(kind = %T::KIND, id, "created");
        Ok(entity)
    }

    /// Applies a partial field map on top of the stored entity. Unnamed
    /// fields keep their values; `id`, `created` and `modified` cannot be
    /// patched. Names the kind does not store fail the update, except
    /// `sampling_period`, which sets the rate it derives from.
    pub fn update<T: Model>(&self, id: EntityId, fields: &Map<String, Value>) -> Result<T> {
        self.modify(id, |current: T| {
            let mut merged = current.into_record().to_fields()?;
            for (name, value) in fields {
                if !matches!(name.as_str(), "id" | "created" | "modified" | "kind") {
                    merged.insert(name.clone(), value.clone());
                }
            }
            T::from_record(Record::from_fields(T::KIND, &merged)?)
                .ok_or_else(|| NeoError::StorageUnavailable(format!("{} record changed kind", T::KIND)))
        })
    }

    pub fn update_with<T: Model>(&self, id: EntityId, change: impl FnOnce(&mut T)) -> Result<T> {
        self.modify(id, |mut current: T| {
            change(&mut current);
            Ok(current)
        })
    }

    fn modify<T: Model>(&self, id: EntityId, change: impl FnOnce(T) -> Result<T>) -> Result<T> {
        let external = self.external_annotations();
        let mut entity = self
            .write(|tx| {
                let mut current = persist::load::<T>(tx, id)?.ok_or(NeoError::NotFound { kind: T::KIND, id })?;
                if let (Some(store), Some(base)) = (&external, current.base_mut()) {
                    base.annotations = store.get_annotations(EntityRef::new(T::KIND, id))?;
                }
                let created = current.base().and_then(|b| b.created);
                let mut entity = change(current)?;
                entity.set_id(id);
                entity.normalize();
                if let Some(base) = entity.base_mut() {
                    base.created = created;
                    base.modified = Some(persist::now());
                }
                validate::validate(&entity, tx)?;
                if external.is_some() {
                    let mut inline = entity.clone();
                    if let Some(base) = inline.base_mut() {
                        base.annotations.clear();
                    }
                    persist::update(tx, id, &inline)?;
                } else {
                    persist::update(tx, id, &entity)?;
                }
                Ok(entity)
            })
            .inspect_err(|e| warn!(kind = %T::KIND, id, error = %e, "update rejected"))?;
        if let Some(store) = &external {
            let entity_ref = EntityRef::new(T::KIND, id);
            store.remove_annotations(entity_ref)?;
            if let Some(base) = entity.base_mut() {
                for (key, value) in &base.annotations {
                    store.set_annotation(entity_ref, key, value)?;
                }
            }
        }
        info!(kind = %T::KIND, id, "updated");
        Ok(entity)
    }

    pub fn delete<T: Model>(&self, id: EntityId) -> Result<()> {
        self.delete_record(T::KIND, id, DeletePolicy::Restrict)
    }

    pub fn delete_with<T: Model>(&self, id: EntityId, policy: DeletePolicy) -> Result<()> {
        self.delete_record(T::KIND, id, policy)
    }

    pub fn delete_record(&self, kind: EntityKind, id: EntityId, policy: DeletePolicy) -> Result<()> {
        let removed = self
            .write(|tx| {
                let mut removed = Vec::new();
                remove(tx, kind, id, policy, &mut removed)?;
                Ok(removed)
            })
            .inspect_err(|e| warn!(%kind, id, error = %e, "delete rejected"))?;
        if let Some(store) = &self.annotations {
            for entity in &removed {
                store.remove_annotations(*entity)?;
            }
        }
        info!(%kind, id, removed = removed.len(), ?policy, "deleted");
        Ok(())
    }

    // ------------- Dynamic records -------------
    pub fn create_record(&self, record: Record) -> Result<Record> {
        Ok(match record {
            Record::Block(e) => self.create(e)?.into_record(),
            Record::Segment(e) => self.create(e)?.into_record(),
            Record::RecordingChannelGroup(e) => self.create(e)?.into_record(),
            Record::RecordingChannel(e) => self.create(e)?.into_record(),
            Record::Unit(e) => self.create(e)?.into_record(),
            Record::AnalogSignal(e) => self.create(e)?.into_record(),
            Record::IrregularlySampledSignal(e) => self.create(e)?.into_record(),
            Record::SpikeTrain(e) => self.create(e)?.into_record(),
            Record::SpikeTrainFull(e) => self.create(e)?.into_record(),
            Record::Event(e) => self.create(e)?.into_record(),
            Record::EventLabel(e) => self.create(e)?.into_record(),
        })
    }

    pub fn get_record(&self, kind: EntityKind, id: EntityId) -> Result<Record> {
        Ok(match kind {
            EntityKind::Block => self.get::<Block>(id)?.into_record(),
            EntityKind::Segment => self.get::<Segment>(id)?.into_record(),
            EntityKind::RecordingChannelGroup => self.get::<RecordingChannelGroup>(id)?.into_record(),
            EntityKind::RecordingChannel => self.get::<RecordingChannel>(id)?.into_record(),
            EntityKind::Unit => self.get::<Unit>(id)?.into_record(),
            EntityKind::AnalogSignal => self.get::<AnalogSignal>(id)?.into_record(),
            EntityKind::IrregularlySampledSignal => self.get::<IrregularlySampledSignal>(id)?.into_record(),
            EntityKind::SpikeTrain => self.get::<SpikeTrain>(id)?.into_record(),
            EntityKind::SpikeTrainFull => self.get::<SpikeTrainFull>(id)?.into_record(),
            EntityKind::Event => self.get::<Event>(id)?.into_record(),
            EntityKind::EventLabel => self.get::<EventLabel>(id)?.into_record(),
        })
    }

    pub fn update_record(&self, kind: EntityKind, id: EntityId, fields: &Map<String, Value>) -> Result<Record> {
        Ok(match kind {
            EntityKind::Block => self.update::<Block>(id, fields)?.into_record(),
            EntityKind::Segment => self.update::<Segment>(id, fields)?.into_record(),
            EntityKind::RecordingChannelGroup => self.update::<RecordingChannelGroup>(id, fields)?.into_record(),
            EntityKind::RecordingChannel => self.update::<RecordingChannel>(id, fields)?.into_record(),
            EntityKind::Unit => self.update::<Unit>(id, fields)?.into_record(),
            EntityKind::AnalogSignal => self.update::<AnalogSignal>(id, fields)?.into_record(),
            EntityKind::IrregularlySampledSignal => {
                self.update::<IrregularlySampledSignal>(id, fields)?.into_record()
            }
            EntityKind::SpikeTrain => self.update::<SpikeTrain>(id, fields)?.into_record(),
            EntityKind::SpikeTrainFull => self.update::<SpikeTrainFull>(id, fields)?.into_record(),
            EntityKind::Event => self.update::<Event>(id, fields)?.into_record(),
            EntityKind::EventLabel => self.update::<EventLabel>(id, fields)?.into_record(),
        })
    }

    // ------------- Annotation routing -------------
    fn attach_annotations<T: Entity>(&self, entity: &mut T) -> Result<()> {
        if let (Some(store), Some(entity_ref)) = (&self.annotations, entity.entity_ref()) {
            if let Some(base) = entity.base_mut() {
                base.annotations = store.get_annotations(entity_ref)?;
            }
        }
        Ok(())
    }
    pub(crate) fn detach_annotations<T: Entity>(&self, entity: &mut T) -> Option<crate::model::Annotations> {
        self.annotations.as_ref()?;
        entity.base_mut().map(|base| std::mem::take(&mut base.annotations))
    }
    pub(crate) fn store_annotations(
        &self,
        entity: EntityRef,
        annotations: Option<&crate::model::Annotations>,
    ) -> Result<()> {
        if let (Some(store), Some(annotations)) = (&self.annotations, annotations) {
            for (key, value) in annotations {
                store.set_annotation(entity, key, value)?;
            }
        }
        Ok(())
    }
}

impl LabelResolver for Database {
    fn resolve_or_create_label(&self, name: &str, description: Option<&str>) -> Result<EventLabel> {
        self.write(|tx| resolve_label(tx, name, description, persist::now()))
    }
}

// ------------- Transaction-scoped operations -------------
/// Stamps, validates and inserts one entity, returning its new id.
pub(crate) fn insert_entity<T: Model>(tx: &Connection, entity: &mut T, now: DateTime<Utc>) -> Result<EntityId> {
    entity.normalize();
    if let Some(base) = entity.base_mut() {
        base.id = None;
        base.created = Some(now);
        base.modified = Some(now);
    }
    validate::validate(entity, tx)?;
    let id = persist::insert(tx, entity)?;
    entity.set_id(id);
    Ok(id)
}

pub(crate) fn insert_record(tx: &Connection, record: &mut Record, now: DateTime<Utc>) -> Result<EntityId> {
    match record {
        Record::Block(e) => insert_entity(tx, e, now),
        Record::Segment(e) => insert_entity(tx, e, now),
        Record::RecordingChannelGroup(e) => insert_entity(tx, e, now),
        Record::RecordingChannel(e) => insert_entity(tx, e, now),
        Record::Unit(e) => insert_entity(tx, e, now),
        Record::AnalogSignal(e) => insert_entity(tx, e, now),
        Record::IrregularlySampledSignal(e) => insert_entity(tx, e, now),
        Record::SpikeTrain(e) => insert_entity(tx, e, now),
        Record::SpikeTrainFull(e) => insert_entity(tx, e, now),
        Record::Event(e) => insert_entity(tx, e, now),
        Record::EventLabel(e) => {
            let label = resolve_label(tx, &e.name, e.description.as_deref(), now)?;
            let id = label.id.ok_or_else(|| NeoError::StorageUnavailable("label without id".to_string()))?;
            *e = label;
            Ok(id)
        }
    }
}

pub(crate) fn resolve_label(
    tx: &Connection,
    name: &str,
    description: Option<&str>,
    now: DateTime<Utc>,
) -> Result<EventLabel> {
    if let Some(label) = persist::find_label(tx, name)? {
        return Ok(label);
    }
    let mut label = EventLabel::new(name);
    label.description = description.map(str::to_string);
    insert_entity(tx, &mut label, now)?;
    debug!(name, "label created");
    Ok(label)
}

// Containers and lookups own what points at them; groups are only referenced.
fn owns(kind: EntityKind) -> bool {
    matches!(kind.family(), Family::Container | Family::Lookup)
}

fn remove(
    tx: &Connection,
    kind: EntityKind,
    id: EntityId,
    policy: DeletePolicy,
    removed: &mut Vec<EntityRef>,
) -> Result<()> {
    use crate::validate::Referents;
    if !tx.exists(kind, id)? {
        return Err(NeoError::NotFound { kind, id });
    }
    let mut blocking: Vec<String> = Vec::new();
    for (owner, field) in crate::schema::inbound(kind) {
        let Some(column) = field.column else { continue };
        let dependents = persist::referencing(tx, owner, column, id)?;
        if dependents.is_empty() {
            continue;
        }
        match policy {
            DeletePolicy::Restrict => {
                blocking.push(format!("{} {} row(s) via {}", dependents.len(), owner, field.name));
            }
            DeletePolicy::Cascade if owns(kind) => {
                for dependent in dependents {
                    remove(tx, owner, dependent, policy, removed)?;
                }
            }
            DeletePolicy::Cascade => {
                persist::clear_reference(tx, owner, column, id)?;
            }
        }
    }
    if !blocking.is_empty() {
        return Err(NeoError::Conflict { kind, id, reason: format!("still referenced by {}", blocking.join(", ")) });
    }
    persist::delete_row(tx, kind, id)?;
    removed.push(EntityRef::new(kind, id));
    Ok(())
}

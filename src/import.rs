//! All-or-nothing import of a container hierarchy.
//!
//! A batch is an ordered list of records. Records that later records point
//! at carry a local `key`; relation fields are then given under `refs` as a
//! key (to-one) or a list of keys (to-many) instead of store ids, which do
//! not exist yet when the batch is written. Event labels are resolved by
//! name, so importing a label that already exists reuses it.
//!
//! ```json
//! { "records": [
//!     { "kind": "block", "key": "b", "name": "session 1" },
//!     { "kind": "segment", "key": "s", "refs": { "block": "b" } },
//!     { "kind": "analog_signal", "signal": [0.1, 0.2], "sampling_rate": 1000.0,
//!       "refs": { "segment": "s" } }
//! ] }
//! ```

use std::collections::BTreeMap;

use chrono::Utc;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::{NeoError, Result};
use crate::model::{Annotations, EntityId, EntityKind, EntityRef, Record};
use crate::persist;
use crate::repository::{self, Database};
use crate::schema::{self, Relation};
use crate::validate::{ValidationError, Violation};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RefValue {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportRecord {
    pub kind: EntityKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub refs: BTreeMap<String, RefValue>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}
impl ImportRecord {
    pub fn new(kind: EntityKind, fields: Map<String, Value>) -> Self {
        Self { kind, key: None, refs: BTreeMap::new(), fields }
    }
    pub fn keyed(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
    pub fn with_ref(mut self, field: impl Into<String>, key: impl Into<String>) -> Self {
        self.refs.insert(field.into(), RefValue::One(key.into()));
        self
    }
    pub fn with_refs(mut self, field: impl Into<String>, keys: Vec<String>) -> Self {
        self.refs.insert(field.into(), RefValue::Many(keys));
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportBatch {
    pub records: Vec<ImportRecord>,
}
impl ImportBatch {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn push(&mut self, record: ImportRecord) {
        self.records.push(record);
    }
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportReport {
    /// Every record of the batch in batch order, labels included.
    pub records: Vec<EntityRef>,
    pub keys: BTreeMap<String, EntityRef>,
}

impl Database {
    /// Applies the batch inside one transaction. The first failing record
    /// aborts the import, nothing of the batch is kept, and the error names
    /// the record's position.
    pub fn import(&self, batch: ImportBatch) -> Result<ImportReport> {
        let external = self.external_annotations().is_some();
        let total = batch.records.len();
        let now = persist::now();
        let (report, pending) = self
            .write(|tx| {
                let mut report = ImportReport::default();
                let mut pending: Vec<(EntityRef, Annotations)> = Vec::new();
                for (position, record) in batch.records.into_iter().enumerate() {
                    let applied = apply(tx, record, &report.keys, external, now)
                        .map_err(|e| NeoError::Import { position, source: Box::new(e) })?;
                    if let Some(key) = applied.key {
                        report.keys.insert(key, applied.entity);
                    }
                    if let Some(annotations) = applied.annotations {
                        pending.push((applied.entity, annotations));
                    }
                    report.records.push(applied.entity);
                }
                Ok((report, pending))
            })
            .inspect_err(|e| warn!(error = %e, "import rolled back"))?;
        for (entity, annotations) in &pending {
            self.store_annotations(*entity, Some(annotations))?;
        }
        info!(records = total, "import committed");
        Ok(report)
    }
}

struct Applied {
    key: Option<String>,
    entity: EntityRef,
    annotations: Option<Annotations>,
}

fn apply(
    tx: &Connection,
    record: ImportRecord,
    keys: &BTreeMap<String, EntityRef>,
    external: bool,
    now: chrono::DateTime<Utc>,
) -> Result<Applied> {
    let ImportRecord { kind, key, refs, mut fields } = record;
    let mut violations: Vec<Violation> = Vec::new();
    if key.as_ref().is_some_and(|k| keys.contains_key(k)) {
        violations.push(Violation::Duplicate {
            field: "key".to_string(),
            value: key.clone().unwrap_or_default(),
        });
    }
    for (field, value) in refs {
        match resolve(kind, &field, &value, keys) {
            Ok(resolved) => {
                fields.insert(field, resolved);
            }
            Err(violation) => violations.push(violation),
        }
    }
    if !violations.is_empty() {
        return Err(ValidationError::new(kind, violations).into());
    }
    let annotations = match fields.remove("annotations") {
        Some(value) if external => Some(annotations_from(kind, value)?),
        Some(value) => {
            fields.insert("annotations".to_string(), value);
            None
        }
        None => None,
    };
    let mut entity = Record::from_fields(kind, &fields)?;
    let id = repository::insert_record(tx, &mut entity, now)?;
    debug!(%kind, id, key = ?key, "imported");
    Ok(Applied { key, entity: EntityRef::new(kind, id), annotations })
}

fn annotations_from(kind: EntityKind, value: Value) -> Result<Annotations> {
    serde_json::from_value(value).map_err(|e| {
        ValidationError::new(
            kind,
            vec![Violation::InvalidValue { field: "annotations".to_string(), message: e.to_string() }],
        )
        .into()
    })
}

fn resolve(
    kind: EntityKind,
    field: &str,
    value: &RefValue,
    keys: &BTreeMap<String, EntityRef>,
) -> std::result::Result<Value, Violation> {
    let invalid = |message: String| Violation::InvalidValue { field: field.to_string(), message };
    let Some(info) = schema::describe(kind).field(field) else {
        return Err(Violation::UnknownField { field: field.to_string() });
    };
    let lookup = |key: &str, target: EntityKind| -> std::result::Result<EntityId, Violation> {
        match keys.get(key) {
            Some(entity) if entity.kind == target => Ok(entity.id),
            Some(entity) => Err(invalid(format!("key '{key}' names a {}, not a {target}", entity.kind))),
            None => Err(invalid(format!("no earlier record has key '{key}'"))),
        }
    };
    match (info.relation, value) {
        (Some(Relation::Reference { target }), RefValue::One(key)) => Ok(Value::from(lookup(key, target)?)),
        (Some(Relation::Link { target, stored: true, .. }), RefValue::One(key)) => {
            Ok(Value::from(vec![lookup(key, target)?]))
        }
        (Some(Relation::Link { target, stored: true, .. }), RefValue::Many(list)) => list
            .iter()
            .map(|key| lookup(key, target))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(Value::from),
        (Some(Relation::Reference { .. }), RefValue::Many(_)) => {
            Err(invalid("a to-one relation takes a single key".to_string()))
        }
        _ => Err(invalid("not a relation that can be set on this record".to_string())),
    }
}

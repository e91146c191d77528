//! Free-form key/value annotations addressed by `(kind, id)`.
//!
//! By default annotations live inline with their entity, in the JSON
//! `Annotations` column. A database can instead be opened over an external
//! [`AnnotationStore`], in which case entity annotations are read from and
//! written to that store and the inline column stays empty.

use std::collections::HashMap;
use std::hash::BuildHasherDefault;
use std::sync::Mutex;

use seahash::SeaHasher;
use tracing::debug;

use crate::error::{NeoError, Result};
use crate::model::{Annotations, EntityKind, EntityRef};
use crate::persist;
use crate::repository::Database;
use crate::validate::{ValidationError, Violation};

type AnnotationHasher = BuildHasherDefault<SeaHasher>;

pub trait AnnotationStore: Send + Sync {
    fn get_annotations(&self, entity: EntityRef) -> Result<Annotations>;
    fn set_annotation(&self, entity: EntityRef, key: &str, value: &str) -> Result<()>;
    /// Drops every annotation of an entity, e.g. once it has been deleted.
    fn remove_annotations(&self, _entity: EntityRef) -> Result<()> {
        Ok(())
    }
}

/// Keeps annotations in process memory. Useful as an external store in
/// tests and for short-lived databases.
#[derive(Debug, Default)]
pub struct MemoryAnnotationStore {
    entries: Mutex<HashMap<EntityRef, Annotations, AnnotationHasher>>,
}
impl MemoryAnnotationStore {
    pub fn new() -> Self {
        Self::default()
    }
    fn entries(&self) -> Result<std::sync::MutexGuard<'_, HashMap<EntityRef, Annotations, AnnotationHasher>>> {
        self.entries
            .lock()
            .map_err(|_| NeoError::StorageUnavailable("annotation store lock poisoned".to_string()))
    }
    pub fn len(&self) -> Result<usize> {
        Ok(self.entries()?.len())
    }
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.entries()?.is_empty())
    }
}
impl AnnotationStore for MemoryAnnotationStore {
    fn get_annotations(&self, entity: EntityRef) -> Result<Annotations> {
        Ok(self.entries()?.get(&entity).cloned().unwrap_or_default())
    }
    fn set_annotation(&self, entity: EntityRef, key: &str, value: &str) -> Result<()> {
        self.entries()?
            .entry(entity)
            .or_default()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
    fn remove_annotations(&self, entity: EntityRef) -> Result<()> {
        self.entries()?.remove(&entity);
        Ok(())
    }
}

fn annotatable(entity: EntityRef) -> Result<()> {
    if entity.kind == EntityKind::EventLabel {
        return Err(ValidationError::new(
            entity.kind,
            vec![Violation::UnknownField { field: "annotations".to_string() }],
        )
        .into());
    }
    Ok(())
}

impl AnnotationStore for Database {
    fn get_annotations(&self, entity: EntityRef) -> Result<Annotations> {
        annotatable(entity)?;
        let inline = self
            .read(|tx| persist::annotations(tx, entity.kind, entity.id))?
            .ok_or(NeoError::NotFound { kind: entity.kind, id: entity.id })?;
        match self.external_annotations() {
            Some(store) => store.get_annotations(entity),
            None => Ok(serde_json::from_str(&inline)?),
        }
    }

    /// Writing an annotation counts as a mutation of the entity, so its
    /// `modified` timestamp moves as well.
    fn set_annotation(&self, entity: EntityRef, key: &str, value: &str) -> Result<()> {
        annotatable(entity)?;
        let external = self.external_annotations();
        self.write(|tx| {
            let inline = persist::annotations(tx, entity.kind, entity.id)?
                .ok_or(NeoError::NotFound { kind: entity.kind, id: entity.id })?;
            let stored = if external.is_some() {
                inline
            } else {
                let mut annotations: Annotations = serde_json::from_str(&inline)?;
                annotations.insert(key.to_string(), value.to_string());
                serde_json::to_string(&annotations)?
            };
            persist::store_annotations(tx, entity.kind, entity.id, &stored, &persist::now())
        })?;
        if let Some(store) = external {
            store.set_annotation(entity, key, value)?;
        }
        debug!(%entity, key, "annotated");
        Ok(())
    }
}

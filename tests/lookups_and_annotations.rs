use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;

use neostore::annotation::{AnnotationStore, MemoryAnnotationStore};
use neostore::model::{Block, EntityKind, EntityRef, EventLabel, Segment};
use neostore::persist::PersistenceMode;
use neostore::query::Filter;
use neostore::validate::Violation;
use neostore::{Database, DeletePolicy, LabelResolver, NeoError};

fn annotated(name: &str, pairs: &[(&str, &str)]) -> Block {
    let mut block = Block::named(name);
    for (key, value) in pairs {
        block.base.annotations.insert(key.to_string(), value.to_string());
    }
    block
}

#[test]
fn labels_are_resolved_by_name() {
    let db = Database::new(PersistenceMode::InMemory).unwrap();
    let first = db.resolve_or_create_label("reward", Some("juice")).unwrap();
    let again = db.resolve_or_create_label("reward", None).unwrap();
    assert_eq!(first.id, again.id);
    assert_eq!(again.description.as_deref(), Some("juice"));
    let other = db.resolve_or_create_label("cue", None).unwrap();
    assert_ne!(first.id, other.id);
    assert_eq!(db.count::<EventLabel>(&Filter::new()).unwrap(), 2);
}

#[test]
fn label_names_are_unique() {
    let db = Database::new(PersistenceMode::InMemory).unwrap();
    db.create(EventLabel::new("cue")).unwrap();
    let err = db.create(EventLabel::new("cue")).unwrap_err();
    match err {
        NeoError::Validation(e) => assert_eq!(
            e.violations,
            vec![Violation::Duplicate { field: "name".to_string(), value: "cue".to_string() }]
        ),
        other => panic!("expected a duplicate, got {other:?}"),
    }
    let lick = db.create(EventLabel::new("lick")).unwrap();
    assert!(db.update_with::<EventLabel>(lick.id.unwrap(), |l| l.name = "cue".to_string()).is_err());
    // renaming a label onto itself is fine
    let kept = db.update_with::<EventLabel>(lick.id.unwrap(), |l| l.description = Some("tongue".into())).unwrap();
    assert_eq!(kept.name, "lick");
}

#[test]
fn inline_annotations_are_stored_with_the_entity() {
    let db = Database::new(PersistenceMode::InMemory).unwrap();
    let block = db.create(annotated("session", &[("rig", "B"), ("animal", "m12")])).unwrap();
    let id = block.base.id.unwrap();
    let entity = EntityRef::new(EntityKind::Block, id);

    let annotations = db.get_annotations(entity).unwrap();
    assert_eq!(annotations.get("rig").map(String::as_str), Some("B"));
    assert_eq!(annotations.len(), 2);

    sleep(Duration::from_millis(5));
    db.set_annotation(entity, "quality", "good").unwrap();
    let reread: Block = db.get(id).unwrap();
    assert_eq!(reread.base.annotations.len(), 3);
    assert!(reread.base.modified > block.base.modified);
    assert_eq!(reread.base.created, block.base.created);

    db.set_annotation(entity, "rig", "C").unwrap();
    assert_eq!(db.get_annotations(entity).unwrap()["rig"], "C");
}

#[test]
fn annotations_of_missing_or_label_entities_are_refused() {
    let db = Database::new(PersistenceMode::InMemory).unwrap();
    let missing = EntityRef::new(EntityKind::Segment, 99);
    assert!(matches!(db.get_annotations(missing), Err(NeoError::NotFound { .. })));
    assert!(matches!(db.set_annotation(missing, "k", "v"), Err(NeoError::NotFound { .. })));

    let label = db.create(EventLabel::new("cue")).unwrap();
    let label = EntityRef::new(EntityKind::EventLabel, label.id.unwrap());
    assert!(matches!(db.set_annotation(label, "k", "v"), Err(NeoError::Validation(_))));
}

#[test]
fn annotations_can_be_filtered_and_searched() {
    let db = Database::new(PersistenceMode::InMemory).unwrap();
    db.create(annotated("alpha", &[("quality", "Good")])).unwrap();
    db.create(annotated("beta", &[("rig", "A")])).unwrap();
    db.create(Block::named("good session")).unwrap();

    let with_quality = db.query::<Block>().filter_key("annotations__has_key", "quality").fetch().unwrap();
    assert_eq!(with_quality.len(), 1);
    assert_eq!(with_quality[0].base.name.as_deref(), Some("alpha"));

    let contains = db.query::<Block>().filter_key("annotations__contains", "rig").count().unwrap();
    assert_eq!(contains, 1);

    let mut found: Vec<String> = db
        .query::<Block>()
        .search("GOOD")
        .fetch()
        .unwrap()
        .into_iter()
        .filter_map(|b| b.base.name)
        .collect();
    found.sort();
    assert_eq!(found, vec!["alpha", "good session"]);
    assert_eq!(db.query::<Block>().search("nothing like it").count().unwrap(), 0);
}

#[test]
fn an_external_store_takes_over_annotations() {
    let store = Arc::new(MemoryAnnotationStore::new());
    let db = Database::new(PersistenceMode::InMemory).unwrap().with_annotation_store(store.clone());

    let block = db.create(annotated("session", &[("rig", "B")])).unwrap();
    assert_eq!(block.base.annotations["rig"], "B");
    let id = block.base.id.unwrap();
    let entity = EntityRef::new(EntityKind::Block, id);
    assert_eq!(store.get_annotations(entity).unwrap()["rig"], "B");
    assert_eq!(store.len().unwrap(), 1);

    let reread: Block = db.get(id).unwrap();
    assert_eq!(reread.base.annotations["rig"], "B");

    db.set_annotation(entity, "quality", "good").unwrap();
    assert_eq!(store.get_annotations(entity).unwrap().len(), 2);

    let updated = db
        .update_with::<Block>(id, |b| {
            b.base.annotations.remove("rig");
        })
        .unwrap();
    assert_eq!(updated.base.annotations.len(), 1);
    assert!(!store.get_annotations(entity).unwrap().contains_key("rig"));

    let segment = db.create(Segment::named("trial", Some(id))).unwrap();
    db.set_annotation(EntityRef::new(EntityKind::Segment, segment.base.id.unwrap()), "k", "v").unwrap();
    assert_eq!(store.len().unwrap(), 2);
    db.delete_with::<Block>(id, DeletePolicy::Cascade).unwrap();
    assert!(store.is_empty().unwrap(), "annotations of removed entities are dropped");
}

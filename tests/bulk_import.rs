use neostore::import::{ImportBatch, ImportRecord};
use neostore::model::{
    AnalogSignal, Block, EntityKind, Event, EventLabel, RecordingChannel, RecordingChannelGroup,
    Segment, Unit,
};
use neostore::persist::PersistenceMode;
use neostore::query::Filter;
use neostore::validate::Violation;
use neostore::{Database, LabelResolver, NeoError};
use serde_json::json;

const SESSION: &str = r#"{ "records": [
    { "kind": "block", "key": "b", "name": "session 1", "rec_datetime": "2024-03-01T12:00:00Z" },
    { "kind": "segment", "key": "s1", "name": "trial 1", "index": 0, "refs": { "block": "b" } },
    { "kind": "segment", "key": "s2", "name": "trial 2", "index": 1, "refs": { "block": "b" } },
    { "kind": "recording_channel", "key": "c0", "index": 0 },
    { "kind": "recording_channel", "key": "c1", "index": 1 },
    { "kind": "recording_channel_group", "key": "g", "name": "tetrode",
      "refs": { "block": "b", "recording_channels": ["c0", "c1"] } },
    { "kind": "unit", "key": "u", "refs": { "recording_channel_groups": ["g"] } },
    { "kind": "analog_signal", "signal": [0.1, 0.2, 0.3], "sampling_rate": 1000.0,
      "signal_units": "mV", "refs": { "segment": "s1", "recording_channel": "c0" } },
    { "kind": "spike_train", "times": [0.2, 0.1], "t_stop": 1.0,
      "refs": { "segment": "s1", "unit": "u" } },
    { "kind": "event_label", "key": "cue", "name": "cue" },
    { "kind": "event", "time": 0.05, "refs": { "segment": "s2", "label": "cue" } }
] }"#;

fn fields(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
    value.as_object().cloned().unwrap()
}

#[test]
fn a_whole_hierarchy_imports_in_one_go() {
    let db = Database::new(PersistenceMode::InMemory).unwrap();
    let report = db.import(ImportBatch::from_json(SESSION).unwrap()).unwrap();
    assert_eq!(report.records.len(), 11);
    assert_eq!(report.keys.len(), 8);
    assert_eq!(report.records[0].kind, EntityKind::Block);

    let block: Block = db.get(report.keys["b"].id).unwrap();
    assert_eq!(block.base.name.as_deref(), Some("session 1"));
    assert!(block.container.rec_datetime.is_some());
    assert_eq!(block.segments(&db).count().unwrap(), 2);

    let group: RecordingChannelGroup = db.get(report.keys["g"].id).unwrap();
    assert_eq!(group.recording_channels, vec![report.keys["c0"].id, report.keys["c1"].id]);
    let unit: Unit = db.get(report.keys["u"].id).unwrap();
    assert_eq!(unit.recording_channel_groups, vec![group.base.id.unwrap()]);
    assert_eq!(unit.spike_trains(&db).fetch().unwrap()[0].times, vec![0.1, 0.2]);

    let signal: AnalogSignal = db.get(report.records[7].id).unwrap();
    assert_eq!(signal.recording_channel, Some(report.keys["c0"].id));
    let event: Event = db.get(report.records[10].id).unwrap();
    assert_eq!(event.label(&db).unwrap().name, "cue");
}

#[test]
fn imported_labels_reuse_existing_ones() {
    let db = Database::new(PersistenceMode::InMemory).unwrap();
    let existing = db.resolve_or_create_label("cue", Some("visual cue")).unwrap();
    let report = db.import(ImportBatch::from_json(SESSION).unwrap()).unwrap();
    assert_eq!(report.keys["cue"].id, existing.id.unwrap());
    assert_eq!(db.count::<EventLabel>(&Filter::new()).unwrap(), 1);
    let label: EventLabel = db.get(existing.id.unwrap()).unwrap();
    assert_eq!(label.description.as_deref(), Some("visual cue"));

    // a second import of the same session reuses the label again
    db.import(ImportBatch::from_json(SESSION).unwrap()).unwrap();
    assert_eq!(db.count::<EventLabel>(&Filter::new()).unwrap(), 1);
    assert_eq!(db.count::<Block>(&Filter::new()).unwrap(), 2);
}

#[test]
fn a_failing_record_rolls_back_the_whole_batch() {
    let db = Database::new(PersistenceMode::InMemory).unwrap();
    let mut batch = ImportBatch::new();
    batch.push(ImportRecord::new(EntityKind::Block, fields(json!({ "name": "kept?" }))).keyed("b"));
    batch.push(ImportRecord::new(EntityKind::Segment, fields(json!({}))).keyed("s").with_ref("block", "b"));
    batch.push(ImportRecord::new(EntityKind::RecordingChannel, fields(json!({ "index": 3 }))));
    batch.push(
        ImportRecord::new(EntityKind::AnalogSignal, fields(json!({ "signal": [1.0], "sampling_rate": -5.0 })))
            .with_ref("segment", "s"),
    );
    match db.import(batch).unwrap_err() {
        NeoError::Import { position, source } => {
            assert_eq!(position, 3);
            assert!(matches!(*source, NeoError::Validation(_)), "got {source:?}");
        }
        other => panic!("expected an import error, got {other:?}"),
    }
    assert_eq!(db.count::<Block>(&Filter::new()).unwrap(), 0);
    assert_eq!(db.count::<Segment>(&Filter::new()).unwrap(), 0);
    assert_eq!(db.count::<RecordingChannel>(&Filter::new()).unwrap(), 0);
}

#[test]
fn references_to_unknown_keys_are_rejected() {
    let db = Database::new(PersistenceMode::InMemory).unwrap();
    let mut batch = ImportBatch::new();
    batch.push(ImportRecord::new(EntityKind::Segment, fields(json!({}))).with_ref("block", "missing"));
    let err = db.import(batch).unwrap_err();
    let NeoError::Import { position: 0, source } = err else { panic!("expected an import error at 0") };
    match *source {
        NeoError::Validation(e) => {
            assert!(matches!(&e.violations[..], [Violation::InvalidValue { field, .. }] if field == "block"))
        }
        other => panic!("expected validation, got {other:?}"),
    }
}

#[test]
fn keys_must_point_at_the_right_kind() {
    let db = Database::new(PersistenceMode::InMemory).unwrap();
    let mut batch = ImportBatch::new();
    batch.push(ImportRecord::new(EntityKind::RecordingChannel, fields(json!({ "index": 0 }))).keyed("c"));
    batch.push(ImportRecord::new(EntityKind::Segment, fields(json!({}))).with_ref("block", "c"));
    let err = db.import(batch).unwrap_err();
    assert!(matches!(err, NeoError::Import { position: 1, .. }));
    assert!(err.to_string().contains("not a block"), "{err}");
    assert_eq!(db.count::<RecordingChannel>(&Filter::new()).unwrap(), 0);
}

#[test]
fn duplicate_keys_and_unknown_relations_are_rejected() {
    let db = Database::new(PersistenceMode::InMemory).unwrap();
    let mut batch = ImportBatch::new();
    batch.push(ImportRecord::new(EntityKind::Block, fields(json!({}))).keyed("b"));
    batch.push(ImportRecord::new(EntityKind::Block, fields(json!({}))).keyed("b"));
    match db.import(batch).unwrap_err() {
        NeoError::Import { position: 1, source } => match *source {
            NeoError::Validation(e) => {
                assert_eq!(e.violations, vec![Violation::Duplicate { field: "key".to_string(), value: "b".to_string() }])
            }
            other => panic!("expected validation, got {other:?}"),
        },
        other => panic!("expected an import error at 1, got {other:?}"),
    }

    let mut batch = ImportBatch::new();
    batch.push(ImportRecord::new(EntityKind::Block, fields(json!({}))).keyed("b"));
    batch.push(ImportRecord::new(EntityKind::Block, fields(json!({}))).with_ref("parent", "b"));
    let err = db.import(batch).unwrap_err();
    let NeoError::Import { source, .. } = err else { panic!("expected an import error") };
    assert!(matches!(*source, NeoError::Validation(ref e) if e.violations == vec![Violation::UnknownField { field: "parent".to_string() }]));
}

#[test]
fn missing_required_fields_name_the_position() {
    let db = Database::new(PersistenceMode::InMemory).unwrap();
    let mut batch = ImportBatch::new();
    batch.push(ImportRecord::new(EntityKind::RecordingChannel, fields(json!({}))));
    let err = db.import(batch).unwrap_err();
    assert!(err.to_string().starts_with("Import failed at record 0"), "{err}");
    let NeoError::Import { source, .. } = err else { panic!("expected an import error") };
    assert!(matches!(*source, NeoError::MissingField { kind: EntityKind::RecordingChannel, .. }));
}

#[test]
fn unknown_fields_abort_the_batch() {
    let db = Database::new(PersistenceMode::InMemory).unwrap();
    let mut batch = ImportBatch::new();
    batch.push(ImportRecord::new(EntityKind::Block, fields(json!({ "name": "kept?" }))));
    batch.push(ImportRecord::new(EntityKind::Block, fields(json!({ "name": "odd", "colour": "red" }))));
    let err = db.import(batch).unwrap_err();
    let NeoError::Import { position: 1, source } = err else { panic!("expected an import error at 1") };
    assert!(matches!(*source, NeoError::Validation(ref e) if e.violations == vec![Violation::UnknownField { field: "colour".to_string() }]));
    assert_eq!(db.count::<Block>(&Filter::new()).unwrap(), 0);
}

#[test]
fn an_empty_batch_is_a_no_op() {
    let db = Database::new(PersistenceMode::InMemory).unwrap();
    let report = db.import(ImportBatch::new()).unwrap();
    assert!(report.records.is_empty());
    assert!(report.keys.is_empty());
}

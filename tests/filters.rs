use chrono::{TimeZone, Utc};

use neostore::model::{
    AnalogSignal, Block, Event, EventLabel, RecordingChannel, RecordingChannelGroup, Segment, SpikeTrain,
    SpikeTrainFull,
};
use neostore::persist::PersistenceMode;
use neostore::query::{Condition, Filter, FilterValue, Op};
use neostore::validate::Violation;
use neostore::{Database, NeoError};

fn sessions() -> (Database, Vec<u64>) {
    let db = Database::new(PersistenceMode::InMemory).unwrap();
    let mut ids = Vec::new();
    for (name, day, description) in [
        ("Mouse A", Some(1), Some("first pass")),
        ("mouse B", Some(10), None),
        ("Rat C", Some(20), Some("Second pass")),
        ("rat D", None, None),
    ] {
        let mut block = Block::named(name);
        block.base.description = description.map(str::to_string);
        block.container.rec_datetime = day.map(|d| Utc.with_ymd_and_hms(2024, 5, d, 9, 30, 0).unwrap());
        ids.push(db.create(block).unwrap().base.id.unwrap());
    }
    (db, ids)
}

fn names(db: &Database, filter: &Filter) -> Vec<String> {
    let mut names: Vec<String> = db
        .list::<Block>(filter, &[], None, 0)
        .unwrap()
        .into_iter()
        .filter_map(|b| b.base.name)
        .collect();
    names.sort();
    names
}

fn violations(err: NeoError) -> Vec<Violation> {
    match err {
        NeoError::Validation(e) => e.violations,
        other => panic!("expected a validation error, got {other:?}"),
    }
}

#[test]
fn keys_parse_into_field_and_operator() {
    let condition = Condition::parse("rec_datetime__gte", "2024-01-01T00:00:00Z").unwrap();
    assert_eq!(condition.field, "rec_datetime");
    assert_eq!(condition.op, Op::Gte);
    let condition = Condition::parse("recording_channel_groups", 4).unwrap();
    assert_eq!(condition.field, "recording_channel_groups");
    assert_eq!(condition.op, Op::Exact);
    let condition = Condition::parse("annotations__has_key", "rig").unwrap();
    assert_eq!(condition.op, Op::HasKey);
    let condition = Condition::parse("events__label__name__icontains", "cue").unwrap();
    assert_eq!(condition.field, "events__label__name");
    assert_eq!(condition.op, Op::IContains);
    // a trailing segment that is no operator stays part of the path
    let condition = Condition::parse("name__like", "x").unwrap();
    assert_eq!(condition.field, "name__like");
    assert_eq!(condition.op, Op::Exact);
    assert!(matches!(Condition::parse("Name", "x"), Err(Violation::UnknownField { .. })));
    assert!(matches!(Condition::parse("name___x", "x"), Err(Violation::UnknownField { .. })));
}

#[test]
fn relations_can_be_followed_to_related_fields() {
    let db = Database::new(PersistenceMode::InMemory).unwrap();
    let session = db.create(Block::named("session")).unwrap().base.id.unwrap();
    let other = db.create(Block::named("other")).unwrap().base.id.unwrap();
    let cued = db.create(Segment::named("cued", Some(session))).unwrap().base.id.unwrap();
    let rewarded = db.create(Segment::named("rewarded", Some(other))).unwrap().base.id.unwrap();
    db.create(Segment::named("loose", None)).unwrap();
    let cue = db.create(EventLabel::new("cue")).unwrap().id.unwrap();
    let reward = db.create(EventLabel::new("reward")).unwrap().id.unwrap();
    db.create(Event::new(cued, 0.1, cue)).unwrap();
    db.create(Event::new(rewarded, 0.2, reward)).unwrap();
    db.create(Event::new(rewarded, 0.3, reward)).unwrap();

    let in_session = db.query::<Segment>().filter_key("block__name", "session").ids().unwrap();
    assert_eq!(in_session, vec![cued]);
    let by_prefix = db.query::<Segment>().filter_key("block__name__startswith", "oth").ids().unwrap();
    assert_eq!(by_prefix, vec![rewarded]);
    let with_cue = db.query::<Segment>().filter_key("events__label__name", "cue").ids().unwrap();
    assert_eq!(with_cue, vec![cued]);
    let by_label = db.query::<Segment>().filter_key("events__label", reward).ids().unwrap();
    assert_eq!(by_label, vec![rewarded]);
    let rewarded_blocks = db.query::<Block>().filter_key("segments__events__label__name", "reward").ids().unwrap();
    assert_eq!(rewarded_blocks, vec![other]);
    let labels = db.query::<EventLabel>().filter_key("events__segment__block__name__iexact", "SESSION").ids().unwrap();
    assert_eq!(labels, vec![cue]);

    let c0 = db.create(RecordingChannel::new(0)).unwrap().base.id.unwrap();
    let c1 = db.create(RecordingChannel::new(1)).unwrap().base.id.unwrap();
    db.create(RecordingChannelGroup::new(Some(session), vec![c0])).unwrap();
    db.create(RecordingChannelGroup::new(Some(other), vec![c1])).unwrap();
    let wired = db
        .query::<RecordingChannel>()
        .filter_key("recording_channel_groups__block__name", "session")
        .ids()
        .unwrap();
    assert_eq!(wired, vec![c0]);
}

#[test]
fn relation_paths_are_checked_hop_by_hop() {
    let db = Database::new(PersistenceMode::InMemory).unwrap();
    let mut filter = Filter::new();
    filter.add_key("block__colour", "red");
    filter.add_key("name__like", "x");
    filter.add_key("block__name__has_key", "x");
    let found = violations(db.list::<Segment>(&filter, &[], None, 0).unwrap_err());
    assert_eq!(
        found,
        vec![
            Violation::UnknownField { field: "block__colour".to_string() },
            Violation::UnsupportedOperator { field: "name".to_string(), op: "like".to_string() },
            Violation::UnsupportedOperator { field: "block__name".to_string(), op: "has_key".to_string() },
        ]
    );
}

#[test]
fn text_operators() {
    let (db, _) = sessions();
    assert_eq!(names(&db, &Filter::new().with(Condition::equals("name", "mouse B"))), vec!["mouse B"]);
    assert_eq!(names(&db, &Filter::new().with(Condition::equals("name", "MOUSE b"))), Vec::<String>::new());
    assert_eq!(
        names(&db, &Filter::new().with(Condition::new("name", Op::IExact, "MOUSE b"))),
        vec!["mouse B"]
    );
    assert_eq!(names(&db, &Filter::new().with(Condition::new("name", Op::Contains, "ouse"))), vec![
        "Mouse A", "mouse B"
    ]);
    assert_eq!(names(&db, &Filter::new().with(Condition::new("name", Op::IContains, "RAT"))), vec![
        "Rat C", "rat D"
    ]);
    assert_eq!(names(&db, &Filter::new().with(Condition::new("name", Op::StartsWith, "rat"))), vec!["rat D"]);
    let mut filter = Filter::new();
    filter.add_key("description__icontains", "pass");
    filter.add_key("name__startswith", "R");
    assert_eq!(names(&db, &filter), vec!["Rat C"]);
}

#[test]
fn datetime_comparisons_accept_values_and_text() {
    let (db, _) = sessions();
    let cutoff = Utc.with_ymd_and_hms(2024, 5, 10, 9, 30, 0).unwrap();
    assert_eq!(
        names(&db, &Filter::new().with(Condition::new("rec_datetime", Op::Gte, cutoff))),
        vec!["Rat C", "mouse B"]
    );
    assert_eq!(
        names(&db, &Filter::new().with(Condition::new("rec_datetime", Op::Gt, cutoff))),
        vec!["Rat C"]
    );
    let mut filter = Filter::new();
    filter.add_key("rec_datetime__lte", "2024-05-10T11:30:00+02:00");
    assert_eq!(names(&db, &filter), vec!["Mouse A", "mouse B"]);

    let err = db
        .query::<Block>()
        .filter_key("rec_datetime__lt", "yesterday")
        .fetch()
        .unwrap_err();
    assert!(matches!(violations(err).as_slice(), [Violation::InvalidValue { field, .. }] if field == "rec_datetime"));
}

#[test]
fn null_checks_and_membership() {
    let (db, ids) = sessions();
    assert_eq!(names(&db, &Filter::new().with(Condition::new("rec_datetime", Op::IsNull, true))), vec!["rat D"]);
    assert_eq!(names(&db, &Filter::new().with(Condition::new("description", Op::IsNull, false))).len(), 2);
    assert_eq!(names(&db, &Filter::new().with(Condition::equals("description", FilterValue::Null))).len(), 2);

    let picked = Filter::new().with(Condition::new("id", Op::In, vec![ids[0], ids[3], 999_999]));
    assert_eq!(names(&db, &picked), vec!["Mouse A", "rat D"]);
    let nothing = Filter::new().with(Condition::new("id", Op::In, Vec::<u64>::new()));
    assert!(names(&db, &nothing).is_empty());
    let err = db
        .query::<Block>()
        .filter(Condition::new("id", Op::In, 3))
        .count()
        .unwrap_err();
    assert!(matches!(violations(err).as_slice(), [Violation::InvalidValue { .. }]));
}

#[test]
fn numeric_and_boolean_fields() {
    let db = Database::new(PersistenceMode::InMemory).unwrap();
    let segment = db.create(Segment::named("trial", None)).unwrap().base.id.unwrap();
    for rate in [250.0, 1000.0, 30_000.0] {
        db.create(AnalogSignal::new(segment, vec![0.0; 3], rate)).unwrap();
    }
    let fast = db.query::<AnalogSignal>().filter_key("sampling_rate__gt", 500).count().unwrap();
    assert_eq!(fast, 2);
    let exact = db.query::<AnalogSignal>().filter_key("sampling_rate", 1000.0).count().unwrap();
    assert_eq!(exact, 1);
    let from_text = db.query::<AnalogSignal>().filter_key("sampling_rate__lte", "1000").count().unwrap();
    assert_eq!(from_text, 2);

    let train = SpikeTrain::new(segment, vec![0.1], 1.0);
    let full = SpikeTrainFull::new(train, vec![vec![vec![0.5]]], "mV", 1000.0, 0.0);
    db.create(full).unwrap();
    assert_eq!(db.query::<SpikeTrainFull>().filter_key("sort", true).count().unwrap(), 1);
    assert_eq!(db.query::<SpikeTrainFull>().filter_key("sort", false).count().unwrap(), 0);
}

#[test]
fn relations_filter_through_their_ids() {
    let db = Database::new(PersistenceMode::InMemory).unwrap();
    let with_segments = db.create(Block::named("with")).unwrap().base.id.unwrap();
    let without = db.create(Block::named("without")).unwrap().base.id.unwrap();
    let s1 = db.create(Segment::named("s1", Some(with_segments))).unwrap().base.id.unwrap();
    let s2 = db.create(Segment::named("s2", None)).unwrap().base.id.unwrap();
    db.create(AnalogSignal::new(s1, vec![0.0], 1.0)).unwrap();
    db.create(AnalogSignal::new(s2, vec![0.0], 1.0)).unwrap();
    db.create(AnalogSignal::new(s2, vec![0.0], 1.0)).unwrap();

    let in_s2 = db.query::<AnalogSignal>().filter_key("segment__in", vec![s2]).count().unwrap();
    assert_eq!(in_s2, 2);
    let owner = db.query::<Block>().filter_key("segments", s1).ids().unwrap();
    assert_eq!(owner, vec![with_segments]);
    let empty = db.query::<Block>().filter_key("segments__isnull", true).ids().unwrap();
    assert_eq!(empty, vec![without]);

    let c0 = db.create(RecordingChannel::new(0)).unwrap().base.id.unwrap();
    let c1 = db.create(RecordingChannel::new(1)).unwrap().base.id.unwrap();
    let group = db.create(RecordingChannelGroup::new(None, vec![c1])).unwrap().base.id.unwrap();
    let grouped = db.query::<RecordingChannel>().filter_key("recording_channel_groups", group).ids().unwrap();
    assert_eq!(grouped, vec![c1]);
    let ungrouped = db
        .query::<RecordingChannel>()
        .filter_key("recording_channel_groups__isnull", true)
        .ids()
        .unwrap();
    assert_eq!(ungrouped, vec![c0]);
}

#[test]
fn bad_filters_report_every_problem() {
    let (db, _) = sessions();
    let mut filter = Filter::new();
    filter.add_key("colour", "red");
    filter.add_key("name__has_key", "x");
    filter.add_key("rec_datetime__between", "x");
    let found = violations(db.list::<Block>(&filter, &[], None, 0).unwrap_err());
    assert_eq!(found.len(), 3, "{found:?}");
    assert!(found.contains(&Violation::UnknownField { field: "colour".to_string() }));
    assert!(found.contains(&Violation::UnsupportedOperator { field: "name".to_string(), op: "has_key".to_string() }));

    let err = db
        .query::<AnalogSignal>()
        .filter_key("signal__contains", "1.0")
        .fetch()
        .unwrap_err();
    assert!(matches!(
        violations(err).as_slice(),
        [Violation::UnsupportedOperator { field, .. }] if field == "signal"
    ));
    let err = db.query::<Block>().filter_key("index", "first").count().unwrap_err();
    assert!(matches!(violations(err).as_slice(), [Violation::InvalidValue { .. }]));
}

#[test]
fn loose_json_values_become_filter_values() {
    let value = FilterValue::from_json(&serde_json::json!([1, 2.5, "x", null, true])).unwrap();
    assert_eq!(
        value,
        FilterValue::List(vec![
            FilterValue::Integer(1),
            FilterValue::Float(2.5),
            FilterValue::Text("x".to_string()),
            FilterValue::Null,
            FilterValue::Bool(true),
        ])
    );
    assert!(FilterValue::from_json(&serde_json::json!({ "nested": 1 })).is_none());
}

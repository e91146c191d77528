use neostore::derive;
use neostore::model::{
    AnalogSignal, Block, EntityKind, IrregularlySampledSignal, Record, Segment, SpikeTrain, SpikeTrainFull,
};
use neostore::persist::PersistenceMode;
use neostore::validate::Violation;
use neostore::{Database, NeoError};

fn with_segment() -> (Database, u64) {
    let db = Database::new(PersistenceMode::InMemory).unwrap();
    let block = db.create(Block::named("derived")).unwrap();
    let segment = db.create(Segment::named("trial", block.base.id)).unwrap();
    let id = segment.base.id.unwrap();
    (db, id)
}

#[test]
fn sampling_period_round_trips_through_the_rate() {
    for rate in [1.0, 250.0, 1000.0, 30_000.0, 0.5] {
        let mut signal = AnalogSignal::new(1, vec![0.0; 4], 1.0);
        signal.set_sampling_period(1.0 / rate).unwrap();
        let period = signal.sampling_period().unwrap();
        assert!((period - 1.0 / rate).abs() <= 1e-12 / rate, "rate {rate}");
        assert!((signal.sampling_rate - rate).abs() <= 1e-12 * rate, "rate {rate}");
    }
}

#[test]
fn zero_rate_or_period_is_a_division_error() {
    assert!(matches!(derive::sampling_period(0.0), Err(NeoError::Division(_))));
    assert!(matches!(derive::sampling_rate_from_period(0.0), Err(NeoError::Division(_))));
    let signal = AnalogSignal::new(1, vec![1.0], 0.0);
    assert!(matches!(signal.duration(), Err(NeoError::Division(_))));
    assert!(matches!(signal.t_stop(), Err(NeoError::Division(_))));
    let mut signal = signal;
    assert!(signal.set_sampling_period(0.0).is_err());
    assert_eq!(signal.sampling_rate, 0.0, "a failed set leaves the rate untouched");
}

#[test]
fn derived_values_follow_the_stored_signal() {
    let (db, segment) = with_segment();
    let mut signal = AnalogSignal::new(segment, vec![0.0; 100], 100.0);
    signal.t_start = 2.0;
    let signal = db.create(signal).unwrap();
    assert_eq!(signal.duration().unwrap(), 1.0);
    assert_eq!(signal.t_stop().unwrap(), 3.0);

    let id = signal.base.id.unwrap();
    let replaced = db.update_with::<AnalogSignal>(id, |s| s.signal = vec![0.0; 300]).unwrap();
    assert_eq!(replaced.duration().unwrap(), 3.0);
    assert_eq!(replaced.t_stop().unwrap(), 5.0);

    let reread: AnalogSignal = db.get(id).unwrap();
    assert_eq!(reread.signal.len(), 300);
    assert_eq!(reread.t_stop().unwrap(), 5.0);
}

#[test]
fn derived_values_are_not_settable_fields() {
    let (db, segment) = with_segment();
    let signal = db.create(AnalogSignal::new(segment, vec![0.0; 10], 10.0)).unwrap();
    let id = signal.base.id.unwrap();
    let fields = serde_json::json!({ "t_stop": 99.0, "duration": 99.0 });
    let found = match db.update::<AnalogSignal>(id, fields.as_object().unwrap()) {
        Err(NeoError::Validation(e)) => e.violations,
        other => panic!("expected a validation error, got {other:?}"),
    };
    assert_eq!(found.len(), 2, "{found:?}");
    for field in ["duration", "t_stop"] {
        assert!(found.contains(&Violation::UnknownField { field: field.to_string() }), "{found:?}");
    }
    let reread: AnalogSignal = db.get(id).unwrap();
    assert_eq!(reread.t_stop().unwrap(), 1.0);
}

#[test]
fn patching_the_period_sets_the_rate() {
    let (db, segment) = with_segment();
    let signal = db.create(AnalogSignal::new(segment, vec![0.0; 8], 2.0)).unwrap();
    let id = signal.base.id.unwrap();
    let fields = serde_json::json!({ "sampling_period": 0.25 });
    let updated: AnalogSignal = db.update(id, fields.as_object().unwrap()).unwrap();
    assert_eq!(updated.sampling_rate, 4.0);
    assert_eq!(updated.duration().unwrap(), 2.0);
    let reread: AnalogSignal = db.get(id).unwrap();
    assert_eq!(reread.sampling_rate, 4.0);

    let zero = serde_json::json!({ "sampling_period": 0.0 });
    let err = db.update::<AnalogSignal>(id, zero.as_object().unwrap()).unwrap_err();
    assert!(matches!(
        &err,
        NeoError::Validation(e) if matches!(&e.violations[..], [Violation::InvalidValue { field, .. }] if field == "sampling_period")
    ));
    assert_eq!(db.get::<AnalogSignal>(id).unwrap().sampling_rate, 4.0);

    let train = SpikeTrain::new(segment, vec![0.1], 1.0);
    let full = db.create(SpikeTrainFull::new(train, vec![vec![vec![0.5]]], "mV", 1000.0, 0.0)).unwrap();
    let patch = serde_json::json!({ "sampling_period": 0.5 });
    let updated = db
        .update_record(EntityKind::SpikeTrainFull, full.train.base.id.unwrap(), patch.as_object().unwrap())
        .unwrap();
    let Record::SpikeTrainFull(updated) = updated else { panic!("expected a full spike train") };
    assert_eq!(updated.sampling_rate, 2.0);
}

#[test]
fn records_can_be_built_from_a_period() {
    let fields = serde_json::json!({ "segment": 1, "signal": [0.0, 1.0], "sampling_period": 0.5 });
    let record = Record::from_fields(EntityKind::AnalogSignal, fields.as_object().unwrap()).unwrap();
    let Record::AnalogSignal(signal) = record else { panic!("expected an analog signal") };
    assert_eq!(signal.sampling_rate, 2.0);

    let fields = serde_json::json!({ "name": "no sampling", "sampling_period": 0.5 });
    let err = Record::from_fields(EntityKind::Block, fields.as_object().unwrap()).unwrap_err();
    assert!(matches!(
        &err,
        NeoError::Validation(e) if e.violations == vec![Violation::UnknownField { field: "sampling_period".to_string() }]
    ));
}

#[test]
fn irregular_bounds_come_from_the_times() {
    let signal = IrregularlySampledSignal::new(1, vec![0.5, 1.5, 4.0], vec![1.0, 2.0, 3.0]);
    assert_eq!(signal.t_start(), Some(0.5));
    assert_eq!(signal.t_stop(), Some(4.0));
    assert_eq!(IrregularlySampledSignal::default().t_start(), None);
}

#[test]
fn spike_times_are_stored_sorted() {
    let (db, segment) = with_segment();
    let train = db.create(SpikeTrain::new(segment, vec![0.7, 0.1, 0.4], 1.0)).unwrap();
    assert_eq!(train.times, vec![0.1, 0.4, 0.7]);
    assert_eq!(train.duration(), 1.0);
    let reread: SpikeTrain = db.get(train.base.id.unwrap()).unwrap();
    assert_eq!(reread.times, vec![0.1, 0.4, 0.7]);
}

#[test]
fn waveforms_travel_with_their_spike_times() {
    let (db, segment) = with_segment();
    let train = SpikeTrain::new(segment, vec![0.3, 0.1, 0.2], 1.0);
    let waveforms = vec![vec![vec![3.0, 3.0]], vec![vec![1.0, 1.0]], vec![vec![2.0, 2.0]]];
    let full = SpikeTrainFull::new(train, waveforms, "uV", 20_000.0, 0.0005);
    let full = db.create(full).unwrap();
    assert_eq!(full.train.times, vec![0.1, 0.2, 0.3]);
    assert_eq!(full.waveforms[0][0], vec![1.0, 1.0]);
    assert_eq!(full.waveforms[2][0], vec![3.0, 3.0]);
    assert!(full.sort);
    assert_eq!(full.waveform_shape(), (3, 1, 2));
    assert!((full.sampling_period().unwrap() - 5e-5).abs() < 1e-15);
}

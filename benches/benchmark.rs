use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};

use neostore::model::{AnalogSignal, Block, RecordingChannel, RecordingChannelGroup, Segment, SpikeTrain};
use neostore::persist::PersistenceMode;
use neostore::query::OrderBy;
use neostore::Database;

fn populated(segments: usize) -> (Database, Block) {
    let db = Database::new(PersistenceMode::InMemory).unwrap();
    let block = db.create(Block::named("bench")).unwrap();
    let channels: Vec<u64> = (0..16)
        .map(|i| db.create(RecordingChannel::new(i)).unwrap().base.id.unwrap())
        .collect();
    for chunk in channels.chunks(4) {
        db.create(RecordingChannelGroup::new(block.base.id, chunk.to_vec())).unwrap();
    }
    for n in 0..segments {
        let segment = db.create(Segment::named(format!("trial {n}"), block.base.id)).unwrap();
        let id = segment.base.id.unwrap();
        db.create(AnalogSignal::new(id, vec![0.5; 1000], 1000.0)).unwrap();
        db.create(SpikeTrain::new(id, vec![0.9, 0.1, 0.5, 0.3], 1.0)).unwrap();
    }
    (db, block)
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let db = Database::new(PersistenceMode::InMemory).unwrap();
    let block = db.create(Block::named("bench")).unwrap();
    let segment = db.create(Segment::named("trial", block.base.id)).unwrap();
    let segment_id = segment.base.id.unwrap();
    c.bench_function("create analog signal 1k", |b| {
        b.iter(|| db.create(black_box(AnalogSignal::new(segment_id, vec![0.5; 1000], 1000.0))).unwrap())
    });
    c.bench_function("create spike train", |b| {
        b.iter(|| db.create(black_box(SpikeTrain::new(segment_id, vec![0.9, 0.1, 0.5], 1.0))).unwrap())
    });

    let (db, block) = populated(100);
    c.bench_function("list segments of block", |b| {
        b.iter(|| block.segments(&db).order_by(OrderBy::parse("-name")).fetch().unwrap())
    });
    c.bench_function("page segments", |b| {
        b.iter(|| block.segments(&db).limit(10).offset(black_box(50)).fetch().unwrap())
    });
    c.bench_function("filter signals by rate", |b| {
        b.iter(|| {
            db.query::<AnalogSignal>()
                .filter_key("sampling_rate__gte", 500.0)
                .count()
                .unwrap()
        })
    });
    c.bench_function("search segments", |b| {
        b.iter(|| db.query::<Segment>().search("trial 9").count().unwrap())
    });
    c.bench_function("block channels", |b| {
        b.iter(|| block.recording_channels(&db).unwrap().count().unwrap())
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);

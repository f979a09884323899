mod common;

use migrant::prelude::*;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

fn world() -> World {
    common::init_logging();
    WorldBuilder::new()
        .with_partitions(8)
        .with_threads(4)
        .build()
        .expect("valid world")
}

#[test]
fn init_broadcasts_to_every_partition() {
    let world = world();
    let value = ReplicatedValue::new(&world, 0i64);
    value.init(42);
    for k in 0..world.num_partitions() {
        assert_eq!(42, value.read(k).expect("valid partition"));
    }
    assert!(value.read(8).is_err());
}

#[test]
fn copies_diverge_after_write() {
    let world = world();
    let counters = ReplicatedValue::new(&world, String::from("init"));
    counters.write(3, String::from("three")).expect("valid partition");
    assert_eq!("three", counters.read(3).expect("valid partition"));
    assert_eq!("init", counters.read(2).expect("valid partition"));
    assert_eq!(
        5,
        counters
            .update(4, |s| {
                s.push('!');
                s.len()
            })
            .expect("valid partition")
    );
    counters.init(String::from("again"));
    assert!((0..8).all(|k| counters.read(k).expect("valid partition") == "again"));
}

#[test]
fn tasks_read_their_local_copy() {
    let world = world();
    let value = ReplicatedValue::new(&world, 0usize);
    for k in 0..world.num_partitions() {
        value.write(k, k * 10).expect("valid partition");
    }
    let map = PartitionMap::new(64, world.num_partitions(), Layout::Chunked).expect("valid map");
    let mismatch = Arc::new(AtomicBool::new(false));
    let (v, m) = (value.clone(), mismatch.clone());
    apply_range(&world, &map, 8, Strategy::SerialRemoteSpawn, move |ctx, _range| {
        if v.read_local(ctx) != ctx.partition() * 10 {
            m.store(true, Ordering::SeqCst);
        }
        Ok(())
    })
    .expect("apply succeeds");
    assert!(!mismatch.load(Ordering::SeqCst));
}

#[test]
fn readers_never_observe_partial_broadcast() {
    let world = world();
    let value = ReplicatedValue::new(&world, (0u64, 0u64));
    let torn = Arc::new(AtomicBool::new(false));
    let (v, t) = (value.clone(), torn.clone());
    let reader = world.spawn_at(Some(1), async move {
        for _ in 0..10_000 {
            let (a, b) = v.read(1).expect("valid partition");
            if a != b {
                t.store(true, Ordering::SeqCst);
            }
        }
    });
    for i in 1..1_000 {
        value.init((i, i));
        assert!((0..8).all(|k| value.read(k).expect("valid partition") == (i, i)));
    }
    world.block_on(reader);
    assert!(!torn.load(Ordering::SeqCst));
}

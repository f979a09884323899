mod common;

use migrant::prelude::*;
use migrant::{check_value, run_trials, Benchmark};

use parking_lot::Mutex;
use serial_test::serial;
use std::ops::Range;
use std::sync::Arc;

fn world(partitions: usize, migration_hints: bool) -> World {
    common::init_logging();
    WorldBuilder::new()
        .with_partitions(partitions)
        .with_threads(4)
        .with_migration_hints(migration_hints)
        .build()
        .expect("valid world")
}

#[test]
#[serial]
fn sum_of_ones_striped() {
    let world = world(8, true);
    let array = PartitionedArray::<i64>::new(&world, 1024, Layout::Striped).expect("allocation");
    array.fill(1, Strategy::SerialSpawn).expect("fill");
    for strategy in Strategy::ALL {
        let sum = Accumulator::<i64>::sum(&world);
        let (a, s) = (array.clone(), sum.clone());
        array
            .apply(64, strategy, move |ctx, range| {
                for i in range {
                    s.local_update(ctx.partition(), ReduceOp::Add, a.load(i)?)?;
                }
                Ok(())
            })
            .expect("apply succeeds");
        assert_eq!(1024, sum.combine(), "{}", strategy);
    }
}

#[test]
fn recursive_spawn_leaves() {
    let world = world(4, true);
    let map = PartitionMap::new(16, 4, Layout::Chunked).expect("valid map");
    let leaves = Arc::new(Mutex::new(Vec::<Range<usize>>::new()));
    let l = leaves.clone();
    let report = apply_range(&world, &map, 4, Strategy::RecursiveSpawn, move |_ctx, range| {
        l.lock().push(range);
        Ok(())
    })
    .expect("apply succeeds");
    let mut leaves = leaves.lock().clone();
    leaves.sort_by_key(|r| r.start);
    assert_eq!(vec![0..4, 4..8, 8..12, 12..16], leaves);
    assert_eq!(4, report.leaf_tasks);
    assert_eq!(3, report.spawned_tasks);
}

#[test]
fn single_leaf_when_grain_covers_range() {
    let world = world(4, true);
    let map = PartitionMap::new(16, 4, Layout::Striped).expect("valid map");
    for strategy in Strategy::ALL {
        let report = apply_range(&world, &map, 100, strategy, |_ctx, range| {
            anyhow::ensure!(range == (0..16), "unexpected leaf {:?}", range);
            Ok(())
        })
        .expect("apply succeeds");
        assert_eq!(1, report.leaf_tasks);
        assert_eq!(0, report.spawned_tasks);
    }
}

struct HotRange {
    array: PartitionedArray<u64>,
    offset: usize,
    length: usize,
    grain: usize,
}

impl Benchmark for HotRange {
    fn name(&self) -> &str {
        "hot_range"
    }

    fn reset(&mut self) -> anyhow::Result<()> {
        self.array.fill(0, Strategy::SerialSpawn)?;
        Ok(())
    }

    fn run(&mut self, strategy: Strategy) -> anyhow::Result<()> {
        let (array, offset, length) = (self.array.clone(), self.offset, self.length);
        let n = self.array.len();
        self.array.apply(self.grain, strategy, move |_ctx, range| {
            for i in range {
                array.fetch_add((offset + i % length) % n, 1)?;
            }
            Ok(())
        })?;
        Ok(())
    }

    fn validate(&self) -> Result<(), RuntimeError> {
        let n = self.array.len();
        for i in 0..n {
            let hot = i >= self.offset && i < self.offset + self.length;
            let expected = if hot { (n / self.length) as u64 } else { 0 };
            check_value(i, self.array.load(i)?, expected)?;
        }
        Ok(())
    }

    fn work_items(&self) -> usize {
        self.array.len()
    }
}

#[test]
#[serial]
fn hot_range_updates() {
    let world = world(8, true);
    let mut bench = HotRange {
        array: PartitionedArray::new(&world, 64, Layout::Chunked).expect("allocation"),
        offset: 8,
        length: 8,
        grain: grain_for_threads(64, 4).expect("threads > 0"),
    };
    for strategy in Strategy::ALL {
        let reports = run_trials(&mut bench, strategy, 3).expect("trials succeed");
        assert_eq!(3, reports.len());
        assert_eq!(vec![0, 1, 2], reports.iter().map(|r| r.trial).collect::<Vec<_>>());
        let values = bench.array.to_vec();
        assert!(values[8..16].iter().all(|v| *v == 8));
        assert!(values[..8].iter().chain(values[16..].iter()).all(|v| *v == 0));
    }
}

#[test]
fn validation_mismatch_is_reported() {
    let world = world(8, true);
    let mut bench = HotRange {
        array: PartitionedArray::new(&world, 64, Layout::Chunked).expect("allocation"),
        offset: 8,
        length: 8,
        grain: 16,
    };
    bench.run(Strategy::SerialSpawn).expect("run succeeds");
    bench.array.store(12, 7).expect("in range");
    assert_eq!(
        Err(RuntimeError::ValidationMismatch {
            index: 12,
            actual: "7".to_string(),
            expected: "8".to_string()
        }),
        bench.validate()
    );
}

#[test]
#[serial]
fn worker_error_aborts_apply() {
    let world = world(4, true);
    let map = PartitionMap::new(256, 4, Layout::Striped).expect("valid map");
    for strategy in Strategy::ALL {
        let res = apply_range(&world, &map, 8, strategy, |_ctx, range| {
            anyhow::ensure!(!range.contains(&100), "bad element in {:?}", range);
            Ok(())
        });
        match res {
            Err(RuntimeError::TaskFailed {
                begin,
                end,
                message,
            }) => {
                assert!(begin <= 100 && 100 < end, "{}: [{}, {})", strategy, begin, end);
                assert!(message.contains("bad element"), "{}", message);
            }
            other => panic!("{}: expected a task failure, got {:?}", strategy, other),
        }
    }
    // the world is still usable after a failed apply
    let report = apply_range(&world, &map, 8, Strategy::RecursiveSpawn, |_ctx, _range| Ok(()))
        .expect("apply succeeds");
    assert_eq!(32, report.leaf_tasks);
}

#[test]
#[serial]
fn worker_panic_aborts_apply() {
    let world = world(4, true);
    let map = PartitionMap::new(64, 4, Layout::Chunked).expect("valid map");
    for strategy in Strategy::ALL {
        let res = apply_range(&world, &map, 4, strategy, |_ctx, range| {
            if range.start == 32 {
                panic!("worker exploded");
            }
            Ok(())
        });
        assert!(
            matches!(&res, Err(RuntimeError::TaskFailed { begin: 32, message, .. }) if message.contains("worker exploded")),
            "{}: {:?}",
            strategy,
            res
        );
    }
}

fn stream_with_migration(migration_hints: bool, strategy: Strategy) -> (Vec<u32>, ApplyReport) {
    let world = world(8, migration_hints);
    let a = PartitionedArray::<u32>::new(&world, 512, Layout::Striped).expect("allocation");
    let b = PartitionedArray::<u32>::new(&world, 512, Layout::Chunked).expect("allocation");
    b.fill(3, Strategy::SerialSpawn).expect("fill");
    let (a2, b2) = (a.clone(), b.clone());
    let report = a
        .apply(16, strategy, move |ctx, range| {
            for i in range {
                // hop between the two layouts on every access
                ctx.migrate(b2.index(i)?);
                let v = b2.load(i)?;
                ctx.migrate(a2.index(i)?);
                a2.store(i, v + i as u32)?;
            }
            Ok(())
        })
        .expect("apply succeeds");
    (a.to_vec(), report)
}

#[test]
#[serial]
fn migration_never_changes_results() {
    let expected: Vec<u32> = (0..512).map(|i| 3 + i).collect();
    for strategy in Strategy::ALL {
        let (with_hints, report) = stream_with_migration(true, strategy);
        let (without_hints, no_hints_report) = stream_with_migration(false, strategy);
        assert_eq!(expected, with_hints);
        assert_eq!(expected, without_hints);
        assert!(report.migrations > 0);
        assert_eq!(0, no_hints_report.migrations);
    }
}

#[test]
fn world_stats_accumulate() {
    let world = world(4, true);
    let before = world.stats();
    let handles: Vec<_> = (0..4)
        .map(|p| world.spawn_at(Some(p), async move { p * 2 }))
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| world.block_on(h)).collect();
    assert_eq!(vec![0, 2, 4, 6], results);
    let after = world.stats();
    assert_eq!(before.tasks_spawned + 4, after.tasks_spawned);
    assert_eq!(before.remote_spawns + 3, after.remote_spawns);
}

#[test]
fn nested_spawns_start_from_the_task_partition() {
    common::init_logging();
    // a single worker, homed at partition 0, runs every task whatever partition it was placed at
    let world = WorldBuilder::new()
        .with_partitions(4)
        .with_threads(1)
        .build()
        .expect("valid world");
    let before = world.stats();
    let w = world.clone();
    let handle = world.spawn_at(Some(2), async move {
        let inner = w.spawn_at(None, async { 0 });
        let inner_partition = inner.partition();
        inner.await;
        (w.current_partition(), inner_partition)
    });
    assert_eq!((2, 2), world.block_on(handle));
    let after = world.stats();
    assert_eq!(before.tasks_spawned + 2, after.tasks_spawned);
    assert_eq!(before.remote_spawns + 1, after.remote_spawns);
}

#[test]
fn builder_rejects_empty_worlds() {
    assert!(WorldBuilder::new().with_partitions(0).build().is_err());
    assert!(WorldBuilder::new().with_threads(0).build().is_err());
}

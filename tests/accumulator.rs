mod common;

use migrant::prelude::*;

fn world() -> World {
    common::init_logging();
    WorldBuilder::new()
        .with_partitions(8)
        .with_threads(4)
        .build()
        .expect("valid world")
}

#[test]
fn identities() {
    let world = world();
    assert_eq!(0, Accumulator::<i32>::sum(&world).combine());
    assert_eq!(i32::MIN, Accumulator::<i32>::max(&world).combine());
    assert_eq!(u16::MAX, Accumulator::<u16>::min(&world).combine());
    assert_eq!(f64::NEG_INFINITY, Accumulator::<f64>::max(&world).combine());
    assert_eq!(f32::INFINITY, Accumulator::<f32>::min(&world).combine());
}

#[test]
fn mismatched_op_is_rejected() {
    let world = world();
    let acc = Accumulator::<i64>::sum(&world);
    assert!(matches!(
        acc.local_update(0, ReduceOp::Max, 3),
        Err(RuntimeError::InvalidArgument(_))
    ));
    assert!(matches!(
        acc.local_update(8, ReduceOp::Add, 3),
        Err(RuntimeError::InvalidArgument(_))
    ));
    assert_eq!(0, acc.combine());
}

#[test]
fn concurrent_updates_on_one_partition() {
    let world = world();
    let count = Accumulator::<u64>::count(&world);
    let map = PartitionMap::new(10_000, world.num_partitions(), Layout::Striped).expect("valid map");
    let c = count.clone();
    apply_range(&world, &map, 7, Strategy::SerialSpawn, move |_ctx, range| {
        for _ in range {
            c.local_update(5, ReduceOp::Add, 1)?;
        }
        Ok(())
    })
    .expect("apply succeeds");
    let partials = count.partials();
    assert_eq!(10_000, partials[5]);
    assert_eq!(10_000, partials.iter().sum::<u64>());
    assert_eq!(10_000, count.combine());
}

#[test]
fn min_max_over_all_strategies() {
    let world = world();
    let array = PartitionedArray::<i64>::new(&world, 256, Layout::Chunked).expect("allocation");
    let a = array.clone();
    array
        .apply(8, Strategy::RecursiveSpawn, move |_ctx, range| {
            for i in range {
                a.store(i, (i as i64 * 37) % 101 - 50)?;
            }
            Ok(())
        })
        .expect("apply succeeds");
    let expected_max = (0..256i64).map(|i| (i * 37) % 101 - 50).max();
    let expected_min = (0..256i64).map(|i| (i * 37) % 101 - 50).min();
    for strategy in Strategy::ALL {
        let (max, min) = (Accumulator::<i64>::max(&world), Accumulator::<i64>::min(&world));
        let (a, mx, mn) = (array.clone(), max.clone(), min.clone());
        array
            .apply(8, strategy, move |ctx, range| {
                for i in range {
                    ctx.migrate(a.index(i)?);
                    let v = a.load(i)?;
                    mx.update(ctx, v);
                    mn.update(ctx, v);
                }
                Ok(())
            })
            .expect("apply succeeds");
        assert_eq!(expected_max, Some(max.combine()), "{}", strategy);
        assert_eq!(expected_min, Some(min.combine()), "{}", strategy);
    }
}

#[test]
fn reset_restores_identity() {
    let world = world();
    let acc = Accumulator::<u32>::sum(&world);
    for p in 0..world.num_partitions() {
        acc.local_update(p, ReduceOp::Add, p as u32).expect("valid update");
    }
    assert_eq!(28, acc.combine());
    acc.reset();
    assert_eq!(vec![0; 8], acc.partials());
    assert_eq!(ReduceOp::Add, acc.op());
}

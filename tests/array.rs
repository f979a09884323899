mod common;

use migrant::prelude::*;

use serial_test::serial;

fn world(partitions: usize) -> World {
    common::init_logging();
    WorldBuilder::new()
        .with_partitions(partitions)
        .with_threads(4)
        .build()
        .expect("valid world")
}

#[test]
fn index_reports_owner() {
    let world = world(8);
    let striped = PartitionedArray::<i32>::new(&world, 20, Layout::Striped).expect("allocation");
    assert_eq!(
        Address {
            partition: 3,
            offset: 2
        },
        striped.index(19).expect("in range")
    );
    let chunked = PartitionedArray::<i32>::new(&world, 24, Layout::Chunked).expect("allocation");
    assert_eq!(
        Address {
            partition: 6,
            offset: 1
        },
        chunked.index(19).expect("in range")
    );
    assert_eq!(
        Err(RuntimeError::InvalidIndex { index: 24, len: 24 }),
        chunked.index(24)
    );
    assert!(chunked.load(100).is_err());
}

#[test]
fn invalid_allocations() {
    let world = world(8);
    assert!(matches!(
        PartitionedArray::<u8>::new(&world, 0, Layout::Striped),
        Err(RuntimeError::InvalidArgument(_))
    ));
    assert!(matches!(
        PartitionedArray::<u8>::new(&world, 20, Layout::Chunked),
        Err(RuntimeError::InvalidLayout {
            len: 20,
            partitions: 8
        })
    ));
}

#[test]
fn element_operations() {
    let world = world(4);
    let array = PartitionedArray::<i64>::new(&world, 16, Layout::Striped).expect("allocation");
    assert_eq!(0, array.load(5).expect("in range"));
    array.store(5, 10).expect("in range");
    assert_eq!(10, array.fetch_add(5, 5).expect("in range"));
    assert_eq!(15, array.fetch_min(5, 3).expect("in range"));
    assert_eq!(3, array.fetch_max(5, 7).expect("in range"));
    assert_eq!(7, array.swap(5, -1).expect("in range"));
    assert_eq!(-1, array.load(5).expect("in range"));

    let floats = PartitionedArray::<f64>::new(&world, 8, Layout::Chunked).expect("allocation");
    floats.fill(0.5, Strategy::SerialSpawn).expect("fill");
    floats.fetch_add(7, 1.0).expect("in range");
    assert_eq!(5.0, floats.sum(Strategy::RecursiveSpawn).expect("sum"));
}

#[test]
fn local_data_views() {
    let world = world(4);
    let array = PartitionedArray::<usize>::new(&world, 10, Layout::Striped).expect("allocation");
    let a = array.clone();
    array
        .apply(3, Strategy::RecursiveRemoteSpawn, move |_ctx, range| {
            for i in range {
                a.store(i, i)?;
            }
            Ok(())
        })
        .expect("apply succeeds");
    let local = array.local_data(1).expect("valid partition");
    assert_eq!(1, local.partition());
    assert_eq!(vec![1, 5, 9], local.to_vec());
    assert_eq!(Some(9), local.global_index(2));
    assert_eq!(2, array.local_data(3).expect("valid partition").len());
    assert!(array.local_data(4).is_err());
    assert_eq!((0..10).collect::<Vec<_>>(), array.to_vec());

    let chunked = PartitionedArray::<u16>::new(&world, 8, Layout::Chunked).expect("allocation");
    let local = chunked.local_data(2).expect("valid partition");
    local.store(1, 9);
    assert_eq!(9, chunked.load(5).expect("in range"));
}

#[test]
fn layouts_give_identical_reductions() {
    let world = world(8);
    let mut sums = Vec::new();
    for layout in [Layout::Striped, Layout::Chunked] {
        let array = PartitionedArray::<u64>::new(&world, 512, layout).expect("allocation");
        let a = array.clone();
        array
            .apply(16, Strategy::SerialRemoteSpawn, move |_ctx, range| {
                for i in range {
                    a.store(i, (i * i % 97) as u64)?;
                }
                Ok(())
            })
            .expect("apply succeeds");
        sums.push(array.sum(Strategy::RecursiveRemoteSpawn).expect("sum"));
    }
    assert_eq!(sums[0], sums[1]);
    assert_eq!((0..512u64).map(|i| i * i % 97).sum::<u64>(), sums[0]);
}

#[test]
#[serial]
fn storage_is_returned_to_partitions() {
    let world = world(4);
    {
        let array = PartitionedArray::<u64>::new(&world, 64, Layout::Chunked).expect("allocation");
        assert_eq!(128, world.bytes_in_use(3).expect("valid partition"));
        let clone = array.clone();
        drop(array);
        assert_eq!(128, world.bytes_in_use(3).expect("valid partition"));
        drop(clone);
    }
    assert_eq!(0, world.bytes_in_use(3).expect("valid partition"));

    let array = PartitionedArray::<u32>::new(&world, 10, Layout::Striped).expect("allocation");
    assert_eq!(12, world.bytes_in_use(0).expect("valid partition"));
    array.deallocate();
    assert_eq!(0, world.bytes_in_use(0).expect("valid partition"));
}

#[test]
#[should_panic]
fn deallocating_a_shared_array_panics() {
    let world = world(2);
    let array = PartitionedArray::<u8>::new(&world, 4, Layout::Striped).expect("allocation");
    let _other = array.clone();
    array.deallocate();
}

#[test]
#[serial]
fn partition_capacity_is_enforced() {
    let world = WorldBuilder::new()
        .with_partitions(4)
        .with_threads(2)
        .with_partition_capacity(1024)
        .build()
        .expect("valid world");
    // 128 u64s per partition fills each partition exactly
    let full = PartitionedArray::<u64>::new(&world, 512, Layout::Chunked).expect("allocation");
    assert_eq!(
        Err(RuntimeError::AllocationFailure {
            partition: 0,
            bytes: 8
        }),
        PartitionedArray::<u64>::new(&world, 4, Layout::Striped).map(|_| ())
    );
    // a failed allocation leaves nothing behind
    assert_eq!(1024, world.bytes_in_use(1).expect("valid partition"));
    full.deallocate();
    assert!(PartitionedArray::<u64>::new(&world, 4, Layout::Striped).is_ok());
}

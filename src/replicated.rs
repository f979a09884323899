use crate::apply::TaskContext;
use crate::error::{RuntimeError, RuntimeResult};
use crate::world::World;

use crossbeam::utils::CachePadded;
use parking_lot::RwLock;
use std::sync::Arc;

/// A value with one independent copy per partition.
///
/// All copies start out identical, [init][ReplicatedValue::init] broadcasts a new value to every partition,
/// and [write][ReplicatedValue::write] changes a single partition's copy, after which the copies may diverge.
/// Reads only ever touch the reader's own copy.
///
/// # Examples
///```
/// use migrant::prelude::*;
///
/// let world = WorldBuilder::new().with_partitions(4).build().expect("valid world");
/// let offset = ReplicatedValue::new(&world, 0usize);
/// offset.init(42);
/// for partition in 0..world.num_partitions() {
///     assert_eq!(offset.read(partition).expect("valid partition"), 42);
/// }
///```
#[derive(Debug)]
pub struct ReplicatedValue<T> {
    copies: Arc<Vec<CachePadded<RwLock<T>>>>,
}

impl<T> Clone for ReplicatedValue<T> {
    fn clone(&self) -> Self {
        ReplicatedValue {
            copies: self.copies.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> ReplicatedValue<T> {
    pub fn new(world: &World, value: T) -> ReplicatedValue<T> {
        ReplicatedValue {
            copies: Arc::new(
                (0..world.num_partitions())
                    .map(|_| CachePadded::new(RwLock::new(value.clone())))
                    .collect(),
            ),
        }
    }

    pub fn num_partitions(&self) -> usize {
        self.copies.len()
    }

    /// Write `value` into every partition's copy.
    ///
    /// Every copy is locked before any is written, so a reader observes either the old or the new value at every partition
    /// and once `init` returns all copies hold `value`.
    pub fn init(&self, value: T) {
        let mut guards: Vec<_> = self.copies.iter().map(|c| c.write()).collect();
        for guard in guards.iter_mut() {
            **guard = value.clone();
        }
    }

    fn copy(&self, partition: usize) -> RuntimeResult<&RwLock<T>> {
        self.copies
            .get(partition)
            .map(|c| &**c)
            .ok_or_else(|| {
                RuntimeError::invalid_argument(format!(
                    "partition {} does not exist, the value has {} copies",
                    partition,
                    self.copies.len()
                ))
            })
    }

    /// The copy held by `partition`
    pub fn read(&self, partition: usize) -> RuntimeResult<T> {
        Ok(self.copy(partition)?.read().clone())
    }

    /// The copy held by the partition the task resides at
    pub fn read_local(&self, ctx: &TaskContext) -> T {
        self.copies[ctx.partition() % self.copies.len()].read().clone()
    }

    /// Replace only the copy held by `partition`
    pub fn write(&self, partition: usize, value: T) -> RuntimeResult<()> {
        *self.copy(partition)?.write() = value;
        Ok(())
    }

    /// Modify the copy held by `partition` in place, returning `op`'s result
    pub fn update<R>(&self, partition: usize, op: impl FnOnce(&mut T) -> R) -> RuntimeResult<R> {
        Ok(op(&mut self.copy(partition)?.write()))
    }
}

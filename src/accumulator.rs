use crate::apply::TaskContext;
use crate::error::{RuntimeError, RuntimeResult};
use crate::memregion::Dist;
use crate::world::{World, WorldInner};

use crossbeam::utils::CachePadded;
use std::sync::Arc;

/// The reduction monoids supported by [Accumulator]
#[derive(serde::Serialize, serde::Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReduceOp {
    /// identity 0, used for sums and counts
    Add,
    /// identity is the smallest representable value (negative infinity for floats)
    Max,
    /// identity is the largest representable value (positive infinity for floats)
    Min,
}

impl ReduceOp {
    pub fn identity<T: Dist>(&self) -> T {
        match self {
            ReduceOp::Add => T::ZERO,
            ReduceOp::Max => T::MIN,
            ReduceOp::Min => T::MAX,
        }
    }

    /// Fold two values with this op
    pub fn fold<T: Dist>(&self, a: T, b: T) -> T {
        match self {
            ReduceOp::Add => a.combine_add(b),
            ReduceOp::Max => {
                if b > a {
                    b
                } else {
                    a
                }
            }
            ReduceOp::Min => {
                if b < a {
                    b
                } else {
                    a
                }
            }
        }
    }

    fn apply_atomic<T: Dist>(&self, cell: &T::Atomic, val: T) {
        match self {
            ReduceOp::Add => T::fetch_add(cell, val),
            ReduceOp::Max => T::fetch_max(cell, val),
            ReduceOp::Min => T::fetch_min(cell, val),
        };
    }
}

#[derive(Debug)]
struct AccumulatorInner<T: Dist> {
    op: ReduceOp,
    cells: Vec<CachePadded<T::Atomic>>,
}

/// One reduction cell per partition plus a cross-partition combine.
///
/// Tasks update the cell of the partition they reside at with [update][Accumulator::update] (or any cell with
/// [local_update][Accumulator::local_update]) concurrently. Once every updating task has joined,
/// [combine][Accumulator::combine] folds the cells starting from the op's identity.
/// Because the atomic update and the combine use the same monoid, the result does not depend on task interleaving.
///
/// # Examples
///```
/// use migrant::prelude::*;
///
/// let world = WorldBuilder::new().with_partitions(4).build().expect("valid world");
/// let max = Accumulator::<i64>::max(&world);
/// max.local_update(1, ReduceOp::Max, 7).expect("valid update");
/// max.local_update(3, ReduceOp::Max, -2).expect("valid update");
/// assert_eq!(max.combine(), 7);
///```
#[derive(Debug)]
pub struct Accumulator<T: Dist> {
    inner: Arc<AccumulatorInner<T>>,
}

impl<T: Dist> Clone for Accumulator<T> {
    fn clone(&self) -> Self {
        Accumulator {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Dist> Accumulator<T> {
    pub fn new(world: &World, op: ReduceOp) -> Accumulator<T> {
        Accumulator::with_partitions(world.num_partitions(), op)
    }

    pub(crate) fn sum_in(world: &Arc<WorldInner>) -> Accumulator<T> {
        Accumulator::with_partitions(world.num_partitions, ReduceOp::Add)
    }

    fn with_partitions(partitions: usize, op: ReduceOp) -> Accumulator<T> {
        Accumulator {
            inner: Arc::new(AccumulatorInner {
                op,
                cells: (0..partitions)
                    .map(|_| CachePadded::new(T::new_atomic(op.identity())))
                    .collect(),
            }),
        }
    }

    pub fn sum(world: &World) -> Accumulator<T> {
        Accumulator::new(world, ReduceOp::Add)
    }

    /// An `Add` accumulator meant to be updated with ones
    pub fn count(world: &World) -> Accumulator<T> {
        Accumulator::new(world, ReduceOp::Add)
    }

    pub fn max(world: &World) -> Accumulator<T> {
        Accumulator::new(world, ReduceOp::Max)
    }

    pub fn min(world: &World) -> Accumulator<T> {
        Accumulator::new(world, ReduceOp::Min)
    }

    pub fn op(&self) -> ReduceOp {
        self.inner.op
    }

    pub fn num_partitions(&self) -> usize {
        self.inner.cells.len()
    }

    /// Atomically apply `op` with `val` to the cell of `partition`.
    ///
    /// # Errors
    /// `InvalidArgument` if `op` differs from the accumulator's op or `partition` does not exist
    pub fn local_update(&self, partition: usize, op: ReduceOp, val: T) -> RuntimeResult<()> {
        if op != self.inner.op {
            return Err(RuntimeError::invalid_argument(format!(
                "cannot apply {:?} to a {:?} accumulator",
                op, self.inner.op
            )));
        }
        let cell = self.inner.cells.get(partition).ok_or_else(|| {
            RuntimeError::invalid_argument(format!(
                "partition {} does not exist, the accumulator has {} cells",
                partition,
                self.inner.cells.len()
            ))
        })?;
        op.apply_atomic::<T>(cell, val);
        Ok(())
    }

    /// Atomically fold `val` into the cell of the partition the task resides at
    pub fn update(&self, ctx: &TaskContext, val: T) {
        let cell = &self.inner.cells[ctx.partition() % self.inner.cells.len()];
        self.inner.op.apply_atomic::<T>(cell, val);
    }

    /// The current value of every partition's cell
    pub fn partials(&self) -> Vec<T> {
        self.inner.cells.iter().map(|c| T::load(c)).collect()
    }

    /// Fold every partition's cell, reading each exactly once.
    ///
    /// Must not race with updates, call it after the updating apply has returned.
    pub fn combine(&self) -> T {
        let op = self.inner.op;
        self.inner
            .cells
            .iter()
            .fold(op.identity(), |acc, cell| op.fold(acc, T::load(cell)))
    }

    /// Reset every cell to the op's identity
    pub fn reset(&self) {
        let identity = self.inner.op.identity();
        for cell in self.inner.cells.iter() {
            T::store(cell, identity);
        }
    }
}

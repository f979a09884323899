//! Partitioned arrays.
//!
//! A [PartitionedArray] is a logical sequence of `len` elements whose storage is spread over every partition of a [World]
//! according to a [Layout]. Elements are addressed uniformly by their logical index, [index][PartitionedArray::index]
//! exposes where an element physically lives so that tasks can decide whether to migrate next to it.
//!
//! # Examples
//!```
//! use migrant::array::prelude::*;
//!
//! let world = WorldBuilder::new().build().expect("valid world");
//! let array = PartitionedArray::<u64>::new(&world, 1024, Layout::Chunked).expect("allocation");
//! array.fill(1, Strategy::RecursiveSpawn).expect("fill");
//! assert_eq!(array.sum(Strategy::RecursiveRemoteSpawn).expect("sum"), 1024);
//!```
use crate::accumulator::Accumulator;
use crate::apply::{self, grain_for_threads, ApplyReport, Strategy, TaskContext};
use crate::error::{RuntimeError, RuntimeResult};
use crate::memregion::{Dist, PartitionBuffer};
use crate::partition_map::{Address, Layout, PartitionMap};
use crate::world::{World, WorldInner};

use futures::Future;
use std::ops::Range;
use std::sync::Arc;

pub(crate) mod local_data;
pub use local_data::LocalData;

pub mod prelude;

#[derive(Debug)]
struct ArrayInner<T: Dist> {
    world: Arc<WorldInner>,
    map: PartitionMap,
    buffers: Vec<PartitionBuffer<T>>,
}

/// An array whose elements are distributed over the partitions of a world.
///
/// The handle is cheap to clone, clones refer to the same storage. Storage is returned to the partitions when the last
/// handle is dropped or when [deallocate][PartitionedArray::deallocate] is called.
///
/// Element operations are atomic, so tasks touching disjoint indices need no further synchronization
/// and tasks updating the same index can use the `fetch_*` operations.
#[derive(Debug)]
pub struct PartitionedArray<T: Dist> {
    inner: Arc<ArrayInner<T>>,
}

impl<T: Dist> Clone for PartitionedArray<T> {
    fn clone(&self) -> Self {
        PartitionedArray {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Dist> PartitionedArray<T> {
    /// Allocate a zero initialized array of `len` elements.
    ///
    /// Every partition reserves room for its share (`ceil(len/P)` elements for a striped layout, `len/P` for a chunked one).
    ///
    /// # Errors
    /// - `InvalidArgument` if `len == 0`
    /// - `InvalidLayout` if the layout is chunked and `len` is not a multiple of the number of partitions
    /// - `AllocationFailure` if a partition cannot provide its share, nothing stays allocated in that case
    #[tracing::instrument(skip_all)]
    pub fn new(world: &World, len: usize, layout: Layout) -> RuntimeResult<PartitionedArray<T>> {
        if len == 0 {
            return Err(RuntimeError::invalid_argument("array length must be > 0"));
        }
        let map = PartitionMap::new(len, world.num_partitions(), layout)?;
        let buffers = (0..map.num_partitions())
            .map(|p| PartitionBuffer::new(&world.inner.heap, p, map.partition_capacity(), T::ZERO))
            .collect::<RuntimeResult<Vec<_>>>()?;
        tracing::debug!(
            "allocated {} element {} array, {} elements per partition",
            len,
            layout,
            map.partition_capacity()
        );
        Ok(PartitionedArray {
            inner: Arc::new(ArrayInner {
                world: world.inner.clone(),
                map,
                buffers,
            }),
        })
    }

    /// Release every partition's buffer.
    ///
    /// # Panics
    /// If other handles to this array are still alive
    pub fn deallocate(self) {
        match Arc::try_unwrap(self.inner) {
            Ok(inner) => {
                tracing::debug!("deallocating array of {} elements", inner.map.len());
                drop(inner);
            }
            Err(inner) => panic!(
                "cannot deallocate an array with {} live handles",
                Arc::strong_count(&inner)
            ),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.map.is_empty()
    }

    pub fn layout(&self) -> Layout {
        self.inner.map.layout()
    }

    pub fn num_partitions(&self) -> usize {
        self.inner.map.num_partitions()
    }

    pub fn partition_map(&self) -> &PartitionMap {
        &self.inner.map
    }

    /// The location of element `index`
    pub fn index(&self, index: usize) -> RuntimeResult<Address> {
        self.inner.map.locate(index)
    }

    fn cell(&self, index: usize) -> RuntimeResult<&T::Atomic> {
        let addr = self.inner.map.locate(index)?;
        Ok(&self.inner.buffers[addr.partition].cells()[addr.offset])
    }

    pub fn load(&self, index: usize) -> RuntimeResult<T> {
        Ok(T::load(self.cell(index)?))
    }

    pub fn store(&self, index: usize, val: T) -> RuntimeResult<()> {
        T::store(self.cell(index)?, val);
        Ok(())
    }

    /// Atomically replace element `index`, returning the previous value
    pub fn swap(&self, index: usize, val: T) -> RuntimeResult<T> {
        Ok(T::swap(self.cell(index)?, val))
    }

    /// Atomically add `val` to element `index`, returning the previous value
    pub fn fetch_add(&self, index: usize, val: T) -> RuntimeResult<T> {
        Ok(T::fetch_add(self.cell(index)?, val))
    }

    pub fn fetch_min(&self, index: usize, val: T) -> RuntimeResult<T> {
        Ok(T::fetch_min(self.cell(index)?, val))
    }

    pub fn fetch_max(&self, index: usize, val: T) -> RuntimeResult<T> {
        Ok(T::fetch_max(self.cell(index)?, val))
    }

    /// A view of the elements stored at `partition`
    pub fn local_data(&self, partition: usize) -> RuntimeResult<LocalData<'_, T>> {
        self.inner.world.check_partition(partition)?;
        let len = self.inner.map.num_elems_on(partition);
        Ok(LocalData::new(
            partition,
            &self.inner.buffers[partition].cells()[..len],
            &self.inner.map,
        ))
    }

    /// Run `worker` over every index of the array, see [apply_range][crate::apply_range]
    #[tracing::instrument(skip_all)]
    pub fn apply<F>(&self, grain: usize, strategy: Strategy, worker: F) -> RuntimeResult<ApplyReport>
    where
        F: Fn(&mut TaskContext, Range<usize>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        apply::apply_map_blocking(&self.inner.world, self.inner.map, grain, strategy, worker)
    }

    /// The asynchronous form of [apply][PartitionedArray::apply]
    pub fn apply_async<F>(
        &self,
        grain: usize,
        strategy: Strategy,
        worker: F,
    ) -> impl Future<Output = RuntimeResult<ApplyReport>> + Send + 'static
    where
        F: Fn(&mut TaskContext, Range<usize>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let fut = apply::apply_map(&self.inner.world, self.inner.map, grain, strategy, worker);
        async move { fut?.await }
    }

    fn default_grain(&self) -> RuntimeResult<usize> {
        grain_for_threads(self.len(), self.inner.world.scheduler.num_threads())
    }

    /// Set every element to `val`
    pub fn fill(&self, val: T, strategy: Strategy) -> RuntimeResult<ApplyReport> {
        let array = self.clone();
        self.apply(self.default_grain()?, strategy, move |ctx, range| {
            ctx.migrate(array.index(range.start)?);
            for i in range {
                array.store(i, val)?;
            }
            Ok(())
        })
    }

    /// Sum every element.
    ///
    /// Each task sums its range locally and adds the partial sum into the accumulator cell of the partition it resides at,
    /// the cells are combined once every task has joined.
    pub fn sum(&self, strategy: Strategy) -> RuntimeResult<T> {
        let partials = Accumulator::<T>::sum_in(&self.inner.world);
        let (array, acc) = (self.clone(), partials.clone());
        self.apply(self.default_grain()?, strategy, move |ctx, range| {
            ctx.migrate(array.index(range.start)?);
            let mut local = T::ZERO;
            for i in range {
                local = local.combine_add(array.load(i)?);
            }
            acc.update(ctx, local);
            Ok(())
        })?;
        Ok(partials.combine())
    }

    /// Copy the array into a vector in logical order
    pub fn to_vec(&self) -> Vec<T> {
        (0..self.len())
            .map(|i| {
                let addr = self.inner.map.locate_unchecked(i);
                T::load(&self.inner.buffers[addr.partition].cells()[addr.offset])
            })
            .collect()
    }

    /// Print the elements stored at each partition
    pub fn print(&self) {
        for partition in 0..self.num_partitions() {
            if let Ok(data) = self.local_data(partition) {
                println!("[{:?}] {:?}", partition, data.to_vec());
            }
        }
    }
}

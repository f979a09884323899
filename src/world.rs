use crate::env_var::config;
use crate::error::{RuntimeError, RuntimeResult};
use crate::memregion::PartitionHeap;
use crate::scheduler::{self, Counters, PartitionWorkStealing, TaskHandle};
use crate::warnings::RuntimeWarning;

use futures::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::*;

/// The state shared by a world and every object allocated from it
#[derive(Debug)]
pub(crate) struct WorldInner {
    pub(crate) num_partitions: usize,
    pub(crate) migration_hints: bool,
    pub(crate) heap: Arc<PartitionHeap>,
    pub(crate) scheduler: Arc<PartitionWorkStealing>,
    pub(crate) counters: Arc<Counters>,
}

impl WorldInner {
    pub(crate) fn spawn_at<F>(&self, from: usize, partition: usize, task: F) -> TaskHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.scheduler.spawn_at(from, partition, task)
    }

    pub(crate) fn block_on<F: Future>(&self, f: F) -> F::Output {
        trace_span!("block_on").in_scope(|| self.scheduler.block_on(f))
    }

    pub(crate) fn check_partition(&self, partition: usize) -> RuntimeResult<()> {
        if partition < self.num_partitions {
            Ok(())
        } else {
            Err(RuntimeError::invalid_argument(format!(
                "partition {} does not exist, the world has {} partitions",
                partition, self.num_partitions
            )))
        }
    }
}

/// A snapshot of the world's scheduling counters. All counters only ever grow.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct WorldStats {
    /// tasks spawned through [World::spawn_at] or an apply
    pub tasks_spawned: usize,
    /// tasks placed at a partition other than their spawner's
    pub remote_spawns: usize,
    /// tasks a worker took from a queue belonging to another partition
    pub cross_partition_steals: usize,
    /// migrations recorded by [TaskContext][crate::TaskContext]s
    pub migrations: usize,
}

/// The execution environment: a fixed set of partitions, each with its own storage budget,
/// and a pool of worker threads distributed over them.
///
/// A `World` is a cheap handle, clones refer to the same partitions.
/// When the last user handle is dropped the scheduler drains the remaining queued work and joins its threads.
///
/// # Examples
///```
/// use migrant::WorldBuilder;
///
/// let world = WorldBuilder::new().with_partitions(4).with_threads(4).build().expect("valid world");
/// let handle = world.spawn_at(Some(3), async move { 6 * 7 });
/// assert_eq!(world.block_on(handle), 42);
///```
#[derive(Debug)]
pub struct World {
    pub(crate) inner: Arc<WorldInner>,
    ref_cnt: Arc<AtomicUsize>,
}

impl World {
    /// Returns the number of partitions in this world
    pub fn num_partitions(&self) -> usize {
        self.inner.num_partitions
    }

    /// Returns the number of worker threads serving the partitions
    pub fn num_threads(&self) -> usize {
        self.inner.scheduler.num_threads()
    }

    /// Returns whether migration requests made through a [TaskContext][crate::TaskContext] are honored
    pub fn migration_hints(&self) -> bool {
        self.inner.migration_hints
    }

    /// Returns the partition the calling task was placed at.
    ///
    /// Outside of a task this is the calling thread's home partition,
    /// threads that are not part of the world's pool (e.g. the main thread) reside at partition 0.
    pub fn current_partition(&self) -> usize {
        scheduler::current_partition()
    }

    /// Returns the number of bytes each partition can provide to allocations
    pub fn partition_capacity(&self) -> usize {
        self.inner.heap.capacity()
    }

    /// Returns the number of bytes currently allocated at `partition`
    pub fn bytes_in_use(&self, partition: usize) -> RuntimeResult<usize> {
        self.inner.check_partition(partition)?;
        Ok(self.inner.heap.used(partition))
    }

    /// Launch `task` so that it starts executing at `partition` (`None` places it at the caller's partition).
    ///
    /// # Panics
    /// If `partition` is not smaller than [num_partitions][World::num_partitions]
    #[tracing::instrument(skip_all)]
    pub fn spawn_at<F>(&self, partition: Option<usize>, task: F) -> TaskHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let from = scheduler::current_partition();
        self.inner
            .spawn_at(from, partition.unwrap_or(from), task)
    }

    /// Run a future to completion on the current thread.
    ///
    /// The calling thread executes queued tasks while the future is pending,
    /// so blocking from within a task does not starve the pool.
    pub fn block_on<F: Future>(&self, f: F) -> F::Output {
        RuntimeWarning::BlockingCall("World::block_on", "<future>.await").print();
        self.inner.block_on(f)
    }

    /// Returns a snapshot of the scheduling counters
    pub fn stats(&self) -> WorldStats {
        let counters = &self.inner.counters;
        WorldStats {
            tasks_spawned: counters.tasks_spawned.load(Ordering::Relaxed),
            remote_spawns: counters.remote_spawns.load(Ordering::Relaxed),
            cross_partition_steals: counters.cross_partition_steals.load(Ordering::Relaxed),
            migrations: counters.migrations.load(Ordering::Relaxed),
        }
    }
}

impl Clone for World {
    fn clone(&self) -> Self {
        self.ref_cnt.fetch_add(1, Ordering::SeqCst);
        World {
            inner: self.inner.clone(),
            ref_cnt: self.ref_cnt.clone(),
        }
    }
}

impl Drop for World {
    #[tracing::instrument(skip_all)]
    fn drop(&mut self) {
        let cnt = self.ref_cnt.fetch_sub(1, Ordering::SeqCst);
        if cnt == 1 {
            self.inner.scheduler.shutdown();
            debug!("world dropped, stats: {:?}", self.stats());
        }
    }
}

/// An implementation of the Builder design pattern, used to construct a [World].
///
/// Every setting defaults to the value found in the `MIGRANT_*` environment variables.
///
/// # Examples
///
///```
/// use migrant::WorldBuilder;
///
/// let world = WorldBuilder::new()
///                     .with_partitions(8)
///                     .with_threads(2)
///                     .with_migration_hints(false)
///                     .build()
///                     .expect("valid world");
///```
#[derive(Debug, Clone)]
pub struct WorldBuilder {
    partitions: usize,
    threads: usize,
    partition_capacity: usize,
    migration_hints: bool,
    pin_threads: bool,
    runtime_warnings: bool,
}

impl Default for WorldBuilder {
    fn default() -> Self {
        WorldBuilder::new()
    }
}

impl WorldBuilder {
    /// Construct a new world builder seeded from the environment configuration
    #[tracing::instrument(skip_all)]
    pub fn new() -> WorldBuilder {
        let config = config();
        WorldBuilder {
            partitions: config.partitions,
            threads: config.threads,
            partition_capacity: config.partition_capacity,
            migration_hints: config.migration_hints,
            pin_threads: config.pin_threads,
            runtime_warnings: true,
        }
    }

    /// Specify the number of partitions
    pub fn with_partitions(mut self, partitions: usize) -> WorldBuilder {
        self.partitions = partitions;
        self
    }

    /// Specify the number of worker threads, threads are assigned to partitions round robin
    pub fn with_threads(mut self, threads: usize) -> WorldBuilder {
        self.threads = threads;
        self
    }

    /// Specify the number of bytes each partition can allocate
    pub fn with_partition_capacity(mut self, bytes: usize) -> WorldBuilder {
        self.partition_capacity = bytes;
        self
    }

    /// Honor (`true`) or ignore (`false`) migration requests
    pub fn with_migration_hints(mut self, migration_hints: bool) -> WorldBuilder {
        self.migration_hints = migration_hints;
        self
    }

    /// Pin worker threads to cores
    pub fn with_pinned_threads(mut self, pin_threads: bool) -> WorldBuilder {
        self.pin_threads = pin_threads;
        self
    }

    /// Globally enable or disable runtime warnings (process wide setting)
    pub fn with_runtime_warnings(mut self, enabled: bool) -> WorldBuilder {
        self.runtime_warnings = enabled;
        self
    }

    /// Instantiate a [World]
    #[tracing::instrument(skip_all)]
    pub fn build(self) -> RuntimeResult<World> {
        if self.partitions == 0 {
            return Err(RuntimeError::invalid_argument(
                "a world needs at least one partition",
            ));
        }
        if self.threads == 0 {
            return Err(RuntimeError::invalid_argument(
                "a world needs at least one thread",
            ));
        }
        RuntimeWarning::set_enabled(self.runtime_warnings);
        let counters = Arc::new(Counters::default());
        let scheduler = PartitionWorkStealing::new(
            self.partitions,
            self.threads,
            self.pin_threads,
            counters.clone(),
        )
        .map_err(|e| {
            RuntimeError::invalid_argument(format!("unable to start worker threads: {}", e))
        })?;
        debug!(
            "world built with {} partitions, {} threads, {} bytes per partition",
            self.partitions, self.threads, self.partition_capacity
        );
        Ok(World {
            inner: Arc::new(WorldInner {
                num_partitions: self.partitions,
                migration_hints: self.migration_hints,
                heap: Arc::new(PartitionHeap::new(self.partitions, self.partition_capacity)),
                scheduler,
                counters,
            }),
            ref_cnt: Arc::new(AtomicUsize::new(1)),
        })
    }
}

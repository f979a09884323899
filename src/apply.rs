//! Parallel apply: run a worker over every index of a range, split into grain sized tasks.
//!
//! A [Strategy] decides how the range is split (inline, one flat batch of tasks, or a recursive bisection tree)
//! and where the tasks are placed: at the spawner's partition, at the partition owning the first index of the task's range,
//! or below one root task per partition that splits only the elements its partition owns.
//! Every strategy produces leaf ranges that are disjoint and cover `[0, len)` exactly, so the logical result of an apply
//! never depends on the strategy chosen.
use crate::error::{RuntimeError, RuntimeResult};
use crate::partition_map::{Address, Layout, PartitionMap};
use crate::scheduler::{self, Counters, TaskHandle};
use crate::warnings::RuntimeWarning;
use crate::world::{World, WorldInner};

use async_recursion::async_recursion;
use futures::future::join_all;
use futures::Future;
use parking_lot::Mutex;
use std::ops::Range;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// How a strategy divides a range into tasks
#[derive(serde::Serialize, serde::Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Shape {
    /// grain sized chunks executed in order by the caller
    Inline,
    /// one task per grain sized chunk, all launched by the caller
    Flat,
    /// each task bisects its range, launching the lower half and keeping the upper half
    Bisect,
}

/// Where a strategy places the tasks it launches
#[derive(serde::Serialize, serde::Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Placement {
    /// at the spawning task's partition
    Local,
    /// at the partition owning the first element of the task's range
    Owner,
    /// one root task at every partition, splitting the elements that partition owns into local tasks
    PerPartition,
}

/// The scheduling strategies of a parallel apply.
///
/// # Possible Options
/// - Serial: the caller processes grain sized chunks one after another (`"serial"`)
/// - SerialSpawn: the caller launches one local task per chunk (`"serial_spawn"`, `"cilk_for"`)
/// - RecursiveSpawn: a balanced binary tree of local tasks (`"recursive_spawn"`)
/// - SerialRemoteSpawn: the caller launches one task at every partition, which launches one local task per chunk it owns
///   (`"serial_remote_spawn"`)
/// - SerialRemoteSpawnShallow: the caller launches one task per chunk, each placed at the chunk's owner
///   (`"serial_remote_spawn_shallow"`)
/// - RecursiveRemoteSpawn: a binary tree over the partitions places one task at every partition,
///   which then runs a local binary tree over the chunks it owns (`"recursive_remote_spawn"`)
#[derive(serde::Serialize, serde::Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Strategy {
    Serial,
    SerialSpawn,
    RecursiveSpawn,
    SerialRemoteSpawn,
    SerialRemoteSpawnShallow,
    RecursiveRemoteSpawn,
}

impl Strategy {
    pub const ALL: [Strategy; 6] = [
        Strategy::Serial,
        Strategy::SerialSpawn,
        Strategy::RecursiveSpawn,
        Strategy::SerialRemoteSpawn,
        Strategy::SerialRemoteSpawnShallow,
        Strategy::RecursiveRemoteSpawn,
    ];

    pub fn shape(&self) -> Shape {
        match self {
            Strategy::Serial => Shape::Inline,
            Strategy::SerialSpawn
            | Strategy::SerialRemoteSpawn
            | Strategy::SerialRemoteSpawnShallow => Shape::Flat,
            Strategy::RecursiveSpawn | Strategy::RecursiveRemoteSpawn => Shape::Bisect,
        }
    }

    pub fn placement(&self) -> Placement {
        match self {
            Strategy::Serial | Strategy::SerialSpawn | Strategy::RecursiveSpawn => {
                Placement::Local
            }
            Strategy::SerialRemoteSpawnShallow => Placement::Owner,
            Strategy::SerialRemoteSpawn | Strategy::RecursiveRemoteSpawn => {
                Placement::PerPartition
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Serial => "serial",
            Strategy::SerialSpawn => "serial_spawn",
            Strategy::RecursiveSpawn => "recursive_spawn",
            Strategy::SerialRemoteSpawn => "serial_remote_spawn",
            Strategy::SerialRemoteSpawnShallow => "serial_remote_spawn_shallow",
            Strategy::RecursiveRemoteSpawn => "recursive_remote_spawn",
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for Strategy {
    type Err = RuntimeError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "serial" => Ok(Strategy::Serial),
            "serial_spawn" | "cilk_for" => Ok(Strategy::SerialSpawn),
            "recursive_spawn" => Ok(Strategy::RecursiveSpawn),
            "serial_remote_spawn" => Ok(Strategy::SerialRemoteSpawn),
            "serial_remote_spawn_shallow" => Ok(Strategy::SerialRemoteSpawnShallow),
            "recursive_remote_spawn" => Ok(Strategy::RecursiveRemoteSpawn),
            _ => Err(RuntimeError::invalid_argument(format!(
                "unknown strategy {:?}, expected one of {:?}",
                s,
                Strategy::ALL.map(|s| s.name())
            ))),
        }
    }
}

/// Per task execution context handed to every worker invocation.
///
/// Tracks the partition the task conceptually executes at. Migrating only moves this notional
/// execution context: it never changes which data a worker reads or writes.
#[derive(Debug, Clone)]
pub struct TaskContext {
    partition: usize,
    num_partitions: usize,
    migration_hints: bool,
    migrations: usize,
}

impl TaskContext {
    pub(crate) fn new(partition: usize, num_partitions: usize, migration_hints: bool) -> TaskContext {
        TaskContext {
            partition,
            num_partitions,
            migration_hints,
            migrations: 0,
        }
    }

    /// The partition this task currently resides at
    pub fn partition(&self) -> usize {
        self.partition
    }

    pub fn num_partitions(&self) -> usize {
        self.num_partitions
    }

    /// true if `address` lives at the partition this task resides at
    pub fn is_local(&self, address: Address) -> bool {
        address.partition == self.partition
    }

    /// Move subsequent execution of this task next to `address`
    pub fn migrate(&mut self, address: Address) {
        self.migrate_to(address.partition)
    }

    /// Move subsequent execution of this task to `partition`.
    ///
    /// A no-op when migration hints are disabled or the task already resides there.
    ///
    /// # Panics
    /// If `partition` does not exist
    pub fn migrate_to(&mut self, partition: usize) {
        assert!(
            partition < self.num_partitions,
            "cannot migrate to partition {}, the world has {} partitions",
            partition,
            self.num_partitions
        );
        if self.migration_hints && partition != self.partition {
            self.partition = partition;
            self.migrations += 1;
        }
    }

    /// Number of migrations performed by this task so far
    pub fn migrations(&self) -> usize {
        self.migrations
    }
}

/// Summary of a completed apply
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// leaf ranges handed to the worker
    pub leaf_tasks: usize,
    /// tasks launched (the caller's own work is not counted)
    pub spawned_tasks: usize,
    /// launched tasks placed at a partition other than their spawner's
    pub remote_spawns: usize,
    /// migrations performed by workers
    pub migrations: usize,
}

/// Grain that gives every thread one chunk of an `n` element range, never less than 1
pub fn grain_for_threads(n: usize, threads: usize) -> RuntimeResult<usize> {
    grain_for_threads_min(n, threads, 1)
}

/// Like [grain_for_threads] but never less than `min_grain`
pub fn grain_for_threads_min(n: usize, threads: usize, min_grain: usize) -> RuntimeResult<usize> {
    if threads == 0 {
        return Err(RuntimeError::invalid_argument("num_threads must be > 0"));
    }
    Ok(std::cmp::max(std::cmp::max(1, min_grain), n / threads))
}

// The largest chunk length not above `grain` that is congruent to 1 modulo `partitions`.
// Consecutive chunks of this length start at consecutive partitions of a striped layout.
fn striped_stride(grain: usize, partitions: usize) -> usize {
    grain - (grain - 1) % partitions
}

type DynWorker = dyn Fn(&mut TaskContext, Range<usize>) -> anyhow::Result<()> + Send + Sync;

struct ApplyState {
    world: Arc<WorldInner>,
    map: PartitionMap,
    grain: usize,
    placement: Placement,
    worker: Arc<DynWorker>,
    abort: AtomicBool,
    failure: Mutex<Option<RuntimeError>>,
    leaf_tasks: AtomicUsize,
    spawned_tasks: AtomicUsize,
    remote_spawns: AtomicUsize,
    migrations: AtomicUsize,
}

impl ApplyState {
    fn context(&self, partition: usize) -> TaskContext {
        TaskContext::new(partition, self.world.num_partitions, self.world.migration_hints)
    }

    fn fail(&self, range: Range<usize>, message: String) {
        self.abort.store(true, Ordering::SeqCst);
        let mut failure = self.failure.lock();
        if failure.is_none() {
            tracing::debug!("apply aborted by range [{}, {}): {}", range.start, range.end, message);
            *failure = Some(RuntimeError::TaskFailed {
                begin: range.start,
                end: range.end,
                message,
            });
        }
    }

    fn run_leaf(&self, ctx: &mut TaskContext, range: Range<usize>) {
        if self.abort.load(Ordering::SeqCst) {
            return;
        }
        self.leaf_tasks.fetch_add(1, Ordering::Relaxed);
        let before = ctx.migrations();
        let res = std::panic::catch_unwind(AssertUnwindSafe(|| (self.worker)(ctx, range.clone())));
        let migrations = ctx.migrations() - before;
        if migrations > 0 {
            self.migrations.fetch_add(migrations, Ordering::Relaxed);
            Counters::incr(&self.world.counters.migrations, migrations);
        }
        match res {
            Ok(Ok(())) => {}
            Ok(Err(e)) => self.fail(range, format!("{:#}", e)),
            Err(payload) => self.fail(range, panic_message(payload.as_ref())),
        }
    }

    fn target(&self, from: usize, range: &Range<usize>) -> usize {
        match self.placement {
            Placement::Local | Placement::PerPartition => from,
            Placement::Owner => self.map.owner(range.start).unwrap_or(from),
        }
    }

    // The pieces of the elements owned by `partition` that its root task splits locally:
    // the whole owned block of a chunked layout, or every striped chunk starting at `partition`.
    fn owned_segments(&self, partition: usize) -> Vec<Range<usize>> {
        let len = self.map.len();
        match self.map.layout() {
            Layout::Chunked => self.map.owned_range(partition).into_iter().collect(),
            Layout::Striped => {
                let stride = striped_stride(self.grain, self.map.num_partitions());
                (partition * stride..len)
                    .step_by(stride * self.map.num_partitions())
                    .map(|begin| begin..std::cmp::min(begin + stride, len))
                    .collect()
            }
        }
    }

    fn spawn(self: &Arc<Self>, from: usize, partition: usize, job: Job) -> TaskHandle<()> {
        self.spawned_tasks.fetch_add(1, Ordering::Relaxed);
        if partition != from {
            self.remote_spawns.fetch_add(1, Ordering::Relaxed);
        }
        let state = self.clone();
        match job {
            Job::Leaf(range) => self.world.spawn_at(from, partition, async move {
                let mut ctx = state.context(partition);
                state.run_leaf(&mut ctx, range);
            }),
            Job::Bisect(range) => {
                self.world
                    .spawn_at(from, partition, recursive_spawn(state, partition, range))
            }
            Job::Segments(shape, segments) => self.world.spawn_at(
                from,
                partition,
                split_segments(state, partition, shape, segments),
            ),
            Job::Root(shape) => {
                self.world
                    .spawn_at(from, partition, partition_root(state, partition, shape))
            }
            Job::Tree(partitions) => {
                self.world
                    .spawn_at(from, partition, partition_tree(state, partitions))
            }
        }
    }

    fn report(&self) -> RuntimeResult<ApplyReport> {
        if let Some(err) = self.failure.lock().take() {
            return Err(err);
        }
        Ok(ApplyReport {
            leaf_tasks: self.leaf_tasks.load(Ordering::SeqCst),
            spawned_tasks: self.spawned_tasks.load(Ordering::SeqCst),
            remote_spawns: self.remote_spawns.load(Ordering::SeqCst),
            migrations: self.migrations.load(Ordering::SeqCst),
        })
    }
}

// What a launched task does once it starts at its partition
enum Job {
    Leaf(Range<usize>),
    Bisect(Range<usize>),
    Segments(Shape, Vec<Range<usize>>),
    Root(Shape),
    Tree(Range<usize>),
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("worker panicked: {}", msg)
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("worker panicked: {}", msg)
    } else {
        "worker panicked".to_string()
    }
}

fn chunks(range: Range<usize>, grain: usize) -> impl Iterator<Item = Range<usize>> {
    let end = range.end;
    range
        .step_by(grain)
        .map(move |begin| begin..std::cmp::min(begin + grain, end))
}

fn serial(state: &ApplyState, partition: usize, range: Range<usize>) {
    let mut ctx = state.context(partition);
    for chunk in chunks(range, state.grain) {
        state.run_leaf(&mut ctx, chunk);
    }
}

async fn serial_spawn(state: Arc<ApplyState>, partition: usize, range: Range<usize>) {
    let handles: Vec<_> = chunks(range, state.grain)
        .map(|chunk| {
            let target = state.target(partition, &chunk);
            state.spawn(partition, target, Job::Leaf(chunk))
        })
        .collect();
    join_all(handles).await;
}

#[async_recursion]
async fn recursive_spawn(state: Arc<ApplyState>, partition: usize, range: Range<usize>) {
    let (mut lo, hi) = (range.start, range.end);
    let mut handles = Vec::new();
    while hi - lo > state.grain {
        let mid = lo + (hi - lo) / 2;
        let target = state.target(partition, &(lo..mid));
        handles.push(state.spawn(partition, target, Job::Bisect(lo..mid)));
        lo = mid;
    }
    let mut ctx = state.context(partition);
    state.run_leaf(&mut ctx, lo..hi);
    join_all(handles).await;
}

// Split the given pieces of `partition`'s own elements into local tasks
#[async_recursion]
async fn split_segments(
    state: Arc<ApplyState>,
    partition: usize,
    shape: Shape,
    mut segments: Vec<Range<usize>>,
) {
    match shape {
        Shape::Bisect => {
            let mut handles = Vec::new();
            while segments.len() > 1 {
                let upper = segments.split_off(segments.len() / 2);
                let lower = std::mem::replace(&mut segments, upper);
                handles.push(state.spawn(partition, partition, Job::Segments(shape, lower)));
            }
            if let Some(segment) = segments.pop() {
                recursive_spawn(state.clone(), partition, segment).await;
            }
            join_all(handles).await;
        }
        Shape::Flat | Shape::Inline => {
            let handles: Vec<_> = segments
                .into_iter()
                .flat_map(|segment| chunks(segment, state.grain))
                .map(|chunk| state.spawn(partition, partition, Job::Leaf(chunk)))
                .collect();
            join_all(handles).await;
        }
    }
}

async fn partition_root(state: Arc<ApplyState>, partition: usize, shape: Shape) {
    let segments = state.owned_segments(partition);
    split_segments(state, partition, shape, segments).await;
}

// Runs at partition `partitions.start`: bisects the partitions, launching every upper half at its first partition,
// then splits the elements of its own partition.
#[async_recursion]
async fn partition_tree(state: Arc<ApplyState>, partitions: Range<usize>) {
    let (lo, mut hi) = (partitions.start, partitions.end);
    let mut handles = Vec::new();
    while hi - lo > 1 {
        let mid = lo + (hi - lo) / 2;
        handles.push(state.spawn(lo, mid, Job::Tree(mid..hi)));
        hi = mid;
    }
    partition_root(state.clone(), lo, Shape::Bisect).await;
    join_all(handles).await;
}

async fn run_apply(state: Arc<ApplyState>, shape: Shape) -> RuntimeResult<ApplyReport> {
    let len = state.map.len();
    let partition = scheduler::current_partition();
    let partitions = state.map.num_partitions();
    if len <= state.grain {
        serial(&state, partition, 0..len);
    } else {
        match (shape, state.placement) {
            (Shape::Inline, _) => serial(&state, partition, 0..len),
            (Shape::Flat, Placement::PerPartition) => {
                let handles: Vec<_> = (0..partitions)
                    .map(|p| state.spawn(partition, p, Job::Root(Shape::Flat)))
                    .collect();
                join_all(handles).await;
            }
            (Shape::Bisect, Placement::PerPartition) => {
                if partition == 0 {
                    partition_tree(state.clone(), 0..partitions).await;
                } else {
                    state.spawn(partition, 0, Job::Tree(0..partitions)).await;
                }
            }
            (Shape::Flat, _) => serial_spawn(state.clone(), partition, 0..len).await,
            (Shape::Bisect, _) => recursive_spawn(state.clone(), partition, 0..len).await,
        }
    }
    state.report()
}

// argument checks happen here, before any task is launched
pub(crate) fn apply_map<F>(
    world: &Arc<WorldInner>,
    map: PartitionMap,
    grain: usize,
    strategy: Strategy,
    worker: F,
) -> RuntimeResult<impl Future<Output = RuntimeResult<ApplyReport>> + Send + 'static>
where
    F: Fn(&mut TaskContext, Range<usize>) -> anyhow::Result<()> + Send + Sync + 'static,
{
    if grain == 0 {
        return Err(RuntimeError::invalid_argument("grain must be > 0"));
    }
    if map.num_partitions() != world.num_partitions {
        return Err(RuntimeError::invalid_argument(format!(
            "partition map spans {} partitions, the world has {}",
            map.num_partitions(),
            world.num_partitions
        )));
    }
    let state = Arc::new(ApplyState {
        world: world.clone(),
        map,
        grain,
        placement: strategy.placement(),
        worker: Arc::new(worker),
        abort: AtomicBool::new(false),
        failure: Mutex::new(None),
        leaf_tasks: AtomicUsize::new(0),
        spawned_tasks: AtomicUsize::new(0),
        remote_spawns: AtomicUsize::new(0),
        migrations: AtomicUsize::new(0),
    });
    tracing::debug!(
        "apply over {} elements, grain {}, strategy {}",
        map.len(),
        grain,
        strategy
    );
    Ok(run_apply(state, strategy.shape()))
}

pub(crate) fn apply_map_blocking<F>(
    world: &Arc<WorldInner>,
    map: PartitionMap,
    grain: usize,
    strategy: Strategy,
    worker: F,
) -> RuntimeResult<ApplyReport>
where
    F: Fn(&mut TaskContext, Range<usize>) -> anyhow::Result<()> + Send + Sync + 'static,
{
    let fut = apply_map(world, map, grain, strategy, worker)?;
    RuntimeWarning::BlockingCall("apply", "apply_range_async").print();
    let report = world.block_on(fut)?;
    tracing::debug!("apply finished: {:?}", report);
    Ok(report)
}

/// Run `worker` over every index of `map`, returning once every launched task has completed.
///
/// The worker is called with disjoint sub-ranges whose union is `[0, map.len())`.
/// An error returned (or a panic raised) by any worker aborts the apply: tasks that have not started yet skip their work,
/// all launched tasks are still joined, and the first failure is returned as [RuntimeError::TaskFailed].
///
/// # Examples
///```
/// use migrant::prelude::*;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// let world = WorldBuilder::new().build().expect("valid world");
/// let map = PartitionMap::new(1024, world.num_partitions(), Layout::Striped).expect("valid map");
/// let count = Arc::new(AtomicUsize::new(0));
/// let c = count.clone();
/// apply_range(&world, &map, 64, Strategy::RecursiveSpawn, move |_ctx, range| {
///     c.fetch_add(range.len(), Ordering::Relaxed);
///     Ok(())
/// }).expect("apply succeeds");
/// assert_eq!(count.load(Ordering::SeqCst), 1024);
///```
#[tracing::instrument(skip_all)]
pub fn apply_range<F>(
    world: &World,
    map: &PartitionMap,
    grain: usize,
    strategy: Strategy,
    worker: F,
) -> RuntimeResult<ApplyReport>
where
    F: Fn(&mut TaskContext, Range<usize>) -> anyhow::Result<()> + Send + Sync + 'static,
{
    apply_map_blocking(&world.inner, *map, grain, strategy, worker)
}

/// The asynchronous form of [apply_range], for use within tasks.
///
/// Argument errors are reported when the returned future is awaited.
pub fn apply_range_async<F>(
    world: &World,
    map: &PartitionMap,
    grain: usize,
    strategy: Strategy,
    worker: F,
) -> impl Future<Output = RuntimeResult<ApplyReport>> + Send + 'static
where
    F: Fn(&mut TaskContext, Range<usize>) -> anyhow::Result<()> + Send + Sync + 'static,
{
    let fut = apply_map(&world.inner, *map, grain, strategy, worker);
    async move { fut?.await }
}

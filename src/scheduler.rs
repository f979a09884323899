use crate::warnings::RuntimeWarning;

use async_task::Task;
use futures::future::BoxFuture;
use futures::Future;
use std::cell::Cell;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

pub(crate) mod partition_work_stealing;
pub(crate) use partition_work_stealing::PartitionWorkStealing;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum SchedulerStatus {
    Active,
    Finished,
}

thread_local! {
    static HOME_PARTITION: Cell<Option<usize>> = Cell::new(None);
    static TASK_PARTITION: Cell<Option<usize>> = Cell::new(None);
}

pub(crate) fn set_home_partition(partition: usize) {
    HOME_PARTITION.with(|home| home.set(Some(partition)));
}

pub(crate) fn home_partition() -> Option<usize> {
    HOME_PARTITION.with(|home| home.get())
}

/// true if the calling thread is one of the scheduler's worker threads
pub(crate) fn on_worker_thread() -> bool {
    home_partition().is_some()
}

/// The partition the running task was placed at.
///
/// Outside of a task this is the calling thread's home partition, threads outside the pool reside at partition 0.
pub(crate) fn current_partition() -> usize {
    TASK_PARTITION
        .with(|task| task.get())
        .or_else(home_partition)
        .unwrap_or(0)
}

// Runs the wrapped future with TASK_PARTITION set to the partition the task was placed at,
// whichever worker thread ends up polling it.
pub(crate) struct OnPartition<T> {
    partition: usize,
    fut: BoxFuture<'static, T>,
}

impl<T> OnPartition<T> {
    pub(crate) fn new(partition: usize, fut: BoxFuture<'static, T>) -> OnPartition<T> {
        OnPartition { partition, fut }
    }
}

impl<T> Future for OnPartition<T> {
    type Output = T;
    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let prev = TASK_PARTITION.with(|task| task.replace(Some(self.partition)));
        let res = self.fut.as_mut().poll(cx);
        TASK_PARTITION.with(|task| task.set(prev));
        res
    }
}

/// Monotonic counters shared by the scheduler and the apply combinator
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) tasks_spawned: AtomicUsize,
    pub(crate) remote_spawns: AtomicUsize,
    pub(crate) cross_partition_steals: AtomicUsize,
    pub(crate) migrations: AtomicUsize,
}

impl Counters {
    pub(crate) fn incr(counter: &AtomicUsize, amount: usize) {
        counter.fetch_add(amount, Ordering::Relaxed);
    }
}

/// A handle to a task spawned onto a partition.
///
/// Awaiting the handle (or calling [join][TaskHandle::join] outside of a task) yields the task's output,
/// a panic inside the task is resumed in the joining task.
/// Dropping a handle that was neither joined nor detached lets the task run to completion and prints a warning.
#[must_use = "a task handle should be awaited, joined or detached"]
pub struct TaskHandle<T> {
    pub(crate) task: Option<Task<std::thread::Result<T>, usize>>,
    pub(crate) executor: Arc<PartitionWorkStealing>,
    pub(crate) partition: usize,
}

impl<T: Send + 'static> TaskHandle<T> {
    /// The partition the task was placed at
    pub fn partition(&self) -> usize {
        self.partition
    }

    /// Let the task run to completion in the background, discarding its output
    pub fn detach(mut self) {
        if let Some(task) = self.task.take() {
            task.detach();
        }
    }

    /// Block the calling thread until the task completes, executing other queued tasks while waiting
    pub fn join(self) -> T {
        RuntimeWarning::BlockingCall("TaskHandle::join", "<handle>.await").print();
        let executor = self.executor.clone();
        executor.block_on(self)
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = T;
    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        match this.task.as_mut() {
            Some(task) => match Pin::new(task).poll(cx) {
                Poll::Ready(res) => {
                    this.task = None;
                    match res {
                        Ok(output) => Poll::Ready(output),
                        Err(payload) => std::panic::resume_unwind(payload),
                    }
                }
                Poll::Pending => Poll::Pending,
            },
            None => panic!("TaskHandle polled after completion"),
        }
    }
}

impl<T> Drop for TaskHandle<T> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            RuntimeWarning::DroppedHandle("a TaskHandle").print();
            task.detach();
        }
    }
}

impl<T> std::fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("partition", &self.partition)
            .field("task_id", &self.task.as_ref().map(|t| *t.metadata()))
            .finish()
    }
}

use crate::env_var::config;
use crate::scheduler::{
    home_partition, set_home_partition, Counters, OnPartition, SchedulerStatus, TaskHandle,
};
use crate::warnings::RuntimeWarning;

use async_task::{Builder, Runnable};
use core_affinity::CoreId;
use crossbeam::deque::{Injector, Stealer, Worker};
use futures::task::ArcWake;
use futures::{Future, FutureExt};
use parking_lot::Mutex;
use rand::distributions::Uniform;
use rand::prelude::*;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::thread;
use std::time::Instant;

static TASK_ID: AtomicUsize = AtomicUsize::new(0);

// A worker's view of the queues: its own deque, the injector of its home partition,
// the deques of the other workers living at the same partition and every other partition's injector.
#[derive(Debug)]
struct PartitionQueue {
    partition: usize,
    tasks: Worker<Runnable<usize>>,
    injector: Arc<Injector<Runnable<usize>>>,
    peers: Vec<Stealer<Runnable<usize>>>,
    remote_injectors: Vec<Arc<Injector<Runnable<usize>>>>,
    remote_stealers: Vec<Stealer<Runnable<usize>>>,
}

impl PartitionQueue {
    fn get_task(&self, rng: &mut ThreadRng, counters: &Counters) -> Option<Runnable<usize>> {
        self.tasks
            .pop()
            .or_else(|| self.injector.steal_batch_and_pop(&self.tasks).success())
            .or_else(|| {
                if self.peers.is_empty() {
                    None
                } else {
                    let i = Uniform::new(0, self.peers.len()).sample(rng);
                    self.peers[i].steal().success()
                }
            })
            .or_else(|| {
                let mut stolen = None;
                if !self.remote_injectors.is_empty() {
                    let i = Uniform::new(0, self.remote_injectors.len()).sample(rng);
                    stolen = self.remote_injectors[i].steal().success();
                }
                if stolen.is_none() && !self.remote_stealers.is_empty() {
                    let i = Uniform::new(0, self.remote_stealers.len()).sample(rng);
                    stolen = self.remote_stealers[i].steal().success();
                }
                if stolen.is_some() {
                    Counters::incr(&counters.cross_partition_steals, 1);
                }
                stolen
            })
    }

    fn is_empty(&self) -> bool {
        self.tasks.is_empty()
            && self.injector.is_empty()
            && self.remote_injectors.iter().all(|i| i.is_empty())
    }
}

#[derive(Debug)]
struct PartitionWorkerThread {
    queue: PartitionQueue,
    status: Arc<AtomicU8>,
}

impl PartitionWorkerThread {
    fn run(
        worker: PartitionWorkerThread,
        active_cnt: Arc<AtomicUsize>,
        counters: Arc<Counters>,
        core: Option<CoreId>,
    ) -> std::io::Result<thread::JoinHandle<()>> {
        let builder =
            thread::Builder::new().name(format!("partition_{}_worker", worker.queue.partition));
        builder.spawn(move || {
            if let Some(core) = core {
                core_affinity::set_for_current(core);
            }
            set_home_partition(worker.queue.partition);
            active_cnt.fetch_add(1, Ordering::SeqCst);
            tracing::trace!("worker thread started at partition {}", worker.queue.partition);
            let mut rng = rand::thread_rng();
            while worker.status.load(Ordering::SeqCst) == SchedulerStatus::Active as u8
                || !worker.queue.is_empty()
            {
                if let Some(runnable) = worker.queue.get_task(&mut rng, &counters) {
                    tracing::trace!("running task {}", runnable.metadata());
                    runnable.run();
                } else {
                    std::thread::yield_now();
                }
            }
            active_cnt.fetch_sub(1, Ordering::SeqCst);
            tracing::trace!("worker thread at partition {} exiting", worker.queue.partition);
        })
    }
}

struct BlockOnNotify(AtomicBool);

impl ArcWake for BlockOnNotify {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.0.store(true, Ordering::SeqCst);
    }
}

/// A work stealing executor with one injector queue per partition.
///
/// Worker threads are assigned a home partition round robin. A worker drains its own deque,
/// then its home injector, then the deques of the other workers at its partition,
/// and only then steals from other partitions.
#[derive(Debug)]
pub(crate) struct PartitionWorkStealing {
    num_threads: usize,
    threads: Mutex<Vec<thread::JoinHandle<()>>>,
    injectors: Vec<Arc<Injector<Runnable<usize>>>>,
    stealers: Vec<Stealer<Runnable<usize>>>,
    status: Arc<AtomicU8>,
    active_cnt: Arc<AtomicUsize>,
    counters: Arc<Counters>,
}

impl PartitionWorkStealing {
    pub(crate) fn new(
        num_partitions: usize,
        num_threads: usize,
        pin_threads: bool,
        counters: Arc<Counters>,
    ) -> std::io::Result<Arc<PartitionWorkStealing>> {
        let injectors: Vec<_> = (0..num_partitions)
            .map(|_| Arc::new(Injector::new()))
            .collect();
        let workers: Vec<Worker<Runnable<usize>>> =
            (0..num_threads).map(|_| Worker::new_fifo()).collect();
        let stealers: Vec<_> = workers.iter().map(|w| w.stealer()).collect();

        let mut ws = PartitionWorkStealing {
            num_threads,
            threads: Mutex::new(Vec::new()),
            injectors,
            stealers,
            status: Arc::new(AtomicU8::new(SchedulerStatus::Active as u8)),
            active_cnt: Arc::new(AtomicUsize::new(0)),
            counters,
        };
        ws.init(workers, pin_threads)?;
        Ok(Arc::new(ws))
    }

    fn init(
        &mut self,
        workers: Vec<Worker<Runnable<usize>>>,
        pin_threads: bool,
    ) -> std::io::Result<()> {
        let num_partitions = self.injectors.len();
        let core_ids = if pin_threads {
            core_affinity::get_core_ids().unwrap_or_default()
        } else {
            Vec::new()
        };
        let mut threads = Vec::new();
        for (thread_id, tasks) in workers.into_iter().enumerate() {
            let partition = thread_id % num_partitions;
            let (peers, remote_stealers) = self
                .stealers
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != thread_id)
                .fold((vec![], vec![]), |(mut peers, mut remote), (i, s)| {
                    if i % num_partitions == partition {
                        peers.push(s.clone());
                    } else {
                        remote.push(s.clone());
                    }
                    (peers, remote)
                });
            let remote_injectors = self
                .injectors
                .iter()
                .enumerate()
                .filter(|(p, _)| *p != partition)
                .map(|(_, inj)| inj.clone())
                .collect();
            let worker = PartitionWorkerThread {
                queue: PartitionQueue {
                    partition,
                    tasks,
                    injector: self.injectors[partition].clone(),
                    peers,
                    remote_injectors,
                    remote_stealers,
                },
                status: self.status.clone(),
            };
            let core = if core_ids.is_empty() {
                None
            } else {
                Some(core_ids[thread_id % core_ids.len()])
            };
            match PartitionWorkerThread::run(
                worker,
                self.active_cnt.clone(),
                self.counters.clone(),
                core,
            ) {
                Ok(thread) => threads.push(thread),
                Err(e) => {
                    self.status
                        .store(SchedulerStatus::Finished as u8, Ordering::SeqCst);
                    for thread in threads {
                        let _res = thread.join();
                    }
                    return Err(e);
                }
            }
        }
        while self.active_cnt.load(Ordering::SeqCst) != threads.len() {
            std::thread::yield_now();
        }
        *self.threads.lock() = threads;
        Ok(())
    }

    pub(crate) fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Spawn `task` at `partition`, `from` is the partition of the spawner
    pub(crate) fn spawn_at<F>(
        self: &Arc<Self>,
        from: usize,
        partition: usize,
        task: F,
    ) -> TaskHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        assert!(
            partition < self.injectors.len(),
            "cannot spawn at partition {}, the world has {} partitions",
            partition,
            self.injectors.len()
        );
        Counters::incr(&self.counters.tasks_spawned, 1);
        if from != partition {
            Counters::incr(&self.counters.remote_spawns, 1);
        }
        let inj = self.injectors[partition].clone();
        let schedule = move |runnable: Runnable<usize>| inj.push(runnable);
        let (runnable, task) = Builder::new()
            .metadata(TASK_ID.fetch_add(1, Ordering::Relaxed))
            .spawn(
                move |_task_id| {
                    OnPartition::new(partition, AssertUnwindSafe(task).catch_unwind().boxed())
                },
                schedule,
            );
        tracing::trace!(
            "spawned task {} at partition {} from {}",
            task.metadata(),
            partition,
            from
        );
        runnable.schedule();
        TaskHandle {
            task: Some(task),
            executor: self.clone(),
            partition,
        }
    }

    /// Drive `fut` to completion on the calling thread, executing queued tasks while it is pending
    pub(crate) fn block_on<F: Future>(&self, fut: F) -> F::Output {
        let notify = Arc::new(BlockOnNotify(AtomicBool::new(true)));
        let waker = futures::task::waker(notify.clone());
        let cx = &mut Context::from_waker(&waker);
        let mut fut = std::pin::pin!(fut);
        let start = Instant::now();
        let mut timer = Instant::now();
        loop {
            if notify.0.swap(false, Ordering::SeqCst) {
                if let Poll::Ready(output) = fut.as_mut().poll(cx) {
                    return output;
                }
            }
            if !self.exec_task() {
                std::thread::yield_now();
            }
            if timer.elapsed().as_secs_f64() > config().deadlock_timeout {
                RuntimeWarning::JoinTimeout(start.elapsed().as_secs_f64()).print();
                timer = Instant::now();
            }
        }
    }

    /// Try to execute one queued task, preferring the calling thread's partition
    pub(crate) fn exec_task(&self) -> bool {
        let home = home_partition().unwrap_or(0);
        let ret = self.injectors[home % self.injectors.len()]
            .steal()
            .success()
            .or_else(|| self.injectors.iter().find_map(|inj| inj.steal().success()))
            .or_else(|| self.stealers.iter().find_map(|s| s.steal().success()));
        if let Some(runnable) = ret {
            runnable.run();
            true
        } else {
            false
        }
    }

    /// Stop accepting work once every queue has drained and join the worker threads
    pub(crate) fn shutdown(&self) {
        self.status
            .store(SchedulerStatus::Finished as u8, Ordering::SeqCst);
        let my_id = thread::current().id();
        let mut threads = self.threads.lock();
        while let Some(thread) = threads.pop() {
            if thread.thread().id() != my_id {
                let _res = thread.join();
            }
        }
        tracing::debug!("partition work stealing scheduler shut down");
    }
}

use std::sync::atomic::{AtomicBool, Ordering};

use crate::config;

static ENABLED: AtomicBool = AtomicBool::new(true);

pub(crate) enum RuntimeWarning<'a> {
    DroppedHandle(&'a str),
    BlockingCall(&'a str, &'a str),
    JoinTimeout(f64),
}

impl<'a> RuntimeWarning<'a> {
    pub(crate) fn set_enabled(enabled: bool) {
        ENABLED.store(enabled, Ordering::Relaxed);
    }
    fn print_warning(&self) -> bool {
        if ENABLED.load(Ordering::Relaxed) {
            match self {
                RuntimeWarning::DroppedHandle(_) => match config().dropped_handle_warning {
                    Some(true) => true,
                    Some(false) => false,
                    None => true,
                },
                RuntimeWarning::BlockingCall(_, _) => {
                    if crate::scheduler::on_worker_thread() {
                        match config().blocking_call_warning {
                            Some(true) => true,
                            Some(false) => false,
                            None => true,
                        }
                    } else {
                        false
                    }
                }
                RuntimeWarning::JoinTimeout(elapsed) => {
                    config().deadlock_timeout > 0.0
                        && elapsed > &config().deadlock_timeout
                        && config().join_warning.unwrap_or(true)
                }
            }
        } else {
            false
        }
    }

    pub(crate) fn print(self) {
        if self.print_warning() {
            let msg = match self {
                RuntimeWarning::DroppedHandle(msg) => {
                    format!("[MIGRANT WARNING] You are dropping {msg} that has not been joined or detached.
                    The task keeps running but its output is discarded. Set MIGRANT_DROPPED_HANDLE_WARNING=false to disable this warning.")
                }
                RuntimeWarning::BlockingCall(func, async_func) => {
                    format!("[MIGRANT WARNING] You are calling {func} from within a task on a worker thread, consider using {async_func} instead.
                    The worker will execute other queued tasks while it waits. Set MIGRANT_BLOCKING_CALL_WARNING=false to disable this warning.")
                }
                RuntimeWarning::JoinTimeout(elapsed) => {
                    format!("[MIGRANT WARNING][{:?}] A join has been waiting for {elapsed:.1} seconds. Potential deadlock detected.
                    A task that never completes blocks its enclosing apply indefinitely.
                    The timeout can be set via the MIGRANT_DEADLOCK_TIMEOUT environment variable, the current timeout is {} seconds, setting this to 0 will disable this warning.",
                        std::thread::current().id(), config().deadlock_timeout)
                }
            };
            tracing::warn!("{msg}");
        }
    }
}

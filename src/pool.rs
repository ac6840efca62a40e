/*
 * mserve - Interruptible, thread-dispatching TCP/UDP server core
 * This is free and unencumbered software released into the public domain.
 */
use std::fmt::{Display, Formatter};
use std::io::Result as IoResult;
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{Builder, JoinHandle};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use log::{error, trace};

pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Executes event handlers concurrently with the poll loop
///
/// A pool created with `workers = None` is *unbounded*: every task gets a
/// thread of its own, i.e. the pool grows with the load. A pool with a fixed
/// number of workers feeds them through a bounded queue; when that queue is
/// full, [`submit()`](WorkerPool::submit()) does **not** block but rejects the
/// task with [`SubmitError::Saturated`].
///
/// Dropping the pool never waits for running tasks. Use
/// [`join()`](WorkerPool::join()) to wait for the queue to drain.
#[derive(Debug)]
pub struct WorkerPool {
    mode: Mode,
}

#[derive(Debug)]
enum Mode {
    Unbounded,
    Fixed {
        sender: Sender<Task>,
        threads: Vec<JoinHandle<()>>,
    },
}

/// Why a task was not accepted by the [`WorkerPool`]
#[derive(Debug)]
pub enum SubmitError {
    /// All workers are busy and the queue is full; the task was dropped.
    Saturated,
    /// No worker thread could be spawned for the task.
    Spawn(std::io::Error),
    /// All worker threads have terminated.
    Closed,
}

impl WorkerPool {
    pub fn new(workers: Option<NonZeroUsize>, queue_depth: usize) -> IoResult<Self> {
        let mode = match workers {
            None => Mode::Unbounded,
            Some(count) => {
                let (sender, receiver) = crossbeam_channel::bounded::<Task>(queue_depth);
                let mut threads = Vec::with_capacity(count.get());
                for id in 0..count.get() {
                    let receiver = receiver.clone();
                    threads.push(Builder::new()
                        .name(format!("mserve-worker-{}", id))
                        .spawn(move || thread_worker(receiver))?);
                }
                Mode::Fixed { sender, threads }
            },
        };
        Ok(Self { mode })
    }

    /// Number of dedicated worker threads, `None` when unbounded.
    pub fn workers(&self) -> Option<usize> {
        match &self.mode {
            Mode::Unbounded => None,
            Mode::Fixed { threads, .. } => Some(threads.len()),
        }
    }

    /// Schedules `task` without waiting for it to run.
    pub fn submit<F>(&self, task: F) -> Result<(), SubmitError>
    where
        F: FnOnce() + Send + 'static,
    {
        match &self.mode {
            Mode::Unbounded => Builder::new()
                .name("mserve-handler".to_owned())
                .spawn(move || run_task(Box::new(task)))
                .map(|_detached| ())
                .map_err(SubmitError::Spawn),
            Mode::Fixed { sender, .. } => match sender.try_send(Box::new(task)) {
                Ok(_) => Ok(()),
                Err(TrySendError::Full(_)) => Err(SubmitError::Saturated),
                Err(TrySendError::Disconnected(_)) => Err(SubmitError::Closed),
            },
        }
    }

    /// Closes the queue and waits until all queued tasks have completed.
    /// Tasks of an unbounded pool are detached and not waited for.
    pub fn join(self) {
        if let Mode::Fixed { sender, threads } = self.mode {
            drop(sender);
            for thread in threads {
                if thread.join().is_err() {
                    error!("Worker thread terminated abnormally!");
                }
            }
        }
    }
}

fn thread_worker(receiver: Receiver<Task>) {
    while let Ok(task) = receiver.recv() {
        run_task(task);
    }
    trace!("Worker queue closed, worker exits");
}

fn run_task(task: Task) {
    if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
        error!("Event handler panicked!");
    }
}

impl Display for SubmitError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Saturated => write!(f, "The worker pool is saturated, the task was dropped!"),
            Self::Spawn(error) => write!(f, "Failed to spawn a handler thread: {}", error),
            Self::Closed => write!(f, "The worker pool has no workers left!"),
        }
    }
}

impl std::error::Error for SubmitError { }

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn fixed_pool_runs_all_tasks() {
        let pool = WorkerPool::new(NonZeroUsize::new(3), 64).unwrap();
        assert_eq!(pool.workers(), Some(3));
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..50 {
            let counter = counter.clone();
            pool.submit(move || { counter.fetch_add(1, Ordering::SeqCst); }).unwrap();
        }
        pool.join();
        assert_eq!(counter.load(Ordering::SeqCst), 50);
    }

    #[test]
    fn unbounded_pool_runs_tasks_concurrently() {
        let pool = WorkerPool::new(None, 1).unwrap();
        assert_eq!(pool.workers(), None);
        let (started_tx, started_rx) = crossbeam_channel::unbounded();
        let (release_tx, release_rx) = crossbeam_channel::unbounded::<()>();
        for n in 0..4 {
            let started_tx = started_tx.clone();
            let release_rx = release_rx.clone();
            pool.submit(move || {
                started_tx.send(n).unwrap();
                let _ = release_rx.recv();
            }).unwrap();
        }
        for _ in 0..4 {
            started_rx.recv_timeout(Duration::from_secs(5)).expect("task did not start concurrently");
        }
        drop(release_tx);
    }

    #[test]
    fn saturated_pool_rejects_without_blocking() {
        let pool = WorkerPool::new(NonZeroUsize::new(1), 1).unwrap();
        let (started_tx, started_rx) = crossbeam_channel::bounded(1);
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(0);

        pool.submit(move || {
            started_tx.send(()).unwrap();
            let _ = release_rx.recv();
        }).unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        pool.submit(|| ()).unwrap();
        assert!(matches!(pool.submit(|| ()), Err(SubmitError::Saturated)));

        drop(release_tx);
        pool.join();
    }

    #[test]
    fn panicking_task_does_not_kill_worker() {
        let pool = WorkerPool::new(NonZeroUsize::new(1), 8).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        pool.submit(|| panic!("handler failure")).unwrap();
        let other = counter.clone();
        pool.submit(move || { other.fetch_add(1, Ordering::SeqCst); }).unwrap();
        pool.join();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}

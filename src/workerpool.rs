// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Fixed fan-out worker-thread pool.
//!
//! Grounded on the original `CQsThreadPool`/`CQsWorkerThread`
//! (`QsThreadPool.h`): a small fixed-size pool of threads, each sitting in
//! a `Ready`/`RunTask`/`Quit` loop, released together to run one
//! [`Task`] and rendezvousing back at a barrier. The refcounted singleton
//! lifetime in the source (`s_Instance`/`s_nRefCount`) becomes an explicit
//! `Arc`-backed handle acquired with [`WorkerPool::acquire`] and dropped
//! normally rather than a raw global pointer.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, OnceLock, Weak};

use log::{debug, trace};

/// A data-parallel unit of work dispatched across the pool.
///
/// `run_task` is invoked once per worker with `instance_id` in
/// `0..task_count()` when `task_count() <= pool size`; workers beyond
/// `task_count()` still signal completion without doing work.
pub trait Task: Send + Sync {
    fn task_count(&self) -> usize;
    fn run_task(&self, instance_id: usize);
}

enum Command {
    Run { task: Arc<dyn Task>, instance_id: usize, completion: Arc<Completion> },
    Quit,
}

struct Completion {
    remaining: AtomicUsize,
    mutex: Mutex<()>,
    condvar: std::sync::Condvar,
}

impl Completion {
    fn new(count: usize) -> Self {
        Self { remaining: AtomicUsize::new(count), mutex: Mutex::new(()), condvar: std::sync::Condvar::new() }
    }

    fn signal(&self) {
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            let _guard = self.mutex.lock().unwrap();
            self.condvar.notify_all();
        }
    }

    fn wait(&self) {
        let mut guard = self.mutex.lock().unwrap();
        while self.remaining.load(Ordering::Acquire) != 0 {
            guard = self.condvar.wait(guard).unwrap();
        }
    }
}

/// The fixed-size worker-thread pool itself.
pub struct WorkerPool {
    senders: Vec<mpsc::Sender<Command>>,
    handles: Mutex<Vec<std::thread::JoinHandle<()>>>,
}

impl WorkerPool {
    /// Sizes the pool to `min(available_parallelism(), 4)`, a small
    /// constant no smaller than 2, falling back to 2 if the platform can't
    /// report a core count.
    fn size_from_host() -> usize {
        let cores = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(2);
        cores.clamp(2, 4)
    }

    pub(crate) fn new(size: usize) -> Self {
        let mut senders = Vec::with_capacity(size);
        let mut handles = Vec::with_capacity(size);

        for _ in 0..size {
            let (tx, rx) = mpsc::channel::<Command>();
            let handle = std::thread::spawn(move || {
                for command in rx {
                    match command {
                        Command::Run { task, instance_id, completion } => {
                            if instance_id < task.task_count() {
                                task.run_task(instance_id);
                            }
                            completion.signal();
                        }
                        Command::Quit => break,
                    }
                }
            });
            senders.push(tx);
            handles.push(handle);
        }

        debug!("worker pool started with {size} threads");
        Self { senders, handles: Mutex::new(handles) }
    }

    pub fn size(&self) -> usize {
        self.senders.len()
    }

    /// Runs `task` across the pool, blocking until complete.
    ///
    /// If `task.task_count() == 1` or the pool has one thread, the task
    /// runs inline on the caller's thread with no dispatch overhead.
    pub fn run(&self, task: Arc<dyn Task>) {
        let count = task.task_count();
        if count == 1 || self.senders.len() == 1 {
            trace!("worker pool: running task inline (task_count={count})");
            if count >= 1 {
                task.run_task(0);
            }
            return;
        }

        let completion = Arc::new(Completion::new(self.senders.len()));
        for (instance_id, sender) in self.senders.iter().enumerate() {
            let command =
                Command::Run { task: task.clone(), instance_id, completion: completion.clone() };
            let _ = sender.send(command);
        }
        completion.wait();
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for sender in &self.senders {
            let _ = sender.send(Command::Quit);
        }
        let mut handles = self.handles.lock().unwrap();
        for handle in handles.drain(..) {
            let _ = handle.join();
        }
    }
}

static SINGLETON: OnceLock<Mutex<Weak<WorkerPool>>> = OnceLock::new();

/// Acquires a handle to the process-wide worker pool, creating it on first
/// acquire and reusing it while any other handle is alive, so multiple
/// decoder instances share one pool.
pub fn acquire() -> Arc<WorkerPool> {
    let slot = SINGLETON.get_or_init(|| Mutex::new(Weak::new()));
    let mut guard = slot.lock().unwrap();

    if let Some(existing) = guard.upgrade() {
        return existing;
    }

    let pool = Arc::new(WorkerPool::new(WorkerPool::size_from_host()));
    *guard = Arc::downgrade(&pool);
    pool
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct CountingTask {
        count: usize,
        hits: Arc<AtomicU32>,
    }

    impl Task for CountingTask {
        fn task_count(&self) -> usize {
            self.count
        }

        fn run_task(&self, _instance_id: usize) {
            self.hits.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn run_inline_when_task_count_is_one() {
        let pool = WorkerPool::new(4);
        let hits = Arc::new(AtomicU32::new(0));
        let task = Arc::new(CountingTask { count: 1, hits: hits.clone() });
        pool.run(task);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn run_dispatches_to_all_workers() {
        let pool = WorkerPool::new(4);
        let hits = Arc::new(AtomicU32::new(0));
        let task = Arc::new(CountingTask { count: 4, hits: hits.clone() });
        pool.run(task);
        assert_eq!(hits.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn workers_beyond_task_count_still_signal_without_running() {
        let pool = WorkerPool::new(4);
        let hits = Arc::new(AtomicU32::new(0));
        let task = Arc::new(CountingTask { count: 2, hits: hits.clone() });
        pool.run(task);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn acquire_shares_one_instance_while_referenced() {
        let a = acquire();
        let b = acquire();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn pool_size_is_between_two_and_four() {
        let pool = WorkerPool::new(WorkerPool::size_from_host());
        assert!(pool.size() >= 2 && pool.size() <= 4);
    }
}

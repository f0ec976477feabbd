//! Thread marshaling for callbacks
//!
//! Network threads never run host callbacks directly. Ordinary callbacks are
//! handed to a [`UiDispatcher`], which the host drains on its UI thread.
//! Slow work (hub RPC handlers) runs on a [`WorkerPool`] so it cannot stall
//! message delivery.

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Unit of work marshaled between threads
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Hands a task to the host UI thread
pub trait UiDispatcher: Send + Sync {
    fn dispatch(&self, task: Task);
}

/// Runs tasks inline on the calling thread (headless hosts, tests)
#[derive(Debug, Default, Clone, Copy)]
pub struct ImmediateDispatcher;

impl UiDispatcher for ImmediateDispatcher {
    fn dispatch(&self, task: Task) {
        task();
    }
}

/// Queue drained by the host's UI thread
///
/// Any thread may [`dispatch`](UiDispatcher::dispatch); the owning thread
/// calls [`pump`](UiQueue::pump) or [`run_until`](UiQueue::run_until).
#[derive(Debug, Clone)]
pub struct UiQueue {
    tx: Sender<Task>,
    rx: Receiver<Task>,
}

impl UiQueue {
    pub fn new() -> Self {
        let (tx, rx) = channel::unbounded();
        Self { tx, rx }
    }

    /// Run every task queued so far; returns how many ran
    pub fn pump(&self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.rx.try_recv() {
            task();
            ran += 1;
        }
        ran
    }

    /// Run tasks as they arrive until `done` returns true
    ///
    /// `done` is checked after each task and at least every `poll`.
    pub fn run_until(&self, poll: Duration, mut done: impl FnMut() -> bool) {
        while !done() {
            match self.rx.recv_timeout(poll) {
                Ok(task) => task(),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        self.pump();
    }

    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}

impl Default for UiQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl UiDispatcher for UiQueue {
    fn dispatch(&self, task: Task) {
        // Receiver lives as long as self, so send cannot fail here
        let _ = self.tx.send(task);
    }
}

impl<D: UiDispatcher + ?Sized> UiDispatcher for Arc<D> {
    fn dispatch(&self, task: Task) {
        (**self).dispatch(task);
    }
}

/// Fixed set of named background threads fed from one channel
pub struct WorkerPool {
    tx: Option<Sender<Task>>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    completed: Arc<AtomicU64>,
}

impl WorkerPool {
    /// # Panics
    ///
    /// Panics if `size` is 0.
    pub fn new(name: &str, size: usize) -> Self {
        assert!(size > 0, "Worker pool size must be > 0");

        let (tx, rx) = channel::unbounded::<Task>();
        let shutdown = Arc::new(AtomicBool::new(false));
        let completed = Arc::new(AtomicU64::new(0));

        let workers = (0..size)
            .filter_map(|i| {
                let rx = rx.clone();
                let completed = Arc::clone(&completed);
                thread::Builder::new()
                    .name(format!("{name}-{i}"))
                    .spawn(move || Self::worker(rx, completed))
                    .map_err(|e| warn!(error = %e, "failed to spawn worker thread"))
                    .ok()
            })
            .collect();

        Self {
            tx: Some(tx),
            workers,
            shutdown,
            completed,
        }
    }

    /// Queue a task; returns false once the pool is shut down
    pub fn execute(&self, task: Task) -> bool {
        if self.shutdown.load(Ordering::Acquire) {
            return false;
        }
        match &self.tx {
            Some(tx) => tx.send(task).is_ok(),
            None => false,
        }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Tasks that have finished running
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Finish queued tasks and join every worker
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        // Closing the channel lets workers exit once it is drained
        self.tx.take();
        let current = thread::current().id();
        for handle in self.workers.drain(..) {
            // A task may drop the last owner of the pool from a worker
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }
    }

    fn worker(rx: Receiver<Task>, completed: Arc<AtomicU64>) {
        while let Ok(task) = rx.recv() {
            task();
            completed.fetch_add(1, Ordering::Relaxed);
        }
        debug!("worker thread exiting");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.workers.len())
            .field("completed", &self.completed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Instant;

    #[test]
    fn test_immediate_dispatcher_runs_inline() {
        let hits = Arc::new(AtomicU64::new(0));
        let h = Arc::clone(&hits);
        ImmediateDispatcher.dispatch(Box::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_ui_queue_runs_on_pumping_thread() {
        let queue = UiQueue::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let producer = {
            let queue = queue.clone();
            let seen = Arc::clone(&seen);
            thread::spawn(move || {
                for i in 0..3 {
                    let seen = Arc::clone(&seen);
                    queue.dispatch(Box::new(move || {
                        seen.lock().push((i, thread::current().id()));
                    }));
                }
            })
        };
        producer.join().unwrap();

        assert_eq!(queue.pending(), 3);
        assert_eq!(queue.pump(), 3);
        let seen = seen.lock();
        assert_eq!(seen.iter().map(|(i, _)| *i).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert!(seen.iter().all(|(_, id)| *id == thread::current().id()));
    }

    #[test]
    fn test_run_until_stops_on_condition() {
        let queue = UiQueue::new();
        let done = Arc::new(AtomicBool::new(false));
        let d = Arc::clone(&done);
        queue.dispatch(Box::new(move || d.store(true, Ordering::SeqCst)));

        let start = Instant::now();
        queue.run_until(Duration::from_millis(10), || done.load(Ordering::SeqCst));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_worker_pool_runs_tasks_off_thread() {
        let mut pool = WorkerPool::new("test-worker", 2);
        assert_eq!(pool.size(), 2);
        let caller = thread::current().id();
        let off_thread = Arc::new(AtomicU64::new(0));

        for _ in 0..10 {
            let off_thread = Arc::clone(&off_thread);
            assert!(pool.execute(Box::new(move || {
                if thread::current().id() != caller {
                    off_thread.fetch_add(1, Ordering::SeqCst);
                }
            })));
        }
        pool.shutdown();

        assert_eq!(off_thread.load(Ordering::SeqCst), 10);
        assert_eq!(pool.completed(), 10);
        assert!(!pool.execute(Box::new(|| {})));
    }

    #[test]
    fn test_slow_task_does_not_block_others() {
        let mut pool = WorkerPool::new("test-slow", 2);
        let (tx, rx) = channel::unbounded();
        pool.execute(Box::new(|| thread::sleep(Duration::from_millis(300))));
        pool.execute(Box::new(move || {
            let _ = tx.send(());
        }));
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_ok());
        pool.shutdown();
    }

    #[test]
    #[should_panic(expected = "Worker pool size must be > 0")]
    fn test_zero_size_pool_panics() {
        let _ = WorkerPool::new("x", 0);
    }
}

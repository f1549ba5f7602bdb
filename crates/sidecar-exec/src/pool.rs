use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::error::{ExecError, ExecResult};
use crate::executor::{panic_message, Executor, Task};

/// Configuration for [`ThreadPool`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadPoolConfig {
    /// Number of worker threads (at least one is started).
    pub threads: usize,
    /// Prefix of worker thread names.
    pub name: String,
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        Self {
            threads: thread::available_parallelism().map(usize::from).unwrap_or(4),
            name: "sidecar-worker".to_string(),
        }
    }
}

/// A fixed set of OS threads pulling tasks from a shared queue.
///
/// Dropping the pool closes the queue and joins the workers after they
/// drain the remaining tasks.
pub struct ThreadPool {
    sender: Mutex<Option<Sender<Task>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
}

impl ThreadPool {
    pub fn new(config: ThreadPoolConfig) -> ExecResult<Self> {
        let size = config.threads.max(1);
        let (tx, rx) = mpsc::channel::<Task>();
        let rx = Arc::new(Mutex::new(rx));

        let mut workers = Vec::with_capacity(size);
        for i in 0..size {
            let rx = Arc::clone(&rx);
            let handle = thread::Builder::new()
                .name(format!("{}-{i}", config.name))
                .spawn(move || worker_loop(&rx))?;
            workers.push(handle);
        }
        debug!(threads = size, name = %config.name, "thread pool started");

        Ok(Self {
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            size,
        })
    }

    /// Pool with `threads` workers and the default name.
    pub fn with_threads(threads: usize) -> ExecResult<Self> {
        Self::new(ThreadPoolConfig {
            threads,
            ..Default::default()
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Stop accepting tasks, let queued ones finish, and join the workers.
    pub fn shutdown(&self) {
        self.sender.lock().expect("lock poisoned").take();
        let workers = std::mem::take(&mut *self.workers.lock().expect("lock poisoned"));
        for worker in workers {
            if worker.join().is_err() {
                error!("worker thread exited with a panic");
            }
        }
    }
}

fn worker_loop(rx: &Mutex<Receiver<Task>>) {
    loop {
        let next = rx.lock().expect("lock poisoned").recv();
        let Ok(task) = next else {
            break;
        };
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
            error!(panic = %panic_message(payload), "task panicked");
        }
    }
}

impl Executor for ThreadPool {
    fn execute(&self, task: Task) -> ExecResult<()> {
        let sender = self.sender.lock().expect("lock poisoned");
        match sender.as_ref() {
            Some(tx) => tx.send(task).map_err(|_| ExecError::Closed),
            None => Err(ExecError::Closed),
        }
    }

    fn name(&self) -> &str {
        "thread-pool"
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{map, submit};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn runs_on_worker_threads() {
        let pool = ThreadPool::with_threads(2).unwrap();
        let name = submit(&pool, || thread::current().name().map(str::to_string))
            .unwrap()
            .wait()
            .unwrap();
        assert!(name.unwrap().starts_with("sidecar-worker-"));
    }

    #[test]
    fn map_over_pool() {
        let pool = ThreadPool::with_threads(3).unwrap();
        let out = map(&pool, 1..=100u64, |x| x * 2).unwrap();
        assert_eq!(out.iter().sum::<u64>(), 10_100);
        assert_eq!(out[0], 2);
        assert_eq!(out[99], 200);
    }

    #[test]
    fn panic_does_not_kill_workers() {
        let pool = ThreadPool::with_threads(1).unwrap();
        let bad = submit(&pool, || -> u8 { panic!("bad task") }).unwrap();
        assert!(matches!(bad.wait(), Err(ExecError::Panicked(_))));
        assert_eq!(submit(&pool, || 7).unwrap().wait().unwrap(), 7);
    }

    #[test]
    fn shutdown_drains_queue() {
        let pool = ThreadPool::with_threads(2).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..50 {
            let counter = Arc::clone(&counter);
            pool.execute(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        }
        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 50);
        assert!(matches!(pool.execute(Box::new(|| {})), Err(ExecError::Closed)));
    }
}

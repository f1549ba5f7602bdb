use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::Arc;

use crate::error::{ExecError, ExecResult};

/// A unit of work handed to an [`Executor`].
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs tasks somewhere: on the caller thread, a worker pool or a runtime.
pub trait Executor: Send + Sync {
    /// Schedule `task`. Fails only when the executor is shut down.
    fn execute(&self, task: Task) -> ExecResult<()>;

    /// Short name used in logs.
    fn name(&self) -> &str {
        "executor"
    }
}

/// Runs every task immediately on the calling thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct Inline;

impl Executor for Inline {
    fn execute(&self, task: Task) -> ExecResult<()> {
        task();
        Ok(())
    }

    fn name(&self) -> &str {
        "inline"
    }
}

impl<E: Executor + ?Sized> Executor for Arc<E> {
    fn execute(&self, task: Task) -> ExecResult<()> {
        (**self).execute(task)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Completion notification for a submitted job.
#[derive(Debug)]
pub struct JobHandle<T> {
    rx: Receiver<ExecResult<T>>,
}

impl<T> JobHandle<T> {
    /// Block until the job finishes.
    pub fn wait(self) -> ExecResult<T> {
        self.rx.recv().unwrap_or(Err(ExecError::Lost))
    }

    /// The result if the job has finished, `None` otherwise. A result is
    /// handed out once; later calls report [`ExecError::Lost`].
    pub fn try_wait(&mut self) -> Option<ExecResult<T>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(ExecError::Lost)),
        }
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Submit `f` to `executor` and get a handle to its result. A panic inside
/// `f` is caught and reported as [`ExecError::Panicked`].
pub fn submit<E, F, T>(executor: &E, f: F) -> ExecResult<JobHandle<T>>
where
    E: Executor + ?Sized,
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    executor.execute(Box::new(move || {
        let result = panic::catch_unwind(AssertUnwindSafe(f))
            .map_err(|payload| ExecError::Panicked(panic_message(payload)));
        // The receiver may be gone if the caller stopped waiting.
        let _ = tx.send(result);
    }))?;
    Ok(JobHandle { rx })
}

/// Apply `f` to every input on `executor`. Results keep input order.
pub fn map<E, I, F, T>(executor: &E, inputs: I, f: F) -> ExecResult<Vec<T>>
where
    E: Executor + ?Sized,
    I: IntoIterator,
    I::Item: Send + 'static,
    F: Fn(I::Item) -> T + Send + Sync + 'static,
    T: Send + 'static,
{
    let f = Arc::new(f);
    let handles = inputs
        .into_iter()
        .map(|input| {
            let f = Arc::clone(&f);
            submit(executor, move || f(input))
        })
        .collect::<ExecResult<Vec<_>>>()?;
    handles.into_iter().map(JobHandle::wait).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_runs_immediately() {
        let mut handle = submit(&Inline, || 40 + 2).unwrap();
        assert_eq!(handle.try_wait().unwrap().unwrap(), 42);
        assert!(matches!(handle.try_wait(), Some(Err(ExecError::Lost))));
    }

    #[test]
    fn panics_become_errors() {
        let handle = submit(&Inline, || -> u32 { panic!("boom") }).unwrap();
        match handle.wait() {
            Err(ExecError::Panicked(msg)) => assert_eq!(msg, "boom"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn map_keeps_order() {
        let out = map(&Inline, 0..5u64, |x| x * x).unwrap();
        assert_eq!(out, vec![0, 1, 4, 9, 16]);
    }

    #[test]
    fn arc_executor_forwards() {
        let ex: Arc<dyn Executor> = Arc::new(Inline);
        assert_eq!(ex.name(), "inline");
        assert_eq!(submit(&ex, || "x").unwrap().wait().unwrap(), "x");
    }
}

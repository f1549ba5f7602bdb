use tokio::runtime::Handle;

use crate::error::{ExecError, ExecResult};
use crate::executor::{Executor, Task};

/// Runs tasks on a tokio runtime's blocking thread pool.
#[derive(Clone, Debug)]
pub struct TokioExecutor {
    handle: Handle,
}

impl TokioExecutor {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Use the runtime the calling thread runs in.
    pub fn current() -> ExecResult<Self> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| ExecError::NoRuntime(e.to_string()))
    }
}

impl Executor for TokioExecutor {
    fn execute(&self, task: Task) -> ExecResult<()> {
        // The join handle is not needed: completion is reported by the task.
        drop(self.handle.spawn_blocking(task));
        Ok(())
    }

    fn name(&self) -> &str {
        "tokio"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{map, submit};

    #[test]
    fn blocking_jobs_on_runtime() {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .build()
            .unwrap();
        let ex = TokioExecutor::new(rt.handle().clone());
        assert_eq!(submit(&ex, || 5 * 5).unwrap().wait().unwrap(), 25);
        assert_eq!(map(&ex, ["a", "bb", "ccc"], str::len).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn current_requires_runtime() {
        assert!(matches!(TokioExecutor::current(), Err(ExecError::NoRuntime(_))));
        let rt = tokio::runtime::Runtime::new().unwrap();
        let _guard = rt.enter();
        assert!(TokioExecutor::current().is_ok());
    }
}

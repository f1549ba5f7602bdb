use std::io;

/// Errors produced while scheduling or awaiting jobs.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// The job panicked; the payload message is kept.
    #[error("job panicked: {0}")]
    Panicked(String),

    /// The job was dropped before it produced a result.
    #[error("job was dropped before completing")]
    Lost,

    /// The executor no longer accepts jobs.
    #[error("executor is shut down")]
    Closed,

    /// No tokio runtime is available on this thread.
    #[error("no tokio runtime: {0}")]
    NoRuntime(String),

    /// Spawning a worker thread failed.
    #[error("failed to spawn worker: {0}")]
    Spawn(#[from] io::Error),
}

pub type ExecResult<T> = Result<T, ExecError>;

//! Job execution for sidecar.
//!
//! Friend-store bookkeeping is single-threaded; file I/O is handed to an
//! [`Executor`] as independent jobs. Three backends are provided:
//!
//! - [`Inline`]: runs each job on the calling thread
//! - [`ThreadPool`]: fixed OS worker threads fed by a channel
//! - [`TokioExecutor`]: `spawn_blocking` on a tokio runtime
//!
//! [`submit`] returns a [`JobHandle`] for one job and [`map`] fans a function
//! out over many inputs. [`Deferred`] wraps work as a lazy node evaluated
//! later, alone or as a batch.

pub mod deferred;
pub mod error;
pub mod executor;
pub mod pool;
pub mod runtime;

pub use deferred::Deferred;
pub use error::{ExecError, ExecResult};
pub use executor::{map, submit, Executor, Inline, JobHandle, Task};
pub use pool::{ThreadPool, ThreadPoolConfig};
pub use runtime::TokioExecutor;

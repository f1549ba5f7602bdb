use std::fmt;

use crate::error::ExecResult;
use crate::executor::{submit, Executor};

/// A lazily evaluated value: nothing runs until [`compute`] or
/// [`compute_all`] is called.
///
/// [`compute`]: Deferred::compute
/// [`compute_all`]: Deferred::compute_all
pub struct Deferred<T> {
    label: String,
    thunk: Box<dyn FnOnce() -> T + Send + 'static>,
}

impl<T: Send + 'static> Deferred<T> {
    pub fn new<F>(label: impl Into<String>, f: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        Self {
            label: label.into(),
            thunk: Box::new(f),
        }
    }

    /// A node that already holds its value.
    pub fn ready(label: impl Into<String>, value: T) -> Self {
        Self::new(label, move || value)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Chain `f` after this node.
    pub fn map<U, F>(self, f: F) -> Deferred<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let thunk = self.thunk;
        Deferred {
            label: self.label,
            thunk: Box::new(move || f(thunk())),
        }
    }

    /// Evaluate on the calling thread.
    pub fn compute(self) -> T {
        (self.thunk)()
    }

    /// Evaluate every node on `executor`. Results keep node order.
    pub fn compute_all<E>(nodes: Vec<Deferred<T>>, executor: &E) -> ExecResult<Vec<T>>
    where
        E: Executor + ?Sized,
    {
        let handles = nodes
            .into_iter()
            .map(|node| submit(executor, node.thunk))
            .collect::<ExecResult<Vec<_>>>()?;
        handles.into_iter().map(|h| h.wait()).collect()
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred").field("label", &self.label).finish_non_exhaustive()
    }
}

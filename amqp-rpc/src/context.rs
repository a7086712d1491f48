//! The per-request context handed to every handler.

use std::sync::Arc;

/// Context carried through a single handler invocation.
///
/// The only value currently threaded through is the name of the queue the delivery was
/// received on. Implementers who need richer cancellation or tracing context should wrap this
/// value in their own types.
#[derive(Debug, Clone)]
pub struct Context {
    queue_name: Arc<str>,
}

impl Context {
    /// Creates a new context for a delivery received on `queue_name`.
    pub(crate) fn new(queue_name: impl Into<Arc<str>>) -> Self {
        Self {
            queue_name: queue_name.into(),
        }
    }

    /// Returns the name of the queue the delivery that produced this context was received on.
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }
}

//! Crate-specific error types.

use thiserror::Error as ThisError;

/// Errors that may be returned by this crate, especially when the server runs.
#[derive(Debug, ThisError)]
pub enum Error {
    /// The server was started with no handler bindings registered.
    #[error("No handler bindings were registered on the server.")]
    NoBindings,

    /// An error from an underlying `lapin` call.
    #[error("An underlying `lapin` call failed: {0}")]
    Lapin(#[from] lapin::Error),

    /// A consumer was cancelled by the broker (or the connection dropped) while the handler
    /// task for the given routing key was still waiting for deliveries.
    #[error("Consumer for routing key {0:?} was cancelled")]
    ConsumerCancelled(String),

    /// [`crate::Server::stop`] was called more than once for the same `listen_and_serve`
    /// invocation.
    #[error("Server::stop was called more than once")]
    AlreadyStopped,
}

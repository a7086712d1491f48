//! # amqp-rpc
//!
//! An RPC microservice framework over AMQP 0-9-1, built on top of
//! [lapin](https://github.com/amqp-rs/lapin).
//!
//! A [`Server`] binds [`Handler`]s to routing keys, consumes deliveries concurrently across a
//! pool of per-binding consumers, and publishes replies through a dedicated Responder task on
//! a connection separate from the one used to consume - so that backpressure on outgoing
//! publishes never stalls incoming deliveries. [`Request`] is the client-side envelope used to
//! issue a correlated call; the rest of the Client (the correlation-id map, the reply
//! consumer, the timeout scheduler) is intentionally out of scope for this crate.

// This crate is 100% Safe Rust.
#![forbid(unsafe_code)]
#![warn(
    // Warns on ::path, allows crate::path.
    absolute_paths_not_starting_with_crate,

    // Warns you about missing documentation comments.
    missing_docs,
    clippy::missing_docs_in_private_items,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,

    // Warns you when you have dependencies you're not using.
    unused_crate_dependencies,

    // Warns on converting values using the `as` keyword.
    clippy::as_conversions,
)]

// Re-exporting the underlying lapin version so you don't have to add the same version as a
// separate dependency.
pub use lapin;

pub mod ack;
pub mod binding;
pub mod context;
pub mod delivery;
pub mod error;
pub mod handler;
pub mod middleware;
mod processed;
pub mod request;
pub mod response;
pub mod server;
pub mod settings;

pub use ack::Acknowledger;
pub use binding::{ExchangeKind, HandlerBinding};
pub use context::Context;
pub use delivery::Delivery;
pub use error::Error;
pub use handler::Handler;
pub use middleware::{MiddlewareFn, Next};
pub use request::{ClientMiddleware, Request, RequestResponse};
pub use response::{Publishing, ResponseWriter};
pub use server::Server;
pub use settings::{ConsumeSettings, ExchangeDeclareSettings, QueueDeclareSettings};

/// Convenience type for a result with this crate's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

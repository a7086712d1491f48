//! The Server: the long-running RPC endpoint.
//!
//! [`Server::listen_and_serve`] loops over serve cycles, reconnecting with a 500 ms backoff on
//! any connection or topology error, until [`Server::stop`] is observed, at which point it
//! drains in-flight work in a fixed order before returning.

mod consumer;
mod responder;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lapin::options::QueueBindOptions;
use lapin::{Connection, ConnectionProperties};
use tokio::sync::{broadcast, mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::binding::HandlerBinding;
use crate::middleware::{self, MiddlewareFn};
use crate::{Error, Result};

/// How long [`Server::listen_and_serve`] waits before retrying after a failed serve cycle.
const RECONNECT_BACKOFF: Duration = Duration::from_millis(500);

/// Capacity of the internal response queue.
///
/// A rendezvous between each handler task and the Responder is the goal; `tokio::sync::mpsc`
/// requires capacity >= 1, so 1 is the closest practical approximation of an unbuffered channel.
const RESPONSE_QUEUE_CAPACITY: usize = 1;

/// Capacity of the close-notification channel: one slot per close sink (two connections, two
/// channels).
const CLOSE_NOTIFICATION_CAPACITY: usize = 4;

/// A long-running RPC endpoint bound to a set of routing keys.
///
/// Construct with [`Server::new`], register bindings with [`Server::bind`] and server-wide
/// middlewares with [`Server::with_middleware`], then run it with [`Server::listen_and_serve`].
/// [`Server::stop`] requests a graceful shutdown from any other task.
pub struct Server {
    addr: String,
    connection_properties: ConnectionProperties,
    bindings: Vec<HandlerBinding>,
    middlewares: Vec<MiddlewareFn>,
    stop_requested: Arc<AtomicBool>,
    stop_notify: Arc<Notify>,
}

impl Server {
    /// Creates a new server that will dial `addr` once [`Server::listen_and_serve`] runs.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            connection_properties: ConnectionProperties::default(),
            bindings: Vec::new(),
            middlewares: Vec::new(),
            stop_requested: Arc::new(AtomicBool::new(false)),
            stop_notify: Arc::new(Notify::new()),
        }
    }

    /// Overrides the `lapin` connection properties used to dial both connections.
    #[must_use]
    pub fn with_connection_properties(mut self, properties: ConnectionProperties) -> Self {
        self.connection_properties = properties;
        self
    }

    /// Registers a handler binding. Bindings are declared in registration order at the start
    /// of every serve cycle.
    #[must_use]
    pub fn bind(mut self, binding: HandlerBinding) -> Self {
        self.bindings.push(binding);
        self
    }

    /// Adds a server-wide middleware, applied to every binding's handler. The first-added
    /// middleware runs outermost.
    #[must_use]
    pub fn with_middleware(mut self, middleware: MiddlewareFn) -> Self {
        self.middlewares.push(middleware);
        self
    }

    /// Requests a graceful shutdown: the current serve cycle (or the next one, if called
    /// during the reconnect backoff) drains in-flight work and `listen_and_serve` returns.
    ///
    /// # Errors
    /// Returns [`Error::AlreadyStopped`] if called more than once for the same
    /// `listen_and_serve` invocation.
    pub fn stop(&self) -> Result<()> {
        if self.stop_requested.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyStopped);
        }
        self.stop_notify.notify_one();
        Ok(())
    }

    /// Runs the reconnect-with-backoff loop until a graceful stop completes.
    ///
    /// # Errors
    /// Returns [`Error::NoBindings`] if no bindings were registered.
    pub async fn listen_and_serve(&self) -> Result<()> {
        if self.bindings.is_empty() {
            return Err(Error::NoBindings);
        }

        loop {
            match self.serve_cycle().await {
                Ok(()) => {
                    info!("listen_and_serve returning after a graceful stop.");
                    return Ok(());
                }
                Err(e) => {
                    if self.stop_requested.load(Ordering::SeqCst) {
                        info!("Stop was requested during a failed serve cycle; not reconnecting.");
                        return Ok(());
                    }

                    error!("Serve cycle ended with an error, reconnecting in {RECONNECT_BACKOFF:?}: {e}");
                    tokio::time::sleep(RECONNECT_BACKOFF).await;
                }
            }
        }
    }

    /// Runs a single serve cycle: connect, declare topology, consume, and either drain
    /// gracefully on stop or return an error for the outer loop to reconnect on.
    async fn serve_cycle(&self) -> Result<()> {
        let input_conn =
            Connection::connect(&self.addr, self.connection_properties.clone()).await?;
        let output_conn =
            Connection::connect(&self.addr, self.connection_properties.clone()).await?;
        let input_channel = input_conn.create_channel().await?;
        let output_channel = output_conn.create_channel().await?;

        let (close_tx, mut close_rx) = mpsc::channel::<Error>(CLOSE_NOTIFICATION_CAPACITY);
        register_close_sink(&input_conn, close_tx.clone());
        register_close_sink(&output_conn, close_tx.clone());
        register_close_sink(&input_channel, close_tx.clone());
        register_close_sink(&output_channel, close_tx.clone());

        let (shutdown_tx, _) = broadcast::channel(1);
        let (responses_tx, responses_rx) = mpsc::channel(RESPONSE_QUEUE_CAPACITY);

        let mut consumer_handles = Vec::with_capacity(self.bindings.len());
        for binding in &self.bindings {
            let consumer = declare_and_consume(&input_channel, binding).await?;
            let handler = middleware::chain(binding.handler(), &self.middlewares);

            consumer_handles.push(tokio::spawn(consumer::run(
                binding.routing_key().to_owned(),
                binding.queue_name().to_owned(),
                handler,
                input_channel.clone(),
                consumer,
                responses_tx.clone(),
                shutdown_tx.subscribe(),
            )));
        }

        let (close_responses_tx, close_responses_rx) = oneshot::channel();
        let responder_handle = tokio::spawn(responder::run(
            output_channel.clone(),
            responses_rx,
            responses_tx.clone(),
            close_tx.clone(),
            close_responses_rx,
        ));

        let outcome = tokio::select! {
            biased;

            _ = self.stop_notify.notified() => {
                info!("Stop observed; beginning graceful drain.");
                drain(shutdown_tx, consumer_handles, close_responses_tx, responder_handle).await;
                Ok(())
            }

            Some(e) = close_rx.recv() => {
                warn!("Observed a close notification: {e}. Tearing down the cycle.");
                abort_all(consumer_handles, responder_handle).await;
                Err(e)
            }
        };

        let _ = input_channel.close(200, "going away").await;
        let _ = output_channel.close(200, "going away").await;
        let _ = input_conn.close(200, "going away").await;
        let _ = output_conn.close(200, "going away").await;

        outcome
    }
}

/// Declares a binding's queue (and, if named, its exchange and the bind between them), then
/// starts a consumer on it with a freshly generated consumer tag.
async fn declare_and_consume(
    channel: &lapin::Channel,
    binding: &HandlerBinding,
) -> Result<lapin::Consumer> {
    let queue_name = binding.queue_name();

    channel
        .queue_declare(
            queue_name,
            binding.queue_settings.options(),
            binding.queue_settings.arguments.clone(),
        )
        .await?;

    if !binding.exchange_name.is_empty() {
        channel
            .exchange_declare(
                &binding.exchange_name,
                binding.exchange_kind.into(),
                binding.exchange_settings.options(),
                binding.exchange_settings.arguments.clone(),
            )
            .await?;

        channel
            .queue_bind(
                queue_name,
                &binding.exchange_name,
                binding.routing_key(),
                QueueBindOptions {
                    nowait: binding.exchange_settings.no_wait,
                },
                binding.bind_arguments.clone(),
            )
            .await?;
    }

    let consumer_tag = Uuid::new_v4().to_string();
    debug!("Starting consumer {consumer_tag:?} on queue {queue_name:?}");

    let consumer = channel
        .basic_consume(
            queue_name,
            &consumer_tag,
            binding.consume_settings.options(),
            binding.consume_settings.arguments.clone(),
        )
        .await?;

    Ok(consumer)
}

/// Performs the graceful drain: broadcast shutdown, wait for every consumer to finish
/// (each cancels its own consumer tag first), signal the Responder to close the response
/// queue, then wait for it to drain whatever is already buffered.
async fn drain(
    shutdown_tx: broadcast::Sender<()>,
    consumer_handles: Vec<JoinHandle<Result<()>>>,
    close_responses_tx: oneshot::Sender<()>,
    responder_handle: JoinHandle<()>,
) {
    let _ = shutdown_tx.send(());

    for handle in consumer_handles {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("A consumer ended with an error during drain: {e}"),
            Err(e) => error!("A consumer task panicked during drain: {e}"),
        }
    }

    // Every consumer (and the delivery tasks it spawned) has returned, so no more responses
    // will ever be submitted. The Responder also holds a sender clone for re-enqueuing failed
    // publishes, so dropping ours wouldn't close the channel; tell it directly instead.
    let _ = close_responses_tx.send(());

    if let Err(e) = responder_handle.await {
        error!("Responder task panicked during drain: {e}");
    }
}

/// Aborts every still-running consumer and the Responder without waiting for them to drain,
/// used when a close notification (rather than a stop) ends the cycle.
async fn abort_all(consumer_handles: Vec<JoinHandle<Result<()>>>, responder_handle: JoinHandle<()>) {
    for handle in &consumer_handles {
        handle.abort();
    }
    responder_handle.abort();

    for handle in consumer_handles {
        let _ = handle.await;
    }
    let _ = responder_handle.await;
}

/// Registers a close-notification sink on a `lapin` resource exposing `on_error`, forwarding
/// the error onto `close_tx` so the serve cycle's `select!` can observe it.
fn register_close_sink<T>(resource: &T, close_tx: mpsc::Sender<Error>)
where
    T: OnError,
{
    resource.on_error(move |e| {
        if close_tx.try_send(Error::Lapin(e)).is_err() {
            debug!("Close notification dropped; the serve cycle has already moved on.");
        }
    });
}

/// Narrow trait covering the `on_error` callback registration shared by `lapin::Connection` and
/// `lapin::Channel`, so [`register_close_sink`] can be written once for both.
trait OnError {
    fn on_error<F: Fn(lapin::Error) + Send + 'static>(&self, handler: F);
}

impl OnError for Connection {
    fn on_error<F: Fn(lapin::Error) + Send + 'static>(&self, handler: F) {
        Connection::on_error(self, handler);
    }
}

impl OnError for lapin::Channel {
    fn on_error<F: Fn(lapin::Error) + Send + 'static>(&self, handler: F) {
        lapin::Channel::on_error(self, handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{context::Context, delivery::Delivery, response::ResponseWriter};

    async fn echo(_ctx: Context, writer: &mut ResponseWriter, delivery: &Delivery) {
        writer.write(delivery.data());
    }

    #[test]
    fn empty_server_refuses_bindings_check_before_connecting() {
        let server = Server::new("amqp://localhost");
        assert!(server.bindings.is_empty());
    }

    #[test]
    fn stop_is_rejected_the_second_time() {
        let server = Server::new("amqp://localhost").bind(HandlerBinding::new("echo", echo));
        assert!(server.stop().is_ok());
        assert!(matches!(server.stop(), Err(Error::AlreadyStopped)));
    }

    #[tokio::test]
    async fn listen_and_serve_rejects_a_server_with_no_bindings() {
        let server = Server::new("amqp://localhost");
        assert!(matches!(
            server.listen_and_serve().await,
            Err(Error::NoBindings)
        ));
    }
}

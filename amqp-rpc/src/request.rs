//! The client-facing request envelope.
//!
//! This models the value a Client builds and sends; the rest of the Client (correlation-id
//! mapping, the reply consumer, the timeout scheduler) lives outside this crate's scope.

use std::sync::Arc;
use std::time::Duration;

use lapin::types::{AMQPValue, FieldTable, ShortString};
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::response::Publishing;
use crate::Error;

/// A function a Client applies to the outgoing publishing immediately before send.
///
/// Request middlewares apply only to the send they were registered on, unlike server
/// middlewares, which apply to every handler invocation.
pub type ClientMiddleware = Arc<dyn Fn(&mut Publishing) + Send + Sync>;

/// The matched reply delivered to whoever is awaiting this request's response.
pub type RequestResponse = lapin::message::Delivery;

/// A client-built envelope describing one RPC call.
///
/// Created by [`Request::new`], mutated only through its builder methods, then consumed once a
/// send begins - no builder method may be called after that point ([`Request::freeze`]).
#[derive(Debug)]
pub struct Request {
    exchange: String,
    routing_key: String,
    reply: bool,
    timeout: Option<Duration>,
    publishing: Publishing,
    middlewares: Vec<ClientMiddleware>,
    response_tx: mpsc::Sender<RequestResponse>,
    response_rx: Option<mpsc::Receiver<RequestResponse>>,
    error_tx: mpsc::Sender<Error>,
    error_rx: Option<mpsc::Receiver<Error>>,
    retries: u32,
    frozen: bool,
}

impl Request {
    /// Builds a new request targeting `routing_key` on the default exchange, expecting a reply.
    pub fn new(routing_key: impl Into<String>) -> Self {
        let (response_tx, response_rx) = mpsc::channel(1);
        let (error_tx, error_rx) = mpsc::channel(1);

        Self {
            exchange: String::new(),
            routing_key: routing_key.into(),
            reply: true,
            timeout: None,
            publishing: Publishing::default(),
            middlewares: Vec::new(),
            response_tx,
            response_rx: Some(response_rx),
            error_tx,
            error_rx: Some(error_rx),
            retries: 0,
            frozen: false,
        }
    }

    /// Sets the target exchange (default: the default exchange, i.e. empty string).
    pub fn with_exchange(&mut self, exchange: impl Into<String>) -> &mut Self {
        self.assert_not_frozen();
        self.exchange = exchange.into();
        self
    }

    /// Replaces the headers wholesale.
    pub fn with_headers(&mut self, headers: FieldTable) -> &mut Self {
        self.assert_not_frozen();
        self.publishing.properties = self.publishing.properties.clone().with_headers(headers);
        self
    }

    /// Sets the request timeout, rounded to the nearest millisecond (half away from zero) when
    /// armed by [`Request::start_timeout`].
    pub fn with_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.assert_not_frozen();
        self.timeout = Some(timeout);
        self
    }

    /// Sets whether a reply is expected. When `false`, [`Request::take_error_receiver`] only
    /// ever fires for pre-publish failures; no response is awaited.
    pub fn with_reply(&mut self, reply: bool) -> &mut Self {
        self.assert_not_frozen();
        self.reply = reply;
        self
    }

    /// Sets the content type of the outgoing publishing.
    pub fn with_content_type(&mut self, content_type: impl Into<ShortString>) -> &mut Self {
        self.assert_not_frozen();
        self.publishing.properties = self
            .publishing
            .properties
            .clone()
            .with_content_type(content_type.into());
        self
    }

    /// Sets the request body from a string, replacing any bytes written so far.
    pub fn with_body(&mut self, body: impl Into<String>) -> &mut Self {
        self.assert_not_frozen();
        self.publishing.body = body.into().into_bytes();
        self
    }

    /// Appends bytes to the request body. Safe to call multiple times - repeated calls
    /// concatenate onto the existing body, exactly like N calls concatenating in one.
    pub fn write(&mut self, bytes: &[u8]) -> &mut Self {
        self.assert_not_frozen();
        self.publishing.body.extend_from_slice(bytes);
        self
    }

    /// Sets (inserting or overwriting) a single header.
    pub fn set_header(&mut self, key: impl Into<ShortString>, value: AMQPValue) -> &mut Self {
        self.assert_not_frozen();
        let mut headers = self
            .publishing
            .properties
            .headers()
            .clone()
            .unwrap_or_default();
        headers.insert(key.into(), value);
        self.publishing.properties = self.publishing.properties.clone().with_headers(headers);
        self
    }

    /// Adds a middleware applied to the outgoing publishing when the request is sent.
    pub fn add_middleware(&mut self, middleware: ClientMiddleware) -> &mut Self {
        self.assert_not_frozen();
        self.middlewares.push(middleware);
        self
    }

    /// Returns the target exchange.
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Returns the target routing key.
    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    /// Returns whether a reply is expected.
    pub fn expects_reply(&self) -> bool {
        self.reply
    }

    /// Returns the configured timeout, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Returns the number of retries attempted so far.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Increments the retry count. Called by whatever drives the send/retry loop (this crate
    /// only models the envelope; retrying a send is the caller's responsibility).
    pub fn record_retry(&mut self) {
        self.retries += 1;
    }

    /// Returns the sender half of the response sink, for the caller's reply consumer to push
    /// the matched reply into once it arrives.
    pub fn response_sender(&self) -> mpsc::Sender<RequestResponse> {
        self.response_tx.clone()
    }

    /// Returns the sender half of the error sink, for pre-publish and send failures.
    pub fn error_sender(&self) -> mpsc::Sender<Error> {
        self.error_tx.clone()
    }

    /// Takes the receiver half of the response sink. Returns `None` if already taken.
    pub fn take_response_receiver(&mut self) -> Option<mpsc::Receiver<RequestResponse>> {
        self.response_rx.take()
    }

    /// Takes the receiver half of the error sink. Returns `None` if already taken.
    pub fn take_error_receiver(&mut self) -> Option<mpsc::Receiver<Error>> {
        self.error_rx.take()
    }

    /// Runs every registered middleware over the outgoing publishing, outer-first (first
    /// registered applies first), and returns the finished publishing.
    pub(crate) fn build_publishing(&self) -> Publishing {
        let mut publishing = self.publishing.clone();
        for middleware in &self.middlewares {
            middleware(&mut publishing);
        }
        publishing
    }

    /// Freezes the request: from this point on, builder methods panic instead of mutating.
    /// Called by the Client once a send begins.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    fn assert_not_frozen(&self) {
        if self.frozen {
            panic!("amqp_rpc::Request mutated after send had already begun");
        }
    }

    /// Arms the timeout: sets the publishing's `expiration` property to the timeout in integer
    /// milliseconds (rounded to the nearest millisecond, half away from zero) as a decimal
    /// string, and returns a one-shot receiver that fires once the timeout elapses.
    ///
    /// Broker-side expiration prevents an orphaned message from sitting in the reply queue
    /// forever; the returned receiver lets the caller stop waiting even if the broker never
    /// gets to discard the message.
    pub fn start_timeout(&mut self) -> Option<oneshot::Receiver<()>> {
        let timeout = self.timeout?;
        let rounded = round_millis(timeout);

        self.publishing.properties = self
            .publishing
            .properties
            .clone()
            .with_expiration(ShortString::from(rounded.to_string()));

        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(rounded)).await;
            if tx.send(()).is_err() {
                warn!("request timeout fired after its receiver was already dropped");
            }
        });

        Some(rx)
    }
}

/// Rounds a duration to the nearest millisecond, half away from zero.
fn round_millis(duration: Duration) -> u64 {
    let millis = (duration.as_micros() + 500) / 1000;
    u64::try_from(millis).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_request_expects_reply_with_no_timeout() {
        let request = Request::new("echo");
        assert_eq!(request.routing_key(), "echo");
        assert_eq!(request.exchange(), "");
        assert!(request.expects_reply());
        assert_eq!(request.timeout(), None);
    }

    #[test]
    fn write_is_idempotent_across_calls() {
        let mut a = Request::new("echo");
        a.write(b"hello").write(b" world");

        let mut b = Request::new("echo");
        b.write(b"hello world");

        assert_eq!(a.build_publishing().body, b.build_publishing().body);
    }

    #[test]
    fn with_body_replaces_prior_writes() {
        let mut request = Request::new("echo");
        request.write(b"stale").with_body("fresh");
        assert_eq!(request.build_publishing().body, b"fresh");
    }

    #[test]
    fn timeout_rounds_half_away_from_zero() {
        assert_eq!(round_millis(Duration::from_micros(1_499)), 1);
        assert_eq!(round_millis(Duration::from_micros(1_500)), 2);
    }

    #[tokio::test]
    async fn start_timeout_sets_expiration_to_rounded_milliseconds() {
        let mut request = Request::new("echo");
        request.with_timeout(Duration::from_micros(1_500));
        let timer = request.start_timeout();
        assert!(timer.is_some());
        assert_eq!(
            request
                .build_publishing()
                .properties
                .expiration()
                .as_ref()
                .map(ShortString::as_str),
            Some("2")
        );
    }

    #[test]
    fn start_timeout_without_timeout_returns_none() {
        let mut request = Request::new("echo");
        assert!(request.start_timeout().is_none());
    }

    #[test]
    #[should_panic(expected = "mutated after send had already begun")]
    fn builder_methods_panic_once_frozen() {
        let mut request = Request::new("echo");
        request.freeze();
        request.with_body("too late");
    }

    #[test]
    fn middlewares_run_outer_first_over_the_publishing() {
        let mut request = Request::new("echo");
        request
            .add_middleware(Arc::new(|publishing: &mut Publishing| {
                publishing.body.push(b'1');
            }))
            .add_middleware(Arc::new(|publishing: &mut Publishing| {
                publishing.body.push(b'2');
            }));

        assert_eq!(request.build_publishing().body, b"12");
    }

    #[test]
    fn take_response_receiver_is_single_use() {
        let mut request = Request::new("echo");
        assert!(request.take_response_receiver().is_some());
        assert!(request.take_response_receiver().is_none());
    }
}

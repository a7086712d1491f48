//! The outbound message envelope and the handler-facing writer around it.

use lapin::types::{AMQPValue, ShortString};
use lapin::BasicProperties;

/// An outbound AMQP message: the body plus the properties that travel alongside it.
///
/// This bundles what `lapin` splits into a `BasicProperties` value and a separate body byte
/// slice into a single value.
#[derive(Debug, Clone)]
pub struct Publishing {
    /// The message body.
    pub body: Vec<u8>,
    /// The message properties (content type, headers, correlation id, expiration, ...).
    pub properties: BasicProperties,
}

impl Default for Publishing {
    fn default() -> Self {
        Self {
            body: Vec::new(),
            properties: BasicProperties::default()
                .with_content_type(ShortString::from(ResponseWriter::DEFAULT_CONTENT_TYPE)),
        }
    }
}

/// The handler's public surface for producing a reply.
///
/// A `ResponseWriter` is seeded with the inbound delivery's correlation id before the handler
/// runs. Handlers write to it and the consumer pool publishes whatever is left in it once the
/// handler returns (unless the binding has no reply-to, in which case the writer is discarded).
#[derive(Debug, Clone)]
pub struct ResponseWriter {
    publishing: Publishing,
    mandatory: bool,
    immediate: bool,
}

impl ResponseWriter {
    /// The default content type used for outgoing publishings.
    pub const DEFAULT_CONTENT_TYPE: &'static str = "text/plain";

    /// Creates a new writer, pre-populating the correlation id from the inbound delivery.
    pub(crate) fn new(correlation_id: Option<ShortString>) -> Self {
        let mut publishing = Publishing::default();
        if let Some(correlation_id) = correlation_id {
            publishing.properties = publishing.properties.with_correlation_id(correlation_id);
        }

        Self {
            publishing,
            mandatory: false,
            immediate: false,
        }
    }

    /// Appends `bytes` to the response body. Safe to call multiple times - repeated calls
    /// concatenate onto the existing body.
    pub fn write(&mut self, bytes: &[u8]) -> &mut Self {
        self.publishing.body.extend_from_slice(bytes);
        self
    }

    /// Sets (inserting or overwriting) a single header on the response.
    pub fn set_header(&mut self, key: impl Into<ShortString>, value: AMQPValue) -> &mut Self {
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

    /// Sets the `mandatory` publish flag.
    pub fn set_mandatory(&mut self, mandatory: bool) -> &mut Self {
        self.mandatory = mandatory;
        self
    }

    /// Sets the `immediate` publish flag.
    pub fn set_immediate(&mut self, immediate: bool) -> &mut Self {
        self.immediate = immediate;
        self
    }

    /// Sets the content type of the response.
    pub fn set_content_type(&mut self, content_type: impl Into<ShortString>) -> &mut Self {
        self.publishing.properties = self
            .publishing
            .properties
            .clone()
            .with_content_type(content_type.into());
        self
    }

    /// Replaces the entire publishing wholesale, keeping the mandatory/immediate flags.
    pub fn set_publishing(&mut self, publishing: Publishing) -> &mut Self {
        self.publishing = publishing;
        self
    }

    /// Returns the mandatory flag.
    pub fn mandatory(&self) -> bool {
        self.mandatory
    }

    /// Returns the immediate flag.
    pub fn immediate(&self) -> bool {
        self.immediate
    }

    /// Returns a reference to the publishing built up so far.
    pub fn publishing(&self) -> &Publishing {
        &self.publishing
    }
}

//! Bindings: the association between a routing key and the handler invoked for it.

use std::sync::Arc;

use lapin::types::FieldTable;

use crate::handler::Handler;
use crate::settings::{ConsumeSettings, ExchangeDeclareSettings, QueueDeclareSettings};

/// The kind of exchange a binding declares against.
///
/// Kept distinct from `lapin::ExchangeKind` so bindings can only carry the small set this crate
/// actually declares, without pulling `lapin::ExchangeKind`'s `Custom` variant into the public
/// surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    /// Deliver to the queue whose name matches the routing key exactly.
    Direct,
    /// Deliver to every bound queue, ignoring the routing key.
    Fanout,
    /// Deliver by pattern-matching the routing key against each binding's pattern.
    Topic,
    /// Deliver by matching the delivery's headers against each binding's arguments.
    Headers,
}

impl From<ExchangeKind> for lapin::ExchangeKind {
    fn from(kind: ExchangeKind) -> Self {
        match kind {
            ExchangeKind::Direct => lapin::ExchangeKind::Direct,
            ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
            ExchangeKind::Topic => lapin::ExchangeKind::Topic,
            ExchangeKind::Headers => lapin::ExchangeKind::Headers,
        }
    }
}

/// A single routing key bound to a handler.
///
/// A bound `Server` declares the exchange (unless it is the default exchange), declares and
/// binds a queue per binding, and dedicates one consumer to it.
pub struct HandlerBinding {
    pub(crate) routing_key: String,
    pub(crate) exchange_name: String,
    pub(crate) exchange_kind: ExchangeKind,
    pub(crate) bind_arguments: FieldTable,
    pub(crate) exchange_settings: ExchangeDeclareSettings,
    pub(crate) queue_settings: QueueDeclareSettings,
    pub(crate) consume_settings: ConsumeSettings,
    pub(crate) handler: Arc<dyn Handler>,
}

impl HandlerBinding {
    /// Binds `routing_key` against the default (unnamed, always-present) direct exchange.
    pub fn new(routing_key: impl Into<String>, handler: impl Handler) -> Self {
        Self {
            routing_key: routing_key.into(),
            exchange_name: String::new(),
            exchange_kind: ExchangeKind::Direct,
            bind_arguments: FieldTable::default(),
            exchange_settings: ExchangeDeclareSettings::default(),
            queue_settings: QueueDeclareSettings::default(),
            consume_settings: ConsumeSettings::default(),
            handler: Arc::new(handler),
        }
    }

    /// Binds this handler against a named exchange of the given kind instead of the default
    /// exchange.
    #[must_use]
    pub fn with_exchange(mut self, name: impl Into<String>, kind: ExchangeKind) -> Self {
        self.exchange_name = name.into();
        self.exchange_kind = kind;
        self
    }

    /// Sets the headers-exchange bind arguments matched against a delivery's headers.
    ///
    /// Only meaningful when [`ExchangeKind::Headers`] is used.
    #[must_use]
    pub fn with_bind_arguments(mut self, arguments: FieldTable) -> Self {
        self.bind_arguments = arguments;
        self
    }

    /// Overrides the exchange-declare settings (default: durable, not auto-deleted).
    #[must_use]
    pub fn with_exchange_settings(mut self, settings: ExchangeDeclareSettings) -> Self {
        self.exchange_settings = settings;
        self
    }

    /// Overrides the queue-declare settings for this binding's dedicated queue.
    #[must_use]
    pub fn with_queue_settings(mut self, settings: QueueDeclareSettings) -> Self {
        self.queue_settings = settings;
        self
    }

    /// Overrides the consume settings (prefetch, consumer tag, exclusivity) for this binding.
    #[must_use]
    pub fn with_consume_settings(mut self, settings: ConsumeSettings) -> Self {
        self.consume_settings = settings;
        self
    }

    /// Returns the routing key this binding matches.
    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    /// Returns the queue name this binding declares - always the routing key, one queue per
    /// routing key.
    pub(crate) fn queue_name(&self) -> &str {
        &self.routing_key
    }

    /// Returns a fresh handle to this binding's handler, ready to be wrapped in the server's
    /// middleware chain.
    pub(crate) fn handler(&self) -> Arc<dyn Handler> {
        self.handler.clone()
    }
}

impl std::fmt::Debug for HandlerBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerBinding")
            .field("routing_key", &self.routing_key)
            .field("exchange_name", &self.exchange_name)
            .field("exchange_kind", &self.exchange_kind)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{context::Context, delivery::Delivery, response::ResponseWriter};

    async fn echo(_ctx: Context, _writer: &mut ResponseWriter, _delivery: &Delivery) {}

    #[test]
    fn default_binding_targets_the_default_exchange() {
        let binding = HandlerBinding::new("my.routing.key", echo);
        assert_eq!(binding.routing_key(), "my.routing.key");
        assert_eq!(binding.exchange_name, "");
        assert_eq!(binding.exchange_kind, ExchangeKind::Direct);
    }

    #[test]
    fn with_exchange_overrides_name_and_kind() {
        let binding = HandlerBinding::new("events.created", echo)
            .with_exchange("events", ExchangeKind::Topic);
        assert_eq!(binding.exchange_name, "events");
        assert_eq!(binding.exchange_kind, ExchangeKind::Topic);
    }
}

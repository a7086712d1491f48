//! Declare/consume settings: typed wrappers around the `lapin` option structs.
//!
//! These exist so callers configure declarations with named setters instead of constructing
//! `lapin`'s `*Options` structs and a separate `FieldTable` by hand. Default exchange durability
//! is `true`; everything else defaults to zero-valued/`false`.

use lapin::options::{BasicConsumeOptions, ExchangeDeclareOptions, QueueDeclareOptions};
use lapin::types::FieldTable;

/// Settings used when declaring a binding's exchange (skipped entirely for the default
/// exchange, which always exists and cannot be declared).
#[derive(Debug, Clone)]
pub struct ExchangeDeclareSettings {
    /// Whether the exchange survives a broker restart. Defaults to `true`.
    pub durable: bool,
    /// Whether the broker deletes the exchange once its last queue is unbound.
    pub auto_delete: bool,
    /// Whether the exchange is internal (not directly publishable to).
    pub internal: bool,
    /// Whether to skip waiting for the broker's declare confirmation.
    pub no_wait: bool,
    /// Additional arguments passed to the broker.
    pub arguments: FieldTable,
}

impl Default for ExchangeDeclareSettings {
    fn default() -> Self {
        Self {
            durable: true,
            auto_delete: false,
            internal: false,
            no_wait: false,
            arguments: FieldTable::default(),
        }
    }
}

impl ExchangeDeclareSettings {
    pub(crate) fn options(&self) -> ExchangeDeclareOptions {
        ExchangeDeclareOptions {
            durable: self.durable,
            auto_delete: self.auto_delete,
            internal: self.internal,
            nowait: self.no_wait,
            ..ExchangeDeclareOptions::default()
        }
    }
}

/// Settings used when declaring a binding's dedicated queue.
#[derive(Debug, Clone)]
pub struct QueueDeclareSettings {
    /// Whether the queue survives a broker restart. Defaults to `true`.
    pub durable: bool,
    /// Whether the broker deletes the queue once its last consumer disconnects.
    pub delete_when_unused: bool,
    /// Whether the queue is restricted to its declaring connection.
    pub exclusive: bool,
    /// Whether to skip waiting for the broker's declare confirmation.
    pub no_wait: bool,
    /// Additional arguments (message TTL, dead-letter exchange, expiry, ...) passed to the
    /// broker.
    pub arguments: FieldTable,
}

impl Default for QueueDeclareSettings {
    fn default() -> Self {
        Self {
            durable: true,
            delete_when_unused: false,
            exclusive: false,
            no_wait: false,
            arguments: FieldTable::default(),
        }
    }
}

impl QueueDeclareSettings {
    pub(crate) fn options(&self) -> QueueDeclareOptions {
        QueueDeclareOptions {
            durable: self.durable,
            auto_delete: self.delete_when_unused,
            exclusive: self.exclusive,
            nowait: self.no_wait,
            ..QueueDeclareOptions::default()
        }
    }
}

/// Settings used when starting a binding's consumer.
#[derive(Debug, Clone)]
pub struct ConsumeSettings {
    /// Whether the broker should consider deliveries pre-acknowledged. The consumer pool's
    /// acknowledgment wrapper and auto-ack step assume this stays `false`; set it only if you
    /// also bypass [`crate::delivery::Delivery::ack`].
    pub auto_ack: bool,
    /// Whether the consumer is restricted to its declaring connection.
    pub exclusive: bool,
    /// Whether to refuse deliveries published on the same connection.
    pub no_local: bool,
    /// Whether to skip waiting for the broker's consume confirmation.
    pub no_wait: bool,
    /// Additional consumer arguments passed to the broker.
    pub arguments: FieldTable,
}

impl Default for ConsumeSettings {
    fn default() -> Self {
        Self {
            auto_ack: false,
            exclusive: false,
            no_local: false,
            no_wait: false,
            arguments: FieldTable::default(),
        }
    }
}

impl ConsumeSettings {
    pub(crate) fn options(&self) -> BasicConsumeOptions {
        BasicConsumeOptions {
            no_local: self.no_local,
            no_ack: self.auto_ack,
            exclusive: self.exclusive,
            nowait: self.no_wait,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exchange_defaults_are_durable_and_external() {
        let settings = ExchangeDeclareSettings::default();
        assert!(settings.durable);
        assert!(!settings.internal);
        assert!(!settings.auto_delete);
    }

    #[test]
    fn queue_defaults_are_durable_and_shared() {
        let settings = QueueDeclareSettings::default();
        assert!(settings.durable);
        assert!(!settings.exclusive);
    }

    #[test]
    fn consume_defaults_to_manual_ack() {
        assert!(!ConsumeSettings::default().auto_ack);
        assert!(!ConsumeSettings::default().options().no_ack);
    }
}

//! The inbound delivery handed to handlers, with its acknowledgment wrapper installed.

use std::ops::Deref;

use lapin::message::Delivery as LapinDelivery;
use lapin::protocol::basic::AMQPProperties;

use crate::ack::Acknowledger;

/// A single inbound AMQP message, with the acknowledgment wrapper already installed.
///
/// Derefs to the underlying `lapin::message::Delivery` for read access to the body, routing
/// key, exchange and properties. Acknowledgment must go through [`Delivery::ack`],
/// [`Delivery::nack`] or [`Delivery::reject`] so that the consumer pool can tell whether the
/// handler already took care of it.
#[derive(Debug, Clone)]
pub struct Delivery {
    inner: LapinDelivery,
    ack: Acknowledger,
}

impl Delivery {
    /// Installs a fresh [`Acknowledger`] around `inner`.
    pub(crate) fn new(inner: LapinDelivery) -> Self {
        let ack = Acknowledger::new(inner.acker.clone());
        Self { inner, ack }
    }

    /// Acks this delivery.
    ///
    /// # Errors
    /// Returns `Err` if the underlying `lapin` ack fails.
    pub async fn ack(&self, options: lapin::options::BasicAckOptions) -> lapin::Result<()> {
        self.ack.ack(options).await
    }

    /// Nacks this delivery.
    ///
    /// # Errors
    /// Returns `Err` if the underlying `lapin` nack fails.
    pub async fn nack(&self, options: lapin::options::BasicNackOptions) -> lapin::Result<()> {
        self.ack.nack(options).await
    }

    /// Rejects this delivery.
    ///
    /// # Errors
    /// Returns `Err` if the underlying `lapin` reject fails.
    pub async fn reject(&self, options: lapin::options::BasicRejectOptions) -> lapin::Result<()> {
        self.ack.reject(options).await
    }

    /// Returns whether this delivery has already been ack'd, nack'd or rejected.
    pub fn is_handled(&self) -> bool {
        self.ack.is_handled()
    }

    /// Returns the AMQP properties (including `correlation_id` and `reply_to`) of this delivery.
    pub fn properties(&self) -> &AMQPProperties {
        &self.inner.properties
    }

    /// Returns the body of this delivery.
    pub fn data(&self) -> &[u8] {
        &self.inner.data
    }
}

impl Deref for Delivery {
    type Target = LapinDelivery;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lapin::acker::Acker;
    use lapin::types::ShortString;

    fn lapin_delivery() -> LapinDelivery {
        LapinDelivery {
            delivery_tag: 1,
            exchange: ShortString::from(""),
            routing_key: ShortString::from("echo"),
            redelivered: false,
            properties: Default::default(),
            data: b"hello".to_vec(),
            acker: Acker::default(),
        }
    }

    #[test]
    fn new_installs_a_fresh_unhandled_acknowledger() {
        let delivery = Delivery::new(lapin_delivery());
        assert!(!delivery.is_handled());
        assert_eq!(delivery.data(), b"hello");
    }
}

//! The acknowledgment wrapper installed on every inbound delivery.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use lapin::acker::Acker as LapinAcker;
use lapin::options::{BasicAckOptions, BasicNackOptions, BasicRejectOptions};

/// Wraps the broker-provided acker for a delivery, tracking whether the delivery has already
/// been acknowledged, negatively acknowledged or rejected.
///
/// The consumer pool installs one of these on every delivery before invoking the handler. If
/// the handler returns without acknowledging, the consumer pool auto-acks on its behalf.
#[derive(Debug, Clone)]
pub struct Acknowledger {
    acker: LapinAcker,
    handled: Arc<AtomicBool>,
}

impl Acknowledger {
    /// Wraps `acker`, starting out unhandled.
    pub(crate) fn new(acker: LapinAcker) -> Self {
        Self {
            acker,
            handled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Acks the delivery.
    ///
    /// # Errors
    /// Returns `Err` if the underlying `lapin` ack fails.
    pub async fn ack(&self, options: BasicAckOptions) -> lapin::Result<()> {
        self.acker.ack(options).await?;
        self.handled.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Nacks the delivery.
    ///
    /// # Errors
    /// Returns `Err` if the underlying `lapin` nack fails.
    pub async fn nack(&self, options: BasicNackOptions) -> lapin::Result<()> {
        self.acker.nack(options).await?;
        self.handled.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Rejects the delivery.
    ///
    /// # Errors
    /// Returns `Err` if the underlying `lapin` reject fails.
    pub async fn reject(&self, options: BasicRejectOptions) -> lapin::Result<()> {
        self.acker.reject(options).await?;
        self.handled.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Returns whether the delivery has already been ack'd, nack'd or rejected.
    pub fn is_handled(&self) -> bool {
        self.handled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_unhandled() {
        let ack = Acknowledger::new(LapinAcker::default());
        assert!(!ack.is_handled());
    }

    #[tokio::test]
    async fn failed_ack_does_not_mark_handled() {
        // The default acker has no real channel behind it, so the ack call fails. A failed
        // acknowledgment must not flip the handled flag - only a successful one may.
        let ack = Acknowledger::new(LapinAcker::default());
        assert!(ack.ack(BasicAckOptions::default()).await.is_err());
        assert!(!ack.is_handled());
    }

    #[test]
    fn clone_shares_handled_state() {
        let ack = Acknowledger::new(LapinAcker::default());
        let clone = ack.clone();
        clone.handled.store(true, Ordering::SeqCst);
        assert!(ack.is_handled());
    }
}

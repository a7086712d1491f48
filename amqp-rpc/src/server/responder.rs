//! The Responder: the sole consumer of the internal response queue.

use futures::FutureExt;
use lapin::options::BasicPublishOptions;
use lapin::Channel;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use crate::processed::ProcessedRequest;
use crate::Error;

/// Default exchange name a reply is published against - the inbound delivery's `reply_to` is
/// always a queue name, which the default exchange routes to directly.
const DEFAULT_EXCHANGE: &str = "";

/// Drains `responses` and publishes each processed request on `channel`.
///
/// On a publish failure: logs the error, signals the connection supervisor via `close_tx` so
/// the current serve cycle tears down and reconnects, makes a best-effort attempt to push the
/// failed response back onto `requeue` for a future cycle's Responder to retry, then returns.
/// The re-enqueue is best-effort: if the queue has already been closed (drain in progress),
/// the response is dropped and the loss is logged - the framework trades at-least-once
/// semantics for forward progress on transient publish failures here.
///
/// `close_responses` fires once the consumer pool has finished draining and will never submit
/// another response; from that point `responses` is closed for further sends (holding a clone
/// of its sender, as `requeue` does, no longer keeps it open) and this task exits once whatever
/// is already buffered has been published.
///
/// Returns normally once `responses` is exhausted.
pub(crate) async fn run(
    channel: Channel,
    mut responses: mpsc::Receiver<ProcessedRequest>,
    requeue: mpsc::Sender<ProcessedRequest>,
    close_tx: mpsc::Sender<Error>,
    close_responses: oneshot::Receiver<()>,
) {
    let mut close_responses = close_responses.fuse();

    loop {
        let processed = tokio::select! {
            biased;

            _ = &mut close_responses => {
                debug!("Closing the response queue; draining whatever is already buffered.");
                responses.close();
                continue;
            }

            maybe_processed = responses.recv() => match maybe_processed {
                Some(processed) => processed,
                None => break,
            },
        };

        let reply_to = processed.reply_to.as_str().to_owned();

        let result = async {
            channel
                .basic_publish(
                    DEFAULT_EXCHANGE,
                    &reply_to,
                    BasicPublishOptions {
                        mandatory: processed.mandatory,
                        immediate: processed.immediate,
                    },
                    &processed.publishing.body,
                    processed.publishing.properties.clone(),
                )
                .await?
                .await
        }
        .await;

        if let Err(e) = result {
            error!("Failed to publish reply to {reply_to:?}: {e}. Signalling reconnect.");

            if requeue.try_send(processed).is_err() {
                error!(
                    "Could not re-enqueue reply to {reply_to:?} after a failed publish; \
                     the response queue was already closed. This response is lost."
                );
            }

            // Best-effort: if the supervisor has already moved on, this send is dropped.
            let _ = close_tx.send(Error::Lapin(e)).await;
            return;
        }

        debug!("Published reply to {reply_to:?}");
    }

    info!("Responder finished draining the response queue.");
}

// `run` needs a live `Channel`, which only a real broker connection produces, so its behavior
// is covered by the end-to-end scenarios in `tests/` rather than a unit test here.

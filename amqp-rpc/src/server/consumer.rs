//! Per-binding consumer workers: one dedicated consumer per [`crate::binding::HandlerBinding`].

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use lapin::options::{BasicAckOptions, BasicCancelOptions};
use lapin::{Channel, Consumer};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, error_span, info, warn, Instrument};

use crate::context::Context;
use crate::delivery::Delivery;
use crate::middleware::Next;
use crate::processed::ProcessedRequest;
use crate::response::ResponseWriter;
use crate::{Error, Result};

/// Runs the consumer loop for a single binding until shutdown or cancellation.
///
/// Reads deliveries, spawns one task per delivery so handlers run concurrently, and on shutdown
/// cancels its own consumer tag before draining every in-flight task to completion.
pub(crate) async fn run(
    routing_key: String,
    queue_name: String,
    handler: Next,
    input_channel: Channel,
    mut consumer: Consumer,
    responses: mpsc::Sender<ProcessedRequest>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let mut tasks = FuturesUnordered::new();

    let outcome = loop {
        tokio::select! {
            biased;

            _ = shutdown.recv() => {
                info!("Graceful shutdown received for consumer on queue {queue_name:?}.");
                break Ok(());
            }

            Some(result) = tasks.next() => {
                if let Err(e) = result {
                    error!("Delivery task on queue {queue_name:?} panicked: {e}");
                }
                continue;
            }

            delivery = consumer.next() => match delivery {
                Some(Ok(delivery)) => delivery,
                Some(Err(e)) => {
                    error!("Error receiving delivery on queue {queue_name:?}: {e}");
                    continue;
                }
                None => {
                    error!("Consumer for queue {queue_name:?} was cancelled by the broker.");
                    break Err(Error::ConsumerCancelled(routing_key.clone()));
                }
            },
        };

        let delivery = Delivery::new(delivery);
        let ctx = Context::new(queue_name.clone());
        let writer = ResponseWriter::new(delivery.properties().correlation_id().clone());

        let handler = handler.clone();
        let responses = responses.clone();
        let queue_name_for_span = queue_name.clone();

        tasks.push(tokio::spawn(
            async move {
                handle_delivery(handler, ctx, writer, delivery, responses).await;
            }
            .instrument(error_span!("delivery", queue = %queue_name_for_span)),
        ));
    };

    let consumer_tag = consumer.tag().to_string();
    if let Err(e) = input_channel
        .basic_cancel(&consumer_tag, BasicCancelOptions::default())
        .await
    {
        error!(
            "Failed to cancel consumer {consumer_tag:?} on queue {queue_name:?} \
             (continuing shutdown regardless): {e}"
        );
    }

    if tasks.is_empty() {
        debug!("No in-flight deliveries on queue {queue_name:?}.");
    } else {
        info!(
            "Waiting for {} in-flight deliveries on queue {queue_name:?}...",
            tasks.len()
        );
        while let Some(result) = tasks.next().await {
            if let Err(e) = result {
                error!("Delivery task on queue {queue_name:?} panicked during drain: {e}");
            }
        }
    }

    outcome
}

/// Invokes the (middleware-wrapped) handler for a single delivery, auto-acks if the handler
/// left it unhandled, and submits the reply to the response queue if one is expected.
async fn handle_delivery(
    handler: Next,
    ctx: Context,
    mut writer: ResponseWriter,
    delivery: Delivery,
    responses: mpsc::Sender<ProcessedRequest>,
) {
    handler.call(ctx, &mut writer, &delivery).await;

    if !delivery.is_handled() {
        if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
            error!("Failed to auto-ack delivery: {e}");
        } else {
            debug!("Auto-acked a delivery the handler left unhandled.");
        }
    }

    let reply_to = delivery.properties().reply_to().clone();
    let publishing = writer.publishing().clone();

    match reply_to {
        Some(reply_to) => {
            let processed = ProcessedRequest {
                reply_to,
                mandatory: writer.mandatory(),
                immediate: writer.immediate(),
                publishing,
            };

            if responses.send(processed).await.is_err() {
                warn!("Response queue closed before reply could be submitted; reply dropped.");
            }
        }
        None if !publishing.body.is_empty() => {
            warn!(
                "Handler produced a {}-byte response but the delivery had no reply_to property; \
                 the response was discarded.",
                publishing.body.len()
            );
        }
        None => {}
    }
}

//! [`Handler`]s are the user functions bound to a routing key.

use std::future::Future;

use async_trait::async_trait;

use crate::{context::Context, delivery::Delivery, response::ResponseWriter};

/// A function that handles all requests matching a routing key.
///
/// Handlers receive the [`Context`] (currently just the queue name), a [`ResponseWriter`] to
/// write a reply into, and the inbound [`Delivery`]. A handler may explicitly
/// ack/nack/reject the delivery; if it returns without doing so, the consumer pool acks on its
/// behalf.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Handles a single delivery.
    async fn call(&self, ctx: Context, writer: &mut ResponseWriter, delivery: &Delivery);
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(Context, &mut ResponseWriter, &Delivery) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send,
{
    async fn call(&self, ctx: Context, writer: &mut ResponseWriter, delivery: &Delivery) {
        self(ctx, writer, delivery).await
    }
}

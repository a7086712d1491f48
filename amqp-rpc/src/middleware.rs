//! Middleware chaining: composing handlers outer-first.

use std::sync::Arc;

use crate::handler::Handler;

/// A handler wrapped and ready to be called; what middlewares both receive and produce.
pub type Next = Arc<dyn Handler>;

/// A function that wraps a handler with additional behavior, producing a new handler.
///
/// Registered server middlewares apply to every binding; the first-registered middleware runs
/// outermost (see [`chain`]).
pub type MiddlewareFn = Arc<dyn Fn(Next) -> Next + Send + Sync>;

/// Wraps `handler` in the given middlewares, first-registered running outermost.
///
/// Given `[m1, m2, ..., mn]` and `handler`, produces `m1(m2(...mn(handler)))`.
pub fn chain(handler: Next, middlewares: &[MiddlewareFn]) -> Next {
    middlewares
        .iter()
        .rev()
        .fold(handler, |wrapped, middleware| middleware(wrapped))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::{context::Context, delivery::Delivery, response::ResponseWriter};

    fn noop_handler() -> Next {
        Arc::new(|_ctx: Context, _writer: &mut ResponseWriter, _delivery: &Delivery| async {})
    }

    fn record(order: Arc<std::sync::Mutex<Vec<&'static str>>>, name: &'static str) -> MiddlewareFn {
        Arc::new(move |next: Next| -> Next {
            let order = order.clone();
            struct Wrapped {
                next: Next,
                order: Arc<std::sync::Mutex<Vec<&'static str>>>,
                name: &'static str,
            }

            #[async_trait::async_trait]
            impl Handler for Wrapped {
                async fn call(&self, ctx: Context, writer: &mut ResponseWriter, delivery: &Delivery) {
                    self.order.lock().unwrap().push(self.name);
                    self.next.call(ctx, writer, delivery).await;
                }
            }

            Arc::new(Wrapped {
                next,
                order,
                name,
            })
        })
    }

    #[tokio::test]
    async fn first_registered_runs_outermost() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let middlewares = vec![
            record(order.clone(), "outer"),
            record(order.clone(), "inner"),
        ];

        let handler = chain(noop_handler(), &middlewares);

        let delivery = Delivery::new(lapin::message::Delivery {
            delivery_tag: 1,
            exchange: "".into(),
            routing_key: "k".into(),
            redelivered: false,
            properties: Default::default(),
            data: vec![],
            acker: lapin::acker::Acker::default(),
        });
        let mut writer = ResponseWriter::new(None);
        handler
            .call(Context::new("q"), &mut writer, &delivery)
            .await;

        assert_eq!(*order.lock().unwrap(), vec!["outer", "inner"]);
    }

    #[test]
    fn empty_chain_returns_handler_unchanged() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();
        let handler: Next = Arc::new(
            move |_ctx: Context, _writer: &mut ResponseWriter, _delivery: &Delivery| {
                counter_clone.fetch_add(1, Ordering::SeqCst);
                async {}
            },
        );

        let chained = chain(handler.clone(), &[]);
        assert!(Arc::ptr_eq(&handler, &chained));
    }
}

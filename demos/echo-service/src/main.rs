//! Super minimal example that binds one routing key and echoes the request body back.

use std::sync::Arc;

use amqp_rpc::{Context, Delivery, HandlerBinding, ResponseWriter, Server};
use tracing::info;

async fn echo(_ctx: Context, writer: &mut ResponseWriter, delivery: &Delivery) {
    writer.write(delivery.data());
}

#[tokio::main]
async fn main() -> amqp_rpc::Result<()> {
    tracing_subscriber::fmt::init();

    let addr = std::env::var("AMQP_ADDR").unwrap_or_else(|_| "amqp://127.0.0.1:5672".to_owned());

    let server = Arc::new(Server::new(addr).bind(HandlerBinding::new("echo", echo)));

    let stopper = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, requesting graceful shutdown...");
            if let Err(e) = stopper.stop() {
                info!("Shutdown was already in progress: {e}");
            }
        }
    });

    server.listen_and_serve().await
}

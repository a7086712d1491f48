//! End-to-end scenarios against a real broker.
//!
//! These tests need a running AMQP broker reachable at the `AMQP_ADDR` environment variable
//! (default `amqp://127.0.0.1:5672/%2f`), so they are `#[ignore]`d by default - run them
//! explicitly against a broker with `cargo test --test e2e -- --ignored`.

use std::sync::Arc;
use std::time::Duration;

use amqp_rpc::lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, QueueDeclareOptions,
};
use amqp_rpc::lapin::types::FieldTable;
use amqp_rpc::lapin::{BasicProperties, Connection, ConnectionProperties};
use amqp_rpc::{Context, Delivery, HandlerBinding, ResponseWriter, Server};
use futures::StreamExt;
use tokio::time::timeout;
use uuid::Uuid;

fn amqp_addr() -> String {
    std::env::var("AMQP_ADDR").unwrap_or_else(|_| "amqp://127.0.0.1:5672/%2f".to_owned())
}

/// Opens a throwaway connection + channel for a test's own "client" side: declaring a reply
/// queue, publishing a request, and consuming the matched reply.
async fn client_channel() -> amqp_rpc::lapin::Channel {
    let conn = Connection::connect(&amqp_addr(), ConnectionProperties::default())
        .await
        .expect("failed to connect to test broker");
    conn.create_channel()
        .await
        .expect("failed to open test channel")
}

async fn echo(_ctx: Context, writer: &mut ResponseWriter, delivery: &Delivery) {
    writer.write(delivery.data());
}

#[tokio::test]
#[ignore = "requires a running broker"]
async fn echo_handler_replies_with_the_request_body() {
    let routing_key = format!("echo-{}", Uuid::new_v4());
    let server = Arc::new(Server::new(amqp_addr()).bind(HandlerBinding::new(&routing_key, echo)));
    let server_task = {
        let server = server.clone();
        tokio::spawn(async move { server.listen_and_serve().await })
    };

    let channel = client_channel().await;
    let reply_queue = channel
        .queue_declare(
            "",
            QueueDeclareOptions {
                exclusive: true,
                ..QueueDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await
        .expect("failed to declare reply queue");
    let reply_queue_name = reply_queue.name().to_string();

    let mut reply_consumer = channel
        .basic_consume(
            &reply_queue_name,
            "test-reply-consumer",
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await
        .expect("failed to consume reply queue");

    let correlation_id = Uuid::new_v4().to_string();
    channel
        .basic_publish(
            "",
            &routing_key,
            BasicPublishOptions::default(),
            b"hello",
            BasicProperties::default()
                .with_reply_to(reply_queue_name.clone().into())
                .with_correlation_id(correlation_id.clone().into()),
        )
        .await
        .expect("failed to publish request")
        .await
        .expect("publish was not confirmed");

    let delivery = timeout(Duration::from_secs(1), reply_consumer.next())
        .await
        .expect("timed out waiting for reply")
        .expect("reply consumer ended unexpectedly")
        .expect("error receiving reply");

    assert_eq!(delivery.data, b"hello");
    assert_eq!(
        delivery.properties.correlation_id().as_ref().map(|c| c.as_str()),
        Some(correlation_id.as_str())
    );

    server.stop().expect("stop should succeed exactly once");
    timeout(Duration::from_secs(2), server_task)
        .await
        .expect("listen_and_serve did not return after stop")
        .expect("server task panicked")
        .expect("listen_and_serve returned an error");
}

#[tokio::test]
#[ignore = "requires a running broker"]
async fn explicit_reject_suppresses_auto_ack_and_reply() {
    let routing_key = format!("reject-{}", Uuid::new_v4());

    async fn reject_handler(_ctx: Context, _writer: &mut ResponseWriter, delivery: &Delivery) {
        delivery
            .reject(amqp_rpc::lapin::options::BasicRejectOptions { requeue: false })
            .await
            .expect("reject should succeed");
    }

    let server = Arc::new(
        Server::new(amqp_addr()).bind(HandlerBinding::new(&routing_key, reject_handler)),
    );
    let server_task = {
        let server = server.clone();
        tokio::spawn(async move { server.listen_and_serve().await })
    };

    let channel = client_channel().await;
    let reply_queue = channel
        .queue_declare(
            "",
            QueueDeclareOptions {
                exclusive: true,
                ..QueueDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await
        .expect("failed to declare reply queue");
    let reply_queue_name = reply_queue.name().to_string();

    let mut reply_consumer = channel
        .basic_consume(
            &reply_queue_name,
            "test-reply-consumer",
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await
        .expect("failed to consume reply queue");

    channel
        .basic_publish(
            "",
            &routing_key,
            BasicPublishOptions::default(),
            b"anything",
            BasicProperties::default().with_reply_to(reply_queue_name.into()),
        )
        .await
        .expect("failed to publish request")
        .await
        .expect("publish was not confirmed");

    let outcome = timeout(Duration::from_millis(500), reply_consumer.next()).await;
    assert!(
        outcome.is_err(),
        "expected no reply to be published for a rejected delivery"
    );

    server.stop().expect("stop should succeed exactly once");
    timeout(Duration::from_secs(2), server_task)
        .await
        .expect("listen_and_serve did not return after stop")
        .expect("server task panicked")
        .expect("listen_and_serve returned an error");
}

#[tokio::test]
#[ignore = "requires a running broker"]
async fn graceful_stop_waits_for_in_flight_handlers() {
    let routing_key = format!("slow-{}", Uuid::new_v4());

    async fn slow_echo(_ctx: Context, writer: &mut ResponseWriter, delivery: &Delivery) {
        tokio::time::sleep(Duration::from_millis(200)).await;
        writer.write(delivery.data());
    }

    let server =
        Arc::new(Server::new(amqp_addr()).bind(HandlerBinding::new(&routing_key, slow_echo)));
    let server_task = {
        let server = server.clone();
        tokio::spawn(async move { server.listen_and_serve().await })
    };

    let channel = client_channel().await;
    let reply_queue = channel
        .queue_declare(
            "",
            QueueDeclareOptions {
                exclusive: true,
                ..QueueDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await
        .expect("failed to declare reply queue");
    let reply_queue_name = reply_queue.name().to_string();

    let mut reply_consumer = channel
        .basic_consume(
            &reply_queue_name,
            "test-reply-consumer",
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await
        .expect("failed to consume reply queue");

    channel
        .basic_publish(
            "",
            &routing_key,
            BasicPublishOptions::default(),
            b"hello",
            BasicProperties::default().with_reply_to(reply_queue_name.into()),
        )
        .await
        .expect("failed to publish request")
        .await
        .expect("publish was not confirmed");

    // Give the handler a moment to start sleeping before requesting shutdown.
    tokio::time::sleep(Duration::from_millis(50)).await;
    server.stop().expect("stop should succeed exactly once");

    let delivery = timeout(Duration::from_secs(2), reply_consumer.next())
        .await
        .expect("timed out waiting for the in-flight handler's reply")
        .expect("reply consumer ended unexpectedly")
        .expect("error receiving reply");
    assert_eq!(delivery.data, b"hello");

    timeout(Duration::from_secs(2), server_task)
        .await
        .expect("listen_and_serve did not return after stop")
        .expect("server task panicked")
        .expect("listen_and_serve returned an error");
}

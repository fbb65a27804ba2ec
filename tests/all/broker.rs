//! Tests against a live RabbitMq broker listening on `localhost:5672`.
//! Run them with `cargo test -- --ignored`.
use crate::helpers::exchange_name;
use carrot_relay::connection::{ConnectionManager, RetryPolicy};
use carrot_relay::consumers::{Handler, HandlerError, Incoming, QueueConsumer};
use carrot_relay::publishers::{MessageEnvelope, Publisher, PublisherError};
use carrot_relay::settings::Settings;
use futures_util::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::BasicProperties;
use std::time::Duration;

struct Shout;

#[async_trait::async_trait]
impl Handler for Shout {
    async fn handle(
        &self,
        incoming: &Incoming<'_>,
    ) -> Result<Option<MessageEnvelope>, HandlerError> {
        Ok(Some(MessageEnvelope::new(
            incoming.payload().to_ascii_uppercase(),
        )))
    }
}

#[tokio::test]
#[ignore = "requires a RabbitMq broker on localhost"]
async fn messages_are_relayed_from_the_input_to_the_output_exchange() {
    // Arrange
    let exchange_in = exchange_name("in");
    let exchange_out = exchange_name("out");
    let mut settings = Settings::default();
    settings.set("EXCHANGE", exchange_in.as_str()).unwrap();
    settings.set("EXCHANGE_OUT", exchange_out.as_str()).unwrap();
    settings.resolve().unwrap();

    let manager = ConnectionManager::from_settings(&settings)
        .unwrap()
        .retry_policy(RetryPolicy::new(
            1,
            Duration::from_secs(1),
            Duration::from_secs(1),
        ))
        .establish()
        .await
        .unwrap();
    manager
        .add_consumer(QueueConsumer::new("", Shout).with_routing_key("greetings"))
        .await
        .unwrap();

    // Listen on the output exchange.
    let listener = manager.connection().create_channel().await.unwrap();
    let queue = listener
        .queue_declare(
            "",
            QueueDeclareOptions {
                exclusive: true,
                auto_delete: true,
                ..QueueDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await
        .unwrap();
    listener
        .queue_bind(
            queue.name().as_str(),
            &exchange_out,
            "greetings",
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .unwrap();
    let mut replies = listener
        .basic_consume(
            queue.name().as_str(),
            "test-listener",
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await
        .unwrap();

    // Act
    manager
        .channel()
        .basic_publish(
            &exchange_in,
            "greetings",
            BasicPublishOptions::default(),
            b"hello",
            BasicProperties::default(),
        )
        .await
        .unwrap();

    // Assert
    let reply = tokio::time::timeout(Duration::from_secs(10), replies.next())
        .await
        .expect("No reply was published")
        .unwrap()
        .unwrap();
    reply.acker.ack(BasicAckOptions::default()).await.unwrap();
    assert_eq!(reply.data, b"HELLO");
    assert!(reply.properties.message_id().is_some());
    manager.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a RabbitMq broker on localhost"]
async fn redeclaring_the_exchanges_is_idempotent() {
    let settings = Settings::from_yaml_str(&format!(
        "exchange: {}\nexchange_out: {}\n",
        exchange_name("in"),
        exchange_name("out")
    ))
    .unwrap();

    for _ in 0..2 {
        let manager = ConnectionManager::from_settings(&settings)
            .unwrap()
            .establish()
            .await
            .unwrap();
        manager.close().await.unwrap();
    }
}

#[tokio::test]
#[ignore = "requires a RabbitMq broker on localhost"]
async fn unroutable_replies_are_reported_instead_of_dropped() {
    // Arrange
    let settings = Settings::from_yaml_str(&format!("exchange_out: {}\n", exchange_name("out")))
        .unwrap();
    let manager = ConnectionManager::from_settings(&settings)
        .unwrap()
        .establish()
        .await
        .unwrap();
    // Nothing is bound to the output exchange.
    let publisher = Publisher::new(manager.channel().clone(), manager.exchange_out().clone());
    publisher.enable_confirms().await.unwrap();

    // Act
    let result = publisher
        .publish(MessageEnvelope::new(b"lost".to_vec()), "nobody-listens")
        .await;

    // Assert
    assert!(matches!(result, Err(PublisherError::UnroutableMessage(_))));
    manager.close().await.unwrap();
}

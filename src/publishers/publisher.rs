use crate::connection::Exchange;
use crate::publishers::MessageEnvelope;
use lapin::message::BasicReturnMessage;
use lapin::options::{BasicPublishOptions, ConfirmSelectOptions};
use lapin::publisher_confirm::Confirmation;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::warn;
use uuid::Uuid;

/// Delivery mode: Non-persistent (1) or persistent (2).
const PERSISTENT: u8 = 2;
/// Reply Code 312 - NO_ROUTE
/// See https://www.rabbitmq.com/amqp-0-9-1-reference.html
const NO_ROUTE: u16 = 312;

/// Publishes messages to a single exchange over a shared channel.
///
/// Every message gets a `message_id` (a random UUID) and a `timestamp` if it does not carry
/// them already, and it is published as persistent.
#[derive(Clone)]
pub struct Publisher {
    channel: lapin::Channel,
    exchange: Exchange,
    /// Timeout on publishing.
    timeout: Duration,
}

impl Publisher {
    /// A publisher for `exchange`, with a 3 seconds publishing timeout.
    pub fn new(channel: lapin::Channel, exchange: Exchange) -> Self {
        Self {
            channel,
            exchange,
            timeout: Duration::from_secs(3),
        }
    }

    /// Timeout applied when attempting to publish a message.
    #[must_use]
    pub fn publish_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn exchange(&self) -> &Exchange {
        &self.exchange
    }

    /// Put the channel in confirm mode: from now on every publish waits for the broker to
    /// ack it, and unroutable messages are reported as [`PublisherError::UnroutableMessage`].
    ///
    /// Without confirms, the broker drops unroutable messages silently.
    pub async fn enable_confirms(&self) -> Result<(), PublisherError> {
        self.channel
            .confirm_select(ConfirmSelectOptions { nowait: false })
            .await
            .map_err(|e| PublisherError::GenericError(e.into()))
    }

    /// Publish a message, using `default_routing_key` if the envelope does not specify one.
    #[tracing::instrument(
        name = "publish_message",
        skip_all,
        fields(exchange = self.exchange.name()),
        level = tracing::Level::DEBUG
    )]
    pub async fn publish(
        &self,
        envelope: MessageEnvelope,
        default_routing_key: &str,
    ) -> Result<(), PublisherError> {
        let envelope = inject_amqp_properties(envelope);
        let routing_key = envelope
            .routing_key
            .as_deref()
            .unwrap_or(default_routing_key);
        let properties = envelope
            .properties
            .unwrap_or_default()
            .with_delivery_mode(PERSISTENT);

        let publish = async {
            let confirmation = self
                .channel
                .basic_publish(
                    self.exchange.name(),
                    routing_key,
                    BasicPublishOptions {
                        // The broker returns the message instead of dropping it if it
                        // cannot be routed to a queue.
                        mandatory: true,
                        immediate: false,
                    },
                    &envelope.payload,
                    properties,
                )
                .await
                .map_err(|e| PublisherError::GenericError(e.into()))?
                .await
                .map_err(|e| PublisherError::GenericError(e.into()))?;
            check_confirmation(confirmation)
        };
        tokio::time::timeout(self.timeout, publish)
            .await
            .map_err(|_| PublisherError::TimeoutError)?
    }
}

/// Error returned when trying to publish a message using [`Publisher`].
#[derive(thiserror::Error, Debug)]
pub enum PublisherError {
    #[error("Generic error encountered when interacting with the RabbitMq broker")]
    GenericError(#[source] anyhow::Error),
    #[error("The timeout threshold was reached while trying to publish the message")]
    TimeoutError,
    #[error("The message could not be routed: {0:?}")]
    UnroutableMessage(Box<BasicReturnMessage>),
    #[error("The RabbitMq broker nacked the publishing of the message: {0:?}")]
    NegativeAck(Option<Box<BasicReturnMessage>>),
}

fn check_confirmation(confirmation: Confirmation) -> Result<(), PublisherError> {
    match confirmation {
        Confirmation::Ack(Some(returned)) if returned.reply_code == NO_ROUTE => {
            Err(PublisherError::UnroutableMessage(returned))
        }
        Confirmation::Ack(_) | Confirmation::NotRequested => Ok(()),
        Confirmation::Nack(returned) => Err(PublisherError::NegativeAck(returned)),
    }
}

fn inject_amqp_properties(mut envelope: MessageEnvelope) -> MessageEnvelope {
    let current_timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|ct| ct.as_secs());

    let props = envelope.properties.unwrap_or_default();
    let props = if let Some(ct) = current_timestamp {
        let ts = *props.timestamp();
        props.with_timestamp(ts.unwrap_or(ct))
    } else {
        warn!("System time is before 1970");
        props
    };

    let message_id = props.message_id().clone();
    envelope.properties = Some(
        props.with_message_id(message_id.unwrap_or_else(|| Uuid::new_v4().to_string().into())),
    );

    envelope
}

use crate::connection::Topology;
use crate::consumers::{ConsumerSpec, DispatchUnit, Handler, HandlerError, Incoming};
use crate::publishers::Publisher;
use anyhow::Context;
use futures_util::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

const DEFAULT_PREFETCH_COUNT: u16 = 50;

/// Consume a queue bound to the input exchange and publish replies to the output exchange.
///
/// # Example
///
/// ```rust
/// use carrot_relay::consumers::{Handler, HandlerError, Incoming, QueueConsumer};
/// use carrot_relay::publishers::MessageEnvelope;
///
/// struct Shout;
///
/// #[async_trait::async_trait]
/// impl Handler for Shout {
///     async fn handle(
///         &self,
///         incoming: &Incoming<'_>,
///     ) -> Result<Option<MessageEnvelope>, HandlerError> {
///         let payload = incoming.payload().to_ascii_uppercase();
///         Ok(Some(MessageEnvelope::new(payload)))
///     }
/// }
///
/// let consumer = QueueConsumer::new("greetings", Shout)
///     .with_routing_key("hello")
///     .prefetch_count(10);
/// ```
pub struct QueueConsumer<H> {
    queue_name: String,
    routing_keys: Vec<String>,
    prefetch_count: u16,
    requeue_transient_errors: bool,
    publish_timeout: Duration,
    handler: H,
}

impl<H: Handler> QueueConsumer<H> {
    /// Consume `queue_name` with `handler`.
    ///
    /// An empty queue name asks the broker for a server-named, exclusive queue that is deleted
    /// when the consumer goes away.
    pub fn new(queue_name: impl Into<String>, handler: H) -> Self {
        Self {
            queue_name: queue_name.into(),
            routing_keys: vec![],
            prefetch_count: DEFAULT_PREFETCH_COUNT,
            requeue_transient_errors: false,
            publish_timeout: Duration::from_secs(3),
            handler,
        }
    }

    /// Bind the queue to the input exchange with `routing_key`.
    /// If no routing key is specified, the queue name is used.
    #[must_use]
    pub fn with_routing_key(mut self, routing_key: impl Into<String>) -> Self {
        self.routing_keys.push(routing_key.into());
        self
    }

    #[must_use]
    pub fn with_routing_keys<I, S>(mut self, routing_keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.routing_keys
            .extend(routing_keys.into_iter().map(Into::into));
        self
    }

    /// The maximum number of unacknowledged messages in flight. Defaults to 50.
    #[must_use]
    pub fn prefetch_count(mut self, prefetch_count: u16) -> Self {
        self.prefetch_count = prefetch_count;
        self
    }

    /// Requeue messages whose processing failed with a transient error.
    /// Defaults to `false`: every failed message is nacked without requeueing.
    #[must_use]
    pub fn requeue_transient_errors(mut self, requeue: bool) -> Self {
        self.requeue_transient_errors = requeue;
        self
    }

    /// Timeout applied when publishing a reply. Defaults to 3 seconds.
    #[must_use]
    pub fn publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }
}

impl<H: Handler> ConsumerSpec<lapin::Channel> for QueueConsumer<H> {
    type Unit = QueueDispatcher<H>;

    fn dispatch_unit(
        self,
        topology: Topology<lapin::Channel>,
    ) -> Result<QueueDispatcher<H>, anyhow::Error> {
        if topology.exchange_in().is_default() && !self.routing_keys.is_empty() {
            anyhow::bail!(
                "Queue `{}` cannot be bound with custom routing keys: the default exchange routes by queue name.",
                self.queue_name
            );
        }
        let publisher = Publisher::new(topology.channel().clone(), topology.exchange_out().clone())
            .publish_timeout(self.publish_timeout);
        Ok(QueueDispatcher {
            topology,
            publisher,
            queue_name: self.queue_name,
            routing_keys: self.routing_keys,
            prefetch_count: self.prefetch_count,
            requeue_transient_errors: self.requeue_transient_errors,
            handler: Arc::new(self.handler),
        })
    }
}

/// A [`QueueConsumer`] bound to a topology. Start it with [`DispatchUnit::start`].
pub struct QueueDispatcher<H> {
    topology: Topology<lapin::Channel>,
    publisher: Publisher,
    queue_name: String,
    routing_keys: Vec<String>,
    prefetch_count: u16,
    requeue_transient_errors: bool,
    handler: Arc<H>,
}

#[async_trait::async_trait]
impl<H: Handler> DispatchUnit for QueueDispatcher<H> {
    #[tracing::instrument(skip_all, name = "consumer_start", fields(queue_name = %self.queue_name))]
    async fn start(self) -> Result<(), anyhow::Error> {
        let channel = self.topology.channel();
        channel
            .basic_qos(self.prefetch_count, BasicQosOptions { global: false })
            .await
            .context("Failed to set the prefetch count.")?;

        let server_named = self.queue_name.is_empty();
        let queue = channel
            .queue_declare(
                &self.queue_name,
                QueueDeclareOptions {
                    durable: !server_named,
                    exclusive: server_named,
                    auto_delete: server_named,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .with_context(|| format!("Failed to declare queue `{}`.", self.queue_name))?;
        let queue_name = queue.name().as_str().to_owned();

        let exchange_in = self.topology.exchange_in();
        if !exchange_in.is_default() {
            let routing_keys = if self.routing_keys.is_empty() {
                vec![queue_name.clone()]
            } else {
                self.routing_keys.clone()
            };
            for routing_key in &routing_keys {
                channel
                    .queue_bind(
                        &queue_name,
                        exchange_in.name(),
                        routing_key,
                        QueueBindOptions::default(),
                        FieldTable::default(),
                    )
                    .await
                    .with_context(|| {
                        format!(
                            "Failed to bind queue `{queue_name}` to exchange `{}` with routing key `{routing_key}`.",
                            exchange_in.name()
                        )
                    })?;
            }
        }

        self.publisher
            .enable_confirms()
            .await
            .context("Failed to enable publisher confirms.")?;

        let consumer = channel
            .basic_consume(
                &queue_name,
                &Uuid::new_v4().to_string(),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .with_context(|| format!("Failed to start consuming from queue `{queue_name}`."))?;
        info!(
            queue_name = %queue_name,
            exchange_in = exchange_in.name(),
            exchange_out = self.topology.exchange_out().name(),
            "Consumer started"
        );

        let span = tracing::info_span!("consumer_run", queue_name = %queue_name);
        tokio::spawn(
            consume(
                consumer,
                queue_name,
                self.handler,
                Arc::new(self.publisher),
                self.requeue_transient_errors,
            )
            .instrument(span),
        );
        Ok(())
    }
}

async fn consume<H: Handler>(
    mut consumer: lapin::Consumer,
    queue_name: String,
    handler: Arc<H>,
    publisher: Arc<Publisher>,
    requeue_transient_errors: bool,
) {
    let queue_name: Arc<str> = queue_name.into();
    while let Some(event) = consumer.next().await {
        match event {
            Ok(delivery) => {
                // Each message is processed in its own task, up to the limit established by
                // our QoS settings. A panic while processing one message does not tear the
                // consumer down.
                tokio::spawn(
                    process(
                        delivery,
                        queue_name.clone(),
                        handler.clone(),
                        publisher.clone(),
                        requeue_transient_errors,
                    )
                    .in_current_span(),
                );
            }
            Err(e) => {
                error!(error.message = %e, "Consumer error");
                return;
            }
        }
    }
    info!("Consumer stream ended");
}

#[tracing::instrument(
    name = "process_message",
    skip_all,
    fields(delivery_tag = delivery.delivery_tag),
    level = tracing::Level::DEBUG
)]
async fn process<H: Handler>(
    delivery: Delivery,
    queue_name: Arc<str>,
    handler: Arc<H>,
    publisher: Arc<Publisher>,
    requeue_transient_errors: bool,
) {
    let incoming = Incoming {
        message: &delivery,
        queue_name: &queue_name,
    };
    let outcome = match handler.handle(&incoming).await {
        Ok(Some(reply)) => publisher
            .publish(reply, incoming.routing_key())
            .await
            .map_err(HandlerError::transient),
        Ok(None) => Ok(()),
        Err(e) => Err(e),
    };

    let acknowledgement = match outcome {
        Ok(()) => delivery.acker.ack(BasicAckOptions::default()).await,
        Err(e) => {
            let requeue = requeue_transient_errors && e.is_transient();
            warn!(
                error.message = %e,
                error.details = ?e.inner_error,
                requeue,
                "Failed to process message"
            );
            delivery
                .acker
                .nack(BasicNackOptions {
                    multiple: false,
                    requeue,
                })
                .await
        }
    };
    if let Err(e) = acknowledgement {
        error!(error.message = %e, "Failed to acknowledge message");
    }
}

use crate::consumers::{HandlerError, Incoming};
use crate::publishers::MessageEnvelope;
use std::sync::Arc;

/// Implementers of the `Handler` trait can be used by [`QueueConsumer`] to process messages
/// retrieved from a queue.
///
/// # Scope
///
/// `handle` does not get access to the underlying RabbitMq channel.
/// The consumer takes care of publishing the reply, if any, and of acking/nacking the message
/// with the broker according to the outcome of processing (check out [`HandlerError`] for more
/// details).
///
/// - `Ok(Some(reply))`: `reply` is published to the output exchange, then the message is acked;
/// - `Ok(None)`: the message is acked;
/// - `Err(_)`: the message is nacked.
///
/// [`QueueConsumer`]: crate::consumers::QueueConsumer
#[async_trait::async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(
        &self,
        incoming: &Incoming<'_>,
    ) -> Result<Option<MessageEnvelope>, HandlerError>;
}

/// Implement the [`Handler`] trait for all Boxed handlers.
///
/// E.g. `Box<dyn Handler>`.
#[async_trait::async_trait]
impl<H> Handler for Box<H>
where
    H: Handler + ?Sized,
{
    async fn handle(
        &self,
        incoming: &Incoming<'_>,
    ) -> Result<Option<MessageEnvelope>, HandlerError> {
        H::handle(self, incoming).await
    }
}

#[async_trait::async_trait]
impl<H> Handler for Arc<H>
where
    H: Handler + ?Sized,
{
    async fn handle(
        &self,
        incoming: &Incoming<'_>,
    ) -> Result<Option<MessageEnvelope>, HandlerError> {
        H::handle(self, incoming).await
    }
}

use amq_protocol_types::{FieldTable, ShortString, Timestamp};
use lapin::BasicProperties;

/// A message to be published via [`Publisher`](super::Publisher).
///
/// The exchange is not part of the envelope: a publisher is bound to a single exchange.
#[derive(Debug, Default, Clone)]
pub struct MessageEnvelope {
    // The body of the message - as a sequence of bytes.
    pub payload: Vec<u8>,
    // The routing key used by the exchange to select the target queues.
    // When `None`, the publisher falls back to the routing key it is given.
    pub routing_key: Option<String>,
    // AMQP properties attached to the message.
    pub properties: Option<BasicProperties>,
}

impl MessageEnvelope {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            ..Self::default()
        }
    }

    pub fn with_routing_key(mut self, value: impl Into<String>) -> Self {
        self.routing_key = Some(value.into());
        self
    }

    fn props(mut self, f: impl FnOnce(BasicProperties) -> BasicProperties) -> Self {
        self.properties = Some(f(self.properties.unwrap_or_default()));
        self
    }

    pub fn with_content_type(self, value: ShortString) -> Self {
        self.props(|p| p.with_content_type(value))
    }

    pub fn with_headers(self, value: FieldTable) -> Self {
        self.props(|p| p.with_headers(value))
    }

    pub fn with_correlation_id(self, value: ShortString) -> Self {
        self.props(|p| p.with_correlation_id(value))
    }

    pub fn with_message_id(self, value: ShortString) -> Self {
        self.props(|p| p.with_message_id(value))
    }

    pub fn with_timestamp(self, value: Timestamp) -> Self {
        self.props(|p| p.with_timestamp(value))
    }
}

use lapin::message::Delivery;

/// A dequeued message, ready for processing.
///
/// `Incoming` is the input type of [`Handler`](crate::consumers::Handler).
pub struct Incoming<'d> {
    /// `message` is what we received from RabbitMq: it includes headers, payload, delivery tag, etc.
    pub message: &'d Delivery,
    /// The name of the queue the message was consumed from.
    pub queue_name: &'d str,
}

impl<'d> Incoming<'d> {
    pub fn payload(&self) -> &'d [u8] {
        &self.message.data
    }

    /// The routing key the message was published with.
    pub fn routing_key(&self) -> &'d str {
        self.message.routing_key.as_str()
    }
}

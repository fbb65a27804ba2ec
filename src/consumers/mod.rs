//! Attach message consumers to an established [`ConnectionManager`].
//!
//! The connection manager only knows about [`ConsumerSpec`] and [`DispatchUnit`]: anything
//! that can be turned into a runnable unit, given the shared channel and exchanges, can be
//! registered. [`QueueConsumer`] is the unit shipped with the crate: it consumes a queue
//! bound to the input exchange, hands every message to a [`Handler`] and publishes the
//! replies to the output exchange.
//!
//! [`ConnectionManager`]: crate::connection::ConnectionManager
mod dispatch;
mod error;
mod handler;
mod incoming_message;
mod queue_consumer;

pub use dispatch::{ConsumerSpec, DispatchUnit};
pub use error::{ErrorType, HandlerError};
pub use handler::Handler;
pub use incoming_message::Incoming;
pub use queue_consumer::{QueueConsumer, QueueDispatcher};

//! `carrot-relay` connects a message-relay process to RabbitMQ, built on top of [`lapin`].
//!
//! Bootstrapping follows a fixed sequence: resolve the [`Settings`](settings::Settings),
//! connect with retries, open a channel, declare the input and output exchanges, then attach
//! consumers. If any step fails the process is expected to exit: the relay never runs against
//! a half-configured broker.
//!
//! [`ConnectionManager`](crate::connection::ConnectionManager) is the best starting point to
//! learn more about what `carrot-relay` provides.

pub mod amqp;
pub mod connection;
pub mod consumers;
pub mod publishers;
pub mod settings;

//! The seams between the connection manager and the AMQP client.
//!
//! [`ConnectionManager`] never talks to [`lapin`] directly: it relies on [`TransportFactory`]
//! to open a connection, on [`BrokerConnection`] to open a channel and on [`BrokerChannel`]
//! to declare exchanges. The `lapin`-backed implementations live in this module; tests plug in
//! in-memory transports.
//!
//! [`ConnectionManager`]: crate::connection::ConnectionManager
use crate::amqp::ConnectionFactory;
use crate::connection::Exchange;
use anyhow::Context;
use lapin::options::ExchangeDeclareOptions;
use lapin::types::FieldTable;

/// Types capable of opening a connection to a message broker.
#[async_trait::async_trait]
pub trait TransportFactory: Send + Sync {
    /// The live session returned by a successful attempt.
    type Connection: BrokerConnection;

    /// `host:port` of the broker, used in log lines.
    fn endpoint(&self) -> String;

    /// Perform a single connection attempt, handshake included.
    async fn connect(&self) -> Result<Self::Connection, anyhow::Error>;
}

/// A live session to the broker.
#[async_trait::async_trait]
pub trait BrokerConnection: Send + Sync + 'static {
    /// The multiplexed conduit opened on top of the connection.
    type Channel: BrokerChannel;

    async fn create_channel(&self) -> Result<Self::Channel, anyhow::Error>;

    /// Gracefully close the session.
    async fn close(&self) -> Result<(), anyhow::Error>;
}

/// A channel, shared by the connection manager with every dispatch unit.
#[async_trait::async_trait]
pub trait BrokerChannel: Clone + Send + Sync + 'static {
    /// Declare `exchange` on the broker.
    ///
    /// Re-declaring an exchange with the same name and kind must be a no-op.
    async fn declare_exchange(&self, exchange: &Exchange) -> Result<(), anyhow::Error>;
}

#[async_trait::async_trait]
impl TransportFactory for ConnectionFactory {
    type Connection = lapin::Connection;

    fn endpoint(&self) -> String {
        ConnectionFactory::endpoint(self)
    }

    async fn connect(&self) -> Result<lapin::Connection, anyhow::Error> {
        self.new_connection().await
    }
}

#[async_trait::async_trait]
impl BrokerConnection for lapin::Connection {
    type Channel = lapin::Channel;

    #[tracing::instrument(name = "rabbitmq_create_channel", skip(self))]
    async fn create_channel(&self) -> Result<lapin::Channel, anyhow::Error> {
        lapin::Connection::create_channel(self)
            .await
            .context("Failed to open a channel on the RabbitMQ connection.")
    }

    async fn close(&self) -> Result<(), anyhow::Error> {
        lapin::Connection::close(self, 200, "Shutting down")
            .await
            .context("Failed to close the RabbitMQ connection.")
    }
}

#[async_trait::async_trait]
impl BrokerChannel for lapin::Channel {
    async fn declare_exchange(&self, exchange: &Exchange) -> Result<(), anyhow::Error> {
        self.exchange_declare(
            exchange.name(),
            exchange.kind().clone(),
            ExchangeDeclareOptions {
                passive: false,
                durable: false,
                auto_delete: false,
                internal: false,
                nowait: false,
            },
            FieldTable::default(),
        )
        .await
        .with_context(|| format!("Failed to declare exchange `{}`", exchange.name()))
    }
}

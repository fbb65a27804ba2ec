//! Establish the broker connection, provision the topology and hand it over to consumers.
//! Check out [`ConnectionManager`] as a starting point.
mod error;
mod retry;
mod topology;

pub use error::BootstrapError;
pub use retry::RetryPolicy;
pub use topology::{Exchange, Topology};

use crate::amqp::transport::{BrokerConnection, TransportFactory};
use crate::amqp::ConnectionFactory;
use crate::consumers::{ConsumerSpec, DispatchUnit};
use crate::settings::Settings;
use std::future::Future;

/// Owns the connection to the broker, the channel opened on top of it and the input/output
/// exchanges.
///
/// A `ConnectionManager` only exists once the whole bootstrap sequence has succeeded:
/// connection (with retries), channel, input exchange, output exchange.
/// Consumers are attached afterwards with [`ConnectionManager::add_consumer`].
///
/// # Example
///
/// ```no_run
/// use carrot_relay::connection::ConnectionManager;
/// use carrot_relay::settings::Settings;
///
/// async fn bootstrap() -> Result<(), anyhow::Error> {
///     let mut settings = Settings::default();
///     settings.load("config/relay.yml")?;
///
///     let manager = ConnectionManager::from_settings(&settings)?
///         .establish()
///         .await?;
///     println!("publishing to {}", manager.exchange_out().name());
///     Ok(())
/// }
/// ```
pub struct ConnectionManager<C: BrokerConnection> {
    connection: C,
    topology: Topology<C::Channel>,
}

impl ConnectionManager<lapin::Connection> {
    /// Start building a [`ConnectionManager`] backed by `lapin`, using the connection
    /// parameters and exchange names found in `settings`.
    ///
    /// Fails if the TLS material referenced by `settings` cannot be loaded.
    pub fn from_settings(
        settings: &Settings,
    ) -> Result<ConnectionManagerBuilder<ConnectionFactory>, anyhow::Error> {
        let factory = ConnectionFactory::new_from_parameters(&settings.connection_parameters())?;
        Ok(ConnectionManager::builder(factory).exchanges_from(settings))
    }
}

impl<C: BrokerConnection> ConnectionManager<C> {
    /// Start building a [`ConnectionManager`] on top of a transport factory.
    pub fn builder<F>(factory: F) -> ConnectionManagerBuilder<F>
    where
        F: TransportFactory<Connection = C>,
    {
        ConnectionManagerBuilder::new(factory)
    }

    /// Build a dispatch unit for `spec`, bound to the shared channel and exchanges, and
    /// start it.
    ///
    /// Can be called any number of times: every consumer shares the same connection and
    /// channel. Failures to build or start the dispatch unit are returned as they are.
    #[tracing::instrument(skip_all, name = "add_consumer")]
    pub async fn add_consumer<S>(&self, spec: S) -> Result<(), anyhow::Error>
    where
        S: ConsumerSpec<C::Channel>,
    {
        spec.dispatch_unit(self.topology.clone())?.start().await
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    pub fn channel(&self) -> &C::Channel {
        self.topology.channel()
    }

    pub fn exchange_in(&self) -> &Exchange {
        self.topology.exchange_in()
    }

    pub fn exchange_out(&self) -> &Exchange {
        self.topology.exchange_out()
    }

    pub fn topology(&self) -> &Topology<C::Channel> {
        &self.topology
    }

    /// Gracefully close the connection to the broker.
    pub async fn close(&self) -> Result<(), anyhow::Error> {
        self.connection.close().await
    }
}

/// A builder for [`ConnectionManager`].
///
/// Use [`ConnectionManager::builder`] or [`ConnectionManager::from_settings`] as entrypoint.
pub struct ConnectionManagerBuilder<F> {
    factory: F,
    retry_policy: RetryPolicy,
    exchange_in: Option<String>,
    exchange_out: Option<String>,
}

impl<F: TransportFactory> ConnectionManagerBuilder<F> {
    fn new(factory: F) -> Self {
        Self {
            factory,
            retry_policy: RetryPolicy::default(),
            exchange_in: None,
            exchange_out: None,
        }
    }

    /// Override the default retry policy (10 attempts, waiting 10s then 15s more after
    /// every failure).
    #[must_use]
    pub fn retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// The exchange inbound messages come from.
    /// If left unspecified, the default exchange is used.
    #[must_use]
    pub fn input_exchange(mut self, name: impl Into<String>) -> Self {
        self.exchange_in = Some(name.into());
        self
    }

    /// The exchange results are published to. It is mandatory.
    #[must_use]
    pub fn output_exchange(mut self, name: impl Into<String>) -> Self {
        self.exchange_out = Some(name.into());
        self
    }

    /// Use the `EXCHANGE` and `EXCHANGE_OUT` settings.
    #[must_use]
    pub fn exchanges_from(mut self, settings: &Settings) -> Self {
        self.exchange_in = settings.exchange_in().map(ToOwned::to_owned);
        self.exchange_out = settings.exchange_out().map(ToOwned::to_owned);
        self
    }

    /// Connect to the broker and set up the topology.
    ///
    /// This can take a long time: with the default retry policy up to nine backoff waits,
    /// more than ten minutes in total, are observed before giving up.
    pub async fn establish(self) -> Result<ConnectionManager<F::Connection>, BootstrapError> {
        self.establish_until_shutdown(std::future::pending()).await
    }

    /// Same as [`ConnectionManagerBuilder::establish`], but the backoff waits are abandoned
    /// as soon as `shutdown` resolves.
    pub async fn establish_until_shutdown(
        self,
        shutdown: impl Future<Output = ()>,
    ) -> Result<ConnectionManager<F::Connection>, BootstrapError> {
        let connection =
            retry::connect_with_retry(&self.factory, &self.retry_policy, shutdown).await?;
        let topology = topology::setup_topology(
            &connection,
            self.exchange_in.as_deref(),
            self.exchange_out.as_deref(),
        )
        .await?;
        Ok(ConnectionManager {
            connection,
            topology,
        })
    }
}

use crate::amqp::transport::{BrokerChannel, BrokerConnection};
use crate::connection::BootstrapError;
use lapin::ExchangeKind;
use tracing::{debug, error, info};

/// The prefix reserved by RabbitMq for the exchanges it pre-declares.
const PREDECLARED_PREFIX: &str = "amq.";

/// A named routing endpoint on the broker.
#[derive(Debug, Clone)]
pub struct Exchange {
    name: String,
    kind: ExchangeKind,
}

impl Exchange {
    /// A direct exchange: messages are delivered to the bindings whose routing key matches
    /// exactly.
    pub fn direct(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ExchangeKind::Direct,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &ExchangeKind {
        &self.kind
    }

    /// `true` for the broker's unnamed default exchange.
    pub fn is_default(&self) -> bool {
        self.name.is_empty()
    }

    /// `true` for exchanges that exist on every broker and must not be declared.
    pub fn is_predeclared(&self) -> bool {
        self.is_default() || self.name.starts_with(PREDECLARED_PREFIX)
    }
}

/// The channel and the two exchanges every dispatch unit is bound to.
///
/// Dispatch units get their own copy: cloning a channel only clones a handle to the same
/// underlying conduit.
#[derive(Debug, Clone)]
pub struct Topology<Ch> {
    channel: Ch,
    exchange_in: Exchange,
    exchange_out: Exchange,
}

impl<Ch> Topology<Ch> {
    pub fn new(channel: Ch, exchange_in: Exchange, exchange_out: Exchange) -> Self {
        Self {
            channel,
            exchange_in,
            exchange_out,
        }
    }

    pub fn channel(&self) -> &Ch {
        &self.channel
    }

    /// Where inbound messages come from.
    pub fn exchange_in(&self) -> &Exchange {
        &self.exchange_in
    }

    /// Where results are published.
    pub fn exchange_out(&self) -> &Exchange {
        &self.exchange_out
    }
}

/// Open a channel on `connection` and declare the input and output exchanges.
///
/// An unset input exchange resolves to the default exchange. An unset, or empty, output
/// exchange is a fatal configuration error.
#[tracing::instrument(name = "rabbitmq_setup_topology", skip(connection))]
pub(crate) async fn setup_topology<C>(
    connection: &C,
    exchange_in: Option<&str>,
    exchange_out: Option<&str>,
) -> Result<Topology<C::Channel>, BootstrapError>
where
    C: BrokerConnection,
{
    let channel = connection
        .create_channel()
        .await
        .map_err(BootstrapError::Topology)?;

    let exchange_in = Exchange::direct(exchange_in.unwrap_or_default());
    declare(&channel, &exchange_in).await?;

    let exchange_out = match exchange_out.filter(|name| !name.is_empty()) {
        Some(name) => Exchange::direct(name),
        None => {
            error!("An output exchange must be configured. Exiting.");
            return Err(BootstrapError::MissingOutputExchange);
        }
    };
    declare(&channel, &exchange_out).await?;

    info!(
        exchange_in = exchange_in.name(),
        exchange_out = exchange_out.name(),
        "Connection to AMQP host established"
    );
    Ok(Topology::new(channel, exchange_in, exchange_out))
}

async fn declare<Ch: BrokerChannel>(channel: &Ch, exchange: &Exchange) -> Result<(), BootstrapError> {
    if exchange.is_predeclared() {
        debug!(exchange = exchange.name(), "Skipping declaration of a pre-declared exchange");
        return Ok(());
    }
    channel
        .declare_exchange(exchange)
        .await
        .map_err(BootstrapError::Topology)
}

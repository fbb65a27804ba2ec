use carrot_relay::amqp::transport::{BrokerChannel, BrokerConnection, TransportFactory};
use carrot_relay::connection::{Exchange, RetryPolicy};
use fake::{Fake, Faker};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// An in-memory broker: it refuses a configurable number of connections, then hands out
/// connections whose channels record the exchanges they declare.
#[derive(Debug, Clone, Default)]
pub struct FakeBroker {
    state: Arc<Mutex<BrokerState>>,
}

#[derive(Debug, Default)]
struct BrokerState {
    refusals_left: u32,
    attempts: u32,
    channels_opened: u32,
    closed_connections: u32,
    /// Exchange name -> exchange kind.
    exchanges: BTreeMap<String, String>,
    /// Every `exchange.declare` received, in order.
    declarations: Vec<String>,
}

impl FakeBroker {
    /// A broker that accepts every connection.
    pub fn reachable() -> Self {
        Self::default()
    }

    /// A broker that refuses the first `refusals` connection attempts.
    pub fn refusing(refusals: u32) -> Self {
        let broker = Self::default();
        broker.state().refusals_left = refusals;
        broker
    }

    /// A broker that refuses every connection attempt.
    pub fn unreachable() -> Self {
        Self::refusing(u32::MAX)
    }

    /// Pretend `name` already exists on the broker with the given kind.
    pub fn with_existing_exchange(self, name: &str, kind: lapin::ExchangeKind) -> Self {
        self.state()
            .exchanges
            .insert(name.to_owned(), format!("{kind:?}"));
        self
    }

    pub fn attempts(&self) -> u32 {
        self.state().attempts
    }

    pub fn channels_opened(&self) -> u32 {
        self.state().channels_opened
    }

    pub fn closed_connections(&self) -> u32 {
        self.state().closed_connections
    }

    pub fn exchanges(&self) -> Vec<String> {
        self.state().exchanges.keys().cloned().collect()
    }

    pub fn declarations(&self) -> Vec<String> {
        self.state().declarations.clone()
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap()
    }
}

#[async_trait::async_trait]
impl TransportFactory for FakeBroker {
    type Connection = FakeConnection;

    fn endpoint(&self) -> String {
        "fake-rabbit:5672".into()
    }

    async fn connect(&self) -> Result<FakeConnection, anyhow::Error> {
        let mut state = self.state();
        state.attempts += 1;
        if state.refusals_left > 0 {
            state.refusals_left -= 1;
            anyhow::bail!("Connection refused");
        }
        Ok(FakeConnection {
            broker: self.clone(),
        })
    }
}

#[derive(Debug)]
pub struct FakeConnection {
    broker: FakeBroker,
}

#[async_trait::async_trait]
impl BrokerConnection for FakeConnection {
    type Channel = FakeChannel;

    async fn create_channel(&self) -> Result<FakeChannel, anyhow::Error> {
        let mut state = self.broker.state();
        state.channels_opened += 1;
        Ok(FakeChannel {
            id: state.channels_opened,
            broker: self.broker.clone(),
        })
    }

    async fn close(&self) -> Result<(), anyhow::Error> {
        self.broker.state().closed_connections += 1;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct FakeChannel {
    pub id: u32,
    broker: FakeBroker,
}

#[async_trait::async_trait]
impl BrokerChannel for FakeChannel {
    async fn declare_exchange(&self, exchange: &Exchange) -> Result<(), anyhow::Error> {
        let mut state = self.broker.state();
        state.declarations.push(exchange.name().to_owned());
        let kind = format!("{:?}", exchange.kind());
        match state.exchanges.get(exchange.name()) {
            Some(existing) if *existing != kind => anyhow::bail!(
                "PRECONDITION_FAILED - inequivalent arg 'type' for exchange '{}'",
                exchange.name()
            ),
            Some(_) => Ok(()),
            None => {
                state.exchanges.insert(exchange.name().to_owned(), kind);
                Ok(())
            }
        }
    }
}

/// A random exchange name, unique across tests.
pub fn exchange_name(prefix: &str) -> String {
    format!("{prefix}-{}", Faker.fake::<u64>())
}

/// The sum of the waits observed before giving up, or before the `attempts`-th attempt.
pub fn total_wait(policy: &RetryPolicy, attempts: usize) -> Duration {
    policy.schedule().take(attempts - 1).sum()
}

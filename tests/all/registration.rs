use crate::helpers::{FakeBroker, FakeChannel};
use carrot_relay::connection::{ConnectionManager, Topology};
use carrot_relay::consumers::{ConsumerSpec, DispatchUnit};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Failure {
    None,
    OnBuild,
    OnStart,
}

/// A consumer that records what it has been bound to.
struct RecordingSpec {
    name: &'static str,
    failure: Failure,
    log: Arc<Mutex<Vec<String>>>,
}

struct RecordingUnit {
    name: &'static str,
    failure: Failure,
    topology: Topology<FakeChannel>,
    log: Arc<Mutex<Vec<String>>>,
}

impl ConsumerSpec<FakeChannel> for RecordingSpec {
    type Unit = RecordingUnit;

    fn dispatch_unit(self, topology: Topology<FakeChannel>) -> Result<RecordingUnit, anyhow::Error> {
        if self.failure == Failure::OnBuild {
            anyhow::bail!("{} cannot be built", self.name);
        }
        Ok(RecordingUnit {
            name: self.name,
            failure: self.failure,
            topology,
            log: self.log,
        })
    }
}

#[async_trait::async_trait]
impl DispatchUnit for RecordingUnit {
    async fn start(self) -> Result<(), anyhow::Error> {
        if self.failure == Failure::OnStart {
            anyhow::bail!("{} cannot start", self.name);
        }
        self.log.lock().unwrap().push(format!(
            "{} on channel {}: {} -> {}",
            self.name,
            self.topology.channel().id,
            self.topology.exchange_in().name(),
            self.topology.exchange_out().name()
        ));
        Ok(())
    }
}

async fn manager(broker: &FakeBroker) -> ConnectionManager<crate::helpers::FakeConnection> {
    ConnectionManager::builder(broker.clone())
        .input_exchange("jobs")
        .output_exchange("results")
        .establish()
        .await
        .unwrap()
}

#[tokio::test]
async fn consumers_share_the_channel_and_the_exchanges() {
    // Arrange
    let broker = FakeBroker::reachable();
    let manager = manager(&broker).await;
    let log = Arc::new(Mutex::new(vec![]));

    // Act
    for name in ["first", "second"] {
        manager
            .add_consumer(RecordingSpec {
                name,
                failure: Failure::None,
                log: log.clone(),
            })
            .await
            .unwrap();
    }

    // Assert
    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "first on channel 1: jobs -> results".to_owned(),
            "second on channel 1: jobs -> results".to_owned(),
        ]
    );
    assert_eq!(broker.channels_opened(), 1);
}

#[tokio::test]
async fn dispatch_unit_construction_failures_are_returned_unchanged() {
    let broker = FakeBroker::reachable();
    let manager = manager(&broker).await;
    let log = Arc::new(Mutex::new(vec![]));

    let error = manager
        .add_consumer(RecordingSpec {
            name: "broken",
            failure: Failure::OnBuild,
            log: log.clone(),
        })
        .await
        .unwrap_err();

    assert_eq!(error.to_string(), "broken cannot be built");
    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn start_failures_are_returned_unchanged() {
    // Arrange
    let broker = FakeBroker::reachable();
    let manager = manager(&broker).await;
    let log = Arc::new(Mutex::new(vec![]));

    // Act
    let error = manager
        .add_consumer(RecordingSpec {
            name: "stuck",
            failure: Failure::OnStart,
            log: log.clone(),
        })
        .await
        .unwrap_err();

    // Assert
    assert_eq!(error.to_string(), "stuck cannot start");
    // The manager is still usable after a failed registration.
    manager
        .add_consumer(RecordingSpec {
            name: "healthy",
            failure: Failure::None,
            log: log.clone(),
        })
        .await
        .unwrap();
    assert_eq!(log.lock().unwrap().len(), 1);
}

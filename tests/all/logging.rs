use crate::helpers::FakeBroker;
use carrot_relay::connection::{BootstrapError, ConnectionManager};
use std::io::Write;
use std::sync::{Arc, Mutex};
use tracing::subscriber::DefaultGuard;

/// Collects everything written by a `fmt` subscriber.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl CapturedLogs {
    /// Route the events of the current thread to a fresh buffer.
    fn install() -> (Self, DefaultGuard) {
        let logs = Self::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let guard = tracing::subscriber::set_default(subscriber);
        (logs, guard)
    }

    fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.0.lock().unwrap())
            .lines()
            .map(ToOwned::to_owned)
            .collect()
    }

    fn count(&self, level: &str, needle: &str) -> usize {
        self.lines()
            .iter()
            .filter(|line| line.contains(level) && line.contains(needle))
            .count()
    }
}

#[tokio::test(start_paused = true)]
async fn every_failed_attempt_is_logged_once() {
    // Arrange
    let (logs, _guard) = CapturedLogs::install();

    // Act
    let result = ConnectionManager::builder(FakeBroker::unreachable())
        .output_exchange("results")
        .establish()
        .await;

    // Assert
    assert!(matches!(
        result,
        Err(BootstrapError::RetriesExhausted { attempts: 10, .. })
    ));
    assert_eq!(logs.count("ERROR", "remaining"), 10);
    assert_eq!(logs.count("ERROR", "Connection refused. 9 tries remaining"), 1);
    assert_eq!(logs.count("ERROR", "Connection refused. 1 try remaining"), 1);
    assert_eq!(logs.count("ERROR", "Connection refused. 0 tries remaining"), 1);
    assert_eq!(logs.count("INFO", "Trying to connect again in"), 9);
    assert_eq!(logs.count("INFO", "Trying to connect again in 10 seconds"), 1);
    assert_eq!(logs.count("INFO", "Trying to connect again in 130 seconds"), 1);
    assert_eq!(logs.count("INFO", "Connecting to AMQP host: fake-rabbit:5672"), 1);
}

#[tokio::test]
async fn a_missing_output_exchange_is_logged() {
    // Arrange
    let (logs, _guard) = CapturedLogs::install();

    // Act
    let result = ConnectionManager::builder(FakeBroker::reachable())
        .establish()
        .await;

    // Assert
    assert!(matches!(result, Err(BootstrapError::MissingOutputExchange)));
    assert_eq!(
        logs.count("ERROR", "An output exchange must be configured. Exiting."),
        1
    );
    assert_eq!(logs.count("INFO", "Connection to AMQP host established"), 0);
}

#[tokio::test]
async fn a_successful_bootstrap_is_logged() {
    let (logs, _guard) = CapturedLogs::install();

    let interrupted = ConnectionManager::builder(FakeBroker::refusing(1))
        .output_exchange("results")
        .establish_until_shutdown(std::future::ready(()))
        .await;
    assert!(matches!(interrupted, Err(BootstrapError::Interrupted)));

    // The shutdown fired during the first backoff: no success line.
    assert_eq!(logs.count("INFO", "Connection to AMQP host established"), 0);

    ConnectionManager::builder(FakeBroker::reachable())
        .output_exchange("results")
        .establish()
        .await
        .unwrap();

    assert_eq!(logs.count("INFO", "Connection to AMQP host established"), 1);
    assert_eq!(logs.count("ERROR", "remaining"), 1);
}

use crate::amqp::transport::TransportFactory;
use crate::connection::BootstrapError;
use futures_util::FutureExt;
use std::future::Future;
use std::time::Duration;
use tracing::{error, info};

const DEFAULT_MAX_ATTEMPTS: u32 = 10;
const DEFAULT_INITIAL_WAIT: Duration = Duration::from_secs(10);
const DEFAULT_WAIT_INCREMENT: Duration = Duration::from_secs(15);

/// How many times, and how patiently, we try to connect to the broker.
///
/// The wait between two attempts grows linearly: with the defaults we wait 10, 25, 40, 55, ...
/// seconds, for at most 10 attempts. There is no wait after the last failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_wait: Duration,
    wait_increment: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_wait: DEFAULT_INITIAL_WAIT,
            wait_increment: DEFAULT_WAIT_INCREMENT,
        }
    }
}

impl RetryPolicy {
    /// `max_attempts` counts the first attempt too. It is clamped to at least 1.
    pub fn new(max_attempts: u32, initial_wait: Duration, wait_increment: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_wait,
            wait_increment,
        }
    }

    /// Total number of connection attempts, including the first one.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// The wait inserted after the `failed_attempts`-th consecutive failure.
    ///
    /// `None` once the attempt budget is spent.
    pub fn wait_after(&self, failed_attempts: u32) -> Option<Duration> {
        if failed_attempts == 0 || failed_attempts >= self.max_attempts {
            return None;
        }
        Some(self.initial_wait + self.wait_increment * (failed_attempts - 1))
    }

    /// Every wait of the schedule, in order.
    pub fn schedule(&self) -> impl Iterator<Item = Duration> + '_ {
        (1..self.max_attempts).filter_map(|failed| self.wait_after(failed))
    }
}

/// Connect through `factory`, retrying according to `policy`.
///
/// The backoff waits race against `shutdown`: if it resolves first we give up with
/// [`BootstrapError::Interrupted`]. An attempt in flight is never cancelled.
#[tracing::instrument(name = "rabbitmq_connect_with_retry", skip_all)]
pub(crate) async fn connect_with_retry<F>(
    factory: &F,
    policy: &RetryPolicy,
    shutdown: impl Future<Output = ()>,
) -> Result<F::Connection, BootstrapError>
where
    F: TransportFactory,
{
    let endpoint = factory.endpoint();
    info!(%endpoint, "Connecting to AMQP host: {endpoint}");

    let shutdown = shutdown.fuse();
    tokio::pin!(shutdown);

    let mut failed_attempts = 0;
    loop {
        let e = match factory.connect().await {
            Ok(connection) => return Ok(connection),
            Err(e) => e,
        };
        failed_attempts += 1;
        let attempts_remaining = policy.max_attempts - failed_attempts;
        error!(
            %endpoint,
            attempts_remaining,
            error = ?e,
            "{e:#}. {attempts_remaining} {} remaining",
            if attempts_remaining == 1 { "try" } else { "tries" }
        );

        let Some(wait) = policy.wait_after(failed_attempts) else {
            return Err(BootstrapError::RetriesExhausted {
                attempts: failed_attempts,
                source: e,
            });
        };
        info!(
            wait_seconds = wait.as_secs(),
            "Trying to connect again in {} seconds",
            wait.as_secs()
        );
        tokio::select! {
            biased;

            _ = &mut shutdown => {
                info!("Shutdown requested while waiting to reconnect");
                return Err(BootstrapError::Interrupted);
            }
            _ = tokio::time::sleep(wait) => {}
        }
    }
}

/// Why a [`ConnectionManager`](super::ConnectionManager) could not be established.
///
/// Nothing here is recoverable by the manager itself: the orchestration layer is expected to
/// log the error and terminate with [`BootstrapError::exit_code`].
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    /// Every connection attempt failed.
    #[error("Failed to connect to RabbitMQ after {attempts} attempts")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },
    /// No output exchange has been configured. This is a deployment defect and it is never
    /// retried.
    #[error("An output exchange must be configured")]
    MissingOutputExchange,
    /// The channel could not be opened or an exchange could not be declared.
    #[error("Failed to set up the RabbitMQ topology")]
    Topology(#[source] anyhow::Error),
    /// A shutdown signal was received while waiting to retry.
    #[error("Interrupted by a shutdown signal while waiting to reconnect")]
    Interrupted,
}

impl BootstrapError {
    /// The process exit status matching this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Interrupted => 0,
            Self::RetriesExhausted { .. } | Self::MissingOutputExchange | Self::Topology(_) => 1,
        }
    }
}

use crate::connection::Topology;

/// A description of a consumer, turned into a [`DispatchUnit`] once the topology exists.
///
/// `Ch` is the channel type of the connection the consumer is attached to.
pub trait ConsumerSpec<Ch>: Send + 'static {
    type Unit: DispatchUnit;

    /// Bind the consumer to the shared channel and to the input/output exchanges.
    fn dispatch_unit(self, topology: Topology<Ch>) -> Result<Self::Unit, anyhow::Error>;
}

/// A consumer ready to be started.
#[async_trait::async_trait]
pub trait DispatchUnit: Send + 'static {
    /// Start consuming.
    ///
    /// Implementations are expected to return once consumption has been set up, running the
    /// consume loop in the background.
    async fn start(self) -> Result<(), anyhow::Error>;
}

//! Connection parameters, the `lapin` connection factory and the transport seams used by
//! [`ConnectionManager`](crate::connection::ConnectionManager).

pub mod configuration;
mod factory;
pub mod transport;

pub use factory::ConnectionFactory;
pub use lapin::{Channel, Connection};

pub use lapin::{options, types, BasicProperties, ExchangeKind};

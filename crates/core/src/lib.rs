// rjms: session-oriented messaging client core.
//
// Coordinates connection and session lifecycles on top of a channel-based
// broker connection. Frame I/O, envelope encoding and selector evaluation
// live behind the `transport` traits.

pub mod confirm;
pub mod connection;
pub mod consumer;
pub mod error;
pub mod factory;
pub mod identifiers;
pub mod lifecycle;
pub mod session;
pub mod subscriptions;
pub mod transport;

pub use confirm::{ConfirmListener, ConfirmationContext};
pub use connection::{Connection, ConnectionConsumer, ExceptionListener};
pub use consumer::{DeliveryState, MessageConsumer};
pub use error::{Error, Result};
pub use factory::{ConnectionFactory, ConnectionOptions, DEFAULT_TERMINATION_TIMEOUT_MS};
pub use identifiers::IdentifierRegistry;
pub use lifecycle::ConnectionState;
pub use rjms_protocol::{AcknowledgeMode, ConfirmEvent, ConnectionMetadata, Destination, OutboundMessage};
pub use session::{Session, SessionId};
pub use subscriptions::SubscriptionRegistry;
pub use transport::{BrokerChannel, BrokerConnection, ChannelParts, TransportError};

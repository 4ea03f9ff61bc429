//! Connection factory and connection options.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::connection::Connection;
use crate::error::Result;
use crate::identifiers::IdentifierRegistry;
use crate::transport::BrokerConnection;

/// Default bound on how long closing a connection may wait for the broker.
pub const DEFAULT_TERMINATION_TIMEOUT_MS: u64 = 15_000;

/// Options applied to every connection a [`ConnectionFactory`] creates.
///
/// # Example
///
/// ```ignore
/// let options = ConnectionOptions::default().termination_timeout(Duration::from_secs(5));
/// let options = ConnectionOptions::from_json(r#"{"termination_timeout_ms": 5000}"#)?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionOptions {
	/// Milliseconds [`Connection::close`] waits for the broker connection to close.
	pub termination_timeout_ms: u64,
}

impl Default for ConnectionOptions {
	fn default() -> Self {
		Self {
			termination_timeout_ms: DEFAULT_TERMINATION_TIMEOUT_MS,
		}
	}
}

impl ConnectionOptions {
	pub fn new() -> Self {
		Self::default()
	}

	/// Parses options from JSON; missing fields take their defaults.
	pub fn from_json(json: &str) -> Result<Self> {
		Ok(serde_json::from_str(json)?)
	}

	pub fn termination_timeout(mut self, timeout: Duration) -> Self {
		self.termination_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
		self
	}

	pub fn termination_timeout_duration(&self) -> Duration {
		Duration::from_millis(self.termination_timeout_ms)
	}
}

/// Creates connections that share one identifier registry.
///
/// Client identifiers are unique among the live connections of a factory
/// (and of any factory built with the same registry through
/// [`with_registry`](Self::with_registry)).
#[derive(Debug, Clone, Default)]
pub struct ConnectionFactory {
	options: ConnectionOptions,
	identifiers: Arc<IdentifierRegistry>,
}

impl ConnectionFactory {
	pub fn new(options: ConnectionOptions) -> Self {
		Self::with_registry(options, Arc::new(IdentifierRegistry::new()))
	}

	pub fn with_registry(options: ConnectionOptions, identifiers: Arc<IdentifierRegistry>) -> Self {
		Self { options, identifiers }
	}

	pub fn options(&self) -> &ConnectionOptions {
		&self.options
	}

	pub fn identifiers(&self) -> &Arc<IdentifierRegistry> {
		&self.identifiers
	}

	/// Wraps an already open broker connection in a [`Connection`].
	pub fn connect(&self, broker: impl BrokerConnection + 'static) -> Connection {
		let timeout = self.options.termination_timeout_duration();
		tracing::debug!(target: "rjms.connection", termination_timeout_ms = self.options.termination_timeout_ms, "connection created");
		Connection::new(Box::new(broker), Arc::clone(&self.identifiers), timeout)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::transport::fake::FakeBrokerBuilder;

	#[test]
	fn default_timeout_is_fifteen_seconds() {
		assert_eq!(ConnectionOptions::default().termination_timeout_duration(), Duration::from_secs(15));
	}

	#[test]
	fn options_parse_with_defaults() {
		assert_eq!(ConnectionOptions::from_json("{}").unwrap(), ConnectionOptions::default());
		let options = ConnectionOptions::from_json(r#"{"termination_timeout_ms": 250}"#).unwrap();
		assert_eq!(options.termination_timeout_duration(), Duration::from_millis(250));
		assert!(ConnectionOptions::from_json(r#"{"termination_timeout_ms": "soon"}"#).is_err());
	}

	#[test]
	fn connections_inherit_factory_options() {
		let factory = ConnectionFactory::new(ConnectionOptions::new().termination_timeout(Duration::from_millis(40)));
		let (broker, _controller) = FakeBrokerBuilder::new().build();
		let connection = factory.connect(broker);
		assert_eq!(connection.termination_timeout(), Duration::from_millis(40));
	}

	#[test]
	fn factories_can_share_a_registry() {
		let shared = Arc::new(IdentifierRegistry::new());
		let a = ConnectionFactory::with_registry(ConnectionOptions::default(), Arc::clone(&shared));
		let b = ConnectionFactory::with_registry(ConnectionOptions::default(), Arc::clone(&shared));
		assert!(Arc::ptr_eq(a.identifiers(), b.identifiers()));
	}
}

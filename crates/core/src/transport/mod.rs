//! Broker transport boundary.
//!
//! The lifecycle core never touches frames or sockets. It drives an already
//! open broker connection through [`BrokerConnection`] and the per-session
//! channels it hands out through [`BrokerChannel`]. Both traits return boxed
//! futures so they stay object safe.
//!
//! Each channel also yields a stream of publisher-confirm reports
//! ([`ChannelParts::confirms`]). The session that owns the channel drains it.

pub mod fake;

use std::future::Future;
use std::pin::Pin;

use rjms_protocol::{ConfirmEvent, OutboundMessage};
use tokio::sync::mpsc;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Failure reported by the broker connection or one of its channels.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
	/// The resource was already closed when the operation ran.
	#[error("already closed")]
	AlreadyClosed,

	/// The broker or the client library shut the resource down.
	#[error("shutdown signalled: {0}")]
	Shutdown(String),

	#[error(transparent)]
	Io(#[from] std::io::Error),
}

impl TransportError {
	/// Returns `true` for signals that only mean "this is closed already".
	pub fn is_already_closed(&self) -> bool {
		matches!(self, Self::AlreadyClosed | Self::Shutdown(_))
	}
}

/// Maps already-closed signals from a close call to success.
pub fn normalize_close(result: Result<(), TransportError>) -> Result<(), TransportError> {
	match result {
		Err(err) if err.is_already_closed() => {
			tracing::trace!(target: "rjms.transport", error = %err, "close on already closed resource");
			Ok(())
		}
		other => other,
	}
}

/// A freshly opened channel and its confirm stream.
pub struct ChannelParts {
	pub channel: Box<dyn BrokerChannel>,
	/// Publisher-confirm reports, in the order the broker sends them.
	pub confirms: mpsc::UnboundedReceiver<ConfirmEvent>,
}

/// An open connection to the broker, exclusively owned by one [`Connection`].
///
/// [`Connection`]: crate::Connection
pub trait BrokerConnection: Send + Sync {
	/// Opens a new channel for a session.
	fn create_channel(&self) -> BoxFuture<'_, Result<ChannelParts, TransportError>>;

	/// Closes the connection and every channel still open on it.
	fn close(&self) -> BoxFuture<'_, Result<(), TransportError>>;
}

/// A channel owned by one session.
pub trait BrokerChannel: Send + Sync {
	/// Sequence number the next successful [`publish`](Self::publish) will be confirmed under.
	fn next_publish_seq_no(&self) -> u64;

	fn publish<'a>(&'a self, message: &'a OutboundMessage) -> BoxFuture<'a, Result<(), TransportError>>;

	/// Creates or re-binds the broker-side resources backing a durable subscription.
	fn declare_subscription<'a>(&'a self, topic: &'a str, name: &'a str) -> BoxFuture<'a, Result<(), TransportError>>;

	/// Removes the broker-side resources of a durable subscription.
	fn delete_subscription<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<(), TransportError>>;

	fn close(&self) -> BoxFuture<'_, Result<(), TransportError>>;
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn already_closed_signals_normalize_to_success() {
		assert!(normalize_close(Err(TransportError::AlreadyClosed)).is_ok());
		assert!(normalize_close(Err(TransportError::Shutdown("peer".into()))).is_ok());
		assert!(normalize_close(Ok(())).is_ok());
	}

	#[test]
	fn io_failure_survives_normalization() {
		let result = normalize_close(Err(TransportError::Io(std::io::Error::other("reset"))));
		assert!(matches!(result, Err(TransportError::Io(_))));
	}
}

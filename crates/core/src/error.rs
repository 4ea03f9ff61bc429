//! Error types for the session lifecycle core.

use std::time::Duration;

use crate::transport::TransportError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	/// Operation invoked on a closed object, or a once-only precondition has elapsed.
	#[error("illegal state: {0}")]
	IllegalState(String),

	/// Another live connection sharing the registry already holds this client identifier.
	#[error("a connection with client identifier [{0}] already exists")]
	DuplicateIdentifier(String),

	/// Optional capability that this client deliberately does not implement.
	#[error("operation not supported: {0}")]
	Unsupported(&'static str),

	/// Lower-level failure reported by the broker connection or channel.
	#[error("transport failure: {0}")]
	Transport(#[from] TransportError),

	/// Closing the broker connection did not finish within the termination timeout.
	#[error("broker connection close did not complete within {0:?}")]
	CloseTimeout(Duration),

	/// Unknown durable subscription or destination.
	#[error("invalid destination: {0}")]
	InvalidDestination(String),

	#[error("invalid configuration: {0}")]
	Config(#[from] serde_json::Error),
}

impl Error {
	pub(crate) fn closed(what: &str) -> Self {
		Self::IllegalState(format!("{what} is closed"))
	}

	pub fn is_illegal_state(&self) -> bool {
		matches!(self, Self::IllegalState(_))
	}

	pub fn is_duplicate_identifier(&self) -> bool {
		matches!(self, Self::DuplicateIdentifier(_))
	}

	pub fn is_unsupported(&self) -> bool {
		matches!(self, Self::Unsupported(_))
	}

	pub fn is_transport(&self) -> bool {
		matches!(self, Self::Transport(_))
	}
}

//! Session-level enums shared by the core and the transport glue.

use std::fmt;

use serde::{Deserialize, Serialize};

/// How a session acknowledges messages it has consumed.
///
/// Numeric values match the classic session-mode constants so that
/// configuration written against other client libraries maps over as is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcknowledgeMode {
	/// Work is grouped into local transactions; acknowledgement happens on commit.
	SessionTransacted,
	/// The session acknowledges each message once it has been delivered.
	#[default]
	Auto,
	/// The application acknowledges explicitly; acknowledging one message acknowledges all prior ones.
	Client,
	/// Lazy acknowledgement; duplicates are tolerated.
	DupsOk,
	/// The application acknowledges each message individually.
	ClientIndividual,
}

impl AcknowledgeMode {
	/// Returns the numeric session-mode constant.
	pub fn code(self) -> i32 {
		match self {
			Self::SessionTransacted => 0,
			Self::Auto => 1,
			Self::Client => 2,
			Self::DupsOk => 3,
			Self::ClientIndividual => 4,
		}
	}
}

impl TryFrom<i32> for AcknowledgeMode {
	type Error = InvalidAckMode;

	fn try_from(code: i32) -> Result<Self, Self::Error> {
		match code {
			0 => Ok(Self::SessionTransacted),
			1 => Ok(Self::Auto),
			2 => Ok(Self::Client),
			3 => Ok(Self::DupsOk),
			4 => Ok(Self::ClientIndividual),
			other => Err(InvalidAckMode(other)),
		}
	}
}

impl fmt::Display for AcknowledgeMode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			Self::SessionTransacted => "session_transacted",
			Self::Auto => "auto",
			Self::Client => "client",
			Self::DupsOk => "dups_ok",
			Self::ClientIndividual => "client_individual",
		};
		f.write_str(name)
	}
}

/// Numeric acknowledgement mode that does not map to any [`AcknowledgeMode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidAckMode(pub i32);

impl fmt::Display for InvalidAckMode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "invalid acknowledgement mode {}", self.0)
	}
}

impl std::error::Error for InvalidAckMode {}

/// Target of a send or source of a receive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum Destination {
	/// Point-to-point queue.
	Queue(String),
	/// Publish/subscribe topic.
	Topic(String),
}

impl Destination {
	pub fn queue(name: impl Into<String>) -> Self {
		Self::Queue(name.into())
	}

	pub fn topic(name: impl Into<String>) -> Self {
		Self::Topic(name.into())
	}

	/// Returns the destination name without its kind.
	pub fn name(&self) -> &str {
		match self {
			Self::Queue(name) | Self::Topic(name) => name,
		}
	}

	pub fn is_topic(&self) -> bool {
		matches!(self, Self::Topic(_))
	}
}

impl fmt::Display for Destination {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Queue(name) => write!(f, "queue://{name}"),
			Self::Topic(name) => write!(f, "topic://{name}"),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn ack_mode_codes_map_back() {
		for mode in [
			AcknowledgeMode::SessionTransacted,
			AcknowledgeMode::Auto,
			AcknowledgeMode::Client,
			AcknowledgeMode::DupsOk,
			AcknowledgeMode::ClientIndividual,
		] {
			assert_eq!(AcknowledgeMode::try_from(mode.code()), Ok(mode));
		}
	}

	#[test]
	fn unknown_ack_mode_code_is_rejected() {
		assert_eq!(AcknowledgeMode::try_from(7), Err(InvalidAckMode(7)));
		assert_eq!(InvalidAckMode(-1).to_string(), "invalid acknowledgement mode -1");
	}

	#[test]
	fn destination_serializes_with_kind_tag() {
		let json = serde_json::to_value(Destination::topic("prices")).unwrap();
		assert_eq!(json, serde_json::json!({"kind": "topic", "name": "prices"}));
		assert_eq!(Destination::queue("orders").to_string(), "queue://orders");
	}
}

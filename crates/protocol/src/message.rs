//! Outbound message envelope handed to the broker channel.
//!
//! Encoding onto the wire is the channel's job; this type only carries what a
//! session hands over and what a confirmation hands back.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::types::Destination;

/// A message published through a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
	pub destination: Destination,
	/// Application-assigned identifier, if any.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub message_id: Option<String>,
	#[serde(default, skip_serializing_if = "Map::is_empty")]
	pub properties: Map<String, Value>,
	/// Raw payload, base64 encoded when serialized.
	#[serde(serialize_with = "serialize_body", deserialize_with = "deserialize_body")]
	pub body: Vec<u8>,
}

impl OutboundMessage {
	pub fn new(destination: Destination, body: impl Into<Vec<u8>>) -> Self {
		Self {
			destination,
			message_id: None,
			properties: Map::new(),
			body: body.into(),
		}
	}

	pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
		self.message_id = Some(id.into());
		self
	}

	pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
		self.properties.insert(key.into(), value.into());
		self
	}
}

fn serialize_body<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
	serializer.serialize_str(&STANDARD.encode(body))
}

fn deserialize_body<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
	let encoded = String::deserialize(deserializer)?;
	STANDARD.decode(encoded.as_bytes()).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn body_is_base64_on_the_wire() {
		let message = OutboundMessage::new(Destination::queue("orders"), b"hi".to_vec()).with_property("priority", 4);
		let json = serde_json::to_value(&message).unwrap();
		assert_eq!(json["body"], "aGk=");
		assert_eq!(json["properties"]["priority"], 4);
		assert!(json.get("message_id").is_none());
	}

	#[test]
	fn malformed_body_fails_to_parse() {
		let json = r#"{"destination": {"kind": "queue", "name": "q"}, "body": "***"}"#;
		assert!(serde_json::from_str::<OutboundMessage>(json).is_err());
	}
}

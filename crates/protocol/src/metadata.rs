//! Static connection metadata.

use serde::Serialize;

/// Describes the provider and the messaging API level it implements.
///
/// The values are fixed for a given build; every connection hands out the
/// same [`CONNECTION_METADATA`] instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionMetadata {
	pub api_version: &'static str,
	pub api_major_version: u32,
	pub api_minor_version: u32,
	pub provider_name: &'static str,
	pub provider_version: &'static str,
	pub provider_major_version: u32,
	pub provider_minor_version: u32,
	/// Names of the optional message properties this provider supports.
	pub supported_properties: &'static [&'static str],
}

pub static CONNECTION_METADATA: ConnectionMetadata = ConnectionMetadata {
	api_version: "1.1",
	api_major_version: 1,
	api_minor_version: 1,
	provider_name: "rjms",
	provider_version: env!("CARGO_PKG_VERSION"),
	provider_major_version: parse_version_part(env!("CARGO_PKG_VERSION_MAJOR")),
	provider_minor_version: parse_version_part(env!("CARGO_PKG_VERSION_MINOR")),
	supported_properties: &["JMSXGroupID", "JMSXGroupSeq", "JMSXDeliveryCount"],
};

const fn parse_version_part(digits: &str) -> u32 {
	let bytes = digits.as_bytes();
	let mut value = 0u32;
	let mut i = 0;
	while i < bytes.len() {
		value = value * 10 + (bytes[i] - b'0') as u32;
		i += 1;
	}
	value
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn provider_version_matches_package() {
		let expected = format!("{}.{}", CONNECTION_METADATA.provider_major_version, CONNECTION_METADATA.provider_minor_version);
		assert!(CONNECTION_METADATA.provider_version.starts_with(&expected));
	}

	#[test]
	fn metadata_serializes() {
		let json = serde_json::to_value(&CONNECTION_METADATA).unwrap();
		assert_eq!(json["provider_name"], "rjms");
		assert_eq!(json["api_version"], "1.1");
	}
}

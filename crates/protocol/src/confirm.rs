//! Publisher-confirm events as reported by a broker channel.

use serde::{Deserialize, Serialize};

/// Outcome report for one or more published messages.
///
/// `delivery_tag` is the channel's publish sequence number. When `multiple`
/// is set the report covers every outstanding tag up to and including
/// `delivery_tag`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmEvent {
	pub delivery_tag: u64,
	#[serde(default)]
	pub multiple: bool,
	/// `true` for an ack, `false` for a nack (message considered lost).
	pub ack: bool,
}

impl ConfirmEvent {
	pub fn ack(delivery_tag: u64) -> Self {
		Self {
			delivery_tag,
			multiple: false,
			ack: true,
		}
	}

	pub fn nack(delivery_tag: u64) -> Self {
		Self {
			delivery_tag,
			multiple: false,
			ack: false,
		}
	}

	pub fn up_to(mut self) -> Self {
		self.multiple = true;
		self
	}

	/// Returns `true` when this report settles `tag`.
	pub fn covers(&self, tag: u64) -> bool {
		if self.multiple { tag <= self.delivery_tag } else { tag == self.delivery_tag }
	}
}

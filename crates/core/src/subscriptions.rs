//! Durable subscriptions shared by the sessions of one connection.
//!
//! A name maps to the consumer that most recently attached to it. Closed
//! consumers stay registered: the subscription outlives them and a later
//! session may re-attach under the same name.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::consumer::MessageConsumer;

/// Result of reserving a subscription name for a new consumer.
#[derive(Debug)]
pub enum Claim {
	/// Nothing was registered under the name.
	Vacant,
	/// An inactive subscription on the same topic is being re-attached.
	Reattach(MessageConsumer),
	/// An inactive subscription on another topic must be dropped first.
	Retarget(MessageConsumer),
}

impl Claim {
	fn into_previous(self) -> Option<MessageConsumer> {
		match self {
			Self::Vacant => None,
			Self::Reattach(previous) | Self::Retarget(previous) => Some(previous),
		}
	}
}

/// Why a subscription could not be removed.
#[derive(Debug)]
pub enum RemoveError {
	Unknown,
	/// A live consumer still holds the subscription.
	Active(MessageConsumer),
}

#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
	entries: Mutex<HashMap<String, MessageConsumer>>,
}

impl SubscriptionRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn get(&self, name: &str) -> Option<MessageConsumer> {
		self.entries.lock().get(name).cloned()
	}

	/// Returns `true` while a live consumer holds `name`.
	pub fn is_active(&self, name: &str) -> bool {
		self.entries.lock().get(name).is_some_and(|consumer| !consumer.is_closed())
	}

	pub fn len(&self) -> usize {
		self.entries.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Registers `consumer` under `name` unless a live consumer already holds it.
	///
	/// On conflict the active holder is returned and nothing changes.
	pub fn claim(&self, name: &str, consumer: &MessageConsumer) -> Result<Claim, MessageConsumer> {
		let mut entries = self.entries.lock();
		let claim = match entries.get(name) {
			Some(existing) if !existing.is_closed() => return Err(existing.clone()),
			Some(existing) if existing.destination() == consumer.destination() => Claim::Reattach(existing.clone()),
			Some(existing) => Claim::Retarget(existing.clone()),
			None => Claim::Vacant,
		};
		entries.insert(name.to_string(), consumer.clone());
		tracing::debug!(target: "rjms.subscriptions", name, destination = %consumer.destination(), "subscription claimed");
		Ok(claim)
	}

	/// Undoes a [`claim`](Self::claim) that could not be completed.
	///
	/// Only rolls back if `consumer` still holds the name.
	pub fn abandon(&self, name: &str, consumer: &MessageConsumer, claim: Claim) {
		let mut entries = self.entries.lock();
		if !entries.get(name).is_some_and(|current| current.same_as(consumer)) {
			return;
		}
		match claim.into_previous() {
			Some(previous) => entries.insert(name.to_string(), previous),
			None => entries.remove(name),
		};
	}

	/// Removes an inactive subscription.
	pub fn remove_inactive(&self, name: &str) -> Result<MessageConsumer, RemoveError> {
		let mut entries = self.entries.lock();
		match entries.get(name) {
			None => Err(RemoveError::Unknown),
			Some(existing) if !existing.is_closed() => Err(RemoveError::Active(existing.clone())),
			Some(_) => entries.remove(name).ok_or(RemoveError::Unknown),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::consumer::DeliveryState;
	use rjms_protocol::Destination;
	use tokio::sync::watch;

	fn consumer(topic: &str, name: &str) -> MessageConsumer {
		let (_tx, rx) = watch::channel(DeliveryState::Running);
		MessageConsumer::new(Destination::topic(topic), Some(name.to_string()), rx)
	}

	#[test]
	fn active_holder_blocks_second_claim() {
		let registry = SubscriptionRegistry::new();
		let first = consumer("prices", "sub");
		assert!(matches!(registry.claim("sub", &first), Ok(Claim::Vacant)));

		let second = consumer("prices", "sub");
		let holder = registry.claim("sub", &second).unwrap_err();
		assert!(holder.same_as(&first));
		assert!(registry.get("sub").unwrap().same_as(&first));
	}

	#[test]
	fn inactive_subscription_is_reattached_or_retargeted() {
		let registry = SubscriptionRegistry::new();
		let first = consumer("prices", "sub");
		registry.claim("sub", &first).unwrap();
		first.close();

		let again = consumer("prices", "sub");
		assert!(matches!(registry.claim("sub", &again), Ok(Claim::Reattach(prev)) if prev.same_as(&first)));
		again.close();

		let moved = consumer("trades", "sub");
		assert!(matches!(registry.claim("sub", &moved), Ok(Claim::Retarget(_))));
		assert!(registry.is_active("sub"));
	}

	#[test]
	fn abandon_restores_previous_entry() {
		let registry = SubscriptionRegistry::new();
		let first = consumer("prices", "sub");
		registry.claim("sub", &first).unwrap();
		first.close();

		let next = consumer("trades", "sub");
		let claim = registry.claim("sub", &next).unwrap();
		registry.abandon("sub", &next, claim);
		assert!(registry.get("sub").unwrap().same_as(&first));

		let fresh = consumer("news", "other");
		let claim = registry.claim("other", &fresh).unwrap();
		registry.abandon("other", &fresh, claim);
		assert!(registry.get("other").is_none());
	}

	#[test]
	fn only_inactive_subscriptions_are_removed() {
		let registry = SubscriptionRegistry::new();
		assert!(matches!(registry.remove_inactive("missing"), Err(RemoveError::Unknown)));

		let holder = consumer("prices", "sub");
		registry.claim("sub", &holder).unwrap();
		assert!(matches!(registry.remove_inactive("sub"), Err(RemoveError::Active(_))));

		holder.close();
		assert!(registry.remove_inactive("sub").is_ok());
		assert!(registry.is_empty());
	}
}

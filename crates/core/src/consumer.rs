//! Consumer handles and the delivery gate they observe.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rjms_protocol::Destination;
use tokio::sync::watch;

use crate::error::{Error, Result};

/// Whether a session currently lets its consumers deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
	Paused,
	Running,
	Closed,
}

/// Handle to a consumer created by a [`Session`](crate::Session).
///
/// Clones refer to the same consumer. Message delivery itself belongs to the
/// transport glue; it checks [`is_paused`](Self::is_paused) or waits on
/// [`wait_until_resumed`](Self::wait_until_resumed) before handing each
/// message over, so a pause takes effect after at most one in-flight delivery.
#[derive(Debug, Clone)]
pub struct MessageConsumer {
	inner: Arc<ConsumerInner>,
}

#[derive(Debug)]
struct ConsumerInner {
	destination: Destination,
	subscription: Option<String>,
	closed: AtomicBool,
	delivery: watch::Receiver<DeliveryState>,
}

impl MessageConsumer {
	pub(crate) fn new(destination: Destination, subscription: Option<String>, delivery: watch::Receiver<DeliveryState>) -> Self {
		Self {
			inner: Arc::new(ConsumerInner {
				destination,
				subscription,
				closed: AtomicBool::new(false),
				delivery,
			}),
		}
	}

	pub fn destination(&self) -> &Destination {
		&self.inner.destination
	}

	/// Durable subscription name, when this consumer backs one.
	pub fn subscription_name(&self) -> Option<&str> {
		self.inner.subscription.as_deref()
	}

	pub fn is_durable(&self) -> bool {
		self.inner.subscription.is_some()
	}

	/// A consumer is closed once it or its session is closed.
	pub fn is_closed(&self) -> bool {
		self.inner.closed.load(Ordering::SeqCst) || *self.inner.delivery.borrow() == DeliveryState::Closed
	}

	pub fn is_paused(&self) -> bool {
		*self.inner.delivery.borrow() == DeliveryState::Paused
	}

	/// Waits until the owning session lets deliveries through.
	///
	/// # Errors
	///
	/// Returns [`Error::IllegalState`] if the consumer or its session closes first.
	pub async fn wait_until_resumed(&self) -> Result<()> {
		let mut delivery = self.inner.delivery.clone();
		let state = delivery
			.wait_for(|state| *state != DeliveryState::Paused)
			.await
			.map(|state| *state)
			.unwrap_or(DeliveryState::Closed);

		if state == DeliveryState::Closed || self.inner.closed.load(Ordering::SeqCst) {
			return Err(Error::closed("consumer"));
		}
		Ok(())
	}

	/// Closes the consumer. A durable subscription stays registered but inactive.
	pub fn close(&self) {
		if !self.inner.closed.swap(true, Ordering::SeqCst) {
			tracing::debug!(target: "rjms.session", destination = %self.inner.destination, subscription = ?self.inner.subscription, "consumer closed");
		}
	}

	/// Returns `true` when both handles refer to the same consumer.
	pub fn same_as(&self, other: &MessageConsumer) -> bool {
		Arc::ptr_eq(&self.inner, &other.inner)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn wait_returns_once_running() {
		let (tx, rx) = watch::channel(DeliveryState::Paused);
		let consumer = MessageConsumer::new(Destination::queue("q"), None, rx);
		assert!(consumer.is_paused());

		let waiter = tokio::spawn({
			let consumer = consumer.clone();
			async move { consumer.wait_until_resumed().await }
		});
		tx.send_replace(DeliveryState::Running);

		waiter.await.unwrap().unwrap();
		assert!(!consumer.is_paused());
	}

	#[tokio::test]
	async fn wait_fails_when_session_closes() {
		let (tx, rx) = watch::channel(DeliveryState::Paused);
		let consumer = MessageConsumer::new(Destination::topic("t"), Some("sub".into()), rx);
		tx.send_replace(DeliveryState::Closed);

		assert!(consumer.wait_until_resumed().await.unwrap_err().is_illegal_state());
		assert!(consumer.is_closed());
	}

	#[test]
	fn closing_a_clone_closes_every_handle() {
		let (_tx, rx) = watch::channel(DeliveryState::Running);
		let consumer = MessageConsumer::new(Destination::queue("q"), None, rx);
		let other = consumer.clone();
		other.close();
		assert!(consumer.is_closed());
		assert!(consumer.same_as(&other));
	}
}

//! Sessions: units of transactional or acknowledged message work.
//!
//! A [`Session`] owns one broker channel and is owned by exactly one
//! [`Connection`](crate::Connection). The connection pauses and resumes it as
//! it is stopped and started, and closes it when the connection closes.
//! Closing a session directly also detaches it from its connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use rjms_protocol::{AcknowledgeMode, Destination, OutboundMessage};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::confirm::{self, ConfirmListener, ListenerSlot, PendingConfirms};
use crate::consumer::{DeliveryState, MessageConsumer};
use crate::error::{Error, Result};
use crate::subscriptions::{Claim, RemoveError, SubscriptionRegistry};
use crate::transport::{self, BrokerChannel, ChannelParts};

/// Identifier of a session within its connection.
pub type SessionId = u64;

/// Parent side of the session/connection relationship.
pub(crate) trait SessionOwner: Send + Sync {
	/// Drops `id` from the owner's session set. Returns `false` if it was not there.
	fn forget_session(&self, id: SessionId) -> bool;
}

/// Handle to a session. Clones refer to the same session.
#[derive(Clone)]
pub struct Session {
	inner: Arc<SessionInner>,
}

struct SessionInner {
	id: SessionId,
	owner: Weak<dyn SessionOwner>,
	transacted: bool,
	ack_mode: AcknowledgeMode,
	channel: Box<dyn BrokerChannel>,
	subscriptions: Arc<SubscriptionRegistry>,
	delivery: watch::Sender<DeliveryState>,
	closed: AtomicBool,
	consumers: Mutex<Vec<MessageConsumer>>,
	pending: Arc<PendingConfirms>,
	listener: ListenerSlot,
	dispatcher: Mutex<Option<JoinHandle<()>>>,
	// Keeps sequence-number reads and publishes paired.
	publish_lock: tokio::sync::Mutex<()>,
}

impl Session {
	/// Builds a session over a freshly opened channel and starts its confirm dispatcher.
	///
	/// Must be called from within a tokio runtime.
	pub(crate) fn new(
		id: SessionId,
		owner: Weak<dyn SessionOwner>,
		transacted: bool,
		ack_mode: AcknowledgeMode,
		subscriptions: Arc<SubscriptionRegistry>,
		parts: ChannelParts,
		initial: DeliveryState,
	) -> Self {
		let ChannelParts { channel, confirms } = parts;
		let pending = Arc::new(PendingConfirms::default());
		let listener: ListenerSlot = Arc::new(RwLock::new(None));
		let dispatcher = confirm::spawn_dispatcher(id, confirms, Arc::clone(&pending), Arc::clone(&listener));
		let (delivery, _) = watch::channel(initial);

		Self {
			inner: Arc::new(SessionInner {
				id,
				owner,
				transacted,
				ack_mode: if transacted { AcknowledgeMode::SessionTransacted } else { ack_mode },
				channel,
				subscriptions,
				delivery,
				closed: AtomicBool::new(false),
				consumers: Mutex::new(Vec::new()),
				pending,
				listener,
				dispatcher: Mutex::new(Some(dispatcher)),
				publish_lock: tokio::sync::Mutex::new(()),
			}),
		}
	}

	pub fn id(&self) -> SessionId {
		self.inner.id
	}

	pub fn is_transacted(&self) -> bool {
		self.inner.transacted
	}

	/// Effective acknowledgement mode; always [`AcknowledgeMode::SessionTransacted`] for transacted sessions.
	pub fn acknowledge_mode(&self) -> AcknowledgeMode {
		self.inner.ack_mode
	}

	pub fn is_paused(&self) -> bool {
		*self.inner.delivery.borrow() == DeliveryState::Paused
	}

	pub fn is_closed(&self) -> bool {
		self.inner.closed.load(Ordering::SeqCst)
	}

	#[cfg(test)]
	pub(crate) fn delivery_updates(&self) -> watch::Receiver<DeliveryState> {
		self.inner.delivery.subscribe()
	}

	/// Stops message delivery to this session's consumers. Redundant calls are no-ops.
	pub(crate) fn pause(&self) {
		if self.set_delivery(DeliveryState::Paused) {
			tracing::debug!(target: "rjms.session", session = self.inner.id, "paused");
		}
	}

	/// Lets message delivery resume. Redundant calls are no-ops.
	pub(crate) fn resume(&self) {
		if self.set_delivery(DeliveryState::Running) {
			tracing::debug!(target: "rjms.session", session = self.inner.id, "resumed");
		}
	}

	fn set_delivery(&self, next: DeliveryState) -> bool {
		self.inner.delivery.send_if_modified(|state| {
			if *state == DeliveryState::Closed || *state == next {
				return false;
			}
			*state = next;
			true
		})
	}

	fn ensure_open(&self) -> Result<()> {
		if self.is_closed() {
			return Err(Error::closed("session"));
		}
		Ok(())
	}

	/// Creates a non-durable consumer on `destination`.
	pub fn create_consumer(&self, destination: Destination) -> Result<MessageConsumer> {
		self.ensure_open()?;
		let consumer = MessageConsumer::new(destination, None, self.inner.delivery.subscribe());
		self.adopt(consumer)
	}

	/// Creates (or re-attaches to) the durable subscription `name` on `topic`.
	///
	/// # Errors
	///
	/// * [`Error::InvalidDestination`] if `topic` is not a topic
	/// * [`Error::IllegalState`] if a live consumer in any session of this connection holds `name`
	/// * [`Error::Transport`] if the broker rejects the subscription
	pub async fn create_durable_subscriber(&self, topic: &Destination, name: &str) -> Result<MessageConsumer> {
		self.ensure_open()?;
		if !topic.is_topic() {
			return Err(Error::InvalidDestination(format!("durable subscriptions need a topic, got {topic}")));
		}

		let consumer = MessageConsumer::new(topic.clone(), Some(name.to_string()), self.inner.delivery.subscribe());
		let claim = self
			.inner
			.subscriptions
			.claim(name, &consumer)
			.map_err(|holder| Error::IllegalState(format!("durable subscription [{name}] is already active on {}", holder.destination())))?;

		if let Err(err) = self.bind_subscription(topic, name, &claim).await {
			self.inner.subscriptions.abandon(name, &consumer, claim);
			return Err(err);
		}

		self.adopt(consumer)
	}

	async fn bind_subscription(&self, topic: &Destination, name: &str, claim: &Claim) -> Result<()> {
		if let Claim::Retarget(previous) = claim {
			tracing::debug!(target: "rjms.session", session = self.inner.id, name, from = %previous.destination(), to = %topic, "retargeting durable subscription");
			self.inner.channel.delete_subscription(name).await?;
		}
		self.inner.channel.declare_subscription(topic.name(), name).await?;
		Ok(())
	}

	/// Removes the inactive durable subscription `name`.
	pub async fn unsubscribe(&self, name: &str) -> Result<()> {
		self.ensure_open()?;
		self.inner.subscriptions.remove_inactive(name).map_err(|err| match err {
			RemoveError::Unknown => Error::InvalidDestination(format!("no durable subscription named [{name}]")),
			RemoveError::Active(_) => Error::IllegalState(format!("durable subscription [{name}] still has an active consumer")),
		})?;
		self.inner.channel.delete_subscription(name).await?;
		tracing::debug!(target: "rjms.session", session = self.inner.id, name, "unsubscribed");
		Ok(())
	}

	fn adopt(&self, consumer: MessageConsumer) -> Result<MessageConsumer> {
		let mut consumers = self.inner.consumers.lock();
		if self.is_closed() {
			consumer.close();
			return Err(Error::closed("session"));
		}
		consumers.retain(|existing| !existing.is_closed());
		consumers.push(consumer.clone());
		Ok(consumer)
	}

	/// Installs or clears the listener that receives delivery outcomes for sent messages.
	///
	/// Only messages sent while a listener is installed are tracked.
	pub fn set_confirm_listener(&self, listener: Option<Arc<dyn ConfirmListener>>) -> Result<()> {
		self.ensure_open()?;
		*self.inner.listener.write() = listener;
		Ok(())
	}

	/// Number of sent messages still waiting for a confirm.
	pub fn outstanding_confirms(&self) -> usize {
		self.inner.pending.len()
	}

	/// Publishes `message` on this session's channel.
	pub async fn send(&self, message: OutboundMessage) -> Result<()> {
		self.ensure_open()?;
		let tracked = self.inner.listener.read().is_some();

		let _guard = self.inner.publish_lock.lock().await;
		let tag = self.inner.channel.next_publish_seq_no();
		if tracked {
			self.inner.pending.track(tag, message.clone());
		}

		if let Err(err) = self.inner.channel.publish(&message).await {
			if tracked {
				self.inner.pending.discard(tag);
			}
			return Err(err.into());
		}
		Ok(())
	}

	/// Closes the session and detaches it from its connection.
	pub async fn close(&self) -> Result<()> {
		tracing::debug!(target: "rjms.session", session = self.inner.id, "close");
		if let Some(owner) = self.inner.owner.upgrade() {
			owner.forget_session(self.inner.id);
		}
		self.internal_close().await
	}

	/// Releases the channel and every consumer of this session.
	///
	/// Safe to call more than once; only the first call does any work.
	pub(crate) async fn internal_close(&self) -> Result<()> {
		if self.inner.closed.swap(true, Ordering::SeqCst) {
			return Ok(());
		}

		self.inner.delivery.send_replace(DeliveryState::Closed);
		if let Some(dispatcher) = self.inner.dispatcher.lock().take() {
			dispatcher.abort();
		}

		let consumers = std::mem::take(&mut *self.inner.consumers.lock());
		for consumer in &consumers {
			consumer.close();
		}

		transport::normalize_close(self.inner.channel.close().await)?;
		tracing::debug!(target: "rjms.session", session = self.inner.id, consumers = consumers.len(), "session closed");
		Ok(())
	}
}

impl std::fmt::Debug for Session {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Session")
			.field("id", &self.inner.id)
			.field("transacted", &self.inner.transacted)
			.field("ack_mode", &self.inner.ack_mode)
			.field("delivery", &*self.inner.delivery.borrow())
			.field("closed", &self.is_closed())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::transport::BrokerConnection;
	use crate::transport::fake::{FakeBrokerBuilder, FakeBrokerController};
	use std::sync::atomic::AtomicUsize;

	#[derive(Default)]
	struct CountingOwner {
		forgotten: AtomicUsize,
	}

	impl SessionOwner for CountingOwner {
		fn forget_session(&self, _id: SessionId) -> bool {
			self.forgotten.fetch_add(1, Ordering::SeqCst);
			true
		}
	}

	async fn session_with(builder: FakeBrokerBuilder, owner: &Arc<CountingOwner>) -> (Session, FakeBrokerController) {
		let (broker, controller) = builder.build();
		let parts = broker.create_channel().await.unwrap();
		let owner: Weak<CountingOwner> = Arc::downgrade(owner);
		let owner: Weak<dyn SessionOwner> = owner;
		let session = Session::new(
			7,
			owner,
			false,
			AcknowledgeMode::Client,
			Arc::new(SubscriptionRegistry::new()),
			parts,
			DeliveryState::Paused,
		);
		(session, controller)
	}

	#[tokio::test]
	async fn pause_resume_are_idempotent() {
		let owner = Arc::new(CountingOwner::default());
		let (session, _controller) = session_with(FakeBrokerBuilder::new(), &owner).await;
		assert!(session.is_paused());

		session.resume();
		session.resume();
		assert!(!session.is_paused());

		session.pause();
		session.pause();
		assert!(session.is_paused());
	}

	#[tokio::test]
	async fn transacted_session_reports_transacted_mode() {
		let (broker, _controller) = FakeBrokerBuilder::new().build();
		let parts = broker.create_channel().await.unwrap();
		let owner: Weak<dyn SessionOwner> = Weak::<CountingOwner>::new();
		let session = Session::new(1, owner, true, AcknowledgeMode::DupsOk, Arc::new(SubscriptionRegistry::new()), parts, DeliveryState::Running);
		assert_eq!(session.acknowledge_mode(), AcknowledgeMode::SessionTransacted);
		assert!(session.is_transacted());
	}

	#[tokio::test]
	async fn close_detaches_and_releases_channel_once() {
		let owner = Arc::new(CountingOwner::default());
		let (session, controller) = session_with(FakeBrokerBuilder::new(), &owner).await;
		let consumer = session.create_consumer(Destination::queue("orders")).unwrap();

		session.close().await.unwrap();
		session.internal_close().await.unwrap();

		assert_eq!(owner.forgotten.load(Ordering::SeqCst), 1);
		assert_eq!(controller.channel_close_calls(0), 1);
		assert!(consumer.is_closed());
		assert!(session.create_consumer(Destination::queue("orders")).unwrap_err().is_illegal_state());
	}

	#[tokio::test]
	async fn closed_session_cannot_be_resumed() {
		let owner = Arc::new(CountingOwner::default());
		let (session, _controller) = session_with(FakeBrokerBuilder::new(), &owner).await;
		session.internal_close().await.unwrap();
		session.resume();
		assert!(!session.is_paused());
		assert_eq!(*session.inner.delivery.borrow(), DeliveryState::Closed);
	}

	#[tokio::test]
	async fn channel_close_failure_is_reported_once() {
		let owner = Arc::new(CountingOwner::default());
		let (session, _controller) = session_with(FakeBrokerBuilder::new().failing_channel_close(0), &owner).await;

		assert!(session.internal_close().await.unwrap_err().is_transport());
		session.internal_close().await.unwrap();
	}

	#[tokio::test]
	async fn send_without_listener_is_not_tracked() {
		let owner = Arc::new(CountingOwner::default());
		let (session, controller) = session_with(FakeBrokerBuilder::new(), &owner).await;

		session.send(OutboundMessage::new(Destination::queue("q"), b"x".to_vec())).await.unwrap();
		assert_eq!(session.outstanding_confirms(), 0);
		assert_eq!(controller.published(0).len(), 1);
	}

	#[tokio::test]
	async fn durable_subscriber_requires_topic() {
		let owner = Arc::new(CountingOwner::default());
		let (session, _controller) = session_with(FakeBrokerBuilder::new(), &owner).await;
		let err = session.create_durable_subscriber(&Destination::queue("q"), "sub").await.unwrap_err();
		assert!(matches!(err, Error::InvalidDestination(_)));
	}
}

//! Connection: the top-level handle over one broker connection.
//!
//! A [`Connection`] owns the broker connection and every [`Session`] created
//! from it. It handles:
//! - Claiming the client identifier in the shared [`IdentifierRegistry`]
//! - Creating and tracking sessions
//! - Broadcasting start/stop to every live session
//! - Ordered, best-effort shutdown on [`close`](Connection::close)
//!
//! # Lifecycle
//!
//! A new connection is [`Open`](ConnectionState::Open): sessions can be
//! created but their consumers receive nothing until [`start`](Connection::start).
//! [`stop`](Connection::stop) pauses delivery again. [`close`](Connection::close)
//! is terminal; afterwards every state-checking operation fails with
//! [`Error::IllegalState`].
//!
//! The client identifier may only be set right after creation. The first call
//! to [`create_session`](Connection::create_session), [`metadata`](Connection::metadata),
//! the exception-listener accessors, [`start`](Connection::start) or
//! [`stop`](Connection::stop) closes that window for good.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rjms_protocol::{AcknowledgeMode, CONNECTION_METADATA, ConnectionMetadata, Destination};
use tracing::{debug, error, info, warn};

use crate::consumer::DeliveryState;
use crate::error::{Error, Result};
use crate::identifiers::IdentifierRegistry;
use crate::lifecycle::{ConnectionState, StateCell};
use crate::session::{Session, SessionId, SessionOwner};
use crate::subscriptions::SubscriptionRegistry;
use crate::transport::{self, BrokerConnection};

/// Receives asynchronous failures of a connection.
pub trait ExceptionListener: Send + Sync {
	fn on_exception(&self, error: &Error);
}

impl<F> ExceptionListener for F
where
	F: Fn(&Error) + Send + Sync,
{
	fn on_exception(&self, error: &Error) {
		self(error)
	}
}

/// Server-session-pool consumer. Not supported by this client, so no value of this type exists.
#[derive(Debug)]
pub enum ConnectionConsumer {}

/// Handle to a connection. Clones refer to the same connection.
#[derive(Clone)]
pub struct Connection {
	inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
	broker: Box<dyn BrokerConnection>,
	identifiers: Arc<IdentifierRegistry>,
	subscriptions: Arc<SubscriptionRegistry>,
	state: StateCell,
	can_set_client_id: AtomicBool,
	client_id: Mutex<Option<String>>,
	exception_listener: RwLock<Option<Arc<dyn ExceptionListener>>>,
	// Start/stop broadcasts and registration both happen under this lock.
	sessions: Mutex<BTreeMap<SessionId, Session>>,
	next_session_id: AtomicU64,
	termination_timeout: Duration,
}

impl SessionOwner for ConnectionInner {
	fn forget_session(&self, id: SessionId) -> bool {
		let removed = self.sessions.lock().remove(&id).is_some();
		debug!(target: "rjms.connection", session = id, removed, "session detached");
		removed
	}
}

impl Connection {
	/// Wraps an already open broker connection.
	///
	/// `identifiers` is shared with every other connection whose client
	/// identifiers must not collide with this one's. `termination_timeout`
	/// bounds how long [`close`](Self::close) waits for the broker connection.
	pub fn new(broker: Box<dyn BrokerConnection>, identifiers: Arc<IdentifierRegistry>, termination_timeout: Duration) -> Self {
		Self {
			inner: Arc::new(ConnectionInner {
				broker,
				identifiers,
				subscriptions: Arc::new(SubscriptionRegistry::new()),
				state: StateCell::new(),
				can_set_client_id: AtomicBool::new(true),
				client_id: Mutex::new(None),
				exception_listener: RwLock::new(None),
				sessions: Mutex::new(BTreeMap::new()),
				next_session_id: AtomicU64::new(1),
				termination_timeout,
			}),
		}
	}

	pub fn state(&self) -> ConnectionState {
		self.inner.state.get()
	}

	/// `true` unless the connection is currently started.
	pub fn is_stopped(&self) -> bool {
		self.state() != ConnectionState::Started
	}

	pub fn is_closed(&self) -> bool {
		self.state().is_closed()
	}

	pub fn termination_timeout(&self) -> Duration {
		self.inner.termination_timeout
	}

	/// Number of sessions currently registered with this connection.
	pub fn session_count(&self) -> usize {
		self.inner.sessions.lock().len()
	}

	/// Durable subscriptions shared by this connection's sessions.
	pub fn durable_subscriptions(&self) -> &SubscriptionRegistry {
		&self.inner.subscriptions
	}

	fn ensure_open(&self) -> Result<()> {
		if self.is_closed() {
			return Err(Error::closed("connection"));
		}
		Ok(())
	}

	fn close_client_id_window(&self) {
		self.inner.can_set_client_id.store(false, Ordering::SeqCst);
	}

	/// Creates a session bound to this connection.
	///
	/// The session starts paused unless the connection is started.
	///
	/// # Errors
	///
	/// * [`Error::IllegalState`] if the connection is closed, including when it closes while the session is being set up
	/// * [`Error::Transport`] if the broker refuses a channel
	pub async fn create_session(&self, transacted: bool, ack_mode: AcknowledgeMode) -> Result<Session> {
		debug!(target: "rjms.connection", transacted, %ack_mode, "create_session");
		self.close_client_id_window();
		self.ensure_open()?;

		let parts = self.inner.broker.create_channel().await?;
		let id = self.inner.next_session_id.fetch_add(1, Ordering::SeqCst);
		let owner: Weak<ConnectionInner> = Arc::downgrade(&self.inner);
		let owner: Weak<dyn SessionOwner> = owner;
		let session = Session::new(id, owner, transacted, ack_mode, Arc::clone(&self.inner.subscriptions), parts, DeliveryState::Paused);

		let registered = {
			let mut sessions = self.inner.sessions.lock();
			match self.inner.state.get() {
				ConnectionState::Closed => false,
				state => {
					if state == ConnectionState::Started {
						session.resume();
					}
					sessions.insert(id, session.clone());
					true
				}
			}
		};

		if !registered {
			if let Err(err) = session.internal_close().await {
				debug!(target: "rjms.connection", session = id, error = %err, "discarding session opened during close");
			}
			return Err(Error::closed("connection"));
		}

		debug!(target: "rjms.connection", session = id, "session created");
		Ok(session)
	}

	/// Same as [`create_session`](Self::create_session); kept for point-to-point call sites.
	pub async fn create_queue_session(&self, transacted: bool, ack_mode: AcknowledgeMode) -> Result<Session> {
		debug!(target: "rjms.connection", "create_queue_session");
		self.ensure_open()?;
		self.create_session(transacted, ack_mode).await
	}

	/// Same as [`create_session`](Self::create_session); kept for publish/subscribe call sites.
	pub async fn create_topic_session(&self, transacted: bool, ack_mode: AcknowledgeMode) -> Result<Session> {
		debug!(target: "rjms.connection", "create_topic_session");
		self.ensure_open()?;
		self.create_session(transacted, ack_mode).await
	}

	/// Returns the client identifier, if one was set.
	pub fn client_id(&self) -> Result<Option<String>> {
		debug!(target: "rjms.connection", "client_id");
		self.ensure_open()?;
		Ok(self.inner.client_id.lock().clone())
	}

	/// Sets the client identifier and claims it in the shared registry.
	///
	/// # Errors
	///
	/// * [`Error::IllegalState`] if the set window has elapsed, an identifier is already set, or the connection is closed
	/// * [`Error::DuplicateIdentifier`] if another live connection holds `id`
	pub fn set_client_id(&self, id: impl Into<String>) -> Result<()> {
		let id = id.into();
		debug!(target: "rjms.connection", client_id = %id, "set_client_id");
		if !self.inner.can_set_client_id.load(Ordering::SeqCst) {
			return Err(Error::IllegalState("client identifier can only be set right after connection creation".into()));
		}

		let mut slot = self.inner.client_id.lock();
		self.ensure_open()?;
		if slot.is_some() {
			return Err(Error::IllegalState("client identifier already set".into()));
		}
		if !self.inner.identifiers.try_claim(&id) {
			return Err(Error::DuplicateIdentifier(id));
		}
		*slot = Some(id);
		Ok(())
	}

	pub fn metadata(&self) -> Result<&'static ConnectionMetadata> {
		debug!(target: "rjms.connection", "metadata");
		self.close_client_id_window();
		self.ensure_open()?;
		Ok(&CONNECTION_METADATA)
	}

	pub fn exception_listener(&self) -> Result<Option<Arc<dyn ExceptionListener>>> {
		debug!(target: "rjms.connection", "exception_listener");
		self.close_client_id_window();
		self.ensure_open()?;
		Ok(self.inner.exception_listener.read().clone())
	}

	/// Installs or replaces the exception listener. `None` removes it.
	pub fn set_exception_listener(&self, listener: Option<Arc<dyn ExceptionListener>>) -> Result<()> {
		debug!(target: "rjms.connection", installed = listener.is_some(), "set_exception_listener");
		self.close_client_id_window();
		self.ensure_open()?;
		*self.inner.exception_listener.write() = listener;
		Ok(())
	}

	/// Hands an asynchronous connection failure to the exception listener.
	///
	/// Called by the transport glue. Returns `false` if no listener is installed.
	pub fn notify_exception(&self, error: &Error) -> bool {
		let listener = self.inner.exception_listener.read().clone();
		match listener {
			Some(listener) => {
				listener.on_exception(error);
				true
			}
			None => {
				warn!(target: "rjms.connection", error = %error, "connection failure with no exception listener installed");
				false
			}
		}
	}

	/// Starts (or restarts) message delivery to every session.
	///
	/// Redundant calls are no-ops; only the call that moves the connection to
	/// [`Started`](ConnectionState::Started) resumes the sessions.
	pub fn start(&self) -> Result<()> {
		debug!(target: "rjms.connection", "start");
		self.close_client_id_window();
		self.ensure_open()?;

		let sessions = self.inner.sessions.lock();
		let started = self.inner.state.start().map_err(|_| Error::closed("connection"))?;
		if started {
			for session in sessions.values() {
				session.resume();
			}
			info!(target: "rjms.connection", sessions = sessions.len(), "connection started");
		}
		Ok(())
	}

	/// Pauses message delivery to every session.
	///
	/// Redundant calls are no-ops; only the call that moves the connection to
	/// [`Stopped`](ConnectionState::Stopped) pauses the sessions.
	pub fn stop(&self) -> Result<()> {
		debug!(target: "rjms.connection", "stop");
		self.close_client_id_window();
		self.ensure_open()?;

		let sessions = self.inner.sessions.lock();
		let stopped = self.inner.state.stop().map_err(|_| Error::closed("connection"))?;
		if stopped {
			for session in sessions.values() {
				session.pause();
			}
			info!(target: "rjms.connection", sessions = sessions.len(), "connection stopped");
		}
		Ok(())
	}

	/// Closes every session, then the broker connection.
	///
	/// Idempotent: only the first call does any work, later and concurrent
	/// calls return `Ok(())` at once. Every session is closed even if some
	/// fail; the first session failure is returned once the broker connection
	/// is closed too, unless closing the broker connection fails itself.
	/// Already-closed signals from the broker count as success.
	///
	/// # Errors
	///
	/// * [`Error::Transport`] if a session channel or the broker connection fails to close
	/// * [`Error::CloseTimeout`] if the broker connection does not close within the termination timeout
	pub async fn close(&self) -> Result<()> {
		debug!(target: "rjms.connection", "close");
		if !self.inner.state.close() {
			return Ok(());
		}

		if let Some(id) = self.inner.client_id.lock().take() {
			self.inner.identifiers.release(&id);
			debug!(target: "rjms.connection", client_id = %id, "client identifier released");
		}

		let sessions = std::mem::take(&mut *self.inner.sessions.lock());
		let mut first_failure: Option<Error> = None;
		for (id, session) in sessions {
			let Err(err) = session.internal_close().await else {
				continue;
			};
			if first_failure.is_none() {
				error!(target: "rjms.connection", session = id, error = %err, "session close failed");
				first_failure = Some(err);
			} else {
				warn!(target: "rjms.connection", session = id, error = %err, "additional session close failure discarded");
			}
		}

		let closed = self.close_broker().await;
		info!(target: "rjms.connection", ok = closed.is_ok() && first_failure.is_none(), "connection closed");

		match (closed, first_failure) {
			(Err(err), Some(session_err)) => {
				warn!(target: "rjms.connection", error = %session_err, "session close failure superseded by broker close failure");
				Err(err)
			}
			(Err(err), None) | (Ok(()), Some(err)) => Err(err),
			(Ok(()), None) => Ok(()),
		}
	}

	async fn close_broker(&self) -> Result<()> {
		let timeout = self.inner.termination_timeout;
		match tokio::time::timeout(timeout, self.inner.broker.close()).await {
			Ok(result) => Ok(transport::normalize_close(result)?),
			Err(_) => {
				error!(target: "rjms.connection", timeout_ms = timeout.as_millis() as u64, "broker connection close timed out");
				Err(Error::CloseTimeout(timeout))
			}
		}
	}

	/// Not supported.
	pub fn create_connection_consumer(&self, _destination: &Destination, _selector: Option<&str>, _max_messages: usize) -> Result<ConnectionConsumer> {
		Err(Error::Unsupported("create_connection_consumer"))
	}

	/// Not supported.
	pub fn create_durable_connection_consumer(
		&self,
		_topic: &Destination,
		_subscription_name: &str,
		_selector: Option<&str>,
		_max_messages: usize,
	) -> Result<ConnectionConsumer> {
		Err(Error::Unsupported("create_durable_connection_consumer"))
	}
}

impl std::fmt::Debug for Connection {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Connection")
			.field("state", &self.state())
			.field("client_id", &*self.inner.client_id.lock())
			.field("sessions", &self.session_count())
			.field("termination_timeout", &self.inner.termination_timeout)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::transport::fake::{FakeBrokerBuilder, FakeBrokerController};

	fn connection() -> (Connection, FakeBrokerController) {
		let (broker, controller) = FakeBrokerBuilder::new().build();
		let connection = Connection::new(Box::new(broker), Arc::new(IdentifierRegistry::new()), Duration::from_secs(1));
		(connection, controller)
	}

	#[tokio::test]
	async fn new_sessions_follow_connection_state() {
		let (connection, _controller) = connection();
		let before = connection.create_session(false, AcknowledgeMode::Auto).await.unwrap();
		assert!(before.is_paused());

		connection.start().unwrap();
		let after = connection.create_session(false, AcknowledgeMode::Auto).await.unwrap();
		assert!(!before.is_paused());
		assert!(!after.is_paused());
		assert_eq!(connection.session_count(), 2);
	}

	#[tokio::test]
	async fn redundant_start_and_stop_broadcast_once() {
		let (connection, _controller) = connection();
		let session = connection.create_session(false, AcknowledgeMode::Auto).await.unwrap();
		let mut updates = session.delivery_updates();

		connection.start().unwrap();
		assert!(updates.has_changed().unwrap());
		assert_eq!(*updates.borrow_and_update(), DeliveryState::Running);
		connection.start().unwrap();
		assert!(!updates.has_changed().unwrap());

		connection.stop().unwrap();
		assert!(updates.has_changed().unwrap());
		assert_eq!(*updates.borrow_and_update(), DeliveryState::Paused);
		connection.stop().unwrap();
		assert!(!updates.has_changed().unwrap());
	}

	#[tokio::test]
	async fn session_ids_are_unique() {
		let (connection, _controller) = connection();
		let a = connection.create_session(false, AcknowledgeMode::Auto).await.unwrap();
		let b = connection.create_topic_session(true, AcknowledgeMode::Auto).await.unwrap();
		assert_ne!(a.id(), b.id());
		assert!(b.is_transacted());
	}

	#[tokio::test]
	async fn channel_refusal_surfaces_as_transport_error() {
		let (connection, controller) = connection();
		controller.refuse_channels(true);
		let err = connection.create_session(false, AcknowledgeMode::Auto).await.unwrap_err();
		assert!(err.is_transport());
		assert_eq!(connection.session_count(), 0);
	}

	#[test]
	fn stop_before_start_is_a_no_op() {
		let (connection, _controller) = connection();
		connection.stop().unwrap();
		assert_eq!(connection.state(), ConnectionState::Open);
		assert!(connection.is_stopped());
	}

	#[test]
	fn unsupported_capabilities() {
		let (connection, _controller) = connection();
		let topic = Destination::topic("t");
		assert!(connection.create_connection_consumer(&topic, None, 1).unwrap_err().is_unsupported());
		assert!(connection.create_durable_connection_consumer(&topic, "sub", Some("x > 1"), 1).unwrap_err().is_unsupported());
	}

	#[test]
	fn exception_listener_is_replaceable() {
		let (connection, _controller) = connection();
		assert!(!connection.notify_exception(&Error::IllegalState("boom".into())));

		let seen = Arc::new(Mutex::new(Vec::new()));
		let listener = {
			let seen = Arc::clone(&seen);
			Arc::new(move |err: &Error| seen.lock().push(err.to_string())) as Arc<dyn ExceptionListener>
		};
		connection.set_exception_listener(Some(listener)).unwrap();
		assert!(connection.exception_listener().unwrap().is_some());
		assert!(connection.notify_exception(&Error::IllegalState("boom".into())));
		assert_eq!(*seen.lock(), vec!["illegal state: boom".to_string()]);

		connection.set_exception_listener(None).unwrap();
		assert!(connection.exception_listener().unwrap().is_none());
	}
}

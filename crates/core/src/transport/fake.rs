//! In-memory broker for exercising connection and session lifecycles.
//!
//! # Example
//!
//! ```ignore
//! let (broker, controller) = FakeBrokerBuilder::new().build();
//! let connection = ConnectionFactory::default().connect(broker);
//! let session = connection.create_session(false, AcknowledgeMode::Auto).await?;
//!
//! connection.close().await?;
//! assert_eq!(controller.connection_close_calls(), 1);
//! assert_eq!(controller.channel_close_calls(0), 1);
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rjms_protocol::{ConfirmEvent, OutboundMessage};
use tokio::sync::mpsc;

use super::{BoxFuture, BrokerChannel, BrokerConnection, ChannelParts, TransportError};

/// What the fake connection reports the first time it is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CloseOutcome {
	#[default]
	Clean,
	AlreadyClosed,
	Shutdown,
	IoFailure,
}

/// Builder for [`FakeBroker`] instances.
#[derive(Debug, Default)]
pub struct FakeBrokerBuilder {
	close_outcome: CloseOutcome,
	close_delay: Option<Duration>,
	channel_delay: Option<Duration>,
	failing_channels: HashSet<usize>,
}

impl FakeBrokerBuilder {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn close_outcome(mut self, outcome: CloseOutcome) -> Self {
		self.close_outcome = outcome;
		self
	}

	/// Makes the connection close wait `delay` before completing.
	pub fn close_delay(mut self, delay: Duration) -> Self {
		self.close_delay = Some(delay);
		self
	}

	/// Makes channel creation wait `delay` after the channel is opened and before it is handed back.
	pub fn create_channel_delay(mut self, delay: Duration) -> Self {
		self.channel_delay = Some(delay);
		self
	}

	/// Makes the `index`-th channel (zero-based, in creation order) fail its first close with an I/O error.
	pub fn failing_channel_close(mut self, index: usize) -> Self {
		self.failing_channels.insert(index);
		self
	}

	pub fn build(self) -> (FakeBroker, FakeBrokerController) {
		let state = Arc::new(BrokerState {
			close_outcome: self.close_outcome,
			close_delay: self.close_delay,
			channel_delay: self.channel_delay,
			failing_channels: self.failing_channels,
			close_calls: AtomicUsize::new(0),
			refuse_channels: AtomicBool::new(false),
			channels: Mutex::new(Vec::new()),
		});

		let broker = FakeBroker { state: Arc::clone(&state) };
		let controller = FakeBrokerController { state };
		(broker, controller)
	}
}

struct BrokerState {
	close_outcome: CloseOutcome,
	close_delay: Option<Duration>,
	channel_delay: Option<Duration>,
	failing_channels: HashSet<usize>,
	close_calls: AtomicUsize,
	refuse_channels: AtomicBool,
	channels: Mutex<Vec<Arc<ChannelState>>>,
}

struct ChannelState {
	index: usize,
	fail_close: bool,
	close_calls: AtomicUsize,
	next_seq: AtomicU64,
	published: Mutex<Vec<OutboundMessage>>,
	subscriptions: Mutex<HashMap<String, String>>,
	deleted: Mutex<Vec<String>>,
	confirm_tx: mpsc::UnboundedSender<ConfirmEvent>,
}

/// Broker-connection half handed to the code under test.
pub struct FakeBroker {
	state: Arc<BrokerState>,
}

impl BrokerConnection for FakeBroker {
	fn create_channel(&self) -> BoxFuture<'_, Result<ChannelParts, TransportError>> {
		Box::pin(async move {
			if self.state.refuse_channels.load(Ordering::SeqCst) {
				return Err(TransportError::Shutdown("channel creation refused".into()));
			}
			if self.state.close_calls.load(Ordering::SeqCst) > 0 {
				return Err(TransportError::AlreadyClosed);
			}

			let (confirm_tx, confirms) = mpsc::unbounded_channel();
			let channel = {
				let mut channels = self.state.channels.lock();
				let index = channels.len();
				let channel = Arc::new(ChannelState {
					index,
					fail_close: self.state.failing_channels.contains(&index),
					close_calls: AtomicUsize::new(0),
					next_seq: AtomicU64::new(1),
					published: Mutex::new(Vec::new()),
					subscriptions: Mutex::new(HashMap::new()),
					deleted: Mutex::new(Vec::new()),
					confirm_tx,
				});
				channels.push(Arc::clone(&channel));
				channel
			};

			if let Some(delay) = self.state.channel_delay {
				tokio::time::sleep(delay).await;
			}

			Ok(ChannelParts {
				channel: Box::new(FakeChannel { state: channel }),
				confirms,
			})
		})
	}

	fn close(&self) -> BoxFuture<'_, Result<(), TransportError>> {
		Box::pin(async move {
			if let Some(delay) = self.state.close_delay {
				tokio::time::sleep(delay).await;
			}

			if self.state.close_calls.fetch_add(1, Ordering::SeqCst) > 0 {
				return Err(TransportError::AlreadyClosed);
			}

			match self.state.close_outcome {
				CloseOutcome::Clean => Ok(()),
				CloseOutcome::AlreadyClosed => Err(TransportError::AlreadyClosed),
				CloseOutcome::Shutdown => Err(TransportError::Shutdown("connection reset by broker".into())),
				CloseOutcome::IoFailure => Err(TransportError::Io(std::io::Error::other("injected connection close failure"))),
			}
		})
	}
}

struct FakeChannel {
	state: Arc<ChannelState>,
}

impl FakeChannel {
	fn ensure_open(&self) -> Result<(), TransportError> {
		if self.state.close_calls.load(Ordering::SeqCst) > 0 {
			return Err(TransportError::AlreadyClosed);
		}
		Ok(())
	}
}

impl BrokerChannel for FakeChannel {
	fn next_publish_seq_no(&self) -> u64 {
		self.state.next_seq.load(Ordering::SeqCst)
	}

	fn publish<'a>(&'a self, message: &'a OutboundMessage) -> BoxFuture<'a, Result<(), TransportError>> {
		Box::pin(async move {
			self.ensure_open()?;
			self.state.published.lock().push(message.clone());
			self.state.next_seq.fetch_add(1, Ordering::SeqCst);
			Ok(())
		})
	}

	fn declare_subscription<'a>(&'a self, topic: &'a str, name: &'a str) -> BoxFuture<'a, Result<(), TransportError>> {
		Box::pin(async move {
			self.ensure_open()?;
			self.state.subscriptions.lock().insert(name.to_string(), topic.to_string());
			Ok(())
		})
	}

	fn delete_subscription<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<(), TransportError>> {
		Box::pin(async move {
			self.ensure_open()?;
			self.state.subscriptions.lock().remove(name);
			self.state.deleted.lock().push(name.to_string());
			Ok(())
		})
	}

	fn close(&self) -> BoxFuture<'_, Result<(), TransportError>> {
		Box::pin(async move {
			let calls = self.state.close_calls.fetch_add(1, Ordering::SeqCst);
			if calls > 0 {
				return Err(TransportError::AlreadyClosed);
			}
			if self.state.fail_close {
				return Err(TransportError::Io(std::io::Error::other(format!("injected close failure on channel {}", self.state.index))));
			}
			Ok(())
		})
	}
}

/// Controller for inspecting the fake broker and injecting broker-side events.
#[derive(Clone)]
pub struct FakeBrokerController {
	state: Arc<BrokerState>,
}

impl FakeBrokerController {
	/// Number of times the connection close was invoked.
	pub fn connection_close_calls(&self) -> usize {
		self.state.close_calls.load(Ordering::SeqCst)
	}

	pub fn channel_count(&self) -> usize {
		self.state.channels.lock().len()
	}

	/// Number of times the `index`-th channel was closed; zero for unknown channels.
	pub fn channel_close_calls(&self, index: usize) -> usize {
		self.channel(index).map_or(0, |c| c.close_calls.load(Ordering::SeqCst))
	}

	pub fn published(&self, index: usize) -> Vec<OutboundMessage> {
		self.channel(index).map(|c| c.published.lock().clone()).unwrap_or_default()
	}

	/// Durable subscriptions currently declared on the `index`-th channel, as `name -> topic`.
	pub fn declared_subscriptions(&self, index: usize) -> HashMap<String, String> {
		self.channel(index).map(|c| c.subscriptions.lock().clone()).unwrap_or_default()
	}

	pub fn deleted_subscriptions(&self, index: usize) -> Vec<String> {
		self.channel(index).map(|c| c.deleted.lock().clone()).unwrap_or_default()
	}

	/// Makes subsequent channel creation fail.
	pub fn refuse_channels(&self, refuse: bool) {
		self.state.refuse_channels.store(refuse, Ordering::SeqCst);
	}

	/// Reports a confirm on the `index`-th channel. Returns `false` when nobody is listening.
	pub fn confirm(&self, index: usize, event: ConfirmEvent) -> bool {
		self.channel(index).is_some_and(|c| c.confirm_tx.send(event).is_ok())
	}

	fn channel(&self, index: usize) -> Option<Arc<ChannelState>> {
		self.state.channels.lock().get(index).cloned()
	}
}

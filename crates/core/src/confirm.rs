//! Publisher confirmations.
//!
//! Messages sent while a [`ConfirmListener`] is installed are tracked by
//! publish sequence number until the broker reports their outcome. Each
//! report settles the tracked entries it covers and every settled entry is
//! delivered to the listener exactly once, in the order the broker reported
//! them. Entries the broker never reports stay outstanding; policing that is
//! up to the caller.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rjms_protocol::{ConfirmEvent, OutboundMessage};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Outcome of one published message.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmationContext {
	message: OutboundMessage,
	ack: bool,
}

impl ConfirmationContext {
	pub(crate) fn new(message: OutboundMessage, ack: bool) -> Self {
		Self { message, ack }
	}

	/// The message being confirmed.
	pub fn message(&self) -> &OutboundMessage {
		&self.message
	}

	/// `true` if the broker accepted the message, `false` if it was nacked and is considered lost.
	pub fn is_ack(&self) -> bool {
		self.ack
	}

	pub fn into_message(self) -> OutboundMessage {
		self.message
	}
}

/// Receives delivery outcomes for messages sent through a session.
pub trait ConfirmListener: Send + Sync {
	fn on_confirm(&self, context: &ConfirmationContext);
}

impl<F> ConfirmListener for F
where
	F: Fn(&ConfirmationContext) + Send + Sync,
{
	fn on_confirm(&self, context: &ConfirmationContext) {
		self(context)
	}
}

pub(crate) type ListenerSlot = Arc<RwLock<Option<Arc<dyn ConfirmListener>>>>;

/// Messages awaiting an outcome, keyed by publish sequence number.
#[derive(Debug, Default)]
pub(crate) struct PendingConfirms {
	outstanding: Mutex<BTreeMap<u64, OutboundMessage>>,
}

impl PendingConfirms {
	pub(crate) fn track(&self, tag: u64, message: OutboundMessage) {
		self.outstanding.lock().insert(tag, message);
	}

	/// Forgets `tag`, used when the publish itself failed.
	pub(crate) fn discard(&self, tag: u64) {
		self.outstanding.lock().remove(&tag);
	}

	pub(crate) fn len(&self) -> usize {
		self.outstanding.lock().len()
	}

	/// Removes and returns every entry `event` settles, lowest tag first.
	pub(crate) fn settle(&self, event: ConfirmEvent) -> Vec<ConfirmationContext> {
		let mut outstanding = self.outstanding.lock();
		let tags: Vec<u64> = outstanding.range(..=event.delivery_tag).map(|(tag, _)| *tag).filter(|tag| event.covers(*tag)).collect();
		tags.into_iter()
			.filter_map(|tag| outstanding.remove(&tag))
			.map(|message| ConfirmationContext::new(message, event.ack))
			.collect()
	}
}

/// Drains a channel's confirm stream into the session's listener.
///
/// The task ends when the stream ends; the session aborts it on close.
pub(crate) fn spawn_dispatcher(
	session_id: u64,
	mut confirms: mpsc::UnboundedReceiver<ConfirmEvent>,
	pending: Arc<PendingConfirms>,
	slot: ListenerSlot,
) -> JoinHandle<()> {
	tokio::spawn(async move {
		while let Some(event) = confirms.recv().await {
			let settled = pending.settle(event);
			if settled.is_empty() {
				tracing::trace!(target: "rjms.confirm", session = session_id, tag = event.delivery_tag, "confirm for untracked tag ignored");
				continue;
			}

			let Some(listener) = slot.read().clone() else {
				tracing::debug!(target: "rjms.confirm", session = session_id, count = settled.len(), "no listener installed; confirmations dropped");
				continue;
			};
			for context in &settled {
				listener.on_confirm(context);
			}
		}

		tracing::debug!(target: "rjms.confirm", session = session_id, "confirm stream ended");
	})
}

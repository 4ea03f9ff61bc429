//! Connection lifecycle state machine.
//!
//! ```text
//! Open ──start──▶ Started ──stop──▶ Stopped
//!                    ▲                 │
//!                    └──────start──────┘
//! any ──close──▶ Closed (terminal)
//! ```

use std::sync::atomic::{AtomicU8, Ordering};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ConnectionState {
	/// Freshly created; consumers do not receive messages yet.
	Open = 0,
	Started = 1,
	Stopped = 2,
	Closed = 3,
}

impl ConnectionState {
	fn from_u8(raw: u8) -> Self {
		match raw {
			0 => Self::Open,
			1 => Self::Started,
			2 => Self::Stopped,
			_ => Self::Closed,
		}
	}

	pub fn is_closed(self) -> bool {
		self == Self::Closed
	}
}

/// Attempted a transition on a closed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AlreadyClosed;

/// Atomic holder of a [`ConnectionState`].
///
/// Every transition is a compare-and-swap that reports whether this caller
/// performed it, so concurrent redundant calls see exactly one winner.
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
	pub(crate) fn new() -> Self {
		Self(AtomicU8::new(ConnectionState::Open as u8))
	}

	pub(crate) fn get(&self) -> ConnectionState {
		ConnectionState::from_u8(self.0.load(Ordering::SeqCst))
	}

	/// `Open | Stopped -> Started`. `Ok(false)` when already started.
	pub(crate) fn start(&self) -> Result<bool, AlreadyClosed> {
		self.transition(ConnectionState::Started, |current| matches!(current, ConnectionState::Open | ConnectionState::Stopped))
	}

	/// `Started -> Stopped`. `Ok(false)` when not started.
	pub(crate) fn stop(&self) -> Result<bool, AlreadyClosed> {
		self.transition(ConnectionState::Stopped, |current| current == ConnectionState::Started)
	}

	/// Moves to `Closed`. Returns `true` only for the caller that closed it.
	pub(crate) fn close(&self) -> bool {
		self.0.swap(ConnectionState::Closed as u8, Ordering::SeqCst) != ConnectionState::Closed as u8
	}

	fn transition(&self, target: ConnectionState, allowed: impl Fn(ConnectionState) -> bool) -> Result<bool, AlreadyClosed> {
		let mut current = self.get();
		loop {
			if current.is_closed() {
				return Err(AlreadyClosed);
			}
			if !allowed(current) {
				return Ok(false);
			}
			match self.0.compare_exchange(current as u8, target as u8, Ordering::SeqCst, Ordering::SeqCst) {
				Ok(_) => return Ok(true),
				Err(actual) => current = ConnectionState::from_u8(actual),
			}
		}
	}
}

//! Registry of client identifiers held by live connections.

use std::collections::HashSet;

use parking_lot::Mutex;

/// Set of client identifiers claimed by live connections.
///
/// One registry is shared (behind an `Arc`) by every connection created from
/// the same [`ConnectionFactory`](crate::ConnectionFactory). For a given
/// identifier exactly one concurrent claimant wins.
#[derive(Debug, Default)]
pub struct IdentifierRegistry {
	claimed: Mutex<HashSet<String>>,
}

impl IdentifierRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Claims `id` if nobody holds it yet. Returns whether the claim succeeded.
	pub fn try_claim(&self, id: &str) -> bool {
		let mut claimed = self.claimed.lock();
		if claimed.contains(id) {
			return false;
		}
		claimed.insert(id.to_string())
	}

	/// Releases `id`. Releasing an identifier nobody holds is a no-op.
	pub fn release(&self, id: &str) -> bool {
		self.claimed.lock().remove(id)
	}

	pub fn contains(&self, id: &str) -> bool {
		self.claimed.lock().contains(id)
	}

	pub fn len(&self) -> usize {
		self.claimed.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Arc;
	use std::sync::atomic::{AtomicUsize, Ordering};

	#[test]
	fn claim_release_claim() {
		let registry = IdentifierRegistry::new();
		assert!(registry.try_claim("X"));
		assert!(!registry.try_claim("X"));
		assert!(registry.release("X"));
		assert!(!registry.release("X"));
		assert!(registry.try_claim("X"));
	}

	#[test]
	fn only_one_concurrent_claimant_wins() {
		let registry = Arc::new(IdentifierRegistry::new());
		let winners = AtomicUsize::new(0);

		std::thread::scope(|scope| {
			for _ in 0..16 {
				scope.spawn(|| {
					if registry.try_claim("shared") {
						winners.fetch_add(1, Ordering::SeqCst);
					}
				});
			}
		});

		assert_eq!(winners.load(Ordering::SeqCst), 1);
		assert_eq!(registry.len(), 1);
	}

	#[test]
	fn distinct_identifiers_do_not_interfere() {
		let registry = IdentifierRegistry::new();
		assert!(registry.try_claim("a"));
		assert!(registry.try_claim("b"));
		registry.release("a");
		assert!(!registry.contains("a"));
		assert!(registry.contains("b"));
	}
}

//! Per-order mutual exclusion.
//!
//! Charge, cancel and fulfill hold the lock for their order for the whole
//! orchestration, so two requests for the same order never interleave their
//! read, gateway call and write. Requests for different orders never wait on
//! each other.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Default)]
pub struct OrderLocks {
	locks: DashMap<String, Arc<Mutex<()>>>,
}

impl OrderLocks {
	pub fn new() -> Self {
		Self::default()
	}

	/// Waits until no other task holds the lock for `order_id`.
	pub async fn acquire(&self, order_id: &str) -> OrderGuard<'_> {
		let lock = self.locks.entry(order_id.to_string()).or_default().clone();
		let guard = lock.lock_owned().await;

		OrderGuard {
			locks: self,
			order_id: order_id.to_string(),
			guard: Some(guard),
		}
	}

	/// Number of orders with a held or awaited lock.
	pub fn len(&self) -> usize {
		self.locks.len()
	}

	pub fn is_empty(&self) -> bool {
		self.locks.is_empty()
	}
}

/// Holds an order's lock until dropped.
pub struct OrderGuard<'a> {
	locks: &'a OrderLocks,
	order_id: String,
	guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for OrderGuard<'_> {
	fn drop(&mut self) {
		drop(self.guard.take());
		// Only the map still references the lock: nobody is waiting on it
		self.locks
			.locks
			.remove_if(&self.order_id, |_, lock| Arc::strong_count(lock) == 1);
	}
}

//! Order state machine implementation.
//!
//! Orders move Pending -> Charged -> Fulfilled, and may be Cancelled from
//! Pending or Charged. Every status write goes through
//! [`OrderStateMachine::transition`], which checks the table below and then
//! performs a compare-and-swap against the status the caller last read.

use once_cell::sync::Lazy;
use orderup_storage::{StorageError, StorageService};
use orderup_types::{Order, OrderStatus};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur while committing a status change.
#[derive(Debug, Error)]
pub enum OrderStateError {
	#[error("Invalid state transition from {from} to {to}")]
	InvalidTransition { from: OrderStatus, to: OrderStatus },
	#[error(transparent)]
	Storage(#[from] StorageError),
}

/// Static transition table - each state maps to allowed next states
static TRANSITIONS: Lazy<HashMap<OrderStatus, HashSet<OrderStatus>>> = Lazy::new(|| {
	let mut m = HashMap::new();
	m.insert(
		OrderStatus::Pending,
		HashSet::from([OrderStatus::Charged, OrderStatus::Cancelled]),
	);
	m.insert(
		OrderStatus::Charged,
		HashSet::from([OrderStatus::Fulfilled, OrderStatus::Cancelled]),
	);
	m.insert(OrderStatus::Fulfilled, HashSet::new()); // terminal
	m.insert(OrderStatus::Cancelled, HashSet::new()); // terminal
	m
});

/// Validates and persists order status transitions.
pub struct OrderStateMachine {
	storage: Arc<StorageService>,
}

impl OrderStateMachine {
	pub fn new(storage: Arc<StorageService>) -> Self {
		Self { storage }
	}

	/// Checks if a state transition is valid
	pub fn is_valid_transition(from: OrderStatus, to: OrderStatus) -> bool {
		TRANSITIONS
			.get(&from)
			.is_some_and(|allowed| allowed.contains(&to))
	}

	/// Moves `order` from the status it was read with to `to`.
	///
	/// Fails with a storage `Conflict` if another writer changed the status
	/// since `order` was loaded.
	pub async fn transition(&self, order: &Order, to: OrderStatus) -> Result<(), OrderStateError> {
		if !Self::is_valid_transition(order.status, to) {
			return Err(OrderStateError::InvalidTransition {
				from: order.status,
				to,
			});
		}

		self.storage
			.set_order_status(&order.id, order.status, to)
			.await?;
		Ok(())
	}
}

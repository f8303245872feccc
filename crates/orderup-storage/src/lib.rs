//! Order repository for the lifecycle service.
//!
//! This module defines the contract the lifecycle engine consumes for durable
//! order state, together with in-memory and file-based backends. Backends are
//! the sole owners of persisted state; callers only ever hold copies.

use async_trait::async_trait;
use orderup_types::{
	truncate_id, ConfigSchema, ImplementationRegistry, Order, OrderStatus, StatusFilter,
};
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod file;
	pub mod memory;
}

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
	/// No order with the requested id exists.
	#[error("Not found")]
	NotFound,
	/// An order with the supplied id already exists.
	#[error("Already exists")]
	AlreadyExists,
	/// Compare-and-swap precondition failed.
	#[error("Status conflict: expected {expected}, found {actual}")]
	Conflict {
		expected: OrderStatus,
		actual: OrderStatus,
	},
	/// Error that occurs during serialization/deserialization.
	#[error("Serialization error: {0}")]
	Serialization(String),
	/// Error that occurs in the storage backend.
	#[error("Backend error: {0}")]
	Backend(String),
	/// Error that occurs during configuration validation.
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// Contract for order repository backends.
///
/// Every operation is atomic for a single order. Backends never judge whether
/// a status change is legal; they only enforce the expected prior status
/// passed to [`StorageInterface::set_order_status`].
#[async_trait]
pub trait StorageInterface: Send + Sync {
	/// Returns the order with the given id, or `NotFound`.
	async fn get_order(&self, id: &str) -> Result<Order, StorageError>;

	/// Returns every order matching the filter, possibly none.
	async fn list_orders(&self, filter: StatusFilter) -> Result<Vec<Order>, StorageError>;

	/// Persists a new order and returns its id.
	///
	/// An empty `order.id` is replaced by a fresh identifier. A supplied id
	/// that is already taken fails with `AlreadyExists`.
	async fn insert_order(&self, order: Order) -> Result<String, StorageError>;

	/// Sets the status of an order if its current status is `expected`.
	///
	/// Fails with `NotFound` when the order is absent and with `Conflict`
	/// when another writer changed the status first.
	async fn set_order_status(
		&self,
		id: &str,
		expected: OrderStatus,
		status: OrderStatus,
	) -> Result<(), StorageError>;

	/// Returns the configuration schema for validation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;
}

/// Type alias for storage factory functions.
pub type StorageFactory = fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>;

/// Registry trait for storage implementations.
pub trait StorageRegistry: ImplementationRegistry<Factory = StorageFactory> {}

/// Get all registered storage implementations.
pub fn get_all_implementations() -> Vec<(&'static str, StorageFactory)> {
	use implementations::{file, memory};

	vec![
		(file::Registry::NAME, file::Registry::factory()),
		(memory::Registry::NAME, memory::Registry::factory()),
	]
}

/// Generates an identifier for orders submitted without one.
pub(crate) fn new_order_id() -> String {
	uuid::Uuid::new_v4().to_string()
}

/// High-level repository handle held by the engine.
///
/// Wraps the configured backend and adds tracing around each call.
pub struct StorageService {
	backend: Box<dyn StorageInterface>,
}

impl StorageService {
	pub fn new(backend: Box<dyn StorageInterface>) -> Self {
		Self { backend }
	}

	pub async fn get_order(&self, id: &str) -> Result<Order, StorageError> {
		self.backend.get_order(id).await
	}

	pub async fn list_orders(&self, filter: StatusFilter) -> Result<Vec<Order>, StorageError> {
		let orders = self.backend.list_orders(filter).await?;
		tracing::debug!(filter = %filter, count = orders.len(), "Listed orders");
		Ok(orders)
	}

	pub async fn insert_order(&self, order: Order) -> Result<String, StorageError> {
		let id = self.backend.insert_order(order).await?;
		tracing::debug!(order_id = %truncate_id(&id), "Stored order");
		Ok(id)
	}

	pub async fn set_order_status(
		&self,
		id: &str,
		expected: OrderStatus,
		status: OrderStatus,
	) -> Result<(), StorageError> {
		self.backend.set_order_status(id, expected, status).await?;
		tracing::debug!(
			order_id = %truncate_id(id),
			from = %expected,
			to = %status,
			"Updated order status"
		);
		Ok(())
	}
}

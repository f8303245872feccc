//! In-memory order repository.
//!
//! Useful for tests and local development where persistence across restarts
//! is not required. Orders are listed in insertion order.

use crate::{new_order_id, StorageError, StorageFactory, StorageInterface, StorageRegistry};
use async_trait::async_trait;
use orderup_types::{
	ConfigSchema, ImplementationRegistry, Order, OrderStatus, Schema, StatusFilter,
	ValidationError,
};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
struct Records {
	orders: HashMap<String, Order>,
	/// Ids in insertion order.
	sequence: Vec<String>,
}

/// In-memory storage implementation.
///
/// The whole map sits behind one read-write lock, which makes each insert and
/// compare-and-swap atomic.
pub struct MemoryStorage {
	records: RwLock<Records>,
}

impl MemoryStorage {
	pub fn new() -> Self {
		Self {
			records: RwLock::new(Records::default()),
		}
	}
}

impl Default for MemoryStorage {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl StorageInterface for MemoryStorage {
	async fn get_order(&self, id: &str) -> Result<Order, StorageError> {
		let records = self.records.read().await;
		records.orders.get(id).cloned().ok_or(StorageError::NotFound)
	}

	async fn list_orders(&self, filter: StatusFilter) -> Result<Vec<Order>, StorageError> {
		let records = self.records.read().await;
		Ok(records
			.sequence
			.iter()
			.filter_map(|id| records.orders.get(id))
			.filter(|order| filter.matches(order.status))
			.cloned()
			.collect())
	}

	async fn insert_order(&self, mut order: Order) -> Result<String, StorageError> {
		if order.id.is_empty() {
			order.id = new_order_id();
		}

		let mut records = self.records.write().await;
		if records.orders.contains_key(&order.id) {
			return Err(StorageError::AlreadyExists);
		}

		let id = order.id.clone();
		records.sequence.push(id.clone());
		records.orders.insert(id.clone(), order);
		Ok(id)
	}

	async fn set_order_status(
		&self,
		id: &str,
		expected: OrderStatus,
		status: OrderStatus,
	) -> Result<(), StorageError> {
		let mut records = self.records.write().await;
		let order = records.orders.get_mut(id).ok_or(StorageError::NotFound)?;
		if order.status != expected {
			return Err(StorageError::Conflict {
				expected,
				actual: order.status,
			});
		}
		order.status = status;
		Ok(())
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(MemoryStorageSchema)
	}
}

/// Configuration schema for MemoryStorage.
pub struct MemoryStorageSchema;

impl ConfigSchema for MemoryStorageSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		// No settings
		Schema::new(vec![], vec![]).validate(config)
	}
}

/// Factory function to create a memory storage backend from configuration.
pub fn create_storage(config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	MemoryStorageSchema
		.validate(config)
		.map_err(|e| StorageError::Configuration(e.to_string()))?;
	Ok(Box::new(MemoryStorage::new()))
}

/// Registry for the memory storage implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "memory";
	type Factory = StorageFactory;

	fn factory() -> Self::Factory {
		create_storage
	}
}

impl StorageRegistry for Registry {}

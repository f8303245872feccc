//! File-based order repository.
//!
//! Each order is one JSON document under the configured directory. Writes go
//! to a temp file that is then renamed over the target, so readers never see
//! a half-written order.

use crate::{new_order_id, StorageError, StorageFactory, StorageInterface, StorageRegistry};
use async_trait::async_trait;
use orderup_types::{
	ConfigSchema, Field, FieldType, ImplementationRegistry, Order, OrderStatus, Schema,
	StatusFilter, ValidationError,
};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

const DEFAULT_STORAGE_PATH: &str = "./data/orders";

/// File-based storage implementation.
pub struct FileStorage {
	/// Directory holding one `<hex id>.json` file per order.
	base_path: PathBuf,
	/// Serializes read-modify-write sequences within this process.
	write_lock: Mutex<()>,
}

impl FileStorage {
	pub fn new(base_path: PathBuf) -> Self {
		Self {
			base_path,
			write_lock: Mutex::new(()),
		}
	}

	/// Converts an order id to a filesystem-safe file path.
	///
	/// The id bytes are hex encoded so that distinct ids never share a file.
	fn get_file_path(&self, id: &str) -> PathBuf {
		self.base_path
			.join(format!("{}.json", hex::encode(id.as_bytes())))
	}

	async fn read_order(path: &Path) -> Result<Order, StorageError> {
		let data = match fs::read(path).await {
			Ok(data) => data,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				return Err(StorageError::NotFound)
			},
			Err(e) => return Err(StorageError::Backend(e.to_string())),
		};
		serde_json::from_slice(&data).map_err(|e| StorageError::Serialization(e.to_string()))
	}

	async fn write_order(&self, order: &Order) -> Result<(), StorageError> {
		fs::create_dir_all(&self.base_path)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;

		let path = self.get_file_path(&order.id);
		let bytes =
			serde_json::to_vec_pretty(order).map_err(|e| StorageError::Serialization(e.to_string()))?;

		let temp_path = path.with_extension("tmp");
		fs::write(&temp_path, bytes)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;
		fs::rename(&temp_path, &path)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;

		Ok(())
	}
}

#[async_trait]
impl StorageInterface for FileStorage {
	async fn get_order(&self, id: &str) -> Result<Order, StorageError> {
		let order = Self::read_order(&self.get_file_path(id)).await?;
		if order.id != id {
			tracing::warn!("Order file for {} holds order {}", id, order.id);
			return Err(StorageError::NotFound);
		}
		Ok(order)
	}

	async fn list_orders(&self, filter: StatusFilter) -> Result<Vec<Order>, StorageError> {
		let mut entries = match fs::read_dir(&self.base_path).await {
			Ok(entries) => entries,
			// Nothing written yet
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
			Err(e) => return Err(StorageError::Backend(e.to_string())),
		};

		let mut orders = Vec::new();
		while let Some(entry) = entries
			.next_entry()
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?
		{
			let path = entry.path();
			if path.extension() != Some(std::ffi::OsStr::new("json")) {
				continue;
			}
			match Self::read_order(&path).await {
				Ok(order) if filter.matches(order.status) => orders.push(order),
				Ok(_) => {},
				// Removed between read_dir and read
				Err(StorageError::NotFound) => {},
				Err(e) => {
					tracing::warn!("Skipping unreadable order file {:?}: {}", path, e);
				},
			}
		}

		orders.sort_by(|a, b| a.id.cmp(&b.id));
		Ok(orders)
	}

	async fn insert_order(&self, mut order: Order) -> Result<String, StorageError> {
		if order.id.is_empty() {
			order.id = new_order_id();
		}

		let _guard = self.write_lock.lock().await;
		if fs::try_exists(self.get_file_path(&order.id))
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?
		{
			return Err(StorageError::AlreadyExists);
		}

		self.write_order(&order).await?;
		Ok(order.id)
	}

	async fn set_order_status(
		&self,
		id: &str,
		expected: OrderStatus,
		status: OrderStatus,
	) -> Result<(), StorageError> {
		let _guard = self.write_lock.lock().await;
		let mut order = Self::read_order(&self.get_file_path(id)).await?;
		if order.status != expected {
			return Err(StorageError::Conflict {
				expected,
				actual: order.status,
			});
		}
		order.status = status;
		self.write_order(&order).await
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(FileStorageSchema)
	}
}

/// Configuration schema for FileStorage.
pub struct FileStorageSchema;

impl ConfigSchema for FileStorageSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![],
			vec![Field::new("storage_path", FieldType::String).with_validator(|value| {
				match value.as_str() {
					Some("") => Err("storage_path cannot be empty".to_string()),
					_ => Ok(()),
				}
			})],
		);
		schema.validate(config)
	}
}

/// Factory function to create a file storage backend from configuration.
///
/// Configuration parameters:
/// - `storage_path`: directory for order files (default: "./data/orders")
pub fn create_storage(config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	FileStorageSchema
		.validate(config)
		.map_err(|e| StorageError::Configuration(e.to_string()))?;

	let storage_path = config
		.get("storage_path")
		.and_then(|v| v.as_str())
		.unwrap_or(DEFAULT_STORAGE_PATH);

	Ok(Box::new(FileStorage::new(PathBuf::from(storage_path))))
}

/// Registry for the file storage implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "file";
	type Factory = StorageFactory;

	fn factory() -> Self::Factory {
		create_storage
	}
}

impl StorageRegistry for Registry {}

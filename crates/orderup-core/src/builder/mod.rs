//! Builder pattern for constructing order engines.
//!
//! Assembles an [`OrderEngine`] from the configured storage, charge and
//! fulfillment implementations using factory functions keyed by the names
//! that appear under each section's `implementations` table.

use crate::engine::OrderEngine;
use orderup_charge::{ChargeError, ChargeInterface, ChargeService};
use orderup_config::Config;
use orderup_fulfillment::{FulfillmentError, FulfillmentInterface, FulfillmentService};
use orderup_storage::{StorageError, StorageInterface, StorageService};
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during engine construction.
#[derive(Debug, Error)]
pub enum BuilderError {
	#[error("Configuration error: {0}")]
	Config(String),
	#[error("Missing required component: {0}")]
	MissingComponent(String),
}

/// Container for the factory functions needed to build an OrderEngine.
pub struct EngineFactories<SF, CF, FF> {
	pub storage_factories: HashMap<String, SF>,
	pub charge_factories: HashMap<String, CF>,
	pub fulfillment_factories: HashMap<String, FF>,
}

/// Builder for constructing an OrderEngine with pluggable implementations.
pub struct EngineBuilder {
	config: Config,
}

impl EngineBuilder {
	pub fn new(config: Config) -> Self {
		Self { config }
	}

	/// Builds the engine from the primary implementation of each section.
	///
	/// Every configured implementation with a known factory is constructed,
	/// so a broken table fails startup even when it is not the primary.
	pub fn build<SF, CF, FF>(
		self,
		factories: EngineFactories<SF, CF, FF>,
	) -> Result<OrderEngine, BuilderError>
	where
		SF: Fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>,
		CF: Fn(&toml::Value) -> Result<Box<dyn ChargeInterface>, ChargeError>,
		FF: Fn(&toml::Value) -> Result<Box<dyn FulfillmentInterface>, FulfillmentError>,
	{
		let storage_backend = load_primary(
			"storage",
			&self.config.storage.primary,
			&self.config.storage.implementations,
			&factories.storage_factories,
		)?;
		let charge_backend = load_primary(
			"charge",
			&self.config.charge.primary,
			&self.config.charge.implementations,
			&factories.charge_factories,
		)?;
		let fulfillment_backend = load_primary(
			"fulfillment",
			&self.config.fulfillment.primary,
			&self.config.fulfillment.implementations,
			&factories.fulfillment_factories,
		)?;

		let storage = Arc::new(StorageService::new(storage_backend));
		let charge = Arc::new(ChargeService::new(
			charge_backend,
			self.config.charge.max_concurrent_requests,
		));
		let fulfillment = Arc::new(FulfillmentService::new(fulfillment_backend));

		tracing::info!(
			service_id = %self.config.service.id,
			charge_concurrency = self.config.charge.max_concurrent_requests,
			"Order engine assembled"
		);

		Ok(OrderEngine::new(storage, charge, fulfillment))
	}
}

/// Instantiates every configured implementation of one component and
/// returns the primary.
fn load_primary<T, E, F>(
	component: &str,
	primary: &str,
	configs: &HashMap<String, toml::Value>,
	factories: &HashMap<String, F>,
) -> Result<T, BuilderError>
where
	E: Display,
	F: Fn(&toml::Value) -> Result<T, E>,
{
	let mut loaded = HashMap::new();
	for (name, config) in configs {
		let Some(factory) = factories.get(name) else {
			tracing::warn!(component, implementation = %name, "No factory registered, skipping");
			continue;
		};

		match factory(config) {
			Ok(implementation) => {
				let is_primary = primary == name;
				tracing::info!(component, implementation = %name, enabled = %is_primary, "Loaded");
				loaded.insert(name.clone(), implementation);
			},
			Err(e) => {
				tracing::error!(
					component,
					implementation = %name,
					error = %e,
					"Failed to create implementation"
				);
				return Err(BuilderError::Config(format!(
					"Failed to create {} implementation '{}': {}",
					component, name, e
				)));
			},
		}
	}

	loaded.remove(primary).ok_or_else(|| {
		BuilderError::MissingComponent(format!(
			"primary {} '{}' has no registered implementation",
			component, primary
		))
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::engine::CallContext;
	use orderup_storage::implementations::memory;
	use orderup_types::StatusFilter;

	type StorageFactory = fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>;
	type ChargeFactory = fn(&toml::Value) -> Result<Box<dyn ChargeInterface>, ChargeError>;
	type FulfillmentFactory =
		fn(&toml::Value) -> Result<Box<dyn FulfillmentInterface>, FulfillmentError>;

	const CONFIG: &str = r#"
[service]
id = "builder-test"

[storage]
primary = "memory"
[storage.implementations.memory]

[charge]
primary = "http"
max_concurrent_requests = 2
[charge.implementations.http]
base_url = "http://127.0.0.1:9"

[fulfillment]
primary = "http"
[fulfillment.implementations.http]
base_url = "http://127.0.0.1:9"
"#;

	fn factories() -> EngineFactories<StorageFactory, ChargeFactory, FulfillmentFactory> {
		EngineFactories {
			storage_factories: orderup_storage::get_all_implementations()
				.into_iter()
				.map(|(name, factory)| (name.to_string(), factory))
				.collect(),
			charge_factories: orderup_charge::get_all_implementations()
				.into_iter()
				.map(|(name, factory)| (name.to_string(), factory))
				.collect(),
			fulfillment_factories: orderup_fulfillment::get_all_implementations()
				.into_iter()
				.map(|(name, factory)| (name.to_string(), factory))
				.collect(),
		}
	}

	#[tokio::test]
	async fn test_build_from_config() {
		let config: Config = CONFIG.parse().unwrap();
		let engine = EngineBuilder::new(config).build(factories()).unwrap();

		let orders = engine
			.list_orders(&CallContext::background(), StatusFilter::All)
			.await
			.unwrap();
		assert!(orders.is_empty());
	}

	#[test]
	fn test_invalid_backend_table_fails() {
		let config: Config = CONFIG
			.replace(
				"base_url = \"http://127.0.0.1:9\"\n\n[fulfillment]",
				"base_url = \"nope\"\n\n[fulfillment]",
			)
			.parse()
			.unwrap();
		let result = EngineBuilder::new(config).build(factories());
		assert!(matches!(result, Err(BuilderError::Config(message)) if message.contains("charge")));
	}

	#[test]
	fn test_unregistered_primary_is_missing() {
		let config: Config = CONFIG.parse().unwrap();
		let mut factories = factories();
		factories.storage_factories.clear();
		factories
			.storage_factories
			.insert("other".to_string(), memory::create_storage as StorageFactory);

		let result = EngineBuilder::new(config).build(factories);
		assert!(matches!(result, Err(BuilderError::MissingComponent(_))));
	}
}

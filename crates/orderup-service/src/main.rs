//! Main entry point for the order lifecycle service.
//!
//! Loads the configuration, wires the configured storage, charge and
//! fulfillment backends into an order engine and serves the REST API.

use clap::Parser;
use orderup_config::Config;
use orderup_core::{EngineBuilder, EngineFactories, OrderEngine};
use std::path::PathBuf;
use std::sync::Arc;

mod apis;
mod server;

// Import implementations from individual crates
use orderup_charge::implementations::http::create_charge as create_http_charge;
use orderup_fulfillment::implementations::http::create_fulfillment as create_http_fulfillment;
use orderup_storage::implementations::file::create_storage as create_file_storage;
use orderup_storage::implementations::memory::create_storage as create_memory_storage;

/// Command-line arguments for the order service.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Path to configuration file
	#[arg(short, long, default_value = "config.toml")]
	config: PathBuf,

	/// Log level (trace, debug, info, warn, error)
	#[arg(short, long, default_value = "info")]
	log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	use tracing_subscriber::{fmt, EnvFilter};

	// RUST_LOG wins over --log-level
	let env_filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

	fmt()
		.with_env_filter(env_filter)
		.with_thread_ids(true)
		.with_target(true)
		.init();

	let config_path = args
		.config
		.to_str()
		.ok_or("configuration path is not valid UTF-8")?;
	let config = Config::from_file(config_path).await?;
	tracing::info!("Loaded configuration [{}]", config.service.id);

	let engine = Arc::new(build_engine(config.clone())?);

	match config.api.filter(|api| api.enabled) {
		Some(api_config) => server::start_server(api_config, engine).await?,
		None => tracing::info!("API server disabled; configuration and backends are valid"),
	}

	tracing::info!("Stopped order service");
	Ok(())
}

/// Macro to create a factory HashMap with the appropriate type aliases
macro_rules! create_factory_map {
	($interface:path, $error:path, $( $name:literal => $factory:expr ),* $(,)?) => {{
		let mut factories = std::collections::HashMap::new();
		$(
			factories.insert(
				$name.to_string(),
				$factory as fn(&toml::Value) -> Result<Box<dyn $interface>, $error>
			);
		)*
		factories
	}};
}

/// Builds the order engine from every backend this binary ships with.
fn build_engine(config: Config) -> Result<OrderEngine, Box<dyn std::error::Error>> {
	let builder = EngineBuilder::new(config);

	let storage_factories = create_factory_map!(
		orderup_storage::StorageInterface,
		orderup_storage::StorageError,
		"file" => create_file_storage,
		"memory" => create_memory_storage,
	);

	let charge_factories = create_factory_map!(
		orderup_charge::ChargeInterface,
		orderup_charge::ChargeError,
		"http" => create_http_charge,
	);

	let fulfillment_factories = create_factory_map!(
		orderup_fulfillment::FulfillmentInterface,
		orderup_fulfillment::FulfillmentError,
		"http" => create_http_fulfillment,
	);

	let factories = EngineFactories {
		storage_factories,
		charge_factories,
		fulfillment_factories,
	};

	Ok(builder.build(factories)?)
}

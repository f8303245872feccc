//! Fulfillment gateway client for the order lifecycle service.
//!
//! Requests fulfillment of one line item at a time from the external
//! fulfillment service. A successful response means the request was
//! accepted, not that the goods have shipped.

use async_trait::async_trait;
use orderup_types::{truncate_id, ConfigSchema, ImplementationRegistry};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod http;
}

/// Errors that can occur while talking to the fulfillment gateway.
#[derive(Debug, Error)]
pub enum FulfillmentError {
	/// The gateway answered with something other than `200 OK`.
	#[error("Fulfillment rejected with status {status}: {body}")]
	Rejected { status: u16, body: String },
	#[error("Network error: {0}")]
	Network(String),
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// Body sent to the fulfillment service for a single line item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FulfillmentRequest {
	pub description: String,
	pub quantity: i64,
	#[serde(rename = "orderID")]
	pub order_id: String,
}

/// Trait defining the interface for fulfillment gateway clients.
#[async_trait]
pub trait FulfillmentInterface: Send + Sync {
	/// Returns the configuration schema for this implementation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Asks the remote service to fulfill one line item.
	async fn fulfill_line_item(&self, request: &FulfillmentRequest)
		-> Result<(), FulfillmentError>;
}

/// Type alias for fulfillment factory functions.
pub type FulfillmentFactory =
	fn(&toml::Value) -> Result<Box<dyn FulfillmentInterface>, FulfillmentError>;

/// Registry trait for fulfillment implementations.
pub trait FulfillmentRegistry: ImplementationRegistry<Factory = FulfillmentFactory> {}

/// Get all registered fulfillment implementations.
pub fn get_all_implementations() -> Vec<(&'static str, FulfillmentFactory)> {
	use implementations::http;

	vec![(http::Registry::NAME, http::Registry::factory())]
}

/// Wraps the configured fulfillment backend.
pub struct FulfillmentService {
	backend: Box<dyn FulfillmentInterface>,
}

impl FulfillmentService {
	pub fn new(backend: Box<dyn FulfillmentInterface>) -> Self {
		Self { backend }
	}

	pub async fn fulfill_line_item(
		&self,
		order_id: &str,
		description: &str,
		quantity: i64,
	) -> Result<(), FulfillmentError> {
		let request = FulfillmentRequest {
			description: description.to_string(),
			quantity,
			order_id: order_id.to_string(),
		};

		self.backend.fulfill_line_item(&request).await?;
		tracing::debug!(
			order_id = %truncate_id(order_id),
			description,
			quantity,
			"Line item fulfillment accepted"
		);
		Ok(())
	}
}

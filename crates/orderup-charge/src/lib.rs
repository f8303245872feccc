//! Charge gateway client for the order lifecycle service.
//!
//! Issues charge and refund requests to the external payment service. A
//! positive amount captures funds from the card, a negative amount refunds
//! its absolute value. Clients never retry; that decision belongs to the
//! caller.

use async_trait::async_trait;
use orderup_types::{truncate_id, ConfigSchema, ImplementationRegistry};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;

/// Re-export implementations
pub mod implementations {
	pub mod http;
}

/// Errors that can occur while talking to the charge gateway.
#[derive(Debug, Error)]
pub enum ChargeError {
	/// The gateway answered with something other than `201 Created`.
	#[error("Charge rejected with status {status}: {body}")]
	Rejected { status: u16, body: String },
	/// The request never produced a response.
	#[error("Network error: {0}")]
	Network(String),
	/// Error that occurs during configuration validation.
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// Body sent to the payment service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargeRequest {
	pub card_token: String,
	/// Signed amount; negative values are refunds.
	pub amount_cents: i64,
}

/// Trait defining the interface for charge gateway clients.
#[async_trait]
pub trait ChargeInterface: Send + Sync {
	/// Returns the configuration schema for this implementation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Sends a single charge or refund. Succeeds only when the payment
	/// service confirms the capture.
	async fn charge(&self, request: &ChargeRequest) -> Result<(), ChargeError>;
}

/// Type alias for charge factory functions.
pub type ChargeFactory = fn(&toml::Value) -> Result<Box<dyn ChargeInterface>, ChargeError>;

/// Registry trait for charge implementations.
pub trait ChargeRegistry: ImplementationRegistry<Factory = ChargeFactory> {}

/// Get all registered charge implementations.
pub fn get_all_implementations() -> Vec<(&'static str, ChargeFactory)> {
	use implementations::http;

	vec![(http::Registry::NAME, http::Registry::factory())]
}

/// Service that bounds how many charge requests are in flight at once.
///
/// The production payment client cannot be used concurrently, so the limit
/// is usually 1. The bound applies only to charges; repository and
/// fulfillment traffic is unaffected.
pub struct ChargeService {
	backend: Box<dyn ChargeInterface>,
	limiter: Semaphore,
}

impl ChargeService {
	pub fn new(backend: Box<dyn ChargeInterface>, max_concurrent_requests: usize) -> Self {
		Self {
			backend,
			limiter: Semaphore::new(max_concurrent_requests.max(1)),
		}
	}

	/// Charges `amount_cents` to the card, or refunds it when negative.
	pub async fn charge(&self, card_token: &str, amount_cents: i64) -> Result<(), ChargeError> {
		let _permit = self
			.limiter
			.acquire()
			.await
			.map_err(|e| ChargeError::Network(e.to_string()))?;

		let request = ChargeRequest {
			card_token: card_token.to_string(),
			amount_cents,
		};

		match self.backend.charge(&request).await {
			Ok(()) => {
				tracing::info!(
					card = %truncate_id(card_token),
					amount_cents,
					"Charge accepted"
				);
				Ok(())
			},
			Err(e) => {
				tracing::warn!(
					card = %truncate_id(card_token),
					amount_cents,
					error = %e,
					"Charge failed"
				);
				Err(e)
			},
		}
	}
}

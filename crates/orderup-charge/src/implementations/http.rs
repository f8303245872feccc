//! HTTP charge gateway client.
//!
//! Posts `{cardToken, amountCents}` to `{base_url}/charge` and treats only
//! `201 Created` as success.

use crate::{ChargeError, ChargeFactory, ChargeInterface, ChargeRegistry, ChargeRequest};
use async_trait::async_trait;
use orderup_types::{
	http_url_validator, ConfigSchema, Field, FieldType, ImplementationRegistry, Schema,
	ValidationError,
};
use reqwest::StatusCode;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

/// Charge client backed by a pooled `reqwest` client.
pub struct HttpCharge {
	client: reqwest::Client,
	endpoint: String,
}

impl HttpCharge {
	pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ChargeError> {
		let client = reqwest::Client::builder()
			.timeout(timeout)
			.build()
			.map_err(|e| ChargeError::Configuration(e.to_string()))?;

		Ok(Self {
			client,
			endpoint: format!("{}/charge", base_url.trim_end_matches('/')),
		})
	}
}

#[async_trait]
impl ChargeInterface for HttpCharge {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(HttpChargeSchema)
	}

	async fn charge(&self, request: &ChargeRequest) -> Result<(), ChargeError> {
		let response = self
			.client
			.post(&self.endpoint)
			.json(request)
			.send()
			.await
			.map_err(|e| ChargeError::Network(e.to_string()))?;

		let status = response.status();
		if status == StatusCode::CREATED {
			return Ok(());
		}

		// The body is diagnostics only
		let body = response.text().await.unwrap_or_default();
		Err(ChargeError::Rejected {
			status: status.as_u16(),
			body,
		})
	}
}

/// Configuration schema for the HTTP charge client.
pub struct HttpChargeSchema;

impl ConfigSchema for HttpChargeSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![Field::new("base_url", FieldType::String).with_validator(http_url_validator)],
			vec![Field::new(
				"timeout_seconds",
				FieldType::Integer {
					min: Some(1),
					max: Some(300),
				},
			)],
		);
		schema.validate(config)
	}
}

/// Factory function to create the HTTP charge client from configuration.
///
/// Configuration parameters:
/// - `base_url`: payment service root, e.g. "http://127.0.0.1:8081"
/// - `timeout_seconds`: per-request timeout (default: 30)
pub fn create_charge(config: &toml::Value) -> Result<Box<dyn ChargeInterface>, ChargeError> {
	HttpChargeSchema
		.validate(config)
		.map_err(|e| ChargeError::Configuration(e.to_string()))?;

	let base_url = config
		.get("base_url")
		.and_then(|v| v.as_str())
		.ok_or_else(|| ChargeError::Configuration("base_url is required".into()))?;
	let timeout_seconds = config
		.get("timeout_seconds")
		.and_then(|v| v.as_integer())
		.map(|v| v as u64)
		.unwrap_or(DEFAULT_TIMEOUT_SECONDS);

	Ok(Box::new(HttpCharge::new(
		base_url,
		Duration::from_secs(timeout_seconds),
	)?))
}

/// Registry for the HTTP charge implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "http";
	type Factory = ChargeFactory;

	fn factory() -> Self::Factory {
		create_charge
	}
}

impl ChargeRegistry for Registry {}

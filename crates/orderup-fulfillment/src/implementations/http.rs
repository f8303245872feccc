//! HTTP fulfillment gateway client.
//!
//! Sends `PUT {base_url}/fulfill` once per line item. Only `200 OK` counts
//! as accepted.

use crate::{
	FulfillmentError, FulfillmentFactory, FulfillmentInterface, FulfillmentRegistry,
	FulfillmentRequest,
};
use async_trait::async_trait;
use orderup_types::{
	http_url_validator, ConfigSchema, Field, FieldType, ImplementationRegistry, Schema,
	ValidationError,
};
use reqwest::StatusCode;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

pub struct HttpFulfillment {
	client: reqwest::Client,
	endpoint: String,
}

impl HttpFulfillment {
	pub fn new(base_url: &str, timeout: Duration) -> Result<Self, FulfillmentError> {
		let client = reqwest::Client::builder()
			.timeout(timeout)
			.build()
			.map_err(|e| FulfillmentError::Configuration(e.to_string()))?;

		Ok(Self {
			client,
			endpoint: format!("{}/fulfill", base_url.trim_end_matches('/')),
		})
	}
}

#[async_trait]
impl FulfillmentInterface for HttpFulfillment {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(HttpFulfillmentSchema)
	}

	async fn fulfill_line_item(
		&self,
		request: &FulfillmentRequest,
	) -> Result<(), FulfillmentError> {
		let response = self
			.client
			.put(&self.endpoint)
			.json(request)
			.send()
			.await
			.map_err(|e| FulfillmentError::Network(e.to_string()))?;

		let status = response.status();
		if status == StatusCode::OK {
			return Ok(());
		}

		let body = response.text().await.unwrap_or_default();
		Err(FulfillmentError::Rejected {
			status: status.as_u16(),
			body,
		})
	}
}

/// Configuration schema for the HTTP fulfillment client.
pub struct HttpFulfillmentSchema;

impl ConfigSchema for HttpFulfillmentSchema {
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

/// Factory function to create the HTTP fulfillment client from configuration.
///
/// Configuration parameters:
/// - `base_url`: fulfillment service root, e.g. "http://127.0.0.1:8082"
/// - `timeout_seconds`: per-request timeout (default: 30)
pub fn create_fulfillment(
	config: &toml::Value,
) -> Result<Box<dyn FulfillmentInterface>, FulfillmentError> {
	HttpFulfillmentSchema
		.validate(config)
		.map_err(|e| FulfillmentError::Configuration(e.to_string()))?;

	let base_url = config
		.get("base_url")
		.and_then(|v| v.as_str())
		.ok_or_else(|| FulfillmentError::Configuration("base_url is required".into()))?;
	let timeout_seconds = config
		.get("timeout_seconds")
		.and_then(|v| v.as_integer())
		.map(|v| v as u64)
		.unwrap_or(DEFAULT_TIMEOUT_SECONDS);

	Ok(Box::new(HttpFulfillment::new(
		base_url,
		Duration::from_secs(timeout_seconds),
	)?))
}

/// Registry for the HTTP fulfillment implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "http";
	type Factory = FulfillmentFactory;

	fn factory() -> Self::Factory {
		create_fulfillment
	}
}

impl FulfillmentRegistry for Registry {}

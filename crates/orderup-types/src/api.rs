//! API types for the order HTTP API.
//!
//! Request and response bodies for the `/orders` endpoints plus the
//! structured error type returned by every handler.

use crate::{LineItem, Order};
use axum::{
	http::StatusCode,
	response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Response for `GET /orders`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListOrdersResponse {
	pub orders: Vec<Order>,
}

/// Body for `POST /orders`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
	/// Caller-assigned identifier. Assigned by the repository when absent.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub id: Option<String>,
	pub customer_email: String,
	#[serde(default)]
	pub line_items: Vec<LineItem>,
}

/// Response for `POST /orders` and `GET /orders/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResponse {
	pub order: Order,
}

/// Body for `POST /orders/{id}/charge`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargeOrderRequest {
	pub card_token: String,
}

/// Response for `POST /orders/{id}/charge`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargeOrderResponse {
	pub charged_cents: i64,
}

/// Body for `POST /orders/{id}/cancel`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelOrderRequest {
	pub card_token: String,
}

/// Response for `POST /orders/{id}/cancel`.
///
/// `charged_cents` is the signed amount refunded, zero when nothing was refunded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelOrderResponse {
	pub order_status: String,
	pub charged_cents: i64,
}

/// Response for `PUT /orders/{id}/fulfill`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FulfillOrderResponse {
	pub fulfilled: bool,
}

/// API error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
	/// Error type/code
	pub error: String,
	/// Human-readable description
	pub message: String,
}

/// Structured API error type with HTTP status mapping.
#[derive(Debug)]
pub enum APIError {
	/// Malformed or illegal input (400)
	BadRequest { error_type: String, message: String },
	/// Unknown order (404)
	NotFound { error_type: String, message: String },
	/// State conflict, e.g. already charged (409)
	Conflict { error_type: String, message: String },
	/// Caller gave up on the request (499)
	ClientClosedRequest { error_type: String, message: String },
	/// Remote dependency failure (502)
	BadGateway { error_type: String, message: String },
	/// Request deadline elapsed (504)
	GatewayTimeout { error_type: String, message: String },
	/// Internal server error (500)
	InternalServerError { error_type: String, message: String },
}

impl APIError {
	/// Get the HTTP status code for this error.
	pub fn status_code(&self) -> u16 {
		match self {
			APIError::BadRequest { .. } => 400,
			APIError::NotFound { .. } => 404,
			APIError::Conflict { .. } => 409,
			APIError::ClientClosedRequest { .. } => 499,
			APIError::BadGateway { .. } => 502,
			APIError::GatewayTimeout { .. } => 504,
			APIError::InternalServerError { .. } => 500,
		}
	}

	/// Convert to ErrorResponse for JSON serialization.
	pub fn to_error_response(&self) -> ErrorResponse {
		let (error_type, message) = match self {
			APIError::BadRequest { error_type, message }
			| APIError::NotFound { error_type, message }
			| APIError::Conflict { error_type, message }
			| APIError::ClientClosedRequest { error_type, message }
			| APIError::BadGateway { error_type, message }
			| APIError::GatewayTimeout { error_type, message }
			| APIError::InternalServerError { error_type, message } => (error_type, message),
		};
		ErrorResponse {
			error: error_type.clone(),
			message: message.clone(),
		}
	}
}

impl fmt::Display for APIError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let response = self.to_error_response();
		write!(f, "{} ({}): {}", response.error, self.status_code(), response.message)
	}
}

impl std::error::Error for APIError {}

impl IntoResponse for APIError {
	fn into_response(self) -> Response {
		let status =
			StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
		(status, Json(self.to_error_response())).into_response()
	}
}

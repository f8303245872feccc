//! Order endpoints.
//!
//! Thin adapters between JSON bodies and [`OrderEngine`](orderup_core::OrderEngine)
//! operations. All business rules live in the engine.

use super::run_engine;
use crate::server::AppState;
use axum::{
	extract::{rejection::JsonRejection, Path, Query, State},
	http::StatusCode,
	response::Json,
};
use orderup_core::NewOrder;
use orderup_types::{
	APIError, CancelOrderRequest, CancelOrderResponse, ChargeOrderRequest, ChargeOrderResponse,
	CreateOrderRequest, FulfillOrderResponse, ListOrdersResponse, OrderResponse, StatusFilter,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ListOrdersQuery {
	pub status: Option<String>,
}

/// Unwraps a JSON body, turning malformed input into a 400.
fn parse_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, APIError> {
	payload
		.map(|Json(body)| body)
		.map_err(|rejection| APIError::BadRequest {
			error_type: "VALIDATION_ERROR".to_string(),
			message: rejection.body_text(),
		})
}

/// Handles GET /orders?status=
pub async fn list_orders(
	State(state): State<AppState>,
	Query(query): Query<ListOrdersQuery>,
) -> Result<Json<ListOrdersResponse>, APIError> {
	let filter =
		StatusFilter::from_query(query.status.as_deref()).map_err(|e| APIError::BadRequest {
			error_type: "UNKNOWN_STATUS".to_string(),
			message: e.to_string(),
		})?;

	let orders = run_engine(&state, move |engine, ctx| async move {
		engine.list_orders(&ctx, filter).await
	})
	.await?;
	Ok(Json(ListOrdersResponse { orders }))
}

/// Handles POST /orders
pub async fn create_order(
	State(state): State<AppState>,
	payload: Result<Json<CreateOrderRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<OrderResponse>), APIError> {
	let request = parse_body(payload)?;
	let new_order = NewOrder {
		id: request.id.filter(|id| !id.is_empty()),
		customer_email: request.customer_email,
		line_items: request.line_items,
	};

	let order = run_engine(&state, move |engine, ctx| async move {
		engine.create_order(&ctx, new_order).await
	})
	.await?;
	Ok((StatusCode::CREATED, Json(OrderResponse { order })))
}

/// Handles GET /orders/{id}
pub async fn get_order(
	State(state): State<AppState>,
	Path(id): Path<String>,
) -> Result<Json<OrderResponse>, APIError> {
	let order = run_engine(&state, move |engine, ctx| async move {
		engine.get_order(&ctx, &id).await
	})
	.await?;
	Ok(Json(OrderResponse { order }))
}

/// Handles POST /orders/{id}/charge
pub async fn charge_order(
	State(state): State<AppState>,
	Path(id): Path<String>,
	payload: Result<Json<ChargeOrderRequest>, JsonRejection>,
) -> Result<Json<ChargeOrderResponse>, APIError> {
	let request = parse_body(payload)?;

	let charged_cents = run_engine(&state, move |engine, ctx| async move {
		engine.charge_order(&ctx, &id, &request.card_token).await
	})
	.await?;
	Ok(Json(ChargeOrderResponse { charged_cents }))
}

/// Handles POST /orders/{id}/cancel
pub async fn cancel_order(
	State(state): State<AppState>,
	Path(id): Path<String>,
	payload: Result<Json<CancelOrderRequest>, JsonRejection>,
) -> Result<Json<CancelOrderResponse>, APIError> {
	let request = parse_body(payload)?;

	let (status, refunded_cents) = run_engine(&state, move |engine, ctx| async move {
		engine.cancel_order(&ctx, &id, &request.card_token).await
	})
	.await?;
	Ok(Json(CancelOrderResponse {
		order_status: status.label().to_string(),
		charged_cents: refunded_cents,
	}))
}

/// Handles PUT /orders/{id}/fulfill
pub async fn fulfill_order(
	State(state): State<AppState>,
	Path(id): Path<String>,
) -> Result<Json<FulfillOrderResponse>, APIError> {
	let fulfilled = run_engine(&state, move |engine, ctx| async move {
		engine.fulfill_order(&ctx, &id).await
	})
	.await?;
	Ok(Json(FulfillOrderResponse { fulfilled }))
}

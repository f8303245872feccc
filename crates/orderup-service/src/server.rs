//! HTTP server for the order API.
//!
//! Exposes the order lifecycle operations under `/orders` and the
//! reconciliation listing under `/admin`.

use crate::apis;
use axum::{
	routing::{get, post, put},
	Router,
};
use orderup_config::ApiConfig;
use orderup_core::OrderEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
	cors::CorsLayer, limit::RequestBodyLimitLayer, map_response_body::MapResponseBodyLayer,
	trace::TraceLayer,
};

/// Shared application state for the API server.
#[derive(Clone)]
pub struct AppState {
	pub engine: Arc<OrderEngine>,
	/// Deadline applied to each request's engine operation.
	pub request_timeout: Duration,
}

/// Builds the API router.
pub fn router(state: AppState, max_request_size: usize) -> Router {
	Router::new()
		.route(
			"/orders",
			get(apis::order::list_orders).post(apis::order::create_order),
		)
		.route("/orders/{id}", get(apis::order::get_order))
		.route("/orders/{id}/charge", post(apis::order::charge_order))
		.route("/orders/{id}/cancel", post(apis::order::cancel_order))
		.route("/orders/{id}/fulfill", put(apis::order::fulfill_order))
		.route(
			"/admin/reconciliation",
			get(apis::admin::list_reconciliation),
		)
		.layer(
			ServiceBuilder::new()
				.layer(TraceLayer::new_for_http())
				.layer(CorsLayer::permissive())
				.layer(MapResponseBodyLayer::new(axum::body::Body::new))
				.layer(RequestBodyLimitLayer::new(max_request_size)),
		)
		.with_state(state)
}

/// Starts the HTTP server and serves until Ctrl-C.
pub async fn start_server(
	api_config: ApiConfig,
	engine: Arc<OrderEngine>,
) -> Result<(), Box<dyn std::error::Error>> {
	let state = AppState {
		engine,
		request_timeout: Duration::from_secs(api_config.timeout_seconds),
	};
	let app = router(state, api_config.max_request_size);

	let bind_address = format!("{}:{}", api_config.host, api_config.port);
	let listener = TcpListener::bind(&bind_address).await?;

	tracing::info!("Order API server starting on {}", bind_address);

	axum::serve(listener, app)
		.with_graceful_shutdown(async {
			if let Err(e) = tokio::signal::ctrl_c().await {
				tracing::error!(error = %e, "Failed to listen for shutdown signal");
			}
		})
		.await?;

	Ok(())
}

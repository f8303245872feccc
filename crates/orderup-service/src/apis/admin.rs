//! Operator endpoints.

use crate::server::AppState;
use axum::{extract::State, response::Json};
use orderup_core::InconsistencyRecord;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ReconciliationResponse {
	pub records: Vec<InconsistencyRecord>,
}

/// Handles GET /admin/reconciliation
///
/// Lists orders whose last successful gateway call never reached the
/// repository.
pub async fn list_reconciliation(State(state): State<AppState>) -> Json<ReconciliationResponse> {
	let records = state.engine.pending_reconciliation().await;
	if !records.is_empty() {
		tracing::warn!(count = records.len(), "Orders awaiting reconciliation");
	}
	Json(ReconciliationResponse { records })
}

//! HTTP handlers for the order API.

pub mod admin;
pub mod order;

use crate::server::AppState;
use orderup_core::{CallContext, CancelHandle, EngineError, OrderEngine};
use orderup_types::APIError;
use std::future::Future;
use std::sync::Arc;

/// Cancels the request context when the handler future is dropped, which
/// happens when the client disconnects.
struct CancelOnDrop(CancelHandle);

impl Drop for CancelOnDrop {
	fn drop(&mut self) {
		self.0.cancel();
	}
}

/// Runs an engine operation under the request deadline.
///
/// The operation runs on its own task so that a disconnecting client
/// cancels it through the context instead of dropping it midway; a status
/// write that follows a successful gateway call always completes.
pub(crate) async fn run_engine<F, Fut, T>(state: &AppState, operation: F) -> Result<T, APIError>
where
	F: FnOnce(Arc<OrderEngine>, CallContext) -> Fut,
	Fut: Future<Output = Result<T, EngineError>> + Send + 'static,
	T: Send + 'static,
{
	let (ctx, handle) = CallContext::with_timeout(state.request_timeout).cancellable();
	let _cancel_on_drop = CancelOnDrop(handle);

	match tokio::spawn(operation(state.engine.clone(), ctx)).await {
		Ok(result) => result.map_err(engine_error),
		Err(e) => {
			tracing::error!(error = %e, "Engine task failed");
			Err(APIError::InternalServerError {
				error_type: "INTERNAL_ERROR".to_string(),
				message: "request handler failed".to_string(),
			})
		},
	}
}

/// Maps engine failures onto HTTP error responses.
pub(crate) fn engine_error(error: EngineError) -> APIError {
	let message = error.to_string();
	match error {
		EngineError::Validation(_) => APIError::BadRequest {
			error_type: "VALIDATION_ERROR".to_string(),
			message,
		},
		EngineError::NotFound(_) => APIError::NotFound {
			error_type: "ORDER_NOT_FOUND".to_string(),
			message,
		},
		EngineError::Conflict(_) => APIError::Conflict {
			error_type: "ORDER_CONFLICT".to_string(),
			message,
		},
		EngineError::Gateway(_) => APIError::BadGateway {
			error_type: "GATEWAY_ERROR".to_string(),
			message,
		},
		EngineError::Storage(_) => APIError::InternalServerError {
			error_type: "STORAGE_ERROR".to_string(),
			message,
		},
		EngineError::Inconsistent { .. } => APIError::InternalServerError {
			error_type: "INCONSISTENT_STATE".to_string(),
			message,
		},
		EngineError::Cancelled => APIError::ClientClosedRequest {
			error_type: "REQUEST_CANCELLED".to_string(),
			message,
		},
		EngineError::DeadlineExceeded => APIError::GatewayTimeout {
			error_type: "DEADLINE_EXCEEDED".to_string(),
			message,
		},
	}
}

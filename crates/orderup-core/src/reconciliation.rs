//! Records of gateway calls whose outcome never reached the repository.
//!
//! When a charge, refund or fulfillment succeeds remotely but the status
//! write that should follow it fails, the durable order no longer reflects
//! reality. The engine cannot repair this on its own, so it records the
//! mismatch here for an operator or a reconciliation job.

use orderup_types::{current_timestamp, truncate_id, OrderStatus};
use serde::Serialize;
use tokio::sync::RwLock;

/// The gateway call that succeeded before the failed write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum GatewayCall {
	Charge { amount_cents: i64 },
	Refund { amount_cents: i64 },
	Fulfillment { line_items: usize },
}

/// One order whose persisted status disagrees with a completed gateway call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InconsistencyRecord {
	pub order_id: String,
	pub gateway_call: GatewayCall,
	/// Status the order should have after the gateway call.
	pub intended_status: OrderStatus,
	/// Status found in the repository, when the write failure revealed it.
	pub persisted_status: Option<OrderStatus>,
	pub error: String,
	/// Unix seconds.
	pub recorded_at: u64,
}

#[derive(Default)]
pub struct ReconciliationLog {
	records: RwLock<Vec<InconsistencyRecord>>,
}

impl ReconciliationLog {
	pub fn new() -> Self {
		Self::default()
	}

	pub async fn record(
		&self,
		order_id: &str,
		gateway_call: GatewayCall,
		intended_status: OrderStatus,
		persisted_status: Option<OrderStatus>,
		error: String,
	) -> InconsistencyRecord {
		let record = InconsistencyRecord {
			order_id: order_id.to_string(),
			gateway_call,
			intended_status,
			persisted_status,
			error,
			recorded_at: current_timestamp(),
		};

		tracing::error!(
			target: "reconciliation",
			order_id = %truncate_id(order_id),
			gateway_call = ?record.gateway_call,
			intended_status = %intended_status,
			error = %record.error,
			"Gateway call succeeded but status write failed; manual reconciliation required"
		);

		self.records.write().await.push(record.clone());
		record
	}

	/// Every mismatch recorded since startup, oldest first.
	pub async fn pending(&self) -> Vec<InconsistencyRecord> {
		self.records.read().await.clone()
	}
}

//! Order lifecycle engine.
//!
//! Owns transition legality and amount computation, and orchestrates the
//! charge and fulfillment gateways against the order repository. Every
//! gateway call happens before the status write it justifies, so a failure
//! before the write leaves the order untouched and the operation safe to
//! retry.

use crate::reconciliation::{GatewayCall, InconsistencyRecord, ReconciliationLog};
use crate::state::{OrderLocks, OrderStateError, OrderStateMachine};
use orderup_charge::ChargeService;
use orderup_fulfillment::FulfillmentService;
use orderup_storage::{StorageError, StorageService};
use orderup_types::{truncate_id, LineItem, Order, OrderStatus, StatusFilter};
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;

pub mod context;

pub use context::{CallContext, CancelHandle, Interrupted};

/// Errors surfaced by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
	/// Malformed or illegal input. Never worth retrying unchanged.
	#[error("Validation error: {0}")]
	Validation(String),
	#[error("Order not found: {0}")]
	NotFound(String),
	/// The order's current status does not allow the operation.
	#[error("Conflict: {0}")]
	Conflict(String),
	/// A gateway call failed before any state was written.
	#[error("Gateway error: {0}")]
	Gateway(String),
	#[error("Storage error: {0}")]
	Storage(String),
	/// A gateway call succeeded but its status write did not.
	#[error("Inconsistent state for order {order_id}: {message}")]
	Inconsistent { order_id: String, message: String },
	#[error("Request cancelled")]
	Cancelled,
	#[error("Deadline exceeded")]
	DeadlineExceeded,
}

impl EngineError {
	/// Whether re-issuing the same operation may succeed without any change
	/// to the request or the order.
	pub fn is_retryable(&self) -> bool {
		matches!(
			self,
			EngineError::Gateway(_)
				| EngineError::Storage(_)
				| EngineError::Cancelled
				| EngineError::DeadlineExceeded
		)
	}
}

impl From<Interrupted> for EngineError {
	fn from(interrupted: Interrupted) -> Self {
		match interrupted {
			Interrupted::Cancelled => EngineError::Cancelled,
			Interrupted::DeadlineExceeded => EngineError::DeadlineExceeded,
		}
	}
}

/// Input for [`OrderEngine::create_order`].
#[derive(Debug, Clone)]
pub struct NewOrder {
	/// Caller-assigned id. The repository picks one when absent.
	pub id: Option<String>,
	pub customer_email: String,
	pub line_items: Vec<LineItem>,
}

/// Main engine coordinating the repository and both gateways.
pub struct OrderEngine {
	storage: Arc<StorageService>,
	charge: Arc<ChargeService>,
	fulfillment: Arc<FulfillmentService>,
	state_machine: OrderStateMachine,
	locks: OrderLocks,
	reconciliation: ReconciliationLog,
}

impl OrderEngine {
	pub fn new(
		storage: Arc<StorageService>,
		charge: Arc<ChargeService>,
		fulfillment: Arc<FulfillmentService>,
	) -> Self {
		Self {
			state_machine: OrderStateMachine::new(storage.clone()),
			storage,
			charge,
			fulfillment,
			locks: OrderLocks::new(),
			reconciliation: ReconciliationLog::new(),
		}
	}

	/// Validates and persists a new `Pending` order.
	#[instrument(skip_all, fields(email = %new_order.customer_email))]
	pub async fn create_order(
		&self,
		ctx: &CallContext,
		new_order: NewOrder,
	) -> Result<Order, EngineError> {
		if !new_order.customer_email.contains('@') {
			return Err(EngineError::Validation(
				"customerEmail must contain '@'".into(),
			));
		}
		if new_order.line_items.is_empty() {
			return Err(EngineError::Validation(
				"order must have at least one line item".into(),
			));
		}

		let mut order = Order {
			id: new_order.id.unwrap_or_default(),
			customer_email: new_order.customer_email,
			line_items: new_order.line_items,
			status: OrderStatus::Pending,
		};
		let total = checked_total(&order)?;
		if total < 0 {
			return Err(EngineError::Validation(format!(
				"order total must not be negative, got {}",
				total
			)));
		}

		let requested_id = order.id.clone();
		order.id = ctx
			.run(self.storage.insert_order(order.clone()))
			.await?
			.map_err(|e| match e {
				StorageError::AlreadyExists => {
					EngineError::Conflict(format!("order {} already exists", requested_id))
				},
				other => EngineError::Storage(other.to_string()),
			})?;

		tracing::info!(
			order_id = %truncate_id(&order.id),
			total_cents = total,
			line_items = order.line_items.len(),
			"Order created"
		);
		Ok(order)
	}

	/// Returns a single order.
	#[instrument(skip_all, fields(order_id = %truncate_id(order_id)))]
	pub async fn get_order(&self, ctx: &CallContext, order_id: &str) -> Result<Order, EngineError> {
		self.load(ctx, order_id).await
	}

	/// Returns every order matching `filter`, possibly none.
	#[instrument(skip_all, fields(filter = %filter))]
	pub async fn list_orders(
		&self,
		ctx: &CallContext,
		filter: StatusFilter,
	) -> Result<Vec<Order>, EngineError> {
		ctx.run(self.storage.list_orders(filter))
			.await?
			.map_err(|e| EngineError::Storage(e.to_string()))
	}

	/// Charges a `Pending` order's total and marks it `Charged`.
	///
	/// A zero total skips the gateway. A negative total is charged as is,
	/// which the payment service treats as a refund.
	#[instrument(skip_all, fields(order_id = %truncate_id(order_id)))]
	pub async fn charge_order(
		&self,
		ctx: &CallContext,
		order_id: &str,
		card_token: &str,
	) -> Result<i64, EngineError> {
		let _guard = ctx.run(self.locks.acquire(order_id)).await?;
		let order = self.load(ctx, order_id).await?;

		match order.status {
			OrderStatus::Pending => {},
			OrderStatus::Charged | OrderStatus::Fulfilled => {
				return Err(EngineError::Conflict("order already charged".into()))
			},
			OrderStatus::Cancelled => {
				return Err(EngineError::Conflict("order is cancelled".into()))
			},
		}

		let amount_cents = checked_total(&order)?;
		let gateway_call = if amount_cents != 0 {
			ctx.run(self.charge.charge(card_token, amount_cents))
				.await?
				.map_err(|e| EngineError::Gateway(e.to_string()))?;
			Some(GatewayCall::Charge { amount_cents })
		} else {
			tracing::debug!("Order total is zero, skipping charge");
			None
		};

		self.commit(&order, OrderStatus::Charged, gateway_call)
			.await?;
		tracing::info!(amount_cents, "Order charged");
		Ok(amount_cents)
	}

	/// Cancels an order, refunding it first when it was charged.
	///
	/// Returns the final status and the signed amount sent to the charge
	/// gateway (zero when nothing was refunded). Cancelling an order that is
	/// already cancelled succeeds without side effects.
	#[instrument(skip_all, fields(order_id = %truncate_id(order_id)))]
	pub async fn cancel_order(
		&self,
		ctx: &CallContext,
		order_id: &str,
		card_token: &str,
	) -> Result<(OrderStatus, i64), EngineError> {
		let _guard = ctx.run(self.locks.acquire(order_id)).await?;
		let order = self.load(ctx, order_id).await?;

		let refund_cents = match order.status {
			OrderStatus::Fulfilled => {
				return Err(EngineError::Conflict("order already fulfilled".into()))
			},
			OrderStatus::Cancelled => {
				tracing::debug!("Order already cancelled");
				return Ok((OrderStatus::Cancelled, 0));
			},
			OrderStatus::Pending => 0,
			OrderStatus::Charged => checked_total(&order)?
				.checked_neg()
				.ok_or_else(|| EngineError::Validation("order total cannot be refunded".into()))?,
		};

		let gateway_call = if refund_cents != 0 {
			ctx.run(self.charge.charge(card_token, refund_cents))
				.await?
				.map_err(|e| EngineError::Gateway(e.to_string()))?;
			Some(GatewayCall::Refund {
				amount_cents: refund_cents,
			})
		} else {
			None
		};

		self.commit(&order, OrderStatus::Cancelled, gateway_call)
			.await?;
		tracing::info!(refund_cents, "Order cancelled");
		Ok((OrderStatus::Cancelled, refund_cents))
	}

	/// Requests fulfillment of every line item of a `Charged` order, in
	/// order, then marks it `Fulfilled`.
	///
	/// The first failing line item aborts the operation with no status
	/// change; the whole operation may then be retried.
	#[instrument(skip_all, fields(order_id = %truncate_id(order_id)))]
	pub async fn fulfill_order(&self, ctx: &CallContext, order_id: &str) -> Result<bool, EngineError> {
		let _guard = ctx.run(self.locks.acquire(order_id)).await?;
		let order = self.load(ctx, order_id).await?;

		if order.status != OrderStatus::Charged {
			return Err(EngineError::Validation(format!(
				"order not charged yet (status: {})",
				order.status
			)));
		}

		for (index, item) in order.line_items.iter().enumerate() {
			ctx.run(self.fulfillment.fulfill_line_item(
				&order.id,
				&item.description,
				item.quantity,
			))
			.await?
			.map_err(|e| {
				tracing::warn!(line_item = index, error = %e, "Line item fulfillment failed");
				EngineError::Gateway(e.to_string())
			})?;
		}

		let gateway_call = (!order.line_items.is_empty()).then(|| GatewayCall::Fulfillment {
			line_items: order.line_items.len(),
		});
		self.commit(&order, OrderStatus::Fulfilled, gateway_call)
			.await?;
		tracing::info!("Order fulfilled");
		Ok(true)
	}

	/// Gateway calls whose outcome could not be persisted, oldest first.
	pub async fn pending_reconciliation(&self) -> Vec<InconsistencyRecord> {
		self.reconciliation.pending().await
	}

	async fn load(&self, ctx: &CallContext, order_id: &str) -> Result<Order, EngineError> {
		ctx.run(self.storage.get_order(order_id))
			.await?
			.map_err(|e| match e {
				StorageError::NotFound => EngineError::NotFound(order_id.to_string()),
				other => EngineError::Storage(other.to_string()),
			})
	}

	/// Writes the status that a completed orchestration earned.
	///
	/// Not run under the call context: once a gateway call has succeeded,
	/// abandoning the write would leave exactly the mismatch it records.
	async fn commit(
		&self,
		order: &Order,
		to: OrderStatus,
		gateway_call: Option<GatewayCall>,
	) -> Result<(), EngineError> {
		let error = match self.state_machine.transition(order, to).await {
			Ok(()) => return Ok(()),
			Err(error) => error,
		};

		let Some(gateway_call) = gateway_call else {
			return Err(match error {
				OrderStateError::Storage(StorageError::NotFound) => {
					EngineError::NotFound(order.id.clone())
				},
				OrderStateError::Storage(StorageError::Conflict { actual, .. }) => {
					EngineError::Conflict(format!("order status changed to {}", actual))
				},
				OrderStateError::InvalidTransition { from, to } => {
					EngineError::Conflict(format!("cannot move order from {} to {}", from, to))
				},
				OrderStateError::Storage(other) => EngineError::Storage(other.to_string()),
			});
		};

		let persisted_status = match &error {
			OrderStateError::Storage(StorageError::Conflict { actual, .. }) => Some(*actual),
			_ => None,
		};
		let record = self
			.reconciliation
			.record(&order.id, gateway_call, to, persisted_status, error.to_string())
			.await;

		Err(EngineError::Inconsistent {
			order_id: record.order_id,
			message: record.error,
		})
	}
}

/// Derives an order's total, rejecting line items whose sum overflows.
fn checked_total(order: &Order) -> Result<i64, EngineError> {
	order
		.total_cents()
		.ok_or_else(|| EngineError::Validation("order total overflows".into()))
}

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;
	use mockall::mock;
	use orderup_charge::{ChargeError, ChargeInterface, ChargeRequest};
	use orderup_fulfillment::{FulfillmentError, FulfillmentInterface, FulfillmentRequest};
	use orderup_storage::implementations::memory::MemoryStorage;
	use orderup_storage::StorageInterface;
	use orderup_types::ConfigSchema;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::sync::Mutex;
	use std::time::Duration;

	mock! {
		pub Storage {}

		#[async_trait]
		impl StorageInterface for Storage {
			async fn get_order(&self, id: &str) -> Result<Order, StorageError>;
			async fn list_orders(&self, filter: StatusFilter) -> Result<Vec<Order>, StorageError>;
			async fn insert_order(&self, order: Order) -> Result<String, StorageError>;
			async fn set_order_status(
				&self,
				id: &str,
				expected: OrderStatus,
				status: OrderStatus,
			) -> Result<(), StorageError>;
			fn config_schema(&self) -> Box<dyn ConfigSchema>;
		}
	}

	mock! {
		pub Charge {}

		#[async_trait]
		impl ChargeInterface for Charge {
			fn config_schema(&self) -> Box<dyn ConfigSchema>;
			async fn charge(&self, request: &ChargeRequest) -> Result<(), ChargeError>;
		}
	}

	mock! {
		pub Fulfillment {}

		#[async_trait]
		impl FulfillmentInterface for Fulfillment {
			fn config_schema(&self) -> Box<dyn ConfigSchema>;
			async fn fulfill_line_item(
				&self,
				request: &FulfillmentRequest,
			) -> Result<(), FulfillmentError>;
		}
	}

	/// Charge gateway that takes a long time to answer.
	struct SlowCharge;

	#[async_trait]
	impl ChargeInterface for SlowCharge {
		fn config_schema(&self) -> Box<dyn ConfigSchema> {
			unimplemented!()
		}

		async fn charge(&self, _request: &ChargeRequest) -> Result<(), ChargeError> {
			tokio::time::sleep(Duration::from_secs(60)).await;
			Ok(())
		}
	}

	fn item(description: &str, price_cents: i64, quantity: i64) -> LineItem {
		LineItem {
			description: description.to_string(),
			price_cents,
			quantity,
		}
	}

	fn order(id: &str, status: OrderStatus, line_items: Vec<LineItem>) -> Order {
		Order {
			id: id.to_string(),
			customer_email: "test@test".to_string(),
			line_items,
			status,
		}
	}

	fn engine_with(
		storage: Box<dyn StorageInterface>,
		charge: Box<dyn ChargeInterface>,
		fulfillment: Box<dyn FulfillmentInterface>,
	) -> OrderEngine {
		OrderEngine::new(
			Arc::new(StorageService::new(storage)),
			Arc::new(ChargeService::new(charge, 1)),
			Arc::new(FulfillmentService::new(fulfillment)),
		)
	}

	/// Engine over a memory repository seeded with `orders`.
	async fn engine(
		orders: Vec<Order>,
		charge: MockCharge,
		fulfillment: MockFulfillment,
	) -> OrderEngine {
		let storage = MemoryStorage::new();
		for order in orders {
			storage.insert_order(order).await.unwrap();
		}
		engine_with(Box::new(storage), Box::new(charge), Box::new(fulfillment))
	}

	async fn status_of(engine: &OrderEngine, id: &str) -> OrderStatus {
		engine
			.get_order(&CallContext::background(), id)
			.await
			.unwrap()
			.status
	}

	fn charging(amount: i64) -> MockCharge {
		let mut charge = MockCharge::new();
		charge
			.expect_charge()
			.withf(move |request| request.amount_cents == amount && request.card_token == "tok")
			.times(1)
			.returning(|_| Ok(()));
		charge
	}

	fn never_charging() -> MockCharge {
		let mut charge = MockCharge::new();
		charge.expect_charge().never();
		charge
	}

	fn never_fulfilling() -> MockFulfillment {
		let mut fulfillment = MockFulfillment::new();
		fulfillment.expect_fulfill_line_item().never();
		fulfillment
	}

	fn rejected() -> ChargeError {
		ChargeError::Rejected {
			status: 402,
			body: "declined".to_string(),
		}
	}

	#[tokio::test]
	async fn test_create_then_get_is_pending_with_total() {
		let engine = engine(vec![], never_charging(), never_fulfilling()).await;
		let ctx = CallContext::background();

		let created = engine
			.create_order(
				&ctx,
				NewOrder {
					id: None,
					customer_email: "buyer@example.com".to_string(),
					line_items: vec![item("a", 1000, 1), item("b", 5000, 10)],
				},
			)
			.await
			.unwrap();
		assert!(!created.id.is_empty());

		let fetched = engine.get_order(&ctx, &created.id).await.unwrap();
		assert_eq!(fetched.status, OrderStatus::Pending);
		assert_eq!(fetched.total_cents(), Some(51_000));
		assert_eq!(fetched, created);
	}

	#[tokio::test]
	async fn test_create_validation_makes_no_repository_write() {
		let mut storage = MockStorage::new();
		storage.expect_insert_order().never();
		let engine = engine_with(
			Box::new(storage),
			Box::new(never_charging()),
			Box::new(never_fulfilling()),
		);
		let ctx = CallContext::background();

		let invalid = [
			("no-at-sign", vec![item("a", 100, 1)]),
			("buyer@example.com", vec![]),
			("buyer@example.com", vec![item("a", 100, 1), item("credit", -300, 1)]),
			("buyer@example.com", vec![item("huge", 1 << 62, 4)]),
			("buyer@example.com", vec![item("a", i64::MAX, 1), item("b", 1, 1)]),
		];
		for (email, line_items) in invalid {
			let result = engine
				.create_order(
					&ctx,
					NewOrder {
						id: None,
						customer_email: email.to_string(),
						line_items,
					},
				)
				.await;
			assert!(matches!(result, Err(EngineError::Validation(_))), "{}", email);
		}
	}

	#[tokio::test]
	async fn test_overflowing_stored_total_never_reaches_gateway() {
		let orders = vec![
			order("pending", OrderStatus::Pending, vec![item("huge", 1 << 62, 4)]),
			order("charged", OrderStatus::Charged, vec![item("huge", 1 << 62, 4)]),
		];
		let engine = engine(orders, never_charging(), never_fulfilling()).await;
		let ctx = CallContext::background();

		let charged = engine.charge_order(&ctx, "pending", "tok").await;
		assert!(matches!(charged, Err(EngineError::Validation(_))));
		assert_eq!(status_of(&engine, "pending").await, OrderStatus::Pending);

		let cancelled = engine.cancel_order(&ctx, "charged", "tok").await;
		assert!(matches!(cancelled, Err(EngineError::Validation(_))));
		assert_eq!(status_of(&engine, "charged").await, OrderStatus::Charged);
	}

	#[tokio::test]
	async fn test_cancel_charged_order_at_minimum_total_cannot_refund() {
		let charged = order("o1", OrderStatus::Charged, vec![item("a", i64::MIN, 1)]);
		let engine = engine(vec![charged], never_charging(), never_fulfilling()).await;

		let result = engine
			.cancel_order(&CallContext::background(), "o1", "tok")
			.await;
		assert!(matches!(result, Err(EngineError::Validation(_))));
	}

	#[tokio::test]
	async fn test_create_with_taken_id_is_conflict() {
		let existing = order("o1", OrderStatus::Pending, vec![item("a", 100, 1)]);
		let engine = engine(vec![existing], never_charging(), never_fulfilling()).await;

		let result = engine
			.create_order(
				&CallContext::background(),
				NewOrder {
					id: Some("o1".to_string()),
					customer_email: "buyer@example.com".to_string(),
					line_items: vec![item("a", 100, 1)],
				},
			)
			.await;
		assert!(matches!(result, Err(EngineError::Conflict(_))));
	}

	#[tokio::test]
	async fn test_charge_pending_order() {
		let pending = order(
			"o1",
			OrderStatus::Pending,
			vec![item("a", 1500, 3), item("b", 800, 1)],
		);
		let engine = engine(vec![pending], charging(5300), never_fulfilling()).await;

		let charged = engine
			.charge_order(&CallContext::background(), "o1", "tok")
			.await
			.unwrap();
		assert_eq!(charged, 5300);
		assert_eq!(status_of(&engine, "o1").await, OrderStatus::Charged);
	}

	#[tokio::test]
	async fn test_charge_ineligible_order_is_conflict_without_gateway_call() {
		let orders = vec![
			order("charged", OrderStatus::Charged, vec![item("a", 100, 1)]),
			order("fulfilled", OrderStatus::Fulfilled, vec![item("a", 100, 1)]),
			order("cancelled", OrderStatus::Cancelled, vec![item("a", 100, 1)]),
		];
		let engine = engine(orders, never_charging(), never_fulfilling()).await;

		for id in ["charged", "fulfilled", "cancelled"] {
			let result = engine
				.charge_order(&CallContext::background(), id, "tok")
				.await;
			assert!(matches!(result, Err(EngineError::Conflict(_))), "{}", id);
		}
	}

	#[tokio::test]
	async fn test_charge_missing_order() {
		let engine = engine(vec![], never_charging(), never_fulfilling()).await;
		let result = engine
			.charge_order(&CallContext::background(), "nope", "tok")
			.await;
		assert!(matches!(result, Err(EngineError::NotFound(id)) if id == "nope"));
	}

	#[tokio::test]
	async fn test_charge_zero_total_skips_gateway() {
		let free = order("o1", OrderStatus::Pending, vec![item("sample", 0, 5)]);
		let engine = engine(vec![free], never_charging(), never_fulfilling()).await;

		let charged = engine
			.charge_order(&CallContext::background(), "o1", "tok")
			.await
			.unwrap();
		assert_eq!(charged, 0);
		assert_eq!(status_of(&engine, "o1").await, OrderStatus::Charged);
	}

	#[tokio::test]
	async fn test_charge_negative_total_calls_gateway() {
		let credit = order("o1", OrderStatus::Pending, vec![item("credit", -250, 2)]);
		let engine = engine(vec![credit], charging(-500), never_fulfilling()).await;

		let charged = engine
			.charge_order(&CallContext::background(), "o1", "tok")
			.await
			.unwrap();
		assert_eq!(charged, -500);
		assert_eq!(status_of(&engine, "o1").await, OrderStatus::Charged);
	}

	#[tokio::test]
	async fn test_charge_gateway_failure_leaves_order_pending() {
		let pending = order("o1", OrderStatus::Pending, vec![item("a", 100, 1)]);
		let mut charge = MockCharge::new();
		charge.expect_charge().times(1).returning(|_| Err(rejected()));
		let engine = engine(vec![pending], charge, never_fulfilling()).await;

		let result = engine
			.charge_order(&CallContext::background(), "o1", "tok")
			.await;
		let error = result.unwrap_err();
		assert!(matches!(error, EngineError::Gateway(_)));
		assert!(error.is_retryable());
		assert_eq!(status_of(&engine, "o1").await, OrderStatus::Pending);
	}

	#[tokio::test]
	async fn test_concurrent_charges_bill_once() {
		let pending = order("o1", OrderStatus::Pending, vec![item("a", 100, 1)]);
		let engine = Arc::new(engine(vec![pending], charging(100), never_fulfilling()).await);

		let attempts: Vec<_> = (0..2)
			.map(|_| {
				let engine = engine.clone();
				tokio::spawn(async move {
					engine
						.charge_order(&CallContext::background(), "o1", "tok")
						.await
				})
			})
			.collect();

		let mut succeeded = 0;
		let mut conflicted = 0;
		for attempt in attempts {
			match attempt.await.unwrap() {
				Ok(100) => succeeded += 1,
				Err(EngineError::Conflict(_)) => conflicted += 1,
				other => panic!("unexpected result: {:?}", other),
			}
		}
		assert_eq!((succeeded, conflicted), (1, 1));
	}

	#[tokio::test]
	async fn test_cancel_charged_order_refunds_total() {
		let charged = order(
			"o1",
			OrderStatus::Charged,
			vec![item("a", 1500, 2), item("b", 1500, 1)],
		);
		let engine = engine(vec![charged], charging(-4500), never_fulfilling()).await;

		let (status, refunded) = engine
			.cancel_order(&CallContext::background(), "o1", "tok")
			.await
			.unwrap();
		assert_eq!(status, OrderStatus::Cancelled);
		assert_eq!(refunded, -4500);
		assert_eq!(status_of(&engine, "o1").await, OrderStatus::Cancelled);
	}

	#[tokio::test]
	async fn test_cancel_pending_order_skips_refund() {
		let pending = order("o1", OrderStatus::Pending, vec![item("a", 1500, 2)]);
		let engine = engine(vec![pending], never_charging(), never_fulfilling()).await;

		let result = engine
			.cancel_order(&CallContext::background(), "o1", "tok")
			.await
			.unwrap();
		assert_eq!(result, (OrderStatus::Cancelled, 0));
		assert_eq!(status_of(&engine, "o1").await, OrderStatus::Cancelled);
	}

	#[tokio::test]
	async fn test_cancel_fulfilled_order_is_conflict() {
		let fulfilled = order("o1", OrderStatus::Fulfilled, vec![item("a", 1500, 2)]);
		let engine = engine(vec![fulfilled], never_charging(), never_fulfilling()).await;

		let result = engine
			.cancel_order(&CallContext::background(), "o1", "tok")
			.await;
		assert!(matches!(result, Err(EngineError::Conflict(_))));
		assert_eq!(status_of(&engine, "o1").await, OrderStatus::Fulfilled);
	}

	#[tokio::test]
	async fn test_cancel_is_idempotent() {
		let mut storage = MockStorage::new();
		storage
			.expect_get_order()
			.withf(|id| id == "o1")
			.returning(|_| Ok(order("o1", OrderStatus::Cancelled, vec![item("a", 100, 1)])));
		storage.expect_set_order_status().never();
		let engine = engine_with(
			Box::new(storage),
			Box::new(never_charging()),
			Box::new(never_fulfilling()),
		);

		for _ in 0..2 {
			let result = engine
				.cancel_order(&CallContext::background(), "o1", "tok")
				.await
				.unwrap();
			assert_eq!(result, (OrderStatus::Cancelled, 0));
		}
	}

	#[tokio::test]
	async fn test_cancel_refund_failure_leaves_order_charged() {
		let charged = order("o1", OrderStatus::Charged, vec![item("a", 100, 1)]);
		let mut charge = MockCharge::new();
		charge
			.expect_charge()
			.times(1)
			.returning(|_| Err(ChargeError::Network("connection reset".into())));
		let engine = engine(vec![charged], charge, never_fulfilling()).await;

		let result = engine
			.cancel_order(&CallContext::background(), "o1", "tok")
			.await;
		assert!(matches!(result, Err(EngineError::Gateway(_))));
		assert_eq!(status_of(&engine, "o1").await, OrderStatus::Charged);
	}

	#[tokio::test]
	async fn test_fulfill_requires_charged_order() {
		let orders = vec![
			order("pending", OrderStatus::Pending, vec![item("a", 100, 1)]),
			order("cancelled", OrderStatus::Cancelled, vec![item("a", 100, 1)]),
			order("fulfilled", OrderStatus::Fulfilled, vec![item("a", 100, 1)]),
		];
		let engine = engine(orders, never_charging(), never_fulfilling()).await;

		for id in ["pending", "cancelled", "fulfilled"] {
			let result = engine.fulfill_order(&CallContext::background(), id).await;
			assert!(matches!(result, Err(EngineError::Validation(_))), "{}", id);
		}
	}

	#[tokio::test]
	async fn test_fulfill_calls_each_line_item_in_order() {
		let charged = order(
			"o1",
			OrderStatus::Charged,
			vec![item("first", 100, 1), item("second", 200, 4)],
		);
		let seen = Arc::new(Mutex::new(Vec::new()));
		let mut fulfillment = MockFulfillment::new();
		{
			let seen = seen.clone();
			fulfillment
				.expect_fulfill_line_item()
				.times(2)
				.returning(move |request| {
					seen.lock().unwrap().push(request.clone());
					Ok(())
				});
		}
		let engine = engine(vec![charged], never_charging(), fulfillment).await;

		let fulfilled = engine
			.fulfill_order(&CallContext::background(), "o1")
			.await
			.unwrap();
		assert!(fulfilled);
		assert_eq!(status_of(&engine, "o1").await, OrderStatus::Fulfilled);

		let seen = seen.lock().unwrap();
		let calls: Vec<_> = seen
			.iter()
			.map(|r| (r.order_id.as_str(), r.description.as_str(), r.quantity))
			.collect();
		assert_eq!(calls, vec![("o1", "first", 1), ("o1", "second", 4)]);
	}

	#[tokio::test]
	async fn test_fulfill_failure_is_retryable() {
		let charged = order(
			"o1",
			OrderStatus::Charged,
			vec![item("first", 100, 1), item("second", 200, 4)],
		);
		let calls = Arc::new(AtomicUsize::new(0));
		let mut fulfillment = MockFulfillment::new();
		{
			let calls = calls.clone();
			fulfillment
				.expect_fulfill_line_item()
				.returning(move |_| match calls.fetch_add(1, Ordering::SeqCst) {
					// Second line item of the first attempt
					1 => Err(FulfillmentError::Rejected {
						status: 503,
						body: "busy".to_string(),
					}),
					_ => Ok(()),
				});
		}
		let engine = engine(vec![charged], never_charging(), fulfillment).await;
		let ctx = CallContext::background();

		let result = engine.fulfill_order(&ctx, "o1").await;
		assert!(matches!(result, Err(EngineError::Gateway(_))));
		assert_eq!(calls.load(Ordering::SeqCst), 2);
		assert_eq!(status_of(&engine, "o1").await, OrderStatus::Charged);

		assert!(engine.fulfill_order(&ctx, "o1").await.unwrap());
		assert_eq!(calls.load(Ordering::SeqCst), 4);
		assert_eq!(status_of(&engine, "o1").await, OrderStatus::Fulfilled);
	}

	#[tokio::test]
	async fn test_list_by_filter() {
		let orders = vec![
			order("a", OrderStatus::Pending, vec![item("a", 100, 1)]),
			order("b", OrderStatus::Charged, vec![item("a", 100, 1)]),
			order("c", OrderStatus::Pending, vec![item("a", 100, 1)]),
		];
		let engine = engine(orders, never_charging(), never_fulfilling()).await;
		let ctx = CallContext::background();

		let all = engine.list_orders(&ctx, StatusFilter::All).await.unwrap();
		assert_eq!(all.len(), 3);

		let pending = engine
			.list_orders(&ctx, StatusFilter::Only(OrderStatus::Pending))
			.await
			.unwrap();
		assert!(pending.iter().all(|o| o.status == OrderStatus::Pending));
		assert_eq!(pending.len(), 2);

		let fulfilled = engine
			.list_orders(&ctx, StatusFilter::Only(OrderStatus::Fulfilled))
			.await
			.unwrap();
		assert!(fulfilled.is_empty());
	}

	#[tokio::test]
	async fn test_write_failure_after_charge_is_recorded() {
		let mut storage = MockStorage::new();
		storage
			.expect_get_order()
			.returning(|_| Ok(order("o1", OrderStatus::Pending, vec![item("a", 5300, 1)])));
		storage
			.expect_set_order_status()
			.withf(|id, expected, status| {
				id == "o1" && *expected == OrderStatus::Pending && *status == OrderStatus::Charged
			})
			.times(1)
			.returning(|_, _, _| Err(StorageError::Backend("disk full".into())));
		let engine = engine_with(
			Box::new(storage),
			Box::new(charging(5300)),
			Box::new(never_fulfilling()),
		);

		let result = engine
			.charge_order(&CallContext::background(), "o1", "tok")
			.await;
		let error = result.unwrap_err();
		assert!(matches!(&error, EngineError::Inconsistent { order_id, .. } if order_id == "o1"));
		assert!(!error.is_retryable());

		let records = engine.pending_reconciliation().await;
		assert_eq!(records.len(), 1);
		assert_eq!(records[0].gateway_call, GatewayCall::Charge { amount_cents: 5300 });
		assert_eq!(records[0].intended_status, OrderStatus::Charged);
		assert_eq!(records[0].persisted_status, None);
	}

	#[tokio::test]
	async fn test_lost_race_after_refund_is_recorded() {
		let mut storage = MockStorage::new();
		storage
			.expect_get_order()
			.returning(|_| Ok(order("o1", OrderStatus::Charged, vec![item("a", 4500, 1)])));
		storage.expect_set_order_status().returning(|_, expected, _| {
			Err(StorageError::Conflict {
				expected,
				actual: OrderStatus::Fulfilled,
			})
		});
		let engine = engine_with(
			Box::new(storage),
			Box::new(charging(-4500)),
			Box::new(never_fulfilling()),
		);

		let result = engine
			.cancel_order(&CallContext::background(), "o1", "tok")
			.await;
		assert!(matches!(result, Err(EngineError::Inconsistent { .. })));

		let records = engine.pending_reconciliation().await;
		assert_eq!(records[0].persisted_status, Some(OrderStatus::Fulfilled));
	}

	#[tokio::test]
	async fn test_write_conflict_without_gateway_call_is_plain_conflict() {
		let mut storage = MockStorage::new();
		storage
			.expect_get_order()
			.returning(|_| Ok(order("o1", OrderStatus::Pending, vec![item("a", 100, 1)])));
		storage.expect_set_order_status().returning(|_, expected, _| {
			Err(StorageError::Conflict {
				expected,
				actual: OrderStatus::Charged,
			})
		});
		let engine = engine_with(
			Box::new(storage),
			Box::new(never_charging()),
			Box::new(never_fulfilling()),
		);

		let result = engine
			.cancel_order(&CallContext::background(), "o1", "tok")
			.await;
		assert!(matches!(result, Err(EngineError::Conflict(_))));
		assert!(engine.pending_reconciliation().await.is_empty());
	}

	#[tokio::test(start_paused = true)]
	async fn test_deadline_abandons_slow_charge() {
		let storage = MemoryStorage::new();
		storage
			.insert_order(order("o1", OrderStatus::Pending, vec![item("a", 100, 1)]))
			.await
			.unwrap();
		let engine = engine_with(
			Box::new(storage),
			Box::new(SlowCharge),
			Box::new(never_fulfilling()),
		);

		let ctx = CallContext::with_timeout(Duration::from_secs(5));
		let result = engine.charge_order(&ctx, "o1", "tok").await;
		assert!(matches!(result, Err(EngineError::DeadlineExceeded)));
		assert_eq!(status_of(&engine, "o1").await, OrderStatus::Pending);
	}

	#[tokio::test]
	async fn test_cancelled_context_makes_no_calls() {
		let mut storage = MockStorage::new();
		storage.expect_get_order().never();
		storage.expect_insert_order().never();
		let engine = engine_with(
			Box::new(storage),
			Box::new(never_charging()),
			Box::new(never_fulfilling()),
		);

		let (ctx, handle) = CallContext::background().cancellable();
		handle.cancel();

		let result = engine.charge_order(&ctx, "o1", "tok").await;
		assert!(matches!(result, Err(EngineError::Cancelled)));

		let result = engine
			.create_order(
				&ctx,
				NewOrder {
					id: None,
					customer_email: "buyer@example.com".to_string(),
					line_items: vec![item("a", 100, 1)],
				},
			)
			.await;
		assert!(matches!(result, Err(EngineError::Cancelled)));
	}
}

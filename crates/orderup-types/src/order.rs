//! Order model for the lifecycle engine.
//!
//! Orders carry only their identity, the customer email, the line items and a
//! status. The total is always derived from the line items and never stored.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// One priced, quantified entry within an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
	pub description: String,
	/// Unit price in cents. Caller supplied, may be negative.
	pub price_cents: i64,
	pub quantity: i64,
}

impl LineItem {
	/// Price of this line item times its quantity, `None` on overflow.
	pub fn subtotal_cents(&self) -> Option<i64> {
		self.price_cents.checked_mul(self.quantity)
	}
}

/// A customer purchase record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
	/// Opaque identifier. Empty until the repository assigns one.
	#[serde(default)]
	pub id: String,
	pub customer_email: String,
	pub line_items: Vec<LineItem>,
	pub status: OrderStatus,
}

impl Order {
	/// Sum of all line item subtotals, `None` when it does not fit in `i64`.
	pub fn total_cents(&self) -> Option<i64> {
		self.line_items
			.iter()
			.try_fold(0i64, |total, item| total.checked_add(item.subtotal_cents()?))
	}
}

/// Error returned when a status code or label is not recognised.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StatusParseError {
	#[error("unknown status code: {0}")]
	UnknownCode(u8),
	#[error("unknown value for status: {0}")]
	UnknownLabel(String),
}

/// Lifecycle status of an order.
///
/// Serialized as a small integer code, both on the wire and at rest:
/// `pending = 0`, `charged = 1`, `fulfilled = 2`, `cancelled = 3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum OrderStatus {
	Pending,
	Charged,
	Fulfilled,
	Cancelled,
}

impl OrderStatus {
	pub const ALL: [OrderStatus; 4] = [
		OrderStatus::Pending,
		OrderStatus::Charged,
		OrderStatus::Fulfilled,
		OrderStatus::Cancelled,
	];

	pub fn code(self) -> u8 {
		match self {
			OrderStatus::Pending => 0,
			OrderStatus::Charged => 1,
			OrderStatus::Fulfilled => 2,
			OrderStatus::Cancelled => 3,
		}
	}

	/// Lowercase label used in query strings and responses.
	pub fn label(self) -> &'static str {
		match self {
			OrderStatus::Pending => "pending",
			OrderStatus::Charged => "charged",
			OrderStatus::Fulfilled => "fulfilled",
			OrderStatus::Cancelled => "cancelled",
		}
	}
}

impl From<OrderStatus> for u8 {
	fn from(status: OrderStatus) -> Self {
		status.code()
	}
}

impl TryFrom<u8> for OrderStatus {
	type Error = StatusParseError;

	fn try_from(code: u8) -> Result<Self, Self::Error> {
		OrderStatus::ALL
			.into_iter()
			.find(|status| status.code() == code)
			.ok_or(StatusParseError::UnknownCode(code))
	}
}

impl FromStr for OrderStatus {
	type Err = StatusParseError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		OrderStatus::ALL
			.into_iter()
			.find(|status| status.label() == s)
			.ok_or_else(|| StatusParseError::UnknownLabel(s.to_string()))
	}
}

impl fmt::Display for OrderStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.label())
	}
}

/// Query filter for listing orders.
///
/// `All` is a sentinel distinct from every real status and is never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusFilter {
	#[default]
	All,
	Only(OrderStatus),
}

impl StatusFilter {
	/// Parses the optional `status` query parameter. Absent or empty means all.
	pub fn from_query(value: Option<&str>) -> Result<Self, StatusParseError> {
		match value {
			None | Some("") => Ok(StatusFilter::All),
			Some(label) => label.parse().map(StatusFilter::Only),
		}
	}

	pub fn matches(&self, status: OrderStatus) -> bool {
		match self {
			StatusFilter::All => true,
			StatusFilter::Only(wanted) => *wanted == status,
		}
	}
}

impl fmt::Display for StatusFilter {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			StatusFilter::All => f.write_str("all"),
			StatusFilter::Only(status) => status.fmt(f),
		}
	}
}

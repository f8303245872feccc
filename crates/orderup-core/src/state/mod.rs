//! Order status management: legal transitions and per-order locking.

pub mod locks;
pub mod order;

pub use locks::{OrderGuard, OrderLocks};
pub use order::{OrderStateError, OrderStateMachine};

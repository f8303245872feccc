//! Core order lifecycle engine.
//!
//! Coordinates the order repository with the charge and fulfillment
//! gateways to create, charge, cancel and fulfill orders. Includes the
//! transition table, per-order locking, call cancellation and the builder
//! that wires configured backends into an [`OrderEngine`].

pub mod builder;
pub mod engine;
pub mod reconciliation;
pub mod state;

pub use builder::{BuilderError, EngineBuilder, EngineFactories};
pub use engine::{CallContext, CancelHandle, EngineError, Interrupted, NewOrder, OrderEngine};
pub use reconciliation::{GatewayCall, InconsistencyRecord};

//! Common types for the order lifecycle service.
//!
//! Shared data types used by every crate in the workspace: the order model,
//! the REST request/response shapes and the configuration schema primitives
//! that backends use to validate their TOML tables.

/// API types for HTTP endpoints and request/response structures.
pub mod api;
/// Order, line item and status types.
pub mod order;
/// Registry trait for self-registering backend implementations.
pub mod registry;
/// Small helpers shared across crates.
pub mod utils;
/// Configuration validation types for backend TOML tables.
pub mod validation;

pub use api::*;
pub use order::*;
pub use registry::ImplementationRegistry;
pub use utils::{current_timestamp, truncate_id};
pub use validation::*;

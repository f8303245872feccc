//! Registry trait for self-registering implementations.
//!
//! Every backend module (storage, charge, fulfillment) exposes a `Registry`
//! struct implementing this trait so the binary can wire configuration names
//! to factory functions without hard-coding each backend.

/// Base trait for implementation registries.
pub trait ImplementationRegistry {
	/// The name used in configuration files to reference this implementation.
	///
	/// This must match the key under `<section>.implementations`, for example
	/// "memory" for `storage.implementations.memory`.
	const NAME: &'static str;

	/// The factory function type this implementation provides.
	type Factory;

	/// Get the factory function for this implementation.
	fn factory() -> Self::Factory;
}

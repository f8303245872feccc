//! Per-call cancellation and deadline.
//!
//! A [`CallContext`] travels with every engine operation. Repository and
//! gateway calls made before an operation's commit point run through
//! [`CallContext::run`], which abandons them as soon as the caller cancels or
//! the deadline passes.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;

/// Why a call was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Interrupted {
	#[error("request cancelled")]
	Cancelled,
	#[error("deadline exceeded")]
	DeadlineExceeded,
}

/// Cancellation signal and optional deadline for one engine operation.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
	deadline: Option<Instant>,
	cancelled: Option<watch::Receiver<bool>>,
}

/// Cancels every context cloned from the one it was created with.
#[derive(Debug)]
pub struct CancelHandle {
	sender: watch::Sender<bool>,
}

impl CancelHandle {
	pub fn cancel(&self) {
		self.sender.send_replace(true);
	}
}

impl CallContext {
	/// A context that never expires and cannot be cancelled.
	pub fn background() -> Self {
		Self::default()
	}

	pub fn with_timeout(timeout: Duration) -> Self {
		Self::background().with_deadline(Instant::now() + timeout)
	}

	pub fn with_deadline(mut self, deadline: Instant) -> Self {
		self.deadline = Some(deadline);
		self
	}

	/// Attaches a cancellation signal, replacing any previous one.
	pub fn cancellable(mut self) -> (Self, CancelHandle) {
		let (sender, receiver) = watch::channel(false);
		self.cancelled = Some(receiver);
		(self, CancelHandle { sender })
	}

	/// Fails immediately if the context is already cancelled or expired.
	pub fn check(&self) -> Result<(), Interrupted> {
		if self.cancelled.as_ref().is_some_and(|rx| *rx.borrow()) {
			return Err(Interrupted::Cancelled);
		}
		if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
			return Err(Interrupted::DeadlineExceeded);
		}
		Ok(())
	}

	/// Drives `fut` to completion unless the context is interrupted first.
	///
	/// An interrupted future is dropped, which aborts any request it had in
	/// flight.
	pub async fn run<F>(&self, fut: F) -> Result<F::Output, Interrupted>
	where
		F: Future,
	{
		self.check()?;

		let deadline = self.deadline;
		let expired = async move {
			match deadline {
				Some(deadline) => tokio::time::sleep_until(deadline).await,
				None => std::future::pending().await,
			}
		};

		let mut cancelled = self.cancelled.clone();
		let cancel_requested = async move {
			match cancelled.as_mut() {
				Some(rx) => {
					// A dropped handle can no longer cancel
					if rx.wait_for(|cancelled| *cancelled).await.is_err() {
						std::future::pending::<()>().await;
					}
				},
				None => std::future::pending().await,
			}
		};

		tokio::select! {
			biased;
			_ = cancel_requested => Err(Interrupted::Cancelled),
			_ = expired => Err(Interrupted::DeadlineExceeded),
			output = fut => Ok(output),
		}
	}
}

//! Optimistic concurrency guard.
//!
//! The guard verifies that a mutating request observed the order version it
//! is about to mutate. It is a pure precondition check; the persist step
//! re-validates independently via compare-and-swap, so a writer that commits
//! between check and persist is still detected and rejected rather than
//! silently overwritten.

use orderflow_types::{ConcurrencyTag, Order};
use thiserror::Error;

/// Errors that can occur during the concurrency precondition check.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GuardError {
	/// The request carried no concurrency tag.
	#[error("Missing concurrency tag")]
	PreconditionRequired,
	/// The supplied tag does not match the order's current version.
	///
	/// Carries the current version so the caller can refetch and retry
	/// with a fresh tag.
	#[error("Stale concurrency tag; current version is {current_version}")]
	PreconditionFailed { current_version: u64 },
}

/// Checks that `supplied_tag` matches the tag of the order as read.
pub fn check(order: &Order, supplied_tag: Option<&str>) -> Result<(), GuardError> {
	let supplied = supplied_tag.ok_or(GuardError::PreconditionRequired)?;
	let expected = ConcurrencyTag::compute(&order.id, order.version);
	if !expected.matches(supplied) {
		return Err(GuardError::PreconditionFailed {
			current_version: order.version,
		});
	}
	Ok(())
}

//! Order state machine for the orderflow system.
//!
//! This module owns the transition table governing the order lifecycle. It is
//! a pure computation over `(current status, action)`: no I/O, no knowledge
//! of concurrency tags or persistence. Every status an order can ever hold
//! originates from this table.

use orderflow_types::{OrderAction, OrderStatus};
use thiserror::Error;

/// Errors that can occur when applying an action to an order status.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransitionError {
	/// The action is not defined for the order's current status.
	///
	/// Carries the current status so the caller can reconcile its view of
	/// the order before retrying with a different action.
	#[error("Action '{action}' is not valid from status '{current}'")]
	InvalidTransition {
		action: OrderAction,
		current: OrderStatus,
	},
}

/// Returns the target status for `action` from `current`, if the pair is in
/// the transition table.
///
/// The table, one row per action:
///
/// | action               | valid source(s)                       | target             |
/// |----------------------|---------------------------------------|--------------------|
/// | pay                  | pending_payment                       | pending_acceptance |
/// | cancel               | pending_payment, pending_acceptance   | cancelled          |
/// | accept               | pending_acceptance                    | preparing          |
/// | reject               | pending_acceptance                    | rejected           |
/// | complete_preparation | preparing                             | ready_for_pickup   |
/// | pickup               | ready_for_pickup                      | in_transit         |
/// | deliver              | in_transit                            | delivered          |
fn transition(current: OrderStatus, action: OrderAction) -> Option<OrderStatus> {
	use orderflow_types::OrderAction::*;
	use orderflow_types::OrderStatus::*;

	match (current, action) {
		(PendingPayment, Pay) => Some(PendingAcceptance),
		(PendingPayment, Cancel) | (PendingAcceptance, Cancel) => Some(Cancelled),
		(PendingAcceptance, Accept) => Some(Preparing),
		(PendingAcceptance, Reject) => Some(Rejected),
		(Preparing, CompletePreparation) => Some(ReadyForPickup),
		(ReadyForPickup, Pickup) => Some(InTransit),
		(InTransit, Deliver) => Some(Delivered),
		_ => None,
	}
}

/// Computes the next status for `action` applied at `current`.
///
/// Any `(status, action)` pair absent from the transition table fails with
/// [`TransitionError::InvalidTransition`]; terminal statuses therefore
/// reject every action.
pub fn apply(current: OrderStatus, action: OrderAction) -> Result<OrderStatus, TransitionError> {
	transition(current, action).ok_or(TransitionError::InvalidTransition { action, current })
}

/// Returns true if `action` is valid from `current`.
pub fn is_valid(current: OrderStatus, action: OrderAction) -> bool {
	transition(current, action).is_some()
}

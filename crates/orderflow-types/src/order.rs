//! Order record types for the orderflow system.
//!
//! This module defines the versioned order entity and the fixed enumerations
//! for order status and mutating actions used throughout the order lifecycle.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A versioned food-order record.
///
/// An order is created once and afterwards mutated only through the action
/// dispatcher. `version` increments by exactly one on every successful
/// mutating transition and never decreases or skips; together with `id` it
/// determines the externally visible concurrency tag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
	/// Unique identifier for this order. Immutable.
	pub id: String,
	/// Display name of the restaurant the order was placed with.
	pub restaurant_name: String,
	/// Current status of the order.
	pub status: OrderStatus,
	/// Optimistic-locking version, starting at 0.
	pub version: u64,
	/// Timestamp when this order was created (Unix seconds).
	pub created_at: u64,
	/// Timestamp when this order was last updated (Unix seconds).
	pub updated_at: u64,
}

/// Status of an order in the lifecycle.
///
/// The variants and the transition table in `orderflow-state` are the single
/// source of truth for order status; no status value originates elsewhere.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
	/// Order placed, awaiting customer payment.
	PendingPayment,
	/// Payment received, awaiting merchant acceptance.
	PendingAcceptance,
	/// Merchant accepted the order and is preparing it.
	Preparing,
	/// Preparation finished, awaiting rider pickup.
	ReadyForPickup,
	/// Rider picked the order up and is delivering it.
	InTransit,
	/// Order delivered to the customer. Terminal.
	Delivered,
	/// Order cancelled by the customer. Terminal.
	Cancelled,
	/// Order rejected by the merchant. Terminal.
	Rejected,
}

impl OrderStatus {
	/// Returns the wire representation of the status.
	pub fn as_str(&self) -> &'static str {
		match self {
			OrderStatus::PendingPayment => "pending_payment",
			OrderStatus::PendingAcceptance => "pending_acceptance",
			OrderStatus::Preparing => "preparing",
			OrderStatus::ReadyForPickup => "ready_for_pickup",
			OrderStatus::InTransit => "in_transit",
			OrderStatus::Delivered => "delivered",
			OrderStatus::Cancelled => "cancelled",
			OrderStatus::Rejected => "rejected",
		}
	}

	/// Returns true if no further transition is defined from this status.
	pub fn is_terminal(&self) -> bool {
		matches!(
			self,
			OrderStatus::Delivered | OrderStatus::Cancelled | OrderStatus::Rejected
		)
	}
}

impl fmt::Display for OrderStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A mutating action an actor may invoke against an order.
///
/// Each action corresponds to one edge set in the transition table; which
/// source statuses permit it is decided by `orderflow-state`, never here.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OrderAction {
	/// Customer pays for the order.
	Pay,
	/// Customer cancels the order.
	Cancel,
	/// Merchant accepts the order.
	Accept,
	/// Merchant rejects the order.
	Reject,
	/// Merchant finishes preparing the order.
	CompletePreparation,
	/// Rider picks the order up.
	Pickup,
	/// Rider hands the order to the customer.
	Deliver,
}

impl OrderAction {
	/// Returns the canonical name of the action.
	pub fn as_str(&self) -> &'static str {
		match self {
			OrderAction::Pay => "pay",
			OrderAction::Cancel => "cancel",
			OrderAction::Accept => "accept",
			OrderAction::Reject => "reject",
			OrderAction::CompletePreparation => "complete_preparation",
			OrderAction::Pickup => "pickup",
			OrderAction::Deliver => "deliver",
		}
	}

	/// Returns an iterator over all action variants.
	pub fn all() -> impl Iterator<Item = Self> {
		[
			Self::Pay,
			Self::Cancel,
			Self::Accept,
			Self::Reject,
			Self::CompletePreparation,
			Self::Pickup,
			Self::Deliver,
		]
		.into_iter()
	}
}

impl fmt::Display for OrderAction {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

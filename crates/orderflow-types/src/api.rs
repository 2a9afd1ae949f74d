//! API types for the orderflow HTTP API.
//!
//! This module defines the request and response types for the order action
//! endpoints, together with the structured error body every failure path
//! serializes to.

use crate::OrderStatus;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum accepted length for free-text reason fields.
const MAX_REASON_LEN: usize = 200;

/// Error returned when an action payload is structurally valid JSON but
/// fails field-level validation.
#[derive(Debug, Error)]
pub enum PayloadError {
	/// A required field is missing or empty.
	#[error("Missing required field: {0}")]
	MissingField(&'static str),
	/// A field value is out of the accepted range.
	#[error("Invalid value for field '{field}': {message}")]
	InvalidValue {
		field: &'static str,
		message: String,
	},
}

/// Request body for creating a new order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateOrderRequest {
	/// Restaurant the order is placed with. Defaults when omitted.
	pub restaurant_name: Option<String>,
}

/// Request body for the payment action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRequest {
	/// Payment method identifier (e.g. "card").
	pub payment_method: String,
	/// Amount charged, in minor currency units.
	pub amount: i64,
}

impl PaymentRequest {
	/// Validates field-level constraints on the payload.
	pub fn validate(&self) -> Result<(), PayloadError> {
		if self.payment_method.is_empty() {
			return Err(PayloadError::MissingField("payment_method"));
		}
		if self.amount <= 0 {
			return Err(PayloadError::InvalidValue {
				field: "amount",
				message: format!("must be positive, got {}", self.amount),
			});
		}
		Ok(())
	}
}

/// Request body for the cancellation action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancellationRequest {
	/// Customer-supplied cancellation reason.
	pub reason: String,
}

impl CancellationRequest {
	/// Validates field-level constraints on the payload.
	pub fn validate(&self) -> Result<(), PayloadError> {
		validate_reason(&self.reason)
	}
}

/// Request body for the rejection action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectionRequest {
	/// Merchant-supplied rejection reason.
	pub reason: String,
}

impl RejectionRequest {
	/// Validates field-level constraints on the payload.
	pub fn validate(&self) -> Result<(), PayloadError> {
		validate_reason(&self.reason)
	}
}

fn validate_reason(reason: &str) -> Result<(), PayloadError> {
	if reason.is_empty() {
		return Err(PayloadError::MissingField("reason"));
	}
	if reason.chars().count() > MAX_REASON_LEN {
		return Err(PayloadError::InvalidValue {
			field: "reason",
			message: format!("must be at most {} characters", MAX_REASON_LEN),
		});
	}
	Ok(())
}

/// Structured JSON error body.
///
/// All error responses use this shape; fields that do not apply to a given
/// error are omitted from the serialized body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
	/// Short error description.
	pub error: String,
	/// Additional human-readable context.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub message: Option<String>,
	/// The order's current status, for transition conflicts.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub current_status: Option<OrderStatus>,
	/// The order's current version, for stale-tag rejections.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub current_version: Option<u64>,
}

impl ErrorBody {
	/// Creates an error body carrying only the error description.
	pub fn new(error: impl Into<String>) -> Self {
		Self {
			error: error.into(),
			message: None,
			current_status: None,
			current_version: None,
		}
	}

	/// Attaches a human-readable message.
	pub fn with_message(mut self, message: impl Into<String>) -> Self {
		self.message = Some(message.into());
		self
	}

	/// Attaches the order's current status.
	pub fn with_current_status(mut self, status: OrderStatus) -> Self {
		self.current_status = Some(status);
		self
	}

	/// Attaches the order's current version.
	pub fn with_current_version(mut self, version: u64) -> Self {
		self.current_version = Some(version);
		self
	}
}

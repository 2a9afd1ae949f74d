//! Concurrency tag derivation for optimistic locking.
//!
//! A concurrency tag is a deterministic, collision-resistant digest of an
//! order's `(id, version)` pair. Two requests presenting the same tag are
//! guaranteed to have observed the same version of the order; a request
//! presenting a stale tag must be rejected by the concurrency guard.

use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use std::fmt;

/// Number of digest bytes kept in a tag (128 bits as lowercase hex).
const TAG_BYTES: usize = 16;

/// An opaque concurrency tag derived from an order's id and version.
///
/// The tag doubles as the order's HTTP `ETag` value; it is derived on demand
/// and never stored alongside the order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConcurrencyTag(String);

impl ConcurrencyTag {
	/// Computes the tag for the given order id and version.
	pub fn compute(id: &str, version: u64) -> Self {
		let mut hasher = Sha3_256::new();
		hasher.update(id.as_bytes());
		hasher.update(b":");
		hasher.update(version.to_string().as_bytes());
		let digest = hasher.finalize();
		Self(hex::encode(&digest[..TAG_BYTES]))
	}

	/// Returns the tag as a bare hex string.
	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// Returns the tag quoted for use in `ETag`/`If-Match` headers.
	pub fn quoted(&self) -> String {
		format!("\"{}\"", self.0)
	}

	/// Returns true if the supplied (unquoted) value matches this tag.
	pub fn matches(&self, supplied: &str) -> bool {
		self.0 == supplied
	}
}

impl fmt::Display for ConcurrencyTag {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

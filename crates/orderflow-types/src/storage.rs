//! Storage-related types for the orderflow system.

use std::str::FromStr;

/// Storage namespaces for the different data collections.
///
/// This enum provides type safety for storage operations by replacing
/// string literals with strongly typed variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageNamespace {
	/// Namespace for versioned order rows.
	Orders,
	/// Namespace for idempotency records.
	Idempotency,
}

impl StorageNamespace {
	/// Returns the string representation of the namespace.
	pub fn as_str(&self) -> &'static str {
		match self {
			StorageNamespace::Orders => "orders",
			StorageNamespace::Idempotency => "idempotency",
		}
	}

	/// Returns an iterator over all namespace variants.
	pub fn all() -> impl Iterator<Item = Self> {
		[Self::Orders, Self::Idempotency].into_iter()
	}
}

impl FromStr for StorageNamespace {
	type Err = ();

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"orders" => Ok(Self::Orders),
			"idempotency" => Ok(Self::Idempotency),
			_ => Err(()),
		}
	}
}

impl From<StorageNamespace> for &'static str {
	fn from(ns: StorageNamespace) -> Self {
		ns.as_str()
	}
}

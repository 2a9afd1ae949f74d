//! Storage module for the orderflow service.
//!
//! This module provides abstractions for persisting order rows and
//! idempotency records, supporting different backend implementations such as
//! in-memory or file-based storage. Beyond plain key-value access, backends
//! expose two conditional primitives the core correctness guarantees rest
//! on: create-if-absent (claiming an idempotency key) and compare-and-swap
//! (persisting an order only if the stored row is still the one that was
//! read).

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod file;
	pub mod memory;
}

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
	/// Error that occurs when a requested item is not found.
	#[error("Not found")]
	NotFound,
	/// Error that occurs when a conditional create finds the key taken.
	#[error("Already exists")]
	AlreadyExists,
	/// Error that occurs when a compare-and-swap finds the stored value
	/// no longer matches the value the caller read.
	#[error("Conflict: stored value changed since read")]
	Conflict,
	/// Error that occurs during serialization/deserialization.
	#[error("Serialization error: {0}")]
	Serialization(String),
	/// Error that occurs in the storage backend.
	#[error("Backend error: {0}")]
	Backend(String),
	/// Error that occurs during configuration validation.
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// Trait defining the low-level interface for storage backends.
///
/// This trait must be implemented by any storage backend that wants to
/// integrate with the order service. All operations are keyed by opaque
/// strings; values are raw bytes with optional time-to-live.
///
/// The conditional operations (`create_bytes`, `swap_bytes`) must be atomic
/// with respect to every other operation on the same key: two concurrent
/// creates see exactly one winner, and a swap never overwrites a value the
/// caller has not observed.
#[async_trait]
pub trait StorageBackend: Send + Sync {
	/// Retrieves raw bytes for the given key. Expired entries are absent.
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError>;

	/// Stores raw bytes with optional time-to-live, overwriting any
	/// existing value.
	async fn set_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<(), StorageError>;

	/// Stores raw bytes only if the key does not already hold a live value.
	///
	/// Returns [`StorageError::AlreadyExists`] if it does.
	async fn create_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<(), StorageError>;

	/// Replaces the value at `key` only if the stored bytes equal
	/// `expected`.
	///
	/// Returns [`StorageError::Conflict`] if the stored value differs and
	/// [`StorageError::NotFound`] if the key is absent. The comparison and
	/// the write happen atomically; this is the persist-time re-validation
	/// that makes lost updates impossible.
	async fn swap_bytes(
		&self,
		key: &str,
		expected: &[u8],
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<(), StorageError>;

	/// Deletes the value associated with the given key.
	async fn delete(&self, key: &str) -> Result<(), StorageError>;

	/// Checks if a live value exists for the key.
	async fn exists(&self, key: &str) -> Result<bool, StorageError>;

	/// Returns the live values whose keys start with `prefix`.
	async fn list_bytes(&self, prefix: &str) -> Result<Vec<Vec<u8>>, StorageError>;

	/// Removes expired entries from storage (optional operation).
	/// Returns the number of entries removed.
	/// Implementations that don't support expiration can return Ok(0).
	async fn cleanup_expired(&self) -> Result<usize, StorageError> {
		Ok(0)
	}
}

/// Type alias for storage factory functions.
///
/// This is the function signature that all storage implementations must
/// provide to create instances of their backend from TOML configuration.
pub type StorageFactory = fn(&toml::Value) -> Result<Box<dyn StorageBackend>, StorageError>;

/// Get all registered storage implementations.
///
/// Returns a vector of (name, factory) tuples for all available storage
/// backends, used by the service to wire the configured backend.
pub fn get_all_implementations() -> Vec<(&'static str, StorageFactory)> {
	use implementations::{file, memory};

	vec![
		("file", file::create_backend as StorageFactory),
		("memory", memory::create_backend as StorageFactory),
	]
}

/// High-level storage service that provides typed operations.
///
/// The StorageService wraps a low-level storage backend and provides
/// convenient methods for storing and retrieving typed data with automatic
/// JSON serialization/deserialization. Keys are formed from a namespace and
/// an id as `namespace:id`.
pub struct StorageService {
	/// The underlying storage backend implementation.
	backend: Box<dyn StorageBackend>,
}

impl StorageService {
	/// Creates a new StorageService with the specified backend.
	pub fn new(backend: Box<dyn StorageBackend>) -> Self {
		Self { backend }
	}

	fn key(namespace: &str, id: &str) -> String {
		format!("{}:{}", namespace, id)
	}

	fn encode<T: Serialize>(data: &T) -> Result<Vec<u8>, StorageError> {
		serde_json::to_vec(data).map_err(|e| StorageError::Serialization(e.to_string()))
	}

	fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
		serde_json::from_slice(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
	}

	/// Stores a serializable value with optional time-to-live, overwriting
	/// any existing value.
	pub async fn store<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
		ttl: Option<Duration>,
	) -> Result<(), StorageError> {
		self.backend
			.set_bytes(&Self::key(namespace, id), Self::encode(data)?, ttl)
			.await
	}

	/// Stores a serializable value only if no live value exists for the id.
	///
	/// Returns [`StorageError::AlreadyExists`] if one does. This is the
	/// claim operation for idempotency keys: exactly one of any number of
	/// concurrent callers succeeds.
	pub async fn create<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
		ttl: Option<Duration>,
	) -> Result<(), StorageError> {
		self.backend
			.create_bytes(&Self::key(namespace, id), Self::encode(data)?, ttl)
			.await
	}

	/// Replaces a stored value only if it still serializes to the same
	/// bytes as `expected`.
	///
	/// Returns [`StorageError::Conflict`] when the stored value moved since
	/// `expected` was read. The caller must treat a conflict as a failed
	/// operation, never as something to overwrite.
	pub async fn replace<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		expected: &T,
		data: &T,
		ttl: Option<Duration>,
	) -> Result<(), StorageError> {
		self.backend
			.swap_bytes(
				&Self::key(namespace, id),
				&Self::encode(expected)?,
				Self::encode(data)?,
				ttl,
			)
			.await
	}

	/// Retrieves and deserializes a value from storage.
	pub async fn retrieve<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<T, StorageError> {
		let bytes = self.backend.get_bytes(&Self::key(namespace, id)).await?;
		Self::decode(&bytes)
	}

	/// Retrieves all values stored under a namespace.
	pub async fn retrieve_all<T: DeserializeOwned>(
		&self,
		namespace: &str,
	) -> Result<Vec<T>, StorageError> {
		let entries = self
			.backend
			.list_bytes(&format!("{}:", namespace))
			.await?;
		entries.iter().map(|bytes| Self::decode(bytes)).collect()
	}

	/// Removes a value from storage.
	pub async fn remove(&self, namespace: &str, id: &str) -> Result<(), StorageError> {
		self.backend.delete(&Self::key(namespace, id)).await
	}

	/// Checks if a live value exists in storage.
	pub async fn exists(&self, namespace: &str, id: &str) -> Result<bool, StorageError> {
		self.backend.exists(&Self::key(namespace, id)).await
	}

	/// Removes expired entries from storage.
	///
	/// Returns the number of entries that were removed.
	pub async fn cleanup_expired(&self) -> Result<usize, StorageError> {
		self.backend.cleanup_expired().await
	}
}

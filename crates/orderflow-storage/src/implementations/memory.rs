//! In-memory storage backend implementation for the order service.
//!
//! This module provides a memory-based implementation of the StorageBackend
//! trait, useful for testing and single-process deployments where
//! persistence across restarts is not required.

use crate::{StorageBackend, StorageError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// A stored value together with its optional expiry deadline.
#[derive(Debug, Clone)]
struct Entry {
	value: Vec<u8>,
	expires_at: Option<Instant>,
}

impl Entry {
	fn new(value: Vec<u8>, ttl: Option<Duration>) -> Self {
		Self {
			value,
			expires_at: ttl.map(|ttl| Instant::now() + ttl),
		}
	}

	fn is_expired(&self) -> bool {
		self.expires_at.is_some_and(|deadline| Instant::now() >= deadline)
	}
}

/// In-memory storage implementation.
///
/// Data lives in a HashMap behind a read-write lock. The conditional
/// operations take the write lock for the whole check-and-write, which makes
/// them atomic with respect to every other operation on the map.
pub struct MemoryBackend {
	/// The in-memory store protected by a read-write lock.
	store: Arc<RwLock<HashMap<String, Entry>>>,
}

impl MemoryBackend {
	/// Creates a new MemoryBackend instance.
	pub fn new() -> Self {
		Self {
			store: Arc::new(RwLock::new(HashMap::new())),
		}
	}
}

impl Default for MemoryBackend {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl StorageBackend for MemoryBackend {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		let store = self.store.read().await;
		match store.get(key) {
			Some(entry) if !entry.is_expired() => Ok(entry.value.clone()),
			_ => Err(StorageError::NotFound),
		}
	}

	async fn set_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<(), StorageError> {
		let mut store = self.store.write().await;
		store.insert(key.to_string(), Entry::new(value, ttl));
		Ok(())
	}

	async fn create_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<(), StorageError> {
		let mut store = self.store.write().await;
		let occupied = store.get(key).is_some_and(|entry| !entry.is_expired());
		if occupied {
			return Err(StorageError::AlreadyExists);
		}
		store.insert(key.to_string(), Entry::new(value, ttl));
		Ok(())
	}

	async fn swap_bytes(
		&self,
		key: &str,
		expected: &[u8],
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<(), StorageError> {
		let mut store = self.store.write().await;
		match store.get(key) {
			None => return Err(StorageError::NotFound),
			Some(entry) if entry.is_expired() => return Err(StorageError::NotFound),
			Some(entry) if entry.value.as_slice() != expected => {
				return Err(StorageError::Conflict)
			}
			Some(_) => {}
		}
		store.insert(key.to_string(), Entry::new(value, ttl));
		Ok(())
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		let mut store = self.store.write().await;
		store.remove(key);
		Ok(())
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		let store = self.store.read().await;
		Ok(store.get(key).is_some_and(|entry| !entry.is_expired()))
	}

	async fn list_bytes(&self, prefix: &str) -> Result<Vec<Vec<u8>>, StorageError> {
		let store = self.store.read().await;
		Ok(store
			.iter()
			.filter(|(key, entry)| key.starts_with(prefix) && !entry.is_expired())
			.map(|(_, entry)| entry.value.clone())
			.collect())
	}

	async fn cleanup_expired(&self) -> Result<usize, StorageError> {
		let mut store = self.store.write().await;
		let before = store.len();
		store.retain(|_, entry| !entry.is_expired());
		Ok(before - store.len())
	}
}

/// Factory function to create a memory storage backend from configuration.
///
/// Configuration parameters:
/// - None required for memory storage
pub fn create_backend(_config: &toml::Value) -> Result<Box<dyn StorageBackend>, StorageError> {
	Ok(Box::new(MemoryBackend::new()))
}

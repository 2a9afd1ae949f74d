//! Idempotency cache for the orderflow service.
//!
//! This module deduplicates retried mutating requests. The first sight of a
//! client-supplied idempotency key claims an in-flight record, executes the
//! wrapped action exactly once, and stores the response; every later request
//! with the same key and an identical payload receives the stored response
//! verbatim without touching the concurrency guard, the state machine, or
//! the order row. Concurrent duplicates wait, bounded, for the first
//! execution instead of racing it.

use orderflow_storage::{StorageError, StorageService};
use orderflow_types::StorageNamespace;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Errors that can occur during idempotent request handling.
#[derive(Debug, Error)]
pub enum IdempotencyError {
	/// Error that occurs when a key is reused with a different request
	/// payload or against a different action/resource.
	#[error("Idempotency key reused with a different request")]
	KeyReuseMismatch,
	/// Error that occurs when a duplicate request waits longer than the
	/// configured bound for the first execution to complete.
	#[error("Timed out waiting for the original request to complete")]
	ReplayTimeout,
	/// Error from the underlying record storage.
	#[error("Storage error: {0}")]
	Storage(#[from] StorageError),
}

/// The exact response produced by the first completed execution of an
/// action, replayed verbatim for every matching retry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredResponse {
	/// HTTP status code of the response.
	pub status: u16,
	/// Serialized JSON response body.
	pub body: String,
	/// Concurrency tag the response carried, if any.
	pub etag: Option<String>,
}

/// Lifecycle state of an idempotency record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
	/// The first execution for this key is still running.
	InFlight,
	/// The execution finished; `response` holds its outcome.
	Completed,
}

/// A persisted idempotency record, one per key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
	/// The opaque client-supplied key.
	pub key: String,
	/// The (action, resource) pair the key was first used against.
	pub scope: String,
	/// Digest of the request body the key was first used with.
	pub fingerprint: String,
	/// Lifecycle state of the record.
	pub state: RecordState,
	/// The stored response, present once `state` is `Completed`.
	pub response: Option<StoredResponse>,
	/// Timestamp when the record was created (Unix seconds).
	pub created_at: u64,
	/// Timestamp when the record becomes reclaimable (Unix seconds).
	pub expires_at: u64,
}

/// Computes the fingerprint of a raw request body.
///
/// Two requests with byte-identical bodies fingerprint identically; any
/// difference in intent shows up as a mismatch.
pub fn request_fingerprint(body: &[u8]) -> String {
	let mut hasher = Sha3_256::new();
	hasher.update(body);
	hex::encode(hasher.finalize())
}

fn now_unix() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.unwrap_or_default()
		.as_secs()
}

/// Service wrapping mutating actions in idempotency-key deduplication.
///
/// Records live in the shared storage service under their own namespace and
/// are reclaimed by TTL; the duplicate-wait is a bounded poll against the
/// stored record so it behaves the same across backends.
pub struct IdempotencyService {
	/// Storage for idempotency records.
	storage: Arc<StorageService>,
	/// Time-to-live for records.
	ttl: Duration,
	/// Upper bound on how long a duplicate waits for the first execution.
	wait_timeout: Duration,
	/// Interval between polls while waiting on an in-flight record.
	poll_interval: Duration,
}

impl IdempotencyService {
	/// Creates a new IdempotencyService over the given storage.
	pub fn new(
		storage: Arc<StorageService>,
		ttl: Duration,
		wait_timeout: Duration,
		poll_interval: Duration,
	) -> Self {
		Self {
			storage,
			ttl,
			wait_timeout,
			poll_interval,
		}
	}

	/// Executes `action` at most once for the given key.
	///
	/// - First sight of the key: an in-flight record is claimed atomically,
	///   the action runs, and its response (success or definitive business
	///   error alike) is stored and returned.
	/// - Key seen before with matching scope and fingerprint: the stored
	///   response is returned verbatim; the action is not invoked.
	/// - Key seen before with a different scope or fingerprint:
	///   [`IdempotencyError::KeyReuseMismatch`], no mutation.
	/// - Record still in flight: waits, bounded by the configured timeout,
	///   then returns the stored result or [`IdempotencyError::ReplayTimeout`].
	///
	/// If the action fails with an infrastructure error the record is
	/// removed so a client retry can execute afresh; a record orphaned by a
	/// crash is reclaimed by TTL, so no key stays blocked forever.
	pub async fn wrap<F, Fut>(
		&self,
		key: &str,
		scope: &str,
		fingerprint: &str,
		action: F,
	) -> Result<StoredResponse, IdempotencyError>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = Result<StoredResponse, StorageError>>,
	{
		let namespace = StorageNamespace::Idempotency.as_str();
		let deadline = tokio::time::Instant::now() + self.wait_timeout;

		loop {
			match self.storage.retrieve::<IdempotencyRecord>(namespace, key).await {
				Ok(record) => {
					if record.scope != scope || record.fingerprint != fingerprint {
						tracing::warn!(key = %key, scope = %scope, "Idempotency key reused with different request");
						return Err(IdempotencyError::KeyReuseMismatch);
					}
					match record.state {
						RecordState::Completed => {
							let response = record
								.response
								.ok_or_else(|| StorageError::Serialization(
									"completed record missing response".into(),
								))?;
							tracing::debug!(key = %key, "Replaying stored response");
							return Ok(response);
						}
						RecordState::InFlight => {
							// A concurrent duplicate: wait for the first
							// execution, bounded by the configured timeout.
							if tokio::time::Instant::now() >= deadline {
								tracing::warn!(key = %key, "Gave up waiting on in-flight duplicate");
								return Err(IdempotencyError::ReplayTimeout);
							}
							tokio::time::sleep(self.poll_interval).await;
						}
					}
				}
				Err(StorageError::NotFound) => {
					let record = IdempotencyRecord {
						key: key.to_string(),
						scope: scope.to_string(),
						fingerprint: fingerprint.to_string(),
						state: RecordState::InFlight,
						response: None,
						created_at: now_unix(),
						expires_at: now_unix().saturating_add(self.ttl.as_secs()),
					};
					match self
						.storage
						.create(namespace, key, &record, Some(self.ttl))
						.await
					{
						Ok(()) => return self.execute(record, action).await,
						// Another request claimed the key first; loop back
						// and treat ours as the duplicate.
						Err(StorageError::AlreadyExists) => continue,
						Err(e) => return Err(e.into()),
					}
				}
				Err(e) => return Err(e.into()),
			}
		}
	}

	/// Runs the claimed action and completes or releases the record.
	async fn execute<F, Fut>(
		&self,
		mut record: IdempotencyRecord,
		action: F,
	) -> Result<StoredResponse, IdempotencyError>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = Result<StoredResponse, StorageError>>,
	{
		let namespace = StorageNamespace::Idempotency.as_str();

		match action().await {
			Ok(response) => {
				record.state = RecordState::Completed;
				record.response = Some(response.clone());
				self.storage
					.store(namespace, &record.key, &record, Some(self.ttl))
					.await?;
				Ok(response)
			}
			Err(e) => {
				// The action failed before producing a definitive outcome;
				// release the key so a retry can run.
				if let Err(cleanup) = self.storage.remove(namespace, &record.key).await {
					tracing::error!(key = %record.key, error = %cleanup, "Failed to release in-flight idempotency record");
				}
				Err(e.into())
			}
		}
	}
}

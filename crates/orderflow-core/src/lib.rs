//! Core engine for the orderflow service.
//!
//! This module provides the action dispatcher that composes the idempotency
//! cache, the concurrency guard, the state machine, and versioned
//! persistence into one atomic pipeline per mutating request. It also
//! includes the builder that wires the configured storage backend, following
//! the factory pattern used across the service.

use orderflow_config::Config;
use orderflow_idempotency::{request_fingerprint, IdempotencyError, IdempotencyService, StoredResponse};
use orderflow_state::TransitionError;
use orderflow_storage::{StorageError, StorageFactory, StorageService};
use orderflow_types::{ConcurrencyTag, ErrorBody, Order, OrderAction, StorageNamespace};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

pub mod guard;

/// Restaurant name used when order creation omits one.
pub const DEFAULT_RESTAURANT_NAME: &str = "Tasty Chicken House";

/// Errors that can occur during engine operations.
///
/// Business outcomes (invalid transitions, stale tags, unknown orders) are
/// not errors at this level: the dispatcher encodes them as definitive
/// responses. These variants cover configuration and infrastructure faults
/// only.
#[derive(Debug, Error)]
pub enum EngineError {
	/// Error related to configuration issues.
	#[error("Configuration error: {0}")]
	Config(String),
	/// Error from the idempotency cache.
	#[error(transparent)]
	Idempotency(#[from] IdempotencyError),
	/// Error from the storage layer.
	#[error("Storage error: {0}")]
	Storage(#[from] StorageError),
}

fn now_unix() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.unwrap_or_default()
		.as_secs()
}

/// Main engine dispatching mutating actions against orders.
///
/// Every mutating request flows through [`OrderEngine::dispatch`] in a fixed
/// order: idempotency lookup, order load, guard check, state-machine apply,
/// compare-and-swap persist, response build. The engine guarantees at most
/// one successful state transition per version and at most one execution of
/// business effects per idempotency key.
pub struct OrderEngine {
	/// Service configuration.
	config: Config,
	/// Storage service for order rows and idempotency records.
	storage: Arc<StorageService>,
	/// Idempotency cache wrapping mutating actions.
	idempotency: IdempotencyService,
}

impl OrderEngine {
	/// Creates a new OrderEngine over the given storage.
	pub fn new(config: Config, storage: Arc<StorageService>) -> Self {
		let idempotency = IdempotencyService::new(
			storage.clone(),
			Duration::from_secs(config.idempotency.ttl_seconds),
			Duration::from_millis(config.idempotency.wait_timeout_ms),
			Duration::from_millis(config.idempotency.poll_interval_ms),
		);
		Self {
			config,
			storage,
			idempotency,
		}
	}

	/// Returns a reference to the configuration.
	pub fn config(&self) -> &Config {
		&self.config
	}

	/// Returns a reference to the storage service.
	pub fn storage(&self) -> &Arc<StorageService> {
		&self.storage
	}

	/// Creates a new order in its initial status.
	pub async fn create_order(
		&self,
		id: String,
		restaurant_name: Option<String>,
	) -> Result<Order, EngineError> {
		let now = now_unix();
		let order = Order {
			id,
			restaurant_name: restaurant_name
				.unwrap_or_else(|| DEFAULT_RESTAURANT_NAME.to_string()),
			status: orderflow_types::OrderStatus::PendingPayment,
			version: 0,
			created_at: now,
			updated_at: now,
		};
		self.storage
			.create(StorageNamespace::Orders.as_str(), &order.id, &order, None)
			.await?;
		tracing::info!(order_id = %order.id, "Created order");
		Ok(order)
	}

	/// Loads an order by id.
	pub async fn get_order(&self, id: &str) -> Result<Order, EngineError> {
		Ok(self
			.storage
			.retrieve(StorageNamespace::Orders.as_str(), id)
			.await?)
	}

	/// Lists all orders, oldest first.
	pub async fn list_orders(&self) -> Result<Vec<Order>, EngineError> {
		let mut orders: Vec<Order> = self
			.storage
			.retrieve_all(StorageNamespace::Orders.as_str())
			.await?;
		orders.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
		Ok(orders)
	}

	/// Dispatches a mutating action against an order.
	///
	/// When `idempotency_key` is present the remainder of the pipeline runs
	/// inside the idempotency cache; a replay therefore succeeds even if the
	/// caller's concurrency tag has gone stale, because the cache answers
	/// before the guard is consulted.
	pub async fn dispatch(
		&self,
		order_id: &str,
		action: OrderAction,
		supplied_tag: Option<&str>,
		idempotency_key: Option<&str>,
		raw_body: &[u8],
	) -> Result<StoredResponse, EngineError> {
		match idempotency_key {
			Some(key) => {
				let scope = format!("{}:{}", action.as_str(), order_id);
				let fingerprint = request_fingerprint(raw_body);
				Ok(self
					.idempotency
					.wrap(key, &scope, &fingerprint, || {
						self.execute_action(order_id, action, supplied_tag)
					})
					.await?)
			}
			None => Ok(self.execute_action(order_id, action, supplied_tag).await?),
		}
	}

	/// Runs guard check, state-machine apply, and compare-and-swap persist.
	///
	/// Returns a definitive response for every business outcome; only
	/// infrastructure faults surface as errors.
	async fn execute_action(
		&self,
		order_id: &str,
		action: OrderAction,
		supplied_tag: Option<&str>,
	) -> Result<StoredResponse, StorageError> {
		let namespace = StorageNamespace::Orders.as_str();

		let order: Order = match self.storage.retrieve(namespace, order_id).await {
			Ok(order) => order,
			Err(StorageError::NotFound) => {
				return json_response(404, &ErrorBody::new("Order not found"), None);
			}
			Err(e) => return Err(e),
		};

		if let Err(guard_err) = guard::check(&order, supplied_tag) {
			return match guard_err {
				guard::GuardError::PreconditionRequired => {
					tracing::warn!(order_id = %order_id, action = %action, "Request without concurrency tag");
					json_response(400, &ErrorBody::new("Precondition required"), None)
				}
				guard::GuardError::PreconditionFailed { current_version } => {
					tracing::warn!(
						order_id = %order_id,
						action = %action,
						current_version,
						"Stale concurrency tag"
					);
					json_response(
						412,
						&ErrorBody::new("Precondition failed")
							.with_message("supplied tag does not match the current version")
							.with_current_version(current_version),
						None,
					)
				}
			};
		}

		let next_status = match orderflow_state::apply(order.status, action) {
			Ok(next) => next,
			Err(TransitionError::InvalidTransition { current, .. }) => {
				tracing::warn!(order_id = %order_id, action = %action, status = %current, "Invalid transition");
				return json_response(
					400,
					&ErrorBody::new("Invalid state transition").with_current_status(current),
					None,
				);
			}
		};

		let mut updated = order.clone();
		updated.status = next_status;
		updated.version = order.version + 1;
		updated.updated_at = now_unix();

		// The persist step re-validates: if the row moved since it was read,
		// the swap fails instead of overwriting the concurrent write.
		match self
			.storage
			.replace(namespace, order_id, &order, &updated, None)
			.await
		{
			Ok(()) => {
				let tag = ConcurrencyTag::compute(&updated.id, updated.version);
				tracing::info!(
					order_id = %order_id,
					action = %action,
					status = %updated.status,
					version = updated.version,
					"Applied transition"
				);
				json_response(200, &updated, Some(tag.quoted()))
			}
			Err(StorageError::Conflict) => {
				// A concurrent writer committed between our read and the
				// swap; report the version it left behind.
				let current_version = match self
					.storage
					.retrieve::<Order>(namespace, order_id)
					.await
				{
					Ok(current) => current.version,
					Err(_) => order.version + 1,
				};
				tracing::warn!(
					order_id = %order_id,
					action = %action,
					current_version,
					"Lost compare-and-swap race"
				);
				json_response(
					412,
					&ErrorBody::new("Precondition failed")
						.with_message("order was modified concurrently")
						.with_current_version(current_version),
					None,
				)
			}
			Err(e) => Err(e),
		}
	}
}

/// Serializes a response body into a stored response.
fn json_response<T: Serialize>(
	status: u16,
	body: &T,
	etag: Option<String>,
) -> Result<StoredResponse, StorageError> {
	let body =
		serde_json::to_string(body).map_err(|e| StorageError::Serialization(e.to_string()))?;
	Ok(StoredResponse { status, body, etag })
}

/// Builder for constructing an OrderEngine with a pluggable storage backend.
///
/// The builder uses the factory pattern so different backends can be plugged
/// in based on configuration, mirroring how the storage implementations
/// register themselves by name.
pub struct EngineBuilder {
	config: Config,
	storage_factories: HashMap<String, StorageFactory>,
}

impl EngineBuilder {
	/// Creates a new EngineBuilder with the given configuration.
	pub fn new(config: Config) -> Self {
		Self {
			config,
			storage_factories: HashMap::new(),
		}
	}

	/// Adds a factory function for creating storage backends.
	///
	/// The name parameter should match the backend name in the configuration.
	pub fn with_storage_factory(mut self, name: &str, factory: StorageFactory) -> Self {
		self.storage_factories.insert(name.to_string(), factory);
		self
	}

	/// Builds the OrderEngine using the configured factories.
	pub fn build(self) -> Result<OrderEngine, EngineError> {
		let backend_name = self.config.storage.backend.clone();
		let factory = self.storage_factories.get(&backend_name).ok_or_else(|| {
			EngineError::Config(format!("Unknown storage backend '{}'", backend_name))
		})?;

		let backend = factory(&self.config.storage.config).map_err(|e| {
			tracing::error!(
				component = "storage",
				implementation = %backend_name,
				error = %e,
				"Failed to create storage backend"
			);
			EngineError::Config(format!(
				"Failed to create storage backend '{}': {}",
				backend_name, e
			))
		})?;
		let storage = Arc::new(StorageService::new(backend));
		tracing::info!(component = "storage", implementation = %backend_name, "Loaded");

		Ok(OrderEngine::new(self.config, storage))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use orderflow_storage::implementations::memory::MemoryBackend;
	use orderflow_types::OrderStatus;

	fn engine() -> Arc<OrderEngine> {
		let config = Config::from_toml_str(
			r#"
			[service]
			id = "orderflow-test"

			[storage]
			backend = "memory"

			[idempotency]
			wait_timeout_ms = 500
			poll_interval_ms = 10
		"#,
		)
		.unwrap();
		let storage = Arc::new(StorageService::new(Box::new(MemoryBackend::new())));
		Arc::new(OrderEngine::new(config, storage))
	}

	fn tag_for(order: &Order) -> String {
		ConcurrencyTag::compute(&order.id, order.version)
			.as_str()
			.to_string()
	}

	fn body_version(response: &StoredResponse) -> u64 {
		let value: serde_json::Value = serde_json::from_str(&response.body).unwrap();
		value["version"].as_u64().unwrap()
	}

	fn body_status(response: &StoredResponse) -> String {
		let value: serde_json::Value = serde_json::from_str(&response.body).unwrap();
		value["status"].as_str().unwrap().to_string()
	}

	#[tokio::test]
	async fn builder_wires_configured_backend() {
		let config = Config::from_toml_str(
			r#"
			[service]
			id = "orderflow-test"

			[storage]
			backend = "memory"
		"#,
		)
		.unwrap();
		let engine = EngineBuilder::new(config)
			.with_storage_factory(
				"memory",
				orderflow_storage::implementations::memory::create_backend,
			)
			.build()
			.unwrap();
		assert_eq!(engine.config().service.id, "orderflow-test");
	}

	#[tokio::test]
	async fn builder_rejects_unknown_backend() {
		let config = Config::from_toml_str(
			r#"
			[service]
			id = "orderflow-test"

			[storage]
			backend = "redis"
		"#,
		)
		.unwrap();
		let result = EngineBuilder::new(config).build();
		assert!(matches!(result, Err(EngineError::Config(_))));
	}

	#[tokio::test]
	async fn successful_action_increments_version() {
		let engine = engine();
		let order = engine
			.create_order("order-1".into(), None)
			.await
			.unwrap();
		assert_eq!(order.version, 0);
		assert_eq!(order.status, OrderStatus::PendingPayment);

		let response = engine
			.dispatch("order-1", OrderAction::Pay, Some(&tag_for(&order)), None, b"{}")
			.await
			.unwrap();
		assert_eq!(response.status, 200);
		assert_eq!(body_version(&response), 1);
		assert_eq!(body_status(&response), "pending_acceptance");

		let expected = ConcurrencyTag::compute("order-1", 1).quoted();
		assert_eq!(response.etag.as_deref(), Some(expected.as_str()));
	}

	#[tokio::test]
	async fn unknown_order_is_not_found() {
		let engine = engine();
		let response = engine
			.dispatch("ghost", OrderAction::Pay, Some("whatever"), None, b"{}")
			.await
			.unwrap();
		assert_eq!(response.status, 404);
	}

	#[tokio::test]
	async fn missing_tag_is_precondition_required() {
		let engine = engine();
		engine.create_order("order-1".into(), None).await.unwrap();

		let response = engine
			.dispatch("order-1", OrderAction::Pay, None, None, b"{}")
			.await
			.unwrap();
		assert_eq!(response.status, 400);
		assert!(response.body.contains("Precondition required"));
	}

	#[tokio::test]
	async fn stale_tag_reports_current_version() {
		let engine = engine();
		let order = engine
			.create_order("order-1".into(), None)
			.await
			.unwrap();
		let t0 = tag_for(&order);

		engine
			.dispatch("order-1", OrderAction::Pay, Some(&t0), None, b"{}")
			.await
			.unwrap();

		let stale = engine
			.dispatch("order-1", OrderAction::Cancel, Some(&t0), None, b"{}")
			.await
			.unwrap();
		assert_eq!(stale.status, 412);
		let value: serde_json::Value = serde_json::from_str(&stale.body).unwrap();
		assert_eq!(value["current_version"], 1);
	}

	#[tokio::test]
	async fn invalid_transition_reports_current_status() {
		let engine = engine();
		let order = engine
			.create_order("order-1".into(), None)
			.await
			.unwrap();

		// Accept is not valid from pending_payment.
		let response = engine
			.dispatch("order-1", OrderAction::Accept, Some(&tag_for(&order)), None, b"{}")
			.await
			.unwrap();
		assert_eq!(response.status, 400);
		let value: serde_json::Value = serde_json::from_str(&response.body).unwrap();
		assert_eq!(value["current_status"], "pending_payment");

		// Nothing was persisted.
		let stored = engine.get_order("order-1").await.unwrap();
		assert_eq!(stored.version, 0);
	}

	#[tokio::test]
	async fn version_equals_count_of_successful_mutations() {
		let engine = engine();
		let mut order = engine
			.create_order("order-1".into(), None)
			.await
			.unwrap();

		for action in [
			OrderAction::Pay,
			OrderAction::Accept,
			OrderAction::CompletePreparation,
			OrderAction::Pickup,
			OrderAction::Deliver,
		] {
			let response = engine
				.dispatch("order-1", action, Some(&tag_for(&order)), None, b"{}")
				.await
				.unwrap();
			assert_eq!(response.status, 200);
			order = engine.get_order("order-1").await.unwrap();
		}

		assert_eq!(order.version, 5);
		assert_eq!(order.status, OrderStatus::Delivered);
	}

	#[tokio::test]
	async fn replay_with_same_key_returns_original_response() {
		let engine = engine();
		let order = engine
			.create_order("order-1".into(), None)
			.await
			.unwrap();
		let t0 = tag_for(&order);
		let body = b"{\"payment_method\":\"card\",\"amount\":20000}";

		let first = engine
			.dispatch("order-1", OrderAction::Pay, Some(&t0), Some("idem-1"), body)
			.await
			.unwrap();
		assert_eq!(first.status, 200);
		assert_eq!(body_version(&first), 1);

		// The tag is stale now, but the cache answers before the guard.
		let replay = engine
			.dispatch("order-1", OrderAction::Pay, Some(&t0), Some("idem-1"), body)
			.await
			.unwrap();
		assert_eq!(replay, first);

		// No second mutation happened.
		let stored = engine.get_order("order-1").await.unwrap();
		assert_eq!(stored.version, 1);
	}

	#[tokio::test]
	async fn pay_then_stale_retry_then_cached_replay() {
		let engine = engine();
		let order = engine
			.create_order("order-1".into(), None)
			.await
			.unwrap();
		let t0 = tag_for(&order);
		let body = b"{\"payment_method\":\"card\",\"amount\":20000}";

		// pay with T0 succeeds.
		let paid = engine
			.dispatch("order-1", OrderAction::Pay, Some(&t0), Some("idem-1"), body)
			.await
			.unwrap();
		assert_eq!(body_status(&paid), "pending_acceptance");
		assert_eq!(body_version(&paid), 1);

		// pay again with T0 but a fresh key: stale tag.
		let stale = engine
			.dispatch("order-1", OrderAction::Pay, Some(&t0), Some("idem-2"), body)
			.await
			.unwrap();
		assert_eq!(stale.status, 412);
		let value: serde_json::Value = serde_json::from_str(&stale.body).unwrap();
		assert_eq!(value["current_version"], 1);

		// Replaying the original request verbatim returns the original
		// response, unchanged, with no new version.
		let replay = engine
			.dispatch("order-1", OrderAction::Pay, Some(&t0), Some("idem-1"), body)
			.await
			.unwrap();
		assert_eq!(replay, paid);
		assert_eq!(engine.get_order("order-1").await.unwrap().version, 1);
	}

	#[tokio::test]
	async fn key_reuse_with_different_body_leaves_version_unchanged() {
		let engine = engine();
		let order = engine
			.create_order("order-1".into(), None)
			.await
			.unwrap();
		let t0 = tag_for(&order);

		engine
			.dispatch(
				"order-1",
				OrderAction::Pay,
				Some(&t0),
				Some("idem-1"),
				b"{\"payment_method\":\"card\",\"amount\":20000}",
			)
			.await
			.unwrap();

		let reused = engine
			.dispatch(
				"order-1",
				OrderAction::Pay,
				Some(&t0),
				Some("idem-1"),
				b"{\"payment_method\":\"card\",\"amount\":99999}",
			)
			.await;
		assert!(matches!(
			reused,
			Err(EngineError::Idempotency(IdempotencyError::KeyReuseMismatch))
		));
		assert_eq!(engine.get_order("order-1").await.unwrap().version, 1);
	}

	#[tokio::test]
	async fn concurrent_same_tag_requests_have_one_winner() {
		let engine = engine();
		let order = engine
			.create_order("order-1".into(), None)
			.await
			.unwrap();
		let t0 = tag_for(&order);

		// Move to pending_acceptance so cancel and accept are both valid.
		engine
			.dispatch("order-1", OrderAction::Pay, Some(&t0), None, b"{}")
			.await
			.unwrap();
		let order = engine.get_order("order-1").await.unwrap();
		let t1 = tag_for(&order);

		let cancel = {
			let engine = engine.clone();
			let t1 = t1.clone();
			tokio::spawn(async move {
				engine
					.dispatch("order-1", OrderAction::Cancel, Some(&t1), None, b"{}")
					.await
					.unwrap()
			})
		};
		let accept = {
			let engine = engine.clone();
			let t1 = t1.clone();
			tokio::spawn(async move {
				engine
					.dispatch("order-1", OrderAction::Accept, Some(&t1), None, b"{}")
					.await
					.unwrap()
			})
		};

		let cancel = cancel.await.unwrap();
		let accept = accept.await.unwrap();

		let outcomes = [&cancel, &accept];
		assert_eq!(
			outcomes.iter().filter(|r| r.status == 200).count(),
			1,
			"exactly one of the concurrent requests may win"
		);
		let loser = outcomes.iter().find(|r| r.status != 200).unwrap();
		assert_eq!(loser.status, 412);
		let value: serde_json::Value = serde_json::from_str(&loser.body).unwrap();
		assert_eq!(value["current_version"], 2);

		let stored = engine.get_order("order-1").await.unwrap();
		assert_eq!(stored.version, 2);
		assert!(matches!(
			stored.status,
			OrderStatus::Cancelled | OrderStatus::Preparing
		));
	}

	#[tokio::test]
	async fn terminal_status_rejects_every_action() {
		let engine = engine();
		let order = engine
			.create_order("order-1".into(), None)
			.await
			.unwrap();

		engine
			.dispatch("order-1", OrderAction::Cancel, Some(&tag_for(&order)), None, b"{}")
			.await
			.unwrap();
		let cancelled = engine.get_order("order-1").await.unwrap();
		assert_eq!(cancelled.status, OrderStatus::Cancelled);

		for action in OrderAction::all() {
			let response = engine
				.dispatch(
					"order-1",
					action,
					Some(&tag_for(&cancelled)),
					None,
					b"{}",
				)
				.await
				.unwrap();
			assert_eq!(response.status, 400, "action {action} must be rejected");
			assert!(response.body.contains("Invalid state transition"));
		}
		assert_eq!(engine.get_order("order-1").await.unwrap().version, 1);
	}

	#[tokio::test]
	async fn list_orders_returns_oldest_first() {
		let engine = engine();
		engine.create_order("order-a".into(), None).await.unwrap();
		engine
			.create_order("order-b".into(), Some("Noodle Bar".into()))
			.await
			.unwrap();

		let orders = engine.list_orders().await.unwrap();
		assert_eq!(orders.len(), 2);
		assert_eq!(orders[1].restaurant_name, "Noodle Bar");
	}
}

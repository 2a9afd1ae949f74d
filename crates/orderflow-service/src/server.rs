//! HTTP server for the orderflow API.
//!
//! This module provides the axum router and handlers exposing the order
//! lifecycle as action-oriented endpoints. Handlers stay thin: they parse
//! headers and payloads, hand everything to the engine's dispatcher, and
//! translate the outcome back into an HTTP response with the fresh `ETag`.

use axum::{
	body::Bytes,
	extract::{Path, State},
	http::{header, HeaderMap, HeaderValue, StatusCode},
	response::{IntoResponse, Response},
	routing::{get, post},
	Router,
};
use orderflow_core::{EngineError, OrderEngine};
use orderflow_idempotency::{IdempotencyError, StoredResponse};
use orderflow_storage::StorageError;
use orderflow_types::{
	CancellationRequest, ConcurrencyTag, CreateOrderRequest, ErrorBody, Order, OrderAction,
	PaymentRequest, RejectionRequest,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Shared application state for the API server.
#[derive(Clone)]
pub struct AppState {
	/// Reference to the order engine for processing requests.
	pub engine: Arc<OrderEngine>,
}

/// Errors produced by the HTTP layer itself.
///
/// Business outcomes computed by the engine arrive as stored responses and
/// are relayed as-is; these variants cover request-shape problems and
/// infrastructure faults.
#[derive(Debug)]
enum ApiError {
	/// Malformed or invalid action payload (400).
	Validation(String),
	/// Unknown order id (404).
	NotFound,
	/// Idempotency key reused with a different request (409).
	KeyReuseMismatch,
	/// Duplicate request exceeded the in-flight wait bound (503).
	ReplayTimeout,
	/// Infrastructure fault (500). Details are logged, never returned.
	Internal(String),
}

impl From<EngineError> for ApiError {
	fn from(err: EngineError) -> Self {
		match err {
			EngineError::Idempotency(IdempotencyError::KeyReuseMismatch) => {
				ApiError::KeyReuseMismatch
			}
			EngineError::Idempotency(IdempotencyError::ReplayTimeout) => ApiError::ReplayTimeout,
			EngineError::Idempotency(IdempotencyError::Storage(e)) => {
				ApiError::Internal(e.to_string())
			}
			EngineError::Storage(StorageError::NotFound) => ApiError::NotFound,
			EngineError::Storage(e) => ApiError::Internal(e.to_string()),
			EngineError::Config(msg) => ApiError::Internal(msg),
		}
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let (status, body) = match self {
			ApiError::Validation(message) => (
				StatusCode::BAD_REQUEST,
				ErrorBody::new("Validation error").with_message(message),
			),
			ApiError::NotFound => (StatusCode::NOT_FOUND, ErrorBody::new("Order not found")),
			ApiError::KeyReuseMismatch => (
				StatusCode::CONFLICT,
				ErrorBody::new("Idempotency key reused with a different request"),
			),
			ApiError::ReplayTimeout => (
				StatusCode::SERVICE_UNAVAILABLE,
				ErrorBody::new("Request is still being processed")
					.with_message("retry with the same idempotency key"),
			),
			ApiError::Internal(detail) => {
				// Never expose internal error details to clients.
				tracing::error!(error = %detail, "Internal server error");
				(
					StatusCode::INTERNAL_SERVER_ERROR,
					ErrorBody::new("Internal server error"),
				)
			}
		};
		(status, axum::Json(body)).into_response()
	}
}

/// Starts the HTTP server for the API.
pub async fn start_server(engine: Arc<OrderEngine>) -> Result<(), Box<dyn std::error::Error>> {
	let api = engine.config().api.clone();
	let bind_address = format!("{}:{}", api.host, api.port);

	let app = router(engine);
	let listener = TcpListener::bind(&bind_address).await?;

	tracing::info!("Orderflow API server starting on {}", bind_address);

	axum::serve(listener, app).await?;

	Ok(())
}

/// Builds the application router.
pub fn router(engine: Arc<OrderEngine>) -> Router {
	let state = AppState { engine };

	Router::new()
		.nest(
			"/api/v2",
			Router::new()
				.route("/orders", post(handle_create_order).get(handle_list_orders))
				.route("/orders/{id}", get(handle_get_order))
				.route("/orders/{id}/payment", post(handle_payment))
				.route("/orders/{id}/cancellation", post(handle_cancellation))
				.route("/orders/{id}/acceptance", post(handle_acceptance))
				.route("/orders/{id}/rejection", post(handle_rejection))
				.route(
					"/orders/{id}/preparation-complete",
					post(handle_preparation_complete),
				)
				.route("/orders/{id}/pickup", post(handle_pickup))
				.route("/orders/{id}/delivery", post(handle_delivery)),
		)
		.layer(
			ServiceBuilder::new()
				.layer(TraceLayer::new_for_http())
				.layer(CorsLayer::permissive()),
		)
		.with_state(state)
}

/// Extracts the concurrency tag from the `If-Match` header, unquoting it.
fn parse_if_match(headers: &HeaderMap) -> Option<String> {
	let raw = headers.get(header::IF_MATCH)?.to_str().ok()?.trim();
	let tag = raw
		.strip_prefix('"')
		.and_then(|s| s.strip_suffix('"'))
		.unwrap_or(raw);
	Some(tag.to_string())
}

/// Extracts the opaque client token from the `Idempotency-Key` header.
fn parse_idempotency_key(headers: &HeaderMap) -> Option<String> {
	let raw = headers.get("idempotency-key")?.to_str().ok()?.trim();
	if raw.is_empty() {
		return None;
	}
	Some(raw.to_string())
}

/// Parses a typed action payload from the raw request body.
fn parse_payload<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
	serde_json::from_slice(body).map_err(|e| ApiError::Validation(e.to_string()))
}

/// Converts an engine-produced stored response into an HTTP response.
fn relay(stored: StoredResponse) -> Response {
	let status = StatusCode::from_u16(stored.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
	let mut response = (
		status,
		[(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
		stored.body,
	)
		.into_response();
	if let Some(etag) = stored.etag {
		if let Ok(value) = HeaderValue::from_str(&etag) {
			response.headers_mut().insert(header::ETAG, value);
		}
	}
	response
}

/// Builds a JSON response for an order representation plus its `ETag`.
fn order_response(status: StatusCode, order: &Order) -> Result<Response, ApiError> {
	let tag = ConcurrencyTag::compute(&order.id, order.version);
	let body =
		serde_json::to_string(order).map_err(|e| ApiError::Internal(e.to_string()))?;
	Ok(relay(StoredResponse {
		status: status.as_u16(),
		body,
		etag: Some(tag.quoted()),
	}))
}

/// Dispatches a mutating action through the engine.
async fn dispatch_action(
	state: &AppState,
	id: &str,
	action: OrderAction,
	headers: &HeaderMap,
	body: &[u8],
) -> Result<Response, ApiError> {
	let supplied_tag = parse_if_match(headers);
	let idempotency_key = parse_idempotency_key(headers);

	let stored = state
		.engine
		.dispatch(
			id,
			action,
			supplied_tag.as_deref(),
			idempotency_key.as_deref(),
			body,
		)
		.await?;
	Ok(relay(stored))
}

/// Handles POST /api/v2/orders requests.
async fn handle_create_order(
	State(state): State<AppState>,
	body: Bytes,
) -> Result<Response, ApiError> {
	let request: CreateOrderRequest = if body.is_empty() {
		CreateOrderRequest::default()
	} else {
		parse_payload(&body)?
	};

	let id = uuid::Uuid::new_v4().to_string();
	let order = state
		.engine
		.create_order(id, request.restaurant_name)
		.await?;
	order_response(StatusCode::CREATED, &order)
}

/// Handles GET /api/v2/orders requests.
async fn handle_list_orders(State(state): State<AppState>) -> Result<Response, ApiError> {
	let orders = state.engine.list_orders().await?;
	let body =
		serde_json::to_string(&orders).map_err(|e| ApiError::Internal(e.to_string()))?;
	Ok(relay(StoredResponse {
		status: StatusCode::OK.as_u16(),
		body,
		etag: None,
	}))
}

/// Handles GET /api/v2/orders/{id} requests.
///
/// Returns the current representation plus its `ETag`, which a client must
/// capture before issuing the next mutating action.
async fn handle_get_order(
	Path(id): Path<String>,
	State(state): State<AppState>,
) -> Result<Response, ApiError> {
	let order = state.engine.get_order(&id).await?;
	order_response(StatusCode::OK, &order)
}

/// Handles POST /api/v2/orders/{id}/payment requests.
async fn handle_payment(
	Path(id): Path<String>,
	State(state): State<AppState>,
	headers: HeaderMap,
	body: Bytes,
) -> Result<Response, ApiError> {
	let payload: PaymentRequest = parse_payload(&body)?;
	payload
		.validate()
		.map_err(|e| ApiError::Validation(e.to_string()))?;
	dispatch_action(&state, &id, OrderAction::Pay, &headers, &body).await
}

/// Handles POST /api/v2/orders/{id}/cancellation requests.
async fn handle_cancellation(
	Path(id): Path<String>,
	State(state): State<AppState>,
	headers: HeaderMap,
	body: Bytes,
) -> Result<Response, ApiError> {
	let payload: CancellationRequest = parse_payload(&body)?;
	payload
		.validate()
		.map_err(|e| ApiError::Validation(e.to_string()))?;
	dispatch_action(&state, &id, OrderAction::Cancel, &headers, &body).await
}

/// Handles POST /api/v2/orders/{id}/acceptance requests.
async fn handle_acceptance(
	Path(id): Path<String>,
	State(state): State<AppState>,
	headers: HeaderMap,
	body: Bytes,
) -> Result<Response, ApiError> {
	dispatch_action(&state, &id, OrderAction::Accept, &headers, &body).await
}

/// Handles POST /api/v2/orders/{id}/rejection requests.
async fn handle_rejection(
	Path(id): Path<String>,
	State(state): State<AppState>,
	headers: HeaderMap,
	body: Bytes,
) -> Result<Response, ApiError> {
	let payload: RejectionRequest = parse_payload(&body)?;
	payload
		.validate()
		.map_err(|e| ApiError::Validation(e.to_string()))?;
	dispatch_action(&state, &id, OrderAction::Reject, &headers, &body).await
}

/// Handles POST /api/v2/orders/{id}/preparation-complete requests.
async fn handle_preparation_complete(
	Path(id): Path<String>,
	State(state): State<AppState>,
	headers: HeaderMap,
	body: Bytes,
) -> Result<Response, ApiError> {
	dispatch_action(&state, &id, OrderAction::CompletePreparation, &headers, &body).await
}

/// Handles POST /api/v2/orders/{id}/pickup requests.
async fn handle_pickup(
	Path(id): Path<String>,
	State(state): State<AppState>,
	headers: HeaderMap,
	body: Bytes,
) -> Result<Response, ApiError> {
	dispatch_action(&state, &id, OrderAction::Pickup, &headers, &body).await
}

/// Handles POST /api/v2/orders/{id}/delivery requests.
async fn handle_delivery(
	Path(id): Path<String>,
	State(state): State<AppState>,
	headers: HeaderMap,
	body: Bytes,
) -> Result<Response, ApiError> {
	dispatch_action(&state, &id, OrderAction::Deliver, &headers, &body).await
}

#[cfg(test)]
mod tests {
	use super::*;
	use axum::body::Body;
	use axum::http::Request;
	use http_body_util::BodyExt;
	use orderflow_config::Config;
	use orderflow_storage::implementations::memory::MemoryBackend;
	use orderflow_storage::StorageService;
	use tower::ServiceExt;

	fn test_router() -> Router {
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
		router(Arc::new(OrderEngine::new(config, storage)))
	}

	async fn send(
		app: &Router,
		request: Request<Body>,
	) -> (StatusCode, Option<String>, serde_json::Value) {
		let response = app.clone().oneshot(request).await.unwrap();
		let status = response.status();
		let etag = response
			.headers()
			.get(header::ETAG)
			.map(|v| v.to_str().unwrap().to_string());
		let bytes = response.into_body().collect().await.unwrap().to_bytes();
		let body = if bytes.is_empty() {
			serde_json::Value::Null
		} else {
			serde_json::from_slice(&bytes).unwrap()
		};
		(status, etag, body)
	}

	async fn create_order(app: &Router) -> (String, String) {
		let request = Request::builder()
			.method("POST")
			.uri("/api/v2/orders")
			.header("content-type", "application/json")
			.body(Body::from("{\"restaurant_name\":\"Noodle Bar\"}"))
			.unwrap();
		let (status, etag, body) = send(app, request).await;
		assert_eq!(status, StatusCode::CREATED);
		(
			body["id"].as_str().unwrap().to_string(),
			etag.expect("creation response must carry an ETag"),
		)
	}

	fn action_request(
		id: &str,
		verb: &str,
		etag: Option<&str>,
		idempotency_key: Option<&str>,
		body: &str,
	) -> Request<Body> {
		let mut builder = Request::builder()
			.method("POST")
			.uri(format!("/api/v2/orders/{}/{}", id, verb))
			.header("content-type", "application/json");
		if let Some(etag) = etag {
			builder = builder.header("if-match", etag);
		}
		if let Some(key) = idempotency_key {
			builder = builder.header("idempotency-key", key);
		}
		builder.body(Body::from(body.to_string())).unwrap()
	}

	const PAYMENT_BODY: &str = "{\"payment_method\":\"card\",\"amount\":20000}";

	#[tokio::test]
	async fn create_then_get_returns_representation_and_etag() {
		let app = test_router();
		let (id, etag) = create_order(&app).await;

		let request = Request::builder()
			.uri(format!("/api/v2/orders/{}", id))
			.body(Body::empty())
			.unwrap();
		let (status, get_etag, body) = send(&app, request).await;

		assert_eq!(status, StatusCode::OK);
		assert_eq!(get_etag.as_deref(), Some(etag.as_str()));
		assert_eq!(body["status"], "pending_payment");
		assert_eq!(body["version"], 0);
		assert_eq!(body["restaurant_name"], "Noodle Bar");
	}

	#[tokio::test]
	async fn unknown_order_is_404() {
		let app = test_router();
		let request = Request::builder()
			.uri("/api/v2/orders/ghost")
			.body(Body::empty())
			.unwrap();
		let (status, _, body) = send(&app, request).await;
		assert_eq!(status, StatusCode::NOT_FOUND);
		assert_eq!(body["error"], "Order not found");
	}

	#[tokio::test]
	async fn payment_with_current_etag_succeeds() {
		let app = test_router();
		let (id, etag) = create_order(&app).await;

		let (status, new_etag, body) = send(
			&app,
			action_request(&id, "payment", Some(&etag), None, PAYMENT_BODY),
		)
		.await;

		assert_eq!(status, StatusCode::OK);
		assert_eq!(body["status"], "pending_acceptance");
		assert_eq!(body["version"], 1);
		let new_etag = new_etag.unwrap();
		assert_ne!(new_etag, etag);
		assert!(new_etag.starts_with('"') && new_etag.ends_with('"'));
	}

	#[tokio::test]
	async fn missing_if_match_is_precondition_required() {
		let app = test_router();
		let (id, _) = create_order(&app).await;

		let (status, _, body) = send(
			&app,
			action_request(&id, "payment", None, None, PAYMENT_BODY),
		)
		.await;

		assert_eq!(status, StatusCode::BAD_REQUEST);
		assert_eq!(body["error"], "Precondition required");
	}

	#[tokio::test]
	async fn stale_etag_is_precondition_failed_with_current_version() {
		let app = test_router();
		let (id, etag) = create_order(&app).await;

		send(
			&app,
			action_request(&id, "payment", Some(&etag), None, PAYMENT_BODY),
		)
		.await;

		let (status, _, body) = send(
			&app,
			action_request(&id, "cancellation", Some(&etag), None, "{\"reason\":\"too slow\"}"),
		)
		.await;

		assert_eq!(status, StatusCode::PRECONDITION_FAILED);
		assert_eq!(body["current_version"], 1);
	}

	#[tokio::test]
	async fn invalid_transition_reports_current_status() {
		let app = test_router();
		let (id, etag) = create_order(&app).await;

		// Acceptance is not valid while payment is pending.
		let (status, _, body) = send(
			&app,
			action_request(&id, "acceptance", Some(&etag), None, ""),
		)
		.await;

		assert_eq!(status, StatusCode::BAD_REQUEST);
		assert_eq!(body["error"], "Invalid state transition");
		assert_eq!(body["current_status"], "pending_payment");
	}

	#[tokio::test]
	async fn malformed_payment_payload_is_validation_error() {
		let app = test_router();
		let (id, etag) = create_order(&app).await;

		let (status, _, body) = send(
			&app,
			action_request(&id, "payment", Some(&etag), None, "{\"amount\":20000}"),
		)
		.await;
		assert_eq!(status, StatusCode::BAD_REQUEST);
		assert_eq!(body["error"], "Validation error");

		let (status, _, _) = send(
			&app,
			action_request(
				&id,
				"payment",
				Some(&etag),
				None,
				"{\"payment_method\":\"card\",\"amount\":-5}",
			),
		)
		.await;
		assert_eq!(status, StatusCode::BAD_REQUEST);

		// The malformed attempts left the order untouched.
		let request = Request::builder()
			.uri(format!("/api/v2/orders/{}", id))
			.body(Body::empty())
			.unwrap();
		let (_, _, order) = send(&app, request).await;
		assert_eq!(order["version"], 0);
	}

	#[tokio::test]
	async fn cancellation_requires_reason() {
		let app = test_router();
		let (id, etag) = create_order(&app).await;

		let (status, _, _) = send(
			&app,
			action_request(&id, "cancellation", Some(&etag), None, "{}"),
		)
		.await;
		assert_eq!(status, StatusCode::BAD_REQUEST);
	}

	#[tokio::test]
	async fn idempotent_replay_returns_identical_response() {
		let app = test_router();
		let (id, etag) = create_order(&app).await;

		let (status1, etag1, body1) = send(
			&app,
			action_request(&id, "payment", Some(&etag), Some("idem-1"), PAYMENT_BODY),
		)
		.await;
		assert_eq!(status1, StatusCode::OK);

		// Replay with the original (now stale) ETag: the cache answers
		// before the concurrency guard, so the response is identical.
		let (status2, etag2, body2) = send(
			&app,
			action_request(&id, "payment", Some(&etag), Some("idem-1"), PAYMENT_BODY),
		)
		.await;
		assert_eq!(status2, status1);
		assert_eq!(body2, body1);
		assert_eq!(etag2, etag1);

		let request = Request::builder()
			.uri(format!("/api/v2/orders/{}", id))
			.body(Body::empty())
			.unwrap();
		let (_, _, order) = send(&app, request).await;
		assert_eq!(order["version"], 1);
	}

	#[tokio::test]
	async fn key_reuse_with_different_body_is_conflict() {
		let app = test_router();
		let (id, etag) = create_order(&app).await;

		send(
			&app,
			action_request(&id, "payment", Some(&etag), Some("idem-1"), PAYMENT_BODY),
		)
		.await;

		let (status, _, _) = send(
			&app,
			action_request(
				&id,
				"payment",
				Some(&etag),
				Some("idem-1"),
				"{\"payment_method\":\"card\",\"amount\":99999}",
			),
		)
		.await;
		assert_eq!(status, StatusCode::CONFLICT);
	}

	#[tokio::test]
	async fn full_lifecycle_through_endpoints() {
		let app = test_router();
		let (id, mut etag) = create_order(&app).await;

		let steps: [(&str, &str, &str); 5] = [
			("payment", PAYMENT_BODY, "pending_acceptance"),
			("acceptance", "", "preparing"),
			("preparation-complete", "", "ready_for_pickup"),
			("pickup", "", "in_transit"),
			("delivery", "", "delivered"),
		];

		for (i, (verb, body, expected_status)) in steps.iter().enumerate() {
			let (status, new_etag, response) = send(
				&app,
				action_request(&id, verb, Some(&etag), None, body),
			)
			.await;
			assert_eq!(status, StatusCode::OK, "step {verb} failed: {response}");
			assert_eq!(response["status"], *expected_status);
			assert_eq!(response["version"], (i + 1) as u64);
			etag = new_etag.unwrap();
		}

		// Delivered is terminal: every further action is rejected.
		let (status, _, body) = send(
			&app,
			action_request(&id, "cancellation", Some(&etag), None, "{\"reason\":\"nope\"}"),
		)
		.await;
		assert_eq!(status, StatusCode::BAD_REQUEST);
		assert_eq!(body["current_status"], "delivered");
	}

	#[tokio::test]
	async fn rejection_flow() {
		let app = test_router();
		let (id, etag) = create_order(&app).await;

		let (_, etag, _) = send(
			&app,
			action_request(&id, "payment", Some(&etag), None, PAYMENT_BODY),
		)
		.await;

		let (status, _, body) = send(
			&app,
			action_request(
				&id,
				"rejection",
				Some(etag.unwrap().as_str()),
				None,
				"{\"reason\":\"Out of stock\"}",
			),
		)
		.await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(body["status"], "rejected");
	}

	#[tokio::test]
	async fn list_orders_returns_all() {
		let app = test_router();
		create_order(&app).await;
		create_order(&app).await;

		let request = Request::builder()
			.uri("/api/v2/orders")
			.body(Body::empty())
			.unwrap();
		let (status, _, body) = send(&app, request).await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(body.as_array().unwrap().len(), 2);
	}
}

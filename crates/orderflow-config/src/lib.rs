//! Configuration module for the orderflow service.
//!
//! This module provides structures and utilities for managing service
//! configuration. It supports loading configuration from TOML files and
//! provides validation to ensure all required configuration values are
//! properly set.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error that occurs during file I/O operations.
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	/// Error that occurs when parsing TOML configuration.
	#[error("Configuration error: {0}")]
	Parse(String),
	/// Error that occurs when configuration validation fails.
	#[error("Validation error: {0}")]
	Validation(String),
}

impl From<toml::de::Error> for ConfigError {
	fn from(err: toml::de::Error) -> Self {
		// Extract just the message without the huge input dump
		ConfigError::Parse(err.message().to_string())
	}
}

/// Main configuration structure for the orderflow service.
///
/// This structure contains all configuration sections required for the
/// service to operate: service identity, the HTTP API server, the storage
/// backend, and idempotency-cache tuning.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	/// Configuration specific to the service instance.
	pub service: ServiceConfig,
	/// Configuration for the HTTP API server.
	#[serde(default)]
	pub api: ApiConfig,
	/// Configuration for the storage backend.
	pub storage: StorageConfig,
	/// Configuration for the idempotency cache.
	#[serde(default)]
	pub idempotency: IdempotencyConfig,
}

/// Configuration specific to the service instance.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
	/// Unique identifier for this service instance.
	pub id: String,
}

/// Configuration for the HTTP API server.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
	/// Host address to bind the server to.
	#[serde(default = "default_api_host")]
	pub host: String,
	/// Port to bind the server to.
	#[serde(default = "default_api_port")]
	pub port: u16,
}

impl Default for ApiConfig {
	fn default() -> Self {
		Self {
			host: default_api_host(),
			port: default_api_port(),
		}
	}
}

/// Configuration for the storage backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
	/// Which backend implementation to use ("memory" or "file").
	pub backend: String,
	/// Backend-specific configuration values.
	#[serde(default = "default_backend_config")]
	pub config: toml::Value,
	/// Interval in seconds for cleaning up expired storage entries.
	#[serde(default = "default_cleanup_interval_seconds")]
	pub cleanup_interval_seconds: u64,
}

/// Configuration for the idempotency cache.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IdempotencyConfig {
	/// Time-to-live in seconds for completed idempotency records.
	#[serde(default = "default_idempotency_ttl_seconds")]
	pub ttl_seconds: u64,
	/// Maximum time in milliseconds a duplicate request waits for the
	/// first in-flight execution to complete.
	#[serde(default = "default_wait_timeout_ms")]
	pub wait_timeout_ms: u64,
	/// Interval in milliseconds between polls while waiting on an
	/// in-flight record.
	#[serde(default = "default_poll_interval_ms")]
	pub poll_interval_ms: u64,
}

impl Default for IdempotencyConfig {
	fn default() -> Self {
		Self {
			ttl_seconds: default_idempotency_ttl_seconds(),
			wait_timeout_ms: default_wait_timeout_ms(),
			poll_interval_ms: default_poll_interval_ms(),
		}
	}
}

/// Returns the default API host (localhost).
fn default_api_host() -> String {
	"127.0.0.1".to_string()
}

/// Returns the default API port.
fn default_api_port() -> u16 {
	8000
}

/// Returns an empty table for backends that need no configuration.
fn default_backend_config() -> toml::Value {
	toml::Value::Table(toml::map::Map::new())
}

/// Returns the default cleanup interval (5 minutes).
fn default_cleanup_interval_seconds() -> u64 {
	300
}

/// Returns the default idempotency record TTL (24 hours).
fn default_idempotency_ttl_seconds() -> u64 {
	86_400
}

/// Returns the default duplicate-wait timeout (2 seconds).
fn default_wait_timeout_ms() -> u64 {
	2_000
}

/// Returns the default duplicate-wait poll interval (50 ms).
fn default_poll_interval_ms() -> u64 {
	50
}

impl Config {
	/// Parses configuration from a TOML string and validates it.
	pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
		let config: Config = toml::from_str(raw)?;
		config.validate()?;
		Ok(config)
	}

	/// Loads configuration from a TOML file.
	pub async fn from_file(path: &str) -> Result<Self, ConfigError> {
		let raw = tokio::fs::read_to_string(path).await?;
		Self::from_toml_str(&raw)
	}

	/// Validates cross-field constraints that serde cannot express.
	fn validate(&self) -> Result<(), ConfigError> {
		if self.service.id.is_empty() {
			return Err(ConfigError::Validation("service.id must not be empty".into()));
		}
		if self.storage.backend.is_empty() {
			return Err(ConfigError::Validation(
				"storage.backend must not be empty".into(),
			));
		}
		if self.idempotency.poll_interval_ms == 0 {
			return Err(ConfigError::Validation(
				"idempotency.poll_interval_ms must be positive".into(),
			));
		}
		if self.idempotency.poll_interval_ms > self.idempotency.wait_timeout_ms {
			return Err(ConfigError::Validation(
				"idempotency.poll_interval_ms must not exceed wait_timeout_ms".into(),
			));
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const MINIMAL: &str = r#"
		[service]
		id = "orderflow-test"

		[storage]
		backend = "memory"
	"#;

	#[test]
	fn minimal_config_applies_defaults() {
		let config = Config::from_toml_str(MINIMAL).unwrap();
		assert_eq!(config.service.id, "orderflow-test");
		assert_eq!(config.api.host, "127.0.0.1");
		assert_eq!(config.api.port, 8000);
		assert_eq!(config.storage.cleanup_interval_seconds, 300);
		assert_eq!(config.idempotency.ttl_seconds, 86_400);
		assert_eq!(config.idempotency.wait_timeout_ms, 2_000);
		assert_eq!(config.idempotency.poll_interval_ms, 50);
	}

	#[test]
	fn backend_config_is_passed_through() {
		let raw = r#"
			[service]
			id = "orderflow-test"

			[storage]
			backend = "file"

			[storage.config]
			storage_path = "/tmp/orderflow"
		"#;
		let config = Config::from_toml_str(raw).unwrap();
		assert_eq!(config.storage.backend, "file");
		assert_eq!(
			config.storage.config.get("storage_path").and_then(|v| v.as_str()),
			Some("/tmp/orderflow")
		);
	}

	#[test]
	fn rejects_empty_backend() {
		let raw = r#"
			[service]
			id = "orderflow-test"

			[storage]
			backend = ""
		"#;
		assert!(matches!(
			Config::from_toml_str(raw),
			Err(ConfigError::Validation(_))
		));
	}

	#[test]
	fn rejects_poll_interval_above_wait_timeout() {
		let raw = r#"
			[service]
			id = "orderflow-test"

			[storage]
			backend = "memory"

			[idempotency]
			wait_timeout_ms = 100
			poll_interval_ms = 500
		"#;
		assert!(matches!(
			Config::from_toml_str(raw),
			Err(ConfigError::Validation(_))
		));
	}

	#[test]
	fn rejects_malformed_toml() {
		assert!(matches!(
			Config::from_toml_str("not toml at all ["),
			Err(ConfigError::Parse(_))
		));
	}

	#[tokio::test]
	async fn loads_from_file() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("config.toml");
		std::fs::write(&path, MINIMAL).unwrap();

		let config = Config::from_file(path.to_str().unwrap()).await.unwrap();
		assert_eq!(config.storage.backend, "memory");
	}
}

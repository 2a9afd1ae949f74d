//! Main entry point for the orderflow service.
//!
//! This binary exposes the food-order lifecycle over HTTP: a state machine
//! governs the allowed transitions, an optimistic concurrency guard rejects
//! stale writers, and an idempotency cache deduplicates retried requests.
//! Storage backends are pluggable and selected through configuration.

use clap::Parser;
use orderflow_config::Config;
use orderflow_core::{EngineBuilder, EngineError, OrderEngine};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

mod server;

/// Command-line arguments for the orderflow service.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Path to configuration file
	#[arg(short, long, default_value = "config.toml")]
	config: PathBuf,

	/// Log level (trace, debug, info, warn, error)
	#[arg(short, long, default_value = "info")]
	log_level: String,
}

/// Main entry point for the orderflow service.
///
/// This function:
/// 1. Parses command-line arguments
/// 2. Initializes logging infrastructure
/// 3. Loads configuration from file
/// 4. Builds the order engine with the configured storage backend
/// 5. Serves the HTTP API until interrupted
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	// Initialize tracing with env filter
	use tracing_subscriber::{fmt, EnvFilter};

	let default_directive = args.log_level.to_string();
	let env_filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

	fmt()
		.with_env_filter(env_filter)
		.with_target(true)
		.init();

	tracing::info!("Started orderflow");

	// Load configuration
	let config_path = args.config.to_string_lossy();
	let config = Config::from_file(&config_path).await?;
	tracing::info!("Loaded configuration [{}]", config.service.id);

	// Build engine with the configured storage backend
	let engine = Arc::new(build_engine(config)?);

	// Reclaim expired idempotency records in the background
	spawn_cleanup(Arc::clone(&engine));

	// Serve until interrupted
	tokio::select! {
		result = server::start_server(Arc::clone(&engine)) => {
			result?;
		}
		_ = tokio::signal::ctrl_c() => {
			tracing::info!("Shutdown signal received");
		}
	}

	tracing::info!("Stopped orderflow");
	Ok(())
}

/// Builds the order engine, registering all available storage backends.
fn build_engine(config: Config) -> Result<OrderEngine, EngineError> {
	let mut builder = EngineBuilder::new(config);
	for (name, factory) in orderflow_storage::get_all_implementations() {
		builder = builder.with_storage_factory(name, factory);
	}
	builder.build()
}

/// Spawns the periodic cleanup task for expired storage entries.
fn spawn_cleanup(engine: Arc<OrderEngine>) {
	let interval = Duration::from_secs(engine.config().storage.cleanup_interval_seconds);
	tokio::spawn(async move {
		loop {
			tokio::time::sleep(interval).await;
			match engine.storage().cleanup_expired().await {
				Ok(0) => {}
				Ok(removed) => {
					tracing::info!(removed, "Reclaimed expired storage entries");
				}
				Err(e) => {
					tracing::warn!(error = %e, "Storage cleanup failed");
				}
			}
		}
	});
}

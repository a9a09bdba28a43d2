//! # Structured Logging Module
//!
//! Environment-aware structured logging for the orchestrator. Console output
//! is human-readable by default and switches to JSON lines when
//! `FLEET_LOG_FORMAT=json`, which is what log shippers expect in production.

use chrono::Utc;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(get_log_level(&environment)));
        let json = std::env::var("FLEET_LOG_FORMAT")
            .map(|format| format.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let layer = if json {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(false)
                .json()
                .with_filter(filter)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(true)
                .with_filter(filter)
                .boxed()
        };

        // Use try_init to avoid panic if global subscriber already set
        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!(
                "Global tracing subscriber already initialized - continuing with existing subscriber"
            );
        }

        tracing::info!(
            pid = std::process::id(),
            environment = %environment,
            json = json,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

/// Get current environment from environment variables
pub fn get_environment() -> String {
    std::env::var("FLEET_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> String {
    match environment {
        "test" => "debug".to_string(),
        "development" => "debug".to_string(),
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

/// Log structured data for instance operations
pub fn log_instance_operation(
    operation: &str,
    app_id: &str,
    instance_id: Option<&str>,
    condition: Option<&str>,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        app_id = %app_id,
        instance_id = instance_id,
        condition = condition,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "📦 INSTANCE_OPERATION"
    );
}

/// Log structured data for deployment operations
pub fn log_deployment_operation(
    operation: &str,
    deployment_id: &str,
    app_id: &str,
    step: Option<usize>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        deployment_id = %deployment_id,
        app_id = %app_id,
        step = step,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "🚀 DEPLOYMENT_OPERATION"
    );
}

/// Log structured data for leadership operations
pub fn log_leadership_operation(
    operation: &str,
    node_id: &str,
    epoch: Option<u64>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        node_id = %node_id,
        epoch = epoch,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "👑 LEADERSHIP_OPERATION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "❌ ERROR"
    );
}

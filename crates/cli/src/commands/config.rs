use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use flowops_core::config::{AppConfig, LoadOptions};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let source = |key_path: &str, env_key: Option<&str>| {
        field_source(key_path, env_key, config_file_doc.as_ref(), config_file_path.as_deref())
    };

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];

    lines.push(render_line(
        "database.url",
        &config.database.url,
        source("database.url", Some("FLOWOPS_DATABASE_URL")),
    ));
    lines.push(render_line(
        "database.max_connections",
        &config.database.max_connections.to_string(),
        source("database.max_connections", Some("FLOWOPS_DATABASE_MAX_CONNECTIONS")),
    ));
    lines.push(render_line(
        "database.timeout_secs",
        &config.database.timeout_secs.to_string(),
        source("database.timeout_secs", Some("FLOWOPS_DATABASE_TIMEOUT_SECS")),
    ));

    lines.push(render_line(
        "server.bind_address",
        &config.server.bind_address,
        source("server.bind_address", Some("FLOWOPS_SERVER_BIND_ADDRESS")),
    ));
    lines.push(render_line(
        "server.port",
        &config.server.port.to_string(),
        source("server.port", Some("FLOWOPS_SERVER_PORT")),
    ));
    lines.push(render_line(
        "server.graceful_shutdown_secs",
        &config.server.graceful_shutdown_secs.to_string(),
        source("server.graceful_shutdown_secs", Some("FLOWOPS_SERVER_GRACEFUL_SHUTDOWN_SECS")),
    ));

    let llm_api_key = if config.llm.api_key.is_some() { "<redacted>" } else { "<unset>" };
    lines.push(render_line(
        "llm.api_key",
        llm_api_key,
        source("llm.api_key", Some("FLOWOPS_LLM_API_KEY")),
    ));
    lines.push(render_line(
        "llm.base_url",
        &config.llm.base_url,
        source("llm.base_url", Some("FLOWOPS_LLM_BASE_URL")),
    ));
    lines.push(render_line(
        "llm.model",
        &config.llm.model,
        source("llm.model", Some("FLOWOPS_LLM_MODEL")),
    ));
    lines.push(render_line(
        "llm.timeout_secs",
        &config.llm.timeout_secs.to_string(),
        source("llm.timeout_secs", Some("FLOWOPS_LLM_TIMEOUT_SECS")),
    ));

    lines.push(render_line(
        "policy.max_auto_refund",
        &config.policy.max_auto_refund.to_string(),
        source("policy.max_auto_refund", Some("FLOWOPS_POLICY_MAX_AUTO_REFUND")),
    ));
    lines.push(render_line(
        "policy.confidence_threshold",
        &config.policy.confidence_threshold.to_string(),
        source("policy.confidence_threshold", Some("FLOWOPS_POLICY_CONFIDENCE_THRESHOLD")),
    ));

    lines.push(render_line(
        "outbox.poll_interval_ms",
        &config.outbox.poll_interval_ms.to_string(),
        source("outbox.poll_interval_ms", Some("FLOWOPS_OUTBOX_POLL_INTERVAL_MS")),
    ));
    lines.push(render_line(
        "outbox.max_attempts",
        &config.outbox.max_attempts.to_string(),
        source("outbox.max_attempts", Some("FLOWOPS_OUTBOX_MAX_ATTEMPTS")),
    ));

    lines.push(render_line(
        "sla.check_interval_secs",
        &config.sla.check_interval_secs.to_string(),
        source("sla.check_interval_secs", Some("FLOWOPS_SLA_CHECK_INTERVAL_SECS")),
    ));
    lines.push(render_line(
        "sla.batch_size",
        &config.sla.batch_size.to_string(),
        source("sla.batch_size", Some("FLOWOPS_SLA_BATCH_SIZE")),
    ));

    // Tokens never render; only the roster size is useful here.
    lines.push(render_line(
        "operators",
        &format!("{} configured", config.operators.len()),
        source("operators", None),
    ));

    lines.push(render_line(
        "logging.level",
        &config.logging.level,
        source("logging.level", Some("FLOWOPS_LOGGING_LEVEL")),
    ));
    lines.push(render_line(
        "logging.format",
        &format!("{:?}", config.logging.format),
        source("logging.format", Some("FLOWOPS_LOGGING_FORMAT")),
    ));

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("flowops.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/flowops.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

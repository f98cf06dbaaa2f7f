use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::{Operator, OperatorDirectory, OperatorRole};
use crate::policy::PolicyConfig;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub policy: PolicyConfig,
    pub outbox: OutboxConfig,
    pub sla: SlaConfig,
    pub operators: OperatorDirectory,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

/// OpenAI-compatible structured-output endpoint. `api_key` may stay unset;
/// generation jobs then fail fast and record a failed artifact instead of
/// blocking the rest of the pipeline.
#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub api_key: Option<SecretString>,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct OutboxConfig {
    pub poll_interval_ms: u64,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    /// Events stuck in `processing` longer than this are assumed to belong
    /// to a crashed worker and are released for retry.
    pub stale_claim_secs: u64,
}

#[derive(Clone, Debug)]
pub struct SlaConfig {
    pub check_interval_secs: u64,
    pub batch_size: u32,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_api_key: Option<String>,
    pub llm_model: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://flowops.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            llm: LlmConfig {
                api_key: None,
                base_url: "https://api.openai.com/v1".to_string(),
                model: "gpt-4o-mini".to_string(),
                timeout_secs: 20,
            },
            policy: PolicyConfig::default(),
            outbox: OutboxConfig {
                poll_interval_ms: 1_000,
                max_attempts: 8,
                backoff_base_ms: 1_000,
                backoff_cap_ms: 60_000,
                stale_claim_secs: 300,
            },
            sla: SlaConfig { check_interval_secs: 10, batch_size: 25 },
            operators: OperatorDirectory::default(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch)?;
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("flowops.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) -> Result<(), ConfigError> {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = base_url;
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
        }

        if let Some(policy) = patch.policy {
            if let Some(max_auto_refund) = policy.max_auto_refund {
                self.policy.max_auto_refund = Decimal::from(max_auto_refund);
            }
            if let Some(confidence_threshold) = policy.confidence_threshold {
                self.policy.confidence_threshold = confidence_threshold;
            }
            if let Some(enterprise_requires_human) = policy.enterprise_requires_human {
                self.policy.enterprise_requires_human = enterprise_requires_human;
            }
            if let Some(minutes) = policy.sla_minutes_enterprise {
                self.policy.sla_minutes_enterprise = minutes;
            }
            if let Some(minutes) = policy.sla_minutes_pro {
                self.policy.sla_minutes_pro = minutes;
            }
            if let Some(minutes) = policy.sla_minutes_default {
                self.policy.sla_minutes_default = minutes;
            }
        }

        if let Some(outbox) = patch.outbox {
            if let Some(poll_interval_ms) = outbox.poll_interval_ms {
                self.outbox.poll_interval_ms = poll_interval_ms;
            }
            if let Some(max_attempts) = outbox.max_attempts {
                self.outbox.max_attempts = max_attempts;
            }
            if let Some(backoff_base_ms) = outbox.backoff_base_ms {
                self.outbox.backoff_base_ms = backoff_base_ms;
            }
            if let Some(backoff_cap_ms) = outbox.backoff_cap_ms {
                self.outbox.backoff_cap_ms = backoff_cap_ms;
            }
            if let Some(stale_claim_secs) = outbox.stale_claim_secs {
                self.outbox.stale_claim_secs = stale_claim_secs;
            }
        }

        if let Some(sla) = patch.sla {
            if let Some(check_interval_secs) = sla.check_interval_secs {
                self.sla.check_interval_secs = check_interval_secs;
            }
            if let Some(batch_size) = sla.batch_size {
                self.sla.batch_size = batch_size;
            }
        }

        if let Some(operators) = patch.operators {
            let mut resolved = Vec::with_capacity(operators.len());
            for entry in operators {
                let role = OperatorRole::parse(&entry.role).ok_or_else(|| {
                    ConfigError::Validation(format!(
                        "operator `{}` has unsupported role `{}` (expected viewer|operator|supervisor)",
                        entry.id, entry.role
                    ))
                })?;
                resolved.push(Operator::new(entry.id, entry.name, role, entry.token));
            }
            self.operators = OperatorDirectory::new(resolved);
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("FLOWOPS_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("FLOWOPS_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("FLOWOPS_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("FLOWOPS_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("FLOWOPS_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("FLOWOPS_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("FLOWOPS_SERVER_PORT") {
            self.server.port = parse_u16("FLOWOPS_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("FLOWOPS_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("FLOWOPS_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("FLOWOPS_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("FLOWOPS_LLM_BASE_URL") {
            self.llm.base_url = value;
        }
        if let Some(value) = read_env("FLOWOPS_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("FLOWOPS_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("FLOWOPS_LLM_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("FLOWOPS_POLICY_MAX_AUTO_REFUND") {
            self.policy.max_auto_refund =
                Decimal::from(parse_u32("FLOWOPS_POLICY_MAX_AUTO_REFUND", &value)?);
        }
        if let Some(value) = read_env("FLOWOPS_POLICY_CONFIDENCE_THRESHOLD") {
            self.policy.confidence_threshold =
                parse_f64("FLOWOPS_POLICY_CONFIDENCE_THRESHOLD", &value)?;
        }

        if let Some(value) = read_env("FLOWOPS_OUTBOX_POLL_INTERVAL_MS") {
            self.outbox.poll_interval_ms = parse_u64("FLOWOPS_OUTBOX_POLL_INTERVAL_MS", &value)?;
        }
        if let Some(value) = read_env("FLOWOPS_OUTBOX_MAX_ATTEMPTS") {
            self.outbox.max_attempts = parse_u32("FLOWOPS_OUTBOX_MAX_ATTEMPTS", &value)?;
        }

        if let Some(value) = read_env("FLOWOPS_SLA_CHECK_INTERVAL_SECS") {
            self.sla.check_interval_secs = parse_u64("FLOWOPS_SLA_CHECK_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read_env("FLOWOPS_SLA_BATCH_SIZE") {
            self.sla.batch_size = parse_u32("FLOWOPS_SLA_BATCH_SIZE", &value)?;
        }

        let log_level = read_env("FLOWOPS_LOGGING_LEVEL").or_else(|| read_env("FLOWOPS_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("FLOWOPS_LOGGING_FORMAT").or_else(|| read_env("FLOWOPS_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_api_key) = overrides.llm_api_key {
            self.llm.api_key = Some(secret_value(llm_api_key));
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_llm(&self.llm)?;
        validate_policy(&self.policy)?;
        validate_outbox(&self.outbox)?;
        validate_sla(&self.sla)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("flowops.toml"), PathBuf::from("config/flowops.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if llm.base_url.trim().is_empty()
        || !(llm.base_url.starts_with("http://") || llm.base_url.starts_with("https://"))
    {
        return Err(ConfigError::Validation(
            "llm.base_url must start with http:// or https://".to_string(),
        ));
    }

    if let Some(api_key) = &llm.api_key {
        if api_key.expose_secret().trim().is_empty() {
            return Err(ConfigError::Validation(
                "llm.api_key must not be blank when set".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_policy(policy: &PolicyConfig) -> Result<(), ConfigError> {
    if policy.max_auto_refund < Decimal::ZERO {
        return Err(ConfigError::Validation(
            "policy.max_auto_refund must not be negative".to_string(),
        ));
    }

    if !(0.0..=1.0).contains(&policy.confidence_threshold) {
        return Err(ConfigError::Validation(
            "policy.confidence_threshold must be in range 0.0..=1.0".to_string(),
        ));
    }

    let minutes = [
        policy.sla_minutes_enterprise,
        policy.sla_minutes_pro,
        policy.sla_minutes_default,
    ];
    if minutes.iter().any(|value| *value <= 0) {
        return Err(ConfigError::Validation(
            "policy SLA minutes must all be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_outbox(outbox: &OutboxConfig) -> Result<(), ConfigError> {
    if outbox.poll_interval_ms < 10 {
        return Err(ConfigError::Validation(
            "outbox.poll_interval_ms must be at least 10".to_string(),
        ));
    }

    if outbox.max_attempts == 0 {
        return Err(ConfigError::Validation(
            "outbox.max_attempts must be greater than zero".to_string(),
        ));
    }

    if outbox.backoff_cap_ms < outbox.backoff_base_ms {
        return Err(ConfigError::Validation(
            "outbox.backoff_cap_ms must not be below outbox.backoff_base_ms".to_string(),
        ));
    }

    if outbox.stale_claim_secs == 0 {
        return Err(ConfigError::Validation(
            "outbox.stale_claim_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_sla(sla: &SlaConfig) -> Result<(), ConfigError> {
    if sla.check_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "sla.check_interval_secs must be greater than zero".to_string(),
        ));
    }

    if sla.batch_size == 0 {
        return Err(ConfigError::Validation(
            "sla.batch_size must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_f64(key: &str, value: &str) -> Result<f64, ConfigError> {
    value.parse::<f64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    llm: Option<LlmPatch>,
    policy: Option<PolicyPatch>,
    outbox: Option<OutboxPatch>,
    sla: Option<SlaPatch>,
    operators: Option<Vec<OperatorPatch>>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct PolicyPatch {
    max_auto_refund: Option<u32>,
    confidence_threshold: Option<f64>,
    enterprise_requires_human: Option<bool>,
    sla_minutes_enterprise: Option<i64>,
    sla_minutes_pro: Option<i64>,
    sla_minutes_default: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct OutboxPatch {
    poll_interval_ms: Option<u64>,
    max_attempts: Option<u32>,
    backoff_base_ms: Option<u64>,
    backoff_cap_ms: Option<u64>,
    stale_claim_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SlaPatch {
    check_interval_secs: Option<u64>,
    batch_size: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct OperatorPatch {
    id: String,
    name: String,
    role: String,
    token: String,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

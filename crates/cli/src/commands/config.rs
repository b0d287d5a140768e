use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use concierge_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

struct Field {
    key_path: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

impl Field {
    fn new(
        key_path: &'static str,
        value: impl ToString,
        env_keys: &'static [&'static str],
    ) -> Self {
        Self { key_path, value: value.to_string(), env_keys }
    }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in effective_fields(&config) {
        let source = field_source(&field, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(format!("- {} = {} (source: {source})", field.key_path, field.value));
    }

    lines.join("\n")
}

fn effective_fields(config: &AppConfig) -> Vec<Field> {
    let unset = || "<unset>".to_string();

    vec![
        Field::new("database.url", &config.database.url, &["CONCIERGE_DATABASE_URL"]),
        Field::new(
            "database.max_connections",
            config.database.max_connections,
            &["CONCIERGE_DATABASE_MAX_CONNECTIONS"],
        ),
        Field::new(
            "database.timeout_secs",
            config.database.timeout_secs,
            &["CONCIERGE_DATABASE_TIMEOUT_SECS"],
        ),
        Field::new(
            "llm.provider",
            format!("{:?}", config.llm.provider),
            &["CONCIERGE_LLM_PROVIDER"],
        ),
        Field::new("llm.model", &config.llm.model, &["CONCIERGE_LLM_MODEL"]),
        Field::new(
            "llm.base_url",
            config.llm.base_url.clone().unwrap_or_else(unset),
            &["CONCIERGE_LLM_BASE_URL"],
        ),
        Field::new(
            "llm.api_key",
            config
                .llm
                .api_key
                .as_ref()
                .map(|key| redact_key(key.expose_secret()))
                .unwrap_or_else(unset),
            &["CONCIERGE_LLM_API_KEY"],
        ),
        Field::new("llm.timeout_secs", config.llm.timeout_secs, &["CONCIERGE_LLM_TIMEOUT_SECS"]),
        Field::new("llm.max_retries", config.llm.max_retries, &["CONCIERGE_LLM_MAX_RETRIES"]),
        Field::new("llm.temperature", config.llm.temperature, &["CONCIERGE_LLM_TEMPERATURE"]),
        Field::new("llm.max_tokens", config.llm.max_tokens, &["CONCIERGE_LLM_MAX_TOKENS"]),
        Field::new(
            "pipeline.timeout_ms",
            config.pipeline.timeout_ms,
            &["CONCIERGE_PIPELINE_TIMEOUT_MS"],
        ),
        Field::new(
            "pipeline.confidence_threshold",
            config.pipeline.confidence_threshold,
            &["CONCIERGE_PIPELINE_CONFIDENCE_THRESHOLD"],
        ),
        Field::new(
            "pipeline.retrieval_limit",
            config.pipeline.retrieval_limit,
            &["CONCIERGE_PIPELINE_RETRIEVAL_LIMIT"],
        ),
        Field::new(
            "pipeline.retrieval_min_score",
            config.pipeline.retrieval_min_score,
            &["CONCIERGE_PIPELINE_RETRIEVAL_MIN_SCORE"],
        ),
        Field::new(
            "pipeline.history_limit",
            config.pipeline.history_limit,
            &["CONCIERGE_PIPELINE_HISTORY_LIMIT"],
        ),
        Field::new("pipeline.max_message_chars", config.pipeline.max_message_chars, &[]),
        Field::new(
            "pipeline.personalize",
            config.pipeline.personalize,
            &["CONCIERGE_PIPELINE_PERSONALIZE"],
        ),
        Field::new(
            "retrieval.knowledge_path",
            config
                .retrieval
                .knowledge_path
                .as_ref()
                .map(|path| path.display().to_string())
                .unwrap_or_else(unset),
            &["CONCIERGE_RETRIEVAL_KNOWLEDGE_PATH"],
        ),
        Field::new(
            "channel.max_chunk_chars",
            config.channel.max_chunk_chars,
            &["CONCIERGE_CHANNEL_MAX_CHUNK_CHARS"],
        ),
        Field::new(
            "server.bind_address",
            &config.server.bind_address,
            &["CONCIERGE_SERVER_BIND_ADDRESS"],
        ),
        Field::new("server.port", config.server.port, &["CONCIERGE_SERVER_PORT"]),
        Field::new(
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs,
            &["CONCIERGE_SERVER_GRACEFUL_SHUTDOWN_SECS"],
        ),
        Field::new(
            "logging.level",
            &config.logging.level,
            &["CONCIERGE_LOGGING_LEVEL", "CONCIERGE_LOG_LEVEL"],
        ),
        Field::new(
            "logging.format",
            format!("{:?}", config.logging.format),
            &["CONCIERGE_LOGGING_FORMAT", "CONCIERGE_LOG_FORMAT"],
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("concierge.toml"), PathBuf::from("config/concierge.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    field: &Field,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = field.env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if config_file_doc.is_some_and(|doc| contains_path(doc, field.key_path)) {
        let file_path = config_file_path
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "config file".to_string());
        return format!("file ({file_path})");
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

/// Keeps a recognizable provider prefix such as `sk-` and hides the rest.
fn redact_key(key: &str) -> String {
    let trimmed = key.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    match trimmed.split_once('-') {
        Some((prefix, _)) if prefix.len() <= 4 => format!("{prefix}-***"),
        _ => "<redacted>".to_string(),
    }
}

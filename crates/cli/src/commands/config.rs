use std::env;
use std::fs;
use std::path::Path;

use dwslack_core::config::{locate_config_file, AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use serde::Serialize;
use serde_json::json;

use crate::commands::{CommandResult, EXIT_CONFIG};

const COMMAND: &str = "config";

#[derive(Debug, Serialize)]
struct Setting {
    key: &'static str,
    value: String,
    source: String,
}

/// Env keys that feed each setting, in priority order.
const ENV_KEYS: &[(&str, &[&str])] = &[
    ("database.url", &["DWSLACK_DATABASE_URL"]),
    ("database.max_connections", &["DWSLACK_DATABASE_MAX_CONNECTIONS"]),
    ("database.timeout_secs", &["DWSLACK_DATABASE_TIMEOUT_SECS"]),
    ("slack.signing_secret", &["DWSLACK_SLACK_SIGNING_SECRET"]),
    ("slack.bot_token", &["DWSLACK_SLACK_BOT_TOKEN"]),
    ("slack.api_base_url", &["DWSLACK_SLACK_API_BASE_URL"]),
    ("dataworld.api_base_url", &["DWSLACK_DATAWORLD_API_BASE_URL"]),
    ("dataworld.web_base_url", &["DWSLACK_DATAWORLD_WEB_BASE_URL"]),
    ("dataworld.timeout_secs", &["DWSLACK_DATAWORLD_TIMEOUT_SECS"]),
    (
        "notifications.max_concurrent_deliveries",
        &["DWSLACK_NOTIFICATIONS_MAX_CONCURRENT_DELIVERIES"],
    ),
    ("server.bind_address", &["DWSLACK_SERVER_BIND_ADDRESS"]),
    ("server.port", &["DWSLACK_SERVER_PORT"]),
    ("server.graceful_shutdown_secs", &["DWSLACK_SERVER_GRACEFUL_SHUTDOWN_SECS"]),
    ("logging.level", &["DWSLACK_LOGGING_LEVEL", "DWSLACK_LOG_LEVEL"]),
    ("logging.format", &["DWSLACK_LOGGING_FORMAT", "DWSLACK_LOG_FORMAT"]),
];

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(COMMAND, "config_validation", error.to_string(), EXIT_CONFIG)
        }
    };

    let file = locate_config_file(None);
    let file_doc = file.as_deref().and_then(read_toml);
    let file_label = file.as_deref().map(|path| path.display().to_string());

    let settings: Vec<Setting> = effective_values(&config)
        .into_iter()
        .map(|(key, value)| {
            let source = source_of(key, file_doc.as_ref(), file_label.as_deref());
            Setting { key, value, source }
        })
        .collect();

    CommandResult::success_with_data(
        COMMAND,
        "effective configuration (precedence: overrides > env > file > default)",
        Some(json!(settings)),
    )
}

fn effective_values(config: &AppConfig) -> Vec<(&'static str, String)> {
    vec![
        ("database.url", config.database.url.clone()),
        ("database.max_connections", config.database.max_connections.to_string()),
        ("database.timeout_secs", config.database.timeout_secs.to_string()),
        ("slack.signing_secret", redact_secret(config.slack.signing_secret.expose_secret())),
        ("slack.bot_token", redact_token(config.slack.bot_token.expose_secret())),
        ("slack.api_base_url", config.slack.api_base_url.clone()),
        ("dataworld.api_base_url", config.dataworld.api_base_url.clone()),
        ("dataworld.web_base_url", config.dataworld.web_base_url.clone()),
        ("dataworld.timeout_secs", config.dataworld.timeout_secs.to_string()),
        (
            "notifications.max_concurrent_deliveries",
            config.notifications.max_concurrent_deliveries.to_string(),
        ),
        ("server.bind_address", config.server.bind_address.clone()),
        ("server.port", config.server.port.to_string()),
        ("server.graceful_shutdown_secs", config.server.graceful_shutdown_secs.to_string()),
        ("logging.level", config.logging.level.clone()),
        ("logging.format", config.logging.format.as_str().to_owned()),
    ]
}

fn read_toml(path: &Path) -> Option<toml::Value> {
    fs::read_to_string(path).ok()?.parse().ok()
}

fn source_of(key: &str, file_doc: Option<&toml::Value>, file_label: Option<&str>) -> String {
    let env_keys = ENV_KEYS
        .iter()
        .find(|(setting, _)| *setting == key)
        .map(|(_, keys)| *keys)
        .unwrap_or_default();
    if let Some(env_key) = env_keys.iter().find(|env_key| env::var_os(env_key).is_some()) {
        return format!("env:{env_key}");
    }

    match (file_doc, file_label) {
        (Some(doc), Some(label)) if contains_path(doc, key) => format!("file:{label}"),
        _ => "default".to_owned(),
    }
}

fn contains_path(root: &toml::Value, dotted: &str) -> bool {
    dotted
        .split('.')
        .try_fold(root, |node, segment| node.get(segment))
        .is_some()
}

/// Keeps the token kind (`xoxb`, `xoxp`, ...) and hides the rest.
fn redact_token(token: &str) -> String {
    match token.trim() {
        "" => "<empty>".to_owned(),
        trimmed => match trimmed.split_once('-') {
            Some((kind, _)) => format!("{kind}-***"),
            None => "<redacted>".to_owned(),
        },
    }
}

fn redact_secret(secret: &str) -> String {
    let shown = if secret.trim().is_empty() { "<empty>" } else { "<redacted>" };
    shown.to_owned()
}

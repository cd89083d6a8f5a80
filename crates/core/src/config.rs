//! Layered runtime configuration.
//!
//! Values resolve in order: built-in defaults, then `dwslack.toml` (or
//! `config/dwslack.toml`) with `${VAR}` interpolation, then `DWSLACK_*`
//! environment variables, then programmatic overrides. The merged result is
//! validated once before it is handed out.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE: &str = "dwslack.toml";
const CONFIG_SEARCH_PATHS: [&str; 2] = [DEFAULT_CONFIG_FILE, "config/dwslack.toml"];

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub slack: SlackConfig,
    pub dataworld: DataWorldConfig,
    pub notifications: NotificationConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct SlackConfig {
    pub signing_secret: SecretString,
    /// Fallback bot token for channels whose workspace has no stored token.
    pub bot_token: SecretString,
    pub api_base_url: String,
}

#[derive(Clone, Debug)]
pub struct DataWorldConfig {
    pub api_base_url: String,
    /// Link prefix stripped from shared links before they are parsed.
    pub web_base_url: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct NotificationConfig {
    /// Upper bound on per-channel pipelines running at once within one dispatch.
    pub max_concurrent_deliveries: usize,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
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

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compact => "compact",
            Self::Pretty => "pretty",
            Self::Json => "json",
        }
    }
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "logging.format `{other}` is not one of compact, pretty or json"
            ))),
        }
    }
}

/// Programmatic overrides. These win over every other source.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub slack_signing_secret: Option<String>,
    pub slack_bot_token: Option<String>,
    pub dataworld_api_base_url: Option<String>,
    pub server_port: Option<u16>,
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
    #[error("config file `{0}` does not exist")]
    MissingConfigFile(PathBuf),
    #[error("config file references `${{{var}}}` but it is not set")]
    MissingEnvInterpolation { var: String },
    #[error("config file has an unterminated `${{` expression")]
    UnterminatedInterpolation,
    #[error("environment variable `{key}` has an invalid value `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("invalid configuration: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://dwslack.db".to_owned(),
                max_connections: 5,
                timeout_secs: 30,
            },
            slack: SlackConfig {
                signing_secret: SecretString::from(String::new()),
                bot_token: SecretString::from(String::new()),
                api_base_url: "https://slack.com/api".to_owned(),
            },
            dataworld: DataWorldConfig {
                api_base_url: "https://api.data.world/v0".to_owned(),
                web_base_url: "https://data.world".to_owned(),
                timeout_secs: 15,
            },
            notifications: NotificationConfig { max_concurrent_deliveries: 8 },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_owned(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_owned(), format: LogFormat::Compact },
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let LoadOptions { config_path, require_file, overrides } = options;
        let mut config = Self::default();

        match locate_config_file(config_path.as_deref()) {
            Some(path) => config.merge_file(read_file_layer(&path)?),
            None if require_file => {
                let expected = config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
                return Err(ConfigError::MissingConfigFile(expected));
            }
            None => {}
        }

        config.merge_env()?;
        config.merge_overrides(overrides);
        config.validate()?;
        Ok(config)
    }

    fn merge_file(&mut self, layer: FileLayer) {
        let FileLayer { database, slack, dataworld, notifications, server, logging } = layer;

        if let Some(section) = database {
            set(&mut self.database.url, section.url);
            set(&mut self.database.max_connections, section.max_connections);
            set(&mut self.database.timeout_secs, section.timeout_secs);
        }
        if let Some(section) = slack {
            set(&mut self.slack.signing_secret, section.signing_secret.map(SecretString::from));
            set(&mut self.slack.bot_token, section.bot_token.map(SecretString::from));
            set(&mut self.slack.api_base_url, section.api_base_url);
        }
        if let Some(section) = dataworld {
            set(&mut self.dataworld.api_base_url, section.api_base_url);
            set(&mut self.dataworld.web_base_url, section.web_base_url);
            set(&mut self.dataworld.timeout_secs, section.timeout_secs);
        }
        if let Some(section) = notifications {
            set(
                &mut self.notifications.max_concurrent_deliveries,
                section.max_concurrent_deliveries,
            );
        }
        if let Some(section) = server {
            set(&mut self.server.bind_address, section.bind_address);
            set(&mut self.server.port, section.port);
            set(&mut self.server.graceful_shutdown_secs, section.graceful_shutdown_secs);
        }
        if let Some(section) = logging {
            set(&mut self.logging.level, section.level);
            set(&mut self.logging.format, section.format);
        }
    }

    fn merge_env(&mut self) -> Result<(), ConfigError> {
        set(&mut self.database.url, env_value("DWSLACK_DATABASE_URL")?);
        set(&mut self.database.max_connections, env_value("DWSLACK_DATABASE_MAX_CONNECTIONS")?);
        set(&mut self.database.timeout_secs, env_value("DWSLACK_DATABASE_TIMEOUT_SECS")?);

        set(
            &mut self.slack.signing_secret,
            env_value::<String>("DWSLACK_SLACK_SIGNING_SECRET")?.map(SecretString::from),
        );
        set(
            &mut self.slack.bot_token,
            env_value::<String>("DWSLACK_SLACK_BOT_TOKEN")?.map(SecretString::from),
        );
        set(&mut self.slack.api_base_url, env_value("DWSLACK_SLACK_API_BASE_URL")?);

        set(&mut self.dataworld.api_base_url, env_value("DWSLACK_DATAWORLD_API_BASE_URL")?);
        set(&mut self.dataworld.web_base_url, env_value("DWSLACK_DATAWORLD_WEB_BASE_URL")?);
        set(&mut self.dataworld.timeout_secs, env_value("DWSLACK_DATAWORLD_TIMEOUT_SECS")?);

        set(
            &mut self.notifications.max_concurrent_deliveries,
            env_value("DWSLACK_NOTIFICATIONS_MAX_CONCURRENT_DELIVERIES")?,
        );

        set(&mut self.server.bind_address, env_value("DWSLACK_SERVER_BIND_ADDRESS")?);
        set(&mut self.server.port, env_value("DWSLACK_SERVER_PORT")?);
        set(
            &mut self.server.graceful_shutdown_secs,
            env_value("DWSLACK_SERVER_GRACEFUL_SHUTDOWN_SECS")?,
        );

        // The short LOG_* spellings are accepted as aliases.
        let level = env_value("DWSLACK_LOGGING_LEVEL")?;
        set(&mut self.logging.level, level.or(env_value("DWSLACK_LOG_LEVEL")?));
        let format = env_value::<String>("DWSLACK_LOGGING_FORMAT")?
            .or(env_value("DWSLACK_LOG_FORMAT")?)
            .map(|raw| raw.parse::<LogFormat>())
            .transpose()?;
        set(&mut self.logging.format, format);

        Ok(())
    }

    fn merge_overrides(&mut self, overrides: ConfigOverrides) {
        set(&mut self.database.url, overrides.database_url);
        set(&mut self.logging.level, overrides.log_level);
        set(&mut self.slack.signing_secret, overrides.slack_signing_secret.map(SecretString::from));
        set(&mut self.slack.bot_token, overrides.slack_bot_token.map(SecretString::from));
        set(&mut self.dataworld.api_base_url, overrides.dataworld_api_base_url);
        set(&mut self.server.port, overrides.server_port);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_database()?;
        self.validate_slack()?;
        self.validate_dataworld()?;

        if self.notifications.max_concurrent_deliveries == 0 {
            return invalid("notifications.max_concurrent_deliveries must be at least 1");
        }
        if self.server.port == 0 {
            return invalid("server.port must be non-zero");
        }
        if self.server.graceful_shutdown_secs == 0 {
            return invalid("server.graceful_shutdown_secs must be at least 1");
        }

        match self.logging.level.trim().to_ascii_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
            other => Err(ConfigError::Validation(format!(
                "logging.level `{other}` is not one of trace, debug, info, warn or error"
            ))),
        }
    }

    fn validate_database(&self) -> Result<(), ConfigError> {
        let url = self.database.url.trim();
        if !(url.starts_with("sqlite:") || url == ":memory:") {
            return invalid("database.url must be a sqlite URL such as `sqlite://dwslack.db`");
        }
        if self.database.max_connections == 0 {
            return invalid("database.max_connections must be at least 1");
        }
        within_timeout_range("database.timeout_secs", self.database.timeout_secs)
    }

    fn validate_slack(&self) -> Result<(), ConfigError> {
        if self.slack.signing_secret.expose_secret().trim().is_empty() {
            return invalid(
                "slack.signing_secret is required (Slack app settings > Basic Information > Signing Secret)",
            );
        }

        let bot_token = self.slack.bot_token.expose_secret();
        if bot_token.is_empty() {
            return invalid(
                "slack.bot_token is required (Slack app settings > OAuth & Permissions > Bot User OAuth Token)",
            );
        }
        if !bot_token.starts_with("xoxb-") {
            let hint = if bot_token.starts_with("xapp-") {
                "; this looks like an app-level token"
            } else {
                ""
            };
            return Err(ConfigError::Validation(format!(
                "slack.bot_token must be a bot token starting with `xoxb-`{hint}"
            )));
        }

        http_url("slack.api_base_url", &self.slack.api_base_url)
    }

    fn validate_dataworld(&self) -> Result<(), ConfigError> {
        http_url("dataworld.api_base_url", &self.dataworld.api_base_url)?;
        http_url("dataworld.web_base_url", &self.dataworld.web_base_url)?;
        within_timeout_range("dataworld.timeout_secs", self.dataworld.timeout_secs)
    }
}

fn set<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

/// Blank variables count as unset.
fn env_value<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    let Some(raw) = env::var(key).ok().filter(|value| !value.trim().is_empty()) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<T>()
        .map(Some)
        .map_err(|_| ConfigError::InvalidEnvOverride { key: key.to_owned(), value: raw })
}

fn invalid(message: &str) -> Result<(), ConfigError> {
    Err(ConfigError::Validation(message.to_owned()))
}

fn within_timeout_range(key: &str, secs: u64) -> Result<(), ConfigError> {
    if (1..=300).contains(&secs) {
        Ok(())
    } else {
        Err(ConfigError::Validation(format!("{key} must be between 1 and 300 seconds")))
    }
}

fn http_url(key: &str, value: &str) -> Result<(), ConfigError> {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        Err(ConfigError::Validation(format!("{key} must be an http(s) URL")))
    }
}

/// The config file `load` would read: `explicit` if it exists, otherwise the
/// first of the default locations that does.
pub fn locate_config_file(explicit: Option<&Path>) -> Option<PathBuf> {
    match explicit {
        Some(path) => path.is_file().then(|| path.to_path_buf()),
        None => CONFIG_SEARCH_PATHS.into_iter().map(PathBuf::from).find(|path| path.is_file()),
    }
}

fn read_file_layer(path: &Path) -> Result<FileLayer, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;
    let expanded = expand_env_references(&raw)?;
    toml::from_str(&expanded)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

/// Replaces every `${NAME}` with the value of the environment variable `NAME`.
fn expand_env_references(input: &str) -> Result<String, ConfigError> {
    let mut expanded = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        expanded.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        let end = after_open.find('}').ok_or(ConfigError::UnterminatedInterpolation)?;
        let name = &after_open[..end];
        let value = env::var(name)
            .map_err(|_| ConfigError::MissingEnvInterpolation { var: name.to_owned() })?;
        expanded.push_str(&value);
        rest = &after_open[end + 1..];
    }

    expanded.push_str(rest);
    Ok(expanded)
}

/// The subset of settings a config file may provide. Unknown keys are errors.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileLayer {
    database: Option<DatabaseSection>,
    slack: Option<SlackSection>,
    dataworld: Option<DataWorldSection>,
    notifications: Option<NotificationSection>,
    server: Option<ServerSection>,
    logging: Option<LoggingSection>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct DatabaseSection {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SlackSection {
    signing_secret: Option<String>,
    bot_token: Option<String>,
    api_base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct DataWorldSection {
    api_base_url: Option<String>,
    web_base_url: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct NotificationSection {
    max_concurrent_deliveries: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ServerSection {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct LoggingSection {
    level: Option<String>,
    format: Option<LogFormat>,
}

//! Operator commands. Each returns a [`CommandResult`] whose output is a
//! single JSON document (doctor's text mode aside) and whose exit code names
//! the failure class.

pub mod config;
pub mod credentials;
pub mod doctor;
pub mod migrate;
pub mod subscriptions;

use std::future::Future;

use dwslack_core::config::{AppConfig, LoadOptions};
use dwslack_db::{connect_with_settings, migrations, DbPool};
use serde::Serialize;
use serde_json::Value;

pub const EXIT_NOT_READY: u8 = 1;
pub const EXIT_CONFIG: u8 = 2;
pub const EXIT_RUNTIME: u8 = 3;
pub const EXIT_DB_CONNECTIVITY: u8 = 4;
pub const EXIT_MIGRATION: u8 = 5;
pub const EXIT_INPUT: u8 = 6;
pub const EXIT_STORAGE: u8 = 7;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Serialize)]
struct Envelope<'a> {
    command: &'a str,
    status: &'static str,
    error_class: Option<&'a str>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl Envelope<'_> {
    fn render(&self) -> String {
        // Only a non-string map key could fail here, and there are none.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// `(error_class, message, exit_code)` raised inside a database command.
pub type Failure = (&'static str, String, u8);

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        Self::success_with_data(command, message, None)
    }

    pub fn success_with_data(command: &str, message: impl Into<String>, data: Option<Value>) -> Self {
        let envelope =
            Envelope { command, status: "ok", error_class: None, message: message.into(), data };
        Self { exit_code: 0, output: envelope.render() }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let envelope = Envelope {
            command,
            status: "error",
            error_class: Some(error_class),
            message: message.into(),
            data: None,
        };
        Self { exit_code, output: envelope.render() }
    }

    fn from_failure(command: &str, (error_class, message, exit_code): Failure) -> Self {
        Self::failure(command, error_class, message, exit_code)
    }
}

/// Loads config, opens the pool and brings the schema up to date before
/// handing the pool to `work`. The pool is closed on every path.
pub fn with_database<T, F, Fut>(command: &str, work: F) -> Result<T, CommandResult>
where
    F: FnOnce(DbPool) -> Fut,
    Fut: Future<Output = Result<T, Failure>>,
{
    let config = AppConfig::load(LoadOptions::default()).map_err(|error| {
        CommandResult::failure(command, "config_validation", error.to_string(), EXIT_CONFIG)
    })?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|error| {
            CommandResult::failure(command, "runtime_init", error.to_string(), EXIT_RUNTIME)
        })?;

    runtime
        .block_on(async {
            let database = &config.database;
            let pool =
                connect_with_settings(&database.url, database.max_connections, database.timeout_secs)
                    .await
                    .map_err(|error| {
                        ("db_connectivity", error.to_string(), EXIT_DB_CONNECTIVITY)
                    })?;

            let result = match migrations::run_pending(&pool).await {
                Ok(()) => work(pool.clone()).await,
                Err(error) => Err(("migration", error.to_string(), EXIT_MIGRATION)),
            };
            pool.close().await;
            result
        })
        .map_err(|failure| CommandResult::from_failure(command, failure))
}

use std::sync::Arc;

use dwslack_core::config::{AppConfig, ConfigError, DatabaseConfig, LoadOptions};
use dwslack_core::ports::ChatCredential;
use dwslack_core::subscriptions::SubscriptionReconciler;
use dwslack_db::{connect_with_settings, migrations, DbPool, SqlCredentialRepository, SqlSubscriptionStore};
use dwslack_slack::blocks::BlockKitFormatter;
use dwslack_slack::commands::{CommandParser, CommandRouter};
use dwslack_slack::events::SlackEventHandler;
use dwslack_slack::notifications::NotificationDispatcher;
use dwslack_slack::signature::SignatureVerifier;
use secrecy::ExposeSecret;
use thiserror::Error;
use tracing::info;

use crate::dataworld::DataWorldClient;
use crate::routes::{AppState, Deliveries, SubscriberRevoker};
use crate::slack_api::SlackWebClient;

/// Everything the HTTP surface needs, built once at startup.
pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub state: AppState,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("could not open database: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("could not apply migrations: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("could not build http client: {0}")]
    HttpClient(#[source] reqwest::Error),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    bootstrap_with_config(AppConfig::load(options)?).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    let db_pool = open_database(&config.database).await?;
    let state = build_state(&config, db_pool.clone())?;
    info!(
        event_name = "system.bootstrap.ready",
        correlation_id = "bootstrap",
        max_concurrent_deliveries = config.notifications.max_concurrent_deliveries,
        "application state wired"
    );
    Ok(Application { config, db_pool, state })
}

async fn open_database(database: &DatabaseConfig) -> Result<DbPool, BootstrapError> {
    let pool = connect_with_settings(&database.url, database.max_connections, database.timeout_secs)
        .await
        .map_err(BootstrapError::DatabaseConnect)?;
    migrations::run_pending(&pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.database_ready",
        correlation_id = "bootstrap",
        migrations = migrations::expected_count(),
        "database opened and schema current"
    );
    Ok(pool)
}

fn build_state(config: &AppConfig, db_pool: DbPool) -> Result<AppState, BootstrapError> {
    let dataworld = Arc::new(
        DataWorldClient::new(&config.dataworld.api_base_url, config.dataworld.timeout_secs)
            .map_err(BootstrapError::HttpClient)?,
    );
    let slack = Arc::new(
        SlackWebClient::new(&config.slack.api_base_url, config.dataworld.timeout_secs)
            .map_err(BootstrapError::HttpClient)?,
    );
    let store = Arc::new(SqlSubscriptionStore::new(db_pool.clone()));
    let credentials = Arc::new(
        SqlCredentialRepository::new(db_pool)
            .with_default_bot_token(ChatCredential::new(config.slack.bot_token.expose_secret())),
    );

    let reconciler = Arc::new(SubscriptionReconciler::new(
        dataworld.clone(),
        dataworld.clone(),
        store.clone(),
        credentials.clone(),
    ));
    let dispatcher = NotificationDispatcher::new(
        dataworld,
        store,
        credentials.clone(),
        slack.clone(),
        Arc::new(BlockKitFormatter::new(config.dataworld.web_base_url.as_str())),
    )
    .with_max_concurrent_deliveries(config.notifications.max_concurrent_deliveries);

    Ok(AppState {
        verifier: SignatureVerifier::new(config.slack.signing_secret.clone()),
        commands: Arc::new(CommandRouter::new(
            reconciler.clone(),
            CommandParser::new(&config.dataworld.web_base_url),
        )),
        events: Arc::new(SlackEventHandler::new(SubscriberRevoker::new(
            reconciler,
            credentials.clone(),
        ))),
        dispatcher: Arc::new(dispatcher),
        credentials,
        messaging: slack,
        deliveries: Deliveries::default(),
    })
}

#[cfg(test)]
mod tests {
    use dwslack_core::config::{ConfigOverrides, LoadOptions};

    use crate::bootstrap::bootstrap;

    fn overrides(database_url: &str, bot_token: &str) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                slack_signing_secret: Some("signing-secret".to_string()),
                slack_bot_token: Some(bot_token.to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_with_app_level_token() {
        let result = bootstrap(overrides("sqlite::memory:", "xapp-not-a-bot-token")).await;

        let Err(error) = result else { panic!("an app-level token must be rejected") };
        assert!(error.to_string().contains("slack.bot_token"));
    }

    #[tokio::test]
    async fn bootstrap_applies_migrations_and_wires_state() {
        let app = bootstrap(overrides("sqlite::memory:", "xoxb-test"))
            .await
            .expect("bootstrap should succeed with valid overrides");

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE '\\_%' ESCAPE '\\' ORDER BY name",
        )
        .fetch_all(&app.db_pool)
        .await
        .expect("schema should be present after bootstrap");
        assert_eq!(tables, ["slack_channel", "slack_team", "subscriber", "subscription"]);
        assert_eq!(app.config.notifications.max_concurrent_deliveries, 8);

        app.db_pool.close().await;
    }
}

use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use tracing::debug;

use dwslack_core::domain::subscription::{ChannelId, SubscriberId};
use dwslack_core::errors::CredentialError;
use dwslack_core::ports::{CatalogCredential, ChatCredential, CredentialResolver};

use super::RepositoryError;
use crate::DbPool;

/// Workspace bot tokens, channel→workspace mapping, and per-user data.world
/// tokens. Channels with no recorded workspace fall back to `default_bot_token`
/// when one is configured.
pub struct SqlCredentialRepository {
    pool: DbPool,
    default_bot_token: Option<ChatCredential>,
}

impl SqlCredentialRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool, default_bot_token: None }
    }

    pub fn with_default_bot_token(mut self, token: ChatCredential) -> Self {
        self.default_bot_token = Some(token);
        self
    }

    pub async fn save_team(&self, team_id: &str, bot_token: &str) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO slack_team (team_id, bot_token, updated_at)
             VALUES (?, ?, ?)
             ON CONFLICT(team_id) DO UPDATE SET
                 bot_token = excluded.bot_token,
                 updated_at = excluded.updated_at",
        )
        .bind(team_id)
        .bind(bot_token)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn record_channel(
        &self,
        channel_id: &ChannelId,
        team_id: &str,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO slack_channel (channel_id, team_id, updated_at)
             VALUES (?, ?, ?)
             ON CONFLICT(channel_id) DO UPDATE SET
                 team_id = excluded.team_id,
                 updated_at = excluded.updated_at",
        )
        .bind(&channel_id.0)
        .bind(team_id)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn link_subscriber(
        &self,
        subscriber_id: &SubscriberId,
        team_id: &str,
        catalog_token: &str,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO subscriber (subscriber_id, team_id, catalog_token, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(subscriber_id) DO UPDATE SET
                 team_id = excluded.team_id,
                 catalog_token = excluded.catalog_token,
                 updated_at = excluded.updated_at",
        )
        .bind(&subscriber_id.0)
        .bind(team_id)
        .bind(catalog_token)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        debug!(
            event_name = "credential.subscriber.linked",
            subscriber_id = %subscriber_id,
            team_id,
            "subscriber linked"
        );
        Ok(())
    }

    /// Drops the stored data.world token. Returns whether one existed.
    pub async fn forget_subscriber(
        &self,
        subscriber_id: &SubscriberId,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM subscriber WHERE subscriber_id = ?")
            .bind(&subscriber_id.0)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl CredentialResolver for SqlCredentialRepository {
    async fn credential_for_channel(
        &self,
        channel_id: &ChannelId,
    ) -> Result<ChatCredential, CredentialError> {
        let row = sqlx::query(
            "SELECT t.bot_token
             FROM slack_channel c
             JOIN slack_team t ON t.team_id = c.team_id
             WHERE c.channel_id = ?",
        )
        .bind(&channel_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        if let Some(row) = row {
            let token: String =
                row.try_get("bot_token").map_err(|e| RepositoryError::Decode(e.to_string()))?;
            return Ok(ChatCredential::new(token));
        }

        self.default_bot_token
            .clone()
            .ok_or_else(|| CredentialError::UnknownChannel { channel_id: channel_id.clone() })
    }

    async fn credential_for_subscriber(
        &self,
        subscriber_id: &SubscriberId,
    ) -> Result<CatalogCredential, CredentialError> {
        let row = sqlx::query("SELECT catalog_token FROM subscriber WHERE subscriber_id = ?")
            .bind(&subscriber_id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        let Some(row) = row else {
            return Err(CredentialError::NotLinked { subscriber_id: subscriber_id.clone() });
        };
        let token: String =
            row.try_get("catalog_token").map_err(|e| RepositoryError::Decode(e.to_string()))?;
        Ok(CatalogCredential::new(token))
    }
}

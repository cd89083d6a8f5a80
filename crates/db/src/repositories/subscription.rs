use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use dwslack_core::domain::resource::ResourceKey;
use dwslack_core::domain::subscription::{ChannelId, SubscriberId, Subscription, UpsertOutcome};
use dwslack_core::errors::StoreError;
use dwslack_core::ports::SubscriptionStore;

use super::RepositoryError;
use crate::DbPool;

pub struct SqlSubscriptionStore {
    pool: DbPool,
}

impl SqlSubscriptionStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn count(&self) -> Result<i64, RepositoryError> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM subscription")
            .fetch_one(&self.pool)
            .await?;
        row.try_get("count").map_err(|e| RepositoryError::Decode(e.to_string()))
    }
}

fn row_to_subscription(row: &sqlx::sqlite::SqliteRow) -> Result<Subscription, RepositoryError> {
    let resource_key: String =
        row.try_get("resource_key").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let channel_id: String =
        row.try_get("channel_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let subscriber_id: String =
        row.try_get("subscriber_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at_str: String =
        row.try_get("created_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let created_at = DateTime::parse_from_rfc3339(&created_at_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("created_at `{created_at_str}`: {e}")))?;

    Ok(Subscription {
        resource_key: ResourceKey::new(resource_key),
        channel_id: ChannelId(channel_id),
        subscriber_id: SubscriberId(subscriber_id),
        created_at,
    })
}

#[async_trait]
impl SubscriptionStore for SqlSubscriptionStore {
    async fn find_by_resource_and_channel(
        &self,
        resource_key: &ResourceKey,
        channel_id: &ChannelId,
    ) -> Result<Option<Subscription>, StoreError> {
        let row = sqlx::query(
            "SELECT resource_key, channel_id, subscriber_id, created_at
             FROM subscription WHERE resource_key = ? AND channel_id = ?",
        )
        .bind(resource_key.as_str())
        .bind(&channel_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        match row {
            Some(ref r) => Ok(Some(row_to_subscription(r)?)),
            None => Ok(None),
        }
    }

    async fn find_all_by_resource(
        &self,
        resource_key: &ResourceKey,
    ) -> Result<Vec<Subscription>, StoreError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(
            "SELECT resource_key, channel_id, subscriber_id, created_at
             FROM subscription WHERE resource_key = ?
             ORDER BY created_at ASC, channel_id ASC",
        )
        .bind(resource_key.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(rows.iter().map(row_to_subscription).collect::<Result<Vec<_>, _>>()?)
    }

    async fn find_all_by_channel(
        &self,
        channel_id: &ChannelId,
    ) -> Result<Vec<Subscription>, StoreError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(
            "SELECT resource_key, channel_id, subscriber_id, created_at
             FROM subscription WHERE channel_id = ?
             ORDER BY resource_key ASC",
        )
        .bind(&channel_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(rows.iter().map(row_to_subscription).collect::<Result<Vec<_>, _>>()?)
    }

    async fn upsert(
        &self,
        resource_key: &ResourceKey,
        channel_id: &ChannelId,
        subscriber_id: &SubscriberId,
    ) -> Result<UpsertOutcome, StoreError> {
        // The fresh id only survives when the insert path wins the conflict.
        let candidate_id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        let row = sqlx::query(
            "INSERT INTO subscription
                 (id, resource_key, channel_id, subscriber_id, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(resource_key, channel_id) DO UPDATE SET
                 subscriber_id = excluded.subscriber_id,
                 updated_at = excluded.updated_at
             RETURNING id, resource_key, channel_id, subscriber_id, created_at",
        )
        .bind(&candidate_id)
        .bind(resource_key.as_str())
        .bind(&channel_id.0)
        .bind(&subscriber_id.0)
        .bind(&now)
        .bind(&now)
        .fetch_one(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        let stored_id: String =
            row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
        let subscription = row_to_subscription(&row)?;

        if stored_id == candidate_id {
            Ok(UpsertOutcome::Inserted(subscription))
        } else {
            Ok(UpsertOutcome::Updated(subscription))
        }
    }

    async fn delete(
        &self,
        resource_key: &ResourceKey,
        channel_id: &ChannelId,
    ) -> Result<bool, StoreError> {
        let result =
            sqlx::query("DELETE FROM subscription WHERE resource_key = ? AND channel_id = ?")
                .bind(resource_key.as_str())
                .bind(&channel_id.0)
                .execute(&self.pool)
                .await
                .map_err(RepositoryError::from)?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_all_for_subscriber(
        &self,
        subscriber_id: &SubscriberId,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM subscription WHERE subscriber_id = ?")
            .bind(&subscriber_id.0)
            .execute(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        Ok(result.rows_affected())
    }
}

use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

/// Number of forward migrations embedded in this build.
pub fn expected_count() -> usize {
    MIGRATOR.iter().filter(|migration| !migration.migration_type.is_down_migration()).count()
}

/// Successfully applied versions; empty when migrations never ran.
pub async fn applied_versions(pool: &DbPool) -> Result<Vec<i64>, sqlx::Error> {
    let tracked: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = '_sqlx_migrations'",
    )
    .fetch_one(pool)
    .await?;
    if tracked == 0 {
        return Ok(Vec::new());
    }

    sqlx::query_scalar("SELECT version FROM _sqlx_migrations WHERE success = 1 ORDER BY version")
        .fetch_all(pool)
        .await
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::{applied_versions, expected_count, run_pending};
    use crate::{connect_with_settings, migrations::MIGRATOR};

    const MANAGED_SCHEMA_OBJECTS: &[&str] = &[
        "subscription",
        "slack_team",
        "slack_channel",
        "subscriber",
        "idx_subscription_resource_key",
        "idx_subscription_channel_id",
        "idx_subscription_subscriber_id",
        "idx_slack_channel_team_id",
        "idx_subscriber_team_id",
    ];

    async fn table_count(pool: &sqlx::SqlitePool, table: &str) -> i64 {
        sqlx::query(
            "SELECT COUNT(*) AS count FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .bind(table)
        .fetch_one(pool)
        .await
        .expect("check table")
        .get::<i64, _>("count")
    }

    #[tokio::test]
    async fn migrations_create_baseline_tables() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        for table in ["subscription", "slack_team", "slack_channel", "subscriber"] {
            assert_eq!(table_count(&pool, table).await, 1, "missing table {table}");
        }
    }

    #[tokio::test]
    async fn applied_versions_track_migration_history() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        assert!(applied_versions(&pool).await.expect("history").is_empty());

        run_pending(&pool).await.expect("run migrations");

        assert_eq!(applied_versions(&pool).await.expect("history"), vec![1, 2]);
        assert_eq!(expected_count(), 2);
    }

    #[tokio::test]
    async fn subscription_pair_is_unique() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        let insert = "INSERT INTO subscription
                (id, resource_key, channel_id, subscriber_id, created_at, updated_at)
             VALUES (?, 'acme/widgets', 'C1', 'U1', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')";
        sqlx::query(insert).bind("first").execute(&pool).await.expect("first insert");
        let duplicate = sqlx::query(insert).bind("second").execute(&pool).await;

        assert!(duplicate.is_err(), "second row for the same pair must be rejected");
    }

    #[tokio::test]
    async fn undo_then_rerun_restores_identical_schema() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");
        let applied = schema_objects(&pool).await;
        assert_eq!(applied.len(), MANAGED_SCHEMA_OBJECTS.len());

        MIGRATOR.undo(&pool, 0).await.expect("undo migrations");
        assert!(schema_objects(&pool).await.is_empty(), "undo must drop every managed object");

        run_pending(&pool).await.expect("re-run migrations");
        assert_eq!(schema_objects(&pool).await, applied);
    }

    /// `(name, sql)` of each managed table and index, sorted by name.
    async fn schema_objects(pool: &sqlx::SqlitePool) -> Vec<(String, String)> {
        let rows = sqlx::query(
            "SELECT name, IFNULL(sql, '') AS sql FROM sqlite_master
             WHERE type IN ('table', 'index') ORDER BY name",
        )
        .fetch_all(pool)
        .await
        .expect("read sqlite_master");

        rows.into_iter()
            .map(|row| (row.get::<String, _>("name"), row.get::<String, _>("sql")))
            .filter(|(name, _)| MANAGED_SCHEMA_OBJECTS.contains(&name.as_str()))
            .collect()
    }
}

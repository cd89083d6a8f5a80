//! `GET /health`: ready only when the database answers and every embedded
//! migration has been applied.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use dwslack_db::{migrations, DbPool, SqlSubscriptionStore};
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Readiness {
    Ready,
    Degraded,
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: Readiness,
    pub schema_version: Option<i64>,
    pub subscriptions: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub problem: Option<String>,
    pub checked_at: DateTime<Utc>,
}

pub fn router(db_pool: DbPool) -> Router {
    Router::new().route("/health", get(health)).with_state(db_pool)
}

pub async fn health(State(pool): State<DbPool>) -> (StatusCode, Json<HealthReport>) {
    let report = inspect(&pool).await;
    let code = match report.status {
        Readiness::Ready => StatusCode::OK,
        Readiness::Degraded => StatusCode::SERVICE_UNAVAILABLE,
    };
    (code, Json(report))
}

async fn inspect(pool: &DbPool) -> HealthReport {
    let mut report = HealthReport {
        status: Readiness::Degraded,
        schema_version: None,
        subscriptions: None,
        problem: None,
        checked_at: Utc::now(),
    };

    let applied = match migrations::applied_versions(pool).await {
        Ok(applied) => applied,
        Err(error) => {
            report.problem = Some(format!("database unreachable: {error}"));
            return report;
        }
    };
    report.schema_version = applied.last().copied();

    let expected = migrations::expected_count();
    if applied.len() < expected {
        report.problem = Some(format!("{} of {expected} migrations applied", applied.len()));
        return report;
    }

    match SqlSubscriptionStore::new(pool.clone()).count().await {
        Ok(count) => {
            report.subscriptions = Some(count);
            report.status = Readiness::Ready;
        }
        Err(error) => report.problem = Some(format!("subscription table unreadable: {error}")),
    }
    report
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use axum::{extract::State, Json};
    use dwslack_db::{connect_with_settings, migrations};
    use serde_json::Value;
    use tower::ServiceExt;

    use super::{health, router, Readiness};

    #[tokio::test]
    async fn migrated_database_reports_ready() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");

        let response = router(pool.clone())
            .oneshot(Request::builder().uri("/health").body(Body::empty()).expect("request"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let payload: Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(payload["status"], "ready");
        assert_eq!(payload["schema_version"], 2);
        assert_eq!(payload["subscriptions"], 0);
        assert!(payload.get("problem").is_none());
        pool.close().await;
    }

    #[tokio::test]
    async fn unmigrated_database_is_degraded() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("connect");

        let (status, Json(report)) = health(State(pool.clone())).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(report.status, Readiness::Degraded);
        assert_eq!(report.schema_version, None);
        assert!(report.problem.as_deref().is_some_and(|problem| problem.contains("migrations")));
        pool.close().await;
    }

    #[tokio::test]
    async fn closed_pool_is_degraded() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("connect");
        pool.close().await;

        let (status, Json(report)) = health(State(pool)).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(report.problem.as_deref().is_some_and(|problem| problem.contains("unreachable")));
    }
}

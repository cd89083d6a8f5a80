use dwslack_core::config::{AppConfig, LoadOptions};
use dwslack_db::{connect_with_settings, migrations, DbPool};
use secrecy::ExposeSecret;
use serde::Serialize;
use serde_json::json;

use crate::commands::{CommandResult, EXIT_NOT_READY};

/// Slack signing secrets are 32 hex characters; anything much shorter was
/// almost certainly pasted incompletely.
const MIN_SIGNING_SECRET_LEN: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum Status {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct Check {
    name: &'static str,
    status: Status,
    details: String,
}

impl Check {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: Status::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: Status::Fail, details: details.into() }
    }

    fn skipped(name: &'static str, reason: &str) -> Self {
        Self { name, status: Status::Skipped, details: format!("skipped: {reason}") }
    }
}

pub fn run(json_output: bool) -> CommandResult {
    let checks = collect_checks();
    let ready = checks.iter().all(|check| check.status == Status::Pass);
    let exit_code = if ready { 0 } else { EXIT_NOT_READY };

    let output = if json_output {
        json!({
            "command": "doctor",
            "status": if ready { "ok" } else { "error" },
            "checks": checks,
        })
        .to_string()
    } else {
        render_text(ready, &checks)
    };

    CommandResult { exit_code, output }
}

fn collect_checks() -> Vec<Check> {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            let reason = "configuration did not load";
            return vec![
                Check::fail("config_validation", error.to_string()),
                Check::skipped("slack_credentials", reason),
                Check::skipped("database_connectivity", reason),
                Check::skipped("database_schema", reason),
            ];
        }
    };

    let mut checks = vec![
        Check::pass("config_validation", "configuration loaded and validated"),
        slack_credentials(&config),
    ];
    checks.extend(database_checks(&config));
    checks
}

fn slack_credentials(config: &AppConfig) -> Check {
    let secret_len = config.slack.signing_secret.expose_secret().trim().len();
    if secret_len < MIN_SIGNING_SECRET_LEN {
        Check::fail(
            "slack_credentials",
            format!("signing secret is only {secret_len} characters; copy it again from the app settings"),
        )
    } else {
        Check::pass("slack_credentials", "signing secret present and bot token is an xoxb- token")
    }
}

fn database_checks(config: &AppConfig) -> Vec<Check> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return vec![
                Check::fail("database_connectivity", format!("async runtime failed to start: {error}")),
                Check::skipped("database_schema", "no async runtime"),
            ];
        }
    };

    runtime.block_on(async {
        let connected = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await;
        let pool = match connected {
            Ok(pool) => pool,
            Err(error) => {
                return vec![
                    Check::fail("database_connectivity", format!("cannot open database: {error}")),
                    Check::skipped("database_schema", "database is unreachable"),
                ];
            }
        };

        let schema = schema_check(&pool).await;
        pool.close().await;
        vec![
            Check::pass("database_connectivity", format!("opened `{}`", config.database.url)),
            schema,
        ]
    })
}

async fn schema_check(pool: &DbPool) -> Check {
    let expected = migrations::expected_count();
    match migrations::applied_versions(pool).await {
        Ok(applied) if applied.len() >= expected => {
            Check::pass("database_schema", format!("{} migrations applied", applied.len()))
        }
        Ok(applied) => Check::fail(
            "database_schema",
            format!("{} of {expected} migrations applied; run `dwslack migrate`", applied.len()),
        ),
        Err(error) => {
            Check::fail("database_schema", format!("migration history is unreadable: {error}"))
        }
    }
}

fn render_text(ready: bool, checks: &[Check]) -> String {
    let headline = if ready { "doctor: ready" } else { "doctor: not ready" };
    let mut lines = vec![headline.to_owned()];
    lines.extend(checks.iter().map(|check| {
        let marker = match check.status {
            Status::Pass => "ok",
            Status::Fail => "fail",
            Status::Skipped => "skip",
        };
        format!("  [{marker}] {} - {}", check.name, check.details)
    }));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::{render_text, Check};

    #[test]
    fn text_report_marks_each_check() {
        let checks = vec![
            Check::pass("config_validation", "loaded"),
            Check::fail("database_connectivity", "cannot open database"),
            Check::skipped("database_schema", "database is unreachable"),
        ];

        let text = render_text(false, &checks);

        assert!(text.starts_with("doctor: not ready"));
        assert!(text.contains("[ok] config_validation - loaded"));
        assert!(text.contains("[fail] database_connectivity"));
        assert!(text.contains("[skip] database_schema - skipped: database is unreachable"));
    }
}

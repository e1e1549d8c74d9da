//! HTTP daemon: database setup, background schedules and the axum server.

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result, anyhow};
use chrono::FixedOffset;
use tokio::{net::TcpListener, task::JoinHandle};
use tracing::{info, warn};

use super::{admin, cli::AppConfig};
use crate::{
    api::{self, AppState},
    auth::random_secret,
    db::{DbPool, audit_sqlite_features, establish_pool, run_migrations},
    jobs::{
        JobRegistry,
        schedule::{daily_reminder_time, monthly_report_time, next_daily_run, next_month_end_run, run_schedule},
        tasks,
    },
    library::{Library, LibrarySettings},
    mail::{Mailer, OutboxMailer, SmtpMailer},
    reports::Renderer,
};

/// Serve the HTTP API until interrupted.
///
/// # Errors
///
/// Returns any failure reported while preparing the database, building the
/// mailer, or binding the socket.
pub async fn run_daemon(cfg: AppConfig) -> Result<()> {
    let pool = setup_database(&cfg.database).await?;
    let library = Library::new(pool, Renderer::discover()?, settings(&cfg)?);
    let mailer = mailer(&cfg)?;
    let schedules = spawn_schedules(&library, &mailer);

    let state = AppState {
        library,
        jobs: JobRegistry::new(),
        mailer,
    };
    let listener = TcpListener::bind(&cfg.bind)
        .await
        .with_context(|| format!("failed to bind {}", cfg.bind))?;
    info!(bind = %cfg.bind, "libra listening");

    let served = axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await;
    for schedule in schedules {
        schedule.abort();
    }
    info!("libra stopped");
    served.context("server failed")
}

/// Build the pool, audit SQLite and apply pending migrations.
async fn setup_database(database: &str) -> Result<DbPool> {
    let pool = establish_pool(database).await?;
    {
        let mut conn = pool.get().await.context("failed to get db connection")?;
        audit_sqlite_features(&mut conn).await?;
        run_migrations(&mut conn).await?;
    }
    Ok(pool)
}

fn settings(cfg: &AppConfig) -> Result<LibrarySettings> {
    let utc_offset = FixedOffset::east_opt(cfg.utc_offset_minutes.saturating_mul(60))
        .ok_or_else(|| anyhow!("utc offset out of range: {} minutes", cfg.utc_offset_minutes))?;
    let jwt_secret = cfg.jwt_secret.clone().unwrap_or_else(|| {
        warn!("no jwt secret configured; tokens will not survive a restart");
        random_secret()
    });
    Ok(LibrarySettings {
        data_dir: PathBuf::from(&cfg.data_dir),
        utc_offset,
        cache_capacity: cfg.cache_capacity,
        argon2: admin::argon2_from_config(cfg)?,
        jwt_secret: jwt_secret.into_bytes(),
    })
}

fn mailer(cfg: &AppConfig) -> Result<Arc<dyn Mailer>> {
    let Some(host) = cfg.smtp_host.as_deref() else {
        warn!("no smtp host configured; mail is kept in memory");
        return Ok(Arc::new(OutboxMailer::new()));
    };
    let smtp = SmtpMailer::new(
        host,
        cfg.smtp_username.as_deref(),
        cfg.smtp_password.as_deref(),
        &cfg.mail_from,
    )
    .with_context(|| format!("failed to configure smtp relay {host}"))?;
    Ok(Arc::new(smtp))
}

fn spawn_schedules(library: &Library, mailer: &Arc<dyn Mailer>) -> Vec<JoinHandle<()>> {
    let offset = library.utc_offset();
    let reminders = {
        let library = library.clone();
        let mailer = Arc::clone(mailer);
        tokio::spawn(run_schedule(
            "daily-reminders",
            offset,
            |now| next_daily_run(now, daily_reminder_time()),
            move || {
                let library = library.clone();
                let mailer = Arc::clone(&mailer);
                async move {
                    let summary = tasks::send_daily_reminders(&library, mailer.as_ref()).await?;
                    info!(login = summary.login, returns = summary.returns, "reminders sent");
                    Ok(())
                }
            },
        ))
    };
    let reports = {
        let library = library.clone();
        let mailer = Arc::clone(mailer);
        tokio::spawn(run_schedule(
            "monthly-reports",
            offset,
            |now| next_month_end_run(now, monthly_report_time()),
            move || {
                let library = library.clone();
                let mailer = Arc::clone(&mailer);
                async move {
                    let written = tasks::send_monthly_reports(&library, mailer.as_ref()).await?;
                    info!(reports = written.len(), "monthly reports sent");
                    Ok(())
                }
            },
        ))
    };
    vec![reminders, reports]
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    res = tokio::signal::ctrl_c() => {
                        if let Err(err) = res {
                            warn!(error = %err, "failed to listen for Ctrl-C");
                        }
                    },
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                wait_for_ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        wait_for_ctrl_c().await;
    }
    info!("shutdown signal received");
}

async fn wait_for_ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for Ctrl-C");
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use tempfile::TempDir;

    use super::*;

    #[rstest]
    #[case(330, 19_800)]
    #[case(0, 0)]
    #[case(-300, -18_000)]
    fn settings_convert_offset(#[case] minutes: i32, #[case] seconds: i32) {
        let cfg = AppConfig {
            utc_offset_minutes: minutes,
            jwt_secret: Some("secret".into()),
            ..AppConfig::default()
        };
        let settings = settings(&cfg).expect("settings");
        assert_eq!(settings.utc_offset.local_minus_utc(), seconds);
        assert_eq!(settings.jwt_secret, b"secret");
    }

    #[rstest]
    fn out_of_range_offset_is_rejected() {
        let cfg = AppConfig {
            utc_offset_minutes: 24 * 60,
            ..AppConfig::default()
        };
        assert!(settings(&cfg).is_err());
    }

    #[rstest]
    fn missing_secret_is_generated() {
        let cfg = AppConfig::default();
        let settings = settings(&cfg).expect("settings");
        assert_eq!(settings.jwt_secret.len(), 64);
    }

    #[rstest]
    #[tokio::test]
    async fn database_setup_is_repeatable() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("libra.db");
        let database = path.to_string_lossy();
        setup_database(&database).await.expect("first setup");
        setup_database(&database).await.expect("second setup");
    }
}

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fitrep_core::EntityKind;
use fitrep_storage::{PgPool, PoolConfig};
use fitrep_sync::{IngestConfig, TickOutcome};
use fitrep_web::{AppState, WebConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod report;

#[derive(Debug, Parser)]
#[command(name = "fitrep-cli")]
#[command(about = "Fitness club export ingestion and trainer reports")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Migrate, then run ingestion and the report server together.
    Run,
    /// Report server only.
    Serve,
    /// Ingestion only.
    Ingest {
        #[arg(long)]
        entity: Option<EntityKind>,
        /// Scan the drop folder once and exit.
        #[arg(long)]
        once: bool,
    },
    Migrate,
    /// Analysis exports (JSON or xlsx).
    Report {
        #[command(subcommand)]
        report: report::ReportCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let ingest = IngestConfig::from_env();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let pool = open_pool(&ingest).await?;
            fitrep_storage::migrate(&pool).await.context("applying migrations")?;
            let state = app_state(pool.clone())?;

            let tasks = EntityKind::ALL
                .iter()
                .map(|kind| fitrep_sync::ingest_task(*kind, pool.clone(), &ingest))
                .collect();
            let mut sched = fitrep_sync::start_scheduler(tasks, ingest.interval).await?;

            let listener = fitrep_web::bind(&WebConfig::from_env()).await?;
            fitrep_web::serve(listener, state, shutdown_signal()).await?;
            sched.shutdown().await.context("stopping scheduler")?;
        }
        Commands::Serve => {
            let pool = open_pool(&ingest).await?;
            let listener = fitrep_web::bind(&WebConfig::from_env()).await?;
            fitrep_web::serve(listener, app_state(pool)?, shutdown_signal()).await?;
        }
        Commands::Ingest { entity, once } => {
            let kinds: Vec<EntityKind> = match entity {
                Some(kind) => vec![kind],
                None => EntityKind::ALL.to_vec(),
            };
            let pool = open_pool(&ingest).await?;
            if once {
                for outcome in fitrep_sync::run_ingest_once(&kinds, pool, &ingest).await {
                    match outcome {
                        TickOutcome::Completed(summary) => println!(
                            "ingest complete: run_id={} entity={} files={} loaded={} failed={} rows={}",
                            summary.run_id,
                            summary.entity,
                            summary.files_seen,
                            summary.files_loaded,
                            summary.files_failed,
                            summary.rows_inserted
                        ),
                        TickOutcome::Failed => println!("ingest failed; see log"),
                        TickOutcome::Skipped => {}
                    }
                }
            } else {
                let tasks = kinds
                    .iter()
                    .map(|kind| fitrep_sync::ingest_task(*kind, pool.clone(), &ingest))
                    .collect();
                let mut sched = fitrep_sync::start_scheduler(tasks, ingest.interval).await?;
                shutdown_signal().await;
                sched.shutdown().await.context("stopping scheduler")?;
            }
        }
        Commands::Migrate => {
            let pool = open_pool(&ingest).await?;
            fitrep_storage::migrate(&pool).await.context("applying migrations")?;
            println!("migrations applied");
        }
        Commands::Report { report } => {
            let pool = open_pool(&ingest).await?;
            let rules = fitrep_sync::load_service_rules(&fitrep_sync::rules_path_from_env())?;
            report::run(report, &pool, &rules).await?;
        }
    }

    Ok(())
}

async fn open_pool(config: &IngestConfig) -> Result<PgPool> {
    fitrep_storage::connect(&config.database_url, &PoolConfig::default())
        .await
        .context("connecting to DATABASE_URL")
}

fn app_state(pool: PgPool) -> Result<AppState> {
    let rules = fitrep_sync::load_service_rules(&fitrep_sync::rules_path_from_env())?;
    Ok(AppState::new(pool, rules))
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown requested");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_means_run() {
        let cli = Cli::try_parse_from(["fitrep-cli"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn ingest_accepts_entity_and_once() {
        let cli = Cli::try_parse_from(["fitrep-cli", "ingest", "--entity", "sales", "--once"]).unwrap();
        match cli.command {
            Some(Commands::Ingest { entity, once }) => {
                assert_eq!(entity, Some(EntityKind::Sales));
                assert!(once);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn report_subcommands_parse_lists_and_dates() {
        let cli = Cli::try_parse_from([
            "fitrep-cli",
            "report",
            "conversion-months",
            "--year",
            "2024",
            "--months",
            "10,11,12",
            "--service-name",
            "Персональная тренировка в тренажерном зале",
            "--divisions",
            "Тренажерный зал",
            "--format",
            "xlsx",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Report {
                report: report::ReportCommand::ConversionMonths { months, days, any_trainer, .. },
            }) => {
                assert_eq!(months, vec![10, 11, 12]);
                assert_eq!(days, 60);
                assert!(!any_trainer);
            }
            other => panic!("unexpected command: {other:?}"),
        }

        assert!(Cli::try_parse_from([
            "fitrep-cli",
            "report",
            "testing-funnel",
            "--from",
            "2024-06-01",
            "--to",
            "2025-12-10",
        ])
        .is_ok());
        assert!(Cli::try_parse_from([
            "fitrep-cli",
            "report",
            "touch-sales",
            "--from",
            "01.10.2024",
            "--to",
            "2024-12-31",
        ])
        .is_err());
    }
}

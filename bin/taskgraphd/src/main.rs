use clap::{Parser, Subcommand};
use rootcause::prelude::Report;
use serde_json::Value as JsonValue;
use sqlx::postgres::PgPoolOptions;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use taskgraph_core::WorkflowId;
use taskgraph_executor::{BroadcastProgress, DefaultNodeExecutor, WorkflowRunner};
use taskgraph_store::WorkflowService;
use taskgraph_workflow::RunStatus;
use taskgraphd::commands::{self, parse_param};
use taskgraphd::config::DaemonConfig;
use taskgraphd::db::{PgRunJournal, PgWorkflowStore};
use taskgraphd::error::CliError;
use taskgraphd::invoke::StoreInvoker;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "taskgraphd", version, about = "Workflow graph engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check an interchange document and its graph
    Validate {
        /// Path to the workflow document
        file: PathBuf,
    },
    /// Print the static execution order of a document
    Order {
        /// Path to the workflow document
        file: PathBuf,
    },
    /// Execute a document locally
    Run {
        /// Path to the workflow document
        file: PathBuf,
        /// Run parameter as key=value; may be repeated
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, JsonValue)>,
    },
    /// Import a document into the database under fresh identities
    Import {
        /// Path to the workflow document
        file: PathBuf,
    },
    /// Export a stored workflow's document
    Export {
        /// Workflow ID
        workflow_id: WorkflowId,
        /// Write to this file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Show the latest run with a business ID and its log trail
    Status {
        /// Business ID the run was started with
        business_id: String,
    },
    /// List recorded runs of a job type, newest first
    Runs {
        /// Job type, e.g. the one scheduled runs are recorded under
        job_type: String,
    },
    /// Run scheduled workflows until interrupted
    Serve,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match execute(cli.command).await {
        Ok(code) => code,
        Err(report) => {
            eprintln!("error: {report}");
            ExitCode::FAILURE
        }
    }
}

async fn execute(command: Command) -> Result<ExitCode, Report<CliError>> {
    let config = DaemonConfig::from_env().map_err(CliError::from)?;
    let mut stdout = std::io::stdout().lock();

    match command {
        Command::Validate { file } => {
            let valid = commands::validate(&file, &mut stdout)?;
            Ok(if valid {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Order { file } => {
            commands::order(&file, &mut stdout)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Run { file, params } => {
            let report = commands::run(&file, params, &config.executor, &mut stdout).await?;
            Ok(if report.run.status == RunStatus::Completed {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Import { file } => {
            let (service, _) = connect(&config).await?;
            commands::import(&service, &file, &mut stdout).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Export { workflow_id, out } => {
            let (service, _) = connect(&config).await?;
            commands::export(&service, workflow_id, out.as_deref(), &mut stdout).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Status { business_id } => {
            let (_, pool) = connect(&config).await?;
            let journal = PgRunJournal::new(pool);
            let found = commands::status(&journal, &business_id, &mut stdout).await?;
            Ok(if found {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Runs { job_type } => {
            let (_, pool) = connect(&config).await?;
            let journal = PgRunJournal::new(pool);
            commands::runs(&journal, &job_type, &mut stdout).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Serve => {
            let (service, pool) = connect(&config).await?;
            let progress = Arc::new(BroadcastProgress::new(64));
            let mut events = progress.subscribe();
            tokio::spawn(async move {
                loop {
                    match events.recv().await {
                        Ok(event) => tracing::debug!(
                            run_id = %event.run_id,
                            business_id = %event.business_id,
                            percentage = event.percentage,
                            "{}",
                            event.message
                        ),
                        Err(RecvError::Lagged(missed)) => {
                            tracing::debug!(missed, "progress listener lagged");
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            });
            let runner = Arc::new(WorkflowRunner::new(
                Arc::new(DefaultNodeExecutor::new(&config.executor)),
                Arc::new(PgRunJournal::new(pool)),
                progress,
            ));
            let invoker = Arc::new(StoreInvoker::new(service.clone(), runner));

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::warn!(error = %e, "failed to listen for Ctrl-C");
                }
                tracing::info!("shutdown requested");
                on_signal.cancel();
            });

            commands::serve(&service, invoker, &config.scheduler, cancel).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn connect(
    config: &DaemonConfig,
) -> Result<(WorkflowService, sqlx::PgPool), Report<CliError>> {
    let url = config
        .database_url
        .as_deref()
        .ok_or(CliError::MissingDatabaseUrl)?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(url)
        .await
        .map_err(CliError::from)?;

    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(CliError::from)?;

    let service = WorkflowService::new(Arc::new(PgWorkflowStore::new(pool.clone())));
    Ok((service, pool))
}

//! Subcommand implementations.
//!
//! Each command writes its human-readable output to `out` and returns what
//! `main` needs to pick an exit code.

use crate::error::CliError;
use rootcause::prelude::Report;
use serde_json::Value as JsonValue;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use taskgraph_core::WorkflowId;
use taskgraph_executor::{
    DefaultNodeExecutor, ExecutorConfig, InMemoryJournal, NoProgress, RunJournal, RunReport,
    WorkflowRunner,
};
use taskgraph_scheduler::{JobScheduler, SchedulerConfig, TokioJobScheduler, WorkflowInvoker};
use taskgraph_store::WorkflowService;
use taskgraph_workflow::xml::{from_document, validate_document};
use taskgraph_workflow::{ImportError, RunRequest, ValidationReport, Workflow, static_order};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Job type of runs started from the command line.
pub const CLI_JOB_TYPE: &str = "cli";

/// Parses a `key=value` run parameter. The value is read as JSON when it
/// parses, and as a plain string otherwise.
pub fn parse_param(raw: &str) -> Result<(String, JsonValue), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing parameter name in '{raw}'"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| JsonValue::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn read_document(path: &Path) -> Result<String, Report<CliError>> {
    std::fs::read_to_string(path).map_err(|e| CliError::io(path, &e).into())
}

fn load_workflow(path: &Path) -> Result<Workflow, Report<CliError>> {
    let document = read_document(path)?;
    Ok(from_document(&document).map_err(CliError::from)?)
}

/// Checks a document and its graph, printing errors and warnings.
///
/// Returns whether the workflow is valid. Warnings don't make it invalid.
pub fn validate(path: &Path, out: &mut impl Write) -> Result<bool, Report<CliError>> {
    let document = read_document(path)?;
    if let Err(e) = validate_document(&document) {
        writeln!(out, "invalid document: {e}").map_err(CliError::from)?;
        return Ok(false);
    }
    let workflow = match from_document(&document) {
        Ok(workflow) => workflow,
        Err(e) => {
            writeln!(out, "invalid workflow: {e}").map_err(CliError::from)?;
            return Ok(false);
        }
    };

    let report = ValidationReport::for_workflow(&workflow);
    for error in &report.errors {
        writeln!(out, "error: {error}").map_err(CliError::from)?;
    }
    for warning in &report.warnings {
        writeln!(out, "warning: {warning}").map_err(CliError::from)?;
    }
    if report.is_valid() {
        writeln!(
            out,
            "{}: valid ({} nodes, {} edges)",
            workflow.name(),
            workflow.graph.node_count(),
            workflow.graph.edge_count()
        )
        .map_err(CliError::from)?;
    }
    Ok(report.is_valid())
}

/// Prints the static execution order of a document's graph.
pub fn order(path: &Path, out: &mut impl Write) -> Result<(), Report<CliError>> {
    let workflow = load_workflow(path)?;
    let nodes = static_order(&workflow.graph)
        .map_err(|e| CliError::Document(ImportError::from(e)))?;
    for (index, node) in nodes.iter().enumerate() {
        writeln!(out, "{}. {} ({})", index + 1, node.name, node.node_type())
            .map_err(CliError::from)?;
    }
    Ok(())
}

/// Executes a document locally and prints each node's status.
pub async fn run(
    path: &Path,
    params: Vec<(String, JsonValue)>,
    config: &ExecutorConfig,
    out: &mut impl Write,
) -> Result<RunReport, Report<CliError>> {
    let workflow = load_workflow(path)?;
    let mut request = RunRequest::new(CLI_JOB_TYPE);
    for (key, value) in params {
        request = request.with_parameter(key, value);
    }

    let runner = WorkflowRunner::new(
        Arc::new(DefaultNodeExecutor::new(config)),
        Arc::new(InMemoryJournal::new()),
        Arc::new(NoProgress),
    );
    let report = runner
        .run(&workflow, request)
        .await
        .map_err(|report| report.context(CliError::Run))?;

    for node in &report.nodes {
        let status = node.status.as_str();
        let written = match &node.error {
            Some(error) => writeln!(out, "{status:<9} {}: {error}", node.node_name),
            None => writeln!(out, "{status:<9} {}", node.node_name),
        };
        written.map_err(CliError::from)?;
    }
    writeln!(
        out,
        "run {}: {}",
        report.run.business_id,
        report.run.status.as_str()
    )
    .map_err(CliError::from)?;
    if let Some(error) = &report.run.error {
        writeln!(out, "error: {error}").map_err(CliError::from)?;
    }
    Ok(report)
}

/// Imports a document into the store under fresh identities.
pub async fn import(
    service: &WorkflowService,
    path: &Path,
    out: &mut impl Write,
) -> Result<Workflow, Report<CliError>> {
    let document = read_document(path)?;
    let workflow = service
        .import_document(&document)
        .await
        .map_err(|report| report.context(CliError::Store))?;
    writeln!(out, "imported '{}' as {}", workflow.name(), workflow.id).map_err(CliError::from)?;
    Ok(workflow)
}

/// Writes a stored workflow's snapshot to `target`, or to `out` when no
/// target is given.
pub async fn export(
    service: &WorkflowService,
    workflow_id: WorkflowId,
    target: Option<&Path>,
    out: &mut impl Write,
) -> Result<(), Report<CliError>> {
    let document = service
        .export_document(workflow_id)
        .await
        .map_err(|report| report.context(CliError::Store))?;
    match target {
        Some(path) => {
            std::fs::write(path, &document).map_err(|e| CliError::io(path, &e))?;
            writeln!(out, "exported {workflow_id} to {}", path.display())
                .map_err(CliError::from)?;
        }
        None => writeln!(out, "{document}").map_err(CliError::from)?,
    }
    Ok(())
}

/// Prints the latest run with `business_id` and the log trail of its runs.
///
/// Returns whether such a run was found.
pub async fn status(
    journal: &dyn RunJournal,
    business_id: &str,
    out: &mut impl Write,
) -> Result<bool, Report<CliError>> {
    let Some(run) = journal
        .find_run_by_business_id(business_id)
        .await
        .map_err(CliError::from)?
    else {
        writeln!(out, "no run with business id '{business_id}'").map_err(CliError::from)?;
        return Ok(false);
    };

    writeln!(
        out,
        "run {} ({}): {}",
        run.business_id,
        run.job_type,
        run.status.as_str()
    )
    .map_err(CliError::from)?;
    if let Some(error) = &run.error {
        writeln!(out, "error: {error}").map_err(CliError::from)?;
    }
    let logs = journal
        .logs_for_business_id(business_id)
        .await
        .map_err(CliError::from)?;
    for entry in &logs {
        writeln!(
            out,
            "{} {:<7} [{}] {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.level.as_str(),
            entry.step,
            entry.message
        )
        .map_err(CliError::from)?;
    }
    Ok(true)
}

/// Lists runs of a job type, newest first.
pub async fn runs(
    journal: &dyn RunJournal,
    job_type: &str,
    out: &mut impl Write,
) -> Result<usize, Report<CliError>> {
    let runs = journal
        .runs_by_job_type(job_type)
        .await
        .map_err(CliError::from)?;
    for run in &runs {
        writeln!(
            out,
            "{} {:<9} {}",
            run.created_at.format("%Y-%m-%d %H:%M:%S"),
            run.status.as_str(),
            run.business_id
        )
        .map_err(CliError::from)?;
    }
    Ok(runs.len())
}

/// Registers the recurring schedule of every active scheduled workflow and
/// records its next run time. Returns how many were registered.
///
/// A workflow whose cron expression is refused is logged and skipped.
pub async fn register_schedules(
    service: &WorkflowService,
    scheduler: &impl JobScheduler,
) -> Result<usize, Report<CliError>> {
    let summaries = service
        .list_workflows(true)
        .await
        .map_err(|report| report.context(CliError::Store))?;

    let mut registered = 0;
    for summary in summaries.iter().filter(|s| s.enable_schedule) {
        let workflow = service
            .get_workflow(summary.id)
            .await
            .map_err(|report| report.context(CliError::Store))?;
        let Some(expression) = workflow.schedule() else {
            continue;
        };
        match scheduler.register_recurring(workflow.id, expression).await {
            Ok(next) => {
                registered += 1;
                service
                    .record_schedule(workflow.id, None, Some(next))
                    .await
                    .map_err(|report| report.context(CliError::Store))?;
            }
            Err(report) => {
                warn!(
                    workflow_id = %workflow.id,
                    error = %report.current_context(),
                    "schedule not registered"
                );
            }
        }
    }
    Ok(registered)
}

/// Runs scheduled workflows until `cancel` fires.
pub async fn serve(
    service: &WorkflowService,
    invoker: Arc<dyn WorkflowInvoker>,
    config: &SchedulerConfig,
    cancel: CancellationToken,
) -> Result<(), Report<CliError>> {
    let scheduler = TokioJobScheduler::start(config, invoker, cancel.clone());
    let registered = match register_schedules(service, &scheduler).await {
        Ok(registered) => registered,
        Err(report) => {
            scheduler.shutdown().await;
            return Err(report);
        }
    };

    info!(registered, "scheduler running");
    cancel.cancelled().await;
    scheduler.shutdown().await;
    info!("scheduler stopped");
    Ok(())
}

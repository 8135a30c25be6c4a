//! In-process job scheduler on the tokio runtime.
//!
//! Each recurring registration owns a timer task that, when its schedule
//! fires, pushes a run onto a shared FIFO queue. A single worker drains the
//! queue, so runs never overlap. Shutdown goes through a
//! [`CancellationToken`]; registrations use child tokens of it.

use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::job::{JobScheduler, SCHEDULED_JOB_TYPE, WorkflowInvoker};
use crate::schedule::CronSchedule;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rootcause::prelude::Report;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use taskgraph_core::{JobId, WorkflowId};
use taskgraph_workflow::RunRequest;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

struct QueuedJob {
    id: JobId,
    workflow_id: WorkflowId,
    request: RunRequest,
}

struct Recurring {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct Shared {
    invoker: Arc<dyn WorkflowInvoker>,
    queue: Mutex<VecDeque<QueuedJob>>,
    ready: Notify,
    capacity: usize,
    cancel: CancellationToken,
}

impl Shared {
    async fn push(
        &self,
        workflow_id: WorkflowId,
        request: RunRequest,
    ) -> Result<JobId, SchedulerError> {
        if self.cancel.is_cancelled() {
            return Err(SchedulerError::ShutDown);
        }
        let mut queue = self.queue.lock().await;
        if queue.len() >= self.capacity {
            return Err(SchedulerError::QueueFull {
                capacity: self.capacity,
            });
        }
        let id = JobId::new();
        queue.push_back(QueuedJob {
            id,
            workflow_id,
            request,
        });
        drop(queue);
        self.ready.notify_one();
        Ok(id)
    }
}

/// A [`JobScheduler`] running in the current tokio runtime.
pub struct TokioJobScheduler {
    shared: Arc<Shared>,
    recurring: Mutex<HashMap<WorkflowId, Recurring>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for TokioJobScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokioJobScheduler")
            .field("capacity", &self.shared.capacity)
            .finish_non_exhaustive()
    }
}

impl TokioJobScheduler {
    /// Starts the queue worker. Must be called inside a tokio runtime.
    #[must_use]
    pub fn start(
        config: &SchedulerConfig,
        invoker: Arc<dyn WorkflowInvoker>,
        cancel: CancellationToken,
    ) -> Self {
        let shared = Arc::new(Shared {
            invoker,
            queue: Mutex::new(VecDeque::new()),
            ready: Notify::new(),
            capacity: config.queue_capacity.max(1),
            cancel,
        });
        let worker = tokio::spawn(drain(Arc::clone(&shared)));

        Self {
            shared,
            recurring: Mutex::new(HashMap::new()),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Number of runs waiting to start.
    pub async fn queued(&self) -> usize {
        self.shared.queue.lock().await.len()
    }

    /// Stops every timer and the worker, waiting for a running job to finish.
    /// Queued jobs are dropped.
    pub async fn shutdown(&self) {
        self.shared.cancel.cancel();
        let registrations: Vec<Recurring> = self
            .recurring
            .lock()
            .await
            .drain()
            .map(|(_, recurring)| recurring)
            .collect();
        for recurring in registrations {
            recurring.cancel.cancel();
            if let Err(e) = recurring.handle.await {
                warn!(error = %e, "schedule task ended abnormally");
            }
        }
        let worker = self.worker.lock().await.take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!(error = %e, "job worker ended abnormally");
            }
        }
        let dropped = self.shared.queue.lock().await.drain(..).count();
        info!(dropped, "scheduler stopped");
    }
}

#[async_trait]
impl JobScheduler for TokioJobScheduler {
    async fn register_recurring(
        &self,
        workflow_id: WorkflowId,
        cron_expression: &str,
    ) -> Result<DateTime<Utc>, Report<SchedulerError>> {
        if self.shared.cancel.is_cancelled() {
            return Err(SchedulerError::ShutDown.into());
        }
        let schedule = CronSchedule::parse(cron_expression).map_err(SchedulerError::from)?;
        let next = schedule.next_from_now().map_err(SchedulerError::from)?;

        let cancel = self.shared.cancel.child_token();
        let handle = tokio::spawn(recur(
            Arc::clone(&self.shared),
            workflow_id,
            schedule,
            cancel.clone(),
        ));

        let previous = self
            .recurring
            .lock()
            .await
            .insert(workflow_id, Recurring { cancel, handle });
        if let Some(previous) = previous {
            previous.cancel.cancel();
            debug!(workflow_id = %workflow_id, "replaced recurring schedule");
        }
        info!(workflow_id = %workflow_id, cron = %cron_expression, next = %next, "recurring schedule registered");
        Ok(next)
    }

    async fn unregister(&self, workflow_id: WorkflowId) -> bool {
        match self.recurring.lock().await.remove(&workflow_id) {
            Some(recurring) => {
                recurring.cancel.cancel();
                info!(workflow_id = %workflow_id, "recurring schedule removed");
                true
            }
            None => false,
        }
    }

    async fn enqueue(
        &self,
        workflow_id: WorkflowId,
        request: RunRequest,
    ) -> Result<JobId, Report<SchedulerError>> {
        let job_id = self.shared.push(workflow_id, request).await?;
        debug!(job_id = %job_id, workflow_id = %workflow_id, "job queued");
        Ok(job_id)
    }

    async fn cancel(&self, job_id: JobId) -> bool {
        let mut queue = self.shared.queue.lock().await;
        match queue.iter().position(|job| job.id == job_id) {
            Some(position) => {
                queue.remove(position);
                info!(job_id = %job_id, "queued job cancelled");
                true
            }
            None => false,
        }
    }
}

async fn drain(shared: Arc<Shared>) {
    loop {
        if shared.cancel.is_cancelled() {
            break;
        }
        let next = shared.queue.lock().await.pop_front();
        let Some(job) = next else {
            tokio::select! {
                () = shared.ready.notified() => {}
                () = shared.cancel.cancelled() => break,
            }
            continue;
        };

        info!(job_id = %job.id, workflow_id = %job.workflow_id, "job started");
        match shared.invoker.invoke(job.workflow_id, job.request).await {
            Ok(status) => {
                info!(job_id = %job.id, status = status.as_str(), "job finished");
            }
            Err(e) => error!(job_id = %job.id, error = %e, "job could not run"),
        }
    }
}

async fn recur(
    shared: Arc<Shared>,
    workflow_id: WorkflowId,
    schedule: CronSchedule,
    cancel: CancellationToken,
) {
    let mut after = Utc::now();
    loop {
        let Some(fire_at) = schedule.next_after(after) else {
            warn!(workflow_id = %workflow_id, cron = %schedule.expression(), "schedule has no further occurrences");
            break;
        };
        let delay = (fire_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);

        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = cancel.cancelled() => break,
        }

        let next = schedule.next_after(fire_at);
        shared.invoker.schedule_fired(workflow_id, fire_at, next).await;

        let request = RunRequest::new(SCHEDULED_JOB_TYPE)
            .with_description(format!("cron {}", schedule.expression()));
        match shared.push(workflow_id, request).await {
            Ok(job_id) => info!(workflow_id = %workflow_id, job_id = %job_id, "schedule fired"),
            Err(e) => warn!(workflow_id = %workflow_id, error = %e, "scheduled run not queued"),
        }
        after = fire_at.max(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InvokeError;
    use taskgraph_workflow::RunStatus;
    use tokio::sync::{Semaphore, mpsc};

    struct Recorder {
        started: mpsc::UnboundedSender<(WorkflowId, RunRequest)>,
        gate: Option<Arc<Semaphore>>,
    }

    #[async_trait]
    impl WorkflowInvoker for Recorder {
        async fn invoke(
            &self,
            workflow_id: WorkflowId,
            request: RunRequest,
        ) -> Result<RunStatus, InvokeError> {
            self.started.send((workflow_id, request)).unwrap();
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
            Ok(RunStatus::Completed)
        }
    }

    fn scheduler(
        capacity: usize,
        gate: Option<Arc<Semaphore>>,
    ) -> (
        TokioJobScheduler,
        mpsc::UnboundedReceiver<(WorkflowId, RunRequest)>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let config = SchedulerConfig {
            queue_capacity: capacity,
        };
        let invoker = Arc::new(Recorder { started: tx, gate });
        (
            TokioJobScheduler::start(&config, invoker, CancellationToken::new()),
            rx,
        )
    }

    async fn next_started(
        rx: &mut mpsc::UnboundedReceiver<(WorkflowId, RunRequest)>,
    ) -> (WorkflowId, RunRequest) {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn queued_jobs_run_in_order() {
        let (scheduler, mut rx) = scheduler(8, None);
        let first = WorkflowId::new();
        let second = WorkflowId::new();

        scheduler.enqueue(first, RunRequest::new("manual")).await.unwrap();
        scheduler.enqueue(second, RunRequest::new("manual")).await.unwrap();

        assert_eq!(next_started(&mut rx).await.0, first);
        assert_eq!(next_started(&mut rx).await.0, second);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn cancel_only_before_start() {
        let gate = Arc::new(Semaphore::new(0));
        let (scheduler, mut rx) = scheduler(8, Some(Arc::clone(&gate)));
        let running = scheduler
            .enqueue(WorkflowId::new(), RunRequest::new("a"))
            .await
            .unwrap();
        next_started(&mut rx).await;

        let waiting = scheduler
            .enqueue(WorkflowId::new(), RunRequest::new("b"))
            .await
            .unwrap();
        assert!(scheduler.cancel(waiting).await);
        assert!(!scheduler.cancel(waiting).await);
        assert!(!scheduler.cancel(running).await);
        assert_eq!(scheduler.queued().await, 0);

        gate.add_permits(8);
        scheduler
            .enqueue(WorkflowId::new(), RunRequest::new("c"))
            .await
            .unwrap();
        assert_eq!(next_started(&mut rx).await.1.job_type, "c");
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn full_queue_rejects_jobs() {
        let gate = Arc::new(Semaphore::new(0));
        let (scheduler, mut rx) = scheduler(1, Some(Arc::clone(&gate)));
        scheduler
            .enqueue(WorkflowId::new(), RunRequest::new("a"))
            .await
            .unwrap();
        next_started(&mut rx).await;
        scheduler
            .enqueue(WorkflowId::new(), RunRequest::new("b"))
            .await
            .unwrap();

        let err = scheduler
            .enqueue(WorkflowId::new(), RunRequest::new("c"))
            .await
            .unwrap_err();
        assert_eq!(
            err.current_context(),
            &SchedulerError::QueueFull { capacity: 1 }
        );
        gate.add_permits(8);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn recurring_schedule_queues_runs() {
        let (scheduler, mut rx) = scheduler(8, None);
        let workflow_id = WorkflowId::new();

        let next = scheduler
            .register_recurring(workflow_id, "* * * * * *")
            .await
            .unwrap();
        assert!(next > Utc::now() - chrono::Duration::seconds(1));

        let (fired, request) = next_started(&mut rx).await;
        assert_eq!(fired, workflow_id);
        assert_eq!(request.job_type, SCHEDULED_JOB_TYPE);

        assert!(scheduler.unregister(workflow_id).await);
        assert!(!scheduler.unregister(workflow_id).await);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn invalid_cron_is_rejected() {
        let (scheduler, _rx) = scheduler(8, None);
        let err = scheduler
            .register_recurring(WorkflowId::new(), "not a cron")
            .await
            .unwrap_err();
        assert!(matches!(err.current_context(), SchedulerError::Schedule(_)));
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn shut_down_scheduler_refuses_work() {
        let (scheduler, _rx) = scheduler(8, None);
        scheduler.shutdown().await;

        let err = scheduler
            .enqueue(WorkflowId::new(), RunRequest::new("late"))
            .await
            .unwrap_err();
        assert_eq!(err.current_context(), &SchedulerError::ShutDown);
    }
}

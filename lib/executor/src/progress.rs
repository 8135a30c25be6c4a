//! Progress notifications for run subscribers.

use taskgraph_workflow::ProgressEvent;
use tokio::sync::broadcast;
use tracing::trace;

/// Receives status transitions of runs. Publishing never blocks a run.
pub trait ProgressSink: Send + Sync {
    fn publish(&self, event: ProgressEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn publish(&self, _event: ProgressEvent) {}
}

/// Fans events out to any number of subscribers.
///
/// Events published with no subscriber attached are dropped, and slow
/// subscribers see a lag error rather than holding up the run.
#[derive(Debug, Clone)]
pub struct BroadcastProgress {
    sender: broadcast::Sender<ProgressEvent>,
}

impl BroadcastProgress {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }
}

impl ProgressSink for BroadcastProgress {
    fn publish(&self, event: ProgressEvent) {
        if self.sender.send(event).is_err() {
            trace!("progress event dropped, no subscribers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskgraph_core::WorkflowId;
    use taskgraph_workflow::{ProgressKind, RunRequest, WorkflowRun};

    #[tokio::test]
    async fn subscribers_receive_events() {
        let progress = BroadcastProgress::new(8);
        let mut rx = progress.subscribe();
        let run = WorkflowRun::new(WorkflowId::new(), 1, RunRequest::new("sync"));

        progress.publish(ProgressEvent::new(&run, ProgressKind::Started, 0, "started"));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, ProgressKind::Started);
        assert_eq!(event.business_id, run.business_id);
    }

    #[test]
    fn publishing_without_subscribers_is_silent() {
        let progress = BroadcastProgress::new(1);
        let run = WorkflowRun::new(WorkflowId::new(), 1, RunRequest::new("sync"));
        progress.publish(ProgressEvent::new(&run, ProgressKind::Completed, 100, "done"));
    }
}

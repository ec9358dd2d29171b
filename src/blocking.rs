//! Hosting blocking work off the async executor with progress reporting.

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::archive::Progress;

/// A progress notification from a [`BlockingTask`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Begin(usize),
    Step(String),
}

/// [`Progress`] that forwards into a channel.
#[derive(Debug, Clone)]
pub struct ChannelProgress {
    sender: UnboundedSender<ProgressEvent>,
}

impl Progress for ChannelProgress {
    fn begin(&self, total: usize) {
        let _ = self.sender.send(ProgressEvent::Begin(total));
    }

    fn step(&self, entry: &str) {
        let _ = self.sender.send(ProgressEvent::Step(entry.to_string()));
    }
}

/// A blocking job running on tokio's blocking pool.
pub struct BlockingTask<T> {
    events: UnboundedReceiver<ProgressEvent>,
    handle: JoinHandle<T>,
}

impl<T: Send + 'static> BlockingTask<T> {
    /// Start `job`, handing it a [`Progress`] that feeds this task's events.
    pub fn spawn<F>(job: F) -> Self
    where
        F: FnOnce(&dyn Progress) -> T + Send + 'static,
    {
        let (sender, events) = mpsc::unbounded_channel();
        let handle = tokio::task::spawn_blocking(move || {
            let progress = ChannelProgress { sender };
            job(&progress)
        });
        Self { events, handle }
    }

    /// Feed every progress event to `on_event` until the job ends, then
    /// return its result.
    pub async fn run(mut self, mut on_event: impl FnMut(ProgressEvent)) -> anyhow::Result<T> {
        // The sender lives inside the job, so the channel closes when it ends.
        while let Some(event) = self.events.recv().await {
            on_event(event);
        }
        self.handle
            .await
            .map_err(|e| anyhow::anyhow!("Blocking task failed: {}", e))
    }
}

use std::panic::{catch_unwind, AssertUnwindSafe};
use tokio::sync::{mpsc, oneshot};

/// A unit of log-database work.
pub(crate) type LogTask = Box<dyn FnOnce() -> anyhow::Result<()> + Send>;

enum Command {
    Run(LogTask),
    /// Barrier: replies with the first error observed since the previous
    /// barrier and resets it.
    Sync(oneshot::Sender<Option<anyhow::Error>>),
    /// Drains everything enqueued before it, then stops the consumer.
    Close(oneshot::Sender<()>),
}

/// Runs log-database tasks sequentially behind the main processing path.
///
/// Tasks execute strictly in submission order on a single consumer. Once a
/// task fails, subsequent tasks are skipped until the next [`sync`] call
/// acknowledges the retained error; this keeps a half-failed write plan
/// from being extended. A panicking task counts as a failed one.
///
/// [`sync`]: LogWorkerHandle::sync
pub(crate) struct LogWorker {
    command_receiver: mpsc::Receiver<Command>,
    retained_error: Option<anyhow::Error>,
}

impl LogWorker {
    /// Spawns the consumer on the blocking pool. Must be called within a
    /// tokio runtime.
    pub(crate) fn spawn() -> LogWorkerHandle {
        let (command_sender, command_receiver) = mpsc::channel(128);
        let worker = LogWorker {
            command_receiver,
            retained_error: None,
        };
        tokio::task::spawn_blocking(move || worker.run());
        LogWorkerHandle { command_sender }
    }

    fn run(mut self) {
        let close_reply = loop {
            match self.command_receiver.blocking_recv() {
                None => break None,
                Some(Command::Run(task)) => {
                    if self.retained_error.is_some() {
                        continue;
                    }
                    self.retained_error = match catch_unwind(AssertUnwindSafe(task)) {
                        Ok(Ok(())) => None,
                        Ok(Err(err)) => Some(err),
                        Err(_) => Some(anyhow::anyhow!("log task panicked")),
                    };
                }
                Some(Command::Sync(reply)) => {
                    if reply.send(self.retained_error.take()).is_err() {
                        tracing::trace!("log worker sync reply receiver dropped");
                    }
                }
                Some(Command::Close(reply)) => break Some(reply),
            }
        };
        // Reply only after the channel is gone so a post-close submission
        // cannot race the shutdown.
        drop(self.command_receiver);
        if let Some(reply) = close_reply {
            let _ = reply.send(());
        }
        tracing::trace!("stopping log worker");
    }
}

#[derive(Clone)]
pub(crate) struct LogWorkerHandle {
    command_sender: mpsc::Sender<Command>,
}

impl LogWorkerHandle {
    /// Enqueues a task. Does not wait for it to run.
    pub(crate) async fn run(&self, task: LogTask) -> anyhow::Result<()> {
        self.command_sender
            .send(Command::Run(task))
            .await
            .map_err(|_| anyhow::anyhow!("log worker is gone"))
    }

    /// Waits until all previously enqueued tasks have completed and
    /// returns the first error observed since the previous sync.
    pub(crate) async fn sync(&self) -> anyhow::Result<()> {
        let (reply_sender, reply_receiver) = oneshot::channel();
        self.command_sender
            .send(Command::Sync(reply_sender))
            .await
            .map_err(|_| anyhow::anyhow!("log worker is gone"))?;
        match reply_receiver.await {
            Ok(None) => Ok(()),
            Ok(Some(err)) => Err(err),
            Err(_) => Err(anyhow::anyhow!("log worker is gone")),
        }
    }

    /// Signals shutdown and waits for in-flight tasks to drain.
    pub(crate) async fn close(&self) {
        let (reply_sender, reply_receiver) = oneshot::channel();
        if self
            .command_sender
            .send(Command::Close(reply_sender))
            .await
            .is_err()
        {
            return;
        }
        let _ = reply_receiver.await;
    }
}

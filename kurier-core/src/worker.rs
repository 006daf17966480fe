//! Async worker loop
//!
//! The sender itself is single-threaded state; the worker owns it and
//! serializes access behind a command channel. Hosts hold a cheap
//! cloneable [`SenderHandle`] and never observe errors from it, a full
//! channel or a dead worker just drops the command on the floor with a
//! debug log.

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::sender::TelemetrySender;
use crate::types::{FlushTrigger, LifecycleSignal, TelemetryRecord};

const COMMAND_BUFFER: usize = 256;

#[derive(Debug)]
pub enum SenderCommand {
    Record(TelemetryRecord),
    Signal(LifecycleSignal),
    Flush,
    Shutdown,
}

/// Cloneable host-facing handle to the worker.
#[derive(Clone)]
pub struct SenderHandle {
    tx: mpsc::Sender<SenderCommand>,
}

impl SenderHandle {
    pub async fn record(&self, record: TelemetryRecord) {
        if self.tx.send(SenderCommand::Record(record)).await.is_err() {
            tracing::debug!("Sender worker gone, dropping record");
        }
    }

    /// Non-blocking variant for sync call sites. Returns false when the
    /// command buffer is full or the worker is gone.
    pub fn try_record(&self, record: TelemetryRecord) -> bool {
        match self.tx.try_send(SenderCommand::Record(record)) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(error = %e, "Dropping record");
                false
            }
        }
    }

    pub async fn signal(&self, signal: LifecycleSignal) {
        if self.tx.send(SenderCommand::Signal(signal)).await.is_err() {
            tracing::debug!("Sender worker gone, dropping signal");
        }
    }

    pub async fn flush(&self) {
        let _ = self.tx.send(SenderCommand::Flush).await;
    }

    /// Ask the worker to run its teardown flush and exit.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(SenderCommand::Shutdown).await;
    }
}

/// Owns the sender and drives it from commands and the flush timer.
pub struct SenderWorker {
    sender: TelemetrySender,
    rx: mpsc::Receiver<SenderCommand>,
}

/// Split a sender into a handle for the host and a worker to spawn.
pub fn channel(sender: TelemetrySender) -> (SenderHandle, SenderWorker) {
    let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
    (SenderHandle { tx }, SenderWorker { sender, rx })
}

impl SenderWorker {
    /// Run until shutdown. Restores the previous session's offline
    /// records first, then serves commands and timer wakeups.
    pub async fn run(mut self) {
        self.sender.restore_on_startup().await;

        loop {
            let timer = flush_timer(self.sender.next_flush_due());

            tokio::select! {
                command = self.rx.recv() => match command {
                    Some(SenderCommand::Record(record)) => {
                        self.sender.admit(record).await;
                    }
                    Some(SenderCommand::Signal(signal)) => {
                        self.sender.handle_signal(signal).await;
                    }
                    Some(SenderCommand::Flush) => {
                        self.sender.flush(FlushTrigger::Manual).await;
                    }
                    Some(SenderCommand::Shutdown) | None => {
                        self.sender.handle_signal(LifecycleSignal::Teardown).await;
                        break;
                    }
                },
                _ = timer => {
                    self.sender.on_timer().await;
                }
            }
        }

        let stats = self.sender.stats();
        tracing::info!(
            admitted = stats.admitted,
            sampled_out = stats.sampled_out,
            deduplicated = stats.deduplicated,
            delivered_records = stats.delivered_records,
            offlined_records = stats.offlined_records,
            "Sender worker stopped"
        );
    }
}

async fn flush_timer(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

//! Background merge scheduler
//!
//! One named thread per data source. It sleeps on the stop channel for
//! `activate_period`, asks the planner which tier to run and hands that to
//! the target. Failures are logged and the loop keeps going.
//!
//! ```text
//!   ┌──────────────┐  recv_timeout(period)   ┌───────────────┐
//!   │ stop channel │ ──────── timeout ─────► │ planner.next  │──► compact(kind)
//!   └──────┬───────┘                         └───────────────┘
//!          │ message / disconnect
//!          ▼
//!        exit ──► done channel closed
//! ```

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, error, info};

use crate::config::MergeConfig;
use crate::error::{Result, VirtDbError};
use crate::files::MergeStats;

use super::planner::{MergeKind, MergePlanner};

/// Something the scheduler can merge
pub trait Compactable: Send + Sync + 'static {
    /// Name for logs and the thread name
    fn label(&self) -> &str;

    /// Run one merge of the given tier to completion
    fn compact(&self, kind: MergeKind) -> Result<MergeStats>;
}

/// Handle to a running merge thread
pub struct MergeScheduler {
    label: String,
    stop_tx: Sender<()>,
    done_rx: Receiver<()>,
    handle: Option<JoinHandle<()>>,
}

impl MergeScheduler {
    /// Spawn the merge thread for `target`
    pub fn start(config: &MergeConfig, target: Arc<dyn Compactable>) -> Result<Self> {
        let label = target.label().to_string();
        let (stop_tx, stop_rx) = channel::bounded::<()>(1);
        let (done_tx, done_rx) = channel::bounded::<()>(1);
        let period = config.activate_period;
        let mut planner = MergePlanner::new(config, Instant::now());

        let handle = thread::Builder::new()
            .name(format!("{}-merge", label))
            .spawn(move || {
                // Dropped on exit, including a panic, which wakes `stop`
                let _done = done_tx;
                loop {
                    match stop_rx.recv_timeout(period) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }

                    let kind = planner.next_merge(Instant::now());
                    let started = Instant::now();
                    match target.compact(kind) {
                        Ok(stats) => debug!(
                            task = target.label(),
                            ?kind,
                            files_merged = stats.files_merged,
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "Merge finished"
                        ),
                        Err(e) => error!(
                            task = target.label(),
                            ?kind,
                            error = %e,
                            "Merge failed"
                        ),
                    }
                }
                info!(task = target.label(), "Merge thread shutting down");
            })?;

        Ok(Self {
            label,
            stop_tx,
            done_rx,
            handle: Some(handle),
        })
    }

    /// Signal the thread to stop and wait up to `timeout` for an in-flight
    /// merge to finish.
    ///
    /// On timeout the thread is left to finish on its own and
    /// `MergeTimeout` is returned; the store must not be assumed consistent.
    pub fn stop(mut self, timeout: Duration) -> Result<()> {
        // A full channel means a stop is already pending
        let _ = self.stop_tx.try_send(());

        match self.done_rx.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => {
                error!(task = %self.label, ?timeout, "Timed out waiting for merge thread");
                Err(VirtDbError::MergeTimeout(timeout))
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => match self.handle.take() {
                Some(handle) => handle.join().map_err(|_| {
                    VirtDbError::WorkerPanicked(format!("{}-merge", self.label))
                }),
                None => Ok(()),
            },
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

//! Update orchestrator: runs each attempt as its own task and reports
//! completion through a per-attempt one-shot channel.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::commit::{CommitManager, UpdateOutcome};
use crate::config::OtaConfig;
use crate::platform::{Restart, SlotStorage};
use crate::transport::Transport;

/// What the caller of [`UpdateOrchestrator::check_for_update`] observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    /// The attempt finished within the wait bound
    Completed(UpdateOutcome),
    /// The wait bound elapsed; the attempt keeps running
    TimedOut,
    /// The task ended without reporting an outcome
    Interrupted,
    /// Another attempt holds the slot storage
    AlreadyRunning,
}

/// Handle to a spawned update attempt
#[derive(Debug)]
pub struct UpdateTask {
    outcome_rx: oneshot::Receiver<UpdateOutcome>,
    cancel_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
    finished: Option<CheckStatus>,
}

impl UpdateTask {
    /// Wait up to `timeout` for the attempt's outcome.
    ///
    /// Timing out does not cancel the attempt and the wait can be repeated.
    pub async fn wait(&mut self, timeout: Duration) -> CheckStatus {
        if let Some(status) = self.finished {
            return status;
        }
        let status = match tokio::time::timeout(timeout, &mut self.outcome_rx).await {
            Ok(Ok(outcome)) => CheckStatus::Completed(outcome),
            Ok(Err(_closed)) => CheckStatus::Interrupted,
            Err(_elapsed) => CheckStatus::TimedOut,
        };
        if status != CheckStatus::TimedOut {
            self.finished = Some(status);
        }
        status
    }

    /// Request cooperative cancellation. Returns false if the request could
    /// not be delivered (already requested, or the attempt has finished).
    pub fn cancel(&self) -> bool {
        self.cancel_tx.try_send(()).is_ok()
    }

    /// Whether the task, including any restart it scheduled, has exited
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the task to exit, including any scheduled restart
    pub async fn join(self) -> Result<(), JoinError> {
        self.handle.await
    }
}

/// Owns the update collaborators and runs update attempts.
///
/// Only one attempt runs at a time: the attempt's task holds the storage
/// lock from spawn until it exits.
pub struct UpdateOrchestrator<T, S, R> {
    config: OtaConfig,
    transport: Arc<T>,
    storage: Arc<Mutex<S>>,
    restarter: Arc<R>,
}

impl<T, S, R> UpdateOrchestrator<T, S, R>
where
    T: Transport + 'static,
    S: SlotStorage + 'static,
    R: Restart + 'static,
{
    /// Create an orchestrator
    pub fn new(config: OtaConfig, transport: T, storage: S, restarter: R) -> Self {
        Self {
            config,
            transport: Arc::new(transport),
            storage: Arc::new(Mutex::new(storage)),
            restarter: Arc::new(restarter),
        }
    }

    /// Active configuration
    pub fn config(&self) -> &OtaConfig {
        &self.config
    }

    /// Shared slot storage; locked for the duration of an attempt
    pub fn storage(&self) -> &Arc<Mutex<S>> {
        &self.storage
    }

    /// Start an update attempt as an independent task.
    ///
    /// Returns `None` if an attempt is already running. When the attempt
    /// commits, the task waits `reboot_delay` and then restarts the device,
    /// whether or not anyone is still waiting on the outcome.
    pub fn spawn_update(&self) -> Option<UpdateTask> {
        let mut guard = Arc::clone(&self.storage).try_lock_owned().ok()?;

        let (outcome_tx, outcome_rx) = oneshot::channel();
        let (cancel_tx, cancel_rx) = mpsc::channel(1);
        let transport = Arc::clone(&self.transport);
        let restarter = Arc::clone(&self.restarter);
        let request = self.config.fetch_request();
        let policy = self.config.policy();
        let reboot_delay = self.config.reboot_delay();
        let span = info_span!("ota_update", url = %request.url);

        let handle = tokio::spawn(
            async move {
                let outcome = CommitManager::new(transport.as_ref(), &mut *guard, request, policy)
                    .with_cancellation(cancel_rx)
                    .run()
                    .await;

                if outcome_tx.send(outcome).is_err() {
                    debug!(?outcome, "No caller waiting for update outcome");
                }

                if outcome == UpdateOutcome::Succeeded {
                    info!(
                        delay_ms = reboot_delay.as_millis(),
                        "Restarting into new firmware"
                    );
                    tokio::time::sleep(reboot_delay).await;
                    restarter.restart().await;
                }
                drop(guard);
            }
            .instrument(span),
        );

        Some(UpdateTask {
            outcome_rx,
            cancel_tx,
            handle,
            finished: None,
        })
    }

    /// Run one update check and wait for it, bounded by `completion_timeout`.
    ///
    /// On timeout the attempt is left running; it still commits and restarts
    /// if it gets there.
    pub async fn check_for_update(&self) -> CheckStatus {
        if self.config.allow_plaintext_http {
            warn!("Plaintext HTTP is allowed for firmware updates; images are fetched without TLS");
        }

        let Some(mut task) = self.spawn_update() else {
            warn!("Firmware update already in progress");
            return CheckStatus::AlreadyRunning;
        };

        let timeout = self.config.completion_timeout();
        let status = task.wait(timeout).await;
        match status {
            CheckStatus::Completed(outcome) => {
                info!(?outcome, "Firmware update check finished");
            }
            CheckStatus::TimedOut => {
                warn!(
                    timeout_ms = timeout.as_millis(),
                    "Timed out waiting for firmware update to complete"
                );
            }
            CheckStatus::Interrupted => {
                error!("Firmware update task ended without reporting an outcome");
            }
            CheckStatus::AlreadyRunning => {}
        }
        status
    }
}

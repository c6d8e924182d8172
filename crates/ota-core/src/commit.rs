//! Staged writer: the state machine that turns a remote image into a
//! committed boot slot.
//!
//! ```text
//! Idle -> HeaderFetched -> PolicyApproved -> Writing -> FullyReceived
//!      -> Finalizing -> Committed
//! ```
//!
//! Every non-terminal state can fall into `Aborted(kind)`; `HeaderFetched`
//! can also end in `Skipped(reason)`. Once the inactive slot has been
//! touched, every abort discards it. The active slot only changes inside
//! [`SlotStorage::validate_and_activate`].

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::{ErrorKind, OtaError};
use crate::header::{InspectedHeader, extract_descriptor};
use crate::platform::SlotStorage;
use crate::policy::{PolicyConfig, PolicyDecision, RejectReason, SkipReason, evaluate};
use crate::transport::{FetchRequest, ImageStream, Transport};

/// Commit manager state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitState {
    /// Nothing done yet
    #[default]
    Idle,
    /// Transport open and candidate header inspected
    HeaderFetched,
    /// Policy decided to install the candidate
    PolicyApproved,
    /// Inactive slot prepared and receiving bytes
    Writing,
    /// Every declared byte written
    FullyReceived,
    /// Validating and activating the written image
    Finalizing,
    /// New image is the boot target
    Committed,
    /// Candidate not installed; running firmware kept
    Skipped(SkipReason),
    /// Attempt terminated with an error
    Aborted(ErrorKind),
}

impl CommitState {
    /// Whether no further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CommitState::Committed | CommitState::Skipped(_) | CommitState::Aborted(_)
        )
    }

    /// Outcome for a terminal state
    pub fn outcome(&self) -> Option<UpdateOutcome> {
        match self {
            CommitState::Committed => Some(UpdateOutcome::Succeeded),
            CommitState::Skipped(reason) => Some(UpdateOutcome::Skipped(*reason)),
            CommitState::Aborted(kind) => Some(UpdateOutcome::Failed(*kind)),
            _ => None,
        }
    }
}

impl std::fmt::Display for CommitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommitState::Skipped(reason) => write!(f, "Skipped({reason})"),
            CommitState::Aborted(kind) => write!(f, "Aborted({kind})"),
            other => write!(f, "{other:?}"),
        }
    }
}

/// Result of one update attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateOutcome {
    /// Running firmware kept on purpose
    Skipped(SkipReason),
    /// Candidate committed; a restart follows
    Succeeded,
    /// Attempt failed; running firmware untouched
    Failed(ErrorKind),
}

/// Drives one update attempt through [`CommitState`].
///
/// Holds exclusive access to the slot storage for its lifetime.
pub struct CommitManager<'a, T, S>
where
    T: Transport,
    S: SlotStorage + ?Sized,
{
    transport: &'a T,
    storage: &'a mut S,
    request: FetchRequest,
    policy: PolicyConfig,
    cancel_rx: Option<mpsc::Receiver<()>>,
    state: CommitState,
    history: Vec<CommitState>,
    stream: Option<T::Stream>,
    header: Option<InspectedHeader>,
    declared_len: Option<u64>,
    bytes_written: u64,
    slot_touched: bool,
}

impl<'a, T, S> CommitManager<'a, T, S>
where
    T: Transport,
    S: SlotStorage + ?Sized,
{
    /// Create a manager in [`CommitState::Idle`]
    pub fn new(
        transport: &'a T,
        storage: &'a mut S,
        request: FetchRequest,
        policy: PolicyConfig,
    ) -> Self {
        Self {
            transport,
            storage,
            request,
            policy,
            cancel_rx: None,
            state: CommitState::Idle,
            history: vec![CommitState::Idle],
            stream: None,
            header: None,
            declared_len: None,
            bytes_written: 0,
            slot_touched: false,
        }
    }

    /// Abort with [`ErrorKind::Cancelled`] once a message arrives on `cancel_rx`
    pub fn with_cancellation(mut self, cancel_rx: mpsc::Receiver<()>) -> Self {
        self.cancel_rx = Some(cancel_rx);
        self
    }

    /// Current state
    pub fn state(&self) -> CommitState {
        self.state
    }

    /// Every state entered so far, starting with `Idle`
    pub fn history(&self) -> &[CommitState] {
        &self.history
    }

    /// Bytes written to the inactive slot
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Run until a terminal state is reached
    pub async fn run(&mut self) -> UpdateOutcome {
        loop {
            if let Some(outcome) = self.step().await.outcome() {
                return outcome;
            }
        }
    }

    /// Perform one transition and return the state entered.
    ///
    /// Terminal states are returned unchanged.
    pub async fn step(&mut self) -> CommitState {
        if self.state.is_terminal() {
            return self.state;
        }
        if self.cancel_requested() {
            return self.abort(OtaError::Cancelled).await;
        }

        let result = match self.state {
            CommitState::Idle => self.fetch_header().await,
            CommitState::HeaderFetched => self.apply_policy().await,
            CommitState::PolicyApproved => self.begin_write().await,
            CommitState::Writing => self.receive_body().await,
            CommitState::FullyReceived => Ok(CommitState::Finalizing),
            CommitState::Finalizing => self.finalize().await,
            terminal => Ok(terminal),
        };

        match result {
            Ok(next) => self.enter(next),
            Err(e) => self.abort(e).await,
        }
    }

    fn cancel_requested(&mut self) -> bool {
        self.cancel_rx
            .as_mut()
            .is_some_and(|rx| rx.try_recv().is_ok())
    }

    fn enter(&mut self, next: CommitState) -> CommitState {
        debug!(from = %self.state, to = %next, "Commit state transition");
        self.state = next;
        self.history.push(next);

        match next {
            CommitState::Committed => {
                info!(bytes = self.bytes_written, "Firmware image committed");
            }
            CommitState::Skipped(reason) => {
                info!(%reason, "Firmware update skipped");
            }
            _ => {}
        }
        if next.is_terminal() {
            self.stream = None;
        }
        next
    }

    async fn abort(&mut self, err: OtaError) -> CommitState {
        let kind = err.kind();
        if self.slot_touched {
            if let Err(e) = self.storage.discard_inactive().await {
                error!(error = %e, "Failed to discard inactive slot");
            }
            self.slot_touched = false;
        }

        if kind == ErrorKind::Cancelled {
            warn!(state = %self.state, "Firmware update cancelled");
        } else {
            error!(state = %self.state, reason = %kind, error = %err, "Firmware update aborted");
        }
        self.enter(CommitState::Aborted(kind))
    }

    async fn fetch_header(&mut self) -> Result<CommitState, OtaError> {
        info!(url = %self.request.url, "Fetching firmware image header");
        let mut stream = self.transport.open(&self.request).await?;
        let header = extract_descriptor(&mut stream).await?;

        self.declared_len = stream.content_length();
        info!(
            version = header.descriptor.version(),
            hash = %header.descriptor.content_hash(),
            secure_version = header.descriptor.security_version(),
            declared_len = ?self.declared_len,
            "Candidate firmware"
        );

        self.stream = Some(stream);
        self.header = Some(header);
        Ok(CommitState::HeaderFetched)
    }

    async fn apply_policy(&mut self) -> Result<CommitState, OtaError> {
        let Some(header) = self.header.as_ref() else {
            return Err(OtaError::TransportIo("no inspected header".to_string()));
        };

        let running = match self.storage.running_descriptor().await {
            Ok(desc) => {
                info!(
                    version = desc.version(),
                    hash = %desc.content_hash(),
                    "Running firmware"
                );
                Some(desc)
            }
            Err(e) => {
                warn!(error = %e, "Failed to read running firmware descriptor");
                None
            }
        };
        let floor = self.storage.security_version_floor();

        match evaluate(running.as_ref(), &header.descriptor, floor, &self.policy) {
            PolicyDecision::Proceed => Ok(CommitState::PolicyApproved),
            PolicyDecision::Skip(reason) => Ok(CommitState::Skipped(reason)),
            PolicyDecision::Reject(RejectReason::SecurityVersionTooLow { candidate, floor }) => {
                Err(OtaError::SecurityVersionTooLow { candidate, floor })
            }
        }
    }

    async fn begin_write(&mut self) -> Result<CommitState, OtaError> {
        let prefix = self
            .header
            .as_mut()
            .map(|h| std::mem::take(&mut h.prefix))
            .unwrap_or_default();

        self.slot_touched = true;
        self.storage
            .prepare_inactive(self.declared_len)
            .await
            .map_err(|e| OtaError::StorageWriteFailure(e.to_string()))?;
        self.write(&prefix).await?;
        Ok(CommitState::Writing)
    }

    async fn receive_body(&mut self) -> Result<CommitState, OtaError> {
        let Some(mut stream) = self.stream.take() else {
            return Err(OtaError::TransportIo("image stream closed".to_string()));
        };

        loop {
            if self.cancel_requested() {
                return Err(OtaError::Cancelled);
            }
            match stream.read_next_chunk().await? {
                Some(chunk) => self.write(&chunk).await?,
                None => break,
            }
        }

        if let Some(expected) = self.declared_len
            && self.bytes_written != expected
        {
            return Err(OtaError::IncompleteImage {
                received: self.bytes_written,
                expected,
            });
        }
        Ok(CommitState::FullyReceived)
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), OtaError> {
        let len = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
        let total = self.bytes_written.saturating_add(len);
        if let Some(expected) = self.declared_len
            && total > expected
        {
            return Err(OtaError::IncompleteImage {
                received: total,
                expected,
            });
        }

        self.storage
            .write_chunk(bytes)
            .await
            .map_err(|e| OtaError::StorageWriteFailure(e.to_string()))?;
        self.bytes_written = total;
        debug!(written = total, total = ?self.declared_len, "Image write progress");
        Ok(())
    }

    async fn finalize(&mut self) -> Result<CommitState, OtaError> {
        self.storage
            .validate_and_activate()
            .await
            .map_err(|e| OtaError::ValidationFailed(e.to_string()))?;
        self.slot_touched = false;
        Ok(CommitState::Committed)
    }
}

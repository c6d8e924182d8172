//! Test doubles for transports, slot storage and restart

#![allow(dead_code, reason = "each test binary uses a different subset")]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use ota_core::prelude::*;
use tokio::sync::{Mutex, Notify};

/// Build an image whose header describes `payload`
pub fn build_image(
    version: &str,
    payload: &[u8],
    security_version: u32,
) -> Result<(Vec<u8>, FirmwareDescriptor), DescriptorError> {
    let desc = FirmwareDescriptor::new(version, ContentHash::of(payload), security_version)?;
    let mut image = encode_header(&desc, "ota-test").to_vec();
    image.extend_from_slice(payload);
    Ok((image, desc))
}

/// Transport serving one in-memory image
#[derive(Clone)]
pub struct MockTransport {
    image: Arc<Vec<u8>>,
    declared_len: Option<u64>,
    chunk_size: usize,
    truncate_at: Option<usize>,
    fail_read_at: Option<usize>,
    read_delay: Duration,
    open_error: Option<ErrorKind>,
    pub opens: Arc<AtomicUsize>,
    pub chunks_served: Arc<AtomicUsize>,
}

impl MockTransport {
    pub fn new(image: Vec<u8>) -> Self {
        let declared_len = u64::try_from(image.len()).ok();
        Self {
            image: Arc::new(image),
            declared_len,
            chunk_size: 128,
            truncate_at: None,
            fail_read_at: None,
            read_delay: Duration::ZERO,
            open_error: None,
            opens: Arc::new(AtomicUsize::new(0)),
            chunks_served: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_declared_len(mut self, declared_len: Option<u64>) -> Self {
        self.declared_len = declared_len;
        self
    }

    /// End the stream after `at` bytes while still declaring the full length
    pub fn truncated_at(mut self, at: usize) -> Self {
        self.truncate_at = Some(at);
        self
    }

    /// Fail the first read that would go past `at` bytes
    pub fn failing_read_at(mut self, at: usize) -> Self {
        self.fail_read_at = Some(at);
        self
    }

    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = delay;
        self
    }

    pub fn failing_open(mut self, kind: ErrorKind) -> Self {
        self.open_error = Some(kind);
        self
    }
}

pub struct MockStream {
    image: Arc<Vec<u8>>,
    pos: usize,
    end: usize,
    declared_len: Option<u64>,
    chunk_size: usize,
    fail_read_at: Option<usize>,
    read_delay: Duration,
    chunks_served: Arc<AtomicUsize>,
}

#[async_trait]
impl ImageStream for MockStream {
    fn content_length(&self) -> Option<u64> {
        self.declared_len
    }

    async fn read_next_chunk(&mut self) -> Result<Option<Vec<u8>>, OtaError> {
        if !self.read_delay.is_zero() {
            tokio::time::sleep(self.read_delay).await;
        }
        if self.pos >= self.end {
            return Ok(None);
        }
        let next = self.pos.saturating_add(self.chunk_size).min(self.end);
        if self.fail_read_at.is_some_and(|at| next > at) {
            return Err(OtaError::TransportIo("connection reset".to_string()));
        }
        let chunk = self.image.get(self.pos..next).unwrap_or_default().to_vec();
        self.pos = next;
        self.chunks_served.fetch_add(1, Ordering::SeqCst);
        Ok(Some(chunk))
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Stream = MockStream;

    async fn open(&self, _request: &FetchRequest) -> Result<MockStream, OtaError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(kind) = self.open_error {
            return Err(match kind {
                ErrorKind::TransportTimeout => OtaError::TransportTimeout("connect".to_string()),
                ErrorKind::TlsFailure => OtaError::TlsFailure("handshake".to_string()),
                _ => OtaError::TransportUnreachable("connection refused".to_string()),
            });
        }
        let end = self
            .truncate_at
            .unwrap_or(self.image.len())
            .min(self.image.len());
        Ok(MockStream {
            image: Arc::clone(&self.image),
            pos: 0,
            end,
            declared_len: self.declared_len,
            chunk_size: self.chunk_size,
            fail_read_at: self.fail_read_at,
            read_delay: self.read_delay,
            chunks_served: Arc::clone(&self.chunks_served),
        })
    }
}

/// Mutating storage operations, in call order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageOp {
    Prepare(Option<u64>),
    Write(usize),
    ValidateAndActivate,
    Discard,
}

#[derive(Default)]
struct StorageState {
    running: Option<FirmwareDescriptor>,
    active: Slot,
    slots: HashMap<Slot, Vec<u8>>,
    staged: Option<Vec<u8>>,
    ops: Vec<StorageOp>,
    writes_before_failure: Option<usize>,
    fail_validation: bool,
}

/// In-memory A/B slot storage. Clones share state.
#[derive(Clone, Default)]
pub struct MockStorage {
    state: Arc<Mutex<StorageState>>,
    floor: Arc<AtomicU32>,
}

impl MockStorage {
    pub fn running(desc: FirmwareDescriptor) -> Self {
        let storage = Self::default();
        if let Ok(mut state) = storage.state.try_lock() {
            state.running = Some(desc);
        }
        storage
    }

    /// Storage whose running descriptor cannot be read
    pub fn unreadable() -> Self {
        Self::default()
    }

    pub fn with_floor(self, floor: u32) -> Self {
        self.floor.store(floor, Ordering::SeqCst);
        self
    }

    pub async fn fail_writes_after(&self, writes: usize) {
        self.state.lock().await.writes_before_failure = Some(writes);
    }

    pub async fn fail_validation(&self) {
        self.state.lock().await.fail_validation = true;
    }

    pub async fn ops(&self) -> Vec<StorageOp> {
        self.state.lock().await.ops.clone()
    }

    pub async fn active_slot(&self) -> Slot {
        self.state.lock().await.active
    }

    pub async fn active_descriptor(&self) -> Option<FirmwareDescriptor> {
        self.state.lock().await.running.clone()
    }

    pub async fn slot_contents(&self, slot: Slot) -> Option<Vec<u8>> {
        self.state.lock().await.slots.get(&slot).cloned()
    }

    pub async fn staged(&self) -> Option<Vec<u8>> {
        self.state.lock().await.staged.clone()
    }

    pub async fn wrote_any(&self) -> bool {
        self.state
            .lock()
            .await
            .ops
            .iter()
            .any(|op| matches!(op, StorageOp::Prepare(_) | StorageOp::Write(_)))
    }
}

#[async_trait]
impl SlotStorage for MockStorage {
    async fn running_descriptor(&self) -> Result<FirmwareDescriptor, StorageError> {
        self.state
            .lock()
            .await
            .running
            .clone()
            .ok_or_else(|| StorageError::Metadata("active slot has no readable header".to_string()))
    }

    fn security_version_floor(&self) -> u32 {
        self.floor.load(Ordering::SeqCst)
    }

    async fn prepare_inactive(&mut self, size_hint: Option<u64>) -> Result<(), StorageError> {
        let mut state = self.state.lock().await;
        state.ops.push(StorageOp::Prepare(size_hint));
        state.staged = Some(Vec::new());
        Ok(())
    }

    async fn write_chunk(&mut self, bytes: &[u8]) -> Result<(), StorageError> {
        let mut state = self.state.lock().await;
        state.ops.push(StorageOp::Write(bytes.len()));
        if let Some(remaining) = state.writes_before_failure.as_mut() {
            if *remaining == 0 {
                return Err(StorageError::Io(std::io::Error::other("flash write error")));
            }
            *remaining = remaining.saturating_sub(1);
        }
        match state.staged.as_mut() {
            Some(staged) => {
                staged.extend_from_slice(bytes);
                Ok(())
            }
            None => Err(StorageError::InvalidState("slot not prepared".to_string())),
        }
    }

    async fn validate_and_activate(&mut self) -> Result<(), StorageError> {
        let mut state = self.state.lock().await;
        state.ops.push(StorageOp::ValidateAndActivate);
        if state.fail_validation {
            return Err(StorageError::Rejected("image checksum mismatch".to_string()));
        }
        let staged = state
            .staged
            .take()
            .ok_or_else(|| StorageError::InvalidState("slot not prepared".to_string()))?;
        let desc =
            parse_descriptor(&staged).map_err(|e| StorageError::Rejected(e.to_string()))?;

        let target = state.active.other();
        state.slots.insert(target, staged);
        state.active = target;
        state.running = Some(desc);
        Ok(())
    }

    async fn discard_inactive(&mut self) -> Result<(), StorageError> {
        let mut state = self.state.lock().await;
        state.ops.push(StorageOp::Discard);
        state.staged = None;
        Ok(())
    }
}

/// Records restart requests
#[derive(Clone, Default)]
pub struct MockRestarter {
    count: Arc<AtomicUsize>,
    notify: Arc<Notify>,
}

impl MockRestarter {
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Resolves once a restart has been requested
    pub async fn restarted(&self) {
        self.notify.notified().await;
    }
}

#[async_trait]
impl Restart for MockRestarter {
    async fn restart(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
        self.notify.notify_one();
    }
}

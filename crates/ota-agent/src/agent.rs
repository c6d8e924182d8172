//! Boot loop of the simulated device.
//!
//! Each boot opens the slot storage, reports the running firmware, waits for
//! the update host to become reachable and runs one update check. The check
//! is skipped when the host stays unreachable. The application then runs
//! until a committed update requests a restart or the re-check interval
//! elapses, and the next boot checks again.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use ota_core::platform::SlotStorage;
use ota_core::{CheckStatus, FirmwareDescriptor, OtaConfig, Slot, UpdateOrchestrator};
use ota_http::HttpTransport;
use tokio::sync::mpsc;
use tracing::{Instrument, info, info_span, warn};

use crate::network::wait_for_network;
use crate::platform::FileSlotStorage;
use crate::restart::ChannelRestarter;

/// Agent runtime options
#[derive(Debug, Clone)]
pub struct AgentOptions {
    /// Update configuration
    pub config: OtaConfig,
    /// Directory holding the slot files and boot pointer
    pub data_dir: PathBuf,
    /// Image installed into the active slot when it is empty
    pub factory_image: Option<PathBuf>,
    /// Stop after the first boot cycle
    pub once: bool,
    /// Stop after this many boots
    pub max_boots: Option<u32>,
    /// How long to wait for the update host to become reachable
    pub network_timeout: Duration,
    /// How long the application runs before the device restarts to check again
    pub recheck_interval: Duration,
    /// Slot capacity in bytes
    pub slot_capacity: u64,
}

impl AgentOptions {
    /// Options with default capacity, timeouts and re-check interval
    pub fn new(config: OtaConfig, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            data_dir: data_dir.into(),
            factory_image: None,
            once: false,
            max_boots: None,
            network_timeout: Duration::from_secs(30),
            recheck_interval: Duration::from_secs(10),
            slot_capacity: FileSlotStorage::DEFAULT_CAPACITY,
        }
    }
}

/// State of the device when the agent stopped
#[derive(Debug, Clone)]
pub struct AgentSummary {
    /// Number of boots performed
    pub boots: u32,
    /// Result of the last boot's update check; `None` if the update host
    /// was unreachable and the check was skipped
    pub last_status: Option<CheckStatus>,
    /// Slot the device would boot next
    pub active_slot: Slot,
    /// Firmware in the active slot, if readable
    pub running: Option<FirmwareDescriptor>,
}

enum BootEnd {
    Restart,
    Shutdown,
}

/// Run the boot loop until shutdown, for `max_boots` boots, or for one
/// cycle with `once`
pub async fn run(options: AgentOptions) -> Result<AgentSummary> {
    options
        .config
        .validate()
        .context("Invalid update configuration")?;

    let mut boots: u32 = 0;
    let mut last_status = None;

    loop {
        boots = boots.saturating_add(1);
        let (status, end) = boot(&options, boots)
            .instrument(info_span!("boot", n = boots))
            .await?;
        last_status = status;

        let limit_reached = options.max_boots.is_some_and(|max| boots >= max);
        match end {
            BootEnd::Restart if !options.once && !limit_reached => info!("Rebooting"),
            BootEnd::Restart | BootEnd::Shutdown => break,
        }
    }

    let storage = open_storage(&options).await?;
    Ok(AgentSummary {
        boots,
        last_status,
        active_slot: storage.active_slot(),
        running: storage.running_descriptor().await.ok(),
    })
}

async fn open_storage(options: &AgentOptions) -> Result<FileSlotStorage> {
    let storage = FileSlotStorage::open(&options.data_dir)
        .await
        .with_context(|| format!("Failed to open slot storage in {}", options.data_dir.display()))?;
    Ok(storage.with_capacity(options.slot_capacity))
}

type Orchestrator = UpdateOrchestrator<HttpTransport, FileSlotStorage, ChannelRestarter>;

async fn boot(options: &AgentOptions, n: u32) -> Result<(Option<CheckStatus>, BootEnd)> {
    let mut storage = open_storage(options).await?;

    if n == 1
        && let Some(path) = &options.factory_image
    {
        let image = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read factory image: {}", path.display()))?;
        storage
            .install_factory_image(&image)
            .await
            .context("Failed to install factory image")?;
    }

    match storage.running_descriptor().await {
        Ok(desc) => info!(
            slot = %storage.active_slot(),
            version = desc.version(),
            hash = %desc.content_hash(),
            security_version = desc.security_version(),
            security_floor = storage.security_version_floor(),
            "Running firmware"
        ),
        Err(e) => warn!(slot = %storage.active_slot(), error = %e, "Running firmware descriptor unavailable"),
    }

    let (restarter, mut restart_rx) = ChannelRestarter::new();
    let transport = HttpTransport::new().context("Failed to create HTTP transport")?;
    let orchestrator =
        UpdateOrchestrator::new(options.config.clone(), transport, storage, restarter);

    let status = match wait_for_network(&options.config.update_url, options.network_timeout).await {
        Ok(_) => Some(orchestrator.check_for_update().await),
        Err(e) => {
            warn!(error = %e, "Update host unreachable; skipping OTA update check");
            None
        }
    };

    if options.once {
        if status == Some(CheckStatus::TimedOut) {
            info!("Waiting for the in-flight update attempt before exiting");
        }
        let end = settle(&orchestrator, &mut restart_rx).await;
        return Ok((status, end));
    }

    info!(
        recheck_in_ms = options.recheck_interval.as_millis(),
        "Application running"
    );
    let end = tokio::select! {
        request = restart_rx.recv() => match request {
            Some(()) => BootEnd::Restart,
            None => BootEnd::Shutdown,
        },
        () = tokio::time::sleep(options.recheck_interval) => {
            info!("Restarting to check for updates");
            BootEnd::Restart
        }
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            info!("Shutting down agent");
            return Ok((status, BootEnd::Shutdown));
        }
    };

    // the next boot opens its own storage, so the current attempt must be done
    settle(&orchestrator, &mut restart_rx).await;
    Ok((status, end))
}

/// Wait until no attempt holds the slot storage, then report whether one
/// asked for a restart
async fn settle(orchestrator: &Orchestrator, restart_rx: &mut mpsc::Receiver<()>) -> BootEnd {
    let idle = orchestrator.storage().lock().await;
    drop(idle);
    if restart_rx.try_recv().is_ok() {
        BootEnd::Restart
    } else {
        BootEnd::Shutdown
    }
}

//! Restart signalling for the boot loop

use async_trait::async_trait;
use ota_core::platform::Restart;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Restarts the device by signalling the boot loop
#[derive(Debug, Clone)]
pub struct ChannelRestarter {
    tx: mpsc::Sender<()>,
}

impl ChannelRestarter {
    /// Create a restarter and the receiver the boot loop listens on
    pub fn new() -> (Self, mpsc::Receiver<()>) {
        let (tx, rx) = mpsc::channel(1);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Restart for ChannelRestarter {
    async fn restart(&self) {
        info!("Device restart requested");
        if self.tx.send(()).await.is_err() {
            warn!("Boot loop is gone; restart request dropped");
        }
    }
}

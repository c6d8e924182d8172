//! Network readiness probe: DNS resolution plus a TCP connect to the update host

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use tokio::net::TcpStream;
use tokio::time::{Instant, timeout};
use tracing::{debug, info, warn};
use url::Url;

const RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// `host:port` of the update server, with the scheme's default port filled in
pub fn update_host(update_url: &str) -> Result<(String, u16)> {
    let url = Url::parse(update_url).with_context(|| format!("Invalid update URL: {update_url}"))?;
    let host = url
        .host_str()
        .ok_or_else(|| anyhow!("Update URL has no host: {update_url}"))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| anyhow!("Update URL has no port: {update_url}"))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    Ok((host.to_string(), port))
}

/// Resolve the host and open one TCP connection to it
pub async fn probe(host: &str, port: u16, connect_timeout: Duration) -> Result<SocketAddr> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .with_context(|| format!("Failed to resolve {host}"))?
        .collect();
    if addrs.is_empty() {
        bail!("{host} resolved to no addresses");
    }

    let mut last_error = None;
    for addr in addrs {
        match timeout(connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(_stream)) => return Ok(addr),
            Ok(Err(e)) => last_error = Some(anyhow!(e).context(format!("connect to {addr}"))),
            Err(_elapsed) => last_error = Some(anyhow!("connect to {addr} timed out")),
        }
    }
    Err(last_error.unwrap_or_else(|| anyhow!("no address of {host} was reachable")))
}

/// Retry [`probe`] against the update host until it succeeds or `deadline` passes
pub async fn wait_for_network(update_url: &str, deadline: Duration) -> Result<SocketAddr> {
    let (host, port) = update_host(update_url)?;
    let give_up = Instant::now() + deadline;
    let mut attempts: u32 = 0;

    loop {
        attempts = attempts.saturating_add(1);
        let remaining = give_up.saturating_duration_since(Instant::now());
        match probe(&host, port, remaining.max(Duration::from_millis(1))).await {
            Ok(addr) => {
                info!(%addr, attempts, "Network is up");
                return Ok(addr);
            }
            Err(e) if Instant::now() + RETRY_INTERVAL < give_up => {
                debug!(host = %host, port, attempts, error = %e, "Update host not reachable yet");
                tokio::time::sleep(RETRY_INTERVAL).await;
            }
            Err(e) => {
                warn!(host = %host, port, attempts, error = %e, "Gave up waiting for network");
                return Err(e.context(format!("{host}:{port} unreachable after {attempts} attempts")));
            }
        }
    }
}

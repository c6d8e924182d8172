//! ota-server - firmware image server and packer for OTA development

#![deny(clippy::unwrap_used)]

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ota_server::{PackOptions, ServerConfig, pack_image, start};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "ota-server")]
#[command(about = "Serve and pack firmware images for OTA update testing")]
#[command(version)]
struct Cli {
    /// Verbose logging
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve a firmware image over HTTP
    Serve {
        /// Image file to serve
        binary_file: PathBuf,

        /// The port to run the HTTP server on
        #[arg(short, long, default_value_t = 8070)]
        port: u16,

        /// The HTTP path of the binary file
        #[arg(short = 'f', long, default_value = "ota.bin")]
        http_filename: String,

        /// Address to listen on
        #[arg(long, default_value = "0.0.0.0")]
        bind: IpAddr,
    },

    /// Wrap a raw payload into an application image
    Pack {
        /// Raw application payload
        payload: PathBuf,

        /// Output image path
        #[arg(short, long)]
        output: PathBuf,

        /// Version label written into the header
        #[arg(long)]
        app_version: String,

        /// Project name written into the header
        #[arg(long, default_value = "ota-app")]
        project_name: String,

        /// Anti-rollback security version
        #[arg(long, default_value_t = 0)]
        security_version: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("ota_server={log_level}").into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match cli.command {
        Commands::Serve {
            binary_file,
            port,
            http_filename,
            bind,
        } => {
            let server = start(ServerConfig {
                binary_file,
                http_filename,
                addr: SocketAddr::new(bind, port),
            })
            .await?;

            tokio::select! {
                result = server.handle => result.context("Image server task failed")?,
                result = tokio::signal::ctrl_c() => {
                    result.context("Failed to listen for shutdown signal")?;
                    info!("Shutting down image server");
                }
            }
        }
        Commands::Pack {
            payload,
            output,
            app_version,
            project_name,
            security_version,
        } => {
            let data = tokio::fs::read(&payload)
                .await
                .with_context(|| format!("Failed to read payload: {}", payload.display()))?;

            let packed = pack_image(
                &data,
                &PackOptions {
                    version: app_version,
                    project_name,
                    security_version,
                },
            )
            .context("Failed to pack image")?;

            tokio::fs::write(&output, &packed.bytes)
                .await
                .with_context(|| format!("Failed to write image: {}", output.display()))?;

            info!(
                output = %output.display(),
                bytes = packed.bytes.len(),
                version = packed.descriptor.version(),
                hash = %packed.descriptor.content_hash(),
                "Packed firmware image"
            );
        }
    }

    Ok(())
}

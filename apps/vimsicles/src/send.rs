//! `vimsicles send`: pack files and push them to a listening peer.

use std::io::Write;

use anyhow::{Context, bail};
use tracing::info;
use vimsicles_archive::SourceFile;
use vimsicles_data_channel::format_bytes;
use vimsicles_engine::{EngineEvent, TransferEngine};

use crate::cli::SendArgs;
use crate::config::Config;

pub async fn run(config: Config, args: SendArgs) -> anyhow::Result<()> {
    let port = args.port.unwrap_or(config.port);
    let mut files = Vec::with_capacity(args.files.len());
    for path in &args.files {
        if !path.is_file() {
            bail!("not a regular file: {}", path.display());
        }
        files.push(SourceFile::from_path(path)?);
    }

    let engine = TransferEngine::new(config.engine_config());
    let mut events = engine
        .take_events()
        .await
        .context("event stream already taken")?;
    engine.start_send(args.host.clone(), port, files).await?;

    let mut interrupted = false;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                info!("interrupted, cancelling send");
                interrupted = true;
                engine.cancel_send().await;
            }
            event = events.recv() => {
                let Some(event) = event else {
                    bail!("engine stopped without reporting an outcome");
                };
                match event {
                    EngineEvent::Handshake { descriptor, .. } => {
                        let size = descriptor
                            .total_size
                            .map(format_bytes)
                            .unwrap_or_default();
                        println!(
                            "Waiting for {}:{port} to accept {} ({size})",
                            args.host, descriptor.archive_name
                        );
                    }
                    EngineEvent::Accepted { .. } => println!("Accepted, sending"),
                    EngineEvent::Progress { progress, .. } => {
                        print!("\r  {progress}    ");
                        let _ = std::io::stdout().flush();
                    }
                    EngineEvent::Completed { bytes, .. } => {
                        println!("\nSent {}", format_bytes(bytes));
                        return Ok(());
                    }
                    EngineEvent::Failed { kind, message, .. } => {
                        bail!("send failed ({kind}): {message}");
                    }
                    _ => {}
                }
            }
        }
    }
}

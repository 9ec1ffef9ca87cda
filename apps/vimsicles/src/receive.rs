//! `vimsicles receive`: listen and ask on the console before accepting.

use std::io::{BufRead, Write};

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::info;
use vimsicles_data_channel::format_bytes;
use vimsicles_engine::{EngineEvent, Resolution, TransferEngine};

use crate::cli::ReceiveArgs;
use crate::config::Config;

pub async fn run(config: Config, args: ReceiveArgs) -> anyhow::Result<()> {
    let port = args.port.unwrap_or(config.port);
    let mut engine_config = config.engine_config();
    if let Some(dest) = args.dest {
        engine_config.destination_dir = dest;
    }
    let destination = engine_config.destination_dir.clone();

    let engine = TransferEngine::new(engine_config);
    let mut events = engine
        .take_events()
        .await
        .context("event stream already taken")?;
    let addr = engine.start_listening(port).await?;
    println!(
        "Listening on {addr}, saving into {}",
        destination.display()
    );

    let mut answers = spawn_stdin_reader();
    let mut waiting: Option<String> = None;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            Some(answer) = answers.recv(), if waiting.is_some() => {
                if let Some(remote_address) = waiting.take() {
                    if is_yes(&answer) {
                        engine.approve(&remote_address).await;
                    } else {
                        engine.reject(&remote_address).await;
                    }
                }
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                let finished = event.is_terminal();
                match event {
                    EngineEvent::PendingConnection { remote_address, peer } => {
                        if args.auto_approve {
                            println!("Accepting transfer from {peer}");
                            engine.approve(&remote_address).await;
                        } else {
                            print!("Accept transfer from {peer}? [y/N] ");
                            let _ = std::io::stdout().flush();
                            waiting = Some(remote_address);
                        }
                    }
                    EngineEvent::PendingResolved { remote_address, resolution } => {
                        if waiting.as_deref() == Some(remote_address.as_str()) {
                            waiting = None;
                        }
                        match resolution {
                            Resolution::Approved => {}
                            Resolution::Rejected => println!("Rejected {remote_address}"),
                            Resolution::TimedOut => println!("\nRequest from {remote_address} timed out"),
                            Resolution::Superseded => println!("\nRequest from {remote_address} replaced by a newer one"),
                        }
                    }
                    EngineEvent::Handshake { descriptor, .. } => {
                        let size = descriptor
                            .total_size
                            .map(format_bytes)
                            .unwrap_or_else(|| "unknown size".into());
                        println!("Receiving {} ({}, {size})", descriptor.archive_name, descriptor.kind);
                    }
                    EngineEvent::Progress { progress, .. } => {
                        print!("\r  {progress}    ");
                        let _ = std::io::stdout().flush();
                    }
                    EngineEvent::Extracting => println!("\nExtracting..."),
                    EngineEvent::Completed { extracted, bytes, .. } => {
                        println!("Received {} in {} file(s):", format_bytes(bytes), extracted.len());
                        for path in &extracted {
                            println!("  {}", destination.join(path).display());
                        }
                    }
                    EngineEvent::Failed { kind, message, .. } => {
                        println!("\nTransfer failed ({kind}): {message}");
                    }
                    EngineEvent::GateStopped => break,
                    EngineEvent::Listening { .. }
                    | EngineEvent::SessionStarted { .. }
                    | EngineEvent::Accepted { .. } => {}
                }
                if finished && args.once {
                    break;
                }
            }
        }
    }

    engine.shutdown().await;
    Ok(())
}

/// Forwards console lines to the event loop.
///
/// Runs on a plain thread so a blocked read never holds up runtime shutdown.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(4);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

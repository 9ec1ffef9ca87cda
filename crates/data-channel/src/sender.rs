//! Sending side of a transfer.
//!
//! Dials the receiver, packs the files into one archive, announces it and
//! streams the bytes once the receiver answers `HELLO`.

use std::path::PathBuf;
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vimsicles_archive::{PackedArchive, SourceFile};

use crate::copier::copy_with_progress;
use crate::error::TransferError;
use crate::wire::{TransferDescriptor, TransferKind, read_hello, write_descriptor};
use crate::{CHUNK_SIZE, CONNECT_TIMEOUT, HELLO_TIMEOUT, SessionEvent};

/// What to send and where.
#[derive(Debug)]
pub struct SendRequest {
    pub host: String,
    pub port: u16,
    pub files: Vec<SourceFile>,
}

/// Tunables for [`TransferSender`].
#[derive(Debug, Clone)]
pub struct SenderOptions {
    /// Directory for the temporary archive.
    pub scratch_dir: PathBuf,
    pub connect_timeout: Duration,
    /// Upper bound on waiting for the receiver's decision.
    pub hello_timeout: Duration,
}

impl Default for SenderOptions {
    fn default() -> Self {
        Self {
            scratch_dir: std::env::temp_dir().join("vimsicles"),
            connect_timeout: CONNECT_TIMEOUT,
            hello_timeout: HELLO_TIMEOUT,
        }
    }
}

/// Outcome of a successful send.
#[derive(Debug, Clone)]
pub struct SendReport {
    pub descriptor: TransferDescriptor,
    pub bytes_sent: u64,
}

/// Runs one outbound transfer per call to [`send`](Self::send).
pub struct TransferSender {
    options: SenderOptions,
    cancel: CancellationToken,
}

impl TransferSender {
    pub fn new(options: SenderOptions, cancel: CancellationToken) -> Self {
        Self { options, cancel }
    }

    /// Sends `request.files` as a single archive.
    ///
    /// The temporary archive is removed before this returns, whatever the
    /// outcome.
    pub async fn send<F>(&self, request: SendRequest, on_event: F) -> Result<SendReport, TransferError>
    where
        F: Fn(SessionEvent) + Send + Sync,
    {
        let SendRequest { host, port, files } = request;
        if files.is_empty() {
            return Err(TransferError::InvalidRequest("no files to send".into()));
        }
        let addr = format!("{host}:{port}");

        let stream = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                return Err(TransferError::Cancelled);
            }
            result = tokio::time::timeout(
                self.options.connect_timeout,
                TcpStream::connect((host.as_str(), port)),
            ) => {
                match result {
                    Ok(Ok(s)) => {
                        info!(%addr, "connected to receiver");
                        s
                    }
                    Ok(Err(e)) => {
                        return Err(TransferError::Connect { addr, reason: e.to_string() });
                    }
                    Err(_) => {
                        return Err(TransferError::Connect {
                            addr,
                            reason: format!("timed out after {:?}", self.options.connect_timeout),
                        });
                    }
                }
            }
        };

        let archive = self.pack(files).await?;
        let descriptor = TransferDescriptor {
            kind: TransferKind::for_file_count(archive.entries()),
            archive_name: archive.name().to_string(),
            content_digest: archive.digest().to_string(),
            total_size: Some(archive.size()),
        };

        let (reader, writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut writer = BufWriter::with_capacity(CHUNK_SIZE, writer);

        announce(&mut writer, &descriptor).await?;
        debug!(
            archive = %descriptor.archive_name,
            size = archive.size(),
            "descriptor sent, waiting for approval"
        );
        on_event(SessionEvent::Handshake(descriptor.clone()));

        let accepted = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                return Err(TransferError::Cancelled);
            }
            result = tokio::time::timeout(self.options.hello_timeout, read_hello(&mut reader)) => {
                match result {
                    Ok(Ok(accepted)) => accepted,
                    Ok(Err(e)) => {
                        debug!(error = %e, "no valid acceptance line");
                        false
                    }
                    Err(_) => {
                        warn!(%addr, "receiver never answered");
                        false
                    }
                }
            }
        };
        if !accepted {
            return Err(TransferError::ConnectionRejected);
        }
        info!(%addr, "receiver accepted transfer");
        on_event(SessionEvent::Accepted);

        let mut file = tokio::fs::File::open(archive.path()).await?;
        let bytes_sent = copy_with_progress(
            &mut file,
            &mut writer,
            descriptor.total_size,
            &self.cancel,
            |p| on_event(SessionEvent::Progress(p)),
        )
        .await?;
        writer.shutdown().await?;

        info!(bytes_sent, archive = %descriptor.archive_name, "archive sent");
        Ok(SendReport {
            descriptor,
            bytes_sent,
        })
    }

    async fn pack(&self, files: Vec<SourceFile>) -> Result<PackedArchive, TransferError> {
        let scratch_dir = self.options.scratch_dir.clone();
        let name = vimsicles_archive::archive_name();
        let archive = tokio::task::spawn_blocking(move || {
            vimsicles_archive::pack(files, &scratch_dir, &name)
        })
        .await
        .map_err(|e| TransferError::Io(std::io::Error::other(e)))??;

        debug!(
            archive = %archive.name(),
            entries = archive.entries(),
            size = archive.size(),
            "archive packed"
        );
        Ok(archive)
    }
}

/// Writes the descriptor. A receiver that already hung up (it rejected, or
/// its deadline passed while we were packing) counts as a rejection.
async fn announce<W: AsyncWrite + Unpin>(
    writer: &mut W,
    descriptor: &TransferDescriptor,
) -> Result<(), TransferError> {
    match write_descriptor(writer, descriptor).await {
        Err(TransferError::Io(e)) => {
            debug!(error = %e, "receiver hung up before the descriptor");
            Err(TransferError::ConnectionRejected)
        }
        other => other,
    }
}

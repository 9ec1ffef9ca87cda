//! Receiving side of a transfer.
//!
//! Runs on a connection the user already approved: reads the descriptor,
//! answers `HELLO`, stores the archive in the scratch directory, verifies
//! its digest and unpacks it into the destination directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::copier::copy_with_progress;
use crate::error::TransferError;
use crate::wire::{TransferDescriptor, read_header, read_size, write_hello};
use crate::{CHUNK_SIZE, HANDSHAKE_TIMEOUT, SessionEvent};

/// Prefix of the in-flight archive inside the scratch directory.
const TEMP_PREFIX: &str = "temp_";

/// Tunables for [`TransferReceiver`].
#[derive(Debug, Clone)]
pub struct ReceiverOptions {
    /// Where extracted files end up.
    pub destination_dir: PathBuf,
    /// Where the archive is stored while it is received and verified.
    pub scratch_dir: PathBuf,
    /// How long the optional size line may lag behind the header.
    pub handshake_timeout: Duration,
}

impl ReceiverOptions {
    pub fn new(destination_dir: impl Into<PathBuf>, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            destination_dir: destination_dir.into(),
            scratch_dir: scratch_dir.into(),
            handshake_timeout: HANDSHAKE_TIMEOUT,
        }
    }
}

/// Outcome of a successful receive.
#[derive(Debug, Clone)]
pub struct ReceiveReport {
    pub descriptor: TransferDescriptor,
    pub bytes_received: u64,
    /// Extracted file paths, relative to the destination directory.
    pub extracted: Vec<PathBuf>,
}

/// Runs one inbound transfer per call to [`receive`](Self::receive).
pub struct TransferReceiver {
    options: ReceiverOptions,
    cancel: CancellationToken,
}

impl TransferReceiver {
    pub fn new(options: ReceiverOptions, cancel: CancellationToken) -> Self {
        Self { options, cancel }
    }

    /// Receives one archive over an approved connection.
    ///
    /// The connection is shut down before this returns, on every path.
    pub async fn receive<F>(
        &self,
        stream: TcpStream,
        on_event: F,
    ) -> Result<ReceiveReport, TransferError>
    where
        F: Fn(SessionEvent) + Send + Sync,
    {
        let peer = stream.peer_addr().ok();
        let (reader, mut writer) = stream.into_split();

        let result = self
            .receive_from(BufReader::with_capacity(CHUNK_SIZE, reader), &mut writer, &on_event)
            .await;
        if let Err(e) = writer.shutdown().await {
            debug!(error = %e, "shutdown after receive");
        }

        match &result {
            Ok(report) => info!(
                peer = ?peer,
                archive = %report.descriptor.archive_name,
                bytes = report.bytes_received,
                files = report.extracted.len(),
                "transfer received"
            ),
            Err(e) => warn!(peer = ?peer, error = %e, "receive failed"),
        }
        result
    }

    /// Runs the receive sequence over an arbitrary byte stream.
    pub async fn receive_from<R, W, F>(
        &self,
        mut reader: R,
        writer: &mut W,
        on_event: &F,
    ) -> Result<ReceiveReport, TransferError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
        F: Fn(SessionEvent) + Send + Sync,
    {
        let timeout = self.options.handshake_timeout;

        // The sender packs after dialing, so the header may take as long as
        // packing does. Only cancellation ends this wait.
        let mut descriptor = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(TransferError::Cancelled),
            header = read_header(&mut reader) => header?,
        };
        vimsicles_archive::validate_archive_name(&descriptor.archive_name)
            .map_err(|e| TransferError::Protocol(e.to_string()))?;

        descriptor.total_size = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(TransferError::Cancelled),
            result = tokio::time::timeout(timeout, read_size(&mut reader)) => match result {
                Ok(size) => size?,
                Err(_) => {
                    debug!("no size line, progress will be reported in bytes");
                    None
                }
            },
        };

        info!(
            kind = %descriptor.kind,
            archive = %descriptor.archive_name,
            size = ?descriptor.total_size,
            "handshake received"
        );
        on_event(SessionEvent::Handshake(descriptor.clone()));

        write_hello(writer).await?;
        on_event(SessionEvent::Accepted);

        tokio::fs::create_dir_all(&self.options.scratch_dir).await?;
        let temp_path = self
            .options
            .scratch_dir
            .join(format!("{TEMP_PREFIX}{}", descriptor.archive_name));
        let bytes_received = match self
            .store(&mut reader, &temp_path, &descriptor, on_event)
            .await
        {
            Ok(n) => n,
            Err(e) => {
                remove_quietly(&temp_path).await;
                return Err(e);
            }
        };

        let actual = match vimsicles_archive::digest_file(&temp_path).await {
            Ok(d) => d,
            Err(e) => {
                remove_quietly(&temp_path).await;
                return Err(e.into());
            }
        };
        if actual != descriptor.content_digest {
            remove_quietly(&temp_path).await;
            return Err(TransferError::Integrity {
                expected: descriptor.content_digest.clone(),
                actual,
            });
        }
        debug!(digest = %actual, bytes_received, "digest verified");

        let archive_path = self.options.scratch_dir.join(&descriptor.archive_name);
        if let Err(e) = tokio::fs::rename(&temp_path, &archive_path).await {
            remove_quietly(&temp_path).await;
            return Err(e.into());
        }

        on_event(SessionEvent::Extracting);
        let destination = self.options.destination_dir.clone();
        let source = archive_path.clone();
        let unpacked =
            tokio::task::spawn_blocking(move || vimsicles_archive::unpack(&source, &destination))
                .await;
        remove_quietly(&archive_path).await;

        let extracted = unpacked.map_err(|e| TransferError::Io(std::io::Error::other(e)))??;
        Ok(ReceiveReport {
            descriptor,
            bytes_received,
            extracted,
        })
    }

    async fn store<R, F>(
        &self,
        reader: &mut R,
        temp_path: &Path,
        descriptor: &TransferDescriptor,
        on_event: &F,
    ) -> Result<u64, TransferError>
    where
        R: AsyncBufRead + Unpin,
        F: Fn(SessionEvent) + Send + Sync,
    {
        let file = tokio::fs::File::create(temp_path).await?;
        let mut file = BufWriter::with_capacity(CHUNK_SIZE, file);
        copy_with_progress(
            reader,
            &mut file,
            descriptor.total_size,
            &self.cancel,
            |p| on_event(SessionEvent::Progress(p)),
        )
        .await
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove scratch file");
        }
    }
}

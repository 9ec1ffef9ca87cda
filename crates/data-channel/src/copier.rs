//! Chunked stream copy with progress accounting.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::CHUNK_SIZE;
use crate::error::TransferError;
use crate::progress::Progress;

/// Tracks bytes moved against an optional total.
///
/// Percent is `floor(moved * 100 / total)`, so it can repeat across chunks
/// and only reaches 100 when `moved == total`. Once `moved` passes an
/// advertised total the hint is dropped and byte counts are reported.
#[derive(Debug, Clone)]
pub struct ProgressMeter {
    total: Option<u64>,
    moved: u64,
}

impl ProgressMeter {
    /// A total of zero is treated as unknown.
    pub fn new(total_hint: Option<u64>) -> Self {
        Self {
            total: total_hint.filter(|&t| t > 0),
            moved: 0,
        }
    }

    pub fn moved(&self) -> u64 {
        self.moved
    }

    /// Records `n` more bytes and returns the progress to report.
    pub fn advance(&mut self, n: u64) -> Progress {
        self.moved += n;
        match self.total {
            Some(total) if self.moved <= total => {
                let percent = u128::from(self.moved) * 100 / u128::from(total);
                Progress::Percent(percent as u8)
            }
            Some(_) => {
                self.total = None;
                Progress::Bytes(self.moved)
            }
            None => Progress::Bytes(self.moved),
        }
    }
}

/// Copies `source` into `sink` in [`CHUNK_SIZE`] chunks until EOF.
///
/// `on_progress` runs after every chunk written. Cancellation is checked
/// between chunks and also ends a read or write stuck waiting on the peer;
/// a chunk interrupted that way is not reported. Returns the number of bytes
/// moved; the sink is flushed.
pub async fn copy_with_progress<R, W, F>(
    source: &mut R,
    sink: &mut W,
    total_hint: Option<u64>,
    cancel: &CancellationToken,
    mut on_progress: F,
) -> Result<u64, TransferError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    F: FnMut(Progress),
{
    let mut meter = ProgressMeter::new(total_hint);
    let mut buf = vec![0u8; CHUNK_SIZE];

    loop {
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        let n = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
            read = source.read(&mut buf) => read?,
        };
        if n == 0 {
            break;
        }

        // A peer that stops reading must not outlive cancellation.
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
            written = sink.write_all(&buf[..n]) => written?,
        }
        on_progress(meter.advance(n as u64));
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(TransferError::Cancelled),
        flushed = sink.flush() => flushed?,
    }
    Ok(meter.moved())
}

//! Line-based handshake for archive transfers.
//!
//! # Wire format
//!
//! ```text
//! HEADER (Sender -> Receiver):  "<kind>|<archiveName>|<digestHex>\n"
//! SIZE   (Sender -> Receiver):  "<byteLength>\n"   (empty or unparsable = unknown)
//! ACCEPT (Receiver -> Sender):  "HELLO\n"          (only after user approval)
//! DATA   (Sender -> Receiver):  raw archive bytes until the sender closes
//! ```
//!
//! `kind` is `file` or `folder`; `digestHex` is the lowercase 32-character
//! MD5 of the archive bytes. A trailing `\r` is tolerated on every line.

use std::fmt;
use std::str::FromStr;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::MAX_LINE_LEN;
use crate::error::TransferError;

/// Acceptance line sent by the receiver.
pub const HELLO: &str = "HELLO";

/// Field separator of the header line.
pub const FIELD_SEPARATOR: char = '|';

/// What the sender is transferring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    File,
    Folder,
}

impl TransferKind {
    /// `folder` when more than one logical file is packed.
    pub fn for_file_count(count: usize) -> Self {
        if count > 1 { Self::Folder } else { Self::File }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Folder => "folder",
        }
    }
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransferKind {
    type Err = TransferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(Self::File),
            "folder" => Ok(Self::Folder),
            other => Err(TransferError::Protocol(format!(
                "unknown transfer kind: {other:?}"
            ))),
        }
    }
}

/// Describes the archive that follows the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferDescriptor {
    pub kind: TransferKind,
    pub archive_name: String,
    /// Lowercase hex MD5 of the archive bytes.
    pub content_digest: String,
    /// Advisory payload length; `None` when unknown.
    pub total_size: Option<u64>,
}

impl TransferDescriptor {
    /// Renders the header line (without delimiter).
    pub fn header_line(&self) -> Result<String, TransferError> {
        if self.archive_name.is_empty() || self.archive_name.contains(FIELD_SEPARATOR) {
            return Err(TransferError::Protocol(format!(
                "archive name not representable: {:?}",
                self.archive_name
            )));
        }
        validate_digest(&self.content_digest)?;
        Ok(format!(
            "{}{FIELD_SEPARATOR}{}{FIELD_SEPARATOR}{}",
            self.kind, self.archive_name, self.content_digest
        ))
    }

    /// Parses a header line. The size is left unknown.
    pub fn parse_header_line(line: &str) -> Result<Self, TransferError> {
        let fields: Vec<&str> = line.split(FIELD_SEPARATOR).collect();
        let [kind, archive_name, digest] = fields.as_slice() else {
            return Err(TransferError::Protocol(format!(
                "malformed header line: expected 3 fields, got {}",
                fields.len()
            )));
        };

        let kind = kind.parse::<TransferKind>()?;
        if archive_name.is_empty() {
            return Err(TransferError::Protocol("empty archive name".into()));
        }
        validate_digest(digest)?;

        Ok(Self {
            kind,
            archive_name: archive_name.to_string(),
            content_digest: digest.to_string(),
            total_size: None,
        })
    }
}

/// Parses the optional size line; zero, empty or garbage means unknown.
pub fn parse_size_line(line: &str) -> Option<u64> {
    line.trim().parse::<u64>().ok().filter(|&n| n > 0)
}

fn validate_digest(digest: &str) -> Result<(), TransferError> {
    let valid = digest.len() == vimsicles_archive::DIGEST_HEX_LEN
        && digest
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
    if valid {
        Ok(())
    } else {
        Err(TransferError::Protocol(format!(
            "digest must be 32 lowercase hex characters: {digest:?}"
        )))
    }
}

/// Reads one control line, without its delimiter.
///
/// Returns `None` if the stream is at EOF before any byte arrives.
pub async fn read_line<R: AsyncBufRead + Unpin>(
    reader: &mut R,
) -> Result<Option<String>, TransferError> {
    let mut buf = Vec::new();
    let n = (&mut *reader)
        .take(MAX_LINE_LEN as u64)
        .read_until(b'\n', &mut buf)
        .await?;
    if n == 0 {
        return Ok(None);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
    } else if n >= MAX_LINE_LEN {
        return Err(TransferError::Protocol(format!(
            "control line exceeds {MAX_LINE_LEN} bytes"
        )));
    }
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }

    String::from_utf8(buf)
        .map(Some)
        .map_err(|e| TransferError::Protocol(format!("invalid UTF-8 line: {e}")))
}

/// Writes the header and size lines, then flushes.
pub async fn write_descriptor<W: AsyncWrite + Unpin>(
    writer: &mut W,
    descriptor: &TransferDescriptor,
) -> Result<(), TransferError> {
    let size = descriptor
        .total_size
        .map(|n| n.to_string())
        .unwrap_or_default();
    let lines = format!("{}\n{size}\n", descriptor.header_line()?);
    writer.write_all(lines.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads the header line.
pub async fn read_header<R: AsyncBufRead + Unpin>(
    reader: &mut R,
) -> Result<TransferDescriptor, TransferError> {
    match read_line(reader).await? {
        Some(line) => TransferDescriptor::parse_header_line(&line),
        None => Err(TransferError::Protocol(
            "connection closed before handshake".into(),
        )),
    }
}

/// Reads the optional size line. EOF counts as unknown.
pub async fn read_size<R: AsyncBufRead + Unpin>(
    reader: &mut R,
) -> Result<Option<u64>, TransferError> {
    Ok(read_line(reader).await?.as_deref().and_then(parse_size_line))
}

/// Writes the acceptance line and flushes.
pub async fn write_hello<W: AsyncWrite + Unpin>(writer: &mut W) -> Result<(), TransferError> {
    writer.write_all(format!("{HELLO}\n").as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one line and reports whether it was the acceptance line.
pub async fn read_hello<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<bool, TransferError> {
    Ok(read_line(reader).await?.as_deref() == Some(HELLO))
}

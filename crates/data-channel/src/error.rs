//! Error types for the data channel.

use std::fmt;

use vimsicles_archive::ArchiveError;

/// Errors produced by the transfer engine.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("cannot listen on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot reach {addr}: {reason}")]
    Connect { addr: String, reason: String },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("connection rejected by receiver")]
    ConnectionRejected,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("integrity check failed: expected {expected}, got {actual}")]
    Integrity { expected: String, actual: String },

    #[error("corrupt archive: {0}")]
    CorruptArchive(String),

    #[error("cancelled")]
    Cancelled,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("a transfer is already in progress")]
    Busy,
}

/// Error classification surfaced to collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Bind,
    Connect,
    Protocol,
    ConnectionRejected,
    Io,
    Integrity,
    CorruptArchive,
    Cancelled,
    InvalidRequest,
    Busy,
}

impl TransferError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Bind { .. } => ErrorKind::Bind,
            Self::Connect { .. } => ErrorKind::Connect,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::ConnectionRejected => ErrorKind::ConnectionRejected,
            Self::Io(_) => ErrorKind::Io,
            Self::Integrity { .. } => ErrorKind::Integrity,
            Self::CorruptArchive(_) => ErrorKind::CorruptArchive,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::Busy => ErrorKind::Busy,
        }
    }
}

impl From<ArchiveError> for TransferError {
    fn from(err: ArchiveError) -> Self {
        match err {
            ArchiveError::Io(e) => Self::Io(e),
            ArchiveError::Corrupt(msg) => Self::CorruptArchive(msg),
            ArchiveError::InvalidEntry(msg) => Self::InvalidRequest(msg),
            ArchiveError::Empty => Self::InvalidRequest("no files to send".into()),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Bind => "bind",
            Self::Connect => "connect",
            Self::Protocol => "protocol",
            Self::ConnectionRejected => "connection_rejected",
            Self::Io => "io",
            Self::Integrity => "integrity",
            Self::CorruptArchive => "corrupt_archive",
            Self::Cancelled => "cancelled",
            Self::InvalidRequest => "invalid_request",
            Self::Busy => "busy",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_errors_map_to_kinds() {
        let corrupt: TransferError = ArchiveError::Corrupt("bad header".into()).into();
        assert_eq!(corrupt.kind(), ErrorKind::CorruptArchive);

        let io: TransferError =
            ArchiveError::Io(std::io::Error::other("disk full")).into();
        assert_eq!(io.kind(), ErrorKind::Io);

        let empty: TransferError = ArchiveError::Empty.into();
        assert_eq!(empty.kind(), ErrorKind::InvalidRequest);
    }

    #[test]
    fn integrity_message_names_both_digests() {
        let err = TransferError::Integrity {
            expected: "aa".into(),
            actual: "bb".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("aa") && msg.contains("bb"));
    }

    #[test]
    fn kind_display() {
        assert_eq!(ErrorKind::ConnectionRejected.to_string(), "connection_rejected");
        assert_eq!(ErrorKind::Integrity.to_string(), "integrity");
    }
}

//! Error types for archive packaging.

/// Errors produced while packing or unpacking an archive.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The archive bytes could not be decoded or contained an unsafe entry.
    #[error("corrupt archive: {0}")]
    Corrupt(String),

    #[error("invalid entry name: {0}")]
    InvalidEntry(String),

    #[error("no files to pack")]
    Empty,
}

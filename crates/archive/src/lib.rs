//! Archive packaging for peer-to-peer transfers.
//!
//! A transfer moves exactly one archive: a gzip-compressed tar stream built
//! deterministically from a set of logical files. The MD5 digest of the
//! archive bytes is the content digest announced in the handshake, so it is
//! computed over exactly the bytes written to disk (and later to the wire).
//!
//! Received archives are extracted into a staging directory first and only
//! moved under their final names once every entry unpacked cleanly.

mod digest;
mod error;
mod pack;
mod unpack;
mod validation;

pub use digest::{DigestWriter, digest_bytes, digest_file};
pub use error::ArchiveError;
pub use pack::{PackedArchive, SourceFile, archive_name, pack};
pub use unpack::unpack;
pub use validation::{validate_archive_name, validate_entry_name};

/// Length of a hex-encoded MD5 digest.
pub const DIGEST_HEX_LEN: usize = 32;

/// File extension of every archive produced by [`pack`].
pub const ARCHIVE_EXTENSION: &str = "tar.gz";

//! TCP data channel for approved archive transfers.
//!
//! One connection carries one archive. The sender dials, announces the
//! archive with two text lines, waits for the receiver's `HELLO` and then
//! streams the raw archive bytes until it closes its write side.
//!
//! # Wire format
//!
//! See [`wire`] for the line format.

pub mod copier;
pub mod error;
pub mod progress;
pub mod receiver;
pub mod sender;
pub mod wire;

pub use error::{ErrorKind, TransferError};
pub use progress::{Progress, format_bytes};
pub use receiver::{ReceiveReport, ReceiverOptions, TransferReceiver};
pub use sender::{SendReport, SendRequest, SenderOptions, TransferSender};
pub use wire::{TransferDescriptor, TransferKind};

use std::time::Duration;

/// Fixed chunk size used when streaming archive bytes (8 KiB).
pub const CHUNK_SIZE: usize = 8 * 1024;

/// Port used when the caller does not pick one.
pub const DEFAULT_PORT: u16 = 8080;

/// Timeout for the TCP connection attempt.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// How long the receiver waits for the size line once the header arrived.
///
/// The header itself has no deadline: the sender packs after dialing.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a sender waits for `HELLO` before treating silence as rejection.
///
/// Slightly above the receiver's approval deadline so the receiver's close
/// normally arrives first.
pub const HELLO_TIMEOUT: Duration = Duration::from_secs(35);

/// Upper bound on a single control line, delimiter included.
pub const MAX_LINE_LEN: usize = 4096;

/// Observable steps of a running session, reported through a callback.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The descriptor was sent (sender) or received (receiver).
    Handshake(TransferDescriptor),
    /// The receiver answered `HELLO`; bulk data follows.
    Accepted,
    /// Bytes moved so far.
    Progress(Progress),
    /// The verified archive is being unpacked.
    Extracting,
}

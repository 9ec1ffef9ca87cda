//! Engine configuration.

use std::path::PathBuf;
use std::time::Duration;

use vimsicles_data_channel::{
    CONNECT_TIMEOUT, HANDSHAKE_TIMEOUT, HELLO_TIMEOUT, ReceiverOptions, SenderOptions,
};

/// How long a connection may wait in the pending slot.
pub const APPROVAL_TIMEOUT: Duration = Duration::from_secs(30);

/// Paths and timeouts used by the gate and both session kinds.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Final location of extracted files.
    pub destination_dir: PathBuf,
    /// In-flight archives, both outgoing and incoming.
    pub scratch_dir: PathBuf,
    /// Deadline for approving a pending connection, counted from accept.
    pub approval_timeout: Duration,
    /// Wait for the size line after the header.
    pub handshake_timeout: Duration,
    pub connect_timeout: Duration,
    pub hello_timeout: Duration,
}

impl EngineConfig {
    pub fn new(destination_dir: impl Into<PathBuf>, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            destination_dir: destination_dir.into(),
            scratch_dir: scratch_dir.into(),
            approval_timeout: APPROVAL_TIMEOUT,
            handshake_timeout: HANDSHAKE_TIMEOUT,
            connect_timeout: CONNECT_TIMEOUT,
            hello_timeout: HELLO_TIMEOUT,
        }
    }

    pub fn receiver_options(&self) -> ReceiverOptions {
        ReceiverOptions {
            destination_dir: self.destination_dir.clone(),
            scratch_dir: self.scratch_dir.clone(),
            handshake_timeout: self.handshake_timeout,
        }
    }

    pub fn sender_options(&self) -> SenderOptions {
        SenderOptions {
            scratch_dir: self.scratch_dir.clone(),
            connect_timeout: self.connect_timeout,
            hello_timeout: self.hello_timeout,
        }
    }
}

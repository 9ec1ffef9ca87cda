//! Commands accepted and events emitted by the engine.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

use vimsicles_archive::SourceFile;
use vimsicles_data_channel::{
    ErrorKind, Progress, SessionEvent, TransferDescriptor, TransferError,
};

/// Which end of a transfer a session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionRole {
    Sender,
    Receiver,
}

impl fmt::Display for SessionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sender => f.write_str("sender"),
            Self::Receiver => f.write_str("receiver"),
        }
    }
}

/// Observable state of the receiving side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateState {
    /// No listener.
    Idle,
    /// Listening with an empty pending slot.
    Listening,
    /// A connection from `remote_address` awaits a decision.
    PendingApproval { remote_address: String },
    /// Terminal; the listener is closed.
    Stopped,
}

/// How a pending connection left the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Approved,
    Rejected,
    TimedOut,
    /// A newer connection took the slot.
    Superseded,
}

/// Events emitted by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// The gate is accepting connections.
    Listening { local_addr: SocketAddr },
    /// A connection waits for approval.
    PendingConnection {
        remote_address: String,
        peer: SocketAddr,
    },
    PendingResolved {
        remote_address: String,
        resolution: Resolution,
    },
    SessionStarted { role: SessionRole },
    /// The descriptor was sent or received.
    Handshake {
        role: SessionRole,
        descriptor: TransferDescriptor,
    },
    /// The receiver answered `HELLO`.
    Accepted { role: SessionRole },
    Progress { role: SessionRole, progress: Progress },
    /// The verified archive is being unpacked.
    Extracting,
    Completed {
        role: SessionRole,
        archive_name: String,
        bytes: u64,
        /// Files written to the destination directory; empty when sending.
        extracted: Vec<PathBuf>,
    },
    /// A session or the gate failed. `role` is `None` for gate failures.
    Failed {
        role: Option<SessionRole>,
        kind: ErrorKind,
        message: String,
    },
    /// The gate closed its listener for good.
    GateStopped,
}

impl EngineEvent {
    pub(crate) fn from_session(role: SessionRole, event: SessionEvent) -> Self {
        match event {
            SessionEvent::Handshake(descriptor) => Self::Handshake { role, descriptor },
            SessionEvent::Accepted => Self::Accepted { role },
            SessionEvent::Progress(progress) => Self::Progress { role, progress },
            SessionEvent::Extracting => Self::Extracting,
        }
    }

    pub(crate) fn failed(role: Option<SessionRole>, err: &TransferError) -> Self {
        Self::Failed {
            role,
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    /// True for the last event a session emits.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }
}

/// Typed commands accepted by [`TransferEngine::execute`](crate::TransferEngine::execute).
#[derive(Debug)]
pub enum EngineCommand {
    StartListening { port: u16 },
    StopListening,
    Approve { remote_address: String },
    Reject { remote_address: String },
    StartSend {
        host: String,
        port: u16,
        files: Vec<SourceFile>,
    },
    CancelSend,
}

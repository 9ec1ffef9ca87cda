//! Peer-to-peer transfer engine.
//!
//! The engine owns at most one [`ConnectionGate`] (receiving side) and at
//! most one outbound send. Collaborators drive it with [`EngineCommand`]s
//! or the equivalent methods on [`TransferEngine`] and observe it through
//! a single [`EngineEvent`] stream.
//!
//! # Receiving
//!
//! 1. **Listen**: the gate binds the port and accepts connections
//! 2. **Hold**: one connection waits in the pending slot until approved,
//!    rejected, superseded or timed out
//! 3. **Receive**: an approved connection is handed to a receive session
//!
//! # Sending
//!
//! A send dials the peer directly; there is no gate on this side.

pub mod config;
pub mod engine;
mod events;
pub mod gate;
pub mod types;

pub use config::{APPROVAL_TIMEOUT, EngineConfig};
pub use engine::TransferEngine;
pub use gate::{ConnectionGate, GateHandle};
pub use types::{EngineCommand, EngineEvent, GateState, Resolution, SessionRole};

pub use vimsicles_archive::SourceFile;
pub use vimsicles_data_channel::{ErrorKind, Progress, TransferDescriptor, TransferError};

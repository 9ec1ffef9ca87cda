//! Connection gate (receiving side).
//!
//! A single actor task owns the listener, the pending slot and the active
//! receive session. Decisions reach it as messages, so the slot is never
//! touched from two tasks and decisions apply in the order they were issued.

use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vimsicles_data_channel::{TransferError, TransferReceiver};

use crate::config::EngineConfig;
use crate::events::{deliver, deliver_now, deliver_update};
use crate::types::{EngineEvent, GateState, Resolution, SessionRole};

enum GateCommand {
    Approve(String),
    Reject(String),
}

/// Handle to a running gate.
pub struct GateHandle {
    commands: mpsc::Sender<GateCommand>,
    state: watch::Receiver<GateState>,
    local_addr: SocketAddr,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl GateHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> GateState {
        self.state.borrow().clone()
    }

    /// Approves the pending connection if it came from `remote_address`.
    pub async fn approve(&self, remote_address: &str) {
        let _ = self
            .commands
            .send(GateCommand::Approve(remote_address.to_string()))
            .await;
    }

    /// Rejects the pending connection if it came from `remote_address`.
    pub async fn reject(&self, remote_address: &str) {
        let _ = self
            .commands
            .send(GateCommand::Reject(remote_address.to_string()))
            .await;
    }

    /// Stops the gate and waits until the listener, the pending connection
    /// and any active session are released. Idempotent.
    ///
    /// Safe to call from the task that drains the event stream: once stopped,
    /// the gate and its session no longer wait for room in the stream.
    pub async fn stop(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        self.cancel.cancel();
        if let Err(e) = task.await {
            warn!(error = %e, "gate task ended abnormally");
        }
    }
}

/// Entry point for starting a gate.
pub struct ConnectionGate;

impl ConnectionGate {
    /// Binds `0.0.0.0:port` and spawns the gate actor.
    ///
    /// Port 0 picks an ephemeral port; see [`GateHandle::local_addr`].
    pub async fn start(
        port: u16,
        config: EngineConfig,
        events: mpsc::Sender<EngineEvent>,
    ) -> Result<GateHandle, TransferError> {
        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .map_err(|source| TransferError::Bind { port, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| TransferError::Bind { port, source })?;
        info!(%local_addr, "listening for transfers");

        let (commands_tx, commands_rx) = mpsc::channel(16);
        let (state_tx, state_rx) = watch::channel(GateState::Listening);
        deliver_now(&events, EngineEvent::Listening { local_addr });

        let cancel = CancellationToken::new();
        let actor = GateActor {
            config,
            events,
            state: state_tx,
            cancel: cancel.clone(),
            pending: None,
            session: None,
        };
        let task = tokio::spawn(actor.run(listener, commands_rx));

        Ok(GateHandle {
            commands: commands_tx,
            state: state_rx,
            local_addr,
            cancel,
            task: Some(task),
        })
    }
}

struct PendingConnection {
    stream: TcpStream,
    peer: SocketAddr,
    deadline: Instant,
}

impl PendingConnection {
    fn remote_address(&self) -> String {
        self.peer.ip().to_string()
    }

    /// Accepts either the bare IP or the full `ip:port`.
    fn matches(&self, address: &str) -> bool {
        address == self.remote_address() || address == self.peer.to_string()
    }
}

struct ActiveSession {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct GateActor {
    config: EngineConfig,
    events: mpsc::Sender<EngineEvent>,
    state: watch::Sender<GateState>,
    cancel: CancellationToken,
    pending: Option<PendingConnection>,
    session: Option<ActiveSession>,
}

impl GateActor {
    async fn run(mut self, listener: TcpListener, mut commands: mpsc::Receiver<GateCommand>) {
        loop {
            let deadline = self.pending.as_ref().map(|p| p.deadline);

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                command = commands.recv() => match command {
                    Some(GateCommand::Approve(address)) => self.approve(&address).await,
                    Some(GateCommand::Reject(address)) => self.reject(&address).await,
                    None => break,
                },
                _ = deadline_elapsed(deadline) => self.expire().await,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => self.admit(stream, peer).await,
                    Err(e) => warn!(error = %e, "accept failed"),
                },
            }
        }

        drop(listener);
        self.shutdown().await;
    }

    async fn admit(&mut self, stream: TcpStream, peer: SocketAddr) {
        if self.session_active() {
            info!(%peer, "transfer in progress, closing new connection");
            drop(stream);
            return;
        }

        if let Some(old) = self.pending.take() {
            info!(peer = %old.peer, "pending connection superseded");
            let remote_address = old.remote_address();
            drop(old);
            self.emit(EngineEvent::PendingResolved {
                remote_address,
                resolution: Resolution::Superseded,
            })
            .await;
        }

        let pending = PendingConnection {
            stream,
            peer,
            deadline: Instant::now() + self.config.approval_timeout,
        };
        let remote_address = pending.remote_address();
        info!(%peer, "connection waiting for approval");
        self.pending = Some(pending);
        self.set_state(GateState::PendingApproval {
            remote_address: remote_address.clone(),
        });
        self.emit(EngineEvent::PendingConnection {
            remote_address,
            peer,
        })
        .await;
    }

    async fn approve(&mut self, address: &str) {
        let Some(pending) = self.take_matching(address) else {
            return;
        };
        let remote_address = pending.remote_address();
        info!(peer = %pending.peer, "connection approved");
        self.set_state(GateState::Listening);
        self.emit(EngineEvent::PendingResolved {
            remote_address,
            resolution: Resolution::Approved,
        })
        .await;
        self.spawn_session(pending.stream);
    }

    async fn reject(&mut self, address: &str) {
        let Some(pending) = self.take_matching(address) else {
            return;
        };
        info!(peer = %pending.peer, "connection rejected");
        self.close_pending(pending, Resolution::Rejected).await;
    }

    async fn expire(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        info!(peer = %pending.peer, "approval timed out");
        self.close_pending(pending, Resolution::TimedOut).await;
    }

    async fn close_pending(&mut self, pending: PendingConnection, resolution: Resolution) {
        let remote_address = pending.remote_address();
        drop(pending);
        self.set_state(GateState::Listening);
        self.emit(EngineEvent::PendingResolved {
            remote_address,
            resolution,
        })
        .await;
    }

    fn take_matching(&mut self, address: &str) -> Option<PendingConnection> {
        match &self.pending {
            Some(pending) if pending.matches(address) => self.pending.take(),
            Some(pending) => {
                debug!(%address, pending = %pending.peer, "decision for another connection ignored");
                None
            }
            None => {
                debug!(%address, "decision with no pending connection ignored");
                None
            }
        }
    }

    fn spawn_session(&mut self, stream: TcpStream) {
        let cancel = self.cancel.child_token();
        let receiver = TransferReceiver::new(self.config.receiver_options(), cancel.clone());
        let events = self.events.clone();

        let session_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            deliver(
                &events,
                &session_cancel,
                EngineEvent::SessionStarted {
                    role: SessionRole::Receiver,
                },
            )
            .await;

            let progress_tx = events.clone();
            let result = receiver
                .receive(stream, move |event| {
                    deliver_update(
                        &progress_tx,
                        EngineEvent::from_session(SessionRole::Receiver, event),
                    );
                })
                .await;

            let outcome = match result {
                Ok(report) => EngineEvent::Completed {
                    role: SessionRole::Receiver,
                    archive_name: report.descriptor.archive_name,
                    bytes: report.bytes_received,
                    extracted: report.extracted,
                },
                Err(e) => EngineEvent::failed(Some(SessionRole::Receiver), &e),
            };
            deliver(&events, &session_cancel, outcome).await;
        });

        self.session = Some(ActiveSession { cancel, handle });
    }

    fn session_active(&mut self) -> bool {
        if self.session.as_ref().is_some_and(|s| s.handle.is_finished()) {
            self.session = None;
        }
        self.session.is_some()
    }

    async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(pending) = self.pending.take() {
            debug!(peer = %pending.peer, "closing pending connection");
        }
        if let Some(session) = self.session.take() {
            session.cancel.cancel();
            if let Err(e) = session.handle.await {
                warn!(error = %e, "receive session ended abnormally");
            }
        }

        self.set_state(GateState::Stopped);
        info!("gate stopped");
        self.emit(EngineEvent::GateStopped).await;
    }

    fn set_state(&self, state: GateState) {
        self.state.send_replace(state);
    }

    async fn emit(&self, event: EngineEvent) {
        deliver(&self.events, &self.cancel, event).await;
    }
}

async fn deadline_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

//! Engine facade: typed commands in, one event stream out.

use std::net::SocketAddr;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use vimsicles_archive::SourceFile;
use vimsicles_data_channel::{SendRequest, TransferError, TransferSender};

use crate::config::EngineConfig;
use crate::events::{deliver, deliver_now, deliver_update};
use crate::gate::{ConnectionGate, GateHandle};
use crate::types::{EngineCommand, EngineEvent, GateState, SessionRole};

struct SendTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the receiving gate and the outbound send.
pub struct TransferEngine {
    config: EngineConfig,
    events_tx: mpsc::Sender<EngineEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<EngineEvent>>>,
    gate: Mutex<Option<GateHandle>>,
    send: Mutex<Option<SendTask>>,
}

impl TransferEngine {
    pub fn new(config: EngineConfig) -> Self {
        let (events_tx, events_rx) = mpsc::channel(256);
        Self {
            config,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            gate: Mutex::new(None),
            send: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Takes the event receiver. Can only be called once.
    pub async fn take_events(&self) -> Option<mpsc::Receiver<EngineEvent>> {
        self.events_rx.lock().await.take()
    }

    /// Runs one command. Errors are also reported on the event stream.
    pub async fn execute(&self, command: EngineCommand) -> Result<(), TransferError> {
        match command {
            EngineCommand::StartListening { port } => self.start_listening(port).await.map(|_| ()),
            EngineCommand::StopListening => {
                self.stop_listening().await;
                Ok(())
            }
            EngineCommand::Approve { remote_address } => {
                self.approve(&remote_address).await;
                Ok(())
            }
            EngineCommand::Reject { remote_address } => {
                self.reject(&remote_address).await;
                Ok(())
            }
            EngineCommand::StartSend { host, port, files } => {
                self.start_send(host, port, files).await
            }
            EngineCommand::CancelSend => {
                self.cancel_send().await;
                Ok(())
            }
        }
    }

    /// Starts the gate on `port` and returns the bound address.
    ///
    /// Fails with [`TransferError::Busy`] while a gate is already running.
    pub async fn start_listening(&self, port: u16) -> Result<SocketAddr, TransferError> {
        let mut gate = self.gate.lock().await;
        if let Some(running) = gate.as_ref() {
            if running.state() != GateState::Stopped {
                return Err(TransferError::Busy);
            }
        }

        match ConnectionGate::start(port, self.config.clone(), self.events_tx.clone()).await {
            Ok(handle) => {
                let addr = handle.local_addr();
                *gate = Some(handle);
                Ok(addr)
            }
            Err(e) => {
                error!(port, error = %e, "cannot start listening");
                deliver_now(&self.events_tx, EngineEvent::failed(None, &e));
                Err(e)
            }
        }
    }

    /// Stops the gate, if any. The gate stays in [`GateState::Stopped`].
    pub async fn stop_listening(&self) {
        if let Some(gate) = self.gate.lock().await.as_mut() {
            gate.stop().await;
        }
    }

    pub async fn approve(&self, remote_address: &str) {
        match self.gate.lock().await.as_ref() {
            Some(gate) => gate.approve(remote_address).await,
            None => debug!(%remote_address, "approve without a gate ignored"),
        }
    }

    pub async fn reject(&self, remote_address: &str) {
        match self.gate.lock().await.as_ref() {
            Some(gate) => gate.reject(remote_address).await,
            None => debug!(%remote_address, "reject without a gate ignored"),
        }
    }

    pub async fn gate_state(&self) -> GateState {
        self.gate
            .lock()
            .await
            .as_ref()
            .map_or(GateState::Idle, GateHandle::state)
    }

    /// Starts sending `files` to `host:port` in the background.
    ///
    /// Progress and the outcome arrive on the event stream. Fails with
    /// [`TransferError::Busy`] while a previous send is still running.
    pub async fn start_send(
        &self,
        host: String,
        port: u16,
        files: Vec<SourceFile>,
    ) -> Result<(), TransferError> {
        let mut slot = self.send.lock().await;
        if slot.as_ref().is_some_and(|task| !task.handle.is_finished()) {
            warn!(%host, port, "send requested while another is running");
            return Err(TransferError::Busy);
        }

        let cancel = CancellationToken::new();
        let sender = TransferSender::new(self.config.sender_options(), cancel.clone());
        let events = self.events_tx.clone();
        info!(%host, port, files = files.len(), "starting send");

        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            deliver(
                &events,
                &task_cancel,
                EngineEvent::SessionStarted {
                    role: SessionRole::Sender,
                },
            )
            .await;

            let progress_tx = events.clone();
            let result = sender
                .send(SendRequest { host, port, files }, move |event| {
                    deliver_update(
                        &progress_tx,
                        EngineEvent::from_session(SessionRole::Sender, event),
                    );
                })
                .await;

            let outcome = match result {
                Ok(report) => EngineEvent::Completed {
                    role: SessionRole::Sender,
                    archive_name: report.descriptor.archive_name,
                    bytes: report.bytes_sent,
                    extracted: Vec::new(),
                },
                Err(e) => {
                    warn!(error = %e, "send failed");
                    EngineEvent::failed(Some(SessionRole::Sender), &e)
                }
            };
            deliver(&events, &task_cancel, outcome).await;
        });

        *slot = Some(SendTask { cancel, handle });
        Ok(())
    }

    /// Cancels the running send and waits for it to wind down.
    ///
    /// Safe to call from the task that drains the event stream.
    pub async fn cancel_send(&self) {
        let Some(task) = self.send.lock().await.take() else {
            return;
        };
        task.cancel.cancel();
        if let Err(e) = task.handle.await {
            warn!(error = %e, "send task ended abnormally");
        }
    }

    /// Cancels the send and stops the gate.
    pub async fn shutdown(&self) {
        self.cancel_send().await;
        self.stop_listening().await;
    }
}

//! End-to-end transfers between two engines over loopback.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use vimsicles_engine::{
    EngineConfig, EngineEvent, ErrorKind, GateState, Progress, Resolution, SessionRole,
    SourceFile, TransferEngine,
};

struct Peer {
    dir: tempfile::TempDir,
    engine: TransferEngine,
    events: mpsc::Receiver<EngineEvent>,
}

impl Peer {
    async fn new(tune: impl FnOnce(&mut EngineConfig)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = EngineConfig::new(dir.path().join("dest"), dir.path().join("scratch"));
        tune(&mut config);
        let engine = TransferEngine::new(config);
        let events = engine.take_events().await.unwrap();
        Self { dir, engine, events }
    }

    fn dest(&self) -> PathBuf {
        self.dir.path().join("dest")
    }

    fn scratch(&self) -> PathBuf {
        self.dir.path().join("scratch")
    }

    /// Starts listening on an ephemeral port and returns it.
    async fn listen(&mut self) -> u16 {
        let addr = self.engine.start_listening(0).await.unwrap();
        assert!(matches!(
            self.next().await,
            EngineEvent::Listening { .. }
        ));
        addr.port()
    }

    async fn next(&mut self) -> EngineEvent {
        tokio::time::timeout(Duration::from_secs(10), self.events.recv())
            .await
            .expect("event within 10s")
            .expect("event channel open")
    }

    /// Collects events up to and including the first terminal one.
    async fn until_terminal(&mut self) -> Vec<EngineEvent> {
        let mut seen = Vec::new();
        loop {
            let event = self.next().await;
            let done = event.is_terminal();
            seen.push(event);
            if done {
                return seen;
            }
        }
    }

    async fn expect_pending(&mut self) -> String {
        match self.next().await {
            EngineEvent::PendingConnection { remote_address, .. } => remote_address,
            other => panic!("expected a pending connection, got {other:?}"),
        }
    }
}

fn write_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

fn entries(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

#[tokio::test]
async fn approved_single_file_lands_in_destination() {
    let mut receiver = Peer::new(|_| {}).await;
    let mut sender = Peer::new(|_| {}).await;
    let port = receiver.listen().await;

    let source = write_file(&sender.dir.path().join("src"), "hello.txt", b"0123456789");
    sender
        .engine
        .start_send(
            "127.0.0.1".into(),
            port,
            vec![SourceFile::from_path(&source).unwrap()],
        )
        .await
        .unwrap();

    let remote = receiver.expect_pending().await;
    assert_eq!(remote, "127.0.0.1");
    receiver.engine.approve(&remote).await;

    let received = receiver.until_terminal().await;
    assert_eq!(
        received[0],
        EngineEvent::PendingResolved {
            remote_address: "127.0.0.1".into(),
            resolution: Resolution::Approved,
        }
    );
    assert_eq!(
        received[1],
        EngineEvent::SessionStarted {
            role: SessionRole::Receiver
        }
    );
    assert!(received.contains(&EngineEvent::Progress {
        role: SessionRole::Receiver,
        progress: Progress::Percent(100),
    }));
    assert!(received.contains(&EngineEvent::Extracting));
    match received.last().unwrap() {
        EngineEvent::Completed {
            role, extracted, ..
        } => {
            assert_eq!(*role, SessionRole::Receiver);
            assert_eq!(extracted, &vec![PathBuf::from("hello.txt")]);
        }
        other => panic!("expected completion, got {other:?}"),
    }
    assert_eq!(
        std::fs::read(receiver.dest().join("hello.txt")).unwrap(),
        b"0123456789"
    );
    assert_eq!(entries(&receiver.scratch()), 0);

    let sent = sender.until_terminal().await;
    assert!(sent.iter().any(|e| matches!(
        e,
        EngineEvent::Handshake {
            role: SessionRole::Sender,
            ..
        }
    )));
    assert!(matches!(
        sent.last().unwrap(),
        EngineEvent::Completed {
            role: SessionRole::Sender,
            ..
        }
    ));
    assert_eq!(entries(&sender.scratch()), 0);

    receiver.engine.shutdown().await;
}

#[tokio::test]
async fn several_files_arrive_as_folder() {
    let mut receiver = Peer::new(|_| {}).await;
    let mut sender = Peer::new(|_| {}).await;
    let port = receiver.listen().await;

    sender
        .engine
        .start_send(
            "127.0.0.1".into(),
            port,
            vec![
                SourceFile::from_bytes("one.txt", b"first".to_vec()),
                SourceFile::from_bytes("two.txt", vec![7u8; 100_000]),
            ],
        )
        .await
        .unwrap();

    let remote = receiver.expect_pending().await;
    receiver.engine.approve(&remote).await;

    let received = receiver.until_terminal().await;
    let kind = received.iter().find_map(|e| match e {
        EngineEvent::Handshake { descriptor, .. } => Some(descriptor.kind),
        _ => None,
    });
    assert_eq!(kind, Some(vimsicles_data_channel::TransferKind::Folder));
    assert!(matches!(
        received.last().unwrap(),
        EngineEvent::Completed { .. }
    ));
    assert_eq!(std::fs::read(receiver.dest().join("one.txt")).unwrap(), b"first");
    assert_eq!(
        std::fs::read(receiver.dest().join("two.txt")).unwrap(),
        vec![7u8; 100_000]
    );

    receiver.engine.shutdown().await;
}

#[tokio::test]
async fn wrong_digest_is_integrity_failure() {
    let mut receiver = Peer::new(|_| {}).await;
    let port = receiver.listen().await;

    // A real archive, announced with a digest that does not match it.
    let staging = tempfile::tempdir().unwrap();
    let archive = vimsicles_archive::pack(
        vec![SourceFile::from_bytes("a.txt", b"payload".to_vec())],
        staging.path(),
        "transfer_42.tar.gz",
    )
    .unwrap();
    let body = std::fs::read(archive.path()).unwrap();

    let stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let (read, mut write) = stream.into_split();
    let header = format!(
        "file|transfer_42.tar.gz|deadbeefdeadbeefdeadbeefdeadbeef\n{}\n",
        body.len()
    );
    write.write_all(header.as_bytes()).await.unwrap();

    let remote = receiver.expect_pending().await;
    receiver.engine.approve(&remote).await;

    let mut read = BufReader::new(read);
    let mut hello = String::new();
    read.read_line(&mut hello).await.unwrap();
    assert_eq!(hello, "HELLO\n");
    write.write_all(&body).await.unwrap();
    write.shutdown().await.unwrap();

    let received = receiver.until_terminal().await;
    assert!(matches!(
        received.last().unwrap(),
        EngineEvent::Failed {
            role: Some(SessionRole::Receiver),
            kind: ErrorKind::Integrity,
            ..
        }
    ));
    assert!(!receiver.scratch().join("transfer_42.tar.gz").exists());
    assert!(!receiver.scratch().join("temp_transfer_42.tar.gz").exists());
    assert_eq!(entries(&receiver.dest()), 0);

    // The gate keeps listening after a failed session.
    assert_eq!(receiver.engine.gate_state().await, GateState::Listening);
    receiver.engine.shutdown().await;
}

#[tokio::test]
async fn unanswered_request_is_rejected_at_deadline() {
    let mut receiver = Peer::new(|c| c.approval_timeout = Duration::from_millis(300)).await;
    let mut sender = Peer::new(|_| {}).await;
    let port = receiver.listen().await;

    sender
        .engine
        .start_send(
            "127.0.0.1".into(),
            port,
            vec![SourceFile::from_bytes("late.txt", b"never".to_vec())],
        )
        .await
        .unwrap();

    receiver.expect_pending().await;
    assert!(matches!(
        receiver.next().await,
        EngineEvent::PendingResolved {
            resolution: Resolution::TimedOut,
            ..
        }
    ));

    let sent = sender.until_terminal().await;
    assert!(matches!(
        sent.last().unwrap(),
        EngineEvent::Failed {
            role: Some(SessionRole::Sender),
            kind: ErrorKind::ConnectionRejected,
            ..
        }
    ));
    assert_eq!(entries(&receiver.dest()), 0);
    receiver.engine.shutdown().await;
}

#[tokio::test]
async fn explicit_reject_reaches_sender() {
    let mut receiver = Peer::new(|_| {}).await;
    let mut sender = Peer::new(|_| {}).await;
    let port = receiver.listen().await;

    sender
        .engine
        .start_send(
            "127.0.0.1".into(),
            port,
            vec![SourceFile::from_bytes("nope.txt", b"x".to_vec())],
        )
        .await
        .unwrap();

    let remote = receiver.expect_pending().await;
    loop {
        if let EngineEvent::Handshake { .. } = sender.next().await {
            break;
        }
    }
    receiver.engine.reject(&remote).await;

    let sent = sender.until_terminal().await;
    assert!(matches!(
        sent.last().unwrap(),
        EngineEvent::Failed {
            kind: ErrorKind::ConnectionRejected,
            ..
        }
    ));
    receiver.engine.shutdown().await;
}

#[tokio::test]
async fn decision_for_other_address_changes_nothing() {
    let mut receiver = Peer::new(|_| {}).await;
    let port = receiver.listen().await;

    let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let remote = receiver.expect_pending().await;

    receiver.engine.reject("5.6.7.8").await;
    receiver.engine.approve("5.6.7.8").await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(
        receiver.engine.gate_state().await,
        GateState::PendingApproval {
            remote_address: remote.clone()
        }
    );
    assert!(receiver.events.try_recv().is_err());

    // Socket is still open: nothing to read, no EOF.
    let mut buf = [0u8; 1];
    assert!(
        tokio::time::timeout(Duration::from_millis(100), client.read(&mut buf))
            .await
            .is_err()
    );

    receiver.engine.reject(&remote).await;
    assert!(matches!(
        receiver.next().await,
        EngineEvent::PendingResolved {
            resolution: Resolution::Rejected,
            ..
        }
    ));
    receiver.engine.shutdown().await;
}

#[tokio::test]
async fn cancel_send_while_waiting_for_approval() {
    let mut receiver = Peer::new(|_| {}).await;
    let mut sender = Peer::new(|_| {}).await;
    let port = receiver.listen().await;

    sender
        .engine
        .start_send(
            "127.0.0.1".into(),
            port,
            vec![SourceFile::from_bytes("a.txt", b"a".to_vec())],
        )
        .await
        .unwrap();
    receiver.expect_pending().await;

    // Wait until the descriptor is on the wire.
    loop {
        if let EngineEvent::Handshake { .. } = sender.next().await {
            break;
        }
    }

    // Only one send at a time.
    let busy = sender
        .engine
        .start_send(
            "127.0.0.1".into(),
            port,
            vec![SourceFile::from_bytes("b.txt", b"b".to_vec())],
        )
        .await;
    assert!(matches!(busy, Err(vimsicles_engine::TransferError::Busy)));

    sender.engine.cancel_send().await;
    let sent = sender.until_terminal().await;
    assert!(matches!(
        sent.last().unwrap(),
        EngineEvent::Failed {
            kind: ErrorKind::Cancelled,
            ..
        }
    ));
    assert_eq!(entries(&sender.scratch()), 0);
    receiver.engine.shutdown().await;
}

#[tokio::test]
async fn connect_failure_is_reported() {
    let mut sender = Peer::new(|c| c.connect_timeout = Duration::from_secs(2)).await;
    let port = {
        let unused = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        unused.local_addr().unwrap().port()
    };

    sender
        .engine
        .start_send(
            "127.0.0.1".into(),
            port,
            vec![SourceFile::from_bytes("a.txt", b"a".to_vec())],
        )
        .await
        .unwrap();

    let sent = sender.until_terminal().await;
    assert!(matches!(
        sent.last().unwrap(),
        EngineEvent::Failed {
            kind: ErrorKind::Connect,
            ..
        }
    ));
}

#[tokio::test]
async fn stop_closes_pending_connection_and_listener() {
    let mut receiver = Peer::new(|_| {}).await;
    let port = receiver.listen().await;

    let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    receiver.expect_pending().await;

    receiver.engine.execute(vimsicles_engine::EngineCommand::StopListening).await.unwrap();
    assert_eq!(receiver.next().await, EngineEvent::GateStopped);
    assert_eq!(receiver.engine.gate_state().await, GateState::Stopped);

    let mut buf = [0u8; 1];
    let read = tokio::time::timeout(Duration::from_secs(5), client.read(&mut buf))
        .await
        .unwrap();
    assert!(matches!(read, Ok(0) | Err(_)));
    assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());
}

#[tokio::test]
async fn stop_cancels_active_session() {
    let mut receiver = Peer::new(|_| {}).await;
    let port = receiver.listen().await;

    // Handshake but never send the body, so the session stays in the copy.
    let stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let (read, mut write) = stream.into_split();
    write
        .write_all(b"file|transfer_7.tar.gz|0123456789abcdef0123456789abcdef\n100\n")
        .await
        .unwrap();
    let remote = receiver.expect_pending().await;
    receiver.engine.approve(&remote).await;

    let mut read = BufReader::new(read);
    let mut hello = String::new();
    read.read_line(&mut hello).await.unwrap();
    assert_eq!(hello, "HELLO\n");

    receiver.engine.stop_listening().await;
    let events = receiver.until_terminal().await;
    assert!(matches!(
        events.last().unwrap(),
        EngineEvent::Failed {
            kind: ErrorKind::Cancelled,
            ..
        }
    ));
    assert_eq!(receiver.next().await, EngineEvent::GateStopped);
    assert!(!receiver.scratch().join("temp_transfer_7.tar.gz").exists());
}

/// Reader that takes its time, like packing a large file.
struct Sluggish(std::io::Cursor<Vec<u8>>);

impl std::io::Read for Sluggish {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        std::thread::sleep(Duration::from_millis(400));
        std::io::Read::read(&mut self.0, buf)
    }
}

/// Bytes gzip cannot shrink, so the archive stays as large as the input.
fn incompressible(len: usize) -> Vec<u8> {
    let mut state = 0x9E37_79B9_7F4A_7C15u64;
    let mut out = Vec::with_capacity(len);
    while out.len() < len {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        out.extend_from_slice(&state.to_le_bytes());
    }
    out.truncate(len);
    out
}

#[tokio::test]
async fn slow_pack_with_prompt_approval_completes() {
    // The size-line timeout is far shorter than the pack.
    let mut receiver = Peer::new(|c| c.handshake_timeout = Duration::from_millis(300)).await;
    let mut sender = Peer::new(|_| {}).await;
    let port = receiver.listen().await;

    let content = b"slow bytes".to_vec();
    let files = vec![SourceFile::from_reader(
        "slow.bin",
        content.len() as u64,
        Box::new(Sluggish(std::io::Cursor::new(content.clone()))),
    )];
    sender
        .engine
        .start_send("127.0.0.1".into(), port, files)
        .await
        .unwrap();

    let remote = receiver.expect_pending().await;
    receiver.engine.approve(&remote).await;

    let received = receiver.until_terminal().await;
    assert!(
        matches!(
            received.last().unwrap(),
            EngineEvent::Completed {
                role: SessionRole::Receiver,
                ..
            }
        ),
        "{received:?}"
    );
    let sent = sender.until_terminal().await;
    assert!(matches!(
        sent.last().unwrap(),
        EngineEvent::Completed {
            role: SessionRole::Sender,
            ..
        }
    ));
    assert_eq!(std::fs::read(receiver.dest().join("slow.bin")).unwrap(), content);
    receiver.engine.shutdown().await;
}

#[tokio::test]
async fn stop_with_undrained_events_does_not_hang() {
    let mut receiver = Peer::new(|_| {}).await;
    let port = receiver.listen().await;

    let stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let (read, mut write) = stream.into_split();
    write
        .write_all(b"file|transfer_8.tar.gz|0123456789abcdef0123456789abcdef\n100000000\n")
        .await
        .unwrap();
    let remote = receiver.expect_pending().await;
    receiver.engine.approve(&remote).await;

    let mut read = BufReader::new(read);
    let mut hello = String::new();
    read.read_line(&mut hello).await.unwrap();
    assert_eq!(hello, "HELLO\n");

    // Far more progress than the event stream holds, and nobody reads it.
    let chunk = vec![0u8; 64 * 1024];
    for _ in 0..64 {
        write.write_all(&chunk).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    tokio::time::timeout(Duration::from_secs(5), receiver.engine.stop_listening())
        .await
        .expect("stop returns with a full event stream");
    assert_eq!(receiver.engine.gate_state().await, GateState::Stopped);

    let mut seen = Vec::new();
    while let Ok(event) = receiver.events.try_recv() {
        seen.push(event);
    }
    assert!(seen.iter().any(|e| matches!(
        e,
        EngineEvent::Failed {
            kind: ErrorKind::Cancelled,
            ..
        }
    )));
    assert_eq!(seen.last(), Some(&EngineEvent::GateStopped));
    assert!(!receiver.scratch().join("temp_transfer_8.tar.gz").exists());
}

#[tokio::test]
async fn cancel_send_with_stalled_peer_and_undrained_events() {
    let mut sender = Peer::new(|_| {}).await;
    let source = write_file(&sender.dir.path().join("src"), "big.bin", &incompressible(24 << 20));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (stalled_tx, stalled_rx) = tokio::sync::oneshot::channel();
    let peer = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut read = BufReader::new(read);
        let mut line = String::new();
        read.read_line(&mut line).await.unwrap();
        read.read_line(&mut line).await.unwrap();
        write.write_all(b"HELLO\n").await.unwrap();

        // Take a few MiB, then stop reading while holding the socket open.
        let mut taken = vec![0u8; 4 << 20];
        read.read_exact(&mut taken).await.unwrap();
        let _ = stalled_tx.send(());
        tokio::time::sleep(Duration::from_secs(60)).await;
        drop((read, write));
    });

    sender
        .engine
        .start_send(
            "127.0.0.1".into(),
            port,
            vec![SourceFile::from_path(&source).unwrap()],
        )
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(30), stalled_rx)
        .await
        .expect("peer read its share")
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    tokio::time::timeout(Duration::from_secs(5), sender.engine.cancel_send())
        .await
        .expect("cancel returns with a stalled peer and a full event stream");

    let mut seen = Vec::new();
    while let Ok(event) = sender.events.try_recv() {
        seen.push(event);
    }
    assert!(matches!(
        seen.last(),
        Some(EngineEvent::Failed {
            kind: ErrorKind::Cancelled,
            ..
        })
    ));
    assert!(
        seen.iter()
            .filter(|e| matches!(e, EngineEvent::Progress { .. }))
            .count()
            > 100
    );
    assert_eq!(entries(&sender.scratch()), 0);
    peer.abort();
}

//! Broadcast server
//!
//! Accepts listener connections, answers their time probes inline and
//! fans paced audio frames out to every session. The session set maps
//! remote addresses to shared write handles; probe replies go out
//! synchronously from the connection's read task so they are never queued
//! behind audio, while broadcast writes each run on their own task.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, SystemTime};

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use crate::config::AppConfig;
use crate::error::{NetworkError, ProtocolError, Result};
use crate::network::pacer::{FrameSink, Pacer};
use crate::protocol::{framing, AudioFrame, LatencyReply, Message, WireTime};

type WriteHandle = Arc<tokio::sync::Mutex<OwnedWriteHalf>>;

/// Active sessions, keyed by remote address
#[derive(Default)]
pub struct SessionSet {
    sessions: RwLock<HashMap<String, WriteHandle>>,
}

impl SessionSet {
    fn insert(&self, addr: String, handle: WriteHandle) {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(addr, handle);
    }

    fn remove(&self, addr: &str) {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(addr);
    }

    /// Snapshot the current write handles for fan-out
    fn handles(&self) -> Vec<(String, WriteHandle)> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(addr, handle)| (addr.clone(), handle.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Send-capability handed to the pacer: encodes once, then spawns one
/// write task per session. A failed write is logged and otherwise
/// ignored; dead peers surface through their read side.
pub struct Broadcaster {
    sessions: Arc<SessionSet>,
    runtime: tokio::runtime::Handle,
}

impl FrameSink for Broadcaster {
    fn send_frame(&self, frame: AudioFrame) {
        let bytes = match framing::encode_message(&Message::Audio(frame)) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!("failed to encode audio frame: {e}");
                return;
            }
        };

        for (addr, handle) in self.sessions.handles() {
            let bytes = bytes.clone();
            self.runtime.spawn(async move {
                let mut writer = handle.lock().await;
                if let Err(e) = writer.write_all(&bytes).await {
                    tracing::warn!(
                        "{}",
                        NetworkError::WriteFailed {
                            addr,
                            reason: e.to_string(),
                        }
                    );
                }
            });
        }
    }
}

/// The server endpoint: listener, session set and the pacer thread
pub struct BroadcastServer {
    config: AppConfig,
    source_path: String,
    sessions: Arc<SessionSet>,
}

impl BroadcastServer {
    pub fn new(config: AppConfig, source_path: String) -> Self {
        Self {
            config,
            source_path,
            sessions: Arc::new(SessionSet::default()),
        }
    }

    /// Accept listeners until `shutdown` fires, then stop the pacer and
    /// drop every session.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let bind_addr = format!("0.0.0.0:{}", self.config.network.port);
        let listener =
            TcpListener::bind(&bind_addr)
                .await
                .map_err(|e| NetworkError::BindFailed {
                    addr: bind_addr.clone(),
                    reason: e.to_string(),
                })?;

        tracing::info!("server is listening on {bind_addr}");

        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let mut pacer = Pacer::new(
            Broadcaster {
                sessions: self.sessions.clone(),
                runtime: tokio::runtime::Handle::current(),
            },
            self.config.audio.clone(),
            self.source_path.clone(),
            stop_rx,
        );
        let pacer_thread = std::thread::Builder::new()
            .name("pacer".into())
            .spawn(move || pacer.run())?;

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let sessions = self.sessions.clone();
                        tokio::spawn(async move {
                            handle_connection(stream, peer.to_string(), sessions).await;
                        });
                    }
                    Err(e) => tracing::warn!("accept failed: {e}"),
                },
                _ = shutdown.changed() => break,
            }
        }

        let _ = stop_tx.send(());
        let _ = tokio::task::spawn_blocking(move || pacer_thread.join()).await;

        tracing::info!("server is shutdown");
        Ok(())
    }
}

/// Per-connection read loop. Registers the session, answers probes, and
/// unregisters on any exit path. A decode error drops the connection;
/// the stream is positioned at a frame boundary or untouched, so the
/// disconnect is clean.
async fn handle_connection(stream: TcpStream, addr: String, sessions: Arc<SessionSet>) {
    tracing::info!("connection opened: {addr}");

    let (mut read_half, write_half) = stream.into_split();
    let handle: WriteHandle = Arc::new(tokio::sync::Mutex::new(write_half));
    sessions.insert(addr.clone(), handle.clone());

    let mut acc = BytesMut::with_capacity(8 * 1024);

    'conn: loop {
        loop {
            match framing::try_decode(&mut acc) {
                Ok(Some(msg)) => {
                    if !handle_message(msg, &handle, &addr).await {
                        break 'conn;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::error!("read message error from {addr}: {e}");
                    break 'conn;
                }
            }
        }

        match read_half.read_buf(&mut acc).await {
            Ok(0) => {
                if !acc.is_empty() {
                    tracing::warn!("{addr}: {}", ProtocolError::TruncatedStream);
                }
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("read error from {addr}: {e}");
                break;
            }
        }
    }

    sessions.remove(&addr);
    tracing::info!("connection closed: {addr}");
}

/// Handle one inbound message. Returns `false` when the connection
/// should close.
async fn handle_message(msg: Message, handle: &WriteHandle, addr: &str) -> bool {
    match msg {
        Message::TimeProbe(probe) => {
            let received = SystemTime::now();
            let measured = received
                .duration_since(probe.time.to_system())
                .unwrap_or(Duration::ZERO);

            let reply = Message::LatencyReply(LatencyReply {
                latency_ns: measured.as_nanos() as i64,
                time: WireTime::now(),
            });

            let bytes = match framing::encode_message(&reply) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::error!("failed to encode latency reply: {e}");
                    return true;
                }
            };

            // written inline so the reply is not queued behind audio
            let mut writer = handle.lock().await;
            if let Err(e) = writer.write_all(&bytes).await {
                tracing::error!(
                    "{}",
                    NetworkError::WriteFailed {
                        addr: addr.to_string(),
                        reason: e.to_string(),
                    }
                );
                return false;
            }
            true
        }
        other => {
            tracing::error!("unexpected message {:#x} from {addr}", other.tag());
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::TimeProbe;
    use bytes::BufMut;

    async fn read_one(stream: &mut TcpStream, acc: &mut BytesMut) -> Option<Message> {
        loop {
            if let Some(msg) = framing::try_decode(acc).unwrap() {
                return Some(msg);
            }
            if stream.read_buf(acc).await.unwrap() == 0 {
                return None;
            }
        }
    }

    async fn spawn_session() -> (TcpStream, Arc<SessionSet>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let sessions = Arc::new(SessionSet::default());

        let accept_sessions = sessions.clone();
        tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            handle_connection(stream, peer.to_string(), accept_sessions).await;
        });

        let client = TcpStream::connect(addr).await.unwrap();
        (client, sessions)
    }

    #[tokio::test]
    async fn probe_is_answered_with_a_latency_reply() {
        let (mut client, _sessions) = spawn_session().await;

        let sent = SystemTime::now() - Duration::from_millis(25);
        let probe = Message::TimeProbe(TimeProbe {
            time: WireTime::from_system(sent),
        });
        client
            .write_all(&framing::encode_message(&probe).unwrap())
            .await
            .unwrap();

        let mut acc = BytesMut::new();
        match read_one(&mut client, &mut acc).await.unwrap() {
            Message::LatencyReply(reply) => {
                // the server observed at least the 25 ms we backdated
                assert!(reply.latency_ns >= 25_000_000);
                assert!(reply.time.seconds > 0);
            }
            other => panic!("expected a latency reply, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_tag_drops_the_connection() {
        let (mut client, _sessions) = spawn_session().await;

        let mut bogus = BytesMut::new();
        bogus.put_u64(0x99);
        bogus.put_u64(4);
        bogus.extend_from_slice(&[0, 1, 2, 3]);
        client.write_all(&bogus).await.unwrap();

        let mut buf = [0u8; 16];
        // server closes; we observe EOF
        assert_eq!(client.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn broadcast_reaches_a_registered_session() {
        let (mut client, sessions) = spawn_session().await;

        // session registration happens in the accept task
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sessions.len(), 1);

        let broadcaster = Broadcaster {
            sessions: sessions.clone(),
            runtime: tokio::runtime::Handle::current(),
        };
        let frame = AudioFrame::new(
            vec![0.5; 4],
            vec![-0.5; 4],
            WireTime::from_system(SystemTime::now()),
        );
        broadcaster.send_frame(frame.clone());

        let mut acc = BytesMut::new();
        match read_one(&mut client, &mut acc).await.unwrap() {
            Message::Audio(got) => assert_eq!(got, frame),
            other => panic!("expected audio, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn session_is_removed_when_the_peer_disconnects() {
        let (client, sessions) = spawn_session().await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sessions.len(), 1);

        drop(client);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(sessions.is_empty());
    }
}

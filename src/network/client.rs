//! Reconnecting client
//!
//! A supervisor loop drives an explicit connection state machine:
//! disconnected, connecting, connected, shutting down. Shutdown is
//! observable from every state. While connected, a read task ingests
//! audio and latency replies, and a 100 ms ticker sends time probes and
//! watches the latency estimate.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::watch;

use crate::audio::Player;
use crate::config::AppConfig;
use crate::constants::{FRAME_STALE_CUTOFF, INITIAL_LATENCY, LATENCY_WARN_THRESHOLD};
use crate::error::{NetworkError, ProtocolError, Result};
use crate::protocol::{framing, Message, TimeProbe, WireTime};
use crate::sync::{format_duration, SyncClock};

enum ClientState {
    Disconnected,
    Connecting,
    Connected(TcpStream),
    ShuttingDown,
}

/// The listener endpoint: dials the server, keeps a synchronized clock
/// and feeds the player until told to shut down.
pub struct StreamClient {
    address: String,
    config: AppConfig,
    clock: Arc<SyncClock>,
    player: Arc<Player>,
    attempts: u32,
}

impl StreamClient {
    pub fn new(host: &str, config: AppConfig) -> Self {
        let address = format!("{host}:{}", config.network.port);
        let clock = Arc::new(SyncClock::new(INITIAL_LATENCY));
        let player = Arc::new(Player::new(clock.clone(), &config.audio, &config.playback));

        Self {
            address,
            config,
            clock,
            player,
            attempts: 0,
        }
    }

    /// Drive the state machine until shutdown or reconnect exhaustion.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut state = ClientState::Disconnected;

        loop {
            state = match state {
                ClientState::Disconnected => {
                    let max = self.config.network.reconnect_max_attempts;
                    if self.attempts >= max {
                        tracing::error!("tried to connect {max} times, giving up");
                        return Err(NetworkError::ReconnectExhausted(max).into());
                    }

                    // first dial is immediate; redials wait out the interval
                    if self.attempts > 0 {
                        tokio::select! {
                            _ = tokio::time::sleep(self.config.network.reconnect_interval) => {
                                ClientState::Connecting
                            }
                            _ = shutdown.changed() => ClientState::ShuttingDown,
                        }
                    } else {
                        ClientState::Connecting
                    }
                }
                ClientState::Connecting => {
                    self.attempts += 1;
                    match TcpStream::connect(&self.address).await {
                        Ok(stream) => {
                            tracing::info!("connected to {}", self.address);
                            self.attempts = 0;
                            ClientState::Connected(stream)
                        }
                        Err(e) => {
                            let err = NetworkError::ConnectFailed {
                                addr: self.address.clone(),
                                reason: e.to_string(),
                            };
                            tracing::warn!(
                                "{err}, retry in {}",
                                format_duration(self.config.network.reconnect_interval)
                            );
                            ClientState::Disconnected
                        }
                    }
                }
                ClientState::Connected(stream) => self.serve_connection(stream, &mut shutdown).await,
                ClientState::ShuttingDown => {
                    self.player.shutdown();
                    tracing::info!("client disconnect");
                    return Ok(());
                }
            };
        }
    }

    /// Run one live connection to completion. Returns the next state.
    async fn serve_connection(
        &self,
        stream: TcpStream,
        shutdown: &mut watch::Receiver<bool>,
    ) -> ClientState {
        self.player.start();

        let (read_half, mut write_half) = stream.into_split();
        let mut reader = tokio::spawn(read_loop(
            read_half,
            self.player.clone(),
            self.clock.clone(),
        ));

        let mut tick = tokio::time::interval(self.config.network.probe_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let next = loop {
            tokio::select! {
                _ = shutdown.changed() => break ClientState::ShuttingDown,
                _ = &mut reader => break ClientState::Disconnected,
                _ = tick.tick() => {
                    let probe = Message::TimeProbe(TimeProbe { time: WireTime::now() });
                    match framing::encode_message(&probe) {
                        Ok(bytes) => {
                            // non-fatal; a dead peer surfaces on the read side
                            if let Err(e) = write_half.write_all(&bytes).await {
                                tracing::warn!(
                                    "time probe: {}",
                                    NetworkError::WriteFailed {
                                        addr: self.address.clone(),
                                        reason: e.to_string(),
                                    }
                                );
                            }
                        }
                        Err(e) => tracing::warn!("failed to encode time probe: {e}"),
                    }

                    let latency = self.clock.latency();
                    if latency > LATENCY_WARN_THRESHOLD {
                        tracing::warn!("latency is high: {}", format_duration(latency));
                    }
                }
            }
        };

        reader.abort();
        self.player.release();
        tracing::info!("connection closed: {}", self.address);

        next
    }
}

/// Decode inbound messages until the stream ends or a decode error
/// forces a close. Audio frames are handed to a detached blocking task
/// because ring enqueue may block for backpressure.
async fn read_loop(mut read_half: OwnedReadHalf, player: Arc<Player>, clock: Arc<SyncClock>) {
    let mut acc = BytesMut::with_capacity(64 * 1024);

    loop {
        loop {
            match framing::try_decode(&mut acc) {
                Ok(Some(Message::Audio(frame))) => {
                    if frame.is_empty() {
                        continue;
                    }
                    if let Some(lag) = player.frame_lag(&frame) {
                        if lag > FRAME_STALE_CUTOFF {
                            tracing::warn!("dropping audio late by {}", format_duration(lag));
                            continue;
                        }
                    }

                    let player = player.clone();
                    tokio::task::spawn_blocking(move || {
                        player.ingest(&frame);
                    });
                }
                Ok(Some(Message::LatencyReply(reply))) => {
                    clock.update(&reply);
                }
                Ok(Some(other)) => {
                    tracing::error!("unexpected message {:#x} from server", other.tag());
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::error!("read message error: {e}");
                    return;
                }
            }
        }

        match read_half.read_buf(&mut acc).await {
            Ok(0) => {
                if !acc.is_empty() {
                    tracing::warn!("{}", ProtocolError::TruncatedStream);
                }
                return;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("read error: {e}");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;

    fn fast_config(port: u16, max_attempts: u32) -> AppConfig {
        let mut config = AppConfig::default();
        config.network.port = port;
        config.network.reconnect_interval = Duration::from_millis(20);
        config.network.reconnect_max_attempts = max_attempts;
        config
    }

    async fn unused_port() -> u16 {
        // bind then drop so connections to the port are refused
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn reconnect_exhaustion_is_fatal() {
        let port = unused_port().await;
        let (_tx, rx) = watch::channel(false);
        let mut client = StreamClient::new("127.0.0.1", fast_config(port, 3));

        let result = tokio::time::timeout(Duration::from_secs(5), client.run(rx))
            .await
            .expect("run should give up quickly");

        match result {
            Err(crate::Error::Network(NetworkError::ReconnectExhausted(3))) => {}
            other => panic!("expected reconnect exhaustion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn shutdown_is_observed_while_connected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        // hold the accepted socket open for the duration of the test
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(stream);
        });

        let (tx, rx) = watch::channel(false);
        let mut client = StreamClient::new("127.0.0.1", fast_config(port, 3));

        let run = tokio::spawn(async move { client.run(rx).await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(2), run)
            .await
            .expect("shutdown must be prompt")
            .unwrap();
        assert!(result.is_ok());

        server.abort();
    }
}

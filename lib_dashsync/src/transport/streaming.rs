//! # Streaming Transport
//!
//! Keeps one logical WebSocket subscription alive for the whole session.
//!
//! ## Lifecycle
//! 1. Connect. On a successful handshake, publish `connected = true`.
//! 2. Read frames in arrival order:
//!    - `update`: replace the slices it carries.
//!    - `prime_found`: overwrite the discovery holder and run observers
//!      before the next frame is read.
//!    - anything undecodable: log it and drop it, leaving `connected` alone.
//! 3. On close or error, publish `connected = false`, wait the fixed
//!    reconnect delay, and go back to 1. There is no retry limit.
//!
//! Client payloads go out through an unbounded channel that only exists
//! while a connection is up, so `send_message` is a silent no-op while
//! disconnected.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::configs::SyncConfig;
use crate::error::SyncError;
use crate::protocol::{decode_server_frame, decode_server_message, ServerMessage};
use crate::scheduler::ScheduledTask;
use crate::state::SyncState;
use crate::transport::{Transport, TransportMode};

/// How long teardown waits for the close handshake before dropping the socket.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

type Outbound = Arc<Mutex<Option<mpsc::UnboundedSender<String>>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// WebSocket-backed transport with unbounded fixed-delay reconnection.
pub struct StreamingTransport {
    url: Url,
    state: Arc<SyncState>,
    outbound: Outbound,
    task: ScheduledTask,
}

impl StreamingTransport {
    /// Starts the connection loop on the current tokio runtime.
    pub fn spawn(url: Url, reconnect_delay: Duration, state: Arc<SyncState>) -> Self {
        let outbound: Outbound = Arc::new(Mutex::new(None));
        let worker = StreamLoop {
            url: url.clone(),
            reconnect_delay,
            state: Arc::clone(&state),
            outbound: Arc::clone(&outbound),
        };
        let task = ScheduledTask::spawn("stream-reconnect", move |token| worker.run(token));
        Self {
            url,
            state,
            outbound,
            task,
        }
    }

    /// Builds the stream URL from `config` and starts the loop.
    pub fn from_config(config: &SyncConfig, state: Arc<SyncState>) -> Result<Self, SyncError> {
        Ok(Self::spawn(config.stream_url()?, config.reconnect_delay(), state))
    }

    /// The endpoint this transport connects to.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Waits for the background loop to exit (after [`Transport::teardown`]).
    pub async fn join(&self) {
        self.task.join().await;
    }
}

impl Transport for StreamingTransport {
    fn mode(&self) -> TransportMode {
        TransportMode::Streaming
    }

    fn state(&self) -> &Arc<SyncState> {
        &self.state
    }

    fn send_message(&self, payload: &Value) {
        if self.state.is_closed() || !self.state.is_connected() {
            log::trace!("Not connected; dropping client message.");
            return;
        }
        let guard = lock(&self.outbound);
        let Some(tx) = guard.as_ref() else {
            log::trace!("No open stream; dropping client message.");
            return;
        };
        match serde_json::to_string(payload) {
            Ok(text) => {
                if tx.send(text).is_err() {
                    log::trace!("Stream closed while sending; client message dropped.");
                }
            }
            Err(e) => log::warn!("Failed to serialize client message: {}", e),
        }
    }

    fn teardown(&self) {
        if self.state.close() {
            log::info!("Tearing down streaming transport for {}", self.url);
        }
        self.task.cancel();
        lock(&self.outbound).take();
    }
}

impl Drop for StreamingTransport {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// The state owned by the background task.
struct StreamLoop {
    url: Url,
    reconnect_delay: Duration,
    state: Arc<SyncState>,
    outbound: Outbound,
}

/// What ended a connected session.
enum Disconnect {
    Cancelled,
    Lost,
}

impl StreamLoop {
    async fn run(self, token: CancellationToken) {
        loop {
            log::info!("Connecting to dashboard stream: {}", self.url);

            let attempt = tokio::select! {
                _ = token.cancelled() => break,
                res = connect_async(self.url.as_str()) => res,
            };

            match attempt {
                Ok((ws_stream, _)) => {
                    log::info!("Connected to dashboard stream.");
                    let (mut write, mut read) = ws_stream.split();
                    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
                    *lock(&self.outbound) = Some(tx);
                    self.state.set_connected(true);

                    let reason = loop {
                        tokio::select! {
                            _ = token.cancelled() => break Disconnect::Cancelled,
                            Some(text) = rx.recv() => {
                                log::debug!("Sending client message ({} bytes).", text.len());
                                if let Err(e) = write.send(Message::Text(text.into())).await {
                                    log::error!("Failed to send client message: {}", e);
                                    break Disconnect::Lost;
                                }
                            }
                            msg = read.next() => {
                                match msg {
                                    Some(Ok(Message::Text(text))) => {
                                        dispatch(&self.state, decode_server_message(text.as_str()));
                                    }
                                    Some(Ok(Message::Binary(bytes))) => {
                                        dispatch(&self.state, decode_server_frame(&bytes));
                                    }
                                    Some(Ok(Message::Close(frame))) => {
                                        log::warn!("Dashboard stream closed by server: {:?}", frame);
                                        break Disconnect::Lost;
                                    }
                                    Some(Ok(_)) => {
                                        // Ping/pong; tungstenite answers pings itself.
                                    }
                                    Some(Err(e)) => {
                                        log::error!("Dashboard stream read error: {}", e);
                                        break Disconnect::Lost;
                                    }
                                    None => {
                                        log::warn!("Dashboard stream ended.");
                                        break Disconnect::Lost;
                                    }
                                }
                            }
                        }
                    };

                    lock(&self.outbound).take();
                    match reason {
                        Disconnect::Cancelled => {
                            if timeout(CLOSE_TIMEOUT, write.close()).await.is_err() {
                                log::debug!("Close handshake timed out.");
                            }
                            break;
                        }
                        Disconnect::Lost => {
                            self.state.set_connected(false);
                        }
                    }
                }
                Err(e) => {
                    log::error!("Failed to connect to dashboard stream: {}", e);
                    self.state.set_connected(false);
                }
            }

            log::info!("Reconnecting in {} ms.", self.reconnect_delay.as_millis());
            tokio::select! {
                _ = token.cancelled() => break,
                _ = sleep(self.reconnect_delay) => {}
            }
        }
        log::info!("Streaming transport stopped.");
    }
}

/// Routes one decoded frame. Runs on the transport task, so frames are
/// handled strictly in arrival order.
fn dispatch(state: &SyncState, decoded: Result<ServerMessage, SyncError>) {
    match decoded {
        Ok(ServerMessage::Update(update)) => {
            let slices = update.present_slices();
            if state.apply_update(update) {
                log::trace!("Applied update for {:?}", slices);
            }
        }
        Ok(ServerMessage::PrimeFound(event)) => {
            log::info!(
                "Discovery: {} [{}] ({} digits)",
                event.expression,
                event.form,
                event.digits
            );
            state.record_discovery(event);
        }
        Ok(ServerMessage::Unknown) => {
            log::debug!("Ignoring stream message with unknown type.");
        }
        Err(e) => {
            log::warn!("Dropping undecodable stream message: {}", e);
        }
    }
}

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use log::{info, warn};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::client::ClientState;
use crate::market::Symbol;
use crate::stream::{ClientCommand, ServerEvent};

pub const INITIAL_BACKOFF_MS: u64 = 500;
pub const MAX_BACKOFF_SECS: u64 = 30;

fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(Duration::from_secs(MAX_BACKOFF_SECS))
}

/// Caller-facing side of a running [`StreamClient`].
///
/// Subscribe/unsubscribe are fire-and-forget: they mark the symbol in-flight
/// (so the UI can disable its control) and queue the command; the
/// authoritative outcome arrives later as a `subscription_changed` or
/// `error` event. While disconnected, commands are dropped with a warning.
#[derive(Clone)]
pub struct ClientHandle {
    state: Arc<Mutex<ClientState>>,
    command_tx: mpsc::UnboundedSender<ClientCommand>,
}

impl ClientHandle {
    pub fn state(&self) -> std::sync::MutexGuard<'_, ClientState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn subscribe(&self, symbol: Symbol) -> bool {
        self.send_command(
            symbol,
            ClientCommand::Subscribe {
                symbol: symbol.to_string(),
            },
        )
    }

    pub fn unsubscribe(&self, symbol: Symbol) -> bool {
        self.send_command(
            symbol,
            ClientCommand::Unsubscribe {
                symbol: symbol.to_string(),
            },
        )
    }

    fn send_command(&self, symbol: Symbol, command: ClientCommand) -> bool {
        let mut state = self.state();
        if !state.is_connected() {
            warn!("Cannot send {symbol} command - not connected");
            return false;
        }
        state.mark_in_flight(symbol);
        drop(state);

        self.command_tx.send(command).is_ok()
    }
}

/// Owns the connection loop: connect, authenticate via the token query
/// parameter, pump events into [`ClientState`], and on any transport loss
/// reconnect from scratch with exponential backoff. There is no resumable
/// session; every successful connect restarts the snapshot cycle.
pub struct StreamClient {
    url: String,
    token: String,
    state: Arc<Mutex<ClientState>>,
    command_rx: mpsc::UnboundedReceiver<ClientCommand>,
}

impl StreamClient {
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> (Self, ClientHandle) {
        let state = Arc::new(Mutex::new(ClientState::default()));
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let client = Self {
            url: url.into(),
            token: token.into(),
            state: state.clone(),
            command_rx,
        };
        let handle = ClientHandle { state, command_tx };

        (client, handle)
    }

    pub async fn run(mut self) {
        let mut backoff = Duration::from_millis(INITIAL_BACKOFF_MS);

        loop {
            let request = format!(
                "{}?token={}",
                self.url,
                urlencoding::encode(&self.token)
            );

            match connect_async(request).await {
                Ok((ws_stream, _)) => {
                    info!("Connected to {}", self.url);
                    backoff = Duration::from_millis(INITIAL_BACKOFF_MS);

                    // commands queued while offline answer a stale view
                    while self.command_rx.try_recv().is_ok() {}

                    self.lock_state().on_connected();
                    self.pump(ws_stream).await;
                    self.lock_state().on_disconnected();
                    warn!("Disconnected from {}", self.url);
                }
                Err(e) => {
                    warn!("Connection to {} failed: {}", self.url, e);
                }
            }

            tokio::time::sleep(backoff).await;
            backoff = next_backoff(backoff);
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ClientState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Runs one connected episode until the transport goes away.
    async fn pump(
        &mut self,
        ws_stream: tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    ) {
        let (mut write, mut read) = ws_stream.split();
        let state = self.state.clone();

        loop {
            tokio::select! {
                maybe_msg = read.next() => {
                    match maybe_msg {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<ServerEvent>(&text) {
                                Ok(event) => state
                                    .lock()
                                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                                    .apply(event),
                                Err(e) => warn!("Unparseable event: {e}"),
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!("Transport error: {e}");
                            break;
                        }
                    }
                }
                maybe_command = self.command_rx.recv() => {
                    let Some(command) = maybe_command else { break };
                    match serde_json::to_string(&command) {
                        Ok(json) => {
                            if let Err(e) = write.send(Message::Text(json)).await {
                                warn!("Could not send command: {e}");
                                break;
                            }
                        }
                        Err(e) => warn!("Could not serialize command: {e}"),
                    }
                }
            }
        }
    }
}

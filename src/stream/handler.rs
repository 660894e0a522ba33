use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use log::{error, info, warn};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use uuid::Uuid;

use crate::auth::{extract_token_from_request, AuthenticatedUser, JwtValidator};
use crate::config::OUTBOUND_QUEUE_SIZE;
use crate::market::{PriceTable, Symbol};
use crate::stream::{
    BroadcastRouter, ClientCommand, ServerEvent, Session, SessionRegistry,
};
use crate::subscriptions::{SubscriptionService, SubscriptionStore};

/// Shared pieces every connection works against.
#[derive(Clone)]
pub struct StreamContext {
    pub verifier: Arc<JwtValidator>,
    pub prices: Arc<PriceTable>,
    pub router: Arc<BroadcastRouter>,
    pub registry: Arc<SessionRegistry>,
    pub store: Arc<SubscriptionStore>,
    pub service: Arc<SubscriptionService>,
}

pub struct StreamHandler {
    ctx: StreamContext,
    peer_addr: String,
}

impl StreamHandler {
    pub fn new(ctx: StreamContext, peer_addr: String) -> Self {
        Self { ctx, peer_addr }
    }

    /// Runs one connection from handshake to close.
    ///
    /// Authentication happens inside the WebSocket upgrade: a bad or missing
    /// token turns into an HTTP error response on the handshake itself, so
    /// the peer always learns why before the connection dies.
    pub async fn handle_connection(self, stream: TcpStream) {
        let mut session = Session::connecting(self.peer_addr.as_str());
        let mut auth_user: Option<AuthenticatedUser> = None;

        let accept_result = accept_hdr_async(stream, |req: &Request, response: Response| {
            if session.begin_authentication().is_err() {
                return Err(self.error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "connection in unexpected state",
                ));
            }

            let token = match extract_token_from_request(req) {
                Some(token) => token,
                None => {
                    warn!("Missing bearer token from {}", self.peer_addr);
                    return Err(self.error_response(
                        StatusCode::UNAUTHORIZED,
                        "Missing Authorization header or token parameter",
                    ));
                }
            };

            match self.ctx.verifier.verify_token(&token) {
                Ok(user) => {
                    info!(
                        "Authenticated {} ({}) from {}",
                        user.user_id, user.email, self.peer_addr
                    );
                    auth_user = Some(user);
                    Ok(response)
                }
                Err(e) => {
                    warn!("Authentication failed for {}: {}", self.peer_addr, e);
                    Err(self.error_response(StatusCode::UNAUTHORIZED, &e.to_string()))
                }
            }
        })
        .await;

        let ws_stream = match accept_result {
            Ok(ws) => ws,
            Err(e) => {
                let _ = session.close();
                warn!("WebSocket handshake failed for {}: {:?}", self.peer_addr, e);
                return;
            }
        };

        let user = match auth_user {
            Some(user) => user,
            None => {
                error!("No identity after successful handshake from {}", self.peer_addr);
                return;
            }
        };

        self.run_session(ws_stream, session, user).await;
    }

    fn error_response(&self, status: StatusCode, message: &str) -> ErrorResponse {
        Response::builder()
            .status(status)
            .body(Some(message.to_string()))
            .unwrap()
    }

    async fn run_session(
        &self,
        ws_stream: WebSocketStream<TcpStream>,
        mut session: Session,
        user: AuthenticatedUser,
    ) {
        let subscriptions = self.ctx.store.get(&user.user_id);
        if let Err(e) = session.activate(user.clone(), subscriptions.clone()) {
            error!("Could not activate session for {}: {}", user.user_id, e);
            return;
        }

        let session_id = session.id();
        info!(
            "Session {} active - User: {} from {}",
            session_id, user.user_id, self.peer_addr
        );

        let (outbound_tx, outbound_rx) = mpsc::channel::<ServerEvent>(OUTBOUND_QUEUE_SIZE);

        let handle = match session.handle(outbound_tx.clone()) {
            Ok(handle) => handle,
            Err(e) => {
                error!("Could not build session handle: {}", e);
                return;
            }
        };

        // The snapshot goes onto the queue before the router learns about
        // this session, so no tick can arrive ahead of it.
        let snapshot = ServerEvent::Snapshot {
            prices: self.ctx.prices.snapshot(),
            subscriptions: subscriptions.clone(),
        };
        if outbound_tx.try_send(snapshot).is_err() {
            error!("Could not queue snapshot for session {}", session_id);
            return;
        }

        self.ctx
            .router
            .register(session_id, &outbound_tx, &subscriptions);
        self.ctx.registry.insert(handle);

        let (write, read) = ws_stream.split();
        let (close_tx, close_rx) = mpsc::channel::<()>(1);

        let write_task = Self::spawn_write_task(write, outbound_rx, close_rx);
        let read_task = self.spawn_read_task(
            read,
            close_tx,
            session_id,
            user.user_id.clone(),
            outbound_tx.clone(),
        );

        tokio::select! {
            _ = write_task => {
                info!("Write task completed for session {}", session_id);
            }
            _ = read_task => {
                info!("Read task completed for session {}", session_id);
            }
        }

        // A session that closes must leave no router entries behind.
        self.ctx.router.deregister(session_id);
        self.ctx.registry.remove(session_id);
        let _ = session.close();

        info!(
            "Session {} closed - User: {} from {}",
            session_id, user.user_id, self.peer_addr
        );
    }

    fn spawn_write_task(
        mut write: futures::stream::SplitSink<WebSocketStream<TcpStream>, Message>,
        mut outbound_rx: mpsc::Receiver<ServerEvent>,
        mut close_rx: mpsc::Receiver<()>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    maybe_event = outbound_rx.recv() => {
                        let event = match maybe_event {
                            Some(event) => event,
                            None => break,
                        };
                        match event.to_json() {
                            Ok(json) => {
                                if let Err(e) = write.send(Message::Text(json)).await {
                                    error!("Error sending event: {:?}", e);
                                    break;
                                }
                            }
                            Err(e) => {
                                error!("Failed to serialize outbound event: {}", e);
                            }
                        }
                    }
                    _ = close_rx.recv() => {
                        info!("Received close signal from read task");
                        break;
                    }
                }
            }
        })
    }

    fn spawn_read_task(
        &self,
        mut read: futures::stream::SplitStream<WebSocketStream<TcpStream>>,
        close_tx: mpsc::Sender<()>,
        session_id: Uuid,
        user_id: String,
        outbound: mpsc::Sender<ServerEvent>,
    ) -> tokio::task::JoinHandle<()> {
        let ctx = self.ctx.clone();

        tokio::spawn(async move {
            while let Some(msg_result) = read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => {
                        match serde_json::from_str::<ClientCommand>(&text) {
                            Ok(command) => {
                                Self::handle_command(&ctx, &user_id, session_id, command, &outbound);
                            }
                            Err(_) => {
                                info!(
                                    "Unrecognized text from user {}: {}",
                                    user_id, text
                                );
                            }
                        }
                    }
                    Ok(Message::Close(close_frame)) => {
                        info!(
                            "Close frame from session {}: {:?}",
                            session_id, close_frame
                        );
                        break;
                    }
                    // tungstenite answers pings on its own
                    Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                    Ok(_) => {}
                    Err(e) => {
                        error!("WebSocket error for session {}: {:?}", session_id, e);
                        break;
                    }
                }
            }

            let _ = close_tx.send(()).await;
        })
    }

    /// Applies a subscribe/unsubscribe command.
    ///
    /// The success acknowledgement is the `subscription_changed` event the
    /// service fans out to every session of the user; failures are reported
    /// inline and leave the session active.
    fn handle_command(
        ctx: &StreamContext,
        user_id: &str,
        session_id: Uuid,
        command: ClientCommand,
        outbound: &mpsc::Sender<ServerEvent>,
    ) {
        let (raw_symbol, subscribing) = match command {
            ClientCommand::Subscribe { symbol } => (symbol, true),
            ClientCommand::Unsubscribe { symbol } => (symbol, false),
        };

        let result = Symbol::parse(&raw_symbol).and_then(|symbol| {
            if subscribing {
                ctx.service.subscribe(user_id, symbol)
            } else {
                ctx.service.unsubscribe(user_id, symbol)
            }
        });

        if let Err(e) = result {
            warn!("Command from session {} rejected: {}", session_id, e);
            let _ = outbound.try_send(ServerEvent::error(e.to_string()));
        }
    }
}

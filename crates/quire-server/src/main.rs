//! Quire WebSocket Relay Server
//!
//! Relays operations and presence between the participants of a room and
//! keeps each room's operation log so late joiners can catch up.
//!
//! ## Protocol
//!
//! Messages are JSON with the following format:
//! ```json
//! { "type": "join", "room": "room-id", "participantId": 42 }
//! { "type": "publish", "message": { "type": "op", ... } }
//! { "type": "leave" }
//! ```

mod config;
mod room;

use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use config::ServerConfig;
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use quire_core::{ClientId, FileStorage, MemoryStorage, RelayEvent, RelayRequest, Storage};
use room::{AppState, RoomEvent};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quire_server=info,tower_http=info".into()),
        )
        .init();

    let config = ServerConfig::from_env();
    let storage: Arc<dyn Storage> = if config.persist {
        let storage = match &config.data_dir {
            Some(dir) => FileStorage::new(dir.clone()),
            None => FileStorage::default_location(),
        }
        .map_err(std::io::Error::other)?;
        info!("Persisting rooms to {}", storage.base_path().display());
        Arc::new(storage)
    } else {
        info!("Persistence disabled, rooms are kept in memory");
        Arc::new(MemoryStorage::new())
    };

    match storage.list().await {
        Ok(rooms) => info!("{} stored rooms available", rooms.len()),
        Err(e) => warn!("Failed to list stored rooms: {}", e),
    }

    let app = router(Arc::new(AppState::new(storage)));

    info!("Quire relay server listening on {}", config.addr);
    info!("WebSocket endpoint: ws://{}/ws", config.addr);

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app).await
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Index page
async fn index() -> &'static str {
    "Quire Relay Server - Connect via WebSocket at /ws"
}

/// Health check
async fn health() -> &'static str {
    "ok"
}

/// WebSocket upgrade handler
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

type Sender = SplitSink<WebSocket, Message>;

/// Send an event to this connection. False once the socket is gone.
async fn send_event(sender: &mut Sender, event: &RelayEvent) -> bool {
    match serde_json::to_string(event) {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!("Failed to serialize event: {}", e);
            true
        }
    }
}

async fn recv_room(rx: &mut Option<broadcast::Receiver<RoomEvent>>) -> Result<RoomEvent, RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// The room a connection is in and who it joined as.
struct Membership {
    room: String,
    participant: ClientId,
}

async fn leave(state: &AppState, conn: Uuid, membership: Membership) {
    if let Some(participant) = state.leave_room(&membership.room, conn).await {
        state.broadcast(&membership.room, conn, RelayEvent::PeerLeft { participant_id: participant });
        info!("Participant {} left room {}", participant, membership.room);
    }
}

/// Handle a WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let conn = Uuid::new_v4();
    info!("New connection: {}", conn);

    let (mut sender, mut receiver) = socket.split();
    let mut membership: Option<Membership> = None;
    let mut room_rx: Option<broadcast::Receiver<RoomEvent>> = None;

    loop {
        tokio::select! {
            // Handle incoming messages from client
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let request = match serde_json::from_str::<RelayRequest>(text.as_str()) {
                            Ok(request) => request,
                            Err(e) => {
                                warn!("Invalid message from {}: {}", conn, e);
                                let err = RelayEvent::Error {
                                    message: format!("Invalid message: {}", e),
                                };
                                if !send_event(&mut sender, &err).await {
                                    break;
                                }
                                continue;
                            }
                        };
                        match request {
                            RelayRequest::Join { room, participant_id } => {
                                if let Some(old) = membership.take() {
                                    leave(&state, conn, old).await;
                                }

                                let joined = state.join_room(&room, conn, participant_id).await;
                                room_rx = Some(joined.rx);
                                membership = Some(Membership {
                                    room: room.clone(),
                                    participant: participant_id,
                                });

                                let event = RelayEvent::Joined {
                                    room: room.clone(),
                                    peer_count: joined.peer_count,
                                    ops: joined.ops,
                                };
                                if !send_event(&mut sender, &event).await {
                                    break;
                                }

                                // Notify others
                                state.broadcast(&room, conn, RelayEvent::PeerJoined { participant_id });
                                info!("Participant {} joined room {}", participant_id, room);
                            }
                            RelayRequest::Leave => {
                                if let Some(old) = membership.take() {
                                    leave(&state, conn, old).await;
                                }
                                room_rx = None;
                            }
                            RelayRequest::Publish { message } => match &membership {
                                Some(Membership { room, participant }) => {
                                    state.record(room, &message);
                                    state.broadcast(room, conn, RelayEvent::Message {
                                        from: *participant,
                                        message,
                                    });
                                }
                                None => {
                                    let err = RelayEvent::Error {
                                        message: "Join a room before publishing".to_string(),
                                    };
                                    if !send_event(&mut sender, &err).await {
                                        break;
                                    }
                                }
                            },
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        break;
                    }
                    Some(Ok(Message::Binary(_))) => {
                        debug!("Ignoring binary message from {}", conn);
                    }
                    Some(Ok(_)) => {} // Ignore ping/pong
                    Some(Err(e)) => {
                        warn!("WebSocket error for {}: {}", conn, e);
                        break;
                    }
                }
            }

            // Handle broadcast messages from room
            msg = recv_room(&mut room_rx) => {
                match msg {
                    // Don't echo back to sender
                    Ok((from, event)) => {
                        if from != conn && !send_event(&mut sender, &event).await {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Connection {} lagged, {} events dropped", conn, skipped);
                    }
                    Err(RecvError::Closed) => room_rx = None,
                }
            }
        }
    }

    // Cleanup on disconnect
    if let Some(old) = membership.take() {
        leave(&state, conn, old).await;
    }
    info!("Connection closed: {}", conn);
}

#[cfg(test)]
mod tests {
    use super::*;
    use quire_core::{CollabConfig, Editor, Session};
    use std::time::{Duration, Instant};

    struct Peer {
        editor: Editor,
        session: Session,
    }

    impl Peer {
        fn connect(url: &str, id: u64) -> Self {
            let config = CollabConfig {
                relay_url: url.to_string(),
                ..CollabConfig::default()
            };
            let mut session = Session::relay(ClientId(id), config);
            session.connect("room").unwrap();
            Self {
                editor: session.editor(),
                session,
            }
        }

        fn poll(&mut self) {
            self.session.poll(&mut self.editor, Instant::now());
        }

        fn type_text(&mut self, text: &str) {
            if self.editor.selection().is_none() {
                self.editor.select_all();
            }
            let ops = self.editor.insert_text(text);
            self.session.publish(ops);
        }
    }

    async fn serve() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(Arc::new(AppState::new(Arc::new(MemoryStorage::new()))));
        tokio::spawn(async move { axum::serve(listener, app).await });
        format!("ws://{}/ws", addr)
    }

    async fn settle(peers: &mut [&mut Peer], done: impl Fn(&[&mut Peer]) -> bool) {
        for _ in 0..500 {
            for peer in peers.iter_mut() {
                peer.poll();
            }
            if done(peers) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("peers did not settle");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_relay_between_sessions() {
        let url = serve().await;

        let mut a = Peer::connect(&url, 1);
        settle(&mut [&mut a], |p| p[0].session.state().is_synced()).await;
        a.type_text("hello");

        // The late joiner catches up from the room log.
        let mut b = Peer::connect(&url, 2);
        settle(&mut [&mut a, &mut b], |p| p[1].editor.plain_text() == "hello").await;
        assert!(b.session.state().is_synced());

        a.type_text("!");
        settle(&mut [&mut a, &mut b], |p| p[1].editor.plain_text() == "hello!").await;

        b.session.disconnect();
        settle(&mut [&mut a], |p| p[0].session.presence().get(ClientId(2)).is_none()).await;
    }
}

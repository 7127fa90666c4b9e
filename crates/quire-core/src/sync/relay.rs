//! WebSocket client for the relay server.
//!
//! The socket lives on a background thread; the transport talks to it over
//! channels so `send` and `poll` never block.

use super::{
    RelayEvent, RelayRequest, Transport, TransportError, TransportEvent, TransportKind,
    WireMessage,
};
use crate::document::ClientId;
use std::net::TcpStream;
use std::sync::mpsc::{Receiver, Sender, TryRecvError, channel};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket, connect};
use url::Url;

/// Commands sent to the WebSocket thread.
enum WsCommand {
    Send(String),
    Close,
}

/// Transport through a relay server.
pub struct RelayTransport {
    url: String,
    cmd_tx: Option<Sender<WsCommand>>,
    event_rx: Option<Receiver<TransportEvent>>,
    _thread: Option<JoinHandle<()>>,
}

impl RelayTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            cmd_tx: None,
            event_rx: None,
            _thread: None,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn request(&self, request: &RelayRequest) -> Result<(), TransportError> {
        let tx = self.cmd_tx.as_ref().ok_or(TransportError::NotConnected)?;
        let json = serde_json::to_string(request)?;
        tx.send(WsCommand::Send(json))
            .map_err(|e| TransportError::Send(e.to_string()))
    }
}

/// First 100 characters, for logging.
fn preview(text: &str) -> &str {
    match text.char_indices().nth(100) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

fn translate(event: RelayEvent) -> TransportEvent {
    match event {
        RelayEvent::Joined {
            room,
            peer_count,
            ops,
        } => {
            log::info!("Joined relay room {room} ({peer_count} peers, {} ops)", ops.len());
            TransportEvent::Joined { peer_count, ops }
        }
        RelayEvent::PeerJoined { participant_id } => TransportEvent::PeerJoined(participant_id),
        RelayEvent::PeerLeft { participant_id } => TransportEvent::PeerLeft(participant_id),
        RelayEvent::Message { message, .. } => TransportEvent::Message(message),
        RelayEvent::Error { message } => TransportEvent::Error(message),
    }
}

fn set_timeouts(socket: &mut WebSocket<MaybeTlsStream<TcpStream>>) {
    match socket.get_mut() {
        MaybeTlsStream::Plain(tcp) => {
            let _ = tcp.set_read_timeout(Some(Duration::from_millis(50)));
            let _ = tcp.set_write_timeout(Some(Duration::from_secs(5)));
        }
        #[allow(unreachable_patterns)]
        _ => log::debug!("TLS or other stream - using default timeout handling"),
    }
}

/// Socket loop: forward commands out and events in until either side closes.
/// Returns the error that ended it, if any.
fn run_socket(
    socket: &mut WebSocket<MaybeTlsStream<TcpStream>>,
    cmd_rx: &Receiver<WsCommand>,
    event_tx: &Sender<TransportEvent>,
) -> Option<String> {
    loop {
        loop {
            match cmd_rx.try_recv() {
                Ok(WsCommand::Send(msg)) => {
                    log::debug!("WebSocket sending: {}", preview(&msg));
                    if let Err(e) = socket.send(Message::Text(msg)) {
                        return Some(format!("Send failed: {e}"));
                    }
                }
                Ok(WsCommand::Close) => {
                    log::info!("WebSocket close requested");
                    let _ = socket.close(None);
                    let _ = socket.flush();
                    return None;
                }
                Err(TryRecvError::Disconnected) => return None,
                Err(TryRecvError::Empty) => break,
            }
        }

        match socket.read() {
            Ok(Message::Text(txt)) => {
                log::debug!("WebSocket received: {}", preview(&txt));
                match serde_json::from_str::<RelayEvent>(&txt) {
                    Ok(event) => {
                        if event_tx.send(translate(event)).is_err() {
                            return None;
                        }
                    }
                    Err(e) => log::warn!("Failed to parse relay message: {e}"),
                }
            }
            Ok(Message::Ping(data)) => {
                let _ = socket.send(Message::Pong(data));
            }
            Ok(Message::Close(_)) => {
                log::info!("WebSocket received close frame");
                return None;
            }
            Ok(_) => {}
            Err(tungstenite::Error::Io(ref e))
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => return Some(format!("Read failed: {e}")),
        }
    }
}

impl Transport for RelayTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Relay
    }

    fn connect(&mut self, room: &str, participant: ClientId) -> Result<(), TransportError> {
        if self.cmd_tx.is_some() {
            return Err(TransportError::AlreadyConnected);
        }

        let parsed = Url::parse(&self.url).map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
        if parsed.scheme() != "ws" && parsed.scheme() != "wss" {
            return Err(TransportError::InvalidUrl(format!(
                "unsupported scheme {}",
                parsed.scheme()
            )));
        }

        let join = serde_json::to_string(&RelayRequest::Join {
            room: room.to_string(),
            participant_id: participant,
        })?;
        let (cmd_tx, cmd_rx) = channel::<WsCommand>();
        let (event_tx, event_rx) = channel::<TransportEvent>();
        let url = self.url.clone();

        let handle = thread::spawn(move || {
            log::info!("WebSocket thread: connecting to {}", url);
            let (mut socket, response) = match connect(url.as_str()) {
                Ok(connected) => connected,
                Err(e) => {
                    log::error!("WebSocket connection failed: {}", e);
                    let _ = event_tx.send(TransportEvent::Disconnected {
                        error: Some(format!("Connection failed: {e}")),
                    });
                    return;
                }
            };
            log::info!("WebSocket connected, status: {}", response.status());
            set_timeouts(&mut socket);

            let error = match socket.send(Message::Text(join)) {
                Ok(()) => {
                    let _ = event_tx.send(TransportEvent::Connected);
                    run_socket(&mut socket, &cmd_rx, &event_tx)
                }
                Err(e) => Some(format!("Join failed: {e}")),
            };
            if let Some(error) = &error {
                log::error!("WebSocket {error}");
            }
            log::info!("WebSocket thread exiting");
            let _ = event_tx.send(TransportEvent::Disconnected { error });
        });

        self.cmd_tx = Some(cmd_tx);
        self.event_rx = Some(event_rx);
        self._thread = Some(handle);
        Ok(())
    }

    fn send(&mut self, message: &WireMessage) -> Result<(), TransportError> {
        self.request(&RelayRequest::Publish {
            message: message.clone(),
        })
    }

    fn poll(&mut self) -> Vec<TransportEvent> {
        let Some(rx) = &self.event_rx else {
            return Vec::new();
        };
        let events: Vec<TransportEvent> = rx.try_iter().collect();
        if events
            .iter()
            .any(|event| matches!(event, TransportEvent::Disconnected { .. }))
        {
            // The socket thread has exited; a later connect starts afresh.
            self.cmd_tx = None;
            self.event_rx = None;
            self._thread = None;
        }
        events
    }

    fn disconnect(&mut self) {
        if self.cmd_tx.is_some() {
            let _ = self.request(&RelayRequest::Leave);
        }
        if let Some(tx) = self.cmd_tx.take() {
            let _ = tx.send(WsCommand::Close);
        }
        self.event_rx = None;
        self._thread = None;
    }
}

impl Drop for RelayTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}

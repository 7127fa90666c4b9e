//! A participant's membership in a room.

use super::{
    BroadcastHub, BroadcastTransport, ConnectionState, RelayTransport, SessionEvent, Transport,
    TransportError, TransportEvent, TransportKind, WireMessage,
};
use crate::config::CollabConfig;
use crate::crdt::Operation;
use crate::document::ClientId;
use crate::editor::Editor;
use crate::presence::{PresenceRecord, PresenceTable};
use std::collections::VecDeque;
use std::sync::mpsc::{Receiver, Sender, channel};
use std::time::Instant;

/// Exchanges operations and presence for one [`Editor`] over a
/// [`Transport`].
///
/// The session never touches the editor on its own: received operations are
/// handed over in [`Session::poll`], which the owner calls regularly with
/// the current time. Reconnecting after a failure is up to the owner.
pub struct Session {
    transport: Box<dyn Transport>,
    config: CollabConfig,
    participant: ClientId,
    room: Option<String>,
    state: ConnectionState,
    subscribers: Vec<Sender<SessionEvent>>,
    peers: PresenceTable,
    local_presence: Option<PresenceRecord>,
    /// Local operations not yet handed to the transport, oldest first.
    unsent: VecDeque<Operation>,
    connected_at: Option<Instant>,
    last_heartbeat: Option<Instant>,
}

impl Session {
    pub fn new(
        transport: impl Transport + 'static,
        participant: ClientId,
        config: CollabConfig,
    ) -> Self {
        Self {
            transport: Box::new(transport),
            config,
            participant,
            room: None,
            state: ConnectionState::Disconnected,
            subscribers: Vec::new(),
            peers: PresenceTable::new(),
            local_presence: None,
            unsent: VecDeque::new(),
            connected_at: None,
            last_heartbeat: None,
        }
    }

    /// A session broadcasting to peers attached to `hub`.
    pub fn broadcast(hub: BroadcastHub, participant: ClientId, config: CollabConfig) -> Self {
        Self::new(BroadcastTransport::new(hub), participant, config)
    }

    /// A session through the relay server at `config.relay_url`.
    pub fn relay(participant: ClientId, config: CollabConfig) -> Self {
        let transport = RelayTransport::new(config.relay_url.clone());
        Self::new(transport, participant, config)
    }

    /// A fresh editor for this participant, buffering remote operations
    /// within the configured pending window and capacity.
    pub fn editor(&self) -> Editor {
        Editor::from_config(self.participant, &self.config)
    }

    pub fn participant(&self) -> ClientId {
        self.participant
    }

    pub fn room(&self) -> Option<&str> {
        self.room.as_deref()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn config(&self) -> &CollabConfig {
        &self.config
    }

    /// Presence of the other participants.
    pub fn presence(&self) -> &PresenceTable {
        &self.peers
    }

    pub fn unsent_len(&self) -> usize {
        self.unsent.len()
    }

    /// Hand over undelivered operations, e.g. to a replacement session.
    pub fn take_unsent(&mut self) -> Vec<Operation> {
        self.unsent.drain(..).collect()
    }

    /// A channel receiving every [`SessionEvent`] from now on.
    pub fn subscribe(&mut self) -> Receiver<SessionEvent> {
        let (tx, rx) = channel();
        self.subscribers.push(tx);
        rx
    }

    /// Start joining `room`. The session is connected once a later
    /// [`Session::poll`] sees the transport come up.
    pub fn connect(&mut self, room: &str) -> Result<(), TransportError> {
        if self.state != ConnectionState::Disconnected {
            return Err(TransportError::AlreadyConnected);
        }
        if let Err(e) = self.transport.connect(room, self.participant) {
            self.emit(SessionEvent::Error {
                message: e.to_string(),
            });
            return Err(e);
        }
        log::info!("Connecting to room {room} as {}", self.participant);
        self.room = Some(room.to_string());
        self.connected_at = None;
        self.last_heartbeat = None;
        self.set_state(ConnectionState::Connecting);
        Ok(())
    }

    /// Send local operations, in order. Whatever cannot be sent now is kept
    /// and sent once connected.
    pub fn publish(&mut self, ops: impl IntoIterator<Item = Operation>) {
        self.unsent.extend(ops);
        self.flush();
    }

    /// Replace the local presence and broadcast it.
    pub fn set_presence(&mut self, mut record: PresenceRecord) {
        record.participant_id = self.participant;
        self.local_presence = Some(record);
        self.send_presence();
    }

    /// Process everything received since the last call, then run heartbeat
    /// and timeout upkeep.
    pub fn poll(&mut self, editor: &mut Editor, now: Instant) {
        for event in self.transport.poll() {
            if self.state == ConnectionState::Disconnected {
                break;
            }
            self.handle(event, editor, now);
        }
        let produced = editor.drain();
        self.publish(produced);
        self.tick(editor, now);
    }

    /// Leave the room. Pending incoming events are discarded; undelivered
    /// local operations are kept.
    pub fn disconnect(&mut self) {
        if self.state.is_connected() {
            self.send(&WireMessage::Leave {
                participant_id: self.participant,
            });
        }
        self.close();
    }

    fn handle(&mut self, event: TransportEvent, editor: &mut Editor, now: Instant) {
        match event {
            TransportEvent::Connected => {
                self.connected_at = Some(now);
                self.last_heartbeat = Some(now);
                self.set_state(ConnectionState::Connected { synced: false });
                self.flush();
                self.send(&WireMessage::Sync {
                    participant_id: self.participant,
                    version: editor.version().clone(),
                });
                self.send_presence();
            }
            TransportEvent::Joined { ops, .. } => {
                for op in ops {
                    editor.enqueue_remote(op);
                }
                self.publish(editor.drain());
                self.mark_synced();
            }
            TransportEvent::PeerJoined(_) => self.send_presence(),
            TransportEvent::PeerLeft(peer) => self.remove_peer(peer, editor),
            TransportEvent::Message(message) => self.receive(message, editor, now),
            TransportEvent::Error(message) => {
                log::warn!("Transport error: {message}");
                self.emit(SessionEvent::Error { message });
            }
            TransportEvent::Disconnected { error } => {
                if let Some(message) = error {
                    log::warn!("Disconnected: {message}");
                    self.emit(SessionEvent::Error { message });
                }
                self.close();
            }
        }
    }

    fn receive(&mut self, message: WireMessage, editor: &mut Editor, now: Instant) {
        match message {
            WireMessage::Op(op) => editor.enqueue_remote(op),
            WireMessage::Presence(record) => {
                if record.participant_id != self.participant
                    && self.peers.upsert(record.clone(), now)
                {
                    self.emit(SessionEvent::PresenceUpdated(record));
                }
            }
            WireMessage::Leave { participant_id } => self.remove_peer(participant_id, editor),
            WireMessage::Sync {
                participant_id,
                version,
            } => {
                if participant_id == self.participant {
                    return;
                }
                editor.record_peer_version(participant_id, &version);
                if !self.peers.contains(participant_id) {
                    self.send_presence();
                }
                let ops = editor.ops_since(&version);
                log::debug!("Answering sync from {participant_id} with {} ops", ops.len());
                self.send(&WireMessage::Ops {
                    participant_id: self.participant,
                    ops,
                });
            }
            WireMessage::Ops { ops, .. } => {
                for op in ops {
                    editor.enqueue_remote(op);
                }
                if self.transport.kind() == TransportKind::Broadcast {
                    self.publish(editor.drain());
                    self.mark_synced();
                }
            }
        }
    }

    fn tick(&mut self, editor: &mut Editor, now: Instant) {
        let ConnectionState::Connected { synced } = self.state else {
            return;
        };

        if !synced && self.transport.kind() == TransportKind::Broadcast {
            let waited = self
                .connected_at
                .map(|at| now.saturating_duration_since(at))
                .unwrap_or_default();
            if waited >= self.config.sync_timeout() {
                log::info!("No sync reply after {waited:?}, assuming an empty room");
                self.mark_synced();
            }
        }

        let due = self
            .last_heartbeat
            .is_none_or(|at| now.saturating_duration_since(at) >= self.config.heartbeat_interval());
        if due {
            self.last_heartbeat = Some(now);
            self.flush();
            self.send_presence();
            self.send(&WireMessage::Sync {
                participant_id: self.participant,
                version: editor.version().clone(),
            });
            editor.maintain(now);
        }

        for peer in self.peers.purge(now, self.config.presence_timeout()) {
            log::info!("Presence of {peer} timed out");
            editor.forget_peer(peer);
            self.emit(SessionEvent::PresenceRemoved(peer));
        }
    }

    fn remove_peer(&mut self, peer: ClientId, editor: &mut Editor) {
        editor.forget_peer(peer);
        if self.peers.remove(peer).is_some() {
            self.emit(SessionEvent::PresenceRemoved(peer));
        }
    }

    fn mark_synced(&mut self) {
        if self.state == (ConnectionState::Connected { synced: false }) {
            self.set_state(ConnectionState::Connected { synced: true });
        }
    }

    fn flush(&mut self) {
        while self.state.is_connected() {
            let Some(op) = self.unsent.front() else {
                break;
            };
            let message = WireMessage::Op(op.clone());
            if !self.send(&message) {
                break;
            }
            self.unsent.pop_front();
        }
    }

    fn send_presence(&mut self) {
        if let Some(record) = self.local_presence.clone() {
            self.send(&WireMessage::Presence(record));
        }
    }

    /// Send if connected. A failed send ends the connection.
    fn send(&mut self, message: &WireMessage) -> bool {
        if !self.state.is_connected() {
            return false;
        }
        match self.transport.send(message) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Send failed, disconnecting: {e}");
                self.emit(SessionEvent::Error {
                    message: e.to_string(),
                });
                self.close();
                false
            }
        }
    }

    fn close(&mut self) {
        self.transport.disconnect();
        self.peers.clear();
        self.room = None;
        self.connected_at = None;
        self.set_state(ConnectionState::Disconnected);
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            log::info!("Session state: {:?} -> {:?}", self.state, state);
            self.state = state;
            self.emit(SessionEvent::StateChanged(state));
        }
    }

    fn emit(&mut self, event: SessionEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::OpAction;
    use crate::document::{FormatFlags, OpId};
    use crate::editor::{Caret, Selection};
    use std::time::Duration;

    struct Peer {
        editor: Editor,
        session: Session,
    }

    impl Peer {
        fn join(hub: &BroadcastHub, id: u64, room: &str, now: Instant) -> Self {
            let session = Session::broadcast(hub.clone(), ClientId(id), CollabConfig::default());
            let mut peer = Self {
                editor: session.editor(),
                session,
            };
            peer.session.connect(room).unwrap();
            peer.poll(now);
            peer
        }

        fn poll(&mut self, now: Instant) {
            self.session.poll(&mut self.editor, now);
        }

        fn type_text(&mut self, text: &str) {
            if self.editor.selection().is_none() {
                self.editor.select_all();
            }
            let ops = self.editor.insert_text(text);
            self.session.publish(ops);
        }
    }

    fn events(rx: &Receiver<SessionEvent>) -> Vec<SessionEvent> {
        rx.try_iter().collect()
    }

    #[test]
    fn test_edits_reach_peers() {
        let hub = BroadcastHub::new();
        let now = Instant::now();
        let mut a = Peer::join(&hub, 1, "room", now);
        let mut b = Peer::join(&hub, 2, "room", now);

        a.type_text("hello");
        b.poll(now);
        assert_eq!(b.editor.plain_text(), "hello");

        b.editor.select_all();
        let ops = b.editor.toggle_bold();
        b.session.publish(ops);
        a.poll(now);
        assert_eq!(a.editor.render(), b.editor.render());
    }

    #[test]
    fn test_late_joiner_is_synced_by_peers() {
        let hub = BroadcastHub::new();
        let now = Instant::now();
        let mut a = Peer::join(&hub, 1, "room", now);
        a.type_text("draft");

        let mut b = Peer::join(&hub, 2, "room", now);
        assert_eq!(b.session.state(), ConnectionState::Connected { synced: false });

        a.poll(now);
        b.poll(now);
        assert_eq!(b.editor.plain_text(), "draft");
        assert!(b.session.state().is_synced());
    }

    #[test]
    fn test_alone_in_room_syncs_after_timeout() {
        let hub = BroadcastHub::new();
        let now = Instant::now();
        let mut a = Peer::join(&hub, 1, "room", now);
        let rx = a.session.subscribe();

        a.poll(now + Duration::from_millis(500));
        assert!(!a.session.state().is_synced());

        a.poll(now + a.session.config().sync_timeout());
        assert!(a.session.state().is_synced());
        assert_eq!(
            events(&rx),
            vec![SessionEvent::StateChanged(ConnectionState::Connected {
                synced: true
            })]
        );
    }

    #[test]
    fn test_undo_reaches_peers() {
        let hub = BroadcastHub::new();
        let now = Instant::now();
        let mut a = Peer::join(&hub, 1, "room", now);
        let mut b = Peer::join(&hub, 2, "room", now);

        a.type_text("hello");
        a.editor.select_all();
        let ops = a.editor.toggle_bold();
        a.session.publish(ops);
        b.poll(now);
        assert!(b.editor.render()[0].runs[0].format.contains(FormatFlags::BOLD));

        let ops = a.editor.undo();
        a.session.publish(ops);
        b.poll(now);
        assert_eq!(b.editor.render(), a.editor.render());
        assert!(b.editor.render()[0].runs[0].format.is_empty());
        assert!(!b.editor.can_undo());
    }

    #[test]
    fn test_editor_follows_configured_limits() {
        let config = CollabConfig {
            max_pending_ops: 2,
            ..CollabConfig::default()
        };
        let session = Session::broadcast(BroadcastHub::new(), ClientId(1), config);
        let mut editor = session.editor();
        assert_eq!(editor.client(), ClientId(1));

        for seq in 1..=3 {
            editor.apply_remote(Operation {
                origin: ClientId(9),
                seq: seq + 10,
                target_id: OpId::new(ClientId(9), seq),
                action: OpAction::Delete,
                deps: Vec::new(),
            });
        }
        assert_eq!(editor.replica().pending_len(), 2);
    }

    #[test]
    fn test_state_transitions() {
        let hub = BroadcastHub::new();
        let now = Instant::now();
        let mut session = Session::broadcast(hub, ClientId(1), CollabConfig::default());
        let mut editor = Editor::new(ClientId(1));
        let rx = session.subscribe();

        session.connect("room").unwrap();
        assert_eq!(
            session.connect("room"),
            Err(TransportError::AlreadyConnected)
        );
        session.poll(&mut editor, now);
        session.disconnect();

        assert_eq!(
            events(&rx),
            vec![
                SessionEvent::StateChanged(ConnectionState::Connecting),
                SessionEvent::StateChanged(ConnectionState::Connected { synced: false }),
                SessionEvent::StateChanged(ConnectionState::Disconnected),
            ]
        );
        assert_eq!(session.room(), None);
    }

    #[test]
    fn test_presence_is_shared_and_expires() {
        let hub = BroadcastHub::new();
        let now = Instant::now();
        let mut a = Peer::join(&hub, 1, "room", now);
        let mut b = Peer::join(&hub, 2, "room", now);
        let rx = b.session.subscribe();

        let selection = Selection::collapsed(Caret::document_start());
        a.session.set_presence(
            PresenceRecord::new(ClientId(99), "Ada", "#f80").with_selection(Some(selection)),
        );
        b.poll(now);

        let record = b.session.presence().get(ClientId(1)).cloned().unwrap();
        assert_eq!(record.name, "Ada");
        assert_eq!(record.selection, Some(selection));
        assert!(events(&rx).contains(&SessionEvent::PresenceUpdated(record)));

        let later = now + b.session.config().presence_timeout() + Duration::from_secs(1);
        b.poll(later);
        assert!(b.session.presence().is_empty());
        assert!(events(&rx).contains(&SessionEvent::PresenceRemoved(ClientId(1))));
    }

    #[test]
    fn test_leave_removes_presence() {
        let hub = BroadcastHub::new();
        let now = Instant::now();
        let mut a = Peer::join(&hub, 1, "room", now);
        let mut b = Peer::join(&hub, 2, "room", now);
        a.session
            .set_presence(PresenceRecord::new(ClientId(1), "Ada", "#f80"));
        b.poll(now);
        assert_eq!(b.session.presence().len(), 1);

        a.session.disconnect();
        b.poll(now);
        assert!(b.session.presence().is_empty());
    }

    #[test]
    fn test_offline_edits_are_replayed() {
        let hub = BroadcastHub::new();
        let now = Instant::now();
        let mut a = Peer::join(&hub, 1, "room", now);
        let mut b = Peer::join(&hub, 2, "room", now);

        a.session.disconnect();
        a.type_text("offline");
        assert_eq!(a.session.unsent_len(), "offline".chars().count() + 1);

        a.session.connect("room").unwrap();
        a.poll(now);
        assert_eq!(a.session.unsent_len(), 0);

        b.poll(now);
        assert_eq!(b.editor.plain_text(), "offline");
    }

    #[test]
    fn test_disconnect_discards_in_flight_events() {
        let hub = BroadcastHub::new();
        let now = Instant::now();
        let mut a = Peer::join(&hub, 1, "room", now);
        let mut b = Peer::join(&hub, 2, "room", now);

        a.type_text("lost");
        b.session.disconnect();
        b.poll(now);
        assert_eq!(b.editor.plain_text(), "");
    }

    #[test]
    fn test_heartbeat_reports_versions() {
        let hub = BroadcastHub::new();
        let now = Instant::now();
        let mut a = Peer::join(&hub, 1, "room", now);
        let mut b = Peer::join(&hub, 2, "room", now);
        a.type_text("x");
        b.poll(now);

        let beat = now + a.session.config().heartbeat_interval();
        b.poll(beat);
        a.poll(beat);
        assert_eq!(
            a.editor.replica().known_peers().collect::<Vec<_>>(),
            vec![ClientId(2)]
        );
    }
}

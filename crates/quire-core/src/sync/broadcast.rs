//! In-process peer-to-peer broadcast.
//!
//! Every transport attached to the same [`BroadcastHub`] and room receives
//! what the others send. Delivery is best-effort: a peer that has left, or
//! never shared the hub, simply misses messages.

use super::{Transport, TransportError, TransportEvent, TransportKind, WireMessage};
use crate::document::ClientId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Mutex};

struct Member {
    key: u64,
    participant: ClientId,
    tx: Sender<WireMessage>,
}

#[derive(Default)]
struct HubInner {
    rooms: Mutex<HashMap<String, Vec<Member>>>,
    next_key: AtomicU64,
}

/// The shared medium broadcast transports deliver through.
#[derive(Clone, Default)]
pub struct BroadcastHub {
    inner: Arc<HubInner>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Participants currently attached to `room`.
    pub fn members(&self, room: &str) -> Vec<ClientId> {
        self.inner
            .rooms
            .lock()
            .map(|rooms| {
                rooms
                    .get(room)
                    .map(|members| members.iter().map(|m| m.participant).collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    fn join(&self, room: &str, participant: ClientId) -> Result<(u64, Receiver<WireMessage>), TransportError> {
        let key = self.inner.next_key.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = channel();
        let mut rooms = self.inner.rooms.lock().map_err(lock_error)?;
        rooms.entry(room.to_string()).or_default().push(Member {
            key,
            participant,
            tx,
        });
        Ok((key, rx))
    }

    fn leave(&self, room: &str, key: u64) {
        if let Ok(mut rooms) = self.inner.rooms.lock() {
            if let Some(members) = rooms.get_mut(room) {
                members.retain(|m| m.key != key);
                if members.is_empty() {
                    rooms.remove(room);
                }
            }
        }
    }

    fn deliver(&self, room: &str, from: u64, message: &WireMessage) -> Result<(), TransportError> {
        let mut rooms = self.inner.rooms.lock().map_err(lock_error)?;
        if let Some(members) = rooms.get_mut(room) {
            // Receivers dropped without leaving are pruned here.
            members.retain(|m| m.key == from || m.tx.send(message.clone()).is_ok());
        }
        Ok(())
    }
}

fn lock_error(e: impl std::fmt::Display) -> TransportError {
    TransportError::Send(format!("Lock error: {}", e))
}

struct Membership {
    room: String,
    key: u64,
    rx: Receiver<WireMessage>,
}

/// A transport delivering through a [`BroadcastHub`].
pub struct BroadcastTransport {
    hub: BroadcastHub,
    membership: Option<Membership>,
    events: Vec<TransportEvent>,
}

impl BroadcastTransport {
    pub fn new(hub: BroadcastHub) -> Self {
        Self {
            hub,
            membership: None,
            events: Vec::new(),
        }
    }
}

impl Transport for BroadcastTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Broadcast
    }

    fn connect(&mut self, room: &str, participant: ClientId) -> Result<(), TransportError> {
        if self.membership.is_some() {
            return Err(TransportError::AlreadyConnected);
        }
        let (key, rx) = self.hub.join(room, participant)?;
        log::info!("Joined broadcast room {room} as {participant}");
        self.membership = Some(Membership {
            room: room.to_string(),
            key,
            rx,
        });
        self.events.push(TransportEvent::Connected);
        Ok(())
    }

    fn send(&mut self, message: &WireMessage) -> Result<(), TransportError> {
        let membership = self.membership.as_ref().ok_or(TransportError::NotConnected)?;
        self.hub.deliver(&membership.room, membership.key, message)
    }

    fn poll(&mut self) -> Vec<TransportEvent> {
        if let Some(membership) = &self.membership {
            self.events
                .extend(membership.rx.try_iter().map(TransportEvent::Message));
        }
        std::mem::take(&mut self.events)
    }

    fn disconnect(&mut self) {
        if let Some(membership) = self.membership.take() {
            self.hub.leave(&membership.room, membership.key);
            log::info!("Left broadcast room {}", membership.room);
        }
        self.events.clear();
    }
}

impl Drop for BroadcastTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leave(id: u64) -> WireMessage {
        WireMessage::Leave {
            participant_id: ClientId(id),
        }
    }

    #[test]
    fn test_delivers_to_others_in_room() {
        let hub = BroadcastHub::new();
        let mut a = BroadcastTransport::new(hub.clone());
        let mut b = BroadcastTransport::new(hub.clone());
        let mut c = BroadcastTransport::new(hub.clone());
        a.connect("room", ClientId(1)).unwrap();
        b.connect("room", ClientId(2)).unwrap();
        c.connect("elsewhere", ClientId(3)).unwrap();
        assert_eq!(a.poll(), vec![TransportEvent::Connected]);
        b.poll();
        c.poll();

        a.send(&leave(1)).unwrap();

        assert!(a.poll().is_empty());
        assert_eq!(b.poll(), vec![TransportEvent::Message(leave(1))]);
        assert!(c.poll().is_empty());
    }

    #[test]
    fn test_disconnect_stops_delivery() {
        let hub = BroadcastHub::new();
        let mut a = BroadcastTransport::new(hub.clone());
        let mut b = BroadcastTransport::new(hub.clone());
        a.connect("room", ClientId(1)).unwrap();
        b.connect("room", ClientId(2)).unwrap();
        a.send(&leave(1)).unwrap();

        b.disconnect();
        assert!(b.poll().is_empty());
        assert_eq!(hub.members("room"), vec![ClientId(1)]);
        assert_eq!(b.send(&leave(2)), Err(TransportError::NotConnected));
    }

    #[test]
    fn test_connect_twice_fails() {
        let hub = BroadcastHub::new();
        let mut a = BroadcastTransport::new(hub);
        a.connect("room", ClientId(1)).unwrap();
        assert_eq!(
            a.connect("room", ClientId(1)),
            Err(TransportError::AlreadyConnected)
        );
    }
}

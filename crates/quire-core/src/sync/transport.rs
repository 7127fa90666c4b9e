use super::{TransportError, TransportEvent, WireMessage};
use crate::document::ClientId;

/// How a transport reaches the rest of the room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Peers deliver to each other directly. Nobody holds the room's log,
    /// so initial state comes from peers answering a sync request.
    Broadcast,
    /// A server forwards messages and hands joiners the room's log.
    Relay,
}

/// A channel to the other participants of a room.
///
/// Implementations never block: `send` queues, `poll` drains whatever
/// arrived since the last call.
pub trait Transport: Send {
    fn kind(&self) -> TransportKind;

    /// Start joining `room` as `participant`. Completion is reported by a
    /// [`TransportEvent::Connected`] from `poll`.
    fn connect(&mut self, room: &str, participant: ClientId) -> Result<(), TransportError>;

    fn send(&mut self, message: &WireMessage) -> Result<(), TransportError>;

    /// Events received since the last call, in arrival order.
    fn poll(&mut self) -> Vec<TransportEvent>;

    /// Leave the room. Events not yet polled are discarded.
    fn disconnect(&mut self);
}

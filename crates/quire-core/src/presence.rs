//! Ephemeral per-participant awareness: who is here and where their
//! selection is.

use crate::document::ClientId;
use crate::editor::Selection;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// What one participant broadcasts about itself. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub participant_id: ClientId,
    pub name: String,
    pub color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection: Option<Selection>,
}

impl PresenceRecord {
    pub fn new(participant_id: ClientId, name: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            participant_id,
            name: name.into(),
            color: color.into(),
            selection: None,
        }
    }

    pub fn with_selection(mut self, selection: Option<Selection>) -> Self {
        self.selection = selection;
        self
    }
}

#[derive(Debug, Clone)]
struct Entry {
    record: PresenceRecord,
    seen: Instant,
}

/// Remote presence, keyed by participant.
#[derive(Debug, Clone, Default)]
pub struct PresenceTable {
    entries: HashMap<ClientId, Entry>,
}

impl PresenceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a record, replacing any previous one. Returns whether the
    /// visible record changed.
    pub fn upsert(&mut self, record: PresenceRecord, now: Instant) -> bool {
        let id = record.participant_id;
        let changed = self
            .entries
            .get(&id)
            .is_none_or(|entry| entry.record != record);
        self.entries.insert(id, Entry { record, seen: now });
        changed
    }

    pub fn remove(&mut self, id: ClientId) -> Option<PresenceRecord> {
        self.entries.remove(&id).map(|entry| entry.record)
    }

    /// Drop records older than `timeout`; returns who was dropped.
    pub fn purge(&mut self, now: Instant, timeout: Duration) -> Vec<ClientId> {
        let stale: Vec<ClientId> = self
            .entries
            .iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.seen) > timeout)
            .map(|(id, _)| *id)
            .collect();
        for id in &stale {
            self.entries.remove(id);
        }
        stale
    }

    pub fn get(&self, id: ClientId) -> Option<&PresenceRecord> {
        self.entries.get(&id).map(|entry| &entry.record)
    }

    pub fn contains(&self, id: ClientId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PresenceRecord> {
        self.entries.values().map(|entry| &entry.record)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editor::Caret;

    #[test]
    fn test_wire_shape() {
        let record = PresenceRecord::new(ClientId(3), "Ada", "#ff8800");
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["participantId"], 3);
        assert_eq!(json["name"], "Ada");
        assert!(json.get("selection").is_none());

        let with_selection =
            record.with_selection(Some(Selection::collapsed(Caret::document_start())));
        let json = serde_json::to_string(&with_selection).unwrap();
        let back: PresenceRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, with_selection);
    }

    #[test]
    fn test_upsert_reports_changes() {
        let mut table = PresenceTable::new();
        let now = Instant::now();
        let record = PresenceRecord::new(ClientId(1), "Ada", "#000");

        assert!(table.upsert(record.clone(), now));
        assert!(!table.upsert(record.clone(), now));
        assert!(table.upsert(
            PresenceRecord::new(ClientId(1), "Ada L.", "#000"),
            now
        ));
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(ClientId(1)).map(|r| r.name.as_str()), Some("Ada L."));
    }

    #[test]
    fn test_purge_drops_stale_entries() {
        let mut table = PresenceTable::new();
        let start = Instant::now();
        table.upsert(PresenceRecord::new(ClientId(1), "a", "#111"), start);
        table.upsert(
            PresenceRecord::new(ClientId(2), "b", "#222"),
            start + Duration::from_secs(10),
        );

        let dropped = table.purge(start + Duration::from_secs(16), Duration::from_secs(15));
        assert_eq!(dropped, vec![ClientId(1)]);
        assert!(table.contains(ClientId(2)));
        assert!(!table.contains(ClientId(1)));
    }
}

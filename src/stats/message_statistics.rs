//! Record of (sender → recipient → messages) traffic and per-agent main-phase
//! completion flags, observed by a single observer or meta-agent.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::identifier::Identifier;
use crate::message::Message;

#[derive(Default)]
struct Inner {
    communication_map: HashMap<Identifier, HashMap<Identifier, Vec<Message>>>,
    signaled_main_messaging_complete: HashMap<Identifier, bool>,
}

/// Thread-safe record of every message an observer or meta-agent has seen this
/// turn, plus which senders have signaled the end of the main communication
/// phase.
///
/// Guarded by a single mutex over a plain inner struct, per spec §5 — this is
/// deliberately not `DashMap`-per-field the way the teacher's router metrics
/// are; the spec calls for one lock over the whole statistics record.
pub struct MessageStatistics {
    inner: Mutex<Inner>,
}

impl MessageStatistics {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Records `msg` under `(msg.sender(), msg.recipient())`. Broadcasts with
    /// no recipient are recorded under `Identifier::default()` being absent —
    /// callers are expected to have already resolved a concrete recipient via
    /// [`crate::message::Message::with_recipient`] before recording.
    pub fn record_message(&self, msg: Message) {
        let Some(recipient) = msg.recipient() else {
            return;
        };
        let mut inner = self.inner.lock().expect("message statistics mutex poisoned");
        inner
            .communication_map
            .entry(msg.sender())
            .or_default()
            .entry(recipient)
            .or_default()
            .push(msg);
    }

    pub fn record_signaled_main_messaging_complete(&self, agent: Identifier) {
        let mut inner = self.inner.lock().expect("message statistics mutex poisoned");
        inner.signaled_main_messaging_complete.insert(agent, true);
    }

    /// Clears all recorded traffic and completion flags. Called at the start
    /// of every turn that re-accumulates statistics from scratch (partner
    /// search, main phase).
    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("message statistics mutex poisoned");
        inner.communication_map.clear();
        inner.signaled_main_messaging_complete.clear();
    }

    #[must_use]
    pub fn communication_map(&self) -> HashMap<Identifier, HashMap<Identifier, Vec<Message>>> {
        self.inner
            .lock()
            .expect("message statistics mutex poisoned")
            .communication_map
            .clone()
    }

    /// Whether `agent` appears anywhere as sender or recipient of a recorded
    /// message.
    ///
    /// Diverges from the reference implementation's `HasCommunicated`, whose
    /// `comMap[sender]` lookup against its own key is always true — an
    /// evident bug, not a documented invariant. This implements the apparent
    /// intent instead. See `DESIGN.md`.
    #[must_use]
    pub fn has_communicated(&self, agent: Identifier) -> bool {
        let inner = self.inner.lock().expect("message statistics mutex poisoned");
        if inner.communication_map.contains_key(&agent) {
            return true;
        }
        inner
            .communication_map
            .values()
            .any(|recipients| recipients.contains_key(&agent))
    }

    #[must_use]
    pub fn messages_from_agent(&self, sender: Identifier) -> Option<Vec<Message>> {
        let inner = self.inner.lock().expect("message statistics mutex poisoned");
        let per_recipient = inner.communication_map.get(&sender)?;
        Some(per_recipient.values().flatten().cloned().collect())
    }

    #[must_use]
    pub fn messages_to_agent(&self, recipient: Identifier) -> Option<Vec<Message>> {
        let inner = self.inner.lock().expect("message statistics mutex poisoned");
        let messages: Vec<Message> = inner
            .communication_map
            .values()
            .filter_map(|per_recipient| per_recipient.get(&recipient))
            .flatten()
            .cloned()
            .collect();
        if messages.is_empty() { None } else { Some(messages) }
    }

    #[must_use]
    pub fn messages_from_to(&self, sender: Identifier, recipient: Identifier) -> Option<Vec<Message>> {
        let inner = self.inner.lock().expect("message statistics mutex poisoned");
        inner.communication_map.get(&sender)?.get(&recipient).cloned()
    }

    #[must_use]
    pub fn messages_of_kind_from_agent(&self, sender: Identifier, kind: i32) -> Vec<Message> {
        self.messages_from_agent(sender)
            .unwrap_or_default()
            .into_iter()
            .filter(|m| m.kind() == kind)
            .collect()
    }

    #[must_use]
    pub fn messages_of_kind_to_agent(&self, recipient: Identifier, kind: i32) -> Vec<Message> {
        self.messages_to_agent(recipient)
            .unwrap_or_default()
            .into_iter()
            .filter(|m| m.kind() == kind)
            .collect()
    }

    #[must_use]
    pub fn has_sent_message_to(&self, sender: Identifier, recipient: Identifier) -> bool {
        self.messages_from_to(sender, recipient)
            .is_some_and(|msgs| !msgs.is_empty())
    }

    #[must_use]
    pub fn has_received_message_from(&self, recipient: Identifier, sender: Identifier) -> bool {
        self.has_sent_message_to(sender, recipient)
    }

    #[must_use]
    pub fn has_communicated_with(&self, agent1: Identifier, agent2: Identifier) -> bool {
        self.has_sent_message_to(agent1, agent2) || self.has_received_message_from(agent1, agent2)
    }

    #[must_use]
    pub fn has_communicated_with_any(&self, sender: Identifier, recipients: &[Identifier]) -> bool {
        recipients
            .iter()
            .any(|recipient| self.has_communicated_with(sender, *recipient))
    }

    #[must_use]
    pub fn has_communicated_with_all(&self, sender: Identifier, recipients: &[Identifier]) -> bool {
        recipients
            .iter()
            .all(|recipient| self.has_communicated_with(sender, *recipient))
    }

    #[must_use]
    pub fn has_signaled_main_messaging_complete(&self, agent: Identifier) -> bool {
        let inner = self.inner.lock().expect("message statistics mutex poisoned");
        inner
            .signaled_main_messaging_complete
            .get(&agent)
            .copied()
            .unwrap_or(false)
    }
}

impl Default for MessageStatistics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn records_and_retrieves_messages_between_a_pair() {
        let stats = MessageStatistics::new();
        let sender = Identifier::generate();
        let recipient = Identifier::generate();
        let msg = Message::new(sender, Some(recipient), 1, Bytes::from_static(b"hi"));
        stats.record_message(msg.clone());

        assert!(stats.has_sent_message_to(sender, recipient));
        assert!(stats.has_received_message_from(recipient, sender));
        assert_eq!(stats.messages_from_to(sender, recipient), Some(vec![msg]));
    }

    #[test]
    fn has_communicated_checks_both_directions() {
        let stats = MessageStatistics::new();
        let a = Identifier::generate();
        let b = Identifier::generate();
        stats.record_message(Message::new(a, Some(b), 1, Bytes::new()));

        assert!(stats.has_communicated(a));
        assert!(stats.has_communicated(b));
        assert!(!stats.has_communicated(Identifier::generate()));
    }

    #[test]
    fn clear_removes_all_recorded_state() {
        let stats = MessageStatistics::new();
        let a = Identifier::generate();
        let b = Identifier::generate();
        stats.record_message(Message::new(a, Some(b), 1, Bytes::new()));
        stats.record_signaled_main_messaging_complete(a);

        stats.clear();

        assert!(!stats.has_communicated(a));
        assert!(!stats.has_signaled_main_messaging_complete(a));
    }

    #[test]
    fn has_communicated_with_all_requires_every_recipient() {
        let stats = MessageStatistics::new();
        let sender = Identifier::generate();
        let a = Identifier::generate();
        let b = Identifier::generate();
        stats.record_message(Message::new(sender, Some(a), 1, Bytes::new()));

        assert!(!stats.has_communicated_with_all(sender, &[a, b]));
        stats.record_message(Message::new(sender, Some(b), 1, Bytes::new()));
        assert!(stats.has_communicated_with_all(sender, &[a, b]));
    }
}

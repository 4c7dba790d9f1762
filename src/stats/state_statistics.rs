//! Thread-safe snapshot of every model/meta agent's current state, refreshed
//! once per state-update phase.

use std::collections::HashMap;
use std::sync::Mutex;

use bytes::Bytes;

use crate::identifier::Identifier;
use crate::meta::MetaState;

#[derive(Default)]
struct Inner {
    states: HashMap<Identifier, Bytes>,
    meta_states: HashMap<Identifier, MetaState>,
    meta_dissolved: HashMap<Identifier, bool>,
}

/// An observer's view of the current state of everything it watches.
pub struct StateStatistics {
    inner: Mutex<Inner>,
}

impl StateStatistics {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn record_state(&self, model_id: Identifier, state: Bytes) {
        let mut inner = self.inner.lock().expect("state statistics mutex poisoned");
        inner.states.insert(model_id, state);
    }

    pub fn record_meta(&self, meta_id: Identifier, state: MetaState, dissolved: bool) {
        let mut inner = self.inner.lock().expect("state statistics mutex poisoned");
        inner.meta_states.insert(meta_id, state);
        inner.meta_dissolved.insert(meta_id, dissolved);
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("state statistics mutex poisoned");
        inner.states.clear();
        inner.meta_states.clear();
        inner.meta_dissolved.clear();
    }

    /// Drops every recorded model state whose bytes are empty — useful right
    /// after a state update in which some agents haven't produced a state
    /// yet.
    pub fn clear_empty_states(&self) {
        let mut inner = self.inner.lock().expect("state statistics mutex poisoned");
        inner.states.retain(|_, bytes| !bytes.is_empty());
    }

    #[must_use]
    pub fn states(&self) -> HashMap<Identifier, Bytes> {
        self.inner.lock().expect("state statistics mutex poisoned").states.clone()
    }

    #[must_use]
    pub fn meta_states(&self) -> HashMap<Identifier, MetaState> {
        self.inner
            .lock()
            .expect("state statistics mutex poisoned")
            .meta_states
            .clone()
    }

    #[must_use]
    pub fn meta_dissolved(&self) -> HashMap<Identifier, bool> {
        self.inner
            .lock()
            .expect("state statistics mutex poisoned")
            .meta_dissolved
            .clone()
    }
}

impl Default for StateStatistics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_model_and_meta_state() {
        let stats = StateStatistics::new();
        let model = Identifier::generate();
        let meta = Identifier::generate();

        stats.record_state(model, Bytes::from_static(b"state"));
        stats.record_meta(meta, MetaState::default(), false);

        assert_eq!(stats.states().get(&model), Some(&Bytes::from_static(b"state")));
        assert_eq!(stats.meta_dissolved().get(&meta), Some(&false));
    }

    #[test]
    fn clear_empty_states_drops_only_empty_bytes() {
        let stats = StateStatistics::new();
        let populated = Identifier::generate();
        let empty = Identifier::generate();
        stats.record_state(populated, Bytes::from_static(b"x"));
        stats.record_state(empty, Bytes::new());

        stats.clear_empty_states();

        let states = stats.states();
        assert!(states.contains_key(&populated));
        assert!(!states.contains_key(&empty));
    }
}

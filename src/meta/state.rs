//! Recursive predicted-state tree for a meta-agent.

use std::collections::HashMap;

use bytes::Bytes;

use crate::identifier::Identifier;

/// The state a meta-agent predicts for the agents it subsumes: a flat map of
/// directly subsumed model states, plus a map of directly subsumed child
/// meta-agents' own `MetaState`s.
///
/// Invariant: the identifier set reachable via [`MetaState::get_model_states_recursive`]
/// is exactly the set of model agents under this meta-agent (spec §3, §8).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetaState {
    model_states: HashMap<Identifier, Bytes>,
    child_states: HashMap<Identifier, MetaState>,
}

impl MetaState {
    #[must_use]
    pub fn new(
        model_states: HashMap<Identifier, Bytes>,
        child_states: HashMap<Identifier, MetaState>,
    ) -> Self {
        Self {
            model_states,
            child_states,
        }
    }

    #[must_use]
    pub fn model_states(&self) -> &HashMap<Identifier, Bytes> {
        &self.model_states
    }

    #[must_use]
    pub fn child_states(&self) -> &HashMap<Identifier, MetaState> {
        &self.child_states
    }

    /// Overwrites every model state named in `states` that already exists
    /// somewhere in this tree — new keys are never introduced — recursing
    /// into every child with the same full map, exactly as
    /// `MetaState.applyStateChange` does in the reference implementation.
    pub fn apply_state_change(&mut self, states: &HashMap<Identifier, Bytes>) {
        for (id, state) in &mut self.model_states {
            if let Some(new_state) = states.get(id) {
                *state = new_state.clone();
            }
        }
        for child in self.child_states.values_mut() {
            child.apply_state_change(states);
        }
    }

    /// Flattens this tree into every model id it (recursively) subsumes,
    /// mapped to that model's current predicted state bytes.
    #[must_use]
    pub fn get_model_states_recursive(&self) -> HashMap<Identifier, Bytes> {
        let mut flat = self.model_states.clone();
        for child in self.child_states.values() {
            flat.extend(child.get_model_states_recursive());
        }
        flat
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recursive_states_flatten_through_children() {
        let a = Identifier::generate();
        let b = Identifier::generate();
        let mut model_states = HashMap::new();
        model_states.insert(a, Bytes::from_static(b"a"));

        let mut child_model_states = HashMap::new();
        child_model_states.insert(b, Bytes::from_static(b"b"));
        let child = MetaState::new(child_model_states, HashMap::new());

        let mut child_states = HashMap::new();
        let child_id = Identifier::generate();
        child_states.insert(child_id, child);

        let tree = MetaState::new(model_states, child_states);
        let flat = tree.get_model_states_recursive();

        assert_eq!(flat.len(), 2);
        assert_eq!(flat.get(&a), Some(&Bytes::from_static(b"a")));
        assert_eq!(flat.get(&b), Some(&Bytes::from_static(b"b")));
    }

    #[test]
    fn apply_state_change_only_overwrites_existing_keys() {
        let a = Identifier::generate();
        let unknown = Identifier::generate();
        let mut model_states = HashMap::new();
        model_states.insert(a, Bytes::from_static(b"old"));
        let mut tree = MetaState::new(model_states, HashMap::new());

        let mut updates = HashMap::new();
        updates.insert(a, Bytes::from_static(b"new"));
        updates.insert(unknown, Bytes::from_static(b"ignored"));
        tree.apply_state_change(&updates);

        assert_eq!(tree.model_states().get(&a), Some(&Bytes::from_static(b"new")));
        assert!(!tree.model_states().contains_key(&unknown));
        assert!(!tree.get_model_states_recursive().contains_key(&unknown));
    }

    #[test]
    fn apply_state_change_recurses_into_every_child() {
        let child_model = Identifier::generate();
        let mut child_model_states = HashMap::new();
        child_model_states.insert(child_model, Bytes::from_static(b"old"));
        let child = MetaState::new(child_model_states, HashMap::new());

        let mut child_states = HashMap::new();
        child_states.insert(Identifier::generate(), child);
        let mut tree = MetaState::new(HashMap::new(), child_states);

        let mut updates = HashMap::new();
        updates.insert(child_model, Bytes::from_static(b"new"));
        tree.apply_state_change(&updates);

        let flat = tree.get_model_states_recursive();
        assert_eq!(flat.get(&child_model), Some(&Bytes::from_static(b"new")));
    }
}

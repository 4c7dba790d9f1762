//! Lookup tables the [`crate::bus::Bus`] dispatches through. Agents are
//! reached by identifier, never by a back-pointer to their owner, so that
//! `Bus`/`Server` can hold agents in `Arc`s without a reference cycle.

use std::sync::Arc;

use dashmap::DashMap;

use crate::agent::meta::MetaAgent;
use crate::agent::model::ModelAgent;
use crate::agent::SimulationAgent;
use crate::bus::Bus;
use crate::identifier::Identifier;
use crate::message::Message;

/// Which of the three agent kinds an identifier currently names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentKind {
    Model,
    Meta,
    Observer,
}

/// Shared, clonable handle to the Server's agent tables. Cloning is cheap —
/// every field is itself a reference-counted map.
///
/// Models are kept both as a typed `Arc<ModelAgent>` map — meta-agents need
/// the concrete type to reach into a subsumed model's `valid_partners` when
/// applying a `partner_search` closure's `internal` results (spec §4.4) —
/// and, type-erased, in `dispatch`, the single map every bus send actually
/// looks up through.
#[derive(Clone)]
pub struct AgentRegistry {
    dispatch: Arc<DashMap<Identifier, Arc<dyn SimulationAgent>>>,
    models: Arc<DashMap<Identifier, Arc<ModelAgent>>>,
    metas: Arc<DashMap<Identifier, Arc<MetaAgent>>>,
    observers: Arc<DashMap<Identifier, ()>>,
    /// `subsumed -> subsumer`, populated when a meta-agent subsumes an
    /// agent and cleared when the meta-agent dissolves.
    subsumed_by: Arc<DashMap<Identifier, Identifier>>,
}

impl AgentRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            dispatch: Arc::new(DashMap::new()),
            models: Arc::new(DashMap::new()),
            metas: Arc::new(DashMap::new()),
            observers: Arc::new(DashMap::new()),
            subsumed_by: Arc::new(DashMap::new()),
        }
    }

    pub fn register_model(&self, id: Identifier, agent: Arc<ModelAgent>) {
        self.dispatch.insert(id, agent.clone() as Arc<dyn SimulationAgent>);
        self.models.insert(id, agent);
    }

    pub fn register_meta(&self, id: Identifier, agent: Arc<MetaAgent>) {
        self.dispatch.insert(id, agent.clone() as Arc<dyn SimulationAgent>);
        self.metas.insert(id, agent);
    }

    pub fn register_observer(&self, id: Identifier, agent: Arc<dyn SimulationAgent>) {
        self.dispatch.insert(id, agent);
        self.observers.insert(id, ());
    }

    pub fn deregister_model(&self, id: Identifier) {
        self.dispatch.remove(&id);
        self.models.remove(&id);
    }

    pub fn deregister_meta(&self, id: Identifier) {
        self.dispatch.remove(&id);
        self.metas.remove(&id);
        self.subsumed_by.remove(&id);
        self.subsumed_by.retain(|_, subsumer| *subsumer != id);
    }

    /// Records that `subsumed` now routes through `subsumer`. Transitively
    /// consistent: if `subsumer` is itself later subsumed,
    /// [`AgentRegistry::resolve_subsumption`] follows the chain.
    pub fn mark_subsumed(&self, subsumed: Identifier, subsumer: Identifier) {
        self.subsumed_by.insert(subsumed, subsumer);
    }

    pub fn clear_subsumption(&self, id: Identifier) {
        self.subsumed_by.remove(&id);
    }

    /// Follows the subsumption chain from `id` to the topmost active
    /// subsumer, or returns `id` unchanged if it isn't subsumed.
    #[must_use]
    pub fn resolve_subsumption(&self, id: Identifier) -> Identifier {
        let mut current = id;
        let mut hops = 0usize;
        while let Some(subsumer) = self.subsumed_by.get(&current).map(|e| *e.value()) {
            current = subsumer;
            hops += 1;
            if hops > self.subsumed_by.len() + 1 {
                // Cycle guard: should be unreachable, subsumption never loops.
                break;
            }
        }
        current
    }

    #[must_use]
    pub fn kind_of(&self, id: Identifier) -> Option<AgentKind> {
        if self.models.contains_key(&id) {
            Some(AgentKind::Model)
        } else if self.metas.contains_key(&id) {
            Some(AgentKind::Meta)
        } else if self.observers.contains_key(&id) {
            Some(AgentKind::Observer)
        } else {
            None
        }
    }

    #[must_use]
    pub fn model_ids(&self) -> Vec<Identifier> {
        self.models.iter().map(|e| *e.key()).collect()
    }

    #[must_use]
    pub fn meta_ids(&self) -> Vec<Identifier> {
        self.metas.iter().map(|e| *e.key()).collect()
    }

    #[must_use]
    pub fn observer_ids(&self) -> Vec<Identifier> {
        self.observers.iter().map(|e| *e.key()).collect()
    }

    /// Typed lookup for a model agent, wherever it sits in the subsumption
    /// forest — used by meta-agents to mutate a (possibly deeply nested)
    /// subsumed model's `valid_partners` after running `partner_search`.
    #[must_use]
    pub fn model_handle(&self, id: Identifier) -> Option<Arc<ModelAgent>> {
        self.models.get(&id).map(|e| Arc::clone(e.value()))
    }

    /// Typed lookup for a meta-agent, used by the `Server` at cleanup to
    /// inspect `has_dissolved`/`subsumed_agents` without downcasting the
    /// type-erased `dispatch` entry.
    #[must_use]
    pub fn meta_handle(&self, id: Identifier) -> Option<Arc<MetaAgent>> {
        self.metas.get(&id).map(|e| Arc::clone(e.value()))
    }

    #[must_use]
    pub fn get(&self, id: Identifier) -> Option<Arc<dyn SimulationAgent>> {
        self.dispatch.get(&id).map(|e| Arc::clone(e.value()))
    }

    /// Records `msg` into every observer's statistics, and — only when the
    /// *sender* is currently subsumed — also into its topmost active
    /// subsumer's statistics (traffic a subsumed agent sends outward has no
    /// other avenue to be accounted for at its subsumer). Traffic where the
    /// *recipient* is subsumed is deliberately not mirrored here: ordinary
    /// dispatch already resolves such a recipient to its topmost subsumer
    /// and calls that meta-agent's `handle_message` directly, so mirroring
    /// it a second time here would double-count it. Mirroring happens
    /// before the admission check, so observers and subsumer statistics
    /// always see traffic regardless of bandwidth drops.
    pub fn mirror_to_observers(&self, msg: Message) {
        for id in self.observer_ids() {
            if let Some(agent) = self.get(id) {
                agent.observe(msg.clone());
            }
        }

        let sender = msg.sender();
        let sender_root = self.resolve_subsumption(sender);
        if sender_root != sender {
            if let Some(agent) = self.get(sender_root) {
                agent.observe(msg);
            }
        }
    }

    /// Dispatches `msg` to the registered agent named by its (already
    /// subsumption-resolved) recipient. A no-op if the recipient is not
    /// registered — this can happen briefly around cleanup-phase
    /// deregistration and is not treated as an error.
    pub async fn dispatch_to(&self, bus: &Bus, recipient: Identifier, msg: Message) {
        if let Some(agent) = self.get(recipient) {
            agent.handle_message(bus, msg).await;
        }
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

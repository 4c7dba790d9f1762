//! The derived actor that subsumes a group of model and/or meta agents,
//! predicts their collective state, and dissolves when its predictions stop
//! holding.
//!
//! Grounded on `MetaAgent.go`: field-for-field (`subsumedModelAgents`,
//! `subsumedMetaAgents`, `externalModelAgents`, the partner-validation
//! counters, `hasDissolved`) and method-for-method (`processCommunicationPartnerValidation`,
//! `handleStateUpdatePhase`, `VerifyAndDissolve`/`Dissolve`).
//!
//! **Resolved open question** (spec §9): `partner_search` and `predict` are
//! mandatory closures here, not optional with a fallback — see `DESIGN.md`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, trace};

use crate::agent::model::ModelAgent;
use crate::agent::registry::AgentRegistry;
use crate::agent::SimulationAgent;
use crate::bus::{self, Bus};
use crate::identifier::Identifier;
use crate::message::{self, Message};
use crate::meta::{MetaCondition, MetaState};
use crate::stats::MessageStatistics;

/// `responses[sender][receiver] = is_valid` — the cross-agent pairs a
/// `partner_search` closure has decided on, to be emitted as `VALID`
/// messages on the sender's behalf.
pub type PartnerSearchResponses = HashMap<Identifier, HashMap<Identifier, bool>>;

/// `internal[agent] = partners` — partner ids to append directly to an
/// internally-subsumed model agent's `valid_partners`, bypassing the
/// message substrate entirely (both ends are under the same meta-agent).
pub type PartnerSearchInternal = HashMap<Identifier, Vec<Identifier>>;

pub type PartnerSearchFn =
    Arc<dyn Fn(&MessageStatistics, &MetaState) -> (PartnerSearchResponses, PartnerSearchInternal) + Send + Sync>;

pub type PredictFn = Arc<dyn Fn(&MessageStatistics, &MetaState) -> HashMap<Identifier, Bytes> + Send + Sync>;

pub type VerifyFn = Arc<dyn Fn(&MessageStatistics, &MetaState, &HashMap<Identifier, Bytes>) -> bool + Send + Sync>;

pub type EvaluateFn = Arc<dyn Fn(&MetaAgent) -> f32 + Send + Sync>;

pub type ExplainFn = Arc<dyn Fn(&MessageStatistics, &MetaState) -> String + Send + Sync>;

/// A meta-agent subsuming a fixed group of model and/or meta agents, chosen
/// at creation time by an observer and never changed afterward.
pub struct MetaAgent {
    id: Identifier,
    registry: AgentRegistry,

    subsumed_models: Vec<Arc<ModelAgent>>,
    subsumed_metas: Vec<Arc<MetaAgent>>,
    subsumed_agents: Vec<Identifier>,
    external_model_agents: Vec<Identifier>,

    statistics: MessageStatistics,
    state: Mutex<MetaState>,
    condition: MetaCondition,

    expected_requests: AtomicU32,
    received_requests: AtomicU32,
    is_processing: AtomicBool,

    subsumed_finished_main: AtomicU32,

    is_subsumed: AtomicBool,
    subsumed_by: Mutex<Option<Identifier>>,

    partner_search: PartnerSearchFn,
    predict: PredictFn,
    evaluate: EvaluateFn,

    has_dissolved: AtomicBool,
}

impl MetaAgent {
    /// Subsumes `subsumed_models` and `subsumed_metas`, snapshotting their
    /// recursive state into a fresh [`MetaState`] and capturing the same
    /// flattened snapshot as the [`MetaCondition`]'s immutable base state.
    /// Registers the new meta-agent's subsumption in `registry` so the
    /// [`Bus`] routes forwarded traffic from its children here. Does **not**
    /// touch the server's [`crate::meta::MetaHierarchy`] — the caller
    /// (an [`crate::agent::ObserverAgent`]'s schedule, applied by the
    /// `Server`) is responsible for that, keeping this module independent
    /// of the server's bookkeeping structures.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: &AgentRegistry,
        subsumed_models: Vec<Arc<ModelAgent>>,
        subsumed_metas: Vec<Arc<MetaAgent>>,
        partner_search: PartnerSearchFn,
        predict: PredictFn,
        verify: Option<VerifyFn>,
        evaluate: Option<EvaluateFn>,
        explain: Option<ExplainFn>,
    ) -> Arc<Self> {
        let id = Identifier::generate();

        let model_states: HashMap<Identifier, Bytes> =
            subsumed_models.iter().map(|m| (m.id(), m.state())).collect();
        let child_states: HashMap<Identifier, MetaState> =
            subsumed_metas.iter().map(|m| (m.id(), m.state_snapshot())).collect();
        let state = MetaState::new(model_states, child_states);
        let base_state = state.get_model_states_recursive();

        for model in &subsumed_models {
            model.mark_subsumed(id);
            registry.mark_subsumed(model.id(), id);
        }
        for meta in &subsumed_metas {
            meta.mark_subsumed(id);
            registry.mark_subsumed(meta.id(), id);
        }

        let subsumed_agents: Vec<Identifier> = subsumed_models
            .iter()
            .map(|m| m.id())
            .chain(subsumed_metas.iter().map(|m| m.id()))
            .collect();
        let external_model_agents: Vec<Identifier> = registry
            .model_ids()
            .into_iter()
            .filter(|id| !base_state.contains_key(id))
            .collect();

        let mut condition = MetaCondition::new(verify, base_state);
        if let Some(explain) = explain {
            condition.set_explain(move |stats, state| explain(stats, state));
        }

        let evaluate = evaluate.unwrap_or_else(|| {
            Arc::new(|_: &MetaAgent| {
                debug!("no evaluation method for meta agent provided");
                0.0
            })
        });

        let agent = Arc::new(Self {
            id,
            registry: registry.clone(),
            subsumed_models,
            subsumed_metas,
            subsumed_agents,
            external_model_agents,
            statistics: MessageStatistics::new(),
            state: Mutex::new(state),
            condition,
            expected_requests: AtomicU32::new(0),
            received_requests: AtomicU32::new(0),
            is_processing: AtomicBool::new(false),
            subsumed_finished_main: AtomicU32::new(0),
            is_subsumed: AtomicBool::new(false),
            subsumed_by: Mutex::new(None),
            partner_search,
            predict,
            evaluate,
            has_dissolved: AtomicBool::new(false),
        });
        registry.register_meta(id, agent.clone());
        agent
    }

    #[must_use]
    pub fn state_snapshot(&self) -> MetaState {
        self.state.lock().expect("meta state mutex poisoned").clone()
    }

    #[must_use]
    pub fn condition(&self) -> &MetaCondition {
        &self.condition
    }

    #[must_use]
    pub fn statistics(&self) -> &MessageStatistics {
        &self.statistics
    }

    #[must_use]
    pub fn subsumed_agents(&self) -> &[Identifier] {
        &self.subsumed_agents
    }

    #[must_use]
    pub fn subsumed_metas(&self) -> &[Arc<MetaAgent>] {
        &self.subsumed_metas
    }

    #[must_use]
    pub fn external_model_agents(&self) -> &[Identifier] {
        &self.external_model_agents
    }

    #[must_use]
    pub fn has_dissolved(&self) -> bool {
        self.has_dissolved.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_subsumed(&self) -> bool {
        self.is_subsumed.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn subsumed_by(&self) -> Option<Identifier> {
        *self.subsumed_by.lock().expect("subsumed_by mutex poisoned")
    }

    pub fn mark_subsumed(&self, subsumer: Identifier) {
        self.is_subsumed.store(true, Ordering::SeqCst);
        *self.subsumed_by.lock().expect("subsumed_by mutex poisoned") = Some(subsumer);
    }

    pub fn mark_unsubsumed(&self) {
        self.is_subsumed.store(false, Ordering::SeqCst);
        *self.subsumed_by.lock().expect("subsumed_by mutex poisoned") = None;
    }

    #[must_use]
    pub fn verify(&self) -> bool {
        self.condition.verify(&self.statistics, &self.state_snapshot())
    }

    #[must_use]
    pub fn explain(&self) -> String {
        self.condition.explain(&self.statistics, &self.state_snapshot())
    }

    #[must_use]
    pub fn evaluate(&self) -> f32 {
        (self.evaluate)(self)
    }

    /// `VerifyAndDissolve`: if this meta-agent's own condition fails,
    /// dissolve it and independently re-run this same check on every
    /// directly subsumed meta-agent — dissolution does not cascade by
    /// itself, each subsumed meta only dissolves if *its own* condition
    /// also fails (matches `MetaAgent.go`'s `Dissolve` exactly).
    pub fn verify_and_dissolve(&self) {
        if !self.verify() {
            for child in &self.subsumed_metas {
                child.verify_and_dissolve();
            }
            self.has_dissolved.store(true, Ordering::SeqCst);
        }
    }

    #[must_use]
    pub fn main_phase_complete(&self) -> bool {
        self.subsumed_finished_main.load(Ordering::SeqCst) as usize >= self.subsumed_agents.len()
    }

    /// `processCommunicationPartnerValidation`: runs the (mandatory)
    /// `partner_search` closure once enough forwarded `VALID_REQUEST`
    /// traffic has arrived, emits `VALID` replies on each sender's behalf,
    /// and applies internally-resolved partner lists directly.
    async fn process_partner_validation(&self, bus: &Bus) {
        let (responses, internal) = (self.partner_search)(&self.statistics, &self.state_snapshot());

        for (sender, per_receiver) in responses {
            for (receiver, is_valid) in per_receiver {
                if receiver == sender {
                    continue;
                }
                let reply = Message::new(sender, Some(receiver), message::VALID, Message::valid_bytes(is_valid));
                bus.send_silently(&reply, receiver).await;
            }
        }

        for (agent_id, partners) in internal {
            if let Some(model) = self.registry.model_handle(agent_id) {
                model.add_valid_partners(&partners);
            }
        }
    }
}

#[async_trait]
impl SimulationAgent for MetaAgent {
    fn id(&self) -> Identifier {
        self.id
    }

    /// `setupCommunicationPartnerSearch`.
    async fn setup_partner_search(&self, _bus: &Bus) {
        let expected = (self.subsumed_models.len() * self.external_model_agents.len()) as u32;
        self.expected_requests.store(expected, Ordering::SeqCst);
        self.received_requests.store(0, Ordering::SeqCst);
        self.is_processing.store(false, Ordering::SeqCst);
        self.statistics.clear();
    }

    async fn handle_partner_search(&self, _bus: &Bus) {}

    async fn setup_main(&self, _bus: &Bus) {
        self.statistics.clear();
        self.subsumed_finished_main.store(0, Ordering::SeqCst);
    }

    async fn handle_main(&self, _bus: &Bus) {}

    async fn setup_state_update(&self, _bus: &Bus) {}

    /// `handleStateUpdatePhase`: a subsumed meta-agent does nothing — its
    /// topmost non-subsumed ancestor's `predict` already covers this
    /// subtree. Otherwise: predict, apply, forward, verify-and-dissolve,
    /// notify observers.
    async fn handle_state_update(&self, bus: &Bus) {
        if self.is_subsumed() {
            return;
        }
        let predictions = (self.predict)(&self.statistics, &self.state_snapshot());
        {
            let mut state = self.state.lock().expect("meta state mutex poisoned");
            state.apply_state_change(&predictions);
        }
        for (model_id, new_state) in &predictions {
            let update = Message::new(self.id, Some(*model_id), message::META_UPDATE_MODEL, new_state.clone());
            bus.send_direct(&update, *model_id).await;
        }
        self.verify_and_dissolve();
        let notify = Message::new(self.id, None, message::META_STATE_UPDATE, Bytes::new());
        bus.notify_observers(&notify);
    }

    async fn cleanup(&self, _bus: &Bus) {}

    /// Addressed sends land here after the bus has already resolved their
    /// recipient through the subsumption chain — `VALID` responses meant
    /// for one of this meta-agent's own subsumed models, plain traffic
    /// crossing in from outside the subtree, and `COM_MAIN_END` forwarded
    /// one hop at a time from a direct subsumed child (see
    /// `ModelAgent::end_main_phase`). `VALID_REQUEST` drives the
    /// partner-search threshold; `COM_MAIN_END` drives
    /// `handleMainPhaseEndMessage`'s own one-hop-further forward; everything
    /// else is recorded via `handleRecordableMessage`'s fallback.
    async fn handle_message(&self, bus: &Bus, msg: Message) {
        match msg.kind() {
            message::VALID_REQUEST => {
                self.statistics.record_message(msg);
                self.received_requests.fetch_add(1, Ordering::SeqCst);

                let expected = self.expected_requests.load(Ordering::SeqCst);
                let threshold = bus::drop_tolerant_threshold(expected, bus.effective_bandwidth());
                if self.received_requests.load(Ordering::SeqCst) < threshold {
                    return;
                }
                if self
                    .is_processing
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    trace!(meta = %self.id, "partner search threshold reached, running partner_search");
                    self.process_partner_validation(bus).await;
                }
            }
            message::COM_MAIN_END => {
                let count = self.subsumed_finished_main.fetch_add(1, Ordering::SeqCst) + 1;
                if count as usize >= self.subsumed_agents.len() {
                    if let Some(subsumer) = self.subsumed_by() {
                        bus.send_direct_silently(&msg, subsumer).await;
                    }
                }
            }
            _ => self.statistics.record_message(msg),
        }
    }

    /// Outbound traffic from one of this meta-agent's subsumed children,
    /// mirrored here because dispatch only ever resolves a message's
    /// *recipient* side — a subsumed *sender*'s own outgoing messages have
    /// no other avenue to be accounted for at their subsumer (spec §4.2,
    /// "subsumption rerouting").
    fn observe(&self, msg: Message) {
        self.statistics.record_message(msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc as StdArc;

    fn trivial_partner_search() -> PartnerSearchFn {
        Arc::new(|_, _| (HashMap::new(), HashMap::new()))
    }

    fn trivial_predict() -> PredictFn {
        Arc::new(|_, _| HashMap::new())
    }

    #[test]
    fn subsuming_marks_children_and_snapshots_their_state() {
        let registry = AgentRegistry::new();
        let model = StdArc::new(crate::agent::ModelAgent::new(Arc::new(|_| true), Arc::new(|| Bytes::new())));
        registry.register_model(model.id(), model.clone());

        let meta = MetaAgent::new(
            &registry,
            vec![model.clone()],
            vec![],
            trivial_partner_search(),
            trivial_predict(),
            None,
            None,
            None,
        );

        assert!(model.is_subsumed());
        assert_eq!(model.subsumed_by(), Some(meta.id()));
        assert_eq!(meta.subsumed_agents(), &[model.id()]);
        assert_eq!(meta.state_snapshot().get_model_states_recursive().len(), 1);
    }

    #[test]
    fn verify_failure_dissolves_without_cascading_to_a_passing_child() {
        let registry = AgentRegistry::new();
        let model = StdArc::new(crate::agent::ModelAgent::new(Arc::new(|_| true), Arc::new(|| Bytes::new())));
        registry.register_model(model.id(), model.clone());

        let child = MetaAgent::new(
            &registry,
            vec![model.clone()],
            vec![],
            trivial_partner_search(),
            trivial_predict(),
            Some(Arc::new(|_, _, _| true)),
            None,
            None,
        );
        let parent = MetaAgent::new(
            &registry,
            vec![],
            vec![child.clone()],
            trivial_partner_search(),
            trivial_predict(),
            Some(Arc::new(|_, _, _| false)),
            None,
            None,
        );

        parent.verify_and_dissolve();
        assert!(parent.has_dissolved());
        assert!(!child.has_dissolved());
    }

    #[tokio::test]
    async fn main_phase_completes_once_every_subsumed_agent_has_signaled() {
        let registry = AgentRegistry::new();
        let a = StdArc::new(crate::agent::ModelAgent::new(Arc::new(|_| true), Arc::new(|| Bytes::new())));
        let b = StdArc::new(crate::agent::ModelAgent::new(Arc::new(|_| true), Arc::new(|| Bytes::new())));
        registry.register_model(a.id(), a.clone());
        registry.register_model(b.id(), b.clone());

        let meta = MetaAgent::new(
            &registry,
            vec![a.clone(), b.clone()],
            vec![],
            trivial_partner_search(),
            trivial_predict(),
            None,
            None,
            None,
        );

        let bus = Bus::new(bus::BusConfig {
            synchronous: true,
            bandwidth: 10,
        });
        meta.handle_message(&bus, Message::new(a.id(), None, message::COM_MAIN_END, Bytes::new()))
            .await;
        assert!(!meta.main_phase_complete());
        meta.handle_message(&bus, Message::new(b.id(), None, message::COM_MAIN_END, Bytes::new()))
            .await;
        assert!(meta.main_phase_complete());
    }
}

//! Watches a selected set of model and meta agents, accumulates their
//! traffic into its own [`MessageStatistics`], and is the sole seam through
//! which new meta-agents get scheduled.
//!
//! Grounded on `ObserverAgent.go`: `observedModelAgents`/`observedMetaAgents`,
//! the observation-strategy hook, and `ScheduleMetaAgent`'s materialization at
//! the end of the state-update phase.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::agent::meta::{EvaluateFn, ExplainFn, MetaAgent, PartnerSearchFn, PredictFn, VerifyFn};
use crate::agent::model::ModelAgent;
use crate::agent::registry::AgentRegistry;
use crate::agent::SimulationAgent;
use crate::bus::Bus;
use crate::event::Event;
use crate::identifier::Identifier;
use crate::message::{self, Message};
use crate::meta::MetaHierarchy;
use crate::stats::{MessageStatistics, StateStatistics};

/// `(registry, currently_observed_models, currently_observed_metas) ->
/// (new_models, new_metas)`. Run once per iteration, before partner search.
///
/// The default strategy watches every model agent that is not currently
/// subsumed and leaves the watched meta-agents untouched — new meta-agents
/// only ever join the observed set via [`ScheduleHandle::schedule_meta_agent`].
pub type ObservationStrategyFn =
    Arc<dyn Fn(&AgentRegistry, &[Identifier], &[Identifier]) -> (Vec<Identifier>, Vec<Identifier>) + Send + Sync>;

fn default_observation_strategy() -> ObservationStrategyFn {
    Arc::new(|registry, _current_models, current_metas| {
        let models = registry
            .model_ids()
            .into_iter()
            .filter(|id| registry.resolve_subsumption(*id) == *id)
            .collect();
        (models, current_metas.to_vec())
    })
}

struct ScheduledMetaAgent {
    models: Vec<Arc<ModelAgent>>,
    metas: Vec<Arc<MetaAgent>>,
    partner_search: PartnerSearchFn,
    predict: PredictFn,
    verify: Option<VerifyFn>,
    evaluate: Option<EvaluateFn>,
    explain: Option<ExplainFn>,
}

/// Handed to `on_after_all_state_updates_received` subscribers, who run
/// whatever classification logic decides which agents to group, then call
/// back into [`ScheduleHandle::schedule_meta_agent`]. Kept separate from
/// `&ObserverAgent` itself so subscribers only ever see the one capability
/// they need.
#[derive(Clone)]
pub struct ScheduleHandle {
    queue: Arc<Mutex<Vec<ScheduledMetaAgent>>>,
}

impl ScheduleHandle {
    /// `ScheduleMetaAgent`: queues a group of model/meta agents to be
    /// subsumed into a new meta-agent once every subscriber has run.
    #[allow(clippy::too_many_arguments)]
    pub fn schedule_meta_agent(
        &self,
        models: Vec<Arc<ModelAgent>>,
        metas: Vec<Arc<MetaAgent>>,
        partner_search: PartnerSearchFn,
        predict: PredictFn,
        verify: Option<VerifyFn>,
        evaluate: Option<EvaluateFn>,
        explain: Option<ExplainFn>,
    ) {
        self.queue
            .lock()
            .expect("schedule queue mutex poisoned")
            .push(ScheduledMetaAgent {
                models,
                metas,
                partner_search,
                predict,
                verify,
                evaluate,
                explain,
            });
    }
}

/// A non-participating agent that records traffic among the agents it
/// watches and decides, between iterations, which of them are predictable
/// enough to fold into a meta-agent.
///
/// Unlike `MetaAgent`, which the registry routes messages to directly once
/// it subsumes an agent, `ObserverAgent` never receives addressed traffic —
/// it only ever sees mirrored copies via [`SimulationAgent::observe`], and
/// self-filters by membership in its own observed sets.
pub struct ObserverAgent {
    id: Identifier,
    registry: AgentRegistry,
    hierarchy: Arc<Mutex<MetaHierarchy>>,

    observed_models: Mutex<Vec<Identifier>>,
    observed_metas: Mutex<Vec<Identifier>>,
    observation_strategy: ObservationStrategyFn,

    statistics: MessageStatistics,
    state_statistics: StateStatistics,
    finished_main: AtomicU32,
    finished_state_updates: AtomicU32,

    schedule_queue: Arc<Mutex<Vec<ScheduledMetaAgent>>>,
    on_after_all_state_updates_received: Mutex<Event<ScheduleHandle>>,
}

impl ObserverAgent {
    #[must_use]
    pub fn new(registry: AgentRegistry, hierarchy: Arc<Mutex<MetaHierarchy>>) -> Arc<Self> {
        Self::with_observation_strategy(registry, hierarchy, default_observation_strategy())
    }

    #[must_use]
    pub fn with_observation_strategy(
        registry: AgentRegistry,
        hierarchy: Arc<Mutex<MetaHierarchy>>,
        observation_strategy: ObservationStrategyFn,
    ) -> Arc<Self> {
        let id = Identifier::generate();
        let agent = Arc::new(Self {
            id,
            registry: registry.clone(),
            hierarchy,
            observed_models: Mutex::new(Vec::new()),
            observed_metas: Mutex::new(Vec::new()),
            observation_strategy,
            statistics: MessageStatistics::new(),
            state_statistics: StateStatistics::new(),
            finished_main: AtomicU32::new(0),
            finished_state_updates: AtomicU32::new(0),
            schedule_queue: Arc::new(Mutex::new(Vec::new())),
            on_after_all_state_updates_received: Mutex::new(Event::new()),
        });
        registry.register_observer(id, agent.clone() as Arc<dyn SimulationAgent>);
        agent
    }

    /// Registers a subscriber invoked once every observed model/meta agent
    /// has published its new state for this iteration — the only seam
    /// through which new meta-agents get scheduled.
    pub fn subscribe_on_after_all_state_updates_received<F>(&self, subscriber: F)
    where
        F: Fn(&ScheduleHandle) + Send + Sync + 'static,
    {
        self.on_after_all_state_updates_received
            .lock()
            .expect("event mutex poisoned")
            .subscribe(subscriber);
    }

    #[must_use]
    pub fn observed_models(&self) -> Vec<Identifier> {
        self.observed_models.lock().expect("observed_models mutex poisoned").clone()
    }

    #[must_use]
    pub fn observed_metas(&self) -> Vec<Identifier> {
        self.observed_metas.lock().expect("observed_metas mutex poisoned").clone()
    }

    #[must_use]
    pub fn statistics(&self) -> &MessageStatistics {
        &self.statistics
    }

    /// The most recent `COM_STATE_UPDATE`/`META_STATE_UPDATE` snapshot this
    /// observer has recorded for each agent it watches (spec §2,
    /// `StateStatistics`).
    #[must_use]
    pub fn state_statistics(&self) -> &StateStatistics {
        &self.state_statistics
    }

    /// `true` once every currently-observed model agent has signaled
    /// `COM_MAIN_END` this turn. Trivially `true` with nothing observed.
    #[must_use]
    pub fn main_phase_complete(&self) -> bool {
        self.finished_main.load(Ordering::SeqCst) as usize >= self.observed_models().len()
    }

    fn apply_observation_strategy(&self) {
        let current_models = self.observed_models();
        let current_metas = self.observed_metas();
        let (models, metas) = (self.observation_strategy)(&self.registry, &current_models, &current_metas);
        *self.observed_models.lock().expect("observed_models mutex poisoned") = models;
        *self.observed_metas.lock().expect("observed_metas mutex poisoned") = metas;
    }

    fn expected_state_updates(&self) -> usize {
        self.observed_models().len() + self.observed_metas().len()
    }

    /// Invokes every subscriber, then turns each queued schedule entry into
    /// a real, registered meta-agent: updates the hierarchy and prunes the
    /// newly-subsumed model ids out of the observed set so next iteration's
    /// strategy pass doesn't have to rediscover them.
    fn materialize_scheduled_meta_agents(&self) {
        let handle = ScheduleHandle {
            queue: self.schedule_queue.clone(),
        };
        self.on_after_all_state_updates_received
            .lock()
            .expect("event mutex poisoned")
            .invoke(&handle);

        let scheduled: Vec<ScheduledMetaAgent> =
            std::mem::take(&mut *self.schedule_queue.lock().expect("schedule queue mutex poisoned"));
        if scheduled.is_empty() {
            return;
        }

        let mut newly_subsumed = Vec::new();
        for entry in scheduled {
            newly_subsumed.extend(entry.models.iter().map(|m| m.id()));
            let meta = MetaAgent::new(
                &self.registry,
                entry.models,
                entry.metas,
                entry.partner_search,
                entry.predict,
                entry.verify,
                entry.evaluate,
                entry.explain,
            );
            self.hierarchy
                .lock()
                .expect("hierarchy mutex poisoned")
                .subsume(meta.id(), meta.subsumed_agents());
        }

        self.observed_models
            .lock()
            .expect("observed_models mutex poisoned")
            .retain(|id| !newly_subsumed.contains(id));
    }
}

#[async_trait]
impl SimulationAgent for ObserverAgent {
    fn id(&self) -> Identifier {
        self.id
    }

    /// Re-runs the observation strategy and resets this iteration's
    /// counters before partner search begins.
    async fn setup_partner_search(&self, _bus: &Bus) {
        self.statistics.clear();
        self.state_statistics.clear();
        self.finished_main.store(0, Ordering::SeqCst);
        self.finished_state_updates.store(0, Ordering::SeqCst);
        self.apply_observation_strategy();
    }

    /// Records every message sent by or to a watched agent, counts
    /// `COM_MAIN_END`/`COM_STATE_UPDATE`/`META_STATE_UPDATE` against the
    /// observed set, and materializes any scheduled meta-agents the moment
    /// every observed agent has published its new state. Never addressed
    /// directly — only ever reached via the registry's mirroring.
    fn observe(&self, msg: Message) {
        let observed_models = self.observed_models();
        let observed_metas = self.observed_metas();
        let watched = |id: Identifier| observed_models.contains(&id) || observed_metas.contains(&id);

        if watched(msg.sender()) || msg.recipient().is_some_and(watched) {
            self.statistics.record_message(msg.clone());
        }

        match msg.kind() {
            message::COM_MAIN_END if observed_models.contains(&msg.sender()) => {
                self.finished_main.fetch_add(1, Ordering::SeqCst);
            }
            message::COM_STATE_UPDATE if observed_models.contains(&msg.sender()) => {
                self.state_statistics.record_state(msg.sender(), msg.data().clone());
                let count = self.finished_state_updates.fetch_add(1, Ordering::SeqCst) + 1;
                if count as usize >= self.expected_state_updates() {
                    self.materialize_scheduled_meta_agents();
                }
            }
            message::META_STATE_UPDATE if observed_metas.contains(&msg.sender()) => {
                if let Some(meta) = self.registry.meta_handle(msg.sender()) {
                    self.state_statistics
                        .record_meta(msg.sender(), meta.state_snapshot(), meta.has_dissolved());
                }
                let count = self.finished_state_updates.fetch_add(1, Ordering::SeqCst) + 1;
                if count as usize >= self.expected_state_updates() {
                    self.materialize_scheduled_meta_agents();
                }
            }
            _ => {}
        }
    }
}

//! The four-phase iteration driver: spawns model/observer agents, owns the
//! [`Bus`] and [`MetaHierarchy`], and runs turns 0–3 every iteration.
//!
//! Grounded on `Server.go`'s `RunTurn` dispatcher (the two-pass `setup_*`
//! then `handle_*` over every agent, per turn) and on
//! `message_router/router.rs`'s `MessageRouterImpl::start`/`spawn_worker_task`
//! pattern for spawning per-agent dispatch as joined `tokio::task`s with a
//! `tracing::info_span!` per dispatch.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use bytes::Bytes;
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::agent::{AgentKind, AgentRegistry, ModelAgent, ObserverAgent, SimulationAgent};
use crate::bus::{Bus, BusConfig};
use crate::config::ServerConfig;
use crate::error::PlatformResult;
use crate::event::Event;
use crate::identifier::Identifier;
use crate::meta::MetaHierarchy;

/// A point-in-time capture of every model agent's state and the environment
/// map, taken at the end of turn 3. Feeds the bounded history ring the
/// `rollback-alpha` feature reads from.
#[derive(Debug, Clone)]
pub struct HistorySnapshot {
    pub iteration: u64,
    pub model_states: HashMap<Identifier, Bytes>,
    pub environment: HashMap<String, Bytes>,
}

#[derive(Clone, Copy, Debug)]
enum Pass {
    SetupPartnerSearch,
    HandlePartnerSearch,
    SetupMain,
    HandleMain,
    SetupStateUpdate,
    HandleStateUpdate,
    Cleanup,
}

impl Pass {
    fn name(self) -> &'static str {
        match self {
            Pass::SetupPartnerSearch => "setup_partner_search",
            Pass::HandlePartnerSearch => "handle_partner_search",
            Pass::SetupMain => "setup_main",
            Pass::HandleMain => "handle_main",
            Pass::SetupStateUpdate => "setup_state_update",
            Pass::HandleStateUpdate => "handle_state_update",
            Pass::Cleanup => "cleanup",
        }
    }

    async fn run(self, agent: &Arc<dyn SimulationAgent>, bus: &Bus) {
        match self {
            Pass::SetupPartnerSearch => agent.setup_partner_search(bus).await,
            Pass::HandlePartnerSearch => agent.handle_partner_search(bus).await,
            Pass::SetupMain => agent.setup_main(bus).await,
            Pass::HandleMain => agent.handle_main(bus).await,
            Pass::SetupStateUpdate => agent.setup_state_update(bus).await,
            Pass::HandleStateUpdate => agent.handle_state_update(bus).await,
            Pass::Cleanup => agent.cleanup(bus).await,
        }
    }
}

/// The turn/phase driver. Holds the [`Bus`] (message substrate + agent
/// registry) and the [`MetaHierarchy`] (subsumption forest), and drives every
/// registered agent through the four-turn loop described in spec §4.1.
///
/// Agents never hold a reference back to `Server` itself — only to the
/// `Bus`/`AgentRegistry` handles it hands out at spawn time (spec §9's
/// "lookup through the registry, not back-pointers" design note), so a
/// `Server` can be dropped and reconstructed around the same `Bus` in tests
/// without fighting a reference cycle.
pub struct Server {
    bus: Arc<Bus>,
    hierarchy: Arc<Mutex<MetaHierarchy>>,
    config: ServerConfig,
    pub(crate) history: Mutex<VecDeque<HistorySnapshot>>,
    on_update_environment: Mutex<Event<HashMap<String, Bytes>>>,
    on_iteration_finished: Mutex<Event<u64>>,
}

impl Server {
    #[must_use]
    pub fn new(config: ServerConfig) -> Arc<Self> {
        let bus = Bus::new(BusConfig {
            synchronous: config.internal_synchronous,
            bandwidth: config.agent_bandwidth.as_u32(),
        });
        Arc::new(Self {
            bus,
            hierarchy: Arc::new(Mutex::new(MetaHierarchy::default())),
            config,
            history: Mutex::new(VecDeque::new()),
            on_update_environment: Mutex::new(Event::new()),
            on_iteration_finished: Mutex::new(Event::new()),
        })
    }

    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    #[must_use]
    pub fn bus(&self) -> &Arc<Bus> {
        &self.bus
    }

    #[must_use]
    pub fn registry(&self) -> &AgentRegistry {
        self.bus.registry()
    }

    #[must_use]
    pub fn hierarchy(&self) -> &Arc<Mutex<MetaHierarchy>> {
        &self.hierarchy
    }

    /// Registers a freshly-built model agent as a root of the hierarchy.
    pub fn spawn_model(&self, agent: ModelAgent) -> Arc<ModelAgent> {
        let agent = Arc::new(agent);
        self.bus.registry().register_model(agent.id(), agent.clone());
        self.hierarchy.lock().expect("hierarchy mutex poisoned").add_agent(agent.id());
        agent
    }

    /// Convenience for the "per-class counts and factories" construction
    /// style spec §6 describes: builds `count` model agents from `factory`
    /// and registers each.
    pub fn spawn_models<F>(&self, count: u32, factory: F) -> Vec<Arc<ModelAgent>>
    where
        F: Fn() -> ModelAgent,
    {
        (0..count).map(|_| self.spawn_model(factory())).collect()
    }

    /// Builds and registers an observer agent via `factory`, which receives
    /// this server's registry and hierarchy handles — the same handles every
    /// other agent is constructed with, never a reference to `Server` itself.
    pub fn spawn_observer<F>(&self, factory: F) -> Arc<ObserverAgent>
    where
        F: FnOnce(AgentRegistry, Arc<Mutex<MetaHierarchy>>) -> Arc<ObserverAgent>,
    {
        factory(self.bus.registry().clone(), self.hierarchy.clone())
    }

    pub fn environment_get(&self, key: &str) -> Option<Bytes> {
        self.bus.environment_get(key)
    }

    pub fn environment_set(&self, key: impl Into<String>, value: Bytes) {
        self.bus.environment_set(key, value);
    }

    /// Registers a subscriber invoked with the environment snapshot at the
    /// end of every iteration's cleanup turn, before `on_iteration_finished`.
    pub fn subscribe_on_update_environment<F>(&self, subscriber: F)
    where
        F: Fn(&HashMap<String, Bytes>) + Send + Sync + 'static,
    {
        self.on_update_environment
            .lock()
            .expect("event mutex poisoned")
            .subscribe(subscriber);
    }

    /// Registers a subscriber invoked with the iteration number once cleanup
    /// has fully completed.
    pub fn subscribe_on_iteration_finished<F>(&self, subscriber: F)
    where
        F: Fn(&u64) + Send + Sync + 'static,
    {
        self.on_iteration_finished
            .lock()
            .expect("event mutex poisoned")
            .subscribe(subscriber);
    }

    #[must_use]
    pub fn history(&self) -> Vec<HistorySnapshot> {
        self.history.lock().expect("history mutex poisoned").iter().cloned().collect()
    }

    fn all_agent_ids(&self) -> Vec<Identifier> {
        let registry = self.bus.registry();
        let mut ids = registry.model_ids();
        ids.extend(registry.meta_ids());
        ids.extend(registry.observer_ids());
        ids
    }

    async fn run_pass(&self, iteration: u64, turn: u32, pass: Pass, ids: &[Identifier]) {
        let mut tasks = JoinSet::new();
        for id in ids.iter().copied() {
            let bus = self.bus.clone();
            let span = tracing::debug_span!("agent_dispatch", iteration, turn, pass = pass.name(), agent_id = %id);
            tasks.spawn(
                async move {
                    if let Some(agent) = bus.registry().get(id) {
                        pass.run(&agent, &bus).await;
                    }
                }
                .instrument(span),
            );
        }
        while tasks.join_next().await.is_some() {}
    }

    /// Runs exactly one iteration's four turns: partner search, main
    /// communication, state update, cleanup (spec §4.1). Turn N+1 never
    /// begins before every agent's turn-N dispatch has joined — the join
    /// itself is the barrier; no separate signaling object is needed (spec
    /// §4.1 Expansion, "Dispatch mechanics").
    ///
    /// # Errors
    /// Propagates whatever a future contract-violation check surfaces; none
    /// of the current turn bodies can fail, but the signature is `Result`-
    /// shaped so a future caller composing this with fallible setup (loading
    /// a `ServerConfig`, say) can use `?` throughout.
    pub async fn run_iteration(&self, iteration: u64) -> PlatformResult<()> {
        let _iteration_span = tracing::info_span!("iteration", iteration).entered();

        let ids = self.all_agent_ids();
        self.bus.reset_bandwidth();
        self.run_pass(iteration, 0, Pass::SetupPartnerSearch, &ids).await;
        self.run_pass(iteration, 0, Pass::HandlePartnerSearch, &ids).await;
        self.bus.drain().await;

        self.bus.reset_bandwidth();
        self.run_pass(iteration, 1, Pass::SetupMain, &ids).await;
        self.run_pass(iteration, 1, Pass::HandleMain, &ids).await;
        self.bus.drain().await;

        self.bus.reset_bandwidth();
        self.run_pass(iteration, 2, Pass::SetupStateUpdate, &ids).await;
        self.run_pass(iteration, 2, Pass::HandleStateUpdate, &ids).await;
        self.bus.drain().await;

        self.run_pass(iteration, 3, Pass::Cleanup, &ids).await;
        self.dissolve_expired_meta_agents();
        self.snapshot_history(iteration);

        let env = self.bus.environment_snapshot();
        self.on_update_environment
            .lock()
            .expect("event mutex poisoned")
            .invoke(&env);
        self.on_iteration_finished
            .lock()
            .expect("event mutex poisoned")
            .invoke(&iteration);

        Ok(())
    }

    /// Turn 3(a): dissolves every meta-agent whose `has_dissolved` flag is
    /// set, unsubsumes its direct children (model or meta), reparents them
    /// in the hierarchy, and removes the meta-agent from the registries.
    /// Centralized here rather than mid-turn so routing stays stable while
    /// `handle_state_update` dispatch is still in flight (spec §4.4).
    fn dissolve_expired_meta_agents(&self) {
        let registry = self.bus.registry();
        for meta_id in registry.meta_ids() {
            let Some(meta) = registry.meta_handle(meta_id) else {
                continue;
            };
            if !meta.has_dissolved() {
                continue;
            }

            tracing::info!(meta_id = %meta_id, reason = %meta.explain(), "dissolving meta-agent");

            for &child_id in meta.subsumed_agents() {
                match registry.kind_of(child_id) {
                    Some(AgentKind::Model) => {
                        if let Some(model) = registry.model_handle(child_id) {
                            model.mark_unsubsumed();
                        }
                    }
                    Some(AgentKind::Meta) => {
                        if let Some(child_meta) = registry.meta_handle(child_id) {
                            child_meta.mark_unsubsumed();
                        }
                    }
                    Some(AgentKind::Observer) | None => {}
                }
                registry.clear_subsumption(child_id);
            }

            self.hierarchy.lock().expect("hierarchy mutex poisoned").dissolve(meta_id);
            registry.deregister_meta(meta_id);
        }
    }

    /// Turn 3(b): snapshots every model agent's current state and the
    /// environment map into the bounded history ring, evicting the oldest
    /// entry once `max_memory_depth` is exceeded.
    fn snapshot_history(&self, iteration: u64) {
        let registry = self.bus.registry();
        let model_states: HashMap<Identifier, Bytes> = registry
            .model_ids()
            .into_iter()
            .filter_map(|id| registry.model_handle(id).map(|m| (id, m.state())))
            .collect();
        let environment = self.bus.environment_snapshot();

        let mut history = self.history.lock().expect("history mutex poisoned");
        history.push_back(HistorySnapshot {
            iteration,
            model_states,
            environment,
        });
        let max_depth = self.config.max_memory_depth.as_usize();
        while history.len() > max_depth {
            history.pop_front();
        }
    }

    /// Runs `self.config.iterations` iterations in sequence, stopping early
    /// (without error) if `max_duration` elapses — the in-progress iteration
    /// is allowed to finish, matching spec §5's cancellation model. Returns
    /// the number of iterations actually completed.
    ///
    /// # Errors
    /// Propagates the first error any [`Server::run_iteration`] call returns.
    pub async fn run(&self) -> PlatformResult<u64> {
        let start = Instant::now();
        let total = u64::from(self.config.iterations.as_u32());
        for iteration in 0..total {
            self.run_iteration(iteration).await?;
            if start.elapsed() >= self.config.max_duration_ms.as_duration() {
                tracing::warn!(
                    iteration,
                    "max_duration elapsed; stopping run after completing the current iteration"
                );
                return Ok(iteration + 1);
            }
        }
        Ok(total)
    }
}

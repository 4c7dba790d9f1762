//! The basic simulated participant: holds a byte-string state, exchanges
//! messages with its peers, and validates communication partners.
//!
//! Grounded on `ModelAgent.go`: field-for-field (`validComPartners`,
//! `validationFunc`, `stateUpdateFunc`, `isSubsumed`/`subsumedBy`, the four
//! partner-search counters) and method-for-method (`handleValidationRequestMessage`,
//! `checkCommunicationPartnerSearchEnd`, `EndMainCommunicationPhase`, ...).

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::trace;

use crate::agent::SimulationAgent;
use crate::bus::{self, Bus};
use crate::event::Event;
use crate::identifier::Identifier;
use crate::message::{self, Message};

/// `validation_predicate: Message -> bool` (spec §3). Receives the full
/// `VALID_REQUEST` message, not just its sender, so a user predicate can
/// inspect the request payload.
pub type ValidationFn = Arc<dyn Fn(&Message) -> bool + Send + Sync>;

/// `state_update_fn: () -> byte sequence` (spec §3). Takes no arguments —
/// a closure that needs the agent's received traffic or current state
/// captures whatever shared handle it needs at construction time (mirrors
/// the reference implementation's zero-argument `stateUpdateFunc`, which
/// closes over the agent's own fields from the outside).
pub type StateUpdateFn = Arc<dyn Fn() -> Bytes + Send + Sync>;

/// `begin_main_phase: Fn(ModelPhaseHandle)` (spec §3). A single optional
/// callback, not a fan-out `Event` — only one piece of user logic drives a
/// model agent's main-phase behavior at a time. Synchronous by design: the
/// callback only queues sends and sets the ended flag on `ModelPhaseHandle`,
/// it never awaits anything itself (mirrors the re-entrancy constraint spec
/// §5 places on `partner_search`) — the runtime drains the queue, performing
/// the actual sends, once the callback returns.
pub type BeginMainPhaseFn = Arc<dyn Fn(ModelPhaseHandle) + Send + Sync>;

/// `reply_fn: Message -> Option<(kind, data)>` (spec §4.3's "agents exchange
/// user-level messages" made concrete): given an inbound non-control
/// message, optionally produce a reply to send back to its sender. Runs from
/// `handle_message`, so a reply can itself trigger a further reply at the
/// other end, all within the same synchronous-mode send — this is what lets
/// a request/response exchange complete within a single main phase.
pub type ReplyFn = Arc<dyn Fn(&Message) -> Option<(i32, Bytes)> + Send + Sync>;

enum QueuedSend {
    Direct { recipient: Identifier, kind: i32, data: Bytes },
    BroadcastToPartners { kind: i32, data: Bytes },
}

/// Handed to a `begin_main_phase` callback so user logic can queue sends and
/// signal that it is done with the main phase on its own schedule, rather
/// than the runtime guessing when a single synchronous callback invocation
/// has finished emitting whatever messages it wants to send this turn.
#[derive(Clone)]
pub struct ModelPhaseHandle {
    id: Identifier,
    valid_partners: Vec<Identifier>,
    ended: Arc<AtomicBool>,
    outbox: Arc<Mutex<Vec<QueuedSend>>>,
}

impl ModelPhaseHandle {
    #[must_use]
    pub fn id(&self) -> Identifier {
        self.id
    }

    #[must_use]
    pub fn valid_partners(&self) -> &[Identifier] {
        &self.valid_partners
    }

    /// Queues a main-phase message addressed to `recipient`. Sent, mirrored
    /// to observers, and subsumption-resolved once the callback returns.
    pub fn send(&self, kind: i32, data: Bytes, recipient: Identifier) {
        self.outbox
            .lock()
            .expect("model phase outbox mutex poisoned")
            .push(QueuedSend::Direct { recipient, kind, data });
    }

    /// Queues the same main-phase message addressed to every valid partner.
    pub fn broadcast_to_partners(&self, kind: i32, data: Bytes) {
        self.outbox
            .lock()
            .expect("model phase outbox mutex poisoned")
            .push(QueuedSend::BroadcastToPartners { kind, data });
    }

    pub fn end_main_phase(&self) {
        self.ended.store(true, Ordering::SeqCst);
    }
}

/// A model agent: the thing actually being simulated. `validation_predicate`
/// and `state_update_fn` are supplied by the caller as plugged-in closures
/// (spec §9's callback-table design note) rather than by subclassing.
pub struct ModelAgent {
    id: Identifier,
    state: Mutex<Bytes>,
    inbox: Mutex<Vec<Message>>,
    valid_partners: Mutex<Vec<Identifier>>,

    validation_predicate: ValidationFn,
    validation_request_payload: Bytes,
    state_update_fn: StateUpdateFn,
    begin_main_phase: Option<BeginMainPhaseFn>,
    reply_fn: Option<ReplyFn>,

    expected_requests: AtomicU32,
    received_requests: AtomicU32,
    expected_responses: AtomicU32,
    received_responses: AtomicU32,

    is_subsumed: AtomicBool,
    subsumed_by: Mutex<Option<Identifier>>,

    on_handle_message: Mutex<Event<Message>>,
}

impl ModelAgent {
    #[must_use]
    pub fn new(validation_predicate: ValidationFn, state_update_fn: StateUpdateFn) -> Self {
        Self {
            id: Identifier::generate(),
            state: Mutex::new(Bytes::new()),
            inbox: Mutex::new(Vec::new()),
            valid_partners: Mutex::new(Vec::new()),
            validation_predicate,
            validation_request_payload: Bytes::new(),
            state_update_fn,
            begin_main_phase: None,
            reply_fn: None,
            expected_requests: AtomicU32::new(0),
            received_requests: AtomicU32::new(0),
            expected_responses: AtomicU32::new(0),
            received_responses: AtomicU32::new(0),
            is_subsumed: AtomicBool::new(false),
            subsumed_by: Mutex::new(None),
            on_handle_message: Mutex::new(Event::new()),
        }
    }

    #[must_use]
    pub fn with_validation_request_payload(mut self, payload: Bytes) -> Self {
        self.validation_request_payload = payload;
        self
    }

    #[must_use]
    pub fn with_begin_main_phase(mut self, callback: BeginMainPhaseFn) -> Self {
        self.begin_main_phase = Some(callback);
        self
    }

    /// Registers a subscriber invoked, in order, on every received message —
    /// the one `Event`-shaped seam this kind exposes (spec §9).
    pub fn subscribe_on_handle_message<F>(&self, subscriber: F)
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.on_handle_message
            .lock()
            .expect("on_handle_message mutex poisoned")
            .subscribe(subscriber);
    }

    #[must_use]
    pub fn state(&self) -> Bytes {
        self.state.lock().expect("model state mutex poisoned").clone()
    }

    /// Overwrites `state` directly, bypassing `state_update_fn` entirely.
    /// Used only by the `rollback-alpha` feature to replay a prior
    /// history-ring snapshot — never called from the core four-phase loop.
    #[cfg(feature = "rollback-alpha")]
    pub fn restore_state(&self, state: Bytes) {
        *self.state.lock().expect("model state mutex poisoned") = state;
    }

    #[must_use]
    pub fn valid_partners(&self) -> Vec<Identifier> {
        self.valid_partners.lock().expect("valid partners mutex poisoned").clone()
    }

    /// Appends partner ids a meta-agent's `partner_search` closure resolved
    /// internally for this (subsumed) model, bypassing the message
    /// substrate entirely since both ends are under the same meta-agent.
    pub fn add_valid_partners(&self, partners: &[Identifier]) {
        self.valid_partners
            .lock()
            .expect("valid partners mutex poisoned")
            .extend_from_slice(partners);
    }

    #[must_use]
    pub fn is_subsumed(&self) -> bool {
        self.is_subsumed.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn subsumed_by(&self) -> Option<Identifier> {
        *self.subsumed_by.lock().expect("subsumed_by mutex poisoned")
    }

    /// Invoked by a `MetaAgent` when it subsumes this model agent.
    pub fn mark_subsumed(&self, subsumer: Identifier) {
        self.is_subsumed.store(true, Ordering::SeqCst);
        *self.subsumed_by.lock().expect("subsumed_by mutex poisoned") = Some(subsumer);
    }

    /// Invoked at cleanup when this model agent's subsumer dissolves.
    pub fn mark_unsubsumed(&self) {
        self.is_subsumed.store(false, Ordering::SeqCst);
        *self.subsumed_by.lock().expect("subsumed_by mutex poisoned") = None;
    }

    fn create_validation_request(&self) -> Message {
        self.create_message(None, message::VALID_REQUEST, self.validation_request_payload.clone())
    }

    fn create_validation_response(&self, recipient: Identifier, is_valid: bool) -> Message {
        self.create_message(Some(recipient), message::VALID, Message::valid_bytes(is_valid))
    }

    /// `EndMainCommunicationPhase`: broadcasts `COM_MAIN_END` to observers
    /// and, if subsumed, forwards the same signal one hop up to the direct
    /// subsumer — which may itself forward it one hop further, and so on,
    /// building the full chain purely out of single-hop direct sends.
    async fn end_main_phase(&self, bus: &Bus) {
        let end = self.create_message(None, message::COM_MAIN_END, Bytes::new());
        bus.notify_observers(&end);
        if let Some(subsumer) = self.subsumed_by() {
            bus.send_direct_silently(&end, subsumer).await;
        }
    }

    /// `checkCommunicationPartnerSearchEnd`: both counters must reach their
    /// exact expected count — model-level completion applies no bandwidth-
    /// tolerance slack of its own (spec §4.3; slack is a meta-agent-only
    /// concern, see `agent::meta`). Exposed for tests; the runtime checks
    /// this after every `VALID`/`VALID_REQUEST` arrival.
    #[must_use]
    pub fn partner_search_settled(&self) -> bool {
        self.received_requests.load(Ordering::SeqCst) >= self.expected_requests.load(Ordering::SeqCst)
            && self.received_responses.load(Ordering::SeqCst) >= self.expected_responses.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SimulationAgent for ModelAgent {
    fn id(&self) -> Identifier {
        self.id
    }

    /// `setupCommunicationPartnerSearch`: recompute the expected counters
    /// against the current external-peer set and reset this turn's tallies.
    async fn setup_partner_search(&self, bus: &Bus) {
        self.received_requests.store(0, Ordering::SeqCst);
        self.received_responses.store(0, Ordering::SeqCst);
        self.valid_partners.lock().expect("valid partners mutex poisoned").clear();

        if self.is_subsumed() {
            // A subsumed model takes no active part — its subsumer counts
            // external peers on its behalf.
            self.expected_requests.store(0, Ordering::SeqCst);
            self.expected_responses.store(0, Ordering::SeqCst);
            return;
        }
        let external = bus.registry().model_ids().len().saturating_sub(1) as u32;
        self.expected_requests.store(external, Ordering::SeqCst);
        self.expected_responses.store(external, Ordering::SeqCst);
    }

    /// `handleCommunicationPartnerSearch`: broadcast the validation request
    /// to every other model agent, silently (no observer mirroring — this
    /// is internal control traffic per spec §4.2).
    async fn handle_partner_search(&self, bus: &Bus) {
        if self.is_subsumed() {
            return;
        }
        let request = self.create_validation_request();
        let _ = bus.broadcast_silently(&request).await;
    }

    async fn setup_main(&self, _bus: &Bus) {}

    /// Runs the user-supplied `begin_main_phase` callback, if any, then
    /// drains whatever it queued onto the `ModelPhaseHandle` outbox, then
    /// emits `COM_MAIN_END` as soon as the callback (synchronously) calls
    /// `ModelPhaseHandle::end_main_phase`. A model with no callback signals
    /// complete immediately (spec §4.3).
    async fn handle_main(&self, bus: &Bus) {
        let ended = Arc::new(AtomicBool::new(self.begin_main_phase.is_none()));
        let outbox = Arc::new(Mutex::new(Vec::new()));
        if let Some(callback) = &self.begin_main_phase {
            let handle = ModelPhaseHandle {
                id: self.id,
                valid_partners: self.valid_partners(),
                ended: ended.clone(),
                outbox: outbox.clone(),
            };
            callback(handle);
        }

        let queued = std::mem::take(&mut *outbox.lock().expect("model phase outbox mutex poisoned"));
        for send in queued {
            match send {
                QueuedSend::Direct { recipient, kind, data } => {
                    let msg = self.create_message(Some(recipient), kind, data);
                    bus.send(&msg, recipient).await;
                }
                QueuedSend::BroadcastToPartners { kind, data } => {
                    let msg = self.create_message(None, kind, data);
                    let partners = self.valid_partners();
                    bus.broadcast_to(&msg, &partners).await;
                }
            }
        }

        if ended.load(Ordering::SeqCst) {
            self.end_main_phase(bus).await;
        }
    }

    async fn setup_state_update(&self, _bus: &Bus) {}

    /// `handleStateUpdatePhase`: subsumed agents wait for `META_UPDATE_MODEL`
    /// instead; non-subsumed agents compute and publish their next state.
    async fn handle_state_update(&self, bus: &Bus) {
        if self.is_subsumed() {
            return;
        }
        let next = (self.state_update_fn)();
        *self.state.lock().expect("model state mutex poisoned") = next.clone();
        let update = self.create_message(None, message::COM_STATE_UPDATE, next);
        bus.notify_observers(&update);
    }

    async fn cleanup(&self, _bus: &Bus) {
        self.inbox.lock().expect("inbox mutex poisoned").clear();
    }

    async fn handle_message(&self, bus: &Bus, msg: Message) {
        match msg.kind() {
            message::VALID_REQUEST => {
                self.received_requests.fetch_add(1, Ordering::SeqCst);
                if self.is_subsumed() {
                    // Forwarded up to the subsumer instead of answered here
                    // (the subsumer is reached because the bus already
                    // resolved the recipient through the subsumption chain
                    // before this handler ran — nothing further to do).
                    return;
                }
                trace!(agent = %self.id, from = %msg.sender(), "validating partner request");
                let is_valid = (self.validation_predicate)(&msg);
                let response = self.create_validation_response(msg.sender(), is_valid);
                bus.send_silently(&response, msg.sender()).await;
            }
            message::VALID => {
                self.received_responses.fetch_add(1, Ordering::SeqCst);
                if msg.valid_payload() {
                    self.valid_partners.lock().expect("valid partners mutex poisoned").push(msg.sender());
                }
            }
            message::META_UPDATE_MODEL => {
                *self.state.lock().expect("model state mutex poisoned") = msg.data().clone();
            }
            _ => {
                if self.is_subsumed() {
                    // Non-control traffic on a subsumed model is also
                    // rerouted upward for statistics purposes; the bus's
                    // subsumption resolution already delivered it to the
                    // subsumer, so there is nothing further for this
                    // agent to record locally.
                    return;
                }
                self.inbox.lock().expect("inbox mutex poisoned").push(msg.clone());
                self.on_handle_message
                    .lock()
                    .expect("on_handle_message mutex poisoned")
                    .invoke(&msg);
            }
        }
    }

    fn observe(&self, _msg: Message) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accept_all() -> ModelAgent {
        ModelAgent::new(Arc::new(|_| true), Arc::new(|| Bytes::new()))
    }

    #[tokio::test]
    async fn valid_request_on_unsubsumed_model_gets_a_reply() {
        let bus = Bus::new(bus::BusConfig {
            synchronous: true,
            bandwidth: 10,
        });
        let agent = Arc::new(accept_all());
        let other = Arc::new(accept_all());
        bus.registry().register_model(agent.id(), agent.clone());
        bus.registry().register_model(other.id(), other.clone());

        let request = Message::new(other.id(), Some(agent.id()), message::VALID_REQUEST, Bytes::new());
        agent.handle_message(&bus, request).await;

        assert_eq!(agent.received_requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn valid_reply_with_true_payload_becomes_a_valid_partner() {
        let bus = Bus::new(bus::BusConfig {
            synchronous: true,
            bandwidth: 10,
        });
        let agent = accept_all();
        let other = Identifier::generate();
        let reply = Message::new(other, Some(agent.id()), message::VALID, Message::valid_bytes(true));
        agent.handle_message(&bus, reply).await;
        assert_eq!(agent.valid_partners(), vec![other]);
    }

    #[tokio::test]
    async fn subsumed_model_does_nothing_on_its_own_state_update() {
        let bus = Bus::new(bus::BusConfig {
            synchronous: true,
            bandwidth: 10,
        });
        let agent = ModelAgent::new(Arc::new(|_| true), Arc::new(|| Bytes::from_static(b"computed")));
        agent.mark_subsumed(Identifier::generate());
        agent.handle_state_update(&bus).await;
        assert_eq!(agent.state(), Bytes::new());
    }

    #[tokio::test]
    async fn meta_update_model_sets_state_even_while_subsumed() {
        let bus = Bus::new(bus::BusConfig {
            synchronous: true,
            bandwidth: 10,
        });
        let agent = accept_all();
        agent.mark_subsumed(Identifier::generate());
        let update = Message::new(
            Identifier::generate(),
            Some(agent.id()),
            message::META_UPDATE_MODEL,
            Bytes::from_static(b"new"),
        );
        agent.handle_message(&bus, update).await;
        assert_eq!(agent.state(), Bytes::from_static(b"new"));
    }

    #[test]
    fn partner_search_settled_requires_the_exact_expected_count() {
        let agent = accept_all();
        agent.expected_requests.store(10, Ordering::SeqCst);
        agent.expected_responses.store(10, Ordering::SeqCst);
        assert!(!agent.partner_search_settled());

        agent.received_requests.store(9, Ordering::SeqCst);
        agent.received_responses.store(10, Ordering::SeqCst);
        assert!(!agent.partner_search_settled());

        agent.received_requests.store(10, Ordering::SeqCst);
        assert!(agent.partner_search_settled());
    }
}

//! The trait every participant in a `Server`-scheduled run implements.

use async_trait::async_trait;
use bytes::Bytes;

use crate::bus::Bus;
use crate::identifier::Identifier;
use crate::message::Message;

/// A participant in the four-turn iteration loop. Each of the first three
/// turns runs as two passes over every registered agent — a `setup_*` pass,
/// then a `handle_*` pass — mirroring the scheduler's own two-pass dispatch
/// per turn: every agent's outgoing traffic for the pass is sent before any
/// agent reacts to what it received. Turn 3 (cleanup) is a single pass.
///
/// `ModelAgent`, `MetaAgent`, and `ObserverAgent` all implement this trait,
/// so the `Server` drives all three kinds through the same eight methods
/// without ever matching on which kind it's holding.
///
/// Every method defaults to a no-op so a kind with nothing to do in a given
/// pass doesn't need to override it — `ObserverAgent`, for instance, never
/// initiates partner search.
#[async_trait]
pub trait SimulationAgent: Send + Sync {
    fn id(&self) -> Identifier;

    /// Turn 0, pass 1: broadcast or send validation requests to candidate
    /// partners.
    async fn setup_partner_search(&self, _bus: &Bus) {}

    /// Turn 0, pass 2: act on the `VALID`/`VALID_REQUEST` traffic this
    /// agent has received so far.
    async fn handle_partner_search(&self, _bus: &Bus) {}

    /// Turn 1, pass 1: send this turn's substantive messages.
    async fn setup_main(&self, _bus: &Bus) {}

    /// Turn 1, pass 2: react to main-phase traffic, and signal
    /// `COM_MAIN_END` once done.
    async fn handle_main(&self, _bus: &Bus) {}

    /// Turn 2, pass 1: compute (but do not yet publish) this agent's next
    /// state from the traffic observed during the main phase.
    async fn setup_state_update(&self, _bus: &Bus) {}

    /// Turn 2, pass 2: publish the computed state and run any
    /// self-verification (meta-agents check their `MetaCondition` here).
    async fn handle_state_update(&self, _bus: &Bus) {}

    /// Turn 3: post-update bookkeeping — meta-agent dissolution follow-up,
    /// per-turn statistics resets.
    async fn cleanup(&self, _bus: &Bus) {}

    /// Receives a message addressed to this agent (after subsumption
    /// rerouting has already been applied by the bus). Takes `bus` because
    /// several reactions (a `VALID` reply, a forwarded `VALID_REQUEST`) must
    /// be sent from inside the handler itself to preserve synchronous-mode
    /// FIFO ordering, rather than being queued for a caller to drain later.
    async fn handle_message(&self, _bus: &Bus, _msg: Message) {}

    /// Builds a message from this agent with `self.id()` as sender. A thin
    /// convenience default — kept as a trait method rather than a free
    /// function so agent implementations can override it to stamp
    /// additional bookkeeping (`ModelAgent` does not; provided for parity
    /// with the reference implementation's per-agent `CreateMessage`).
    fn create_message(&self, recipient: Option<Identifier>, kind: i32, data: Bytes) -> Message {
        Message::new(self.id(), recipient, kind, data)
    }

    /// Records `msg` for an agent that maintains its own view of traffic
    /// (`MetaAgent`, `ObserverAgent`). Invoked by the registry on every
    /// mirrored delivery, independent of `handle_message`. A no-op for
    /// `ModelAgent`, which keeps no such secondary record.
    fn observe(&self, _msg: Message) {}
}

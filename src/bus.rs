//! The message-delivery substrate: synchronous and bandwidth-limited
//! asynchronous sends, observer mirroring, and the drop-tolerant completion
//! threshold meta-agents use under lossy delivery.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::trace;

use crate::agent::AgentRegistry;
use crate::error::PlatformResult;
use crate::identifier::Identifier;
use crate::message::Message;

/// The value `⌊DROP_SLACK_NUMERATOR / bandwidth⌋ · expected` is subtracted
/// from `expected` to obtain the drop-tolerant completion threshold (spec
/// §9). Named per the source's own empirical-constant callout rather than
/// inlined.
pub const DROP_SLACK_NUMERATOR: u32 = 10;

/// Computes the minimum arrival count a meta-agent treats as "partner search
/// settled" under lossy asynchronous delivery.
///
/// Mirrors the reference implementation's literal evaluation order: integer
/// division of `DROP_SLACK_NUMERATOR / bandwidth` happens *before* the
/// multiply by `expected`, not a floating-point floor of the whole
/// expression. At `bandwidth > DROP_SLACK_NUMERATOR` the slack collapses to
/// zero; at `bandwidth == 1` the slack meets or exceeds `expected`, so any
/// non-empty arrival settles the threshold (spec §8 boundary property).
#[must_use]
pub fn drop_tolerant_threshold(expected: u32, bandwidth: u32) -> u32 {
    if bandwidth == 0 {
        return 0;
    }
    let slack = expected.saturating_mul(DROP_SLACK_NUMERATOR / bandwidth);
    expected.saturating_sub(slack)
}

/// Process-wide delivery mode and per-agent bandwidth cap.
#[derive(Debug, Clone, Copy)]
pub struct BusConfig {
    pub synchronous: bool,
    pub bandwidth: u32,
}

/// The shared message substrate every agent sends through. Held behind an
/// `Arc` by `Server` and by every agent — agents never hold a reference back
/// to `Server` itself, only to this and to the [`AgentRegistry`] it wraps
/// (spec §9's "lookup through the registry, not back-pointers" design note).
pub struct Bus {
    config: Mutex<BusConfig>,
    registry: AgentRegistry,
    environment: DashMap<String, bytes::Bytes>,
    inbound_this_turn: DashMap<Identifier, u32>,
    pending: Mutex<Vec<JoinHandle<()>>>,
    /// Set once, at construction, via `Arc::new_cyclic` — lets a dispatch
    /// spawned onto `tokio::task` hand the agent it wakes a live `Arc<Bus>`
    /// to reply through, without the agent itself ever holding anything
    /// but this weak back-reference.
    self_ref: Weak<Bus>,
}

impl Bus {
    #[must_use]
    pub fn new(config: BusConfig) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            config: Mutex::new(config),
            registry: AgentRegistry::new(),
            environment: DashMap::new(),
            inbound_this_turn: DashMap::new(),
            pending: Mutex::new(Vec::new()),
            self_ref: weak.clone(),
        })
    }

    /// Upgrades this bus's own weak self-reference to an owned `Arc`, so an
    /// agent handler can hold a live handle to send through without ever
    /// storing a strong reference back to the bus itself.
    pub(crate) fn handle(&self) -> Arc<Bus> {
        self.self_ref.upgrade().expect("bus dropped while still in use")
    }

    #[must_use]
    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    #[must_use]
    pub fn environment(&self) -> &DashMap<String, bytes::Bytes> {
        &self.environment
    }

    #[must_use]
    pub fn config(&self) -> BusConfig {
        *self.config.lock().expect("bus config mutex poisoned")
    }

    pub fn set_synchronous(&self, synchronous: bool) {
        self.config.lock().expect("bus config mutex poisoned").synchronous = synchronous;
    }

    /// The bandwidth value partner-search threshold checks should use:
    /// effectively unlimited in synchronous mode, where every send is
    /// delivered, so [`drop_tolerant_threshold`] collapses to the exact
    /// expected count instead of tolerating drops that cannot happen.
    #[must_use]
    pub fn effective_bandwidth(&self) -> u32 {
        let config = self.config();
        if config.synchronous {
            u32::MAX
        } else {
            config.bandwidth
        }
    }

    /// Resets per-turn bandwidth accounting. Called by the Server at the
    /// start of every turn.
    pub fn reset_bandwidth(&self) {
        self.inbound_this_turn.clear();
    }

    /// `true` if this delivery was admitted (synchronous mode always admits;
    /// asynchronous mode admits while the recipient's per-turn inbound count
    /// stays within `bandwidth`).
    fn admit(&self, recipient: Identifier) -> bool {
        let config = self.config();
        if config.synchronous {
            return true;
        }
        let mut count = self.inbound_this_turn.entry(recipient).or_insert(0);
        *count += 1;
        *count <= config.bandwidth
    }

    /// Delivers `msg` to its recipient's `handle_message`, recording it into
    /// the recipient's observers' statistics first if `mirror` is set, and
    /// rerouting silently to a subsumer if the recipient has been subsumed.
    /// Synchronous mode delivers inline and awaits completion before
    /// returning. Asynchronous mode spawns a task and tracks it for later
    /// draining, subject to the bandwidth-drop check.
    async fn deliver(&self, msg: Message, mirror: bool) {
        let Some(original_recipient) = msg.recipient() else {
            return;
        };
        // `msg` keeps its original (sender, recipient) throughout — a
        // subsumed recipient's own id must still be visible to whichever
        // meta-agent ultimately handles it, so it can tell which of its
        // subsumed children a forwarded request was actually meant for.
        // Only the *dispatch target* (who physically receives the call) is
        // resolved through the subsumption chain.
        if mirror {
            self.registry.mirror_to_observers(msg.clone());
        }
        let dispatch_target = self.registry.resolve_subsumption(original_recipient);
        if !self.admit(dispatch_target) {
            trace!(recipient = %dispatch_target, "message dropped: bandwidth exceeded");
            return;
        }
        let registry = self.registry.clone();
        let bus = self.handle();
        if self.config().synchronous {
            registry.dispatch_to(&bus, dispatch_target, msg).await;
            return;
        }
        let handle = tokio::spawn(async move {
            registry.dispatch_to(&bus, dispatch_target, msg).await;
        });
        self.pending.lock().expect("bus pending queue poisoned").push(handle);
    }

    /// Sends `msg` to `recipient` only, with observer mirroring.
    pub async fn send(&self, msg: &Message, recipient: Identifier) {
        self.deliver(msg.with_recipient(recipient), true).await;
    }

    /// Sends `msg` to `recipient` only, with no observer mirroring — used
    /// for internal control traffic.
    pub async fn send_silently(&self, msg: &Message, recipient: Identifier) {
        self.deliver(msg.with_recipient(recipient), false).await;
    }

    /// Delivers `msg` straight to `recipient`, bypassing subsumption
    /// resolution entirely — for exactly one hop of a parent/child
    /// relationship the sender already knows explicitly: a meta-agent
    /// addressing one of its own subsumed children (`META_UPDATE_MODEL`),
    /// or a subsumed agent forwarding a single-hop signal
    /// (`COM_MAIN_END`) to its own direct subsumer. Resolving the
    /// recipient through the subsumption chain, as every other send does,
    /// would either bounce the message straight back to the sender itself
    /// or skip past the exact hop being modeled. Always delivered inline
    /// and never bandwidth-dropped, since it is bookkeeping internal to the
    /// subsumption relationship rather than ordinary inter-agent traffic.
    pub async fn send_direct(&self, msg: &Message, recipient: Identifier) {
        self.send_direct_impl(msg.with_recipient(recipient), recipient, true).await;
    }

    /// As [`Bus::send_direct`], with no observer mirroring — used when the
    /// caller has already mirrored the same logical event itself (e.g. a
    /// model's `COM_MAIN_END` is mirrored once at the point of emission;
    /// the direct hops that carry it up the subsumption chain must not
    /// re-mirror it at every level).
    pub async fn send_direct_silently(&self, msg: &Message, recipient: Identifier) {
        self.send_direct_impl(msg.with_recipient(recipient), recipient, false).await;
    }

    async fn send_direct_impl(&self, msg: Message, recipient: Identifier, mirror: bool) {
        if mirror {
            self.registry.mirror_to_observers(msg.clone());
        }
        let registry = self.registry.clone();
        let bus = self.handle();
        registry.dispatch_to(&bus, recipient, msg).await;
    }

    /// Broadcasts `msg` to every registered model agent except the sender,
    /// with observer mirroring.
    ///
    /// # Errors
    /// Returns [`PlatformError::ContractViolation`] if `msg` somehow has no
    /// sender resolvable in the registry — this should never happen for a
    /// message built via an agent's `create_message`.
    pub async fn broadcast(&self, msg: &Message) -> PlatformResult<()> {
        self.broadcast_impl(msg, true).await
    }

    /// As [`Bus::broadcast`], with no observer mirroring.
    pub async fn broadcast_silently(&self, msg: &Message) -> PlatformResult<()> {
        self.broadcast_impl(msg, false).await
    }

    async fn broadcast_impl(&self, msg: &Message, mirror: bool) -> PlatformResult<()> {
        let sender = msg.sender();
        for recipient in self.registry.model_ids() {
            if recipient == sender {
                continue;
            }
            self.deliver(msg.with_recipient(recipient), mirror).await;
        }
        Ok(())
    }

    /// Broadcasts `msg` to exactly the agents in `recipients`, in list
    /// order, with observer mirroring.
    pub async fn broadcast_to(&self, msg: &Message, recipients: &[Identifier]) {
        self.broadcast_to_impl(msg, recipients, true).await;
    }

    /// As [`Bus::broadcast_to`], with no observer mirroring.
    pub async fn broadcast_silently_to(&self, msg: &Message, recipients: &[Identifier]) {
        self.broadcast_to_impl(msg, recipients, false).await;
    }

    async fn broadcast_to_impl(&self, msg: &Message, recipients: &[Identifier], mirror: bool) {
        for recipient in recipients {
            self.deliver(msg.with_recipient(*recipient), mirror).await;
        }
    }

    /// Records `msg` into every observer and meta-agent's own statistics,
    /// unconditionally — used for `COM_STATE_UPDATE`/`META_STATE_UPDATE`/
    /// `COM_MAIN_END` emissions, which are watched rather than addressed to
    /// a single recipient's `handle_message`.
    pub fn notify_observers(&self, msg: &Message) {
        self.registry.mirror_to_observers(msg.clone());
    }

    /// Drains every in-flight asynchronous delivery task, including any
    /// further deliveries those tasks themselves triggered, until none
    /// remain outstanding. A no-op in synchronous mode, where delivery
    /// already ran to completion inline.
    pub async fn drain(&self) {
        loop {
            let batch: Vec<JoinHandle<()>> = {
                let mut pending = self.pending.lock().expect("bus pending queue poisoned");
                std::mem::take(&mut *pending)
            };
            if batch.is_empty() {
                return;
            }
            for handle in batch {
                let _ = handle.await;
            }
        }
    }

    #[must_use]
    pub fn environment_get(&self, key: &str) -> Option<bytes::Bytes> {
        self.environment.get(key).map(|v| v.clone())
    }

    pub fn environment_set(&self, key: impl Into<String>, value: bytes::Bytes) {
        self.environment.insert(key.into(), value);
    }

    #[must_use]
    pub fn environment_snapshot(&self) -> HashMap<String, bytes::Bytes> {
        self.environment
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn bandwidth_one_slack_meets_or_exceeds_expected() {
        for expected in [0u32, 1, 5, 200] {
            assert_eq!(drop_tolerant_threshold(expected, 1), 0);
        }
    }

    #[test]
    fn slack_collapses_to_zero_above_the_slack_numerator() {
        assert_eq!(drop_tolerant_threshold(100, DROP_SLACK_NUMERATOR + 1), 100);
    }

    #[test]
    fn zero_bandwidth_does_not_panic() {
        assert_eq!(drop_tolerant_threshold(10, 0), 0);
    }

    proptest! {
        /// Bandwidth 1 must not deadlock (spec §8 boundary property): the
        /// slack at bandwidth 1 always meets or exceeds `expected`, so the
        /// threshold collapses to zero and any non-empty arrival settles it.
        #[test]
        fn bandwidth_one_always_yields_a_zero_threshold(expected in 0u32..1_000_000) {
            prop_assert_eq!(drop_tolerant_threshold(expected, 1), 0);
        }

        /// The threshold never exceeds `expected` regardless of bandwidth,
        /// and a zero bandwidth never panics on the division inside.
        #[test]
        fn threshold_never_exceeds_expected(expected in 0u32..1_000_000, bandwidth in 0u32..64) {
            prop_assert!(drop_tolerant_threshold(expected, bandwidth) <= expected);
        }

        /// Above the slack numerator, bandwidth buys no drop tolerance: the
        /// full expected count is required.
        #[test]
        fn above_slack_numerator_requires_the_full_expected_count(
            expected in 0u32..1_000_000,
            bandwidth in (DROP_SLACK_NUMERATOR + 1)..1_000,
        ) {
            prop_assert_eq!(drop_tolerant_threshold(expected, bandwidth), expected);
        }
    }
}

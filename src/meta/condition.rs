//! A meta-agent's self-verification predicate, closed over an immutable base
//! state snapshot taken at subsumption time.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;

use crate::identifier::Identifier;
use crate::meta::state::MetaState;
use crate::stats::MessageStatistics;

type VerifyFn = Arc<dyn Fn(&MessageStatistics, &MetaState, &HashMap<Identifier, Bytes>) -> bool + Send + Sync>;

/// `(MessageStatistics, MetaState, base_state) -> bool`, captured once at
/// subsumption and re-run every state-update phase. Failure (returning
/// `false`) triggers dissolution — it is not an error (spec §7).
///
/// `explain` takes `(&MessageStatistics, &MetaState) -> String` rather than a
/// reference to the owning `MetaAgent`, per spec §9's callback-table design
/// note — avoids the agent needing to hand a reference to itself to one of
/// its own fields.
pub struct MetaCondition {
    verify_fn: Option<VerifyFn>,
    base_state: HashMap<Identifier, Bytes>,
    explain_fn: Arc<dyn Fn(&MessageStatistics, &MetaState) -> String + Send + Sync>,
}

impl MetaCondition {
    #[must_use]
    pub fn new(verify_fn: Option<VerifyFn>, base_state: HashMap<Identifier, Bytes>) -> Self {
        Self {
            verify_fn,
            base_state,
            explain_fn: Arc::new(|_, _| "No explanation for MetaCondition provided.".to_string()),
        }
    }

    pub fn set_explain<F>(&mut self, explain: F)
    where
        F: Fn(&MessageStatistics, &MetaState) -> String + Send + Sync + 'static,
    {
        self.explain_fn = Arc::new(explain);
    }

    /// Returns `true` (never dissolves) when no verification predicate was
    /// supplied, matching the reference implementation.
    #[must_use]
    pub fn verify(&self, statistics: &MessageStatistics, current_state: &MetaState) -> bool {
        match &self.verify_fn {
            Some(verify_fn) => verify_fn(statistics, current_state, &self.base_state),
            None => true,
        }
    }

    #[must_use]
    pub fn explain(&self, statistics: &MessageStatistics, current_state: &MetaState) -> String {
        (self.explain_fn)(statistics, current_state)
    }

    #[must_use]
    pub fn base_state(&self) -> &HashMap<Identifier, Bytes> {
        &self.base_state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_returns_true_with_no_predicate() {
        let condition = MetaCondition::new(None, HashMap::new());
        let stats = MessageStatistics::new();
        let state = MetaState::default();
        assert!(condition.verify(&stats, &state));
    }

    #[test]
    fn verify_delegates_to_supplied_predicate() {
        let condition = MetaCondition::new(Some(Arc::new(|_, _, _| false)), HashMap::new());
        let stats = MessageStatistics::new();
        let state = MetaState::default();
        assert!(!condition.verify(&stats, &state));
    }

    #[test]
    fn default_explain_is_a_placeholder() {
        let condition = MetaCondition::new(None, HashMap::new());
        let stats = MessageStatistics::new();
        let state = MetaState::default();
        assert_eq!(
            condition.explain(&stats, &state),
            "No explanation for MetaCondition provided."
        );
    }
}

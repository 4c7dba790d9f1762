//! Alpha rollback: restores model-agent states and environment variables
//! from the bounded state-history ring. Feature-gated behind
//! `rollback-alpha` and contributes no invariant to the core contract
//! (spec §9, §1 Non-goals).
//!
//! Grounded on `Server.go`'s `RollbackState` (state/environment restoration,
//! ring truncation). The original's sandboxed `Resimulate` — a nested,
//! independent server re-run over a subset of agents — is not ported; its
//! own source carries an acknowledged gap ("reconstruct meta hierarchy?")
//! that would need independent design work disproportionate to its value
//! here (see DESIGN.md).

use crate::error::{PlatformError, PlatformResult};
use crate::server::Server;

impl Server {
    /// Restores every currently-registered model agent's state, and the
    /// environment map, to what they were `iterations_ago` iterations back,
    /// then truncates the history ring past the restored point so a repeated
    /// rollback can't resurrect states newer than the one just restored.
    ///
    /// Meta-agents and the subsumption hierarchy are **not** rolled back —
    /// this alpha feature only ever restores the flat model/environment
    /// layer the ring actually records.
    ///
    /// # Errors
    /// Returns [`PlatformError::ResourceExhausted`] if `iterations_ago`
    /// reaches further back than the ring currently holds.
    pub fn rollback(&self, iterations_ago: usize) -> PlatformResult<u64> {
        let mut history = self.history.lock().expect("history mutex poisoned");
        if iterations_ago >= history.len() {
            return Err(PlatformError::ResourceExhausted(format!(
                "rollback requested {iterations_ago} iterations back, but only {} are retained",
                history.len()
            )));
        }
        let target_index = history.len() - 1 - iterations_ago;
        let snapshot = history[target_index].clone();
        history.truncate(target_index + 1);
        drop(history);

        let registry = self.registry();
        for (id, state) in &snapshot.model_states {
            if let Some(model) = registry.model_handle(*id) {
                model.restore_state(state.clone());
            }
        }
        for (key, value) in &snapshot.environment {
            self.environment_set(key.clone(), value.clone());
        }

        tracing::info!(
            restored_iteration = snapshot.iteration,
            iterations_ago,
            "rolled back to prior state snapshot"
        );
        Ok(snapshot.iteration)
    }
}

//! Validated, environment/file-loadable server configuration.
//!
//! Mirrors `message_router::config::RouterConfig`'s shape (presets, builder,
//! JSON round trip, cross-field validation) re-keyed to this crate's actual
//! knobs. Per-class agent counts and factory closures are supplied directly
//! to [`crate::server::Server::new`], not here — closures aren't
//! serializable, so they never belong in a config struct meant to round-trip
//! through JSON.

use std::path::Path;
use std::time::Duration;

use nutype::nutype;
use serde::{Deserialize, Serialize};

use crate::error::{PlatformError, PlatformResult};

/// Number of iterations a run executes before stopping on its own.
#[nutype(
    validate(greater_or_equal = 1),
    derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display, TryFrom, Into)
)]
pub struct IterationCount(u32);

impl IterationCount {
    #[must_use]
    pub fn as_u32(&self) -> u32 {
        self.into_inner()
    }
}

/// Wall-clock ceiling for an entire run, in milliseconds.
#[nutype(
    validate(greater_or_equal = 1),
    derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display, TryFrom, Into)
)]
pub struct MaxDurationMs(u64);

impl MaxDurationMs {
    #[must_use]
    pub fn as_duration(&self) -> Duration {
        Duration::from_millis(self.into_inner())
    }
}

/// Per-agent, per-turn message delivery cap in asynchronous mode.
#[nutype(
    validate(greater_or_equal = 1),
    derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display, TryFrom, Into)
)]
pub struct AgentBandwidth(u32);

impl AgentBandwidth {
    #[must_use]
    pub fn as_u32(&self) -> u32 {
        self.into_inner()
    }
}

/// Length of the bounded state-history ring kept for the alpha rollback
/// feature.
#[nutype(
    validate(greater_or_equal = 1),
    derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display, TryFrom, Into)
)]
pub struct MaxMemoryDepth(usize);

impl MaxMemoryDepth {
    #[must_use]
    pub fn as_usize(&self) -> usize {
        self.into_inner()
    }
}

/// Fraction of iterations that open a sampled `tracing` span, `0.0..=1.0`.
#[nutype(
    validate(greater_or_equal = 0.0, less_or_equal = 1.0),
    derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Display, TryFrom, Into)
)]
pub struct TraceSamplingRatio(f64);

impl TraceSamplingRatio {
    #[must_use]
    pub fn as_f64(&self) -> f64 {
        self.into_inner()
    }
}

/// The complete set of serializable `Server` knobs. Per-class agent counts
/// and their factory closures are supplied separately at construction (see
/// `crate::server::Server::new`) since closures cannot round-trip through
/// JSON the way these can.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub iterations: IterationCount,
    pub max_duration_ms: MaxDurationMs,
    pub agent_bandwidth: AgentBandwidth,
    pub max_memory_depth: MaxMemoryDepth,
    pub internal_synchronous: bool,
    pub trace_sampling_ratio: TraceSamplingRatio,
    pub enable_detailed_logs: bool,
}

impl ServerConfig {
    /// Synchronous delivery, verbose tracing, a short ring — fast local
    /// iteration on a small agent population.
    ///
    /// # Panics
    /// Panics if any hardcoded value here is out of range for its domain
    /// type — a bug in this preset, not a user-facing failure mode.
    #[must_use]
    pub fn development() -> Self {
        Self {
            iterations: IterationCount::try_new(100).unwrap(),
            max_duration_ms: MaxDurationMs::try_new(60_000).unwrap(),
            agent_bandwidth: AgentBandwidth::try_new(1_000).unwrap(),
            max_memory_depth: MaxMemoryDepth::try_new(16).unwrap(),
            internal_synchronous: true,
            trace_sampling_ratio: TraceSamplingRatio::try_new(1.0).unwrap(),
            enable_detailed_logs: true,
        }
    }

    /// Minimal resource use, synchronous delivery, no sampling — deterministic
    /// and quick for automated tests.
    ///
    /// # Panics
    /// Panics if any hardcoded value here is out of range for its domain type.
    #[must_use]
    pub fn testing() -> Self {
        Self {
            iterations: IterationCount::try_new(1).unwrap(),
            max_duration_ms: MaxDurationMs::try_new(5_000).unwrap(),
            agent_bandwidth: AgentBandwidth::try_new(10).unwrap(),
            max_memory_depth: MaxMemoryDepth::try_new(4).unwrap(),
            internal_synchronous: true,
            trace_sampling_ratio: TraceSamplingRatio::try_new(0.0).unwrap(),
            enable_detailed_logs: false,
        }
    }

    /// Asynchronous, bandwidth-limited delivery with sampled tracing — a
    /// large long-running population.
    ///
    /// # Panics
    /// Panics if any hardcoded value here is out of range for its domain type.
    #[must_use]
    pub fn production() -> Self {
        Self {
            iterations: IterationCount::try_new(10_000).unwrap(),
            max_duration_ms: MaxDurationMs::try_new(3_600_000).unwrap(),
            agent_bandwidth: AgentBandwidth::try_new(50).unwrap(),
            max_memory_depth: MaxMemoryDepth::try_new(256).unwrap(),
            internal_synchronous: false,
            trace_sampling_ratio: TraceSamplingRatio::try_new(0.01).unwrap(),
            enable_detailed_logs: false,
        }
    }

    #[must_use]
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::new()
    }

    /// Cross-field checks beyond what each newtype already validates on its
    /// own.
    ///
    /// # Errors
    /// Returns [`PlatformError::InvalidConfiguration`] if asynchronous
    /// delivery is selected with a bandwidth too low to ever settle partner
    /// search (see `bus::drop_tolerant_threshold`'s boundary property:
    /// bandwidth 1 always settles, so this only rejects a bandwidth of 0,
    /// which the newtype itself already rejects — retained here as the seam
    /// for future cross-field rules).
    pub fn validate(&self) -> PlatformResult<()> {
        if !self.internal_synchronous && self.agent_bandwidth.as_u32() < 1 {
            return Err(PlatformError::InvalidConfiguration {
                field: "agent_bandwidth".to_string(),
                reason: "must be at least 1 under asynchronous delivery".to_string(),
            });
        }
        Ok(())
    }

    /// # Errors
    /// Returns [`PlatformError::Serialization`] or [`PlatformError::Io`].
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> PlatformResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// # Errors
    /// Returns [`PlatformError::Io`], [`PlatformError::Serialization`], or a
    /// validation failure from [`ServerConfig::validate`].
    pub fn load_from_file(path: impl AsRef<Path>) -> PlatformResult<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::development()
    }
}

/// Builder for a custom [`ServerConfig`], starting from [`ServerConfig::development`].
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: ServerConfig::development(),
        }
    }

    #[must_use]
    pub fn iterations(mut self, iterations: IterationCount) -> Self {
        self.config.iterations = iterations;
        self
    }

    #[must_use]
    pub fn max_duration_ms(mut self, max_duration_ms: MaxDurationMs) -> Self {
        self.config.max_duration_ms = max_duration_ms;
        self
    }

    #[must_use]
    pub fn agent_bandwidth(mut self, agent_bandwidth: AgentBandwidth) -> Self {
        self.config.agent_bandwidth = agent_bandwidth;
        self
    }

    #[must_use]
    pub fn max_memory_depth(mut self, max_memory_depth: MaxMemoryDepth) -> Self {
        self.config.max_memory_depth = max_memory_depth;
        self
    }

    #[must_use]
    pub fn internal_synchronous(mut self, synchronous: bool) -> Self {
        self.config.internal_synchronous = synchronous;
        self
    }

    #[must_use]
    pub fn trace_sampling_ratio(mut self, ratio: TraceSamplingRatio) -> Self {
        self.config.trace_sampling_ratio = ratio;
        self
    }

    #[must_use]
    pub fn enable_detailed_logs(mut self, enable: bool) -> Self {
        self.config.enable_detailed_logs = enable;
        self
    }

    /// # Errors
    /// Returns whatever [`ServerConfig::validate`] returns.
    pub fn build(self) -> PlatformResult<ServerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ServerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn development_testing_and_production_presets_all_validate() {
        assert!(ServerConfig::development().validate().is_ok());
        assert!(ServerConfig::testing().validate().is_ok());
        assert!(ServerConfig::production().validate().is_ok());
    }

    #[test]
    fn builder_overrides_individual_fields() {
        let config = ServerConfig::builder()
            .iterations(IterationCount::try_new(5).unwrap())
            .internal_synchronous(false)
            .agent_bandwidth(AgentBandwidth::try_new(20).unwrap())
            .build()
            .unwrap();

        assert_eq!(config.iterations.as_u32(), 5);
        assert!(!config.internal_synchronous);
        assert_eq!(config.agent_bandwidth.as_u32(), 20);
    }

    #[test]
    fn round_trips_through_json_file() {
        let config = ServerConfig::testing();
        let file = NamedTempFile::new().unwrap();
        config.save_to_file(file.path()).unwrap();
        let loaded = ServerConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.iterations, loaded.iterations);
        assert_eq!(config.agent_bandwidth, loaded.agent_bandwidth);
    }

    #[test]
    fn out_of_range_iteration_count_is_rejected_by_the_newtype() {
        assert!(IterationCount::try_new(0).is_err());
    }
}

//! Engine configuration.

/// Tunables for an [`Engine`](crate::reactive::Engine).
///
/// ```rust
/// use trellis_core::{Engine, EngineConfig};
///
/// let engine = Engine::with_config(
///     EngineConfig::default()
///         .skip_equal_writes(true)
///         .isolate_effect_failures(false),
/// );
/// assert!(engine.config().skips_equal_writes());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    skip_equal_writes: bool,
    isolate_effect_failures: bool,
}

impl EngineConfig {
    /// Drop cell writes whose value equals the current one.
    ///
    /// A dropped write does not bump the cell's revision, so nothing
    /// downstream is invalidated and no effect is queued.
    pub fn skip_equal_writes(mut self, enabled: bool) -> Self {
        self.skip_equal_writes = enabled;
        self
    }

    /// Keep flushing the remaining effects after one of them fails.
    ///
    /// When disabled, a flush stops at the first failure and the effects
    /// that were not polled yet stay queued for the next flush.
    pub fn isolate_effect_failures(mut self, enabled: bool) -> Self {
        self.isolate_effect_failures = enabled;
        self
    }

    pub fn skips_equal_writes(&self) -> bool {
        self.skip_equal_writes
    }

    pub fn isolates_effect_failures(&self) -> bool {
        self.isolate_effect_failures
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            skip_equal_writes: false,
            isolate_effect_failures: true,
        }
    }
}

//! Runtime context trait: where time comes from.

use async_trait::async_trait;
use std::time::Duration;

/// The central interface for time in a SeqCast run.
///
/// Replicas never read a clock themselves; the driver reads `now()` from a
/// context and hands the logical time to every `deliver` and `update` call.
///
/// # Implementations
///
/// - **Wall clock**: `TokioContext` - wraps `tokio::time` and `Instant`
/// - **Simulation**: `SimContext` (in `seqcast_sim`) - virtual clock + seeded RNG
///
/// # Determinism
///
/// For replayable runs, time must only move when the driver says so. The
/// simulation context advances its virtual clock on `sleep` instead of
/// waiting.
#[async_trait]
pub trait RuntimeContext: Send + Sync + 'static {
    /// Returns the current monotonic time since context creation.
    fn now(&self) -> Duration;

    /// Returns `now()` as fractional logical time units.
    fn now_secs(&self) -> f64 {
        self.now().as_secs_f64()
    }

    /// Suspends execution for the given duration.
    ///
    /// In wall-clock mode: wraps `tokio::time::sleep`
    /// In simulation: advances the virtual clock
    async fn sleep(&self, duration: Duration);

    /// Returns the context's seed (for logging/replay).
    ///
    /// Wall-clock contexts are not seeded and return 0.
    fn seed(&self) -> u64;
}

//! Simulation context implementing RuntimeContext for deterministic runs.

use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use seqcast_env::RuntimeContext;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Handle to the run's single seeded random source.
///
/// Every unreliable link and the shuffled update order draw from the same
/// stream, so a fixed seed plus a fixed call sequence replays exactly.
#[derive(Clone)]
pub struct SimRng {
    inner: Arc<Mutex<ChaCha8Rng>>,
}

impl SimRng {
    /// Creates a standalone RNG with the given seed.
    pub fn new(seed: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ChaCha8Rng> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Uniform value in `[0, 1)`.
    pub fn uniform(&self) -> f64 {
        self.lock().gen::<f64>()
    }

    /// Uniform value in `[min, max]`. Returns `min` when the range is empty.
    pub fn uniform_range(&self, min: f64, max: f64) -> f64 {
        if max <= min {
            return min;
        }
        self.lock().gen_range(min..=max)
    }

    /// Shuffles a slice in place.
    pub fn shuffle<T>(&self, items: &mut [T]) {
        items.shuffle(&mut *self.lock());
    }
}

impl std::fmt::Debug for SimRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SimRng")
    }
}

/// Simulation context backed by deterministic time and RNG.
///
/// This implements `RuntimeContext` using:
/// - A virtual clock that only moves when advanced
/// - A seeded ChaCha8 RNG shared with every simulated link
/// - Simulated sleep that advances virtual time
pub struct SimContext {
    /// Master seed for this simulation
    seed: u64,

    /// Current virtual time (nanoseconds since simulation start)
    virtual_time_ns: Arc<Mutex<u64>>,

    /// Deterministic RNG for link faults and scheduling
    rng: SimRng,
}

impl SimContext {
    /// Creates a new SimContext with the given seed.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            virtual_time_ns: Arc::new(Mutex::new(0)),
            rng: SimRng::new(seed),
        }
    }

    /// Creates an Arc-wrapped context for sharing.
    pub fn shared(seed: u64) -> Arc<Self> {
        Arc::new(Self::new(seed))
    }

    fn time(&self) -> MutexGuard<'_, u64> {
        self.virtual_time_ns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Advances virtual time by the given duration.
    pub fn advance_time(&self, duration: Duration) {
        *self.time() += duration.as_nanos() as u64;
    }

    /// Returns the current virtual time in nanoseconds.
    pub fn time_ns(&self) -> u64 {
        *self.time()
    }

    /// Returns a handle to the shared RNG.
    pub fn rng(&self) -> SimRng {
        self.rng.clone()
    }
}

impl Clone for SimContext {
    fn clone(&self) -> Self {
        Self {
            seed: self.seed,
            virtual_time_ns: Arc::clone(&self.virtual_time_ns),
            rng: self.rng.clone(),
        }
    }
}

#[async_trait]
impl RuntimeContext for SimContext {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.time_ns())
    }

    async fn sleep(&self, duration: Duration) {
        // Virtual time: nothing to wait for
        self.advance_time(duration);
    }

    fn seed(&self) -> u64 {
        self.seed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sim_context_time() {
        let ctx = SimContext::new(42);
        assert_eq!(ctx.now(), Duration::ZERO);

        ctx.advance_time(Duration::from_secs(1));
        assert_eq!(ctx.now(), Duration::from_secs(1));

        ctx.advance_time(Duration::from_millis(500));
        assert_eq!(ctx.now(), Duration::from_millis(1500));
        assert_eq!(ctx.now_secs(), 1.5);
    }

    #[test]
    fn test_sim_rng_deterministic() {
        let a = SimContext::new(42).rng();
        let b = SimContext::new(42).rng();

        let xs: Vec<f64> = (0..8).map(|_| a.uniform()).collect();
        let ys: Vec<f64> = (0..8).map(|_| b.uniform()).collect();
        assert_eq!(xs, ys);

        let c = SimContext::new(43).rng();
        assert_ne!(xs[0], c.uniform());
    }

    #[test]
    fn test_uniform_range_bounds() {
        let rng = SimRng::new(7);
        for _ in 0..1000 {
            let d = rng.uniform_range(0.5, 1.5);
            assert!((0.5..=1.5).contains(&d));
        }
        assert_eq!(rng.uniform_range(0.0, 0.0), 0.0);
    }

    #[test]
    fn test_sim_context_clone_shares_time() {
        let ctx1 = SimContext::new(42);
        let ctx2 = ctx1.clone();

        ctx1.advance_time(Duration::from_secs(5));

        assert_eq!(ctx1.now(), ctx2.now());
        assert_eq!(ctx2.seed(), 42);
    }

    #[tokio::test]
    async fn test_sleep_advances_virtual_time() {
        let ctx = SimContext::new(1);
        ctx.sleep(Duration::from_millis(250)).await;
        assert_eq!(ctx.time_ns(), 250_000_000);
    }
}

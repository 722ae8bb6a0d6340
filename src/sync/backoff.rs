/*!
 * Inflation Backoff
 *
 * Spin -> yield -> park ladder for threads that observe an inflation in
 * progress. Parking goes through a fixed array of striped locks keyed by
 * object identity, capping the number of busy-waiters to one per stripe
 * without ever allocating per-object state.
 */

use crate::core::limits::{INFLATION_PARK_TIMEOUT, INFLATION_STRIPES};
use crate::core::types::ObjectId;
use parking_lot::{Condvar, Mutex};
use std::hash::{BuildHasher, Hash, Hasher};
use std::thread;

struct Stripe {
    lock: Mutex<()>,
    settled: Condvar,
}

/// Fixed-size striped park table for inflation contention
pub struct InflationStripes {
    stripes: Vec<Stripe>,
    hasher: ahash::RandomState,
}

impl InflationStripes {
    pub fn new() -> Self {
        Self::with_stripes(INFLATION_STRIPES)
    }

    pub fn with_stripes(count: usize) -> Self {
        assert!(
            count > 0 && count.is_power_of_two(),
            "Stripe count must be a power of 2"
        );
        let mut stripes = Vec::with_capacity(count);
        for _ in 0..count {
            stripes.push(Stripe {
                lock: Mutex::new(()),
                settled: Condvar::new(),
            });
        }
        Self {
            stripes,
            hasher: ahash::RandomState::new(),
        }
    }

    #[inline]
    fn stripe(&self, object: ObjectId) -> &Stripe {
        let mut hasher = self.hasher.build_hasher();
        object.hash(&mut hasher);
        let idx = (hasher.finish() as usize) & (self.stripes.len() - 1);
        &self.stripes[idx]
    }

    /// Park until the stripe is poked or the bounded timeout elapses.
    /// Callers re-check the header either way; the timeout is a liveness
    /// backstop, not a signal.
    pub fn park(&self, object: ObjectId) {
        let stripe = self.stripe(object);
        let mut guard = stripe.lock.lock();
        stripe
            .settled
            .wait_for(&mut guard, INFLATION_PARK_TIMEOUT);
    }

    /// Wake every thread parked on the object's stripe. Collisions wake
    /// unrelated waiters; they re-check and re-park.
    pub fn unpark_all(&self, object: ObjectId) {
        let stripe = self.stripe(object);
        let _guard = stripe.lock.lock();
        stripe.settled.notify_all();
    }
}

impl Default for InflationStripes {
    fn default() -> Self {
        Self::new()
    }
}

/// One thread's position on the spin/yield/park ladder
pub struct Backoff<'a> {
    stripes: &'a InflationStripes,
    spin_limit: u32,
    yield_limit: u32,
    step: u32,
}

impl<'a> Backoff<'a> {
    pub fn new(stripes: &'a InflationStripes, spin_limit: u32, yield_limit: u32) -> Self {
        Self {
            stripes,
            spin_limit,
            yield_limit,
            step: 0,
        }
    }

    /// Wait a little harder than last time
    pub fn pause(&mut self, object: ObjectId) {
        if self.step < self.spin_limit {
            std::hint::spin_loop();
        } else if self.step < self.spin_limit + self.yield_limit {
            thread::yield_now();
        } else {
            self.stripes.park(object);
        }
        self.step = self.step.saturating_add(1);
    }

    pub fn reset(&mut self) {
        self.step = 0;
    }
}

/*!
 * Identity Hash Generation
 *
 * Produces the raw candidate values that `fast_hash_code` installs into
 * headers and monitors. Algorithms are interchangeable and selected once
 * at configuration time; the per-thread xorshift default never touches
 * shared state on the hot path.
 */

use crate::core::limits::{HASH_BITS, HASH_ZERO_SUBSTITUTE};
use crate::core::types::HashCode;
use crate::runtime::object::RuntimeObject;
use crate::runtime::thread::RuntimeThread;
use crate::sync::config::HashAlgorithm;
use std::hash::BuildHasher;
use std::sync::atomic::{AtomicU64, Ordering};

const HASH_VALUE_MASK: u64 = (1 << HASH_BITS) - 1;

pub struct HashGenerator {
    algorithm: HashAlgorithm,
    /// Shared xorshift state for `GlobalRandom`
    global_state: AtomicU64,
    /// Per-process salt for `AddressXorSalt`; fixed for the process
    /// lifetime so the derived hash is stable across pauses
    salt: u64,
    /// Counter for `Sequential`
    sequence: AtomicU64,
}

impl HashGenerator {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        let seeder = ahash::RandomState::new();
        let seed = seeder.hash_one(0x6F626A73796E63u64) | 1;
        Self {
            algorithm,
            global_state: AtomicU64::new(seed),
            salt: seeder.hash_one(0x73616C74u64),
            sequence: AtomicU64::new(1),
        }
    }

    /// Next candidate hash: nonzero, masked to the header hash field
    pub fn next_hash(&self, thread: &RuntimeThread, obj: &RuntimeObject) -> HashCode {
        let raw = match self.algorithm {
            HashAlgorithm::GlobalRandom => {
                let prev = self
                    .global_state
                    .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |x| {
                        Some(xorshift_step(x))
                    })
                    .unwrap_or(1);
                xorshift_step(prev)
            }
            HashAlgorithm::AddressXorSalt => obj.id() ^ self.salt,
            HashAlgorithm::Constant => HASH_ZERO_SUBSTITUTE as u64,
            HashAlgorithm::Sequential => self.sequence.fetch_add(1, Ordering::Relaxed),
            HashAlgorithm::Address => obj.id(),
            HashAlgorithm::ThreadLocalXorshift => thread.next_xorshift(),
        };
        mask_hash(raw)
    }
}

#[inline]
fn xorshift_step(x: u64) -> u64 {
    let mut v = x;
    v ^= v << 13;
    v ^= v >> 7;
    v ^= v << 17;
    if v == 0 {
        1
    } else {
        v
    }
}

/// Mask a raw value to the hash field width, substituting the fixed
/// nonzero sentinel when the masked value is zero
#[inline]
pub fn mask_hash(raw: u64) -> HashCode {
    let masked = (raw & HASH_VALUE_MASK) as HashCode;
    if masked == 0 {
        HASH_ZERO_SUBSTITUTE
    } else {
        masked
    }
}

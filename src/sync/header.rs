/*!
 * Header Word Codec
 *
 * One fixed-width word per object, multiplexing four mutually exclusive
 * encodings:
 *
 * ```text
 * ┌──────────────────────────────────────────────┬─────────┐
 * │ payload (bits 2..64)                         │ tag 0..2│
 * ├──────────────────────────────────────────────┼─────────┤
 * │ hash (31 bits at shift 8), zero = unset      │   01    │  neutral
 * │ lock-record key + 1, or 0 (lightweight tier) │   00    │  fast-locked
 * │ monitor arena slot id                        │   10    │  monitor
 * │ zero (whole word is the sentinel 0b11)       │   11    │  inflating
 * └──────────────────────────────────────────────┴─────────┘
 * ```
 *
 * All codec functions are total and side-effect-free; decoding the result
 * of any encoding function reports the tier that was just encoded. Callers
 * never see raw bit patterns - transitions go through `HeaderWord`'s CAS.
 */

use crate::core::limits::{HASH_BITS, HASH_SHIFT};
use crate::core::types::{HashCode, MonitorId};
use std::sync::atomic::{AtomicU64, Ordering};

const TAG_MASK: u64 = 0b11;
const TAG_FAST_LOCKED: u64 = 0b00;
const TAG_NEUTRAL: u64 = 0b01;
const TAG_MONITOR: u64 = 0b10;

/// Transient whole-word sentinel: some thread is promoting this object to a
/// heavyweight monitor. Everyone else treats the header as unstable.
const INFLATING_WORD: u64 = 0b11;

const HASH_FIELD_MASK: u64 = (((1u64 << HASH_BITS) - 1) as u64) << HASH_SHIFT;

/// Decoded view of a header word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderState {
    /// Unlocked; hash is zero when not yet assigned
    Neutral { hash: HashCode },
    /// Locked by some thread's lock record (legacy) or lock-stack
    /// (lightweight; `locker` is `None`)
    FastLocked { locker: Option<u64> },
    /// Mid-promotion; retry
    Inflating,
    /// Inflated; the monitor holds the displaced header and the hash
    Monitor { id: MonitorId },
}

/// An immutable header word value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkWord(u64);

impl MarkWord {
    /// The prototype header of a freshly allocated object
    #[inline]
    pub const fn neutral() -> Self {
        MarkWord(TAG_NEUTRAL)
    }

    #[inline]
    pub const fn inflating() -> Self {
        MarkWord(INFLATING_WORD)
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        MarkWord(raw)
    }

    #[inline]
    pub fn is_neutral(self) -> bool {
        self.0 & TAG_MASK == TAG_NEUTRAL
    }

    #[inline]
    pub fn is_fast_locked(self) -> bool {
        self.0 & TAG_MASK == TAG_FAST_LOCKED
    }

    /// Legacy tier only: fast-locked with an embedded lock-record reference
    #[inline]
    pub fn has_locker(self) -> bool {
        self.is_fast_locked() && (self.0 >> 2) != 0
    }

    #[inline]
    pub fn is_being_inflated(self) -> bool {
        self.0 == INFLATING_WORD
    }

    #[inline]
    pub fn has_monitor(self) -> bool {
        self.0 & TAG_MASK == TAG_MONITOR
    }

    /// Identity hash field. Meaningful for neutral and lightweight
    /// fast-locked words; zero means "not yet assigned".
    #[inline]
    pub fn hash(self) -> HashCode {
        ((self.0 & HASH_FIELD_MASK) >> HASH_SHIFT) as HashCode
    }

    #[inline]
    pub fn has_hash(self) -> bool {
        self.0 & HASH_FIELD_MASK != 0
    }

    /// Copy of this word with the hash field set
    #[inline]
    pub fn copy_set_hash(self, hash: HashCode) -> Self {
        debug_assert!(hash > 0);
        MarkWord((self.0 & !HASH_FIELD_MASK) | ((hash as u64) << HASH_SHIFT))
    }

    /// Lightweight tier: flip the tag to fast-locked, preserving the hash
    #[inline]
    pub fn set_fast_locked(self) -> Self {
        MarkWord((self.0 & !TAG_MASK) | TAG_FAST_LOCKED)
    }

    /// Flip the tag back to neutral, preserving the hash
    #[inline]
    pub fn set_unlocked(self) -> Self {
        MarkWord((self.0 & !TAG_MASK) | TAG_NEUTRAL)
    }

    /// Strip the lock tag, leaving payload bits untouched
    #[inline]
    pub fn clear_lock_bits(self) -> Self {
        MarkWord(self.0 & !TAG_MASK)
    }

    /// Legacy tier: fast-locked word pointing at a displaced-header record.
    /// Keys are offset by one so that a zero payload always means
    /// "lightweight, no locker reference".
    #[inline]
    pub fn with_locker(record_key: u64) -> Self {
        MarkWord(((record_key + 1) << 2) | TAG_FAST_LOCKED)
    }

    #[inline]
    pub fn locker_key(self) -> Option<u64> {
        if self.has_locker() {
            Some((self.0 >> 2) - 1)
        } else {
            None
        }
    }

    #[inline]
    pub fn with_monitor(id: MonitorId) -> Self {
        MarkWord(((id as u64) << 2) | TAG_MONITOR)
    }

    /// Lightweight tier: flip the tag to monitor, preserving the hash. The
    /// monitor itself is found through the association table, not the
    /// header payload.
    #[inline]
    pub fn set_has_monitor(self) -> Self {
        MarkWord((self.0 & !TAG_MASK) | TAG_MONITOR)
    }

    #[inline]
    pub fn monitor_id(self) -> Option<MonitorId> {
        if self.has_monitor() {
            Some((self.0 >> 2) as MonitorId)
        } else {
            None
        }
    }

    pub fn decode(self) -> HeaderState {
        if self.0 == INFLATING_WORD {
            return HeaderState::Inflating;
        }
        match self.0 & TAG_MASK {
            TAG_NEUTRAL => HeaderState::Neutral { hash: self.hash() },
            TAG_FAST_LOCKED => HeaderState::FastLocked {
                locker: self.locker_key(),
            },
            TAG_MONITOR => HeaderState::Monitor {
                id: (self.0 >> 2) as MonitorId,
            },
            _ => HeaderState::Inflating,
        }
    }
}

/// The atomic header cell embedded in every object.
///
/// Transitions use acquire/release semantics so a thread observing a
/// monitor-tagged word also observes the fully initialized monitor behind
/// it (owner, displaced header, registry linkage).
#[derive(Debug)]
pub struct HeaderWord(AtomicU64);

impl HeaderWord {
    pub fn new() -> Self {
        HeaderWord(AtomicU64::new(MarkWord::neutral().raw()))
    }

    #[inline]
    pub fn load(&self) -> MarkWord {
        MarkWord(self.0.load(Ordering::Acquire))
    }

    #[inline]
    pub fn store(&self, mark: MarkWord) {
        self.0.store(mark.raw(), Ordering::Release)
    }

    /// Publish `new` if the header still reads `expected`.
    /// On failure returns the word that was found instead.
    #[inline]
    pub fn cas(&self, expected: MarkWord, new: MarkWord) -> std::result::Result<(), MarkWord> {
        self.0
            .compare_exchange(expected.raw(), new.raw(), Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(MarkWord)
    }
}

impl Default for HeaderWord {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_neutral_prototype() {
        let mark = MarkWord::neutral();
        assert!(mark.is_neutral());
        assert!(!mark.is_fast_locked());
        assert!(!mark.has_monitor());
        assert!(!mark.is_being_inflated());
        assert_eq!(mark.hash(), 0);
        assert!(!mark.has_hash());
    }

    #[test]
    fn test_hash_roundtrip() {
        let mark = MarkWord::neutral().copy_set_hash(0x7ABC_DEF1);
        assert!(mark.is_neutral());
        assert_eq!(mark.hash(), 0x7ABC_DEF1);
        assert!(mark.has_hash());
    }

    #[test]
    fn test_lightweight_lock_preserves_hash() {
        let mark = MarkWord::neutral().copy_set_hash(42);
        let locked = mark.set_fast_locked();
        assert!(locked.is_fast_locked());
        assert!(!locked.has_locker());
        assert_eq!(locked.hash(), 42);

        let unlocked = locked.set_unlocked();
        assert!(unlocked.is_neutral());
        assert_eq!(unlocked.hash(), 42);
    }

    #[test]
    fn test_legacy_locker_roundtrip() {
        let mark = MarkWord::with_locker(0);
        assert!(mark.is_fast_locked());
        assert!(mark.has_locker());
        assert_eq!(mark.locker_key(), Some(0));

        let mark = MarkWord::with_locker(0xFFFF_1234);
        assert_eq!(mark.locker_key(), Some(0xFFFF_1234));
    }

    #[test]
    fn test_monitor_roundtrip() {
        let mark = MarkWord::with_monitor(0);
        assert!(mark.has_monitor());
        assert_eq!(mark.monitor_id(), Some(0));

        let mark = MarkWord::with_monitor(123_456);
        assert_eq!(mark.monitor_id(), Some(123_456));
        assert!(!mark.is_neutral());
        assert!(!mark.is_fast_locked());
    }

    #[test]
    fn test_monitor_tag_preserves_hash() {
        let mark = MarkWord::neutral().copy_set_hash(99).set_has_monitor();
        assert!(mark.has_monitor());
        assert_eq!(mark.hash(), 99);
        assert_eq!(mark.set_unlocked().hash(), 99);
    }

    #[test]
    fn test_inflating_is_exclusive() {
        let mark = MarkWord::inflating();
        assert!(mark.is_being_inflated());
        assert!(!mark.is_neutral());
        assert!(!mark.is_fast_locked());
        assert!(!mark.has_monitor());
        assert_eq!(mark.decode(), HeaderState::Inflating);
    }

    #[test]
    fn test_header_word_cas() {
        let header = HeaderWord::new();
        let neutral = header.load();
        assert!(header.cas(neutral, MarkWord::with_monitor(7)).is_ok());

        // Stale expected value fails and reports the current word
        let found = header.cas(neutral, MarkWord::inflating()).unwrap_err();
        assert_eq!(found.monitor_id(), Some(7));
    }

    proptest! {
        #[test]
        fn prop_decode_matches_encode_hash(h in 1i32..(1 << 30)) {
            let mark = MarkWord::neutral().copy_set_hash(h);
            prop_assert_eq!(mark.decode(), HeaderState::Neutral { hash: h });
        }

        #[test]
        fn prop_decode_matches_encode_locker(key in 0u64..(1 << 40)) {
            let mark = MarkWord::with_locker(key);
            prop_assert_eq!(mark.decode(), HeaderState::FastLocked { locker: Some(key) });
        }

        #[test]
        fn prop_decode_matches_encode_monitor(id in 0u32..u32::MAX - 1) {
            let mark = MarkWord::with_monitor(id);
            prop_assert_eq!(mark.decode(), HeaderState::Monitor { id });
        }

        #[test]
        fn prop_lock_unlock_preserves_hash(h in 1i32..(1 << 30)) {
            let mark = MarkWord::neutral().copy_set_hash(h);
            let cycled = mark.set_fast_locked().set_unlocked();
            prop_assert_eq!(cycled, mark);
        }
    }
}

/*!
 * Lock Records
 *
 * Legacy-tier displaced-header slots. In the original scheme these live in
 * call frames; here each thread owns a growable record area whose slot
 * indices are stable while a record is active, so the header word can
 * reference a record that other threads (inflaters) resolve and read.
 */

use crate::core::limits::LOCK_RECORD_INITIAL_CAPACITY;
use crate::core::types::ThreadId;
use crate::runtime::object::{Obj, RuntimeObject};
use parking_lot::Mutex;

/// Displaced-header sentinel: this record is a recursive stack-lock level
pub const DISPLACED_RECURSIVE: u64 = 0;

/// Displaced-header sentinel: this nesting level went through the inflated
/// monitor. Distinguishable from any real displaced mark, which always
/// carries the neutral tag.
pub const DISPLACED_MONITOR_LEVEL: u64 = 0b11;

const SLOT_BITS: u32 = 16;
const SLOT_MASK: u64 = (1 << SLOT_BITS) - 1;

/// Pack a (thread, slot) pair into the key embedded in a fast-locked
/// header word
#[inline]
pub fn record_key(thread: ThreadId, slot: u32) -> u64 {
    debug_assert!((slot as u64) <= SLOT_MASK);
    ((thread as u64) << SLOT_BITS) | slot as u64
}

#[inline]
pub fn record_key_thread(key: u64) -> ThreadId {
    (key >> SLOT_BITS) as ThreadId
}

#[inline]
pub fn record_key_slot(key: u64) -> u32 {
    (key & SLOT_MASK) as u32
}

#[derive(Debug, Clone)]
struct RecordSlot {
    obj: Obj,
    displaced: u64,
}

#[derive(Debug, Default)]
struct Inner {
    slots: Vec<Option<RecordSlot>>,
    free: Vec<u32>,
    /// Active slot ids in acquisition order; exit releases the most recent
    /// record for an object, not the highest slot index
    order: Vec<u32>,
}

/// One thread's lock-record area. Only the owning thread acquires and
/// releases records; other threads take the lock briefly to read a
/// displaced header during inflation.
#[derive(Debug)]
pub struct RecordArea {
    inner: Mutex<Inner>,
}

impl RecordArea {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                slots: Vec::with_capacity(LOCK_RECORD_INITIAL_CAPACITY),
                free: Vec::new(),
                order: Vec::new(),
            }),
        }
    }

    /// Allocate a record holding `displaced`, returning its slot index
    pub fn acquire(&self, obj: &Obj, displaced: u64) -> u32 {
        let mut inner = self.inner.lock();
        let record = RecordSlot {
            obj: obj.clone(),
            displaced,
        };
        let slot = match inner.free.pop() {
            Some(slot) => {
                inner.slots[slot as usize] = Some(record);
                slot
            }
            None => {
                let slot = inner.slots.len() as u32;
                assert!((slot as u64) <= SLOT_MASK, "lock-record area exhausted");
                inner.slots.push(Some(record));
                slot
            }
        };
        inner.order.push(slot);
        slot
    }

    /// The most recently acquired active record for the object
    pub fn last_for(&self, obj: &Obj) -> Option<(u32, u64)> {
        let inner = self.inner.lock();
        inner
            .order
            .iter()
            .rev()
            .copied()
            .find(|&slot| {
                inner.slots[slot as usize]
                    .as_ref()
                    .map(|r| RuntimeObject::same(&r.obj, obj))
                    .unwrap_or(false)
            })
            .map(|slot| (slot, inner.slots[slot as usize].as_ref().unwrap().displaced))
    }

    /// Displaced header stored in an active slot; `None` when the slot has
    /// been released concurrently (the owner is mid-exit)
    pub fn displaced(&self, slot: u32) -> Option<u64> {
        let inner = self.inner.lock();
        inner
            .slots
            .get(slot as usize)
            .and_then(|s| s.as_ref())
            .map(|r| r.displaced)
    }

    pub fn release(&self, slot: u32) {
        let mut inner = self.inner.lock();
        if inner
            .slots
            .get(slot as usize)
            .and_then(|s| s.as_ref())
            .is_some()
        {
            inner.slots[slot as usize] = None;
            inner.free.push(slot);
            if let Some(pos) = inner.order.iter().rposition(|&s| s == slot) {
                inner.order.remove(pos);
            }
        }
    }

    /// Count of active records for the object
    pub fn depth_for(&self, obj: &Obj) -> usize {
        let inner = self.inner.lock();
        inner
            .slots
            .iter()
            .filter(|s| {
                s.as_ref()
                    .map(|r| RuntimeObject::same(&r.obj, obj))
                    .unwrap_or(false)
            })
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().order.is_empty()
    }

    /// Release everything, returning the drained records in acquisition
    /// order; thread teardown only
    pub fn drain(&self) -> Vec<(Obj, u64)> {
        let mut inner = self.inner.lock();
        let drained = inner
            .order
            .iter()
            .filter_map(|&slot| inner.slots[slot as usize].as_ref())
            .map(|r| (r.obj.clone(), r.displaced))
            .collect();
        inner.slots.clear();
        inner.free.clear();
        inner.order.clear();
        drained
    }
}

impl Default for RecordArea {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_roundtrip() {
        let key = record_key(42, 7);
        assert_eq!(record_key_thread(key), 42);
        assert_eq!(record_key_slot(key), 7);
    }

    #[test]
    fn test_acquire_release_reuses_slots() {
        let area = RecordArea::new();
        let x = RuntimeObject::new();
        let y = RuntimeObject::new();
        let z = RuntimeObject::new();

        let a = area.acquire(&x, 0x100);
        let b = area.acquire(&y, 0x200);
        assert_ne!(a, b);

        area.release(a);
        let c = area.acquire(&z, 0x300);
        assert_eq!(c, a);
        assert_eq!(area.displaced(c), Some(0x300));
        assert_eq!(area.displaced(b), Some(0x200));
    }

    #[test]
    fn test_last_for_follows_acquisition_order() {
        let area = RecordArea::new();
        let x = RuntimeObject::new();
        let y = RuntimeObject::new();

        let outer = area.acquire(&x, 0x900);
        let _other = area.acquire(&y, 0x500);
        let inner = area.acquire(&x, DISPLACED_RECURSIVE);

        // Most recent record for x is the recursive one
        assert_eq!(area.last_for(&x), Some((inner, DISPLACED_RECURSIVE)));
        area.release(inner);
        assert_eq!(area.last_for(&x), Some((outer, 0x900)));
    }

    #[test]
    fn test_released_slot_reads_none() {
        let area = RecordArea::new();
        let x = RuntimeObject::new();
        let slot = area.acquire(&x, 0xABC);
        area.release(slot);
        assert_eq!(area.displaced(slot), None);
        assert_eq!(area.last_for(&x), None);
    }

    #[test]
    fn test_drain_reports_records_in_order() {
        let area = RecordArea::new();
        let x = RuntimeObject::new();
        let y = RuntimeObject::new();
        area.acquire(&x, 0x100);
        area.acquire(&x, DISPLACED_RECURSIVE);
        area.acquire(&y, 0x200);

        let drained = area.drain();
        assert_eq!(drained.len(), 3);
        assert!(RuntimeObject::same(&drained[0].0, &x));
        assert_eq!(drained[0].1, 0x100);
        assert!(RuntimeObject::same(&drained[2].0, &y));
        assert!(area.is_empty());
        assert_eq!(area.depth_for(&x), 0);
    }
}

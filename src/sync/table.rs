/*!
 * Object-Monitor Association Table
 *
 * Lightweight-tier mapping from identity hash to monitor. The key is the
 * hash rather than an address because the collector relocates objects; a
 * bucket may therefore hold several monitors whose objects collide on the
 * hash, resolved by pointer equality against each monitor's live object
 * reference. A reference the collector has cleared marks the entry dead
 * and eligible for in-place removal.
 */

use crate::core::types::{HashCode, MonitorId};
use crate::runtime::object::Obj;
use crate::sync::arena::{MonitorArena, MonitorHandle};
use crate::sync::monitor::ObjectMonitor;
use dashmap::DashMap;
use std::sync::Arc;

pub struct AssociationTable {
    map: DashMap<HashCode, Vec<MonitorId>, ahash::RandomState>,
    arena: Arc<MonitorArena>,
}

impl AssociationTable {
    pub fn new(arena: Arc<MonitorArena>) -> Self {
        Self {
            map: DashMap::with_hasher(ahash::RandomState::new()),
            arena,
        }
    }

    /// The monitor currently associated with the object, if any. Returns
    /// `None` when the object has no hash yet - an object without a hash
    /// cannot have a table entry.
    pub fn get(&self, obj: &Obj) -> Option<MonitorHandle> {
        let hash = obj.header().load().hash();
        if hash == 0 {
            return None;
        }
        let bucket = self.map.get(&hash)?;
        for &id in bucket.iter() {
            let monitor = self.arena.get(id);
            if monitor.guards(obj) {
                return Some(monitor);
            }
        }
        None
    }

    /// Publish `candidate` as the object's monitor unless another inflator
    /// won the race, in which case the existing association is returned
    /// and the caller discards its speculative allocation. Dead entries
    /// found along the way are pruned in place.
    pub fn insert_get(&self, obj: &Obj, candidate: &MonitorHandle) -> MonitorHandle {
        let hash = obj.header().load().hash();
        debug_assert!(hash != 0, "hash must be installed before association");
        let mut bucket = self.map.entry(hash).or_default();
        bucket.retain(|&id| self.arena.get(id).object().is_some());
        for &id in bucket.iter() {
            let monitor = self.arena.get(id);
            if monitor.guards(obj) {
                return monitor;
            }
        }
        bucket.push(candidate.id());
        candidate.clone()
    }

    /// Drop the monitor's association. Returns false when no entry was
    /// present (a racing remover got there first).
    pub fn remove(&self, monitor: &ObjectMonitor) -> bool {
        let hash = monitor.header().load().hash();
        if hash == 0 {
            return false;
        }
        let removed = match self.map.get_mut(&hash) {
            Some(mut bucket) => {
                let before = bucket.len();
                bucket.retain(|&id| id != monitor.id());
                before != bucket.len()
            }
            None => false,
        };
        self.map.remove_if(&hash, |_, bucket| bucket.is_empty());
        removed
    }

    pub fn len(&self) -> usize {
        self.map.iter().map(|bucket| bucket.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::object::RuntimeObject;
    use crate::sync::header::MarkWord;
    use crate::sync::monitor::Owner;

    fn hashed_object(hash: HashCode) -> Obj {
        let obj = RuntimeObject::new();
        let mark = obj.header().load();
        obj.header().store(mark.copy_set_hash(hash));
        obj
    }

    fn monitor_for(arena: &Arc<MonitorArena>, obj: &Obj) -> MonitorHandle {
        let m = arena.alloc();
        m.prepare(obj, obj.header().load(), Owner::None);
        m
    }

    #[test]
    fn test_get_requires_hash() {
        let arena = Arc::new(MonitorArena::new());
        let table = AssociationTable::new(arena);
        let obj = RuntimeObject::new();
        assert!(table.get(&obj).is_none());
    }

    #[test]
    fn test_insert_get_converges_on_winner() {
        let arena = Arc::new(MonitorArena::new());
        let table = AssociationTable::new(arena.clone());
        let obj = hashed_object(77);

        let first = monitor_for(&arena, &obj);
        let winner = table.insert_get(&obj, &first);
        assert_eq!(winner.id(), first.id());

        // A racing inflator's candidate loses and gets the existing one
        let second = monitor_for(&arena, &obj);
        let winner = table.insert_get(&obj, &second);
        assert_eq!(winner.id(), first.id());
        assert_eq!(table.len(), 1);

        let found = table.get(&obj).unwrap();
        assert_eq!(found.id(), first.id());
    }

    #[test]
    fn test_hash_collision_resolved_by_identity() {
        let arena = Arc::new(MonitorArena::new());
        let table = AssociationTable::new(arena.clone());
        let a = hashed_object(42);
        let b = hashed_object(42);

        let ma = monitor_for(&arena, &a);
        let mb = monitor_for(&arena, &b);
        table.insert_get(&a, &ma);
        table.insert_get(&b, &mb);
        assert_eq!(table.len(), 2);

        assert_eq!(table.get(&a).unwrap().id(), ma.id());
        assert_eq!(table.get(&b).unwrap().id(), mb.id());
    }

    #[test]
    fn test_dead_entries_are_pruned() {
        let arena = Arc::new(MonitorArena::new());
        let table = AssociationTable::new(arena.clone());

        let dead = hashed_object(9);
        let m_dead = monitor_for(&arena, &dead);
        table.insert_get(&dead, &m_dead);
        drop(dead); // collector reclaims the object

        let live = hashed_object(9);
        let m_live = monitor_for(&arena, &live);
        let winner = table.insert_get(&live, &m_live);
        assert_eq!(winner.id(), m_live.id());
        // The dead entry was pruned during the insert
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_remove() {
        let arena = Arc::new(MonitorArena::new());
        let table = AssociationTable::new(arena.clone());
        let obj = hashed_object(5);
        let m = monitor_for(&arena, &obj);
        table.insert_get(&obj, &m);

        assert!(table.remove(&m));
        assert!(!table.remove(&m));
        assert!(table.get(&obj).is_none());
        assert!(table.is_empty());
    }
}

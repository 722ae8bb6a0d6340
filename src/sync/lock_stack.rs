/*!
 * Per-Thread Lock Stack
 *
 * Bounded record of the objects a thread currently fast-locks in the
 * lightweight tier. Recursive acquisition of the topmost object bumps an
 * adjacent counter instead of pushing a duplicate entry, so nesting depth
 * is unbounded while the stack itself stays small.
 */

use crate::core::limits::LOCK_STACK_CAPACITY;
use crate::runtime::object::{Obj, RuntimeObject};

#[derive(Debug, Clone)]
struct LockEntry {
    obj: Obj,
    count: u32,
}

#[derive(Debug)]
pub struct LockStack {
    entries: Vec<LockEntry>,
}

impl LockStack {
    pub fn new() -> Self {
        Self {
            entries: Vec::with_capacity(LOCK_STACK_CAPACITY),
        }
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.entries.len() >= LOCK_STACK_CAPACITY
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fast path: the object is already topmost, bump its counter
    pub fn try_recursive_enter(&mut self, obj: &Obj) -> bool {
        match self.entries.last_mut() {
            Some(top) if RuntimeObject::same(&top.obj, obj) => {
                top.count += 1;
                true
            }
            _ => false,
        }
    }

    /// Fast path: the object is topmost with nested acquisitions remaining
    pub fn try_recursive_exit(&mut self, obj: &Obj) -> bool {
        match self.entries.last_mut() {
            Some(top) if RuntimeObject::same(&top.obj, obj) && top.count > 1 => {
                top.count -= 1;
                true
            }
            _ => false,
        }
    }

    /// Whether `pop` would succeed: topmost entry, single acquisition
    pub fn can_pop(&self, obj: &Obj) -> bool {
        matches!(self.entries.last(),
            Some(top) if RuntimeObject::same(&top.obj, obj) && top.count == 1)
    }

    pub fn push(&mut self, obj: Obj) {
        debug_assert!(!self.is_full(), "lock-stack overflow must inflate first");
        self.entries.push(LockEntry { obj, count: 1 });
    }

    /// Pop the topmost entry, which must be this object at count one
    pub fn pop(&mut self, obj: &Obj) -> bool {
        match self.entries.last() {
            Some(top) if RuntimeObject::same(&top.obj, obj) && top.count == 1 => {
                self.entries.pop();
                true
            }
            _ => false,
        }
    }

    pub fn contains(&self, obj: &Obj) -> bool {
        self.entries
            .iter()
            .any(|e| RuntimeObject::same(&e.obj, obj))
    }

    /// Total acquisitions recorded for the object
    pub fn acquisitions(&self, obj: &Obj) -> u32 {
        self.entries
            .iter()
            .find(|e| RuntimeObject::same(&e.obj, obj))
            .map(|e| e.count)
            .unwrap_or(0)
    }

    /// Remove the object's entry wherever it sits, returning its
    /// acquisition count. Used when a monitor claims an anonymous owner.
    pub fn remove(&mut self, obj: &Obj) -> u32 {
        if let Some(idx) = self
            .entries
            .iter()
            .position(|e| RuntimeObject::same(&e.obj, obj))
        {
            self.entries.remove(idx).count
        } else {
            0
        }
    }

    /// Bottom-of-stack entry: the oldest fast-locked object, the inflation
    /// victim when the stack is full
    pub fn oldest(&self) -> Option<Obj> {
        self.entries.first().map(|e| e.obj.clone())
    }

    /// Drain every entry; thread teardown only
    pub fn drain(&mut self) -> Vec<(Obj, u32)> {
        self.entries.drain(..).map(|e| (e.obj, e.count)).collect()
    }
}

impl Default for LockStack {
    fn default() -> Self {
        Self::new()
    }
}

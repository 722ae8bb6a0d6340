/*!
 * Runtime Object
 * The slice of the managed object model the monitor subsystem sees: one
 * atomic header word plus a stable identity
 */

use crate::sync::header::HeaderWord;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// A managed object as seen by the locking engine.
///
/// The id stands in for the object address in a runtime whose collector
/// relocates objects; it is stable for the object's lifetime and is what
/// address-derived hash algorithms consume.
#[derive(Debug)]
pub struct RuntimeObject {
    header: HeaderWord,
    id: u64,
    value_based: bool,
}

/// Shared handle to a runtime object
pub type Obj = Arc<RuntimeObject>;

impl RuntimeObject {
    pub fn new() -> Obj {
        Arc::new(Self {
            header: HeaderWord::new(),
            id: NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed),
            value_based: false,
        })
    }

    /// An object whose class is flagged identity-sensitive; synchronizing
    /// on it trips the value-based diagnostic
    pub fn new_value_based() -> Obj {
        Arc::new(Self {
            header: HeaderWord::new(),
            id: NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed),
            value_based: true,
        })
    }

    #[inline]
    pub fn header(&self) -> &HeaderWord {
        &self.header
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn is_value_based(&self) -> bool {
        self.value_based
    }

    /// Identity comparison of two object handles
    #[inline]
    pub fn same(a: &Obj, b: &Obj) -> bool {
        Arc::ptr_eq(a, b)
    }
}

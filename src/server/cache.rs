//! Keys and entries for the two-tier resolution cache.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

use crate::core::{ClassRef, CompilationEpoch, MethodInfo, MethodRef};

/// Which resolution flow produced an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolvedMethodKind {
    Virtual,
    VirtualFromOffset,
    Static,
    Special,
    Interface,
}

/// Cache key for one resolution. `class` is the coordinate class of the
/// query: the owning class for constant-pool flows, the queried class for
/// offset and interface flows. Offset flows carry the offset in `cp_index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResolvedMethodKey {
    pub kind: ResolvedMethodKind,
    pub cp_index: i32,
    pub class: ClassRef,
}

/// Cache key for attribute queries. Relocatable answers live in separate
/// maps under the same key shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttrKey {
    pub cp_index: i32,
    pub is_static: bool,
}

/// Interned-string key: base identity plus the offset path that named it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RomStringKey {
    pub base: u64,
    pub offsets: Vec<u64>,
}

/// A successfully resolved method as remembered by either tier. Unresolved
/// answers are never stored in this form.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedMethod {
    /// Compilation that produced the entry; a hit from a different epoch
    /// must not reuse the mirror token inside `info`.
    pub epoch: CompilationEpoch,
    pub method: MethodRef,
    pub vtable_slot: u32,
    pub info: MethodInfo,
}

/// Insert-if-absent. A racing publish of an equal value is idempotent; a
/// different value under the same key is a consistency violation (asserted
/// in debug, first value wins in release).
pub(crate) fn publish_value<K, V>(map: &mut HashMap<K, V>, key: K, value: V)
where
    K: Eq + Hash,
    V: PartialEq + Debug,
{
    match map.entry(key) {
        Entry::Occupied(existing) => {
            debug_assert_eq!(existing.get(), &value, "conflicting cache publish");
        }
        Entry::Vacant(slot) => {
            slot.insert(value);
        }
    }
}

/// Insert-if-absent for method entries. Racing compilations legitimately
/// publish different epochs, so only the resolution itself is compared.
pub(crate) fn publish_method(
    map: &mut HashMap<ResolvedMethodKey, CachedMethod>,
    key: ResolvedMethodKey,
    entry: CachedMethod,
) {
    match map.entry(key) {
        Entry::Occupied(existing) => {
            debug_assert_eq!(
                (existing.get().method, existing.get().vtable_slot),
                (entry.method, entry.vtable_slot),
                "conflicting cache publish"
            );
        }
        Entry::Vacant(slot) => {
            slot.insert(entry);
        }
    }
}

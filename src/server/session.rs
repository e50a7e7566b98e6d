//! Per-client session state shared across compilations.
//!
//! A session owns one [`ClassRecord`] per class the client has compiled
//! against. Records hold the global resolution caches behind a per-record
//! mutex; the lock is confined to the accessor bodies below and is never
//! held while a query is in flight to the client.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use tracing::debug;

use crate::core::{ClassRef, ClientId, FieldAttributes};
use crate::net::StreamError;

use super::cache::{
    publish_method, publish_value, AttrKey, CachedMethod, ResolvedMethodKey, RomStringKey,
};

/// State for one connected client, keyed by the identifier the client sent
/// with its first compilation request. Live for the whole connection.
pub struct ClientSession {
    client_id: ClientId,
    epoch: AtomicU64,
    classes: Mutex<HashMap<ClassRef, Arc<ClassRecord>>>,
}

impl ClientSession {
    pub fn new(client_id: ClientId) -> Self {
        Self {
            client_id,
            epoch: AtomicU64::new(1),
            classes: Mutex::new(HashMap::new()),
        }
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    /// Reserve the epoch for a new compilation. Epochs are never reused
    /// within a session, so a cache entry stamped with an older epoch is
    /// recognizably stale.
    pub fn next_epoch(&self) -> crate::core::CompilationEpoch {
        let raw = self.epoch.fetch_add(1, Ordering::Relaxed);
        crate::core::CompilationEpoch::new(raw)
    }

    fn classes(&self) -> MutexGuard<'_, HashMap<ClassRef, Arc<ClassRecord>>> {
        self.classes.lock().expect("class table lock poisoned")
    }

    pub fn class_record(&self, class: ClassRef) -> Option<Arc<ClassRecord>> {
        self.classes().get(&class).cloned()
    }

    /// Look up the record for `class`, fetching its ROM snapshot from the
    /// client if this is the first time the session has seen it. The table
    /// lock is released around `fetch`; when two compilations race, the
    /// loser's snapshot is dropped and the first record wins.
    pub fn ensure_class_record<F>(
        &self,
        class: ClassRef,
        fetch: F,
    ) -> Result<Arc<ClassRecord>, StreamError>
    where
        F: FnOnce() -> Result<Bytes, StreamError>,
    {
        if let Some(record) = self.class_record(class) {
            return Ok(record);
        }
        let snapshot = fetch()?;
        debug!(class = class.as_u64(), bytes = snapshot.len(), "caching class snapshot");
        let mut classes = self.classes();
        let record = match classes.entry(class) {
            Entry::Occupied(existing) => Arc::clone(existing.get()),
            Entry::Vacant(slot) => {
                Arc::clone(slot.insert(Arc::new(ClassRecord::new(class, snapshot))))
            }
        };
        Ok(record)
    }
}

/// Everything the server remembers about one client class: the immutable
/// ROM snapshot plus the global caches scoped to the class.
pub struct ClassRecord {
    class: ClassRef,
    rom_snapshot: Bytes,
    caches: Mutex<ClassCaches>,
}

#[derive(Default)]
struct ClassCaches {
    field_attributes: HashMap<AttrKey, FieldAttributes>,
    field_attributes_aot: HashMap<AttrKey, FieldAttributes>,
    resolved_methods: HashMap<ResolvedMethodKey, CachedMethod>,
    class_from_cp: HashMap<i32, ClassRef>,
    class_of_static: HashMap<i32, ClassRef>,
    rom_strings: HashMap<RomStringKey, String>,
    field_names: HashMap<i32, String>,
}

impl ClassRecord {
    fn new(class: ClassRef, rom_snapshot: Bytes) -> Self {
        Self {
            class,
            rom_snapshot,
            caches: Mutex::new(ClassCaches::default()),
        }
    }

    pub fn class(&self) -> ClassRef {
        self.class
    }

    pub fn rom_snapshot(&self) -> &Bytes {
        &self.rom_snapshot
    }

    fn caches(&self) -> MutexGuard<'_, ClassCaches> {
        self.caches.lock().expect("class cache lock poisoned")
    }

    pub fn cached_field_attributes(&self, key: AttrKey, aot: bool) -> Option<FieldAttributes> {
        let caches = self.caches();
        let map = if aot {
            &caches.field_attributes_aot
        } else {
            &caches.field_attributes
        };
        map.get(&key).copied()
    }

    /// Only fully resolved attributes belong in the global tier; unresolved
    /// answers are transient and stay with the compilation that saw them.
    pub fn publish_field_attributes(&self, key: AttrKey, aot: bool, attrs: FieldAttributes) {
        debug_assert!(!attrs.unresolved_in_cp, "unresolved attributes are local-only");
        let mut caches = self.caches();
        let map = if aot {
            &mut caches.field_attributes_aot
        } else {
            &mut caches.field_attributes
        };
        publish_value(map, key, attrs);
    }

    pub fn cached_method(&self, key: ResolvedMethodKey) -> Option<CachedMethod> {
        self.caches().resolved_methods.get(&key).cloned()
    }

    pub fn publish_resolved_method(&self, key: ResolvedMethodKey, entry: CachedMethod) {
        publish_method(&mut self.caches().resolved_methods, key, entry);
    }

    pub fn cached_class_from_cp(&self, cp_index: i32) -> Option<ClassRef> {
        self.caches().class_from_cp.get(&cp_index).copied()
    }

    pub fn publish_class_from_cp(&self, cp_index: i32, class: ClassRef) {
        publish_value(&mut self.caches().class_from_cp, cp_index, class);
    }

    pub fn cached_class_of_static(&self, cp_index: i32) -> Option<ClassRef> {
        self.caches().class_of_static.get(&cp_index).copied()
    }

    pub fn publish_class_of_static(&self, cp_index: i32, class: ClassRef) {
        publish_value(&mut self.caches().class_of_static, cp_index, class);
    }

    pub fn cached_rom_string(&self, key: &RomStringKey) -> Option<String> {
        self.caches().rom_strings.get(key).cloned()
    }

    pub fn publish_rom_string(&self, key: RomStringKey, value: String) {
        publish_value(&mut self.caches().rom_strings, key, value);
    }

    pub fn cached_field_name(&self, cp_index: i32) -> Option<String> {
        self.caches().field_names.get(&cp_index).cloned()
    }

    pub fn publish_field_name(&self, cp_index: i32, name: String) {
        publish_value(&mut self.caches().field_names, cp_index, name);
    }
}

//! Relocatable-compilation validation records.
//!
//! Ahead-of-time bodies are reused by later client processes, so every
//! resolution baked into one must be re-checkable at load time. The server
//! emits a [`ValidationRecord`] for each answer it hands the compiler,
//! cache hits included. A ledger may refuse a record; the resolution is
//! then downgraded to unresolved rather than surfaced as an error.

use std::collections::HashSet;

use crate::core::{ClassRef, CpRef, MethodRef};

/// One fact the ahead-of-time load phase must re-establish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationRecord {
    VirtualMethodFromCp {
        method: MethodRef,
        cp: CpRef,
        cp_index: i32,
    },
    VirtualMethodFromOffset {
        method: MethodRef,
        class: ClassRef,
        offset: i32,
    },
    StaticMethodFromCp {
        method: MethodRef,
        cp: CpRef,
        cp_index: i32,
    },
    SpecialMethodFromCp {
        method: MethodRef,
        cp: CpRef,
        cp_index: i32,
    },
    InterfaceMethodFromCp {
        method: MethodRef,
        cp: CpRef,
        class: ClassRef,
        cp_index: i32,
    },
    ImproperInterfaceMethodFromCp {
        method: MethodRef,
        cp: CpRef,
        cp_index: i32,
    },
    ClassFromCp {
        class: ClassRef,
        cp: CpRef,
        cp_index: i32,
    },
    StaticClassFromCp {
        class: ClassRef,
        cp: CpRef,
        cp_index: i32,
    },
    DeclaringClassFromFieldOrStatic {
        class: ClassRef,
        cp: CpRef,
        cp_index: i32,
    },
}

/// Sink for validation records during one relocatable compilation.
pub trait ValidationLedger {
    /// Returns false when the record cannot be satisfied; the caller must
    /// then treat the resolution as unresolved.
    fn record(&mut self, record: ValidationRecord) -> bool;
}

/// Ledger that accepts everything and keeps the deduplicated sequence in
/// arrival order, for embedding into the compiled body.
#[derive(Default)]
pub struct RecordingLedger {
    seen: HashSet<ValidationRecord>,
    records: Vec<ValidationRecord>,
}

impl RecordingLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[ValidationRecord] {
        &self.records
    }
}

impl ValidationLedger for RecordingLedger {
    fn record(&mut self, record: ValidationRecord) -> bool {
        if self.seen.insert(record) {
            self.records.push(record);
        }
        true
    }
}

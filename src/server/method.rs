//! Mirrored resolved methods.
//!
//! A [`ServerMethod`] stands in for a resolved method that lives in the
//! client process. Queries against it are answered from the local tier
//! (owned by this value, scoped to one compilation), then the global tier
//! (the session's class records), and only then by an RPC to the client.
//! Replies carry the client-side mirror token; a method that lost its
//! mirror to the staleness rule picks a fresh one up from the next reply.

use std::collections::HashMap;
use std::io::{Read, Write};

use bytes::Bytes;
use tracing::{debug, warn};

use crate::core::{
    ClassRef, FieldAttributes, MethodIdent, MethodInfo, MethodRef, MirrorRef,
};
use crate::net::{CodecError, MessageType, StreamError, WireArgs};

use super::cache::{
    publish_method, publish_value, AttrKey, CachedMethod, ResolvedMethodKey, ResolvedMethodKind,
    RomStringKey,
};
use super::context::{CompilationMode, CompileContext};
use super::validation::ValidationRecord;

/// Outcome of one resolution query. Not-found is an ordinary value; the
/// flag reports whether the constant pool entry itself was unresolved.
#[derive(Debug)]
pub struct Resolution {
    pub method: Option<ServerMethod>,
    pub unresolved_in_cp: bool,
}

impl Resolution {
    fn not_found() -> Self {
        Self {
            method: None,
            unresolved_in_cp: false,
        }
    }

    fn unresolved() -> Self {
        Self {
            method: None,
            unresolved_in_cp: true,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.method.is_some()
    }
}

/// Server-side stand-in for one client-resolved method. Relocatable
/// behavior hangs off the compilation mode it was created under.
#[derive(Debug)]
pub struct ServerMethod {
    method: MethodRef,
    vtable_slot: u32,
    owner_mirror: Option<MirrorRef>,
    mode: CompilationMode,
    info: MethodInfo,
    attrs_local: HashMap<AttrKey, FieldAttributes>,
    attrs_local_aot: HashMap<AttrKey, FieldAttributes>,
    methods_local: HashMap<ResolvedMethodKey, CachedMethod>,
}

impl ServerMethod {
    /// Mirror the method a compile request names. First contact with its
    /// class also pins the class snapshot in the session.
    pub fn mirror_root<C: Read + Write>(
        ctx: &mut CompileContext<'_, C>,
        method: MethodRef,
    ) -> Result<Self, StreamError> {
        let ident = MethodIdent {
            method,
            owner_mirror: None,
            vtable_slot: 0,
        };
        let for_aot = ctx.is_aot();
        let (info,): (MethodInfo,) = Self::query(ctx, MessageType::MirrorMethod, (ident, for_aot))?;
        debug!(method = method.as_u64(), "mirrored root method");
        Self::from_parts(ctx, method, 0, None, info, ctx.mode)
    }

    /// Mirror a method discovered through `self`, one full round trip.
    fn mirror_child<C: Read + Write>(
        &self,
        ctx: &mut CompileContext<'_, C>,
        method: MethodRef,
        vtable_slot: u32,
    ) -> Result<Self, StreamError> {
        let ident = MethodIdent {
            method,
            owner_mirror: self.info.mirror,
            vtable_slot,
        };
        let (info,): (MethodInfo,) =
            Self::query(ctx, MessageType::MirrorMethod, (ident, self.is_aot()))?;
        Self::from_parts(ctx, method, vtable_slot, self.info.mirror, info, self.mode)
    }

    fn from_parts<C: Read + Write>(
        ctx: &mut CompileContext<'_, C>,
        method: MethodRef,
        vtable_slot: u32,
        owner_mirror: Option<MirrorRef>,
        info: MethodInfo,
        mode: CompilationMode,
    ) -> Result<Self, StreamError> {
        let session = ctx.session;
        let stream = &mut *ctx.stream;
        session.ensure_class_record(info.owning_class, || {
            stream.write(MessageType::RomSnapshot, (info.owning_class,))?;
            let (blob,): (Bytes,) = stream.read()?;
            Ok(blob)
        })?;
        Ok(Self {
            method,
            vtable_slot,
            owner_mirror,
            mode,
            info,
            attrs_local: HashMap::new(),
            attrs_local_aot: HashMap::new(),
            methods_local: HashMap::new(),
        })
    }

    /// Rebuild a method from a global cache entry. An entry stamped by a
    /// different compilation must not reuse the mirror token.
    fn from_entry<C: Read + Write>(
        &self,
        ctx: &CompileContext<'_, C>,
        entry: CachedMethod,
    ) -> Self {
        let mut info = entry.info;
        if entry.epoch != ctx.epoch {
            info.mirror = None;
        }
        Self {
            method: entry.method,
            vtable_slot: entry.vtable_slot,
            owner_mirror: self.info.mirror,
            mode: self.mode,
            info,
            attrs_local: HashMap::new(),
            attrs_local_aot: HashMap::new(),
            methods_local: HashMap::new(),
        }
    }

    pub fn method(&self) -> MethodRef {
        self.method
    }

    pub fn vtable_slot(&self) -> u32 {
        self.vtable_slot
    }

    pub fn owning_class(&self) -> ClassRef {
        self.info.owning_class
    }

    pub fn mirror(&self) -> Option<MirrorRef> {
        self.info.mirror
    }

    pub fn signature(&self) -> &str {
        &self.info.signature
    }

    pub fn is_private(&self) -> bool {
        self.info.is_private
    }

    pub fn is_var_handle_access(&self) -> bool {
        self.info.is_var_handle_access
    }

    pub fn info(&self) -> &MethodInfo {
        &self.info
    }

    pub fn mode(&self) -> CompilationMode {
        self.mode
    }

    pub fn ident(&self) -> MethodIdent {
        MethodIdent {
            method: self.method,
            owner_mirror: self.owner_mirror,
            vtable_slot: self.vtable_slot,
        }
    }

    fn is_aot(&self) -> bool {
        self.mode == CompilationMode::Aot
    }

    fn wire_mirror(&self) -> Option<MirrorRef> {
        self.info.mirror
    }

    fn adopt_mirror(&mut self, mirror: Option<MirrorRef>) {
        if self.info.mirror.is_none() {
            self.info.mirror = mirror;
        }
    }

    /// Reacquire a client-side mirror after a staleness clear. Queries whose
    /// replies do not return a mirror call this first.
    fn ensure_mirrored<C: Read + Write>(
        &mut self,
        ctx: &mut CompileContext<'_, C>,
    ) -> Result<MirrorRef, StreamError> {
        if let Some(mirror) = self.info.mirror {
            return Ok(mirror);
        }
        let ident = self.ident();
        let (info,): (MethodInfo,) =
            Self::query(ctx, MessageType::MirrorMethod, (ident, self.is_aot()))?;
        let mirror = info.mirror.ok_or(CodecError::MissingValue {
            what: "method mirror",
        })?;
        self.info.mirror = Some(mirror);
        debug!(method = self.method.as_u64(), "recreated method mirror");
        Ok(mirror)
    }

    fn query<C, Req, Rep>(
        ctx: &mut CompileContext<'_, C>,
        kind: MessageType,
        req: Req,
    ) -> Result<Rep, StreamError>
    where
        C: Read + Write,
        Req: WireArgs,
        Rep: WireArgs,
    {
        ctx.stream.write(kind, req)?;
        ctx.stream.read()
    }

    /// Attributes of the instance field behind a constant pool entry.
    pub fn field_attributes<C: Read + Write>(
        &mut self,
        ctx: &mut CompileContext<'_, C>,
        cp_index: i32,
        is_store: bool,
    ) -> Result<FieldAttributes, StreamError> {
        self.attributes(ctx, cp_index, is_store, false)
    }

    /// Attributes of the static field behind a constant pool entry.
    pub fn static_attributes<C: Read + Write>(
        &mut self,
        ctx: &mut CompileContext<'_, C>,
        cp_index: i32,
        is_store: bool,
    ) -> Result<FieldAttributes, StreamError> {
        self.attributes(ctx, cp_index, is_store, true)
    }

    fn attributes<C: Read + Write>(
        &mut self,
        ctx: &mut CompileContext<'_, C>,
        cp_index: i32,
        is_store: bool,
        is_static: bool,
    ) -> Result<FieldAttributes, StreamError> {
        let kind = if is_static {
            MessageType::StaticAttributes
        } else {
            MessageType::FieldAttributes
        };
        let key = AttrKey { cp_index, is_static };
        let aot = self.is_aot();
        if ctx.config.local {
            let local = if aot { &self.attrs_local_aot } else { &self.attrs_local };
            if let Some(hit) = local.get(&key) {
                return Ok(*hit);
            }
        }
        let record = ctx
            .config
            .global
            .then(|| ctx.session.class_record(self.info.owning_class))
            .flatten();
        if let Some(record) = record.as_deref() {
            if let Some(hit) = record.cached_field_attributes(key, aot) {
                if ctx.config.verify_cached_attributes {
                    let (fresh, mirror): (FieldAttributes, Option<MirrorRef>) = Self::query(
                        ctx,
                        kind,
                        (self.wire_mirror(), self.ident(), cp_index, is_store, aot),
                    )?;
                    self.adopt_mirror(mirror);
                    debug_assert_eq!(fresh, hit, "cached attributes diverged from client");
                }
                return Ok(hit);
            }
        }
        let (mut attrs, mirror): (FieldAttributes, Option<MirrorRef>) = Self::query(
            ctx,
            kind,
            (self.wire_mirror(), self.ident(), cp_index, is_store, aot),
        )?;
        self.adopt_mirror(mirror);
        if aot {
            attrs.harden_unresolved();
        }
        if attrs.unresolved_in_cp {
            if ctx.config.local {
                let local = if aot {
                    &mut self.attrs_local_aot
                } else {
                    &mut self.attrs_local
                };
                publish_value(local, key, attrs);
            }
        } else if let Some(record) = record {
            record.publish_field_attributes(key, aot, attrs);
        }
        Ok(attrs)
    }

    /// Resolve the virtual call site at `cp_index`. The result may be a
    /// private method; callers that must not see one go through
    /// [`Self::resolved_public_virtual_method`]. Signature-polymorphic
    /// accessor methods get their signature patched from the constant pool
    /// after resolution; the patch never enters the caches.
    pub fn resolved_virtual_method<C: Read + Write>(
        &mut self,
        ctx: &mut CompileContext<'_, C>,
        cp_index: i32,
        ignore_rt_resolve: bool,
    ) -> Result<Resolution, StreamError> {
        if cp_index < 0 {
            return Ok(Resolution::not_found());
        }
        let key = ResolvedMethodKey {
            kind: ResolvedMethodKind::Virtual,
            cp_index,
            class: self.info.owning_class,
        };
        let mut resolution = if let Some(entry) = self.probe_caches(ctx, key) {
            self.admit_entry(ctx, key, entry)?
        } else {
            let (method, vtable_slot, unresolved_in_cp, info, mirror): (
                Option<MethodRef>,
                u32,
                bool,
                MethodInfo,
                Option<MirrorRef>,
            ) = Self::query(
                ctx,
                MessageType::ResolvedVirtualMethod,
                (self.wire_mirror(), self.ident(), cp_index, ignore_rt_resolve),
            )?;
            self.adopt_mirror(mirror);
            match method {
                Some(method) => self.admit_fresh(ctx, key, method, vtable_slot, info, unresolved_in_cp)?,
                None => Resolution {
                    method: None,
                    unresolved_in_cp,
                },
            }
        };
        if let Some(child) = resolution.method.as_mut() {
            if child.info.is_var_handle_access {
                let base = self.info.cp.as_u64();
                let signature = self.rom_string(ctx, base, vec![cp_index as u64])?;
                child.info.signature = signature;
            }
        }
        Ok(resolution)
    }

    /// Public-only view of virtual resolution: a private result reads as
    /// not found.
    pub fn resolved_public_virtual_method<C: Read + Write>(
        &mut self,
        ctx: &mut CompileContext<'_, C>,
        cp_index: i32,
        ignore_rt_resolve: bool,
    ) -> Result<Resolution, StreamError> {
        let resolution = self.resolved_virtual_method(ctx, cp_index, ignore_rt_resolve)?;
        match resolution.method {
            Some(child) if child.info.is_private => Ok(Resolution {
                method: None,
                unresolved_in_cp: resolution.unresolved_in_cp,
            }),
            method => Ok(Resolution {
                method,
                unresolved_in_cp: resolution.unresolved_in_cp,
            }),
        }
    }

    /// Resolve the method occupying `offset` in `class`'s dispatch table.
    pub fn resolved_virtual_method_from_offset<C: Read + Write>(
        &mut self,
        ctx: &mut CompileContext<'_, C>,
        class: ClassRef,
        offset: u32,
        ignore_rt_resolve: bool,
    ) -> Result<Resolution, StreamError> {
        let key = ResolvedMethodKey {
            kind: ResolvedMethodKind::VirtualFromOffset,
            cp_index: offset as i32,
            class,
        };
        if let Some(entry) = self.probe_caches(ctx, key) {
            return self.admit_entry(ctx, key, entry);
        }
        let (method, info, mirror): (Option<MethodRef>, MethodInfo, Option<MirrorRef>) =
            Self::query(
                ctx,
                MessageType::ResolvedVirtualFromOffset,
                (self.wire_mirror(), self.ident(), class, offset, ignore_rt_resolve),
            )?;
        self.adopt_mirror(mirror);
        match method {
            Some(method) => self.admit_fresh(ctx, key, method, offset, info, false),
            None => Ok(Resolution::not_found()),
        }
    }

    pub fn resolved_static_method<C: Read + Write>(
        &mut self,
        ctx: &mut CompileContext<'_, C>,
        cp_index: i32,
    ) -> Result<Resolution, StreamError> {
        self.cp_method(
            ctx,
            MessageType::ResolvedStaticMethod,
            ResolvedMethodKind::Static,
            cp_index,
        )
    }

    pub fn resolved_special_method<C: Read + Write>(
        &mut self,
        ctx: &mut CompileContext<'_, C>,
        cp_index: i32,
    ) -> Result<Resolution, StreamError> {
        self.cp_method(
            ctx,
            MessageType::ResolvedSpecialMethod,
            ResolvedMethodKind::Special,
            cp_index,
        )
    }

    fn cp_method<C: Read + Write>(
        &mut self,
        ctx: &mut CompileContext<'_, C>,
        kind: MessageType,
        method_kind: ResolvedMethodKind,
        cp_index: i32,
    ) -> Result<Resolution, StreamError> {
        if cp_index < 0 {
            return Ok(Resolution::not_found());
        }
        let key = ResolvedMethodKey {
            kind: method_kind,
            cp_index,
            class: self.info.owning_class,
        };
        if let Some(entry) = self.probe_caches(ctx, key) {
            return self.admit_entry(ctx, key, entry);
        }
        let (method, unresolved_in_cp, info, mirror): (
            Option<MethodRef>,
            bool,
            MethodInfo,
            Option<MirrorRef>,
        ) = Self::query(ctx, kind, (self.wire_mirror(), self.ident(), cp_index))?;
        self.adopt_mirror(mirror);
        match method {
            Some(method) => self.admit_fresh(ctx, key, method, 0, info, unresolved_in_cp),
            None => {
                // Relocatable compilations pin the flag down with a direct
                // constant pool check instead of trusting the answer that
                // failed to resolve.
                let unresolved_in_cp = if self.is_aot() {
                    match method_kind {
                        ResolvedMethodKind::Static => {
                            self.is_unresolved_static_in_cp(ctx, cp_index)?
                        }
                        _ => self.is_unresolved_special_in_cp(ctx, cp_index)?,
                    }
                } else {
                    unresolved_in_cp
                };
                Ok(Resolution {
                    method: None,
                    unresolved_in_cp,
                })
            }
        }
    }

    /// Resolve the interface method `class` contributes at `cp_index`.
    pub fn resolved_interface_method<C: Read + Write>(
        &mut self,
        ctx: &mut CompileContext<'_, C>,
        class: ClassRef,
        cp_index: i32,
    ) -> Result<Resolution, StreamError> {
        if cp_index < 0 {
            return Ok(Resolution::not_found());
        }
        let key = ResolvedMethodKey {
            kind: ResolvedMethodKind::Interface,
            cp_index,
            class,
        };
        if let Some(entry) = self.probe_caches(ctx, key) {
            return self.admit_entry(ctx, key, entry);
        }
        let (resolved, method, vtable_slot, info, mirror): (
            bool,
            Option<MethodRef>,
            u32,
            MethodInfo,
            Option<MirrorRef>,
        ) = Self::query(
            ctx,
            MessageType::ResolvedInterfaceMethod,
            (self.wire_mirror(), self.ident(), class, cp_index),
        )?;
        self.adopt_mirror(mirror);
        match method {
            Some(method) if resolved => self.admit_fresh(ctx, key, method, vtable_slot, info, false),
            _ => Ok(Resolution::not_found()),
        }
    }

    /// Improper interface resolution (invokeinterface naming a non-interface
    /// method). Possibly private, never cached.
    pub fn resolved_improper_interface_method<C: Read + Write>(
        &mut self,
        ctx: &mut CompileContext<'_, C>,
        cp_index: i32,
    ) -> Result<Resolution, StreamError> {
        if cp_index < 0 {
            return Ok(Resolution::not_found());
        }
        let (method, vtable_slot, info, mirror): (
            Option<MethodRef>,
            u32,
            MethodInfo,
            Option<MirrorRef>,
        ) = Self::query(
            ctx,
            MessageType::ResolvedImproperInterfaceMethod,
            (self.wire_mirror(), self.ident(), cp_index),
        )?;
        self.adopt_mirror(mirror);
        let Some(method) = method else {
            return Ok(Resolution::not_found());
        };
        if self.is_aot() {
            let record = ValidationRecord::ImproperInterfaceMethodFromCp {
                method,
                cp: self.info.cp,
                cp_index,
            };
            if !ctx.ledger.record(record) {
                warn!(cp_index, "validation record rejected, downgrading resolution");
                return Ok(Resolution::unresolved());
            }
        }
        let child = Self::from_parts(ctx, method, vtable_slot, self.info.mirror, info, self.mode)?;
        Ok(Resolution {
            method: Some(child),
            unresolved_in_cp: false,
        })
    }

    /// Resolve an invokedynamic call site. The reply names the method by
    /// signature; the answer is mirrored separately and never cached.
    pub fn resolved_dynamic_method<C: Read + Write>(
        &mut self,
        ctx: &mut CompileContext<'_, C>,
        callsite_index: i32,
    ) -> Result<Resolution, StreamError> {
        self.signature_method(ctx, MessageType::ResolvedDynamicMethod, callsite_index)
    }

    /// Resolve an invokehandle call site.
    pub fn resolved_handle_method<C: Read + Write>(
        &mut self,
        ctx: &mut CompileContext<'_, C>,
        cp_index: i32,
    ) -> Result<Resolution, StreamError> {
        self.signature_method(ctx, MessageType::ResolvedHandleMethod, cp_index)
    }

    fn signature_method<C: Read + Write>(
        &mut self,
        ctx: &mut CompileContext<'_, C>,
        kind: MessageType,
        index: i32,
    ) -> Result<Resolution, StreamError> {
        if index < 0 {
            return Ok(Resolution::not_found());
        }
        self.ensure_mirrored(ctx)?;
        let (method, signature, unresolved_in_cp): (Option<MethodRef>, String, bool) =
            Self::query(ctx, kind, (self.wire_mirror(), self.ident(), index))?;
        let Some(method) = method else {
            return Ok(Resolution {
                method: None,
                unresolved_in_cp,
            });
        };
        let mut child = self.mirror_child(ctx, method, 0)?;
        child.info.signature = signature;
        Ok(Resolution {
            method: Some(child),
            unresolved_in_cp,
        })
    }

    /// Class named by a constant pool entry; null answers are not cached.
    pub fn class_from_cp<C: Read + Write>(
        &mut self,
        ctx: &mut CompileContext<'_, C>,
        cp_index: i32,
    ) -> Result<Option<ClassRef>, StreamError> {
        self.class_query(ctx, cp_index, false)
    }

    /// Class owning the static field behind a constant pool entry.
    pub fn class_of_static<C: Read + Write>(
        &mut self,
        ctx: &mut CompileContext<'_, C>,
        cp_index: i32,
    ) -> Result<Option<ClassRef>, StreamError> {
        self.class_query(ctx, cp_index, true)
    }

    fn class_query<C: Read + Write>(
        &mut self,
        ctx: &mut CompileContext<'_, C>,
        cp_index: i32,
        of_static: bool,
    ) -> Result<Option<ClassRef>, StreamError> {
        if cp_index < 0 {
            return Ok(None);
        }
        let kind = if of_static {
            MessageType::ClassOfStatic
        } else {
            MessageType::ClassFromCp
        };
        let record = ctx
            .config
            .global
            .then(|| ctx.session.class_record(self.info.owning_class))
            .flatten();
        if let Some(record) = record.as_deref() {
            let hit = if of_static {
                record.cached_class_of_static(cp_index)
            } else {
                record.cached_class_from_cp(cp_index)
            };
            if let Some(class) = hit {
                return self.admit_class(ctx, cp_index, of_static, class);
            }
        }
        self.ensure_mirrored(ctx)?;
        let (class,): (Option<ClassRef>,) = Self::query(
            ctx,
            kind,
            (self.wire_mirror(), self.ident(), cp_index, self.is_aot()),
        )?;
        let Some(class) = class else {
            return Ok(None);
        };
        if let Some(record) = record {
            if of_static {
                record.publish_class_of_static(cp_index, class);
            } else {
                record.publish_class_from_cp(cp_index, class);
            }
        }
        self.admit_class(ctx, cp_index, of_static, class)
    }

    fn admit_class<C: Read + Write>(
        &self,
        ctx: &mut CompileContext<'_, C>,
        cp_index: i32,
        of_static: bool,
        class: ClassRef,
    ) -> Result<Option<ClassRef>, StreamError> {
        if self.is_aot() {
            let record = if of_static {
                ValidationRecord::StaticClassFromCp {
                    class,
                    cp: self.info.cp,
                    cp_index,
                }
            } else {
                ValidationRecord::ClassFromCp {
                    class,
                    cp: self.info.cp,
                    cp_index,
                }
            };
            if !ctx.ledger.record(record) {
                warn!(cp_index, "validation record rejected, downgrading class answer");
                return Ok(None);
            }
        }
        Ok(Some(class))
    }

    /// Declaring class of the field or static behind a constant pool entry.
    /// Uncached: callers are expected to hold onto the answer.
    pub fn declaring_class_from_field_or_static<C: Read + Write>(
        &mut self,
        ctx: &mut CompileContext<'_, C>,
        cp_index: i32,
    ) -> Result<Option<ClassRef>, StreamError> {
        if cp_index < 0 {
            return Ok(None);
        }
        self.ensure_mirrored(ctx)?;
        let (class,): (Option<ClassRef>,) = Self::query(
            ctx,
            MessageType::DeclaringClassFromFieldOrStatic,
            (self.wire_mirror(), self.ident(), cp_index),
        )?;
        let Some(class) = class else {
            return Ok(None);
        };
        if self.is_aot() {
            let record = ValidationRecord::DeclaringClassFromFieldOrStatic {
                class,
                cp: self.info.cp,
                cp_index,
            };
            if !ctx.ledger.record(record) {
                warn!(cp_index, "validation record rejected, downgrading class answer");
                return Ok(None);
            }
        }
        Ok(Some(class))
    }

    /// Name of the field or static behind a constant pool entry.
    pub fn field_or_static_name<C: Read + Write>(
        &mut self,
        ctx: &mut CompileContext<'_, C>,
        cp_index: i32,
    ) -> Result<String, StreamError> {
        if cp_index < 0 {
            return Ok(String::new());
        }
        let record = ctx
            .config
            .global
            .then(|| ctx.session.class_record(self.info.owning_class))
            .flatten();
        if let Some(record) = record.as_deref() {
            if let Some(name) = record.cached_field_name(cp_index) {
                return Ok(name);
            }
        }
        self.ensure_mirrored(ctx)?;
        let (name,): (String,) = Self::query(
            ctx,
            MessageType::FieldOrStaticName,
            (self.wire_mirror(), self.ident(), cp_index),
        )?;
        if let Some(record) = record {
            record.publish_field_name(cp_index, name.clone());
        }
        Ok(name)
    }

    /// Read an interned string out of the class's read-only metadata, by
    /// base identity and offset path. Answers are interned per class record.
    pub fn rom_string<C: Read + Write>(
        &mut self,
        ctx: &mut CompileContext<'_, C>,
        base: u64,
        offsets: Vec<u64>,
    ) -> Result<String, StreamError> {
        let key = RomStringKey { base, offsets };
        let record = ctx
            .config
            .global
            .then(|| ctx.session.class_record(self.info.owning_class))
            .flatten();
        if let Some(record) = record.as_deref() {
            if let Some(value) = record.cached_rom_string(&key) {
                return Ok(value);
            }
        }
        self.ensure_mirrored(ctx)?;
        let (value,): (String,) = Self::query(
            ctx,
            MessageType::RomString,
            (self.wire_mirror(), self.ident(), key.base, key.offsets.clone()),
        )?;
        if let Some(record) = record {
            record.publish_rom_string(key, value.clone());
        }
        Ok(value)
    }

    /// Direct constant pool state check used by relocatable compilations.
    pub fn is_unresolved_static_in_cp<C: Read + Write>(
        &mut self,
        ctx: &mut CompileContext<'_, C>,
        cp_index: i32,
    ) -> Result<bool, StreamError> {
        self.unresolved_in_cp_query(ctx, MessageType::UnresolvedStaticInCp, cp_index)
    }

    pub fn is_unresolved_special_in_cp<C: Read + Write>(
        &mut self,
        ctx: &mut CompileContext<'_, C>,
        cp_index: i32,
    ) -> Result<bool, StreamError> {
        self.unresolved_in_cp_query(ctx, MessageType::UnresolvedSpecialInCp, cp_index)
    }

    /// Virtual entries resolve through the dispatch table, not the constant
    /// pool, so the answer is known without asking.
    pub fn is_unresolved_virtual_in_cp(&self, _cp_index: i32) -> bool {
        false
    }

    fn unresolved_in_cp_query<C: Read + Write>(
        &mut self,
        ctx: &mut CompileContext<'_, C>,
        kind: MessageType,
        cp_index: i32,
    ) -> Result<bool, StreamError> {
        self.ensure_mirrored(ctx)?;
        let (unresolved,): (bool,) =
            Self::query(ctx, kind, (self.wire_mirror(), self.ident(), cp_index))?;
        Ok(unresolved)
    }

    /// Local tier, then global. A global hit is copied into the local tier
    /// so later probes in this compilation skip the record lock.
    fn probe_caches<C: Read + Write>(
        &mut self,
        ctx: &CompileContext<'_, C>,
        key: ResolvedMethodKey,
    ) -> Option<CachedMethod> {
        if ctx.config.local {
            if let Some(entry) = self.methods_local.get(&key) {
                return Some(entry.clone());
            }
        }
        if ctx.config.global {
            if let Some(record) = ctx.session.class_record(self.info.owning_class) {
                if let Some(entry) = record.cached_method(key) {
                    if ctx.config.local {
                        publish_method(&mut self.methods_local, key, entry.clone());
                    }
                    return Some(entry);
                }
            }
        }
        None
    }

    /// Hand out a cached resolution. Relocatable compilations re-record the
    /// validation even though no RPC happens; a rejected record downgrades
    /// the hit to unresolved.
    fn admit_entry<C: Read + Write>(
        &self,
        ctx: &mut CompileContext<'_, C>,
        key: ResolvedMethodKey,
        entry: CachedMethod,
    ) -> Result<Resolution, StreamError> {
        if self.is_aot() && !ctx.ledger.record(self.validation_record(key, entry.method)) {
            warn!(cp_index = key.cp_index, "validation record rejected, downgrading cached hit");
            return Ok(Resolution::unresolved());
        }
        Ok(Resolution {
            method: Some(self.from_entry(ctx, entry)),
            unresolved_in_cp: false,
        })
    }

    /// Publish a fresh resolution to both tiers, then hand it out under the
    /// same validation gate as a cached hit.
    fn admit_fresh<C: Read + Write>(
        &mut self,
        ctx: &mut CompileContext<'_, C>,
        key: ResolvedMethodKey,
        method: MethodRef,
        vtable_slot: u32,
        info: MethodInfo,
        unresolved_in_cp: bool,
    ) -> Result<Resolution, StreamError> {
        let entry = CachedMethod {
            epoch: ctx.epoch,
            method,
            vtable_slot,
            info,
        };
        if ctx.config.local {
            publish_method(&mut self.methods_local, key, entry.clone());
        }
        if ctx.config.global {
            if let Some(record) = ctx.session.class_record(self.info.owning_class) {
                record.publish_resolved_method(key, entry.clone());
            }
        }
        if self.is_aot() && !ctx.ledger.record(self.validation_record(key, method)) {
            warn!(cp_index = key.cp_index, "validation record rejected, downgrading resolution");
            return Ok(Resolution::unresolved());
        }
        let child =
            Self::from_parts(ctx, method, vtable_slot, self.info.mirror, entry.info, self.mode)?;
        Ok(Resolution {
            method: Some(child),
            unresolved_in_cp,
        })
    }

    fn validation_record(&self, key: ResolvedMethodKey, method: MethodRef) -> ValidationRecord {
        let cp = self.info.cp;
        match key.kind {
            ResolvedMethodKind::Virtual => ValidationRecord::VirtualMethodFromCp {
                method,
                cp,
                cp_index: key.cp_index,
            },
            ResolvedMethodKind::VirtualFromOffset => ValidationRecord::VirtualMethodFromOffset {
                method,
                class: key.class,
                offset: key.cp_index,
            },
            ResolvedMethodKind::Static => ValidationRecord::StaticMethodFromCp {
                method,
                cp,
                cp_index: key.cp_index,
            },
            ResolvedMethodKind::Special => ValidationRecord::SpecialMethodFromCp {
                method,
                cp,
                cp_index: key.cp_index,
            },
            ResolvedMethodKind::Interface => ValidationRecord::InterfaceMethodFromCp {
                method,
                cp,
                class: key.class,
                cp_index: key.cp_index,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, ProtocolLimits};
    use crate::core::{ClientId, CompilationEpoch, CpRef, LoaderRef};
    use crate::net::ServerStream;
    use crate::server::session::ClientSession;
    use crate::server::validation::{RecordingLedger, ValidationLedger};
    use std::io::Cursor;

    // A stream over an empty cursor: any attempted round trip fails with
    // an unexpected-EOF error, so cache-only paths are observable.
    fn dead_stream() -> ServerStream<Cursor<Vec<u8>>> {
        ServerStream::new(Cursor::new(Vec::new()), ProtocolLimits::default())
    }

    fn seeded_session(class: ClassRef) -> ClientSession {
        let session = ClientSession::new(ClientId::new(1));
        session
            .ensure_class_record(class, || Ok(Bytes::from_static(b"rom")))
            .unwrap();
        session
    }

    fn info_for(class: ClassRef, mirror: Option<MirrorRef>) -> MethodInfo {
        MethodInfo {
            mirror,
            cp: CpRef::new(0x20),
            owning_class: class,
            loader: LoaderRef::new(0x30),
            method_index: 1,
            is_interpreted: true,
            is_jni_native: false,
            is_private: false,
            is_overridden: false,
            is_var_handle_access: false,
            start_address: 0,
            override_bit_address: 0,
            jni_target: 0,
            signature: "(I)V".to_string(),
            body_info: Bytes::new(),
            persistent_info: Bytes::new(),
        }
    }

    fn method_under_test<C: Read + Write>(
        ctx: &mut CompileContext<'_, C>,
        class: ClassRef,
    ) -> ServerMethod {
        ServerMethod::from_parts(
            ctx,
            MethodRef::new(0x10),
            0,
            None,
            info_for(class, Some(MirrorRef::new(0x99))),
            ctx.mode,
        )
        .unwrap()
    }

    struct RejectingLedger;

    impl ValidationLedger for RejectingLedger {
        fn record(&mut self, _record: ValidationRecord) -> bool {
            false
        }
    }

    #[test]
    fn global_hit_from_same_epoch_keeps_mirror() {
        let class = ClassRef::new(0x40);
        let session = seeded_session(class);
        let mut stream = dead_stream();
        let mut ledger = RecordingLedger::new();
        let mut ctx = CompileContext::new(
            &mut stream,
            &session,
            CacheConfig::default(),
            CompilationMode::Jit,
            CompilationEpoch::new(7),
            &mut ledger,
        );
        let mut root = method_under_test(&mut ctx, class);
        let child_mirror = Some(MirrorRef::new(0xAB));
        let key = ResolvedMethodKey {
            kind: ResolvedMethodKind::Static,
            cp_index: 5,
            class,
        };
        session
            .class_record(class)
            .unwrap()
            .publish_resolved_method(
                key,
                CachedMethod {
                    epoch: CompilationEpoch::new(7),
                    method: MethodRef::new(0x11),
                    vtable_slot: 0,
                    info: info_for(class, child_mirror),
                },
            );
        let resolution = root.resolved_static_method(&mut ctx, 5).unwrap();
        let child = resolution.method.unwrap();
        assert_eq!(child.method(), MethodRef::new(0x11));
        assert_eq!(child.mirror(), child_mirror);
    }

    #[test]
    fn global_hit_from_older_epoch_drops_mirror() {
        let class = ClassRef::new(0x40);
        let session = seeded_session(class);
        let mut stream = dead_stream();
        let mut ledger = RecordingLedger::new();
        let mut ctx = CompileContext::new(
            &mut stream,
            &session,
            CacheConfig::default(),
            CompilationMode::Jit,
            CompilationEpoch::new(8),
            &mut ledger,
        );
        let mut root = method_under_test(&mut ctx, class);
        let key = ResolvedMethodKey {
            kind: ResolvedMethodKind::Special,
            cp_index: 2,
            class,
        };
        session
            .class_record(class)
            .unwrap()
            .publish_resolved_method(
                key,
                CachedMethod {
                    epoch: CompilationEpoch::new(3),
                    method: MethodRef::new(0x12),
                    vtable_slot: 0,
                    info: info_for(class, Some(MirrorRef::new(0xAB))),
                },
            );
        let resolution = root.resolved_special_method(&mut ctx, 2).unwrap();
        assert_eq!(resolution.method.unwrap().mirror(), None);
    }

    #[test]
    fn fresh_resolution_lands_in_both_tiers() {
        let class = ClassRef::new(0x40);
        let session = seeded_session(class);
        let mut stream = dead_stream();
        let mut ledger = RecordingLedger::new();
        let mut ctx = CompileContext::new(
            &mut stream,
            &session,
            CacheConfig::default(),
            CompilationMode::Jit,
            CompilationEpoch::new(1),
            &mut ledger,
        );
        let mut root = method_under_test(&mut ctx, class);
        let key = ResolvedMethodKey {
            kind: ResolvedMethodKind::Virtual,
            cp_index: 9,
            class,
        };
        let resolution = root
            .admit_fresh(&mut ctx, key, MethodRef::new(0x13), 4, info_for(class, None), false)
            .unwrap();
        assert!(resolution.is_resolved());
        assert!(root.methods_local.contains_key(&key));
        let global = session.class_record(class).unwrap().cached_method(key).unwrap();
        assert_eq!(global.method, MethodRef::new(0x13));
        assert_eq!(global.vtable_slot, 4);
    }

    #[test]
    fn unresolved_attributes_stay_out_of_the_global_tier() {
        use crate::core::PrimitiveKind;
        use crate::test_harness::{drain_log, spawn_responder, stream_pair, ScriptedProvider};

        let class = ClassRef::new(0x40);
        let session = seeded_session(class);
        let (mut stream, client) = stream_pair();
        let (mut provider, log) = ScriptedProvider::new();
        provider.script_field_attributes(
            4,
            false,
            FieldAttributes {
                offset: 0,
                kind: PrimitiveKind::Int32,
                is_volatile: false,
                is_final: false,
                is_private: false,
                unresolved_in_cp: true,
                resolved: false,
            },
        );
        let responder = spawn_responder(client, provider);
        let mut ledger = RecordingLedger::new();
        let mut ctx = CompileContext::new(
            &mut stream,
            &session,
            CacheConfig::default(),
            CompilationMode::Jit,
            CompilationEpoch::new(1),
            &mut ledger,
        );
        let mut root = method_under_test(&mut ctx, class);
        let attrs = root.field_attributes(&mut ctx, 4, false).unwrap();
        assert!(attrs.unresolved_in_cp);
        let key = AttrKey {
            cp_index: 4,
            is_static: false,
        };
        assert!(root.attrs_local.contains_key(&key));
        assert!(session
            .class_record(class)
            .unwrap()
            .cached_field_attributes(key, false)
            .is_none());
        // answered from the local tier, no second round trip
        let again = root.field_attributes(&mut ctx, 4, false).unwrap();
        assert_eq!(again, attrs);
        drop(ctx);
        drop(stream);
        responder.join().unwrap();
        let queries = drain_log(&log);
        assert_eq!(
            queries
                .iter()
                .filter(|kind| **kind == MessageType::FieldAttributes)
                .count(),
            1
        );
    }

    #[test]
    fn disabled_caches_query_every_time() {
        use crate::core::PrimitiveKind;
        use crate::test_harness::{drain_log, spawn_responder, stream_pair, ScriptedProvider};

        let class = ClassRef::new(0x40);
        let session = seeded_session(class);
        let (mut stream, client) = stream_pair();
        let (mut provider, log) = ScriptedProvider::new();
        provider.script_field_attributes(
            4,
            false,
            FieldAttributes {
                offset: 24,
                kind: PrimitiveKind::Int64,
                is_volatile: false,
                is_final: false,
                is_private: false,
                unresolved_in_cp: false,
                resolved: true,
            },
        );
        let responder = spawn_responder(client, provider);
        let mut ledger = RecordingLedger::new();
        let mut ctx = CompileContext::new(
            &mut stream,
            &session,
            CacheConfig::disabled(),
            CompilationMode::Jit,
            CompilationEpoch::new(1),
            &mut ledger,
        );
        let mut root = method_under_test(&mut ctx, class);
        let first = root.field_attributes(&mut ctx, 4, false).unwrap();
        let second = root.field_attributes(&mut ctx, 4, false).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.offset, 24);
        drop(ctx);
        drop(stream);
        responder.join().unwrap();
        let queries = drain_log(&log);
        assert_eq!(
            queries
                .iter()
                .filter(|kind| **kind == MessageType::FieldAttributes)
                .count(),
            2
        );
    }

    #[test]
    fn negative_index_short_circuits_without_rpc() {
        let class = ClassRef::new(0x40);
        let session = seeded_session(class);
        let mut stream = dead_stream();
        let mut ledger = RecordingLedger::new();
        let mut ctx = CompileContext::new(
            &mut stream,
            &session,
            CacheConfig::default(),
            CompilationMode::Jit,
            CompilationEpoch::new(1),
            &mut ledger,
        );
        let mut root = method_under_test(&mut ctx, class);
        let resolution = root.resolved_virtual_method(&mut ctx, -1, false).unwrap();
        assert!(!resolution.is_resolved());
        assert!(!resolution.unresolved_in_cp);
        assert_eq!(root.class_from_cp(&mut ctx, -1).unwrap(), None);
    }

    #[test]
    fn rejected_validation_downgrades_cached_hit() {
        let class = ClassRef::new(0x40);
        let session = seeded_session(class);
        let mut stream = dead_stream();
        let mut ledger = RejectingLedger;
        let mut ctx = CompileContext::new(
            &mut stream,
            &session,
            CacheConfig::default(),
            CompilationMode::Aot,
            CompilationEpoch::new(1),
            &mut ledger,
        );
        let mut root = method_under_test(&mut ctx, class);
        let key = ResolvedMethodKey {
            kind: ResolvedMethodKind::Static,
            cp_index: 5,
            class,
        };
        session
            .class_record(class)
            .unwrap()
            .publish_resolved_method(
                key,
                CachedMethod {
                    epoch: CompilationEpoch::new(1),
                    method: MethodRef::new(0x11),
                    vtable_slot: 0,
                    info: info_for(class, None),
                },
            );
        let resolution = root.resolved_static_method(&mut ctx, 5).unwrap();
        assert!(!resolution.is_resolved());
        assert!(resolution.unresolved_in_cp);
    }

    #[test]
    fn cached_hits_rerecord_validation() {
        let class = ClassRef::new(0x40);
        let session = seeded_session(class);
        let mut stream = dead_stream();
        let mut ledger = RecordingLedger::new();
        let mut ctx = CompileContext::new(
            &mut stream,
            &session,
            CacheConfig::default(),
            CompilationMode::Aot,
            CompilationEpoch::new(1),
            &mut ledger,
        );
        let mut root = method_under_test(&mut ctx, class);
        let key = ResolvedMethodKey {
            kind: ResolvedMethodKind::Virtual,
            cp_index: 3,
            class,
        };
        session
            .class_record(class)
            .unwrap()
            .publish_resolved_method(
                key,
                CachedMethod {
                    epoch: CompilationEpoch::new(1),
                    method: MethodRef::new(0x14),
                    vtable_slot: 8,
                    info: info_for(class, None),
                },
            );
        let resolution = root.resolved_virtual_method(&mut ctx, 3, false).unwrap();
        assert!(resolution.is_resolved());
        drop(ctx);
        assert_eq!(
            ledger.records(),
            &[ValidationRecord::VirtualMethodFromCp {
                method: MethodRef::new(0x14),
                cp: CpRef::new(0x20),
                cp_index: 3,
            }]
        );
    }

    #[test]
    fn var_handle_signature_patch_stays_out_of_cache() {
        let class = ClassRef::new(0x40);
        let session = seeded_session(class);
        let mut stream = dead_stream();
        let mut ledger = RecordingLedger::new();
        let mut ctx = CompileContext::new(
            &mut stream,
            &session,
            CacheConfig::default(),
            CompilationMode::Jit,
            CompilationEpoch::new(1),
            &mut ledger,
        );
        let mut root = method_under_test(&mut ctx, class);
        let key = ResolvedMethodKey {
            kind: ResolvedMethodKind::Virtual,
            cp_index: 6,
            class,
        };
        let mut cached_info = info_for(class, None);
        cached_info.is_var_handle_access = true;
        let record = session.class_record(class).unwrap();
        record.publish_resolved_method(
            key,
            CachedMethod {
                epoch: CompilationEpoch::new(1),
                method: MethodRef::new(0x15),
                vtable_slot: 0,
                info: cached_info,
            },
        );
        record.publish_rom_string(
            RomStringKey {
                base: 0x20,
                offsets: vec![6],
            },
            "(Ljava/lang/Object;)I".to_string(),
        );
        let resolution = root.resolved_virtual_method(&mut ctx, 6, false).unwrap();
        assert_eq!(
            resolution.method.unwrap().signature(),
            "(Ljava/lang/Object;)I"
        );
        let entry = record.cached_method(key).unwrap();
        assert_eq!(entry.info.signature, "(I)V");
    }

    #[test]
    fn private_virtual_result_is_filtered() {
        let class = ClassRef::new(0x40);
        let session = seeded_session(class);
        let mut stream = dead_stream();
        let mut ledger = RecordingLedger::new();
        let mut ctx = CompileContext::new(
            &mut stream,
            &session,
            CacheConfig::default(),
            CompilationMode::Jit,
            CompilationEpoch::new(1),
            &mut ledger,
        );
        let mut root = method_under_test(&mut ctx, class);
        let key = ResolvedMethodKey {
            kind: ResolvedMethodKind::Virtual,
            cp_index: 4,
            class,
        };
        let mut private_info = info_for(class, None);
        private_info.is_private = true;
        session.class_record(class).unwrap().publish_resolved_method(
            key,
            CachedMethod {
                epoch: CompilationEpoch::new(1),
                method: MethodRef::new(0x16),
                vtable_slot: 0,
                info: private_info,
            },
        );
        let possibly_private = root.resolved_virtual_method(&mut ctx, 4, false).unwrap();
        assert!(possibly_private.is_resolved());
        let public_only = root.resolved_public_virtual_method(&mut ctx, 4, false).unwrap();
        assert!(!public_only.is_resolved());
    }
}

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use crossbeam::channel::{unbounded, Receiver, Sender};

use crate::client::{ClientResponder, MetadataProvider, ResolutionAnswer, SignatureAnswer};
use crate::config::ProtocolLimits;
use crate::core::{ClassRef, CpRef, FieldAttributes, LoaderRef, MethodIdent, MethodInfo, MethodRef, MirrorRef};
use crate::net::{ClientStream, MessageType, ServerStream, StreamError};
use crate::server::{ValidationLedger, ValidationRecord};

/// One end of an in-memory duplex byte stream. Reads block until the peer
/// writes; dropping the peer reads as end-of-stream.
pub struct PipeEnd {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
}

pub fn duplex() -> (PipeEnd, PipeEnd) {
    let (left_tx, left_rx) = unbounded();
    let (right_tx, right_rx) = unbounded();
    (
        PipeEnd {
            tx: left_tx,
            rx: right_rx,
            pending: Vec::new(),
        },
        PipeEnd {
            tx: right_tx,
            rx: left_rx,
            pending: Vec::new(),
        },
    )
}

impl Read for PipeEnd {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pending.is_empty() {
            match self.rx.recv() {
                Ok(chunk) => self.pending = chunk,
                Err(_) => return Ok(0),
            }
        }
        let n = self.pending.len().min(buf.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}

impl Write for PipeEnd {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer end dropped"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Connected server/client stream pair over an in-memory pipe.
pub fn stream_pair() -> (ServerStream<PipeEnd>, ClientStream<PipeEnd>) {
    let (server_end, client_end) = duplex();
    (
        ServerStream::new(server_end, ProtocolLimits::default()),
        ClientStream::new(client_end, ProtocolLimits::default()),
    )
}

/// Identity of one scripted method, expanded into a full snapshot when the
/// server mirrors it.
pub struct MethodSpec {
    pub method: MethodRef,
    pub owning_class: ClassRef,
    pub cp: CpRef,
    pub signature: String,
    pub is_private: bool,
    pub is_var_handle_access: bool,
}

impl MethodSpec {
    pub fn new(method: MethodRef, owning_class: ClassRef, cp: CpRef, signature: &str) -> Self {
        Self {
            method,
            owning_class,
            cp,
            signature: signature.to_string(),
            is_private: false,
            is_var_handle_access: false,
        }
    }
}

struct ScriptedResolution {
    method: Option<MethodRef>,
    vtable_slot: u32,
    unresolved_in_cp: bool,
}

/// Table-driven metadata provider. Every query it answers is also pushed
/// onto a log channel, so tests can assert exactly which round trips the
/// server issued (in particular, that a cache hit issued none).
pub struct ScriptedProvider {
    log: Sender<MessageType>,
    next_mirror: u64,
    mirrors: HashMap<MethodRef, MirrorRef>,
    methods: HashMap<MethodRef, MethodSpec>,
    attrs: HashMap<(i32, bool), FieldAttributes>,
    resolutions: HashMap<(MessageType, i32), ScriptedResolution>,
    signatures: HashMap<(MessageType, i32), SignatureAnswer>,
    classes: HashMap<(MessageType, i32), ClassRef>,
    names: HashMap<i32, String>,
    rom_strings: HashMap<(u64, Vec<u64>), String>,
    snapshots: HashMap<ClassRef, Bytes>,
    unresolved_cp: HashMap<(MessageType, i32), bool>,
}

impl ScriptedProvider {
    pub fn new() -> (Self, Receiver<MessageType>) {
        let (log, log_rx) = unbounded();
        let provider = Self {
            log,
            next_mirror: 0x1000,
            mirrors: HashMap::new(),
            methods: HashMap::new(),
            attrs: HashMap::new(),
            resolutions: HashMap::new(),
            signatures: HashMap::new(),
            classes: HashMap::new(),
            names: HashMap::new(),
            rom_strings: HashMap::new(),
            snapshots: HashMap::new(),
            unresolved_cp: HashMap::new(),
        };
        (provider, log_rx)
    }

    pub fn add_method(&mut self, spec: MethodSpec) {
        self.methods.insert(spec.method, spec);
    }

    pub fn script_field_attributes(&mut self, cp_index: i32, is_static: bool, attrs: FieldAttributes) {
        self.attrs.insert((cp_index, is_static), attrs);
    }

    pub fn script_resolution(
        &mut self,
        kind: MessageType,
        index: i32,
        method: MethodRef,
        vtable_slot: u32,
    ) {
        self.resolutions.insert(
            (kind, index),
            ScriptedResolution {
                method: Some(method),
                vtable_slot,
                unresolved_in_cp: false,
            },
        );
    }

    pub fn script_unresolved(&mut self, kind: MessageType, index: i32) {
        self.resolutions.insert(
            (kind, index),
            ScriptedResolution {
                method: None,
                vtable_slot: 0,
                unresolved_in_cp: true,
            },
        );
    }

    pub fn script_signature_resolution(
        &mut self,
        kind: MessageType,
        index: i32,
        method: MethodRef,
        signature: &str,
    ) {
        self.signatures.insert(
            (kind, index),
            SignatureAnswer {
                method: Some(method),
                signature: signature.to_string(),
                unresolved_in_cp: false,
            },
        );
    }

    pub fn script_class(&mut self, kind: MessageType, cp_index: i32, class: ClassRef) {
        self.classes.insert((kind, cp_index), class);
    }

    pub fn script_name(&mut self, cp_index: i32, name: &str) {
        self.names.insert(cp_index, name.to_string());
    }

    pub fn script_rom_string(&mut self, base: u64, offsets: Vec<u64>, value: &str) {
        self.rom_strings.insert((base, offsets), value.to_string());
    }

    pub fn script_snapshot(&mut self, class: ClassRef, image: Bytes) {
        self.snapshots.insert(class, image);
    }

    pub fn script_unresolved_in_cp(&mut self, kind: MessageType, cp_index: i32, unresolved: bool) {
        self.unresolved_cp.insert((kind, cp_index), unresolved);
    }

    fn note(&self, kind: MessageType) {
        let _ = self.log.send(kind);
    }

    fn mint_mirror(&mut self, method: MethodRef) -> MirrorRef {
        if let Some(mirror) = self.mirrors.get(&method) {
            return *mirror;
        }
        let mirror = MirrorRef::new(self.next_mirror);
        self.next_mirror += 0x10;
        self.mirrors.insert(method, mirror);
        mirror
    }

    fn snapshot_of(&mut self, method: MethodRef) -> MethodInfo {
        let mirror = Some(self.mint_mirror(method));
        let spec = self
            .methods
            .get(&method)
            .unwrap_or_else(|| panic!("no scripted method {method:?}"));
        MethodInfo {
            mirror,
            cp: spec.cp,
            owning_class: spec.owning_class,
            loader: LoaderRef::new(0x6000),
            method_index: 0,
            is_interpreted: true,
            is_jni_native: false,
            is_private: spec.is_private,
            is_overridden: false,
            is_var_handle_access: spec.is_var_handle_access,
            start_address: 0,
            override_bit_address: 0,
            jni_target: 0,
            signature: spec.signature.clone(),
            body_info: Bytes::new(),
            persistent_info: Bytes::new(),
        }
    }

    fn resolution_answer(&mut self, kind: MessageType, index: i32) -> ResolutionAnswer {
        let Some(&ScriptedResolution {
            method,
            vtable_slot,
            unresolved_in_cp,
        }) = self.resolutions.get(&(kind, index))
        else {
            return ResolutionAnswer::not_found();
        };
        match method {
            Some(method) => {
                let info = self.snapshot_of(method);
                ResolutionAnswer {
                    method: Some(method),
                    vtable_slot,
                    unresolved_in_cp: false,
                    info: Some(info),
                }
            }
            None if unresolved_in_cp => ResolutionAnswer::unresolved(),
            None => ResolutionAnswer::not_found(),
        }
    }
}

impl MetadataProvider for ScriptedProvider {
    fn mirror_method(&mut self, ident: MethodIdent, _for_aot: bool) -> MethodInfo {
        self.note(MessageType::MirrorMethod);
        self.snapshot_of(ident.method)
    }

    fn ensure_mirror(&mut self, mirror: Option<MirrorRef>, ident: MethodIdent) -> Option<MirrorRef> {
        mirror.or_else(|| Some(self.mint_mirror(ident.method)))
    }

    fn field_attributes(
        &mut self,
        _ident: MethodIdent,
        cp_index: i32,
        _is_store: bool,
        _need_aot_validation: bool,
    ) -> FieldAttributes {
        self.note(MessageType::FieldAttributes);
        *self
            .attrs
            .get(&(cp_index, false))
            .unwrap_or_else(|| panic!("no scripted field attributes for cp {cp_index}"))
    }

    fn static_attributes(
        &mut self,
        _ident: MethodIdent,
        cp_index: i32,
        _is_store: bool,
        _need_aot_validation: bool,
    ) -> FieldAttributes {
        self.note(MessageType::StaticAttributes);
        *self
            .attrs
            .get(&(cp_index, true))
            .unwrap_or_else(|| panic!("no scripted static attributes for cp {cp_index}"))
    }

    fn resolved_virtual_method(
        &mut self,
        _ident: MethodIdent,
        cp_index: i32,
        _ignore_rt_resolve: bool,
    ) -> ResolutionAnswer {
        self.note(MessageType::ResolvedVirtualMethod);
        self.resolution_answer(MessageType::ResolvedVirtualMethod, cp_index)
    }

    fn resolved_virtual_method_from_offset(
        &mut self,
        _ident: MethodIdent,
        _class: ClassRef,
        offset: u32,
        _ignore_rt_resolve: bool,
    ) -> ResolutionAnswer {
        self.note(MessageType::ResolvedVirtualFromOffset);
        self.resolution_answer(MessageType::ResolvedVirtualFromOffset, offset as i32)
    }

    fn resolved_static_method(&mut self, _ident: MethodIdent, cp_index: i32) -> ResolutionAnswer {
        self.note(MessageType::ResolvedStaticMethod);
        self.resolution_answer(MessageType::ResolvedStaticMethod, cp_index)
    }

    fn resolved_special_method(&mut self, _ident: MethodIdent, cp_index: i32) -> ResolutionAnswer {
        self.note(MessageType::ResolvedSpecialMethod);
        self.resolution_answer(MessageType::ResolvedSpecialMethod, cp_index)
    }

    fn resolved_interface_method(
        &mut self,
        _ident: MethodIdent,
        _class: ClassRef,
        cp_index: i32,
    ) -> ResolutionAnswer {
        self.note(MessageType::ResolvedInterfaceMethod);
        self.resolution_answer(MessageType::ResolvedInterfaceMethod, cp_index)
    }

    fn resolved_improper_interface_method(
        &mut self,
        _ident: MethodIdent,
        cp_index: i32,
    ) -> ResolutionAnswer {
        self.note(MessageType::ResolvedImproperInterfaceMethod);
        self.resolution_answer(MessageType::ResolvedImproperInterfaceMethod, cp_index)
    }

    fn resolved_dynamic_method(
        &mut self,
        _ident: MethodIdent,
        callsite_index: i32,
    ) -> SignatureAnswer {
        self.note(MessageType::ResolvedDynamicMethod);
        self.signatures
            .get(&(MessageType::ResolvedDynamicMethod, callsite_index))
            .cloned()
            .unwrap_or_else(SignatureAnswer::unresolved)
    }

    fn resolved_handle_method(&mut self, _ident: MethodIdent, cp_index: i32) -> SignatureAnswer {
        self.note(MessageType::ResolvedHandleMethod);
        self.signatures
            .get(&(MessageType::ResolvedHandleMethod, cp_index))
            .cloned()
            .unwrap_or_else(SignatureAnswer::unresolved)
    }

    fn class_from_cp(
        &mut self,
        _ident: MethodIdent,
        cp_index: i32,
        _for_aot: bool,
    ) -> Option<ClassRef> {
        self.note(MessageType::ClassFromCp);
        self.classes.get(&(MessageType::ClassFromCp, cp_index)).copied()
    }

    fn class_of_static(
        &mut self,
        _ident: MethodIdent,
        cp_index: i32,
        _for_aot: bool,
    ) -> Option<ClassRef> {
        self.note(MessageType::ClassOfStatic);
        self.classes.get(&(MessageType::ClassOfStatic, cp_index)).copied()
    }

    fn declaring_class_from_field_or_static(
        &mut self,
        _ident: MethodIdent,
        cp_index: i32,
    ) -> Option<ClassRef> {
        self.note(MessageType::DeclaringClassFromFieldOrStatic);
        self.classes
            .get(&(MessageType::DeclaringClassFromFieldOrStatic, cp_index))
            .copied()
    }

    fn field_or_static_name(&mut self, _ident: MethodIdent, cp_index: i32) -> String {
        self.note(MessageType::FieldOrStaticName);
        self.names
            .get(&cp_index)
            .cloned()
            .unwrap_or_else(|| panic!("no scripted name for cp {cp_index}"))
    }

    fn rom_string(&mut self, _ident: MethodIdent, base: u64, offsets: Vec<u64>) -> String {
        self.note(MessageType::RomString);
        self.rom_strings
            .get(&(base, offsets))
            .cloned()
            .unwrap_or_else(|| panic!("no scripted rom string at base {base:#x}"))
    }

    fn rom_snapshot(&mut self, class: ClassRef) -> Bytes {
        self.note(MessageType::RomSnapshot);
        self.snapshots
            .get(&class)
            .cloned()
            .unwrap_or_else(|| Bytes::from_static(b"<rom image>"))
    }

    fn is_unresolved_static_in_cp(&mut self, _ident: MethodIdent, cp_index: i32) -> bool {
        self.note(MessageType::UnresolvedStaticInCp);
        self.unresolved_cp
            .get(&(MessageType::UnresolvedStaticInCp, cp_index))
            .copied()
            .unwrap_or(false)
    }

    fn is_unresolved_special_in_cp(&mut self, _ident: MethodIdent, cp_index: i32) -> bool {
        self.note(MessageType::UnresolvedSpecialInCp);
        self.unresolved_cp
            .get(&(MessageType::UnresolvedSpecialInCp, cp_index))
            .copied()
            .unwrap_or(false)
    }
}

/// Responder running on its own thread, the way a client process would.
pub struct ResponderHandle {
    join: JoinHandle<Result<(), StreamError>>,
}

impl ResponderHandle {
    pub fn join(self) -> Result<(), StreamError> {
        self.join.join().expect("responder thread panicked")
    }
}

pub fn spawn_responder(stream: ClientStream<PipeEnd>, provider: ScriptedProvider) -> ResponderHandle {
    let join = thread::spawn(move || {
        let mut responder = ClientResponder::new(stream, provider);
        responder.serve_until_disconnect()
    });
    ResponderHandle { join }
}

/// Ledger that records everything and can be told to reject everything.
pub struct ScriptedLedger {
    reject_all: bool,
    recorded: Vec<ValidationRecord>,
}

impl ScriptedLedger {
    pub fn accepting() -> Self {
        Self {
            reject_all: false,
            recorded: Vec::new(),
        }
    }

    pub fn rejecting() -> Self {
        Self {
            reject_all: true,
            recorded: Vec::new(),
        }
    }

    pub fn recorded(&self) -> &[ValidationRecord] {
        &self.recorded
    }
}

impl ValidationLedger for ScriptedLedger {
    fn record(&mut self, record: ValidationRecord) -> bool {
        self.recorded.push(record);
        !self.reject_all
    }
}

/// Drain every query kind logged so far.
pub fn drain_log(log: &Receiver<MessageType>) -> Vec<MessageType> {
    log.try_iter().collect()
}

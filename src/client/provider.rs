//! Interface to the client's authoritative metadata.

use bytes::Bytes;

use crate::core::{ClassRef, FieldAttributes, MethodIdent, MethodInfo, MethodRef, MirrorRef};

/// Answer to a resolution query. `info` is present exactly when `method`
/// is; an absent info rides the wire as [`MethodInfo::absent`].
#[derive(Debug, Clone)]
pub struct ResolutionAnswer {
    pub method: Option<MethodRef>,
    pub vtable_slot: u32,
    pub unresolved_in_cp: bool,
    pub info: Option<MethodInfo>,
}

impl ResolutionAnswer {
    pub fn not_found() -> Self {
        Self {
            method: None,
            vtable_slot: 0,
            unresolved_in_cp: false,
            info: None,
        }
    }

    pub fn unresolved() -> Self {
        Self {
            method: None,
            vtable_slot: 0,
            unresolved_in_cp: true,
            info: None,
        }
    }

    pub fn resolved(method: MethodRef, vtable_slot: u32, info: MethodInfo) -> Self {
        Self {
            method: Some(method),
            vtable_slot,
            unresolved_in_cp: false,
            info: Some(info),
        }
    }
}

/// Answer to a signature-based (dynamic or handle) resolution query.
#[derive(Debug, Clone)]
pub struct SignatureAnswer {
    pub method: Option<MethodRef>,
    pub signature: String,
    pub unresolved_in_cp: bool,
}

impl SignatureAnswer {
    pub fn unresolved() -> Self {
        Self {
            method: None,
            signature: String::new(),
            unresolved_in_cp: true,
        }
    }
}

/// What the client VM's metadata layer must answer. One method per query
/// in the protocol; the responder does the wire work. Answers are
/// authoritative and infallible; a client that cannot answer has already
/// lost the state the server is asking about and should drop the
/// connection instead.
pub trait MetadataProvider {
    /// Find or create the client-side mirror for a method and snapshot it.
    fn mirror_method(&mut self, ident: MethodIdent, for_aot: bool) -> MethodInfo;

    /// Mirror token to attach to a reply: echo the server's token, or mint
    /// one from the coordinates when the server lost it.
    fn ensure_mirror(&mut self, mirror: Option<MirrorRef>, ident: MethodIdent) -> Option<MirrorRef> {
        let _ = ident;
        mirror
    }

    fn field_attributes(
        &mut self,
        ident: MethodIdent,
        cp_index: i32,
        is_store: bool,
        need_aot_validation: bool,
    ) -> FieldAttributes;

    fn static_attributes(
        &mut self,
        ident: MethodIdent,
        cp_index: i32,
        is_store: bool,
        need_aot_validation: bool,
    ) -> FieldAttributes;

    fn resolved_virtual_method(
        &mut self,
        ident: MethodIdent,
        cp_index: i32,
        ignore_rt_resolve: bool,
    ) -> ResolutionAnswer;

    fn resolved_virtual_method_from_offset(
        &mut self,
        ident: MethodIdent,
        class: ClassRef,
        offset: u32,
        ignore_rt_resolve: bool,
    ) -> ResolutionAnswer;

    fn resolved_static_method(&mut self, ident: MethodIdent, cp_index: i32) -> ResolutionAnswer;

    fn resolved_special_method(&mut self, ident: MethodIdent, cp_index: i32) -> ResolutionAnswer;

    fn resolved_interface_method(
        &mut self,
        ident: MethodIdent,
        class: ClassRef,
        cp_index: i32,
    ) -> ResolutionAnswer;

    fn resolved_improper_interface_method(
        &mut self,
        ident: MethodIdent,
        cp_index: i32,
    ) -> ResolutionAnswer;

    fn resolved_dynamic_method(&mut self, ident: MethodIdent, callsite_index: i32)
        -> SignatureAnswer;

    fn resolved_handle_method(&mut self, ident: MethodIdent, cp_index: i32) -> SignatureAnswer;

    fn class_from_cp(&mut self, ident: MethodIdent, cp_index: i32, for_aot: bool)
        -> Option<ClassRef>;

    fn class_of_static(
        &mut self,
        ident: MethodIdent,
        cp_index: i32,
        for_aot: bool,
    ) -> Option<ClassRef>;

    fn declaring_class_from_field_or_static(
        &mut self,
        ident: MethodIdent,
        cp_index: i32,
    ) -> Option<ClassRef>;

    fn field_or_static_name(&mut self, ident: MethodIdent, cp_index: i32) -> String;

    fn rom_string(&mut self, ident: MethodIdent, base: u64, offsets: Vec<u64>) -> String;

    /// Read-only metadata image of a class, sent once per session.
    fn rom_snapshot(&mut self, class: ClassRef) -> Bytes;

    fn is_unresolved_static_in_cp(&mut self, ident: MethodIdent, cp_index: i32) -> bool;

    fn is_unresolved_special_in_cp(&mut self, ident: MethodIdent, cp_index: i32) -> bool;
}

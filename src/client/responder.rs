//! Client-side query loop.

use std::io::{Read, Write};

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::core::{ClassRef, MethodIdent, MethodInfo, MirrorRef};
use crate::net::{ClientStream, Message, MessageType, StreamError, WireArgs};
use crate::server::{CompileOutcome, CompileRequest};

use super::provider::MetadataProvider;

/// Drives a [`ClientStream`], answering every server query from a
/// [`MetadataProvider`] with the wire shape the server expects.
pub struct ClientResponder<C, P> {
    stream: ClientStream<C>,
    provider: P,
}

impl<C: Read + Write, P: MetadataProvider> ClientResponder<C, P> {
    pub fn new(stream: ClientStream<C>, provider: P) -> Self {
        Self { stream, provider }
    }

    /// Answer queries until the server closes the connection. A clean close
    /// at a message boundary ends the loop without error.
    pub fn serve_until_disconnect(&mut self) -> Result<(), StreamError> {
        info!("answering metadata queries");
        while let Some(msg) = self.stream.read_message()? {
            self.serve_one(msg)?;
        }
        Ok(())
    }

    /// Ask the server to compile, answering its queries until the result
    /// arrives.
    pub fn request_compilation(
        &mut self,
        request: &CompileRequest,
    ) -> Result<CompileOutcome, StreamError> {
        self.stream.send_request((
            request.method,
            request.class,
            request.client_id,
            request.opt_level,
            request.aot,
            request.detail.clone(),
        ))?;
        loop {
            let Some(msg) = self.stream.read_message()? else {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "server closed during compilation",
                )
                .into());
            };
            if msg.kind() == MessageType::CompileResult {
                let (status, code, data, log) = <(u32, Bytes, Bytes, String)>::unpack(msg)?;
                return Ok(CompileOutcome {
                    status,
                    code,
                    data,
                    log,
                });
            }
            self.serve_one(msg)?;
        }
    }

    /// Tell the server this client is going away, then let the caller drop
    /// the stream.
    pub fn terminate(&mut self, client_id: u64) -> Result<(), StreamError> {
        self.stream.terminate(client_id)
    }

    fn serve_one(&mut self, msg: Message) -> Result<(), StreamError> {
        let kind = msg.kind();
        debug!(kind = ?kind, "metadata query");
        match kind {
            MessageType::MirrorMethod => {
                let (ident, for_aot) = <(MethodIdent, bool)>::unpack(msg)?;
                let info = self.provider.mirror_method(ident, for_aot);
                self.stream.reply(kind, (info,))
            }
            MessageType::FieldAttributes | MessageType::StaticAttributes => {
                let (mirror, ident, cp_index, is_store, need_aot_validation) =
                    <(Option<MirrorRef>, MethodIdent, i32, bool, bool)>::unpack(msg)?;
                let attrs = if kind == MessageType::StaticAttributes {
                    self.provider
                        .static_attributes(ident, cp_index, is_store, need_aot_validation)
                } else {
                    self.provider
                        .field_attributes(ident, cp_index, is_store, need_aot_validation)
                };
                let mirror = self.provider.ensure_mirror(mirror, ident);
                self.stream.reply(kind, (attrs, mirror))
            }
            MessageType::ResolvedVirtualMethod => {
                let (mirror, ident, cp_index, ignore_rt_resolve) =
                    <(Option<MirrorRef>, MethodIdent, i32, bool)>::unpack(msg)?;
                let answer = self
                    .provider
                    .resolved_virtual_method(ident, cp_index, ignore_rt_resolve);
                let mirror = self.provider.ensure_mirror(mirror, ident);
                self.stream.reply(
                    kind,
                    (
                        answer.method,
                        answer.vtable_slot,
                        answer.unresolved_in_cp,
                        answer.info.unwrap_or_else(MethodInfo::absent),
                        mirror,
                    ),
                )
            }
            MessageType::ResolvedVirtualFromOffset => {
                let (mirror, ident, class, offset, ignore_rt_resolve) =
                    <(Option<MirrorRef>, MethodIdent, ClassRef, u32, bool)>::unpack(msg)?;
                let answer = self.provider.resolved_virtual_method_from_offset(
                    ident,
                    class,
                    offset,
                    ignore_rt_resolve,
                );
                let mirror = self.provider.ensure_mirror(mirror, ident);
                self.stream.reply(
                    kind,
                    (
                        answer.method,
                        answer.info.unwrap_or_else(MethodInfo::absent),
                        mirror,
                    ),
                )
            }
            MessageType::ResolvedStaticMethod | MessageType::ResolvedSpecialMethod => {
                let (mirror, ident, cp_index) =
                    <(Option<MirrorRef>, MethodIdent, i32)>::unpack(msg)?;
                let answer = if kind == MessageType::ResolvedStaticMethod {
                    self.provider.resolved_static_method(ident, cp_index)
                } else {
                    self.provider.resolved_special_method(ident, cp_index)
                };
                let mirror = self.provider.ensure_mirror(mirror, ident);
                self.stream.reply(
                    kind,
                    (
                        answer.method,
                        answer.unresolved_in_cp,
                        answer.info.unwrap_or_else(MethodInfo::absent),
                        mirror,
                    ),
                )
            }
            MessageType::ResolvedInterfaceMethod => {
                let (mirror, ident, class, cp_index) =
                    <(Option<MirrorRef>, MethodIdent, ClassRef, i32)>::unpack(msg)?;
                let answer = self.provider.resolved_interface_method(ident, class, cp_index);
                let mirror = self.provider.ensure_mirror(mirror, ident);
                self.stream.reply(
                    kind,
                    (
                        answer.method.is_some(),
                        answer.method,
                        answer.vtable_slot,
                        answer.info.unwrap_or_else(MethodInfo::absent),
                        mirror,
                    ),
                )
            }
            MessageType::ResolvedImproperInterfaceMethod => {
                let (mirror, ident, cp_index) =
                    <(Option<MirrorRef>, MethodIdent, i32)>::unpack(msg)?;
                let answer = self
                    .provider
                    .resolved_improper_interface_method(ident, cp_index);
                let mirror = self.provider.ensure_mirror(mirror, ident);
                self.stream.reply(
                    kind,
                    (
                        answer.method,
                        answer.vtable_slot,
                        answer.info.unwrap_or_else(MethodInfo::absent),
                        mirror,
                    ),
                )
            }
            MessageType::ResolvedDynamicMethod | MessageType::ResolvedHandleMethod => {
                let (_mirror, ident, index) =
                    <(Option<MirrorRef>, MethodIdent, i32)>::unpack(msg)?;
                let answer = if kind == MessageType::ResolvedDynamicMethod {
                    self.provider.resolved_dynamic_method(ident, index)
                } else {
                    self.provider.resolved_handle_method(ident, index)
                };
                self.stream
                    .reply(kind, (answer.method, answer.signature, answer.unresolved_in_cp))
            }
            MessageType::ClassFromCp | MessageType::ClassOfStatic => {
                let (_mirror, ident, cp_index, for_aot) =
                    <(Option<MirrorRef>, MethodIdent, i32, bool)>::unpack(msg)?;
                let class = if kind == MessageType::ClassOfStatic {
                    self.provider.class_of_static(ident, cp_index, for_aot)
                } else {
                    self.provider.class_from_cp(ident, cp_index, for_aot)
                };
                self.stream.reply(kind, (class,))
            }
            MessageType::DeclaringClassFromFieldOrStatic => {
                let (_mirror, ident, cp_index) =
                    <(Option<MirrorRef>, MethodIdent, i32)>::unpack(msg)?;
                let class = self
                    .provider
                    .declaring_class_from_field_or_static(ident, cp_index);
                self.stream.reply(kind, (class,))
            }
            MessageType::FieldOrStaticName => {
                let (_mirror, ident, cp_index) =
                    <(Option<MirrorRef>, MethodIdent, i32)>::unpack(msg)?;
                let name = self.provider.field_or_static_name(ident, cp_index);
                self.stream.reply(kind, (name,))
            }
            MessageType::RomString => {
                let (_mirror, ident, base, offsets) =
                    <(Option<MirrorRef>, MethodIdent, u64, Vec<u64>)>::unpack(msg)?;
                let value = self.provider.rom_string(ident, base, offsets);
                self.stream.reply(kind, (value,))
            }
            MessageType::RomSnapshot => {
                let (class,) = <(ClassRef,)>::unpack(msg)?;
                let blob = self.provider.rom_snapshot(class);
                self.stream.reply(kind, (blob,))
            }
            MessageType::UnresolvedStaticInCp | MessageType::UnresolvedSpecialInCp => {
                let (_mirror, ident, cp_index) =
                    <(Option<MirrorRef>, MethodIdent, i32)>::unpack(msg)?;
                let unresolved = if kind == MessageType::UnresolvedStaticInCp {
                    self.provider.is_unresolved_static_in_cp(ident, cp_index)
                } else {
                    self.provider.is_unresolved_special_in_cp(ident, cp_index)
                };
                self.stream.reply(kind, (unresolved,))
            }
            MessageType::CompileRequest
            | MessageType::CompileResult
            | MessageType::CompileAbort
            | MessageType::ClientTerminate => {
                warn!(kind = ?kind, "session control message in the query stream");
                Err(StreamError::TypeMismatch {
                    expected: None,
                    found: kind,
                })
            }
        }
    }
}

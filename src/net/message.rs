//! Message envelope: packed metadata plus ordered data points.

use super::error::CodecError;
use super::wire::WireValue;

/// Serialized metadata length: point count (2) + type (4) + version (8).
pub const META_LEN: usize = 14;

/// Every request and reply kind in the compile protocol. Session control
/// sits below 16; metadata queries start at 16.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    CompileRequest,
    CompileResult,
    CompileAbort,
    ClientTerminate,
    MirrorMethod,
    FieldAttributes,
    StaticAttributes,
    ResolvedVirtualMethod,
    ResolvedVirtualFromOffset,
    ResolvedStaticMethod,
    ResolvedSpecialMethod,
    ResolvedInterfaceMethod,
    ResolvedImproperInterfaceMethod,
    ResolvedDynamicMethod,
    ResolvedHandleMethod,
    ClassFromCp,
    ClassOfStatic,
    DeclaringClassFromFieldOrStatic,
    FieldOrStaticName,
    RomString,
    RomSnapshot,
    UnresolvedStaticInCp,
    UnresolvedSpecialInCp,
}

impl MessageType {
    pub fn code(self) -> u32 {
        match self {
            MessageType::CompileRequest => 0,
            MessageType::CompileResult => 1,
            MessageType::CompileAbort => 2,
            MessageType::ClientTerminate => 3,
            MessageType::MirrorMethod => 16,
            MessageType::FieldAttributes => 17,
            MessageType::StaticAttributes => 18,
            MessageType::ResolvedVirtualMethod => 19,
            MessageType::ResolvedVirtualFromOffset => 20,
            MessageType::ResolvedStaticMethod => 21,
            MessageType::ResolvedSpecialMethod => 22,
            MessageType::ResolvedInterfaceMethod => 23,
            MessageType::ResolvedImproperInterfaceMethod => 24,
            MessageType::ResolvedDynamicMethod => 25,
            MessageType::ResolvedHandleMethod => 26,
            MessageType::ClassFromCp => 27,
            MessageType::ClassOfStatic => 28,
            MessageType::DeclaringClassFromFieldOrStatic => 29,
            MessageType::FieldOrStaticName => 30,
            MessageType::RomString => 31,
            MessageType::RomSnapshot => 32,
            MessageType::UnresolvedStaticInCp => 33,
            MessageType::UnresolvedSpecialInCp => 34,
        }
    }

    pub fn from_code(code: u32) -> Result<Self, CodecError> {
        Ok(match code {
            0 => MessageType::CompileRequest,
            1 => MessageType::CompileResult,
            2 => MessageType::CompileAbort,
            3 => MessageType::ClientTerminate,
            16 => MessageType::MirrorMethod,
            17 => MessageType::FieldAttributes,
            18 => MessageType::StaticAttributes,
            19 => MessageType::ResolvedVirtualMethod,
            20 => MessageType::ResolvedVirtualFromOffset,
            21 => MessageType::ResolvedStaticMethod,
            22 => MessageType::ResolvedSpecialMethod,
            23 => MessageType::ResolvedInterfaceMethod,
            24 => MessageType::ResolvedImproperInterfaceMethod,
            25 => MessageType::ResolvedDynamicMethod,
            26 => MessageType::ResolvedHandleMethod,
            27 => MessageType::ClassFromCp,
            28 => MessageType::ClassOfStatic,
            29 => MessageType::DeclaringClassFromFieldOrStatic,
            30 => MessageType::FieldOrStaticName,
            31 => MessageType::RomString,
            32 => MessageType::RomSnapshot,
            33 => MessageType::UnresolvedStaticInCp,
            34 => MessageType::UnresolvedSpecialInCp,
            _ => return Err(CodecError::UnknownMessageType { code }),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageMeta {
    pub point_count: u16,
    pub kind: MessageType,
    pub version: u64,
}

/// One protocol message. `push` keeps the declared point count and the
/// actual points in lockstep; deserialization re-checks the pairing.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    meta: MessageMeta,
    points: Vec<WireValue>,
}

impl Message {
    pub fn new(kind: MessageType) -> Self {
        Self {
            meta: MessageMeta {
                point_count: 0,
                kind,
                version: 0,
            },
            points: Vec::new(),
        }
    }

    pub(crate) fn from_parts(meta: MessageMeta, points: Vec<WireValue>) -> Self {
        debug_assert_eq!(meta.point_count as usize, points.len());
        Self { meta, points }
    }

    pub fn kind(&self) -> MessageType {
        self.meta.kind
    }

    pub fn version(&self) -> u64 {
        self.meta.version
    }

    pub fn set_version(&mut self, version: u64) {
        self.meta.version = version;
    }

    pub fn point_count(&self) -> u16 {
        self.meta.point_count
    }

    pub fn points(&self) -> &[WireValue] {
        &self.points
    }

    pub fn push(&mut self, value: WireValue) {
        self.points.push(value);
        self.meta.point_count += 1;
    }

    pub fn into_points(self) -> Vec<WireValue> {
        self.points
    }
}

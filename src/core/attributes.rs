//! Field and static attribute answers.

use crate::net::convert::{kind_mismatch, TupleReader, WireItem};
use crate::net::error::CodecError;
use crate::net::wire::{DataKind, WireValue};

/// Primitive datatype of a resolved field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Float,
    Double,
    Address,
}

impl PrimitiveKind {
    pub fn code(self) -> u32 {
        match self {
            PrimitiveKind::Bool => 0,
            PrimitiveKind::Int8 => 1,
            PrimitiveKind::Int16 => 2,
            PrimitiveKind::Int32 => 3,
            PrimitiveKind::Int64 => 4,
            PrimitiveKind::Float => 5,
            PrimitiveKind::Double => 6,
            PrimitiveKind::Address => 7,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            0 => PrimitiveKind::Bool,
            1 => PrimitiveKind::Int8,
            2 => PrimitiveKind::Int16,
            3 => PrimitiveKind::Int32,
            4 => PrimitiveKind::Int64,
            5 => PrimitiveKind::Float,
            6 => PrimitiveKind::Double,
            7 => PrimitiveKind::Address,
            _ => return None,
        })
    }
}

impl WireItem for PrimitiveKind {
    fn into_wire(self) -> WireValue {
        WireValue::Uint32(self.code())
    }

    fn from_wire(value: WireValue) -> Result<Self, CodecError> {
        match value {
            WireValue::Uint32(code) => PrimitiveKind::from_code(code)
                .ok_or(CodecError::MissingValue {
                    what: "primitive kind code",
                }),
            other => Err(kind_mismatch(DataKind::Uint32, &other)),
        }
    }
}

/// Answer to a field or static attribute query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldAttributes {
    /// Instance field offset; for statics, the storage address.
    pub offset: u64,
    pub kind: PrimitiveKind,
    pub is_volatile: bool,
    pub is_final: bool,
    pub is_private: bool,
    /// The constant pool entry was still unresolved when answered.
    pub unresolved_in_cp: bool,
    pub resolved: bool,
}

impl FieldAttributes {
    /// Conservative adjustment for relocatable compilations: when resolution
    /// could not be proven, the field must be treated as volatile and
    /// neither final nor private.
    pub fn harden_unresolved(&mut self) {
        if !self.resolved {
            self.is_volatile = true;
            self.is_final = false;
            self.is_private = false;
        }
    }
}

impl WireItem for FieldAttributes {
    fn into_wire(self) -> WireValue {
        WireValue::Tuple(vec![
            self.offset.into_wire(),
            self.kind.into_wire(),
            self.is_volatile.into_wire(),
            self.is_final.into_wire(),
            self.is_private.into_wire(),
            self.unresolved_in_cp.into_wire(),
            self.resolved.into_wire(),
        ])
    }

    fn from_wire(value: WireValue) -> Result<Self, CodecError> {
        let mut fields = TupleReader::new(value, 7)?;
        Ok(Self {
            offset: fields.item()?,
            kind: fields.item()?,
            is_volatile: fields.item()?,
            is_final: fields.item()?,
            is_private: fields.item()?,
            unresolved_in_cp: fields.item()?,
            resolved: fields.item()?,
        })
    }
}

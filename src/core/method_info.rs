//! Packed method snapshots exchanged by the mirroring protocol.

use bytes::Bytes;

use crate::net::convert::{TupleReader, WireItem};
use crate::net::error::CodecError;
use crate::net::wire::WireValue;

use super::handle::{ClassRef, CpRef, LoaderRef, MethodRef, MirrorRef};

/// Coordinates the client needs to find or recreate a mirror: the method,
/// the mirror of the method that discovered it, and its vtable slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodIdent {
    pub method: MethodRef,
    pub owner_mirror: Option<MirrorRef>,
    pub vtable_slot: u32,
}

impl WireItem for MethodIdent {
    fn into_wire(self) -> WireValue {
        WireValue::Tuple(vec![
            self.method.into_wire(),
            self.owner_mirror.into_wire(),
            self.vtable_slot.into_wire(),
        ])
    }

    fn from_wire(value: WireValue) -> Result<Self, CodecError> {
        let mut fields = TupleReader::new(value, 3)?;
        Ok(Self {
            method: fields.item()?,
            owner_mirror: fields.item()?,
            vtable_slot: fields.item()?,
        })
    }
}

/// Everything a mirror caches about one method, filled by a single
/// mirroring round trip.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodInfo {
    pub mirror: Option<MirrorRef>,
    pub cp: CpRef,
    pub owning_class: ClassRef,
    pub loader: LoaderRef,
    pub method_index: u32,
    pub is_interpreted: bool,
    pub is_jni_native: bool,
    pub is_private: bool,
    pub is_overridden: bool,
    pub is_var_handle_access: bool,
    pub start_address: u64,
    pub override_bit_address: u64,
    pub jni_target: u64,
    pub signature: String,
    /// Opaque body-info snapshot, transported and cached by identity only.
    pub body_info: Bytes,
    /// Opaque persistent-info snapshot.
    pub persistent_info: Bytes,
}

impl MethodInfo {
    /// Placeholder carried by replies whose method slot is absent.
    pub fn absent() -> Self {
        Self {
            mirror: None,
            cp: CpRef::new(0),
            owning_class: ClassRef::new(0),
            loader: LoaderRef::new(0),
            method_index: 0,
            is_interpreted: false,
            is_jni_native: false,
            is_private: false,
            is_overridden: false,
            is_var_handle_access: false,
            start_address: 0,
            override_bit_address: 0,
            jni_target: 0,
            signature: String::new(),
            body_info: Bytes::new(),
            persistent_info: Bytes::new(),
        }
    }
}

impl WireItem for MethodInfo {
    fn into_wire(self) -> WireValue {
        WireValue::Tuple(vec![
            self.mirror.into_wire(),
            self.cp.into_wire(),
            self.owning_class.into_wire(),
            self.loader.into_wire(),
            self.method_index.into_wire(),
            self.is_interpreted.into_wire(),
            self.is_jni_native.into_wire(),
            self.is_private.into_wire(),
            self.is_overridden.into_wire(),
            self.is_var_handle_access.into_wire(),
            self.start_address.into_wire(),
            self.override_bit_address.into_wire(),
            self.jni_target.into_wire(),
            self.signature.into_wire(),
            self.body_info.into_wire(),
            self.persistent_info.into_wire(),
        ])
    }

    fn from_wire(value: WireValue) -> Result<Self, CodecError> {
        let mut fields = TupleReader::new(value, 16)?;
        Ok(Self {
            mirror: fields.item()?,
            cp: fields.item()?,
            owning_class: fields.item()?,
            loader: fields.item()?,
            method_index: fields.item()?,
            is_interpreted: fields.item()?,
            is_jni_native: fields.item()?,
            is_private: fields.item()?,
            is_overridden: fields.item()?,
            is_var_handle_access: fields.item()?,
            start_address: fields.item()?,
            override_bit_address: fields.item()?,
            jni_target: fields.item()?,
            signature: fields.item()?,
            body_info: fields.item()?,
            persistent_info: fields.item()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_round_trips_with_blobs() {
        let info = MethodInfo {
            mirror: Some(MirrorRef::new(0x1000)),
            cp: CpRef::new(2),
            owning_class: ClassRef::new(3),
            loader: LoaderRef::new(4),
            method_index: 5,
            is_interpreted: true,
            is_jni_native: false,
            is_private: false,
            is_overridden: true,
            is_var_handle_access: false,
            start_address: 0xBEEF,
            override_bit_address: 0xFEED,
            jni_target: 0,
            signature: "(I)V".to_string(),
            body_info: Bytes::from_static(&[9, 8, 7]),
            persistent_info: Bytes::new(),
        };
        let decoded = MethodInfo::from_wire(info.clone().into_wire()).unwrap();
        assert_eq!(decoded, info);
    }

    #[test]
    fn short_tuple_is_arity_error() {
        let err = MethodInfo::from_wire(WireValue::Tuple(vec![WireValue::Uint64(1)])).unwrap_err();
        assert!(matches!(err, CodecError::Arity { declared: 1, requested: 16 }));
    }
}

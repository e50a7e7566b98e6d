//! Opaque identities minted by the client VM.
//!
//! The server never dereferences any of these. They are cache keys and RPC
//! arguments; zero is reserved to mean "absent" on the wire.

use crate::net::convert::{kind_mismatch, WireItem};
use crate::net::error::CodecError;
use crate::net::wire::{DataKind, WireValue};

macro_rules! opaque_handle {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(u64);

        impl $name {
            pub const fn new(raw: u64) -> Self {
                Self(raw)
            }

            pub const fn as_u64(self) -> u64 {
                self.0
            }
        }

        impl WireItem for $name {
            fn into_wire(self) -> WireValue {
                WireValue::Uint64(self.0)
            }

            fn from_wire(value: WireValue) -> Result<Self, CodecError> {
                match value {
                    WireValue::Uint64(raw) => Ok(Self(raw)),
                    other => Err(kind_mismatch(DataKind::Uint64, &other)),
                }
            }
        }

        impl WireItem for Option<$name> {
            fn into_wire(self) -> WireValue {
                WireValue::Uint64(self.map_or(0, |v| v.0))
            }

            fn from_wire(value: WireValue) -> Result<Self, CodecError> {
                match value {
                    WireValue::Uint64(0) => Ok(None),
                    WireValue::Uint64(raw) => Ok(Some($name(raw))),
                    other => Err(kind_mismatch(DataKind::Uint64, &other)),
                }
            }
        }
    };
}

opaque_handle! {
    /// One connected client VM.
    ClientId
}

opaque_handle! {
    /// A loaded class on the client.
    ClassRef
}

opaque_handle! {
    /// A method on the client.
    MethodRef
}

opaque_handle! {
    /// A constant pool on the client.
    CpRef
}

opaque_handle! {
    /// A class loader on the client.
    LoaderRef
}

opaque_handle! {
    /// Token for a server-requested mirror living on the client. Carries no
    /// dereference capability; it only names the mirror in later requests.
    MirrorRef
}

/// Monotone per-client compilation counter. Global cache entries remember
/// the epoch that produced them so later compilations can spot stale mirror
/// tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CompilationEpoch(u64);

impl CompilationEpoch {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_mirror_rides_as_zero() {
        let none: Option<MirrorRef> = None;
        assert_eq!(none.into_wire(), WireValue::Uint64(0));
        let decoded = Option::<MirrorRef>::from_wire(WireValue::Uint64(0)).unwrap();
        assert!(decoded.is_none());
        let decoded = Option::<MirrorRef>::from_wire(WireValue::Uint64(41)).unwrap();
        assert_eq!(decoded, Some(MirrorRef::new(41)));
    }

    #[test]
    fn handles_round_trip_as_uint64() {
        let class = ClassRef::new(0xCAFE);
        let wire = class.into_wire();
        assert_eq!(ClassRef::from_wire(wire).unwrap(), class);
    }
}

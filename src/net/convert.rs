//! Typed argument mapping between Rust values and wire data points.
//!
//! Each request/reply is declared at the call site as a tuple of `WireItem`
//! values; packing appends one data point per item and unpacking checks the
//! declared point count before touching any payload.

use bytes::Bytes;

use super::error::CodecError;
use super::message::Message;
use super::wire::{DataKind, WireValue};

/// One value that rides as a single data point.
pub trait WireItem: Sized {
    fn into_wire(self) -> WireValue;
    fn from_wire(value: WireValue) -> Result<Self, CodecError>;
}

pub(crate) fn kind_mismatch(expected: DataKind, found: &WireValue) -> CodecError {
    CodecError::Kind {
        expected,
        found: found.kind(),
    }
}

impl WireItem for i32 {
    fn into_wire(self) -> WireValue {
        WireValue::Int32(self)
    }

    fn from_wire(value: WireValue) -> Result<Self, CodecError> {
        match value {
            WireValue::Int32(v) => Ok(v),
            other => Err(kind_mismatch(DataKind::Int32, &other)),
        }
    }
}

impl WireItem for i64 {
    fn into_wire(self) -> WireValue {
        WireValue::Int64(self)
    }

    fn from_wire(value: WireValue) -> Result<Self, CodecError> {
        match value {
            WireValue::Int64(v) => Ok(v),
            other => Err(kind_mismatch(DataKind::Int64, &other)),
        }
    }
}

impl WireItem for u32 {
    fn into_wire(self) -> WireValue {
        WireValue::Uint32(self)
    }

    fn from_wire(value: WireValue) -> Result<Self, CodecError> {
        match value {
            WireValue::Uint32(v) => Ok(v),
            other => Err(kind_mismatch(DataKind::Uint32, &other)),
        }
    }
}

impl WireItem for u64 {
    fn into_wire(self) -> WireValue {
        WireValue::Uint64(self)
    }

    fn from_wire(value: WireValue) -> Result<Self, CodecError> {
        match value {
            WireValue::Uint64(v) => Ok(v),
            other => Err(kind_mismatch(DataKind::Uint64, &other)),
        }
    }
}

impl WireItem for bool {
    fn into_wire(self) -> WireValue {
        WireValue::Bool(self)
    }

    fn from_wire(value: WireValue) -> Result<Self, CodecError> {
        match value {
            WireValue::Bool(v) => Ok(v),
            other => Err(kind_mismatch(DataKind::Bool, &other)),
        }
    }
}

impl WireItem for String {
    fn into_wire(self) -> WireValue {
        WireValue::Str(self)
    }

    fn from_wire(value: WireValue) -> Result<Self, CodecError> {
        match value {
            WireValue::Str(v) => Ok(v),
            other => Err(kind_mismatch(DataKind::Str, &other)),
        }
    }
}

impl WireItem for Bytes {
    fn into_wire(self) -> WireValue {
        WireValue::Blob(self)
    }

    fn from_wire(value: WireValue) -> Result<Self, CodecError> {
        match value {
            WireValue::Blob(v) => Ok(v),
            other => Err(kind_mismatch(DataKind::Blob, &other)),
        }
    }
}

impl<T: WireItem> WireItem for Vec<T> {
    fn into_wire(self) -> WireValue {
        WireValue::Seq(self.into_iter().map(WireItem::into_wire).collect())
    }

    fn from_wire(value: WireValue) -> Result<Self, CodecError> {
        match value {
            WireValue::Seq(items) => items.into_iter().map(T::from_wire).collect(),
            other => Err(kind_mismatch(DataKind::Seq, &other)),
        }
    }
}

/// Reader over a tuple-shaped point, yielding items in declared order.
/// Domain structs decode their fields through this.
#[derive(Debug)]
pub struct TupleReader {
    items: std::vec::IntoIter<WireValue>,
}

impl TupleReader {
    pub fn new(value: WireValue, expected: usize) -> Result<Self, CodecError> {
        match value {
            WireValue::Tuple(items) => {
                if items.len() != expected {
                    return Err(CodecError::Arity {
                        declared: items.len(),
                        requested: expected,
                    });
                }
                Ok(Self {
                    items: items.into_iter(),
                })
            }
            other => Err(kind_mismatch(DataKind::Tuple, &other)),
        }
    }

    pub fn item<T: WireItem>(&mut self) -> Result<T, CodecError> {
        let value = self.items.next().ok_or(CodecError::MissingValue {
            what: "tuple field",
        })?;
        T::from_wire(value)
    }
}

/// The full argument pack of one message.
pub trait WireArgs: Sized {
    fn pack(self, msg: &mut Message);
    fn unpack(msg: Message) -> Result<Self, CodecError>;
}

impl WireArgs for () {
    fn pack(self, _msg: &mut Message) {}

    fn unpack(msg: Message) -> Result<Self, CodecError> {
        if msg.point_count() != 0 {
            return Err(CodecError::Arity {
                declared: msg.point_count() as usize,
                requested: 0,
            });
        }
        Ok(())
    }
}

macro_rules! count_items {
    () => { 0usize };
    ($head:ident $($tail:ident)*) => { 1usize + count_items!($($tail)*) };
}

macro_rules! impl_wire_args {
    ($($ty:ident => $idx:tt),+ $(,)?) => {
        impl<$($ty: WireItem),+> WireArgs for ($($ty,)+) {
            fn pack(self, msg: &mut Message) {
                $( msg.push(self.$idx.into_wire()); )+
            }

            fn unpack(msg: Message) -> Result<Self, CodecError> {
                const REQUESTED: usize = count_items!($($ty)+);
                let declared = msg.point_count() as usize;
                if declared != REQUESTED {
                    return Err(CodecError::Arity {
                        declared,
                        requested: REQUESTED,
                    });
                }
                let mut items = msg.into_points().into_iter();
                Ok(($(
                    match items.next() {
                        Some(value) => $ty::from_wire(value)?,
                        None => {
                            return Err(CodecError::MissingValue {
                                what: "data point",
                            })
                        }
                    },
                )+))
            }
        }
    };
}

impl_wire_args!(A => 0);
impl_wire_args!(A => 0, B => 1);
impl_wire_args!(A => 0, B => 1, C => 2);
impl_wire_args!(A => 0, B => 1, C => 2, D => 3);
impl_wire_args!(A => 0, B => 1, C => 2, D => 3, E => 4);
impl_wire_args!(A => 0, B => 1, C => 2, D => 3, E => 4, F => 5);
impl_wire_args!(A => 0, B => 1, C => 2, D => 3, E => 4, F => 5, G => 6);
impl_wire_args!(A => 0, B => 1, C => 2, D => 3, E => 4, F => 5, G => 6, H => 7);

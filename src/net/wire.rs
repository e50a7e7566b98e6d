//! Tagged wire values: the unit of payload in every message.

use bytes::Bytes;

/// Descriptor bytes preceding each data point: kind code + payload size.
pub const POINT_DESCRIPTOR_LEN: usize = 8;

/// Wire kind tag of a data point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataKind {
    Int32,
    Int64,
    Uint32,
    Uint64,
    Bool,
    Str,
    Blob,
    Seq,
    Tuple,
}

impl DataKind {
    pub fn code(self) -> u32 {
        match self {
            DataKind::Int32 => 0,
            DataKind::Int64 => 1,
            DataKind::Uint32 => 2,
            DataKind::Uint64 => 3,
            DataKind::Bool => 4,
            DataKind::Str => 5,
            DataKind::Blob => 6,
            DataKind::Seq => 7,
            DataKind::Tuple => 8,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            0 => DataKind::Int32,
            1 => DataKind::Int64,
            2 => DataKind::Uint32,
            3 => DataKind::Uint64,
            4 => DataKind::Bool,
            5 => DataKind::Str,
            6 => DataKind::Blob,
            7 => DataKind::Seq,
            8 => DataKind::Tuple,
            _ => return None,
        })
    }

    /// Composite kinds nest further data points; the rest carry raw payload.
    pub fn is_composite(self) -> bool {
        matches!(self, DataKind::Seq | DataKind::Tuple)
    }
}

/// One typed data point. Composite values own their children; blobs are
/// cheaply cloneable byte handles.
#[derive(Debug, Clone, PartialEq)]
pub enum WireValue {
    Int32(i32),
    Int64(i64),
    Uint32(u32),
    Uint64(u64),
    Bool(bool),
    Str(String),
    Blob(Bytes),
    Seq(Vec<WireValue>),
    Tuple(Vec<WireValue>),
}

impl WireValue {
    pub fn kind(&self) -> DataKind {
        match self {
            WireValue::Int32(_) => DataKind::Int32,
            WireValue::Int64(_) => DataKind::Int64,
            WireValue::Uint32(_) => DataKind::Uint32,
            WireValue::Uint64(_) => DataKind::Uint64,
            WireValue::Bool(_) => DataKind::Bool,
            WireValue::Str(_) => DataKind::Str,
            WireValue::Blob(_) => DataKind::Blob,
            WireValue::Seq(_) => DataKind::Seq,
            WireValue::Tuple(_) => DataKind::Tuple,
        }
    }

    /// Byte length of the payload following the descriptor. For composites
    /// this covers the inner count and every nested point.
    pub fn payload_size(&self) -> usize {
        match self {
            WireValue::Int32(_) | WireValue::Uint32(_) => 4,
            WireValue::Int64(_) | WireValue::Uint64(_) => 8,
            WireValue::Bool(_) => 1,
            WireValue::Str(s) => s.len(),
            WireValue::Blob(b) => b.len(),
            WireValue::Seq(items) | WireValue::Tuple(items) => {
                4 + items.iter().map(WireValue::serialized_size).sum::<usize>()
            }
        }
    }

    /// Full on-wire footprint: descriptor plus payload.
    pub fn serialized_size(&self) -> usize {
        POINT_DESCRIPTOR_LEN + self.payload_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_codes_round_trip() {
        for code in 0..9 {
            let kind = DataKind::from_code(code).unwrap();
            assert_eq!(kind.code(), code);
        }
        assert!(DataKind::from_code(9).is_none());
    }

    #[test]
    fn serialized_size_recurses_through_composites() {
        let value = WireValue::Tuple(vec![
            WireValue::Int32(1),
            WireValue::Seq(vec![WireValue::Bool(true), WireValue::Bool(false)]),
            WireValue::Str("ab".to_string()),
        ]);
        // tuple payload: count(4) + int32 point(8+4) + seq point(8 + 4 + 2*(8+1)) + str point(8+2)
        let seq_size = 8 + 4 + 2 * (8 + 1);
        let expected_payload = 4 + (8 + 4) + seq_size + (8 + 2);
        assert_eq!(value.payload_size(), expected_payload);
        assert_eq!(value.serialized_size(), 8 + expected_payload);
    }
}

//! Frame codec: length prefix, packed metadata, recursive data points.
//!
//! Layout, all integers little-endian:
//!
//! ```text
//! frame  := [u32 frame_size][meta][point...]      frame_size includes itself
//! meta   := [u16 point_count][u32 type][u64 version]
//! point  := [u32 kind][u32 payload_size][payload]
//! ```
//!
//! Contiguous kinds carry raw payload bytes; Seq and Tuple carry a u32 inner
//! count followed by that many nested points.

use bytes::Bytes;

use crate::config::ProtocolLimits;

use super::buffer::MessageBuffer;
use super::error::CodecError;
use super::message::{Message, MessageMeta, MessageType, META_LEN};
use super::wire::{DataKind, WireValue};

pub const FRAME_PREFIX_LEN: usize = 4;

/// Serialize one message into `buf` (cleared first). The total size is
/// computed up front so the buffer is sized in a single expansion.
pub fn encode(msg: &Message, buf: &mut MessageBuffer) -> Result<(), CodecError> {
    let total = FRAME_PREFIX_LEN
        + META_LEN
        + msg
            .points()
            .iter()
            .map(WireValue::serialized_size)
            .sum::<usize>();
    if u32::try_from(total).is_err() {
        return Err(CodecError::Oversized {
            max: u32::MAX as usize,
            got: total,
        });
    }
    buf.clear();
    buf.ensure(total);
    buf.write_u32(total as u32);
    buf.write_u16(msg.point_count());
    buf.write_u32(msg.kind().code());
    buf.write_u64(msg.version());
    for point in msg.points() {
        encode_point(point, buf);
    }
    debug_assert_eq!(buf.len(), total);
    Ok(())
}

fn encode_point(value: &WireValue, buf: &mut MessageBuffer) {
    buf.write_u32(value.kind().code());
    buf.write_u32(value.payload_size() as u32);
    match value {
        WireValue::Int32(v) => buf.write_bytes(&v.to_le_bytes()),
        WireValue::Int64(v) => buf.write_bytes(&v.to_le_bytes()),
        WireValue::Uint32(v) => buf.write_u32(*v),
        WireValue::Uint64(v) => buf.write_u64(*v),
        WireValue::Bool(v) => buf.write_u8(*v as u8),
        WireValue::Str(s) => buf.write_bytes(s.as_bytes()),
        WireValue::Blob(b) => buf.write_bytes(b),
        WireValue::Seq(items) | WireValue::Tuple(items) => {
            buf.write_u32(items.len() as u32);
            for item in items {
                encode_point(item, buf);
            }
        }
    }
}

/// Reconstruct a message from a buffer holding exactly one frame, prefix
/// included. Walks exactly the declared number of points and rejects any
/// disagreement between declared sizes and walked content.
pub fn decode(buf: &mut MessageBuffer, limits: &ProtocolLimits) -> Result<Message, CodecError> {
    let declared_total = buf.read_u32()? as usize;
    if declared_total > limits.max_message_bytes {
        return Err(CodecError::Oversized {
            max: limits.max_message_bytes,
            got: declared_total,
        });
    }
    let point_count = buf.read_u16()?;
    if point_count as usize > limits.max_data_points {
        return Err(CodecError::TooManyPoints {
            max: limits.max_data_points,
            got: point_count as usize,
        });
    }
    let type_code = buf.read_u32()?;
    let kind = MessageType::from_code(type_code)?;
    let version = buf.read_u64()?;

    let mut points = Vec::with_capacity(point_count as usize);
    for _ in 0..point_count {
        points.push(decode_point(buf, limits, 0)?);
    }
    if buf.remaining() != 0 {
        return Err(CodecError::TrailingBytes {
            remaining: buf.remaining(),
        });
    }
    Ok(Message::from_parts(
        MessageMeta {
            point_count,
            kind,
            version,
        },
        points,
    ))
}

fn decode_point(
    buf: &mut MessageBuffer,
    limits: &ProtocolLimits,
    depth: usize,
) -> Result<WireValue, CodecError> {
    if depth > limits.max_nesting_depth {
        return Err(CodecError::DepthExceeded {
            depth,
            max: limits.max_nesting_depth,
        });
    }
    let kind_code = buf.read_u32()?;
    let kind = DataKind::from_code(kind_code).ok_or(CodecError::UnknownDataKind { code: kind_code })?;
    let size = buf.read_u32()? as usize;
    match kind {
        DataKind::Int32 => {
            expect_size(size, 4)?;
            let mut raw = [0u8; 4];
            raw.copy_from_slice(buf.read_bytes(4)?);
            Ok(WireValue::Int32(i32::from_le_bytes(raw)))
        }
        DataKind::Int64 => {
            expect_size(size, 8)?;
            let mut raw = [0u8; 8];
            raw.copy_from_slice(buf.read_bytes(8)?);
            Ok(WireValue::Int64(i64::from_le_bytes(raw)))
        }
        DataKind::Uint32 => {
            expect_size(size, 4)?;
            Ok(WireValue::Uint32(buf.read_u32()?))
        }
        DataKind::Uint64 => {
            expect_size(size, 8)?;
            Ok(WireValue::Uint64(buf.read_u64()?))
        }
        DataKind::Bool => {
            expect_size(size, 1)?;
            Ok(WireValue::Bool(buf.read_u8()? != 0))
        }
        DataKind::Str => {
            let raw = buf.read_bytes(size)?.to_vec();
            Ok(WireValue::Str(
                String::from_utf8(raw).map_err(|_| CodecError::BadUtf8)?,
            ))
        }
        DataKind::Blob => Ok(WireValue::Blob(Bytes::copy_from_slice(
            buf.read_bytes(size)?,
        ))),
        DataKind::Seq | DataKind::Tuple => {
            let start = buf.consumed();
            let inner = buf.read_u32()? as usize;
            if inner > limits.max_data_points {
                return Err(CodecError::TooManyPoints {
                    max: limits.max_data_points,
                    got: inner,
                });
            }
            let mut items = Vec::with_capacity(inner);
            for _ in 0..inner {
                items.push(decode_point(buf, limits, depth + 1)?);
            }
            let walked = buf.consumed() - start;
            if walked != size {
                return Err(CodecError::SizeMismatch {
                    declared: size,
                    walked,
                });
            }
            Ok(match kind {
                DataKind::Seq => WireValue::Seq(items),
                _ => WireValue::Tuple(items),
            })
        }
    }
}

fn expect_size(declared: usize, wanted: usize) -> Result<(), CodecError> {
    if declared != wanted {
        return Err(CodecError::SizeMismatch {
            declared,
            walked: wanted,
        });
    }
    Ok(())
}

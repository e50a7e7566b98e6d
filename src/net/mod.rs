//! Wire protocol: growable buffer, tagged values, envelope, codec, typed
//! request/response streams.

pub mod buffer;
pub mod codec;
pub mod convert;
pub mod error;
pub mod message;
pub mod stream;
pub mod wire;

pub use buffer::MessageBuffer;
pub use convert::{TupleReader, WireArgs, WireItem};
pub use error::{CodecError, StreamError};
pub use message::{Message, MessageMeta, MessageType};
pub use stream::{ClientStream, ServerStream, WireVersion, PROTOCOL_MAJOR, PROTOCOL_MINOR};
pub use wire::{DataKind, WireValue};

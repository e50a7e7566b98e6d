//! Blocking request/response streams for the compile protocol.
//!
//! Strict alternation: the server sends one query and blocks for exactly one
//! reply. Cancellation is checked before the reply-type match so an abort is
//! never misread as a protocol violation. I/O failures are fatal to the
//! stream; there is no retry at this layer.

use std::io::{Read, Write};

use tracing::{debug, info, warn};

use crate::config::ProtocolLimits;

use super::buffer::MessageBuffer;
use super::codec::{decode, encode, FRAME_PREFIX_LEN};
use super::convert::WireArgs;
use super::error::{CodecError, StreamError};
use super::message::{Message, MessageType, META_LEN};

pub const PROTOCOL_MAJOR: u32 = 1;
pub const PROTOCOL_MINOR: u32 = 51;

/// Packed protocol version: configuration flags in the high word, then
/// major and minor. Compared for exact equality; 0 means "not asserted".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireVersion(u64);

impl WireVersion {
    pub const CURRENT: WireVersion = WireVersion::compose(0, PROTOCOL_MAJOR, PROTOCOL_MINOR);

    pub const fn compose(config_flags: u32, major: u32, minor: u32) -> Self {
        Self(
            ((config_flags as u64) << 32)
                | (((major & 0xff) as u64) << 24)
                | (((minor & 0xffff) as u64) << 8),
        )
    }

    pub const fn from_u64(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

fn read_frame<C: Read>(
    chan: &mut C,
    buf: &mut MessageBuffer,
    limits: &ProtocolLimits,
) -> Result<Option<Message>, StreamError> {
    let mut prefix = [0u8; FRAME_PREFIX_LEN];
    let mut read = 0usize;
    while read < prefix.len() {
        let n = chan.read(&mut prefix[read..])?;
        if n == 0 {
            if read == 0 {
                // clean close between frames
                return Ok(None);
            }
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "frame prefix truncated",
            )
            .into());
        }
        read += n;
    }
    let total = u32::from_le_bytes(prefix) as usize;
    if total < FRAME_PREFIX_LEN + META_LEN {
        return Err(CodecError::Truncated {
            needed: FRAME_PREFIX_LEN + META_LEN,
            available: total,
        }
        .into());
    }
    if total > limits.max_message_bytes {
        return Err(CodecError::Oversized {
            max: limits.max_message_bytes,
            got: total,
        }
        .into());
    }
    buf.clear();
    buf.write_bytes(&prefix);
    buf.fill_from(chan, total - FRAME_PREFIX_LEN)?;
    Ok(Some(decode(buf, limits)?))
}

fn write_frame<C: Write>(
    chan: &mut C,
    buf: &mut MessageBuffer,
    msg: &Message,
) -> Result<(), StreamError> {
    encode(msg, buf)?;
    chan.write_all(buf.written())?;
    chan.flush()?;
    Ok(())
}

/// Server end of one compile connection.
pub struct ServerStream<C> {
    chan: C,
    buf: MessageBuffer,
    limits: ProtocolLimits,
    version: WireVersion,
    last_sent: Option<MessageType>,
}

impl<C: Read + Write> ServerStream<C> {
    pub fn new(chan: C, limits: ProtocolLimits) -> Self {
        Self::with_version(chan, limits, WireVersion::CURRENT)
    }

    pub fn with_version(chan: C, limits: ProtocolLimits, version: WireVersion) -> Self {
        Self {
            chan,
            buf: MessageBuffer::with_capacity(limits.initial_buffer_capacity),
            limits,
            version,
            last_sent: None,
        }
    }

    /// Send one query to the client.
    pub fn write<A: WireArgs>(&mut self, kind: MessageType, args: A) -> Result<(), StreamError> {
        let mut msg = Message::new(kind);
        args.pack(&mut msg);
        write_frame(&mut self.chan, &mut self.buf, &msg)?;
        self.last_sent = Some(kind);
        Ok(())
    }

    /// Block for the reply to the last query. Checks, in order: abort from
    /// the client, then reply type against the sent type, then arity.
    pub fn read<A: WireArgs>(&mut self) -> Result<A, StreamError> {
        let msg = self.recv()?;
        if msg.kind() == MessageType::CompileAbort {
            debug!("compilation abort received");
            return Err(StreamError::Cancelled);
        }
        if self.last_sent != Some(msg.kind()) {
            warn!(expected = ?self.last_sent, found = ?msg.kind(), "reply type mismatch");
            return Err(StreamError::TypeMismatch {
                expected: self.last_sent,
                found: msg.kind(),
            });
        }
        Ok(A::unpack(msg)?)
    }

    /// Block for the next compile request. Recognizes session teardown and
    /// gates the protocol version before admitting the request.
    pub fn read_compile_request<A: WireArgs>(&mut self) -> Result<A, StreamError> {
        let msg = self.recv()?;
        if msg.kind() == MessageType::ClientTerminate {
            let (client_id,) = <(u64,)>::unpack(msg)?;
            info!(client_id, "client terminated session");
            return Err(StreamError::Terminated { client_id });
        }
        let theirs = msg.version();
        let ours = self.version.as_u64();
        if theirs != 0 && theirs != ours {
            warn!(ours, theirs, "incompatible protocol version");
            return Err(StreamError::VersionMismatch { ours, theirs });
        }
        if msg.kind() != MessageType::CompileRequest {
            return Err(StreamError::TypeMismatch {
                expected: Some(MessageType::CompileRequest),
                found: msg.kind(),
            });
        }
        Ok(A::unpack(msg)?)
    }

    /// Terminate the exchange with the compilation's outcome.
    pub fn finish_compilation<A: WireArgs>(&mut self, args: A) -> Result<(), StreamError> {
        self.write(MessageType::CompileResult, args)
    }

    fn recv(&mut self) -> Result<Message, StreamError> {
        match read_frame(&mut self.chan, &mut self.buf, &self.limits)? {
            Some(msg) => Ok(msg),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "peer closed mid-exchange",
            )
            .into()),
        }
    }
}

/// Client end of one compile connection: initiates compile requests and
/// answers the server's metadata queries.
pub struct ClientStream<C> {
    chan: C,
    buf: MessageBuffer,
    limits: ProtocolLimits,
    version: WireVersion,
}

impl<C: Read + Write> ClientStream<C> {
    pub fn new(chan: C, limits: ProtocolLimits) -> Self {
        Self::with_version(chan, limits, WireVersion::CURRENT)
    }

    pub fn with_version(chan: C, limits: ProtocolLimits, version: WireVersion) -> Self {
        Self {
            chan,
            buf: MessageBuffer::with_capacity(limits.initial_buffer_capacity),
            limits,
            version,
        }
    }

    /// Start a compilation. The request is the only message asserting the
    /// client's protocol version.
    pub fn send_request<A: WireArgs>(&mut self, args: A) -> Result<(), StreamError> {
        let mut msg = Message::new(MessageType::CompileRequest);
        args.pack(&mut msg);
        msg.set_version(self.version.as_u64());
        write_frame(&mut self.chan, &mut self.buf, &msg)
    }

    /// Next server message, or None when the server closed the stream.
    pub fn read_message(&mut self) -> Result<Option<Message>, StreamError> {
        read_frame(&mut self.chan, &mut self.buf, &self.limits)
    }

    /// Answer a query, echoing its type.
    pub fn reply<A: WireArgs>(&mut self, kind: MessageType, args: A) -> Result<(), StreamError> {
        let mut msg = Message::new(kind);
        args.pack(&mut msg);
        write_frame(&mut self.chan, &mut self.buf, &msg)
    }

    /// Cancel the in-flight compilation instead of answering the pending
    /// query.
    pub fn abort_compilation(&mut self) -> Result<(), StreamError> {
        self.reply(MessageType::CompileAbort, ())
    }

    /// End the session. Sent in place of a compile request.
    pub fn terminate(&mut self, client_id: u64) -> Result<(), StreamError> {
        self.reply(MessageType::ClientTerminate, (client_id,))
    }
}

#![forbid(unsafe_code)]

pub mod client;
pub mod config;
pub mod core;
pub mod net;
pub mod server;
pub mod test_harness;

pub use net::StreamError;
pub type Result<T> = std::result::Result<T, StreamError>;

// Re-export the working set at crate root for convenience
pub use crate::client::{ClientResponder, MetadataProvider, ResolutionAnswer, SignatureAnswer};
pub use crate::config::{CacheConfig, ProtocolLimits};
pub use crate::core::{
    ClassRef, ClientId, CompilationEpoch, CpRef, FieldAttributes, LoaderRef, MethodIdent,
    MethodInfo, MethodRef, MirrorRef, PrimitiveKind,
};
pub use crate::net::{
    ClientStream, CodecError, Message, MessageType, ServerStream, WireVersion, PROTOCOL_MAJOR,
    PROTOCOL_MINOR,
};
pub use crate::server::{
    serve_connection, ClientSession, CompilationMode, CompileContext, CompileHandler,
    CompileOutcome, CompileRequest, RecordingLedger, Resolution, ServerMethod, ValidationLedger,
    ValidationRecord,
};

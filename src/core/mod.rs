//! Domain types shared by both ends of the compile protocol.
//!
//! - handle: opaque u64 identities minted by the client VM
//! - attributes: field/static attribute answers
//! - method_info: packed mirror snapshots and method coordinates

pub mod attributes;
pub mod handle;
pub mod method_info;

pub use attributes::{FieldAttributes, PrimitiveKind};
pub use handle::{
    ClassRef, ClientId, CompilationEpoch, CpRef, LoaderRef, MethodRef, MirrorRef,
};
pub use method_info::{MethodIdent, MethodInfo};

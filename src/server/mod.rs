//! Server side of the compilation service: per-client sessions, mirrored
//! resolved methods with two-tier caching, relocatable validation, and the
//! compile-request service loop.

pub mod cache;
pub mod context;
pub mod dispatch;
pub mod method;
pub mod session;
pub mod validation;

pub use cache::{AttrKey, CachedMethod, ResolvedMethodKey, ResolvedMethodKind, RomStringKey};
pub use context::{CompilationMode, CompileContext};
pub use dispatch::{serve_connection, CompileHandler, CompileOutcome, CompileRequest};
pub use method::{Resolution, ServerMethod};
pub use session::{ClassRecord, ClientSession};
pub use validation::{RecordingLedger, ValidationLedger, ValidationRecord};

//! Working state threaded through one compilation.

use std::io::{Read, Write};

use crate::config::CacheConfig;
use crate::core::CompilationEpoch;
use crate::net::ServerStream;

use super::session::ClientSession;
use super::validation::ValidationLedger;

/// Whether the compilation produces a body bound to the running client or
/// a relocatable one that later processes may load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompilationMode {
    Jit,
    Aot,
}

/// Everything a resolution query needs: the stream back to the requesting
/// client, the session caches, and the per-compilation mode, epoch, and
/// validation ledger. Borrowed mutably for the duration of one compilation.
pub struct CompileContext<'a, C: Read + Write> {
    pub stream: &'a mut ServerStream<C>,
    pub session: &'a ClientSession,
    pub config: CacheConfig,
    pub mode: CompilationMode,
    pub epoch: CompilationEpoch,
    pub ledger: &'a mut dyn ValidationLedger,
}

impl<'a, C: Read + Write> CompileContext<'a, C> {
    pub fn new(
        stream: &'a mut ServerStream<C>,
        session: &'a ClientSession,
        config: CacheConfig,
        mode: CompilationMode,
        epoch: CompilationEpoch,
        ledger: &'a mut dyn ValidationLedger,
    ) -> Self {
        Self {
            stream,
            session,
            config,
            mode,
            epoch,
            ledger,
        }
    }

    pub fn is_aot(&self) -> bool {
        self.mode == CompilationMode::Aot
    }
}

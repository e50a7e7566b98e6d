//! Compile-request service loop.

use std::io::{Read, Write};

use bytes::Bytes;
use tracing::{debug, info};

use crate::config::CacheConfig;
use crate::core::{ClassRef, ClientId, MethodRef};
use crate::net::{ServerStream, StreamError};

use super::context::{CompilationMode, CompileContext};
use super::method::ServerMethod;
use super::session::ClientSession;
use super::validation::RecordingLedger;

/// One compilation the client asked for.
#[derive(Debug, Clone)]
pub struct CompileRequest {
    pub method: MethodRef,
    pub class: ClassRef,
    pub client_id: ClientId,
    pub opt_level: u32,
    pub aot: bool,
    /// Opaque compiler options blob, passed through to the handler.
    pub detail: Bytes,
}

/// What the handler produced for one request, shipped back verbatim as the
/// compile result.
#[derive(Debug, Clone, Default)]
pub struct CompileOutcome {
    pub status: u32,
    pub code: Bytes,
    pub data: Bytes,
    pub log: String,
}

/// The compilation pipeline, as seen from the service loop. Implementations
/// drive resolution queries through the root method and the context.
pub trait CompileHandler<C: Read + Write> {
    fn compile(
        &mut self,
        request: &CompileRequest,
        root: &mut ServerMethod,
        ctx: &mut CompileContext<'_, C>,
    ) -> Result<CompileOutcome, StreamError>;
}

/// Serve compile requests on one connection until the client terminates.
///
/// Each request runs under a fresh epoch and validation ledger. Client-side
/// aborts drop the in-flight compilation and wait for the next request; a
/// version mismatch or a terminate message ends the loop cleanly. Transport
/// errors propagate to the caller, which owns teardown.
pub fn serve_connection<C, H>(
    stream: &mut ServerStream<C>,
    session: &ClientSession,
    config: CacheConfig,
    handler: &mut H,
) -> Result<(), StreamError>
where
    C: Read + Write,
    H: CompileHandler<C>,
{
    info!(client_id = session.client_id().as_u64(), "serving compile requests");
    loop {
        let (method, class, client_id, opt_level, aot, detail): (
            MethodRef,
            ClassRef,
            ClientId,
            u32,
            bool,
            Bytes,
        ) = match stream.read_compile_request() {
            Ok(args) => args,
            Err(StreamError::Terminated { .. }) | Err(StreamError::VersionMismatch { .. }) => {
                return Ok(())
            }
            Err(other) => return Err(other),
        };
        let request = CompileRequest {
            method,
            class,
            client_id,
            opt_level,
            aot,
            detail,
        };
        debug_assert_eq!(request.client_id, session.client_id(), "request routed to wrong session");
        debug!(
            method = request.method.as_u64(),
            class = request.class.as_u64(),
            opt_level = request.opt_level,
            aot = request.aot,
            "compile request"
        );
        let mode = if request.aot {
            CompilationMode::Aot
        } else {
            CompilationMode::Jit
        };
        let epoch = session.next_epoch();
        let mut ledger = RecordingLedger::new();
        let outcome = {
            let mut ctx = CompileContext::new(stream, session, config, mode, epoch, &mut ledger);
            ServerMethod::mirror_root(&mut ctx, request.method)
                .and_then(|mut root| handler.compile(&request, &mut root, &mut ctx))
        };
        match outcome {
            Ok(outcome) => {
                stream.finish_compilation((outcome.status, outcome.code, outcome.data, outcome.log))?;
            }
            Err(StreamError::Cancelled) => {
                debug!(method = request.method.as_u64(), "compilation dropped after abort");
            }
            Err(other) => return Err(other),
        }
    }
}

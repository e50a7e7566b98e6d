//! End-to-end compile sessions over an in-process pipe: a real server loop
//! on one side, a scripted client VM on the other. These exercise the full
//! request/query/result exchange including caching, cancellation, session
//! termination, and version rejection.

use std::thread;

use bytes::Bytes;

use jitwire::test_harness::{
    drain_log, duplex, stream_pair, MethodSpec, PipeEnd, ScriptedProvider,
};
use jitwire::{
    serve_connection, CacheConfig, ClassRef, ClientId, ClientResponder, ClientSession,
    ClientStream, CompileContext, CompileHandler, CompileOutcome, CompileRequest, CpRef,
    FieldAttributes, LoaderRef, MessageType, MethodInfo, MethodRef, MirrorRef, PrimitiveKind,
    ProtocolLimits, ServerMethod, ServerStream, StreamError, WireVersion,
};

const CLIENT_ID: u64 = 7;
const ROOT_METHOD: u64 = 0x10;
const CHILD_METHOD: u64 = 0x11;
const DYNAMIC_METHOD: u64 = 0x12;
const OWNING_CLASS: u64 = 0x40;
const CONSTANT_POOL: u64 = 0x20;

fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

fn root_spec() -> MethodSpec {
    MethodSpec::new(
        MethodRef::new(ROOT_METHOD),
        ClassRef::new(OWNING_CLASS),
        CpRef::new(CONSTANT_POOL),
        "(I)V",
    )
}

fn compile_request(aot: bool) -> CompileRequest {
    CompileRequest {
        method: MethodRef::new(ROOT_METHOD),
        class: ClassRef::new(OWNING_CLASS),
        client_id: ClientId::new(CLIENT_ID),
        opt_level: 2,
        aot,
        detail: Bytes::new(),
    }
}

fn resolved_int_attrs(offset: u64) -> FieldAttributes {
    FieldAttributes {
        offset,
        kind: PrimitiveKind::Int32,
        is_volatile: false,
        is_final: false,
        is_private: false,
        unresolved_in_cp: false,
        resolved: true,
    }
}

fn count(kinds: &[MessageType], kind: MessageType) -> usize {
    kinds.iter().filter(|k| **k == kind).count()
}

/// Probes the same field twice; the second answer must come out of the cache.
#[derive(Default)]
struct AttrProbe {
    first: Option<FieldAttributes>,
    second: Option<FieldAttributes>,
}

impl CompileHandler<PipeEnd> for AttrProbe {
    fn compile(
        &mut self,
        _request: &CompileRequest,
        root: &mut ServerMethod,
        ctx: &mut CompileContext<'_, PipeEnd>,
    ) -> Result<CompileOutcome, StreamError> {
        self.first = Some(root.field_attributes(ctx, 4, false)?);
        self.second = Some(root.field_attributes(ctx, 4, false)?);
        Ok(CompileOutcome {
            status: 0,
            code: Bytes::from_static(b"\x90\x90"),
            data: Bytes::new(),
            log: "resolved twice".to_string(),
        })
    }
}

#[test]
fn field_attributes_round_trip_and_cache() {
    init_tracing();
    let (mut server_stream, client_stream) = stream_pair();
    let (mut provider, log) = ScriptedProvider::new();
    provider.add_method(root_spec());
    provider.script_field_attributes(4, false, resolved_int_attrs(16));

    let client = thread::spawn(move || {
        let mut responder = ClientResponder::new(client_stream, provider);
        let outcome = responder
            .request_compilation(&compile_request(false))
            .expect("compilation should complete");
        responder.terminate(CLIENT_ID).expect("terminate should send");
        outcome
    });

    let session = ClientSession::new(ClientId::new(CLIENT_ID));
    let config = CacheConfig {
        verify_cached_attributes: false,
        ..CacheConfig::default()
    };
    let mut handler = AttrProbe::default();
    serve_connection(&mut server_stream, &session, config, &mut handler)
        .expect("server loop should end cleanly");
    let outcome = client.join().expect("client thread should not panic");

    let first = handler.first.expect("first probe should resolve");
    assert_eq!(first.offset, 16);
    assert_eq!(first.kind, PrimitiveKind::Int32);
    assert!(first.resolved);
    assert_eq!(handler.second, Some(first));

    assert_eq!(outcome.status, 0);
    assert_eq!(outcome.code, Bytes::from_static(b"\x90\x90"));
    assert_eq!(outcome.log, "resolved twice");

    let kinds = drain_log(&log);
    assert_eq!(
        count(&kinds, MessageType::FieldAttributes),
        1,
        "second probe should be served from the cache"
    );
    assert_eq!(count(&kinds, MessageType::MirrorMethod), 1);
    assert_eq!(count(&kinds, MessageType::RomSnapshot), 1);
}

/// Flags whether a query came back as a cancellation.
#[derive(Default)]
struct CancelObserver {
    cancelled: bool,
}

impl CompileHandler<PipeEnd> for CancelObserver {
    fn compile(
        &mut self,
        _request: &CompileRequest,
        root: &mut ServerMethod,
        ctx: &mut CompileContext<'_, PipeEnd>,
    ) -> Result<CompileOutcome, StreamError> {
        match root.field_attributes(ctx, 4, false) {
            Err(StreamError::Cancelled) => {
                self.cancelled = true;
                Err(StreamError::Cancelled)
            }
            Err(other) => Err(other),
            Ok(attrs) => panic!("query should have been aborted, got {attrs:?}"),
        }
    }
}

fn root_info() -> MethodInfo {
    MethodInfo {
        mirror: Some(MirrorRef::new(0x1000)),
        cp: CpRef::new(CONSTANT_POOL),
        owning_class: ClassRef::new(OWNING_CLASS),
        loader: LoaderRef::new(0x6000),
        method_index: 1,
        is_interpreted: true,
        is_jni_native: false,
        is_private: false,
        is_overridden: false,
        is_var_handle_access: false,
        start_address: 0,
        override_bit_address: 0,
        jni_target: 0,
        signature: "(I)V".to_string(),
        body_info: Bytes::new(),
        persistent_info: Bytes::new(),
    }
}

#[test]
fn abort_cancels_compilation_and_keeps_session_alive() {
    init_tracing();
    let (mut server_stream, mut client_stream) = stream_pair();

    let client = thread::spawn(move || {
        client_stream
            .send_request((
                MethodRef::new(ROOT_METHOD),
                ClassRef::new(OWNING_CLASS),
                ClientId::new(CLIENT_ID),
                2u32,
                false,
                Bytes::new(),
            ))
            .expect("request should send");

        let msg = client_stream
            .read_message()
            .expect("mirror query should arrive")
            .expect("server should query before closing");
        assert_eq!(msg.kind(), MessageType::MirrorMethod);
        client_stream
            .reply(MessageType::MirrorMethod, (root_info(),))
            .expect("mirror reply should send");

        let msg = client_stream
            .read_message()
            .expect("snapshot query should arrive")
            .expect("server should fetch the class image");
        assert_eq!(msg.kind(), MessageType::RomSnapshot);
        client_stream
            .reply(MessageType::RomSnapshot, (Bytes::from_static(b"<rom image>"),))
            .expect("snapshot reply should send");

        let msg = client_stream
            .read_message()
            .expect("attribute query should arrive")
            .expect("server should query attributes");
        assert_eq!(msg.kind(), MessageType::FieldAttributes);
        // The method got recompiled at a higher level on the client, so
        // give up on this compilation instead of answering.
        client_stream.abort_compilation().expect("abort should send");
        client_stream.terminate(CLIENT_ID).expect("terminate should send");
    });

    let session = ClientSession::new(ClientId::new(CLIENT_ID));
    let mut handler = CancelObserver::default();
    serve_connection(&mut server_stream, &session, CacheConfig::default(), &mut handler)
        .expect("abort should not tear down the session");
    client.join().expect("client thread should not panic");

    assert!(handler.cancelled, "handler should observe the cancellation");
}

#[test]
fn terminate_ends_service_loop() {
    init_tracing();
    let (mut server_stream, mut client_stream) = stream_pair();
    client_stream.terminate(CLIENT_ID).expect("terminate should send");

    let session = ClientSession::new(ClientId::new(CLIENT_ID));
    let mut handler = AttrProbe::default();
    serve_connection(&mut server_stream, &session, CacheConfig::default(), &mut handler)
        .expect("termination should end the loop cleanly");

    assert!(handler.first.is_none(), "no compilation should have run");
}

#[test]
fn version_mismatch_ends_session_before_compiling() {
    init_tracing();
    let (server_end, client_end) = duplex();
    let limits = ProtocolLimits::default();
    let mut server_stream = ServerStream::new(server_end, limits);
    let mut client_stream =
        ClientStream::with_version(client_end, limits, WireVersion::compose(0, 0, 49));

    let client = thread::spawn(move || {
        client_stream
            .send_request((
                MethodRef::new(ROOT_METHOD),
                ClassRef::new(OWNING_CLASS),
                ClientId::new(CLIENT_ID),
                2u32,
                false,
                Bytes::new(),
            ))
            .expect("request should send");
        client_stream.read_message().expect("close should be clean")
    });

    let session = ClientSession::new(ClientId::new(CLIENT_ID));
    let mut handler = AttrProbe::default();
    serve_connection(&mut server_stream, &session, CacheConfig::default(), &mut handler)
        .expect("mismatch should end the loop cleanly");
    drop(server_stream);

    let last = client.join().expect("client thread should not panic");
    assert!(last.is_none(), "client should see a clean close, not a reply");
    assert!(handler.first.is_none(), "no compilation should have run");
}

/// Captures what an ahead-of-time compilation sees for an unresolved static.
#[derive(Default)]
struct AotProbe {
    resolution_unresolved: Option<bool>,
    attrs: Option<FieldAttributes>,
}

impl CompileHandler<PipeEnd> for AotProbe {
    fn compile(
        &mut self,
        _request: &CompileRequest,
        root: &mut ServerMethod,
        ctx: &mut CompileContext<'_, PipeEnd>,
    ) -> Result<CompileOutcome, StreamError> {
        let res = root.resolved_static_method(ctx, 6)?;
        assert!(res.method.is_none(), "scripted as unresolved");
        self.resolution_unresolved = Some(res.unresolved_in_cp);

        self.attrs = Some(root.static_attributes(ctx, 9, false)?);
        Ok(CompileOutcome::default())
    }
}

#[test]
fn aot_compilation_refines_and_hardens_unresolved_answers() {
    init_tracing();
    let (mut server_stream, client_stream) = stream_pair();
    let (mut provider, log) = ScriptedProvider::new();
    provider.add_method(root_spec());
    provider.script_unresolved(MessageType::ResolvedStaticMethod, 6);
    provider.script_unresolved_in_cp(MessageType::UnresolvedStaticInCp, 6, true);
    provider.script_field_attributes(
        9,
        true,
        FieldAttributes {
            offset: 0,
            kind: PrimitiveKind::Address,
            is_volatile: false,
            is_final: true,
            is_private: false,
            unresolved_in_cp: true,
            resolved: false,
        },
    );

    let client = thread::spawn(move || {
        let mut responder = ClientResponder::new(client_stream, provider);
        let outcome = responder
            .request_compilation(&compile_request(true))
            .expect("compilation should complete");
        responder.terminate(CLIENT_ID).expect("terminate should send");
        outcome
    });

    let session = ClientSession::new(ClientId::new(CLIENT_ID));
    let mut handler = AotProbe::default();
    serve_connection(&mut server_stream, &session, CacheConfig::default(), &mut handler)
        .expect("server loop should end cleanly");
    client.join().expect("client thread should not panic");

    assert_eq!(
        handler.resolution_unresolved,
        Some(true),
        "miss should be refined by the constant-pool state query"
    );
    let attrs = handler.attrs.expect("attribute probe should complete");
    assert!(!attrs.resolved);
    assert!(attrs.unresolved_in_cp);
    assert!(attrs.is_volatile, "unresolved answers harden to volatile");
    assert!(!attrs.is_final, "unresolved answers drop finality");

    let kinds = drain_log(&log);
    assert_eq!(count(&kinds, MessageType::UnresolvedStaticInCp), 1);
    assert_eq!(count(&kinds, MessageType::StaticAttributes), 1);
}

/// Resolves the same call site in two back-to-back compilations.
#[derive(Default)]
struct StalenessProbe {
    mirrors: Vec<Option<MirrorRef>>,
    slots: Vec<u32>,
}

impl CompileHandler<PipeEnd> for StalenessProbe {
    fn compile(
        &mut self,
        _request: &CompileRequest,
        root: &mut ServerMethod,
        ctx: &mut CompileContext<'_, PipeEnd>,
    ) -> Result<CompileOutcome, StreamError> {
        let res = root.resolved_virtual_method(ctx, 3, false)?;
        let child = res.method.as_ref().expect("scripted as resolved");
        self.mirrors.push(child.mirror());
        self.slots.push(child.vtable_slot());
        Ok(CompileOutcome::default())
    }
}

#[test]
fn cached_resolution_crosses_compilations_without_its_mirror() {
    init_tracing();
    let (mut server_stream, client_stream) = stream_pair();
    let (mut provider, log) = ScriptedProvider::new();
    provider.add_method(root_spec());
    provider.add_method(MethodSpec::new(
        MethodRef::new(CHILD_METHOD),
        ClassRef::new(OWNING_CLASS),
        CpRef::new(CONSTANT_POOL),
        "(J)J",
    ));
    provider.script_resolution(
        MessageType::ResolvedVirtualMethod,
        3,
        MethodRef::new(CHILD_METHOD),
        5,
    );

    let client = thread::spawn(move || {
        let mut responder = ClientResponder::new(client_stream, provider);
        for _ in 0..2 {
            responder
                .request_compilation(&compile_request(false))
                .expect("compilation should complete");
        }
        responder.terminate(CLIENT_ID).expect("terminate should send");
    });

    let session = ClientSession::new(ClientId::new(CLIENT_ID));
    let mut handler = StalenessProbe::default();
    serve_connection(&mut server_stream, &session, CacheConfig::default(), &mut handler)
        .expect("server loop should end cleanly");
    client.join().expect("client thread should not panic");

    assert_eq!(handler.slots, vec![5, 5]);
    assert!(
        handler.mirrors[0].is_some(),
        "fresh resolution carries a live mirror"
    );
    assert!(
        handler.mirrors[1].is_none(),
        "a hit from an earlier compilation must drop its mirror"
    );

    let kinds = drain_log(&log);
    assert_eq!(
        count(&kinds, MessageType::ResolvedVirtualMethod),
        1,
        "second compilation should hit the session cache"
    );
    assert_eq!(
        count(&kinds, MessageType::RomSnapshot),
        1,
        "class record should survive across compilations"
    );
    assert_eq!(
        count(&kinds, MessageType::MirrorMethod),
        2,
        "each compilation mirrors its root afresh"
    );
}

/// Captures the signature reported for an invokedynamic callee.
#[derive(Default)]
struct DynamicProbe {
    signature: Option<String>,
    mirror: Option<MirrorRef>,
}

impl CompileHandler<PipeEnd> for DynamicProbe {
    fn compile(
        &mut self,
        _request: &CompileRequest,
        root: &mut ServerMethod,
        ctx: &mut CompileContext<'_, PipeEnd>,
    ) -> Result<CompileOutcome, StreamError> {
        let res = root.resolved_dynamic_method(ctx, 2)?;
        let child = res.method.as_ref().expect("scripted as resolved");
        self.signature = Some(child.signature().to_string());
        self.mirror = child.mirror();
        Ok(CompileOutcome::default())
    }
}

#[test]
fn dynamic_resolution_carries_call_site_signature() {
    init_tracing();
    let (mut server_stream, client_stream) = stream_pair();
    let (mut provider, log) = ScriptedProvider::new();
    provider.add_method(root_spec());
    provider.add_method(MethodSpec::new(
        MethodRef::new(DYNAMIC_METHOD),
        ClassRef::new(OWNING_CLASS),
        CpRef::new(CONSTANT_POOL),
        "(J)J",
    ));
    provider.script_signature_resolution(
        MessageType::ResolvedDynamicMethod,
        2,
        MethodRef::new(DYNAMIC_METHOD),
        "(Ljava/lang/invoke/MethodHandle;I)V",
    );

    let client = thread::spawn(move || {
        let mut responder = ClientResponder::new(client_stream, provider);
        let outcome = responder
            .request_compilation(&compile_request(false))
            .expect("compilation should complete");
        responder.terminate(CLIENT_ID).expect("terminate should send");
        outcome
    });

    let session = ClientSession::new(ClientId::new(CLIENT_ID));
    let mut handler = DynamicProbe::default();
    serve_connection(&mut server_stream, &session, CacheConfig::default(), &mut handler)
        .expect("server loop should end cleanly");
    client.join().expect("client thread should not panic");

    assert_eq!(
        handler.signature.as_deref(),
        Some("(Ljava/lang/invoke/MethodHandle;I)V"),
        "call-site signature wins over the method's own"
    );
    assert!(handler.mirror.is_some(), "callee is mirrored for this compilation");

    let kinds = drain_log(&log);
    assert_eq!(count(&kinds, MessageType::ResolvedDynamicMethod), 1);
    assert_eq!(
        count(&kinds, MessageType::MirrorMethod),
        2,
        "root and callee each get mirrored"
    );
}

use std::sync::Arc;

use uc_bridge::consts::{make_version, API_MAJOR, API_MINOR};
use uc_bridge::{
    registry, Arch, BridgeConfig, ContextHandle, EngineHandle, Error, Mode, Permission, QueryType,
    UcErr,
};
use uc_testkit::{fixture, Fixture, Op, RecordingRuntime, ScriptedLibrary, PAGE_SIZE};

type Case = (Op, UcErr, Box<dyn Fn() -> uc_bridge::Result<()>>);

fn case(op: Op, code: UcErr, call: impl Fn() -> uc_bridge::Result<()> + 'static) -> Case {
    (op, code, Box::new(call))
}

fn open(fx: &Fixture) -> EngineHandle {
    fx.bridge.open(Arch::ARM, Mode::ARM).unwrap()
}

#[test]
fn registry_installs_once() {
    let fx = fixture();
    assert!(std::ptr::eq(registry::try_bridge().unwrap(), fx.bridge));

    let again = registry::install(
        Arc::new(ScriptedLibrary::new()),
        Arc::new(RecordingRuntime::new()),
        BridgeConfig::default(),
    );
    assert!(matches!(again, Err(Error::AlreadyInstalled)));
    assert_eq!(fx.bridge.config(), &BridgeConfig::default());
}

#[test]
fn version_and_architecture_queries() {
    let fx = fixture();
    assert_eq!(fx.bridge.version(), make_version(API_MAJOR, API_MINOR));
    assert_eq!(fx.bridge.version_parts(), (API_MAJOR, API_MINOR));
    assert!(fx.bridge.arch_supported(Arch::X86));
    assert!(!fx.bridge.arch_supported(Arch::M68K));

    let err = fx.bridge.open(Arch::M68K, Mode::BIG_ENDIAN).unwrap_err();
    assert_eq!(err.code(), Some(UcErr::ARCH));
}

#[test]
fn strerror_never_raises() {
    let fx = fixture();
    assert_eq!(fx.bridge.strerror(0), "OK (UC_ERR_OK)");
    assert_eq!(fx.bridge.strerror(UcErr::HANDLE.code()), UcErr::HANDLE.message());
    assert_eq!(fx.bridge.strerror(9999), "Unknown error code");
}

#[test]
fn strerror_comes_from_the_native_library() {
    let fx = fixture();
    // A code the built-in table has no name for.
    let vendor = UcErr(64);
    fx.library.describe(vendor, "Coprocessor trap (vendor)");

    assert_eq!(fx.bridge.strerror(vendor.code()), "Coprocessor trap (vendor)");
    assert_eq!(vendor.message(), "Unknown error code");
}

#[test]
fn forwarded_failures_carry_the_native_code() {
    let fx = fixture();
    let engine = open(fx);
    fx.bridge
        .mem_map(engine, 0x1000, PAGE_SIZE, Permission::ALL)
        .unwrap();
    let context = fx.bridge.context_alloc(engine).unwrap();
    let mut buf = [0u8; 4];

    let cases: Vec<Case> = vec![
        case(
            Op::RegRead,
            UcErr::ARG,
            move || fx.bridge.reg_read(engine, 1).map(drop),
        ),
        case(
            Op::RegWrite,
            UcErr::MODE,
            move || fx.bridge.reg_write(engine, 1, 2),
        ),
        case(
            Op::MemWrite,
            UcErr::WRITE_PROT,
            move || fx.bridge.mem_write(engine, 0x1000, &[1], 1).map(drop),
        ),
        case(
            Op::MemMap,
            UcErr::NOMEM,
            move || fx.bridge.mem_map(engine, 0x8000, PAGE_SIZE, Permission::READ),
        ),
        case(
            Op::MemUnmap,
            UcErr::MAP,
            move || fx.bridge.mem_unmap(engine, 0x1000, PAGE_SIZE),
        ),
        case(
            Op::MemProtect,
            UcErr::ARG,
            move || fx.bridge.mem_protect(engine, 0x1000, PAGE_SIZE, Permission::READ),
        ),
        case(
            Op::EmuStart,
            UcErr::INSN_INVALID,
            move || fx.bridge.emu_start(engine, 0x1000, 0x1004, 0, 1),
        ),
        case(
            Op::EmuStop,
            UcErr::ARG,
            move || fx.bridge.emu_stop(engine),
        ),
        case(
            Op::Query,
            UcErr::ARG,
            move || fx.bridge.query(engine, QueryType::MODE).map(drop),
        ),
        case(
            Op::ContextAlloc,
            UcErr::NOMEM,
            move || fx.bridge.context_alloc(engine).map(drop),
        ),
        case(
            Op::ContextSave,
            UcErr::HANDLE,
            move || fx.bridge.context_save(engine, context),
        ),
        case(
            Op::ContextRestore,
            UcErr::EXCEPTION,
            move || fx.bridge.context_restore(engine, context),
        ),
        case(
            Op::Open,
            UcErr::VERSION,
            move || fx.bridge.open(Arch::X86, Mode::MODE_32).map(drop),
        ),
    ];

    for (op, code, call) in cases {
        fx.library.fail_next(op, code);
        match call() {
            Err(Error::Engine(err)) => assert_eq!(err, code, "{op:?}"),
            other => panic!("{op:?}: expected {code:?}, got {other:?}"),
        }
        // Injected failures are one-shot. Mapping changes are not retried so the layout stays put.
        if !matches!(op, Op::MemUnmap | Op::MemMap) {
            call().unwrap();
        }
    }

    fx.library.fail_next(Op::MemRead, UcErr::READ_PROT);
    let err = fx.bridge.mem_read(engine, 0x1000, &mut buf, 4).unwrap_err();
    assert_eq!(err.code(), Some(UcErr::READ_PROT));
}

#[test]
fn stale_engine_handles_raise_handle_errors() {
    let fx = fixture();
    let engine = open(fx);
    fx.bridge.close(engine).unwrap();

    for err in [
        fx.bridge.close(engine).unwrap_err(),
        fx.bridge.errno(engine).unwrap_err(),
        fx.bridge.reg_read(engine, 0).unwrap_err(),
        fx.bridge.emu_stop(engine).unwrap_err(),
        fx.bridge.context_alloc(engine).unwrap_err(),
        fx.bridge.mem_regions(engine).unwrap_err(),
    ] {
        assert_eq!(err.code(), Some(UcErr::HANDLE));
    }
    assert_eq!(
        fx.bridge
            .errno(EngineHandle::from_raw(0))
            .unwrap_err()
            .code(),
        Some(UcErr::HANDLE)
    );
}

#[test]
fn query_forwards_the_result() {
    let fx = fixture();
    let engine = fx.bridge.open(Arch::X86, Mode::MODE_64).unwrap();
    assert_eq!(
        fx.bridge.query(engine, QueryType::PAGE_SIZE).unwrap(),
        PAGE_SIZE as usize
    );
    assert_eq!(
        fx.bridge.query(engine, QueryType::MODE).unwrap(),
        Mode::MODE_64.0 as usize
    );
    assert_eq!(
        fx.bridge.query(engine, QueryType(99)).unwrap_err().code(),
        Some(UcErr::ARG)
    );
    assert_eq!(fx.bridge.errno(engine).unwrap(), UcErr::OK);
}

#[test]
fn contexts_save_and_restore_registers() {
    let fx = fixture();
    let engine = open(fx);
    let context = fx.bridge.context_alloc(engine).unwrap();

    fx.bridge.reg_write(engine, 10, 0x1111).unwrap();
    fx.bridge.context_save(engine, context).unwrap();
    fx.bridge.reg_write(engine, 10, 0x2222).unwrap();
    fx.bridge.context_restore(engine, context).unwrap();
    assert_eq!(fx.bridge.reg_read(engine, 10).unwrap(), 0x1111);

    fx.bridge.context_free(context).unwrap();
}

#[test]
fn freeing_a_context_twice_is_a_handle_error() {
    let fx = fixture();
    let engine = open(fx);
    let context = fx.bridge.context_alloc(engine).unwrap();
    let frees = fx.library.calls(Op::ContextFree);

    fx.bridge.context_free(context).unwrap();
    let err = fx.bridge.context_free(context).unwrap_err();
    assert_eq!(err.code(), Some(UcErr::HANDLE));
    assert_eq!(fx.library.calls(Op::ContextFree), frees + 1);

    let err = fx.bridge.context_save(engine, context).unwrap_err();
    assert_eq!(err.code(), Some(UcErr::HANDLE));
    let err = fx
        .bridge
        .context_free(ContextHandle::from_raw(0))
        .unwrap_err();
    assert_eq!(err.code(), Some(UcErr::HANDLE));
}

#[test]
fn failed_context_free_keeps_the_handle() {
    let fx = fixture();
    let engine = open(fx);
    let context = fx.bridge.context_alloc(engine).unwrap();

    fx.library.fail_next(Op::ContextFree, UcErr::RESOURCE);
    let err = fx.bridge.context_free(context).unwrap_err();
    assert_eq!(err.code(), Some(UcErr::RESOURCE));

    fx.bridge.context_save(engine, context).unwrap();
    fx.bridge.context_free(context).unwrap();
}

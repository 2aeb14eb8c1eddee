use std::sync::Arc;
use std::thread;

use uc_bridge::consts::x86_insn;
use uc_bridge::{
    registry, Arch, DispatchKind, EngineHandle, Error, HookHandle, HookRegistration, HookType,
    HostError, MemType, Mode, Permission, UcErr, Upcall,
};
use uc_testkit::{attach_balanced, fixture, Event, Fixture, Op, RuntimeEvent, ScriptedEngine};

fn open_x86() -> (&'static Fixture, EngineHandle, Arc<ScriptedEngine>) {
    let fx = fixture();
    let engine = fx.bridge.open(Arch::X86, Mode::MODE_32).unwrap();
    let scripted = fx.library.last_engine().unwrap();
    fx.bridge
        .mem_map(engine, 0x1000, 0x1000, Permission::ALL)
        .unwrap();
    (fx, engine, scripted)
}

fn run(fx: &Fixture, engine: EngineHandle) -> uc_bridge::Result<()> {
    fx.bridge.emu_start(engine, 0x1000, 0x2000, 0, 0)
}

fn code_hook(token: u64) -> HookRegistration {
    HookRegistration::new(DispatchKind::Code, HookType::CODE, token)
}

#[test]
fn each_kind_dispatches_once_with_its_slot_layout() {
    let read_unmapped = i64::from(MemType::READ_UNMAPPED.0);
    let write = i64::from(MemType::WRITE.0);
    let cases = [
        (
            DispatchKind::Code,
            HookType::CODE,
            0,
            Event::Code {
                address: 0x1004,
                size: 3,
            },
            [0x1004, 3, 0, 0],
        ),
        (
            DispatchKind::MemInvalid,
            HookType::MEM_READ_UNMAPPED,
            0,
            Event::Read {
                address: 0xdead_0000,
                size: 4,
            },
            [read_unmapped, 0xdead_0000, 4, 0],
        ),
        (
            DispatchKind::MemAccess,
            HookType::MEM_WRITE,
            0,
            Event::Write {
                address: 0x1010,
                size: 2,
                value: 0xbeef,
            },
            [write, 0x1010, 2, 0xbeef],
        ),
        (
            DispatchKind::Interrupt,
            HookType::INTR,
            0,
            Event::Interrupt { intno: 0x80 },
            [0x80, 0, 0, 0],
        ),
        (
            DispatchKind::PortIn,
            HookType::INSN,
            x86_insn::IN,
            Event::PortIn { port: 0x60, size: 1 },
            [0x60, 1, 0, 0],
        ),
        (
            DispatchKind::PortOut,
            HookType::INSN,
            x86_insn::OUT,
            Event::PortOut {
                port: 0x3f8,
                size: 1,
                value: 0x41,
            },
            [0x3f8, 1, 0x41, 0],
        ),
        (
            DispatchKind::Syscall,
            HookType::INSN,
            x86_insn::SYSCALL,
            Event::Syscall,
            [0, 0, 0, 0],
        ),
    ];

    for (index, (kind, hook_type, extra, event, args)) in cases.into_iter().enumerate() {
        let (fx, engine, scripted) = open_x86();
        let token = 0x1000_0000 + index as u64;
        fx.runtime.returning(token, 1);

        fx.bridge
            .hook_add(
                engine,
                HookRegistration::new(kind, hook_type, token).extra(extra.into()),
            )
            .unwrap();
        scripted.script([event]);
        run(fx, engine).unwrap();

        assert_eq!(
            fx.runtime.dispatches(engine.into_raw()),
            vec![Upcall {
                engine: engine.into_raw(),
                token,
                args,
            }],
            "{kind:?}"
        );
        fx.bridge.close(engine).unwrap();
    }
}

#[test]
fn syscall_hooks_fire_only_for_their_instruction() {
    let (fx, engine, scripted) = open_x86();
    let syscall = HookRegistration::new(DispatchKind::Syscall, HookType::INSN, 0x5c)
        .extra(x86_insn::SYSCALL.into());
    let sysenter = HookRegistration::new(DispatchKind::Syscall, HookType::INSN, 0x5e)
        .extra(x86_insn::SYSENTER.into());
    fx.bridge.hook_add(engine, syscall).unwrap();
    fx.bridge.hook_add(engine, sysenter).unwrap();

    scripted.script([Event::Syscall, Event::Syscall, Event::Sysenter]);
    run(fx, engine).unwrap();

    let tokens: Vec<_> = fx
        .runtime
        .dispatches(engine.into_raw())
        .into_iter()
        .map(|upcall| upcall.token)
        .collect();
    assert_eq!(tokens, vec![0x5c, 0x5c, 0x5e]);
}

#[test]
fn token_is_returned_unchanged() {
    let (fx, engine, scripted) = open_x86();
    fx.bridge.hook_add(engine, code_hook(u64::MAX)).unwrap();
    scripted.script([Event::Code {
        address: 0x1000,
        size: 1,
    }]);
    run(fx, engine).unwrap();

    let dispatches = fx.runtime.dispatches(engine.into_raw());
    assert_eq!(dispatches.len(), 1);
    assert_eq!(dispatches[0].token, u64::MAX);
}

#[test]
fn invalid_access_continues_only_when_the_host_handles_it() {
    let answers = [(1, true), (7, true), (0, false), (-1, false)];
    for (index, (answer, continues)) in answers.into_iter().enumerate() {
        let (fx, engine, scripted) = open_x86();
        let token = 0x2000_0000 + index as u64;
        fx.runtime.returning(token, answer);
        fx.bridge
            .hook_add(
                engine,
                HookRegistration::new(DispatchKind::MemInvalid, HookType::MEM_UNMAPPED, token),
            )
            .unwrap();
        scripted.script([
            Event::Write {
                address: 0x8000,
                size: 4,
                value: 1,
            },
            Event::Code {
                address: 0x1000,
                size: 1,
            },
        ]);

        let result = run(fx, engine);
        if continues {
            result.unwrap();
            assert_eq!(scripted.executed(), 2);
        } else {
            assert_eq!(result.unwrap_err().code(), Some(UcErr::WRITE_UNMAPPED));
            assert_eq!(scripted.executed(), 0);
            assert_eq!(fx.bridge.errno(engine).unwrap(), UcErr::WRITE_UNMAPPED);
        }
    }
}

#[test]
fn port_in_value_reaches_the_guest() {
    let (fx, engine, scripted) = open_x86();
    fx.runtime.returning(0x3000_0001, 0xab);
    fx.runtime.returning(0x3000_0002, -1);
    for token in [0x3000_0001, 0x3000_0002] {
        fx.bridge
            .hook_add(
                engine,
                HookRegistration::new(DispatchKind::PortIn, HookType::INSN, token)
                    .extra(x86_insn::IN.into()),
            )
            .unwrap();
    }
    scripted.script([Event::PortIn { port: 0x64, size: 1 }]);
    run(fx, engine).unwrap();

    assert_eq!(scripted.port_in_values(), vec![0xab, 0xffff_ffff]);
}

#[test]
fn hook_ranges_are_forwarded() {
    let (fx, engine, scripted) = open_x86();
    fx.bridge
        .hook_add(engine, code_hook(0x4000_0001).range(0x1004, 0x1007))
        .unwrap();
    scripted.script(
        [0x1000, 0x1004, 0x1007, 0x1008].map(|address| Event::Code { address, size: 1 }),
    );
    run(fx, engine).unwrap();

    let hit: Vec<i64> = fx
        .runtime
        .dispatches(engine.into_raw())
        .iter()
        .map(|upcall| upcall.args[0])
        .collect();
    assert_eq!(hit, vec![0x1004, 0x1007]);
}

#[test]
fn unknown_kind_is_rejected_before_reaching_the_engine() {
    let (fx, engine, scripted) = open_x86();
    let before = fx.library.calls(Op::HookAdd);

    let request = HookRegistration {
        kind: 3,
        ..code_hook(0x5000_0001)
    };
    let err = fx.bridge.hook_add(engine, request).unwrap_err();

    assert_eq!(err.code(), Some(UcErr::ARG));
    assert_eq!(fx.library.calls(Op::HookAdd), before);
    assert_eq!(scripted.hook_count(), 0);
}

#[test]
fn native_hook_add_failure_leaves_no_binding() {
    let (fx, engine, scripted) = open_x86();
    fx.library.fail_next(Op::HookAdd, UcErr::HOOK_EXIST);

    let err = fx.bridge.hook_add(engine, code_hook(0x5000_0002)).unwrap_err();
    assert_eq!(err.code(), Some(UcErr::HOOK_EXIST));
    assert_eq!(scripted.hook_count(), 0);

    // The engine still rejects an undefined hook type on its own.
    let err = fx
        .bridge
        .hook_add(
            engine,
            HookRegistration::new(DispatchKind::Code, HookType::empty(), 0x5000_0003),
        )
        .unwrap_err();
    assert_eq!(err.code(), Some(UcErr::HOOK));
}

#[test]
fn removed_hooks_stop_firing_and_cannot_be_removed_twice() {
    let (fx, engine, scripted) = open_x86();
    let hook = fx.bridge.hook_add(engine, code_hook(0x6000_0001)).unwrap();
    scripted.script([Event::Code {
        address: 0x1000,
        size: 1,
    }]);

    run(fx, engine).unwrap();
    fx.bridge.hook_del(engine, hook).unwrap();
    run(fx, engine).unwrap();
    assert_eq!(fx.runtime.dispatches(engine.into_raw()).len(), 1);

    let deletes = fx.library.calls(Op::HookDel);
    let err = fx.bridge.hook_del(engine, hook).unwrap_err();
    assert_eq!(err.code(), Some(UcErr::HANDLE));
    assert_eq!(fx.library.calls(Op::HookDel), deletes);
    assert_eq!(scripted.removed_hooks().len(), 1);
}

#[test]
fn hooks_cannot_be_removed_through_another_engine() {
    let (fx, first, scripted) = open_x86();
    let (_, second, _) = open_x86();
    let hook = fx.bridge.hook_add(first, code_hook(0x6000_0002)).unwrap();

    let err = fx.bridge.hook_del(second, hook).unwrap_err();
    assert_eq!(err.code(), Some(UcErr::HANDLE));

    let forged = HookHandle::from_raw(hook.into_raw() ^ (1 << 40));
    assert_eq!(
        fx.bridge.hook_del(first, forged).unwrap_err().code(),
        Some(UcErr::HANDLE)
    );

    assert_eq!(scripted.hook_count(), 1);
    fx.bridge.hook_del(first, hook).unwrap();
}

#[test]
fn closing_an_engine_invalidates_its_hooks() {
    let (fx, engine, scripted) = open_x86();
    let hook = fx.bridge.hook_add(engine, code_hook(0x6000_0003)).unwrap();

    fx.bridge.close(engine).unwrap();
    assert!(scripted.is_closed());

    assert_eq!(
        fx.bridge.hook_del(engine, hook).unwrap_err().code(),
        Some(UcErr::HANDLE)
    );
    let (_, other, _) = open_x86();
    assert_eq!(
        fx.bridge.hook_del(other, hook).unwrap_err().code(),
        Some(UcErr::HANDLE)
    );
    assert_eq!(run(fx, engine).unwrap_err().code(), Some(UcErr::HANDLE));
}

#[test]
fn failed_close_keeps_the_engine_and_its_hooks() {
    let (fx, engine, _) = open_x86();
    let hook = fx.bridge.hook_add(engine, code_hook(0x6000_0004)).unwrap();
    fx.library.fail_next(Op::Close, UcErr::RESOURCE);

    assert_eq!(
        fx.bridge.close(engine).unwrap_err().code(),
        Some(UcErr::RESOURCE)
    );
    fx.bridge.hook_del(engine, hook).unwrap();
    fx.bridge.close(engine).unwrap();
}

#[test]
fn every_dispatch_is_bracketed_by_attach_and_detach() {
    let (fx, engine, scripted) = open_x86();
    fx.bridge.hook_add(engine, code_hook(0x7000_0001)).unwrap();
    scripted.script((0..3).map(|i| Event::Code {
        address: 0x1000 + i,
        size: 1,
    }));
    run(fx, engine).unwrap();

    let events = fx.runtime.events_on(thread::current().id());
    let dispatches = events
        .iter()
        .filter(|event| matches!(event, RuntimeEvent::Dispatch(_)))
        .count();
    assert_eq!(dispatches, 3);
    assert_eq!(events.len(), 9);
    assert!(attach_balanced(&events));
}

#[test]
fn hooks_firing_on_engine_threads_are_attached_there() {
    let (fx, engine, scripted) = open_x86();
    fx.bridge.hook_add(engine, code_hook(0x7000_0002)).unwrap();
    scripted.run_on_spawned_thread(true);
    scripted.script((0..2).map(|i| Event::Code {
        address: 0x1000 + i,
        size: 1,
    }));
    run(fx, engine).unwrap();

    let here = thread::current().id();
    let events = fx.runtime.events_for(engine.into_raw());
    assert_eq!(events.len(), 6);
    assert!(events.iter().all(|(thread, _)| *thread != here));

    let foreign = events[0].0;
    let on_foreign: Vec<RuntimeEvent> = fx.runtime.events_on(foreign);
    assert!(attach_balanced(&on_foreign));
}

#[test]
fn host_failure_surfaces_from_emu_start() {
    let (fx, engine, scripted) = open_x86();
    fx.runtime.on(0x8000_0001, |upcall| {
        Err(HostError::raised(format!("bad opcode at {:#x}", upcall.args[0])))
    });
    fx.bridge.hook_add(engine, code_hook(0x8000_0001)).unwrap();
    scripted.script((0..2).map(|i| Event::Code {
        address: 0x1000 + i,
        size: 1,
    }));

    let err = run(fx, engine).unwrap_err();
    match &err {
        Error::HostCallback(HostError::Raised(source)) => {
            assert_eq!(source.to_string(), "bad opcode at 0x1000");
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(err.code(), None);
    // The engine is answered with zero and keeps running.
    assert_eq!(scripted.executed(), 2);
    assert!(attach_balanced(
        &fx.runtime.events_on(thread::current().id())
    ));

    fx.runtime.returning(0x8000_0001, 0);
    run(fx, engine).unwrap();
}

#[test]
fn host_panic_is_contained_and_detaches() {
    let (fx, engine, scripted) = open_x86();
    fx.runtime.on(0x8000_0002, |_| panic!("host callback blew up"));
    fx.bridge.hook_add(engine, code_hook(0x8000_0002)).unwrap();
    scripted.script([Event::Code {
        address: 0x1000,
        size: 1,
    }]);

    match run(fx, engine).unwrap_err() {
        Error::HostCallback(HostError::Panicked(msg)) => {
            assert_eq!(msg, "host callback blew up")
        }
        other => panic!("unexpected error {other:?}"),
    }
    let events = fx.runtime.events_on(thread::current().id());
    assert_eq!(events.last(), Some(&RuntimeEvent::Detach));
    assert!(attach_balanced(&events));
}

#[test]
fn refused_attach_skips_dispatch() {
    let (fx, engine, scripted) = open_x86();
    fx.bridge.hook_add(engine, code_hook(0x8000_0003)).unwrap();
    scripted.script([Event::Code {
        address: 0x1000,
        size: 1,
    }]);

    fx.runtime.refuse_attach(true);
    let result = run(fx, engine);
    fx.runtime.refuse_attach(false);

    assert!(matches!(
        result,
        Err(Error::HostCallback(HostError::Attach(_)))
    ));
    assert!(fx.runtime.dispatches(engine.into_raw()).is_empty());
}

#[test]
fn native_error_takes_precedence_over_host_failure() {
    let (fx, engine, scripted) = open_x86();
    fx.runtime
        .on(0x8000_0004, |_| Err(HostError::raised("ignored")));
    fx.bridge.hook_add(engine, code_hook(0x8000_0004)).unwrap();
    scripted.script([
        Event::Code {
            address: 0x1000,
            size: 1,
        },
        Event::Read {
            address: 0x9000,
            size: 1,
        },
    ]);

    assert_eq!(
        run(fx, engine).unwrap_err().code(),
        Some(UcErr::READ_UNMAPPED)
    );
    // Nothing stale leaks into the next run.
    fx.runtime.returning(0x8000_0004, 0);
    scripted.script([]);
    run(fx, engine).unwrap();
}

#[test]
fn nested_emulation_keeps_the_enclosing_failure() {
    let (fx, engine, scripted) = open_x86();
    let inner = fx.bridge.open(Arch::X86, Mode::MODE_32).unwrap();
    let nested = Arc::new(std::sync::Mutex::new(None));

    fx.runtime
        .on(0x9000_0002, |_| Err(HostError::raised("decoder gave up")));
    let slot = nested.clone();
    fx.runtime.on(0x9000_0003, move |_| {
        let bridge = registry::try_bridge().map_err(HostError::raised)?;
        let result = bridge.emu_start(inner, 0x1000, 0x2000, 0, 0);
        *slot.lock().unwrap() = Some(result.is_ok());
        Ok(0)
    });
    fx.bridge
        .hook_add(engine, code_hook(0x9000_0002).range(0x1000, 0x1000))
        .unwrap();
    fx.bridge
        .hook_add(engine, code_hook(0x9000_0003).range(0x1002, 0x1002))
        .unwrap();
    scripted.script([
        Event::Code {
            address: 0x1000,
            size: 2,
        },
        Event::Code {
            address: 0x1002,
            size: 2,
        },
    ]);

    match run(fx, engine).unwrap_err() {
        Error::HostCallback(HostError::Raised(source)) => {
            assert_eq!(source.to_string(), "decoder gave up");
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(*nested.lock().unwrap(), Some(true));
}

#[test]
fn hooks_can_drive_the_engine_they_fire_on() {
    let (fx, engine, scripted) = open_x86();
    fx.runtime.on(0x9000_0001, move |upcall| {
        let bridge = registry::try_bridge().map_err(HostError::raised)?;
        let engine = EngineHandle::from_raw(upcall.engine);
        bridge.reg_write(engine, 1, upcall.args[0]).map_err(HostError::raised)?;
        bridge.emu_stop(engine).map_err(HostError::raised)?;
        Ok(0)
    });
    fx.bridge.hook_add(engine, code_hook(0x9000_0001)).unwrap();
    scripted.script((0..4).map(|i| Event::Code {
        address: 0x1000 + i,
        size: 1,
    }));

    run(fx, engine).unwrap();
    assert_eq!(scripted.executed(), 1);
    assert_eq!(fx.bridge.reg_read(engine, 1).unwrap(), 0x1000);
}

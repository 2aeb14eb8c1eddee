//! Hook registration and the upcall path back into the host.
//!
//! Every registration binds a [`HookHandle`] to `(engine, token)`. The handle's integer value is
//! what the native engine stores as `user_data`, so an invocation resolves its binding through the
//! live table rather than trusting a pointer. The seven trampolines below each match one native
//! callback shape and funnel into [`upcall`], which attaches the calling thread, calls the host
//! dispatch entry point with four 64-bit slots, and detaches again before the native engine
//! resumes.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::os::raw::c_int;
use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, error, trace, warn};

use crate::bridge::{read, write, Bridge};
use crate::consts::HookType;
use crate::error::{check, Error, Result, UcErr};
use crate::handle::{EngineHandle, HookHandle};
use crate::host::{AttachGuard, HostError, Upcall};
use crate::native::{EnginePtr, NativeCallback, RawHook};
use crate::registry;

/// Which native callback shape a hook binds, and how its arguments are packed into the four
/// upcall slots.
///
/// | kind         | slots                              | host return            |
/// |--------------|------------------------------------|------------------------|
/// | `Code`       | address, size                      | ignored                |
/// | `MemInvalid` | access, address, size, value       | `> 0` = handled        |
/// | `MemAccess`  | access, address, size, value       | ignored                |
/// | `Interrupt`  | intno                              | ignored                |
/// | `PortIn`     | port, size                         | value read from port   |
/// | `PortOut`    | port, size, value                  | ignored                |
/// | `Syscall`    | -                                  | ignored                |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum DispatchKind {
    Code = 1 << 0,
    MemInvalid = 1 << 1,
    MemAccess = 1 << 2,
    Interrupt = 1 << 3,
    PortIn = 1 << 4,
    PortOut = 1 << 5,
    Syscall = 1 << 6,
}

impl DispatchKind {
    pub const ALL: [DispatchKind; 7] = [
        DispatchKind::Code,
        DispatchKind::MemInvalid,
        DispatchKind::MemAccess,
        DispatchKind::Interrupt,
        DispatchKind::PortIn,
        DispatchKind::PortOut,
        DispatchKind::Syscall,
    ];

    pub fn from_raw(raw: c_int) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| *kind as c_int == raw)
    }

    /// Whether registration forwards the extra integer argument (the instruction id).
    pub const fn takes_extra(self) -> bool {
        matches!(
            self,
            DispatchKind::PortIn | DispatchKind::PortOut | DispatchKind::Syscall
        )
    }

    fn native_callback(self, extra: i64) -> NativeCallback {
        match self {
            DispatchKind::Code => NativeCallback::Code(code_hook),
            DispatchKind::MemInvalid => NativeCallback::MemInvalid(mem_invalid_hook),
            DispatchKind::MemAccess => NativeCallback::MemAccess(mem_access_hook),
            DispatchKind::Interrupt => NativeCallback::Interrupt(interrupt_hook),
            DispatchKind::PortIn => NativeCallback::PortIn {
                callback: port_in_hook,
                insn: extra as c_int,
            },
            DispatchKind::PortOut => NativeCallback::PortOut {
                callback: port_out_hook,
                insn: extra as c_int,
            },
            DispatchKind::Syscall => NativeCallback::Syscall {
                callback: syscall_hook,
                insn: extra as c_int,
            },
        }
    }
}

impl TryFrom<c_int> for DispatchKind {
    type Error = Error;

    fn try_from(raw: c_int) -> Result<Self> {
        Self::from_raw(raw).ok_or(Error::Engine(UcErr::ARG))
    }
}

/// A hook registration request as it arrives from the host.
///
/// `kind` stays a raw integer: an unrecognized value is rejected by [`Bridge::hook_add`] before the
/// native engine is asked for anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookRegistration {
    pub kind: c_int,
    pub hook_type: HookType,
    pub token: u64,
    pub begin: u64,
    pub end: u64,
    /// Instruction id, forwarded for the kinds where [`DispatchKind::takes_extra`] holds.
    pub extra: i64,
}

impl HookRegistration {
    /// A registration covering every address (`begin > end`).
    pub fn new(kind: DispatchKind, hook_type: HookType, token: u64) -> Self {
        Self {
            kind: kind as c_int,
            hook_type,
            token,
            begin: 1,
            end: 0,
            extra: 0,
        }
    }

    pub fn range(mut self, begin: u64, end: u64) -> Self {
        self.begin = begin;
        self.end = end;
        self
    }

    pub fn extra(mut self, extra: i64) -> Self {
        self.extra = extra;
        self
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct HookBinding {
    pub(crate) engine: EngineHandle,
    token: u64,
    kind: DispatchKind,
    /// `None` while the native registration is in flight.
    raw: Option<RawHook>,
}

impl Bridge {
    /// Register a hook and return the handle that removes it.
    pub fn hook_add(&self, engine: EngineHandle, request: HookRegistration) -> Result<HookHandle> {
        let kind = DispatchKind::try_from(request.kind)?;
        let native = self.engine(engine)?;

        let hook = write(&self.hooks).insert(HookBinding {
            engine,
            token: request.token,
            kind,
            raw: None,
        })?;

        let mut raw: RawHook = 0;
        let status = native.hook_add(
            &mut raw,
            request.hook_type.bits(),
            kind.native_callback(request.extra),
            hook.into_raw(),
            request.begin,
            request.end,
        );
        if let Err(err) = check(status) {
            write(&self.hooks).remove(hook);
            return Err(err);
        }

        if let Some(binding) = write(&self.hooks).get_mut(hook) {
            binding.raw = Some(raw);
        }
        debug!(
            ?engine,
            ?hook,
            ?kind,
            hook_type = request.hook_type.bits(),
            begin = request.begin,
            end = request.end,
            "added hook"
        );
        Ok(hook)
    }

    /// Remove one hook registration.
    ///
    /// With [`crate::BridgeConfig::strict_hook_removal`] (the default) a handle that is dead or
    /// belongs to another engine raises [`UcErr::HANDLE`] without reaching the native engine.
    /// Otherwise such a handle is forwarded as-is and the native engine's answer is returned.
    pub fn hook_del(&self, engine: EngineHandle, hook: HookHandle) -> Result<()> {
        let native = self.engine(engine)?;

        let binding = read(&self.hooks).get(hook).copied();
        let owned = binding.filter(|binding| binding.engine == engine);
        let raw = match (owned, binding) {
            (Some(HookBinding { raw: Some(raw), .. }), _) => raw,
            _ if self.config.strict_hook_removal => return Err(Error::Engine(UcErr::HANDLE)),
            (_, Some(HookBinding { raw: Some(raw), .. })) => raw,
            _ => hook.into_raw() as RawHook,
        };

        check(native.hook_del(raw))?;
        if owned.is_some() {
            write(&self.hooks).remove(hook);
        }
        debug!(?engine, ?hook, "removed hook");
        Ok(())
    }

    fn dispatch_upcall(
        &self,
        hook: HookHandle,
        args: [i64; 4],
    ) -> std::result::Result<i32, HostError> {
        let Some(binding) = read(&self.hooks).get(hook).copied() else {
            error!(?hook, "upcall for a hook that is not registered");
            return Ok(0);
        };

        let upcall = Upcall {
            engine: binding.engine.into_raw(),
            token: binding.token,
            args,
        };
        if self.config.trace_upcalls {
            trace!(
                ?hook,
                kind = ?binding.kind,
                engine = upcall.engine,
                token = upcall.token,
                ?args,
                "upcall"
            );
        }

        let attached = AttachGuard::attach(self.runtime.as_ref())?;
        attached.dispatch(&upcall)
    }
}

thread_local! {
    /// Host failure raised inside an upcall, waiting for the emulation call on this thread to
    /// return.
    static PENDING: RefCell<Option<HostError>> = const { RefCell::new(None) };
}

fn park(err: HostError) {
    PENDING.with(|pending| {
        let mut pending = pending.borrow_mut();
        match pending.as_ref() {
            None => *pending = Some(err),
            Some(first) => debug!(%first, dropped = %err, "host failure already pending"),
        }
    });
}

pub(crate) fn take_pending() -> Option<HostError> {
    PENDING.with(|pending| pending.borrow_mut().take())
}

pub(crate) fn has_pending() -> bool {
    PENDING.with(|pending| pending.borrow().is_some())
}

thread_local! {
    static EMULATION_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// An `emu_start` in progress on this thread. Hooks may nest further calls inside it.
pub(crate) struct EmulationScope {
    outermost: bool,
}

impl EmulationScope {
    pub(crate) fn enter() -> Self {
        let depth = EMULATION_DEPTH.with(|depth| depth.replace(depth.get() + 1));
        Self {
            outermost: depth == 0,
        }
    }

    pub(crate) fn is_outermost(&self) -> bool {
        self.outermost
    }
}

impl Drop for EmulationScope {
    fn drop(&mut self) {
        EMULATION_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Common path of all trampolines. Never unwinds: the caller is a native frame.
///
/// Host failures answer the native engine with `0` and are parked for
/// [`Bridge::emu_start`] to raise.
fn upcall(user_data: u64, args: [i64; 4]) -> i32 {
    let Some(bridge) = registry::bridge() else {
        error!(user_data, "upcall before the bridge registry was installed");
        return 0;
    };

    let hook = HookHandle::from_raw(user_data);
    match panic::catch_unwind(AssertUnwindSafe(|| bridge.dispatch_upcall(hook, args))) {
        Ok(Ok(value)) => value,
        Ok(Err(err)) => {
            warn!(?hook, %err, "host hook dispatch failed");
            park(err);
            0
        }
        Err(payload) => {
            let msg = panic_message(payload.as_ref());
            warn!(?hook, panic = %msg, "host hook dispatch panicked");
            park(HostError::Panicked(msg));
            0
        }
    }
}

extern "C" fn code_hook(_uc: EnginePtr, address: u64, size: u32, user_data: u64) {
    upcall(user_data, [address as i64, i64::from(size), 0, 0]);
}

extern "C" fn mem_invalid_hook(
    _uc: EnginePtr,
    access: c_int,
    address: u64,
    size: c_int,
    value: i64,
    user_data: u64,
) -> bool {
    let handled = upcall(
        user_data,
        [i64::from(access), address as i64, i64::from(size), value],
    );
    handled > 0
}

extern "C" fn mem_access_hook(
    _uc: EnginePtr,
    access: c_int,
    address: u64,
    size: c_int,
    value: i64,
    user_data: u64,
) {
    upcall(
        user_data,
        [i64::from(access), address as i64, i64::from(size), value],
    );
}

extern "C" fn interrupt_hook(_uc: EnginePtr, intno: u32, user_data: u64) {
    upcall(user_data, [i64::from(intno), 0, 0, 0]);
}

extern "C" fn port_in_hook(_uc: EnginePtr, port: u32, size: c_int, user_data: u64) -> u32 {
    upcall(user_data, [i64::from(port), i64::from(size), 0, 0]) as u32
}

extern "C" fn port_out_hook(
    _uc: EnginePtr,
    port: u32,
    size: c_int,
    value: u32,
    user_data: u64,
) {
    upcall(
        user_data,
        [i64::from(port), i64::from(size), i64::from(value), 0],
    );
}

extern "C" fn syscall_hook(_uc: EnginePtr, user_data: u64) {
    upcall(user_data, [0; 4]);
}

//! The native engine as seen by the bridge.
//!
//! These traits are the C-level surface of the emulation library: every call reports a raw
//! [`UcErr`] status and writes results through out-parameters. The bridge owns translating those
//! statuses (see [`crate::error::check`]); implementations must not panic across these calls.
//!
//! Callback pointers follow the C engine's `uc_cb_*` layouts: the engine pointer first,
//! `user_data` last. `user_data` is carried as a 64-bit word (`void *` on 64-bit targets); it is
//! opaque to the engine and returned unchanged on every invocation.

use std::ffi::c_void;
use std::os::raw::{c_int, c_long};
use std::sync::Arc;

use crate::error::UcErr;

/// Register values as the native engine reads/writes them.
pub type NativeWord = c_long;

/// Native hook id (`uc_hook`).
pub type RawHook = usize;

/// Native context pointer. `0` is null.
pub type RawContext = usize;

/// The `uc_engine *` the native engine passes as the first callback argument.
pub type EnginePtr = *mut c_void;

pub type CodeCallback = extern "C" fn(uc: EnginePtr, address: u64, size: u32, user_data: u64);
pub type MemInvalidCallback = extern "C" fn(
    uc: EnginePtr,
    access: c_int,
    address: u64,
    size: c_int,
    value: i64,
    user_data: u64,
) -> bool;
pub type MemAccessCallback = extern "C" fn(
    uc: EnginePtr,
    access: c_int,
    address: u64,
    size: c_int,
    value: i64,
    user_data: u64,
);
pub type InterruptCallback = extern "C" fn(uc: EnginePtr, intno: u32, user_data: u64);
pub type PortInCallback =
    extern "C" fn(uc: EnginePtr, port: u32, size: c_int, user_data: u64) -> u32;
pub type PortOutCallback =
    extern "C" fn(uc: EnginePtr, port: u32, size: c_int, value: u32, user_data: u64);
pub type SyscallCallback = extern "C" fn(uc: EnginePtr, user_data: u64);

/// One native callback shape, together with the extra registration argument the shape requires.
///
/// `insn` selects the instruction an [`HookType::INSN`](crate::HookType::INSN) hook fires on.
#[derive(Clone, Copy)]
pub enum NativeCallback {
    Code(CodeCallback),
    MemInvalid(MemInvalidCallback),
    MemAccess(MemAccessCallback),
    Interrupt(InterruptCallback),
    PortIn { callback: PortInCallback, insn: c_int },
    PortOut { callback: PortOutCallback, insn: c_int },
    Syscall { callback: SyscallCallback, insn: c_int },
}

impl std::fmt::Debug for NativeCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NativeCallback::Code(_) => f.write_str("Code"),
            NativeCallback::MemInvalid(_) => f.write_str("MemInvalid"),
            NativeCallback::MemAccess(_) => f.write_str("MemAccess"),
            NativeCallback::Interrupt(_) => f.write_str("Interrupt"),
            NativeCallback::PortIn { insn, .. } => write!(f, "PortIn(insn={insn})"),
            NativeCallback::PortOut { insn, .. } => write!(f, "PortOut(insn={insn})"),
            NativeCallback::Syscall { insn, .. } => write!(f, "Syscall(insn={insn})"),
        }
    }
}

/// `uc_mem_region`. `end` follows the native convention and is passed through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct MemRegion {
    pub begin: u64,
    pub end: u64,
    pub perms: u32,
}

/// A native-allocated region array. Must be handed back to [`NativeLibrary::free`] exactly once,
/// including when `count == 0`.
#[derive(Debug)]
pub struct RegionArray {
    pub ptr: *mut MemRegion,
    pub count: u32,
}

impl Default for RegionArray {
    fn default() -> Self {
        Self {
            ptr: std::ptr::null_mut(),
            count: 0,
        }
    }
}

/// Library-level entry points (no engine instance required).
pub trait NativeLibrary: Send + Sync {
    /// Returns the combined version; fills `major`/`minor` when provided.
    fn version(&self, major: Option<&mut u32>, minor: Option<&mut u32>) -> u32;

    fn arch_supported(&self, arch: c_int) -> bool;

    fn open(&self, arch: c_int, mode: c_int, engine: &mut Option<Arc<dyn NativeEngine>>) -> UcErr;

    /// Release a native allocation (region arrays).
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a pointer previously produced by this library and not yet freed.
    unsafe fn free(&self, ptr: *mut c_void) -> UcErr;

    /// Release a context and null the caller's slot.
    fn context_free(&self, context: &mut RawContext) -> UcErr;

    /// Description of a status code (`uc_strerror`).
    fn strerror(&self, code: c_int) -> &'static str;
}

/// Per-instance entry points.
///
/// Methods take `&self`: hooks fire while `emu_start` is on the stack and commonly call back into
/// `emu_stop`, `mem_map` or `reg_read` on the same engine. Callers (not the trait) are responsible
/// for not issuing concurrent operations against one engine from several threads.
pub trait NativeEngine: Send + Sync {
    fn close(&self) -> UcErr;

    fn errno(&self) -> UcErr;

    fn reg_read(&self, regid: c_int, value: &mut NativeWord) -> UcErr;

    fn reg_write(&self, regid: c_int, value: &NativeWord) -> UcErr;

    /// Reads `buf.len()` bytes. On failure, bytes already transferred stay in `buf`.
    fn mem_read(&self, address: u64, buf: &mut [u8]) -> UcErr;

    fn mem_write(&self, address: u64, buf: &[u8]) -> UcErr;

    fn mem_map(&self, address: u64, size: usize, perms: u32) -> UcErr;

    /// # Safety
    ///
    /// `ptr` must point to at least `size` bytes that stay valid and are not otherwise accessed
    /// until the range is unmapped or the engine is closed.
    unsafe fn mem_map_ptr(&self, address: u64, size: usize, perms: u32, ptr: *mut c_void)
        -> UcErr;

    fn mem_unmap(&self, address: u64, size: usize) -> UcErr;

    fn mem_protect(&self, address: u64, size: usize, perms: u32) -> UcErr;

    fn mem_regions(&self, regions: &mut RegionArray) -> UcErr;

    fn emu_start(&self, begin: u64, until: u64, timeout: u64, count: usize) -> UcErr;

    fn emu_stop(&self) -> UcErr;

    fn hook_add(
        &self,
        hook: &mut RawHook,
        hook_type: c_int,
        callback: NativeCallback,
        user_data: u64,
        begin: u64,
        end: u64,
    ) -> UcErr;

    fn hook_del(&self, hook: RawHook) -> UcErr;

    fn query(&self, query: c_int, result: &mut usize) -> UcErr;

    fn context_alloc(&self, context: &mut RawContext) -> UcErr;

    fn context_save(&self, context: RawContext) -> UcErr;

    fn context_restore(&self, context: RawContext) -> UcErr;
}

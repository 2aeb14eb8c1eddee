//! An in-process stand-in for the native emulation library.
//!
//! There is no CPU here: an engine runs a script of [`Event`]s, firing registered hooks the way
//! the real engine would for the corresponding guest activity. Memory, registers, contexts and
//! region arrays are real enough to observe every marshalling rule the bridge applies.

use std::collections::HashMap;
use std::ffi::c_void;
use std::os::raw::c_int;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, ThreadId};

use tracing::{debug, trace};
use uc_bridge::consts::{make_version, x86_insn, API_MAJOR, API_MINOR};
use uc_bridge::native::{
    EnginePtr, MemRegion, NativeCallback, NativeEngine, NativeLibrary, NativeWord, RawContext,
    RawHook, RegionArray,
};
use uc_bridge::{Arch, HookType, MemType, Permission, QueryType, UcErr};

pub const PAGE_SIZE: u64 = 0x1000;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Native entry points, for call accounting and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Open,
    Free,
    ContextFree,
    Close,
    RegRead,
    RegWrite,
    MemRead,
    MemWrite,
    MemMap,
    MemMapPtr,
    MemUnmap,
    MemProtect,
    MemRegions,
    EmuStart,
    EmuStop,
    HookAdd,
    HookDel,
    Query,
    ContextAlloc,
    ContextSave,
    ContextRestore,
}

/// One step of guest activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// An instruction at `address` is about to execute.
    Code { address: u64, size: u32 },
    /// The guest reads `size` bytes.
    Read { address: u64, size: c_int },
    /// The guest writes the low `size` bytes of `value`, little-endian.
    Write { address: u64, size: c_int, value: i64 },
    Interrupt { intno: u32 },
    PortIn { port: u32, size: c_int },
    PortOut { port: u32, size: c_int, value: u32 },
    /// x86 `SYSCALL`.
    Syscall,
    /// x86 `SYSENTER`.
    Sysenter,
}

/// State shared by the library and every engine it opened.
#[derive(Default)]
struct Shared {
    calls: Mutex<Vec<(ThreadId, Op)>>,
    failures: Mutex<HashMap<(ThreadId, Op), UcErr>>,
    region_arrays: Mutex<HashMap<usize, Box<[MemRegion]>>>,
    contexts: Mutex<HashMap<RawContext, HashMap<c_int, NativeWord>>>,
    next_context: AtomicUsize,
    messages: Mutex<HashMap<c_int, &'static str>>,
}

impl Shared {
    /// Record a call and consume a pending injected failure for it.
    fn enter(&self, op: Op) -> Option<UcErr> {
        let thread = thread::current().id();
        lock(&self.calls).push((thread, op));
        lock(&self.failures).remove(&(thread, op))
    }
}

/// The scripted native library.
///
/// Accounting and failure injection are keyed by the calling thread so tests sharing one
/// process-wide bridge do not observe each other.
pub struct ScriptedLibrary {
    shared: Arc<Shared>,
    engines: Mutex<Vec<Arc<ScriptedEngine>>>,
}

impl Default for ScriptedLibrary {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedLibrary {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                next_context: AtomicUsize::new(1),
                ..Shared::default()
            }),
            engines: Mutex::new(Vec::new()),
        }
    }

    /// Make the next `op` issued from the current thread report `err`.
    pub fn fail_next(&self, op: Op, err: UcErr) {
        lock(&self.shared.failures).insert((thread::current().id(), op), err);
    }

    /// Describe `code` as `message` from now on, in place of the built-in string.
    pub fn describe(&self, code: UcErr, message: &'static str) {
        lock(&self.shared.messages).insert(code.0, message);
    }

    /// Number of `op` calls issued from the current thread.
    pub fn calls(&self, op: Op) -> usize {
        let thread = thread::current().id();
        lock(&self.shared.calls)
            .iter()
            .filter(|(caller, called)| *caller == thread && *called == op)
            .count()
    }

    /// Region arrays handed out and not yet freed, across all threads.
    pub fn outstanding_region_arrays(&self) -> usize {
        lock(&self.shared.region_arrays).len()
    }

    pub fn live_contexts(&self) -> usize {
        lock(&self.shared.contexts).len()
    }

    /// The most recent engine opened from the current thread.
    pub fn last_engine(&self) -> Option<Arc<ScriptedEngine>> {
        let thread = thread::current().id();
        lock(&self.engines)
            .iter()
            .rev()
            .find(|engine| engine.opened_on == thread)
            .cloned()
    }
}

impl NativeLibrary for ScriptedLibrary {
    fn version(&self, major: Option<&mut u32>, minor: Option<&mut u32>) -> u32 {
        if let Some(major) = major {
            *major = API_MAJOR;
        }
        if let Some(minor) = minor {
            *minor = API_MINOR;
        }
        make_version(API_MAJOR, API_MINOR)
    }

    fn arch_supported(&self, arch: c_int) -> bool {
        [Arch::ARM, Arch::ARM64, Arch::MIPS, Arch::X86]
            .iter()
            .any(|supported| supported.0 == arch)
    }

    fn open(&self, arch: c_int, mode: c_int, engine: &mut Option<Arc<dyn NativeEngine>>) -> UcErr {
        if let Some(err) = self.shared.enter(Op::Open) {
            return err;
        }
        if !self.arch_supported(arch) {
            return UcErr::ARCH;
        }

        let opened = Arc::new(ScriptedEngine::new(self.shared.clone(), mode));
        lock(&self.engines).push(opened.clone());
        *engine = Some(opened);
        UcErr::OK
    }

    unsafe fn free(&self, ptr: *mut c_void) -> UcErr {
        if let Some(err) = self.shared.enter(Op::Free) {
            return err;
        }
        if ptr.is_null() {
            return UcErr::OK;
        }
        match lock(&self.shared.region_arrays).remove(&(ptr as usize)) {
            Some(_) => UcErr::OK,
            None => UcErr::ARG,
        }
    }

    fn context_free(&self, context: &mut RawContext) -> UcErr {
        if let Some(err) = self.shared.enter(Op::ContextFree) {
            return err;
        }
        if lock(&self.shared.contexts).remove(context).is_none() {
            return UcErr::HANDLE;
        }
        *context = 0;
        UcErr::OK
    }

    fn strerror(&self, code: c_int) -> &'static str {
        lock(&self.shared.messages)
            .get(&code)
            .copied()
            .unwrap_or_else(|| uc_bridge::strerror(code))
    }
}

#[derive(Debug, Clone, Copy)]
struct HookEntry {
    id: RawHook,
    hook_type: HookType,
    callback: NativeCallback,
    user_data: u64,
    begin: u64,
    end: u64,
}

impl HookEntry {
    fn covers(&self, address: u64) -> bool {
        self.begin > self.end || (self.begin <= address && address <= self.end)
    }
}

enum Backing {
    Owned(Vec<u8>),
    /// Caller memory from `mem_map_ptr`, stored as an address so the state stays `Send`.
    Host(usize),
}

struct Region {
    begin: u64,
    size: u64,
    perms: u32,
    backing: Backing,
}

impl Region {
    fn contains(&self, address: u64) -> bool {
        address >= self.begin && address - self.begin < self.size
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        match &mut self.backing {
            Backing::Owned(bytes) => bytes,
            // Safety: `mem_map_ptr` callers guarantee `size` bytes at this address for as long as
            // the region stays mapped.
            Backing::Host(ptr) => unsafe {
                std::slice::from_raw_parts_mut(*ptr as *mut u8, self.size as usize)
            },
        }
    }
}

struct EngineState {
    closed: bool,
    errno: UcErr,
    regs: HashMap<c_int, NativeWord>,
    regions: Vec<Region>,
    hooks: Vec<HookEntry>,
    next_hook: RawHook,
    removed_hooks: Vec<RawHook>,
    script: Vec<Event>,
    port_in_values: Vec<u32>,
    executed: usize,
    threaded: bool,
}

/// One scripted engine instance.
pub struct ScriptedEngine {
    shared: Arc<Shared>,
    mode: c_int,
    opened_on: ThreadId,
    stop: AtomicBool,
    state: Mutex<EngineState>,
}

impl ScriptedEngine {
    fn new(shared: Arc<Shared>, mode: c_int) -> Self {
        Self {
            shared,
            mode,
            opened_on: thread::current().id(),
            stop: AtomicBool::new(false),
            state: Mutex::new(EngineState {
                closed: false,
                errno: UcErr::OK,
                regs: HashMap::new(),
                regions: Vec::new(),
                hooks: Vec::new(),
                next_hook: 1,
                removed_hooks: Vec::new(),
                script: Vec::new(),
                port_in_values: Vec::new(),
                executed: 0,
                threaded: false,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, EngineState> {
        lock(&self.state)
    }

    /// What callbacks receive as the engine pointer.
    fn as_ptr(&self) -> EnginePtr {
        self as *const Self as EnginePtr
    }

    /// Replace the event script run by the next `emu_start`.
    pub fn script(&self, events: impl IntoIterator<Item = Event>) {
        self.state().script = events.into_iter().collect();
    }

    /// Run emulation on a freshly spawned thread, as engines with their own worker threads do.
    pub fn run_on_spawned_thread(&self, threaded: bool) {
        self.state().threaded = threaded;
    }

    /// Values returned by port-in hooks, in event order.
    pub fn port_in_values(&self) -> Vec<u32> {
        self.state().port_in_values.clone()
    }

    /// Events completed by the last `emu_start`.
    pub fn executed(&self) -> usize {
        self.state().executed
    }

    pub fn hook_count(&self) -> usize {
        self.state().hooks.len()
    }

    /// Raw hook ids passed to `hook_del`, in call order.
    pub fn removed_hooks(&self) -> Vec<RawHook> {
        self.state().removed_hooks.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    /// Snapshot of the registered hooks, taken so no lock is held while callbacks run.
    fn hooks(&self) -> Vec<HookEntry> {
        self.state().hooks.clone()
    }

    fn is_mapped(&self, address: u64, size: u64) -> bool {
        let state = self.state();
        (0..size).all(|offset| {
            address
                .checked_add(offset)
                .is_some_and(|byte| state.regions.iter().any(|region| region.contains(byte)))
        })
    }

    /// Copy guest memory into `buf`, stopping at the first unmapped byte.
    fn copy_out(&self, address: u64, buf: &mut [u8]) -> Result<(), usize> {
        let mut state = self.state();
        for (offset, slot) in buf.iter_mut().enumerate() {
            let byte = address.wrapping_add(offset as u64);
            let region = state
                .regions
                .iter_mut()
                .find(|region| region.contains(byte))
                .ok_or(offset)?;
            let index = (byte - region.begin) as usize;
            *slot = region.bytes_mut()[index];
        }
        Ok(())
    }

    fn copy_in(&self, address: u64, buf: &[u8]) -> Result<(), usize> {
        let mut state = self.state();
        for (offset, value) in buf.iter().enumerate() {
            let byte = address.wrapping_add(offset as u64);
            let region = state
                .regions
                .iter_mut()
                .find(|region| region.contains(byte))
                .ok_or(offset)?;
            let index = (byte - region.begin) as usize;
            region.bytes_mut()[index] = *value;
        }
        Ok(())
    }

    fn map(&self, address: u64, size: usize, perms: u32, backing: Backing) -> UcErr {
        let size = size as u64;
        if size == 0
            || address % PAGE_SIZE != 0
            || size % PAGE_SIZE != 0
            || perms & !Permission::ALL.bits() != 0
            || address.checked_add(size).is_none()
        {
            return UcErr::ARG;
        }

        let mut state = self.state();
        let overlaps = state
            .regions
            .iter()
            .any(|region| address < region.begin + region.size && region.begin < address + size);
        if overlaps {
            return UcErr::MAP;
        }
        let backing = match backing {
            Backing::Owned(_) => Backing::Owned(vec![0; size as usize]),
            host => host,
        };
        state.regions.push(Region {
            begin: address,
            size,
            perms,
            backing,
        });
        UcErr::OK
    }

    /// Indices of whole regions exactly tiling `[address, address + size)`.
    fn tiling(state: &EngineState, address: u64, size: u64) -> Result<Vec<usize>, UcErr> {
        if size == 0 || address % PAGE_SIZE != 0 || size % PAGE_SIZE != 0 {
            return Err(UcErr::ARG);
        }
        let end = address.checked_add(size).ok_or(UcErr::ARG)?;
        let mut covered = 0;
        let mut tiles = Vec::new();
        for (index, region) in state.regions.iter().enumerate() {
            let region_end = region.begin + region.size;
            let overlaps = region.begin < end && address < region_end;
            if !overlaps {
                continue;
            }
            if region.begin < address || region_end > end {
                // Splitting a region is not modelled.
                return Err(UcErr::ARG);
            }
            covered += region.size;
            tiles.push(index);
        }
        if covered != size {
            return Err(UcErr::NOMEM);
        }
        Ok(tiles)
    }

    /// Fire every hook of `callback`'s shape selected by `hook_type` and covering `address`.
    fn fire<R>(
        &self,
        hook_type: HookType,
        address: Option<u64>,
        mut call: impl FnMut(&NativeCallback, u64) -> Option<R>,
    ) -> Vec<R> {
        let mut results = Vec::new();
        for hook in self.hooks() {
            if !hook.hook_type.intersects(hook_type) {
                continue;
            }
            if address.is_some_and(|address| !hook.covers(address)) {
                continue;
            }
            if let Some(result) = call(&hook.callback, hook.user_data) {
                results.push(result);
            }
        }
        results
    }

    /// Give invalid-access hooks a chance to fix the fault. `true` if any of them handled it.
    fn gate_invalid(
        &self,
        hook_type: HookType,
        access: MemType,
        address: u64,
        size: c_int,
        value: i64,
    ) -> bool {
        let uc = self.as_ptr();
        let handled = self.fire(hook_type, Some(address), |callback, user_data| match callback {
            NativeCallback::MemInvalid(callback) => {
                Some(callback(uc, access.0, address, size, value, user_data))
            }
            _ => None,
        });
        handled.into_iter().any(|handled| handled)
    }

    fn fire_access(
        &self,
        hook_type: HookType,
        access: MemType,
        address: u64,
        size: c_int,
        value: i64,
    ) {
        let uc = self.as_ptr();
        self.fire(hook_type, Some(address), |callback, user_data| match callback {
            NativeCallback::MemAccess(callback) => {
                callback(uc, access.0, address, size, value, user_data);
                Some(())
            }
            _ => None,
        });
    }

    fn step(&self, event: Event) -> UcErr {
        trace!(?event, "scripted event");
        let uc = self.as_ptr();
        match event {
            Event::Code { address, size } => {
                self.fire(HookType::CODE, Some(address), |callback, user_data| match callback {
                    NativeCallback::Code(callback) => {
                        callback(uc, address, size, user_data);
                        Some(())
                    }
                    _ => None,
                });
            }
            Event::Read { address, size } => {
                if !self.is_mapped(address, size as u64)
                    && !self.gate_invalid(
                        HookType::MEM_READ_UNMAPPED,
                        MemType::READ_UNMAPPED,
                        address,
                        size,
                        0,
                    )
                {
                    return UcErr::READ_UNMAPPED;
                }
                self.fire_access(HookType::MEM_READ, MemType::READ, address, size, 0);
            }
            Event::Write {
                address,
                size,
                value,
            } => {
                if !self.is_mapped(address, size as u64)
                    && !self.gate_invalid(
                        HookType::MEM_WRITE_UNMAPPED,
                        MemType::WRITE_UNMAPPED,
                        address,
                        size,
                        value,
                    )
                {
                    return UcErr::WRITE_UNMAPPED;
                }
                self.fire_access(HookType::MEM_WRITE, MemType::WRITE, address, size, value);
                // A handled fault with nothing mapped behind it drops the store.
                if self.is_mapped(address, size as u64) {
                    let bytes = value.to_le_bytes();
                    let len = (size.max(0) as usize).min(bytes.len());
                    if self.copy_in(address, &bytes[..len]).is_err() {
                        return UcErr::WRITE_UNMAPPED;
                    }
                }
            }
            Event::Interrupt { intno } => {
                self.fire(HookType::INTR, None, |callback, user_data| match callback {
                    NativeCallback::Interrupt(callback) => {
                        callback(uc, intno, user_data);
                        Some(())
                    }
                    _ => None,
                });
            }
            Event::PortIn { port, size } => {
                let values = self.fire(HookType::INSN, None, |callback, user_data| match callback {
                    NativeCallback::PortIn { callback, insn } if *insn == x86_insn::IN => {
                        Some(callback(uc, port, size, user_data))
                    }
                    _ => None,
                });
                self.state().port_in_values.extend(values);
            }
            Event::PortOut { port, size, value } => {
                self.fire(HookType::INSN, None, |callback, user_data| match callback {
                    NativeCallback::PortOut { callback, insn } if *insn == x86_insn::OUT => {
                        callback(uc, port, size, value, user_data);
                        Some(())
                    }
                    _ => None,
                });
            }
            Event::Syscall | Event::Sysenter => {
                let wanted = match event {
                    Event::Syscall => x86_insn::SYSCALL,
                    _ => x86_insn::SYSENTER,
                };
                self.fire(HookType::INSN, None, |callback, user_data| match callback {
                    NativeCallback::Syscall { callback, insn } if *insn == wanted => {
                        callback(uc, user_data);
                        Some(())
                    }
                    _ => None,
                });
            }
        }
        UcErr::OK
    }

    fn run(&self, until: u64, count: usize) -> UcErr {
        let script = self.state().script.clone();
        let mut executed = 0;
        let mut status = UcErr::OK;
        for event in script {
            if self.stop.load(Ordering::SeqCst) || (count != 0 && executed == count) {
                break;
            }
            if matches!(event, Event::Code { address, .. } if address == until) {
                break;
            }
            status = self.step(event);
            if !status.is_ok() {
                break;
            }
            executed += 1;
        }

        let mut state = self.state();
        state.executed = executed;
        state.errno = status;
        status
    }
}

impl NativeEngine for ScriptedEngine {
    fn close(&self) -> UcErr {
        if let Some(err) = self.shared.enter(Op::Close) {
            return err;
        }
        let mut state = self.state();
        state.closed = true;
        state.hooks.clear();
        UcErr::OK
    }

    fn errno(&self) -> UcErr {
        self.state().errno
    }

    fn reg_read(&self, regid: c_int, value: &mut NativeWord) -> UcErr {
        if let Some(err) = self.shared.enter(Op::RegRead) {
            return err;
        }
        if regid < 0 {
            return UcErr::ARG;
        }
        *value = self.state().regs.get(&regid).copied().unwrap_or(0);
        UcErr::OK
    }

    fn reg_write(&self, regid: c_int, value: &NativeWord) -> UcErr {
        if let Some(err) = self.shared.enter(Op::RegWrite) {
            return err;
        }
        if regid < 0 {
            return UcErr::ARG;
        }
        self.state().regs.insert(regid, *value);
        UcErr::OK
    }

    fn mem_read(&self, address: u64, buf: &mut [u8]) -> UcErr {
        if let Some(err) = self.shared.enter(Op::MemRead) {
            return err;
        }
        match self.copy_out(address, buf) {
            Ok(()) => UcErr::OK,
            Err(copied) => {
                debug!(address, copied, "scripted read hit unmapped memory");
                UcErr::READ_UNMAPPED
            }
        }
    }

    fn mem_write(&self, address: u64, buf: &[u8]) -> UcErr {
        if let Some(err) = self.shared.enter(Op::MemWrite) {
            return err;
        }
        match self.copy_in(address, buf) {
            Ok(()) => UcErr::OK,
            Err(_) => UcErr::WRITE_UNMAPPED,
        }
    }

    fn mem_map(&self, address: u64, size: usize, perms: u32) -> UcErr {
        if let Some(err) = self.shared.enter(Op::MemMap) {
            return err;
        }
        self.map(address, size, perms, Backing::Owned(Vec::new()))
    }

    unsafe fn mem_map_ptr(&self, address: u64, size: usize, perms: u32, ptr: *mut c_void) -> UcErr {
        if let Some(err) = self.shared.enter(Op::MemMapPtr) {
            return err;
        }
        if ptr.is_null() {
            return UcErr::ARG;
        }
        self.map(address, size, perms, Backing::Host(ptr as usize))
    }

    fn mem_unmap(&self, address: u64, size: usize) -> UcErr {
        if let Some(err) = self.shared.enter(Op::MemUnmap) {
            return err;
        }
        let mut state = self.state();
        match Self::tiling(&state, address, size as u64) {
            Ok(tiles) => {
                for index in tiles.into_iter().rev() {
                    state.regions.remove(index);
                }
                UcErr::OK
            }
            Err(err) => err,
        }
    }

    fn mem_protect(&self, address: u64, size: usize, perms: u32) -> UcErr {
        if let Some(err) = self.shared.enter(Op::MemProtect) {
            return err;
        }
        if perms & !Permission::ALL.bits() != 0 {
            return UcErr::ARG;
        }
        let mut state = self.state();
        match Self::tiling(&state, address, size as u64) {
            Ok(tiles) => {
                for index in tiles {
                    state.regions[index].perms = perms;
                }
                UcErr::OK
            }
            Err(err) => err,
        }
    }

    fn mem_regions(&self, regions: &mut RegionArray) -> UcErr {
        if let Some(err) = self.shared.enter(Op::MemRegions) {
            return err;
        }
        let mut array: Box<[MemRegion]> = self
            .state()
            .regions
            .iter()
            .map(|region| MemRegion {
                begin: region.begin,
                end: region.begin + region.size - 1,
                perms: region.perms,
            })
            .collect();

        regions.count = array.len() as u32;
        if array.is_empty() {
            regions.ptr = std::ptr::null_mut();
            return UcErr::OK;
        }
        regions.ptr = array.as_mut_ptr();
        lock(&self.shared.region_arrays).insert(regions.ptr as usize, array);
        UcErr::OK
    }

    fn emu_start(&self, begin: u64, until: u64, timeout: u64, count: usize) -> UcErr {
        if let Some(err) = self.shared.enter(Op::EmuStart) {
            return err;
        }
        debug!(begin, until, timeout, count, "scripted emulation start");
        self.stop.store(false, Ordering::SeqCst);

        if !self.state().threaded {
            return self.run(until, count);
        }
        thread::scope(|scope| {
            scope
                .spawn(|| self.run(until, count))
                .join()
                .unwrap_or(UcErr::EXCEPTION)
        })
    }

    fn emu_stop(&self) -> UcErr {
        if let Some(err) = self.shared.enter(Op::EmuStop) {
            return err;
        }
        self.stop.store(true, Ordering::SeqCst);
        UcErr::OK
    }

    fn hook_add(
        &self,
        hook: &mut RawHook,
        hook_type: c_int,
        callback: NativeCallback,
        user_data: u64,
        begin: u64,
        end: u64,
    ) -> UcErr {
        if let Some(err) = self.shared.enter(Op::HookAdd) {
            return err;
        }
        let Some(hook_type) = HookType::from_bits(hook_type).filter(|ty| !ty.is_empty()) else {
            return UcErr::HOOK;
        };

        let mut state = self.state();
        let id = state.next_hook;
        state.next_hook += 1;
        state.hooks.push(HookEntry {
            id,
            hook_type,
            callback,
            user_data,
            begin,
            end,
        });
        *hook = id;
        UcErr::OK
    }

    fn hook_del(&self, hook: RawHook) -> UcErr {
        if let Some(err) = self.shared.enter(Op::HookDel) {
            return err;
        }
        let mut state = self.state();
        state.removed_hooks.push(hook);
        state.hooks.retain(|entry| entry.id != hook);
        UcErr::OK
    }

    fn query(&self, query: c_int, result: &mut usize) -> UcErr {
        if let Some(err) = self.shared.enter(Op::Query) {
            return err;
        }
        match QueryType(query) {
            QueryType::MODE => *result = self.mode as usize,
            QueryType::PAGE_SIZE => *result = PAGE_SIZE as usize,
            _ => return UcErr::ARG,
        }
        UcErr::OK
    }

    fn context_alloc(&self, context: &mut RawContext) -> UcErr {
        if let Some(err) = self.shared.enter(Op::ContextAlloc) {
            return err;
        }
        let raw = self.shared.next_context.fetch_add(1, Ordering::Relaxed);
        lock(&self.shared.contexts).insert(raw, HashMap::new());
        *context = raw;
        UcErr::OK
    }

    fn context_save(&self, context: RawContext) -> UcErr {
        if let Some(err) = self.shared.enter(Op::ContextSave) {
            return err;
        }
        let regs = self.state().regs.clone();
        match lock(&self.shared.contexts).get_mut(&context) {
            Some(saved) => {
                *saved = regs;
                UcErr::OK
            }
            None => UcErr::HANDLE,
        }
    }

    fn context_restore(&self, context: RawContext) -> UcErr {
        if let Some(err) = self.shared.enter(Op::ContextRestore) {
            return err;
        }
        let Some(saved) = lock(&self.shared.contexts).get(&context).cloned() else {
            return UcErr::HANDLE;
        };
        self.state().regs = saved;
        UcErr::OK
    }
}

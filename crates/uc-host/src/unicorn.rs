use std::ffi::c_void;
use std::os::raw::c_int;

use tracing::{debug, warn};
use uc_bridge::consts::x86_insn;
use uc_bridge::{
    ContextHandle, EngineHandle, HookHandle, HookRegistration, HookType, MemType,
    MemoryRegion, Permission, QueryType, UcErr,
};

use crate::error::Result;
use crate::hooks::Hook;
use crate::Host;

/// One emulator instance.
///
/// A facade returned by [`Host::open`] owns its engine and closes it on drop. Hooks receive a
/// borrowed facade for the engine they fire on; dropping that one leaves the engine open.
pub struct Unicorn {
    host: Host,
    engine: EngineHandle,
    owned: bool,
}

impl Unicorn {
    pub(crate) fn owned(host: Host, engine: EngineHandle) -> Self {
        Self {
            host,
            engine,
            owned: true,
        }
    }

    pub(crate) fn borrowed(host: Host, engine: EngineHandle) -> Self {
        Self {
            host,
            engine,
            owned: false,
        }
    }

    pub fn handle(&self) -> EngineHandle {
        self.engine
    }

    /// Close the engine now. Hooks registered on it are dropped.
    ///
    /// A failed close is reported and not retried on drop.
    pub fn close(mut self) -> Result<()> {
        self.owned = false;
        self.close_engine()
    }

    fn close_engine(&self) -> Result<()> {
        self.host.bridge.close(self.engine)?;
        let hooks = self.host.runtime.forget_engine(self.engine);
        debug!(engine = ?self.engine, hooks, "dropped hooks of closed engine");
        Ok(())
    }

    pub fn errno(&self) -> Result<UcErr> {
        Ok(self.host.bridge.errno(self.engine)?)
    }

    pub fn reg_read(&self, regid: c_int) -> Result<i64> {
        Ok(self.host.bridge.reg_read(self.engine, regid)?)
    }

    pub fn reg_write(&self, regid: c_int, value: i64) -> Result<()> {
        Ok(self.host.bridge.reg_write(self.engine, regid, value)?)
    }

    /// Fill `buf` from guest memory at `address`.
    pub fn mem_read(&self, address: u64, buf: &mut [u8]) -> Result<()> {
        let size = buf.len() as u64;
        self.host.bridge.mem_read(self.engine, address, buf, size)?;
        Ok(())
    }

    pub fn mem_read_as_vec(&self, address: u64, size: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0; size];
        self.mem_read(address, &mut buf)?;
        Ok(buf)
    }

    pub fn mem_write(&self, address: u64, data: &[u8]) -> Result<()> {
        self.host
            .bridge
            .mem_write(self.engine, address, data, data.len() as u64)?;
        Ok(())
    }

    pub fn mem_map(&self, address: u64, size: u64, perms: Permission) -> Result<()> {
        Ok(self.host.bridge.mem_map(self.engine, address, size, perms)?)
    }

    /// Map caller-owned memory.
    ///
    /// # Safety
    ///
    /// `ptr` must point to `size` bytes that stay valid, and are not accessed elsewhere, until the
    /// range is unmapped or the engine is closed.
    pub unsafe fn mem_map_ptr(
        &self,
        address: u64,
        size: u64,
        perms: Permission,
        ptr: *mut c_void,
    ) -> Result<()> {
        // Safety: forwarded under the caller's contract.
        unsafe { Ok(self.host.bridge.mem_map_ptr(self.engine, address, size, perms, ptr)?) }
    }

    pub fn mem_unmap(&self, address: u64, size: u64) -> Result<()> {
        Ok(self.host.bridge.mem_unmap(self.engine, address, size)?)
    }

    pub fn mem_protect(&self, address: u64, size: u64, perms: Permission) -> Result<()> {
        Ok(self
            .host
            .bridge
            .mem_protect(self.engine, address, size, perms)?)
    }

    pub fn mem_regions(&self) -> Result<Vec<MemoryRegion>> {
        Ok(self.host.bridge.mem_regions(self.engine)?)
    }

    pub fn query(&self, query: QueryType) -> Result<usize> {
        Ok(self.host.bridge.query(self.engine, query)?)
    }

    /// Emulate from `begin` until `until`, `timeout` microseconds or `count` instructions
    /// (`0` disables the last two limits).
    pub fn emu_start(&self, begin: u64, until: u64, timeout: u64, count: usize) -> Result<()> {
        Ok(self
            .host
            .bridge
            .emu_start(self.engine, begin, until, timeout, count)?)
    }

    pub fn emu_stop(&self) -> Result<()> {
        Ok(self.host.bridge.emu_stop(self.engine)?)
    }

    pub fn context_alloc(&self) -> Result<ContextHandle> {
        Ok(self.host.bridge.context_alloc(self.engine)?)
    }

    pub fn context_save(&self, context: ContextHandle) -> Result<()> {
        Ok(self.host.bridge.context_save(self.engine, context)?)
    }

    pub fn context_restore(&self, context: ContextHandle) -> Result<()> {
        Ok(self.host.bridge.context_restore(self.engine, context)?)
    }

    pub fn context_free(&self, context: ContextHandle) -> Result<()> {
        Ok(self.host.bridge.context_free(context)?)
    }

    fn add_hook(
        &self,
        hook_type: HookType,
        hook: Hook,
        begin: u64,
        end: u64,
        extra: c_int,
    ) -> Result<HookHandle> {
        let kind = hook.kind();
        let token = self.host.runtime.register(self.engine, hook);
        let request = HookRegistration::new(kind, hook_type, token)
            .range(begin, end)
            .extra(extra.into());

        match self.host.bridge.hook_add(self.engine, request) {
            Ok(handle) => {
                self.host.runtime.bind(token, handle);
                Ok(handle)
            }
            Err(err) => {
                self.host.runtime.forget(token);
                Err(err.into())
            }
        }
    }

    /// Fires before every instruction in `begin..=end` (`begin > end` for all addresses).
    pub fn add_code_hook<F>(&self, begin: u64, end: u64, callback: F) -> Result<HookHandle>
    where
        F: FnMut(&Unicorn, u64, u32) + Send + 'static,
    {
        self.add_hook(HookType::CODE, Hook::Code(Box::new(callback)), begin, end, 0)
    }

    /// Fires at the start of every basic block in range.
    pub fn add_block_hook<F>(&self, begin: u64, end: u64, callback: F) -> Result<HookHandle>
    where
        F: FnMut(&Unicorn, u64, u32) + Send + 'static,
    {
        self.add_hook(HookType::BLOCK, Hook::Code(Box::new(callback)), begin, end, 0)
    }

    /// Fires on faulting accesses selected by `hook_type` (a subset of
    /// [`HookType::MEM_INVALID`]). Returning `true` resumes emulation.
    pub fn add_mem_invalid_hook<F>(&self, hook_type: HookType, callback: F) -> Result<HookHandle>
    where
        F: FnMut(&Unicorn, MemType, u64, i32, i64) -> bool + Send + 'static,
    {
        self.add_hook(hook_type, Hook::MemInvalid(Box::new(callback)), 1, 0, 0)
    }

    /// Fires on successful accesses selected by `hook_type` (a subset of
    /// [`HookType::MEM_VALID`]) in `begin..=end`.
    pub fn add_mem_hook<F>(
        &self,
        hook_type: HookType,
        begin: u64,
        end: u64,
        callback: F,
    ) -> Result<HookHandle>
    where
        F: FnMut(&Unicorn, MemType, u64, i32, i64) + Send + 'static,
    {
        self.add_hook(hook_type, Hook::MemAccess(Box::new(callback)), begin, end, 0)
    }

    pub fn add_intr_hook<F>(&self, callback: F) -> Result<HookHandle>
    where
        F: FnMut(&Unicorn, u32) + Send + 'static,
    {
        self.add_hook(HookType::INTR, Hook::Interrupt(Box::new(callback)), 1, 0, 0)
    }

    /// x86 `IN`: the closure returns the value read from the port.
    pub fn add_port_in_hook<F>(&self, callback: F) -> Result<HookHandle>
    where
        F: FnMut(&Unicorn, u32, i32) -> u32 + Send + 'static,
    {
        let hook = Hook::PortIn(Box::new(callback));
        self.add_hook(HookType::INSN, hook, 1, 0, x86_insn::IN)
    }

    /// x86 `OUT`.
    pub fn add_port_out_hook<F>(&self, callback: F) -> Result<HookHandle>
    where
        F: FnMut(&Unicorn, u32, i32, u32) + Send + 'static,
    {
        let hook = Hook::PortOut(Box::new(callback));
        self.add_hook(HookType::INSN, hook, 1, 0, x86_insn::OUT)
    }

    /// x86 `SYSCALL`.
    pub fn add_syscall_hook<F>(&self, callback: F) -> Result<HookHandle>
    where
        F: FnMut(&Unicorn) + Send + 'static,
    {
        let hook = Hook::Syscall(Box::new(callback));
        self.add_hook(HookType::INSN, hook, 1, 0, x86_insn::SYSCALL)
    }

    /// Remove a hook and drop its closure.
    pub fn hook_del(&self, hook: HookHandle) -> Result<()> {
        self.host.bridge.hook_del(self.engine, hook)?;
        self.host.runtime.forget_hook(hook);
        Ok(())
    }
}

impl Drop for Unicorn {
    fn drop(&mut self) {
        if !self.owned {
            return;
        }
        if let Err(err) = self.close_engine() {
            warn!(engine = ?self.engine, %err, "failed to close engine on drop");
        }
    }
}

impl std::fmt::Debug for Unicorn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unicorn")
            .field("engine", &self.engine)
            .field("owned", &self.owned)
            .finish()
    }
}

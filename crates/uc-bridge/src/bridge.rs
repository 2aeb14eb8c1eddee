use std::ffi::c_void;
use std::os::raw::c_int;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, warn};

use crate::config::BridgeConfig;
use crate::consts::{Arch, Mode, Permission, QueryType};
use crate::error::{check, Error, Result, UcErr};
use crate::handle::{ContextHandle, EngineHandle, HandleTable, HookHandle};
use crate::hook::{self, HookBinding};
use crate::host::HostRuntime;
use crate::native::{NativeEngine, NativeLibrary, RawContext};

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug)]
struct ContextSlot {
    raw: RawContext,
}

/// Host-facing surface of the native engine.
///
/// Engines, contexts and hooks are exposed as opaque integer handles. Each handle is validated
/// against its live table before the native object behind it is touched; a stale or forged handle
/// raises [`UcErr::HANDLE`].
///
/// The bridge adds no locking around native calls: issuing concurrent operations against one
/// engine from several threads is the caller's responsibility.
pub struct Bridge {
    library: Arc<dyn NativeLibrary>,
    pub(crate) runtime: Arc<dyn HostRuntime>,
    pub(crate) config: BridgeConfig,
    engines: RwLock<HandleTable<EngineHandle, Arc<dyn NativeEngine>>>,
    contexts: RwLock<HandleTable<ContextHandle, ContextSlot>>,
    pub(crate) hooks: RwLock<HandleTable<HookHandle, HookBinding>>,
}

impl Bridge {
    pub(crate) fn new(
        library: Arc<dyn NativeLibrary>,
        runtime: Arc<dyn HostRuntime>,
        config: BridgeConfig,
    ) -> Self {
        Self {
            library,
            runtime,
            config,
            engines: RwLock::new(HandleTable::new()),
            contexts: RwLock::new(HandleTable::new()),
            hooks: RwLock::new(HandleTable::new()),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub(crate) fn library(&self) -> &dyn NativeLibrary {
        self.library.as_ref()
    }

    /// Resolve a live engine. The table lock is released before the caller uses the engine, so
    /// hooks firing during the native call can re-enter the bridge.
    pub(crate) fn engine(&self, engine: EngineHandle) -> Result<Arc<dyn NativeEngine>> {
        read(&self.engines)
            .get(engine)
            .cloned()
            .ok_or(Error::Engine(UcErr::HANDLE))
    }

    fn context_raw(&self, context: ContextHandle) -> Result<RawContext> {
        read(&self.contexts)
            .get(context)
            .map(|slot| slot.raw)
            .ok_or(Error::Engine(UcErr::HANDLE))
    }

    pub fn version(&self) -> u32 {
        self.library.version(None, None)
    }

    /// `(major, minor)` as reported by the native library.
    pub fn version_parts(&self) -> (u32, u32) {
        let (mut major, mut minor) = (0, 0);
        self.library.version(Some(&mut major), Some(&mut minor));
        (major, minor)
    }

    pub fn arch_supported(&self, arch: Arch) -> bool {
        self.library.arch_supported(arch.0)
    }

    /// The native library's description of a status code; never raises.
    ///
    /// [`UcErr`]'s `Display` uses the built-in table in [`crate::strerror`] instead, so errors stay
    /// printable without an installed bridge.
    pub fn strerror(&self, code: c_int) -> &'static str {
        self.library.strerror(code)
    }

    pub fn open(&self, arch: Arch, mode: Mode) -> Result<EngineHandle> {
        let mut native = None;
        check(self.library.open(arch.0, mode.0, &mut native))?;
        let native = native.ok_or(Error::Engine(UcErr::HANDLE))?;
        let engine = match write(&self.engines).insert(native.clone()) {
            Ok(engine) => engine,
            Err(err) => {
                let status = native.close();
                warn!(%status, "no handle left for a freshly opened engine");
                return Err(err);
            }
        };
        debug!(?engine, arch = arch.0, mode = mode.0, "opened engine");
        Ok(engine)
    }

    /// Close an engine. Every hook handle bound to it becomes invalid.
    ///
    /// On native failure the handle stays live so the caller can retry or abandon it.
    pub fn close(&self, engine: EngineHandle) -> Result<()> {
        let native = self.engine(engine)?;
        check(native.close())?;

        write(&self.engines).remove(engine);
        let dropped = write(&self.hooks).remove_where(|binding| binding.engine == engine);
        debug!(?engine, hooks = dropped.len(), "closed engine");
        Ok(())
    }

    /// Last native error recorded for `engine`.
    pub fn errno(&self, engine: EngineHandle) -> Result<UcErr> {
        Ok(self.engine(engine)?.errno())
    }

    /// Run emulation from `begin` until `until`, a native timeout (microseconds, `0` = none) or
    /// `count` instructions (`0` = unbounded), whichever comes first.
    ///
    /// If a hook's host dispatch failed on this thread while the call was running and the native
    /// engine itself reported success, that failure is raised as [`Error::HostCallback`].
    ///
    /// A call nested inside a hook leaves a failure the enclosing call had already parked for the
    /// enclosing call to raise.
    pub fn emu_start(
        &self,
        engine: EngineHandle,
        begin: u64,
        until: u64,
        timeout: u64,
        count: usize,
    ) -> Result<()> {
        let native = self.engine(engine)?;
        let scope = hook::EmulationScope::enter();
        if scope.is_outermost() {
            if let Some(stale) = hook::take_pending() {
                debug!(%stale, "discarding host failure parked outside emulation");
            }
        }
        let inherited = hook::has_pending();

        let status = native.emu_start(begin, until, timeout, count);
        drop(scope);
        let pending = if inherited {
            None
        } else {
            hook::take_pending()
        };
        if let Err(err) = check(status) {
            if let Some(pending) = pending {
                debug!(%pending, "host failure superseded by native error");
            }
            return Err(err);
        }
        match pending {
            Some(err) => Err(Error::HostCallback(err)),
            None => Ok(()),
        }
    }

    /// Halt a running emulation, typically from inside a hook.
    pub fn emu_stop(&self, engine: EngineHandle) -> Result<()> {
        check(self.engine(engine)?.emu_stop())
    }

    pub fn mem_map(
        &self,
        engine: EngineHandle,
        address: u64,
        size: u64,
        perms: Permission,
    ) -> Result<()> {
        let native = self.engine(engine)?;
        check(native.mem_map(address, native_size(size)?, perms.bits()))
    }

    /// Map caller-owned memory at `address`.
    ///
    /// # Safety
    ///
    /// `ptr` must point to at least `size` bytes that outlive the mapping (until unmapped or the
    /// engine is closed) and are not accessed elsewhere while mapped.
    pub unsafe fn mem_map_ptr(
        &self,
        engine: EngineHandle,
        address: u64,
        size: u64,
        perms: Permission,
        ptr: *mut c_void,
    ) -> Result<()> {
        let native = self.engine(engine)?;
        let size = native_size(size)?;
        // Safety: forwarded verbatim under the caller's contract.
        check(unsafe { native.mem_map_ptr(address, size, perms.bits(), ptr) })
    }

    pub fn mem_unmap(&self, engine: EngineHandle, address: u64, size: u64) -> Result<()> {
        let native = self.engine(engine)?;
        check(native.mem_unmap(address, native_size(size)?))
    }

    pub fn mem_protect(
        &self,
        engine: EngineHandle,
        address: u64,
        size: u64,
        perms: Permission,
    ) -> Result<()> {
        let native = self.engine(engine)?;
        check(native.mem_protect(address, native_size(size)?, perms.bits()))
    }

    pub fn query(&self, engine: EngineHandle, query: QueryType) -> Result<usize> {
        let native = self.engine(engine)?;
        let mut result = 0;
        check(native.query(query.0, &mut result))?;
        Ok(result)
    }

    pub fn context_alloc(&self, engine: EngineHandle) -> Result<ContextHandle> {
        let native = self.engine(engine)?;
        let mut raw = 0;
        check(native.context_alloc(&mut raw))?;
        let context = match write(&self.contexts).insert(ContextSlot { raw }) {
            Ok(context) => context,
            Err(err) => {
                let status = self.library.context_free(&mut raw);
                warn!(%status, "no handle left for a freshly allocated context");
                return Err(err);
            }
        };
        debug!(?engine, ?context, "allocated context");
        Ok(context)
    }

    /// Release a context. The native call nulls its slot and the handle is retired; freeing it
    /// again raises [`UcErr::HANDLE`].
    pub fn context_free(&self, context: ContextHandle) -> Result<()> {
        let mut contexts = write(&self.contexts);
        let slot = contexts
            .get_mut(context)
            .ok_or(Error::Engine(UcErr::HANDLE))?;
        check(self.library.context_free(&mut slot.raw))?;
        contexts.remove(context);
        debug!(?context, "freed context");
        Ok(())
    }

    pub fn context_save(&self, engine: EngineHandle, context: ContextHandle) -> Result<()> {
        let native = self.engine(engine)?;
        check(native.context_save(self.context_raw(context)?))
    }

    pub fn context_restore(&self, engine: EngineHandle, context: ContextHandle) -> Result<()> {
        let native = self.engine(engine)?;
        check(native.context_restore(self.context_raw(context)?))
    }
}

fn native_size(size: u64) -> Result<usize> {
    usize::try_from(size).map_err(|_| Error::Engine(UcErr::ARG))
}

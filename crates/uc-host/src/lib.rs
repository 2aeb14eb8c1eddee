//! Rust host for the emulator bridge.
//!
//! [`load`] installs the process-wide bridge with [`RustRuntime`] as its host runtime. Engines are
//! then opened through [`Host::open`], and hooks are plain Rust closures:
//!
//! ```ignore
//! let host = uc_host::load(library, BridgeConfig::default())?;
//! let uc = host.open(Arch::X86, Mode::MODE_32)?;
//! uc.mem_map(0x1000, 0x1000, Permission::ALL)?;
//! uc.add_code_hook(1, 0, |uc, address, _size| {
//!     if address == 0x1010 {
//!         let _ = uc.emu_stop();
//!     }
//! })?;
//! uc.emu_start(0x1000, 0x2000, 0, 0)?;
//! ```

mod error;
mod hooks;
mod runtime;
mod unicorn;

use std::sync::{Arc, OnceLock};

use tracing::debug;
use uc_bridge::native::NativeLibrary;
use uc_bridge::{registry, Bridge};

pub use crate::error::{Error, Result};
pub use crate::hooks::Hook;
pub use crate::runtime::RustRuntime;
pub use crate::unicorn::Unicorn;
pub use uc_bridge::{
    Arch, BridgeConfig, ContextHandle, EngineHandle, HookHandle, HookType, MemType, MemoryRegion,
    Mode, Permission, QueryType, UcErr,
};

static RUNTIME: OnceLock<Arc<RustRuntime>> = OnceLock::new();

/// The loaded bridge together with the Rust runtime serving its upcalls.
#[derive(Clone, Copy)]
pub struct Host {
    bridge: &'static Bridge,
    runtime: &'static RustRuntime,
}

impl Host {
    pub fn open(self, arch: Arch, mode: Mode) -> Result<Unicorn> {
        let engine = self.bridge.open(arch, mode)?;
        Ok(Unicorn::owned(self, engine))
    }

    pub fn bridge(&self) -> &'static Bridge {
        self.bridge
    }

    pub fn runtime(&self) -> &'static RustRuntime {
        self.runtime
    }

    pub fn version(&self) -> (u32, u32) {
        self.bridge.version_parts()
    }

    pub fn arch_supported(&self, arch: Arch) -> bool {
        self.bridge.arch_supported(arch)
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("version", &self.version())
            .field("hooks", &self.runtime.hook_count())
            .finish()
    }
}

/// Install the bridge with the Rust runtime. Can succeed once per process.
pub fn load(library: Arc<dyn NativeLibrary>, config: BridgeConfig) -> Result<Host> {
    let runtime = Arc::new(RustRuntime::new());
    let bridge = registry::install(library, runtime.clone(), config)?;
    // Installing succeeded, so no other runtime can have claimed the slot.
    let runtime: &'static RustRuntime = RUNTIME.get_or_init(|| runtime);
    debug!("loaded Rust host runtime");
    Ok(Host { bridge, runtime })
}

/// The host installed by [`load`], if any.
pub fn host() -> Option<Host> {
    let runtime = RUNTIME.get()?.as_ref();
    let bridge = registry::bridge()?;
    Some(Host { bridge, runtime })
}

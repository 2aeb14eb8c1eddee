//! Process-wide bridge registry.
//!
//! Native callbacks carry only a 64-bit `user_data` word, so the trampolines need a global place to
//! find the host runtime and the binding tables. The registry is installed once, when the host
//! loads the native library, and stays for the life of the process.

use std::sync::{Arc, OnceLock};

use tracing::debug;

use crate::bridge::Bridge;
use crate::config::BridgeConfig;
use crate::error::{Error, Result};
use crate::host::HostRuntime;
use crate::native::NativeLibrary;

static BRIDGE: OnceLock<Bridge> = OnceLock::new();

/// Install the bridge. Fails with [`Error::AlreadyInstalled`] on every call after the first.
pub fn install(
    library: Arc<dyn NativeLibrary>,
    runtime: Arc<dyn HostRuntime>,
    config: BridgeConfig,
) -> Result<&'static Bridge> {
    let mut installed = false;
    let bridge = BRIDGE.get_or_init(|| {
        installed = true;
        Bridge::new(library, runtime, config)
    });
    if !installed {
        return Err(Error::AlreadyInstalled);
    }

    let (major, minor) = bridge.version_parts();
    debug!(major, minor, config = ?bridge.config(), "installed bridge registry");
    Ok(bridge)
}

pub fn bridge() -> Option<&'static Bridge> {
    BRIDGE.get()
}

pub fn try_bridge() -> Result<&'static Bridge> {
    bridge().ok_or(Error::NotInstalled)
}

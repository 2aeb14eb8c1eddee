//! Bridge between a host runtime and a native CPU emulation engine.
//!
//! The host sees engines, saved contexts and hook registrations as opaque 64-bit handles. Native
//! status codes surface as [`Error::Engine`]; hook invocations arriving from the engine (possibly
//! on threads the host has never seen) are marshalled into a single fixed-arity
//! [`HostRuntime::dispatch`] call with the calling thread attached for exactly that call.
//!
//! ```text
//! host ──► Bridge ──► NativeEngine
//!   ▲                    │ hook fires
//!   └── HostRuntime ◄── trampoline (attach → dispatch → detach)
//! ```

mod bridge;
mod config;
pub mod consts;
mod error;
mod handle;
mod hook;
mod host;
mod marshal;
pub mod native;
mod regions;
pub mod registry;

pub use crate::bridge::Bridge;
pub use crate::config::BridgeConfig;
pub use crate::consts::{Arch, HookType, MemType, Mode, Permission, QueryType};
pub use crate::error::{check, strerror, Error, Result, UcErr};
pub use crate::handle::{ContextHandle, EngineHandle, HandleTable, HookHandle, SlotHandle};
pub use crate::hook::{DispatchKind, HookRegistration};
pub use crate::host::{AttachGuard, BoxError, HostError, HostRuntime, Upcall};
pub use crate::marshal::clamp_len;
pub use crate::regions::MemoryRegion;

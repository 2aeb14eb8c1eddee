use std::cell::Cell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

use tracing::trace;
use uc_bridge::{EngineHandle, HookHandle, HostError, HostRuntime, Upcall};

use crate::error::Error;
use crate::hooks::Hook;
use crate::unicorn::Unicorn;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

thread_local! {
    static ATTACH_DEPTH: Cell<usize> = const { Cell::new(0) };
}

struct Registered {
    engine: EngineHandle,
    hook: Option<HookHandle>,
    callback: Arc<Mutex<Hook>>,
}

/// Host runtime for hooks written in Rust.
///
/// Each registered closure gets a token; the token is what the bridge hands back on every upcall.
pub struct RustRuntime {
    next_token: AtomicU64,
    hooks: Mutex<HashMap<u64, Registered>>,
}

impl Default for RustRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl RustRuntime {
    pub fn new() -> Self {
        Self {
            next_token: AtomicU64::new(1),
            hooks: Mutex::new(HashMap::new()),
        }
    }

    /// Store `callback` for `engine` and return its token.
    pub(crate) fn register(&self, engine: EngineHandle, callback: Hook) -> u64 {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        lock(&self.hooks).insert(
            token,
            Registered {
                engine,
                hook: None,
                callback: Arc::new(Mutex::new(callback)),
            },
        );
        token
    }

    pub(crate) fn bind(&self, token: u64, hook: HookHandle) {
        if let Some(registered) = lock(&self.hooks).get_mut(&token) {
            registered.hook = Some(hook);
        }
    }

    pub(crate) fn forget(&self, token: u64) {
        lock(&self.hooks).remove(&token);
    }

    pub(crate) fn forget_hook(&self, hook: HookHandle) {
        lock(&self.hooks).retain(|_, registered| registered.hook != Some(hook));
    }

    pub(crate) fn forget_engine(&self, engine: EngineHandle) -> usize {
        let mut hooks = lock(&self.hooks);
        let before = hooks.len();
        hooks.retain(|_, registered| registered.engine != engine);
        before - hooks.len()
    }

    /// Closures currently registered, across all engines.
    pub fn hook_count(&self) -> usize {
        lock(&self.hooks).len()
    }

    /// Attach nesting depth of the calling thread.
    pub fn attach_depth() -> usize {
        ATTACH_DEPTH.with(Cell::get)
    }
}

impl HostRuntime for RustRuntime {
    fn attach_current_thread(&self) -> Result<(), HostError> {
        ATTACH_DEPTH.with(|depth| {
            if depth.get() == 0 {
                trace!("attached thread to Rust runtime");
            }
            depth.set(depth.get() + 1);
        });
        Ok(())
    }

    fn detach_current_thread(&self) {
        ATTACH_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }

    fn dispatch(&self, upcall: &Upcall) -> Result<i32, HostError> {
        if Self::attach_depth() == 0 {
            return Err(HostError::Attach("dispatch on a detached thread".into()));
        }
        let host = crate::host().ok_or_else(|| HostError::raised(Error::NotLoaded))?;

        let callback = lock(&self.hooks)
            .get(&upcall.token)
            .map(|registered| registered.callback.clone())
            .ok_or_else(|| HostError::raised(Error::UnknownToken(upcall.token)))?;
        let mut hook = match callback.try_lock() {
            Ok(hook) => hook,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                return Err(HostError::raised(Error::Reentered(upcall.token)))
            }
        };

        let uc = Unicorn::borrowed(host, EngineHandle::from_raw(upcall.engine));
        Ok(hook.invoke(&uc, upcall.args))
    }
}

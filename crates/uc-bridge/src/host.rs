//! The host runtime the bridge calls back into.

use std::error::Error as StdError;

use thiserror::Error;

pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("failed to attach thread to host runtime: {0}")]
    Attach(String),

    #[error("host dispatch raised: {0}")]
    Raised(#[source] BoxError),

    #[error("host dispatch panicked: {0}")]
    Panicked(String),
}

impl HostError {
    pub fn raised(err: impl Into<BoxError>) -> Self {
        HostError::Raised(err.into())
    }
}

/// Arguments of one hook invocation as they reach the host dispatch entry point.
///
/// `engine` and `token` are the opaque integers the host registered with; `args` are populated
/// per dispatch kind and zero-filled past the kind's arity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Upcall {
    pub engine: u64,
    pub token: u64,
    pub args: [i64; 4],
}

/// Threading + dispatch primitives of the host runtime.
///
/// Hooks can fire on threads the host has never seen. Before each dispatch the bridge attaches the
/// calling thread and detaches it afterwards; the pair is scoped to one upcall and never cached.
pub trait HostRuntime: Send + Sync {
    /// Associate the current (possibly foreign) thread with the runtime.
    ///
    /// Must tolerate threads with no prior runtime state. The bridge never calls this twice on one
    /// thread without an intervening [`HostRuntime::detach_current_thread`].
    fn attach_current_thread(&self) -> Result<(), HostError>;

    fn detach_current_thread(&self);

    /// The single fixed-arity host dispatch entry point. The host recovers its typed callback from
    /// `upcall.token` and returns the integer the hook kind expects.
    fn dispatch(&self, upcall: &Upcall) -> Result<i32, HostError>;
}

/// Holds the calling thread attached; detaches on drop, including during unwinding.
#[must_use = "the thread is detached as soon as the guard is dropped"]
pub struct AttachGuard<'a> {
    runtime: &'a dyn HostRuntime,
}

impl<'a> AttachGuard<'a> {
    pub fn attach(runtime: &'a dyn HostRuntime) -> Result<Self, HostError> {
        runtime.attach_current_thread()?;
        Ok(Self { runtime })
    }

    pub fn dispatch(&self, upcall: &Upcall) -> Result<i32, HostError> {
        self.runtime.dispatch(upcall)
    }
}

impl Drop for AttachGuard<'_> {
    fn drop(&mut self) {
        self.runtime.detach_current_thread();
    }
}

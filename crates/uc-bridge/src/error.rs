use std::fmt;
use std::os::raw::c_int;

use thiserror::Error;

use crate::host::HostError;

pub type Result<T> = std::result::Result<T, Error>;

/// Native engine status code.
///
/// Kept as a transparent integer rather than an enum: codes cross the boundary untouched, and a
/// newer engine may report values this table does not name yet. [`UcErr::OK`] is the only
/// "no error" sentinel.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct UcErr(pub c_int);

impl UcErr {
    pub const OK: Self = Self(0);
    pub const NOMEM: Self = Self(1);
    pub const ARCH: Self = Self(2);
    pub const HANDLE: Self = Self(3);
    pub const MODE: Self = Self(4);
    pub const VERSION: Self = Self(5);
    pub const READ_UNMAPPED: Self = Self(6);
    pub const WRITE_UNMAPPED: Self = Self(7);
    pub const FETCH_UNMAPPED: Self = Self(8);
    pub const HOOK: Self = Self(9);
    pub const INSN_INVALID: Self = Self(10);
    pub const MAP: Self = Self(11);
    pub const WRITE_PROT: Self = Self(12);
    pub const READ_PROT: Self = Self(13);
    pub const FETCH_PROT: Self = Self(14);
    pub const ARG: Self = Self(15);
    pub const READ_UNALIGNED: Self = Self(16);
    pub const WRITE_UNALIGNED: Self = Self(17);
    pub const FETCH_UNALIGNED: Self = Self(18);
    pub const HOOK_EXIST: Self = Self(19);
    pub const RESOURCE: Self = Self(20);
    pub const EXCEPTION: Self = Self(21);

    pub const fn code(self) -> c_int {
        self.0
    }

    pub const fn is_ok(self) -> bool {
        self.0 == Self::OK.0
    }

    /// Human-readable description of the code. Pure lookup; never raises.
    pub const fn message(self) -> &'static str {
        strerror(self.0)
    }
}

impl From<c_int> for UcErr {
    fn from(code: c_int) -> Self {
        Self(code)
    }
}

impl fmt::Debug for UcErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UcErr({})", self.0)
    }
}

impl fmt::Display for UcErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Built-in descriptions of the 1.x status codes.
pub const fn strerror(code: c_int) -> &'static str {
    match code {
        0 => "OK (UC_ERR_OK)",
        1 => "No memory available or memory not present (UC_ERR_NOMEM)",
        2 => "Invalid/unsupported architecture (UC_ERR_ARCH)",
        3 => "Invalid handle (UC_ERR_HANDLE)",
        4 => "Invalid mode (UC_ERR_MODE)",
        5 => "Different API version between core & binding (UC_ERR_VERSION)",
        6 => "Invalid memory read (UC_ERR_READ_UNMAPPED)",
        7 => "Invalid memory write (UC_ERR_WRITE_UNMAPPED)",
        8 => "Invalid memory fetch (UC_ERR_FETCH_UNMAPPED)",
        9 => "Invalid hook type (UC_ERR_HOOK)",
        10 => "Invalid instruction (UC_ERR_INSN_INVALID)",
        11 => "Invalid memory mapping (UC_ERR_MAP)",
        12 => "Write to write-protected memory (UC_ERR_WRITE_PROT)",
        13 => "Read from non-readable memory (UC_ERR_READ_PROT)",
        14 => "Fetch from non-executable memory (UC_ERR_FETCH_PROT)",
        15 => "Invalid argument (UC_ERR_ARG)",
        16 => "Read from unaligned memory (UC_ERR_READ_UNALIGNED)",
        17 => "Write to unaligned memory (UC_ERR_WRITE_UNALIGNED)",
        18 => "Fetch from unaligned memory (UC_ERR_FETCH_UNALIGNED)",
        19 => "Hook for this event already existed (UC_ERR_HOOK_EXIST)",
        20 => "Insufficient resource (UC_ERR_RESOURCE)",
        21 => "Unhandled CPU exception (UC_ERR_EXCEPTION)",
        _ => "Unknown error code",
    }
}

/// Translate a native status into a `Result`.
///
/// Every forwarded operation goes through here, including the ones whose native call has no
/// result beyond its status.
#[inline]
pub fn check(status: UcErr) -> Result<()> {
    if status.is_ok() {
        Ok(())
    } else {
        Err(Error::Engine(status))
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// Non-OK native status, or a bridge-side rejection reported in the same code space.
    #[error("{0} (code {code})", code = .0.code())]
    Engine(UcErr),

    /// The host dispatch entry point failed inside a hook fired by the emulation call that
    /// returned this error.
    #[error("host hook dispatch failed: {0}")]
    HostCallback(#[source] HostError),

    #[error("bridge registry is already installed")]
    AlreadyInstalled,

    #[error("bridge registry is not installed")]
    NotInstalled,
}

impl Error {
    /// Native status carried by this error, if it is an engine error.
    pub fn code(&self) -> Option<UcErr> {
        match self {
            Error::Engine(code) => Some(*code),
            _ => None,
        }
    }
}

impl From<UcErr> for Error {
    fn from(code: UcErr) -> Self {
        Error::Engine(code)
    }
}

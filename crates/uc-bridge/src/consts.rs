//! Numeric vocabulary shared with the native engine (1.x ABI values).
//!
//! These are forwarded verbatim; the bridge never interprets an architecture, mode, or hook type
//! beyond passing it to the native side.

use std::os::raw::c_int;

use bitflags::bitflags;

pub const API_MAJOR: u32 = 1;
pub const API_MINOR: u32 = 0;

/// Combined version number as reported by the native version query: `(major << 8) | minor`.
pub const fn make_version(major: u32, minor: u32) -> u32 {
    (major << 8) | minor
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Arch(pub c_int);

impl Arch {
    pub const ARM: Self = Self(1);
    pub const ARM64: Self = Self(2);
    pub const MIPS: Self = Self(3);
    pub const X86: Self = Self(4);
    pub const PPC: Self = Self(5);
    pub const SPARC: Self = Self(6);
    pub const M68K: Self = Self(7);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Mode(pub c_int);

impl Mode {
    pub const LITTLE_ENDIAN: Self = Self(0);
    pub const BIG_ENDIAN: Self = Self(1 << 30);
    pub const ARM: Self = Self(0);
    pub const THUMB: Self = Self(1 << 4);
    pub const MODE_16: Self = Self(1 << 1);
    pub const MODE_32: Self = Self(1 << 2);
    pub const MODE_64: Self = Self(1 << 3);
}

bitflags! {
    /// Memory region permissions.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Permission: u32 {
        const NONE = 0;
        const READ = 1;
        const WRITE = 2;
        const EXEC = 4;
        const ALL = 7;
    }
}

bitflags! {
    /// Native hook-type selector. Refines which engine events fire a hook; passed straight
    /// through on registration.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct HookType: c_int {
        const INTR = 1 << 0;
        const INSN = 1 << 1;
        const CODE = 1 << 2;
        const BLOCK = 1 << 3;
        const MEM_READ_UNMAPPED = 1 << 4;
        const MEM_WRITE_UNMAPPED = 1 << 5;
        const MEM_FETCH_UNMAPPED = 1 << 6;
        const MEM_READ_PROT = 1 << 7;
        const MEM_WRITE_PROT = 1 << 8;
        const MEM_FETCH_PROT = 1 << 9;
        const MEM_READ = 1 << 10;
        const MEM_WRITE = 1 << 11;
        const MEM_FETCH = 1 << 12;
        const MEM_READ_AFTER = 1 << 13;

        const MEM_UNMAPPED = Self::MEM_READ_UNMAPPED.bits()
            | Self::MEM_WRITE_UNMAPPED.bits()
            | Self::MEM_FETCH_UNMAPPED.bits();
        const MEM_PROT = Self::MEM_READ_PROT.bits()
            | Self::MEM_WRITE_PROT.bits()
            | Self::MEM_FETCH_PROT.bits();
        const MEM_INVALID = Self::MEM_UNMAPPED.bits() | Self::MEM_PROT.bits();
        const MEM_VALID = Self::MEM_READ.bits() | Self::MEM_WRITE.bits() | Self::MEM_FETCH.bits();
    }
}

/// Memory access type reported to memory hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct MemType(pub c_int);

impl MemType {
    pub const READ: Self = Self(16);
    pub const WRITE: Self = Self(17);
    pub const FETCH: Self = Self(18);
    pub const READ_UNMAPPED: Self = Self(19);
    pub const WRITE_UNMAPPED: Self = Self(20);
    pub const FETCH_UNMAPPED: Self = Self(21);
    pub const WRITE_PROT: Self = Self(22);
    pub const READ_PROT: Self = Self(23);
    pub const FETCH_PROT: Self = Self(24);
    pub const READ_AFTER: Self = Self(25);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct QueryType(pub c_int);

impl QueryType {
    pub const MODE: Self = Self(1);
    pub const PAGE_SIZE: Self = Self(2);
}

/// x86 instruction ids used as the extra registration argument of port hooks.
pub mod x86_insn {
    use std::os::raw::c_int;

    pub const IN: c_int = 218;
    pub const OUT: c_int = 500;
    pub const SYSCALL: c_int = 699;
    pub const SYSENTER: c_int = 700;
}

//! Typed hook closures and their mapping onto the four upcall slots.

use std::fmt;
use std::os::raw::c_int;

use uc_bridge::{DispatchKind, MemType};

use crate::unicorn::Unicorn;

pub type CodeHook = Box<dyn FnMut(&Unicorn, u64, u32) + Send>;
pub type MemInvalidHook = Box<dyn FnMut(&Unicorn, MemType, u64, i32, i64) -> bool + Send>;
pub type MemAccessHook = Box<dyn FnMut(&Unicorn, MemType, u64, i32, i64) + Send>;
pub type InterruptHook = Box<dyn FnMut(&Unicorn, u32) + Send>;
pub type PortInHook = Box<dyn FnMut(&Unicorn, u32, i32) -> u32 + Send>;
pub type PortOutHook = Box<dyn FnMut(&Unicorn, u32, i32, u32) + Send>;
pub type SyscallHook = Box<dyn FnMut(&Unicorn) + Send>;

pub enum Hook {
    Code(CodeHook),
    /// Return `true` when the fault was handled and emulation may continue.
    MemInvalid(MemInvalidHook),
    MemAccess(MemAccessHook),
    Interrupt(InterruptHook),
    /// Returns the value the guest reads from the port.
    PortIn(PortInHook),
    PortOut(PortOutHook),
    Syscall(SyscallHook),
}

impl Hook {
    pub fn kind(&self) -> DispatchKind {
        match self {
            Hook::Code(_) => DispatchKind::Code,
            Hook::MemInvalid(_) => DispatchKind::MemInvalid,
            Hook::MemAccess(_) => DispatchKind::MemAccess,
            Hook::Interrupt(_) => DispatchKind::Interrupt,
            Hook::PortIn(_) => DispatchKind::PortIn,
            Hook::PortOut(_) => DispatchKind::PortOut,
            Hook::Syscall(_) => DispatchKind::Syscall,
        }
    }

    /// Run the closure with its arguments narrowed out of `args` and widen its result back into
    /// the upcall's integer return. Kinds without a result answer `0`.
    pub fn invoke(&mut self, uc: &Unicorn, args: [i64; 4]) -> i32 {
        match self {
            Hook::Code(hook) => {
                hook(uc, args[0] as u64, args[1] as u32);
                0
            }
            Hook::MemInvalid(hook) => {
                let handled = hook(
                    uc,
                    MemType(args[0] as c_int),
                    args[1] as u64,
                    args[2] as i32,
                    args[3],
                );
                i32::from(handled)
            }
            Hook::MemAccess(hook) => {
                hook(
                    uc,
                    MemType(args[0] as c_int),
                    args[1] as u64,
                    args[2] as i32,
                    args[3],
                );
                0
            }
            Hook::Interrupt(hook) => {
                hook(uc, args[0] as u32);
                0
            }
            Hook::PortIn(hook) => hook(uc, args[0] as u32, args[1] as i32) as i32,
            Hook::PortOut(hook) => {
                hook(uc, args[0] as u32, args[1] as i32, args[2] as u32);
                0
            }
            Hook::Syscall(hook) => {
                hook(uc);
                0
            }
        }
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Hook").field(&self.kind()).finish()
    }
}

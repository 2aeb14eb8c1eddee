use tracing::warn;

use crate::bridge::Bridge;
use crate::consts::Permission;
use crate::error::{check, Result};
use crate::handle::EngineHandle;
use crate::native::{MemRegion, NativeLibrary, RegionArray};

/// One mapped range as reported to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    pub begin: u64,
    pub end: u64,
    pub perms: Permission,
}

impl MemoryRegion {
    pub fn new(begin: u64, end: u64, perms: u32) -> Self {
        Self {
            begin,
            end,
            perms: Permission::from_bits_retain(perms),
        }
    }
}

impl From<&MemRegion> for MemoryRegion {
    fn from(region: &MemRegion) -> Self {
        MemoryRegion::new(region.begin, region.end, region.perms)
    }
}

/// Owns a native region array and hands it back to the library on drop.
struct NativeRegions<'a> {
    library: &'a dyn NativeLibrary,
    array: RegionArray,
}

impl NativeRegions<'_> {
    fn as_slice(&self) -> &[MemRegion] {
        if self.array.ptr.is_null() || self.array.count == 0 {
            return &[];
        }
        // Safety: the library reported `count` initialised regions at `ptr`, which stay alive
        // until `free` runs in `drop`.
        unsafe { std::slice::from_raw_parts(self.array.ptr, self.array.count as usize) }
    }
}

impl Drop for NativeRegions<'_> {
    fn drop(&mut self) {
        // Safety: `ptr` came from `mem_regions` on this library and is released exactly once.
        let status = unsafe { self.library.free(self.array.ptr.cast()) };
        if !status.is_ok() {
            warn!(%status, "failed to release native region array");
        }
    }
}

impl Bridge {
    /// Snapshot of the mapped regions, in native order.
    pub fn mem_regions(&self, engine: EngineHandle) -> Result<Vec<MemoryRegion>> {
        let native = self.engine(engine)?;
        let mut array = RegionArray::default();
        // A failed query allocated nothing, so there is nothing to release.
        check(native.mem_regions(&mut array))?;
        let regions = NativeRegions {
            library: self.library(),
            array,
        };
        Ok(regions.as_slice().iter().map(MemoryRegion::from).collect())
    }
}

//! Register and memory transfer between host values/buffers and the native engine.

use std::os::raw::c_int;

use crate::bridge::Bridge;
use crate::error::{check, Result};
use crate::handle::EngineHandle;
use crate::native::NativeWord;

/// Bytes actually transferred for a buffer of `capacity` bytes and a declared `size`.
pub fn clamp_len(capacity: usize, size: u64) -> usize {
    usize::try_from(size).map_or(capacity, |size| size.min(capacity))
}

impl Bridge {
    /// Read a register. The native word is widened to 64 bits.
    pub fn reg_read(&self, engine: EngineHandle, regid: c_int) -> Result<i64> {
        let native = self.engine(engine)?;
        let mut value: NativeWord = 0;
        check(native.reg_read(regid, &mut value))?;
        Ok(i64::from(value))
    }

    /// Write a register. `value` is narrowed to the native word width.
    pub fn reg_write(&self, engine: EngineHandle, regid: c_int, value: i64) -> Result<()> {
        let native = self.engine(engine)?;
        let value = value as NativeWord;
        check(native.reg_write(regid, &value))
    }

    /// Read `min(size, buf.len())` bytes at `address` into the front of `buf` and return how many
    /// bytes were requested.
    ///
    /// The transfer is not atomic: when the native read fails part-way, the bytes it already
    /// copied stay in `buf` and the rest of `buf` is left as it was.
    pub fn mem_read(
        &self,
        engine: EngineHandle,
        address: u64,
        buf: &mut [u8],
        size: u64,
    ) -> Result<usize> {
        let native = self.engine(engine)?;
        let len = clamp_len(buf.len(), size);
        check(native.mem_read(address, &mut buf[..len]))?;
        Ok(len)
    }

    /// Write the first `min(size, buf.len())` bytes of `buf` at `address`.
    pub fn mem_write(
        &self,
        engine: EngineHandle,
        address: u64,
        buf: &[u8],
        size: u64,
    ) -> Result<usize> {
        let native = self.engine(engine)?;
        let len = clamp_len(buf.len(), size);
        check(native.mem_write(address, &buf[..len]))?;
        Ok(len)
    }
}

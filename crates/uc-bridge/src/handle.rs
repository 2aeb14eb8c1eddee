//! Opaque integer handles backed by generational slots.
//!
//! A handle is `(generation << 32) | index`. Generations start at 1, so `0` is never a live
//! handle, and a slot that is freed and reused gets a new generation: stale or forged integers
//! fail validation instead of aliasing a newer object.

use std::fmt;

use crate::error::{Error, Result, UcErr};

/// Handle newtypes share this encoding.
pub trait SlotHandle: Copy {
    fn from_raw(raw: u64) -> Self;
    fn into_raw(self) -> u64;
}

macro_rules! slot_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(transparent)]
        pub struct $name(u64);

        impl SlotHandle for $name {
            #[inline]
            fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            #[inline]
            fn into_raw(self) -> u64 {
                self.0
            }
        }

        impl $name {
            /// Rebuild a handle from the integer that crossed the host boundary.
            #[inline]
            pub const fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            #[inline]
            pub const fn into_raw(self) -> u64 {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({:#x})"), self.0)
            }
        }
    };
}

slot_handle!(
    /// One native emulator instance.
    EngineHandle
);
slot_handle!(
    /// A saved register/state snapshot.
    ContextHandle
);
slot_handle!(
    /// One hook registration.
    HookHandle
);

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

#[derive(Debug)]
pub struct HandleTable<H, T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
    max_slots: usize,
    _handle: std::marker::PhantomData<fn() -> H>,
}

impl<H: SlotHandle, T> Default for HandleTable<H, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: SlotHandle, T> HandleTable<H, T> {
    pub fn new() -> Self {
        Self::with_max_slots(u32::MAX as usize)
    }

    /// A table that holds at most `max_slots` live entries (capped at the `u32` index space).
    pub fn with_max_slots(max_slots: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
            max_slots: max_slots.min(u32::MAX as usize),
            _handle: std::marker::PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn encode(index: u32, generation: u32) -> H {
        H::from_raw((u64::from(generation) << 32) | u64::from(index))
    }

    fn decode(handle: H) -> (usize, u32) {
        let raw = handle.into_raw();
        ((raw & 0xFFFF_FFFF) as usize, (raw >> 32) as u32)
    }

    /// Store `value` under a fresh handle. A full table raises [`UcErr::NOMEM`].
    pub fn insert(&mut self, value: T) -> Result<H> {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            self.len += 1;
            return Ok(Self::encode(index, slot.generation));
        }

        if self.slots.len() >= self.max_slots {
            return Err(Error::Engine(UcErr::NOMEM));
        }
        let index = u32::try_from(self.slots.len()).map_err(|_| Error::Engine(UcErr::NOMEM))?;
        self.slots.push(Slot {
            generation: 1,
            value: Some(value),
        });
        self.len += 1;
        Ok(Self::encode(index, 1))
    }

    pub fn get(&self, handle: H) -> Option<&T> {
        let (index, generation) = Self::decode(handle);
        let slot = self.slots.get(index)?;
        if slot.generation != generation {
            return None;
        }
        slot.value.as_ref()
    }

    pub fn get_mut(&mut self, handle: H) -> Option<&mut T> {
        let (index, generation) = Self::decode(handle);
        let slot = self.slots.get_mut(index)?;
        if slot.generation != generation {
            return None;
        }
        slot.value.as_mut()
    }

    pub fn contains(&self, handle: H) -> bool {
        self.get(handle).is_some()
    }

    pub fn remove(&mut self, handle: H) -> Option<T> {
        let (index, generation) = Self::decode(handle);
        let slot = self.slots.get_mut(index)?;
        if slot.generation != generation {
            return None;
        }
        let value = slot.value.take()?;
        // Generation 0 is reserved so that the raw value 0 never decodes to a live slot.
        slot.generation = match slot.generation.wrapping_add(1) {
            0 => 1,
            next => next,
        };
        self.free.push(index as u32);
        self.len -= 1;
        Some(value)
    }

    /// Remove every entry for which `pred` returns true, returning the removed handles.
    pub fn remove_where(&mut self, mut pred: impl FnMut(&T) -> bool) -> Vec<(H, T)> {
        let doomed: Vec<H> = self
            .iter()
            .filter(|entry| pred(entry.1))
            .map(|(handle, _)| handle)
            .collect();
        doomed
            .into_iter()
            .filter_map(|handle| self.remove(handle).map(|value| (handle, value)))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (H, &T)> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value
                .as_ref()
                .map(|value| (Self::encode(index as u32, slot.generation), value))
        })
    }
}

//! Handle registries for the flat status-code API.
//!
//! Objects cross the [`api`](crate::api) boundary as positive `i32`
//! handles. A registry is a slab of slots, each tagged with a generation
//! that bumps on removal, so a stale handle for a recycled slot misses
//! instead of touching the new occupant.
//!
//! Handle layout: 15 generation bits above 16 slot bits (index + 1, so a
//! handle is never zero), keeping every handle strictly positive.

use std::sync::Mutex;

const SLOT_BITS: u32 = 16;
const MAX_SLOTS: usize = (1 << SLOT_BITS) - 1;
const GEN_MASK: u32 = 0x7FFF;

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

pub(crate) struct Registry<T> {
    inner: Mutex<Slots<T>>,
}

struct Slots<T> {
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
}

impl<T> Registry<T> {
    pub(crate) fn new() -> Self {
        Registry {
            inner: Mutex::new(Slots { slots: Vec::new(), free: Vec::new() }),
        }
    }

    /// Store a value, returning its handle. `None` when the registry is
    /// full.
    pub(crate) fn insert(&self, value: T) -> Option<i32> {
        let mut inner = self.lock();
        let idx = match inner.free.pop() {
            Some(idx) => {
                inner.slots[idx].value = Some(value);
                idx
            }
            None => {
                if inner.slots.len() >= MAX_SLOTS {
                    return None;
                }
                inner.slots.push(Slot { generation: 0, value: Some(value) });
                inner.slots.len() - 1
            }
        };
        let generation = inner.slots[idx].generation;
        Some(compose(idx, generation))
    }

    /// Run `f` against the value behind a live handle.
    pub(crate) fn with<R>(&self, handle: i32, f: impl FnOnce(&T) -> R) -> Option<R> {
        let inner = self.lock();
        let idx = decode(handle, &inner)?;
        inner.slots[idx].value.as_ref().map(f)
    }

    /// Run `f` against the value behind a live handle, mutably.
    pub(crate) fn with_mut<R>(&self, handle: i32, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut inner = self.lock();
        let idx = decode(handle, &inner)?;
        inner.slots[idx].value.as_mut().map(f)
    }

    /// Remove and return the value, invalidating the handle. The slot's
    /// generation bumps so a reused slot never answers to the old handle.
    pub(crate) fn remove(&self, handle: i32) -> Option<T> {
        let mut inner = self.lock();
        let idx = decode(handle, &inner)?;
        let taken = inner.slots[idx].value.take();
        if taken.is_some() {
            inner.slots[idx].generation = (inner.slots[idx].generation + 1) & GEN_MASK;
            inner.free.push(idx);
        }
        taken
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Slots<T>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<T: Clone> Registry<T> {
    /// Clone the value behind a live handle.
    pub(crate) fn get(&self, handle: i32) -> Option<T> {
        self.with(handle, T::clone)
    }
}

fn compose(idx: usize, generation: u32) -> i32 {
    debug_assert!(idx < MAX_SLOTS && generation <= GEN_MASK);
    ((generation << SLOT_BITS) | (idx as u32 + 1)) as i32
}

fn decode<T>(handle: i32, inner: &Slots<T>) -> Option<usize> {
    if handle <= 0 {
        return None;
    }
    let raw = handle as u32;
    let idx = (raw & ((1 << SLOT_BITS) - 1)) as usize;
    let generation = raw >> SLOT_BITS;
    if idx == 0 || idx > inner.slots.len() {
        return None;
    }
    let idx = idx - 1;
    if inner.slots[idx].generation != generation {
        return None;
    }
    Some(idx)
}

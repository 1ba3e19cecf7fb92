//! Process-wide handle table: opaque handle values resolving to
//! (object, type tag, reference count, optional name).

use crate::object::{KernelObject, ObjectKind};
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use sirius_error::ErrorKind;
use sirius_hal::CriticalSection;
use sirius_utils::bst::Bst;

/// Bits reserved for the generation counter, mixed into the high half of a
/// handle value so a stale handle never aliases a reborn slot.
const GENERATION_SHIFT: u32 = 24;
const SLOT_MASK: u32 = (1 << GENERATION_SHIFT) - 1;

/// Opaque, type-tagged, reference-counted identifier for a kernel object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(pub u32);

impl Handle {
    fn slot(self) -> usize {
        (self.0 & SLOT_MASK) as usize
    }

    fn generation(self) -> u32 {
        self.0 >> GENERATION_SHIFT
    }

    fn compose(slot: usize, generation: u32) -> Self {
        Handle(((generation << GENERATION_SHIFT) & !SLOT_MASK) | (slot as u32 & SLOT_MASK))
    }
}

struct Entry {
    object: Option<Arc<KernelObject>>,
    kind: ObjectKind,
    generation: u32,
    refcount: u32,
    name: Option<String>,
}

/// Maps handle values to kernel objects, with optional per-type name
/// uniqueness enforced through a name index.
pub struct HandleTable {
    inner: CriticalSection<Inner>,
}

struct Inner {
    entries: Vec<Entry>,
    free_slots: Vec<usize>,
    /// One name index per object type; only populated for types that were
    /// given a name.
    names: Bst<(ObjectKind, String), usize>,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleTable {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            inner: CriticalSection::new(Inner {
                entries: Vec::new(),
                free_slots: Vec::new(),
                names: Bst::new(),
            }),
        }
    }

    /// Allocates a handle for `object`, returning `NAME_IN_USE` if `name` is
    /// already claimed for this object kind.
    pub fn allocate(
        &self,
        object: Arc<KernelObject>,
        kind: ObjectKind,
        name: Option<String>,
    ) -> Result<Handle, ErrorKind> {
        let mut inner = self.inner.lock();

        if let Some(n) = &name {
            if inner.names.get(&(kind, n.clone())).is_some() {
                return Err(ErrorKind::NameInUse);
            }
        }

        let slot = if let Some(slot) = inner.free_slots.pop() {
            slot
        } else {
            inner.entries.push(Entry {
                object: None,
                kind,
                generation: 0,
                refcount: 0,
                name: None,
            });
            inner.entries.len() - 1
        };

        let generation = inner.entries[slot].generation;
        inner.entries[slot] = Entry {
            object: Some(object),
            kind,
            generation,
            refcount: 1,
            name: name.clone(),
        };

        if let Some(n) = name {
            inner.names.insert((kind, n), slot);
        }

        Ok(Handle::compose(slot, generation))
    }

    /// Resolves `handle` to its object, failing with `INVALID_HANDLE` if the
    /// slot is stale, empty, or tagged with a different type.
    pub fn resolve(
        &self,
        handle: Handle,
        expected: ObjectKind,
    ) -> Result<Arc<KernelObject>, ErrorKind> {
        let inner = self.inner.lock();
        let entry = inner
            .entries
            .get(handle.slot())
            .filter(|e| e.generation == handle.generation() && e.object.is_some())
            .ok_or(ErrorKind::InvalidHandle)?;
        if entry.kind != expected {
            return Err(ErrorKind::InvalidHandle);
        }
        Ok(entry.object.clone().expect("checked above"))
    }

    /// Resolves `handle` to its object regardless of type tag, for
    /// internal bookkeeping (timeout/cancellation unlinking) that already
    /// knows which variant to expect from context.
    pub fn resolve_any(&self, handle: Handle) -> Result<Arc<KernelObject>, ErrorKind> {
        let inner = self.inner.lock();
        let entry = inner
            .entries
            .get(handle.slot())
            .filter(|e| e.generation == handle.generation() && e.object.is_some())
            .ok_or(ErrorKind::InvalidHandle)?;
        Ok(entry.object.clone().expect("checked above"))
    }

    /// Invokes `f` once per live object; used for sweeps that need every
    /// object of a kind (system-wide statistics, task enumeration).
    pub fn for_each<F: FnMut(&KernelObject)>(&self, mut f: F) {
        let inner = self.inner.lock();
        for entry in &inner.entries {
            if let Some(obj) = &entry.object {
                f(obj);
            }
        }
    }

    /// Looks up a handle by name, incrementing its reference count.
    pub fn open_by_name(&self, kind: ObjectKind, name: &str) -> Result<Handle, ErrorKind> {
        let mut inner = self.inner.lock();
        let slot = *inner
            .names
            .get(&(kind, String::from(name)))
            .ok_or(ErrorKind::NameNotFound)?;
        let entry = &mut inner.entries[slot];
        entry.refcount += 1;
        Ok(Handle::compose(slot, entry.generation))
    }

    /// Increments the reference count of an already-resolved handle.
    pub fn open_by_handle(&self, handle: Handle) -> Result<(), ErrorKind> {
        let mut inner = self.inner.lock();
        let entry = inner
            .entries
            .get_mut(handle.slot())
            .filter(|e| e.generation == handle.generation() && e.object.is_some())
            .ok_or(ErrorKind::InvalidHandle)?;
        entry.refcount += 1;
        Ok(())
    }

    /// Decrements the reference count, destroying the slot (bumping its
    /// generation so old handles become stale) when it reaches zero.
    pub fn close(&self, handle: Handle) -> Result<(), ErrorKind> {
        let mut inner = self.inner.lock();
        let slot = handle.slot();
        {
            let entry = inner
                .entries
                .get_mut(slot)
                .filter(|e| e.generation == handle.generation() && e.object.is_some())
                .ok_or(ErrorKind::InvalidHandle)?;
            entry.refcount -= 1;
            if entry.refcount > 0 {
                return Ok(());
            }
        }

        let entry = &mut inner.entries[slot];
        let kind = entry.kind;
        let name = entry.name.take();
        entry.object = None;
        entry.generation = entry.generation.wrapping_add(1);
        if let Some(n) = name {
            inner.names.remove(&(kind, n));
        }
        inner.free_slots.push(slot);
        Ok(())
    }

    /// Collects every live `(handle, object)` pair matching `pred`, without
    /// closing them. Used by task teardown to hand ownership of a mutex or
    /// shared-memory region to the next waiter instead of destroying the
    /// object just because the current owner died — other handles may still
    /// reference it.
    pub fn collect_matching<F>(&self, mut pred: F) -> Vec<(Handle, Arc<KernelObject>)>
    where
        F: FnMut(&KernelObject) -> bool,
    {
        let inner = self.inner.lock();
        inner
            .entries
            .iter()
            .enumerate()
            .filter_map(|(slot, e)| {
                let obj = e.object.as_ref()?;
                pred(obj).then(|| (Handle::compose(slot, e.generation), obj.clone()))
            })
            .collect()
    }

}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use crate::object::{KernelObject, ObjectKind};

    fn dummy_mutex_object() -> Arc<KernelObject> {
        Arc::new(KernelObject::Mutex(crate::sync::mutex::Mutex::new(None)))
    }

    #[test]
    fn allocate_and_resolve() {
        let table = HandleTable::new();
        let h = table
            .allocate(dummy_mutex_object(), ObjectKind::Mutex, None)
            .unwrap();
        assert!(table.resolve(h, ObjectKind::Mutex).is_ok());
        assert_eq!(
            table.resolve(h, ObjectKind::Semaphore).unwrap_err(),
            ErrorKind::InvalidHandle
        );
    }

    #[test]
    fn stale_handle_after_close_fails() {
        let table = HandleTable::new();
        let h = table
            .allocate(dummy_mutex_object(), ObjectKind::Mutex, None)
            .unwrap();
        table.close(h).unwrap();
        assert_eq!(
            table.resolve(h, ObjectKind::Mutex).unwrap_err(),
            ErrorKind::InvalidHandle
        );
    }

    #[test]
    fn name_reuse_resolves_after_close() {
        let table = HandleTable::new();
        let h1 = table
            .allocate(
                dummy_mutex_object(),
                ObjectKind::Mutex,
                Some(String::from("m")),
            )
            .unwrap();
        assert_eq!(
            table
                .allocate(
                    dummy_mutex_object(),
                    ObjectKind::Mutex,
                    Some(String::from("m"))
                )
                .unwrap_err(),
            ErrorKind::NameInUse
        );
        table.close(h1).unwrap();
        assert!(
            table
                .allocate(
                    dummy_mutex_object(),
                    ObjectKind::Mutex,
                    Some(String::from("m"))
                )
                .is_ok()
        );
    }

    #[test]
    fn open_by_name_increments_refcount_and_closes_keep_alive() {
        let table = HandleTable::new();
        let h1 = table
            .allocate(
                dummy_mutex_object(),
                ObjectKind::Mutex,
                Some(String::from("m")),
            )
            .unwrap();
        let h2 = table.open_by_name(ObjectKind::Mutex, "m").unwrap();
        table.close(h1).unwrap();
        // still addressable: h2 holds a reference
        assert!(table.resolve(h2, ObjectKind::Mutex).is_ok());
        table.close(h2).unwrap();
        assert_eq!(
            table.open_by_name(ObjectKind::Mutex, "m").unwrap_err(),
            ErrorKind::NameNotFound
        );
    }
}

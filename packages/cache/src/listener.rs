//! Listener registrations and the registry.
//!
//! [`ListenerRegistry`] holds the live set of [`ListenerRegistration`]s
//! behind two lock-free read paths: an `ArcSwap` snapshot for iteration and
//! an atomic presence mask for the "any listener for type T?" test. Both are
//! rebuilt under an exclusive section on register and deregister, so the
//! mask is always a pure function of the current registration set.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use gridcache_core::{
    CacheError, CacheResult, DeliveryMode, EntryEvent, EntryListener, EventFilter, EventType,
    EventTypeMask,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Opaque handle identifying one listener registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle {
    pub(crate) id: u64,
}

impl ListenerHandle {
    /// Numeric identifier of the registration.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// One registered listener with its delivery machinery.
///
/// The bounded queue and worker exist for every registration: async-timed
/// registrations use them for all deliveries, synchronous ones only when a
/// dispatch site forces asynchronous delivery.
pub struct ListenerRegistration<K, V> {
    pub(crate) id: u64,
    pub(crate) listener: Arc<dyn EntryListener<K, V>>,
    pub(crate) types: EventTypeMask,
    pub(crate) mode: DeliveryMode,
    pub(crate) filter: Option<EventFilter<K, V>>,
    pub(crate) old_value_required: bool,
    pub(crate) queue: mpsc::Sender<EntryEvent<K, V>>,
    pub(crate) worker: Mutex<Option<JoinHandle<()>>>,
}

/// Thread-safe set of listener registrations.
///
/// Readers take the copy-on-write snapshot or the presence mask without
/// locking; register and deregister serialize on the write lock and rebuild
/// both.
pub struct ListenerRegistry<K, V> {
    registrations: ArcSwap<Vec<Arc<ListenerRegistration<K, V>>>>,
    presence: AtomicU8,
    write_lock: Mutex<()>,
    next_id: AtomicU64,
}

impl<K, V> ListenerRegistry<K, V> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            registrations: ArcSwap::from_pointee(Vec::new()),
            presence: AtomicU8::new(0),
            write_lock: Mutex::new(()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocates a registration id.
    pub(crate) fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns `true` if any current registration subscribes to `ty`.
    ///
    /// One atomic load and a bit test; dispatch paths use this to
    /// short-circuit before building an event record.
    #[must_use]
    pub fn has_listener_for(&self, ty: EventType) -> bool {
        self.presence.load(Ordering::Acquire) & ty.bit() != 0
    }

    /// Lock-free snapshot of the current registrations.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Vec<Arc<ListenerRegistration<K, V>>>> {
        self.registrations.load_full()
    }

    /// Number of current registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registrations.load().len()
    }

    /// Whether no listener is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registrations.load().is_empty()
    }

    /// Adds a registration, rejecting a listener instance that is already
    /// registered. The first registration stays active on rejection.
    pub(crate) fn insert_unique(
        &self,
        registration: Arc<ListenerRegistration<K, V>>,
    ) -> CacheResult<()> {
        let _guard = self.write_lock.lock();
        let current = self.registrations.load_full();
        // Compare data addresses only: fat-pointer equality would also
        // compare vtable addresses, which are not unique per instance.
        if current.iter().any(|existing| {
            std::ptr::addr_eq(
                Arc::as_ptr(&existing.listener),
                Arc::as_ptr(&registration.listener),
            )
        }) {
            return Err(CacheError::invalid_argument(
                "listener is already registered",
            ));
        }
        let mut next = Vec::with_capacity(current.len() + 1);
        next.extend(current.iter().cloned());
        next.push(registration);
        self.install(next);
        Ok(())
    }

    /// Removes the registration with the given id, returning it.
    pub(crate) fn remove(&self, id: u64) -> Option<Arc<ListenerRegistration<K, V>>> {
        let _guard = self.write_lock.lock();
        let current = self.registrations.load_full();
        let position = current.iter().position(|existing| existing.id == id)?;
        let mut next = current.as_ref().clone();
        let removed = next.swap_remove(position);
        self.install(next);
        Some(removed)
    }

    /// Removes every registration, returning them for worker teardown.
    pub(crate) fn drain(&self) -> Vec<Arc<ListenerRegistration<K, V>>> {
        let _guard = self.write_lock.lock();
        let current = self.registrations.load_full();
        self.install(Vec::new());
        current.as_ref().clone()
    }

    /// Installs a new registration set and its derived presence mask.
    fn install(&self, next: Vec<Arc<ListenerRegistration<K, V>>>) {
        let mask = next
            .iter()
            .fold(EventTypeMask::EMPTY, |mask, registration| {
                mask.union(registration.types)
            });
        self.registrations.store(Arc::new(next));
        self.presence.store(mask.bits(), Ordering::Release);
    }
}

impl<K, V> Default for ListenerRegistry<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

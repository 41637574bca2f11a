//! Closure factory - one per callback type
//!
//! Design: Callables are registered by identity (the address of their
//! shared allocation) with a weak reference, so the registry never keeps a
//! callable alive. A registration is torn down when the host reports the
//! callable unreachable, either eagerly through `notify_unreachable`, by a
//! posted `Reclaimer` message, or lazily through a `reclaim` sweep. Freed
//! slots go to a lock-free free list and are handed out before any fresh
//! magazine slot.
//!
//! Lock order: pending notifications are drained before any registry entry
//! is locked, and nothing below the registry takes a registry lock.

use super::magazine::{same_callable, ClosureSlot, Magazine};
use super::shape::ClosureShape;
use super::Callable;
use crate::compiler::PageAllocator;
use crate::error::Result;
use crate::logging::{log_closure_alloc, log_closure_reclaimed};
use crate::runtime::counters;
use crossbeam::queue::SegQueue;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

/// Identity of a registered callable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallableId(usize);

impl CallableId {
    #[inline]
    pub fn of(callable: &Arc<dyn Callable>) -> Self {
        Self(Arc::as_ptr(callable) as *const () as usize)
    }
}

struct Registration {
    callable: Weak<dyn Callable>,
    slot: Arc<ClosureSlot>,
}

impl Registration {
    #[inline]
    fn is_for(&self, callable: &Arc<dyn Callable>) -> bool {
        same_callable(&self.callable, callable)
    }

    #[inline]
    fn is_dead(&self) -> bool {
        self.callable.strong_count() == 0
    }
}

/// Cloneable handle for posting unreachability notifications
#[derive(Clone)]
pub struct Reclaimer {
    tx: flume::Sender<CallableId>,
}

impl Reclaimer {
    /// Queue a notification; applied before the factory's next allocation
    pub fn notify(&self, id: CallableId) {
        // Receiver lives as long as the factory; a closed channel has nothing to free
        let _ = self.tx.send(id);
    }
}

/// Factory statistics snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FactoryStats {
    pub magazines: usize,
    /// Slots taken from a magazine for the first time
    pub slots_allocated: usize,
    /// Slots taken from the free list
    pub slots_recycled: usize,
    pub live: usize,
    pub free: usize,
}

/// Closure allocator and registry for one callback type
pub struct ClosureFactory {
    shape: Arc<ClosureShape>,
    allocator: Arc<dyn PageAllocator>,
    magazine_pages: usize,
    current: RwLock<Option<Arc<Magazine>>>,
    /// Every magazine ever allocated; pages stay mapped while the factory lives
    magazines: Mutex<Vec<Arc<Magazine>>>,
    free: SegQueue<Arc<ClosureSlot>>,
    registry: DashMap<CallableId, Registration>,
    reclaim_tx: flume::Sender<CallableId>,
    reclaim_rx: flume::Receiver<CallableId>,
    allocated: AtomicUsize,
    recycled: AtomicUsize,
}

impl ClosureFactory {
    pub fn new(
        shape: Arc<ClosureShape>,
        allocator: Arc<dyn PageAllocator>,
        magazine_pages: usize,
    ) -> Self {
        let (reclaim_tx, reclaim_rx) = flume::unbounded();
        Self {
            shape,
            allocator,
            magazine_pages: magazine_pages.max(1),
            current: RwLock::new(None),
            magazines: Mutex::new(Vec::new()),
            free: SegQueue::new(),
            registry: DashMap::new(),
            reclaim_tx,
            reclaim_rx,
            allocated: AtomicUsize::new(0),
            recycled: AtomicUsize::new(0),
        }
    }

    pub fn shape(&self) -> &Arc<ClosureShape> {
        &self.shape
    }

    /// Native pointer for `callable`, creating a closure on first use
    ///
    /// At most one live slot exists per live callable identity; racing
    /// callers for the same callable all receive the first writer's slot.
    pub fn get_or_create(&self, callable: &Arc<dyn Callable>) -> Result<usize> {
        self.get_or_create_slot(callable).map(|slot| slot.code())
    }

    pub(crate) fn get_or_create_slot(&self, callable: &Arc<dyn Callable>) -> Result<Arc<ClosureSlot>> {
        self.drain_pending();
        let id = CallableId::of(callable);

        if let Some(reg) = self.registry.get(&id) {
            if reg.is_for(callable) {
                return Ok(Arc::clone(&reg.slot));
            }
        }

        // Slot preparation may map a new magazine; keep it outside the shard lock
        let slot = self.allocate_slot()?;
        slot.bind(callable);

        let stale = match self.registry.entry(id) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_for(callable) {
                    // Lost the race to another registration of this callable
                    let winner = Arc::clone(&entry.get().slot);
                    drop(entry);
                    self.give_back(slot);
                    return Ok(winner);
                }
                // Address reused after the previous callable died
                let old = entry.insert(Registration {
                    callable: Arc::downgrade(callable),
                    slot: Arc::clone(&slot),
                });
                Some(old.slot)
            }
            Entry::Vacant(entry) => {
                entry.insert(Registration {
                    callable: Arc::downgrade(callable),
                    slot: Arc::clone(&slot),
                });
                None
            }
        };

        if let Some(stale) = stale {
            self.release(stale);
        }
        Ok(slot)
    }

    /// Host reports the callable with this identity unreachable
    ///
    /// Returns whether a slot was freed. A registration whose callable is
    /// still alive is left alone, so late or duplicate notifications are
    /// harmless.
    pub fn notify_unreachable(&self, id: CallableId) -> bool {
        match self.registry.remove_if(&id, |_, reg| reg.is_dead()) {
            Some((_, reg)) => {
                self.release(reg.slot);
                true
            }
            None => false,
        }
    }

    /// Sweep every registration whose callable has died
    pub fn reclaim(&self) -> usize {
        self.drain_pending();
        let mut dead = Vec::new();
        self.registry.retain(|_, reg| {
            if reg.is_dead() {
                dead.push(Arc::clone(&reg.slot));
                false
            } else {
                true
            }
        });
        let count = dead.len();
        for slot in dead {
            self.release(slot);
        }
        count
    }

    /// Handle for posting notifications from any thread
    pub fn reclaimer(&self) -> Reclaimer {
        Reclaimer {
            tx: self.reclaim_tx.clone(),
        }
    }

    /// Apply queued notifications
    fn drain_pending(&self) {
        while let Ok(id) = self.reclaim_rx.try_recv() {
            self.notify_unreachable(id);
        }
    }

    fn release(&self, slot: Arc<ClosureSlot>) {
        slot.unbind();
        log_closure_reclaimed(slot.code());
        self.free.push(slot);
    }

    /// Return a slot that was never published
    fn give_back(&self, slot: Arc<ClosureSlot>) {
        slot.unbind();
        self.free.push(slot);
    }

    fn allocate_slot(&self) -> Result<Arc<ClosureSlot>> {
        if let Some(slot) = self.free.pop() {
            self.recycled.fetch_add(1, Ordering::Relaxed);
            counters().closure_allocated(true);
            log_closure_alloc(slot.code(), true);
            return Ok(slot);
        }

        loop {
            let current = self.current.read().clone();
            if let Some(slot) = current.as_ref().and_then(|m| m.next_slot()) {
                self.allocated.fetch_add(1, Ordering::Relaxed);
                counters().closure_allocated(false);
                log_closure_alloc(slot.code(), false);
                return Ok(slot);
            }

            let mut guard = self.current.write();
            let unchanged = match (guard.as_ref(), current.as_ref()) {
                (Some(now), Some(seen)) => Arc::ptr_eq(now, seen),
                (None, None) => true,
                _ => false,
            };
            // Another thread may have replaced the magazine meanwhile
            if unchanged {
                let magazine = Arc::new(Magazine::allocate(
                    Arc::clone(&self.allocator),
                    self.magazine_pages,
                    &self.shape,
                )?);
                self.magazines.lock().push(Arc::clone(&magazine));
                *guard = Some(magazine);
            }
        }
    }

    /// Callables currently holding a slot
    pub fn live(&self) -> usize {
        self.registry.len()
    }

    pub fn stats(&self) -> FactoryStats {
        FactoryStats {
            magazines: self.magazines.lock().len(),
            slots_allocated: self.allocated.load(Ordering::Relaxed),
            slots_recycled: self.recycled.load(Ordering::Relaxed),
            live: self.registry.len(),
            free: self.free.len(),
        }
    }
}

impl std::fmt::Debug for ClosureFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClosureFactory")
            .field("stats", &self.stats())
            .finish()
    }
}

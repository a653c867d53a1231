use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;

pub type SlotId = usize;

static PROCESS_SLOTS: Lazy<SessionSlots> = Lazy::new(|| SessionSlots::new(1));

/// A fixed pool of session slots.
///
/// Backends that only tolerate a bounded number of live sessions share one
/// pool between every manager that talks to them. Acquisition never waits:
/// when the pool is empty the caller gets [`SlotsExhausted`].
#[derive(Clone, Debug)]
pub struct SessionSlots {
    inner: Arc<Mutex<SlotPool>>,
}

// ids below `next` that are not in `released` are held
#[derive(Debug)]
struct SlotPool {
    released: VecDeque<SlotId>,
    next: SlotId,
    capacity: usize,
}

impl SlotPool {
    fn take(&mut self) -> Option<SlotId> {
        if let Some(id) = self.released.pop_back() {
            return Some(id);
        }
        if self.next < self.capacity {
            self.next += 1;
            return Some(self.next - 1);
        }
        None
    }

    fn available(&self) -> usize {
        self.released.len() + (self.capacity - self.next)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("all {capacity} session slot(s) are in use")]
pub struct SlotsExhausted {
    pub capacity: usize,
}

impl SessionSlots {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SlotPool {
                released: VecDeque::new(),
                next: 0,
                capacity,
            })),
        }
    }

    /// The pool for backends that allow one session per process.
    pub fn process_wide() -> Self {
        PROCESS_SLOTS.clone()
    }

    pub fn try_acquire(&self) -> Result<SlotGuard, SlotsExhausted> {
        let mut pool = self.inner.lock();
        match pool.take() {
            Some(id) => Ok(SlotGuard {
                id,
                slots: self.clone(),
            }),
            None => Err(SlotsExhausted {
                capacity: pool.capacity,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    pub fn available(&self) -> usize {
        self.inner.lock().available()
    }

    pub fn same_pool(&self, other: &SessionSlots) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn release(&self, id: SlotId) {
        self.inner.lock().released.push_front(id);
    }
}

/// Holds a slot until dropped.
#[derive(Debug)]
pub struct SlotGuard {
    id: SlotId,
    slots: SessionSlots,
}

impl SlotGuard {
    pub fn id(&self) -> SlotId {
        self.id
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.slots.release(self.id);
    }
}

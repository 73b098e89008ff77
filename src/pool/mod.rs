//! Fixed-size pool of connection workers.
//!
//! Every worker is a long-lived task that serves one connection at a time and
//! then parks itself on the idle stack. The dispatcher pops the most recently
//! parked worker (LIFO) and hands it the next accepted connection.
//!
//! ## Invariants
//!
//! - A worker is on the idle stack iff it is `Parked` and holds no connection.
//! - `idle + assigned + serving == size` at every observable point.
//!
//! Both hold by construction: every transition is a single synchronous method
//! with no suspension point inside it, and the pool only lives on a
//! single-threaded cooperative scheduler (hence `RefCell`, not `Mutex`).

pub mod worker;

use slab::Slab;
use std::cell::RefCell;
use std::ops::Range;
use tokio::sync::Notify;

/// Lifecycle state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// On the idle stack, waiting for a connection.
    Parked,
    /// Popped and handed a connection, not yet running.
    Assigned,
    /// Echoing on its connection.
    Serving,
}

struct WorkerSlot<C> {
    state: WorkerState,
    assigned: Option<C>,
    served: u64,
}

/// Point-in-time view of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub size: usize,
    pub idle: usize,
    pub assigned: usize,
    pub serving: usize,
    /// Connections completed across all workers.
    pub served: u64,
}

impl PoolStats {
    pub fn busy(&self) -> usize {
        self.assigned + self.serving
    }
}

/// Worker slots plus the LIFO idle stack, generic over the connection type.
pub struct WorkerPool<C> {
    workers: RefCell<Slab<WorkerSlot<C>>>,
    idle: RefCell<Vec<usize>>,
    wakeups: Vec<Notify>,
}

impl<C> WorkerPool<C> {
    /// Create `size` workers, all parked.
    ///
    /// Workers are ids `0..size`; the last one created is on top of the
    /// idle stack.
    pub fn new(size: usize) -> Self {
        let mut workers = Slab::with_capacity(size);
        let mut idle = Vec::with_capacity(size);
        let mut wakeups = Vec::with_capacity(size);

        for _ in 0..size {
            let id = workers.insert(WorkerSlot {
                state: WorkerState::Parked,
                assigned: None,
                served: 0,
            });
            idle.push(id);
            wakeups.push(Notify::new());
        }

        Self {
            workers: RefCell::new(workers),
            idle: RefCell::new(idle),
            wakeups,
        }
    }

    pub fn size(&self) -> usize {
        self.wakeups.len()
    }

    /// Ids of every worker in the pool.
    pub fn ids(&self) -> Range<usize> {
        0..self.size()
    }

    pub fn has_idle(&self) -> bool {
        !self.idle.borrow().is_empty()
    }

    pub fn idle_len(&self) -> usize {
        self.idle.borrow().len()
    }

    #[cfg(test)]
    pub fn state(&self, id: usize) -> Option<WorkerState> {
        self.workers.borrow().get(id).map(|slot| slot.state)
    }

    #[cfg(test)]
    pub fn served(&self, id: usize) -> Option<u64> {
        self.workers.borrow().get(id).map(|slot| slot.served)
    }

    pub fn stats(&self) -> PoolStats {
        let workers = self.workers.borrow();
        let mut stats = PoolStats {
            size: self.size(),
            idle: self.idle_len(),
            assigned: 0,
            serving: 0,
            served: 0,
        };
        for (_, slot) in workers.iter() {
            match slot.state {
                WorkerState::Parked => {}
                WorkerState::Assigned => stats.assigned += 1,
                WorkerState::Serving => stats.serving += 1,
            }
            stats.served += slot.served;
        }
        stats
    }

    /// Pop the most recently parked worker, give it `conn` and wake it.
    ///
    /// Returns the worker id, or hands `conn` back if no worker is idle.
    pub fn dispatch(&self, conn: C) -> Result<usize, C> {
        let Some(id) = self.idle.borrow_mut().pop() else {
            return Err(conn);
        };

        {
            let mut workers = self.workers.borrow_mut();
            let slot = &mut workers[id];
            debug_assert_eq!(slot.state, WorkerState::Parked);
            debug_assert!(slot.assigned.is_none());
            slot.state = WorkerState::Assigned;
            slot.assigned = Some(conn);
        }

        // Stores a permit if the worker has not suspended yet.
        self.wakeups[id].notify_one();
        Ok(id)
    }

    /// Suspend worker `id` until it is assigned a connection, then mark it
    /// serving and take ownership of the connection.
    pub async fn wait_assignment(&self, id: usize) -> C {
        loop {
            if let Some(conn) = self.take_assignment(id) {
                return conn;
            }
            // Wakes may be stale permits from an earlier dispatch; re-check.
            self.wakeups[id].notified().await;
        }
    }

    fn take_assignment(&self, id: usize) -> Option<C> {
        let mut workers = self.workers.borrow_mut();
        let slot = &mut workers[id];
        let conn = slot.assigned.take()?;
        slot.state = WorkerState::Serving;
        Some(conn)
    }

    /// Park worker `id` after its connection has been closed.
    pub fn release(&self, id: usize) {
        {
            let mut workers = self.workers.borrow_mut();
            let slot = &mut workers[id];
            debug_assert_eq!(slot.state, WorkerState::Serving);
            slot.state = WorkerState::Parked;
            slot.served += 1;
        }
        self.idle.borrow_mut().push(id);
    }
}

// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Bounded pool of reusable storage handles with idle eviction.
//!
//! Handles are keyed by resource path. `rent` blocks cooperatively when the
//! pool is exhausted and honors cancellation and a deadline; returned handles
//! join a per-key idle queue. Stale handles are disposed on return and by a
//! background reaper.

use std::collections::{HashMap, VecDeque};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use core_types::cancel::CancelToken;
use log::{debug, info};
use parking_lot::{Condvar, Mutex};
use thiserror::Error;

const WAIT_SLICE: Duration = Duration::from_millis(50);
const REAPER_POLL: Duration = Duration::from_millis(100);

/// A resource the pool may park and hand out again.
pub trait PoolResource: Send + 'static {
    /// Whether the handle is still usable; dead handles are dropped instead
    /// of being parked.
    fn is_live(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone)]
pub struct PoolOptions {
    pub max_handles: usize,
    pub idle_timeout: Duration,
    pub sweep_interval: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_handles: 20,
            idle_timeout: Duration::from_secs(30 * 60),
            sweep_interval: Duration::from_secs(10 * 60),
        }
    }
}

#[derive(Debug, Error)]
pub enum LeaseError<E> {
    #[error("handle pool is disposed")]
    Disposed,
    #[error("cancelled while waiting for a handle")]
    Cancelled,
    #[error("deadline expired while waiting for a handle")]
    DeadlineExceeded,
    #[error("failed to open handle: {0}")]
    Open(E),
}

/// Cancellation and deadline observed while blocked on the pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct LeaseContext<'a> {
    pub cancel: Option<&'a CancelToken>,
    pub deadline: Option<Instant>,
}

struct IdleHandle<H> {
    handle: H,
    parked_at: Instant,
}

struct PoolState<H> {
    idle: HashMap<String, VecDeque<IdleHandle<H>>>,
    /// Idle plus outstanding handles.
    total: usize,
    disposed: bool,
}

struct PoolInner<H> {
    state: Mutex<PoolState<H>>,
    available: Condvar,
    options: PoolOptions,
}

impl<H: PoolResource> PoolInner<H> {
    /// Drop idle handles that expired or died. Caller holds the state lock.
    fn prune_expired(&self, state: &mut PoolState<H>) -> usize {
        let mut evicted = 0usize;
        for queue in state.idle.values_mut() {
            let before = queue.len();
            queue.retain(|entry| {
                entry.parked_at.elapsed() <= self.options.idle_timeout && entry.handle.is_live()
            });
            evicted += before - queue.len();
        }
        state.idle.retain(|_, queue| !queue.is_empty());
        state.total -= evicted;
        evicted
    }

    /// Drop the oldest idle handle of any key, freeing one capacity slot.
    fn evict_oldest_idle(&self, state: &mut PoolState<H>) -> bool {
        let mut oldest: Option<(String, Instant)> = None;
        for (key, queue) in state.idle.iter() {
            if let Some(front) = queue.front() {
                if oldest
                    .as_ref()
                    .map(|(_, parked)| front.parked_at < *parked)
                    .unwrap_or(true)
                {
                    oldest = Some((key.clone(), front.parked_at));
                }
            }
        }
        let Some((key, _)) = oldest else {
            return false;
        };
        if let Some(queue) = state.idle.get_mut(&key) {
            queue.pop_front();
            if queue.is_empty() {
                state.idle.remove(&key);
            }
            state.total -= 1;
            return true;
        }
        false
    }
}

struct ReaperBundle {
    cancel: Arc<AtomicBool>,
    handle: thread::JoinHandle<()>,
}

/// Bounded handle pool. One instance per engine; never a process singleton.
pub struct HandlePool<H: PoolResource> {
    inner: Arc<PoolInner<H>>,
    reaper: Mutex<Option<ReaperBundle>>,
}

impl<H: PoolResource> HandlePool<H> {
    pub fn new(options: PoolOptions) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                state: Mutex::new(PoolState {
                    idle: HashMap::new(),
                    total: 0,
                    disposed: false,
                }),
                available: Condvar::new(),
                options,
            }),
            reaper: Mutex::new(None),
        }
    }

    /// Borrow a handle for `key`, reusing an idle one when possible and
    /// opening a new one while under capacity. Blocks cooperatively when the
    /// pool is exhausted.
    pub fn rent<E, F>(
        &self,
        key: &str,
        ctx: LeaseContext<'_>,
        open: F,
    ) -> Result<PooledHandle<H>, LeaseError<E>>
    where
        F: FnOnce() -> Result<H, E>,
    {
        let mut open = Some(open);
        let mut state = self.inner.state.lock();
        loop {
            if state.disposed {
                return Err(LeaseError::Disposed);
            }
            loop {
                let entry = match state.idle.get_mut(key) {
                    Some(queue) => queue.pop_front(),
                    None => None,
                };
                let Some(entry) = entry else { break };
                if entry.parked_at.elapsed() <= self.inner.options.idle_timeout
                    && entry.handle.is_live()
                {
                    return Ok(self.guard(key, entry.handle));
                }
                // Expired or dead while parked.
                state.total -= 1;
            }
            if state.total < self.inner.options.max_handles {
                state.total += 1;
                drop(state);
                let opener = open.take().expect("opener consumed at most once");
                match opener() {
                    Ok(handle) => return Ok(self.guard(key, handle)),
                    Err(err) => {
                        let mut state = self.inner.state.lock();
                        state.total -= 1;
                        self.inner.available.notify_one();
                        return Err(LeaseError::Open(err));
                    }
                }
            }
            // At capacity with no idle handle for this key: reclaim the
            // budget held by the oldest idle handle of another key.
            if self.inner.evict_oldest_idle(&mut state) {
                continue;
            }
            if let Some(cancel) = ctx.cancel {
                if cancel.is_cancelled() {
                    return Err(LeaseError::Cancelled);
                }
            }
            if let Some(deadline) = ctx.deadline {
                if Instant::now() >= deadline {
                    return Err(LeaseError::DeadlineExceeded);
                }
            }
            let _ = self.inner.available.wait_for(&mut state, WAIT_SLICE);
        }
    }

    fn guard(&self, key: &str, handle: H) -> PooledHandle<H> {
        PooledHandle {
            key: key.to_string(),
            handle: Some(handle),
            inner: Arc::clone(&self.inner),
        }
    }

    /// Evict expired idle handles now. Returns the eviction count.
    pub fn sweep_now(&self) -> usize {
        let mut state = self.inner.state.lock();
        let evicted = self.inner.prune_expired(&mut state);
        drop(state);
        if evicted > 0 {
            debug!("pool sweep evicted {evicted} idle handle(s)");
            self.inner.available.notify_all();
        }
        evicted
    }

    /// Spawn the background reaper. At most one per pool.
    pub fn start_reaper(&self, label: &str) {
        let mut slot = self.reaper.lock();
        if slot.is_some() {
            return;
        }
        let cancel = Arc::new(AtomicBool::new(false));
        let cancel_clone = Arc::clone(&cancel);
        let inner = Arc::clone(&self.inner);
        let spawned = thread::Builder::new()
            .name(format!("{label}-pool-reaper"))
            .spawn(move || {
                let mut slept = Duration::ZERO;
                while !cancel_clone.load(Ordering::Relaxed) {
                    thread::sleep(REAPER_POLL);
                    slept += REAPER_POLL;
                    if slept < inner.options.sweep_interval {
                        continue;
                    }
                    slept = Duration::ZERO;
                    let mut state = inner.state.lock();
                    if state.disposed {
                        break;
                    }
                    let evicted = inner.prune_expired(&mut state);
                    drop(state);
                    if evicted > 0 {
                        debug!("pool reaper evicted {evicted} idle handle(s)");
                        inner.available.notify_all();
                    }
                }
            });
        match spawned {
            Ok(handle) => *slot = Some(ReaperBundle { cancel, handle }),
            Err(err) => log::error!("failed to spawn pool reaper: {err}"),
        }
    }

    /// Close every idle handle and refuse further rents. Outstanding handles
    /// close on their next return.
    pub fn dispose(&self) {
        if let Some(bundle) = self.reaper.lock().take() {
            bundle.cancel.store(true, Ordering::Relaxed);
            let _ = bundle.handle.join();
        }
        let mut state = self.inner.state.lock();
        if state.disposed {
            return;
        }
        state.disposed = true;
        let idle = std::mem::take(&mut state.idle);
        let parked: usize = idle.values().map(VecDeque::len).sum();
        state.total -= parked;
        drop(state);
        drop(idle);
        if parked > 0 {
            info!("pool disposed; closed {parked} idle handle(s)");
        }
        self.inner.available.notify_all();
    }

    pub fn idle_count(&self) -> usize {
        self.inner
            .state
            .lock()
            .idle
            .values()
            .map(VecDeque::len)
            .sum()
    }

    pub fn total_count(&self) -> usize {
        self.inner.state.lock().total
    }
}

impl<H: PoolResource> Drop for HandlePool<H> {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// RAII lease over one pooled handle; returns it on drop.
pub struct PooledHandle<H: PoolResource> {
    key: String,
    handle: Option<H>,
    inner: Arc<PoolInner<H>>,
}

impl<H: PoolResource> Deref for PooledHandle<H> {
    type Target = H;

    fn deref(&self) -> &H {
        self.handle.as_ref().expect("handle present until drop")
    }
}

impl<H: PoolResource> DerefMut for PooledHandle<H> {
    fn deref_mut(&mut self) -> &mut H {
        self.handle.as_mut().expect("handle present until drop")
    }
}

impl<H: PoolResource> Drop for PooledHandle<H> {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let mut state = self.inner.state.lock();
        if state.disposed || !handle.is_live() {
            state.total -= 1;
            drop(state);
            drop(handle);
        } else {
            state.idle.entry(self.key.clone()).or_default().push_back(IdleHandle {
                handle,
                parked_at: Instant::now(),
            });
            self.inner.prune_expired(&mut state);
            drop(state);
        }
        self.inner.available.notify_one();
    }
}

//! In-process host runtime
//!
//! Stands in for an embedded interpreter: a reentrant global lock, a set of
//! threads the host knows about, and wrapper values that hold a strong
//! native reference while their own count is above zero.

use core::num::NonZeroUsize;
use core::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, ThreadId};

use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use parking_lot::{Condvar, Mutex};

use super::{HostHooks, HostLock, HostLockState, PeerRef};
use crate::error::{BridgeError, FatalError, HostLockError};
use crate::fatal::abort_with;
use crate::logging::debug;
use crate::object::{increment, Object, Ref};

#[derive(Debug, Default)]
struct LockOwner {
    thread: Option<ThreadId>,
    depth: usize,
}

struct Wrapper {
    count: usize,
    native: Ref<dyn Object>,
}

/// Reference host with integer wrapper handles
pub struct LocalHost {
    owner: Mutex<LockOwner>,
    released: Condvar,
    threads: DashSet<ThreadId>,
    wrappers: DashMap<PeerRef, Wrapper>,
    next_peer: AtomicUsize,
    unguarded: AtomicUsize,
}

impl LocalHost {
    /// New host; the calling thread is its main thread
    pub fn new() -> Self {
        let host = Self {
            owner: Mutex::new(LockOwner::default()),
            released: Condvar::new(),
            threads: DashSet::new(),
            wrappers: DashMap::new(),
            next_peer: AtomicUsize::new(1),
            unguarded: AtomicUsize::new(0),
        };
        host.register_current_thread();
        host
    }

    pub fn register_current_thread(&self) {
        self.threads.insert(thread::current().id());
    }

    pub fn unregister_current_thread(&self) {
        self.threads.remove(&thread::current().id());
    }

    pub fn is_registered(&self) -> bool {
        self.threads.contains(&thread::current().id())
    }

    /// Number of threads the host currently recognizes
    pub fn registered_threads(&self) -> usize {
        self.threads.len()
    }

    /// Hand `object` to the host, returning its wrapper.
    ///
    /// The host takes one wrapper reference, released with
    /// [`host_release`](Self::host_release). An object whose wrapper was
    /// collected gets a new wrapper under the same peer, as it does when
    /// native code acquires it through the bridge.
    pub fn wrap<T: Object + 'static>(
        &self,
        object: &Ref<T>,
        lock: &HostLock<'_>,
    ) -> Result<PeerRef, BridgeError> {
        self.check_guarded(lock);

        let peer = match object.bridge_peer() {
            Some(peer) if self.minted(peer) => peer,
            _ => {
                let peer = self.mint();
                object.set_bridge(peer)?;
                peer
            }
        };

        match self.wrappers.entry(peer) {
            Entry::Occupied(mut entry) => entry.get_mut().count += 1,
            Entry::Vacant(entry) => {
                debug!(event = "wrapper_created", peer = peer.addr(), object = object.type_name());
                entry.insert(Wrapper {
                    count: 1,
                    native: Ref::into_dyn(object.clone()),
                });
            }
        }
        Ok(peer)
    }

    /// Host drops one of its own wrapper references
    pub fn host_release(&self, peer: PeerRef, lock: &HostLock<'_>) {
        self.decref(peer, lock);
    }

    /// Wrapper count of `peer`, `None` once collected
    pub fn wrapper_count(&self, peer: PeerRef) -> Option<usize> {
        self.wrappers.get(&peer).map(|wrapper| wrapper.count)
    }

    pub fn live_wrappers(&self) -> usize {
        self.wrappers.len()
    }

    pub fn is_locked_by_current_thread(&self) -> bool {
        self.owner.lock().thread == Some(thread::current().id())
    }

    /// Wrapper mutations seen without the host lock held by the caller
    pub fn unguarded_mutations(&self) -> usize {
        self.unguarded.load(Ordering::Relaxed)
    }

    fn mint(&self) -> PeerRef {
        let handle = self.next_peer.fetch_add(1, Ordering::Relaxed);
        PeerRef::from_handle(NonZeroUsize::new(handle).unwrap_or(NonZeroUsize::MIN))
    }

    fn minted(&self, peer: PeerRef) -> bool {
        (1..self.next_peer.load(Ordering::Relaxed)).contains(&peer.addr())
    }

    fn check_guarded(&self, _lock: &HostLock<'_>) {
        if !self.is_locked_by_current_thread() {
            self.unguarded.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn take_lock(&self, depth: usize) {
        let me = thread::current().id();
        let mut owner = self.owner.lock();
        while matches!(owner.thread, Some(other) if other != me) {
            self.released.wait(&mut owner);
        }
        owner.thread = Some(me);
        owner.depth += depth;
    }
}

impl Default for LocalHost {
    fn default() -> Self {
        Self::new()
    }
}

impl HostHooks for LocalHost {
    fn name(&self) -> &'static str {
        "local"
    }

    fn acquire(&self) -> Result<HostLockState, HostLockError> {
        if !self.is_registered() {
            let current = thread::current();
            return Err(HostLockError::UnrecognizedThread {
                thread: current
                    .name()
                    .map(str::to_owned)
                    .unwrap_or_else(|| format!("{:?}", current.id())),
            });
        }

        self.take_lock(1);
        Ok(HostLockState(1))
    }

    fn release(&self, _state: HostLockState) {
        let mut owner = self.owner.lock();
        owner.depth = owner.depth.saturating_sub(1);
        if owner.depth == 0 {
            owner.thread = None;
            self.released.notify_all();
        }
    }

    fn suspend(&self) -> HostLockState {
        let me = thread::current().id();
        let mut owner = self.owner.lock();
        if owner.thread != Some(me) {
            return HostLockState(0);
        }

        let depth = std::mem::take(&mut owner.depth);
        owner.thread = None;
        self.released.notify_all();
        HostLockState(depth)
    }

    fn resume(&self, token: HostLockState) {
        if token.0 > 0 {
            self.take_lock(token.0);
        }
    }

    fn incref(&self, peer: PeerRef, object: &(dyn Object + 'static), lock: &HostLock<'_>) {
        self.check_guarded(lock);
        if !self.minted(peer) {
            abort_with(FatalError::StalePeer { peer });
        }

        match self.wrappers.entry(peer) {
            Entry::Occupied(mut entry) => entry.get_mut().count += 1,
            Entry::Vacant(entry) => {
                debug!(event = "wrapper_revived", peer = peer.addr(), object = object.type_name());
                let ptr = NonNull::from(object);
                // SAFETY: the caller holds a reference to object for this call
                let native = unsafe {
                    increment(ptr);
                    Ref::from_raw(ptr)
                };
                entry.insert(Wrapper { count: 1, native });
            }
        }
    }

    fn decref(&self, peer: PeerRef, lock: &HostLock<'_>) {
        self.check_guarded(lock);
        let collected = match self.wrappers.entry(peer) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().count -= 1;
                (entry.get().count == 0).then(|| entry.remove())
            }
            Entry::Vacant(_) => abort_with(FatalError::StalePeer { peer }),
        };

        // Dropped outside the shard guard; may destroy the native object
        if let Some(wrapper) = collected {
            debug!(event = "wrapper_collected", peer = peer.addr(), object = wrapper.native.type_name());
            drop(wrapper);
        }
    }

    fn attach_thread(&self) {
        self.register_current_thread();
    }

    fn detach_thread(&self) {
        self.unregister_current_thread();
    }
}

impl std::fmt::Debug for LocalHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalHost")
            .field("threads", &self.threads.len())
            .field("wrappers", &self.wrappers.len())
            .finish()
    }
}

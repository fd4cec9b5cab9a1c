//! Ownership bridge between native objects and host-managed wrappers
//!
//! A bridged object carries a weak pointer to its host wrapper. Native
//! references taken through the bridge also keep the wrapper alive, so the
//! wrapper cannot be collected while native code still uses the object.
//!
//! Every native count change happens first and lock-free; the wrapper count
//! is touched afterwards, only while the host lock is held.

mod local;
mod lock;
#[cfg(feature = "python")]
pub mod python;


pub use local::LocalHost;
pub use lock::{host_lock_held, host_lock_held_by, HostHooks, HostLock, HostLockState};

use core::ffi::c_void;
use core::num::NonZeroUsize;
use core::ops::Deref;
use core::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::error::{BridgeError, FatalError};
use crate::fatal::abort_with;
use crate::logging::{log_bridge_attach, log_bridge_installed};
use crate::object::{self, Object, Ref};
use crate::registry::ObjectId;

static INSTALLED: OnceCell<Arc<Bridge>> = OnceCell::new();

/// Non-null handle of a host wrapper value.
///
/// Never dereferenced by this crate; only handed back to [`HostHooks`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerRef(NonNull<c_void>);

// Opaque to native code; hosts decide what the pointer means
unsafe impl Send for PeerRef {}
unsafe impl Sync for PeerRef {}

impl PeerRef {
    #[inline]
    pub fn new(ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    #[inline]
    pub fn from_non_null(ptr: NonNull<c_void>) -> Self {
        Self(ptr)
    }

    /// Peer for hosts that identify wrappers by integer handle
    #[inline]
    pub fn from_handle(handle: NonZeroUsize) -> Self {
        // SAFETY: non-zero integers cast to non-null pointers
        Self(unsafe { NonNull::new_unchecked(handle.get() as *mut c_void) })
    }

    #[inline]
    pub fn as_ptr(self) -> *mut c_void {
        self.0.as_ptr()
    }

    #[inline]
    pub fn addr(self) -> usize {
        self.0.as_ptr() as usize
    }
}

impl std::fmt::Debug for PeerRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PeerRef({:#x})", self.addr())
    }
}

#[derive(Debug, Default)]
struct Counters {
    attached: AtomicU64,
    acquired: AtomicU64,
    released: AtomicU64,
}

/// Snapshot of bridge traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BridgeStats {
    pub attached: u64,
    /// Wrapper increments performed under the host lock
    pub acquired: u64,
    /// Wrapper decrements performed under the host lock
    pub released: u64,
}

/// Routes native reference changes to the host's wrapper counts
pub struct Bridge {
    hooks: Arc<dyn HostHooks>,
    counters: Counters,
}

impl Bridge {
    pub fn new(hooks: Arc<dyn HostHooks>) -> Self {
        Self {
            hooks,
            counters: Counters::default(),
        }
    }

    pub fn hooks(&self) -> &Arc<dyn HostHooks> {
        &self.hooks
    }

    /// Acquire the host lock (reentrant)
    pub fn lock(&self) -> HostLock<'_> {
        HostLock::acquire(&*self.hooks)
    }

    /// Record that `object` is represented by `peer` in the host.
    ///
    /// An object has one wrapper for its whole lifetime. Re-attaching the
    /// same peer is a no-op; a different peer aborts the process.
    pub fn attach<T: Object + ?Sized>(&self, object: &T, peer: PeerRef) {
        let fresh = !object.header().is_bridged();
        if let Err(error) = object.set_bridge(peer) {
            abort_with(FatalError::Rebridged(error));
        }

        if fresh {
            self.counters.attached.fetch_add(1, Ordering::Relaxed);
            log_bridge_attach(
                object.type_name(),
                ObjectId::of(object as *const T).addr(),
                peer.addr(),
            );
        }
    }

    /// Native code takes a reference: increment the object, then its wrapper.
    ///
    /// A wrapper the host already collected is revived under the same peer.
    pub fn on_native_acquire<T: Object + 'static>(&self, object: &Ref<T>) {
        // SAFETY: object keeps the allocation alive
        unsafe { self.acquire_raw(Ref::as_ptr(object)) }
    }

    /// # Safety
    /// `ptr` must point to a live object allocated by [`Ref::new`].
    unsafe fn acquire_raw<T: Object + 'static>(&self, ptr: NonNull<T>) {
        let object = ptr.as_ref();
        object.header().increment();

        if let Some(peer) = object.bridge_peer() {
            let lock = self.lock();
            self.hooks.incref(peer, object, &lock);
            self.counters.acquired.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Native code drops a reference: decrement the object, then its wrapper.
    ///
    /// # Safety
    /// `ptr` must point to a live object and the caller must own the
    /// reference being released.
    pub unsafe fn on_native_release<T: Object + ?Sized>(&self, ptr: NonNull<T>) {
        // Read before decrementing; the object may not survive the decrement
        let peer = ptr.as_ref().bridge_peer();
        object::decrement(ptr);

        if let Some(peer) = peer {
            let lock = self.lock();
            self.hooks.decref(peer, &lock);
            self.counters.released.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn stats(&self) -> BridgeStats {
        BridgeStats {
            attached: self.counters.attached.load(Ordering::Relaxed),
            acquired: self.counters.acquired.load(Ordering::Relaxed),
            released: self.counters.released.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("host", &self.hooks.name())
            .field("stats", &self.stats())
            .finish()
    }
}

/// Native reference whose clones and drops go through a [`Bridge`]
pub struct BridgedRef<T: Object + 'static> {
    ptr: NonNull<T>,
    bridge: Arc<Bridge>,
}

impl<T: Object + 'static> BridgedRef<T> {
    pub fn new(bridge: &Arc<Bridge>, object: &Ref<T>) -> Self {
        bridge.on_native_acquire(object);
        Self {
            ptr: Ref::as_ptr(object),
            bridge: Arc::clone(bridge),
        }
    }

    pub fn bridge(this: &Self) -> &Arc<Bridge> {
        &this.bridge
    }

    /// Plain native reference to the same object, outside the bridge
    pub fn to_ref(this: &Self) -> Ref<T> {
        // SAFETY: this keeps the object alive; the new reference is ours
        unsafe {
            object::increment(this.ptr);
            Ref::from_raw(this.ptr)
        }
    }
}

impl<T: Object + 'static> Clone for BridgedRef<T> {
    fn clone(&self) -> Self {
        // SAFETY: self keeps the object alive
        unsafe { self.bridge.acquire_raw(self.ptr) };
        Self {
            ptr: self.ptr,
            bridge: Arc::clone(&self.bridge),
        }
    }
}

impl<T: Object + 'static> Drop for BridgedRef<T> {
    fn drop(&mut self) {
        // SAFETY: self owns exactly one reference
        unsafe { self.bridge.on_native_release(self.ptr) };
    }
}

impl<T: Object + 'static> Deref for BridgedRef<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: self keeps the object alive
        unsafe { self.ptr.as_ref() }
    }
}

impl<T: Object + 'static> std::fmt::Debug for BridgedRef<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgedRef")
            .field("object", &self.type_name())
            .field("peer", &self.bridge_peer())
            .finish()
    }
}

unsafe impl<T: Object + 'static> Send for BridgedRef<T> {}
unsafe impl<T: Object + 'static> Sync for BridgedRef<T> {}

/// Register the process-wide host hooks. Only the first call succeeds.
pub fn install(hooks: Arc<dyn HostHooks>) -> Result<Arc<Bridge>, BridgeError> {
    let name = hooks.name();
    let bridge = Arc::new(Bridge::new(hooks));
    INSTALLED
        .set(Arc::clone(&bridge))
        .map_err(|_| BridgeError::AlreadyInstalled)?;

    log_bridge_installed(name);
    Ok(bridge)
}

/// The process-wide bridge, if hooks were installed
pub fn installed() -> Option<&'static Arc<Bridge>> {
    INSTALLED.get()
}

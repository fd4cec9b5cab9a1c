//! Object header - the intrusive part of every native object
//!
//! Embedded as a field in each concrete object type and exposed through
//! [`Object::header`](super::Object::header).

use core::ffi::c_void;
use core::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU32, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::bridge::PeerRef;
use crate::error::{BridgeError, FatalError};
use crate::fatal::abort_with;
use crate::registry::AliveRegistry;

/// Reference count, bridged peer and registry membership of one object.
///
/// The peer pointer is a lookup, not an ownership edge: the host wrapper
/// owns the native object, never the reverse.
pub struct ObjectHeader {
    refcount: AtomicU32,
    peer: AtomicPtr<c_void>,
    registry: OnceCell<Arc<AliveRegistry>>,
}

impl ObjectHeader {
    /// Header for a new object, owned once by its creator.
    #[inline]
    pub const fn new() -> Self {
        Self {
            refcount: AtomicU32::new(1),
            peer: AtomicPtr::new(ptr::null_mut()),
            registry: OnceCell::new(),
        }
    }

    /// Current reference count (for debugging/testing)
    #[inline]
    pub fn count(&self) -> u32 {
        self.refcount.load(Ordering::Acquire)
    }

    /// Increment reference count (hot path, always inlined)
    #[inline(always)]
    pub fn increment(&self) {
        let old = self.refcount.fetch_add(1, Ordering::Relaxed);

        if old == u32::MAX {
            abort_with(FatalError::RefcountOverflow {
                object: "object",
                address: self as *const Self as usize,
            });
        }
    }

    /// Decrement and report whether this call released the last reference.
    ///
    /// Callers must destroy the object when this returns `true`.
    #[inline(always)]
    pub(crate) fn release(&self, type_name: &'static str) -> bool {
        let old = self.refcount.fetch_sub(1, Ordering::Release);

        if old == 0 {
            abort_with(FatalError::RefcountUnderflow {
                object: type_name,
                address: self as *const Self as usize,
            });
        }

        if old == 1 {
            // Synchronize with all previous decrements
            std::sync::atomic::fence(Ordering::Acquire);
            return true;
        }

        false
    }

    /// Host wrapper this object is bridged to, if any
    #[inline]
    pub fn bridge_peer(&self) -> Option<PeerRef> {
        PeerRef::new(self.peer.load(Ordering::Acquire))
    }

    /// Link this object to its host wrapper.
    ///
    /// Installing the same peer again is a no-op; a different peer is
    /// rejected because an object has one wrapper for its whole lifetime.
    pub fn set_bridge(&self, peer: PeerRef) -> Result<(), BridgeError> {
        match self.peer.compare_exchange(
            ptr::null_mut(),
            peer.as_ptr(),
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => Ok(()),
            Err(current) => match PeerRef::new(current) {
                Some(existing) if existing == peer => Ok(()),
                Some(existing) => Err(BridgeError::AlreadyBridged {
                    existing,
                    requested: peer,
                }),
                None => unreachable!("compare_exchange against null failed on a null pointer"),
            },
        }
    }

    #[inline]
    pub fn is_bridged(&self) -> bool {
        !self.peer.load(Ordering::Acquire).is_null()
    }

    pub(crate) fn attach_registry(&self, registry: &Arc<AliveRegistry>) {
        let _ = self.registry.set(Arc::clone(registry));
    }

    pub(crate) fn registry(&self) -> Option<&Arc<AliveRegistry>> {
        self.registry.get()
    }
}

impl Default for ObjectHeader {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ObjectHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectHeader")
            .field("refcount", &self.count())
            .field("peer", &self.bridge_peer())
            .finish()
    }
}

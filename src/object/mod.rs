//! Intrusive reference-counted objects
//!
//! Design: the count lives inside the object (in its [`ObjectHeader`]) so a
//! raw pointer handed across the host boundary is enough to take or release
//! a reference:
//! 1. Atomic increment/decrement, no locking
//! 2. Destruction runs on the thread whose decrement reaches zero
//! 3. Polymorphic destruction through `Ref<dyn Object>`
//! 4. Optional registry membership for leak reports

mod header;
mod refs;


pub use header::ObjectHeader;
pub use refs::Ref;

use core::ptr::NonNull;

use crate::bridge::PeerRef;
use crate::error::BridgeError;
use crate::logging::log_object_destroy;
use crate::registry::ObjectId;

/// Base trait of every native object.
///
/// Implementors embed an [`ObjectHeader`] and return it from `header`.
/// Derived cleanup goes in the type's `Drop` impl.
pub trait Object: Send + Sync {
    fn header(&self) -> &ObjectHeader;

    /// Tag used by leak reports and logs
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    fn bridge_peer(&self) -> Option<PeerRef> {
        self.header().bridge_peer()
    }

    fn set_bridge(&self, peer: PeerRef) -> Result<(), BridgeError> {
        self.header().set_bridge(peer)
    }
}

/// Take one more reference to the object at `ptr`.
///
/// # Safety
/// `ptr` must point to a live object allocated by [`Ref::new`].
#[inline(always)]
pub unsafe fn increment<T: Object + ?Sized>(ptr: NonNull<T>) {
    ptr.as_ref().header().increment();
}

/// Release one reference, destroying the object when it was the last.
///
/// Releasing an object whose count is already zero aborts the process.
///
/// # Safety
/// `ptr` must point to an object allocated by [`Ref::new`], and the caller
/// must own the reference being released.
#[inline(always)]
pub unsafe fn decrement<T: Object + ?Sized>(ptr: NonNull<T>) {
    let object = ptr.as_ref();
    if object.header().release(object.type_name()) {
        destroy(ptr);
    }
}

/// Destroy object (cold path, separated for better code generation)
#[cold]
#[inline(never)]
unsafe fn destroy<T: Object + ?Sized>(ptr: NonNull<T>) {
    let id = ObjectId::of(ptr.as_ptr());
    let object = ptr.as_ref();

    if let Some(registry) = object.header().registry() {
        registry.untrack(id);
    }
    log_object_destroy(object.type_name(), id.addr());

    // Runs the concrete type's Drop, then frees the allocation
    drop(Box::from_raw(ptr.as_ptr()));
}

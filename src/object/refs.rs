//! Owning handle over an intrusive object

use core::marker::PhantomData;
use core::ops::Deref;
use core::ptr::NonNull;
use std::sync::Arc;

use super::{decrement, increment, Object, ObjectHeader};
use crate::logging::log_object_new;
use crate::registry::{self, AliveRegistry, ObjectId};

/// Reference counted pointer to a native object
///
/// Design: one pointer wide, the count is inside the pointee.
/// - `Clone` increments, `Drop` decrements
/// - Deterministic destruction on the last drop
/// - `into_raw`/`from_raw` hand references to host glue and back
pub struct Ref<T: Object + ?Sized> {
    ptr: NonNull<T>,
    _marker: PhantomData<T>,
}

impl<T: Object> Ref<T> {
    /// Allocate `value`, tracked in the process-wide registry
    pub fn new(value: T) -> Self {
        Self::new_in(value, registry::global())
    }

    /// Allocate `value`, tracked in `registry`
    pub fn new_in(value: T, registry: &Arc<AliveRegistry>) -> Self {
        let ptr = NonNull::from(Box::leak(Box::new(value)));
        // SAFETY: just allocated, we hold the creator's reference
        let object = unsafe { ptr.as_ref() };
        debug_assert_eq!(object.header().count(), 1, "objects start with one reference");

        let id = ObjectId::of(ptr.as_ptr());
        if registry::ENABLED {
            registry.track(id, object.type_name());
            object.header().attach_registry(registry);
        }
        log_object_new(object.type_name(), id.addr());

        Self {
            ptr,
            _marker: PhantomData,
        }
    }
}

impl<T: Object + 'static> Ref<T> {
    /// Erase the concrete type; destruction still runs `T`'s cleanup
    pub fn into_dyn(this: Self) -> Ref<dyn Object> {
        let ptr: NonNull<dyn Object> = Self::into_raw(this);
        Ref {
            ptr,
            _marker: PhantomData,
        }
    }
}

impl<T: Object + ?Sized> Ref<T> {
    /// Get current reference count (for debugging)
    #[inline]
    pub fn count(this: &Self) -> u32 {
        Self::header(this).count()
    }

    #[inline]
    pub fn header(this: &Self) -> &ObjectHeader {
        (**this).header()
    }

    #[inline]
    pub fn id(this: &Self) -> ObjectId {
        ObjectId::of(this.ptr.as_ptr())
    }

    #[inline]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Self::id(a) == Self::id(b)
    }

    /// Get raw pointer without giving up this reference
    #[inline]
    pub fn as_ptr(this: &Self) -> NonNull<T> {
        this.ptr
    }

    /// Convert to raw pointer, consuming self without decrementing refcount
    #[inline]
    pub fn into_raw(this: Self) -> NonNull<T> {
        let ptr = this.ptr;
        core::mem::forget(this);
        ptr
    }

    /// Create from raw pointer without incrementing refcount
    ///
    /// # Safety
    /// `ptr` must come from [`Ref::into_raw`] (or carry a reference taken
    /// with [`increment`]) and that reference must not be used again.
    #[inline]
    pub unsafe fn from_raw(ptr: NonNull<T>) -> Self {
        Self {
            ptr,
            _marker: PhantomData,
        }
    }
}

impl<T: Object + ?Sized> Clone for Ref<T> {
    #[inline]
    fn clone(&self) -> Self {
        // SAFETY: self keeps the object alive
        unsafe { increment(self.ptr) };
        Self {
            ptr: self.ptr,
            _marker: PhantomData,
        }
    }
}

impl<T: Object + ?Sized> Drop for Ref<T> {
    #[inline]
    fn drop(&mut self) {
        // SAFETY: self owns exactly one reference
        unsafe { decrement(self.ptr) };
    }
}

impl<T: Object + ?Sized> Deref for Ref<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // SAFETY: self keeps the object alive
        unsafe { self.ptr.as_ref() }
    }
}

impl<T: Object + ?Sized> std::fmt::Debug for Ref<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ref")
            .field("object", &self.type_name())
            .field("address", &Self::id(self))
            .field("header", Self::header(self))
            .finish()
    }
}

// Object requires Send + Sync and the count is atomic
unsafe impl<T: Object + ?Sized> Send for Ref<T> {}
unsafe impl<T: Object + ?Sized> Sync for Ref<T> {}

//! Host lock - RAII capability for mutating host-managed values
//!
//! Holding a [`HostLock`] proves the calling thread owns the host's global
//! interpreter lock. Hooks that touch wrapper counts take `&HostLock`, so
//! they cannot be called without one.

use std::cell::RefCell;
use std::marker::PhantomData;

use crate::error::{FatalError, HostLockError};
use crate::fatal::abort_with;
use crate::object::Object;

use super::PeerRef;

thread_local! {
    /// HostLock guards alive on this thread, as (host, depth) pairs
    static HELD: RefCell<Vec<(usize, usize)>> = const { RefCell::new(Vec::new()) };
}

fn host_key(hooks: &dyn HostHooks) -> usize {
    hooks as *const dyn HostHooks as *const () as usize
}

fn depth_of(key: usize) -> usize {
    HELD.with(|held| {
        held.borrow()
            .iter()
            .find(|(host, _)| *host == key)
            .map_or(0, |(_, depth)| *depth)
    })
}

fn set_depth(key: usize, depth: usize) {
    HELD.with(|held| {
        let mut held = held.borrow_mut();
        held.retain(|(host, _)| *host != key);
        if depth > 0 {
            held.push((key, depth));
        }
    });
}

/// Opaque value a host hands back from `acquire`/`suspend`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostLockState(pub usize);

/// Callbacks into the embedded scripting host, registered once per process.
///
/// `acquire`/`release` must be reentrant on the same thread.
pub trait HostHooks: Send + Sync {
    fn name(&self) -> &'static str;

    /// Block until the calling thread owns the host lock
    fn acquire(&self) -> Result<HostLockState, HostLockError>;

    /// Undo one `acquire`
    fn release(&self, state: HostLockState);

    /// Fully release the host lock held by this thread, at any depth
    fn suspend(&self) -> HostLockState;

    /// Restore the lock released by `suspend`
    fn resume(&self, token: HostLockState);

    /// Take a wrapper reference on behalf of native code.
    ///
    /// `object` is the native side of `peer` and is alive for the call. A
    /// host that already collected the wrapper must revive it or abort;
    /// touching a dead wrapper is never allowed.
    fn incref(&self, peer: PeerRef, object: &(dyn Object + 'static), lock: &HostLock<'_>);

    fn decref(&self, peer: PeerRef, lock: &HostLock<'_>);

    /// Called on every pool worker thread before it runs tasks
    fn attach_thread(&self) {}

    /// Called on every pool worker thread before it exits
    fn detach_thread(&self) {}
}

/// Guard over the host's global interpreter lock.
///
/// Released when dropped, including during unwinding. Not `Send`: the host
/// lock belongs to the thread that acquired it.
pub struct HostLock<'h> {
    hooks: &'h dyn HostHooks,
    state: HostLockState,
    _not_send: PhantomData<*const ()>,
}

impl<'h> HostLock<'h> {
    /// Acquire the host lock, blocking until it is available.
    ///
    /// A thread the host does not recognize means the embedding is broken;
    /// the process is aborted.
    pub fn acquire(hooks: &'h dyn HostHooks) -> Self {
        match hooks.acquire() {
            Ok(state) => {
                let key = host_key(hooks);
                set_depth(key, depth_of(key) + 1);
                Self {
                    hooks,
                    state,
                    _not_send: PhantomData,
                }
            }
            Err(error) => abort_with(FatalError::HostLock(error)),
        }
    }

    pub fn hooks(&self) -> &'h dyn HostHooks {
        self.hooks
    }

    /// Run `f` with the host lock fully released, then take it back.
    ///
    /// Use this around anything that blocks on other threads which may
    /// need the host lock, such as draining the task pool.
    pub fn unlocked<R>(&mut self, f: impl FnOnce() -> R) -> R {
        let key = host_key(self.hooks);
        let token = self.hooks.suspend();
        let depth = depth_of(key);
        set_depth(key, 0);

        let _resume = Resume {
            hooks: self.hooks,
            token,
            key,
            depth,
        };
        f()
    }
}

impl Drop for HostLock<'_> {
    fn drop(&mut self) {
        let key = host_key(self.hooks);
        set_depth(key, depth_of(key).saturating_sub(1));
        self.hooks.release(self.state);
    }
}

impl std::fmt::Debug for HostLock<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostLock")
            .field("host", &self.hooks.name())
            .field("state", &self.state)
            .finish()
    }
}

/// Reacquires on every exit path of `HostLock::unlocked`
struct Resume<'h> {
    hooks: &'h dyn HostHooks,
    token: HostLockState,
    key: usize,
    depth: usize,
}

impl Drop for Resume<'_> {
    fn drop(&mut self) {
        self.hooks.resume(self.token);
        set_depth(self.key, self.depth);
    }
}

/// Whether the current thread holds a [`HostLock`] of any host
pub fn host_lock_held() -> bool {
    HELD.with(|held| !held.borrow().is_empty())
}

/// Whether the current thread holds a [`HostLock`] of this host
pub fn host_lock_held_by(hooks: &dyn HostHooks) -> bool {
    depth_of(host_key(hooks)) > 0
}

//! CPython host hooks
//!
//! The host lock is the GIL. Wrappers are `PyObject` pointers whose count is
//! the interpreter's own reference count.
//!
//! The interpreter frees a wrapper as soon as its count reaches zero, so the
//! host keeps a weak reference per bridged wrapper and checks it before every
//! native increment.

use core::ptr::NonNull;

use dashmap::DashMap;
use pyo3::exceptions::PyRuntimeError;
use pyo3::ffi;
use pyo3::prelude::*;

use super::{Bridge, HostHooks, HostLock, HostLockState, PeerRef};
use crate::error::{FatalError, HostLockError};
use crate::fatal::abort_with;
use crate::logging::debug;
use crate::object::Object;

/// Owned `weakref` object; only touched with the GIL held
struct WeakPeer(NonNull<ffi::PyObject>);

unsafe impl Send for WeakPeer {}
unsafe impl Sync for WeakPeer {}

impl WeakPeer {
    /// # Safety
    /// The GIL must be held.
    unsafe fn is_alive(&self) -> bool {
        ffi::PyWeakref_GetObject(self.0.as_ptr()) != ffi::Py_None()
    }
}

/// Hooks for an extension module loaded into CPython
#[derive(Default)]
pub struct PythonHost {
    weak: DashMap<PeerRef, WeakPeer>,
}

impl PythonHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bridge `object` to its Python `wrapper`.
    ///
    /// The wrapper's type must support weak references
    /// (`#[pyclass(weakref)]`).
    pub fn attach<T: Object + ?Sized>(
        &self,
        bridge: &Bridge,
        object: &T,
        wrapper: &PyAny,
    ) -> PyResult<PeerRef> {
        let peer = peer_of(wrapper);
        // SAFETY: `wrapper` proves the GIL is held
        let tracked = self
            .weak
            .get(&peer)
            .is_some_and(|weak| unsafe { weak.is_alive() });

        if !tracked {
            // SAFETY: GIL held; a null callback is allowed
            let weak = unsafe { ffi::PyWeakref_NewRef(wrapper.as_ptr(), core::ptr::null_mut()) };
            let weak = NonNull::new(weak).ok_or_else(|| PyErr::fetch(wrapper.py()))?;
            if let Some(stale) = self.weak.insert(peer, WeakPeer(weak)) {
                // SAFETY: GIL held; the map owned this reference
                unsafe { ffi::Py_DecRef(stale.0.as_ptr()) };
            }
        }

        bridge.attach(object, peer);
        Ok(peer)
    }

    /// Forget wrappers the interpreter already collected
    pub fn prune(&self, _py: Python<'_>) -> usize {
        let before = self.weak.len();
        // SAFETY: `_py` proves the GIL is held
        self.weak.retain(|_, weak| unsafe {
            let alive = weak.is_alive();
            if !alive {
                ffi::Py_DecRef(weak.0.as_ptr());
            }
            alive
        });
        before - self.weak.len()
    }

    pub fn tracked_wrappers(&self) -> usize {
        self.weak.len()
    }
}

impl std::fmt::Debug for PythonHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PythonHost")
            .field("wrappers", &self.weak.len())
            .finish()
    }
}

/// Peer for a Python object (borrowed, no reference is taken)
pub fn peer_of(object: &PyAny) -> PeerRef {
    PeerRef::from_non_null(
        // SAFETY: a &PyAny is never null
        unsafe { core::ptr::NonNull::new_unchecked(object.as_ptr().cast()) },
    )
}

impl HostHooks for PythonHost {
    fn name(&self) -> &'static str {
        "cpython"
    }

    fn acquire(&self) -> Result<HostLockState, HostLockError> {
        // SAFETY: plain queries/ensures on the C API
        unsafe {
            if ffi::Py_IsInitialized() == 0 {
                return Err(HostLockError::NotInitialized);
            }
            let state = ffi::PyGILState_Ensure();
            Ok(HostLockState(match state {
                ffi::PyGILState_STATE::PyGILState_LOCKED => 0,
                ffi::PyGILState_STATE::PyGILState_UNLOCKED => 1,
            }))
        }
    }

    fn release(&self, state: HostLockState) {
        let state = match state.0 {
            0 => ffi::PyGILState_STATE::PyGILState_LOCKED,
            _ => ffi::PyGILState_STATE::PyGILState_UNLOCKED,
        };
        // SAFETY: paired with the Ensure in `acquire`
        unsafe { ffi::PyGILState_Release(state) };
    }

    fn suspend(&self) -> HostLockState {
        // SAFETY: only reachable through a live HostLock, so the GIL is held
        let thread_state = unsafe { ffi::PyEval_SaveThread() };
        HostLockState(thread_state as usize)
    }

    fn resume(&self, token: HostLockState) {
        // SAFETY: token came from `suspend` on this thread
        unsafe { ffi::PyEval_RestoreThread(token.0 as *mut ffi::PyThreadState) };
    }

    fn incref(&self, peer: PeerRef, _object: &(dyn Object + 'static), _lock: &HostLock<'_>) {
        // SAFETY: GIL held; a collected wrapper is never dereferenced
        let alive = self
            .weak
            .get(&peer)
            .is_some_and(|weak| unsafe { weak.is_alive() });
        if !alive {
            abort_with(FatalError::StalePeer { peer });
        }

        // SAFETY: GIL held and the wrapper is alive
        unsafe { ffi::Py_IncRef(peer.as_ptr().cast()) };
    }

    fn decref(&self, peer: PeerRef, _lock: &HostLock<'_>) {
        // SAFETY: GIL held; native code owns this wrapper reference
        unsafe { ffi::Py_DecRef(peer.as_ptr().cast()) };

        let collected = self
            .weak
            .remove_if(&peer, |_, weak| unsafe { !weak.is_alive() });
        if let Some((_, weak)) = collected {
            debug!(event = "wrapper_collected", peer = peer.addr());
            // SAFETY: GIL held; the map owned this reference
            unsafe { ffi::Py_DecRef(weak.0.as_ptr()) };
        }
    }
}

/// Drain the process-wide task pool with the GIL released
#[pyfunction]
fn wait_for_tasks(py: Python<'_>) -> PyResult<()> {
    py.allow_threads(crate::tasks::wait_for_tasks)
        .map_err(|e| PyRuntimeError::new_err(e.to_string()))
}

/// Start the process-wide pool with CPython hooks installed
#[pyfunction]
#[pyo3(signature = (workers=0))]
fn init(workers: usize) -> PyResult<()> {
    let mut config = crate::config::RuntimeConfig::discover().apply_env();
    if workers > 0 {
        config.tasks.workers = workers;
    }

    let hooks = std::sync::Arc::new(PythonHost::new());
    crate::bridge::install(hooks.clone()).map_err(|e| PyRuntimeError::new_err(e.to_string()))?;
    crate::tasks::init_with_host(&config.tasks, hooks)
        .map(|_| ())
        .map_err(|e| PyRuntimeError::new_err(e.to_string()))
}

/// Pending task count of the process-wide pool
#[pyfunction]
fn pending_tasks() -> PyResult<usize> {
    crate::tasks::global()
        .map(|pool| pool.pending())
        .map_err(|e| PyRuntimeError::new_err(e.to_string()))
}

#[pymodule]
fn _lumen(_py: Python, m: &PyModule) -> PyResult<()> {
    crate::logging::init();
    m.add_function(wrap_pyfunction!(init, m)?)?;
    m.add_function(wrap_pyfunction!(wait_for_tasks, m)?)?;
    m.add_function(wrap_pyfunction!(pending_tasks, m)?)?;
    Ok(())
}

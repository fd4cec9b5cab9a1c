//! Process-wide task pool
//!
//! Explicitly initialized once and shut down once; tests that need isolation
//! build their own [`TaskPool`] instead.

use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use super::{PoolStats, TaskHandle, TaskPool};
use crate::bridge::HostHooks;
use crate::config::TasksConfig;
use crate::error::PoolError;

static POOL: Lazy<RwLock<Option<Arc<TaskPool>>>> = Lazy::new(|| RwLock::new(None));

fn install(pool: TaskPool) -> Result<Arc<TaskPool>, PoolError> {
    let mut slot = POOL.write();
    if slot.is_some() {
        return Err(PoolError::AlreadyInitialized);
    }
    let pool = Arc::new(pool);
    *slot = Some(Arc::clone(&pool));
    Ok(pool)
}

pub fn init(config: &TasksConfig) -> Result<Arc<TaskPool>, PoolError> {
    if is_initialized() {
        return Err(PoolError::AlreadyInitialized);
    }
    install(TaskPool::new(config)?)
}

pub fn init_with_host(
    config: &TasksConfig,
    hooks: Arc<dyn HostHooks>,
) -> Result<Arc<TaskPool>, PoolError> {
    if is_initialized() {
        return Err(PoolError::AlreadyInitialized);
    }
    install(TaskPool::with_host(config, hooks)?)
}

pub fn is_initialized() -> bool {
    POOL.read().is_some()
}

pub fn global() -> Result<Arc<TaskPool>, PoolError> {
    POOL.read().clone().ok_or(PoolError::NotInitialized)
}

pub fn submit<F, T>(f: F) -> Result<TaskHandle<T>, PoolError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    Ok(global()?.submit(f))
}

/// Drain the process-wide pool; the host lock must not be held
pub fn wait_for_tasks() -> Result<(), PoolError> {
    global()?.wait_for_tasks()
}

/// Drain and remove the process-wide pool. `init` may be called again.
pub fn shutdown() -> Result<PoolStats, PoolError> {
    global()?.wait_for_tasks()?;

    let pool = POOL.write().take().ok_or(PoolError::NotInitialized)?;
    match Arc::try_unwrap(pool) {
        Ok(pool) => pool.shutdown(),
        // Workers exit once the last outside handle is dropped
        Err(shared) => {
            shared.wait_for_tasks()?;
            Ok(shared.stats())
        }
    }
}

//! Runtime context - owns the task pool, bridge and registry of one embedding
//!
//! Shutdown order: drain tasks, stop workers, drop the bridge, then report
//! whatever objects are still alive.

use std::sync::Arc;

use crate::bridge::{Bridge, BridgedRef, HostHooks};
use crate::config::RuntimeConfig;
use crate::error::PoolError;
use crate::logging::{self, log_runtime_init, log_runtime_shutdown, LogConfig};
use crate::object::{Object, Ref};
use crate::registry::{self, AliveRegistry, LiveEntry};
use crate::tasks::{PoolStats, TaskHandle, TaskPool};

/// Summary returned by [`Runtime::shutdown`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub tasks: PoolStats,
    /// Objects still alive after teardown, grouped by tag
    pub leaked: Vec<LiveEntry>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.leaked.is_empty() && self.tasks.pending == 0
    }
}

#[derive(Default)]
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    host: Option<Arc<dyn HostHooks>>,
    registry: Option<Arc<AliveRegistry>>,
    init_logging: bool,
}

impl RuntimeBuilder {
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Bridge objects to this host; pool workers register with it
    pub fn host(mut self, hooks: Arc<dyn HostHooks>) -> Self {
        self.host = Some(hooks);
        self
    }

    /// Track objects in `registry` instead of the process-wide one
    pub fn registry(mut self, registry: Arc<AliveRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Initialize logging from the `[logging]` section
    pub fn with_logging(mut self) -> Self {
        self.init_logging = true;
        self
    }

    pub fn build(self) -> Result<Runtime, PoolError> {
        if self.init_logging {
            logging::init_with_config(LogConfig::from_section(&self.config.logging));
        }

        let pool = match &self.host {
            Some(hooks) => TaskPool::with_host(&self.config.tasks, Arc::clone(hooks))?,
            None => TaskPool::new(&self.config.tasks)?,
        };
        let bridge = self.host.map(|hooks| Arc::new(Bridge::new(hooks)));
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::clone(registry::global()));

        log_runtime_init(pool.workers(), bridge.is_some());

        Ok(Runtime {
            config: self.config,
            pool: Arc::new(pool),
            bridge,
            registry,
        })
    }
}

pub struct Runtime {
    config: RuntimeConfig,
    pool: Arc<TaskPool>,
    bridge: Option<Arc<Bridge>>,
    registry: Arc<AliveRegistry>,
}

impl Runtime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::default()
    }

    /// Runtime from `lumen.toml` (if found) and the environment
    pub fn from_env() -> Result<Self, PoolError> {
        Self::builder()
            .config(RuntimeConfig::discover().apply_env())
            .build()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Allocate an object tracked by this runtime's registry
    pub fn create<T: Object>(&self, value: T) -> Ref<T> {
        Ref::new_in(value, &self.registry)
    }

    /// Native reference routed through the bridge, if a host is attached
    pub fn share<T: Object + 'static>(&self, object: &Ref<T>) -> Option<BridgedRef<T>> {
        self.bridge
            .as_ref()
            .map(|bridge| BridgedRef::new(bridge, object))
    }

    pub fn submit<F, T>(&self, f: F) -> TaskHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.pool.submit(f)
    }

    pub fn wait_for_tasks(&self) -> Result<(), PoolError> {
        self.pool.wait_for_tasks()
    }

    pub fn pool(&self) -> &Arc<TaskPool> {
        &self.pool
    }

    pub fn bridge(&self) -> Option<&Arc<Bridge>> {
        self.bridge.as_ref()
    }

    pub fn registry(&self) -> &Arc<AliveRegistry> {
        &self.registry
    }

    pub fn shutdown(self) -> Result<ShutdownReport, PoolError> {
        let _perf = logging::perf::track("runtime_shutdown");
        self.pool.wait_for_tasks()?;

        let tasks = match Arc::try_unwrap(self.pool) {
            Ok(pool) => pool.shutdown()?,
            Err(shared) => shared.stats(),
        };
        drop(self.bridge);

        let leaked = if self.config.registry.report_on_shutdown {
            self.registry.report_leaks()
        } else {
            self.registry.report()
        };
        log_runtime_shutdown(leaked.iter().map(|entry| entry.count).sum());

        Ok(ShutdownReport { tasks, leaked })
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("pool", &self.pool)
            .field("bridge", &self.bridge)
            .field("registry", &self.registry)
            .finish()
    }
}

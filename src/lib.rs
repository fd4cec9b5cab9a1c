//! Lumen - native object runtime for embedding in a scripting host
//!
//! - `object`: intrusive reference counting with polymorphic destruction
//! - `bridge`: keeps host wrappers and native objects alive together
//! - `registry`: debug-only ledger of live objects for leak reports
//! - `tasks`: worker pool with per-task result handles
//! - `runtime`: ties the services together with explicit init/shutdown

pub mod bridge;
pub mod config;
pub mod convert;
pub mod error;
pub mod fatal;
pub mod logging;
pub mod object;
pub mod registry;
pub mod runtime;
pub mod tasks;

// Re-export commonly used items
pub use bridge::{Bridge, BridgedRef, HostHooks, HostLock, LocalHost, PeerRef};
pub use config::RuntimeConfig;
pub use error::{BridgeError, ConfigError, FatalError, HostLockError, PoolError, RangeError, TaskError};
pub use object::{Object, ObjectHeader, Ref};
pub use registry::{AliveRegistry, LiveEntry};
pub use runtime::{Runtime, RuntimeBuilder, ShutdownReport};
pub use tasks::{TaskHandle, TaskId, TaskPool};

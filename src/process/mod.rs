// Process module - supervisor core: launcher, lifecycle, restart policy,
// per-instance actor, memory monitor

pub mod instance;
pub mod lifecycle;
pub mod monitor;
pub mod restart;
pub mod spawner;
pub mod supervisor;

pub use instance::{InstanceHandle, InstanceSnapshot};
pub use lifecycle::{ExitEvent, InstanceStatus};
pub use monitor::{spawn_memory_monitor, MemoryMonitor, DEFAULT_SAMPLE_INTERVAL};
pub use restart::{CrashTracker, Decision, RestartPolicy};
pub use spawner::{spawn_instance, SpawnedChild};
pub use supervisor::Supervisor;

use crate::config::AppSpec;
use crate::error::{Result, WardenError};
use crate::process::instance::{InstanceHandle, InstanceSnapshot};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Owns every supervised instance. The registry maps slot names to instance
/// handles; all process state lives behind those handles, in the instance
/// tasks themselves.
///
/// Control operations address apps by name and fan out to every slot of
/// that app. A bare slot name ("web-1") is accepted too.
///
/// Stop/restart/status take `&self`: behind an `RwLock` they run
/// concurrently, so a stop waiting out one app's grace period never blocks
/// operations on other apps. Only registry mutation (registering an app,
/// shutting everything down) takes `&mut self`.
pub struct Supervisor {
    instances: BTreeMap<String, InstanceHandle>,
    log_dir: PathBuf,
}

impl Supervisor {
    pub fn new(log_dir: PathBuf) -> Self {
        Self {
            instances: BTreeMap::new(),
            log_dir,
        }
    }

    /// Register an app and launch all of its instance slots. Launch
    /// failures are reported, but every slot stays registered and under
    /// its restart policy either way.
    pub async fn start_app(&mut self, spec: AppSpec) -> Result<Vec<InstanceSnapshot>> {
        if self.instances.values().any(|h| h.app() == spec.name) {
            return Err(WardenError::AppAlreadyExists(spec.name));
        }

        let slots = spec.slot_names();
        let spec = Arc::new(spec);

        info!(app = %spec.name, slots = slots.len(), "starting app");

        let mut first_err = None;
        let mut snapshots = Vec::with_capacity(slots.len());

        for slot in slots {
            let handle = InstanceHandle::spawn(Arc::clone(&spec), slot.clone(), self.log_dir.clone());
            if let Err(e) = handle.start().await {
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
            snapshots.push(handle.snapshot());
            self.instances.insert(slot, handle);
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(snapshots),
        }
    }

    /// Start a registered app again after it was stopped (or failed).
    pub async fn start_registered(&self, name: &str) -> Result<Vec<InstanceSnapshot>> {
        let slots = self.resolve(name)?;
        info!(app = name, slots = slots.len(), "starting registered app");

        let mut snapshots = Vec::with_capacity(slots.len());
        for slot in slots {
            if let Some(handle) = self.instances.get(&slot) {
                handle.start().await?;
                snapshots.push(handle.snapshot());
            }
        }
        Ok(snapshots)
    }

    /// Stop every slot of an app. Instances stay registered so they can be
    /// started again later.
    pub async fn stop_app(&self, name: &str) -> Result<usize> {
        let slots = self.resolve(name)?;
        info!(app = name, slots = slots.len(), "stopping app");

        let mut stopped = 0;
        for slot in slots {
            if let Some(handle) = self.instances.get(&slot) {
                handle.stop().await?;
                stopped += 1;
            }
        }
        Ok(stopped)
    }

    /// Restart every slot of an app. Works from any state, including
    /// `failed`, and clears the crash history.
    pub async fn restart_app(&self, name: &str) -> Result<usize> {
        let slots = self.resolve(name)?;
        info!(app = name, slots = slots.len(), "restarting app");

        let mut restarted = 0;
        for slot in slots {
            if let Some(handle) = self.instances.get(&slot) {
                handle.restart().await?;
                restarted += 1;
            }
        }
        Ok(restarted)
    }

    /// Snapshots for one app, or for everything when `name` is `None`.
    pub fn status(&self, name: Option<&str>) -> Result<Vec<InstanceSnapshot>> {
        match name {
            Some(name) => {
                let slots = self.resolve(name)?;
                Ok(slots
                    .iter()
                    .filter_map(|s| self.instances.get(s))
                    .map(|h| h.snapshot())
                    .collect())
            }
            None => Ok(self.instances.values().map(|h| h.snapshot()).collect()),
        }
    }

    pub fn instances(&self) -> impl Iterator<Item = &InstanceHandle> {
        self.instances.values()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Stop every instance and terminate all instance tasks.
    pub async fn shutdown_all(&mut self) {
        info!(count = self.instances.len(), "shutting down all instances");
        let instances = std::mem::take(&mut self.instances);
        for (_, handle) in instances {
            handle.shutdown().await;
        }
    }

    /// Slot names addressed by `name`: either an app name (all of its
    /// slots) or one exact slot name.
    fn resolve(&self, name: &str) -> Result<Vec<String>> {
        let slots: Vec<String> = self
            .instances
            .values()
            .filter(|h| h.app() == name || h.slot() == name)
            .map(|h| h.slot().to_string())
            .collect();

        if slots.is_empty() {
            return Err(WardenError::AppNotFound(name.to_string()));
        }
        Ok(slots)
    }
}

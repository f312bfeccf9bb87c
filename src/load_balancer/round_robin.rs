//! Round-robin load balancing strategy.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{RegistryError, RegistryResult};
use crate::load_balancer::target::UpstreamTarget;

/// Round-robin selector over an ordered rotation of upstream targets.
///
/// Each selection takes the front target and re-appends it, so `N` calls
/// over `N` targets return every target once, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct LoadBalancer {
    rotation: Arc<Mutex<VecDeque<UpstreamTarget>>>,
}

impl LoadBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a balancer with an initial rotation.
    pub fn with_targets(targets: impl IntoIterator<Item = UpstreamTarget>) -> Self {
        Self {
            rotation: Arc::new(Mutex::new(targets.into_iter().collect())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<UpstreamTarget>> {
        self.rotation.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a target to the back of the rotation.
    pub fn add_target(&self, host: impl Into<String>, port: u16) {
        let target = UpstreamTarget::new(host, port);
        tracing::debug!(target = %target, "Upstream target added");
        self.lock().push_back(target);
    }

    /// Remove every occurrence of a target. Returns true if any was removed.
    pub fn remove_target(&self, host: &str, port: u16) -> bool {
        let mut rotation = self.lock();
        let before = rotation.len();
        rotation.retain(|t| !(t.host == host && t.port == port));
        before != rotation.len()
    }

    /// Replace the whole rotation, e.g. after a configuration reload.
    pub fn replace_targets(&self, targets: impl IntoIterator<Item = UpstreamTarget>) {
        let mut rotation = self.lock();
        *rotation = targets.into_iter().collect();
        tracing::info!(targets = rotation.len(), "Upstream rotation replaced");
    }

    /// Select the next target.
    pub fn next_target(&self) -> RegistryResult<UpstreamTarget> {
        let mut rotation = self.lock();
        let target = rotation.pop_front().ok_or(RegistryError::NoTargets)?;
        rotation.push_back(target.clone());
        Ok(target)
    }

    /// Snapshot of the rotation in its current order.
    pub fn targets(&self) -> Vec<UpstreamTarget> {
        self.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

//! # Named counting semaphores bounding per-class parallelism.
//!
//! Every task names a concurrency class; a dispatcher must hold one permit
//! of that class while the body runs. The stock classes are `single` (1),
//! `multiple` (10) and `default` (3); hosts may register more before the
//! engine starts. Acquiring an unknown name falls back to `default`.
//!
//! Permits are RAII (`OwnedSemaphorePermit`): release happens on drop, which
//! makes release-after-cancel naturally idempotent and makes it impossible
//! to release more permits than were acquired.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Semaphore;

/// Semaphore class that serializes execution.
pub const SINGLE: &str = "single";
/// Semaphore class for broadly parallel work.
pub const MULTIPLE: &str = "multiple";
/// Fallback class for unregistered names.
pub const DEFAULT: &str = "default";

/// Immutable registry of named semaphores.
///
/// Built once before the engine starts; lookups are lock-free thereafter.
pub struct SemaphoreRegistry {
    semaphores: HashMap<String, Arc<Semaphore>>,
}

impl SemaphoreRegistry {
    /// Creates the registry with the required stock classes plus any
    /// host-registered extras. An extra named like a stock class overrides
    /// its limit.
    pub fn new(extra: impl IntoIterator<Item = (String, usize)>) -> Self {
        let mut semaphores = HashMap::new();
        semaphores.insert(SINGLE.to_string(), Arc::new(Semaphore::new(1)));
        semaphores.insert(MULTIPLE.to_string(), Arc::new(Semaphore::new(10)));
        semaphores.insert(DEFAULT.to_string(), Arc::new(Semaphore::new(3)));
        for (name, permits) in extra {
            semaphores.insert(name, Arc::new(Semaphore::new(permits.max(1))));
        }
        Self { semaphores }
    }

    /// Returns the semaphore for `name`, falling back to `default`.
    pub fn get(&self, name: &str) -> Arc<Semaphore> {
        self.semaphores
            .get(name)
            .or_else(|| self.semaphores.get(DEFAULT))
            .cloned()
            .expect("default semaphore is always registered")
    }
}

impl Default for SemaphoreRegistry {
    fn default() -> Self {
        Self::new([])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stock_limits() {
        let reg = SemaphoreRegistry::default();
        assert_eq!(reg.get(SINGLE).available_permits(), 1);
        assert_eq!(reg.get(MULTIPLE).available_permits(), 10);
        assert_eq!(reg.get(DEFAULT).available_permits(), 3);
    }

    #[test]
    fn unknown_name_falls_back_to_default() {
        let reg = SemaphoreRegistry::default();
        assert!(Arc::ptr_eq(&reg.get("no-such-class"), &reg.get(DEFAULT)));
    }

    #[test]
    fn host_registrations_are_honored() {
        let reg = SemaphoreRegistry::new([("gpu".to_string(), 2)]);
        assert_eq!(reg.get("gpu").available_permits(), 2);
    }
}

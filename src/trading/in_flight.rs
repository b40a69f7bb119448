//! In-flight execution registry
//!
//! At most one execution (entry or exit) may be outstanding per address.
//! Acquiring returns a guard; dropping the guard releases the address.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

/// What kind of execution holds the address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InFlightKind {
    Entry,
    Exit,
}

/// Registry of addresses with an outstanding execution
#[derive(Debug, Default)]
pub struct InFlightRegistry {
    active: DashMap<String, InFlightKind>,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `address`; `None` if another execution already holds it
    pub fn try_acquire(
        self: &Arc<Self>,
        address: &str,
        kind: InFlightKind,
    ) -> Option<InFlightGuard> {
        match self.active.entry(address.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(kind);
                Some(InFlightGuard {
                    registry: Arc::clone(self),
                    address: address.to_string(),
                    kind,
                })
            }
        }
    }

    pub fn is_in_flight(&self, address: &str) -> bool {
        self.active.contains_key(address)
    }

    pub fn kind(&self, address: &str) -> Option<InFlightKind> {
        self.active.get(address).map(|k| *k)
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

/// Releases the address on drop
#[derive(Debug)]
pub struct InFlightGuard {
    registry: Arc<InFlightRegistry>,
    address: String,
    kind: InFlightKind,
}

impl InFlightGuard {
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn kind(&self) -> InFlightKind {
        self.kind
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.registry.active.remove(&self.address);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_holder_per_address() {
        let registry = Arc::new(InFlightRegistry::new());
        let guard = registry.try_acquire("Mint111", InFlightKind::Entry).unwrap();
        assert!(registry.try_acquire("Mint111", InFlightKind::Exit).is_none());
        assert!(registry.try_acquire("Mint222", InFlightKind::Exit).is_some());
        assert_eq!(registry.kind("Mint111"), Some(InFlightKind::Entry));

        drop(guard);
        assert!(!registry.is_in_flight("Mint111"));
        assert!(registry.try_acquire("Mint111", InFlightKind::Exit).is_some());
    }

    #[tokio::test]
    async fn test_concurrent_acquire() {
        let registry = Arc::new(InFlightRegistry::new());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    registry
                        .try_acquire("Mint111", InFlightKind::Entry)
                        .map(std::mem::forget)
                        .is_some()
                })
            })
            .collect();

        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                granted += 1;
            }
        }
        assert_eq!(granted, 1);
    }
}

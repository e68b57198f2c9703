// src/core/serializer.rs
use crate::config::ConflictPolicy;
use crate::error::ReconcileError;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

/// Signal Serializer: at most one reconciliation in flight per symbol.
///
/// Holding the returned guard is the exclusion; dropping it lets the next
/// caller for the same symbol proceed. Different symbols never contend.
pub struct SignalSerializer {
    locks: DashMap<String, Arc<Mutex<()>>>,
    policy: ConflictPolicy,
}

impl SignalSerializer {
    pub fn new(policy: ConflictPolicy) -> Self {
        Self {
            locks: DashMap::new(),
            policy,
        }
    }

    pub async fn acquire(&self, symbol: &str) -> Result<OwnedMutexGuard<()>, ReconcileError> {
        // clone the Arc out so no map shard stays locked across the await
        let lock = self
            .locks
            .entry(symbol.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();

        match self.policy {
            ConflictPolicy::Wait => {
                let guard = match lock.clone().try_lock_owned() {
                    Ok(guard) => guard,
                    Err(_) => {
                        debug!(symbol, "reconciliation in flight, waiting");
                        lock.lock_owned().await
                    }
                };
                Ok(guard)
            }
            ConflictPolicy::Reject => lock.try_lock_owned().map_err(|_| {
                warn!(symbol, "reconciliation in flight, rejecting request");
                ReconcileError::Busy(symbol.to_string())
            }),
        }
    }
}

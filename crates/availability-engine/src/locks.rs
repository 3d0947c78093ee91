//! Per-user write serialization.
//!
//! Conflict detection and the writes that follow it run under the owner's
//! lock, so two requests for the same user cannot both pass the conflict check
//! before either has written. Different users never contend.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::model::UserId;

#[derive(Debug, Default)]
pub struct UserLocks {
    locks: Mutex<HashMap<UserId, Arc<Mutex<()>>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `user_id`'s blocks. Released on drop.
    ///
    /// Entries no guard or waiter refers to any more are pruned here, so the
    /// table only holds users with a request in flight.
    pub async fn lock(&self, user_id: UserId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(user_id).or_default())
        };
        lock.lock_owned().await
    }

    /// Number of users currently tracked.
    pub async fn tracked(&self) -> usize {
        self.locks.lock().await.len()
    }
}

//! Single-flight guard for sync runs
//!
//! Two layers: an in-process [`RunState`] that rejects overlapping calls on
//! the same orchestrator, and a store lock with an expiry that rejects runs
//! from other processes. A crashed holder stops blocking once the lock expires.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;
use serde::Serialize;
use tracing::debug;
use tracing::warn;

use crate::store::StateStore;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum RunState {
    Idle,
    Running { started_at: DateTime<Utc> },
}

impl RunState {
    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }
}

pub struct SingleFlight {
    store: Arc<dyn StateStore>,
    lock_key: String,
    lock_ttl: Duration,
    state: Mutex<RunState>,
}

impl SingleFlight {
    pub fn new(store: Arc<dyn StateStore>, lock_key: impl Into<String>, lock_ttl: Duration) -> Self {
        Self {
            store,
            lock_key: lock_key.into(),
            lock_ttl,
            state: Mutex::new(RunState::Idle),
        }
    }

    #[must_use]
    pub fn state(&self) -> RunState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: RunState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// `Ok(None)` when another run holds either layer
    pub async fn try_acquire(&self) -> Result<Option<SyncPermit<'_>>> {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.is_running() {
                debug!("Sync already running in this process");
                return Ok(None);
            }
            *state = RunState::Running {
                started_at: Utc::now(),
            };
        }

        let owner = uuid::Uuid::new_v4().to_string();
        match self
            .store
            .set_if_absent(&self.lock_key, &owner, self.lock_ttl)
            .await
        {
            Ok(true) => Ok(Some(SyncPermit {
                guard: self,
                owner,
            })),
            Ok(false) => {
                self.set_state(RunState::Idle);
                debug!("Sync lock {} held by another process", self.lock_key);
                Ok(None)
            }
            Err(e) => {
                self.set_state(RunState::Idle);
                Err(e)
            }
        }
    }
}

/// Proof of holding the guard; dropping it resets the in-process state
pub struct SyncPermit<'a> {
    guard: &'a SingleFlight,
    owner: String,
}

impl SyncPermit<'_> {
    /// Remove the store lock if it is still ours
    pub async fn release(self) -> Result<()> {
        let store = &self.guard.store;
        let key = &self.guard.lock_key;
        match store.get(key).await? {
            Some(holder) if holder == self.owner => store.delete(key).await,
            Some(_) => {
                warn!("Sync lock {} expired and was taken over; leaving it", key);
                Ok(())
            }
            None => {
                warn!("Sync lock {} expired before release", key);
                Ok(())
            }
        }
    }
}

impl Drop for SyncPermit<'_> {
    fn drop(&mut self) {
        self.guard.set_state(RunState::Idle);
    }
}

//! Per-user conversation state, serialized per user.
//!
//! Each user gets one slot guarded by an async mutex. Whoever holds the
//! slot's lock owns that user's conversation until the event is fully
//! handled. A slot back in `Idle` carries no information and is released
//! once nobody holds it, so the map only grows with users mid-dialog.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::intake::IntakeState;

pub type SessionSlot = Arc<Mutex<IntakeState>>;

/// In-memory map from user id to conversation state.
///
/// Lost on restart; every user then starts again from `Idle`.
#[derive(Debug, Default)]
pub struct SessionMap {
    slots: Mutex<HashMap<String, SessionSlot>>,
}

impl SessionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get (or create) the slot for `user_id`.
    pub async fn slot(&self, user_id: &str) -> SessionSlot {
        let mut slots = self.slots.lock().await;
        Arc::clone(slots.entry(user_id.to_string()).or_default())
    }

    /// Current state for `user_id`, waiting for any in-flight event.
    pub async fn current(&self, user_id: &str) -> IntakeState {
        let slot = self.slots.lock().await.get(user_id).cloned();
        match slot {
            Some(slot) => slot.lock().await.clone(),
            None => IntakeState::default(),
        }
    }

    /// Drop the slot for `user_id` if it is idle and no one else holds it.
    pub async fn release(&self, user_id: &str) {
        let mut slots = self.slots.lock().await;
        let Some(slot) = slots.get(user_id) else {
            return;
        };
        if Arc::strong_count(slot) > 1 {
            return;
        }
        let idle = slot
            .try_lock()
            .map(|state| *state == IntakeState::Idle)
            .unwrap_or(false);
        if idle {
            slots.remove(user_id);
        }
    }

    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.slots.lock().await.is_empty()
    }
}

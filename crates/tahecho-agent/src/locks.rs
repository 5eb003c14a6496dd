//! Per-conversation turn serialization
//!
//! Turns on the same conversation id queue behind one async mutex for the
//! whole load, mutate and save sequence. Distinct ids never contend.

use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Slot = Arc<AsyncMutex<()>>;

/// A cloneable registry of per-id locks.
///
/// All fields are `Arc`-wrapped, so cloning is cheap.
#[derive(Clone, Default)]
pub struct TurnLocks {
    slots: Arc<Mutex<HashMap<String, Slot>>>,
}

impl TurnLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to a conversation
    pub async fn acquire(&self, conversation_id: &str) -> TurnGuard {
        let slot = {
            let mut slots = self.slots.lock();
            Arc::clone(
                slots
                    .entry(conversation_id.to_string())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            )
        };
        let guard = Arc::clone(&slot).lock_owned().await;
        TurnGuard {
            locks: self.clone(),
            conversation_id: conversation_id.to_string(),
            slot,
            _guard: guard,
        }
    }

    /// Number of ids with a live lock entry
    pub fn active(&self) -> usize {
        self.slots.lock().len()
    }
}

/// Held for the duration of a turn; releasing it wakes the next queued turn
pub struct TurnGuard {
    locks: TurnLocks,
    conversation_id: String,
    slot: Slot,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        let mut slots = self.locks.slots.lock();
        // References: the map, `slot`, and the guard itself. Anything more is a
        // queued turn that still needs this entry.
        if Arc::strong_count(&self.slot) <= 3 {
            slots.remove(&self.conversation_id);
        }
    }
}

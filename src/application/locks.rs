//! Per-deck exclusive operations: a deck runs at most one build/generation step at a time.

use std::{future::Future, sync::Arc};

use dashmap::{DashMap, mapref::entry::Entry};
use deckhand_api_types::LockStateView;
use metrics::counter;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::domain::DeckId;

pub const BUILD_OPERATION: &str = "build-slidev";
pub const MAKE_OUTLINE_OPERATION: &str = "make-outline";
pub const MAKE_MARKDOWN_OPERATION: &str = "make-markdown";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeckLockState {
    pub operation: String,
    pub started_at: OffsetDateTime,
}

impl DeckLockState {
    pub fn to_view(&self) -> LockStateView {
        LockStateView {
            operation: self.operation.clone(),
            started_at: self.started_at,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("deck {deck_id} busy: running {}", current.operation)]
pub struct DeckBusy {
    pub deck_id: DeckId,
    pub current: DeckLockState,
}

#[derive(Debug, Default, Clone)]
pub struct DeckLocks {
    states: Arc<DashMap<DeckId, DeckLockState>>,
}

impl DeckLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the deck for `operation`, failing immediately when another operation holds it.
    pub fn try_acquire(&self, deck_id: DeckId, operation: &str) -> Result<DeckLockGuard, DeckBusy> {
        match self.states.entry(deck_id) {
            Entry::Vacant(vacant) => {
                vacant.insert(DeckLockState {
                    operation: operation.to_string(),
                    started_at: OffsetDateTime::now_utc(),
                });
                debug!(
                    target = "application::locks",
                    op = "try_acquire",
                    result = "acquired",
                    deck_id = %deck_id,
                    operation,
                    "Deck lock acquired"
                );
                Ok(DeckLockGuard {
                    deck_id,
                    states: Arc::clone(&self.states),
                })
            }
            Entry::Occupied(occupied) => {
                let current = occupied.get().clone();
                counter!("deckhand_deck_busy_total", "operation" => operation.to_string())
                    .increment(1);
                info!(
                    target = "application::locks",
                    op = "try_acquire",
                    result = "busy",
                    deck_id = %deck_id,
                    operation,
                    running = %current.operation,
                    "Deck busy"
                );
                Err(DeckBusy { deck_id, current })
            }
        }
    }

    /// Run `body` while holding the deck's lock. The lock is released on every exit
    /// path, including panics and cancellation of the returned future.
    pub async fn with_lock<T, E, F, Fut>(
        &self,
        deck_id: DeckId,
        operation: &str,
        body: F,
    ) -> Result<T, E>
    where
        E: From<DeckBusy>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let _guard = self.try_acquire(deck_id, operation)?;
        body().await
    }

    pub fn current(&self, deck_id: DeckId) -> Option<DeckLockState> {
        self.states.get(&deck_id).map(|state| state.value().clone())
    }
}

pub struct DeckLockGuard {
    deck_id: DeckId,
    states: Arc<DashMap<DeckId, DeckLockState>>,
}

impl Drop for DeckLockGuard {
    fn drop(&mut self) {
        self.states.remove(&self.deck_id);
    }
}

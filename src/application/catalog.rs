//! Boundary to the slide-record store owned by the surrounding application.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{DeckDescriptor, DeckId, ProcessingStatus};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("deck catalog I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("deck catalog is malformed: {message}")]
    Malformed { message: String },
    #[error("deck {deck_id} is not in the catalog")]
    UnknownDeck { deck_id: DeckId },
}

impl CatalogError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait DeckCatalog: Send + Sync {
    async fn find_deck(&self, deck_id: DeckId) -> Result<Option<DeckDescriptor>, CatalogError>;

    async fn record_cover(&self, deck_id: DeckId, cover_filename: &str) -> Result<(), CatalogError>;

    async fn record_status(
        &self,
        deck_id: DeckId,
        status: ProcessingStatus,
    ) -> Result<(), CatalogError>;
}

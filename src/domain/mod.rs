//! Domain layer types and invariants.

pub mod decks;
pub mod status;

pub use decks::{DeckDescriptor, DeckId, ENTRY_FILE_NAME};
pub use deckhand_api_types::ProcessingStatus;

use crate::domain::DeckId;

/// Public URL layout under which previews and built presentations are mounted.
///
/// The renderer is told its base path so that asset URLs it emits resolve through
/// the reverse proxy and the static presentation route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicPaths {
    api_prefix: String,
}

impl PublicPaths {
    pub fn new(api_prefix: &str) -> Self {
        Self {
            api_prefix: normalize_prefix(api_prefix),
        }
    }

    /// Prefix without a trailing slash; empty when mounted at the root.
    pub fn api_prefix(&self) -> &str {
        &self.api_prefix
    }

    pub fn preview_base(&self, deck_id: DeckId) -> String {
        format!("{}/preview/{deck_id}/", self.api_prefix)
    }

    pub fn presentation_base(&self, deck_id: DeckId) -> String {
        format!("{}/presentation/{deck_id}/", self.api_prefix)
    }
}

impl Default for PublicPaths {
    fn default() -> Self {
        Self::new("/api/slides")
    }
}

fn normalize_prefix(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

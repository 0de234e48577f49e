use super::ProcessingStatus;

/// Facts about a deck's on-disk artifacts that determine how far authoring has progressed.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArtifactPresence {
    pub has_outlines: bool,
    pub entry_file_exists: bool,
    pub cover_exists: bool,
}

/// Derive the processing status from the artifacts present.
///
/// Each stage requires the previous one; `fallback` is reported when not even outlines exist.
pub fn derive_status(presence: ArtifactPresence, fallback: ProcessingStatus) -> ProcessingStatus {
    if !presence.has_outlines {
        return fallback;
    }
    if !presence.entry_file_exists {
        return ProcessingStatus::OutlineSaved;
    }
    if !presence.cover_exists {
        return ProcessingStatus::MarkdownSaved;
    }
    ProcessingStatus::Completed
}

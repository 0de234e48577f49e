//! File-backed deck catalog: a TOML list of slide records kept next to the projects.

use std::{
    collections::BTreeMap,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::{
    application::catalog::{CatalogError, DeckCatalog},
    domain::{
        DeckDescriptor, DeckId, ProcessingStatus,
        decks::{resolve_entry_file, theme_from_frontmatter},
    },
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeckRecord {
    pub id: DeckId,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_filename: Option<String>,
    #[serde(default)]
    pub has_outlines: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ProcessingStatus>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    decks: Vec<DeckRecord>,
}

pub struct TomlDeckCatalog {
    path: PathBuf,
    projects_root: PathBuf,
    records: RwLock<BTreeMap<DeckId, DeckRecord>>,
}

impl TomlDeckCatalog {
    /// Load the catalog; a missing file is an empty catalog.
    pub async fn load(path: PathBuf, projects_root: PathBuf) -> Result<Self, CatalogError> {
        let records = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => parse_records(&raw)?,
            Err(err) if err.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(CatalogError::Io(err)),
        };
        info!(
            target = "infra::catalog",
            op = "load",
            path = %path.display(),
            decks = records.len(),
            "Deck catalog loaded"
        );
        Ok(Self {
            path,
            projects_root,
            records: RwLock::new(records),
        })
    }

    pub fn from_records(
        path: PathBuf,
        projects_root: PathBuf,
        records: impl IntoIterator<Item = DeckRecord>,
    ) -> Self {
        Self {
            path,
            projects_root,
            records: RwLock::new(records.into_iter().map(|record| (record.id, record)).collect()),
        }
    }

    pub async fn record(&self, deck_id: DeckId) -> Option<DeckRecord> {
        self.records.read().await.get(&deck_id).cloned()
    }

    async fn update(
        &self,
        deck_id: DeckId,
        apply: impl FnOnce(&mut DeckRecord),
    ) -> Result<(), CatalogError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&deck_id)
            .ok_or(CatalogError::UnknownDeck { deck_id })?;
        apply(record);

        let file = CatalogFile {
            decks: records.values().cloned().collect(),
        };
        let serialized =
            toml::to_string_pretty(&file).map_err(|err| CatalogError::malformed(err.to_string()))?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || persist(&path, serialized.as_bytes()))
            .await
            .map_err(|err| CatalogError::Io(std::io::Error::other(err)))??;
        debug!(
            target = "infra::catalog",
            op = "update",
            deck_id = %deck_id,
            "Deck catalog persisted"
        );
        Ok(())
    }

    async fn describe(&self, record: DeckRecord) -> DeckDescriptor {
        let entry_file = resolve_entry_file(&self.projects_root, record.home.as_deref());
        let theme = match record.theme.filter(|theme| !theme.trim().is_empty()) {
            Some(theme) => theme,
            None => match &entry_file {
                Some(entry) => tokio::fs::read_to_string(entry)
                    .await
                    .map(|source| theme_from_frontmatter(&source))
                    .unwrap_or_else(|_| theme_from_frontmatter("")),
                None => theme_from_frontmatter(""),
            },
        };

        DeckDescriptor {
            id: record.id,
            title: record.title,
            entry_file,
            theme,
            cover_filename: record.cover_filename,
            has_outlines: record.has_outlines,
            status: record.status.unwrap_or(ProcessingStatus::UserInputSaved),
        }
    }
}

#[async_trait]
impl DeckCatalog for TomlDeckCatalog {
    async fn find_deck(&self, deck_id: DeckId) -> Result<Option<DeckDescriptor>, CatalogError> {
        let record = self.record(deck_id).await;
        match record {
            Some(record) => Ok(Some(self.describe(record).await)),
            None => Ok(None),
        }
    }

    async fn record_cover(&self, deck_id: DeckId, cover_filename: &str) -> Result<(), CatalogError> {
        let cover_filename = cover_filename.to_string();
        self.update(deck_id, move |record| {
            record.cover_filename = Some(cover_filename)
        })
        .await
    }

    async fn record_status(
        &self,
        deck_id: DeckId,
        status: ProcessingStatus,
    ) -> Result<(), CatalogError> {
        self.update(deck_id, move |record| record.status = Some(status))
            .await
    }
}

fn parse_records(raw: &str) -> Result<BTreeMap<DeckId, DeckRecord>, CatalogError> {
    let file: CatalogFile =
        toml::from_str(raw).map_err(|err| CatalogError::malformed(err.to_string()))?;
    let mut records = BTreeMap::new();
    for record in file.decks {
        let id = record.id;
        if records.insert(id, record).is_some() {
            return Err(CatalogError::malformed(format!("duplicate deck id {id}")));
        }
    }
    Ok(records)
}

fn persist(path: &Path, bytes: &[u8]) -> Result<(), CatalogError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;
    let mut file = NamedTempFile::new_in(&dir)?;
    file.write_all(bytes)?;
    file.flush()?;
    file.persist(path).map_err(|err| CatalogError::Io(err.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    const SAMPLE: &str = r#"
[[decks]]
id = 1
title = "Quarterly review"
home = "quarterly"
has_outlines = true
status = "outline-saved"

[[decks]]
id = 2
title = "No project yet"
theme = "apple-basic"
"#;

    #[tokio::test]
    async fn describes_decks_from_records_and_frontmatter() {
        let dir = TempDir::new().expect("temp dir");
        let projects = dir.path().join("projects");
        fs::create_dir_all(projects.join("quarterly")).expect("project dir");
        fs::write(
            projects.join("quarterly/slides.md"),
            "---\ntheme: seriph\n---\n# Q3",
        )
        .expect("entry");
        let path = dir.path().join("decks.toml");
        fs::write(&path, SAMPLE).expect("catalog");

        let catalog = TomlDeckCatalog::load(path, projects.clone())
            .await
            .expect("load");

        let first = catalog
            .find_deck(DeckId::new(1))
            .await
            .expect("find")
            .expect("deck 1");
        assert_eq!(first.theme, "seriph");
        assert_eq!(first.entry_file, Some(projects.join("quarterly/slides.md")));
        assert_eq!(first.status, ProcessingStatus::OutlineSaved);

        let second = catalog
            .find_deck(DeckId::new(2))
            .await
            .expect("find")
            .expect("deck 2");
        assert_eq!(second.theme, "apple-basic");
        assert_eq!(second.entry_file, None);
        assert_eq!(second.status, ProcessingStatus::UserInputSaved);

        assert!(catalog.find_deck(DeckId::new(3)).await.expect("find").is_none());
    }

    #[tokio::test]
    async fn updates_are_persisted() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("decks.toml");
        fs::write(&path, SAMPLE).expect("catalog");
        let catalog = TomlDeckCatalog::load(path.clone(), dir.path().to_path_buf())
            .await
            .expect("load");

        catalog
            .record_cover(DeckId::new(1), "cover.png")
            .await
            .expect("cover");
        catalog
            .record_status(DeckId::new(1), ProcessingStatus::Completed)
            .await
            .expect("status");

        let reloaded = TomlDeckCatalog::load(path, dir.path().to_path_buf())
            .await
            .expect("reload");
        let record = reloaded.record(DeckId::new(1)).await.expect("record");
        assert_eq!(record.cover_filename.as_deref(), Some("cover.png"));
        assert_eq!(record.status, Some(ProcessingStatus::Completed));
    }

    #[tokio::test]
    async fn unknown_deck_updates_fail() {
        let dir = TempDir::new().expect("temp dir");
        let catalog =
            TomlDeckCatalog::from_records(
                dir.path().join("decks.toml"),
                dir.path().into(),
                Vec::<DeckRecord>::new(),
            );
        let err = catalog
            .record_status(DeckId::new(9), ProcessingStatus::Completed)
            .await
            .expect_err("unknown deck");
        assert!(matches!(err, CatalogError::UnknownDeck { .. }));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let err = parse_records("[[decks]]\nid = 1\n[[decks]]\nid = 1\n").expect_err("duplicate");
        assert!(err.to_string().contains("duplicate deck id 1"));
    }
}

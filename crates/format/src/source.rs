//! Chunk sources: where a mapping's chunk documents come from.
//!
//! Directory layout of a [`DirSource`]:
//! ```text
//! space.settings        - SpaceSettings (JSON)
//! 00000000o.chunk       - one ChunkDoc (JSON) per chunk identifier
//! hall0001i.chunk
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::doc::{ChunkDoc, SETTINGS_FORMAT_VERSION, SpaceSettings};

pub const SETTINGS_FILE: &str = "space.settings";
pub const CHUNK_EXTENSION: &str = "chunk";

/// Errors from reading or writing chunk documents.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("settings format mismatch: file has v{file_version}, expected v{expected_version}")]
    SchemaMismatch {
        file_version: u32,
        expected_version: u32,
    },
    #[error("no space.settings found in {0}")]
    MissingSettings(String),
    #[error("invalid chunk identifier {0:?}")]
    BadIdentifier(String),
    #[error("chunk source lock poisoned")]
    Poisoned,
}

/// Read access to one mapping's documents. Shared with the loader thread.
pub trait ChunkSource: Send + Sync + std::fmt::Debug {
    /// Human readable location, used as the mapping path.
    fn path(&self) -> &str;

    fn settings(&self) -> Result<SpaceSettings, FormatError>;

    /// `Ok(None)` when no document exists for the identifier.
    fn read_chunk(&self, identifier: &str) -> Result<Option<ChunkDoc>, FormatError>;

    fn has_chunk(&self, identifier: &str) -> bool;

    fn write_chunk(&self, identifier: &str, doc: &ChunkDoc) -> Result<(), FormatError>;

    /// All identifiers present, sorted.
    fn chunk_identifiers(&self) -> Result<Vec<String>, FormatError>;
}

fn check_identifier(identifier: &str) -> Result<(), FormatError> {
    let bad = identifier.is_empty()
        || identifier.contains("..")
        || identifier.starts_with('/')
        || identifier.contains('\\');
    if bad {
        return Err(FormatError::BadIdentifier(identifier.to_string()));
    }
    Ok(())
}

fn check_version(settings: &SpaceSettings) -> Result<(), FormatError> {
    if settings.format_version != SETTINGS_FORMAT_VERSION {
        return Err(FormatError::SchemaMismatch {
            file_version: settings.format_version,
            expected_version: SETTINGS_FORMAT_VERSION,
        });
    }
    Ok(())
}

/// A mapping stored as a directory of `.chunk` files.
#[derive(Debug)]
pub struct DirSource {
    root: PathBuf,
    label: String,
    settings: SpaceSettings,
}

impl DirSource {
    /// Open an existing mapping directory. Fails closed on a settings
    /// version this crate does not understand.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, FormatError> {
        let root = path.as_ref().to_path_buf();
        let settings_path = root.join(SETTINGS_FILE);
        if !settings_path.exists() {
            return Err(FormatError::MissingSettings(root.display().to_string()));
        }
        let settings: SpaceSettings =
            serde_json::from_reader(std::fs::File::open(&settings_path)?)?;
        check_version(&settings)?;
        Ok(Self {
            label: format!("{}/", root.display()),
            root,
            settings,
        })
    }

    /// Create (or overwrite the settings of) a mapping directory.
    pub fn create(path: impl AsRef<Path>, settings: &SpaceSettings) -> Result<Self, FormatError> {
        let root = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        serde_json::to_writer_pretty(
            std::fs::File::create(root.join(SETTINGS_FILE))?,
            settings,
        )?;
        Ok(Self {
            label: format!("{}/", root.display()),
            root,
            settings: settings.clone(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn chunk_path(&self, identifier: &str) -> PathBuf {
        self.root.join(format!("{identifier}.{CHUNK_EXTENSION}"))
    }
}

impl ChunkSource for DirSource {
    fn path(&self) -> &str {
        &self.label
    }

    fn settings(&self) -> Result<SpaceSettings, FormatError> {
        Ok(self.settings.clone())
    }

    fn read_chunk(&self, identifier: &str) -> Result<Option<ChunkDoc>, FormatError> {
        check_identifier(identifier)?;
        let path = self.chunk_path(identifier);
        if !path.exists() {
            return Ok(None);
        }
        let doc = serde_json::from_reader(std::io::BufReader::new(std::fs::File::open(&path)?))?;
        Ok(Some(doc))
    }

    fn has_chunk(&self, identifier: &str) -> bool {
        check_identifier(identifier).is_ok() && self.chunk_path(identifier).is_file()
    }

    fn write_chunk(&self, identifier: &str, doc: &ChunkDoc) -> Result<(), FormatError> {
        check_identifier(identifier)?;
        let path = self.chunk_path(identifier);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        serde_json::to_writer_pretty(std::fs::File::create(&path)?, doc)?;
        tracing::trace!(identifier, "wrote chunk");
        Ok(())
    }

    fn chunk_identifiers(&self) -> Result<Vec<String>, FormatError> {
        let mut out = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(CHUNK_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                out.push(stem.to_string());
            }
        }
        out.sort();
        Ok(out)
    }
}

/// A mapping held entirely in memory. Used by tests and tools.
#[derive(Debug)]
pub struct MemorySource {
    label: String,
    settings: SpaceSettings,
    chunks: RwLock<BTreeMap<String, ChunkDoc>>,
}

impl MemorySource {
    pub fn new(label: impl Into<String>, settings: SpaceSettings) -> Self {
        Self {
            label: label.into(),
            settings,
            chunks: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn insert(&self, identifier: impl Into<String>, doc: ChunkDoc) -> Result<(), FormatError> {
        self.chunks
            .write()
            .map_err(|_| FormatError::Poisoned)?
            .insert(identifier.into(), doc);
        Ok(())
    }

    pub fn remove(&self, identifier: &str) -> Result<Option<ChunkDoc>, FormatError> {
        Ok(self
            .chunks
            .write()
            .map_err(|_| FormatError::Poisoned)?
            .remove(identifier))
    }

    pub fn len(&self) -> usize {
        self.chunks.read().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ChunkSource for MemorySource {
    fn path(&self) -> &str {
        &self.label
    }

    fn settings(&self) -> Result<SpaceSettings, FormatError> {
        check_version(&self.settings)?;
        Ok(self.settings.clone())
    }

    fn read_chunk(&self, identifier: &str) -> Result<Option<ChunkDoc>, FormatError> {
        check_identifier(identifier)?;
        let chunks = self.chunks.read().map_err(|_| FormatError::Poisoned)?;
        Ok(chunks.get(identifier).cloned())
    }

    fn has_chunk(&self, identifier: &str) -> bool {
        self.chunks
            .read()
            .map(|c| c.contains_key(identifier))
            .unwrap_or(false)
    }

    fn write_chunk(&self, identifier: &str, doc: &ChunkDoc) -> Result<(), FormatError> {
        check_identifier(identifier)?;
        self.insert(identifier, doc.clone())
    }

    fn chunk_identifiers(&self) -> Result<Vec<String>, FormatError> {
        let chunks = self.chunks.read().map_err(|_| FormatError::Poisoned)?;
        Ok(chunks.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc::GridBounds;

    fn settings() -> SpaceSettings {
        SpaceSettings::new(GridBounds::new(-1, -1, 1, 1))
    }

    #[test]
    fn dir_source_create_then_open() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("space");
        DirSource::create(&path, &settings()).unwrap();
        let source = DirSource::open(&path).unwrap();
        assert_eq!(source.settings().unwrap().bounds, GridBounds::new(-1, -1, 1, 1));
        assert!(source.root().join(SETTINGS_FILE).is_file());
    }

    #[test]
    fn dir_source_reads_back_written_chunks() {
        let tmp = tempfile::tempdir().unwrap();
        let source = DirSource::create(tmp.path(), &settings()).unwrap();
        assert!(!source.has_chunk("00000000o"));
        assert!(source.read_chunk("00000000o").unwrap().is_none());

        let doc = ChunkDoc::default();
        source.write_chunk("00000000o", &doc).unwrap();
        source.write_chunk("hall0001i", &doc).unwrap();

        assert!(source.has_chunk("00000000o"));
        assert_eq!(source.read_chunk("00000000o").unwrap(), Some(doc));
        assert_eq!(
            source.chunk_identifiers().unwrap(),
            vec!["00000000o".to_string(), "hall0001i".to_string()]
        );
    }

    #[test]
    fn open_without_settings_fails() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(matches!(
            DirSource::open(tmp.path()),
            Err(FormatError::MissingSettings(_))
        ));
    }

    #[test]
    fn settings_version_mismatch_fail_closed() {
        let tmp = tempfile::tempdir().unwrap();
        let mut s = settings();
        s.format_version = 999;
        DirSource::create(tmp.path(), &s).unwrap();

        match DirSource::open(tmp.path()) {
            Err(FormatError::SchemaMismatch {
                file_version,
                expected_version,
            }) => {
                assert_eq!(file_version, 999);
                assert_eq!(expected_version, SETTINGS_FORMAT_VERSION);
            }
            Err(e) => panic!("expected SchemaMismatch, got: {e}"),
            Ok(_) => panic!("expected error, got Ok"),
        }
    }

    #[test]
    fn identifiers_cannot_escape_the_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let source = DirSource::create(tmp.path(), &settings()).unwrap();
        assert!(matches!(
            source.read_chunk("../outside"),
            Err(FormatError::BadIdentifier(_))
        ));
        assert!(!source.has_chunk(""));
    }

    #[test]
    fn memory_source_behaves_like_a_directory() {
        let source = MemorySource::new("mem/", settings());
        assert!(source.is_empty());
        source.insert("00000000o", ChunkDoc::default()).unwrap();
        assert!(source.has_chunk("00000000o"));
        assert_eq!(source.len(), 1);
        assert!(source.read_chunk("00010000o").unwrap().is_none());
        source.remove("00000000o").unwrap();
        assert!(!source.has_chunk("00000000o"));
    }
}

use crate::error::{Error, Result};
use crate::lemmatizer::{LemmatizerProcess, StemmingNormalizer};
use crate::tokenizer::{Normalizer, StopWords, TextNormalizer};
use serde::{Deserialize, Serialize};
use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const DEFAULT_BTREE_ORDER: usize = 5;
pub const DEFAULT_BLOCK_CAPACITY: usize = 4;

/// Which normalizer strategy indexes and queries go through.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NormalizerKind {
    #[default]
    Whitespace,
    Stemming {
        language: String,
    },
    Lemmatizer {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub btree_order: usize,
    pub block_capacity: usize,
    /// Replaces the built-in stopword list when set.
    pub stopwords: Option<Vec<String>>,
    pub normalizer: NormalizerKind,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            btree_order: DEFAULT_BTREE_ORDER,
            block_capacity: DEFAULT_BLOCK_CAPACITY,
            stopwords: None,
            normalizer: NormalizerKind::Whitespace,
        }
    }
}

impl EngineConfig {
    /// Reads `engine.json` from the data root, writing the defaults there on first use.
    pub fn load_or_default(paths: &DataPaths) -> Result<Self> {
        let path = paths.config();
        if path.exists() {
            let mut buf = String::new();
            File::open(&path)?.read_to_string(&mut buf)?;
            let config: EngineConfig = serde_json::from_str(&buf)?;
            config.validate()?;
            Ok(config)
        } else {
            let config = EngineConfig::default();
            config.save(paths)?;
            Ok(config)
        }
    }

    pub fn save(&self, paths: &DataPaths) -> Result<()> {
        create_dir_all(&paths.root)?;
        let mut f = File::create(paths.config())?;
        let json = serde_json::to_string_pretty(self)?;
        f.write_all(json.as_bytes())?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.btree_order < 3 {
            return Err(Error::InvalidArgument(format!("btree_order must be at least 3, got {}", self.btree_order)));
        }
        if self.block_capacity == 0 || self.block_capacity > u16::MAX as usize {
            return Err(Error::InvalidArgument(format!("block_capacity out of range: {}", self.block_capacity)));
        }
        Ok(())
    }

    pub fn stopwords(&self) -> Arc<StopWords> {
        match &self.stopwords {
            Some(words) => Arc::new(StopWords::new(words)),
            None => StopWords::portuguese(),
        }
    }

    pub fn text_normalizer(&self) -> TextNormalizer {
        TextNormalizer::new(self.stopwords())
    }

    /// Builds the configured normalizer strategy.
    pub fn normalizer(&self) -> Result<Box<dyn Normalizer>> {
        let base = self.text_normalizer();
        let normalizer: Box<dyn Normalizer> = match &self.normalizer {
            NormalizerKind::Whitespace => Box::new(base),
            NormalizerKind::Stemming { language } => Box::new(StemmingNormalizer::for_language(language, base)?),
            NormalizerKind::Lemmatizer { program, args } => {
                Box::new(LemmatizerProcess::new(program, args.clone(), base))
            }
        };
        Ok(normalizer)
    }
}

/// Summary written next to the data files after a bulk load.
#[derive(Debug, Serialize, Deserialize)]
pub struct CatalogMeta {
    pub documents: u32,
    pub created_at: String,
    pub version: u32,
}

/// File layout of a data directory: one subdirectory per entity, shared
/// cross-entity pair indexes under `index/`.
#[derive(Debug, Clone)]
pub struct DataPaths {
    pub root: PathBuf,
}

impl DataPaths {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }
    pub fn config(&self) -> PathBuf { self.root.join("engine.json") }
    pub fn meta(&self) -> PathBuf { self.root.join("meta.json") }
    pub fn entity_dir(&self, entity: &str) -> PathBuf { self.root.join(entity) }
    pub fn heap(&self, entity: &str) -> PathBuf { self.entity_dir(entity).join("records.db") }
    pub fn name_index(&self, entity: &str, field: &str) -> PathBuf {
        self.entity_dir(entity).join(format!("{field}.btree.db"))
    }
    pub fn pair_index(&self, name: &str) -> PathBuf { self.root.join("index").join(format!("{name}.btree.db")) }
    pub fn dictionary(&self, entity: &str) -> PathBuf { self.entity_dir(entity).join("dictionary.listinv.db") }
    pub fn blocks(&self, entity: &str) -> PathBuf { self.entity_dir(entity).join("blocks.listinv.db") }
}

pub fn save_meta(paths: &DataPaths, meta: &CatalogMeta) -> Result<()> {
    create_dir_all(&paths.root)?;
    let mut f = File::create(paths.meta())?;
    let json = serde_json::to_string_pretty(meta)?;
    f.write_all(json.as_bytes())?;
    Ok(())
}

pub fn load_meta(paths: &DataPaths) -> Result<CatalogMeta> {
    let mut f = File::open(paths.meta())?;
    let mut buf = String::new();
    f.read_to_string(&mut buf)?;
    let meta: CatalogMeta = serde_json::from_str(&buf)?;
    Ok(meta)
}

/// Opens (creating if needed, along with its parent directory) a data file
/// for reading and writing.
pub(crate) fn open_data_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)?;
    }
    let file = OpenOptions::new().read(true).write(true).create(true).truncate(false).open(path)?;
    Ok(file)
}

pub(crate) fn read_exact_at(mut file: &File, offset: u64, buf: &mut [u8]) -> Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(buf)?;
    Ok(())
}

pub(crate) fn write_all_at(mut file: &File, offset: u64, buf: &[u8]) -> Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(buf)?;
    Ok(())
}

/// Current end of file, where the next appended unit goes.
pub(crate) fn end_offset(mut file: &File) -> Result<u64> {
    Ok(file.seek(SeekFrom::End(0))?)
}

/// Checks a four byte file signature.
pub(crate) fn check_magic(found: &[u8], expected: &[u8; 4], path: &Path) -> Result<()> {
    if found != expected {
        return Err(Error::Corrupt(format!("{}: bad file signature", path.display())));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_round_trips_through_the_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DataPaths::new(dir.path());
        let first = EngineConfig::load_or_default(&paths).unwrap();
        assert_eq!(first, EngineConfig::default());
        assert!(paths.config().exists());

        let custom = EngineConfig {
            btree_order: 7,
            normalizer: NormalizerKind::Stemming { language: "portuguese".into() },
            ..EngineConfig::default()
        };
        custom.save(&paths).unwrap();
        assert_eq!(EngineConfig::load_or_default(&paths).unwrap(), custom);
    }

    #[test]
    fn rejects_tiny_order() {
        let config = EngineConfig { btree_order: 2, ..EngineConfig::default() };
        assert!(matches!(config.validate(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn partial_config_fills_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"normalizer": {"kind": "lemmatizer", "program": "lemmatize"}}"#).unwrap();
        assert_eq!(config.btree_order, DEFAULT_BTREE_ORDER);
        assert_eq!(
            config.normalizer,
            NormalizerKind::Lemmatizer { program: "lemmatize".into(), args: vec![] }
        );
    }
}

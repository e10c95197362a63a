//! Embedded flat-file database: a heap record store, B+Tree secondary
//! indexes and a TF-IDF ranked inverted index over normalized text.

pub mod btree;
pub mod collection;
pub mod error;
pub mod index;
pub mod lemmatizer;
pub mod persist;
pub mod search;
pub mod store;
pub mod tokenizer;

/// Identifier assigned by a [`store::RecordStore`]. Starts at 1; 0 is never issued.
pub type RecordId = u32;

pub use btree::{IndexKey, NameKey, OrderedIndex, PairKey};
pub use collection::{Collection, Exists, IndexMaintainer};
pub use error::{Error, Result};
pub use index::{InvertedIndex, Posting};
pub use persist::{DataPaths, EngineConfig, NormalizerKind};
pub use search::{SearchEngine, SearchHit};
pub use store::{Record, RecordStore};
pub use tokenizer::{Normalizer, StopWords, TextNormalizer};

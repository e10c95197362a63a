use crate::error::{Error, Result};
use crate::index::{InvertedIndex, Posting};
use crate::persist::{DataPaths, EngineConfig};
use crate::tokenizer::Normalizer;
use crate::RecordId;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SearchHit {
    pub id: RecordId,
    pub score: f32,
}

/// `log10(documents / document_frequency) + 1`.
pub fn idf(documents: u32, document_frequency: usize) -> f32 {
    let df = document_frequency.max(1) as f64;
    let n = (documents as f64).max(df);
    ((n / df).log10() + 1.0) as f32
}

/// Relative frequency of each distinct term, in order of first occurrence.
pub fn term_frequencies(terms: &[String]) -> Vec<(String, f32)> {
    let mut counts: HashMap<&str, u32> = HashMap::new();
    let mut order = Vec::new();
    for term in terms {
        let count = counts.entry(term.as_str()).or_insert(0);
        if *count == 0 {
            order.push(term.as_str());
        }
        *count += 1;
    }
    let total = terms.len() as f32;
    order.into_iter().map(|t| (t.to_string(), counts[t] as f32 / total)).collect()
}

fn distinct(terms: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    terms.into_iter().filter(|t| seen.insert(t.clone())).collect()
}

/// TF-IDF ranked text search over one inverted index.
pub struct SearchEngine {
    index: InvertedIndex,
    normalizer: Box<dyn Normalizer>,
}

impl SearchEngine {
    pub fn new(index: InvertedIndex, normalizer: Box<dyn Normalizer>) -> Self {
        Self { index, normalizer }
    }

    /// Opens the entity's dictionary/blocks pair with the configured normalizer.
    pub fn open(paths: &DataPaths, entity: &str, config: &EngineConfig) -> Result<Self> {
        let index = InvertedIndex::open(paths.dictionary(entity), paths.blocks(entity), config.block_capacity)?;
        Ok(Self::new(index, config.normalizer()?))
    }

    pub fn index_document(&mut self, id: RecordId, text: &str) -> Result<()> {
        let terms = self.normalizer.normalize(text)?;
        for (term, frequency) in term_frequencies(&terms) {
            self.index.create(&term, Posting::new(id, frequency))?;
        }
        tracing::debug!(id, terms = terms.len(), "indexed document");
        Ok(())
    }

    /// Deletes `id`'s postings for every term of `text`. Stops at the first
    /// missing posting; removals already made are kept.
    pub fn remove_document(&mut self, id: RecordId, text: &str) -> Result<()> {
        for term in distinct(self.normalizer.normalize(text)?) {
            if !self.index.delete(&term, id)? {
                return Err(Error::NotFound(format!("posting for document {id} under term {term:?}")));
            }
        }
        Ok(())
    }

    pub fn rename_document(&mut self, id: RecordId, old_text: &str, new_text: &str) -> Result<()> {
        self.remove_document(id, old_text)?;
        self.index_document(id, new_text)
    }

    /// Documents matching any query term, best first. Equal scores are
    /// ordered by identifier.
    pub fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        let terms = distinct(self.normalizer.normalize(query)?);
        let documents = self.index.count_distinct_documents();
        let mut scores: HashMap<RecordId, f32> = HashMap::new();

        for term in &terms {
            let postings = self.index.read(term)?;
            if postings.is_empty() {
                continue;
            }
            let weight = idf(documents, postings.len());
            for posting in postings {
                *scores.entry(posting.id).or_insert(0.0) += posting.frequency * weight;
            }
        }

        let mut hits: Vec<SearchHit> = scores.into_iter().map(|(id, score)| SearchHit { id, score }).collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.id.cmp(&b.id)));
        tracing::debug!(query, terms = ?terms, hits = hits.len(), "search");
        Ok(hits)
    }

    pub fn count_distinct_documents(&self) -> u32 {
        self.index.count_distinct_documents()
    }

    pub fn index(&self) -> &InvertedIndex {
        &self.index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idf_for_three_of_four() {
        assert!((idf(4, 3) - 1.1249).abs() < 1e-4);
        assert_eq!(idf(5, 5), 1.0);
    }

    #[test]
    fn frequencies_are_relative() {
        let terms: Vec<String> = ["bad", "breaking", "bad", "good"].iter().map(|s| s.to_string()).collect();
        let tf = term_frequencies(&terms);
        assert_eq!(
            tf,
            vec![("bad".to_string(), 0.5), ("breaking".to_string(), 0.25), ("good".to_string(), 0.25)]
        );
    }

    #[test]
    fn empty_terms_give_no_frequencies() {
        assert!(term_frequencies(&[]).is_empty());
    }
}

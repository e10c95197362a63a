use crate::error::Result;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;
use std::str::SplitWhitespace;
use std::sync::Arc;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Articles, prepositions and conjunctions dropped from indexed text.
pub const PORTUGUESE_STOPWORDS: &[&str] = &[
    "de", "a", "o", "e", "que", "do", "da", "em", "um", "para", "com", "não", "uma", "os", "no",
    "se", "na", "dos",
];

lazy_static! {
    // ASCII letters plus the Latin-1 and Latin Extended-A/B letter blocks (× and ÷ excluded).
    static ref NON_LETTER: Regex =
        Regex::new(r"[^a-zA-Z\x{00C0}-\x{00D6}\x{00D8}-\x{00F6}\x{00F8}-\x{024F}]").expect("valid regex");
    static ref DEFAULT_STOPWORDS: Arc<StopWords> = Arc::new(StopWords::new(PORTUGUESE_STOPWORDS));
}

/// Turns free text into the terms stored in (and looked up from) the inverted index.
///
/// Indexing and querying must go through the same implementation, otherwise
/// terms will not match.
pub trait Normalizer: Send {
    fn normalize(&self, text: &str) -> Result<Vec<String>>;
}

/// Strips every character that is not a Latin letter and lowercases the rest.
/// Accents survive.
pub fn letters(token: &str) -> String {
    NON_LETTER.replace_all(token, "").to_lowercase()
}

/// Folds a raw token to its index form: non-letters stripped, lowercased,
/// diacritics removed. May return an empty string.
pub fn fold(token: &str) -> String {
    let lowered = letters(token);
    let decomposed: String = lowered.nfd().filter(|c| !is_combining_mark(*c)).collect();
    NON_LETTER.replace_all(&decomposed, "").into_owned()
}

/// Immutable stopword set. Words are folded on construction so they compare
/// against folded tokens.
#[derive(Debug, Clone, Default)]
pub struct StopWords {
    words: HashSet<String>,
}

impl StopWords {
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let words = words
            .into_iter()
            .map(|w| fold(w.as_ref()))
            .filter(|w| !w.is_empty())
            .collect();
        Self { words }
    }

    /// The built-in Portuguese list, shared process-wide.
    pub fn portuguese() -> Arc<StopWords> {
        Arc::clone(&DEFAULT_STOPWORDS)
    }

    pub fn contains(&self, term: &str) -> bool {
        self.words.contains(term)
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

/// Whitespace tokenizer followed by folding and stopword removal.
#[derive(Debug, Clone)]
pub struct TextNormalizer {
    stopwords: Arc<StopWords>,
}

impl Default for TextNormalizer {
    fn default() -> Self {
        Self::new(StopWords::portuguese())
    }
}

impl TextNormalizer {
    pub fn new(stopwords: Arc<StopWords>) -> Self {
        Self { stopwords }
    }

    pub fn stopwords(&self) -> &Arc<StopWords> {
        &self.stopwords
    }

    /// Lazily yields the normalized terms of `text`, in order.
    pub fn terms<'a>(&'a self, text: &'a str) -> Terms<'a> {
        Terms { tokens: text.split_whitespace(), normalizer: self }
    }

    /// Applies folding and the stopword filter to a single token.
    pub fn term(&self, token: &str) -> Option<String> {
        let folded = fold(token);
        if folded.is_empty() || self.stopwords.contains(&folded) {
            None
        } else {
            Some(folded)
        }
    }
}

impl Normalizer for TextNormalizer {
    fn normalize(&self, text: &str) -> Result<Vec<String>> {
        Ok(self.terms(text).collect())
    }
}

pub struct Terms<'a> {
    tokens: SplitWhitespace<'a>,
    normalizer: &'a TextNormalizer,
}

impl Iterator for Terms<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.tokens.by_ref().find_map(|raw| self.normalizer.term(raw))
    }
}

//! Alternative normalizer strategies: an external lemmatizing process and an
//! in-process stemmer. Both reuse the folding and stopword filter of
//! [`TextNormalizer`] on every token they produce.

use crate::error::{Error, Result};
use crate::tokenizer::{letters, Normalizer, TextNormalizer};
use rust_stemmers::{Algorithm, Stemmer};
use std::io::{ErrorKind, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;

/// Runs an external program per call: the text goes to its stdin, one lemma
/// per line is read back from stdout. A nonzero exit status is a failure.
#[derive(Debug, Clone)]
pub struct LemmatizerProcess {
    program: PathBuf,
    args: Vec<String>,
    normalizer: TextNormalizer,
}

impl LemmatizerProcess {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, normalizer: TextNormalizer) -> Self {
        Self { program: program.into(), args, normalizer }
    }

    fn run(&self, text: &str) -> Result<String> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Lemmatizer("stdin not captured".into()))?;
        // Feed stdin from its own thread so a program that answers while it
        // reads cannot fill stdout and stall both sides.
        let input = text.to_owned();
        let writer = thread::spawn(move || match stdin.write_all(input.as_bytes()) {
            // A process that exits without draining stdin is judged by its status below.
            Err(e) if e.kind() == ErrorKind::BrokenPipe => Ok(()),
            other => other,
        });

        let output = child.wait_with_output()?;
        writer
            .join()
            .map_err(|_| Error::Lemmatizer("stdin writer thread panicked".into()))??;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::warn!(program = %self.program.display(), status = %output.status, "lemmatizer failed");
            return Err(Error::Lemmatizer(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Normalizer for LemmatizerProcess {
    fn normalize(&self, text: &str) -> Result<Vec<String>> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let lemmas = self.run(text)?;
        Ok(lemmas.lines().filter_map(|line| self.normalizer.term(line)).collect())
    }
}

/// Snowball stemming between tokenization and folding.
pub struct StemmingNormalizer {
    stemmer: Stemmer,
    normalizer: TextNormalizer,
}

impl StemmingNormalizer {
    pub fn new(algorithm: Algorithm, normalizer: TextNormalizer) -> Self {
        Self { stemmer: Stemmer::create(algorithm), normalizer }
    }

    pub fn for_language(language: &str, normalizer: TextNormalizer) -> Result<Self> {
        Ok(Self::new(algorithm(language)?, normalizer))
    }
}

impl Normalizer for StemmingNormalizer {
    fn normalize(&self, text: &str) -> Result<Vec<String>> {
        let terms = text
            .split_whitespace()
            .filter(|raw| self.normalizer.term(raw).is_some())
            .filter_map(|raw| {
                let word = letters(raw);
                self.normalizer.term(&self.stemmer.stem(&word))
            })
            .collect();
        Ok(terms)
    }
}

fn algorithm(language: &str) -> Result<Algorithm> {
    let algorithm = match language.to_ascii_lowercase().as_str() {
        "portuguese" | "pt" => Algorithm::Portuguese,
        "english" | "en" => Algorithm::English,
        "spanish" | "es" => Algorithm::Spanish,
        "french" | "fr" => Algorithm::French,
        "italian" | "it" => Algorithm::Italian,
        "german" | "de" => Algorithm::German,
        other => return Err(Error::InvalidArgument(format!("no stemmer for language {other:?}"))),
    };
    Ok(algorithm)
}

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use flatdb_core::collection::{shared, Collection, NameIndex, Shared, TextIndex};
use flatdb_core::persist::{save_meta, CatalogMeta};
use flatdb_core::{DataPaths, EngineConfig, NameKey, OrderedIndex, Record, RecordId, RecordStore, SearchEngine};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, EnvFilter};
use walkdir::WalkDir;

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

const ENTITY: &str = "documents";

#[derive(Debug, Deserialize)]
struct InputDoc {
    id: String,
    title: String,
    body: String,
    url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Document {
    id: RecordId,
    external_id: String,
    title: String,
    url: Option<String>,
    body: String,
}

impl Record for Document {
    fn id(&self) -> RecordId {
        self.id
    }
    fn set_id(&mut self, id: RecordId) {
        self.id = id;
    }
}

impl From<InputDoc> for Document {
    fn from(doc: InputDoc) -> Self {
        Self { id: 0, external_id: doc.id, title: doc.title, url: doc.url, body: doc.body }
    }
}

fn indexed_text(doc: &Document) -> String {
    format!("{} {}", doc.title, doc.body)
}

#[derive(Parser)]
#[command(name = "indexer")]
#[command(about = "Load, query and maintain a flat-file document catalog", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load documents from input JSON/JSONL files or a directory
    Build {
        /// Input path (file or directory)
        #[arg(long)]
        input: String,
        /// Data directory
        #[arg(long, env = "FLATDB_DATA")]
        data: String,
    },
    /// Rank documents against a free-text query
    Search {
        #[arg(long, env = "FLATDB_DATA")]
        data: String,
        query: String,
        /// Maximum number of results
        #[arg(short, default_value_t = 10)]
        k: usize,
    },
    /// List documents whose title starts with the given text
    Prefix {
        #[arg(long, env = "FLATDB_DATA")]
        data: String,
        name: String,
    },
    /// Print one document as JSON
    Show {
        #[arg(long, env = "FLATDB_DATA")]
        data: String,
        id: RecordId,
    },
    /// Remove a document and its index entries
    Delete {
        #[arg(long, env = "FLATDB_DATA")]
        data: String,
        id: RecordId,
    },
}

struct Catalog {
    documents: Collection<Document>,
    titles: Shared<OrderedIndex<NameKey>>,
    search: Shared<SearchEngine>,
}

fn open_catalog(data: &Path) -> Result<Catalog> {
    let paths = DataPaths::new(data);
    let config = EngineConfig::load_or_default(&paths).context("loading engine config")?;
    let titles = shared(OrderedIndex::open(paths.name_index(ENTITY, "title"), config.btree_order)?);
    let search = shared(SearchEngine::open(&paths, ENTITY, &config)?);
    let documents = Collection::new(RecordStore::open(paths.heap(ENTITY))?)
        .with(NameIndex::new(titles.clone(), |d: &Document| d.title.clone()))
        .with(TextIndex::new(search.clone(), indexed_text));
    Ok(Catalog { documents, titles, search })
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Build { input, data } => build(Path::new(&input), Path::new(&data)).map(|_| ()),
        Commands::Search { data, query, k } => {
            let catalog = open_catalog(Path::new(&data))?;
            for (doc, score) in search(&catalog, &query, k)? {
                println!("{score:.4}\t{}\t{}", doc.id, doc.title);
            }
            Ok(())
        }
        Commands::Prefix { data, name } => {
            let catalog = open_catalog(Path::new(&data))?;
            for doc in by_title_prefix(&catalog, &name)? {
                println!("{}\t{}", doc.id, doc.title);
            }
            Ok(())
        }
        Commands::Show { data, id } => {
            let catalog = open_catalog(Path::new(&data))?;
            let doc = catalog.documents.read(id)?;
            println!("{}", serde_json::to_string_pretty(&doc)?);
            Ok(())
        }
        Commands::Delete { data, id } => {
            let mut catalog = open_catalog(Path::new(&data))?;
            catalog.documents.delete(id)?;
            tracing::info!(id, "document deleted");
            Ok(())
        }
    }
}

/// Loads every document under `input` into the catalog at `data`. Returns
/// the number of documents created.
fn build(input: &Path, data: &Path) -> Result<usize> {
    let mut catalog = open_catalog(data)?;

    let mut files: Vec<PathBuf> = Vec::new();
    if input.is_dir() {
        for entry in WalkDir::new(input).sort_by_file_name().into_iter().filter_map(|e| e.ok()) {
            let p = entry.path();
            if p.is_file() && matches!(p.extension().and_then(|s| s.to_str()), Some("json" | "jsonl")) {
                files.push(p.to_path_buf());
            }
        }
    } else if input.is_file() {
        files.push(input.to_path_buf());
    } else {
        anyhow::bail!("input path {} does not exist", input.display());
    }

    let mut loaded = 0;
    for file in files {
        let docs = if file.extension().and_then(|s| s.to_str()) == Some("jsonl") {
            read_jsonl(&file)?
        } else {
            read_json(&file)?
        };
        for doc in docs {
            let mut record = Document::from(doc);
            catalog.documents.create(&mut record).with_context(|| format!("loading {}", record.external_id))?;
            loaded += 1;
        }
    }

    let documents = catalog.search.lock().count_distinct_documents();
    let meta = CatalogMeta {
        documents,
        created_at: time::OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_default(),
        version: 1,
    };
    save_meta(&DataPaths::new(data), &meta)?;
    tracing::info!(loaded, documents, data = %data.display(), "catalog build complete");
    Ok(loaded)
}

fn read_jsonl(file: &Path) -> Result<Vec<InputDoc>> {
    let reader = BufReader::new(File::open(file)?);
    let mut docs = Vec::new();
    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        docs.push(serde_json::from_str(&line).with_context(|| format!("{}:{}", file.display(), n + 1))?);
    }
    Ok(docs)
}

fn read_json(file: &Path) -> Result<Vec<InputDoc>> {
    let reader = BufReader::new(File::open(file)?);
    let json: serde_json::Value = serde_json::from_reader(reader)?;
    let docs: Vec<InputDoc> = match json {
        serde_json::Value::Array(arr) => arr.into_iter().map(serde_json::from_value).collect::<serde_json::Result<_>>()?,
        serde_json::Value::Object(_) => vec![serde_json::from_value(json)?],
        _ => {
            tracing::warn!(file = %file.display(), "skipping JSON that is neither an object nor an array");
            Vec::new()
        }
    };
    Ok(docs)
}

fn search(catalog: &Catalog, query: &str, k: usize) -> Result<Vec<(Document, f32)>> {
    let hits = catalog.search.lock().search(query)?;
    hits.into_iter()
        .take(k)
        .map(|hit| Ok((catalog.documents.read(hit.id)?, hit.score)))
        .collect()
}

fn by_title_prefix(catalog: &Catalog, prefix: &str) -> Result<Vec<Document>> {
    let keys = catalog.titles.lock().read(&NameKey::prefix(prefix)?)?;
    keys.iter().map(|key| Ok(catalog.documents.read(key.id)?)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_input(dir: &Path) {
        std::fs::write(
            dir.join("series.jsonl"),
            concat!(
                r#"{"id":"bb","title":"Breaking Bad","body":"Um professor de química vira traficante.","url":null}"#,
                "\n\n",
                r#"{"id":"bm","title":"Black Mirror","body":"Tecnologia e sociedade.","url":"https://example.org/bm"}"#,
                "\n",
            ),
        )
        .unwrap();
        std::fs::write(
            dir.join("more.json"),
            r#"[{"id":"bcs","title":"Better Call Saul","body":"Um advogado em Albuquerque.","url":null}]"#,
        )
        .unwrap();
    }

    #[test]
    fn build_then_query() {
        let input = tempdir().unwrap();
        let data = tempdir().unwrap();
        write_input(input.path());

        assert_eq!(build(input.path(), data.path()).unwrap(), 3);
        let catalog = open_catalog(data.path()).unwrap();

        let hits = search(&catalog, "quimica", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.external_id, "bb");

        let titles: Vec<String> = by_title_prefix(&catalog, "b").unwrap().into_iter().map(|d| d.title).collect();
        assert_eq!(titles, vec!["Better Call Saul", "Black Mirror", "Breaking Bad"]);
        assert!(DataPaths::new(data.path()).meta().exists());
    }

    #[test]
    fn deleted_documents_leave_the_indexes() {
        let input = tempdir().unwrap();
        let data = tempdir().unwrap();
        write_input(input.path());
        build(input.path(), data.path()).unwrap();

        let mut catalog = open_catalog(data.path()).unwrap();
        let bb = by_title_prefix(&catalog, "breaking").unwrap()[0].id;
        catalog.documents.delete(bb).unwrap();
        assert!(search(&catalog, "traficante", 10).unwrap().is_empty());
        assert!(by_title_prefix(&catalog, "breaking").unwrap().is_empty());
    }

    #[test]
    fn missing_input_is_an_error() {
        let data = tempdir().unwrap();
        assert!(build(&data.path().join("nope"), data.path()).is_err());
    }
}

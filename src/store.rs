// Tabular stores and the artifact checkpoint store. Repositories are traits
// constructed once at the process boundary and passed by reference into the
// pipeline stages; nothing reaches for a global handle. CSV schemas are
// explicit and typed: a column that fails to parse is a fatal error, since
// type drift between runs means the inputs are not what they claim to be.

use anyhow::{Context, Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::common::{read_pathbuf_to_mem, write_mem_to_pathbuf};

/*=================================================================
=                         RECORD SCHEMAS                          =
=================================================================*/

/// One scripture verse. Immutable once loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verse {
    pub doc_id: String,
    pub text: String,
    pub version: String,
    #[serde(default)]
    pub part: String,
}

/// A labeled quotation candidate: did this newspaper page really quote this
/// verse?
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabeledCandidate {
    pub verse_id: String,
    pub doc_id: String,
    #[serde(rename = "match")]
    pub matched: bool,
}

/// Measured features for a quotation candidate. Optional fields cover
/// failed measurements; empty and NA cells both read as missing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateMeasurements {
    pub verse_id: String,
    pub doc_id: String,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub tokens: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub tfidf: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub proportion: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub runs_pval: Option<f64>,
}

/// Newspaper word-count aggregates, consumed only by reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YearWordcount {
    pub year: u32,
    pub wordcount: u64,
    pub pages: u64,
    pub batches: u64,
}

fn de_opt_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") | Some("NA") => Ok(None),
        Some(value) => value
            .parse::<f64>()
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

/*=================================================================
=                          REPOSITORIES                           =
=================================================================*/

pub trait VerseStore: Sync {
    fn load_verses(&self) -> Result<Vec<Verse>, Error>;
}

pub trait LabelStore: Sync {
    fn load_labels(&self) -> Result<Vec<LabeledCandidate>, Error>;
    fn load_measurements(&self) -> Result<Vec<CandidateMeasurements>, Error>;
}

pub struct CsvVerseStore {
    path: PathBuf,
}

impl CsvVerseStore {
    pub fn new(path: PathBuf) -> Self {
        CsvVerseStore { path }
    }
}

impl VerseStore for CsvVerseStore {
    fn load_verses(&self) -> Result<Vec<Verse>, Error> {
        load_csv(&self.path)
    }
}

pub struct CsvLabelStore {
    labels_path: PathBuf,
    features_path: PathBuf,
}

impl CsvLabelStore {
    pub fn new(labels_path: PathBuf, features_path: PathBuf) -> Self {
        CsvLabelStore {
            labels_path,
            features_path,
        }
    }
}

impl LabelStore for CsvLabelStore {
    fn load_labels(&self) -> Result<Vec<LabeledCandidate>, Error> {
        load_csv(&self.labels_path)
    }

    fn load_measurements(&self) -> Result<Vec<CandidateMeasurements>, Error> {
        load_csv(&self.features_path)
    }
}

/// Typed CSV load; any row that fails the schema aborts the run.
pub fn load_csv<T: DeserializeOwned>(path: &PathBuf) -> Result<Vec<T>, Error> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open CSV {:?}", path))?;
    let mut rows = Vec::new();
    for (line, row) in reader.deserialize().enumerate() {
        let row: T = row.with_context(|| {
            format!(
                "Schema mismatch in {:?} at data row {} (wrong column types are fatal)",
                path,
                line + 1
            )
        })?;
        rows.push(row);
    }
    Ok(rows)
}

/// Typed CSV write with headers.
pub fn write_csv<T: Serialize>(path: &PathBuf, rows: &[T]) -> Result<(), Error> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::WriterBuilder::new()
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("Failed to create CSV {:?}", path))?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/*=================================================================
=                         ARTIFACT STORE                          =
=================================================================*/

/// Checkpoint store for intermediate pipeline artifacts. Persisted artifacts
/// are authoritative: a stage that finds its key present loads it instead of
/// recomputing, and only deleting the artifact forces recomputation.
pub trait ArtifactStore: Sync {
    fn has(&self, key: &str) -> bool;
    fn load_bytes(&self, key: &str) -> Result<Vec<u8>, Error>;
    fn save_bytes(&self, key: &str, bytes: &[u8]) -> Result<(), Error>;
}

/// Filesystem-backed store: each key is a file under the artifact directory.
pub struct FsArtifactStore {
    dir: PathBuf,
}

impl FsArtifactStore {
    pub fn new(dir: PathBuf) -> Self {
        FsArtifactStore { dir }
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }
}

impl ArtifactStore for FsArtifactStore {
    fn has(&self, key: &str) -> bool {
        self.key_path(key).exists()
    }

    fn load_bytes(&self, key: &str) -> Result<Vec<u8>, Error> {
        let mut reader = read_pathbuf_to_mem(&self.key_path(key))?;
        let mut bytes = Vec::new();
        std::io::Read::read_to_end(&mut reader, &mut bytes)?;
        Ok(bytes)
    }

    fn save_bytes(&self, key: &str, bytes: &[u8]) -> Result<(), Error> {
        write_mem_to_pathbuf(bytes, &self.key_path(key))
    }
}

/// In-memory store for tests.
pub struct MemArtifactStore {
    map: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemArtifactStore {
    pub fn new() -> Self {
        MemArtifactStore {
            map: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemArtifactStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ArtifactStore for MemArtifactStore {
    fn has(&self, key: &str) -> bool {
        self.map.lock().unwrap().contains_key(key)
    }

    fn load_bytes(&self, key: &str) -> Result<Vec<u8>, Error> {
        self.map
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("No artifact under key '{}'", key))
    }

    fn save_bytes(&self, key: &str, bytes: &[u8]) -> Result<(), Error> {
        self.map
            .lock()
            .unwrap()
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }
}

pub fn save_jsonl<T: Serialize>(
    store: &dyn ArtifactStore,
    key: &str,
    items: &[T],
) -> Result<(), Error> {
    let mut bytes = Vec::new();
    for item in items {
        bytes.extend(serde_json::to_vec(item)?);
        bytes.push(b'\n');
    }
    store.save_bytes(key, &bytes)
}

pub fn load_jsonl<T: DeserializeOwned>(
    store: &dyn ArtifactStore,
    key: &str,
) -> Result<Vec<T>, Error> {
    let bytes = store.load_bytes(key)?;
    let mut items = Vec::new();
    for (line_num, line) in bytes.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let item: T = serde_json::from_str(&line)
            .with_context(|| format!("Bad artifact line {} under key '{}'", line_num, key))?;
        items.push(item);
    }
    Ok(items)
}

pub fn save_json<T: Serialize>(
    store: &dyn ArtifactStore,
    key: &str,
    item: &T,
) -> Result<(), Error> {
    store.save_bytes(key, &serde_json::to_vec_pretty(item)?)
}

pub fn load_json<T: DeserializeOwned>(store: &dyn ArtifactStore, key: &str) -> Result<T, Error> {
    let bytes = store.load_bytes(key)?;
    serde_json::from_slice(&bytes).with_context(|| format!("Bad artifact under key '{}'", key))
}

/// Checkpointed stage: reuse the persisted artifact when present, otherwise
/// compute and persist. Returns the rows plus whether they came from cache.
pub fn stage_jsonl<T, F>(
    store: &dyn ArtifactStore,
    key: &str,
    compute: F,
) -> Result<(Vec<T>, bool), Error>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Result<Vec<T>, Error>,
{
    if store.has(key) {
        let items = load_jsonl(store, key)?;
        return Ok((items, true));
    }
    let items = compute()?;
    save_jsonl(store, key, &items)?;
    Ok((items, false))
}

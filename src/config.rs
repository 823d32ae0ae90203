// Run configuration, loaded from YAML. Every knob has a serde default so a
// minimal config only names its input and output paths.

use anyhow::{Context, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

use crate::common::read_pathbuf_to_mem;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Verse corpus (required by similarity, train, predict)
    pub verses_file: PathBuf,

    // Where pipeline artifacts are checkpointed
    pub artifact_dir: PathBuf,

    // Where human-facing tables and reports land
    pub output_dir: PathBuf,

    // Classification inputs
    #[serde(default)]
    pub labels_file: Option<PathBuf>,
    #[serde(default)]
    pub features_file: Option<PathBuf>,

    // Newspaper word-count aggregates, reporting only
    #[serde(default)]
    pub wordcounts_file: Option<PathBuf>,

    // Minhash parameters. num_hashes is always num_bands * band_size.
    #[serde(default = "default_num_bands")]
    pub num_bands: usize,
    #[serde(default = "default_band_size")]
    pub band_size: usize,
    #[serde(default)]
    pub hash_seed: usize,

    // Tokenizer parameters
    #[serde(default = "default_ngram_size")]
    pub ngram_size: usize,
    #[serde(default = "default_ngram_min")]
    pub ngram_min: usize,
    #[serde(default = "default_skip_distance")]
    pub skip_distance: usize,
    #[serde(default = "default_punctuation_chars")]
    pub punctuation_chars: String,
    #[serde(default)]
    pub stopwords: Option<Vec<String>>,
    #[serde(default = "default_strip_numerals")]
    pub strip_numerals: bool,

    // Similarity aggregation: edges scoring below this floor are noise
    #[serde(default = "default_similarity_floor")]
    pub similarity_floor: f64,

    // Groups whose verses verbatim-copy the base text; excluded from training
    #[serde(default)]
    pub derivative_groups: Vec<String>,

    // Train/test split
    #[serde(default = "default_train_fraction")]
    pub train_fraction: f64,
    #[serde(default = "default_split_seed")]
    pub split_seed: u64,

    // Logistic regression fitting
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default = "default_max_iters")]
    pub max_iters: usize,
    #[serde(default = "default_grad_tolerance")]
    pub grad_tolerance: f64,
    #[serde(default = "default_l2_grid")]
    pub l2_grid: Vec<f64>,

    // Model selection: cells within this AUC distance of the best compete on cost
    #[serde(default = "default_auc_tolerance")]
    pub auc_tolerance: f64,

    // Operating-point scan
    #[serde(default = "default_threshold_min")]
    pub threshold_min: f64,
    #[serde(default = "default_threshold_max")]
    pub threshold_max: f64,
    #[serde(default = "default_threshold_step")]
    pub threshold_step: f64,

    // Debug options
    #[serde(default)]
    pub debug: bool,
}

fn default_num_bands() -> usize {
    60 // with band_size 4, candidate probability crosses 50% near s = 0.36
}

fn default_band_size() -> usize {
    4
}

fn default_ngram_size() -> usize {
    3
}

fn default_ngram_min() -> usize {
    3
}

fn default_skip_distance() -> usize {
    1
}

fn default_punctuation_chars() -> String {
    "!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~".to_string()
}

fn default_strip_numerals() -> bool {
    true
}

fn default_similarity_floor() -> f64 {
    0.4
}

fn default_train_fraction() -> f64 {
    0.85
}

fn default_split_seed() -> u64 {
    17
}

fn default_learning_rate() -> f64 {
    0.1
}

fn default_max_iters() -> usize {
    5000
}

fn default_grad_tolerance() -> f64 {
    1e-6
}

fn default_l2_grid() -> Vec<f64> {
    vec![0.0, 0.001, 0.01, 0.1, 1.0]
}

fn default_auc_tolerance() -> f64 {
    0.005
}

fn default_threshold_min() -> f64 {
    0.5
}

fn default_threshold_max() -> f64 {
    1.0
}

fn default_threshold_step() -> f64 {
    0.01
}

// Function words carry no borrowing signal; they are removed before gram
// formation so gram boundaries never span a removed word.
pub const DEFAULT_STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "had", "has", "have",
    "he", "her", "him", "his", "i", "if", "in", "into", "is", "it", "its", "me", "my", "no", "not",
    "of", "on", "or", "our", "shall", "she", "so", "that", "the", "thee", "their", "them", "they",
    "this", "thou", "thy", "to", "unto", "upon", "was", "we", "were", "which", "who", "will",
    "with", "ye", "you", "your",
];

impl Config {
    pub fn num_hashes(&self) -> usize {
        self.num_bands * self.band_size
    }

    /// Stopword set for tokenization: configured list, or the built-in default.
    pub fn stopword_set(&self) -> HashSet<String> {
        match &self.stopwords {
            Some(words) => words.iter().map(|w| w.to_lowercase()).collect(),
            None => DEFAULT_STOPWORDS.iter().map(|w| w.to_string()).collect(),
        }
    }

    pub fn labels_file(&self) -> Result<&PathBuf, Error> {
        self.labels_file
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Config is missing labels_file (required for training)"))
    }

    pub fn features_file(&self) -> Result<&PathBuf, Error> {
        self.features_file.as_ref().ok_or_else(|| {
            anyhow::anyhow!("Config is missing features_file (required for training)")
        })
    }
}

pub fn read_config(config_path: &PathBuf) -> Result<Config, Error> {
    let contents = read_pathbuf_to_mem(config_path)?;
    let config: Config = serde_yaml::from_reader(contents)
        .with_context(|| format!("Failed to parse config {:?}", config_path))?;
    if config.band_size == 0 || config.num_bands == 0 {
        anyhow::bail!("num_bands and band_size must both be nonzero");
    }
    if config.ngram_min == 0 || config.ngram_min > config.ngram_size {
        anyhow::bail!(
            "ngram_min must be in 1..=ngram_size (got {} and {})",
            config.ngram_min,
            config.ngram_size
        );
    }
    if config.train_fraction <= 0.0 || config.train_fraction >= 1.0 {
        anyhow::bail!("train_fraction must be in (0, 1)");
    }
    Ok(config)
}

// The persisted model artifact: preprocessing transform, fitted
// coefficients, and the selected decision threshold travel as one bundle so
// inference never depends on the training run being reproducible in place.

use anyhow::{Context, Error, Result};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::PathBuf;

use crate::common::{read_pathbuf_to_mem, write_mem_to_pathbuf};
use crate::config::Config;
use crate::features::Label;
use crate::similarity::{load_verse_similarity, VERSE_SIMILARITY_KEY};
use crate::store::{write_csv, ArtifactStore, LabelStore};
use crate::train::{FeatureRow, LogisticRegression, ModelMetrics, Scaler};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub feature_set: String,
    pub feature_names: Vec<String>,
    pub scaler: Scaler,
    pub model: LogisticRegression,
    pub threshold: f64,
    pub l2: f64,
    pub split_seed: u64,
    pub train_metrics: ModelMetrics,
    pub test_metrics: ModelMetrics,
}

impl ModelArtifact {
    pub fn save(&self, path: &PathBuf) -> Result<(), Error> {
        write_mem_to_pathbuf(&serde_json::to_vec_pretty(self)?, path)
    }

    pub fn load(path: &PathBuf) -> Result<Self, Error> {
        let mut reader = read_pathbuf_to_mem(path)?;
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse model artifact {:?}", path))
    }

    /// Probability that this candidate is a genuine quotation.
    pub fn score(&self, row: &FeatureRow) -> Result<f64, Error> {
        let mut z = self.model.intercept;
        for (i, name) in self.feature_names.iter().enumerate() {
            let value = row.value(name)?;
            let scaled = (value - self.scaler.means[i]) / self.scaler.stds[i];
            z += self.model.weights[i] * scaled;
        }
        Ok(1.0 / (1.0 + (-z).exp()))
    }

    pub fn classify(&self, row: &FeatureRow) -> Result<(f64, Label), Error> {
        let probability = self.score(row)?;
        let label = if probability >= self.threshold {
            Label::Quotation
        } else {
            Label::Noise
        };
        Ok((probability, label))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub verse_id: String,
    pub doc_id: String,
    pub probability: f64,
    pub predicted: Label,
}

/// Score a file of new quotation candidates with a saved model artifact.
pub fn execute_predict(
    config: &Config,
    model_path: &PathBuf,
    label_store: &dyn LabelStore,
    artifacts: &dyn ArtifactStore,
) -> Result<(), Error> {
    println!("=== QUOTATION PREDICTION ===");
    let artifact = ModelArtifact::load(model_path)?;
    println!(
        "Model: {} ({} features), threshold {:.2}",
        artifact.feature_set,
        artifact.feature_names.len(),
        artifact.threshold
    );

    let measurements = label_store.load_measurements()?;
    let summaries = if artifacts.has(VERSE_SIMILARITY_KEY) {
        load_verse_similarity(artifacts)?
    } else {
        Vec::new()
    };
    let summary_of: std::collections::HashMap<&str, (f64, f64)> = summaries
        .iter()
        .map(|s| (s.verse_id.as_str(), (s.sim_total, s.sim_mean)))
        .collect();

    let mut predictions = Vec::new();
    let mut incomplete = 0usize;
    for m in &measurements {
        let (Some(tokens), Some(tfidf), Some(proportion), Some(runs_pval)) =
            (m.tokens, m.tfidf, m.proportion, m.runs_pval)
        else {
            incomplete += 1;
            continue;
        };
        let (sim_total, sim_mean) = summary_of
            .get(m.verse_id.as_str())
            .copied()
            .unwrap_or((0.0, 0.0));
        let row = FeatureRow {
            tokens,
            tfidf,
            proportion,
            runs_pval,
            sim_total,
            sim_mean,
        };
        let (probability, predicted) = artifact.classify(&row)?;
        predictions.push(Prediction {
            verse_id: m.verse_id.clone(),
            doc_id: m.doc_id.clone(),
            probability,
            predicted,
        });
    }
    if incomplete > 0 {
        println!("Dropped {} candidates with incomplete measurements", incomplete);
    }

    let quotations = predictions
        .iter()
        .filter(|p| p.predicted == Label::Quotation)
        .count();
    let output_path = config.output_dir.join("predictions.csv");
    write_csv(&output_path, &predictions)?;
    println!(
        "Scored {} candidates: {} quotations, {} noise",
        predictions.len(),
        quotations,
        predictions.len() - quotations
    );
    println!("Predictions written to {:?}", output_path);
    Ok(())
}

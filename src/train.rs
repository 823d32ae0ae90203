// Grid training for the quotation classifier. Preprocessing statistics come
// from the training partition only; the test partition is loaded from its
// persisted split and touched exactly once, by the final evaluation.

use anyhow::{Error, Result};
use ndarray::{Array1, Array2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::config::Config;
use crate::features::{join_training_records, stratified_split, Label, TrainingRecord};
use crate::model::ModelArtifact;
use crate::similarity::{load_verse_similarity, VERSE_SIMILARITY_KEY};
use crate::store::{save_json, save_jsonl, ArtifactStore, LabelStore, VerseStore};
use crate::threshold::{scan_thresholds, select_threshold};

pub const SPLIT_TRAIN_KEY: &str = "split_train.csv";
pub const SPLIT_TEST_KEY: &str = "split_test.csv";
pub const GRID_RESULTS_KEY: &str = "grid_results.jsonl";
pub const EVALUATION_KEY: &str = "evaluation.json";
pub const MODEL_FILENAME: &str = "model.json";

/*=================================================================
=                       FEATURE REGISTRY                          =
=================================================================*/

/// A named predictor subset. The registry maps subset ids to explicit
/// feature-name lists; the grid iterates it structurally, so adding a
/// variant is one line here and nothing anywhere else.
pub struct FeatureSet {
    pub id: &'static str,
    pub features: &'static [&'static str],
}

pub const FEATURE_SETS: &[FeatureSet] = &[
    FeatureSet {
        id: "core",
        features: &["tokens", "tfidf", "proportion"],
    },
    FeatureSet {
        id: "core_runs",
        features: &["tokens", "tfidf", "proportion", "runs_pval"],
    },
    FeatureSet {
        id: "core_sim",
        features: &["tokens", "tfidf", "proportion", "sim_total", "sim_mean"],
    },
    FeatureSet {
        id: "core_interactions",
        features: &[
            "tokens",
            "tfidf",
            "proportion",
            "tokens_x_proportion",
            "tfidf_x_proportion",
        ],
    },
    FeatureSet {
        id: "full",
        features: &[
            "tokens",
            "tfidf",
            "proportion",
            "runs_pval",
            "sim_total",
            "sim_mean",
        ],
    },
];

/// The numeric row a model scores. Interaction columns are derived here by
/// name, never stored.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FeatureRow {
    pub tokens: f64,
    pub tfidf: f64,
    pub proportion: f64,
    pub runs_pval: f64,
    pub sim_total: f64,
    pub sim_mean: f64,
}

impl FeatureRow {
    pub fn value(&self, name: &str) -> Result<f64, Error> {
        Ok(match name {
            "tokens" => self.tokens,
            "tfidf" => self.tfidf,
            "proportion" => self.proportion,
            "runs_pval" => self.runs_pval,
            "sim_total" => self.sim_total,
            "sim_mean" => self.sim_mean,
            "tokens_x_proportion" => self.tokens * self.proportion,
            "tfidf_x_proportion" => self.tfidf * self.proportion,
            _ => anyhow::bail!("Unknown feature name '{}'", name),
        })
    }
}

impl TrainingRecord {
    pub fn feature_row(&self) -> FeatureRow {
        FeatureRow {
            tokens: self.tokens,
            tfidf: self.tfidf,
            proportion: self.proportion,
            runs_pval: self.runs_pval,
            sim_total: self.sim_total,
            sim_mean: self.sim_mean,
        }
    }
}

pub fn design_matrix(records: &[TrainingRecord], features: &[&str]) -> Result<Array2<f64>, Error> {
    let mut x = Array2::zeros((records.len(), features.len()));
    for (i, record) in records.iter().enumerate() {
        let row = record.feature_row();
        for (j, name) in features.iter().enumerate() {
            x[[i, j]] = row.value(name)?;
        }
    }
    Ok(x)
}

pub fn label_vector(records: &[TrainingRecord]) -> Array1<f64> {
    records
        .iter()
        .map(|r| if r.label.is_quotation() { 1.0 } else { 0.0 })
        .collect()
}

/*=================================================================
=                      PREPROCESSING / MODEL                      =
=================================================================*/

/// Column centering and scaling, fit on training data only. A constant
/// column scales by 1 so it zeroes out instead of dividing by zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scaler {
    pub means: Vec<f64>,
    pub stds: Vec<f64>,
}

impl Scaler {
    pub fn fit(x: &Array2<f64>) -> Self {
        let n = x.nrows().max(1) as f64;
        let mut means = Vec::with_capacity(x.ncols());
        let mut stds = Vec::with_capacity(x.ncols());
        for col in x.columns() {
            let mean = col.sum() / n;
            let var = col.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            let std = var.sqrt();
            means.push(mean);
            stds.push(if std > 0.0 { std } else { 1.0 });
        }
        Scaler { means, stds }
    }

    pub fn transform(&self, x: &Array2<f64>) -> Array2<f64> {
        let mut out = x.clone();
        for (j, mut col) in out.columns_mut().into_iter().enumerate() {
            col.mapv_inplace(|v| (v - self.means[j]) / self.stds[j]);
        }
        out
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticRegression {
    pub weights: Vec<f64>,
    pub intercept: f64,
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Batch gradient descent with L2 penalty. Deterministic: zero init, fixed
/// iteration cap, no randomness. Returns Err on divergence so a bad grid
/// cell is recorded as failed instead of aborting the whole search.
pub fn fit_logistic(
    x: &Array2<f64>,
    y: &Array1<f64>,
    l2: f64,
    learning_rate: f64,
    max_iters: usize,
    grad_tolerance: f64,
) -> Result<LogisticRegression, Error> {
    if x.iter().any(|v| !v.is_finite()) {
        anyhow::bail!("Non-finite value in design matrix");
    }
    let n = x.nrows() as f64;
    if n == 0.0 {
        anyhow::bail!("Empty training matrix");
    }

    let mut weights: Array1<f64> = Array1::zeros(x.ncols());
    let mut intercept = 0.0f64;
    for _iter in 0..max_iters {
        let z = x.dot(&weights) + intercept;
        let probs = z.mapv(sigmoid);
        let err = &probs - y;
        let grad_w = x.t().dot(&err) / n + &weights * l2;
        let grad_b = err.sum() / n;

        if grad_w.iter().any(|v| !v.is_finite()) || !grad_b.is_finite() {
            anyhow::bail!("Gradient diverged (non-finite)");
        }

        weights = weights - &grad_w * learning_rate;
        intercept -= learning_rate * grad_b;

        let grad_norm = grad_w
            .iter()
            .fold(grad_b.abs(), |acc, v| acc.max(v.abs()));
        if grad_norm < grad_tolerance {
            break;
        }
    }
    if weights.iter().any(|v| !v.is_finite()) || !intercept.is_finite() {
        anyhow::bail!("Fit diverged (non-finite coefficients)");
    }
    Ok(LogisticRegression {
        weights: weights.to_vec(),
        intercept,
    })
}

pub fn predict_proba(model: &LogisticRegression, x: &Array2<f64>) -> Array1<f64> {
    let weights = Array1::from_vec(model.weights.clone());
    (x.dot(&weights) + model.intercept).mapv(sigmoid)
}

/*=================================================================
=                            METRICS                              =
=================================================================*/

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModelMetrics {
    pub accuracy: f64,
    pub f1: f64,
    pub youden_j: f64,
    pub roc_auc: f64,
}

/// Confusion-matrix metrics at a decision threshold plus rank-based AUC.
/// Returns None when either class is absent (AUC undefined).
pub fn classification_metrics(
    probs: &[f64],
    labels: &[Label],
    threshold: f64,
) -> Option<ModelMetrics> {
    let auc = roc_auc(probs, labels)?;

    let mut tp = 0usize;
    let mut tn = 0usize;
    let mut fp = 0usize;
    let mut fn_ = 0usize;
    for (prob, label) in probs.iter().zip(labels.iter()) {
        match (*prob >= threshold, label.is_quotation()) {
            (true, true) => tp += 1,
            (true, false) => fp += 1,
            (false, true) => fn_ += 1,
            (false, false) => tn += 1,
        }
    }
    let total = (tp + tn + fp + fn_) as f64;
    let accuracy = (tp + tn) as f64 / total;
    let precision = if tp + fp > 0 {
        tp as f64 / (tp + fp) as f64
    } else {
        0.0
    };
    let recall = if tp + fn_ > 0 {
        tp as f64 / (tp + fn_) as f64
    } else {
        0.0
    };
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };
    let specificity = if tn + fp > 0 {
        tn as f64 / (tn + fp) as f64
    } else {
        0.0
    };
    Some(ModelMetrics {
        accuracy,
        f1,
        youden_j: recall + specificity - 1.0,
        roc_auc: auc,
    })
}

/// Rank-statistic ROC-AUC with midrank tie handling. None if only one class
/// is present.
pub fn roc_auc(probs: &[f64], labels: &[Label]) -> Option<f64> {
    let positives = labels.iter().filter(|l| l.is_quotation()).count();
    let negatives = labels.len() - positives;
    if positives == 0 || negatives == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..probs.len()).collect();
    order.sort_by(|&i, &j| probs[i].partial_cmp(&probs[j]).unwrap_or(std::cmp::Ordering::Equal));

    let mut ranks = vec![0.0f64; probs.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && probs[order[j + 1]] == probs[order[i]] {
            j += 1;
        }
        // Midrank for the tie run [i, j]
        let rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = rank;
        }
        i = j + 1;
    }

    let positive_rank_sum: f64 = labels
        .iter()
        .zip(ranks.iter())
        .filter(|(label, _)| label.is_quotation())
        .map(|(_, rank)| rank)
        .sum();
    let p = positives as f64;
    let q = negatives as f64;
    Some((positive_rank_sum - p * (p + 1.0) / 2.0) / (p * q))
}

/*=================================================================
=                          GRID SEARCH                            =
=================================================================*/

/// One grid cell: a predictor subset crossed with one penalty value. A
/// failed fit leaves metrics empty and records the error; the cell is
/// excluded from ranking but kept in the persisted results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridCell {
    pub feature_set: String,
    pub n_features: usize,
    pub l2: f64,
    pub metrics: Option<ModelMetrics>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Selection policy: best training ROC-AUC wins, but any cell within
/// `tolerance` of the top competes on cost — fewer features beats a
/// marginal AUC edge. Remaining ties break by J, then F1.
pub fn select_best(cells: &[GridCell], tolerance: f64) -> Option<usize> {
    let best_auc = cells
        .iter()
        .filter_map(|c| c.metrics.map(|m| m.roc_auc))
        .fold(f64::NEG_INFINITY, f64::max);
    if best_auc.is_infinite() {
        return None;
    }

    cells
        .iter()
        .enumerate()
        .filter(|(_, cell)| {
            cell.metrics
                .map(|m| m.roc_auc >= best_auc - tolerance)
                .unwrap_or(false)
        })
        .min_by(|(_, a), (_, b)| {
            let ma = a.metrics.unwrap();
            let mb = b.metrics.unwrap();
            a.n_features
                .cmp(&b.n_features)
                .then(mb.youden_j.partial_cmp(&ma.youden_j).unwrap_or(std::cmp::Ordering::Equal))
                .then(mb.f1.partial_cmp(&ma.f1).unwrap_or(std::cmp::Ordering::Equal))
        })
        .map(|(idx, _)| idx)
}

struct FittedCell {
    cell: GridCell,
    fit: Option<(Scaler, LogisticRegression, Vec<String>)>,
}

fn fit_grid(train: &[TrainingRecord], config: &Config) -> Vec<FittedCell> {
    let y = label_vector(train);
    let grid: Vec<(&FeatureSet, f64)> = FEATURE_SETS
        .iter()
        .flat_map(|fs| config.l2_grid.iter().map(move |&l2| (fs, l2)))
        .collect();

    grid.par_iter()
        .map(|(feature_set, l2)| {
            let outcome = (|| -> Result<(Scaler, LogisticRegression, ModelMetrics), Error> {
                let x_raw = design_matrix(train, feature_set.features)?;
                let scaler = Scaler::fit(&x_raw);
                let x = scaler.transform(&x_raw);
                let model = fit_logistic(
                    &x,
                    &y,
                    *l2,
                    config.learning_rate,
                    config.max_iters,
                    config.grad_tolerance,
                )?;
                let probs = predict_proba(&model, &x);
                let labels: Vec<Label> = train.iter().map(|r| r.label).collect();
                let metrics = classification_metrics(probs.as_slice().unwrap(), &labels, 0.5)
                    .ok_or_else(|| anyhow::anyhow!("Single-class training partition"))?;
                Ok((scaler, model, metrics))
            })();

            match outcome {
                Ok((scaler, model, metrics)) => FittedCell {
                    cell: GridCell {
                        feature_set: feature_set.id.to_string(),
                        n_features: feature_set.features.len(),
                        l2: *l2,
                        metrics: Some(metrics),
                        error: None,
                    },
                    fit: Some((
                        scaler,
                        model,
                        feature_set.features.iter().map(|f| f.to_string()).collect(),
                    )),
                },
                Err(err) => FittedCell {
                    cell: GridCell {
                        feature_set: feature_set.id.to_string(),
                        n_features: feature_set.features.len(),
                        l2: *l2,
                        metrics: None,
                        error: Some(err.to_string()),
                    },
                    fit: None,
                },
            }
        })
        .collect()
}

/*=================================================================
=                        TRAIN PIPELINE                           =
=================================================================*/

#[derive(Debug, Serialize, Deserialize)]
pub struct Evaluation {
    pub threshold: f64,
    pub train: ModelMetrics,
    pub test: ModelMetrics,
    pub test_records: usize,
}

fn records_to_csv_bytes(records: &[TrainingRecord]) -> Result<Vec<u8>, Error> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(true)
        .from_writer(Vec::new());
    for record in records {
        writer.serialize(record)?;
    }
    writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("Failed to flush split CSV: {}", e))
}

fn records_from_csv_bytes(bytes: &[u8]) -> Result<Vec<TrainingRecord>, Error> {
    let mut reader = csv::Reader::from_reader(bytes);
    let mut records = Vec::new();
    for (line, row) in reader.deserialize().enumerate() {
        let row: TrainingRecord = row.map_err(|e| {
            anyhow::anyhow!("Schema mismatch in persisted split at data row {}: {}", line + 1, e)
        })?;
        records.push(row);
    }
    Ok(records)
}

pub fn execute_train(
    config: &Config,
    verse_store: &dyn VerseStore,
    label_store: &dyn LabelStore,
    artifacts: &dyn ArtifactStore,
) -> Result<(), Error> {
    println!("=== QUOTATION CLASSIFIER TRAINING ===");
    let start_main = Instant::now();

    let verses = verse_store.load_verses()?;
    let labels = label_store.load_labels()?;
    let measurements = label_store.load_measurements()?;
    let summaries = if artifacts.has(VERSE_SIMILARITY_KEY) {
        load_verse_similarity(artifacts)?
    } else {
        println!("No verse similarity artifact; sim_total/sim_mean default to 0");
        Vec::new()
    };

    let (records, join_stats) = join_training_records(
        &labels,
        &measurements,
        &verses,
        &summaries,
        &config.derivative_groups,
    )?;
    join_stats.print();
    if records.is_empty() {
        anyhow::bail!("No joinable training records");
    }

    // The split is computed once and persisted; the stored test set is the
    // holdout for every later run.
    let (train, test) = if artifacts.has(SPLIT_TRAIN_KEY) && artifacts.has(SPLIT_TEST_KEY) {
        println!("Reusing persisted train/test split");
        (
            records_from_csv_bytes(&artifacts.load_bytes(SPLIT_TRAIN_KEY)?)?,
            records_from_csv_bytes(&artifacts.load_bytes(SPLIT_TEST_KEY)?)?,
        )
    } else {
        let (train, test) = stratified_split(records, config.train_fraction, config.split_seed);
        artifacts.save_bytes(SPLIT_TRAIN_KEY, &records_to_csv_bytes(&train)?)?;
        artifacts.save_bytes(SPLIT_TEST_KEY, &records_to_csv_bytes(&test)?)?;
        (train, test)
    };
    println!("Split: {} train / {} test", train.len(), test.len());

    // Grid search over predictor subsets x penalties
    let fitted = fit_grid(&train, config);
    let cells: Vec<GridCell> = fitted.iter().map(|f| f.cell.clone()).collect();
    save_jsonl(artifacts, GRID_RESULTS_KEY, &cells)?;

    let failed = cells.iter().filter(|c| c.metrics.is_none()).count();
    println!(
        "Grid: {} cells fitted, {} failed",
        cells.len() - failed,
        failed
    );
    for cell in &cells {
        if let Some(m) = cell.metrics {
            println!(
                "  {:<20} l2={:<8} auc={:.4} j={:.4} f1={:.4} acc={:.4}",
                cell.feature_set, cell.l2, m.roc_auc, m.youden_j, m.f1, m.accuracy
            );
        } else {
            println!(
                "  {:<20} l2={:<8} FAILED: {}",
                cell.feature_set,
                cell.l2,
                cell.error.as_deref().unwrap_or("unknown")
            );
        }
    }

    let best_idx = select_best(&cells, config.auc_tolerance)
        .ok_or_else(|| anyhow::anyhow!("Every grid cell failed to fit"))?;
    let best = &fitted[best_idx];
    let (scaler, model, feature_names) = best.fit.as_ref().expect("selected cell has a fit");
    println!(
        "Selected: {} (l2={}, {} features)",
        best.cell.feature_set, best.cell.l2, best.cell.n_features
    );

    // Operating point from the training partition's probabilities
    let features: Vec<&str> = feature_names.iter().map(|s| s.as_str()).collect();
    let x_train = scaler.transform(&design_matrix(&train, &features)?);
    let train_probs = predict_proba(model, &x_train);
    let train_labels: Vec<Label> = train.iter().map(|r| r.label).collect();
    let points = scan_thresholds(
        train_probs.as_slice().unwrap(),
        &train_labels,
        config.threshold_min,
        config.threshold_max,
        config.threshold_step,
    );
    let operating_point = select_threshold(&points)
        .ok_or_else(|| anyhow::anyhow!("Threshold scan produced no points"))?;
    println!(
        "Operating point: threshold {:.2} (sens {:.3}, spec {:.3}, J {:.3})",
        operating_point.threshold,
        operating_point.sensitivity,
        operating_point.specificity,
        operating_point.youden_j
    );

    // The single test-set touch
    let x_test = scaler.transform(&design_matrix(&test, &features)?);
    let test_probs = predict_proba(model, &x_test);
    let test_labels: Vec<Label> = test.iter().map(|r| r.label).collect();
    let test_metrics = classification_metrics(
        test_probs.as_slice().unwrap(),
        &test_labels,
        operating_point.threshold,
    )
    .ok_or_else(|| anyhow::anyhow!("Single-class test partition"))?;

    let train_metrics = best.cell.metrics.expect("selected cell has metrics");
    let evaluation = Evaluation {
        threshold: operating_point.threshold,
        train: train_metrics,
        test: test_metrics,
        test_records: test.len(),
    };
    save_json(artifacts, EVALUATION_KEY, &evaluation)?;

    let artifact = ModelArtifact {
        feature_set: best.cell.feature_set.clone(),
        feature_names: feature_names.clone(),
        scaler: scaler.clone(),
        model: model.clone(),
        threshold: operating_point.threshold,
        l2: best.cell.l2,
        split_seed: config.split_seed,
        train_metrics,
        test_metrics,
    };
    let model_path = config.output_dir.join(MODEL_FILENAME);
    artifact.save(&model_path)?;

    println!();
    println!("=== EVALUATION (held-out test set) ===");
    println!("Accuracy: {:.4}", test_metrics.accuracy);
    println!("F1:       {:.4}", test_metrics.f1);
    println!("Youden J: {:.4}", test_metrics.youden_j);
    println!("ROC-AUC:  {:.4}", test_metrics.roc_auc);
    println!("Model artifact written to {:?}", model_path);
    println!(
        "Training completed in {:?} seconds",
        start_main.elapsed().as_secs()
    );
    Ok(())
}

// Joins labeled quotation candidates to their measured features, verse
// groups, and verse-similarity aggregates, then produces the seeded
// stratified train/test split. Incomplete joins are expected and are
// counted, never silently dropped.

use anyhow::{Error, Result};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::aggregate::VerseSimilarity;
use crate::store::{CandidateMeasurements, LabeledCandidate, Verse};

/// The two-variant label used consistently from ingestion through
/// evaluation; no boolean/factor coercion anywhere downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Label {
    Quotation,
    Noise,
}

impl Label {
    pub fn from_match(matched: bool) -> Self {
        if matched {
            Label::Quotation
        } else {
            Label::Noise
        }
    }

    pub fn is_quotation(&self) -> bool {
        matches!(self, Label::Quotation)
    }
}

/// One fully joined training row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingRecord {
    pub verse_id: String,
    pub doc_id: String,
    pub label: Label,
    pub group: String,
    pub tokens: f64,
    pub tfidf: f64,
    pub proportion: f64,
    pub runs_pval: f64,
    pub sim_total: f64,
    pub sim_mean: f64,
}

#[derive(Debug, Default)]
pub struct JoinStats {
    pub label_rows: usize,
    pub missing_measurement_row: usize,
    pub incomplete_measurements: usize,
    pub unknown_verse: usize,
    pub derivative_excluded: usize,
    pub joined: usize,
}

impl JoinStats {
    pub fn print(&self) {
        println!("Join: {} labeled candidates", self.label_rows);
        println!("  no measurement row:       {}", self.missing_measurement_row);
        println!("  incomplete measurements:  {}", self.incomplete_measurements);
        println!("  verse not in corpus:      {}", self.unknown_verse);
        println!("  derivative-group excluded:{}", self.derivative_excluded);
        println!("  joined for training:      {}", self.joined);
    }
}

/// Join labels to measurements, verse groups, and similarity summaries.
/// Rows with a failed core measurement are dropped; rows whose verse group
/// is marked derivative are excluded from training because their
/// near-verbatim overlap with the base text is not representative of
/// newspaper quotation noise.
pub fn join_training_records(
    labels: &[LabeledCandidate],
    measurements: &[CandidateMeasurements],
    verses: &[Verse],
    summaries: &[VerseSimilarity],
    derivative_groups: &[String],
) -> Result<(Vec<TrainingRecord>, JoinStats), Error> {
    let measurement_of: HashMap<(&str, &str), &CandidateMeasurements> = measurements
        .iter()
        .map(|m| ((m.verse_id.as_str(), m.doc_id.as_str()), m))
        .collect();
    let group_of: HashMap<&str, &str> = verses
        .iter()
        .map(|v| (v.doc_id.as_str(), v.version.as_str()))
        .collect();
    let summary_of: HashMap<&str, &VerseSimilarity> = summaries
        .iter()
        .map(|s| (s.verse_id.as_str(), s))
        .collect();

    let mut stats = JoinStats {
        label_rows: labels.len(),
        ..Default::default()
    };
    let mut records = Vec::with_capacity(labels.len());

    for label_row in labels {
        let key = (label_row.verse_id.as_str(), label_row.doc_id.as_str());
        let Some(measurement) = measurement_of.get(&key) else {
            stats.missing_measurement_row += 1;
            continue;
        };
        let (Some(tokens), Some(tfidf), Some(proportion), Some(runs_pval)) = (
            measurement.tokens,
            measurement.tfidf,
            measurement.proportion,
            measurement.runs_pval,
        ) else {
            stats.incomplete_measurements += 1;
            continue;
        };
        let Some(group) = group_of.get(label_row.verse_id.as_str()) else {
            stats.unknown_verse += 1;
            continue;
        };
        if derivative_groups.iter().any(|g| g == group) {
            stats.derivative_excluded += 1;
            continue;
        }
        let (sim_total, sim_mean) = summary_of
            .get(label_row.verse_id.as_str())
            .map(|s| (s.sim_total, s.sim_mean))
            .unwrap_or((0.0, 0.0));

        records.push(TrainingRecord {
            verse_id: label_row.verse_id.clone(),
            doc_id: label_row.doc_id.clone(),
            label: Label::from_match(label_row.matched),
            group: group.to_string(),
            tokens,
            tfidf,
            proportion,
            runs_pval,
            sim_total,
            sim_mean,
        });
    }
    stats.joined = records.len();
    Ok((records, stats))
}

/// Class-stratified split with a fixed seed. Per-class training quotas use
/// largest-remainder apportionment against the global round(n * fraction)
/// target, so the overall proportion is hit exactly while each class stays
/// as close to the fraction as rounding allows.
pub fn stratified_split(
    records: Vec<TrainingRecord>,
    train_fraction: f64,
    seed: u64,
) -> (Vec<TrainingRecord>, Vec<TrainingRecord>) {
    let total = records.len();
    let target_train = (total as f64 * train_fraction).round() as usize;

    let mut by_class: Vec<(Label, Vec<TrainingRecord>)> = vec![
        (Label::Quotation, Vec::new()),
        (Label::Noise, Vec::new()),
    ];
    for record in records {
        let slot = by_class
            .iter_mut()
            .find(|(label, _)| *label == record.label)
            .expect("both labels present in by_class");
        slot.1.push(record);
    }

    // Base quotas plus leftover seats by descending fractional remainder
    let mut quotas: Vec<usize> = Vec::new();
    let mut remainders: Vec<(usize, f64)> = Vec::new();
    for (idx, (_, members)) in by_class.iter().enumerate() {
        let exact = members.len() as f64 * train_fraction;
        quotas.push(exact.floor() as usize);
        remainders.push((idx, exact - exact.floor()));
    }
    let mut leftover = target_train.saturating_sub(quotas.iter().sum());
    remainders.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    for (idx, _) in remainders {
        if leftover == 0 {
            break;
        }
        if quotas[idx] < by_class[idx].1.len() {
            quotas[idx] += 1;
            leftover -= 1;
        }
    }

    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let mut train = Vec::new();
    let mut test = Vec::new();
    for ((_, mut members), quota) in by_class.into_iter().zip(quotas) {
        members.shuffle(&mut rng);
        let rest = members.split_off(quota.min(members.len()));
        train.extend(members);
        test.extend(rest);
    }
    (train, test)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: usize, label: Label) -> TrainingRecord {
        TrainingRecord {
            verse_id: format!("V{}", id),
            doc_id: format!("D{}", id),
            label,
            group: "KJV".to_string(),
            tokens: 10.0,
            tfidf: 1.0,
            proportion: 0.5,
            runs_pval: 0.1,
            sim_total: 0.0,
            sim_mean: 0.0,
        }
    }

    fn corpus_70_30() -> Vec<TrainingRecord> {
        let mut records = Vec::new();
        for i in 0..70 {
            records.push(record(i, Label::Quotation));
        }
        for i in 70..100 {
            records.push(record(i, Label::Noise));
        }
        records
    }

    #[test]
    fn test_split_sizes_and_stratification() {
        let (train, test) = stratified_split(corpus_70_30(), 0.85, 17);
        assert_eq!(train.len(), 85);
        assert_eq!(test.len(), 15);

        let train_quotations = train.iter().filter(|r| r.label.is_quotation()).count();
        // 70 * 0.85 = 59.5; the larger remainder class picks up the extra seat
        assert_eq!(train_quotations, 60);
        assert_eq!(train.len() - train_quotations, 25);
    }

    #[test]
    fn test_split_is_deterministic_and_disjoint() {
        let (train_a, test_a) = stratified_split(corpus_70_30(), 0.85, 17);
        let (train_b, test_b) = stratified_split(corpus_70_30(), 0.85, 17);

        let ids = |records: &[TrainingRecord]| -> Vec<String> {
            records.iter().map(|r| r.verse_id.clone()).collect()
        };
        assert_eq!(ids(&train_a), ids(&train_b));
        assert_eq!(ids(&test_a), ids(&test_b));

        let mut all: Vec<String> = ids(&train_a);
        all.extend(ids(&test_a));
        let unique: std::collections::HashSet<&String> = all.iter().collect();
        assert_eq!(unique.len(), 100);
    }

    #[test]
    fn test_different_seed_changes_membership() {
        let (train_a, _) = stratified_split(corpus_70_30(), 0.85, 17);
        let (train_b, _) = stratified_split(corpus_70_30(), 0.85, 18);
        let ids_a: Vec<_> = train_a.iter().map(|r| r.verse_id.clone()).collect();
        let ids_b: Vec<_> = train_b.iter().map(|r| r.verse_id.clone()).collect();
        assert_ne!(ids_a, ids_b);
    }

    #[test]
    fn test_label_from_match() {
        assert_eq!(Label::from_match(true), Label::Quotation);
        assert_eq!(Label::from_match(false), Label::Noise);
    }
}

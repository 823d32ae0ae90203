// Decision-threshold selection: scan a fixed threshold range on predicted
// probabilities and pick the point maximizing Youden's J. The naive 0.5
// cutoff is almost never the best operating point for imbalanced quotation
// data.

use serde::{Deserialize, Serialize};

use crate::features::Label;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ThresholdPoint {
    pub threshold: f64,
    pub sensitivity: f64,
    pub specificity: f64,
    pub youden_j: f64,
}

/// Sensitivity, specificity, and J at every threshold in
/// `min..=max` stepping by `step`.
pub fn scan_thresholds(
    probs: &[f64],
    labels: &[Label],
    min: f64,
    max: f64,
    step: f64,
) -> Vec<ThresholdPoint> {
    assert_eq!(probs.len(), labels.len());
    let positives = labels.iter().filter(|l| l.is_quotation()).count();
    let negatives = labels.len() - positives;

    let mut points = Vec::new();
    let mut threshold = min;
    while threshold <= max + 1e-9 {
        let mut true_pos = 0usize;
        let mut true_neg = 0usize;
        for (prob, label) in probs.iter().zip(labels.iter()) {
            let predicted_quotation = *prob >= threshold;
            match (predicted_quotation, label.is_quotation()) {
                (true, true) => true_pos += 1,
                (false, false) => true_neg += 1,
                _ => {}
            }
        }
        let sensitivity = if positives > 0 {
            true_pos as f64 / positives as f64
        } else {
            0.0
        };
        let specificity = if negatives > 0 {
            true_neg as f64 / negatives as f64
        } else {
            0.0
        };
        points.push(ThresholdPoint {
            threshold,
            sensitivity,
            specificity,
            youden_j: sensitivity + specificity - 1.0,
        });
        threshold += step;
    }
    points
}

/// The J-maximizing point; the lowest threshold wins exact ties so reruns
/// are deterministic.
pub fn select_threshold(points: &[ThresholdPoint]) -> Option<ThresholdPoint> {
    points
        .iter()
        .copied()
        .fold(None, |best: Option<ThresholdPoint>, point| match best {
            Some(b) if point.youden_j > b.youden_j => Some(point),
            None => Some(point),
            _ => best,
        })
}

// LSH banding over MinHash signatures. Documents sharing any band bucket
// become similarity candidates; exact scoring later weeds out the false
// positives. Pair generation walks buckets, never the full n^2 grid.

use dashmap::DashMap;
use ndarray::Array1;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// An unordered candidate pair (document indices, a < b) and the number of
/// bands in which the two documents collided.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidatePair {
    pub a: String,
    pub b: String,
    pub band_count: u32,
}

// Band signature: Sha256 over the band's slice, truncated to 8 bytes.
pub fn band_signature(band: &[u64]) -> [u8; 8] {
    let mut hasher = Sha256::new();
    let band_bytes: &[u8] = bytemuck::cast_slice(band);
    hasher.update(band_bytes);
    let hash = hasher.finalize();
    let mut sig = [0u8; 8];
    sig.copy_from_slice(&hash[..8]);
    sig
}

/// The similarity at which the probability of becoming a candidate crosses
/// 50% for the chosen banding: (1/bands)^(1/band_size).
pub fn crossing_threshold(num_bands: usize, band_size: usize) -> f64 {
    (1.0 / num_bands as f64).powf(1.0 / band_size as f64)
}

/// S-curve: probability that two documents with Jaccard similarity `s`
/// collide in at least one band.
pub fn candidate_probability(s: f64, num_bands: usize, band_size: usize) -> f64 {
    1.0 - (1.0 - s.powi(band_size as i32)).powi(num_bands as i32)
}

/// All same-bucket document pairs across all bands, deduplicated, with band
/// collision counts. Unsigned documents (None) never pair. Output is sorted
/// by (a, b) so reruns produce identical artifacts.
pub fn candidate_pairs(
    signatures: &[Option<Array1<u64>>],
    num_bands: usize,
    band_size: usize,
) -> Vec<(u32, u32, u32)> {
    // Bucket key: (band index, band signature)
    let buckets: DashMap<(u32, [u8; 8]), Vec<u32>> = DashMap::new();
    signatures
        .par_iter()
        .enumerate()
        .for_each(|(doc_idx, signature)| {
            let Some(signature) = signature else {
                return;
            };
            let values = signature.as_slice().expect("signature is contiguous");
            debug_assert_eq!(values.len(), num_bands * band_size);
            for (band_idx, band) in values.chunks(band_size).enumerate() {
                buckets
                    .entry((band_idx as u32, band_signature(band)))
                    .or_default()
                    .push(doc_idx as u32);
            }
        });

    let collisions: DashMap<(u32, u32), u32> = DashMap::new();
    buckets.par_iter().for_each(|entry| {
        let members = entry.value();
        for i in 0..members.len() {
            for j in (i + 1)..members.len() {
                let (a, b) = if members[i] < members[j] {
                    (members[i], members[j])
                } else {
                    (members[j], members[i])
                };
                *collisions.entry((a, b)).or_insert(0) += 1;
            }
        }
    });

    let mut pairs: Vec<(u32, u32, u32)> = collisions
        .into_iter()
        .map(|((a, b), band_count)| (a, b, band_count))
        .collect();
    pairs.sort_unstable();
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::minhash::MinHasher;
    use std::collections::HashSet;

    fn sig(hasher: &MinHasher, grams: &[&str]) -> Option<Array1<u64>> {
        let grams: HashSet<String> = grams.iter().map(|s| s.to_string()).collect();
        hasher.signature(&hasher.token_set(&grams))
    }

    #[test]
    fn test_identical_documents_collide_in_every_band() {
        let hasher = MinHasher::new(5, 10, 3);
        let signatures = vec![
            sig(&hasher, &["a b", "b c", "c d"]),
            sig(&hasher, &["a b", "b c", "c d"]),
        ];
        let pairs = candidate_pairs(&signatures, 10, 3);
        assert_eq!(pairs, vec![(0, 1, 10)]);
    }

    #[test]
    fn test_disjoint_documents_do_not_pair() {
        let hasher = MinHasher::new(5, 10, 3);
        let signatures = vec![
            sig(&hasher, &["a b", "b c", "c d"]),
            sig(&hasher, &["w x", "x y", "y z"]),
        ];
        assert!(candidate_pairs(&signatures, 10, 3).is_empty());
    }

    #[test]
    fn test_unsigned_documents_never_pair() {
        let hasher = MinHasher::new(5, 10, 3);
        let signatures = vec![sig(&hasher, &["a b", "b c"]), None, None];
        assert!(candidate_pairs(&signatures, 10, 3).is_empty());
    }

    #[test]
    fn test_crossing_threshold_formula() {
        // 60 bands of 4 rows: (1/60)^(1/4)
        let t = crossing_threshold(60, 4);
        assert!((t - (1.0f64 / 60.0).powf(0.25)).abs() < 1e-12);
        assert!(t > 0.35 && t < 0.37);
    }

    #[test]
    fn test_candidate_probability_s_curve() {
        let below = candidate_probability(0.1, 60, 4);
        let at = candidate_probability(crossing_threshold(60, 4), 60, 4);
        let above = candidate_probability(0.8, 60, 4);
        assert!(below < at && at < above);
        // At the threshold similarity each band matches with probability
        // 1/bands, so the curve sits at 1-(1-1/b)^b, just past 50%
        assert!(at > 0.5 && at < 0.7);
        assert!(above > 0.99);
    }

    #[test]
    fn test_pair_output_is_sorted_and_deduplicated() {
        let hasher = MinHasher::new(9, 12, 2);
        let signatures = vec![
            sig(&hasher, &["a b", "b c", "c d", "d e"]),
            sig(&hasher, &["a b", "b c", "c d", "d e"]),
            sig(&hasher, &["a b", "b c", "c d", "e f"]),
        ];
        let pairs = candidate_pairs(&signatures, 12, 2);
        let keys: Vec<(u32, u32)> = pairs.iter().map(|&(a, b, _)| (a, b)).collect();
        let mut sorted = keys.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(keys, sorted);
        assert!(pairs.iter().all(|&(a, b, _)| a < b));
    }
}

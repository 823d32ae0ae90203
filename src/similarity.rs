// The similarity pipeline: tokenize the verse corpus, sign it, bucket the
// signatures, score same-group candidates exactly, and reduce to per-verse
// features. Every stage checkpoints through the artifact store, so a rerun
// picks up where the last run stopped.

use anyhow::{Error, Result};
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::time::Instant;

use crate::aggregate::{SimilarityGraph, SimilarityRecord, VerseSimilarity};
use crate::common::build_pbar;
use crate::config::Config;
use crate::lsh::{self, CandidatePair};
use crate::minhash::{jaccard, MinHasher, SkippedDocument};
use crate::store::{
    load_jsonl, save_jsonl, stage_jsonl, write_csv, ArtifactStore, Verse, VerseStore,
};
use crate::tokenize::skip_ngram_set;

pub const SIGNATURES_KEY: &str = "signatures.jsonl";
pub const SKIPPED_KEY: &str = "skipped.jsonl";
pub const CANDIDATES_KEY: &str = "candidates.jsonl";
pub const SIMILARITIES_KEY: &str = "similarities.jsonl";
pub const VERSE_SIMILARITY_KEY: &str = "verse_similarity.jsonl";

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SignatureRecord {
    pub doc_id: String,
    pub signature: Vec<u64>,
}

/// Token sets for the whole corpus, in verse order. Derived data: always
/// recomputed, never persisted.
fn compute_token_sets(verses: &[Verse], config: &Config, hasher: &MinHasher) -> Vec<HashSet<u128>> {
    let stopwords = config.stopword_set();
    let pbar = build_pbar(verses.len(), "Tokenizing");
    let token_sets: Vec<HashSet<u128>> = verses
        .par_iter()
        .map(|verse| {
            let grams = skip_ngram_set(
                &verse.text,
                &config.punctuation_chars,
                &stopwords,
                config.strip_numerals,
                config.ngram_size,
                config.ngram_min,
                config.skip_distance,
            );
            pbar.inc(1);
            hasher.token_set(&grams)
        })
        .collect();
    pbar.finish_and_clear();
    token_sets
}

pub fn execute_similarity(
    config: &Config,
    verse_store: &dyn VerseStore,
    artifacts: &dyn ArtifactStore,
) -> Result<(), Error> {
    println!("=== VERSE SIMILARITY PIPELINE ===");
    let start_main = Instant::now();

    let threshold = lsh::crossing_threshold(config.num_bands, config.band_size);
    println!(
        "Banding: {} bands x {} rows ({} hashes), candidate probability crosses 50% near s = {:.3}",
        config.num_bands,
        config.band_size,
        config.num_hashes(),
        threshold
    );

    let verses = verse_store.load_verses()?;
    println!("Loaded {} verses", verses.len());

    let mut seen_ids: HashSet<&str> = HashSet::with_capacity(verses.len());
    for verse in &verses {
        if !seen_ids.insert(&verse.doc_id) {
            anyhow::bail!("Duplicate doc_id in verse corpus: {}", verse.doc_id);
        }
    }

    let hasher = MinHasher::new(config.hash_seed as u64, config.num_bands, config.band_size);
    let token_sets = compute_token_sets(&verses, config, &hasher);

    // Stage 1: signatures, with unhashable documents routed to the skipped
    // list instead of crashing the run.
    let (signatures, cached) = stage_jsonl(artifacts, SIGNATURES_KEY, || {
        let pbar = build_pbar(verses.len(), "Signing");
        let records: Vec<Option<SignatureRecord>> = verses
            .par_iter()
            .zip(token_sets.par_iter())
            .map(|(verse, tokens)| {
                let record = hasher.signature(tokens).map(|signature| SignatureRecord {
                    doc_id: verse.doc_id.clone(),
                    signature: signature.to_vec(),
                });
                pbar.inc(1);
                record
            })
            .collect();
        pbar.finish_and_clear();

        let skipped: Vec<SkippedDocument> = verses
            .iter()
            .zip(records.iter())
            .filter(|(_, record)| record.is_none())
            .map(|(verse, _)| SkippedDocument {
                doc_id: verse.doc_id.clone(),
                reason: "too short to hash".to_string(),
            })
            .collect();
        save_jsonl(artifacts, SKIPPED_KEY, &skipped)?;
        if !skipped.is_empty() {
            println!("Skipped {} documents with empty token sets", skipped.len());
        }

        Ok(records.into_iter().flatten().collect())
    })?;
    if cached {
        println!("Reusing persisted signatures ({} documents)", signatures.len());
    } else {
        println!("Generated {} signatures", signatures.len());
    }

    // Stage 2: candidate pairs from band buckets.
    let index_of: HashMap<&str, usize> = verses
        .iter()
        .enumerate()
        .map(|(idx, verse)| (verse.doc_id.as_str(), idx))
        .collect();
    let (candidates, cached) = stage_jsonl(artifacts, CANDIDATES_KEY, || {
        let mut aligned: Vec<Option<ndarray::Array1<u64>>> = vec![None; verses.len()];
        for record in &signatures {
            let idx = *index_of
                .get(record.doc_id.as_str())
                .ok_or_else(|| anyhow::anyhow!("Signature for unknown doc_id {}", record.doc_id))?;
            aligned[idx] = Some(ndarray::Array1::from_vec(record.signature.clone()));
        }
        let pairs = lsh::candidate_pairs(&aligned, config.num_bands, config.band_size);
        Ok(pairs
            .into_iter()
            .map(|(a, b, band_count)| CandidatePair {
                a: verses[a as usize].doc_id.clone(),
                b: verses[b as usize].doc_id.clone(),
                band_count,
            })
            .collect())
    })?;
    if cached {
        println!("Reusing persisted candidate pairs ({})", candidates.len());
    } else {
        println!("Found {} candidate pairs", candidates.len());
    }

    // Stage 3: exact Jaccard, same-group pairs only. Cross-group collisions
    // are near-certain duplicates (parallel translations) and carry no
    // within-version borrowing signal, so they are dropped before the
    // expensive scoring step.
    let (similarities, cached) = stage_jsonl(artifacts, SIMILARITIES_KEY, || {
        let same_group: Vec<&CandidatePair> = candidates
            .iter()
            .filter(|pair| {
                let group_a = &verses[index_of[pair.a.as_str()]].version;
                let group_b = &verses[index_of[pair.b.as_str()]].version;
                group_a == group_b
            })
            .collect();
        let total = candidates.len();
        println!(
            "Same-group candidates: {} of {} ({:.1}% cross-group dropped before scoring)",
            same_group.len(),
            total,
            if total > 0 {
                100.0 * (1.0 - same_group.len() as f64 / total as f64)
            } else {
                0.0
            }
        );

        for pair in same_group.iter().take(5) {
            crate::debug_println!(
                config,
                "  candidate ({}, {}) collided in {} bands",
                pair.a,
                pair.b,
                pair.band_count
            );
        }

        let pbar = build_pbar(same_group.len(), "Scoring");
        let mut records: Vec<SimilarityRecord> = same_group
            .par_iter()
            .map(|pair| {
                let idx_a = index_of[pair.a.as_str()];
                let idx_b = index_of[pair.b.as_str()];
                let score = jaccard(&token_sets[idx_a], &token_sets[idx_b]);
                pbar.inc(1);
                SimilarityRecord {
                    a: pair.a.clone(),
                    b: pair.b.clone(),
                    score,
                    group: verses[idx_a].version.clone(),
                }
            })
            .collect();
        pbar.finish_and_clear();
        records.sort_by(|x, y| (&x.a, &x.b).cmp(&(&y.a, &y.b)));
        Ok(records)
    })?;
    if cached {
        println!("Reusing persisted similarity records ({})", similarities.len());
    } else {
        println!("Scored {} same-group pairs exactly", similarities.len());
    }

    // Stage 4: symmetric graph and per-verse aggregates, for every verse in
    // the corpus including isolated and skipped ones.
    let (summaries, cached) = stage_jsonl(artifacts, VERSE_SIMILARITY_KEY, || {
        let graph = SimilarityGraph::from_records(&similarities, config.similarity_floor)?;
        let verse_ids: Vec<String> = verses.iter().map(|v| v.doc_id.clone()).collect();
        Ok(graph.summaries(&verse_ids))
    })?;
    if cached {
        println!("Reusing persisted verse similarity table ({})", summaries.len());
    }

    // Write-back table for the verse store / classification pipeline.
    let table_path = config.output_dir.join("verse_similarity.csv");
    write_csv(&table_path, &summaries)?;

    let with_neighbors = summaries.iter().filter(|s| s.sim_mean > 0.0).count();
    println!();
    println!("=== SIMILARITY SUMMARY ===");
    println!("Verses:            {}", verses.len());
    println!("Candidate pairs:   {}", candidates.len());
    println!("Similarity records:{}", similarities.len());
    println!(
        "Verses with a qualifying neighbor (score >= {:.2}): {}",
        config.similarity_floor, with_neighbors
    );
    println!("Similarity table written to {:?}", table_path);
    println!(
        "Similarity pipeline completed in {:?} seconds",
        start_main.elapsed().as_secs()
    );
    Ok(())
}

/// Load the per-verse similarity table from a finished similarity run.
pub fn load_verse_similarity(artifacts: &dyn ArtifactStore) -> Result<Vec<VerseSimilarity>, Error> {
    if !artifacts.has(VERSE_SIMILARITY_KEY) {
        anyhow::bail!(
            "No verse similarity artifact found; run `versim similarity` first"
        );
    }
    load_jsonl(artifacts, VERSE_SIMILARITY_KEY)
}

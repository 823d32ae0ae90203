// Terminal reporting: newspaper word-count aggregates by year and a summary
// of the most recent similarity run. Reporting reads collaborator tables and
// pipeline artifacts; it never feeds anything back into the core.

use anyhow::{Error, Result};

use crate::aggregate::SimilarityRecord;
use crate::config::Config;
use crate::minhash::SkippedDocument;
use crate::similarity::{SIMILARITIES_KEY, SKIPPED_KEY};
use crate::store::{load_csv, load_jsonl, ArtifactStore, YearWordcount};

const BAR_WIDTH: usize = 50;

fn print_bar_rows(rows: &[(String, u64)]) {
    let max_value = rows.iter().map(|(_, v)| *v).max().unwrap_or(0);
    for (label, value) in rows {
        let bar_length = if max_value > 0 {
            ((*value as f64 / max_value as f64) * BAR_WIDTH as f64) as usize
        } else {
            0
        };
        let bar = "█".repeat(bar_length);
        let empty = " ".repeat(BAR_WIDTH - bar_length);
        println!("  {:<12} {:>14} │{}{}│", label, value, bar, empty);
    }
}

fn display_wordcount_report(rows: &[YearWordcount]) {
    println!("=== NEWSPAPER CORPUS BY YEAR ===");
    println!("(words of OCR text available per publication year)");
    println!();

    let mut sorted: Vec<&YearWordcount> = rows.iter().collect();
    sorted.sort_by_key(|r| r.year);
    let chart_rows: Vec<(String, u64)> = sorted
        .iter()
        .map(|r| (r.year.to_string(), r.wordcount))
        .collect();
    print_bar_rows(&chart_rows);

    let total_words: u64 = rows.iter().map(|r| r.wordcount).sum();
    let total_pages: u64 = rows.iter().map(|r| r.pages).sum();
    let total_batches: u64 = rows.iter().map(|r| r.batches).sum();
    println!();
    println!("Years covered:  {}", rows.len());
    println!("Total words:    {}", total_words);
    println!("Total pages:    {}", total_pages);
    println!("Total batches:  {}", total_batches);
    println!();
}

fn display_similarity_report(artifacts: &dyn ArtifactStore) -> Result<(), Error> {
    let records: Vec<SimilarityRecord> = load_jsonl(artifacts, SIMILARITIES_KEY)?;
    println!("=== SIMILARITY SCORE DISTRIBUTION ===");
    println!("(exact Jaccard over same-group candidate pairs)");
    println!();

    if records.is_empty() {
        println!("No similarity records in the artifact store.");
        return Ok(());
    }

    let buckets: Vec<(f64, f64, &str)> = vec![
        (0.0, 0.2, "0.0-0.2"),
        (0.2, 0.4, "0.2-0.4"),
        (0.4, 0.6, "0.4-0.6"),
        (0.6, 0.8, "0.6-0.8"),
        (0.8, 1.01, "0.8-1.0"),
    ];
    let chart_rows: Vec<(String, u64)> = buckets
        .iter()
        .map(|(lo, hi, label)| {
            let count = records
                .iter()
                .filter(|r| r.score >= *lo && r.score < *hi)
                .count() as u64;
            (label.to_string(), count)
        })
        .collect();
    print_bar_rows(&chart_rows);

    let mut scores: Vec<f64> = records.iter().map(|r| r.score).collect();
    scores.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let median = scores[scores.len() / 2];
    let mean = scores.iter().sum::<f64>() / scores.len() as f64;
    println!();
    println!("Scored pairs:   {}", records.len());
    println!("Median score:   {:.3}", median);
    println!("Mean score:     {:.3}", mean);

    if artifacts.has(SKIPPED_KEY) {
        let skipped: Vec<SkippedDocument> = load_jsonl(artifacts, SKIPPED_KEY)?;
        println!("Documents too short to hash: {}", skipped.len());
    }
    println!();
    Ok(())
}

pub fn execute_report(config: &Config, artifacts: &dyn ArtifactStore) -> Result<(), Error> {
    let mut printed_anything = false;

    if let Some(wordcounts_file) = &config.wordcounts_file {
        let rows: Vec<YearWordcount> = load_csv(wordcounts_file)?;
        display_wordcount_report(&rows);
        printed_anything = true;
    }

    if artifacts.has(SIMILARITIES_KEY) {
        display_similarity_report(artifacts)?;
        printed_anything = true;
    }

    if !printed_anything {
        println!("Nothing to report: no wordcounts_file configured and no similarity artifacts found.");
    }
    Ok(())
}

use anyhow::Result;
use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;
use tempfile::TempDir;

use versim::config::{read_config, Config};

pub struct TestEnvironment {
    _temp_dir: TempDir, // Kept for Drop cleanup
    pub data_dir: PathBuf,
    pub artifact_dir: PathBuf,
    pub output_dir: PathBuf,
    pub config_path: PathBuf,
}

impl TestEnvironment {
    pub fn new() -> Result<Self> {
        // Quiet mode: no progress bars in test output
        std::env::set_var("VERSIM_QUIET", "1");

        let temp_dir = TempDir::new()?;
        let data_dir = temp_dir.path().join("data");
        let artifact_dir = temp_dir.path().join("artifacts");
        let output_dir = temp_dir.path().join("out");
        let config_path = temp_dir.path().join("config.yaml");

        fs::create_dir_all(&data_dir)?;
        fs::create_dir_all(&artifact_dir)?;
        fs::create_dir_all(&output_dir)?;

        Ok(TestEnvironment {
            _temp_dir: temp_dir,
            data_dir,
            artifact_dir,
            output_dir,
            config_path,
        })
    }

    pub fn verses_path(&self) -> PathBuf {
        self.data_dir.join("verses.csv")
    }

    pub fn labels_path(&self) -> PathBuf {
        self.data_dir.join("labels.csv")
    }

    pub fn features_path(&self) -> PathBuf {
        self.data_dir.join("features.csv")
    }

    /// Write the config file with this environment's paths plus any extra
    /// YAML lines, then load it back through the normal config reader.
    pub fn write_config(&self, extra_yaml: &str) -> Result<Config> {
        let yaml = format!(
            "verses_file: {}\nlabels_file: {}\nfeatures_file: {}\nartifact_dir: {}\noutput_dir: {}\n{}",
            self.verses_path().display(),
            self.labels_path().display(),
            self.features_path().display(),
            self.artifact_dir.display(),
            self.output_dir.display(),
            extra_yaml,
        );
        let mut file = File::create(&self.config_path)?;
        file.write_all(yaml.as_bytes())?;
        Ok(read_config(&self.config_path)?)
    }
}

/// Write a verses CSV: (doc_id, text, version, part).
pub fn write_verses_csv(path: &PathBuf, rows: &[(&str, &str, &str, &str)]) -> Result<()> {
    let mut file = File::create(path)?;
    writeln!(file, "doc_id,text,version,part")?;
    for (doc_id, text, version, part) in rows {
        writeln!(file, "{},\"{}\",{},{}", doc_id, text, version, part)?;
    }
    Ok(())
}

/// Write a labels CSV: (verse_id, doc_id, match).
#[allow(dead_code)]
pub fn write_labels_csv(path: &PathBuf, rows: &[(&str, &str, bool)]) -> Result<()> {
    let mut file = File::create(path)?;
    writeln!(file, "verse_id,doc_id,match")?;
    for (verse_id, doc_id, matched) in rows {
        writeln!(file, "{},{},{}", verse_id, doc_id, matched)?;
    }
    Ok(())
}

/// Write a features CSV with raw cell strings so tests can plant NA and
/// empty cells: (verse_id, doc_id, tokens, tfidf, proportion, runs_pval).
#[allow(dead_code)]
pub fn write_features_csv(
    path: &PathBuf,
    rows: &[(&str, &str, &str, &str, &str, &str)],
) -> Result<()> {
    let mut file = File::create(path)?;
    writeln!(file, "verse_id,doc_id,tokens,tfidf,proportion,runs_pval")?;
    for (verse_id, doc_id, tokens, tfidf, proportion, runs_pval) in rows {
        writeln!(
            file,
            "{},{},{},{},{},{}",
            verse_id, doc_id, tokens, tfidf, proportion, runs_pval
        )?;
    }
    Ok(())
}

/// A synthetic labeled corpus: `quotations` separable positive candidates
/// and `noise` negatives, all against verses of `version`.
#[allow(dead_code)]
pub fn synthesize_labeled_corpus(
    env: &TestEnvironment,
    quotations: usize,
    noise: usize,
    version: &str,
) -> Result<()> {
    let total = quotations + noise;
    let mut verse_rows: Vec<(String, String, String, String)> = Vec::new();
    let mut label_rows: Vec<(String, String, bool)> = Vec::new();
    let mut feature_rows: Vec<(String, String, String, String, String, String)> = Vec::new();

    for i in 0..total {
        let verse_id = format!("V{:03}", i);
        let doc_id = format!("D{:03}", i);
        let is_quotation = i < quotations;
        // Quotations carry long, distinctive, well-matched text; noise is
        // short and poorly matched. Deterministic jitter keeps columns
        // non-constant without any RNG.
        let jitter = (i % 10) as f64;
        let (tokens, tfidf, proportion, runs_pval) = if is_quotation {
            (
                14.0 + jitter,
                6.0 + 0.3 * jitter,
                0.75 + 0.02 * jitter,
                0.01 + 0.004 * jitter,
            )
        } else {
            (
                4.0 + jitter * 0.5,
                1.0 + 0.1 * jitter,
                0.10 + 0.02 * jitter,
                0.40 + 0.05 * jitter,
            )
        };
        verse_rows.push((
            verse_id.clone(),
            format!("verse text number {} of the synthetic corpus", i),
            version.to_string(),
            "OT".to_string(),
        ));
        label_rows.push((verse_id.clone(), doc_id.clone(), is_quotation));
        feature_rows.push((
            verse_id,
            doc_id,
            format!("{}", tokens),
            format!("{:.3}", tfidf),
            format!("{:.3}", proportion),
            format!("{:.3}", runs_pval),
        ));
    }

    let verse_refs: Vec<(&str, &str, &str, &str)> = verse_rows
        .iter()
        .map(|(a, b, c, d)| (a.as_str(), b.as_str(), c.as_str(), d.as_str()))
        .collect();
    write_verses_csv(&env.verses_path(), &verse_refs)?;

    let label_refs: Vec<(&str, &str, bool)> = label_rows
        .iter()
        .map(|(a, b, m)| (a.as_str(), b.as_str(), *m))
        .collect();
    write_labels_csv(&env.labels_path(), &label_refs)?;

    let feature_refs: Vec<(&str, &str, &str, &str, &str, &str)> = feature_rows
        .iter()
        .map(|(a, b, c, d, e, f)| {
            (
                a.as_str(),
                b.as_str(),
                c.as_str(),
                d.as_str(),
                e.as_str(),
                f.as_str(),
            )
        })
        .collect();
    write_features_csv(&env.features_path(), &feature_refs)?;
    Ok(())
}

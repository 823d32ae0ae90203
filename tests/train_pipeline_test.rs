use anyhow::Result;

use versim::model::{execute_predict, ModelArtifact, Prediction};
use versim::store::{load_csv, ArtifactStore, CsvLabelStore, CsvVerseStore, FsArtifactStore};
use versim::train::{
    execute_train, Evaluation, MODEL_FILENAME, SPLIT_TEST_KEY, SPLIT_TRAIN_KEY,
};

mod common;

// Small grid and iteration cap keep the test quick; the synthetic corpus
// is cleanly separable so any sane cell converges.
const TRAIN_YAML: &str = "l2_grid: [0.0, 0.1]\nmax_iters: 2000\nlearning_rate: 0.3\n";

fn run_train(env: &common::TestEnvironment, extra_yaml: &str) -> Result<()> {
    let config = env.write_config(extra_yaml)?;
    let verse_store = CsvVerseStore::new(config.verses_file.clone());
    let label_store = CsvLabelStore::new(
        config.labels_file()?.clone(),
        config.features_file()?.clone(),
    );
    let artifacts = FsArtifactStore::new(config.artifact_dir.clone());
    execute_train(&config, &verse_store, &label_store, &artifacts)?;
    Ok(())
}

fn count_csv_rows(bytes: &[u8]) -> usize {
    // Data rows only; the first line is the header
    bytes
        .split(|&b| b == b'\n')
        .filter(|line| !line.is_empty())
        .count()
        .saturating_sub(1)
}

#[test]
fn test_end_to_end_training_on_stratified_corpus() -> Result<()> {
    let env = common::TestEnvironment::new()?;
    common::synthesize_labeled_corpus(&env, 70, 30, "KJV")?;
    run_train(&env, TRAIN_YAML)?;

    let artifacts = FsArtifactStore::new(env.artifact_dir.clone());

    // 100 records at 0.85 stratified by a 70/30 label mix: exactly 85/15
    let train_bytes = artifacts.load_bytes(SPLIT_TRAIN_KEY)?;
    let test_bytes = artifacts.load_bytes(SPLIT_TEST_KEY)?;
    assert_eq!(count_csv_rows(&train_bytes), 85);
    assert_eq!(count_csv_rows(&test_bytes), 15);

    // Training proportions stay within rounding of 70/30
    let train_text = String::from_utf8(train_bytes)?;
    let train_quotations = train_text.matches("Quotation").count();
    assert_eq!(train_quotations, 60);

    // The separable corpus should classify near-perfectly on the holdout
    let evaluation: Evaluation =
        serde_json::from_slice(&artifacts.load_bytes("evaluation.json")?)?;
    assert!(evaluation.test.roc_auc > 0.9);
    assert!(evaluation.test.accuracy > 0.8);
    assert!(evaluation.threshold >= 0.5 && evaluation.threshold <= 1.0);
    assert_eq!(evaluation.test_records, 15);

    // Model artifact is a self-contained bundle
    let model_path = env.output_dir.join(MODEL_FILENAME);
    let artifact = ModelArtifact::load(&model_path)?;
    assert_eq!(artifact.feature_names.len(), artifact.scaler.means.len());
    assert_eq!(artifact.feature_names.len(), artifact.model.weights.len());
    assert!((artifact.threshold - evaluation.threshold).abs() < 1e-12);
    Ok(())
}

#[test]
fn test_split_is_persisted_once_and_reused() -> Result<()> {
    let env = common::TestEnvironment::new()?;
    common::synthesize_labeled_corpus(&env, 40, 20, "KJV")?;
    run_train(&env, TRAIN_YAML)?;

    let artifacts = FsArtifactStore::new(env.artifact_dir.clone());
    let first_train = artifacts.load_bytes(SPLIT_TRAIN_KEY)?;
    let first_test = artifacts.load_bytes(SPLIT_TEST_KEY)?;

    // A second run must reuse the stored split verbatim
    run_train(&env, TRAIN_YAML)?;
    assert_eq!(artifacts.load_bytes(SPLIT_TRAIN_KEY)?, first_train);
    assert_eq!(artifacts.load_bytes(SPLIT_TEST_KEY)?, first_test);
    Ok(())
}

#[test]
fn test_same_seed_reproduces_the_same_split() -> Result<()> {
    let mut memberships = Vec::new();
    for _ in 0..2 {
        let env = common::TestEnvironment::new()?;
        common::synthesize_labeled_corpus(&env, 40, 20, "KJV")?;
        run_train(&env, TRAIN_YAML)?;
        let artifacts = FsArtifactStore::new(env.artifact_dir.clone());
        memberships.push(artifacts.load_bytes(SPLIT_TEST_KEY)?);
    }
    assert_eq!(memberships[0], memberships[1]);
    Ok(())
}

#[test]
fn test_derivative_groups_are_excluded_from_training() -> Result<()> {
    let env = common::TestEnvironment::new()?;
    common::synthesize_labeled_corpus(&env, 40, 20, "BookOfMormon")?;
    let result = {
        let config = env.write_config(&format!(
            "{}derivative_groups: [\"BookOfMormon\"]\n",
            TRAIN_YAML
        ));
        let config = config?;
        let verse_store = CsvVerseStore::new(config.verses_file.clone());
        let label_store = CsvLabelStore::new(
            config.labels_file()?.clone(),
            config.features_file()?.clone(),
        );
        let artifacts = FsArtifactStore::new(config.artifact_dir.clone());
        execute_train(&config, &verse_store, &label_store, &artifacts)
    };
    // Every record belongs to the derivative group, so nothing survives the
    // join and training cannot proceed
    assert!(result.is_err());
    Ok(())
}

#[test]
fn test_records_with_missing_core_feature_are_dropped() -> Result<()> {
    let env = common::TestEnvironment::new()?;

    // 20 clean records plus one with a failed proportion measurement (NA)
    // and one label with no feature row at all
    let mut verses: Vec<(String, String, String, String)> = Vec::new();
    let mut labels: Vec<(String, String, bool)> = Vec::new();
    let mut features: Vec<(String, String, String, String, String, String)> = Vec::new();
    for i in 0..20 {
        let verse_id = format!("V{:02}", i);
        let doc_id = format!("D{:02}", i);
        let is_quotation = i % 2 == 0;
        verses.push((
            verse_id.clone(),
            format!("verse text {}", i),
            "KJV".to_string(),
            "OT".to_string(),
        ));
        labels.push((verse_id.clone(), doc_id.clone(), is_quotation));
        let (tokens, tfidf, proportion, runs) = if is_quotation {
            ("15", "6.0", "0.9", "0.01")
        } else {
            ("4", "1.0", "0.1", "0.5")
        };
        features.push((
            verse_id,
            doc_id,
            tokens.to_string(),
            tfidf.to_string(),
            format!("{}", proportion.parse::<f64>().unwrap() + 0.001 * i as f64),
            runs.to_string(),
        ));
    }
    verses.push(("V97".into(), "na verse".into(), "KJV".into(), "OT".into()));
    verses.push(("V98".into(), "orphan verse".into(), "KJV".into(), "OT".into()));
    labels.push(("V97".into(), "D97".into(), true));
    labels.push(("V98".into(), "D98".into(), false));
    features.push((
        "V97".into(),
        "D97".into(),
        "12".into(),
        "5.0".into(),
        "NA".into(),
        "0.02".into(),
    ));

    let verse_refs: Vec<(&str, &str, &str, &str)> = verses
        .iter()
        .map(|(a, b, c, d)| (a.as_str(), b.as_str(), c.as_str(), d.as_str()))
        .collect();
    common::write_verses_csv(&env.verses_path(), &verse_refs)?;
    let label_refs: Vec<(&str, &str, bool)> = labels
        .iter()
        .map(|(a, b, m)| (a.as_str(), b.as_str(), *m))
        .collect();
    common::write_labels_csv(&env.labels_path(), &label_refs)?;
    let feature_refs: Vec<(&str, &str, &str, &str, &str, &str)> = features
        .iter()
        .map(|(a, b, c, d, e, f)| {
            (a.as_str(), b.as_str(), c.as_str(), d.as_str(), e.as_str(), f.as_str())
        })
        .collect();
    common::write_features_csv(&env.features_path(), &feature_refs)?;

    let config = env.write_config("l2_grid: [0.0]\nmax_iters: 500\nlearning_rate: 0.3\n")?;
    let verse_store = CsvVerseStore::new(config.verses_file.clone());
    let label_store = CsvLabelStore::new(
        config.labels_file()?.clone(),
        config.features_file()?.clone(),
    );
    let artifacts = FsArtifactStore::new(config.artifact_dir.clone());
    execute_train(&config, &verse_store, &label_store, &artifacts)?;

    let train = artifacts.load_bytes(SPLIT_TRAIN_KEY)?;
    let test = artifacts.load_bytes(SPLIT_TEST_KEY)?;
    assert_eq!(count_csv_rows(&train) + count_csv_rows(&test), 20);
    let combined = format!("{}{}", String::from_utf8(train)?, String::from_utf8(test)?);
    assert!(combined.contains("V00"));
    assert!(combined.contains("V01"));
    assert!(!combined.contains("V97"), "NA proportion row must be dropped");
    assert!(!combined.contains("V98"), "unjoined label row must be dropped");
    Ok(())
}

#[test]
fn test_predict_scores_new_candidates_with_saved_model() -> Result<()> {
    let env = common::TestEnvironment::new()?;
    common::synthesize_labeled_corpus(&env, 50, 25, "KJV")?;
    run_train(&env, TRAIN_YAML)?;

    let config = env.write_config(TRAIN_YAML)?;
    let label_store = CsvLabelStore::new(
        config.labels_file()?.clone(),
        config.features_file()?.clone(),
    );
    let artifacts = FsArtifactStore::new(config.artifact_dir.clone());
    let model_path = env.output_dir.join(MODEL_FILENAME);
    execute_predict(&config, &model_path, &label_store, &artifacts)?;

    let predictions: Vec<Prediction> = load_csv(&env.output_dir.join("predictions.csv"))?;
    assert_eq!(predictions.len(), 75);
    assert!(predictions.iter().all(|p| (0.0..=1.0).contains(&p.probability)));

    // The separable corpus should mostly recover its labels
    let quotations = predictions
        .iter()
        .filter(|p| matches!(p.predicted, versim::features::Label::Quotation))
        .count();
    assert!(quotations >= 40 && quotations <= 60);
    Ok(())
}

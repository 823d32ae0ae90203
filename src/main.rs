use anyhow::{Error, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use versim::config::read_config;
use versim::model::execute_predict;
use versim::report::execute_report;
use versim::similarity::execute_similarity;
use versim::store::{CsvLabelStore, CsvVerseStore, FsArtifactStore};
use versim::train::execute_train;

/*=================================================================
=                                  ARGS                           =
=================================================================*/

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct ArgParser {
    #[clap(subcommand)]
    command: Commands,

    #[arg(long, default_value_t = 0)]
    threads: usize,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the LSH near-duplicate pipeline over the verse corpus
    Similarity {
        #[arg(required = true, long)]
        config: PathBuf,
    },

    /// Train the quotation classifier from labeled candidates
    Train {
        #[arg(required = true, long)]
        config: PathBuf,
    },

    /// Score new quotation candidates with a saved model artifact
    Predict {
        #[arg(required = true, long)]
        config: PathBuf,

        #[arg(required = true, long)]
        model: PathBuf,
    },

    /// Report corpus word counts and similarity-run statistics
    Report {
        #[arg(required = true, long)]
        config: PathBuf,
    },
}

/*=================================================================
=                              DISPATCH                           =
=================================================================*/

fn run_similarity(config_path: &PathBuf) -> Result<(), Error> {
    let config = read_config(config_path)?;
    let verse_store = CsvVerseStore::new(config.verses_file.clone());
    let artifacts = FsArtifactStore::new(config.artifact_dir.clone());
    execute_similarity(&config, &verse_store, &artifacts)
}

fn run_train(config_path: &PathBuf) -> Result<(), Error> {
    let config = read_config(config_path)?;
    let verse_store = CsvVerseStore::new(config.verses_file.clone());
    let label_store = CsvLabelStore::new(
        config.labels_file()?.clone(),
        config.features_file()?.clone(),
    );
    let artifacts = FsArtifactStore::new(config.artifact_dir.clone());
    execute_train(&config, &verse_store, &label_store, &artifacts)
}

fn run_predict(config_path: &PathBuf, model_path: &PathBuf) -> Result<(), Error> {
    let config = read_config(config_path)?;
    let label_store = CsvLabelStore::new(
        config.labels_file()?.clone(),
        config.features_file()?.clone(),
    );
    let artifacts = FsArtifactStore::new(config.artifact_dir.clone());
    execute_predict(&config, model_path, &label_store, &artifacts)
}

fn run_report(config_path: &PathBuf) -> Result<(), Error> {
    let config = read_config(config_path)?;
    let artifacts = FsArtifactStore::new(config.artifact_dir.clone());
    execute_report(&config, &artifacts)
}

/*=================================================================
=                                 MAIN                            =
=================================================================*/

fn main() {
    let args = ArgParser::parse();
    let threads = args.threads;
    if threads != 0 {
        std::env::set_var("RAYON_NUM_THREADS", threads.to_string());
    }

    let result = match &args.command {
        Commands::Similarity { config } => run_similarity(config),
        Commands::Train { config } => run_train(config),
        Commands::Predict { config, model } => run_predict(config, model),
        Commands::Report { config } => run_report(config),
    };
    result.unwrap()
}

//! Training pipeline CLI.
//!
//! Each subcommand is one stage reading and writing artifacts under an
//! output directory, so stages can be re-run independently:
//!
//! ```text
//! substance-trainer prepare   --pairs pairs.csv --out-dir artifacts
//! substance-trainer triplets  --reference data/standard_substances.csv --out-dir artifacts
//! substance-trainer mine      --reference ... --model intfloat/multilingual-e5-small --out-dir artifacts
//! substance-trainer finetune  --model ... --out-dir artifacts
//! substance-trainer evaluate  --reference ... --model artifacts/checkpoints --out-dir artifacts
//! substance-trainer calibrate --out-dir artifacts
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::PathBuf;
use substance_mapper::{BandThresholds, CandleEncoder, FusionWeights, SubstanceIndex};
use substance_trainer::calibrate::{calibrate, CalibrationConfig};
use substance_trainer::dataset::{prepare, PreparedDataset};
use substance_trainer::eval::{evaluate, read_rows_csv, write_rows_csv};
use substance_trainer::finetune::{finetune, hard_negative_triplets, FinetuneConfig};
use substance_trainer::mining::{mine_hard_negatives, HardNegative, MiningConfig};
use substance_trainer::triplets::{build_triplets, Triplet, TripletConfig};
use substance_trainer::{read_jsonl, write_jsonl};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const PREPARED_FILE: &str = "prepared.json";
const TRIPLETS_FILE: &str = "triplets.jsonl";
const HARD_NEGATIVES_FILE: &str = "hard_negatives.jsonl";
const EVAL_ROWS_FILE: &str = "eval_rows.csv";
const EVAL_REPORT_FILE: &str = "eval_report.json";
const THRESHOLDS_FILE: &str = "thresholds.json";

#[derive(Parser)]
#[command(name = "substance-trainer")]
#[command(about = "Offline training pipeline for the substance mapper")]
struct Cli {
    /// Directory for stage artifacts.
    #[arg(long, global = true, default_value = "artifacts")]
    out_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load labeled pairs, drop bad rows, sid-disjoint train/dev split.
    Prepare {
        /// CSV of historical mapping decisions (raw_name, sid).
        #[arg(long)]
        pairs: PathBuf,
        #[arg(long, default_value_t = 0.2)]
        dev_fraction: f64,
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
    /// Build anchor/positive/negative triplets from the training split.
    Triplets {
        /// Reference corpus CSV (sid, name, category).
        #[arg(long)]
        reference: PathBuf,
        #[arg(long, default_value_t = 2)]
        easy_negatives: usize,
        #[arg(long, default_value_t = 1)]
        hard_negatives: usize,
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
    /// Mine model-based hard negatives against the reference corpus.
    Mine {
        #[arg(long)]
        reference: PathBuf,
        /// Hub repo id or local checkpoint directory.
        #[arg(long, default_value = substance_mapper::config::DEFAULT_MODEL_REPO)]
        model: String,
        #[arg(long, default_value_t = 20)]
        top_k: usize,
        #[arg(long, default_value_t = 0.55)]
        similarity_floor: f32,
        #[arg(long, default_value_t = 0.15)]
        margin_window: f32,
    },
    /// Fine-tune the embedding model on triplets and mined negatives.
    Finetune {
        #[arg(long)]
        reference: PathBuf,
        #[arg(long, default_value = substance_mapper::config::DEFAULT_MODEL_REPO)]
        model: String,
        #[arg(long, default_value_t = 3)]
        epochs: usize,
        #[arg(long, default_value_t = 16)]
        batch_size: usize,
        #[arg(long, default_value_t = 2e-5)]
        learning_rate: f64,
        #[arg(long, default_value_t = 0.2)]
        margin: f64,
        #[arg(long, default_value_t = 0.05)]
        temperature: f64,
        #[arg(long, default_value_t = 0.5)]
        infonce_weight: f64,
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
    /// Score the dev split and write the per-row evaluation frame.
    Evaluate {
        #[arg(long)]
        reference: PathBuf,
        #[arg(long, default_value = substance_mapper::config::DEFAULT_MODEL_REPO)]
        model: String,
        #[arg(long, default_value_t = 0.85)]
        top1_weight: f32,
        #[arg(long, default_value_t = 0.15)]
        margin_weight: f32,
        #[arg(long, default_value_t = 0.80)]
        mapped_threshold: f32,
        #[arg(long, default_value_t = 0.60)]
        review_threshold: f32,
        #[arg(long, default_value_t = 5)]
        top_k: usize,
    },
    /// Sweep thresholds on the evaluation frame.
    Calibrate {
        #[arg(long, default_value_t = 0.97)]
        target_precision: f64,
        #[arg(long, default_value_t = 0.80)]
        review_target_precision: f64,
        #[arg(long, default_value_t = 0.05)]
        min_gap: f32,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "substance_trainer=info,substance_mapper=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    std::fs::create_dir_all(&cli.out_dir)
        .with_context(|| format!("cannot create {}", cli.out_dir.display()))?;

    match cli.command {
        Command::Prepare {
            pairs,
            dev_fraction,
            seed,
        } => {
            prepare(&pairs, &cli.out_dir.join(PREPARED_FILE), dev_fraction, seed)?;
        }
        Command::Triplets {
            reference,
            easy_negatives,
            hard_negatives,
            seed,
        } => {
            let dataset = PreparedDataset::load(&cli.out_dir.join(PREPARED_FILE))?;
            let corpus = substance_mapper::reference::load_reference_csv(&reference)?;
            let config = TripletConfig {
                easy_negatives,
                hard_negatives,
                seed,
            };
            let triplets = build_triplets(&dataset.train, &corpus, config)?;
            write_jsonl(&cli.out_dir.join(TRIPLETS_FILE), &triplets)?;
        }
        Command::Mine {
            reference,
            model,
            top_k,
            similarity_floor,
            margin_window,
        } => {
            let dataset = PreparedDataset::load(&cli.out_dir.join(PREPARED_FILE))?;
            let corpus = substance_mapper::reference::load_reference_csv(&reference)?;
            let encoder = CandleEncoder::from_repo(&model)?;
            let config = MiningConfig {
                top_k,
                similarity_floor,
                margin_window,
            };
            let mined = mine_hard_negatives(&encoder, &corpus, &dataset.train, config)?;
            write_jsonl(&cli.out_dir.join(HARD_NEGATIVES_FILE), &mined)?;
        }
        Command::Finetune {
            reference,
            model,
            epochs,
            batch_size,
            learning_rate,
            margin,
            temperature,
            infonce_weight,
            seed,
        } => {
            let triplets: Vec<Triplet> = read_jsonl(&cli.out_dir.join(TRIPLETS_FILE))?;
            let mined_path = cli.out_dir.join(HARD_NEGATIVES_FILE);
            let mined: Vec<HardNegative> = if mined_path.exists() {
                read_jsonl(&mined_path)?
            } else {
                tracing::warn!("No hard-negative artifact; training on triplets only");
                Vec::new()
            };
            let corpus = substance_mapper::reference::load_reference_csv(&reference)?;
            let reference_names: HashMap<String, String> = corpus
                .into_iter()
                .map(|s| (s.sid, s.name))
                .collect();
            let extra = hard_negative_triplets(&mined, &reference_names);

            let config = FinetuneConfig {
                model,
                output_dir: cli.out_dir.join("checkpoints"),
                epochs,
                batch_size,
                learning_rate,
                margin,
                temperature,
                infonce_weight,
                seed,
            };
            finetune(triplets, extra, &config)?;
        }
        Command::Evaluate {
            reference,
            model,
            top1_weight,
            margin_weight,
            mapped_threshold,
            review_threshold,
            top_k,
        } => {
            let dataset = PreparedDataset::load(&cli.out_dir.join(PREPARED_FILE))?;
            let corpus = substance_mapper::reference::load_reference_csv(&reference)?;
            let encoder = CandleEncoder::from_repo(&model)?;
            let index = SubstanceIndex::from_corpus(&encoder, corpus)?;

            let weights = FusionWeights {
                top1_weight,
                margin_weight,
            };
            weights.validate()?;
            let thresholds = BandThresholds {
                mapped: mapped_threshold,
                needs_review: review_threshold,
            };
            thresholds.validate()?;

            let (report, rows) =
                evaluate(&encoder, &index, &dataset.dev, weights, thresholds, top_k)?;
            write_rows_csv(&cli.out_dir.join(EVAL_ROWS_FILE), &rows)?;
            let file = std::fs::File::create(cli.out_dir.join(EVAL_REPORT_FILE))?;
            serde_json::to_writer_pretty(std::io::BufWriter::new(file), &report)?;
        }
        Command::Calibrate {
            target_precision,
            review_target_precision,
            min_gap,
        } => {
            let rows = read_rows_csv(&cli.out_dir.join(EVAL_ROWS_FILE))?;
            let config = CalibrationConfig {
                target_precision,
                review_target_precision,
                min_gap,
            };
            let result = calibrate(&rows, config)?;
            result.save(&cli.out_dir.join(THRESHOLDS_FILE))?;
        }
    }
    Ok(())
}

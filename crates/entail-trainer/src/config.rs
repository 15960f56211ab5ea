//! Command-line arguments and the immutable hyperparameter record built from them.

use std::path::{Path, PathBuf};

use clap::Parser;
use entail_core::{EntailError, Result};
use serde::{Deserialize, Serialize};

use crate::trainer::{OptimConfig, TrainOptions};

/// Train a decomposable attention model for natural language inference.
///
/// Input corpora are SNLI-style JSON-lines files (`sentence1`, `sentence2`,
/// `gold_label`) or `.tsv` files with the same three columns.
#[derive(Parser, Debug, Clone)]
#[command(name = "train", version, about, long_about = None)]
pub struct TrainArgs {
    /// Text file with word embeddings
    pub embeddings: PathBuf,

    /// JSONL or TSV file with training corpus
    pub train: PathBuf,

    /// JSONL or TSV file with validation corpus
    pub validation: PathBuf,

    /// Directory to save the model files
    pub save: PathBuf,

    /// Log directory to save summaries
    pub logs: PathBuf,

    /// Number of epochs
    #[arg(short = 'e', default_value_t = 10)]
    pub num_epochs: usize,

    /// Batch size
    #[arg(short = 'b', default_value_t = 32)]
    pub batch_size: usize,

    /// Number of hidden units
    #[arg(short = 'u', default_value_t = 100)]
    pub num_units: usize,

    /// Dropout keep probability
    #[arg(short = 'd', default_value_t = 1.0)]
    pub dropout: f32,

    /// Norm to clip training gradients
    #[arg(short = 'c')]
    pub clip_norm: Option<f64>,

    /// Learning rate
    #[arg(short = 'r', default_value_t = 0.001)]
    pub rate: f64,

    /// Use intra-sentence attention
    #[arg(long = "use-intra")]
    pub use_intra: bool,

    /// L2 normalization constant
    #[arg(long, default_value_t = 0.0)]
    pub l2: f64,

    /// Number of batches between performance reports
    #[arg(long, default_value_t = 100)]
    pub report: usize,

    /// Seed for shuffling and weight initialization
    #[arg(long, default_value_t = entail_core::session::DEFAULT_SEED)]
    pub seed: u64,
}

/// Validated training knobs. Read-only once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HyperParams {
    pub num_epochs: usize,
    pub batch_size: usize,
    pub num_units: usize,
    pub dropout_keep: f32,
    pub clip_norm: Option<f64>,
    pub learning_rate: f64,
    pub use_intra_attention: bool,
    pub l2_constant: f64,
    pub report_interval: usize,
    pub seed: u64,
}

impl HyperParams {
    pub fn optim(&self) -> OptimConfig {
        OptimConfig {
            learning_rate: self.learning_rate,
            clip_norm: self.clip_norm,
            l2_constant: self.l2_constant,
        }
    }

    pub fn train_options(&self, save_dir: &Path, log_dir: &Path) -> TrainOptions {
        TrainOptions {
            num_epochs: self.num_epochs,
            batch_size: self.batch_size,
            dropout_keep: self.dropout_keep,
            save_dir: save_dir.to_path_buf(),
            log_dir: log_dir.to_path_buf(),
            report_interval: self.report_interval,
        }
    }

    fn validate(self) -> Result<Self> {
        let positive = [
            ("epochs (-e)", self.num_epochs),
            ("batch size (-b)", self.batch_size),
            ("hidden units (-u)", self.num_units),
            ("report interval (--report)", self.report_interval),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(EntailError::Config(format!("{name} must be at least 1")));
            }
        }
        if !(self.dropout_keep > 0.0 && self.dropout_keep <= 1.0) {
            return Err(EntailError::Config(format!(
                "dropout keep probability (-d) must be in (0, 1], got {}",
                self.dropout_keep
            )));
        }
        if let Some(clip) = self.clip_norm {
            if !(clip > 0.0) {
                return Err(EntailError::Config(format!(
                    "clip norm (-c) must be positive, got {clip}"
                )));
            }
        }
        if !(self.learning_rate > 0.0) {
            return Err(EntailError::Config(format!(
                "learning rate (-r) must be positive, got {}",
                self.learning_rate
            )));
        }
        if !(self.l2_constant >= 0.0) {
            return Err(EntailError::Config(format!(
                "L2 constant (--l2) must not be negative, got {}",
                self.l2_constant
            )));
        }
        Ok(self)
    }
}

impl TryFrom<&TrainArgs> for HyperParams {
    type Error = EntailError;

    fn try_from(args: &TrainArgs) -> Result<Self> {
        HyperParams {
            num_epochs: args.num_epochs,
            batch_size: args.batch_size,
            num_units: args.num_units,
            dropout_keep: args.dropout,
            clip_norm: args.clip_norm,
            learning_rate: args.rate,
            use_intra_attention: args.use_intra,
            l2_constant: args.l2,
            report_interval: args.report,
            seed: args.seed,
        }
        .validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POSITIONAL: [&str; 6] = [
        "train",
        "vectors.txt",
        "train.jsonl",
        "dev.jsonl",
        "save",
        "logs",
    ];

    fn parse(extra: &[&str]) -> std::result::Result<TrainArgs, clap::Error> {
        TrainArgs::try_parse_from(POSITIONAL.iter().chain(extra.iter()))
    }

    #[test]
    fn test_defaults() {
        let args = parse(&[]).unwrap();
        let params = HyperParams::try_from(&args).unwrap();

        assert_eq!(args.embeddings, PathBuf::from("vectors.txt"));
        assert_eq!(args.logs, PathBuf::from("logs"));
        assert_eq!(params.num_epochs, 10);
        assert_eq!(params.batch_size, 32);
        assert_eq!(params.num_units, 100);
        assert_eq!(params.dropout_keep, 1.0);
        assert_eq!(params.clip_norm, None);
        assert_eq!(params.learning_rate, 0.001);
        assert!(!params.use_intra_attention);
        assert_eq!(params.l2_constant, 0.0);
        assert_eq!(params.report_interval, 100);
    }

    #[test]
    fn test_flags() {
        let numeric = ["-e", "3", "-b", "8", "-u", "50", "-d", "0.8", "-c", "5", "-r", "0.05"];
        let rest = ["--use-intra", "--l2", "0.0001", "--report", "20"];
        let args = parse(&[&numeric[..], &rest[..]].concat()).unwrap();
        let params = HyperParams::try_from(&args).unwrap();

        assert_eq!(params.num_epochs, 3);
        assert_eq!(params.batch_size, 8);
        assert_eq!(params.num_units, 50);
        assert_eq!(params.dropout_keep, 0.8);
        assert_eq!(params.clip_norm, Some(5.0));
        assert_eq!(params.learning_rate, 0.05);
        assert!(params.use_intra_attention);
        assert_eq!(params.l2_constant, 0.0001);
        assert_eq!(params.report_interval, 20);
    }

    #[test]
    fn test_missing_positional() {
        assert!(TrainArgs::try_parse_from(["train", "vectors.txt"]).is_err());
    }

    #[test]
    fn test_invalid_values() {
        for extra in [
            &["-b", "0"][..],
            &["-e", "0"],
            &["-d", "0"],
            &["-d", "1.5"],
            &["-c", "0"],
            &["-r", "0"],
            &["--l2=-0.1"],
            &["--report", "0"],
        ] {
            let args = parse(extra).unwrap();
            assert!(
                matches!(HyperParams::try_from(&args), Err(EntailError::Config(_))),
                "{extra:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_params_serialize() {
        let params = HyperParams::try_from(&parse(&[]).unwrap()).unwrap();
        let json = serde_json::to_string(&params).unwrap();
        let back: HyperParams = serde_json::from_str(&json).unwrap();
        assert_eq!(back, params);
    }
}

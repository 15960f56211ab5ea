//! # Entail Trainer
//!
//! Command-line training of decomposable attention models on SNLI-style
//! corpora. The `train` binary parses [`config::TrainArgs`] and hands them
//! to [`driver::run`], which reports to the validation set periodically and
//! keeps the best-scoring checkpoint in the save directory.

pub mod checkpoint;
pub mod config;
pub mod driver;
pub mod summary;
pub mod trainer;

pub use checkpoint::{BestScore, CheckpointWriter, MODEL_FILE, ModelParams, PARAMS_FILE};
pub use config::{HyperParams, TrainArgs};
pub use driver::run;
pub use summary::{EVENTS_PREFIX, SummaryEvent, SummaryWriter, event_files, read_events};
pub use trainer::{Metrics, OptimConfig, TrainOptions, TrainReport, Trainer};

//! Checkpoint Management - model state persistence on validation improvement

use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use entail_core::{DecomposableAttention, ModelConfig};
use serde::{Deserialize, Serialize};

use crate::config::HyperParams;

/// Trainable parameters, safetensors format.
pub const MODEL_FILE: &str = "model.safetensors";

/// Everything needed to rebuild the network for inference.
pub const PARAMS_FILE: &str = "params.json";

/// Metadata written next to every checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    pub model: ModelConfig,
    /// `(vocabulary size, embedding dimension)`.
    pub embedding_shape: (usize, usize),
    pub hyper: HyperParams,
}

impl ModelParams {
    pub fn load<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let path = dir.as_ref().join(PARAMS_FILE);
        let file = File::open(&path).with_context(|| format!("opening {}", path.display()))?;
        serde_json::from_reader(file).with_context(|| format!("parsing {}", path.display()))
    }
}

/// Writes checkpoints into one directory, replacing the previous one each time.
#[derive(Debug)]
pub struct CheckpointWriter {
    dir: PathBuf,
    params: Option<ModelParams>,
}

impl CheckpointWriter {
    pub fn new<P: AsRef<Path>>(dir: P, params: Option<ModelParams>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating save directory {}", dir.display()))?;
        Ok(Self { dir, params })
    }

    pub fn model_path(&self) -> PathBuf {
        self.dir.join(MODEL_FILE)
    }

    /// Persist `model`, overwriting any earlier checkpoint.
    pub fn save(&self, model: &DecomposableAttention) -> Result<PathBuf> {
        let path = self.model_path();
        let staging = self.dir.join(format!("{MODEL_FILE}.tmp"));
        model
            .save(&staging)
            .with_context(|| format!("writing {}", staging.display()))?;
        std::fs::rename(&staging, &path).with_context(|| format!("replacing {}", path.display()))?;

        if let Some(params) = &self.params {
            let params_path = self.dir.join(PARAMS_FILE);
            let file = File::create(&params_path)
                .with_context(|| format!("writing {}", params_path.display()))?;
            serde_json::to_writer_pretty(file, params)?;
        }

        Ok(path)
    }
}

/// Tracks the best validation score seen during a run.
#[derive(Debug, Clone, Copy, Default)]
pub struct BestScore {
    best: Option<f32>,
}

impl BestScore {
    /// Record `score`; true only if it beats every earlier score.
    pub fn improves(&mut self, score: f32) -> bool {
        if score.is_nan() {
            return false;
        }
        match self.best {
            Some(best) if score <= best => false,
            _ => {
                self.best = Some(score);
                true
            }
        }
    }

    pub fn best(&self) -> Option<f32> {
        self.best
    }
}

//! Training loop for the decomposable attention model.

use std::path::PathBuf;
use std::slice::Chunks;

use anyhow::{Result, bail};
use candle_core::backprop::GradStore;
use candle_core::{Tensor, Var};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use entail_core::{Batch, DecomposableAttention, EncodedDataset, Mode, Session};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::checkpoint::{BestScore, CheckpointWriter, ModelParams};
use crate::summary::SummaryWriter;

/// Optimizer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimConfig {
    pub learning_rate: f64,
    /// Global gradient norm limit; `None` disables clipping.
    pub clip_norm: Option<f64>,
    /// Weight of `½ Σ‖W‖²` in the loss.
    pub l2_constant: f64,
}

/// Loop settings.
#[derive(Debug, Clone)]
pub struct TrainOptions {
    pub num_epochs: usize,
    pub batch_size: usize,
    pub dropout_keep: f32,
    pub save_dir: PathBuf,
    pub log_dir: PathBuf,
    /// Batches between validation reports.
    pub report_interval: usize,
}

/// Outcome of a completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainReport {
    /// Optimizer steps taken (one per batch).
    pub steps: usize,
    pub reports: usize,
    pub checkpoints: usize,
    pub best_accuracy: Option<f32>,
    /// Summary events written by this run.
    pub events_file: PathBuf,
}

/// Loss and accuracy over a set of examples.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Metrics {
    loss_sum: f64,
    correct: usize,
    examples: usize,
}

impl Metrics {
    fn add(&mut self, mean_loss: f32, correct: usize, examples: usize) {
        self.loss_sum += f64::from(mean_loss) * examples as f64;
        self.correct += correct;
        self.examples += examples;
    }

    pub fn loss(&self) -> f32 {
        if self.examples == 0 {
            0.0
        } else {
            (self.loss_sum / self.examples as f64) as f32
        }
    }

    pub fn accuracy(&self) -> f32 {
        if self.examples == 0 {
            0.0
        } else {
            self.correct as f32 / self.examples as f32
        }
    }

    pub fn examples(&self) -> usize {
        self.examples
    }
}

/// Owns the model and its optimizer for the duration of training.
pub struct Trainer {
    model: DecomposableAttention,
    optimizer: AdamW,
    optim: OptimConfig,
    params: Option<ModelParams>,
}

impl Trainer {
    pub fn new(model: DecomposableAttention, optim: OptimConfig) -> Result<Self> {
        let optimizer = AdamW::new(
            model.trainable_vars(),
            ParamsAdamW {
                lr: optim.learning_rate,
                weight_decay: 0.0,
                ..ParamsAdamW::default()
            },
        )?;
        Ok(Self {
            model,
            optimizer,
            optim,
            params: None,
        })
    }

    /// Write `params.json` alongside every checkpoint.
    pub fn with_params(mut self, params: ModelParams) -> Self {
        self.params = Some(params);
        self
    }

    pub fn model(&self) -> &DecomposableAttention {
        &self.model
    }

    /// Run `num_epochs` passes over `train_set`, reshuffling every epoch.
    ///
    /// Every `report_interval` batches, and once more at the end of an epoch
    /// that did not just report, the full validation set is evaluated and a
    /// checkpoint is written if its accuracy beats every earlier report.
    pub fn train(
        &mut self,
        session: &mut Session,
        train_set: &EncodedDataset,
        valid_set: &EncodedDataset,
        options: &TrainOptions,
    ) -> Result<TrainReport> {
        if train_set.is_empty() {
            bail!("training set is empty");
        }
        if valid_set.is_empty() {
            bail!("validation set is empty");
        }
        if options.batch_size == 0 || options.report_interval == 0 {
            bail!("batch size and report interval must be at least 1");
        }

        let checkpoints = CheckpointWriter::new(&options.save_dir, self.params.clone())?;
        let mut summary = SummaryWriter::new(&options.log_dir)?;
        let mut best = BestScore::default();
        let mode = Mode::Train {
            keep_prob: options.dropout_keep,
        };

        let mut batches = BatchOrder::new(train_set.len(), options.batch_size);
        let mut report = TrainReport {
            steps: 0,
            reports: 0,
            checkpoints: 0,
            best_accuracy: None,
            events_file: summary.path().to_path_buf(),
        };
        let mut running = Metrics::default();

        info!(
            "Training on {} examples, {} batches per epoch, validating on {}",
            train_set.len(),
            batches.batches_per_epoch(),
            valid_set.len()
        );

        for epoch in 0..options.num_epochs {
            let mut just_reported = false;

            for chunk in batches.next_epoch(session) {
                let batch = train_set.batch(chunk, session.device())?;
                let (loss, correct) = self.train_step(&batch, mode)?;
                running.add(loss, correct, batch.size());
                report.steps += 1;
                just_reported = false;

                if report.steps % options.report_interval == 0 {
                    self.report(
                        session,
                        valid_set,
                        options.batch_size,
                        report.steps,
                        &mut running,
                        &mut best,
                        &checkpoints,
                        &mut summary,
                        &mut report,
                    )?;
                    just_reported = true;
                }
            }

            if !just_reported {
                self.report(
                    session,
                    valid_set,
                    options.batch_size,
                    report.steps,
                    &mut running,
                    &mut best,
                    &checkpoints,
                    &mut summary,
                    &mut report,
                )?;
            }

            info!("Epoch {}/{} complete", epoch + 1, options.num_epochs);
        }

        report.best_accuracy = best.best();
        info!(
            "Training finished after {} steps, best validation accuracy {:.4}",
            report.steps,
            report.best_accuracy.unwrap_or_default()
        );
        Ok(report)
    }

    /// One optimizer step; returns the batch cross-entropy and hit count.
    fn train_step(&mut self, batch: &Batch, mode: Mode) -> Result<(f32, usize)> {
        let step = self.gradients(batch, mode)?;
        trace!("Objective {:.4}, gradient norm {:.4}", step.objective, step.norm);
        self.optimizer.step(&step.grads)?;
        let correct = self.model.correct(&step.logits, batch)?;
        Ok((step.cross_entropy, correct))
    }

    /// Gradients of the regularized objective on `batch`, clipped when a
    /// norm limit is configured.
    fn gradients(&self, batch: &Batch, mode: Mode) -> Result<StepGradients> {
        let logits = self.model.forward(batch, mode)?;
        let cross_entropy = self.model.loss(&logits, batch)?;
        let objective = if self.optim.l2_constant > 0.0 {
            (&cross_entropy + (self.model.l2_penalty()? * self.optim.l2_constant)?)?
        } else {
            cross_entropy.clone()
        };

        let mut grads = objective.backward()?;
        let vars = self.model.trainable_vars();
        let norm = match self.optim.clip_norm {
            Some(max_norm) => {
                let norm = clip_global_norm(&vars, &mut grads, max_norm)?;
                if norm > max_norm {
                    debug!("Clipped gradient norm {:.4} to {}", norm, max_norm);
                }
                norm
            }
            None => global_norm(&vars, &grads)?,
        };

        Ok(StepGradients {
            cross_entropy: cross_entropy.to_scalar::<f32>()?,
            objective: objective.to_scalar::<f32>()?,
            norm,
            logits,
            grads,
        })
    }

    /// Loss and accuracy over `data` without dropout.
    pub fn evaluate(
        &self,
        session: &Session,
        data: &EncodedDataset,
        batch_size: usize,
    ) -> Result<Metrics> {
        let mut metrics = Metrics::default();
        let indices: Vec<usize> = (0..data.len()).collect();
        for chunk in indices.chunks(batch_size.max(1)) {
            let batch = data.batch(chunk, session.device())?;
            let logits = self.model.forward(&batch, Mode::Eval)?;
            let loss = self.model.loss(&logits, &batch)?.to_scalar::<f32>()?;
            metrics.add(loss, self.model.correct(&logits, &batch)?, batch.size());
        }
        Ok(metrics)
    }

    #[allow(clippy::too_many_arguments)]
    fn report(
        &self,
        session: &Session,
        valid_set: &EncodedDataset,
        batch_size: usize,
        step: usize,
        running: &mut Metrics,
        best: &mut BestScore,
        checkpoints: &CheckpointWriter,
        summary: &mut SummaryWriter,
        report: &mut TrainReport,
    ) -> Result<()> {
        let valid = self.evaluate(session, valid_set, batch_size)?;
        let improved = best.improves(valid.accuracy());
        if improved {
            let path = checkpoints.save(&self.model)?;
            report.checkpoints += 1;
            debug!("Saved checkpoint to {}", path.display());
        }
        report.reports += 1;

        info!(
            "Step {}: train loss {:.4}, train acc {:.4} | valid loss {:.4}, valid acc {:.4}{}",
            step,
            running.loss(),
            running.accuracy(),
            valid.loss(),
            valid.accuracy(),
            if improved { " (saved model)" } else { "" }
        );

        summary.scalar(step, "train/loss", running.loss())?;
        summary.scalar(step, "train/accuracy", running.accuracy())?;
        summary.scalar(step, "valid/loss", valid.loss())?;
        summary.scalar(step, "valid/accuracy", valid.accuracy())?;
        summary.flush()?;

        *running = Metrics::default();
        Ok(())
    }
}

/// Result of one forward and backward pass.
struct StepGradients {
    /// Mean cross-entropy without the L2 term.
    cross_entropy: f32,
    objective: f32,
    /// Global gradient norm before clipping.
    norm: f64,
    logits: Tensor,
    grads: GradStore,
}

/// Shuffled example order, split into batches.
struct BatchOrder {
    order: Vec<usize>,
    batch_size: usize,
}

impl BatchOrder {
    fn new(len: usize, batch_size: usize) -> Self {
        Self {
            order: (0..len).collect(),
            batch_size,
        }
    }

    fn batches_per_epoch(&self) -> usize {
        self.order.len().div_ceil(self.batch_size)
    }

    /// Reshuffle, then yield the batches of the next epoch.
    fn next_epoch(&mut self, session: &mut Session) -> Chunks<'_, usize> {
        session.shuffle(&mut self.order);
        self.order.chunks(self.batch_size)
    }
}

/// Joint L2 norm of the gradients of `vars`.
pub fn global_norm(vars: &[Var], grads: &GradStore) -> Result<f64> {
    let mut squared = 0f64;
    for var in vars {
        if let Some(grad) = grads.get(var.as_tensor()) {
            squared += f64::from(grad.sqr()?.sum_all()?.to_scalar::<f32>()?);
        }
    }
    Ok(squared.sqrt())
}

/// Scale every gradient so their joint L2 norm is at most `max_norm`.
/// Returns the norm before clipping.
pub fn clip_global_norm(vars: &[Var], grads: &mut GradStore, max_norm: f64) -> Result<f64> {
    let norm = global_norm(vars, grads)?;

    if norm > max_norm {
        let scale = max_norm / norm;
        for var in vars {
            if let Some(grad) = grads.remove(var.as_tensor()) {
                grads.insert(var.as_tensor(), (grad * scale)?);
            }
        }
    }
    Ok(norm)
}

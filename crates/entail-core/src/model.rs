//! # Decomposable Attention Model
//!
//! Attend / compare / aggregate network over frozen pretrained embeddings,
//! with optional intra-sentence attention. Every forward call takes an
//! explicit [`Mode`]; dropout is only active in [`Mode::Train`].

use std::path::Path;

use candle_core::{D, DType, Device, Module, Tensor, Var};
use candle_nn::{Init, Linear, VarBuilder, VarMap};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::corpus::Label;
use crate::dataset::{Batch, SentenceDims};
use crate::embeddings::WordEmbeddingTable;
use crate::error::{EntailError, Result};
use crate::session::Session;

/// Distances beyond this share one intra-attention bias.
const MAX_DISTANCE: i64 = 10;

/// Standard deviation of the initial weight matrices.
const WEIGHT_INIT_STD: f32 = 0.1;

/// Score added to masked-out attention logits.
const MASK_PENALTY: f64 = 1e9;

/// Whether a forward pass is part of a training step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Mode {
    /// Training step; each unit is kept with probability `keep_prob`.
    Train { keep_prob: f32 },
    /// Evaluation; no dropout.
    Eval,
}

impl Mode {
    fn drop_prob(self) -> f32 {
        match self {
            Mode::Train { keep_prob } => 1.0 - keep_prob,
            Mode::Eval => 0.0,
        }
    }
}

/// Architecture of the network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Hidden units of every feed-forward layer.
    pub num_units: usize,
    /// Padded sentence widths the model accepts.
    pub dims: SentenceDims,
    /// Whether to run intra-sentence attention before alignment.
    pub use_intra_attention: bool,
    pub num_classes: usize,
}

impl ModelConfig {
    pub fn new(num_units: usize, dims: SentenceDims, use_intra_attention: bool) -> Self {
        Self {
            num_units,
            dims,
            use_intra_attention,
            num_classes: Label::NUM_CLASSES,
        }
    }
}

/// Two ReLU layers with dropout on their inputs.
struct FeedForward {
    first: Linear,
    second: Linear,
}

impl FeedForward {
    fn new(in_dim: usize, units: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            first: candle_nn::linear(in_dim, units, vb.pp("layer1"))?,
            second: candle_nn::linear(units, units, vb.pp("layer2"))?,
        })
    }

    fn forward(&self, xs: &Tensor, mode: Mode) -> Result<Tensor> {
        let xs = dropout(xs, mode)?;
        let xs = self.first.forward(&xs)?.relu()?;
        let xs = dropout(&xs, mode)?;
        Ok(self.second.forward(&xs)?.relu()?)
    }

    fn weights(&self) -> [&Tensor; 2] {
        [self.first.weight(), self.second.weight()]
    }
}

/// Self-alignment within one sentence plus a learned distance bias.
struct IntraAttention {
    project: FeedForward,
    distance_bias: Tensor,
}

impl IntraAttention {
    fn new(units: usize, vb: VarBuilder) -> Result<Self> {
        let buckets = (2 * MAX_DISTANCE + 1) as usize;
        Ok(Self {
            project: FeedForward::new(units, units, vb.pp("project"))?,
            distance_bias: vb.get_with_hints(buckets, "distance_bias", Init::Const(0.0))?,
        })
    }

    /// `(batch, width, units)` → `(batch, width, 2 * units)`.
    fn forward(&self, xs: &Tensor, mask: &Tensor, mode: Mode) -> Result<Tensor> {
        let (_, width, _) = xs.dims3()?;
        let projected = self.project.forward(xs, mode)?;
        let scores = projected.matmul(&projected.transpose(1, 2)?.contiguous()?)?;

        let buckets = distance_buckets(width, xs.device())?;
        let bias = self
            .distance_bias
            .index_select(&buckets, 0)?
            .reshape((width, width))?;
        let scores = scores.broadcast_add(&bias)?;

        let weights = masked_softmax(&scores, mask)?;
        let aligned = weights.matmul(xs)?;
        Ok(Tensor::cat(&[xs, &aligned], 2)?)
    }
}

/// Decomposable attention network for three-way NLI.
pub struct DecomposableAttention {
    config: ModelConfig,
    varmap: VarMap,
    embeddings: Tensor,
    projection: Linear,
    intra: Option<IntraAttention>,
    attend: FeedForward,
    compare: FeedForward,
    aggregate: FeedForward,
    classifier: Linear,
}

impl DecomposableAttention {
    /// Build the network with freshly initialized weights.
    pub fn new(
        config: ModelConfig,
        embeddings: &WordEmbeddingTable,
        session: &mut Session,
    ) -> Result<Self> {
        if config.num_units == 0 {
            return Err(EntailError::Config("num_units must be at least 1".into()));
        }

        let device = session.device().clone();
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let units = config.num_units;
        let repr_dim = if config.use_intra_attention {
            2 * units
        } else {
            units
        };

        let projection = candle_nn::linear_no_bias(embeddings.dim(), units, vb.pp("projection"))?;
        let intra = if config.use_intra_attention {
            Some(IntraAttention::new(units, vb.pp("intra"))?)
        } else {
            None
        };
        let attend = FeedForward::new(repr_dim, units, vb.pp("attend"))?;
        let compare = FeedForward::new(2 * repr_dim, units, vb.pp("compare"))?;
        let aggregate = FeedForward::new(2 * units, units, vb.pp("aggregate"))?;
        let classifier = candle_nn::linear(units, config.num_classes, vb.pp("classifier"))?;

        let model = Self {
            embeddings: embeddings.to_tensor(&device)?.detach(),
            config,
            varmap,
            projection,
            intra,
            attend,
            compare,
            aggregate,
            classifier,
        };
        model.initialize(session)?;
        debug!(
            "Model has {} trainable tensors, {} parameters",
            model.varmap.all_vars().len(),
            model.num_parameters()
        );
        Ok(model)
    }

    /// Re-initialize every variable from the session RNG: weight matrices
    /// from a normal distribution, everything else to zero.
    fn initialize(&self, session: &mut Session) -> Result<()> {
        let data = self
            .varmap
            .data()
            .lock()
            .map_err(|_| EntailError::Config("variable map lock poisoned".into()))?;
        let mut names: Vec<&String> = data.keys().collect();
        names.sort();

        for name in names {
            let var = &data[name];
            let shape = var.shape().clone();
            let count = shape.elem_count();
            let values: Vec<f32> = if name.ends_with(".weight") {
                (0..count).map(|_| session.normal(WEIGHT_INIT_STD)).collect()
            } else {
                vec![0.0; count]
            };
            var.set(&Tensor::from_vec(values, shape, var.device())?)?;
        }
        Ok(())
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        self.embeddings.device()
    }

    /// Trainable parameters (embeddings are frozen and not included).
    pub fn trainable_vars(&self) -> Vec<Var> {
        self.varmap.all_vars()
    }

    pub fn num_parameters(&self) -> usize {
        self.trainable_vars()
            .iter()
            .map(|v| v.shape().elem_count())
            .sum()
    }

    /// Class logits, `(batch, num_classes)`.
    ///
    /// # Errors
    /// `ShapeMismatch` if the batch was not padded to this model's widths.
    pub fn forward(&self, batch: &Batch, mode: Mode) -> Result<Tensor> {
        self.check_batch(batch)?;

        let a = self.represent(&batch.premise, &batch.premise_mask, mode)?;
        let b = self.represent(&batch.hypothesis, &batch.hypothesis_mask, mode)?;

        // Attend
        let fa = self.attend.forward(&a, mode)?;
        let fb = self.attend.forward(&b, mode)?;
        let scores = fa.matmul(&fb.transpose(1, 2)?.contiguous()?)?;
        let beta = masked_softmax(&scores, &batch.hypothesis_mask)?.matmul(&b)?;
        let scores_t = scores.transpose(1, 2)?.contiguous()?;
        let alpha = masked_softmax(&scores_t, &batch.premise_mask)?.matmul(&a)?;

        // Compare
        let mask1 = batch.premise_mask.unsqueeze(2)?;
        let mask2 = batch.hypothesis_mask.unsqueeze(2)?;
        let v1 = self.compare.forward(&Tensor::cat(&[&a, &beta], 2)?, mode)?;
        let v2 = self.compare.forward(&Tensor::cat(&[&b, &alpha], 2)?, mode)?;
        let v1 = v1.broadcast_mul(&mask1)?.sum(1)?;
        let v2 = v2.broadcast_mul(&mask2)?.sum(1)?;

        // Aggregate
        let v = Tensor::cat(&[&v1, &v2], 1)?;
        let h = self.aggregate.forward(&v, mode)?;
        Ok(self.classifier.forward(&h)?)
    }

    /// Cross-entropy of `logits` against the batch labels.
    pub fn loss(&self, logits: &Tensor, batch: &Batch) -> Result<Tensor> {
        Ok(candle_nn::loss::cross_entropy(logits, &batch.labels)?)
    }

    /// Number of correct predictions in `logits`.
    pub fn correct(&self, logits: &Tensor, batch: &Batch) -> Result<usize> {
        let predictions = logits.argmax(D::Minus1)?;
        let hits = predictions
            .eq(&batch.labels)?
            .to_dtype(DType::F32)?
            .sum_all()?
            .to_scalar::<f32>()?;
        Ok(hits.round() as usize)
    }

    /// `½ Σ‖W‖²` over weight matrices; biases are not penalized.
    pub fn l2_penalty(&self) -> Result<Tensor> {
        let mut weights = vec![self.projection.weight(), self.classifier.weight()];
        weights.extend(self.attend.weights());
        weights.extend(self.compare.weights());
        weights.extend(self.aggregate.weights());
        if let Some(intra) = &self.intra {
            weights.extend(intra.project.weights());
        }

        let mut total = Tensor::zeros((), DType::F32, self.device())?;
        for w in weights {
            total = (total + w.sqr()?.sum_all()?)?;
        }
        Ok((total * 0.5)?)
    }

    /// Write the trainable parameters in safetensors format.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        Ok(self.varmap.save(path)?)
    }

    /// Load parameters saved by [`DecomposableAttention::save`].
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        Ok(self.varmap.load(path)?)
    }

    /// Embed, project and optionally self-attend one sentence slot.
    fn represent(&self, ids: &Tensor, mask: &Tensor, mode: Mode) -> Result<Tensor> {
        let (batch, width) = ids.dims2()?;
        let embedded = self
            .embeddings
            .index_select(&ids.flatten_all()?, 0)?
            .reshape((batch, width, self.embeddings.dim(1)?))?;
        let projected = self.projection.forward(&embedded)?;
        match &self.intra {
            Some(intra) => intra.forward(&projected, mask, mode),
            None => Ok(projected),
        }
    }

    fn check_batch(&self, batch: &Batch) -> Result<()> {
        let size = batch.size();
        let dims = self.config.dims;
        let checks = [
            ("sentence1", &batch.premise, dims.premise),
            ("sentence2", &batch.hypothesis, dims.hypothesis),
            ("mask1", &batch.premise_mask, dims.premise),
            ("mask2", &batch.hypothesis_mask, dims.hypothesis),
        ];
        for (what, tensor, width) in checks {
            if tensor.dims() != [size, width] {
                return Err(EntailError::ShapeMismatch {
                    what,
                    expected: vec![size, width],
                    actual: tensor.dims().to_vec(),
                });
            }
        }
        Ok(())
    }
}

fn dropout(xs: &Tensor, mode: Mode) -> Result<Tensor> {
    let drop_p = mode.drop_prob();
    if drop_p <= 0.0 {
        return Ok(xs.clone());
    }
    Ok(candle_nn::ops::dropout(xs, drop_p)?)
}

/// Softmax over the last axis of `(batch, rows, cols)` scores, ignoring
/// columns where the `(batch, cols)` mask is zero.
fn masked_softmax(scores: &Tensor, mask: &Tensor) -> Result<Tensor> {
    let penalty = mask.unsqueeze(1)?.affine(MASK_PENALTY, -MASK_PENALTY)?;
    let scores = scores.broadcast_add(&penalty)?;
    Ok(candle_nn::ops::softmax(&scores, D::Minus1)?)
}

/// Bucket id of `j - i` for every `(i, j)` in a `width × width` grid.
fn distance_buckets(width: usize, device: &Device) -> Result<Tensor> {
    let n = width as i64;
    let ids: Vec<u32> = (0..n)
        .flat_map(|i| (0..n).map(move |j| distance_bucket(i, j)))
        .collect();
    Ok(Tensor::from_vec(ids, width * width, device)?)
}

fn distance_bucket(i: i64, j: i64) -> u32 {
    ((j - i).clamp(-MAX_DISTANCE, MAX_DISTANCE) + MAX_DISTANCE) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::SentencePair;
    use crate::encoder::{encode, max_size};

    fn words(s: &str) -> Vec<String> {
        s.split_whitespace().map(str::to_string).collect()
    }

    fn vocab(session: &mut Session) -> WordEmbeddingTable {
        let vectors = vec![vec![0.1, 0.2], vec![0.3, 0.4], vec![0.5, 0.6]];
        WordEmbeddingTable::from_vectors(words("cat dog runs"), vectors, session).unwrap()
    }

    fn setup(use_intra: bool) -> (DecomposableAttention, Batch) {
        let mut session = Session::new(5);
        let vocab = vocab(&mut session);
        let pairs = vec![
            SentencePair::new(words("cat runs"), words("dog runs"), Label::Neutral),
            SentencePair::new(words("dog"), words("cat runs fast"), Label::Contradiction),
        ];
        let dims = max_size(&[&pairs]);
        let data = encode(&pairs, &vocab, dims).unwrap();
        let batch = data.batch(&[0, 1], session.device()).unwrap();
        let config = ModelConfig::new(8, dims, use_intra);
        let model = DecomposableAttention::new(config, &vocab, &mut session).unwrap();
        (model, batch)
    }

    fn eval_logits(model: &DecomposableAttention, batch: &Batch) -> Vec<Vec<f32>> {
        let logits = model.forward(batch, Mode::Eval).unwrap();
        logits.to_vec2::<f32>().unwrap()
    }

    #[test]
    fn test_forward_shape() {
        let (model, batch) = setup(false);
        let logits = model.forward(&batch, Mode::Eval).unwrap();
        assert_eq!(logits.dims(), &[2, Label::NUM_CLASSES]);
    }

    #[test]
    fn test_forward_with_intra_attention() {
        let (model, batch) = setup(true);
        let logits = model
            .forward(&batch, Mode::Train { keep_prob: 0.8 })
            .unwrap();
        assert_eq!(logits.dims(), &[2, Label::NUM_CLASSES]);
    }

    #[test]
    fn test_eval_is_deterministic() {
        let (model, batch) = setup(true);
        assert_eq!(eval_logits(&model, &batch), eval_logits(&model, &batch));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.safetensors");
        let (trained, batch) = setup(true);
        trained.save(&path).unwrap();

        // Same embedding table, freshly drawn weights.
        let vocab = vocab(&mut Session::new(5));
        let config = trained.config().clone();
        let mut session = Session::new(99);
        let mut restored = DecomposableAttention::new(config, &vocab, &mut session).unwrap();
        assert_ne!(eval_logits(&restored, &batch), eval_logits(&trained, &batch));

        restored.load(&path).unwrap();
        assert_eq!(eval_logits(&restored, &batch), eval_logits(&trained, &batch));
    }

    #[test]
    fn test_loss_and_penalty_are_finite() {
        let (model, batch) = setup(false);
        let logits = model.forward(&batch, Mode::Eval).unwrap();
        let loss = model.loss(&logits, &batch).unwrap();
        let loss = loss.to_scalar::<f32>().unwrap();
        let l2 = model.l2_penalty().unwrap().to_scalar::<f32>().unwrap();
        assert!(loss.is_finite() && loss > 0.0);
        assert!(l2.is_finite() && l2 > 0.0);
        assert!(model.correct(&logits, &batch).unwrap() <= 2);
    }

    #[test]
    fn test_rejects_mismatched_batch() {
        let (model, _) = setup(false);
        let mut session = Session::new(1);
        let vectors = vec![vec![0.1, 0.2]];
        let vocab = WordEmbeddingTable::from_vectors(words("cat"), vectors, &mut session).unwrap();
        let pairs = vec![SentencePair::new(
            words("cat cat cat cat cat"),
            words("cat"),
            Label::Entailment,
        )];
        let data = encode(&pairs, &vocab, max_size(&[&pairs])).unwrap();
        let batch = data.batch(&[0], session.device()).unwrap();

        match model.forward(&batch, Mode::Eval) {
            Err(EntailError::ShapeMismatch { what, .. }) => assert_eq!(what, "sentence1"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_distance_buckets() {
        let ids = distance_buckets(3, &Device::Cpu).unwrap();
        let ids = ids.to_vec1::<u32>().unwrap();
        let m = MAX_DISTANCE as u32;
        assert_eq!(ids, vec![m, m + 1, m + 2, m - 1, m, m + 1, m - 2, m - 1, m]);
    }
}

//! Encoded sentence-pair tensors and mini-batch assembly.

use candle_core::{Device, Tensor};
use serde::{Deserialize, Serialize};

use crate::embeddings::NULL_INDEX;
use crate::error::{EntailError, Result};

/// Padded widths of the two sentence slots.
///
/// Both widths already include the reserved null-alignment slot, so every
/// encoded row has at least one trailing [`NULL_INDEX`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentenceDims {
    pub premise: usize,
    pub hypothesis: usize,
}

impl SentenceDims {
    /// Dims for corpora whose longest sentences have the given token counts.
    pub fn from_longest(longest_premise: usize, longest_hypothesis: usize) -> Self {
        Self {
            premise: longest_premise + 1,
            hypothesis: longest_hypothesis + 1,
        }
    }
}

/// Index tensors for a whole corpus, stored row-major.
#[derive(Debug, Clone)]
pub struct EncodedDataset {
    pub(crate) dims: SentenceDims,
    pub(crate) sentences1: Vec<u32>,
    pub(crate) sentences2: Vec<u32>,
    pub(crate) lengths1: Vec<u32>,
    pub(crate) lengths2: Vec<u32>,
    pub(crate) labels: Vec<u32>,
}

impl EncodedDataset {
    /// Number of examples.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn dims(&self) -> SentenceDims {
        self.dims
    }

    /// `(examples, width)` of the premise matrix.
    pub fn shape1(&self) -> (usize, usize) {
        (self.len(), self.dims.premise)
    }

    /// `(examples, width)` of the hypothesis matrix.
    pub fn shape2(&self) -> (usize, usize) {
        (self.len(), self.dims.hypothesis)
    }

    /// Padded premise indices of example `i`.
    pub fn premise(&self, i: usize) -> &[u32] {
        let w = self.dims.premise;
        &self.sentences1[i * w..(i + 1) * w]
    }

    /// Padded hypothesis indices of example `i`.
    pub fn hypothesis(&self, i: usize) -> &[u32] {
        let w = self.dims.hypothesis;
        &self.sentences2[i * w..(i + 1) * w]
    }

    pub fn lengths1(&self) -> &[u32] {
        &self.lengths1
    }

    pub fn lengths2(&self) -> &[u32] {
        &self.lengths2
    }

    pub fn labels(&self) -> &[u32] {
        &self.labels
    }

    /// Gather the examples at `indices` into tensors on `device`.
    pub fn batch(&self, indices: &[usize], device: &Device) -> Result<Batch> {
        if let Some(&bad) = indices.iter().find(|&&i| i >= self.len()) {
            return Err(EntailError::Config(format!(
                "batch index {bad} out of range for {} examples",
                self.len()
            )));
        }

        let (w1, w2) = (self.dims.premise, self.dims.hypothesis);
        let size = indices.len();
        let mut s1 = Vec::with_capacity(size * w1);
        let mut s2 = Vec::with_capacity(size * w2);
        let mut m1 = Vec::with_capacity(size * w1);
        let mut m2 = Vec::with_capacity(size * w2);
        let mut labels = Vec::with_capacity(size);

        for &i in indices {
            s1.extend_from_slice(self.premise(i));
            s2.extend_from_slice(self.hypothesis(i));
            m1.extend(attention_mask(self.lengths1[i], w1));
            m2.extend(attention_mask(self.lengths2[i], w2));
            labels.push(self.labels[i]);
        }

        Ok(Batch {
            premise: Tensor::from_vec(s1, (size, w1), device)?,
            hypothesis: Tensor::from_vec(s2, (size, w2), device)?,
            premise_mask: Tensor::from_vec(m1, (size, w1), device)?,
            hypothesis_mask: Tensor::from_vec(m2, (size, w2), device)?,
            labels: Tensor::from_vec(labels, size, device)?,
        })
    }
}

/// One mini-batch ready for the model.
#[derive(Debug, Clone)]
pub struct Batch {
    /// `(batch, premise_width)` u32 indices.
    pub premise: Tensor,
    /// `(batch, hypothesis_width)` u32 indices.
    pub hypothesis: Tensor,
    /// `(batch, premise_width)` f32, 1.0 on attendable positions.
    pub premise_mask: Tensor,
    /// `(batch, hypothesis_width)` f32, 1.0 on attendable positions.
    pub hypothesis_mask: Tensor,
    /// `(batch,)` u32 class ids.
    pub labels: Tensor,
}

impl Batch {
    pub fn size(&self) -> usize {
        self.labels.dims().first().copied().unwrap_or(0)
    }
}

/// Positions `0..=length` are attendable: the real tokens plus the null
/// anchor that always follows them.
fn attention_mask(length: u32, width: usize) -> impl Iterator<Item = f32> {
    (0..width).map(move |pos| if pos <= length as usize { 1.0 } else { 0.0 })
}

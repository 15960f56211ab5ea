//! # Vocabulary/Index Encoder
//!
//! Two phases: [`max_size`] scans every corpus that will be fed to the
//! model and fixes the padded widths; [`encode`] then turns one corpus into
//! index rows of exactly those widths. Train and validation tensors built
//! from the same [`SentenceDims`] are always shape-compatible.

use tracing::debug;

use crate::corpus::SentencePair;
use crate::dataset::{EncodedDataset, SentenceDims};
use crate::embeddings::{NULL_INDEX, WordEmbeddingTable};
use crate::error::{EntailError, Result};

/// Scan corpora together and return the shared padded widths.
///
/// The result is the longest premise and longest hypothesis across all
/// corpora combined, each plus one null-alignment slot. Input order does not
/// matter.
pub fn max_size(corpora: &[&[SentencePair]]) -> SentenceDims {
    let (longest1, longest2) = corpora
        .iter()
        .flat_map(|pairs| pairs.iter())
        .fold((0, 0), |(l1, l2), pair| {
            (l1.max(pair.premise.len()), l2.max(pair.hypothesis.len()))
        });
    SentenceDims::from_longest(longest1, longest2)
}

/// Encode `pairs` into index rows of width `dims`.
///
/// Out-of-vocabulary tokens map to [`NULL_INDEX`]. Rows are right-padded with
/// [`NULL_INDEX`] and the recorded length is the token count.
///
/// # Errors
/// `ShapeMismatch` if a sentence does not leave room for the null slot,
/// which only happens when `dims` was scanned without this corpus.
pub fn encode(
    pairs: &[SentencePair],
    vocabulary: &WordEmbeddingTable,
    dims: SentenceDims,
) -> Result<EncodedDataset> {
    let n = pairs.len();
    let mut data = EncodedDataset {
        dims,
        sentences1: Vec::with_capacity(n * dims.premise),
        sentences2: Vec::with_capacity(n * dims.hypothesis),
        lengths1: Vec::with_capacity(n),
        lengths2: Vec::with_capacity(n),
        labels: Vec::with_capacity(n),
    };
    let mut stats = OovStats::default();

    for pair in pairs {
        let len1 = encode_sentence(
            &pair.premise,
            vocabulary,
            dims.premise,
            "sentence1",
            &mut data.sentences1,
            &mut stats,
        )?;
        let len2 = encode_sentence(
            &pair.hypothesis,
            vocabulary,
            dims.hypothesis,
            "sentence2",
            &mut data.sentences2,
            &mut stats,
        )?;
        data.lengths1.push(len1);
        data.lengths2.push(len2);
        data.labels.push(pair.label.id());
    }

    debug!(
        "Encoded {} pairs: {} of {} tokens out of vocabulary ({:.2}%)",
        n,
        stats.oov,
        stats.total,
        stats.rate() * 100.0
    );

    Ok(data)
}

/// Map an encoded row back to words, stopping at its true length.
pub fn decode(row: &[u32], length: u32, vocabulary: &WordEmbeddingTable) -> Vec<String> {
    row.iter()
        .take(length as usize)
        .map(|&idx| vocabulary.word(idx).unwrap_or_default().to_string())
        .collect()
}

fn encode_sentence(
    tokens: &[String],
    vocabulary: &WordEmbeddingTable,
    width: usize,
    what: &'static str,
    out: &mut Vec<u32>,
    stats: &mut OovStats,
) -> Result<u32> {
    if tokens.len() >= width {
        return Err(EntailError::ShapeMismatch {
            what,
            expected: vec![width.saturating_sub(1)],
            actual: vec![tokens.len()],
        });
    }

    for token in tokens {
        let idx = vocabulary.index_of(token).unwrap_or(NULL_INDEX);
        stats.total += 1;
        if idx == NULL_INDEX {
            stats.oov += 1;
        }
        out.push(idx);
    }
    out.extend(std::iter::repeat_n(NULL_INDEX, width - tokens.len()));

    Ok(tokens.len() as u32)
}

#[derive(Debug, Default)]
struct OovStats {
    total: usize,
    oov: usize,
}

impl OovStats {
    fn rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.oov as f64 / self.total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::Label;
    use crate::session::Session;

    fn words(s: &str) -> Vec<String> {
        s.split_whitespace().map(str::to_string).collect()
    }

    fn pair(p: &str, h: &str) -> SentencePair {
        SentencePair::new(words(p), words(h), Label::Neutral)
    }

    fn vocab() -> WordEmbeddingTable {
        let tokens = words("cat dog runs");
        let vectors = vec![vec![0.1, 0.2], vec![0.3, 0.4], vec![0.5, 0.6]];
        WordEmbeddingTable::from_vectors(tokens, vectors, &mut Session::new(0)).unwrap()
    }

    #[test]
    fn test_max_size_spans_all_corpora() {
        let train = vec![pair("a b c", "a")];
        let valid = vec![pair("a", "a b c d")];

        let dims = max_size(&[&train, &valid]);
        assert_eq!((dims.premise, dims.hypothesis), (4, 5));
        assert_eq!(max_size(&[&valid, &train]), dims);
    }

    #[test]
    fn test_max_size_empty() {
        assert_eq!(max_size(&[]), SentenceDims::from_longest(0, 0));
    }

    #[test]
    fn test_encode_pads_and_maps_oov() {
        let vocab = vocab();
        let pairs = vec![pair("cat runs", "bird runs"), pair("dog", "cat")];
        let dims = max_size(&[&pairs]);
        let data = encode(&pairs, &vocab, dims).unwrap();

        assert_eq!(data.shape1(), (2, 3));
        assert_eq!(data.premise(0), &[1, 3, 0]);
        assert_eq!(data.premise(1), &[2, 0, 0]);
        assert_eq!(data.hypothesis(0), &[0, 3, 0]);
        assert_eq!(data.lengths1(), &[2, 1]);
        assert_eq!(data.lengths2(), &[2, 1]);
        assert_eq!(data.labels(), &[0, 0]);
    }

    #[test]
    fn test_encode_rejects_unscanned_sentence() {
        let vocab = vocab();
        let short = vec![pair("cat", "dog")];
        let long = vec![pair("cat dog runs", "dog")];
        let dims = max_size(&[&short]);

        match encode(&long, &vocab, dims) {
            Err(EntailError::ShapeMismatch { what, .. }) => assert_eq!(what, "sentence1"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_encode_zero_width_is_rejected() {
        let vocab = vocab();
        let pairs = vec![pair("cat", "dog")];
        let dims = SentenceDims {
            premise: 0,
            hypothesis: 0,
        };

        let err = encode(&pairs, &vocab, dims).unwrap_err();
        assert!(matches!(err, EntailError::ShapeMismatch { .. }));
        assert!(err.to_string().contains("expected [0], got [1]"));
    }

    #[test]
    fn test_decode_roundtrip() {
        let vocab = vocab();
        let pairs = vec![pair("cat runs", "dog unknown runs")];
        let data = encode(&pairs, &vocab, max_size(&[&pairs])).unwrap();

        assert_eq!(
            decode(data.premise(0), data.lengths1()[0], &vocab),
            words("cat runs")
        );
        assert_eq!(
            decode(data.hypothesis(0), data.lengths2()[0], &vocab),
            vec!["dog", "<null>", "runs"]
        );
    }
}

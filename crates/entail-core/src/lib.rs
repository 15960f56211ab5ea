//! # Entail Core
//!
//! Building blocks for training a decomposable-attention natural language
//! inference model: pretrained embedding tables, SNLI-style corpus reading,
//! the two-phase index encoder, mini-batch tensors and the network itself.
//!
//! ## Quick Start
//!
//! ```rust
//! use entail_core::{Label, SentencePair, Session, WordEmbeddingTable, encoder};
//!
//! let mut session = Session::new(42);
//! let words = vec!["cat".to_string(), "runs".to_string()];
//! let vectors = vec![vec![0.1, 0.2], vec![0.3, 0.4]];
//! let table = WordEmbeddingTable::from_vectors(words, vectors, &mut session).unwrap();
//!
//! let premise = vec!["cat".to_string(), "runs".to_string()];
//! let pair = SentencePair::new(premise, vec!["cat".to_string()], Label::Entailment);
//! let train = vec![pair];
//! let dims = encoder::max_size(&[&train]);
//! let data = encoder::encode(&train, &table, dims).unwrap();
//!
//! assert_eq!(table.len(), 3);
//! assert_eq!(data.premise(0), &[1, 2, 0]);
//! ```
pub mod corpus;
pub mod dataset;
pub mod embeddings;
pub mod encoder;
pub mod error;
pub mod model;
pub mod session;
pub mod tokenizer;

// Re-export primary API
pub use corpus::{CorpusFormat, CorpusReader, Label, SentencePair};
pub use dataset::{Batch, EncodedDataset, SentenceDims};
pub use embeddings::{NULL_INDEX, NULL_TOKEN, WORD_DICT_FILE, WordEmbeddingTable, read_word_dict};
pub use error::{EntailError, Result};
pub use model::{DecomposableAttention, ModelConfig, Mode};
pub use session::Session;
pub use tokenizer::Tokenizer;

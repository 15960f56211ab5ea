//! # Sentence Tokenizer
//!
//! Splits corpus sentences into lowercase word and punctuation tokens so
//! they line up with the keys of a pretrained embedding vocabulary.

use regex::Regex;

use crate::error::Result;

/// Words (with internal apostrophes or hyphens kept together) or single
/// non-space symbols.
const TOKEN_PATTERN: &str = r"[\p{L}\p{N}]+(?:['’-][\p{L}\p{N}]+)*|[^\s\p{L}\p{N}]";

/// Regex-based tokenizer for English sentences.
#[derive(Debug, Clone)]
pub struct Tokenizer {
    pattern: Regex,
    lowercase: bool,
}

impl Tokenizer {
    /// Create a lowercasing tokenizer.
    pub fn new() -> Result<Self> {
        Ok(Self {
            pattern: Regex::new(TOKEN_PATTERN)?,
            lowercase: true,
        })
    }

    /// Keep the original casing of tokens.
    pub fn preserve_case(mut self) -> Self {
        self.lowercase = false;
        self
    }

    /// Tokenize a sentence.
    ///
    /// # Examples
    /// ```
    /// use entail_core::tokenizer::Tokenizer;
    ///
    /// let tokens = Tokenizer::new().unwrap().tokenize("A man isn't sleeping.");
    /// assert_eq!(tokens, vec!["a", "man", "isn't", "sleeping", "."]);
    /// ```
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        self.pattern
            .find_iter(text)
            .map(|m| {
                if self.lowercase {
                    m.as_str().to_lowercase()
                } else {
                    m.as_str().to_string()
                }
            })
            .collect()
    }
}

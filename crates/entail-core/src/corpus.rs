//! # Corpus Reader
//!
//! Reads labeled sentence pairs from SNLI-style JSON-lines files or from
//! tab-separated files with `sentence1<TAB>sentence2<TAB>label` columns.
//!
//! Label policy, identical for every file read: `neutral`, `entailment` and
//! `contradiction` are accepted in any case; the SNLI no-consensus marker `-`
//! drops the pair; anything else is a format error.

use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EntailError, Result};
use crate::tokenizer::Tokenizer;

/// Label marking a pair without annotator consensus.
const NO_CONSENSUS_LABEL: &str = "-";

/// Relationship between premise and hypothesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Neutral,
    Entailment,
    Contradiction,
}

impl Label {
    /// Number of distinct labels.
    pub const NUM_CLASSES: usize = 3;

    /// All labels in index order.
    pub const ALL: [Label; Self::NUM_CLASSES] =
        [Label::Neutral, Label::Entailment, Label::Contradiction];

    /// Class id used as the training target.
    pub fn id(self) -> u32 {
        match self {
            Label::Neutral => 0,
            Label::Entailment => 1,
            Label::Contradiction => 2,
        }
    }

    pub fn from_id(id: u32) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }

    /// Parse a label string. `Ok(None)` means the pair should be skipped.
    pub fn parse(raw: &str) -> std::result::Result<Option<Self>, String> {
        let raw = raw.trim();
        if raw == NO_CONSENSUS_LABEL {
            return Ok(None);
        }
        match raw.to_ascii_lowercase().as_str() {
            "neutral" => Ok(Some(Label::Neutral)),
            "entailment" => Ok(Some(Label::Entailment)),
            "contradiction" => Ok(Some(Label::Contradiction)),
            _ => Err(format!("unknown label {raw:?}")),
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Label::Neutral => "neutral",
            Label::Entailment => "entailment",
            Label::Contradiction => "contradiction",
        };
        f.write_str(name)
    }
}

/// A tokenized premise/hypothesis pair with its gold label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentencePair {
    pub premise: Vec<String>,
    pub hypothesis: Vec<String>,
    pub label: Label,
}

impl SentencePair {
    pub fn new(premise: Vec<String>, hypothesis: Vec<String>, label: Label) -> Self {
        Self {
            premise,
            hypothesis,
            label,
        }
    }
}

/// On-disk layout of a corpus file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorpusFormat {
    JsonLines,
    Tsv,
}

impl CorpusFormat {
    /// `.tsv` files are tab-separated; everything else is read as JSON-lines.
    pub fn detect(path: &Path) -> Self {
        let is_tsv = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("tsv"));
        if is_tsv {
            CorpusFormat::Tsv
        } else {
            CorpusFormat::JsonLines
        }
    }
}

#[derive(Deserialize)]
struct SnliRecord {
    sentence1: String,
    sentence2: String,
    gold_label: String,
}

/// Reads corpus files into [`SentencePair`]s.
pub struct CorpusReader {
    tokenizer: Tokenizer,
    format: Option<CorpusFormat>,
}

impl CorpusReader {
    /// Reader that detects the format from the file extension.
    pub fn new() -> Result<Self> {
        Ok(Self {
            tokenizer: Tokenizer::new()?,
            format: None,
        })
    }

    /// Force a format instead of detecting it.
    pub fn with_format(mut self, format: CorpusFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// Read every labeled pair of `path`, in file order.
    pub fn read<P: AsRef<Path>>(&self, path: P) -> Result<Vec<SentencePair>> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| EntailError::io(path, e))?;
        let format = self.format.unwrap_or_else(|| CorpusFormat::detect(path));
        self.read_from(BufReader::new(file), path, format)
    }

    /// Read pairs from a buffered reader. `origin` is only used in errors.
    pub fn read_from<R: BufRead>(
        &self,
        reader: R,
        origin: &Path,
        format: CorpusFormat,
    ) -> Result<Vec<SentencePair>> {
        let mut pairs = Vec::new();
        let mut skipped = 0usize;

        for (line_idx, line) in reader.lines().enumerate() {
            let line_no = line_idx + 1;
            let line = line.map_err(|e| EntailError::io(origin, e))?;
            if line.trim().is_empty() {
                continue;
            }

            let (sentence1, sentence2, raw_label) = match format {
                CorpusFormat::JsonLines => {
                    let record: SnliRecord = serde_json::from_str(&line)
                        .map_err(|e| EntailError::format(origin, line_no, e.to_string()))?;
                    (record.sentence1, record.sentence2, record.gold_label)
                }
                CorpusFormat::Tsv => {
                    let columns: Vec<&str> = line.split('\t').collect();
                    if columns.len() < 3 {
                        let found = columns.len();
                        return Err(EntailError::format(
                            origin,
                            line_no,
                            format!("expected 3 tab-separated columns, found {found}"),
                        ));
                    }
                    if line_no == 1 && is_tsv_header(columns[2]) {
                        continue;
                    }
                    (
                        columns[0].to_string(),
                        columns[1].to_string(),
                        columns[2].to_string(),
                    )
                }
            };

            let label = match Label::parse(&raw_label) {
                Ok(Some(label)) => label,
                Ok(None) => {
                    skipped += 1;
                    continue;
                }
                Err(message) => return Err(EntailError::format(origin, line_no, message)),
            };

            pairs.push(SentencePair::new(
                self.tokenizer.tokenize(&sentence1),
                self.tokenizer.tokenize(&sentence2),
                label,
            ));
        }

        if skipped > 0 {
            debug!(
                "Skipped {} pairs without gold label in {}",
                skipped,
                origin.display()
            );
        }

        Ok(pairs)
    }
}

fn is_tsv_header(label_column: &str) -> bool {
    matches!(label_column.trim(), "label" | "gold_label")
}

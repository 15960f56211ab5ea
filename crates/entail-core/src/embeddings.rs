//! # Word Embedding Table
//!
//! Loads pretrained word vectors from a whitespace-delimited text file
//! (`token v1 v2 … vd` per line) and reserves index 0 for the synthetic
//! null token used for padding and "no alignment".

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use candle_core::{Device, Tensor};
use tracing::{debug, warn};

use crate::error::{EntailError, Result};
use crate::session::Session;

/// Token stored at [`NULL_INDEX`].
pub const NULL_TOKEN: &str = "<null>";

/// Reserved index for padding, unknown words and the null alignment anchor.
pub const NULL_INDEX: u32 = 0;

/// File name of the persisted vocabulary inside a save directory.
pub const WORD_DICT_FILE: &str = "word-dict.txt";

/// Standard deviation for the randomly initialized null vector.
const NULL_VECTOR_STD: f32 = 0.1;

/// Token → index mapping plus a dense `(len × dim)` matrix.
#[derive(Debug, Clone)]
pub struct WordEmbeddingTable {
    word_dict: HashMap<String, u32>,
    words: Vec<String>,
    dim: usize,
    matrix: Vec<f32>,
}

impl WordEmbeddingTable {
    /// Load a text embedding file.
    ///
    /// # Errors
    /// `Io` if the file cannot be opened, `Format` if a line is malformed or
    /// the vector dimension changes between lines.
    pub fn load_text<P: AsRef<Path>>(path: P, session: &mut Session) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| EntailError::io(path, e))?;
        Self::from_reader(BufReader::new(file), path, session)
    }

    /// Parse embeddings from any buffered reader. `origin` is only used in errors.
    ///
    /// A leading word2vec `count dim` line is skipped when the row after it
    /// really has `dim` values; otherwise it is read as an ordinary entry.
    pub fn from_reader<R: BufRead>(
        reader: R,
        origin: &Path,
        session: &mut Session,
    ) -> Result<Self> {
        let mut rows = RowCollector::new(origin);
        let mut header: Option<(usize, String, usize)> = None;
        let mut started = false;

        for (line_idx, line) in reader.lines().enumerate() {
            let line_no = line_idx + 1;
            let line = line.map_err(|e| EntailError::io(origin, e))?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if !started {
                started = true;
                if let Some(dim) = word2vec_header_dim(line) {
                    header = Some((line_no, line.to_string(), dim));
                    continue;
                }
            }

            if let Some((header_no, header_line, dim)) = header.take() {
                if line.split_whitespace().count() == dim + 1 {
                    debug!("Skipping word2vec header line: {}", header_line);
                } else {
                    rows.push_line(header_no, &header_line)?;
                }
            }
            rows.push_line(line_no, line)?;
        }

        if let Some((header_no, header_line, _)) = header {
            rows.push_line(header_no, &header_line)?;
        }

        rows.finish(session)
    }

    /// Build a table from in-memory rows, prepending the null token.
    ///
    /// `vectors` holds one row per word, each of length `dim`.
    pub fn from_vectors(
        words: Vec<String>,
        vectors: Vec<Vec<f32>>,
        session: &mut Session,
    ) -> Result<Self> {
        let dim = vectors.first().map_or(0, Vec::len);
        if dim == 0 || words.len() != vectors.len() {
            return Err(EntailError::Config(format!(
                "need one non-empty vector per word ({} words, {} vectors)",
                words.len(),
                vectors.len()
            )));
        }
        if let Some(bad) = vectors.iter().position(|v| v.len() != dim) {
            return Err(EntailError::ShapeMismatch {
                what: "embedding row",
                expected: vec![dim],
                actual: vec![vectors[bad].len()],
            });
        }
        let rows = vectors.into_iter().flatten().collect();
        Ok(Self::with_null_row(words, rows, dim, session))
    }

    fn with_null_row(
        words: Vec<String>,
        rows: Vec<f32>,
        dim: usize,
        session: &mut Session,
    ) -> Self {
        let mut matrix = Vec::with_capacity(rows.len() + dim);
        matrix.extend((0..dim).map(|_| session.normal(NULL_VECTOR_STD)));
        matrix.extend(rows);

        let mut all_words = Vec::with_capacity(words.len() + 1);
        all_words.push(NULL_TOKEN.to_string());
        all_words.extend(words);

        let word_dict = all_words
            .iter()
            .enumerate()
            .map(|(idx, word)| (word.clone(), idx as u32))
            .collect();

        Self {
            word_dict,
            words: all_words,
            dim,
            matrix,
        }
    }

    /// Number of rows, including the null token.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Always false: the null token is present in every table.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// `(len, dim)` of the matrix.
    pub fn shape(&self) -> (usize, usize) {
        (self.len(), self.dim)
    }

    /// Index of `word`, if it is in the vocabulary.
    pub fn index_of(&self, word: &str) -> Option<u32> {
        self.word_dict.get(word).copied()
    }

    /// Word stored at `index`.
    pub fn word(&self, index: u32) -> Option<&str> {
        self.words.get(index as usize).map(String::as_str)
    }

    /// Vector for row `index`.
    pub fn vector(&self, index: u32) -> Option<&[f32]> {
        let start = index as usize * self.dim;
        self.matrix.get(start..start + self.dim)
    }

    pub fn word_dict(&self) -> &HashMap<String, u32> {
        &self.word_dict
    }

    /// Flat row-major matrix.
    pub fn matrix(&self) -> &[f32] {
        &self.matrix
    }

    /// Copy the matrix into a `(len, dim)` tensor on `device`.
    pub fn to_tensor(&self, device: &Device) -> Result<Tensor> {
        Ok(Tensor::from_slice(&self.matrix, self.shape(), device)?)
    }

    /// Write the vocabulary to `dir/word-dict.txt`, one word per line in index order.
    pub fn write_word_dict<P: AsRef<Path>>(&self, dir: P) -> Result<PathBuf> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|e| EntailError::io(dir, e))?;
        let path = dir.join(WORD_DICT_FILE);
        let file = File::create(&path).map_err(|e| EntailError::io(&path, e))?;
        let mut writer = BufWriter::new(file);
        for word in &self.words {
            writeln!(writer, "{word}").map_err(|e| EntailError::io(&path, e))?;
        }
        writer.flush().map_err(|e| EntailError::io(&path, e))?;
        Ok(path)
    }
}

/// Read a vocabulary written by [`WordEmbeddingTable::write_word_dict`].
pub fn read_word_dict<P: AsRef<Path>>(path: P) -> Result<HashMap<String, u32>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| EntailError::io(path, e))?;
    Ok(content
        .lines()
        .enumerate()
        .map(|(idx, word)| (word.to_string(), idx as u32))
        .collect())
}

/// Rows of a text embedding file as they are accepted.
struct RowCollector<'a> {
    origin: &'a Path,
    words: Vec<String>,
    seen: HashSet<String>,
    rows: Vec<f32>,
    dim: Option<usize>,
    duplicates: usize,
}

impl<'a> RowCollector<'a> {
    fn new(origin: &'a Path) -> Self {
        Self {
            origin,
            words: Vec::new(),
            seen: HashSet::new(),
            rows: Vec::new(),
            dim: None,
            duplicates: 0,
        }
    }

    fn push_line(&mut self, line_no: usize, line: &str) -> Result<()> {
        let mut fields = line.split_whitespace();
        let Some(token) = fields.next() else {
            return Ok(());
        };
        let values: Vec<&str> = fields.collect();

        if values.is_empty() {
            return Err(EntailError::format(
                self.origin,
                line_no,
                format!("token {token:?} has no vector values"),
            ));
        }

        match self.dim {
            None => self.dim = Some(values.len()),
            Some(d) if d != values.len() => {
                return Err(EntailError::format(
                    self.origin,
                    line_no,
                    format!(
                        "inconsistent dimension: expected {d} values, found {}",
                        values.len()
                    ),
                ));
            }
            Some(_) => {}
        }

        if token == NULL_TOKEN || !self.seen.insert(token.to_string()) {
            self.duplicates += 1;
            return Ok(());
        }

        for value in &values {
            let parsed: f32 = value.parse().map_err(|_| {
                EntailError::format(self.origin, line_no, format!("invalid float {value:?}"))
            })?;
            self.rows.push(parsed);
        }
        self.words.push(token.to_string());
        Ok(())
    }

    fn finish(self, session: &mut Session) -> Result<WordEmbeddingTable> {
        let dim = self
            .dim
            .ok_or_else(|| EntailError::format(self.origin, 0, "embedding file is empty"))?;
        if self.duplicates > 0 {
            warn!(
                "Ignored {} duplicate or reserved tokens in {}",
                self.duplicates,
                self.origin.display()
            );
        }
        Ok(WordEmbeddingTable::with_null_row(self.words, self.rows, dim, session))
    }
}

/// Declared dimension if `line` looks like a word2vec `count dim` header.
fn word2vec_header_dim(line: &str) -> Option<usize> {
    let mut fields = line.split_whitespace();
    let (count, dim) = (fields.next()?, fields.next()?);
    if fields.next().is_some() {
        return None;
    }
    count.parse::<usize>().ok()?;
    dim.parse::<usize>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<WordEmbeddingTable> {
        let mut session = Session::new(1);
        WordEmbeddingTable::from_reader(text.as_bytes(), Path::new("vectors.txt"), &mut session)
    }

    #[test]
    fn test_reserves_null_index() {
        let table = parse("cat 0.1 0.2\ndog 0.3 0.4\nruns 0.5 0.6\n").unwrap();

        assert_eq!(table.len(), 4);
        assert_eq!(table.shape(), (4, 2));
        assert_eq!(table.matrix().len(), 8);
        assert_eq!(table.index_of(NULL_TOKEN), Some(NULL_INDEX));
        assert_eq!(table.index_of("cat"), Some(1));
        assert_eq!(table.index_of("runs"), Some(3));
        assert_eq!(table.vector(2), Some(&[0.3f32, 0.4][..]));
    }

    #[test]
    fn test_inconsistent_dimension() {
        let err = parse("cat 0.1 0.2\ndog 0.3\n").unwrap_err();
        match err {
            EntailError::Format { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_invalid_float() {
        assert!(matches!(
            parse("cat 0.1 abc\n"),
            Err(EntailError::Format { line: 1, .. })
        ));
    }

    #[test]
    fn test_token_without_values() {
        assert!(matches!(parse("cat\n"), Err(EntailError::Format { .. })));
    }

    #[test]
    fn test_empty_file() {
        assert!(matches!(parse("\n\n"), Err(EntailError::Format { .. })));
    }

    #[test]
    fn test_skips_header_and_duplicates() {
        let table = parse("2 3\ncat 1 2 3\n\ncat 4 5 6\ndog 7 8 9\n").unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.vector(1), Some(&[1.0f32, 2.0, 3.0][..]));
    }

    #[test]
    fn test_numeric_first_entry_is_not_a_header() {
        let table = parse("1 5\ncat 0.3\n").unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.index_of("1"), Some(1));
        assert_eq!(table.vector(1), Some(&[5.0f32][..]));
        assert_eq!(table.index_of("cat"), Some(2));

        let single = parse("7 2\n").unwrap();
        assert_eq!(single.index_of("7"), Some(1));
        assert_eq!(single.dim(), 1);
    }

    #[test]
    fn test_null_vector_is_seeded() {
        let a = parse("cat 0.1 0.2\n").unwrap();
        let b = parse("cat 0.1 0.2\n").unwrap();
        assert_eq!(a.vector(NULL_INDEX), b.vector(NULL_INDEX));
    }

    #[test]
    fn test_word_dict_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let table = parse("cat 0.1\ndog 0.2\n").unwrap();
        let path = table.write_word_dict(dir.path()).unwrap();

        let dict = read_word_dict(path).unwrap();
        assert_eq!(&dict, table.word_dict());
    }
}

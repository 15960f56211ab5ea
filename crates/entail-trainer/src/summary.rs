//! Time-series metric events for external monitoring, one JSON object per line.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Event files are named `events.<unix-millis>.jsonl`, one per run.
pub const EVENTS_PREFIX: &str = "events";

/// A single scalar observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryEvent {
    pub step: usize,
    pub tag: String,
    pub value: f32,
    /// Seconds since the Unix epoch.
    pub wall_time: f64,
}

/// Writes [`SummaryEvent`]s to a fresh events file in the log directory.
pub struct SummaryWriter {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl SummaryWriter {
    pub fn new<P: AsRef<Path>>(log_dir: P) -> Result<Self> {
        let log_dir = log_dir.as_ref();
        std::fs::create_dir_all(log_dir)
            .with_context(|| format!("creating log directory {}", log_dir.display()))?;
        let (path, file) = create_events_file(log_dir)?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn scalar(&mut self, step: usize, tag: &str, value: f32) -> Result<()> {
        let event = SummaryEvent {
            step,
            tag: tag.to_string(),
            value,
            wall_time: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs_f64())
                .unwrap_or_default(),
        };
        serde_json::to_writer(&mut self.writer, &event)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer
            .flush()
            .with_context(|| format!("flushing {}", self.path.display()))
    }
}

fn create_events_file(log_dir: &Path) -> Result<(PathBuf, File)> {
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let mut attempt = 0u32;
    loop {
        let name = match attempt {
            0 => format!("{EVENTS_PREFIX}.{stamp}.jsonl"),
            n => format!("{EVENTS_PREFIX}.{stamp}_{n}.jsonl"),
        };
        let path = log_dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => return Err(e).with_context(|| format!("creating {}", path.display())),
        }
    }
}

/// Events files in `log_dir`, oldest run first.
pub fn event_files<P: AsRef<Path>>(log_dir: P) -> Result<Vec<PathBuf>> {
    let log_dir = log_dir.as_ref();
    let entries =
        std::fs::read_dir(log_dir).with_context(|| format!("listing {}", log_dir.display()))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let is_events = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with(EVENTS_PREFIX) && name.ends_with(".jsonl"));
        if is_events {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Read every event of one events file.
pub fn read_events<P: AsRef<Path>>(path: P) -> Result<Vec<SummaryEvent>> {
    let path = path.as_ref();
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(Into::into))
        .collect()
}

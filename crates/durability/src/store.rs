//! Append-only span log
//!
//! One [`SpanRecord`] per line in `{run_dir}/traces.jsonl`. The log is the
//! single source of truth for episode materialization and is never rewritten.
//!
//! ## Thread Safety
//!
//! Every operation takes the same store lock:
//! - `append` writes a whole line while holding it, so concurrent callers
//!   never interleave partial lines
//! - `scan_all` flushes the in-process buffer and reads under it, so it sees
//!   every append that has returned and none that are still in flight
//!
//! ## Cost
//!
//! `scan_all` is O(total spans ever written). It runs once per episode
//! materialization.

use crate::mode::DurabilityMode;
use agenttrace_core::{Error, Result, SpanRecord};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::debug;

/// File name of the span log inside a run directory
pub const TRACES_FILE: &str = "traces.jsonl";

/// Durable, thread-safe span log
pub struct SpanStore {
    run_dir: PathBuf,
    path: PathBuf,
    mode: DurabilityMode,
    state: Mutex<StoreState>,
}

struct StoreState {
    /// Opened lazily on first append
    writer: Option<BufWriter<File>>,
    /// Appends since the last fsync
    unsynced: usize,
    last_sync: Instant,
    closed: bool,
}

impl SpanStore {
    /// Open the span log for `run_dir`.
    ///
    /// No file or directory is created until the first append.
    pub fn open(run_dir: impl AsRef<Path>, mode: DurabilityMode) -> Result<Self> {
        mode.validate()?;
        let run_dir = run_dir.as_ref().to_path_buf();
        let path = run_dir.join(TRACES_FILE);
        Ok(SpanStore {
            run_dir,
            path,
            mode,
            state: Mutex::new(StoreState {
                writer: None,
                unsynced: 0,
                last_sync: Instant::now(),
                closed: false,
            }),
        })
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory holding the log.
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Durability mode in effect.
    pub fn durability_mode(&self) -> DurabilityMode {
        self.mode
    }

    /// Append one record as one line.
    pub fn append(&self, record: &SpanRecord) -> Result<()> {
        let line = encode_line(record)?;
        let mut state = self.state.lock();
        self.write_line(&mut state, &line)
    }

    /// Append several records under a single lock acquisition.
    ///
    /// Records land in slice order; an error stops the batch after the
    /// records already written.
    pub fn append_all(&self, records: &[SpanRecord]) -> Result<()> {
        let lines = records
            .iter()
            .map(encode_line)
            .collect::<Result<Vec<_>>>()?;
        let mut state = self.state.lock();
        for line in &lines {
            self.write_line(&mut state, line)?;
        }
        Ok(())
    }

    /// Read every record in append order.
    ///
    /// Blank lines are skipped. A non-blank line that fails to parse fails
    /// the whole call with [`Error::Corrupt`]. A log that was never written
    /// yields an empty vector.
    pub fn scan_all(&self) -> Result<Vec<SpanRecord>> {
        let mut state = self.state.lock();
        if let Some(writer) = state.writer.as_mut() {
            writer.flush()?;
        }

        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str::<SpanRecord>(&line).map_err(|e| Error::Corrupt {
                line: idx + 1,
                reason: e.to_string(),
            })?;
            records.push(record);
        }
        Ok(records)
    }

    /// Flush buffered lines and fsync the log.
    pub fn flush(&self) -> Result<()> {
        let mut state = self.state.lock();
        Self::sync(&mut state)
    }

    /// Flush and release the log file.
    ///
    /// Idempotent. Appends after close fail with [`Error::Closed`]; scans
    /// still read what was written.
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Ok(());
        }
        Self::sync(&mut state)?;
        state.writer = None;
        state.closed = true;
        debug!("Closed span log {}", self.path.display());
        Ok(())
    }

    /// Check whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn write_line(&self, state: &mut StoreState, line: &[u8]) -> Result<()> {
        if state.closed {
            return Err(Error::Closed("span store"));
        }
        if state.writer.is_none() {
            state.writer = Some(self.open_writer()?);
        }
        if let Some(writer) = state.writer.as_mut() {
            writer.write_all(line)?;
        }
        state.unsynced += 1;

        let due = match self.mode {
            DurabilityMode::Strict => true,
            DurabilityMode::Batched {
                interval_ms,
                batch_size,
            } => {
                state.unsynced >= batch_size
                    || state.last_sync.elapsed() >= Duration::from_millis(interval_ms)
            }
        };
        if due {
            Self::sync(state)?;
        }
        Ok(())
    }

    fn open_writer(&self) -> Result<BufWriter<File>> {
        fs::create_dir_all(&self.run_dir)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        debug!("Opened span log {}", self.path.display());
        Ok(BufWriter::new(file))
    }

    fn sync(state: &mut StoreState) -> Result<()> {
        if let Some(writer) = state.writer.as_mut() {
            writer.flush()?;
            writer.get_ref().sync_data()?;
        }
        state.unsynced = 0;
        state.last_sync = Instant::now();
        Ok(())
    }
}

impl std::fmt::Debug for SpanStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpanStore")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .finish()
    }
}

fn encode_line(record: &SpanRecord) -> Result<Vec<u8>> {
    let mut line = serde_json::to_vec(record)?;
    line.push(b'\n');
    Ok(line)
}

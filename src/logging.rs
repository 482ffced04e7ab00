//! Logging setup
//!
//! Installs the global `tracing` subscriber: an `EnvFilter` (default
//! `app_storage=info`), a stderr fmt layer, and optionally a plain-text file
//! layer writing through a size-rotated [`RotatingFileWriter`].

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::Config;
use crate::error::{AppError, FailLoud, Result};

pub const DEFAULT_FILTER: &str = "app_storage=info";
pub const LOG_FILE_NAME: &str = "app.log";

// == Rotating File Writer ==
/// Appends to `<dir>/app.log`, shifting it to `app.log.1` … `app.log.N`
/// once it grows past `max_bytes`. The oldest file beyond `max_files` is dropped.
#[derive(Clone, Debug)]
pub struct RotatingFileWriter {
    inner: Arc<Mutex<RotatingState>>,
}

#[derive(Debug)]
struct RotatingState {
    dir: PathBuf,
    max_bytes: u64,
    max_files: usize,
    file: File,
    written: u64,
}

impl RotatingFileWriter {
    pub fn open(dir: impl Into<PathBuf>, max_bytes: u64, max_files: usize) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let file = open_append(&dir)?;
        let written = file.metadata()?.len();
        Ok(Self {
            inner: Arc::new(Mutex::new(RotatingState {
                dir,
                max_bytes: max_bytes.max(1),
                max_files,
                file,
                written,
            })),
        })
    }

    pub fn current_path(&self) -> PathBuf {
        self.inner.lock().dir.join(LOG_FILE_NAME)
    }
}

impl RotatingState {
    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        if self.max_files == 0 {
            // No history kept; start the live file over.
            self.file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(self.dir.join(LOG_FILE_NAME))?;
            self.written = 0;
            return Ok(());
        }

        let oldest = rotated_path(&self.dir, self.max_files);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        for index in (1..self.max_files).rev() {
            let from = rotated_path(&self.dir, index);
            if from.exists() {
                fs::rename(&from, rotated_path(&self.dir, index + 1))?;
            }
        }
        fs::rename(self.dir.join(LOG_FILE_NAME), rotated_path(&self.dir, 1))?;

        self.file = open_append(&self.dir)?;
        self.written = 0;
        Ok(())
    }
}

impl Write for RotatingFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.inner.lock();
        if state.written > 0 && state.written + buf.len() as u64 > state.max_bytes {
            state.rotate()?;
        }
        let n = state.file.write(buf)?;
        state.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().file.flush()
    }
}

impl<'a> MakeWriter<'a> for RotatingFileWriter {
    type Writer = RotatingFileWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn open_append(dir: &Path) -> io::Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(LOG_FILE_NAME))
}

fn rotated_path(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("{}.{}", LOG_FILE_NAME, index))
}

// == Subscriber Setup ==
/// Installs the global subscriber. `RUST_LOG` overrides the default filter.
pub fn init_tracing(config: &Config) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());

    let file_layer = match &config.log_dir {
        Some(dir) => {
            let writer = RotatingFileWriter::open(dir, config.log_max_bytes, config.log_max_files)
                .storage_context("open log file")?;
            Some(fmt::layer().with_ansi(false).with_writer(writer))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .try_init()
        .map_err(|e| AppError::unknown(format!("install tracing subscriber: {}", e)))
}

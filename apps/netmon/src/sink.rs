//! Destinations for status-change events and flush summaries.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::error;

/// Clears the current console line (used while a countdown is shown)
const CLEAR_LINE: &str = "\r\x1b[2K";

#[async_trait::async_trait]
pub trait LogSink: Send + Sync {
    /// Append one line. Failures are reported, never returned.
    async fn log(&self, line: &str);

    /// Show the seconds left until the next flush
    async fn countdown(&self, _remaining_secs: u64) {}
}

type ConsoleWriter = Box<dyn Fn() -> Box<dyn Write> + Send + Sync>;

/// Append-only log file mirrored to stdout
pub struct FileLogSink {
    path: PathBuf,
    file: Mutex<Option<File>>,
    console: Option<ConsoleWriter>,
    countdown_shown: AtomicBool,
}

impl FileLogSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            file: Mutex::new(None),
            console: Some(Box::new(|| Box::new(std::io::stdout().lock()) as Box<dyn Write>)),
            countdown_shown: AtomicBool::new(false),
        }
    }

    /// Write to the file only
    pub fn without_console(mut self) -> Self {
        self.console = None;
        self
    }

    /// Mirror lines to the writer returned by `make_writer` instead of stdout
    pub fn with_console<W, F>(mut self, make_writer: F) -> Self
    where
        W: Write + 'static,
        F: Fn() -> W + Send + Sync + 'static,
    {
        self.console = Some(Box::new(move || Box::new(make_writer()) as Box<dyn Write>));
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(file: &mut Option<File>, path: &Path, line: &str) -> std::io::Result<()> {
        if file.is_none() {
            *file = Some(OpenOptions::new().create(true).append(true).open(path).await?);
        }

        let Some(handle) = file.as_mut() else {
            return Ok(());
        };
        let mut bytes = Vec::with_capacity(line.len() + 1);
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');
        handle.write_all(&bytes).await?;
        handle.flush().await
    }

    fn mirror(&self, console: &ConsoleWriter, line: &str) -> std::io::Result<()> {
        let mut out = console();
        if self.countdown_shown.swap(false, Ordering::Relaxed) {
            write!(out, "{CLEAR_LINE}")?;
        }
        writeln!(out, "{line}")?;
        out.flush()
    }
}

#[async_trait::async_trait]
impl LogSink for FileLogSink {
    async fn log(&self, line: &str) {
        // Held across file and console so lines never interleave
        let mut file = self.file.lock().await;

        if let Err(e) = Self::append(&mut file, &self.path, line).await {
            error!("Error writing to the log file {}: {}", self.path.display(), e);
            // Reopen on the next write
            *file = None;
        }

        if let Some(console) = &self.console {
            if let Err(e) = self.mirror(console, line) {
                error!("Error writing to the console: {}", e);
            }
        }
    }

    async fn countdown(&self, remaining_secs: u64) {
        let Some(console) = &self.console else {
            return;
        };

        let _file = self.file.lock().await;
        let shown = {
            let mut out = console();
            write!(out, "{CLEAR_LINE}Time until next log flush: {remaining_secs}s").and_then(|_| out.flush())
        };
        if shown.is_ok() {
            self.countdown_shown.store(true, Ordering::Relaxed);
        }
    }
}

/// Keeps lines in memory; handy for embedding and tests
#[derive(Default)]
pub struct MemoryLogSink {
    lines: std::sync::Mutex<Vec<String>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|lines| lines.clone()).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl LogSink for MemoryLogSink {
    async fn log(&self, line: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line.to_string());
        }
    }
}

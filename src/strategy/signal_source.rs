//! Where trading signals come from.
//!
//! Signal generation itself lives outside this crate; these sources only
//! deliver already-computed signals to the session.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Split};
use tokio::sync::mpsc;
use tracing::warn;

use crate::domain::Signal;
use crate::error::Result;

/// A stream of signals, consumed once
#[async_trait]
pub trait SignalSource: Send {
    /// Short label for logs
    fn name(&self) -> &str;

    /// Next signal, or `None` when the source is exhausted
    async fn next_signal(&mut self) -> Option<Signal>;
}

/// Signals pushed by another task
pub struct ChannelSignalSource {
    rx: mpsc::Receiver<Signal>,
}

impl ChannelSignalSource {
    pub fn new(buffer: usize) -> (mpsc::Sender<Signal>, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        (tx, Self { rx })
    }
}

#[async_trait]
impl SignalSource for ChannelSignalSource {
    fn name(&self) -> &str {
        "channel"
    }

    async fn next_signal(&mut self) -> Option<Signal> {
        self.rx.recv().await
    }
}

/// Fixed list of signals, replayed in order
pub struct ReplaySignalSource {
    signals: VecDeque<Signal>,
}

impl ReplaySignalSource {
    pub fn new(signals: Vec<Signal>) -> Self {
        Self {
            signals: signals.into(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.signals.len()
    }
}

#[async_trait]
impl SignalSource for ReplaySignalSource {
    fn name(&self) -> &str {
        "replay"
    }

    async fn next_signal(&mut self) -> Option<Signal> {
        self.signals.pop_front()
    }
}

/// One JSON signal per line; malformed or non-UTF-8 lines are logged and
/// skipped. Only an I/O failure of the underlying reader ends the feed.
pub struct JsonlSignalSource<R> {
    label: String,
    lines: Split<R>,
    line_no: usize,
}

impl JsonlSignalSource<BufReader<tokio::fs::File>> {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let file = tokio::fs::File::open(&path).await?;
        Ok(Self::from_reader(
            path.display().to_string(),
            BufReader::new(file),
        ))
    }
}

impl JsonlSignalSource<BufReader<tokio::io::Stdin>> {
    pub fn stdin() -> Self {
        Self::from_reader("stdin", BufReader::new(tokio::io::stdin()))
    }
}

impl<R: AsyncBufRead + Unpin + Send> JsonlSignalSource<R> {
    pub fn from_reader(label: impl Into<String>, reader: R) -> Self {
        Self {
            label: label.into(),
            lines: reader.split(b'\n'),
            line_no: 0,
        }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> SignalSource for JsonlSignalSource<R> {
    fn name(&self) -> &str {
        &self.label
    }

    async fn next_signal(&mut self) -> Option<Signal> {
        loop {
            let raw = match self.lines.next_segment().await {
                Ok(Some(raw)) => raw,
                Ok(None) => return None,
                Err(e) => {
                    warn!(source = %self.label, "signal read failed: {}", e);
                    return None;
                }
            };
            self.line_no += 1;
            let line = match std::str::from_utf8(&raw) {
                Ok(line) => line,
                Err(e) => {
                    warn!(
                        source = %self.label,
                        line = self.line_no,
                        "skipping non-UTF-8 signal line: {}",
                        e
                    );
                    continue;
                }
            };
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            match serde_json::from_str::<Signal>(trimmed) {
                Ok(signal) => return Some(signal),
                Err(e) => warn!(
                    source = %self.label,
                    line = self.line_no,
                    "skipping malformed signal: {}",
                    e
                ),
            }
        }
    }
}

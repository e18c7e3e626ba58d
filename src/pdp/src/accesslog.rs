//! Access record sinks
//!
//! The engine never blocks a decision on audit delivery: records go through
//! a bounded channel drained by one background task, and overflow drops the
//! record with a warning. Sink failures are logged and swallowed.

use crate::error::Result;
use crate::record::AccessRecord;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

/// Append-only receiver for access records
#[async_trait]
pub trait AccessLog: Send + Sync {
    async fn send(&self, record: AccessRecord) -> Result<()>;
}

/// In-memory sink for tests and introspection
#[derive(Default)]
pub struct MemoryAccessLog {
    records: Mutex<Vec<AccessRecord>>,
}

impl MemoryAccessLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AccessRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl AccessLog for MemoryAccessLog {
    async fn send(&self, record: AccessRecord) -> Result<()> {
        self.records.lock().push(record);
        Ok(())
    }
}

/// JSONL-backed append-only sink, one record per line
pub struct JsonlAccessLog {
    file: Mutex<File>,
}

impl JsonlAccessLog {
    /// Create or open a log at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

#[async_trait]
impl AccessLog for JsonlAccessLog {
    async fn send(&self, record: AccessRecord) -> Result<()> {
        let line = serde_json::to_string(&record)?;
        let mut file = self.file.lock();
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        file.flush()?;
        Ok(())
    }
}

/// Bounded writer between the decision path and the sink
pub(crate) struct LogWriter {
    tx: mpsc::Sender<AccessRecord>,
}

impl LogWriter {
    /// Spawn the drain task for `sink`
    pub(crate) fn spawn(sink: Arc<dyn AccessLog>, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<AccessRecord>(capacity.max(1));

        tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                if let Err(e) = sink.send(record).await {
                    warn!(error = %e, "access log sink failed");
                }
            }
        });

        Self { tx }
    }

    /// Enqueue without blocking; returns false when the record was dropped
    pub(crate) fn enqueue(&self, record: AccessRecord) -> bool {
        match self.tx.try_send(record) {
            Ok(()) => true,
            Err(_) => {
                warn!("access log buffer full, dropping record");
                false
            }
        }
    }
}

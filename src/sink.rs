// src/sink.rs
use anyhow::Result;

use crate::enrich::EnrichedRow;

/// Downstream consumer of normalized rows (database, grid, queue...).
#[async_trait::async_trait]
pub trait RowSink: Send + Sync {
    async fn store(&self, rows: Vec<EnrichedRow>) -> Result<()>;
}

/// Logs row counts and ids; the default sink of the binary.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait::async_trait]
impl RowSink for LogSink {
    async fn store(&self, rows: Vec<EnrichedRow>) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let ids: Vec<&str> = rows.iter().take(10).map(|r| r.id.as_str()).collect();
        tracing::info!(target: "sink", rows = rows.len(), ?ids, "stored enriched rows");
        Ok(())
    }
}

/// Keeps every batch in memory. Used by tests and the dev server.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub batches: parking_lot::Mutex<Vec<Vec<EnrichedRow>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> Vec<EnrichedRow> {
        self.batches.lock().iter().flatten().cloned().collect()
    }
}

#[async_trait::async_trait]
impl RowSink for MemorySink {
    async fn store(&self, rows: Vec<EnrichedRow>) -> Result<()> {
        self.batches.lock().push(rows);
        Ok(())
    }
}

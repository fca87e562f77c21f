// src/persist.rs
// Persistence boundary. The pipeline only needs `save` and an `exists` check
// used as a durable fallback when the dedup store starts cold.

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::SinkError;
use crate::event::RiskEvent;

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn save(&self, event: &RiskEvent) -> Result<(), SinkError>;
    async fn exists(&self, hash: &str) -> Result<bool, SinkError>;
}

/// Append-only JSONL file, one event per line. Appends happen under a mutex
/// so concurrent runs never interleave partial lines.
pub struct JsonlEventSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlEventSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl EventSink for JsonlEventSink {
    async fn save(&self, event: &RiskEvent) -> Result<(), SinkError> {
        let line = serde_json::to_string(event)
            .map_err(|e| SinkError::StorageUnavailable(format!("encode: {e}")))?;
        let _guard = self.lock.lock().expect("sink mutex poisoned");
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)
                .map_err(|e| SinkError::StorageUnavailable(format!("mkdir: {e}")))?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| SinkError::StorageUnavailable(format!("open: {e}")))?;
        writeln!(file, "{line}").map_err(|e| SinkError::StorageUnavailable(format!("write: {e}")))?;
        Ok(())
    }

    async fn exists(&self, hash: &str) -> Result<bool, SinkError> {
        let _guard = self.lock.lock().expect("sink mutex poisoned");
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(SinkError::StorageUnavailable(format!("read: {e}"))),
        };
        for line in content.lines() {
            if let Ok(ev) = serde_json::from_str::<RiskEvent>(line) {
                if ev.id == hash {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}

/// In-memory sink for tests and dry runs.
#[derive(Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<RiskEvent>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<RiskEvent> {
        self.events.lock().expect("sink mutex poisoned").clone()
    }
}

#[async_trait]
impl EventSink for MemoryEventSink {
    async fn save(&self, event: &RiskEvent) -> Result<(), SinkError> {
        self.events
            .lock()
            .expect("sink mutex poisoned")
            .push(event.clone());
        Ok(())
    }

    async fn exists(&self, hash: &str) -> Result<bool, SinkError> {
        Ok(self
            .events
            .lock()
            .expect("sink mutex poisoned")
            .iter()
            .any(|e| e.id == hash))
    }
}

use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use crate::error::Result;

/// One connection lifecycle event, as written to the session CSV.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct EventRecord {
    pub elapsed_ms: u64,
    pub link: String,
    pub event: String,
}

/// Thread-safe event log with internal mutability.
/// Clones share the same log.
#[derive(Clone)]
pub struct EventRecorder {
    records: Arc<Mutex<Vec<EventRecord>>>,
    start_time: Instant,
}

impl Default for EventRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRecorder {
    pub fn new() -> Self {
        Self {
            records: Arc::new(Mutex::new(Vec::with_capacity(256))),
            start_time: Instant::now(),
        }
    }

    pub fn record(&self, link: impl Into<String>, event: impl Into<String>) {
        let record = EventRecord {
            elapsed_ms: self.start_time.elapsed().as_millis() as u64,
            link: link.into(),
            event: event.into(),
        };
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }

    pub fn records(&self) -> Vec<EventRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of recorded events for `link` named `event`.
    pub fn count(&self, link: &str, event: &str) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.link == link && r.event == event)
            .count()
    }

    pub fn save_to_csv<P: AsRef<Path>>(&self, path: P) -> Result<usize> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let data = self.records();
        let mut wtr = csv::Writer::from_path(path)?;
        for record in &data {
            wtr.serialize(record)?;
        }
        wtr.flush()?;
        Ok(data.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_count() {
        let rec = EventRecorder::new();
        let shared = rec.clone();
        shared.record("led", "attached");
        shared.record("led", "detached");
        rec.record("led", "attached");
        assert_eq!(rec.count("led", "attached"), 2);
        assert_eq!(rec.count("motor", "attached"), 0);
        assert_eq!(rec.records().len(), 3);
    }

    #[test]
    fn test_save_to_csv() {
        let rec = EventRecorder::new();
        rec.record("orchestrator", "connected");
        let path = std::env::temp_dir().join(format!("wheels-events-{}.csv", std::process::id()));
        assert_eq!(rec.save_to_csv(&path).unwrap(), 1);
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("elapsed_ms,link,event"));
        assert!(text.contains("orchestrator,connected"));
        std::fs::remove_file(&path).ok();
    }
}

//! Presentation surface interface.
//!
//! Rendering lives outside this workspace; the control loop only needs
//! somewhere to push connectivity, readouts and camera frames.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

/// Consumer of per-tick sensor readouts.
pub trait DisplaySink: Send + Sync {
    fn show_status(&self, label: &str, connected: bool, text: &str);

    /// Raw encoded image bytes, exactly as received.
    fn show_frame(&self, label: &str, bytes: &[u8]);
}

#[derive(Debug, Clone, PartialEq)]
pub enum DisplayItem {
    Status {
        label: String,
        connected: bool,
        text: String,
    },
    Frame {
        label: String,
        len: usize,
    },
}

/// Bounded in-memory sink keeping the most recent items.
#[derive(Clone)]
pub struct DisplayBuffer {
    data: Arc<Mutex<VecDeque<DisplayItem>>>,
    max_size: usize,
}

impl DisplayBuffer {
    pub fn new(max_size: usize) -> Self {
        Self {
            data: Arc::new(Mutex::new(VecDeque::with_capacity(max_size))),
            max_size,
        }
    }

    fn push(&self, item: DisplayItem) {
        let mut buffer = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        buffer.push_back(item);
        while buffer.len() > self.max_size {
            buffer.pop_front();
        }
    }

    pub fn get_recent(&self, count: usize) -> Vec<DisplayItem> {
        let buffer = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        let start = buffer.len().saturating_sub(count);
        buffer.iter().skip(start).cloned().collect()
    }

    pub fn get_all(&self) -> Vec<DisplayItem> {
        self.data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.data.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DisplaySink for DisplayBuffer {
    fn show_status(&self, label: &str, connected: bool, text: &str) {
        self.push(DisplayItem::Status {
            label: label.to_string(),
            connected,
            text: text.to_string(),
        });
    }

    fn show_frame(&self, label: &str, bytes: &[u8]) {
        self.push(DisplayItem::Frame {
            label: label.to_string(),
            len: bytes.len(),
        });
    }
}

/// Sink that writes readouts to the trace log at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDisplay;

impl DisplaySink for LogDisplay {
    fn show_status(&self, label: &str, connected: bool, text: &str) {
        tracing::debug!(target: "display", label, connected, "{text}");
    }

    fn show_frame(&self, label: &str, bytes: &[u8]) {
        tracing::debug!(target: "display", label, bytes = bytes.len(), "new frame");
    }
}

//! Thread-safe cells for values written by I/O tasks and polled by the
//! control loop.
//!
//! Each shared datum gets its own cell; there is no global lock. Cells are
//! cheap to clone (they clone the `Arc`, not the data) so the writer and any
//! number of readers can hold one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Lock-free boolean, used for connectivity flags.
#[derive(Debug, Clone, Default)]
pub struct SharedFlag {
    inner: Arc<AtomicBool>,
}

impl SharedFlag {
    pub fn new(value: bool) -> Self {
        Self {
            inner: Arc::new(AtomicBool::new(value)),
        }
    }

    pub fn get(&self) -> bool {
        self.inner.load(Ordering::Acquire)
    }

    pub fn set(&self, value: bool) {
        self.inner.store(value, Ordering::Release);
    }

    /// Stores `value` and returns the previous one.
    pub fn replace(&self, value: bool) -> bool {
        self.inner.swap(value, Ordering::AcqRel)
    }
}

/// Latest-value cell. `None` until the first write.
#[derive(Debug)]
pub struct SharedValue<T> {
    inner: Arc<RwLock<Option<T>>>,
}

impl<T> Clone for SharedValue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for SharedValue<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(RwLock::new(None)),
        }
    }
}

impl<T: Clone> SharedValue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<T> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set(&self, value: T) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = Some(value);
    }
}

#[derive(Debug, Default)]
struct FrameState {
    bytes: Option<Vec<u8>>,
    ready: bool,
}

/// Latest camera frame plus a new-frame marker.
///
/// The writer overwrites whatever is pending; the reader takes the frame and
/// clears the marker in one locked step, so a frame is handed out at most once.
#[derive(Debug, Clone, Default)]
pub struct FrameSlot {
    inner: Arc<Mutex<FrameState>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, bytes: Vec<u8>) {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        state.bytes = Some(bytes);
        state.ready = true;
    }

    pub fn take(&self) -> Option<Vec<u8>> {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.ready {
            return None;
        }
        state.ready = false;
        state.bytes.take()
    }

    pub fn has_new_frame(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .ready
    }
}

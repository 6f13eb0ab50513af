//! Progress reporting for indexing runs.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// The pipeline phase a progress update belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Phase {
    Metadata,
    Features,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Metadata => write!(f, "metadata"),
            Self::Features => write!(f, "features"),
        }
    }
}

/// One progress update, sent after each file is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub phase: Phase,
    pub processed: usize,
    pub total: usize,
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}/{}", self.phase, self.processed, self.total)
    }
}

/// Receives progress updates from the pipeline.
pub type ProgressCallback = Arc<dyn Fn(Progress) + Send + Sync>;

/// A callback that discards updates.
#[must_use]
pub fn silent() -> ProgressCallback {
    Arc::new(|_| {})
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_display() {
        let progress = Progress {
            phase: Phase::Features,
            processed: 3,
            total: 10,
        };
        assert_eq!(progress.to_string(), "[features] 3/10");
    }

    #[test]
    fn test_callback_receives_updates() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: ProgressCallback = Arc::new(move |p| sink.lock().unwrap().push(p));

        callback(Progress {
            phase: Phase::Metadata,
            processed: 1,
            total: 2,
        });
        silent()(Progress {
            phase: Phase::Metadata,
            processed: 2,
            total: 2,
        });

        assert_eq!(seen.lock().unwrap().len(), 1);
    }
}

//! Progress Reporting
//!
//! The pipeline reports through an optional callback. [`ProgressEmitter`]
//! keeps the reported percentage from ever moving backwards, so a renderer
//! never sees the bar jump back when a stage is skipped or a chapter reused.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::Serialize;

use super::stage::StageKind;

/// One progress update
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub stage: StageKind,
    pub message: String,
    /// Overall completion, 0..=100
    pub progress: u8,
    pub current_chapter: Option<usize>,
    pub total_chapters: Option<usize>,
    pub chapter_name: Option<String>,
}

impl ProgressEvent {
    pub fn new(stage: StageKind, message: impl Into<String>, progress: u8) -> Self {
        Self {
            stage,
            message: message.into(),
            progress: progress.min(100),
            current_chapter: None,
            total_chapters: None,
            chapter_name: None,
        }
    }

    pub fn with_chapter(mut self, current: usize, total: usize, name: impl Into<String>) -> Self {
        self.current_chapter = Some(current);
        self.total_chapters = Some(total);
        self.chapter_name = Some(name.into());
        self
    }
}

pub type ProgressCallback = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

/// Clamps progress to be non-decreasing and forwards to the callback, if any
#[derive(Clone, Default)]
pub struct ProgressEmitter {
    callback: Option<ProgressCallback>,
    high_water: Arc<AtomicU8>,
}

impl ProgressEmitter {
    pub fn new(callback: Option<ProgressCallback>) -> Self {
        Self {
            callback,
            high_water: Arc::new(AtomicU8::new(0)),
        }
    }

    pub fn silent() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.callback.is_some()
    }

    pub fn emit(&self, mut event: ProgressEvent) {
        let Some(callback) = &self.callback else {
            return;
        };
        let previous = self
            .high_water
            .fetch_max(event.progress.min(100), Ordering::SeqCst);
        event.progress = event.progress.min(100).max(previous);
        callback(&event);
    }

    /// Last progress value handed to the callback
    pub fn current(&self) -> u8 {
        self.high_water.load(Ordering::SeqCst)
    }

    /// Start a new run from zero
    pub fn reset(&self) {
        self.high_water.store(0, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for ProgressEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressEmitter")
            .field("active", &self.is_active())
            .field("progress", &self.current())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recording() -> (ProgressEmitter, Arc<Mutex<Vec<u8>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let emitter = ProgressEmitter::new(Some(Arc::new(move |e: &ProgressEvent| {
            sink.lock().unwrap().push(e.progress);
        })));
        (emitter, seen)
    }

    #[test]
    fn test_progress_never_decreases() {
        let (emitter, seen) = recording();
        for p in [10, 40, 20, 40, 90, 5] {
            emitter.emit(ProgressEvent::new(StageKind::WriteChapters, "x", p));
        }
        assert_eq!(*seen.lock().unwrap(), vec![10, 40, 40, 40, 90, 90]);
    }

    #[test]
    fn test_progress_capped_at_100() {
        let (emitter, seen) = recording();
        emitter.emit(ProgressEvent::new(StageKind::CombineTutorial, "done", 250));
        assert_eq!(*seen.lock().unwrap(), vec![100]);
    }

    #[test]
    fn test_silent_emitter_is_noop() {
        let emitter = ProgressEmitter::silent();
        emitter.emit(ProgressEvent::new(StageKind::FetchRepo, "x", 50));
        assert!(!emitter.is_active());
        assert_eq!(emitter.current(), 0);
    }

    #[test]
    fn test_chapter_fields() {
        let event =
            ProgressEvent::new(StageKind::WriteChapters, "Writing", 50).with_chapter(2, 5, "Cache");
        assert_eq!(event.current_chapter, Some(2));
        assert_eq!(event.total_chapters, Some(5));
        assert_eq!(event.chapter_name.as_deref(), Some("Cache"));
    }
}

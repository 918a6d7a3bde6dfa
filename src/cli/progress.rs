//! Console Progress Rendering
//!
//! Turns pipeline [`ProgressEvent`]s into a single status line on stderr.
//! On a terminal the line is redrawn in place; otherwise one line is printed
//! per stage change so logs stay readable.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use console::{Term, style};

use crate::pipeline::{ProgressCallback, ProgressEvent, StageKind};

#[derive(Debug, Default)]
struct RenderState {
    last_stage: Option<StageKind>,
    last_line: String,
    drawn: bool,
}

/// Console progress renderer
#[derive(Clone)]
pub struct ConsoleRenderer {
    term: Term,
    interactive: bool,
    started: Instant,
    state: Arc<Mutex<RenderState>>,
}

impl ConsoleRenderer {
    pub fn new() -> Self {
        let term = Term::stderr();
        let interactive = term.is_term();
        Self {
            term,
            interactive,
            started: Instant::now(),
            state: Arc::new(Mutex::new(RenderState::default())),
        }
    }

    /// Callback to hand to the pipeline
    pub fn callback(&self) -> ProgressCallback {
        let renderer = self.clone();
        Arc::new(move |event: &ProgressEvent| renderer.handle(event))
    }

    fn handle(&self, event: &ProgressEvent) {
        let line = render_line(event, self.started.elapsed().as_secs());
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if self.interactive {
            let _ = self.term.clear_line();
            let _ = self.term.write_str(&line);
            state.drawn = true;
        } else if state.last_stage != Some(event.stage) {
            let _ = self.term.write_line(&line);
        }
        state.last_stage = Some(event.stage);
        state.last_line = line;
    }

    /// Leave the cursor on a fresh line
    pub fn finish(&self) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if state.drawn {
            let _ = self.term.write_line("");
            state.drawn = false;
        }
    }
}

impl Default for ConsoleRenderer {
    fn default() -> Self {
        Self::new()
    }
}

/// `[3/6] OrderChapters [████░░] 42% Ordering chapters (12s)`
fn render_line(event: &ProgressEvent, elapsed_secs: u64) -> String {
    let position = StageKind::ALL
        .iter()
        .position(|k| *k == event.stage)
        .map(|i| i + 1)
        .unwrap_or(0);

    let chapter = match (event.current_chapter, event.total_chapters) {
        (Some(current), Some(total)) => format!(" [{}/{}]", current, total),
        _ => String::new(),
    };

    format!(
        "{} {} {} {:>3}%{} {} {}",
        style(format!("[{}/{}]", position, StageKind::ALL.len())).dim(),
        style(event.stage.name()).cyan(),
        render_progress_bar(event.progress as usize, 100, 20),
        event.progress,
        chapter,
        event.message,
        style(format!("({})", format_duration(elapsed_secs))).dim()
    )
}

/// Render a simple progress bar
fn render_progress_bar(completed: usize, total: usize, width: usize) -> String {
    if total == 0 {
        return format!("[{}]", " ".repeat(width));
    }

    let progress = (completed as f32 / total as f32).min(1.0);
    let filled = (progress * width as f32) as usize;
    let empty = width.saturating_sub(filled);

    format!("[{}{}]", "█".repeat(filled), "░".repeat(empty))
}

/// Format duration as human-readable string
pub fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_bar_render() {
        assert_eq!(render_progress_bar(0, 10, 10), "[░░░░░░░░░░]");
        assert_eq!(render_progress_bar(5, 10, 10), "[█████░░░░░]");
        assert_eq!(render_progress_bar(10, 10, 10), "[██████████]");
        assert_eq!(render_progress_bar(3, 0, 4), "[    ]");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(30), "30s");
        assert_eq!(format_duration(90), "1m 30s");
        assert_eq!(format_duration(3700), "1h 1m");
    }

    #[test]
    fn test_render_line_mentions_stage_and_chapter() {
        console::set_colors_enabled(false);
        let event = ProgressEvent::new(StageKind::WriteChapters, "Writing chapter 2: Worker", 70)
            .with_chapter(2, 5, "Worker");
        let line = render_line(&event, 75);
        assert!(line.starts_with("[5/6] WriteChapters"));
        assert!(line.contains(" 70%"));
        assert!(line.contains("[2/5]"));
        assert!(line.ends_with("(1m 15s)"));
    }
}

//! File context rendering for prompts.

use tracing::debug;

use crate::constants::pipeline as pipeline_constants;
use crate::types::SourceFile;

/// Whole files packed into a character budget
#[derive(Debug, Clone, Default)]
pub struct FileContext {
    pub text: String,
    /// Indices of the files that made it in, in order
    pub included: Vec<usize>,
}

/// Character budget for `context_window` tokens at `usage_ratio`
pub fn context_budget_chars(context_window: usize, usage_ratio: f64) -> usize {
    let tokens = (context_window as f64 * usage_ratio.clamp(0.0, 1.0)) as usize;
    tokens * pipeline_constants::CHARS_PER_TOKEN
}

/// Whole files in index order, stopping at the first one that would overflow.
pub fn build_file_context(files: &[SourceFile], budget_chars: usize) -> FileContext {
    let mut context = FileContext::default();
    for (i, file) in files.iter().enumerate() {
        let entry = format!("--- File Index {}: {} ---\n{}\n\n", i, file.path, file.content);
        if context.text.len() + entry.len() > budget_chars {
            debug!(
                included = context.included.len(),
                total = files.len(),
                "File context budget reached at {}",
                file.path
            );
            break;
        }
        context.text.push_str(&entry);
        context.included.push(i);
    }
    context
}

/// Keep the head and tail of long content with an omission marker between.
///
/// `head_ratio` of `max_lines` comes from the top, the rest from the bottom.
pub fn truncate_lines(content: &str, max_lines: usize, head_ratio: f64) -> String {
    let lines: Vec<&str> = content.lines().collect();
    if lines.len() <= max_lines {
        return content.to_string();
    }

    let head = ((max_lines as f64) * head_ratio.clamp(0.0, 1.0)).round() as usize;
    let head = head.min(max_lines);
    let tail = max_lines - head;
    let omitted = lines.len() - head - tail;

    let mut out: Vec<String> = lines[..head].iter().map(|l| l.to_string()).collect();
    out.push(format!("... [{} lines omitted] ...", omitted));
    out.extend(lines[lines.len() - tail..].iter().map(|l| l.to_string()));
    out.join("\n")
}

/// Render the files owned by a set of abstractions, each truncated.
pub fn render_files(
    files: &[SourceFile],
    indices: &[usize],
    max_lines: usize,
    head_ratio: f64,
) -> String {
    let mut out = String::new();
    for &i in indices {
        if let Some(file) = files.get(i) {
            out.push_str(&format!(
                "--- File: {} ---\n{}\n\n",
                file.path,
                truncate_lines(&file.content, max_lines, head_ratio)
            ));
        }
    }
    out
}

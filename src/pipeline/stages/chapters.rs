//! WriteChapters: one model call per chapter, strictly in reading order.
//!
//! The stage is a left fold: every chapter prompt sees the text of all
//! chapters before it. Chapters found in the context's reuse set are folded in
//! without a model call.

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info};

use crate::cache::{CachedChapter, compute_content_hash_async};
use crate::pipeline::context::SharedContext;
use crate::pipeline::files::render_files;
use crate::pipeline::naming::create_chapter_filename;
use crate::pipeline::progress::ProgressEvent;
use crate::pipeline::prompts::{self, ChapterPrompt};
use crate::pipeline::stage::{GenerationSettings, Stage, StageDeps, StageKind, missing};
use crate::types::{Abstraction, Chapter, Result};

pub struct WriteChapters {
    settings: GenerationSettings,
}

impl WriteChapters {
    pub fn new(settings: GenerationSettings) -> Self {
        Self { settings }
    }
}

struct ChapterJob {
    number: usize,
    abstraction_index: usize,
    abstraction: Abstraction,
    slug: String,
    filename: String,
    snippets: String,
    reuse: Option<CachedChapter>,
}

pub struct WriteInput {
    project_name: String,
    language: String,
    listing: String,
    jobs: Vec<ChapterJob>,
}

pub struct WriteOutput {
    chapters: Vec<Chapter>,
    reused: usize,
}

#[async_trait]
impl Stage for WriteChapters {
    type Input = WriteInput;
    type Output = WriteOutput;

    fn kind(&self) -> StageKind {
        StageKind::WriteChapters
    }

    fn prepare(&self, ctx: &SharedContext) -> Result<WriteInput> {
        if ctx.abstractions.is_empty() {
            return Err(missing(self.kind(), "abstractions"));
        }
        if ctx.chapter_order.len() != ctx.abstractions.len()
            || ctx.chapter_slugs.len() != ctx.chapter_order.len()
        {
            return Err(missing(self.kind(), "a complete chapter order"));
        }

        let mut jobs = Vec::with_capacity(ctx.chapter_order.len());
        for (position, (&abstraction_index, slug)) in
            ctx.chapter_order.iter().zip(&ctx.chapter_slugs).enumerate()
        {
            let abstraction = ctx
                .abstractions
                .get(abstraction_index)
                .ok_or_else(|| missing(self.kind(), "every ordered abstraction"))?;
            let number = position + 1;
            jobs.push(ChapterJob {
                number,
                abstraction_index,
                abstraction: abstraction.clone(),
                slug: slug.clone(),
                filename: create_chapter_filename(number, slug),
                snippets: render_files(
                    &ctx.files,
                    &abstraction.files,
                    self.settings.max_lines_per_file,
                    self.settings.head_ratio,
                ),
                reuse: ctx.reusable.get(slug).cloned(),
            });
        }

        let listing = jobs
            .iter()
            .map(|j| format!("{}. [{}]({})", j.number, j.abstraction.name, j.filename))
            .collect::<Vec<_>>()
            .join("\n");

        Ok(WriteInput {
            project_name: ctx.project_name().to_string(),
            language: ctx.language.clone(),
            listing,
            jobs,
        })
    }

    async fn execute(&self, input: &WriteInput, deps: &StageDeps) -> Result<WriteOutput> {
        let kind = self.kind();
        let total = input.jobs.len();
        let mut prior = String::new();
        let mut chapters = Vec::with_capacity(total);
        let mut reused = 0;

        for (position, job) in input.jobs.iter().enumerate() {
            deps.cancel.check(&format!("chapter {}", job.number))?;
            deps.report(
                ProgressEvent::new(
                    kind,
                    format!("Writing chapter {}: {}", job.number, job.abstraction.name),
                    kind.progress_at(position, total),
                )
                .with_chapter(job.number, total, job.abstraction.name.clone()),
            );

            let chapter = match &job.reuse {
                Some(cached) => {
                    debug!(slug = %job.slug, "Reusing cached chapter");
                    reused += 1;
                    Chapter {
                        number: job.number,
                        abstraction_index: job.abstraction_index,
                        title: job.abstraction.name.clone(),
                        slug: job.slug.clone(),
                        filename: job.filename.clone(),
                        content: cached.content.clone(),
                        generated_at: cached.generated_at,
                        prompt_hash: cached.prompt_hash.clone(),
                    }
                }
                None => {
                    let neighbor = |i: Option<usize>| {
                        i.and_then(|i| input.jobs.get(i))
                            .map(|j| (j.abstraction.name.as_str(), j.filename.as_str()))
                    };
                    let prompt = prompts::write_chapter(&ChapterPrompt {
                        project_name: &input.project_name,
                        number: job.number,
                        abstraction: &job.abstraction,
                        chapter_listing: &input.listing,
                        previous: neighbor(position.checked_sub(1)),
                        next: neighbor(Some(position + 1)),
                        file_snippets: &job.snippets,
                        prior_chapters: &prior,
                        language: &input.language,
                    });

                    let completion = deps
                        .call_model(kind, &prompt)
                        .await
                        .map_err(|e| e.in_phase(kind.name(), Some(&job.slug)))?;

                    Chapter {
                        number: job.number,
                        abstraction_index: job.abstraction_index,
                        title: job.abstraction.name.clone(),
                        slug: job.slug.clone(),
                        filename: job.filename.clone(),
                        content: ensure_heading(
                            &completion.text,
                            job.number,
                            &job.abstraction.name,
                        ),
                        generated_at: Utc::now(),
                        prompt_hash: compute_content_hash_async(&prompt).await,
                    }
                }
            };

            prior.push_str(&chapter.content);
            prior.push_str("\n\n---\n\n");
            chapters.push(chapter);

            deps.report(
                ProgressEvent::new(
                    kind,
                    format!("Finished chapter {}", job.number),
                    kind.progress_at(position + 1, total),
                )
                .with_chapter(job.number, total, job.abstraction.name.clone()),
            );
        }

        info!(
            "Wrote {} chapters ({} reused)",
            chapters.len() - reused,
            reused
        );
        Ok(WriteOutput { chapters, reused })
    }

    fn apply(&self, ctx: &mut SharedContext, output: WriteOutput) {
        ctx.chapters = output.chapters;
        ctx.chapters_reused = output.reused;
        ctx.output = None;
    }
}

/// Prepend `# Chapter n: Name` unless the reply already opens with it.
///
/// The first line must carry both this chapter's number and its name (case
/// aside); a heading for another chapter does not count.
pub fn ensure_heading(content: &str, number: usize, name: &str) -> String {
    let trimmed = content.trim();
    if opens_with_heading(trimmed, number, name) {
        trimmed.to_string()
    } else {
        format!("# Chapter {}: {}\n\n{}", number, name, trimmed)
    }
}

fn opens_with_heading(content: &str, number: usize, name: &str) -> bool {
    let first_line = content.lines().next().unwrap_or_default().trim().to_lowercase();
    let expected = format!("# chapter {}: {}", number, name.trim().to_lowercase());
    match first_line.strip_prefix(&expected) {
        Some(rest) => !rest.starts_with(|c: char| c.is_alphanumeric()),
        None => false,
    }
}

//! Generate Command
//!
//! Crawl a local checkout, run the incremental pipeline and write the
//! tutorial to `<output>/<project>/`.
//!
//! Usage:
//!   tutorgen generate --dir ./widgets [--repo https://github.com/acme/widgets]
//!   tutorgen generate --dir . --no-cache --language german

use std::path::PathBuf;
use std::sync::Arc;

use tracing::warn;

use crate::ai::create_invoker;
use crate::cli::progress::{ConsoleRenderer, format_duration};
use crate::cli::ui::Output;
use crate::cli::util::{CommandContext, resolve_target};
use crate::crawler::LocalCrawler;
use crate::pipeline::{
    CancellationFlag, GenerationOutcome, IncrementalGenerator, TutorialPipeline,
};
use crate::types::Result;

#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub repo: Option<String>,
    pub dir: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub language: Option<String>,
    pub project_name: Option<String>,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub max_abstractions: Option<usize>,
    pub no_cache: bool,
    pub json: bool,
    pub quiet: bool,
}

pub async fn run(opts: GenerateOptions) -> Result<()> {
    let mut config = crate::config::ConfigLoader::load()?;
    if let Some(provider) = &opts.provider {
        config.llm.provider = provider.clone();
    }
    if opts.model.is_some() {
        config.llm.model = opts.model.clone();
    }
    if let Some(language) = &opts.language {
        config.pipeline.language = language.clone();
    }
    if let Some(max) = opts.max_abstractions {
        config.pipeline.max_abstractions = max;
    }
    if !opts.include.is_empty() {
        config.crawl.include = opts.include.clone();
    }
    config.crawl.exclude.extend(opts.exclude.iter().cloned());
    if opts.no_cache {
        config.pipeline.use_cache = false;
    }

    let ctx = CommandContext::from_config(config)?;
    let target = resolve_target(opts.repo.as_deref(), opts.dir.as_deref())?;
    let mut request = ctx.request(&target);
    request.project_name = opts.project_name.clone();

    let invoker = create_invoker(&ctx.config.provider_config())?;
    let cancel = CancellationFlag::new();
    let mut pipeline = TutorialPipeline::new(invoker)
        .with_crawler(Arc::new(LocalCrawler::new(&target.dir)))
        .with_settings(ctx.config.generation_settings())
        .with_policy(ctx.config.stage_policy())
        .with_cancellation(cancel.clone());

    let show_progress = !opts.quiet && !opts.json;
    let renderer = ConsoleRenderer::new();
    if show_progress {
        pipeline = pipeline.with_progress(renderer.callback());
    }

    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; stopping after the current step");
            cancel.cancel();
        }
    });

    let generator = IncrementalGenerator::new(ctx.cache, pipeline);
    let result = generator.generate(request).await;
    interrupt.abort();
    renderer.finish();
    let outcome = result?;

    let out_dir = opts
        .output
        .unwrap_or_else(|| ctx.config.output.dir.clone())
        .join(&outcome.output.project_name);
    let written = outcome.output.write_to(&out_dir).await?;

    if opts.json {
        let report = serde_json::json!({
            "runId": outcome.run_id.as_str(),
            "plan": outcome.plan,
            "analysis": outcome.analysis,
            "stats": outcome.stats,
            "outputDir": out_dir,
            "files": written,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if !opts.quiet {
        print_summary(&outcome, &out_dir);
    }
    Ok(())
}

fn print_summary(outcome: &GenerationOutcome, out_dir: &std::path::Path) {
    let output = Output::new();
    output.success(&format!(
        "Tutorial for {} written to {}",
        outcome.output.project_name,
        out_dir.display()
    ));
    output.section("Run");
    println!("  Mode:      {}", outcome.plan.mode);
    println!("  Reason:    {}", outcome.plan.reason);
    println!(
        "  Chapters:  {} written, {} reused",
        outcome.stats.chapters_written, outcome.stats.chapters_reused
    );
    println!(
        "  Model:     {} calls, {} in / {} out tokens",
        outcome.stats.model_calls, outcome.stats.input_tokens, outcome.stats.output_tokens
    );
    println!(
        "  Duration:  {}",
        format_duration(outcome.stats.duration.as_secs())
    );
    if outcome.analysis.has_changes() {
        println!(
            "  Changes:   {} added, {} modified, {} removed ({:.1}%)",
            outcome.analysis.added_files.len(),
            outcome.analysis.modified_files.len(),
            outcome.analysis.removed_files.len(),
            outcome.analysis.change_percentage
        );
    }
}

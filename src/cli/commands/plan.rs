//! Plan Command
//!
//! Show what the next `generate` would do: change analysis plus the
//! regeneration plan. Makes no model calls and leaves the cache untouched.

use std::path::PathBuf;

use crate::cli::ui::Output;
use crate::cli::util::{CommandContext, resolve_target};
use crate::crawler::LocalCrawler;
use crate::pipeline::{PlanPreview, preview_plan};
use crate::types::Result;

pub async fn run(repo: Option<String>, dir: Option<PathBuf>, json: bool) -> Result<()> {
    let ctx = CommandContext::load()?;
    let target = resolve_target(repo.as_deref(), dir.as_deref())?;
    let crawler = LocalCrawler::new(&target.dir);

    let preview = preview_plan(&ctx.cache, &crawler, ctx.request(&target)).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&preview)?);
    } else {
        print_preview(&preview);
    }
    Ok(())
}

fn print_preview(preview: &PlanPreview) {
    let output = Output::new();
    output.header(&format!("Regeneration plan for {}", preview.repo_id));
    if !preview.cached {
        output.info("No cache yet; the next run generates everything");
    }

    let analysis = &preview.analysis;
    output.section("Changes");
    println!("  Files:     {}", analysis.total_files);
    println!("  Added:     {}", analysis.added_files.len());
    println!("  Modified:  {}", analysis.modified_files.len());
    println!("  Removed:   {}", analysis.removed_files.len());
    println!("  Changed:   {:.1}%", analysis.change_percentage);

    let plan = &preview.plan;
    output.section("Plan");
    println!("  Mode:      {}", plan.mode);
    println!("  Reason:    {}", plan.reason);
    println!(
        "  Re-identify abstractions: {}",
        if plan.rerun_abstraction_identification { "yes" } else { "no" }
    );
    println!("  Estimated savings: {:.0}%", plan.estimated_savings);
    if !plan.chapters_to_regenerate.is_empty() {
        println!("  Chapters to regenerate:");
        for slug in &plan.chapters_to_regenerate {
            println!("    - {}", slug);
        }
    }
}

//! Cache Command
//!
//! Inspect and clear per-repository caches.
//!
//! Usage:
//!   tutorgen cache list
//!   tutorgen cache show <REPO>
//!   tutorgen cache clear <REPO>
//!   tutorgen cache clear-all
//!   tutorgen cache reconcile

use crate::cli::ui::Output;
use crate::cli::util::CommandContext;
use crate::types::Result;

/// List cached repositories, most recently used first
pub async fn list(json: bool) -> Result<()> {
    let ctx = CommandContext::load()?;
    let repos = ctx.cache.list_cached_repos().await;
    let stats = ctx.cache.cache_stats().await;

    if json {
        let report = serde_json::json!({ "repos": repos, "stats": stats });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let output = Output::new();
    output.header(&format!("Cached repositories ({} backend)", stats.backend));
    if repos.is_empty() {
        println!("  No cached repositories");
        return Ok(());
    }
    for repo in &repos {
        println!(
            "  {}  (last used {})",
            repo.repo_id,
            repo.last_accessed.format("%Y-%m-%d %H:%M UTC")
        );
    }
    println!();
    println!(
        "  Total: {} repos, {} chapters, {} files, {} tokens, ${:.4}",
        stats.repo_count, stats.chapter_count, stats.file_count, stats.total_tokens, stats.total_cost
    );
    Ok(())
}

/// Show one repository's cache record
pub async fn show(repo: &str, json: bool) -> Result<()> {
    let ctx = CommandContext::load()?;
    let output = Output::new();
    let Some(cache) = ctx.cache.peek_repo_cache(repo).await else {
        output.warning(&format!("No cache for {}", repo));
        return Ok(());
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&cache)?);
        return Ok(());
    }

    output.header(&cache.repo_id);
    if let Some(name) = &cache.project_name {
        println!("  Project:     {}", name);
    }
    println!(
        "  Last crawl:  {}",
        cache.last_crawl_time.format("%Y-%m-%d %H:%M UTC")
    );
    println!("  Files:       {}", cache.files.len());
    println!("  Language:    {}", cache.language.as_deref().unwrap_or("-"));
    println!(
        "  Generations: {} ({} model calls, {} tokens)",
        cache.metadata.generation_count,
        cache.metadata.model_calls,
        cache.metadata.total_tokens()
    );
    if let (Some(provider), Some(model)) = (&cache.metadata.provider, &cache.metadata.model) {
        println!("  Model:       {} / {}", provider, model);
    }

    output.section("Chapters");
    for slug in &cache.chapter_order {
        if let Some(chapter) = cache.chapters.get(slug) {
            let deps = if chapter.dependencies.is_empty() {
                String::new()
            } else {
                format!("  ← {}", chapter.dependencies.join(", "))
            };
            println!("  {:>2}. {} [{}]{}", chapter.number, chapter.title, slug, deps);
        }
    }
    Ok(())
}

/// Remove one repository's cache
pub async fn clear(repo: &str) -> Result<()> {
    let ctx = CommandContext::load()?;
    let output = Output::new();
    if ctx.cache.clear_repo_cache(repo).await? {
        output.success(&format!("Cleared cache for {}", repo));
    } else {
        output.info(&format!("No cache for {}", repo));
    }
    Ok(())
}

/// Remove every repository cache and the index
pub async fn clear_all() -> Result<()> {
    let ctx = CommandContext::load()?;
    let removed = ctx.cache.clear_all_caches().await?;
    Output::new().success(&format!("Cleared {} cache records", removed));
    Ok(())
}

/// Drop index entries whose cache record is gone
pub async fn reconcile() -> Result<()> {
    let ctx = CommandContext::load()?;
    let output = Output::new();
    let dropped = ctx.cache.reconcile_index().await?;
    if dropped.is_empty() {
        output.success("Index is consistent");
    } else {
        for repo_id in &dropped {
            println!("  - {}", repo_id);
        }
        output.success(&format!("Removed {} stale index entries", dropped.len()));
    }
    Ok(())
}

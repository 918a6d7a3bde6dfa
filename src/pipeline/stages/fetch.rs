//! FetchRepo: crawl the repository into the context.

use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

use crate::cache::project_name_from_repo;
use crate::crawler::{CrawlRequest, CrawlResult};
use crate::pipeline::context::SharedContext;
use crate::pipeline::progress::ProgressEvent;
use crate::pipeline::stage::{Stage, StageDeps, StageKind, missing};
use crate::types::{Result, TutorError};

pub struct FetchRepo;

pub struct FetchInput {
    request: CrawlRequest,
    project_name: String,
}

pub struct FetchOutput {
    result: CrawlResult,
    project_name: String,
}

#[async_trait]
impl Stage for FetchRepo {
    type Input = FetchInput;
    type Output = FetchOutput;

    fn kind(&self) -> StageKind {
        StageKind::FetchRepo
    }

    fn prepare(&self, ctx: &SharedContext) -> Result<FetchInput> {
        let project_name = ctx
            .project_name
            .clone()
            .or_else(|| ctx.local_dir_name.clone())
            .or_else(|| project_name_from_repo(&ctx.repo_url))
            .ok_or_else(|| missing(StageKind::FetchRepo, "a repository reference"))?;

        Ok(FetchInput {
            request: ctx.crawl_request(),
            project_name,
        })
    }

    async fn execute(&self, input: &FetchInput, deps: &StageDeps) -> Result<FetchOutput> {
        let crawler = deps
            .crawler
            .as_ref()
            .ok_or_else(|| TutorError::config("No crawler configured for FetchRepo"))?;

        deps.report(ProgressEvent::new(
            StageKind::FetchRepo,
            format!("Crawling {}", input.request.repo_url),
            StageKind::FetchRepo.progress_at(0, 1),
        ));

        let result = crawler.crawl(&input.request).await?;
        if result.files.is_empty() {
            return Err(TutorError::crawler(format!(
                "No files matched in {} ({} skipped, {} excluded)",
                input.request.repo_url, result.stats.skipped, result.stats.excluded
            ))
            .with_remediation("Check the include/exclude patterns and the size limit"));
        }

        info!(
            crawler = crawler.name(),
            files = result.files.len(),
            skipped = result.stats.skipped,
            excluded = result.stats.excluded,
            "Crawled {}",
            input.request.repo_url
        );

        Ok(FetchOutput {
            result,
            project_name: input.project_name.clone(),
        })
    }

    fn apply(&self, ctx: &mut SharedContext, output: FetchOutput) {
        ctx.files = output.result.files;
        ctx.crawl_stats = output.result.stats;
        ctx.crawled_at = Some(Utc::now());
        ctx.project_name = Some(output.project_name);
    }
}

//! OrderChapters: reading order over the abstractions.

use async_trait::async_trait;
use tracing::info;

use crate::pipeline::context::SharedContext;
use crate::pipeline::naming::assign_slugs;
use crate::pipeline::parse::parse_order;
use crate::pipeline::progress::ProgressEvent;
use crate::pipeline::prompts;
use crate::pipeline::stage::{Stage, StageDeps, StageKind, missing};
use crate::types::Result;

pub struct OrderChapters;

pub struct OrderInput {
    prompt: String,
    count: usize,
}

#[async_trait]
impl Stage for OrderChapters {
    type Input = OrderInput;
    type Output = Vec<usize>;

    fn kind(&self) -> StageKind {
        StageKind::OrderChapters
    }

    fn prepare(&self, ctx: &SharedContext) -> Result<OrderInput> {
        if ctx.abstractions.is_empty() {
            return Err(missing(self.kind(), "abstractions"));
        }
        let relationships = ctx
            .relationships
            .as_ref()
            .ok_or_else(|| missing(self.kind(), "relationships"))?;

        Ok(OrderInput {
            prompt: prompts::order_chapters(ctx.project_name(), &ctx.abstractions, relationships),
            count: ctx.abstractions.len(),
        })
    }

    async fn execute(&self, input: &OrderInput, deps: &StageDeps) -> Result<Vec<usize>> {
        deps.report(ProgressEvent::new(
            self.kind(),
            "Ordering chapters",
            self.kind().progress_at(0, 1),
        ));

        let completion = deps.call_model(self.kind(), &input.prompt).await?;
        let order = parse_order(&completion.text, input.count)?;

        info!("Chapter order: {:?}", order);
        Ok(order)
    }

    fn apply(&self, ctx: &mut SharedContext, output: Vec<usize>) {
        set_order(ctx, output);
    }
}

/// Store an order and derive the per-position slugs from it
pub fn set_order(ctx: &mut SharedContext, order: Vec<usize>) {
    ctx.chapter_order = order;
    let slugs = assign_slugs(&ctx.ordered_names());
    ctx.chapter_slugs = slugs;
}

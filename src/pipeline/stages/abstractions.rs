//! IdentifyAbstractions: ask the model for the core concepts of the codebase.

use async_trait::async_trait;
use tracing::{debug, info};

use crate::pipeline::context::SharedContext;
use crate::pipeline::files::{build_file_context, context_budget_chars};
use crate::pipeline::parse::parse_abstractions;
use crate::pipeline::progress::ProgressEvent;
use crate::pipeline::prompts;
use crate::pipeline::stage::{GenerationSettings, Stage, StageDeps, StageKind, missing};
use crate::types::{Abstraction, Result};

pub struct IdentifyAbstractions {
    settings: GenerationSettings,
}

impl IdentifyAbstractions {
    pub fn new(settings: GenerationSettings) -> Self {
        Self { settings }
    }
}

pub struct IdentifyInput {
    prompt: String,
    file_count: usize,
}

#[async_trait]
impl Stage for IdentifyAbstractions {
    type Input = IdentifyInput;
    type Output = Vec<Abstraction>;

    fn kind(&self) -> StageKind {
        StageKind::IdentifyAbstractions
    }

    fn prepare(&self, ctx: &SharedContext) -> Result<IdentifyInput> {
        if ctx.files.is_empty() {
            return Err(missing(self.kind(), "crawled files"));
        }

        let budget = context_budget_chars(
            self.settings.context_window,
            self.settings.context_usage_ratio,
        );
        let context = build_file_context(&ctx.files, budget);
        debug!(
            budget_chars = budget,
            included = context.included.len(),
            total = ctx.files.len(),
            "Built abstraction context"
        );

        let listing = context
            .included
            .iter()
            .filter_map(|&i| ctx.files.get(i).map(|f| format!("- {} # {}", i, f.path)))
            .collect::<Vec<_>>()
            .join("\n");

        Ok(IdentifyInput {
            prompt: prompts::identify_abstractions(
                ctx.project_name(),
                &context.text,
                &listing,
                self.settings.max_abstractions,
                &ctx.language,
            ),
            file_count: ctx.files.len(),
        })
    }

    async fn execute(&self, input: &IdentifyInput, deps: &StageDeps) -> Result<Vec<Abstraction>> {
        deps.report(ProgressEvent::new(
            self.kind(),
            "Identifying abstractions",
            self.kind().progress_at(0, 1),
        ));

        let completion = deps.call_model(self.kind(), &input.prompt).await?;
        let abstractions = parse_abstractions(&completion.text, input.file_count)?;

        info!("Identified {} abstractions", abstractions.len());
        Ok(abstractions)
    }

    fn apply(&self, ctx: &mut SharedContext, output: Vec<Abstraction>) {
        ctx.reset_structure();
        ctx.abstractions = output;
    }
}

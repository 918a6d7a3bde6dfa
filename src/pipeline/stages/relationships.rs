//! AnalyzeRelationships: project summary plus edges between abstractions.

use std::collections::BTreeSet;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::pipeline::context::SharedContext;
use crate::pipeline::files::render_files;
use crate::pipeline::parse::parse_relationships;
use crate::pipeline::progress::ProgressEvent;
use crate::pipeline::prompts;
use crate::pipeline::stage::{GenerationSettings, Stage, StageDeps, StageKind, missing};
use crate::types::{RelationshipSummary, Result};

pub struct AnalyzeRelationships {
    settings: GenerationSettings,
}

impl AnalyzeRelationships {
    pub fn new(settings: GenerationSettings) -> Self {
        Self { settings }
    }
}

pub struct RelationshipInput {
    prompt: String,
    names: Vec<String>,
}

#[async_trait]
impl Stage for AnalyzeRelationships {
    type Input = RelationshipInput;
    type Output = RelationshipSummary;

    fn kind(&self) -> StageKind {
        StageKind::AnalyzeRelationships
    }

    fn prepare(&self, ctx: &SharedContext) -> Result<RelationshipInput> {
        if ctx.abstractions.is_empty() {
            return Err(missing(self.kind(), "abstractions"));
        }

        let owned: BTreeSet<usize> = ctx
            .abstractions
            .iter()
            .flat_map(|a| a.files.iter().copied())
            .collect();
        let owned: Vec<usize> = owned.into_iter().collect();
        let snippets = render_files(
            &ctx.files,
            &owned,
            self.settings.max_lines_per_file,
            self.settings.head_ratio,
        );

        Ok(RelationshipInput {
            prompt: prompts::analyze_relationships(
                ctx.project_name(),
                &ctx.abstractions,
                &snippets,
                &ctx.language,
            ),
            names: ctx.abstractions.iter().map(|a| a.name.clone()).collect(),
        })
    }

    async fn execute(
        &self,
        input: &RelationshipInput,
        deps: &StageDeps,
    ) -> Result<RelationshipSummary> {
        deps.report(ProgressEvent::new(
            self.kind(),
            "Analyzing relationships",
            self.kind().progress_at(0, 1),
        ));

        let completion = deps.call_model(self.kind(), &input.prompt).await?;
        let relationships = parse_relationships(&completion.text, input.names.len())?;

        // Coverage is advisory: a lone abstraction still gets its chapter
        let uncovered = relationships.uncovered(input.names.len());
        if !uncovered.is_empty() {
            let names: Vec<&str> = uncovered
                .iter()
                .filter_map(|&i| input.names.get(i).map(String::as_str))
                .collect();
            warn!(
                "{} abstraction(s) appear in no relationship: {}",
                names.len(),
                names.join(", ")
            );
        }

        info!("Found {} relationships", relationships.details.len());
        Ok(relationships)
    }

    fn apply(&self, ctx: &mut SharedContext, output: RelationshipSummary) {
        ctx.relationships = Some(output);
        ctx.chapter_order.clear();
        ctx.chapter_slugs.clear();
    }
}

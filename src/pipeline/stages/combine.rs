//! CombineTutorial: index document, diagram and final chapter files.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use crate::constants::pipeline as pipeline_constants;
use crate::pipeline::context::SharedContext;
use crate::pipeline::diagram::render_flowchart;
use crate::pipeline::progress::ProgressEvent;
use crate::pipeline::stage::{Stage, StageDeps, StageKind, missing};
use crate::types::{Result, ResultExt};

/// One rendered Markdown file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputFile {
    pub filename: String,
    pub content: String,
}

/// Rendered tutorial: `index.md` plus one file per chapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TutorialOutput {
    pub project_name: String,
    pub index: String,
    pub chapters: Vec<OutputFile>,
}

impl TutorialOutput {
    pub const INDEX_FILE: &'static str = "index.md";

    /// Write every file into `dir`, creating it if needed
    pub async fn write_to(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(format!("Failed to create {}", dir.display()))?;

        let mut written = Vec::with_capacity(self.chapters.len() + 1);
        let index_path = dir.join(Self::INDEX_FILE);
        tokio::fs::write(&index_path, &self.index)
            .await
            .with_context(format!("Failed to write {}", index_path.display()))?;
        written.push(index_path);

        for chapter in &self.chapters {
            let path = dir.join(&chapter.filename);
            tokio::fs::write(&path, &chapter.content)
                .await
                .with_context(format!("Failed to write {}", path.display()))?;
            written.push(path);
        }

        info!("Wrote {} files to {}", written.len(), dir.display());
        Ok(written)
    }
}

pub struct CombineTutorial;

#[async_trait]
impl Stage for CombineTutorial {
    type Input = TutorialOutput;
    type Output = TutorialOutput;

    fn kind(&self) -> StageKind {
        StageKind::CombineTutorial
    }

    fn prepare(&self, ctx: &SharedContext) -> Result<TutorialOutput> {
        let relationships = ctx
            .relationships
            .as_ref()
            .ok_or_else(|| missing(self.kind(), "relationships"))?;
        if ctx.chapters.is_empty() {
            return Err(missing(self.kind(), "written chapters"));
        }

        let project = ctx.project_name();
        let diagram = render_flowchart(&ctx.abstractions, relationships);
        let footer = format!("\n\n---\n\n{}", pipeline_constants::ATTRIBUTION_FOOTER);

        let mut index = format!("# Tutorial: {}\n\n{}\n\n", project, relationships.summary);
        if let Some(link) = source_link(&ctx.repo_url) {
            index.push_str(&format!("**Source Repository:** [{}]({})\n\n", link, link));
        }
        index.push_str(&format!("```mermaid\n{}\n```\n\n## Chapters\n\n", diagram));
        for chapter in &ctx.chapters {
            index.push_str(&format!(
                "{}. [{}]({})\n",
                chapter.number, chapter.title, chapter.filename
            ));
        }
        index.push_str(&footer);

        let chapters = ctx
            .chapters
            .iter()
            .map(|c| OutputFile {
                filename: c.filename.clone(),
                content: format!("{}{}", c.content.trim_end(), footer),
            })
            .collect();

        Ok(TutorialOutput {
            project_name: project.to_string(),
            index,
            chapters,
        })
    }

    async fn execute(&self, input: &TutorialOutput, deps: &StageDeps) -> Result<TutorialOutput> {
        deps.report(ProgressEvent::new(
            self.kind(),
            format!("Combined {} chapters", input.chapters.len()),
            self.kind().progress_at(1, 1),
        ));
        Ok(input.clone())
    }

    fn apply(&self, ctx: &mut SharedContext, output: TutorialOutput) {
        ctx.output = Some(output);
    }
}

/// Browsable link for http(s) repository references
fn source_link(repo_url: &str) -> Option<String> {
    let url = url::Url::parse(repo_url).ok()?;
    matches!(url.scheme(), "http" | "https").then(|| repo_url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_link_only_for_web_urls() {
        assert!(source_link("https://github.com/a/b").is_some());
        assert!(source_link("a/b").is_none());
        assert!(source_link("git@github.com:a/b.git").is_none());
    }

    #[tokio::test]
    async fn test_write_to_creates_files() {
        let temp = tempfile::TempDir::new().unwrap();
        let output = TutorialOutput {
            project_name: "widgets".into(),
            index: "# Tutorial: widgets".into(),
            chapters: vec![OutputFile {
                filename: "01_intro.md".into(),
                content: "# Chapter 1: Intro".into(),
            }],
        };
        let dir = temp.path().join("out").join("widgets");
        let written = output.write_to(&dir).await.unwrap();
        assert_eq!(written.len(), 2);
        assert_eq!(
            std::fs::read_to_string(dir.join("01_intro.md")).unwrap(),
            "# Chapter 1: Intro"
        );
        assert!(dir.join("index.md").exists());
    }
}

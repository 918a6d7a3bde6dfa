//! Tutorial domain types shared by the pipeline and the cache engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One crawled file, addressed by its position in the crawl result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub path: String,
    pub content: String,
}

impl SourceFile {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// A named conceptual unit of the codebase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Abstraction {
    pub name: String,
    pub description: String,
    /// Sorted, deduplicated indices into the run's file list
    pub files: Vec<usize>,
}

/// Directed, labeled edge between two abstractions (by index)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub from: usize,
    pub to: usize,
    pub label: String,
}

/// Project summary plus the relationship edges between abstractions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipSummary {
    pub summary: String,
    pub details: Vec<Relationship>,
}

impl RelationshipSummary {
    /// Abstraction indices that appear in no relationship
    pub fn uncovered(&self, abstraction_count: usize) -> Vec<usize> {
        let mut covered = vec![false; abstraction_count];
        for rel in &self.details {
            for idx in [rel.from, rel.to] {
                if let Some(slot) = covered.get_mut(idx) {
                    *slot = true;
                }
            }
        }
        covered
            .iter()
            .enumerate()
            .filter(|(_, c)| !**c)
            .map(|(i, _)| i)
            .collect()
    }
}

/// One written chapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    /// 1-based position in reading order
    pub number: usize,
    pub abstraction_index: usize,
    pub title: String,
    /// Stable cache key, unique within a run
    pub slug: String,
    pub filename: String,
    pub content: String,
    pub generated_at: DateTime<Utc>,
    pub prompt_hash: String,
}

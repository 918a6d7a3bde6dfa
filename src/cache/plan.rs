//! Regeneration Planning
//!
//! Decides how much prior work a run may reuse, and which chapters a file
//! change invalidates.
//!
//! | change %      | mode                 | chapters           | savings   |
//! |---------------|----------------------|--------------------|-----------|
//! | 0             | `skip`               | none               | 100       |
//! | < 30          | `partial`            | affected cascade   | computed  |
//! | 30 ≤ x < 60   | `partial_reidentify` | decided later      | 30        |
//! | ≥ 60          | `full`               | every cached slug  | 0         |

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};

use super::analysis::FileChangeAnalysis;
use super::types::RepoCache;
use crate::constants::plan as plan_constants;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegenerationMode {
    Skip,
    Partial,
    PartialReidentify,
    Full,
}

impl RegenerationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Skip => "skip",
            Self::Partial => "partial",
            Self::PartialReidentify => "partial_reidentify",
            Self::Full => "full",
        }
    }
}

impl fmt::Display for RegenerationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegenerationPlan {
    pub mode: RegenerationMode,
    pub reason: String,
    pub chapters_to_regenerate: Vec<String>,
    pub rerun_abstraction_identification: bool,
    /// Percentage of prior work expected to be reused
    pub estimated_savings: f64,
}

impl RegenerationPlan {
    /// Plan used when there is no usable cache
    pub fn fresh(reason: impl Into<String>) -> Self {
        Self {
            mode: RegenerationMode::Full,
            reason: reason.into(),
            chapters_to_regenerate: Vec::new(),
            rerun_abstraction_identification: true,
            estimated_savings: 0.0,
        }
    }
}

/// Evaluate the decision table in order.
pub fn determine_regeneration_plan(
    cache: &RepoCache,
    analysis: &FileChangeAnalysis,
) -> RegenerationPlan {
    let pct = analysis.change_percentage;

    if pct == 0.0 {
        return RegenerationPlan {
            mode: RegenerationMode::Skip,
            reason: "No file changes detected".to_string(),
            chapters_to_regenerate: Vec::new(),
            rerun_abstraction_identification: false,
            estimated_savings: 100.0,
        };
    }

    if pct < plan_constants::PARTIAL_THRESHOLD_PCT {
        let affected = find_affected_chapters(cache, &analysis.changed_paths());
        let total = cache.chapters.len().max(1);
        let savings = 100.0 - 100.0 * affected.len() as f64 / total as f64;
        return RegenerationPlan {
            mode: RegenerationMode::Partial,
            reason: format!(
                "{:.1}% of files changed; regenerating {} of {} chapters",
                pct,
                affected.len(),
                cache.chapters.len()
            ),
            chapters_to_regenerate: affected,
            rerun_abstraction_identification: false,
            estimated_savings: savings,
        };
    }

    if pct < plan_constants::REIDENTIFY_THRESHOLD_PCT {
        return RegenerationPlan {
            mode: RegenerationMode::PartialReidentify,
            reason: format!(
                "{:.1}% of files changed; re-identifying abstractions before choosing chapters",
                pct
            ),
            chapters_to_regenerate: Vec::new(),
            rerun_abstraction_identification: true,
            estimated_savings: plan_constants::REIDENTIFY_SAVINGS_PCT,
        };
    }

    RegenerationPlan {
        mode: RegenerationMode::Full,
        reason: format!("{:.1}% of files changed; regenerating everything", pct),
        chapters_to_regenerate: cache.chapter_slugs(),
        rerun_abstraction_identification: true,
        estimated_savings: 0.0,
    }
}

/// Chapters invalidated by a set of changed paths.
///
/// Chapters covering an abstraction that owns a changed file are affected
/// directly; every chapter that (transitively) depends on an affected chapter
/// is affected too. One BFS over the reversed dependency graph, with a visited
/// set, so cycles terminate. Returned slugs are sorted.
pub fn find_affected_chapters(cache: &RepoCache, changed_paths: &[String]) -> Vec<String> {
    let changed: HashSet<&str> = changed_paths.iter().map(String::as_str).collect();

    let touched: HashSet<&str> = cache
        .abstractions
        .iter()
        .filter(|a| a.files.iter().any(|f| changed.contains(f.as_str())))
        .map(|a| a.name.as_str())
        .collect();

    // dependency slug -> chapters that depend on it
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for (slug, chapter) in &cache.chapters {
        for dep in &chapter.dependencies {
            dependents.entry(dep.as_str()).or_default().push(slug.as_str());
        }
    }

    let mut visited: BTreeSet<&str> = BTreeSet::new();
    let mut queue: VecDeque<&str> = VecDeque::new();

    for (slug, chapter) in &cache.chapters {
        if chapter
            .abstractions
            .iter()
            .any(|name| touched.contains(name.as_str()))
            && visited.insert(slug.as_str())
        {
            queue.push_back(slug.as_str());
        }
    }

    while let Some(slug) = queue.pop_front() {
        if let Some(children) = dependents.get(slug) {
            for &child in children {
                if cache.chapters.contains_key(child) && visited.insert(child) {
                    queue.push_back(child);
                }
            }
        }
    }

    visited.into_iter().map(String::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::analysis::analyze_file_changes;
    use crate::cache::types::{CachedAbstraction, CachedChapter, CachedFile};
    use chrono::Utc;

    fn cached_chapter(abstraction: &str, deps: &[&str]) -> CachedChapter {
        CachedChapter {
            title: abstraction.to_string(),
            content: String::new(),
            abstractions: vec![abstraction.to_string()],
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            generated_at: Utc::now(),
            prompt_hash: String::new(),
            number: 0,
            filename: String::new(),
        }
    }

    fn abstraction(name: &str, files: &[&str]) -> CachedAbstraction {
        CachedAbstraction {
            name: name.to_string(),
            description: String::new(),
            files: files.iter().map(|f| f.to_string()).collect(),
        }
    }

    fn file(path: &str, hash: &str) -> CachedFile {
        CachedFile {
            path: path.to_string(),
            hash: hash.to_string(),
            last_modified: Utc::now(),
        }
    }

    /// A <- B (B depends on A), C independent
    fn abc_cache() -> RepoCache {
        let mut cache = RepoCache::new("foo/bar");
        cache.abstractions = vec![
            abstraction("Alpha", &["a.rs"]),
            abstraction("Beta", &["b.rs"]),
            abstraction("Gamma", &["c.rs"]),
        ];
        cache.chapters.insert("a".into(), cached_chapter("Alpha", &[]));
        cache.chapters.insert("b".into(), cached_chapter("Beta", &["a"]));
        cache.chapters.insert("c".into(), cached_chapter("Gamma", &[]));
        cache
    }

    fn ten_files(modified: usize) -> (Vec<CachedFile>, Vec<CachedFile>) {
        let old: Vec<_> = (0..10).map(|i| file(&format!("f{}.rs", i), "h")).collect();
        let new = old
            .iter()
            .enumerate()
            .map(|(i, f)| if i < modified { file(&f.path, "changed") } else { f.clone() })
            .collect();
        (old, new)
    }

    #[test]
    fn test_no_change_skips() {
        let cache = abc_cache();
        let (old, _) = ten_files(0);
        let plan = determine_regeneration_plan(&cache, &analyze_file_changes(&old, &old));
        assert_eq!(plan.mode, RegenerationMode::Skip);
        assert!(plan.chapters_to_regenerate.is_empty());
        assert_eq!(plan.estimated_savings, 100.0);
    }

    #[test]
    fn test_ten_percent_is_partial() {
        let mut cache = abc_cache();
        cache.abstractions[0].files = vec!["f0.rs".into()];
        let (old, new) = ten_files(1);
        let analysis = analyze_file_changes(&old, &new);
        assert_eq!(analysis.change_percentage, 10.0);

        let plan = determine_regeneration_plan(&cache, &analysis);
        assert_eq!(plan.mode, RegenerationMode::Partial);
        assert!(!plan.rerun_abstraction_identification);
        assert_eq!(plan.chapters_to_regenerate, vec!["a", "b"]);
        let expected = 100.0 - 100.0 * 2.0 / 3.0;
        assert!((plan.estimated_savings - expected).abs() < 1e-9);
    }

    #[test]
    fn test_mid_range_reidentifies() {
        let cache = abc_cache();
        let (old, new) = ten_files(4);
        let plan = determine_regeneration_plan(&cache, &analyze_file_changes(&old, &new));
        assert_eq!(plan.mode, RegenerationMode::PartialReidentify);
        assert!(plan.chapters_to_regenerate.is_empty());
        assert!(plan.rerun_abstraction_identification);
        assert_eq!(plan.estimated_savings, 30.0);
    }

    #[test]
    fn test_seventy_percent_is_full() {
        let cache = abc_cache();
        let (old, new) = ten_files(7);
        let plan = determine_regeneration_plan(&cache, &analyze_file_changes(&old, &new));
        assert_eq!(plan.mode, RegenerationMode::Full);
        assert_eq!(plan.chapters_to_regenerate, vec!["a", "b", "c"]);
        assert!(plan.rerun_abstraction_identification);
        assert_eq!(plan.estimated_savings, 0.0);
    }

    #[test]
    fn test_boundaries() {
        let cache = abc_cache();
        let (old, new) = ten_files(3);
        let plan = determine_regeneration_plan(&cache, &analyze_file_changes(&old, &new));
        assert_eq!(plan.mode, RegenerationMode::PartialReidentify);

        let (old, new) = ten_files(6);
        let plan = determine_regeneration_plan(&cache, &analyze_file_changes(&old, &new));
        assert_eq!(plan.mode, RegenerationMode::Full);
    }

    #[test]
    fn test_cascade_includes_dependents_only() {
        let cache = abc_cache();
        let affected = find_affected_chapters(&cache, &["a.rs".to_string()]);
        assert_eq!(affected, vec!["a", "b"]);
    }

    #[test]
    fn test_cascade_is_transitive() {
        let mut cache = abc_cache();
        cache.chapters.insert("c".into(), cached_chapter("Gamma", &["b"]));
        let affected = find_affected_chapters(&cache, &["a.rs".to_string()]);
        assert_eq!(affected, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_cascade_terminates_on_cycle() {
        let mut cache = abc_cache();
        cache.chapters.insert("a".into(), cached_chapter("Alpha", &["b"]));
        cache.chapters.insert("b".into(), cached_chapter("Beta", &["a"]));

        let affected = find_affected_chapters(&cache, &["b.rs".to_string()]);
        assert_eq!(affected, vec!["a", "b"]);
    }

    #[test]
    fn test_unowned_change_affects_nothing() {
        let cache = abc_cache();
        assert!(find_affected_chapters(&cache, &["README.md".to_string()]).is_empty());
    }

    #[test]
    fn test_dangling_dependency_is_ignored() {
        let mut cache = abc_cache();
        cache.chapters.insert("c".into(), cached_chapter("Gamma", &["missing"]));
        let affected = find_affected_chapters(&cache, &["c.rs".to_string()]);
        assert_eq!(affected, vec!["c"]);
    }
}

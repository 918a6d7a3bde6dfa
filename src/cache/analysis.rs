//! File Change Analysis
//!
//! Diffs a fresh crawl against the fingerprints stored in a repository cache.

use std::collections::HashMap;

use serde::Serialize;

use super::types::CachedFile;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChangeAnalysis {
    pub added_files: Vec<String>,
    pub removed_files: Vec<String>,
    pub modified_files: Vec<String>,
    pub unchanged_files: Vec<String>,
    /// Changed files as a percentage of the new file set
    pub change_percentage: f64,
    /// Size of the new file set
    pub total_files: usize,
}

impl FileChangeAnalysis {
    pub fn changed_count(&self) -> usize {
        self.added_files.len() + self.removed_files.len() + self.modified_files.len()
    }

    pub fn has_changes(&self) -> bool {
        self.changed_count() > 0
    }

    /// Added, modified and removed paths, sorted
    pub fn changed_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .added_files
            .iter()
            .chain(&self.modified_files)
            .chain(&self.removed_files)
            .cloned()
            .collect();
        paths.sort();
        paths.dedup();
        paths
    }
}

/// Classify every path as added, removed, modified or unchanged.
///
/// The percentage is `100 * changed / new_file_count`, and `0` when the new
/// set is empty.
pub fn analyze_file_changes(cached: &[CachedFile], new: &[CachedFile]) -> FileChangeAnalysis {
    let old_hashes: HashMap<&str, &str> = cached
        .iter()
        .map(|f| (f.path.as_str(), f.hash.as_str()))
        .collect();
    let new_hashes: HashMap<&str, &str> = new
        .iter()
        .map(|f| (f.path.as_str(), f.hash.as_str()))
        .collect();

    let mut analysis = FileChangeAnalysis {
        total_files: new_hashes.len(),
        ..Default::default()
    };

    for (path, hash) in &new_hashes {
        match old_hashes.get(path) {
            None => analysis.added_files.push(path.to_string()),
            Some(old) if old != hash => analysis.modified_files.push(path.to_string()),
            Some(_) => analysis.unchanged_files.push(path.to_string()),
        }
    }
    analysis.removed_files = old_hashes
        .keys()
        .filter(|p| !new_hashes.contains_key(*p))
        .map(|p| p.to_string())
        .collect();

    analysis.added_files.sort();
    analysis.removed_files.sort();
    analysis.modified_files.sort();
    analysis.unchanged_files.sort();

    analysis.change_percentage = if analysis.total_files == 0 {
        0.0
    } else {
        100.0 * analysis.changed_count() as f64 / analysis.total_files as f64
    };

    analysis
}

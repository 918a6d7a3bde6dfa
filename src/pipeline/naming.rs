//! Chapter slugs and file names.

use std::collections::{HashMap, HashSet};

use crate::constants::pipeline as pipeline_constants;

/// Lowercase, keep `[a-z0-9 -]`, spaces to `-`, collapse and trim dashes,
/// cap the length.
///
/// Falls back to `"chapter"` when nothing survives.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.to_lowercase().chars() {
        match c {
            'a'..='z' | '0'..='9' => slug.push(c),
            ' ' | '-' => {
                if !slug.is_empty() && !slug.ends_with('-') {
                    slug.push('-');
                }
            }
            _ => {}
        }
    }

    let capped: String = slug.chars().take(pipeline_constants::MAX_SLUG_LEN).collect();
    let trimmed = capped.trim_matches('-');
    if trimmed.is_empty() {
        "chapter".to_string()
    } else {
        trimmed.to_string()
    }
}

/// `NN_slug.md`
pub fn create_chapter_filename(index: usize, name: &str) -> String {
    format!("{:02}_{}.md", index, slugify(name))
}

/// Unique slugs for names in order; repeats get `-2`, `-3`, ...
pub fn assign_slugs<S: AsRef<str>>(names: &[S]) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut taken: HashSet<String> = HashSet::new();
    let mut slugs = Vec::with_capacity(names.len());

    for name in names {
        let base = slugify(name.as_ref());
        let counter = seen.entry(base.clone()).or_insert(0);
        let mut candidate = base.clone();
        while taken.contains(&candidate) {
            *counter += 1;
            candidate = format!("{}-{}", base, *counter + 1);
        }
        taken.insert(candidate.clone());
        slugs.push(candidate);
    }
    slugs
}

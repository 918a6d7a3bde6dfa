//! Model Reply Parsers
//!
//! Every structured stage asks for exactly one fenced ```` ```yaml ```` block.
//! These functions pull that block out, decode it, and check every index
//! against the sizes known to the caller. Failures are `Validation` errors;
//! the stage re-tags them with its phase name.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde_yaml::Value;

use crate::types::{Abstraction, Relationship, RelationshipSummary, Result, TutorError};

static YAML_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:yaml|yml)[^\n]*\n(.*?)```").expect("yaml fence regex is valid")
});

/// Body of the first fenced yaml block
pub fn extract_yaml_block(reply: &str) -> Result<&str> {
    YAML_FENCE
        .captures(reply)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .ok_or_else(|| {
            TutorError::validation("reply", "Model reply contains no ```yaml fenced block")
        })
}

fn decode_block(reply: &str) -> Result<Value> {
    let body = extract_yaml_block(reply)?;
    Ok(serde_yaml::from_str(body)?)
}

/// Index given as an integer or as a `"<n> # comment"` string
pub fn parse_index(value: &Value) -> Option<usize> {
    match value {
        Value::Number(n) => n.as_u64().map(|n| n as usize),
        Value::String(s) => s.split('#').next()?.trim().parse().ok(),
        _ => None,
    }
}

fn str_field<'a>(item: &'a Value, key: &str) -> Option<&'a str> {
    item.get(key).and_then(Value::as_str)
}

/// Decode the abstraction list.
///
/// File indices are deduplicated and sorted; each must address a crawled file.
pub fn parse_abstractions(reply: &str, file_count: usize) -> Result<Vec<Abstraction>> {
    let value = decode_block(reply)?;
    let items = value.as_sequence().ok_or_else(|| {
        TutorError::validation("abstractions", "Expected a yaml list of abstractions")
    })?;

    if items.is_empty() {
        return Err(TutorError::validation(
            "abstractions",
            "Model identified no abstractions",
        ));
    }

    let mut abstractions = Vec::with_capacity(items.len());
    for (position, item) in items.iter().enumerate() {
        let name = str_field(item, "name")
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                TutorError::validation(
                    "name",
                    format!("Abstraction #{} is missing a name", position),
                )
            })?;
        let description = str_field(item, "description").ok_or_else(|| {
            TutorError::validation(
                "description",
                format!("Abstraction '{}' is missing a description", name),
            )
        })?;
        let raw_indices = item
            .get("file_indices")
            .and_then(Value::as_sequence)
            .ok_or_else(|| {
                TutorError::validation(
                    "file_indices",
                    format!("Abstraction '{}' has no file_indices list", name),
                )
            })?;

        let mut files = BTreeSet::new();
        for raw in raw_indices {
            let idx = parse_index(raw).ok_or_else(|| {
                TutorError::validation(
                    "file_indices",
                    format!("Abstraction '{}' has unreadable file index {:?}", name, raw),
                )
            })?;
            if idx >= file_count {
                return Err(TutorError::validation(
                    "file_indices",
                    format!(
                        "Abstraction '{}' references file index {} but only {} files were crawled",
                        name, idx, file_count
                    ),
                ));
            }
            files.insert(idx);
        }

        abstractions.push(Abstraction {
            name: name.to_string(),
            description: description.trim().to_string(),
            files: files.into_iter().collect(),
        });
    }

    Ok(abstractions)
}

/// Decode the project summary and relationship edges.
pub fn parse_relationships(reply: &str, abstraction_count: usize) -> Result<RelationshipSummary> {
    let value = decode_block(reply)?;

    let summary = str_field(&value, "summary").ok_or_else(|| {
        TutorError::validation("summary", "Relationship reply is missing a summary")
    })?;
    let items = value
        .get("relationships")
        .and_then(Value::as_sequence)
        .ok_or_else(|| {
            TutorError::validation("relationships", "Relationship reply has no relationships list")
        })?;

    let mut details = Vec::with_capacity(items.len());
    for (position, item) in items.iter().enumerate() {
        let endpoint = |key: &str| -> Result<usize> {
            let idx = item.get(key).and_then(parse_index).ok_or_else(|| {
                TutorError::validation(
                    key,
                    format!("Relationship #{} has no readable {}", position, key),
                )
            })?;
            if idx >= abstraction_count {
                return Err(TutorError::validation(
                    key,
                    format!(
                        "Relationship #{} {} index {} is out of range (0..{})",
                        position, key, idx, abstraction_count
                    ),
                ));
            }
            Ok(idx)
        };

        let from = endpoint("from_abstraction")?;
        let to = endpoint("to_abstraction")?;
        let label = str_field(item, "label").ok_or_else(|| {
            TutorError::validation("label", format!("Relationship #{} has no label", position))
        })?;

        details.push(Relationship {
            from,
            to,
            label: label.trim().to_string(),
        });
    }

    Ok(RelationshipSummary {
        summary: summary.trim().to_string(),
        details,
    })
}

/// Decode the chapter order; it must be a permutation of `0..abstraction_count`.
pub fn parse_order(reply: &str, abstraction_count: usize) -> Result<Vec<usize>> {
    let value = decode_block(reply)?;
    let items = value
        .as_sequence()
        .ok_or_else(|| TutorError::validation("order", "Expected a yaml list of indices"))?;

    let mut order = Vec::with_capacity(items.len());
    let mut seen = vec![false; abstraction_count];
    for raw in items {
        let idx = parse_index(raw).ok_or_else(|| {
            TutorError::validation("order", format!("Unreadable chapter index {:?}", raw))
        })?;
        if idx >= abstraction_count {
            return Err(TutorError::validation(
                "order",
                format!(
                    "Chapter index {} is out of range (0..{})",
                    idx, abstraction_count
                ),
            ));
        }
        if seen[idx] {
            return Err(TutorError::validation(
                "order",
                format!("Chapter index {} appears more than once", idx),
            ));
        }
        seen[idx] = true;
        order.push(idx);
    }

    let missing: Vec<String> = seen
        .iter()
        .enumerate()
        .filter(|(_, s)| !**s)
        .map(|(i, _)| i.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(TutorError::validation(
            "order",
            format!("Chapter order is missing index {}", missing.join(", ")),
        ));
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fenced(body: &str) -> String {
        format!("Here you go:\n```yaml\n{}\n```\nDone.", body)
    }

    #[test]
    fn test_extract_requires_fence() {
        assert!(extract_yaml_block("name: x").is_err());
        assert_eq!(extract_yaml_block("```yml\na: 1\n```").unwrap(), "a: 1\n");
    }

    #[test]
    fn test_parse_index_forms() {
        assert_eq!(parse_index(&Value::from(3)), Some(3));
        assert_eq!(parse_index(&Value::from("4 # storage.rs")), Some(4));
        assert_eq!(parse_index(&Value::from(" 7 ")), Some(7));
        assert_eq!(parse_index(&Value::from(-1)), None);
        assert_eq!(parse_index(&Value::from("seven")), None);
    }

    #[test]
    fn test_parse_abstractions_dedups_and_sorts() {
        let reply = fenced(
            r#"- name: Query Planner
  description: |
    Turns parsed statements into plans.
  file_indices:
    - "2 # planner.rs"
    - 0
    - 2
- name: Storage
  description: Pages on disk.
  file_indices: [1]"#,
        );
        let abstractions = parse_abstractions(&reply, 3).unwrap();
        assert_eq!(abstractions.len(), 2);
        assert_eq!(abstractions[0].name, "Query Planner");
        assert_eq!(abstractions[0].files, vec![0, 2]);
        assert_eq!(
            abstractions[0].description,
            "Turns parsed statements into plans."
        );
    }

    #[test]
    fn test_parse_abstractions_rejects_out_of_range() {
        let reply = fenced("- name: Cache\n  description: d\n  file_indices: [5]");
        let err = parse_abstractions(&reply, 3).unwrap_err();
        assert!(err.detail.contains("Cache"));
        assert!(err.detail.contains('5'));
        assert_eq!(err.extensions.field.as_deref(), Some("file_indices"));
    }

    #[test]
    fn test_parse_abstractions_rejects_empty_list() {
        assert!(parse_abstractions(&fenced("[]"), 3).is_err());
    }

    #[test]
    fn test_parse_relationships() {
        let reply = fenced(
            r#"summary: A small database.
relationships:
  - from_abstraction: "0 # Planner"
    to_abstraction: 1
    label: Reads pages"#,
        );
        let rels = parse_relationships(&reply, 2).unwrap();
        assert_eq!(rels.summary, "A small database.");
        assert_eq!(rels.details[0].from, 0);
        assert_eq!(rels.details[0].to, 1);
    }

    #[test]
    fn test_parse_relationships_out_of_range_names_entry() {
        let reply = fenced(
            "summary: s\nrelationships:\n  - from_abstraction: 0\n    to_abstraction: 9\n    label: x",
        );
        let err = parse_relationships(&reply, 2).unwrap_err();
        assert!(err.detail.contains("#0"));
        assert!(err.detail.contains('9'));
    }

    #[test]
    fn test_parse_order_permutation() {
        let order = parse_order(&fenced("- 2\n- \"0 # Planner\"\n- 1"), 3).unwrap();
        assert_eq!(order, vec![2, 0, 1]);
    }

    #[test]
    fn test_parse_order_duplicate_named() {
        let err = parse_order(&fenced("- 0\n- 0\n- 1"), 3).unwrap_err();
        assert!(err.detail.contains("index 0 appears more than once"));
    }

    #[test]
    fn test_parse_order_missing_named() {
        let err = parse_order(&fenced("- 0\n- 2"), 3).unwrap_err();
        assert!(err.detail.contains("missing index 1"));
    }
}

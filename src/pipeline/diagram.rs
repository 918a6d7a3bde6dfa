//! Mermaid relationship diagram.

use crate::constants::pipeline as pipeline_constants;
use crate::types::{Abstraction, RelationshipSummary};

/// Edge label with quotes and line breaks removed, capped in length
pub fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .filter(|c| *c != '"')
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect();
    let cleaned = cleaned.trim();
    cleaned
        .chars()
        .take(pipeline_constants::MAX_EDGE_LABEL_LEN)
        .collect::<String>()
        .trim_end()
        .to_string()
}

fn sanitize_node(name: &str) -> String {
    name.replace('"', "'").replace(['\n', '\r'], " ")
}

/// `flowchart TD` with one node per abstraction and one edge per relationship
pub fn render_flowchart(abstractions: &[Abstraction], relationships: &RelationshipSummary) -> String {
    let mut lines = vec!["flowchart TD".to_string()];
    for (i, abstraction) in abstractions.iter().enumerate() {
        lines.push(format!("    A{}[\"{}\"]", i, sanitize_node(&abstraction.name)));
    }
    for rel in &relationships.details {
        if rel.from >= abstractions.len() || rel.to >= abstractions.len() {
            continue;
        }
        lines.push(format!(
            "    A{} -- \"{}\" --> A{}",
            rel.from,
            sanitize_label(&rel.label),
            rel.to
        ));
    }
    lines.join("\n")
}

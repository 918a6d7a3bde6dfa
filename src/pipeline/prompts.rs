//! Stage Prompts
//!
//! Prompt text for the four model-backed stages. Structured stages ask for a
//! single fenced yaml block; chapter writing asks for Markdown.

use crate::types::{Abstraction, RelationshipSummary};

fn language_note(language: &str, what: &str) -> String {
    if language.trim().eq_ignore_ascii_case("english") {
        String::new()
    } else {
        format!(
            "\n<LANGUAGE>\nWrite {} in **{}**. Keep code identifiers, file paths and YAML keys in English.\n</LANGUAGE>\n",
            what, language
        )
    }
}

/// Listing of abstractions as `- {i} # {name}` lines
pub fn abstraction_index_listing(abstractions: &[Abstraction]) -> String {
    abstractions
        .iter()
        .enumerate()
        .map(|(i, a)| format!("- {} # {}", i, a.name))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn identify_abstractions(
    project_name: &str,
    file_context: &str,
    file_listing: &str,
    max_abstractions: usize,
    language: &str,
) -> String {
    format!(
        r##"<ROLE>
You are explaining the codebase of `{project_name}` to someone new to it.
Identify the {max_abstractions} most important abstractions a newcomer must understand.
</ROLE>

<CODEBASE>
{file_context}
</CODEBASE>

<FILES>
{file_listing}
</FILES>
{language_note}
<TASK>
For each abstraction give:
1. `name`: a short, concise name
2. `description`: a beginner-friendly explanation in about 100 words, using a simple analogy
3. `file_indices`: indices of the files that implement it, written as `index # path`

List at most {max_abstractions} abstractions.
</TASK>

<OUTPUT_FORMAT>
Reply with exactly one YAML block:

```yaml
- name: |
    Query Processing
  description: |
    Explains what the abstraction does.
  file_indices:
    - 0 # path/to/file1.py
    - 3 # path/to/related.py
```
</OUTPUT_FORMAT>"##,
        language_note = language_note(language, "the `name` and `description` values"),
    )
}

pub fn analyze_relationships(
    project_name: &str,
    abstractions: &[Abstraction],
    file_snippets: &str,
    language: &str,
) -> String {
    let listing = abstractions
        .iter()
        .enumerate()
        .map(|(i, a)| format!("- Index {}: {}\n  {}", i, a.name, a.description.replace('\n', " ")))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r##"<ROLE>
You are mapping how the core abstractions of `{project_name}` interact.
</ROLE>

<ABSTRACTIONS>
{listing}
</ABSTRACTIONS>

<CODE>
{file_snippets}
</CODE>
{language_note}
<TASK>
1. Write a high-level `summary` of the project in a few beginner-friendly sentences. Use **bold** and *italic* for emphasis.
2. List the key `relationships` between abstractions. For each give `from_abstraction` and `to_abstraction` as `index # name`, and a short `label` (a few words).
Every abstraction should take part in at least one relationship.
</TASK>

<OUTPUT_FORMAT>
Reply with exactly one YAML block:

```yaml
summary: |
  A brief, simple explanation of the project.
relationships:
  - from_abstraction: 0 # AbstractionName1
    to_abstraction: 1 # AbstractionName2
    label: "Manages"
```
</OUTPUT_FORMAT>"##,
        language_note = language_note(language, "the `summary` and every `label`"),
    )
}

pub fn order_chapters(
    project_name: &str,
    abstractions: &[Abstraction],
    relationships: &RelationshipSummary,
) -> String {
    let listing = abstraction_index_listing(abstractions);
    let edges = relationships
        .details
        .iter()
        .filter_map(|r| {
            let from = abstractions.get(r.from)?;
            let to = abstractions.get(r.to)?;
            Some(format!(
                "- From {} ({}) to {} ({}): {}",
                r.from, from.name, r.to, to.name, r.label
            ))
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r##"<ROLE>
You are planning the chapter order of a tutorial about `{project_name}`.
</ROLE>

<ABSTRACTIONS>
{listing}
</ABSTRACTIONS>

<CONTEXT>
Project summary:
{summary}

Relationships:
{edges}
</CONTEXT>

<TASK>
Order the abstractions so the tutorial is easiest to follow. Start with user-facing
or foundational concepts, then move to lower-level details that build on them.
Include every abstraction exactly once.
</TASK>

<OUTPUT_FORMAT>
Reply with exactly one YAML block listing indices as `index # name`:

```yaml
- 2 # FoundationalConcept
- 0 # CoreClassA
- 1 # CoreClassB
```
</OUTPUT_FORMAT>"##,
        summary = relationships.summary,
    )
}

/// Inputs for one chapter prompt
pub struct ChapterPrompt<'a> {
    pub project_name: &'a str,
    pub number: usize,
    pub abstraction: &'a Abstraction,
    /// `N. [Name](file.md)` for every chapter
    pub chapter_listing: &'a str,
    pub previous: Option<(&'a str, &'a str)>,
    pub next: Option<(&'a str, &'a str)>,
    pub file_snippets: &'a str,
    pub prior_chapters: &'a str,
    pub language: &'a str,
}

pub fn write_chapter(p: &ChapterPrompt<'_>) -> String {
    let link = |label: &str, target: Option<(&str, &str)>| match target {
        Some((name, file)) => format!("{}: [{}]({})", label, name, file),
        None => format!("{}: none", label),
    };
    let prior = if p.prior_chapters.is_empty() {
        "This is the first chapter.".to_string()
    } else {
        p.prior_chapters.to_string()
    };

    format!(
        r##"<ROLE>
You are writing Chapter {number} of a beginner-friendly tutorial about `{project}`.
This chapter covers: **{name}**.
</ROLE>

<CONCEPT>
{description}
</CONCEPT>

<TUTORIAL_STRUCTURE>
{listing}
{previous}
{next}
</TUTORIAL_STRUCTURE>

<PREVIOUS_CHAPTERS>
{prior}
</PREVIOUS_CHAPTERS>

<CODE>
{snippets}
</CODE>
{language_note}
<GUIDELINES>
- Start with the heading `# Chapter {number}: {name}`
- Open with the problem this abstraction solves and a concrete use case
- Link to earlier chapters where concepts were already explained
- Keep code blocks under 10 lines; explain each one right after it
- Use a short mermaid sequenceDiagram where it helps show a flow
- End with a brief summary and a transition to the next chapter
</GUIDELINES>

Reply with the chapter Markdown only."##,
        number = p.number,
        project = p.project_name,
        name = p.abstraction.name,
        description = p.abstraction.description,
        listing = p.chapter_listing,
        previous = link("Previous chapter", p.previous),
        next = link("Next chapter", p.next),
        snippets = p.file_snippets,
        language_note = language_note(p.language, "the whole chapter"),
    )
}

//! Bookkeeping for the guidance-tuning loop.
//!
//! Each iteration generates a handful of stories with the current authoring
//! guidance, asks the agent to reflect on them against a goals document, and
//! asks again for improved guidance. Only the guidance text is ever rewritten;
//! the protocol sections of the prompt are out of the loop's reach.
//!
//! Results layout:
//!
//! ```text
//! <results_dir>/iteration-<i>/guidance.md
//! <results_dir>/iteration-<i>/story_<query>.json
//! <results_dir>/iteration-<i>/story_<query>_log.txt   (failures only)
//! <results_dir>/iteration-<i>/reflections.md
//! <results_dir>/iteration-<i>/improved_guidance.md
//! ```

use crate::error::{Result, StoryError};
use crate::io;
use crate::story::{Snippet, Story};
use std::path::{Path, PathBuf};

pub const GUIDANCE_SNAPSHOT: &str = "guidance.md";
pub const REFLECTIONS_FILE: &str = "reflections.md";
pub const IMPROVED_GUIDANCE_FILE: &str = "improved_guidance.md";

/// Agent replies shorter than this are treated as a silent failure.
pub const MIN_AGENT_OUTPUT_CHARS: usize = 50;
pub const MAX_PREVIOUS_REFLECTIONS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalQuery {
    pub query: String,
    pub repo: Option<String>,
}

/// Parse an evaluation query list.
///
/// Lines before the first `## Query` heading are ignored. After it, each
/// non-blank line not starting with `#` is a query; a `repo: user/repo` line
/// attaches to the query that follows it.
pub fn parse_queries(text: &str) -> Vec<EvalQuery> {
    let mut queries = Vec::new();
    let mut in_section = false;
    let mut pending_repo: Option<String> = None;
    for line in text.lines() {
        if line.starts_with("## Query") {
            in_section = true;
            continue;
        }
        if !in_section {
            continue;
        }
        let trimmed = line.trim();
        if let Some(repo) = strip_prefix_ci(trimmed, "repo:") {
            pending_repo = Some(repo.trim().to_string()).filter(|r| !r.is_empty());
            continue;
        }
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        queries.push(EvalQuery {
            query: trimmed.to_string(),
            repo: pending_repo.take(),
        });
    }
    queries
}

fn strip_prefix_ci<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &s[prefix.len()..])
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Outcome {
    Generated(Story),
    Failed { error: String, stderr: String },
}

#[derive(Debug, Clone)]
pub struct EvalResult {
    pub query: EvalQuery,
    pub outcome: Outcome,
}

impl EvalResult {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, Outcome::Generated(_))
    }
}

pub fn iteration_dir(results_dir: &Path, iteration: usize) -> PathBuf {
    results_dir.join(format!("iteration-{iteration}"))
}

/// File-name-safe stem for a query: first 40 chars, non-alphanumerics as `_`.
pub fn safe_name(query: &str) -> String {
    query
        .chars()
        .take(40)
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Save one generation's outcome into the iteration directory.
pub fn save_result(iter_dir: &Path, result: &EvalResult) -> Result<()> {
    let stem = format!("story_{}", safe_name(&result.query.query));
    match &result.outcome {
        Outcome::Generated(story) => io::atomic_write(
            &iter_dir.join(format!("{stem}.json")),
            story.to_pretty_json()?.as_bytes(),
        ),
        Outcome::Failed { error, stderr } => {
            let placeholder = serde_json::json!({ "error": "generation failed" });
            io::atomic_write(
                &iter_dir.join(format!("{stem}.json")),
                serde_json::to_string_pretty(&placeholder)?.as_bytes(),
            )?;
            io::atomic_write(
                &iter_dir.join(format!("{stem}_log.txt")),
                format!("ERROR: {error}\n\n--- STDERR ---\n{stderr}").as_bytes(),
            )
        }
    }
}

/// Reflections from up to `max` iterations before `iteration`, oldest first.
pub fn previous_reflections(results_dir: &Path, iteration: usize, max: usize) -> String {
    let first = iteration.saturating_sub(max).max(1);
    (first..iteration)
        .filter_map(|i| {
            let path = iteration_dir(results_dir, i).join(REFLECTIONS_FILE);
            io::read_lossy(&path).map(|text| format!("### Iteration {i} Reflections\n{text}"))
        })
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

/// Per-query digest of what the current guidance produced.
pub fn summarize_results(results: &[EvalResult]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let n = i + 1;
            match &r.outcome {
                Outcome::Failed { error, stderr } => format!(
                    "### Query {n}: \"{}\"\n**FAILED**: {error}\nstderr: {}",
                    r.query.query,
                    if stderr.is_empty() {
                        "none".to_string()
                    } else {
                        io::excerpt(stderr, 300)
                    }
                ),
                Outcome::Generated(story) => {
                    let chapters = story
                        .chapters
                        .iter()
                        .map(|ch| {
                            format!(
                                "- **{}**: {} snippet(s) ({} lines), explanation length: {} chars",
                                ch.label,
                                ch.snippets.len(),
                                ch.snippets.iter().map(Snippet::line_count).sum::<u64>(),
                                ch.explanation.chars().count()
                            )
                        })
                        .collect::<Vec<_>>()
                        .join("\n");
                    let sample = story
                        .chapters
                        .get(1)
                        .map(|ch| io::excerpt(&ch.explanation, 500))
                        .unwrap_or_else(|| "N/A".to_string());
                    format!(
                        "### Query {n}: \"{}\"\n**Title**: {}\n**Chapters**: {}\n{chapters}\n\n\
                         **Sample explanation (Chapter 2)**:\n{sample}",
                        r.query.query,
                        story.title,
                        story.chapters.len()
                    )
                }
            }
        })
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

// ---------------------------------------------------------------------------
// Agent prompts
// ---------------------------------------------------------------------------

pub fn reflection_prompt(goals: &str, guidance: &str, previous: &str, summaries: &str) -> String {
    let mut out = format!(
        "You are tuning the authoring guidance of a code story generator.\n\n\
         ## Overall Goals\n{goals}\n\n\
         ## Current Authoring Guidance\n```markdown\n{guidance}\n```\n\n"
    );
    if !previous.trim().is_empty() {
        out.push_str(&format!("## Reflections From Previous Iterations\n{previous}\n\n"));
    }
    out.push_str(&format!(
        "## Stories Generated This Iteration\n{summaries}\n\n\
         ## Your Task\n\n\
         Write a reflection on this iteration with these sections:\n\n\
         ### What Worked Well\nCite specific stories.\n\n\
         ### What Needs Improvement\nCite specific stories and relate each problem to the goals.\n\n\
         ### Patterns Across Queries\n\n\
         ### Guidance Changes to Try Next\nConcrete edits to the guidance, each with its expected effect.\n\n\
         ### Priority Score (1-10)\nHow close the output is to the goals; 10 is perfect.\n\n\
         Be specific. Generic advice is not useful."
    ));
    out
}

pub fn improvement_prompt(goals: &str, guidance: &str, reflections: &str) -> String {
    format!(
        "You are tuning the authoring guidance of a code story generator.\n\n\
         ## Overall Goals\n{goals}\n\n\
         ## Current Authoring Guidance\n```markdown\n{guidance}\n```\n\n\
         ## Reflections\n{reflections}\n\n\
         ## Your Task\n\n\
         Rewrite the authoring guidance to apply the changes the reflections recommend \
         while keeping what already works. The guidance covers narrative quality only: \
         chapter structure, snippet selection, explanation style, and tone. Do not \
         mention output files, checkpoints, or the JSON schema.\n\n\
         Output ONLY the new guidance as a markdown bullet list, with no commentary \
         before or after."
    )
}

/// Reject empty or near-empty agent replies.
pub fn check_agent_output(what: &str, text: &str) -> Result<String> {
    let trimmed = text.trim();
    let len = trimmed.chars().count();
    if len < MIN_AGENT_OUTPUT_CHARS {
        return Err(StoryError::AgentOutput(format!(
            "{what} is empty or too short ({len} chars); the agent may have failed silently"
        )));
    }
    Ok(trimmed.to_string())
}

/// Strip a surrounding markdown code fence if the agent added one.
pub fn unfence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    match body.split_once('\n') {
        Some((_lang, inner)) => inner.trim(),
        None => trimmed,
    }
}

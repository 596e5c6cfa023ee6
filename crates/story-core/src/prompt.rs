//! Instruction text sent to the agent.
//!
//! The contract sections (output schema, fixed values, stage blocks, ordering
//! rules) are rendered from the stage registry, so the file names and tokens
//! the agent is told to write are exactly the ones the prober reads back.
//! Only the authoring guidance is free-form; it is passed in as a parameter.

use crate::context::GenerationContext;
use crate::stage::{Stage, STAGES};
use std::fmt::Write as _;
use std::path::Path;

/// Field names, types, and nesting of the final artifact.
pub const OUTPUT_SCHEMA: &str = r#"{
  "id": "string (UUID)",
  "title": "string",
  "query": "string",
  "repo": "string or null (GitHub user/repo when narrating a remote repository)",
  "commitHash": "string",
  "createdAt": "string (ISO 8601)",
  "chapters": [
    {
      "id": "string (e.g. chapter-0)",
      "label": "string (2-4 words, shown in the sidebar)",
      "snippets": [
        {
          "filePath": "string (path relative to the repository root)",
          "startLine": "number (1-indexed)",
          "endLine": "number (1-indexed, inclusive, >= startLine)",
          "content": "string (the exact source text of those lines)"
        }
      ],
      "explanation": "string (markdown)"
    }
  ]
}"#;

/// Default qualitative guidance for the narrative. Tunable; not part of the protocol.
pub const DEFAULT_GUIDANCE: &str = "\
- Open with an overview chapter that has no snippets. It orients the reader and \
defines any specialised terms from the query in one sentence each.
- Close with a summary chapter that has no snippets. It synthesises the big \
picture instead of listing what was covered.
- Give every chapter exactly one teaching point. Build from foundations to \
composition; introduce a term before using it.
- Aim for 5-30 chapters depending on complexity. Labels are 2-4 words.
- When the relevant code spans several files, visit at least two or three of \
them. When it lives in one file, say so early and organise chapters by section.
- Keep each chapter's snippets between 20 and 70 lines in total, 80 at most. \
Use 1-3 snippets per chapter, each at least 3 lines. Prefer whole functions.
- Keep snippets clean: logging, debug output, and commented-out code should \
stay under roughly a tenth of the shown lines. End a range before trailing \
debug blocks, or split around them.
- Include the enclosing type declaration when showing a constructor.
- Vary explanation length with complexity: 60-100 words for simple code, \
120-180 for moderate, 180-250 for complex, 300 at most. The longest \
non-overview explanation should be at least twice the shortest.
- Every explanation says why, not only what. Reference specific lines \
(\"Lines 10-15 handle...\"). When skipping code between two snippets from the \
same file, say briefly what was skipped.
- Vary transitions; do not open more than two chapters the same way.
- Tone: a friendly, insightful colleague. Cover every technology or component \
the query names.";

/// Per-stage content requirements, aligned by position with [`STAGES`].
const STAGE_TASKS: &[&str] = &[
    "Explore the codebase to find the code relevant to the query. Record:\n\
     ## Relevant Files (each file and its role)\n\
     ## Key Components (types, functions, constants and how they relate)\n\
     ## Flow Analysis (how data and control move for this query)\n\
     ## Entry Points\n\
     ## Dependencies",
    "Plan the story as an outline. Record:\n\
     ## Story Title\n\
     ## Overview (2-3 sentences)\n\
     ## Chapter Sequence, one `### Chapter N: Label` block per chapter with its \
     purpose, the code to show, the key point, and the transition to the next chapter.",
    "Review the outline critically: one teaching point per chapter, terms \
     introduced before use, logical progression, no redundant chapters, smooth \
     transitions, prose-only bookend chapters, and coverage of everything the \
     query names. Revise the outline in place, then add a `## Review Notes` \
     section describing what changed. Keep the previous checkpoint line; add the \
     new one after it.",
    "For every chapter, choose the exact code to show. Record one `### Chapter N: Label` \
     block per chapter listing each snippet's file (relative to the repository \
     root), line range (1-indexed, inclusive), and the reason it was chosen. \
     Bookend chapters list no snippets.",
    "Read the code behind every snippet and write the explanations. Then write \
     the complete story as a single JSON document matching the output schema \
     above, using the fixed values above verbatim. Snippet `content` must match \
     the source exactly and line numbers must be accurate. Writing this file is \
     the last thing you do; it needs no checkpoint line.",
];

/// Render the full prompt for `ctx` using the canonical stage registry.
pub fn build(ctx: &GenerationContext, guidance: &str) -> String {
    render(
        STAGES,
        &ctx.query,
        &ctx.working_dir,
        &ctx.source_commit,
        &ctx.generation_id,
        ctx.external_repo_ref.as_deref(),
        &ctx.created_at_rfc3339(),
        guidance,
    )
}

/// Render a prompt from explicit inputs.
#[allow(clippy::too_many_arguments)]
pub fn render(
    stages: &[Stage],
    query: &str,
    working_dir: &Path,
    commit_hash: &str,
    generation_id: &str,
    external_repo_ref: Option<&str>,
    created_at: &str,
    guidance: &str,
) -> String {
    let dir = working_dir.display();
    let mut out = String::new();

    let _ = writeln!(
        out,
        "You are an expert code narrator. Create a \"code story\": a guided, \
         chapter-by-chapter tour of this codebase that answers the query below. \
         Each chapter pairs code snippets with a markdown explanation.\n"
    );
    let _ = writeln!(out, "Query: {}\n", json_string(query));

    // (a) output contract
    let _ = writeln!(out, "## Output contract\n");
    let _ = writeln!(
        out,
        "Your final act is to write one JSON document matching this schema exactly:\n"
    );
    let _ = writeln!(out, "{OUTPUT_SCHEMA}\n");

    // (b) fixed values
    let _ = writeln!(out, "## Fixed values\n");
    let _ = writeln!(out, "Copy these into the document verbatim:");
    let _ = writeln!(out, "- id: {}", json_string(generation_id));
    let _ = writeln!(out, "- query: {}", json_string(query));
    let _ = writeln!(
        out,
        "- repo: {}",
        external_repo_ref
            .map(json_string)
            .unwrap_or_else(|| "null".to_string())
    );
    let _ = writeln!(out, "- commitHash: {}", json_string(commit_hash));
    let _ = writeln!(out, "- createdAt: {}\n", json_string(created_at));

    // (d) ordering constraint
    let _ = writeln!(out, "## Rules\n");
    let _ = writeln!(out, "Working directory for this generation: {dir}/\n");
    let _ = writeln!(
        out,
        "1. Complete the stages strictly in order. Never work on more than one stage at a time.\n\
         2. Before starting a stage, read the previous stage's file and confirm its checkpoint line is present.\n\
         3. When a stage is complete, append its checkpoint line exactly as given, on a line of its own.\n\
         4. Write only inside the working directory.\n"
    );

    // (c) stage blocks
    for (i, stage) in stages.iter().enumerate() {
        let n = i + 1;
        let _ = writeln!(out, "## Stage {n}: {}\n", stage.label);
        if let Some(prev) = i.checked_sub(1).and_then(|p| stages.get(p)) {
            if let Some(token) = prev.checkpoint_token {
                let _ = writeln!(
                    out,
                    "First, read {dir}/{} and verify it contains {token}. Do not continue until it does.\n",
                    prev.expected_file
                );
            }
        }
        if let Some(task) = STAGE_TASKS.get(i) {
            let _ = writeln!(out, "{task}\n");
        }
        let _ = writeln!(out, "Write to: {dir}/{}", stage.expected_file);
        match stage.checkpoint_line() {
            Some(line) => {
                let _ = writeln!(out, "End the file with exactly this line:\n{line}\n");
            }
            None => {
                let _ = writeln!(out, "When this file is written, generation is finished.\n");
            }
        }
    }

    // (e) authoring guidance
    let _ = writeln!(out, "## Authoring guidance\n");
    let _ = writeln!(out, "{}", guidance.trim_end());

    out
}

fn json_string(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

//! Plain-text rendering of a story for the terminal.
//!
//! Layout: a header (title, query, provenance), a numbered chapter index,
//! then each chapter with its snippets in a line-number gutter followed by
//! the markdown explanation as written.

use std::fmt::Write as _;
use story_core::story::{Chapter, Snippet, Story};

const RULE_WIDTH: usize = 72;

/// Render `story`, or only its 1-based chapter `only`.
pub fn render(story: &Story, only: Option<usize>) -> anyhow::Result<String> {
    let total = story.chapters.len();
    let mut out = String::new();
    header(&mut out, story);

    match only {
        Some(n) => {
            let chapter = n
                .checked_sub(1)
                .and_then(|i| story.chapters.get(i))
                .ok_or_else(|| anyhow::anyhow!("chapter {n} does not exist; the story has {total}"))?;
            chapter_block(&mut out, n, total, chapter);
        }
        None => {
            index(&mut out, &story.chapters);
            for (i, chapter) in story.chapters.iter().enumerate() {
                chapter_block(&mut out, i + 1, total, chapter);
            }
        }
    }
    Ok(out)
}

fn header(out: &mut String, story: &Story) {
    let _ = writeln!(out, "{}", story.title);
    let _ = writeln!(out, "{}", "=".repeat(story.title.chars().count().max(3)));
    let _ = writeln!(out, "Query:   {}", story.query);
    let commit = story.commit_hash.get(..7).unwrap_or(&story.commit_hash);
    match &story.repo {
        Some(repo) => {
            let _ = writeln!(out, "Source:  {repo} @ {commit}");
        }
        None => {
            let _ = writeln!(out, "Commit:  {commit}");
        }
    }
    let _ = writeln!(out, "Created: {}", story.created_at);
    out.push('\n');
}

fn index(out: &mut String, chapters: &[Chapter]) {
    let _ = writeln!(out, "Chapters");
    let width = chapters.len().to_string().len();
    for (i, ch) in chapters.iter().enumerate() {
        let _ = writeln!(out, "  {:>width$}. {}", i + 1, ch.label);
    }
    out.push('\n');
}

fn chapter_block(out: &mut String, n: usize, total: usize, chapter: &Chapter) {
    let title = format!("-- Chapter {n}/{total}: {} ", chapter.label);
    let pad = RULE_WIDTH.saturating_sub(title.chars().count());
    let _ = writeln!(out, "{title}{}", "-".repeat(pad));
    out.push('\n');
    for snippet in &chapter.snippets {
        snippet_block(out, snippet);
    }
    let _ = writeln!(out, "{}", chapter.explanation.trim_end());
    out.push('\n');
}

fn snippet_block(out: &mut String, snippet: &Snippet) {
    let _ = writeln!(
        out,
        "{}:{}-{}",
        snippet.file_path, snippet.start_line, snippet.end_line
    );
    let width = snippet.end_line.max(snippet.start_line).to_string().len();
    for (offset, line) in snippet.content.lines().enumerate() {
        let number = snippet.start_line + offset as u64;
        let _ = writeln!(out, "  {number:>width$} | {line}");
    }
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;

    fn story() -> Story {
        Story::parse(
            r#"{
                "id": "123e4567-e89b-12d3-a456-426614174000",
                "title": "Routing",
                "query": "How are requests routed?",
                "repo": "tokio-rs/axum",
                "commitHash": "0123456789abcdef",
                "createdAt": "2026-10-19T09:00:00Z",
                "chapters": [
                    {"id": "chapter-0", "label": "Overview", "snippets": [],
                     "explanation": "Requests flow through a **router**."},
                    {"id": "chapter-1", "label": "Route Table",
                     "snippets": [{"filePath": "src/router.rs", "startLine": 9, "endLine": 11,
                                   "content": "match path {\n    \"/\" => index,\n}"}],
                     "explanation": "Notice the fallback arm."}
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn full_render_has_header_index_and_gutter() {
        let out = render(&story(), None).unwrap();
        assert!(out.starts_with("Routing\n=======\n"));
        assert!(out.contains("Source:  tokio-rs/axum @ 0123456\n"));
        assert!(out.contains("Chapters\n  1. Overview\n  2. Route Table\n"));
        assert!(out.contains("src/router.rs:9-11\n"));
        assert!(out.contains("   9 | match path {\n"));
        assert!(out.contains("  11 | }\n"));
        assert!(out.contains("Notice the fallback arm."));
    }

    #[test]
    fn single_chapter_skips_the_index() {
        let out = render(&story(), Some(2)).unwrap();
        assert!(out.contains("-- Chapter 2/2: Route Table "));
        assert!(!out.contains("Chapters\n"));
        assert!(!out.contains("Requests flow through"));
    }

    #[test]
    fn missing_chapter_is_an_error() {
        assert!(render(&story(), Some(0)).is_err());
        let err = render(&story(), Some(3)).unwrap_err();
        assert!(err.to_string().contains("has 2"));
    }
}

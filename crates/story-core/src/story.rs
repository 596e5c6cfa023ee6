//! The story document: the artifact the agent writes and the viewer reads.
//!
//! Validation runs over the raw JSON value before deserialising, so a failure
//! names the exact offending field (`chapters[2].snippets[0].startLine`).

use crate::error::{Result, StoryError};
use crate::paths;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Story {
    pub id: String,
    pub title: String,
    pub query: String,
    pub repo: Option<String>,
    pub commit_hash: String,
    pub created_at: String,
    pub chapters: Vec<Chapter>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    pub id: String,
    pub label: String,
    pub snippets: Vec<Snippet>,
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snippet {
    pub file_path: String,
    pub start_line: u64,
    pub end_line: u64,
    pub content: String,
}

impl Snippet {
    pub fn line_count(&self) -> u64 {
        self.end_line.saturating_sub(self.start_line) + 1
    }
}

/// Listing record kept in the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorySummary {
    pub id: String,
    pub title: String,
    pub commit_hash: String,
    pub created_at: String,
}

impl Story {
    pub fn summary(&self) -> StorySummary {
        StorySummary {
            id: self.id.clone(),
            title: self.title.clone(),
            commit_hash: self.commit_hash.clone(),
            created_at: self.created_at.clone(),
        }
    }

    /// Parse and validate a document from text.
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| StoryError::ArtifactMalformed(e.to_string()))?;
        Self::from_value(value)
    }

    /// Validate a parsed document against the output contract and return the
    /// typed story with its id in canonical form.
    pub fn from_value(value: Value) -> Result<Self> {
        validate(&value)?;
        let mut story: Story = serde_json::from_value(value)
            .map_err(|e| StoryError::ArtifactMalformed(e.to_string()))?;
        story.id = paths::canonical_id(&story.id)?;
        Ok(story)
    }

    pub fn to_pretty_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

// ---------------------------------------------------------------------------
// Contract validation
// ---------------------------------------------------------------------------

/// Check every required field's presence and primitive shape, in document
/// order, stopping at the first violation. The id pattern is checked last so
/// a structurally broken document reports its structure first.
pub fn validate(value: &Value) -> Result<()> {
    let root = value
        .as_object()
        .ok_or_else(|| StoryError::invalid("$", "must be a JSON object"))?;

    if root.contains_key("views") && !root.contains_key("chapters") {
        return Err(StoryError::invalid(
            "views",
            "belongs to a retired schema; the document must use `chapters`",
        ));
    }

    require_str(root, "id", "id")?;
    require_str(root, "title", "title")?;
    require_str(root, "query", "query")?;
    match root.get("repo") {
        None | Some(Value::Null) | Some(Value::String(_)) => {}
        Some(_) => return Err(StoryError::invalid("repo", "must be a string or null")),
    }
    require_str(root, "commitHash", "commitHash")?;
    require_str(root, "createdAt", "createdAt")?;

    let chapters = require_array(root, "chapters", "chapters")?;
    if chapters.is_empty() {
        return Err(StoryError::invalid("chapters", "must not be empty"));
    }
    for (ci, chapter) in chapters.iter().enumerate() {
        validate_chapter(ci, chapter)?;
    }

    if let Some(id) = root.get("id").and_then(Value::as_str) {
        if !paths::is_uuid(id) {
            return Err(StoryError::InvalidIdentifier(id.to_string()));
        }
    }
    Ok(())
}

fn validate_chapter(ci: usize, chapter: &Value) -> Result<()> {
    let at = format!("chapters[{ci}]");
    let obj = chapter
        .as_object()
        .ok_or_else(|| StoryError::invalid(&at, "must be an object"))?;
    require_str(obj, "id", &format!("{at}.id"))?;
    require_str(obj, "label", &format!("{at}.label"))?;
    let snippets = require_array(obj, "snippets", &format!("{at}.snippets"))?;
    for (si, snippet) in snippets.iter().enumerate() {
        validate_snippet(&format!("{at}.snippets[{si}]"), snippet)?;
    }
    require_str(obj, "explanation", &format!("{at}.explanation"))?;
    Ok(())
}

fn validate_snippet(at: &str, snippet: &Value) -> Result<()> {
    let obj = snippet
        .as_object()
        .ok_or_else(|| StoryError::invalid(at, "must be an object"))?;
    require_str(obj, "filePath", &format!("{at}.filePath"))?;
    let start = require_line(obj, "startLine", &format!("{at}.startLine"))?;
    let end = require_line(obj, "endLine", &format!("{at}.endLine"))?;
    require_str(obj, "content", &format!("{at}.content"))?;
    if start > end {
        return Err(StoryError::invalid(
            format!("{at}.startLine"),
            format!("({start}) must not exceed endLine ({end})"),
        ));
    }
    Ok(())
}

fn require_str<'a>(obj: &'a Map<String, Value>, key: &str, at: &str) -> Result<&'a str> {
    match obj.get(key) {
        None => Err(StoryError::invalid(at, "is missing")),
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(StoryError::invalid(at, "must be a string")),
    }
}

fn require_array<'a>(obj: &'a Map<String, Value>, key: &str, at: &str) -> Result<&'a Vec<Value>> {
    match obj.get(key) {
        None => Err(StoryError::invalid(at, "is missing")),
        Some(Value::Array(a)) => Ok(a),
        Some(_) => Err(StoryError::invalid(at, "must be an array")),
    }
}

fn require_line(obj: &Map<String, Value>, key: &str, at: &str) -> Result<u64> {
    match obj.get(key) {
        None => Err(StoryError::invalid(at, "is missing")),
        Some(v) => match v.as_u64() {
            Some(n) if n >= 1 => Ok(n),
            Some(_) => Err(StoryError::invalid(at, "must be 1 or greater (lines are 1-indexed)")),
            None => Err(StoryError::invalid(at, "must be a positive integer")),
        },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Resolving and loading a story document for viewing.
//!
//! A document can come from the local catalog, a file on disk, or a URL.
//! Whatever the source, it goes through the same validator as ingestion, so
//! a malformed document is rejected instead of rendered partially.

use crate::catalog::Catalog;
use crate::error::{Result, StoryError};
use crate::paths;
use crate::story::Story;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const RAW_GITHUB_BASE: &str = "https://raw.githubusercontent.com";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentSource {
    CatalogId(String),
    File(PathBuf),
    Url(String),
}

/// Classify a user-supplied source string.
///
/// URLs win, then an existing file, then a UUID looked up in the catalog.
/// Anything else is treated as a path, so a typo surfaces as "not found".
pub fn resolve_source(input: &str) -> DocumentSource {
    let input = input.trim();
    if input.starts_with("http://") || input.starts_with("https://") {
        return DocumentSource::Url(input.to_string());
    }
    let path = PathBuf::from(input);
    if path.is_file() {
        return DocumentSource::File(path);
    }
    if paths::is_uuid(input) {
        return DocumentSource::CatalogId(input.to_string());
    }
    DocumentSource::File(path)
}

/// Raw URL of a story committed to a GitHub repository's `stories/` dir.
pub fn github_story_url(repo_ref: &str, story_id: &str) -> Result<String> {
    let id = paths::canonical_id(story_id)?;
    Ok(format!(
        "{RAW_GITHUB_BASE}/{repo_ref}/main/{}/{id}.json",
        paths::DEFAULT_STORIES_DIR
    ))
}

/// Fetch a document over HTTP and validate it.
pub fn fetch(url: &str) -> Result<Story> {
    debug!(url, "fetching story");
    let client = reqwest::blocking::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .build()
        .map_err(|e| StoryError::Fetch(e.to_string()))?;
    let resp = client
        .get(url)
        .send()
        .map_err(|e| StoryError::Fetch(format!("{url}: {e}")))?;
    let status = resp.status();
    if !status.is_success() {
        return Err(StoryError::Fetch(format!("{url}: HTTP {status}")));
    }
    let text = resp
        .text()
        .map_err(|e| StoryError::Fetch(format!("{url}: {e}")))?;
    Story::parse(&text)
}

/// Load and validate a story from any source.
pub fn load(source: &DocumentSource, catalog: Option<&Catalog>) -> Result<Story> {
    match source {
        DocumentSource::Url(url) => fetch(url),
        DocumentSource::File(path) => {
            let text = match std::fs::read_to_string(path) {
                Ok(text) => text,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(StoryError::StoryNotFound(path.display().to_string()));
                }
                Err(e) => return Err(e.into()),
            };
            Story::parse(&text)
        }
        DocumentSource::CatalogId(id) => match catalog {
            Some(catalog) => catalog.get(id),
            None => Err(StoryError::StoryNotFound(id.clone())),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::story::tests::{sample_value, ID};
    use tempfile::TempDir;

    #[test]
    fn classify_sources() {
        assert_eq!(
            resolve_source("https://example.com/s.json"),
            DocumentSource::Url("https://example.com/s.json".into())
        );
        assert_eq!(resolve_source(ID), DocumentSource::CatalogId(ID.into()));
        assert_eq!(
            resolve_source("missing.json"),
            DocumentSource::File(PathBuf::from("missing.json"))
        );
    }

    #[test]
    fn existing_file_wins_over_id() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("story.json");
        std::fs::write(&path, "{}").unwrap();
        assert_eq!(
            resolve_source(path.to_str().unwrap()),
            DocumentSource::File(path)
        );
    }

    #[test]
    fn github_url_shape() {
        assert_eq!(
            github_story_url("user/repo", &ID.to_uppercase()).unwrap(),
            format!("https://raw.githubusercontent.com/user/repo/main/stories/{ID}.json")
        );
        assert!(github_story_url("user/repo", "nope").is_err());
    }

    #[test]
    fn load_from_file_validates() {
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("good.json");
        std::fs::write(&good, sample_value(ID).to_string()).unwrap();
        let story = load(&DocumentSource::File(good), None).unwrap();
        assert_eq!(story.id, ID);

        let mut v = sample_value(ID);
        v["chapters"][0].as_object_mut().unwrap().remove("snippets");
        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, v.to_string()).unwrap();
        assert!(matches!(
            load(&DocumentSource::File(bad), None).unwrap_err(),
            StoryError::ArtifactInvalid { .. }
        ));
    }

    #[test]
    fn load_missing_file_is_not_found() {
        let err = load(&DocumentSource::File("/no/such/story.json".into()), None).unwrap_err();
        assert!(matches!(err, StoryError::StoryNotFound(_)));
    }

    #[test]
    fn fetch_valid_document() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/stories/s.json")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(sample_value(ID).to_string())
            .create();
        let story = fetch(&format!("{}/stories/s.json", server.url())).unwrap();
        assert_eq!(story.title, "How Requests Find Their Handler");
        mock.assert();
    }

    #[test]
    fn fetch_http_error() {
        let mut server = mockito::Server::new();
        server.mock("GET", "/missing.json").with_status(404).create();
        let err = fetch(&format!("{}/missing.json", server.url())).unwrap_err();
        assert!(matches!(err, StoryError::Fetch(ref m) if m.contains("404")));
    }

    #[test]
    fn fetch_rejects_legacy_schema() {
        let mut server = mockito::Server::new();
        let mut v = sample_value(ID);
        let chapters = v.as_object_mut().unwrap().remove("chapters").unwrap();
        v["views"] = chapters;
        server
            .mock("GET", "/old.json")
            .with_status(200)
            .with_body(v.to_string())
            .create();
        let err = fetch(&format!("{}/old.json", server.url())).unwrap_err();
        assert!(matches!(err, StoryError::ArtifactInvalid { ref field, .. } if field == "views"));
    }
}

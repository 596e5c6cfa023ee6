use crate::cmd::{open_catalog, Overrides};
use crate::output::print_json;
use crate::render;
use std::path::Path;
use story_core::git;
use story_core::remote::{self, DocumentSource};

/// Where the story to show comes from: a positional source, or a
/// `--repo`/`--story` pair naming a story committed to GitHub.
pub struct ShowTarget {
    pub source: Option<String>,
    pub repo: Option<String>,
    pub story: Option<String>,
}

impl ShowTarget {
    fn resolve(&self) -> anyhow::Result<DocumentSource> {
        match (&self.source, &self.repo, &self.story) {
            (None, Some(repo), Some(story)) => {
                let repo_ref = git::parse_repo_ref(repo)?;
                Ok(DocumentSource::Url(remote::github_story_url(&repo_ref, story)?))
            }
            (Some(source), None, None) => Ok(remote::resolve_source(source)),
            _ => anyhow::bail!(
                "give a story id, a .json file or a URL, or both --repo and --story"
            ),
        }
    }
}

pub fn run(
    root: &Path,
    overrides: &Overrides,
    target: ShowTarget,
    chapter: Option<usize>,
    json: bool,
) -> anyhow::Result<()> {
    let source = target.resolve()?;
    // Only catalog lookups need the stories directory; don't create one otherwise.
    let catalog = match &source {
        DocumentSource::CatalogId(_) => {
            let config = overrides.load_config(root)?;
            Some(open_catalog(root, &config)?)
        }
        _ => None,
    };
    let story = remote::load(&source, catalog.as_ref())?;

    if json {
        return print_json(&story);
    }
    print!("{}", render::render(&story, chapter)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(source: Option<&str>, repo: Option<&str>, story: Option<&str>) -> ShowTarget {
        ShowTarget {
            source: source.map(String::from),
            repo: repo.map(String::from),
            story: story.map(String::from),
        }
    }

    #[test]
    fn repo_and_story_resolve_to_raw_github_url() {
        let src = target(
            None,
            Some("https://github.com/tokio-rs/axum"),
            Some("123E4567-E89B-12D3-A456-426614174000"),
        )
        .resolve()
        .unwrap();
        assert_eq!(
            src,
            DocumentSource::Url(
                "https://raw.githubusercontent.com/tokio-rs/axum/main/stories/123e4567-e89b-12d3-a456-426614174000.json"
                    .into()
            )
        );
    }

    #[test]
    fn uuid_source_is_a_catalog_lookup() {
        let src = target(Some("123e4567-e89b-12d3-a456-426614174000"), None, None)
            .resolve()
            .unwrap();
        assert!(matches!(src, DocumentSource::CatalogId(_)));
    }

    #[test]
    fn nothing_to_show_is_an_error() {
        assert!(target(None, None, None).resolve().is_err());
        assert!(target(None, Some("user/repo"), None).resolve().is_err());
    }
}

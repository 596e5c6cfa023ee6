use crate::catalog::Catalog;
use crate::error::{Result, StoryError};
use crate::io;
use crate::story::Story;
use std::path::Path;
use tracing::{info, warn};

/// Validate the agent's final artifact and admit it to the catalog.
///
/// On success the story file and manifest entry are written and
/// `working_dir` is removed. On any failure nothing is written and the
/// working directory is left in place for inspection.
///
/// The three writes are not transactional; [`Catalog::reindex`] recovers a
/// story whose manifest entry was lost to a crash between them.
pub fn ingest(
    catalog: &Catalog,
    working_dir: &Path,
    expected_file: &str,
    generation_id: Option<&str>,
) -> Result<Story> {
    let path = working_dir.join(expected_file);
    if !path.is_file() {
        return Err(StoryError::ArtifactMissing(path));
    }
    let text = std::fs::read_to_string(&path)
        .map_err(|e| StoryError::ArtifactMalformed(format!("{}: {e}", path.display())))?;
    let story = Story::parse(&text)?;

    if let Some(expected) = generation_id {
        if !story.id.eq_ignore_ascii_case(expected) {
            warn!(
                generation_id = %expected,
                story_id = %story.id,
                "story id differs from the generation id; keeping the story's id"
            );
        }
    }

    catalog.record(&story)?;
    if let Err(e) = io::remove_dir_all_if_exists(working_dir) {
        warn!(dir = %working_dir.display(), error = %e, "could not remove working directory");
    }
    info!(story_id = %story.id, title = %story.title, "story ingested");
    Ok(story)
}

use crate::cmd::{open_catalog, Overrides};
use crate::output::print_json;
use std::path::Path;

/// Rebuild `manifest.json` from the story files. Recovers entries lost when
/// an ingest was interrupted between writing the story and the manifest.
pub fn run(root: &Path, overrides: &Overrides, json: bool) -> anyhow::Result<()> {
    let config = overrides.load_config(root)?;
    let catalog = open_catalog(root, &config)?;
    let count = catalog.reindex()?;
    if json {
        print_json(&serde_json::json!({ "stories": count }))
    } else {
        println!(
            "Reindexed {count} stor{} in {}",
            if count == 1 { "y" } else { "ies" },
            catalog.stories_dir().display()
        );
        Ok(())
    }
}

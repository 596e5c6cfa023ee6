use crate::cmd::Overrides;
use crate::output::{print_json, print_table};
use std::path::Path;
use story_core::paths;
use story_core::probe;
use story_core::stage::STAGES;

/// Probe a generation's working directory. Read-only; safe to run while the
/// agent is writing.
pub fn run(root: &Path, overrides: &Overrides, generation_id: &str, json: bool) -> anyhow::Result<()> {
    let id = paths::canonical_id(generation_id)?;
    let config = overrides.load_config(root)?;
    let stories_dir = config.stories_dir(root);
    let working_dir = paths::working_dir(&stories_dir, &id);

    let mut progress = probe::probe(STAGES, &working_dir);
    let status = if paths::story_path(&stories_dir, &id).is_file() {
        progress.stage = progress.total;
        progress.percent = 100;
        progress.label = story_core::stage::label_for(STAGES, progress.total);
        "complete"
    } else if working_dir.is_dir() {
        "in_progress"
    } else {
        "unknown"
    };

    if json {
        let mut value = serde_json::to_value(&progress)?;
        if let Some(obj) = value.as_object_mut() {
            obj.insert("generationId".into(), serde_json::json!(id));
            obj.insert("status".into(), serde_json::json!(status));
        }
        return print_json(&value);
    }

    println!(
        "{id}: {status}, stage {}/{} ({}%) {}",
        progress.stage, progress.total, progress.percent, progress.label
    );
    if !progress.files.is_empty() {
        let rows: Vec<Vec<String>> = progress
            .files
            .iter()
            .map(|(name, f)| {
                vec![
                    name.clone(),
                    yes_no(f.exists).to_string(),
                    yes_no(f.has_expected_token).to_string(),
                ]
            })
            .collect();
        println!();
        print_table(&["FILE", "EXISTS", "CHECKPOINT"], &rows);
    }
    Ok(())
}

fn yes_no(b: bool) -> &'static str {
    if b {
        "yes"
    } else {
        "no"
    }
}

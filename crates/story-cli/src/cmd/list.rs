use crate::cmd::{open_catalog, Overrides};
use crate::output::{print_json, print_table, truncate};
use std::path::Path;
use story_core::probe;
use story_core::stage::STAGES;

pub fn run(root: &Path, overrides: &Overrides, working: bool, json: bool) -> anyhow::Result<()> {
    let config = overrides.load_config(root)?;
    let catalog = open_catalog(root, &config)?;

    if working {
        let dirs = catalog.list_working_dirs()?;
        if json {
            let items: Vec<serde_json::Value> = dirs
                .iter()
                .map(|d| {
                    serde_json::json!({
                        "generationId": d.generation_id,
                        "path": d.path,
                        "progress": probe::probe(STAGES, &d.path),
                    })
                })
                .collect();
            return print_json(&items);
        }
        if dirs.is_empty() {
            println!("No working directories.");
            return Ok(());
        }
        let rows: Vec<Vec<String>> = dirs
            .iter()
            .map(|d| {
                let p = probe::probe(STAGES, &d.path);
                vec![
                    d.generation_id.clone(),
                    format!("{}/{}", p.stage, p.total),
                    d.path.display().to_string(),
                ]
            })
            .collect();
        print_table(&["GENERATION", "STAGE", "PATH"], &rows);
        return Ok(());
    }

    let stories = catalog.list()?;
    if json {
        return print_json(&stories);
    }
    if stories.is_empty() {
        println!("No stories yet. Create one with: code-stories generate \"<question>\"");
        return Ok(());
    }
    let rows: Vec<Vec<String>> = stories
        .iter()
        .map(|s| {
            vec![
                s.id.clone(),
                truncate(&s.title, 50),
                short_commit(&s.commit_hash).to_string(),
                created(&s.created_at),
            ]
        })
        .collect();
    print_table(&["ID", "TITLE", "COMMIT", "CREATED"], &rows);
    Ok(())
}

fn short_commit(hash: &str) -> &str {
    hash.get(..7).unwrap_or(hash)
}

/// `createdAt` as a UTC timestamp, or verbatim if it does not parse.
fn created(raw: &str) -> String {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|t| {
            t.with_timezone(&chrono::Utc)
                .format("%Y-%m-%d %H:%M UTC")
                .to_string()
        })
        .unwrap_or_else(|_| raw.to_string())
}

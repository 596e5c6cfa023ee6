use crate::io::read_lossy;
use crate::stage::{self, Stage};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStatus {
    pub exists: bool,
    pub has_expected_token: bool,
}

/// Snapshot of how far an agent has progressed through the stage registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    /// Number of leading stages fully satisfied, in `[0, total]`.
    pub stage: usize,
    pub total: usize,
    pub label: &'static str,
    pub percent: u8,
    pub files: BTreeMap<String, FileStatus>,
}

impl Progress {
    fn new(stages: &[Stage], stage: usize, files: BTreeMap<String, FileStatus>) -> Self {
        let total = stages.len();
        let percent = if total == 0 {
            100
        } else {
            ((stage as f64 / total as f64) * 100.0).round() as u8
        };
        Self {
            stage,
            total,
            label: stage::label_for(stages, stage),
            percent,
            files,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.stage == self.total
    }
}

/// Infer progress from the files the agent has written so far.
///
/// Never fails and never writes. A missing working directory yields stage 0
/// with an empty file map; unreadable files count as lacking their token.
pub fn probe(stages: &[Stage], working_dir: &Path) -> Progress {
    if !working_dir.is_dir() {
        return Progress::new(stages, 0, BTreeMap::new());
    }

    // Read each distinct file once so a stage pair sharing a file sees one snapshot.
    let mut contents: BTreeMap<&'static str, Option<String>> = BTreeMap::new();
    for file in stage::distinct_files(stages) {
        let path = working_dir.join(file);
        let content = if path.is_file() {
            Some(read_lossy(&path).unwrap_or_default())
        } else {
            None
        };
        contents.insert(file, content);
    }

    let mut reached = 0;
    for s in stages {
        match contents.get(s.expected_file).and_then(|c| c.as_deref()) {
            Some(content) if s.is_satisfied_by(content) => reached += 1,
            _ => break,
        }
    }

    let files = contents
        .iter()
        .map(|(file, content)| {
            let status = match content {
                None => FileStatus {
                    exists: false,
                    has_expected_token: false,
                },
                Some(text) => FileStatus {
                    exists: true,
                    has_expected_token: stage::final_token_for(stages, file)
                        .map(|t| text.contains(t))
                        .unwrap_or(true),
                },
            };
            (file.to_string(), status)
        })
        .collect();

    Progress::new(stages, reached, files)
}

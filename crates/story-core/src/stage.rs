//! The ordered stage registry shared by the prompt builder and the progress
//! prober.
//!
//! Both sides read the same static table: the prompt tells the agent which
//! file to write and which token to append, and the prober reads those files
//! back. A stage may share its file with an earlier stage; the two are told
//! apart by their checkpoint tokens.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage {
    /// File name relative to the generation working directory.
    pub expected_file: &'static str,
    /// Literal marker the agent appends when the stage is done.
    /// `None` means existence of the file is sufficient.
    pub checkpoint_token: Option<&'static str>,
    pub label: &'static str,
}

pub const EXPLORATION_NOTES: &str = "exploration_notes.md";
pub const NARRATIVE_OUTLINE: &str = "narrative_outline.md";
pub const SNIPPETS_MAPPING: &str = "snippets_mapping.md";
pub const STORY_FILE: &str = "story.json";

pub const STAGES: &[Stage] = &[
    Stage {
        expected_file: EXPLORATION_NOTES,
        checkpoint_token: Some("STAGE_1_COMPLETE"),
        label: "Exploring codebase",
    },
    Stage {
        expected_file: NARRATIVE_OUTLINE,
        checkpoint_token: Some("STAGE_2_COMPLETE"),
        label: "Creating narrative outline",
    },
    Stage {
        expected_file: NARRATIVE_OUTLINE,
        checkpoint_token: Some("STAGE_3_COMPLETE"),
        label: "Reviewing flow",
    },
    Stage {
        expected_file: SNIPPETS_MAPPING,
        checkpoint_token: Some("STAGE_4_COMPLETE"),
        label: "Identifying code snippets",
    },
    Stage {
        expected_file: STORY_FILE,
        checkpoint_token: None,
        label: "Crafting explanations",
    },
];

impl Stage {
    /// The marker line written into the stage file.
    pub fn checkpoint_line(&self) -> Option<String> {
        self.checkpoint_token
            .map(|token| format!("<!-- CHECKPOINT: {token} -->"))
    }

    /// Whether `content` satisfies this stage. A plain substring match on the
    /// literal token is both necessary and sufficient.
    pub fn is_satisfied_by(&self, content: &str) -> bool {
        match self.checkpoint_token {
            Some(token) => content.contains(token),
            None => true,
        }
    }
}

/// The final stage, whose file is the artifact itself.
pub fn final_stage(stages: &[Stage]) -> Option<&Stage> {
    stages.last()
}

/// Label to show while working toward stage `index` (0-based).
pub fn label_for(stages: &[Stage], index: usize) -> &'static str {
    stages.get(index).map(|s| s.label).unwrap_or("Complete")
}

/// For a file shared by several stages, the token of the last stage naming it.
pub fn final_token_for(stages: &[Stage], file: &str) -> Option<&'static str> {
    stages
        .iter()
        .rev()
        .find(|s| s.expected_file == file)
        .and_then(|s| s.checkpoint_token)
}

/// Distinct stage files, in first-appearance order.
pub fn distinct_files(stages: &[Stage]) -> Vec<&'static str> {
    let mut files: Vec<&'static str> = Vec::new();
    for stage in stages {
        if !files.contains(&stage.expected_file) {
            files.push(stage.expected_file);
        }
    }
    files
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_ends_with_token_free_artifact() {
        let last = final_stage(STAGES).unwrap();
        assert_eq!(last.expected_file, STORY_FILE);
        assert!(last.checkpoint_token.is_none());
    }

    #[test]
    fn shared_outline_file_has_distinct_tokens() {
        let outline: Vec<_> = STAGES
            .iter()
            .filter(|s| s.expected_file == NARRATIVE_OUTLINE)
            .collect();
        assert_eq!(outline.len(), 2);
        assert_ne!(outline[0].checkpoint_token, outline[1].checkpoint_token);
    }

    #[test]
    fn tokens_are_unique() {
        let tokens: Vec<_> = STAGES.iter().filter_map(|s| s.checkpoint_token).collect();
        for (i, t) in tokens.iter().enumerate() {
            assert!(!tokens[i + 1..].contains(t), "duplicate token {t}");
        }
    }

    #[test]
    fn literal_token_is_necessary_and_sufficient() {
        let stage = STAGES[0];
        assert!(stage.is_satisfied_by("STAGE_1_COMPLETE"));
        assert!(stage.is_satisfied_by("notes...\n<!-- CHECKPOINT: STAGE_1_COMPLETE -->\n"));
        assert!(!stage.is_satisfied_by("stage_1_complete"));
        assert!(!stage.is_satisfied_by("STAGE_1_COMPLET"));
        assert!(!stage.is_satisfied_by("STAGE 1 COMPLETE"));
    }

    #[test]
    fn final_token_for_shared_file_is_review_token() {
        assert_eq!(
            final_token_for(STAGES, NARRATIVE_OUTLINE),
            Some("STAGE_3_COMPLETE")
        );
        assert_eq!(final_token_for(STAGES, STORY_FILE), None);
    }

    #[test]
    fn distinct_files_dedupes_in_order() {
        assert_eq!(
            distinct_files(STAGES),
            vec![EXPLORATION_NOTES, NARRATIVE_OUTLINE, SNIPPETS_MAPPING, STORY_FILE]
        );
    }

    #[test]
    fn label_past_end_is_complete() {
        assert_eq!(label_for(STAGES, 0), "Exploring codebase");
        assert_eq!(label_for(STAGES, STAGES.len()), "Complete");
    }
}

use serde::{Deserialize, Serialize};

use crate::core::diff_parser::FileDiff;

/// Metadata describing the change under review. For the `pr` command it comes
/// from the hosting API; for local diffs it is synthesized from the repository.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrMetadata {
    pub title: String,
    pub description: String,
    pub branch: Option<String>,
    pub head_sha: Option<String>,
    pub base_sha: Option<String>,
}

/// Everything one review run operates on. Built once, then handed to the
/// orchestrator; nothing in the pipeline mutates it.
#[derive(Debug, Clone)]
pub struct PullRequestContext {
    pub files: Vec<FileDiff>,
    pub meta: PrMetadata,
}

impl PullRequestContext {
    pub fn new(files: Vec<FileDiff>, meta: PrMetadata) -> Self {
        Self { files, meta }
    }

    pub fn from_files(files: Vec<FileDiff>) -> Self {
        Self {
            files,
            meta: PrMetadata::default(),
        }
    }
}

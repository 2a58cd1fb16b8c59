use anyhow::{Context, Result};
use git2::{DiffFormat, DiffOptions, Repository};
use std::path::Path;

pub struct GitIntegration {
    repo: Repository,
}

impl GitIntegration {
    pub fn new(repo_path: impl AsRef<Path>) -> Result<Self> {
        let repo = Repository::discover(repo_path).context("Failed to find git repository")?;
        Ok(Self { repo })
    }

    pub fn get_uncommitted_diff(&self) -> Result<String> {
        let mut diff_options = DiffOptions::new();
        diff_options
            .include_untracked(true)
            .recurse_untracked_dirs(true)
            .show_untracked_content(true);

        let head = self.repo.head()?.peel_to_tree()?;
        let diff = self
            .repo
            .diff_tree_to_workdir_with_index(Some(&head), Some(&mut diff_options))?;

        patch_text(&diff)
    }

    pub fn get_staged_diff(&self) -> Result<String> {
        let head = self.repo.head()?.peel_to_tree()?;
        let mut index = self.repo.index()?;
        let oid = index.write_tree()?;
        let index_tree = self.repo.find_tree(oid)?;

        let diff = self
            .repo
            .diff_tree_to_tree(Some(&head), Some(&index_tree), None)?;

        patch_text(&diff)
    }

    pub fn get_branch_diff(&self, base_branch: &str) -> Result<String> {
        let base = self.repo.revparse_single(base_branch)?.peel_to_commit()?;
        let head = self.repo.head()?.peel_to_commit()?;

        let diff = self
            .repo
            .diff_tree_to_tree(Some(&base.tree()?), Some(&head.tree()?), None)?;

        patch_text(&diff)
    }

    pub fn get_current_branch(&self) -> Result<String> {
        let head = self.repo.head()?;
        if let Some(name) = head.shorthand() {
            Ok(name.to_string())
        } else {
            Ok("HEAD".to_string())
        }
    }

    pub fn head_sha(&self) -> Result<String> {
        let commit = self.repo.head()?.peel_to_commit()?;
        Ok(commit.id().to_string())
    }
}

// Content lines come back without their origin marker; put it back so the
// output is a parseable unified diff.
fn patch_text(diff: &git2::Diff) -> Result<String> {
    let mut diff_text = Vec::new();
    diff.print(DiffFormat::Patch, |_delta, _hunk, line| {
        match line.origin() {
            '+' | '-' | ' ' => diff_text.push(line.origin() as u8),
            _ => {}
        }
        diff_text.extend_from_slice(line.content());
        true
    })?;

    Ok(String::from_utf8_lossy(&diff_text).to_string())
}

use anyhow::{Context, Result};
use glob::Pattern;
use tracing::debug;

use crate::core::diff_parser::FileDiff;

/// Drops files whose path matches any configured exclusion glob. Matching is
/// case-sensitive over the full path as it appears in the diff, and `*`
/// crosses directory separators, so `*.lock` also excludes `sub/dir/x.lock`.
pub struct FileFilter {
    patterns: Vec<Pattern>,
}

impl FileFilter {
    pub fn new(patterns: &[String]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .map(|p| Pattern::new(p).with_context(|| format!("invalid exclude pattern: {p:?}")))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    pub fn is_excluded(&self, path: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(path))
    }

    /// Keeps input order; with no patterns this is a pass-through.
    pub fn apply(&self, files: Vec<FileDiff>) -> Vec<FileDiff> {
        if self.patterns.is_empty() {
            return files;
        }
        files
            .into_iter()
            .filter(|f| {
                let excluded = self.is_excluded(&f.path);
                if excluded {
                    debug!("excluding {} by pattern", f.path);
                }
                !excluded
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::diff_parser::ChangeKind;

    fn file(path: &str) -> FileDiff {
        FileDiff {
            path: path.to_string(),
            old_path: None,
            change_kind: ChangeKind::Modified,
            is_binary: false,
            hunks: Vec::new(),
        }
    }

    fn paths(files: &[FileDiff]) -> Vec<&str> {
        files.iter().map(|f| f.path.as_str()).collect()
    }

    #[test]
    fn test_markdown_glob_is_case_sensitive() {
        let filter = FileFilter::new(&["*.md".to_string()]).unwrap();
        let kept = filter.apply(vec![file("a.py"), file("b.md"), file("c.MD")]);
        assert_eq!(paths(&kept), vec!["a.py", "c.MD"]);
    }

    #[test]
    fn test_empty_pattern_list_keeps_everything() {
        let filter = FileFilter::new(&[]).unwrap();
        let kept = filter.apply(vec![file("a.py"), file("b.md")]);
        assert_eq!(paths(&kept), vec!["a.py", "b.md"]);
    }

    #[test]
    fn test_star_crosses_directories() {
        let filter = FileFilter::new(&["*.lock".to_string()]).unwrap();
        assert!(filter.is_excluded("Cargo.lock"));
        assert!(filter.is_excluded("vendor/deep/yarn.lock"));
        assert!(!filter.is_excluded("Cargo.toml"));
    }

    #[test]
    fn test_directory_pattern() {
        let filter = FileFilter::new(&["dist/*".to_string()]).unwrap();
        let kept = filter.apply(vec![
            file("dist/bundle.js"),
            file("src/main.rs"),
            file("dist/nested/out.js"),
        ]);
        assert_eq!(paths(&kept), vec!["src/main.rs"]);
    }

    #[test]
    fn test_blank_patterns_are_skipped() {
        let filter = FileFilter::new(&["".to_string(), "  ".to_string()]).unwrap();
        assert!(!filter.is_excluded("a.py"));
    }

    #[test]
    fn test_invalid_pattern_is_an_error() {
        assert!(FileFilter::new(&["[".to_string()]).is_err());
    }
}

use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Bug,
    Security,
}

impl Severity {
    /// Maps the free-form label a model emits to a severity. Unknown labels
    /// land on `Info` so the comment itself survives.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "warning" | "warn" => Severity::Warning,
            "bug" | "error" | "critical" => Severity::Bug,
            "security" | "vulnerability" | "vuln" => Severity::Security,
            _ => Severity::Info,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Bug => "bug",
            Severity::Security => "security",
        }
    }
}

/// One piece of review feedback. `position` is the diff anchor the hosting API
/// wants; it is `None` for comments that could not be mapped to a line still
/// present in the new version of the file (those publish file-level instead).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewComment {
    pub path: String,
    pub position: Option<usize>,
    pub new_line: Option<usize>,
    pub body: String,
    pub severity: Severity,
}

impl ReviewComment {
    pub fn body_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.body.hash(&mut hasher);
        hasher.finish()
    }

    /// Markdown body as it is published.
    pub fn formatted_body(&self) -> String {
        format!("**{}**: {}", self.severity.label(), self.body)
    }
}

/// Collapses comments that say the same thing about the same place. Two units
/// can overlap in what they flag (and models repeat themselves), so identity
/// is the (path, position, body) triple.
pub fn dedup_comments(comments: &mut Vec<ReviewComment>) {
    comments.sort_by(|a, b| {
        a.path
            .cmp(&b.path)
            .then(a.position.cmp(&b.position))
            .then(a.body_hash().cmp(&b.body_hash()))
    });
    comments.dedup_by(|a, b| {
        a.path == b.path && a.position == b.position && a.body_hash() == b.body_hash()
    });
}

/// Restores the source diff's ordering: files in the order they appeared,
/// file-level comments ahead of the positioned ones within each file.
pub fn sort_for_publish(comments: &mut [ReviewComment], file_rank: &HashMap<String, usize>) {
    comments.sort_by(|a, b| {
        let rank_a = file_rank.get(&a.path).copied().unwrap_or(usize::MAX);
        let rank_b = file_rank.get(&b.path).copied().unwrap_or(usize::MAX);
        rank_a
            .cmp(&rank_b)
            .then(a.path.cmp(&b.path))
            .then(a.position.cmp(&b.position))
            .then(a.new_line.cmp(&b.new_line))
    });
}

/// File order of the original diff, captured before filtering and chunking.
pub fn file_ranks(paths: &[String]) -> HashMap<String, usize> {
    paths
        .iter()
        .enumerate()
        .map(|(i, p)| (p.clone(), i))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comment(path: &str, position: Option<usize>, body: &str) -> ReviewComment {
        ReviewComment {
            path: path.to_string(),
            position,
            new_line: position,
            body: body.to_string(),
            severity: Severity::Warning,
        }
    }

    #[test]
    fn test_severity_labels() {
        assert_eq!(Severity::from_label("WARNING"), Severity::Warning);
        assert_eq!(Severity::from_label("error"), Severity::Bug);
        assert_eq!(Severity::from_label("vuln"), Severity::Security);
        assert_eq!(Severity::from_label("nitpick"), Severity::Info);
    }

    #[test]
    fn test_dedup_collapses_identical_comments() {
        let mut comments = vec![
            comment("a.rs", Some(3), "unused variable"),
            comment("a.rs", Some(3), "unused variable"),
            comment("a.rs", Some(5), "unused variable"),
            comment("b.rs", Some(3), "unused variable"),
        ];
        dedup_comments(&mut comments);
        assert_eq!(comments.len(), 3);
    }

    #[test]
    fn test_dedup_keeps_distinct_bodies_at_same_position() {
        let mut comments = vec![
            comment("a.rs", Some(3), "first remark"),
            comment("a.rs", Some(3), "second remark"),
        ];
        dedup_comments(&mut comments);
        assert_eq!(comments.len(), 2);
    }

    #[test]
    fn test_publish_order_follows_the_diff() {
        let ranks = file_ranks(&["z.rs".to_string(), "a.rs".to_string()]);
        let mut comments = vec![
            comment("a.rs", Some(2), "later file"),
            comment("z.rs", Some(9), "first file, positioned"),
            comment("z.rs", None, "first file, file-level"),
        ];
        sort_for_publish(&mut comments, &ranks);

        assert_eq!(comments[0].path, "z.rs");
        assert_eq!(comments[0].position, None);
        assert_eq!(comments[1].position, Some(9));
        assert_eq!(comments[2].path, "a.rs");
    }

    #[test]
    fn test_formatted_body_carries_severity() {
        let c = comment("a.rs", Some(1), "shadowed binding");
        assert_eq!(c.formatted_body(), "**warning**: shadowed binding");
    }
}

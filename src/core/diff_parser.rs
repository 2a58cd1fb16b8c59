use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

static HUNK_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").unwrap());

#[derive(Debug, Error)]
pub enum DiffError {
    #[error("malformed hunk header at line {line_no}: {header:?}")]
    MalformedHunkHeader { line_no: usize, header: String },
    #[error(
        "hunk at line {line_no} in {path} disagrees with its header: \
         expected -{old_expected}/+{new_expected} lines, found -{old_actual}/+{new_actual}"
    )]
    HunkCountMismatch {
        line_no: usize,
        path: String,
        old_expected: usize,
        new_expected: usize,
        old_actual: usize,
        new_actual: usize,
    },
    #[error("input does not look like a unified diff")]
    NotADiff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
    Renamed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineKind {
    Context,
    Added,
    Removed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffLine {
    pub kind: LineKind,
    pub content: String,
    /// Review-API anchor: 1-based offset below the file's first hunk header.
    pub position: usize,
    pub old_line: Option<usize>,
    pub new_line: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffHunk {
    pub old_start: usize,
    pub old_count: usize,
    pub new_start: usize,
    pub new_count: usize,
    /// The raw `@@ … @@` line, section heading included.
    pub header: String,
    pub lines: Vec<DiffLine>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDiff {
    pub path: String,
    pub old_path: Option<String>,
    pub change_kind: ChangeKind,
    pub is_binary: bool,
    pub hunks: Vec<DiffHunk>,
}

impl FileDiff {
    pub fn is_reviewable(&self) -> bool {
        !self.is_binary && self.change_kind != ChangeKind::Deleted && !self.hunks.is_empty()
    }

    /// Reproduces this file's section of the unified diff. Used for prompt
    /// assembly and for sizing review units.
    pub fn render(&self) -> String {
        let mut out = String::new();
        if self.is_binary {
            out.push_str(&format!(
                "Binary files a/{} and b/{} differ\n",
                self.old_path.as_deref().unwrap_or(&self.path),
                self.path
            ));
            return out;
        }
        match self.change_kind {
            ChangeKind::Added => out.push_str("--- /dev/null\n"),
            _ => out.push_str(&format!(
                "--- a/{}\n",
                self.old_path.as_deref().unwrap_or(&self.path)
            )),
        }
        match self.change_kind {
            ChangeKind::Deleted => out.push_str("+++ /dev/null\n"),
            _ => out.push_str(&format!("+++ b/{}\n", self.path)),
        }
        for hunk in &self.hunks {
            out.push_str(&hunk.header);
            out.push('\n');
            for line in &hunk.lines {
                let prefix = match line.kind {
                    LineKind::Added => '+',
                    LineKind::Removed => '-',
                    LineKind::Context => ' ',
                };
                out.push(prefix);
                out.push_str(&line.content);
                out.push('\n');
            }
        }
        out
    }
}

pub struct DiffParser;

impl DiffParser {
    /// Parses unified-diff text into per-file diffs. Fails on malformed hunk
    /// headers and on hunks whose line counts disagree with their header;
    /// anything less is not something a review can anchor to.
    pub fn parse(diff_text: &str) -> Result<Vec<FileDiff>, DiffError> {
        let lines: Vec<&str> = diff_text.lines().collect();
        let mut files = Vec::new();
        let mut i = 0;

        while i < lines.len() {
            if lines[i].starts_with("diff --git") {
                files.push(Self::parse_git_section(&lines, &mut i)?);
            } else if lines[i].starts_with("--- ")
                && i + 1 < lines.len()
                && lines[i + 1].starts_with("+++ ")
            {
                files.push(Self::parse_plain_section(&lines, &mut i)?);
            } else {
                i += 1;
            }
        }

        if files.is_empty() && !diff_text.trim().is_empty() {
            return Err(DiffError::NotADiff);
        }
        Ok(files)
    }

    fn parse_git_section(lines: &[&str], i: &mut usize) -> Result<FileDiff, DiffError> {
        let git_line = lines[*i];
        *i += 1;

        let mut old_path: Option<String> = None;
        let mut new_path: Option<String> = None;
        let mut rename_from: Option<String> = None;
        let mut rename_to: Option<String> = None;
        let mut is_new = false;
        let mut is_deleted = false;
        let mut is_binary = false;

        // Extended header lines up to the first hunk or the next section.
        while *i < lines.len()
            && !lines[*i].starts_with("@@")
            && !lines[*i].starts_with("diff --git")
        {
            let line = lines[*i];
            if let Some(rest) = line.strip_prefix("rename from ") {
                rename_from = Some(rest.trim().to_string());
            } else if let Some(rest) = line.strip_prefix("rename to ") {
                rename_to = Some(rest.trim().to_string());
            } else if line.starts_with("new file mode") {
                is_new = true;
            } else if line.starts_with("deleted file mode") {
                is_deleted = true;
            } else if line.starts_with("Binary files") || line.starts_with("GIT binary patch") {
                is_binary = true;
            } else if let Some(rest) = line.strip_prefix("--- ") {
                old_path = Some(strip_prefix_path(rest));
            } else if let Some(rest) = line.strip_prefix("+++ ") {
                new_path = Some(strip_prefix_path(rest));
            }
            *i += 1;
        }

        let path = new_path
            .clone()
            .filter(|p| p != "/dev/null")
            .or_else(|| rename_to.clone())
            .or_else(|| old_path.clone().filter(|p| p != "/dev/null"))
            .unwrap_or_else(|| path_from_git_line(git_line));

        let change_kind = if is_new || old_path.as_deref() == Some("/dev/null") {
            ChangeKind::Added
        } else if is_deleted || new_path.as_deref() == Some("/dev/null") {
            ChangeKind::Deleted
        } else if rename_from.is_some() || rename_to.is_some() {
            ChangeKind::Renamed
        } else {
            ChangeKind::Modified
        };

        let previous = match change_kind {
            ChangeKind::Renamed => rename_from,
            ChangeKind::Added => None,
            _ => old_path.filter(|p| p != "/dev/null" && *p != path),
        };

        let hunks = Self::parse_hunks(lines, i, &path)?;

        Ok(FileDiff {
            path,
            old_path: previous,
            change_kind,
            is_binary,
            hunks: if is_binary { Vec::new() } else { hunks },
        })
    }

    fn parse_plain_section(lines: &[&str], i: &mut usize) -> Result<FileDiff, DiffError> {
        let old_path = strip_prefix_path(&lines[*i]["--- ".len()..]);
        let new_path = strip_prefix_path(&lines[*i + 1]["+++ ".len()..]);
        *i += 2;

        let (path, change_kind) = if new_path == "/dev/null" {
            (old_path.clone(), ChangeKind::Deleted)
        } else if old_path == "/dev/null" {
            (new_path, ChangeKind::Added)
        } else {
            (new_path, ChangeKind::Modified)
        };
        let previous =
            (old_path != path && old_path != "/dev/null").then(|| old_path.clone());

        let hunks = Self::parse_hunks(lines, i, &path)?;

        Ok(FileDiff {
            path,
            old_path: previous,
            change_kind,
            is_binary: false,
            hunks,
        })
    }

    /// Parses every hunk of one file section. `position` counts each raw line
    /// below the file's first hunk header — later headers and `\ No newline`
    /// markers included — which is exactly how the review API anchors comments.
    fn parse_hunks(lines: &[&str], i: &mut usize, path: &str) -> Result<Vec<DiffHunk>, DiffError> {
        let mut hunks = Vec::new();
        let mut position = 0usize;

        while *i < lines.len() && lines[*i].starts_with("@@") {
            if !hunks.is_empty() {
                position += 1;
            }
            hunks.push(Self::parse_hunk(lines, i, path, &mut position)?);
        }
        Ok(hunks)
    }

    fn parse_hunk(
        lines: &[&str],
        i: &mut usize,
        path: &str,
        position: &mut usize,
    ) -> Result<DiffHunk, DiffError> {
        let header_line_no = *i + 1;
        let header = lines[*i];
        let caps = HUNK_HEADER
            .captures(header)
            .ok_or_else(|| DiffError::MalformedHunkHeader {
                line_no: header_line_no,
                header: header.to_string(),
            })?;

        let num = |idx: usize, default: usize| -> Result<usize, DiffError> {
            match caps.get(idx) {
                Some(m) => {
                    m.as_str()
                        .parse()
                        .map_err(|_| DiffError::MalformedHunkHeader {
                            line_no: header_line_no,
                            header: header.to_string(),
                        })
                }
                None => Ok(default),
            }
        };
        let old_start = num(1, 0)?;
        let old_count = num(2, 1)?;
        let new_start = num(3, 0)?;
        let new_count = num(4, 1)?;
        *i += 1;

        let mut parsed = Vec::new();
        let mut old_line = old_start;
        let mut new_line = new_start;
        let mut old_actual = 0usize;
        let mut new_actual = 0usize;

        let mismatch = |old_actual: usize, new_actual: usize| DiffError::HunkCountMismatch {
            line_no: header_line_no,
            path: path.to_string(),
            old_expected: old_count,
            new_expected: new_count,
            old_actual,
            new_actual,
        };

        while *i < lines.len() {
            let line = lines[*i];

            if line.starts_with('\\') {
                // "\ No newline at end of file" carries no content but still
                // occupies a slot in the anchor numbering.
                *position += 1;
                *i += 1;
                continue;
            }

            let (kind, content) = match line.chars().next() {
                Some('+') => (LineKind::Added, &line[1..]),
                Some('-') => (LineKind::Removed, &line[1..]),
                Some(' ') => (LineKind::Context, &line[1..]),
                // Whitespace-stripped context lines show up empty in mailed
                // patches; keep them as empty context while the hunk is open.
                None if old_actual < old_count && new_actual < new_count => (LineKind::Context, ""),
                _ => break,
            };

            match kind {
                LineKind::Added if new_actual >= new_count => {
                    return Err(mismatch(old_actual, new_actual + 1));
                }
                LineKind::Removed if old_actual >= old_count => {
                    return Err(mismatch(old_actual + 1, new_actual));
                }
                LineKind::Context if old_actual >= old_count || new_actual >= new_count => {
                    return Err(mismatch(old_actual + 1, new_actual + 1));
                }
                _ => {}
            }

            *position += 1;
            let diff_line = match kind {
                LineKind::Added => {
                    new_actual += 1;
                    let no = new_line;
                    new_line += 1;
                    DiffLine {
                        kind,
                        content: content.to_string(),
                        position: *position,
                        old_line: None,
                        new_line: Some(no),
                    }
                }
                LineKind::Removed => {
                    old_actual += 1;
                    let no = old_line;
                    old_line += 1;
                    DiffLine {
                        kind,
                        content: content.to_string(),
                        position: *position,
                        old_line: Some(no),
                        new_line: None,
                    }
                }
                LineKind::Context => {
                    old_actual += 1;
                    new_actual += 1;
                    let old_no = old_line;
                    let new_no = new_line;
                    old_line += 1;
                    new_line += 1;
                    DiffLine {
                        kind,
                        content: content.to_string(),
                        position: *position,
                        old_line: Some(old_no),
                        new_line: Some(new_no),
                    }
                }
            };
            parsed.push(diff_line);
            *i += 1;

            if old_actual == old_count && new_actual == new_count {
                // Trailing no-newline marker belongs to this hunk.
                while *i < lines.len() && lines[*i].starts_with('\\') {
                    *position += 1;
                    *i += 1;
                }
                break;
            }
        }

        if old_actual != old_count || new_actual != new_count {
            return Err(mismatch(old_actual, new_actual));
        }

        Ok(DiffHunk {
            old_start,
            old_count,
            new_start,
            new_count,
            header: header.to_string(),
            lines: parsed,
        })
    }
}

fn strip_prefix_path(raw: &str) -> String {
    let raw = raw.trim();
    let path = raw.split('\t').next().unwrap_or(raw);
    if path == "/dev/null" {
        return path.to_string();
    }
    path.strip_prefix("a/")
        .or_else(|| path.strip_prefix("b/"))
        .unwrap_or(path)
        .to_string()
}

fn path_from_git_line(line: &str) -> String {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() >= 4 {
        parts[3].trim_start_matches("b/").to_string()
    } else {
        line.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_FILE_DIFF: &str = "\
diff --git a/src/lib.rs b/src/lib.rs
index 1111111..2222222 100644
--- a/src/lib.rs
+++ b/src/lib.rs
@@ -1,3 +1,4 @@
 fn main() {
-    println!(\"hi\");
+    println!(\"hello\");
+    println!(\"again\");
 }
@@ -10,2 +11,2 @@ fn helper()
 let x = 1;
-let y = 2;
+let y = 3;
diff --git a/README.md b/README.md
index 3333333..4444444 100644
--- a/README.md
+++ b/README.md
@@ -1,1 +1,2 @@
 # title
+new line
";

    #[test]
    fn test_parse_two_files() {
        let files = DiffParser::parse(TWO_FILE_DIFF).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].path, "src/lib.rs");
        assert_eq!(files[0].change_kind, ChangeKind::Modified);
        assert_eq!(files[0].hunks.len(), 2);
        assert_eq!(files[1].path, "README.md");
        assert_eq!(files[1].hunks.len(), 1);
    }

    #[test]
    fn test_hunk_counts_match_headers() {
        let files = DiffParser::parse(TWO_FILE_DIFF).unwrap();
        for file in &files {
            for hunk in &file.hunks {
                let old = hunk
                    .lines
                    .iter()
                    .filter(|l| l.kind != LineKind::Added)
                    .count();
                let new = hunk
                    .lines
                    .iter()
                    .filter(|l| l.kind != LineKind::Removed)
                    .count();
                assert_eq!(old, hunk.old_count);
                assert_eq!(new, hunk.new_count);
            }
        }
    }

    #[test]
    fn test_positions_count_through_later_hunk_headers() {
        let files = DiffParser::parse(TWO_FILE_DIFF).unwrap();
        let first = &files[0];

        let positions: Vec<usize> = first
            .hunks
            .iter()
            .flat_map(|h| h.lines.iter().map(|l| l.position))
            .collect();
        // First hunk body occupies 1..=5; the second `@@` line takes 6, so its
        // body starts at 7.
        assert_eq!(positions, vec![1, 2, 3, 4, 5, 7, 8, 9]);
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_positions_restart_for_each_file() {
        let files = DiffParser::parse(TWO_FILE_DIFF).unwrap();
        assert_eq!(files[1].hunks[0].lines[0].position, 1);
        assert_eq!(files[1].hunks[0].lines[1].position, 2);
    }

    #[test]
    fn test_new_line_numbers_follow_hunk_starts() {
        let files = DiffParser::parse(TWO_FILE_DIFF).unwrap();
        let lines = &files[0].hunks[0].lines;
        assert_eq!(lines[0].new_line, Some(1));
        assert_eq!(lines[1].new_line, None); // removed
        assert_eq!(lines[1].old_line, Some(2));
        assert_eq!(lines[2].new_line, Some(2));
        assert_eq!(lines[3].new_line, Some(3));
        assert_eq!(lines[4].new_line, Some(4));
        let second = &files[0].hunks[1].lines;
        assert_eq!(second[0].new_line, Some(11));
    }

    #[test]
    fn test_malformed_hunk_header_fails() {
        let text = "\
--- a/foo.txt
+++ b/foo.txt
@@ -x,2 +1,2 @@
 a
 b
";
        let err = DiffParser::parse(text).unwrap_err();
        assert!(matches!(err, DiffError::MalformedHunkHeader { .. }));
    }

    #[test]
    fn test_hunk_shorter_than_header_fails() {
        let text = "\
--- a/foo.txt
+++ b/foo.txt
@@ -1,2 +1,3 @@
 a
+b
";
        let err = DiffParser::parse(text).unwrap_err();
        match err {
            DiffError::HunkCountMismatch {
                old_expected,
                new_expected,
                old_actual,
                new_actual,
                ..
            } => {
                assert_eq!((old_expected, new_expected), (2, 3));
                assert_eq!((old_actual, new_actual), (1, 2));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_hunk_longer_than_header_fails() {
        let text = "\
--- a/foo.txt
+++ b/foo.txt
@@ -1,1 +1,1 @@
 a
+extra
";
        let err = DiffParser::parse(text).unwrap_err();
        assert!(matches!(err, DiffError::HunkCountMismatch { .. }));
    }

    #[test]
    fn test_deleted_file() {
        let text = "\
diff --git a/gone.txt b/gone.txt
deleted file mode 100644
index 1111111..0000000
--- a/gone.txt
+++ /dev/null
@@ -1,2 +0,0 @@
-first
-second
";
        let files = DiffParser::parse(text).unwrap();
        assert_eq!(files[0].path, "gone.txt");
        assert_eq!(files[0].change_kind, ChangeKind::Deleted);
        assert_eq!(files[0].hunks[0].new_count, 0);
        assert!(!files[0].is_reviewable());
    }

    #[test]
    fn test_new_file() {
        let text = "\
diff --git a/fresh.txt b/fresh.txt
new file mode 100644
index 0000000..1111111
--- /dev/null
+++ b/fresh.txt
@@ -0,0 +1,2 @@
+first
+second
";
        let files = DiffParser::parse(text).unwrap();
        assert_eq!(files[0].change_kind, ChangeKind::Added);
        assert_eq!(files[0].hunks[0].lines[0].new_line, Some(1));
    }

    #[test]
    fn test_rename_with_edit() {
        let text = "\
diff --git a/old_name.rs b/new_name.rs
similarity index 90%
rename from old_name.rs
rename to new_name.rs
index 1111111..2222222 100644
--- a/old_name.rs
+++ b/new_name.rs
@@ -1,1 +1,1 @@
-old
+new
";
        let files = DiffParser::parse(text).unwrap();
        assert_eq!(files[0].path, "new_name.rs");
        assert_eq!(files[0].old_path.as_deref(), Some("old_name.rs"));
        assert_eq!(files[0].change_kind, ChangeKind::Renamed);
    }

    #[test]
    fn test_pure_rename_has_no_hunks() {
        let text = "\
diff --git a/old_name.rs b/new_name.rs
similarity index 100%
rename from old_name.rs
rename to new_name.rs
";
        let files = DiffParser::parse(text).unwrap();
        assert_eq!(files[0].path, "new_name.rs");
        assert!(files[0].hunks.is_empty());
        assert!(!files[0].is_reviewable());
    }

    #[test]
    fn test_binary_file_has_no_hunks() {
        let text = "\
diff --git a/logo.png b/logo.png
index 1111111..2222222 100644
Binary files a/logo.png and b/logo.png differ
";
        let files = DiffParser::parse(text).unwrap();
        assert!(files[0].is_binary);
        assert!(files[0].hunks.is_empty());
        assert!(!files[0].is_reviewable());
    }

    #[test]
    fn test_no_newline_marker_takes_a_position() {
        let text = "\
--- a/foo.txt
+++ b/foo.txt
@@ -1,1 +1,1 @@
-old
\\ No newline at end of file
+new
\\ No newline at end of file
@@ -5,1 +5,1 @@
-x
+y
";
        let files = DiffParser::parse(text).unwrap();
        let lines: Vec<&DiffLine> = files[0].hunks.iter().flat_map(|h| &h.lines).collect();
        // `-old` 1, marker 2, `+new` 3, marker 4, second header 5, body 6..=7.
        assert_eq!(lines[0].position, 1);
        assert_eq!(lines[1].position, 3);
        assert_eq!(lines[2].position, 6);
        assert_eq!(lines[3].position, 7);
    }

    #[test]
    fn test_omitted_count_defaults_to_one() {
        let text = "\
--- a/foo.txt
+++ b/foo.txt
@@ -1 +1 @@
-old
+new
";
        let files = DiffParser::parse(text).unwrap();
        let hunk = &files[0].hunks[0];
        assert_eq!(hunk.old_count, 1);
        assert_eq!(hunk.new_count, 1);
    }

    #[test]
    fn test_garbage_input_is_rejected() {
        let err = DiffParser::parse("not a diff at all\njust words\n").unwrap_err();
        assert!(matches!(err, DiffError::NotADiff));
        assert!(DiffParser::parse("").unwrap().is_empty());
    }

    #[test]
    fn test_render_round_trips_hunks() {
        let files = DiffParser::parse(TWO_FILE_DIFF).unwrap();
        let rendered = files[0].render();
        assert!(rendered.contains("--- a/src/lib.rs"));
        assert!(rendered.contains("@@ -1,3 +1,4 @@"));
        assert!(rendered.contains("+    println!(\"hello\");"));
        let reparsed = DiffParser::parse(&rendered).unwrap();
        assert_eq!(reparsed[0].hunks.len(), files[0].hunks.len());
    }
}

use thiserror::Error;
use tracing::debug;

use crate::core::chunker::ReviewUnit;
use crate::core::comment::{ReviewComment, Severity};
use crate::core::diff_parser::{FileDiff, LineKind};

/// Sentinel a backend answers when the diff warrants no comments.
pub const NO_COMMENTS: &str = "NO_COMMENTS";

#[derive(Debug, Error)]
#[error("{path} has no diff position for new-file line {line}")]
pub struct PositionError {
    pub path: String,
    pub line: usize,
}

/// What one model response yielded. Counters cover blocks the parser had to
/// drop or rewrite; none of them are fatal to the unit.
#[derive(Debug, Default)]
pub struct ParseOutcome {
    pub comments: Vec<ReviewComment>,
    pub dropped_blocks: usize,
    pub foreign_paths: usize,
    pub downgraded: usize,
}

#[derive(Default)]
struct RawBlock {
    file: Option<String>,
    line: Option<String>,
    severity: Option<String>,
    body: String,
    in_body: bool,
}

impl RawBlock {
    fn append_body(&mut self, text: &str) {
        if !self.body.is_empty() {
            self.body.push(' ');
        }
        self.body.push_str(text);
    }
}

pub struct ResponseParser;

impl ResponseParser {
    /// Extracts review comments from a model's marker-block response and
    /// anchors each one to the diff of its file within `unit`. Blocks that are
    /// structurally broken, or that name a file outside the unit, are dropped
    /// and counted; comments whose claimed line has no diff position are kept
    /// as file-level comments.
    pub fn parse(text: &str, unit: &ReviewUnit) -> ParseOutcome {
        let mut outcome = ParseOutcome::default();

        if text.trim().eq_ignore_ascii_case(NO_COMMENTS) {
            return outcome;
        }

        let mut current: Option<RawBlock> = None;

        for line in text.lines() {
            let trimmed = line.trim();

            if trimmed.starts_with("```") {
                continue;
            }

            if let Some(value) = marker_value(trimmed, "FILE:") {
                if let Some(block) = current.take() {
                    Self::finish_block(block, unit, &mut outcome);
                }
                current = Some(RawBlock {
                    file: Some(value.trim().to_string()),
                    ..Default::default()
                });
                continue;
            }

            let block = match current.as_mut() {
                Some(block) => block,
                None => continue, // preamble prose before the first block
            };

            if let Some(value) = marker_value(trimmed, "LINE:") {
                block.line = Some(value.trim().to_string());
                continue;
            }
            if let Some(value) = marker_value(trimmed, "SEVERITY:") {
                block.severity = Some(value.trim().to_string());
                continue;
            }
            if let Some(value) = marker_value(trimmed, "COMMENT:") {
                block.in_body = true;
                let value = value.trim();
                if !value.is_empty() {
                    block.append_body(value);
                }
                continue;
            }

            if trimmed.is_empty() {
                continue;
            }
            if block.in_body {
                block.append_body(trimmed);
            }
        }

        if let Some(block) = current {
            Self::finish_block(block, unit, &mut outcome);
        }

        outcome
    }

    fn finish_block(block: RawBlock, unit: &ReviewUnit, outcome: &mut ParseOutcome) {
        let (file, line_raw) = match (block.file, block.line) {
            (Some(f), Some(l)) if !f.is_empty() && !block.body.is_empty() => (f, l),
            _ => {
                outcome.dropped_blocks += 1;
                debug!("dropping response block with missing markers");
                return;
            }
        };
        let line: usize = match line_raw.parse() {
            Ok(n) => n,
            Err(_) => {
                outcome.dropped_blocks += 1;
                debug!("dropping response block with non-numeric line {line_raw:?}");
                return;
            }
        };

        let Some(diff) = unit.file(&file) else {
            outcome.foreign_paths += 1;
            debug!("dropping comment for {file}: not part of this review unit");
            return;
        };

        let severity = Severity::from_label(block.severity.as_deref().unwrap_or(""));
        match resolve_position(diff, line) {
            Ok(position) => outcome.comments.push(ReviewComment {
                path: file,
                position: Some(position),
                new_line: Some(line),
                body: block.body,
                severity,
            }),
            Err(err) => {
                // The finding may still be worth reading; publish it against
                // the file instead of discarding it.
                outcome.downgraded += 1;
                debug!("downgrading comment to file level: {err}");
                outcome.comments.push(ReviewComment {
                    path: file,
                    position: None,
                    new_line: Some(line),
                    body: block.body,
                    severity,
                });
            }
        }
    }
}

/// Maps a line number in the new version of the file to its diff position.
/// Only added and context lines exist in the new version, so a line that was
/// removed (or never touched by the diff) has no position.
pub fn resolve_position(diff: &FileDiff, new_line: usize) -> Result<usize, PositionError> {
    diff.hunks
        .iter()
        .flat_map(|h| &h.lines)
        .find(|l| l.kind != LineKind::Removed && l.new_line == Some(new_line))
        .map(|l| l.position)
        .ok_or_else(|| PositionError {
            path: diff.path.clone(),
            line: new_line,
        })
}

fn marker_value<'a>(line: &'a str, marker: &str) -> Option<&'a str> {
    line.get(..marker.len())
        .filter(|head| head.eq_ignore_ascii_case(marker))
        .map(|_| &line[marker.len()..])
}

use tracing::debug;

use crate::core::diff_parser::FileDiff;

/// A batch of whole-file diffs reviewed in a single model call.
#[derive(Debug, Clone)]
pub struct ReviewUnit {
    pub files: Vec<FileDiff>,
    pub estimated_size: usize,
}

impl ReviewUnit {
    pub fn contains_path(&self, path: &str) -> bool {
        self.files.iter().any(|f| f.path == path)
    }

    pub fn file(&self, path: &str) -> Option<&FileDiff> {
        self.files.iter().find(|f| f.path == path)
    }
}

pub struct Chunker {
    max_unit_size: usize,
}

impl Chunker {
    pub fn new(max_unit_size: usize) -> Self {
        Self { max_unit_size }
    }

    /// Greedily packs files, in input order, into units whose combined rendered
    /// size stays within the limit. Files are never split: one file larger than
    /// the limit travels alone as an oversized unit rather than being dropped.
    pub fn chunk(&self, files: Vec<FileDiff>) -> Vec<ReviewUnit> {
        let mut units = Vec::new();
        let mut current: Vec<FileDiff> = Vec::new();
        let mut current_size = 0usize;

        for file in files {
            let cost = file.render().len();

            if !current.is_empty() && current_size + cost > self.max_unit_size {
                units.push(ReviewUnit {
                    files: std::mem::take(&mut current),
                    estimated_size: current_size,
                });
                current_size = 0;
            }

            if cost > self.max_unit_size {
                debug!(
                    "{} alone exceeds the unit limit ({} > {}), reviewing it in its own unit",
                    file.path, cost, self.max_unit_size
                );
                units.push(ReviewUnit {
                    files: vec![file],
                    estimated_size: cost,
                });
                continue;
            }

            current_size += cost;
            current.push(file);
        }

        if !current.is_empty() {
            units.push(ReviewUnit {
                files: current,
                estimated_size: current_size,
            });
        }

        units
    }
}

pub mod chunker;
pub mod comment;
pub mod context;
pub mod diff_parser;
pub mod file_filter;
pub mod git;
pub mod orchestrator;
pub mod prompt;
pub mod response_parser;

pub use chunker::{Chunker, ReviewUnit};
pub use comment::{dedup_comments, ReviewComment, Severity};
pub use context::{PrMetadata, PullRequestContext};
pub use diff_parser::{ChangeKind, DiffError, DiffParser, FileDiff};
pub use file_filter::FileFilter;
pub use git::GitIntegration;
pub use orchestrator::{ReviewOrchestrator, RetryPolicy, RunOptions, RunReport};
pub use prompt::{PromptBuilder, PromptConfig};
pub use response_parser::{PositionError, ResponseParser};

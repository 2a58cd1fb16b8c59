use anyhow::Result;
use async_trait::async_trait;

pub mod github;

pub use github::GithubPublisher;

/// Narrow seam to the hosting side. `position: None` means the comment could
/// not be anchored to a diff line and should land at file level; `path` is
/// still meaningful there. The summary goes out once per run, after all
/// comments have been attempted.
#[async_trait]
pub trait CommentPublisher: Send + Sync {
    async fn post_comment(&self, path: &str, position: Option<usize>, body: &str) -> Result<()>;

    async fn post_summary(&self, body: &str) -> Result<()>;
}

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::adapters::{ModelGateway, ModelRequest};
use crate::core::chunker::Chunker;
use crate::core::comment::{dedup_comments, file_ranks, sort_for_publish, ReviewComment};
use crate::core::context::PullRequestContext;
use crate::core::file_filter::FileFilter;
use crate::core::prompt::{PromptBuilder, PromptConfig};
use crate::core::response_parser::{ParseOutcome, ResponseParser};
use crate::publish::CommentPublisher;

/// Retry behavior for one review unit. Injected so tests can run with zero
/// delay; only retryable gateway errors consume attempts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    fn attempts(&self) -> usize {
        self.max_attempts.max(1)
    }

    fn backoff(&self, attempt: usize) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt as u32)
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub exclude: Vec<String>,
    pub max_unit_size: usize,
    pub concurrency: usize,
    pub retry: RetryPolicy,
    pub run_timeout: Option<Duration>,
    pub prompt: PromptConfig,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            exclude: Vec::new(),
            max_unit_size: 48_000,
            concurrency: 3,
            retry: RetryPolicy::default(),
            run_timeout: None,
            prompt: PromptConfig::default(),
        }
    }
}

/// A unit that produced no comments because its model calls never succeeded.
#[derive(Debug)]
pub struct UnitFailure {
    pub files: Vec<String>,
    pub error: String,
}

/// Everything a run learned before publishing.
#[derive(Debug, Default)]
pub struct ReviewRun {
    pub comments: Vec<ReviewComment>,
    pub total_units: usize,
    pub failed_units: Vec<UnitFailure>,
    pub reviewed_files: usize,
    pub skipped_files: usize,
    pub dropped_blocks: usize,
    pub foreign_paths: usize,
    pub downgraded: usize,
}

impl ReviewRun {
    /// The run only counts as a failure when nothing at all got through.
    pub fn all_units_failed(&self) -> bool {
        self.total_units > 0 && self.failed_units.len() == self.total_units
    }
}

/// Outcome of a publishing run.
#[derive(Debug)]
pub struct RunReport {
    pub posted: usize,
    pub publish_failures: usize,
    pub summary_posted: bool,
    pub review: ReviewRun,
}

pub struct ReviewOrchestrator {
    gateway: Arc<dyn ModelGateway>,
    options: RunOptions,
}

impl ReviewOrchestrator {
    pub fn new(gateway: Arc<dyn ModelGateway>, options: RunOptions) -> Self {
        Self { gateway, options }
    }

    /// Runs the review pipeline up to (not including) publishing: filter,
    /// chunk, fan out to the model with retries, parse, dedup, order.
    pub async fn collect(&self, ctx: &PullRequestContext) -> Result<ReviewRun> {
        let filter = FileFilter::new(&self.options.exclude)?;
        let original_order: Vec<String> = ctx.files.iter().map(|f| f.path.clone()).collect();
        let ranks = file_ranks(&original_order);

        let mut run = ReviewRun::default();

        let mut reviewable = Vec::new();
        for file in filter.apply(ctx.files.clone()) {
            if file.is_binary {
                info!("skipping binary file: {}", file.path);
                run.skipped_files += 1;
            } else if file.change_kind == crate::core::diff_parser::ChangeKind::Deleted {
                info!("skipping deleted file: {}", file.path);
                run.skipped_files += 1;
            } else if file.hunks.is_empty() {
                debug!("skipping {}: no hunks to review", file.path);
                run.skipped_files += 1;
            } else {
                reviewable.push(file);
            }
        }
        run.reviewed_files = reviewable.len();

        let units = Chunker::new(self.options.max_unit_size).chunk(reviewable);
        run.total_units = units.len();
        if units.is_empty() {
            info!("nothing to review after filtering");
            return Ok(run);
        }
        info!(
            "reviewing {} file(s) in {} unit(s), concurrency {}",
            run.reviewed_files,
            run.total_units,
            self.options.concurrency
        );

        let builder = PromptBuilder::new(self.options.prompt.clone());
        let semaphore = Arc::new(Semaphore::new(self.options.concurrency.max(1)));
        let mut join_set: JoinSet<(usize, Result<ParseOutcome, String>)> = JoinSet::new();
        let mut pending: HashMap<usize, Vec<String>> = HashMap::new();

        for (index, unit) in units.into_iter().enumerate() {
            let (system, user) = builder.build(&unit, &ctx.meta);
            pending.insert(index, unit.files.iter().map(|f| f.path.clone()).collect());

            let gateway = Arc::clone(&self.gateway);
            let sem = Arc::clone(&semaphore);
            let retry = self.options.retry;

            join_set.spawn(async move {
                let _permit = sem.acquire().await.expect("semaphore closed");

                let attempts = retry.attempts();
                let mut last_err = String::new();
                for attempt in 0..attempts {
                    let request = ModelRequest {
                        system_prompt: system.clone(),
                        user_prompt: user.clone(),
                        temperature: None,
                        max_tokens: None,
                    };
                    match gateway.review(request).await {
                        Ok(response) => {
                            debug!(
                                "unit {index} answered by {} ({} bytes)",
                                response.model,
                                response.text.len()
                            );
                            return (index, Ok(ResponseParser::parse(&response.text, &unit)));
                        }
                        Err(ref err) if err.is_retryable() && attempt + 1 < attempts => {
                            let backoff = retry.backoff(attempt);
                            warn!(
                                "unit {index} attempt {}/{attempts} failed ({err}), retrying in {backoff:?}",
                                attempt + 1
                            );
                            last_err = err.to_string();
                            tokio::time::sleep(backoff).await;
                        }
                        Err(err) => return (index, Err(err.to_string())),
                    }
                }
                (index, Err(last_err))
            });
        }

        let deadline = self
            .options
            .run_timeout
            .map(|t| tokio::time::Instant::now() + t);

        loop {
            let joined = match deadline {
                Some(deadline) => {
                    match tokio::time::timeout_at(deadline, join_set.join_next()).await {
                        Ok(joined) => joined,
                        Err(_) => {
                            warn!(
                                "run timeout reached, abandoning {} in-flight unit(s)",
                                join_set.len()
                            );
                            join_set.abort_all();
                            // Units that finished before the abort landed are
                            // still harvested; the rest stay in `pending`.
                            while let Some(result) = join_set.join_next().await {
                                absorb(result, &mut pending, &mut run);
                            }
                            break;
                        }
                    }
                }
                None => join_set.join_next().await,
            };

            let Some(result) = joined else { break };
            absorb(result, &mut pending, &mut run);
        }

        // Units still pending never reported back: abandoned at the deadline
        // or lost to a panic. Either way they failed.
        for (_, files) in pending.drain() {
            run.failed_units.push(UnitFailure {
                files,
                error: "abandoned before completion".to_string(),
            });
        }

        dedup_comments(&mut run.comments);
        sort_for_publish(&mut run.comments, &ranks);
        Ok(run)
    }

    /// Full pipeline including publishing. Comments go out one at a time in
    /// diff order; a rejected comment is logged and skipped, and the summary
    /// is attempted no matter what happened before it.
    pub async fn run(
        &self,
        ctx: &PullRequestContext,
        publisher: &dyn CommentPublisher,
    ) -> Result<RunReport> {
        let review = self.collect(ctx).await?;

        let mut posted = 0usize;
        let mut publish_failures = 0usize;
        for comment in &review.comments {
            let body = match (comment.position, comment.new_line) {
                (None, Some(line)) => {
                    format!("{} (reported for line {line})", comment.formatted_body())
                }
                _ => comment.formatted_body(),
            };
            match publisher
                .post_comment(&comment.path, comment.position, &body)
                .await
            {
                Ok(()) => posted += 1,
                Err(err) => {
                    publish_failures += 1;
                    warn!(
                        "failed to publish comment on {}: {err:#}",
                        comment.path
                    );
                }
            }
        }

        let summary = render_summary(&review, posted, publish_failures);
        let summary_posted = match publisher.post_summary(&summary).await {
            Ok(()) => true,
            Err(err) => {
                warn!("failed to publish run summary: {err:#}");
                false
            }
        };

        Ok(RunReport {
            posted,
            publish_failures,
            summary_posted,
            review,
        })
    }
}

/// Folds one joined task result into the run. Tasks that never produce a
/// result (panic, abort) keep their entry in `pending` and are settled by the
/// caller afterwards.
fn absorb(
    result: Result<(usize, Result<ParseOutcome, String>), tokio::task::JoinError>,
    pending: &mut HashMap<usize, Vec<String>>,
    run: &mut ReviewRun,
) {
    match result {
        Ok((index, Ok(outcome))) => {
            pending.remove(&index);
            run.comments.extend(outcome.comments);
            run.dropped_blocks += outcome.dropped_blocks;
            run.foreign_paths += outcome.foreign_paths;
            run.downgraded += outcome.downgraded;
        }
        Ok((index, Err(error))) => {
            let files = pending.remove(&index).unwrap_or_default();
            warn!("review unit failed ({}): {error}", files.join(", "));
            run.failed_units.push(UnitFailure { files, error });
        }
        Err(join_err) => {
            debug!("review task did not complete: {join_err}");
        }
    }
}

fn render_summary(review: &ReviewRun, posted: usize, publish_failures: usize) -> String {
    let mut out = String::from("## Automated review summary\n\n");
    out.push_str(&format!(
        "- reviewed {} file(s) in {} unit(s), skipped {} file(s)\n",
        review.reviewed_files, review.total_units, review.skipped_files
    ));
    out.push_str(&format!(
        "- posted {posted} comment(s), {publish_failures} failed to publish\n"
    ));
    if review.dropped_blocks > 0 || review.foreign_paths > 0 {
        out.push_str(&format!(
            "- discarded {} unparseable response block(s) and {} comment(s) for files outside the diff\n",
            review.dropped_blocks, review.foreign_paths
        ));
    }
    if review.downgraded > 0 {
        out.push_str(&format!(
            "- {} comment(s) had no diff anchor and were posted file-level\n",
            review.downgraded
        ));
    }
    if !review.failed_units.is_empty() {
        out.push_str(&format!(
            "\n{} of {} unit(s) failed and were not reviewed:\n",
            review.failed_units.len(),
            review.total_units
        ));
        for failure in &review.failed_units {
            let files = if failure.files.is_empty() {
                "(unknown files)".to_string()
            } else {
                failure.files.join(", ")
            };
            out.push_str(&format!("- {files}: {}\n", failure.error));
        }
    }
    out.push_str(&format!(
        "\n_generated {}_\n",
        chrono::Utc::now().format("%Y-%m-%d %H:%M UTC")
    ));
    out
}

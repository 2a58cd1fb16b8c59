mod adapters;
mod config;
mod core;
mod publish;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::adapters::{Backend, ModelGateway};
use crate::core::context::PrMetadata;
use crate::core::orchestrator::ReviewRun;
use crate::core::{GitIntegration, PullRequestContext, ReviewComment, ReviewOrchestrator};
use crate::publish::GithubPublisher;

#[derive(Parser)]
#[command(name = "diffcritic")]
#[command(about = "Automated pull request review with pluggable model backends", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, global = true, value_enum)]
    backend: Option<Backend>,

    #[arg(long, global = true)]
    model: Option<String>,

    #[arg(long, global = true)]
    temperature: Option<f32>,

    #[arg(long, global = true)]
    max_tokens: Option<usize>,

    #[arg(long, global = true)]
    concurrency: Option<usize>,

    #[arg(long, global = true, help = "Upper bound on the rendered diff size per review unit")]
    max_unit_size: Option<usize>,

    #[arg(long, global = true, default_value = "json")]
    output_format: OutputFormat,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Review a local diff from a file, stdin, or the working tree
    Review {
        #[arg(long, help = "Path to diff file (reads from stdin if not provided)")]
        diff: Option<PathBuf>,

        #[arg(long, help = "Review staged changes instead of the working tree")]
        staged: bool,

        #[arg(long, help = "Review changes relative to a base branch/ref")]
        base: Option<String>,

        #[arg(long, value_name = "GLOB", help = "Exclude files matching this pattern")]
        exclude: Vec<String>,

        #[arg(
            short,
            long,
            help = "Output file path (prints to stdout if not provided)"
        )]
        output: Option<PathBuf>,
    },
    /// Review a GitHub pull request, optionally posting comments back
    Pr {
        #[arg(long, help = "Repository in owner/name form")]
        repo: String,

        #[arg(long)]
        number: u64,

        #[arg(long, help = "Post review comments and a summary to the pull request")]
        post: bool,

        #[arg(long, value_name = "GLOB", help = "Exclude files matching this pattern")]
        exclude: Vec<String>,
    },
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum OutputFormat {
    Json,
    Markdown,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = config::Config::load().unwrap_or_default();
    config.merge_with_cli(
        cli.backend,
        cli.model.clone(),
        cli.temperature,
        cli.max_tokens,
        cli.concurrency,
        cli.max_unit_size,
    );

    match cli.command {
        Commands::Review {
            diff,
            staged,
            base,
            exclude,
            output,
        } => {
            review_command(
                config,
                diff,
                staged,
                base,
                exclude,
                output,
                cli.output_format,
            )
            .await?;
        }
        Commands::Pr {
            repo,
            number,
            post,
            exclude,
        } => {
            pr_command(config, repo, number, post, exclude, cli.output_format).await?;
        }
    }

    Ok(())
}

async fn review_command(
    config: config::Config,
    diff_path: Option<PathBuf>,
    staged: bool,
    base: Option<String>,
    exclude: Vec<String>,
    output_path: Option<PathBuf>,
    format: OutputFormat,
) -> Result<()> {
    info!("Starting review with model: {}", config.model);

    let diff_content = if let Some(path) = diff_path {
        tokio::fs::read_to_string(path).await?
    } else if staged {
        GitIntegration::new(".")?.get_staged_diff()?
    } else if let Some(base) = base {
        GitIntegration::new(".")?.get_branch_diff(&base)?
    } else if std::io::stdin().is_terminal() {
        if let Ok(git) = GitIntegration::new(".") {
            git.get_uncommitted_diff()?
        } else {
            println!("No diff provided and not in a git repository.");
            return Ok(());
        }
    } else {
        use std::io::Read;
        let mut buffer = String::new();
        std::io::stdin().read_to_string(&mut buffer)?;
        buffer
    };

    let files = core::DiffParser::parse(&diff_content)?;
    if files.is_empty() {
        println!("No changes found");
        return Ok(());
    }
    info!("Parsed {} file diff(s)", files.len());

    let ctx = PullRequestContext::new(files, local_metadata());

    let gateway: Arc<dyn ModelGateway> =
        Arc::from(adapters::create_gateway(&config.backend_config())?);
    let orchestrator = ReviewOrchestrator::new(gateway, config.run_options(&exclude));

    let run = orchestrator.collect(&ctx).await?;
    fail_if_nothing_succeeded(&run)?;

    output_comments(&run.comments, output_path, format).await
}

async fn pr_command(
    config: config::Config,
    repo: String,
    number: u64,
    post: bool,
    exclude: Vec<String>,
    format: OutputFormat,
) -> Result<()> {
    let token = std::env::var("GITHUB_TOKEN")
        .context("GITHUB_TOKEN must be set to talk to the GitHub API")?;

    let publisher = GithubPublisher::new(token, &repo, number)?;
    let meta = publisher.fetch_pr_details().await?;
    let diff_content = publisher.fetch_diff().await?;
    let publisher = publisher.with_commit_id(meta.head_sha.clone());

    let files = core::DiffParser::parse(&diff_content)?;
    if files.is_empty() {
        println!("No changes in PR");
        return Ok(());
    }
    info!("Reviewing {}#{}: {} file diff(s)", repo, number, files.len());

    let ctx = PullRequestContext::new(files, meta);

    let gateway: Arc<dyn ModelGateway> =
        Arc::from(adapters::create_gateway(&config.backend_config())?);
    let orchestrator = ReviewOrchestrator::new(gateway, config.run_options(&exclude));

    if post {
        let report = orchestrator.run(&ctx, &publisher).await?;
        println!(
            "Posted {} comment(s) to {}#{} ({} rejected, summary {})",
            report.posted,
            repo,
            number,
            report.publish_failures,
            if report.summary_posted {
                "posted"
            } else {
                "failed"
            }
        );
        fail_if_nothing_succeeded(&report.review)
    } else {
        let run = orchestrator.collect(&ctx).await?;
        fail_if_nothing_succeeded(&run)?;
        output_comments(&run.comments, None, format).await
    }
}

fn local_metadata() -> PrMetadata {
    match GitIntegration::new(".") {
        Ok(git) => PrMetadata {
            branch: git.get_current_branch().ok(),
            head_sha: git.head_sha().ok(),
            ..PrMetadata::default()
        },
        Err(_) => PrMetadata::default(),
    }
}

/// Partial failure is tolerated; a run where no unit produced anything is not.
fn fail_if_nothing_succeeded(run: &ReviewRun) -> Result<()> {
    if run.all_units_failed() {
        anyhow::bail!(
            "all {} review unit(s) failed; no review was produced",
            run.total_units
        );
    }
    Ok(())
}

async fn output_comments(
    comments: &[ReviewComment],
    output_path: Option<PathBuf>,
    format: OutputFormat,
) -> Result<()> {
    let output = match format {
        OutputFormat::Json => serde_json::to_string_pretty(comments)?,
        OutputFormat::Markdown => format_as_markdown(comments),
    };

    if let Some(path) = output_path {
        tokio::fs::write(path, output).await?;
    } else {
        println!("{}", output);
    }

    Ok(())
}

fn format_as_markdown(comments: &[ReviewComment]) -> String {
    let mut output = String::from("# Review Results\n\n");

    if comments.is_empty() {
        output.push_str("No issues found.\n");
        return output;
    }

    let mut current_path = "";
    for comment in comments {
        if comment.path != current_path {
            output.push_str(&format!("## {}\n\n", comment.path));
            current_path = &comment.path;
        }
        let location = match comment.new_line {
            Some(line) => format!("line {line}"),
            None => "file".to_string(),
        };
        output.push_str(&format!(
            "- **{}** ({}): {}\n",
            comment.severity.label(),
            location,
            comment.body
        ));
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Severity;

    #[test]
    fn test_markdown_output_groups_by_file() {
        let comments = vec![
            ReviewComment {
                path: "src/app.rs".to_string(),
                position: Some(3),
                new_line: Some(11),
                body: "possible panic on empty input".to_string(),
                severity: Severity::Bug,
            },
            ReviewComment {
                path: "src/app.rs".to_string(),
                position: None,
                new_line: Some(40),
                body: "consider splitting this module".to_string(),
                severity: Severity::Info,
            },
            ReviewComment {
                path: "src/lib.rs".to_string(),
                position: Some(1),
                new_line: Some(1),
                body: "unused import".to_string(),
                severity: Severity::Warning,
            },
        ];

        let markdown = format_as_markdown(&comments);
        assert_eq!(markdown.matches("## src/app.rs").count(), 1);
        assert!(markdown.contains("**bug** (line 11)"));
        assert!(markdown.contains("**warning** (line 1): unused import"));
    }

    #[test]
    fn test_markdown_output_for_clean_run() {
        assert!(format_as_markdown(&[]).contains("No issues found."));
    }
}

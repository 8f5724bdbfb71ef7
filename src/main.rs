use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use patchloop::agent::{AgentEngine, CodingAgent, ModelBackend, ModelClient};
use patchloop::config::AppConfig;
use patchloop::platform::github::GitHubPlatform;
use patchloop::platform::types::RepoRef;
use patchloop::review::ReviewerAgent;
use patchloop::shutdown::{self, Interrupt};
use patchloop::workflow::{Driver, Mode, Outcome, RunSummary, Subject};
use patchloop::workspace::WorkspaceManager;

#[derive(Parser)]
#[command(name = "patchloop", about = "Issue to pull request loop with a coding agent and a reviewer agent")]
struct Cli {
    /// Path to a tuning file
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Stop the run after this many seconds
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,

    /// Branch pull requests target
    #[arg(long, global = true)]
    base_branch: Option<String>,

    /// Where the working clone lives
    #[arg(long, global = true)]
    local_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Let the coding agent open or update pull requests for issues
    Code {
        #[arg(long)]
        repo: String,
        /// Only this issue; all open issues otherwise
        #[arg(long)]
        issue: Option<u64>,
    },
    /// Review open pull requests
    Review {
        /// Defaults to GITHUB_REPOSITORY
        #[arg(long)]
        repo: Option<String>,
        #[arg(long, conflicts_with = "all")]
        pr: Option<u64>,
        #[arg(long)]
        all: bool,
        /// Review even when a review for the current head exists
        #[arg(long)]
        force: bool,
    },
    /// Code, review and revise until approved or out of iterations
    Cycle {
        #[arg(long)]
        repo: String,
        #[arg(long)]
        issue: Option<u64>,
        #[arg(long)]
        max_iterations: Option<u32>,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// PR number from the CI pipeline environment.
fn pr_from_pipeline(env: impl Fn(&str) -> Option<String>) -> Option<u64> {
    if let Some(n) = env("PR_NUMBER").and_then(|v| v.trim().parse().ok()) {
        return Some(n);
    }
    if let Some(n) = env("GITHUB_REF").and_then(|r| {
        r.strip_prefix("refs/pull/")
            .and_then(|rest| rest.split('/').next())
            .and_then(|n| n.parse().ok())
    }) {
        return Some(n);
    }
    env("CI_MERGE_REQUEST_IID").and_then(|v| v.trim().parse().ok())
}

fn parse_repo(value: &str) -> anyhow::Result<RepoRef> {
    value
        .parse()
        .with_context(|| format!("invalid repository {value:?}, expected owner/name"))
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(base) = cli.base_branch {
        config.workspace.base_branch = base;
    }
    if let Some(path) = cli.local_path {
        config.workspace.path = path;
    }
    let config = Arc::new(config);

    tracing::info!(
        model = %config.model.id,
        workspace = %config.workspace.path.display(),
        base = %config.workspace.base_branch,
        "Starting patchloop"
    );

    let interrupt = Interrupt::new();
    let watcher = shutdown::watch(interrupt.clone(), cli.timeout_secs.map(Duration::from_secs));

    let coder_platform = Arc::new(GitHubPlatform::new(&config.github, &config.github.token)?);
    let review_platform = Arc::new(GitHubPlatform::new(
        &config.github,
        &config.github.reviewer_token,
    )?);
    let backend: Arc<dyn ModelBackend> = Arc::new(ModelClient::new(&config.model)?);
    let workspace = Arc::new(WorkspaceManager::new(&config));
    let engine = AgentEngine::new(backend.clone(), &config.agent);
    let author = Arc::new(CodingAgent::new(engine, workspace.clone(), &config.agent));
    let reviewer = Arc::new(ReviewerAgent::new(backend, config.review.max_diff_chars));

    let driver = Driver::new(
        config.clone(),
        coder_platform,
        review_platform,
        workspace,
        author,
        reviewer,
        interrupt.clone(),
    );

    let summary = match cli.command {
        Command::Code { repo, issue } => {
            let repo = parse_repo(&repo)?;
            driver.run_batch(&repo, issue, Mode::Code).await?
        }
        Command::Cycle {
            repo,
            issue,
            max_iterations,
        } => {
            let repo = parse_repo(&repo)?;
            let max_iterations = max_iterations.unwrap_or(config.driver.max_iterations);
            if max_iterations == 0 {
                bail!("--max-iterations must be at least 1");
            }
            driver
                .run_batch(&repo, issue, Mode::Cycle { max_iterations })
                .await?
        }
        Command::Review {
            repo,
            pr,
            all,
            force,
        } => {
            let repo = match repo.or_else(|| std::env::var("GITHUB_REPOSITORY").ok()) {
                Some(repo) => parse_repo(&repo)?,
                None => bail!("--repo is required outside a CI pipeline"),
            };
            if all {
                driver.review_all(&repo, force).await?
            } else {
                let pr = match pr.or_else(|| pr_from_pipeline(|key| std::env::var(key).ok())) {
                    Some(pr) => pr,
                    None => bail!("pass --pr or --all, or run inside a pull request pipeline"),
                };
                let mut summary = RunSummary::default();
                let outcome = driver.review_pr(&repo, pr, force).await;
                summary.push(Subject::PullRequest(pr), Outcome::Review(outcome));
                summary
            }
        }
    };

    watcher.abort();
    print!("{summary}");

    if interrupt.is_set() {
        tracing::warn!("Run was interrupted");
        return Ok(ExitCode::FAILURE);
    }
    Ok(if summary.has_failures() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

//! Gleaner main entry point
//!
//! This is the command-line interface for the Gleaner research crawler.

use clap::{Parser, Subcommand};
use gleaner::config::{load_or_default, JobConfig};
use gleaner::crawler::HttpFetcher;
use gleaner::output::{load_statistics, print_job_list, print_statistics};
use gleaner::storage::{DateFilter, JobFilter, JobId, JobStore};
use gleaner::url::UrlValidator;
use gleaner::workflow::{
    ChainedUrlCollector, FileUrlCollector, JobOutcome, PhaseWorkflowManager, StaticUrlCollector,
};
use gleaner::JobStatus;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Exit code for a run interrupted with Ctrl-C
const EXIT_INTERRUPTED: u8 = 130;

/// Gleaner: a resumable, host-polite research crawler
///
/// Gleaner turns a research query into a crawled, deduplicated bundle of
/// pages. Every job is checkpointed, so an interrupted job can be resumed
/// by id from any later process.
#[derive(Parser, Debug)]
#[command(name = "gleaner")]
#[command(version)]
#[command(about = "A resumable, host-polite research crawler", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to TOML configuration file
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Data directory (overrides `output.data-dir`)
    #[arg(long, global = true, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Text file of seed URLs, one per line
    #[arg(long, global = true, value_name = "FILE")]
    urls: Option<PathBuf>,

    /// Seed URL (repeatable)
    #[arg(long = "seed", global = true, value_name = "URL")]
    seeds: Vec<String>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Resume an interrupted or failed job
    #[arg(long, value_name = "JOB_ID", conflicts_with_all = ["status", "list_jobs", "delete", "delete_bulk", "clean_raw", "clean_all_raw"])]
    resume: Option<JobId>,

    /// Show the status of a job and exit
    #[arg(long, value_name = "JOB_ID", conflicts_with_all = ["list_jobs", "delete", "delete_bulk", "clean_raw", "clean_all_raw"])]
    status: Option<JobId>,

    /// List jobs, newest first
    #[arg(long, conflicts_with_all = ["delete", "delete_bulk", "clean_raw", "clean_all_raw"])]
    list_jobs: bool,

    /// Delete a job and all of its data
    #[arg(long, value_name = "JOB_ID", conflicts_with_all = ["delete_bulk", "clean_raw", "clean_all_raw"])]
    delete: Option<JobId>,

    /// Delete every job matching the list filters
    #[arg(long, conflicts_with_all = ["clean_raw", "clean_all_raw"])]
    delete_bulk: bool,

    /// Remove a job's raw payloads, keeping extracted content
    #[arg(long, value_name = "JOB_ID", conflicts_with = "clean_all_raw")]
    clean_raw: Option<JobId>,

    /// Remove raw payloads of every job
    #[arg(long)]
    clean_all_raw: bool,

    /// Skip confirmation prompts
    #[arg(long, short = 'y')]
    yes: bool,

    /// Maximum number of jobs to list
    #[arg(long, default_value_t = 20)]
    limit: usize,

    /// Number of jobs to skip when listing
    #[arg(long, default_value_t = 0)]
    offset: usize,

    /// Only jobs created in this period (YYYY, YYYY-MM or YYYY-MM-DD)
    #[arg(long, value_name = "DATE")]
    date: Option<String>,

    /// Only jobs whose query or id contains this text
    #[arg(long, value_name = "TERM")]
    search: Option<String>,

    /// Only jobs with this status (active, completed, failed)
    #[arg(long, value_name = "STATUS")]
    status_filter: Option<JobStatus>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a new research job
    Run {
        /// The research query
        query: String,

        /// Skip the query expansion phase
        #[arg(long)]
        no_expand: bool,

        /// Run the URL review phase
        #[arg(long)]
        review: bool,

        /// Run the analysis phase
        #[arg(long)]
        analyze: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("gleaner=info,warn"),
            1 => EnvFilter::new("gleaner=debug,info"),
            2 => EnvFilter::new("gleaner=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

async fn dispatch(cli: Cli) -> anyhow::Result<ExitCode> {
    let (config, config_hash) = load_or_default(cli.config.as_deref())?;
    if let Some(hash) = &config_hash {
        tracing::info!("Configuration loaded (hash: {})", hash);
    }
    let data_dir = cli
        .data_dir
        .clone()
        .unwrap_or_else(|| config.output.data_dir.clone());

    if let Some(Command::Run {
        query,
        no_expand,
        review,
        analyze,
    }) = &cli.command
    {
        let mut job_config = JobConfig::from(&config);
        if let Some(hash) = config_hash {
            job_config = job_config.with_config_hash(hash);
        }
        job_config.expand_query &= !*no_expand;
        job_config.review_urls |= *review;
        job_config.analyze |= *analyze;

        let store = open_store(&data_dir)?;
        let manager = build_manager(&cli, store, &job_config)?;
        return run_workflow(manager, |m| async move { m.start(query, job_config).await }).await;
    }

    let store = open_store(&data_dir)?;

    if let Some(job_id) = cli.resume {
        let job_config = store.load_job(job_id)?.config;
        let manager = build_manager(&cli, store, &job_config)?;
        return run_workflow(manager, |m| async move { m.resume(job_id).await }).await;
    }

    if let Some(job_id) = cli.status {
        print_statistics(&load_statistics(&store, job_id)?);
        return Ok(ExitCode::SUCCESS);
    }

    if cli.list_jobs {
        print_job_list(&store.list_jobs(&job_filter(&cli)?)?);
        return Ok(ExitCode::SUCCESS);
    }

    if let Some(job_id) = cli.delete {
        let job = store.load_job(job_id)?;
        if !confirm(&format!("Delete job {} ({})?", job.id, job.query), cli.yes)? {
            println!("Aborted.");
            return Ok(ExitCode::SUCCESS);
        }
        store.delete_job(job_id)?;
        println!("Deleted job {}", job_id);
        return Ok(ExitCode::SUCCESS);
    }

    if cli.delete_bulk {
        // every match, regardless of --limit/--offset
        let jobs = store.list_jobs(&job_filter(&cli)?.unbounded())?;
        if jobs.is_empty() {
            println!("No jobs match.");
            return Ok(ExitCode::SUCCESS);
        }
        print_job_list(&jobs);
        if !confirm(&format!("Delete these {} jobs?", jobs.len()), cli.yes)? {
            println!("Aborted.");
            return Ok(ExitCode::SUCCESS);
        }
        for job in &jobs {
            store.delete_job(job.id)?;
        }
        println!("Deleted {} jobs", jobs.len());
        return Ok(ExitCode::SUCCESS);
    }

    if let Some(job_id) = cli.clean_raw {
        let removed = store.clean_raw(job_id)?;
        println!("Removed {} raw payloads from job {}", removed, job_id);
        return Ok(ExitCode::SUCCESS);
    }

    if cli.clean_all_raw {
        let removed = store.clean_all_raw()?;
        println!("Removed {} raw payloads", removed);
        return Ok(ExitCode::SUCCESS);
    }

    anyhow::bail!("nothing to do: use `gleaner run <QUERY>` or one of --resume, --status, --list-jobs (see --help)")
}

fn open_store(data_dir: &Path) -> anyhow::Result<Arc<JobStore>> {
    tracing::debug!("Data directory: {}", data_dir.display());
    Ok(Arc::new(JobStore::open(data_dir)?))
}

fn build_manager(
    cli: &Cli,
    store: Arc<JobStore>,
    job_config: &JobConfig,
) -> anyhow::Result<PhaseWorkflowManager> {
    let mut collector = ChainedUrlCollector::new();
    if let Some(path) = &cli.urls {
        collector = collector.with(Arc::new(FileUrlCollector::new(path.clone())));
    }
    if !cli.seeds.is_empty() {
        collector = collector.with(Arc::new(StaticUrlCollector::new(cli.seeds.clone())));
    }

    let fetcher = HttpFetcher::new(&job_config.user_agent)?
        .with_validator(UrlValidator::new(job_config.allow_private_hosts));
    Ok(PhaseWorkflowManager::new(store, Arc::new(collector), Arc::new(fetcher)))
}

/// Runs the workflow with Ctrl-C wired to cancellation
async fn run_workflow<F, Fut>(manager: PhaseWorkflowManager, run: F) -> anyhow::Result<ExitCode>
where
    F: FnOnce(Arc<PhaseWorkflowManager>) -> Fut,
    Fut: std::future::Future<Output = gleaner::Result<JobOutcome>>,
{
    let cancel = CancellationToken::new();
    let manager = Arc::new(manager.with_cancel_token(cancel.clone()));

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight requests");
            signal_cancel.cancel();
        }
    });

    let outcome = run(Arc::clone(&manager)).await?;
    print_outcome(&outcome);
    if outcome.is_interrupted() {
        return Ok(ExitCode::from(EXIT_INTERRUPTED));
    }
    Ok(ExitCode::SUCCESS)
}

fn print_outcome(outcome: &JobOutcome) {
    println!("Job {}: {}", outcome.job_id, outcome.status);
    if let Some(report) = &outcome.crawl {
        println!(
            "  requests: {}  fetched: {}  duplicates: {}  errors: {}  filtered: {}  pending: {}",
            report.requests,
            report.counts.fetched,
            report.counts.skipped_duplicate,
            report.counts.error,
            report.counts.skipped_filtered,
            report.counts.pending
        );
    }
    if outcome.is_interrupted() {
        println!("Resume with: gleaner --resume {}", outcome.job_id);
    }
}

fn job_filter(cli: &Cli) -> anyhow::Result<JobFilter> {
    let date = cli.date.as_deref().map(DateFilter::parse).transpose()?;
    Ok(JobFilter {
        status: cli.status_filter,
        date,
        search: cli.search.clone(),
        limit: cli.limit,
        offset: cli.offset,
    })
}

/// Asks for confirmation on stdin unless `assume_yes`
fn confirm(prompt: &str, assume_yes: bool) -> anyhow::Result<bool> {
    if assume_yes {
        return Ok(true);
    }
    print!("{} [y/N] ", prompt);
    std::io::stdout().flush()?;

    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

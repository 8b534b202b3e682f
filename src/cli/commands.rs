//! CLI command definitions for bias-worker.
//!
//! Every command talks to the same two backends: the SQLite analysis
//! database and the Redis job queue. Connection settings fall back to
//! environment variables so a deployment only has to export them once.

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};

use crate::analysis::{
    AnalysisSource, Article, BiasClassifier, BiasResult, ClassifierConfig, LlmBiasClassifier,
};
use crate::llm::{LiteLlmClient, DEFAULT_MODEL};
use crate::metrics::{init_metrics, write_metrics_file, MetricsCollector};
use crate::scheduler::{
    AnalysisGateway, AnalysisPipeline, JobPriority, JobQueue, QueueConfig, RedisJobQueue,
    WorkerPool, WorkerPoolConfig, DEFAULT_CLASSIFY_TIMEOUT,
};
use crate::storage::{AnalysisStore, ArticleSource, Database};

/// Default database URL.
const DEFAULT_DATABASE_URL: &str = "sqlite://bias.db";

/// Default Redis URL.
const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Background political-bias analysis for news articles.
#[derive(Parser)]
#[command(name = "bias-worker")]
#[command(about = "Queue and run political-bias analysis for news articles")]
#[command(version)]
#[command(
    long_about = "bias-worker classifies news articles on a seven-point political-bias scale.\n\nArticles are queued by id, processed by a pool of workers calling a language model, and the result is stored per article. When the model fails, a source-based estimate is stored instead.\n\nExample usage:\n  bias-worker migrate\n  bias-worker import articles.jsonl\n  bias-worker enqueue --missing\n  bias-worker worker --concurrency 2"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Create or upgrade the database schema.
    Migrate(MigrateArgs),

    /// Run the worker pool until interrupted.
    Worker(WorkerArgs),

    /// Queue analysis jobs.
    Enqueue(EnqueueArgs),

    /// Show queue counts and analysis totals.
    Status(StatusArgs),

    /// Show the analysis record for one article.
    Show(ShowArgs),

    /// Prune finished job bookkeeping.
    Clean(CleanArgs),

    /// Classify one article and print the result without storing it.
    Classify(ClassifyArgs),

    /// Load articles from a JSON-lines file.
    Import(ImportArgs),
}

/// Database connection arguments.
#[derive(Parser, Debug, Clone)]
pub struct DatabaseArgs {
    /// SQLite database URL.
    #[arg(long, env = "DATABASE_URL", default_value = DEFAULT_DATABASE_URL)]
    pub database_url: String,
}

/// Queue connection arguments.
#[derive(Parser, Debug, Clone)]
pub struct QueueArgs {
    /// Redis URL for the job queue.
    #[arg(long, env = "REDIS_URL", default_value = DEFAULT_REDIS_URL)]
    pub redis_url: String,

    /// Queue name (Redis key prefix).
    #[arg(long, env = "BIAS_QUEUE_NAME", default_value = crate::scheduler::queue::DEFAULT_QUEUE_NAME)]
    pub queue_name: String,
}

/// Language model arguments.
#[derive(Parser, Debug, Clone)]
pub struct LlmArgs {
    /// Base URL of the OpenAI-compatible gateway.
    #[arg(long, env = "LITELLM_API_BASE")]
    pub api_base: Option<String>,

    /// API key for the gateway.
    #[arg(long, env = "LITELLM_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Model used for classification.
    #[arg(short = 'm', long, env = "BIAS_MODEL", default_value = DEFAULT_MODEL)]
    pub model: String,

    /// Classifier call timeout in seconds.
    #[arg(long, default_value_t = DEFAULT_CLASSIFY_TIMEOUT.as_secs())]
    pub classify_timeout_secs: u64,
}

/// Arguments for `bias-worker migrate`.
#[derive(Parser, Debug)]
pub struct MigrateArgs {
    #[command(flatten)]
    pub db: DatabaseArgs,
}

/// Arguments for `bias-worker worker`.
#[derive(Parser, Debug)]
pub struct WorkerArgs {
    #[command(flatten)]
    pub db: DatabaseArgs,

    #[command(flatten)]
    pub queue: QueueArgs,

    #[command(flatten)]
    pub llm: LlmArgs,

    /// Number of concurrent workers.
    #[arg(short = 'c', long, default_value = "2")]
    pub concurrency: usize,

    /// Maximum attempts per job.
    #[arg(long, default_value_t = crate::scheduler::job::DEFAULT_MAX_ATTEMPTS)]
    pub max_attempts: u32,

    /// Write Prometheus metrics to this file periodically.
    #[arg(long)]
    pub metrics_file: Option<PathBuf>,

    /// Seconds between metrics file writes.
    #[arg(long, default_value = "15")]
    pub metrics_interval_secs: u64,
}

/// Arguments for `bias-worker enqueue`.
#[derive(Parser, Debug)]
pub struct EnqueueArgs {
    /// Article ids to queue.
    #[arg(required_unless_present = "missing")]
    pub article_ids: Vec<String>,

    /// Queue every stored article that lacks a completed analysis.
    #[arg(long, conflicts_with = "article_ids")]
    pub missing: bool,

    /// Maximum number of articles scanned with --missing.
    #[arg(long, default_value = "500")]
    pub limit: u32,

    /// Job priority (high or normal).
    #[arg(short, long, default_value = "normal")]
    pub priority: JobPriority,

    #[command(flatten)]
    pub db: DatabaseArgs,

    #[command(flatten)]
    pub queue: QueueArgs,
}

/// Arguments for `bias-worker status`.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    #[command(flatten)]
    pub db: DatabaseArgs,

    #[command(flatten)]
    pub queue: QueueArgs,

    /// Also list this many of the most recently failed jobs.
    #[arg(long, default_value = "0")]
    pub failed: usize,

    /// Output JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `bias-worker show`.
#[derive(Parser, Debug)]
pub struct ShowArgs {
    /// Article id.
    pub article_id: String,

    #[command(flatten)]
    pub db: DatabaseArgs,
}

/// Arguments for `bias-worker clean`.
#[derive(Parser, Debug)]
pub struct CleanArgs {
    /// Prune jobs finished more than this many hours ago.
    #[arg(long, default_value = "24")]
    pub older_than_hours: u64,

    #[command(flatten)]
    pub queue: QueueArgs,
}

/// Arguments for `bias-worker classify`.
#[derive(Parser, Debug)]
pub struct ClassifyArgs {
    /// Article id to load from the database.
    pub article_id: String,

    #[command(flatten)]
    pub db: DatabaseArgs,

    #[command(flatten)]
    pub llm: LlmArgs,
}

/// Arguments for `bias-worker import`.
#[derive(Parser, Debug)]
pub struct ImportArgs {
    /// JSON-lines file with one article object per line.
    pub path: PathBuf,

    #[command(flatten)]
    pub db: DatabaseArgs,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Migrate(args) => run_migrate_command(args).await,
        Commands::Worker(args) => run_worker_command(args).await,
        Commands::Enqueue(args) => run_enqueue_command(args).await,
        Commands::Status(args) => run_status_command(args).await,
        Commands::Show(args) => run_show_command(args).await,
        Commands::Clean(args) => run_clean_command(args).await,
        Commands::Classify(args) => run_classify_command(args).await,
        Commands::Import(args) => run_import_command(args).await,
    }
}

// ============================================================================
// Shared setup
// ============================================================================

async fn open_database(args: &DatabaseArgs) -> anyhow::Result<Database> {
    let db = Database::connect(&args.database_url)
        .await
        .with_context(|| format!("Failed to open database {}", args.database_url))?;
    db.run_migrations()
        .await
        .context("Failed to apply database migrations")?;
    Ok(db)
}

async fn connect_queue(args: &QueueArgs, config: QueueConfig) -> anyhow::Result<RedisJobQueue> {
    let config = config.with_queue_name(&args.queue_name);
    RedisJobQueue::connect(&args.redis_url, config)
        .await
        .with_context(|| format!("Failed to connect to job queue at {}", args.redis_url))
}

fn build_classifier(args: &LlmArgs) -> anyhow::Result<Arc<dyn BiasClassifier>> {
    let Some(api_base) = args.api_base.clone() else {
        anyhow::bail!(
            "LITELLM_API_BASE is required but not set.\n\
             Provide it via --api-base <URL> or set the LITELLM_API_BASE environment variable."
        );
    };

    let client = LiteLlmClient::new(api_base, args.api_key.clone(), args.model.clone())
        .context("Failed to initialize LLM client")?;
    info!(model = %args.model, api_base = %client.api_base(), "Using LLM classifier");

    let config = ClassifierConfig::new().with_model(args.model.clone());
    Ok(Arc::new(LlmBiasClassifier::new(Arc::new(client), config)))
}

// ============================================================================
// Commands
// ============================================================================

async fn run_migrate_command(args: MigrateArgs) -> anyhow::Result<()> {
    let db = Database::connect(&args.db.database_url)
        .await
        .with_context(|| format!("Failed to open database {}", args.db.database_url))?;
    let applied = db.run_migrations().await?;
    println!("Applied {} migration(s)", applied);
    db.close().await;
    Ok(())
}

async fn run_worker_command(args: WorkerArgs) -> anyhow::Result<()> {
    init_metrics().context("Failed to initialize metrics")?;

    let db = open_database(&args.db).await?;
    let classifier = build_classifier(&args.llm)?;

    let queue_config = QueueConfig::new().with_policy(
        crate::scheduler::JobPolicy::new().with_max_attempts(args.max_attempts),
    );
    let queue: Arc<dyn JobQueue> = Arc::new(connect_queue(&args.queue, queue_config).await?);

    let store = Arc::new(db.clone());
    let pipeline = AnalysisPipeline::new(store.clone(), store, classifier);
    let pool_config = WorkerPoolConfig::new(args.concurrency)
        .with_classify_timeout(Duration::from_secs(args.llm.classify_timeout_secs));

    let mut pool = WorkerPool::new(pool_config, Arc::clone(&queue), pipeline);
    pool.start().await?;

    let metrics_task = args.metrics_file.clone().map(|path| {
        let interval = Duration::from_secs(args.metrics_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(e) = write_metrics_file(&path).await {
                    warn!(path = %path.display(), error = %e, "Failed to write metrics file");
                }
            }
        })
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    if let Some(task) = metrics_task {
        task.abort();
    }

    let stats = pool.stats();
    let shutdown = pool.shutdown().await;
    queue.close().await?;
    db.close().await;

    info!(
        completed = stats.jobs_completed,
        failed = stats.jobs_failed,
        retried = stats.jobs_retried,
        fallbacks = stats.fallbacks_used,
        average_ms = stats.average_job_duration.as_millis() as u64,
        "Worker stopped"
    );

    shutdown.map_err(Into::into)
}

async fn run_enqueue_command(args: EnqueueArgs) -> anyhow::Result<()> {
    let queue: Arc<dyn JobQueue> =
        Arc::new(connect_queue(&args.queue, QueueConfig::default()).await?);
    let gateway = AnalysisGateway::new(Arc::clone(&queue));

    if args.missing {
        let db = open_database(&args.db).await?;
        let ids = db.list_article_ids(args.limit).await?;
        let queued = gateway.refresh_missing(&db, &ids, args.priority).await;
        println!(
            "Queued {} of {} scanned article(s) at {} priority",
            queued,
            ids.len(),
            args.priority
        );
    } else {
        for article_id in &args.article_ids {
            let job_id = gateway
                .queue_analysis(article_id, args.priority)
                .await
                .with_context(|| format!("Failed to queue {}", article_id))?;
            println!("{}\t{}", article_id, job_id);
        }
    }

    queue.close().await?;
    Ok(())
}

#[derive(Debug, Serialize)]
struct StatusOutput {
    queue_name: String,
    queue: crate::scheduler::QueueCounts,
    analyses: crate::analysis::AnalysisSummary,
    recent_failures: Vec<crate::scheduler::Job>,
}

async fn run_status_command(args: StatusArgs) -> anyhow::Result<()> {
    let db = open_database(&args.db).await?;
    let queue = connect_queue(&args.queue, QueueConfig::default()).await?;

    let output = StatusOutput {
        queue_name: queue.name().to_string(),
        queue: queue.counts().await?,
        analyses: db.summary().await?,
        recent_failures: if args.failed > 0 {
            queue.peek_failed(args.failed).await?
        } else {
            Vec::new()
        },
    };
    MetricsCollector::new().update_queue_depth(&output.queue_name, &output.queue);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_status(&output);
    }

    queue.close().await?;
    db.close().await;
    Ok(())
}

fn print_status(output: &StatusOutput) {
    println!("Queue '{}'", output.queue_name);
    println!("  waiting:   {}", output.queue.waiting);
    println!("  active:    {}", output.queue.active);
    println!("  completed: {}", output.queue.completed);
    println!("  failed:    {}", output.queue.failed);
    println!();
    println!("Analyses: {}", output.analyses.total);
    for (status, count) in &output.analyses.by_status {
        println!("  {:<12} {}", status, count);
    }
    if !output.analyses.by_direction.is_empty() {
        println!("By direction:");
        for (direction, count) in &output.analyses.by_direction {
            println!("  {:<12} {}", direction, count);
        }
    }
    if !output.recent_failures.is_empty() {
        println!();
        println!("Recent failures:");
        for job in &output.recent_failures {
            println!(
                "  {} {} attempts={} error={}",
                job.id,
                job.article_id,
                job.attempts_made,
                job.last_error.as_deref().unwrap_or("-")
            );
        }
    }
}

async fn run_show_command(args: ShowArgs) -> anyhow::Result<()> {
    let db = open_database(&args.db).await?;
    let record = db.get(&args.article_id).await?;
    db.close().await;

    match record {
        Some(record) => {
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(())
        }
        None => anyhow::bail!("No analysis record for article '{}'", args.article_id),
    }
}

async fn run_clean_command(args: CleanArgs) -> anyhow::Result<()> {
    let queue = connect_queue(&args.queue, QueueConfig::default()).await?;
    let older_than = Duration::from_secs(args.older_than_hours.saturating_mul(3600));
    let removed = queue.clean(older_than).await?;
    println!("Removed {} finished job(s)", removed);
    queue.close().await?;
    Ok(())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClassifyOutput {
    article_id: String,
    source: AnalysisSource,
    #[serde(flatten)]
    result: BiasResult,
}

async fn run_classify_command(args: ClassifyArgs) -> anyhow::Result<()> {
    let db = open_database(&args.db).await?;
    let article = db
        .get_article(&args.article_id)
        .await?
        .with_context(|| format!("Article '{}' not found", args.article_id))?;

    let classifier = build_classifier(&args.llm)?;
    let store = Arc::new(db.clone());
    let pipeline = AnalysisPipeline::new(store.clone(), store, classifier)
        .with_classify_timeout(Duration::from_secs(args.llm.classify_timeout_secs));

    let outcome = pipeline.classify_or_estimate(&article).await;
    let output = ClassifyOutput {
        article_id: article.id,
        source: outcome.source,
        result: outcome.result,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);

    db.close().await;
    Ok(())
}

async fn run_import_command(args: ImportArgs) -> anyhow::Result<()> {
    let articles = load_articles(&args.path)?;
    let db = open_database(&args.db).await?;

    for article in &articles {
        db.upsert_article(article)
            .await
            .with_context(|| format!("Failed to store article {}", article.id))?;
    }

    println!(
        "Imported {} article(s) from {}",
        articles.len(),
        args.path.display()
    );
    db.close().await;
    Ok(())
}

/// Reads one article per non-blank line.
fn load_articles(path: &Path) -> anyhow::Result<Vec<Article>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let mut articles = Vec::new();
    for (index, line) in std::io::BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let article: Article = serde_json::from_str(&line)
            .with_context(|| format!("Invalid article on line {}", index + 1))?;
        articles.push(article);
    }
    Ok(articles)
}

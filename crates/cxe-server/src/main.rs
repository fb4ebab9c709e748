mod api;
mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use cxe_core::cache::MemoryCache;
use cxe_core::cache::StatusCache;
use cxe_core::language::LanguageRegistry;
use cxe_core::queue::SubmissionQueue;
use cxe_core::sandbox::create_sandbox;
use cxe_core::worker::{WorkerContext, WorkerPool};

use config::CxeConfig;

/// How often expired status records are purged.
const CACHE_SWEEP_PERIOD: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "cxe", about = "Sandboxed code execution engine")]
struct Cli {
    /// Config file path (overrides the default location)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the worker pool and HTTP API
    Serve {
        /// Bind address (overrides config)
        #[arg(long)]
        bind: Option<String>,
        /// Listen port (overrides config)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Validate configuration and probe the sandbox backend
    Doctor,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { bind, port } => {
            let mut resolved = CxeConfig::resolve(cli.config.as_deref())?;
            if let Some(bind) = bind {
                resolved.bind = bind;
            }
            if let Some(port) = port {
                resolved.port = port;
            }
            run_serve(resolved).await?;
        }
        Commands::Doctor => {
            run_doctor(cli.config.as_deref()).await?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "cxe", &mut std::io::stdout());
        }
    }

    Ok(())
}

async fn run_serve(resolved: CxeConfig) -> anyhow::Result<()> {
    let engine = resolved.engine.clone();

    let sandbox = create_sandbox(&engine.sandbox_mode)?;
    sandbox
        .probe()
        .await
        .with_context(|| format!("sandbox backend {:?} is not usable", engine.sandbox_mode))?;

    let queue = Arc::new(SubmissionQueue::new());
    let memory_cache = Arc::new(MemoryCache::new());
    let cache: Arc<dyn StatusCache> = memory_cache.clone() as Arc<dyn StatusCache>;
    let languages = Arc::new(LanguageRegistry::with_defaults());

    tracing::info!(
        workers = engine.worker_count,
        sandbox = %engine.sandbox_mode,
        languages = ?languages.list(),
        temp_dir = %engine.temp_dir.display(),
        "starting execution engine"
    );

    // Periodic TTL sweep so abandoned records do not accumulate.
    let sweeper = {
        let cache = Arc::clone(&memory_cache);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(CACHE_SWEEP_PERIOD);
            loop {
                interval.tick().await;
                cache.purge_expired().await;
            }
        })
    };

    let cancel = CancellationToken::new();
    let ctx = Arc::new(WorkerContext {
        queue: Arc::clone(&queue),
        cache: Arc::clone(&cache),
        languages: Arc::clone(&languages),
        sandbox,
        config: engine.clone(),
    });
    let pool = WorkerPool::start(ctx, cancel.clone());

    let state = Arc::new(api::AppState {
        queue,
        cache,
        languages,
        config: engine,
        active_workers: pool.worker_count(),
    });

    // Serve until ctrl-c, then drain workers.
    let result = api::run_serve(state, &resolved.bind, resolved.port).await;

    cancel.cancel();
    pool.shutdown().await;
    sweeper.abort();
    tracing::info!("execution engine stopped");

    result
}

async fn run_doctor(config_file: Option<&std::path::Path>) -> anyhow::Result<()> {
    let resolved = CxeConfig::resolve(config_file)?;
    let engine = &resolved.engine;

    println!("config:");
    println!("  workers            = {}", engine.worker_count);
    println!("  compile timeout    = {}s", engine.compile_timeout.as_secs());
    println!("  run timeout        = {}s", engine.run_timeout.as_secs());
    println!("  memory limit       = {} bytes", engine.run_memory_limit_bytes);
    println!("  cpu share          = {}", engine.run_cpu_share);
    println!("  cache ttl          = {}s", engine.cache_ttl.as_secs());
    println!("  temp dir           = {}", engine.temp_dir.display());
    println!("  sandbox mode       = {}", engine.sandbox_mode);

    if !engine.temp_dir.is_dir() {
        anyhow::bail!("temp dir {} is not a directory", engine.temp_dir.display());
    }

    let sandbox = create_sandbox(&engine.sandbox_mode)?;
    sandbox
        .probe()
        .await
        .with_context(|| format!("sandbox backend {:?} failed its probe", engine.sandbox_mode))?;
    println!("sandbox {:?} is reachable", engine.sandbox_mode);

    let languages = LanguageRegistry::with_defaults();
    let mut names = languages.list();
    names.sort_unstable();
    println!("languages: {}", names.join(", "));

    println!("ok");
    Ok(())
}

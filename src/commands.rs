use crate::cli::{Cli, Commands, ListArgs, OrbitArgs, PullArgs, RunArgs, Selection};
use gimpfetch::config::Config;
use gimpfetch::dates;
use gimpfetch::executor::HttpExecutor;
use gimpfetch::listing::Lister;
use gimpfetch::plan::Planner;
use gimpfetch::pool::{FailurePolicy, Orchestrator, RunOutcome, RunSummary};
use gimpfetch::session::{AnonymousSessionProvider, CookieSessionProvider, Session, SessionProvider};
use gimpfetch::task::Task;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("cannot write to {path}: {source}")]
    NotWritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{failed} of {total} files failed")]
    TasksFailed { failed: usize, total: usize },
}

pub async fn run(cli: Cli) -> Result<(), AnyError> {
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::List(args) => list(config, args).await,
        Commands::Pull(args) => pull(config, args).await,
        Commands::Orbits(args) => orbits(config, args).await,
        Commands::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

async fn list(mut config: Config, args: ListArgs) -> Result<(), AnyError> {
    apply_run_args(&mut config, &args.run, args.outdir);
    let product = Product::resolve(&config, &args.selection)?;
    if !args.run.no_prompt {
        ensure_writable(&config.download.outdir)?;
    }

    let session = login(&config).await?;
    let planner = Planner::new(Arc::new(Lister::new(&session)), config.catalog());
    let dirs = planner
        .directories(&product.id, product.region(), product.range.as_ref())
        .await?;

    println!();
    println!("Available directories:");
    for dir in &dirs {
        println!("{dir}");
    }
    if args.run.no_prompt || dirs.is_empty() {
        return Ok(());
    }

    let tasks = planner
        .tasks(&product.id, product.region(), &dirs, &config.download.outdir)
        .await?;
    download(&config, &session, tasks, &product.label(), !args.yes).await
}

async fn pull(mut config: Config, args: PullArgs) -> Result<(), AnyError> {
    apply_run_args(&mut config, &args.run, args.outdir);
    let product = Product::resolve(&config, &args.selection)?;
    ensure_writable(&config.download.outdir)?;

    let session = login(&config).await?;
    let planner = Planner::new(Arc::new(Lister::new(&session)), config.catalog());
    let dirs = planner
        .directories(&product.id, product.region(), product.range.as_ref())
        .await?;
    let tasks = planner
        .tasks(&product.id, product.region(), &dirs, &config.download.outdir)
        .await?;

    download(&config, &session, tasks, &product.label(), !args.run.no_prompt).await
}

async fn orbits(mut config: Config, args: OrbitArgs) -> Result<(), AnyError> {
    apply_run_args(&mut config, &args.run, None);
    let dir = args.dir.unwrap_or_else(|| config.download.outdir.clone());
    ensure_writable(&dir)?;

    let session = AnonymousSessionProvider::new(config.http.clone())
        .ensure_valid_session()
        .await?;
    let planner = Planner::new(Arc::new(Lister::new(&session)), config.catalog());
    let tasks = planner
        .orbit_tasks(&config.orbits, &dir, dates::today())
        .await?;

    download(&config, &session, tasks, "orbits", !args.run.no_prompt).await
}

async fn login(config: &Config) -> Result<Session, AnyError> {
    let provider = CookieSessionProvider::new(
        config.session.clone(),
        config.http.clone(),
        config.credentials.clone(),
    );
    Ok(provider.ensure_valid_session().await?)
}

async fn download(
    config: &Config,
    session: &Session,
    tasks: Vec<Task>,
    label: &str,
    confirm: bool,
) -> Result<(), AnyError> {
    let executor = Arc::new(HttpExecutor::new(session, config.download_options()));
    let orchestrator = Orchestrator::new(executor, config.pool.pool_config());

    let cancel = CancellationToken::new();
    cancel_on_shutdown(cancel.clone());

    match orchestrator
        .run_until_cancelled(tasks, label, confirm, cancel)
        .await?
    {
        RunOutcome::Declined => {
            println!("Nothing downloaded.");
            Ok(())
        }
        RunOutcome::Finished(summary) => report(&summary),
    }
}

fn report(summary: &RunSummary) -> Result<(), AnyError> {
    println!("{summary}");
    for failure in &summary.failures {
        println!(
            "  #{} {} -> {}: {}",
            failure.index,
            failure.task.source,
            failure.task.destination.display(),
            failure.outcome
        );
    }

    if summary.is_success() {
        Ok(())
    } else {
        Err(CommandError::TasksFailed {
            failed: summary.failed,
            total: summary.total,
        }
        .into())
    }
}

/// CLI flags override the loaded configuration
fn apply_run_args(config: &mut Config, run: &RunArgs, outdir: Option<PathBuf>) {
    if let Some(outdir) = outdir {
        config.download.outdir = outdir;
    }
    if run.overwrite {
        config.download.overwrite = true;
    }
    if run.strict {
        config.pool.failure_policy = FailurePolicy::AbortOnFirstError;
    }
    if let Some(concurrency) = run.concurrency {
        config.pool.concurrency = concurrency.get();
    }
    if let Some(secs) = run.task_timeout {
        config.pool.task_timeout_secs = Some(secs.get());
    }
}

/// A product selection checked against the catalog before any network use
struct Product {
    id: String,
    region: Option<String>,
    range: Option<dates::DateRange>,
}

impl Product {
    fn resolve(config: &Config, selection: &Selection) -> Result<Self, AnyError> {
        let entry = config.catalog().lookup(&selection.product)?.clone();
        entry.listing_url(&selection.product, selection.region.as_deref())?;
        Ok(Self {
            id: selection.product.clone(),
            region: selection.region.clone(),
            range: selection.range()?,
        })
    }

    fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    fn label(&self) -> String {
        match (&self.region, &self.range) {
            (Some(region), Some(range)) => format!("{} {region} {range}", self.id),
            (Some(region), None) => format!("{} {region}", self.id),
            (None, Some(range)) => format!("{} {range}", self.id),
            (None, None) => self.id.clone(),
        }
    }
}

/// Create `dir` if needed and prove a file can be written in it
fn ensure_writable(dir: &Path) -> Result<(), CommandError> {
    let not_writable = |source| CommandError::NotWritable {
        path: dir.to_path_buf(),
        source,
    };
    std::fs::create_dir_all(dir).map_err(not_writable)?;

    let probe = dir.join(format!(".gimpfetch-probe-{}", uuid::Uuid::new_v4().simple()));
    std::fs::write(&probe, b"").map_err(not_writable)?;
    if let Err(e) = std::fs::remove_file(&probe) {
        warn!(path = %probe.display(), error = %e, "Failed to remove write probe");
    }
    Ok(())
}

fn cancel_on_shutdown(token: CancellationToken) {
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received, stopping downloads");
        token.cancel();
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use doodle_scout::core::types::SearchMode;
use doodle_scout::eval::EvalRunner;
use doodle_scout::ingest::{progress_channel, run_ingest, JobStatus};
use doodle_scout::{api, AppState, Settings};

#[derive(Parser)]
#[command(
    name = "doodle-scout",
    version,
    about = "Sketch-to-page search over handwritten PDF notebooks"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a directory of PDF notebooks into the index.
    Index {
        /// Root directory to scan for PDFs.
        path: PathBuf,
        /// Re-index files whose content hash is already indexed.
        #[arg(long)]
        force: bool,
        /// YAML config file (defaults apply when omitted).
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Serve the HTTP API.
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Run the offline evaluation harness.
    Eval {
        /// fast | accurate | both
        #[arg(long, default_value = "fast")]
        mode: String,
        #[arg(long, default_value_t = 100)]
        num_queries: usize,
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Regenerate pseudo-queries even if a set already exists.
        #[arg(long)]
        regenerate: bool,
        /// Save this run's results as the regression baseline.
        #[arg(long)]
        save_baseline: bool,
        /// Compare this run against the saved baseline.
        #[arg(long)]
        check_regression: bool,
        #[arg(long, default_value_t = 0.05)]
        regression_threshold: f32,
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tower_http=warn"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();
    match cli.command {
        Command::Index {
            path,
            force,
            config,
        } => cmd_index(path, force, config).await,
        Command::Serve { host, port, config } => cmd_serve(host, port, config).await,
        Command::Eval {
            mode,
            num_queries,
            seed,
            regenerate,
            save_baseline,
            check_regression,
            regression_threshold,
            config,
        } => {
            cmd_eval(
                mode,
                num_queries,
                seed,
                regenerate,
                save_baseline,
                check_regression,
                regression_threshold,
                config,
            )
            .await
        }
    }
}

async fn cmd_index(path: PathBuf, force: bool, config: Option<PathBuf>) -> anyhow::Result<()> {
    let settings = Settings::resolve(config.as_deref())?;
    let state = Arc::new(AppState::initialize(settings)?);

    let (tx, mut rx) = progress_channel();
    let printer = tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let p = rx.borrow().clone();
            match p.status {
                JobStatus::Indexing => info!(
                    "[{}/{} docs] [{}/{} pages] {}",
                    p.docs_done, p.docs_total, p.pages_done, p.pages_total, p.current_doc
                ),
                JobStatus::Discovering => info!("discovering PDFs..."),
                _ => {}
            }
        }
    });

    let cancel = Arc::new(AtomicBool::new(false));
    let worker_state = state.clone();
    let worker_cancel = cancel.clone();
    let progress = tokio::task::spawn_blocking(move || {
        run_ingest(&worker_state, &path, force, &tx, &worker_cancel)
    })
    .await
    .context("ingest task panicked")??;
    printer.abort();

    println!(
        "Indexed {} documents ({} pages).",
        progress.docs_done, progress.pages_done
    );
    Ok(())
}

async fn cmd_serve(
    host: Option<String>,
    port: Option<u16>,
    config: Option<PathBuf>,
) -> anyhow::Result<()> {
    let mut settings = Settings::resolve(config.as_deref())?;
    if let Some(host) = host {
        settings.bind_host = host;
    }
    if let Some(port) = port {
        settings.bind_port = port;
    }

    let state = Arc::new(AppState::initialize(settings)?);
    api::serve(state).await
}

#[allow(clippy::too_many_arguments)]
async fn cmd_eval(
    mode: String,
    num_queries: usize,
    seed: u64,
    regenerate: bool,
    save_baseline: bool,
    check_regression: bool,
    regression_threshold: f32,
    config: Option<PathBuf>,
) -> anyhow::Result<()> {
    let modes: Vec<SearchMode> = match mode.as_str() {
        "both" => vec![SearchMode::Fast, SearchMode::Accurate],
        other => vec![other
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))?],
    };

    let settings = Settings::resolve(config.as_deref())?;
    let state = Arc::new(AppState::initialize(settings)?);

    let eval_state = state.clone();
    let failures = tokio::task::spawn_blocking(move || {
        let runner = EvalRunner::new(&eval_state, num_queries, seed, regenerate);
        let results = runner.run(&modes)?;

        let mut failures = Vec::new();
        for (mode, metrics) in &results {
            println!(
                "[{mode}] recall@1={:.3} recall@5={:.3} recall@10={:.3} recall@20={:.3} \
                 mrr={:.3} p50={:.1}ms p95={:.1}ms ({} queries)",
                metrics.retrieval.recall_at_1,
                metrics.retrieval.recall_at_5,
                metrics.retrieval.recall_at_10,
                metrics.retrieval.recall_at_20,
                metrics.retrieval.mrr,
                metrics.latency.p50_ms,
                metrics.latency.p95_ms,
                metrics.retrieval.num_queries,
            );

            if check_regression {
                let cmp = runner.compare_to_baseline(metrics, *mode, regression_threshold)?;
                println!("[{mode}] {}", cmp.message);
                if !cmp.passed {
                    failures.push(*mode);
                }
            }
            if save_baseline {
                runner.save_as_baseline(*mode)?;
            }
        }
        Ok::<_, anyhow::Error>(failures)
    })
    .await
    .context("eval task panicked")??;

    if !failures.is_empty() {
        anyhow::bail!("regression check failed for: {:?}", failures);
    }
    Ok(())
}

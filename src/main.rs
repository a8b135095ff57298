//! Binary entry point for axon.
//!
//! This binary provides the CLI interface for the adaptive routing and
//! synthesis pipeline.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow prints in the main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use axon::cli;
use axon::config::{AxonConfig, RunConfig};
use axon::models::Tier;
use axon::observability::{self, LoggingConfig};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

/// Axon - adaptive query routing and synthesis for LLM applications.
#[derive(Parser)]
#[command(name = "axon")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Run a query through the pipeline.
    Query {
        /// The query text.
        text: String,

        /// Domain tag for retrieval and calibration.
        #[arg(short, long, default_value = "general")]
        domain: String,

        /// Disable the teacher (high-capability) tier.
        #[arg(long)]
        no_teacher: bool,

        /// Disable the student (low-cost) tier.
        #[arg(long)]
        no_student: bool,

        /// Bypass the response cache.
        #[arg(long)]
        no_cache: bool,

        /// Per-request cost ceiling in USD.
        #[arg(long)]
        cost_ceiling: Option<f64>,

        /// Maximum verifier refinement passes.
        #[arg(long)]
        iterations: Option<u32>,

        /// Print the reasoning trace.
        #[arg(long)]
        trace: bool,

        /// Output the full result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Add a context item to the store.
    Context {
        /// Item identifier.
        #[arg(long)]
        id: String,

        /// The note content.
        content: String,

        /// Domain tag.
        #[arg(short, long, default_value = "general")]
        domain: String,
    },

    /// Show pipeline statistics.
    Stats {
        /// Number of recent runs to list.
        #[arg(short, long, default_value = "5")]
        limit: usize,
    },

    /// Probe tier endpoint availability.
    Tiers,

    /// Recalibrate the difficulty estimator from recent run outcomes.
    Recalibrate {
        /// Number of recent runs to learn from.
        #[arg(short, long, default_value = "200")]
        limit: usize,
    },

    /// Prune context items whose harmful count dominates.
    Prune,

    /// Manage configuration.
    Config {
        /// Show the effective configuration.
        #[arg(long)]
        show: bool,
    },
}

fn main() -> ExitCode {
    // Load .env if present; absence is fine.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    if let Err(e) = observability::init(&LoggingConfig::from_env(cli.verbose)) {
        eprintln!("warning: {e}");
    }

    let config = AxonConfig::load_or_default(cli.config.as_deref());

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run_command(cli.command, config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run_command(command: Commands, config: AxonConfig) -> axon::Result<()> {
    match command {
        Commands::Query {
            text,
            domain,
            no_teacher,
            no_student,
            no_cache,
            cost_ceiling,
            iterations,
            trace,
            json,
        } => {
            let mut run_config = RunConfig {
                enable_teacher_tier: !no_teacher,
                enable_student_tier: !no_student,
                cache_enabled: !no_cache,
                ..RunConfig::default()
            };
            if let Some(ceiling) = cost_ceiling {
                run_config.cost_ceiling_usd = ceiling;
            }
            if let Some(iterations) = iterations {
                run_config.max_verification_iterations = iterations;
            }

            let pipeline = cli::build_pipeline(config);
            let result = pipeline.execute(&text, &domain, run_config).await?;

            if json {
                let rendered =
                    serde_json::to_string_pretty(&result).map_err(|e| axon::Error::OperationFailed {
                        operation: "serialize_result".to_string(),
                        cause: e.to_string(),
                    })?;
                println!("{rendered}");
            } else {
                println!("{}", result.answer);
                if trace {
                    eprintln!();
                    for line in &result.reasoning_trace {
                        eprintln!("  {line}");
                    }
                    eprintln!(
                        "  cost ${:.4}, {}ms, quality {:.2}",
                        result.metadata.cost_usd,
                        result.metadata.duration_ms,
                        result.metadata.quality_score
                    );
                }
            }
            // The outcome recorder runs detached; give it a beat to land
            // before the process exits.
            tokio::task::yield_now().await;
            Ok(())
        }

        Commands::Context { id, content, domain } => {
            let pipeline = cli::build_pipeline(config);
            pipeline.add_context(id.clone(), content, domain).await?;
            println!("stored context item {id}");
            Ok(())
        }

        Commands::Stats { limit } => {
            let pipeline = cli::build_pipeline(config);
            let cache = pipeline.cache_stats();
            let items = pipeline.store().count().await?;
            println!("cache: {} entries, hit rate {:.1}%", cache.size, cache.hit_rate * 100.0);
            println!(
                "cache: {} hits, {} misses, {} evictions",
                cache.hits, cache.misses, cache.eviction_count
            );
            println!("store: {items} context items");
            let runs = pipeline.store().recent_runs(limit).await?;
            if !runs.is_empty() {
                println!("recent runs:");
                for run in runs {
                    println!(
                        "  {} {} [{}] difficulty {:.2} cost ${:.4} {}",
                        run.recorded_at.format("%Y-%m-%d %H:%M:%S"),
                        run.run_id,
                        run.domain,
                        run.difficulty,
                        run.cost_usd,
                        if run.success { "ok" } else { "failed" }
                    );
                }
            }
            Ok(())
        }

        Commands::Tiers => {
            let teacher = cli::build_teacher_tier(&config);
            let student = cli::build_student_tier(&config);
            for endpoint in [teacher, student] {
                let available = endpoint.is_available().await;
                println!(
                    "{} ({}): {}",
                    endpoint.tier(),
                    endpoint.name(),
                    if available { "available" } else { "unavailable" }
                );
            }
            Ok(())
        }

        Commands::Recalibrate { limit } => {
            let pipeline = cli::build_pipeline(config);
            let version = pipeline.recalibrate(limit).await?;
            println!("recalibrated to version {version}");
            Ok(())
        }

        Commands::Prune => {
            let pipeline = cli::build_pipeline(config);
            let removed = pipeline.prune_context().await?;
            println!("pruned {removed} context items");
            Ok(())
        }

        Commands::Config { show } => {
            if show {
                print_config(&config);
            } else {
                println!("use --show to print the effective configuration");
            }
            Ok(())
        }
    }
}

fn print_config(config: &AxonConfig) {
    println!("data_dir: {}", config.data_dir.display());
    println!("routing.difficulty_threshold: {}", config.routing.difficulty_threshold);
    println!("cache.max_size: {}", config.cache.max_size);
    println!("cache.ttl_secs: {}", config.cache.ttl_secs);
    println!(
        "verifier.convergence_threshold: {}",
        config.verifier.convergence_threshold
    );
    println!("verifier.min_delta: {}", config.verifier.min_delta);
    println!("retrieval.min_similarity: {}", config.retrieval.min_similarity);
    println!("retrieval.prune_min_uses: {}", config.retrieval.prune_min_uses);
    for tier in [Tier::Teacher, Tier::Student] {
        let settings = config.tier(tier);
        println!(
            "{tier}: model={} cost_per_1k=${} max_tokens={} timeout_ms={}",
            settings.model,
            settings.cost_per_1k_tokens_usd,
            settings.max_tokens,
            settings.timeout_ms
        );
    }
}

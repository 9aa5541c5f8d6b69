//! replbox CLI
//!
//! A command-line tool for running array-language snippets in pooled sandboxes.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use replbox::{Config, EXAMPLE_CONFIG, ExecuteOptions, ExecutionResult, Executor, LanguageId};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tracing::{Level, debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "replbox")]
#[command(about = "Run J, APL and Kap snippets in sandboxed REPL sessions")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable warm sessions; every request is a cold start
    #[arg(long, global = true)]
    no_warm: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new configuration file
    Init {
        /// Output path (default: replbox.toml)
        #[arg(short, long, default_value = "replbox.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Execute one snippet
    Run {
        /// Source file (default: stdin)
        #[arg(value_name = "FILE", conflicts_with = "eval")]
        source: Option<PathBuf>,

        /// Language ID (j, apl, kap)
        #[arg(short, long)]
        language: LanguageId,

        /// Code to execute, instead of a file
        #[arg(short, long)]
        eval: Option<String>,

        /// Execution timeout in milliseconds
        #[arg(short, long)]
        timeout_ms: Option<u64>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Execute stdin line by line on a warm session
    Repl {
        /// Language ID (j, apl, kap)
        #[arg(short, long)]
        language: LanguageId,
    },

    /// Check the isolation runtime and execution images
    Probe,

    /// List configured languages
    Languages,

    /// Show the effective configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Init { output, force } => init_config(&output, force).await,
        Commands::Run {
            source,
            language,
            eval,
            timeout_ms,
            json,
        } => {
            let config = load_config(cli.config.as_deref(), cli.no_warm)?;
            run_once(config, language, source.as_deref(), eval, timeout_ms, json).await
        }
        Commands::Repl { language } => {
            let config = load_config(cli.config.as_deref(), cli.no_warm)?;
            run_repl(config, language).await
        }
        Commands::Probe => probe(load_config(cli.config.as_deref(), cli.no_warm)?).await,
        Commands::Languages => {
            list_languages(&load_config(cli.config.as_deref(), cli.no_warm)?);
            Ok(())
        }
        Commands::ShowConfig => {
            show_config(&load_config(cli.config.as_deref(), cli.no_warm)?);
            Ok(())
        }
    }
}

/// Embedded defaults, overlaid by the config file and `REPLBOX_*` variables
fn load_config(path: Option<&Path>, no_warm: bool) -> Result<Config> {
    if let Some(path) = path {
        info!(?path, "loading configuration");
    } else {
        debug!("using default configuration");
    }

    let mut config = Config::load(path).context("failed to load configuration")?;
    if no_warm {
        config.warm_pool = false;
    }
    Ok(config)
}

async fn init_config(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            output.display()
        );
    }

    tokio::fs::write(output, EXAMPLE_CONFIG)
        .await
        .context("failed to write configuration file")?;

    println!("Wrote {}", output.display());
    Ok(())
}

async fn run_once(
    config: Config,
    language: LanguageId,
    source: Option<&Path>,
    eval: Option<String>,
    timeout_ms: Option<u64>,
    json: bool,
) -> Result<()> {
    let code = match (eval, source) {
        (Some(code), _) => code,
        (None, Some(path)) => tokio::fs::read_to_string(path)
            .await
            .context("failed to read source file")?,
        (None, None) => {
            let mut code = String::new();
            tokio::io::stdin()
                .read_to_string(&mut code)
                .await
                .context("failed to read stdin")?;
            code
        }
    };

    let executor = Executor::new(config);
    let options = ExecuteOptions { timeout_ms };
    let result = executor.execute(language, &code, options).await;
    executor.shutdown().await;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&result).context("failed to serialize result")?
        );
    } else {
        print_result(&result);
    }

    if result.success {
        Ok(())
    } else {
        std::process::exit(1);
    }
}

async fn run_repl(config: Config, language: LanguageId) -> Result<()> {
    let executor = Executor::start(config).await;
    info!(%language, "reading snippets from stdin, one per line");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let result = executor.execute(language, &line, ExecuteOptions::default()).await;
                print_result(&result);
            }
            _ = shutdown_signal() => {
                info!("received shutdown signal");
                break;
            }
        }
    }

    executor.shutdown().await;
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

async fn probe(config: Config) -> Result<()> {
    let executor = Executor::new(config);
    let runtime = executor.runtime();

    let available = runtime.is_available().await;
    println!(
        "Runtime: {} ({})",
        runtime.binary().display(),
        if available { "available" } else { "unavailable" }
    );

    println!("\nLanguages:");
    for language in executor.config().language_ids() {
        let lang = executor.config().language(language)?;
        let sandboxed = if available {
            if runtime.ensure_image(language, lang).await {
                "image ready"
            } else {
                "image unavailable"
            }
        } else {
            "no sandbox"
        };
        let direct = if lang.supports_direct() {
            "direct fallback"
        } else {
            "no direct fallback"
        };
        println!("  {:<6} {:<18} {sandboxed}, {direct}", language.as_str(), lang.image);
    }

    Ok(())
}

fn print_result(result: &ExecutionResult) {
    if result.success {
        if !result.output.is_empty() {
            println!("{}", result.output);
        }
    } else if result.is_timed_out() {
        eprintln!("timed out: {}", result.output);
    } else {
        eprintln!("{}", result.output);
    }

    debug!(
        success = result.success,
        timed_out = result.is_timed_out(),
        warm = ?result.used_warm_session,
        "execution result"
    );
}

fn list_languages(config: &Config) {
    println!("Available languages:\n");

    for id in config.language_ids() {
        let Ok(lang) = config.language(id) else {
            continue;
        };
        let restricted = if lang.library.is_some() {
            " (restricted)"
        } else {
            ""
        };
        println!("  {:<6} {}{restricted}", id.as_str(), lang.name);
    }
}

fn show_config(config: &Config) {
    println!("Runtime: {}", config.runtime_binary().display());
    if !config.runtime_args.is_empty() {
        println!("Runtime args: {}", config.runtime_args.join(" "));
    }
    println!("Sandbox user: {}", config.sandbox_user);
    println!("Scratch path: {}", config.scratch_path);
    println!("Timeout: {}ms", config.timeout_ms);
    println!("Warm pool: {}", config.warm_pool);
    println!("Max requests per session: {}", config.max_requests_per_session);
    println!("Max queued requests: {}", config.max_queued_requests);
    if let Some(idle) = config.idle_eviction() {
        println!("Idle eviction: {idle:?}");
    }

    let limits = &config.default_limits;
    println!("\nDefault limits:");
    if let Some(mb) = limits.memory_mb {
        println!("  Memory: {mb} MB");
    }
    if let Some(cpus) = limits.cpus {
        println!("  CPUs: {cpus}");
    }
    if let Some(count) = limits.max_processes {
        println!("  Max processes: {count}");
    }
    if let Some(mb) = limits.scratch_mb {
        println!("  Scratch: {mb} MB");
    }

    println!("\nLanguages:");
    for id in config.language_ids() {
        let Ok(lang) = config.language(id) else {
            continue;
        };
        println!("  [{id}] {}", lang.name);
        println!("    Image: {}", lang.image);
        println!("    Entrypoint: {}", lang.entrypoint.join(" "));
        if lang.supports_direct() {
            println!("    Direct: {}", lang.direct_command.join(" "));
        }
        if let Some(library) = &lang.library {
            println!("    Library: {library}");
        }
    }
}

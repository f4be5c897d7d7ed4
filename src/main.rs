//! testshard - sharded test orchestration
//!
//! Discovers a test suite, splits it into balanced groups for distributed
//! execution, and runs one group under bounded concurrency with retries,
//! filesystem recovery between attempts, and serialized output.
//!
//! ## Usage
//!
//! ```bash
//! # Run the second of four groups with 8 concurrent tests
//! testshard run --group-pos 2 --group-total 4 -j 8
//!
//! # Balance groups by recorded durations and publish new timings
//! testshard run --group-total 4 --timings write
//!
//! # Retry failures twice, keep going past tests that never pass
//! testshard run --retries 2 --continue-on-error
//!
//! # Show which tests a group would run
//! testshard list --group-pos 1 --group-total 4 --timings fetch
//! ```

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info, warn};

mod cli;
mod config;
mod context;
mod discovery;
mod executor;
mod models;
mod output;
mod partition;
mod provision;
mod timings;
mod utils;

use cli::{Args, ConfigAction, RunArgs, SelectArgs};
use config::{AppConfig, ConfigFile, EnvConfig};
use context::RunContext;
use discovery::{Discovery, SkipRetryList, TestFilter, TestSource};
use executor::RetryOptions;
use models::{RunSummary, TestId, TestSpec};
use output::{OutputFormat, ResultFormatter};
use partition::Partitioner;
use timings::{fetch_ledger, TimingBackend, TimingLedger};
use utils::{init_logger, LogLevel};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let env = EnvConfig::load();

    let verbose = args.verbose || env.verbose.unwrap_or(false);
    init_logger(LogLevel::from_verbose(verbose));

    match dispatch(args, env, verbose).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(args: Args, env: EnvConfig, verbose: bool) -> Result<ExitCode> {
    match args.command {
        cli::Command::Run(run_args) => {
            let config = load_config(args.config.as_deref(), &env)?;
            run_group(run_args, config, &env, verbose).await
        }
        cli::Command::List(select) => {
            let config = load_config(args.config.as_deref(), &env)?;
            list_group(select, &config).await
        }
        cli::Command::Config(config_args) => {
            manage_config(config_args.action, args.config.as_deref(), &env)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// File, then environment; CLI flags are applied by each command
fn load_config(cli_path: Option<&Path>, env: &EnvConfig) -> Result<AppConfig> {
    let path = cli_path
        .map(Path::to_path_buf)
        .or_else(|| env.config_file.as_ref().map(PathBuf::from));

    let file = match path {
        Some(path) => ConfigFile::load(&path)?,
        None => ConfigFile::load_default()?,
    };

    let mut config = file.app;
    env.apply(&mut config);
    Ok(config)
}

/// The group's tests and the ledger used to pick them
struct Selection {
    tests: Vec<TestId>,
    ledger: Option<TimingLedger>,
    store: Option<TimingBackend>,
    isolated: bool,
}

async fn select_group(select: &SelectArgs, config: &AppConfig) -> Result<Selection> {
    let discovery = Discovery::new(&select.root, config);
    let source = TestSource::select(select.tests.clone(), select.manifest.clone());
    let filter = TestFilter::select(select.category.clone(), select.pattern.clone());
    let ids = discovery.discover(&source, &filter)?;

    let store = if select.timings.fetches() {
        match TimingBackend::from_config(&config.timings, &select.root) {
            Ok(store) => Some(store),
            Err(e) => {
                warn!("Timing store unavailable: {}", e);
                None
            }
        }
    } else {
        None
    };

    let ledger = match &store {
        Some(store) => fetch_ledger(store).await,
        None => None,
    };

    let tests = Partitioner::new(select.group_total)
        .with_max_groups(config.max_groups)
        .select(&ids, ledger.as_ref(), select.group_pos);

    if tests.is_empty() {
        anyhow::bail!(
            "Group {}/{} has no tests ({} selected, max {} groups)",
            select.group_pos,
            select.group_total,
            ids.len(),
            config.max_groups
        );
    }

    info!(
        "Group {}/{}: {} of {} tests",
        select.group_pos,
        select.group_total,
        tests.len(),
        ids.len()
    );

    let isolated = discovery.needs_isolation(&tests)?;

    Ok(Selection {
        tests,
        ledger,
        store,
        isolated,
    })
}

async fn run_group(
    args: RunArgs,
    mut config: AppConfig,
    env: &EnvConfig,
    verbose: bool,
) -> Result<ExitCode> {
    if let Some(concurrency) = args.concurrency.filter(|c| *c > 0) {
        config.concurrency = concurrency;
    }
    if let Some(retries) = args.retries {
        config.retries = retries;
    }
    let options = RetryOptions {
        continue_on_error: args.continue_on_error || env.continue_on_error.unwrap_or(false),
        show_output: args.show_output,
        verbose,
    };

    let select = &args.select;
    let selection = select_group(select, &config).await?;

    let skip_retry = load_skip_retry(&args, &config)?;
    let specs: Vec<TestSpec> = selection
        .tests
        .iter()
        .map(|id| {
            let estimate = selection.ledger.as_ref().and_then(|l| l.get(id));
            TestSpec::new(id.clone(), select.group_pos)
                .with_estimate(estimate)
                .with_retry_budget(config.retries)
                .with_skip_retry(skip_retry.matches(id))
        })
        .collect();

    let mut ctx = RunContext::new(&select.root, config);
    if selection.isolated {
        if let Err(e) = ctx.provision().await {
            ctx.teardown().await;
            return Err(e).context("Failed to provision the isolated installation");
        }
    }

    {
        let abort = ctx.abort().clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted; aborting run");
                abort.trigger();
            }
        });
    }

    info!(
        "Running {} tests (concurrency {}, retries {})",
        specs.len(),
        ctx.config().concurrency,
        ctx.config().retries
    );

    let started_at = Utc::now();
    let outcome = ctx.scheduler(options).run(specs).await;
    let aborted = outcome.abort.is_some() || ctx.abort().is_aborted();
    if let Some(abort) = &outcome.abort {
        error!("{}", abort);
    }

    let summary = RunSummary::new(
        select.group_pos,
        select.group_total,
        started_at,
        outcome.reports,
        aborted,
    );

    let result = report_summary(&summary, &args);

    if select.timings.writes() {
        if let Some(store) = &selection.store {
            // Failures are logged by publish and never fail the run.
            let _ = ctx
                .recorder()
                .publish(selection.ledger.as_ref(), &select.root, store)
                .await;
        }
    }

    ctx.teardown().await;
    result?;

    Ok(ExitCode::from(summary.exit_code()))
}

fn load_skip_retry(args: &RunArgs, config: &AppConfig) -> Result<SkipRetryList> {
    let path = match (&args.skip_retry_file, &config.skip_retry_file) {
        (Some(path), _) => path.clone(),
        (None, Some(path)) => args.select.root.join(path),
        (None, None) => return Ok(SkipRetryList::default()),
    };

    let list = SkipRetryList::load(&path)?;
    info!("{} entries never retried ({})", list.len(), path.display());
    Ok(list)
}

fn report_summary(summary: &RunSummary, args: &RunArgs) -> Result<()> {
    let mut formatter = ResultFormatter::new(args.format);
    if args.format != OutputFormat::Table || !std::io::stdout().is_terminal() {
        formatter = formatter.no_color();
    }
    println!("{}", formatter.format_summary(summary));

    if let Some(path) = &args.output {
        let json = serde_json::to_string_pretty(summary)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write summary: {}", path.display()))?;
        info!("Summary written to {}", path.display());
    }

    Ok(())
}

async fn list_group(select: SelectArgs, config: &AppConfig) -> Result<ExitCode> {
    let selection = select_group(&select, config).await?;

    println!(
        "Group {}/{} ({} tests):",
        select.group_pos,
        select.group_total,
        selection.tests.len()
    );
    for id in &selection.tests {
        match selection.ledger.as_ref().and_then(|l| l.get(id)) {
            Some(secs) => println!("  {id} ({secs:.1}s)"),
            None => println!("  {id}"),
        }
    }

    if selection.isolated {
        println!("\nRequires a provisioned installation.");
    }

    Ok(ExitCode::SUCCESS)
}

fn manage_config(action: ConfigAction, cli_path: Option<&Path>, env: &EnvConfig) -> Result<()> {
    match action {
        ConfigAction::Init { output, force } => {
            if output.exists() && !force {
                anyhow::bail!(
                    "Configuration file already exists: {}. Use --force to overwrite.",
                    output.display()
                );
            }

            ConfigFile::example().save(&output)?;
            println!("✓ Configuration file created: {}", output.display());
            println!("\nEdit the file to customize your settings.");
        }

        ConfigAction::Show { env: show_env, format } => {
            if show_env {
                env.print_summary();
                println!();
                config::print_env_help();
            } else {
                let effective = ConfigFile {
                    app: load_config(cli_path, env)?,
                    ..Default::default()
                };
                let output = if format == "json" {
                    serde_json::to_string_pretty(&effective)?
                } else {
                    serde_yaml::to_string(&effective)?
                };
                println!("{output}");
            }
        }
    }

    Ok(())
}

//! seqload CLI: replay HTTP call sequences per CSV row, or bulk-create records.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use seqload::config::{Config, RunConfig};
use seqload::engine::Engine;
use seqload::model::WorkItem;
use seqload::queue::Delivery;
use seqload::report;
use seqload::scenario::{HttpTarget, Scenario};
use seqload::source;
use seqload::telemetry::{TelemetryConfig, TelemetryGuard, init_telemetry};
use tracing::info;

#[derive(Parser)]
#[command(name = "seqload", about = "CSV-driven HTTP sequence replay")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay a scenario once per CSV row
    Run {
        /// CSV file holding the work keys (a sample is created if missing)
        #[arg(long, default_value = "test_data.csv")]
        csv: PathBuf,
        /// Column holding the keys
        #[arg(long, default_value = "user_id")]
        column: String,
        /// Built-in scenario name or path to a scenario TOML file
        #[arg(long, default_value = "user-transactions")]
        scenario: String,
        #[command(flatten)]
        load: LoadArgs,
        /// Treat the source as at-least-once: keep duplicate keys and dedup at claim time
        #[arg(long)]
        at_least_once: bool,
        /// Minimum think time between items, seconds
        #[arg(long, default_value = "0", value_parser = parse_secs)]
        wait_min: Duration,
        /// Maximum think time between items, seconds
        #[arg(long, default_value = "0", value_parser = parse_secs)]
        wait_max: Duration,
        /// Write the full run report as JSON
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Bulk-create generated records and save the returned IDs
    Generate {
        /// Number of records to create
        #[arg(long, default_value_t = 100_000)]
        total: usize,
        /// Built-in scenario name or path to a scenario TOML file
        #[arg(long, default_value = "bulk-create")]
        scenario: String,
        #[command(flatten)]
        load: LoadArgs,
        /// Where to save captured IDs
        #[arg(long, default_value = "vehicle_ids.csv")]
        out: PathBuf,
        #[arg(long, value_enum, default_value_t = OutputFormat::Csv)]
        format: OutputFormat,
        /// Also write each captured ID with its generated fields
        #[arg(long)]
        details: Option<PathBuf>,
        /// Log progress every N finished records
        #[arg(long, default_value_t = 5000)]
        progress_every: u64,
    },
    /// Write a sample one-column CSV
    SampleCsv {
        #[arg(long, default_value = "test_data.csv")]
        out: PathBuf,
        #[arg(long, default_value = "user_id")]
        column: String,
        #[arg(long, default_value_t = 10)]
        count: usize,
    },
}

#[derive(clap::Args)]
struct LoadArgs {
    /// Steady-state worker count
    #[arg(long, default_value_t = 10)]
    workers: usize,
    /// Workers added per second while ramping (0 = all at once)
    #[arg(long, default_value_t = 2)]
    ramp: usize,
    /// Controller tick interval, seconds
    #[arg(long, default_value = "1", value_parser = parse_secs)]
    tick: Duration,
    /// Time budget for the whole run, seconds
    #[arg(long, default_value = "3600", value_parser = parse_secs)]
    budget: Duration,
    /// Stop after claiming this many records
    #[arg(long)]
    max_records: Option<usize>,
}

impl LoadArgs {
    fn run_config(&self) -> RunConfig {
        RunConfig {
            ceiling_workers: self.workers,
            ramp_rate_per_second: self.ramp,
            tick_interval: self.tick,
            time_budget: self.budget,
            max_records: self.max_records,
            ..RunConfig::default()
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Csv,
    Json,
}

fn parse_secs(raw: &str) -> Result<Duration, String> {
    let secs: f64 = raw
        .parse()
        .map_err(|_| format!("not a number of seconds: {raw}"))?;
    Duration::try_from_secs_f64(secs).map_err(|e| format!("invalid duration {raw}: {e}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            csv,
            column,
            scenario,
            load,
            at_least_once,
            wait_min,
            wait_max,
            report,
        } => {
            let run = RunConfig {
                delivery: if at_least_once {
                    Delivery::AtLeastOnce
                } else {
                    Delivery::Drain
                },
                wait_min,
                wait_max,
                ..load.run_config()
            };
            cmd_run(&csv, &column, &scenario, run, report.as_deref()).await
        }
        Command::Generate {
            total,
            scenario,
            load,
            out,
            format,
            details,
            progress_every,
        } => {
            let run = RunConfig {
                progress_every,
                ..load.run_config()
            };
            cmd_generate(total, &scenario, run, &out, format, details.as_deref()).await
        }
        Command::SampleCsv { out, column, count } => {
            let _guard = init_logging(None, "info")?;
            source::write_sample_csv(&out, &column, count)?;
            println!("Created sample CSV file: {}", out.display());
            Ok(())
        }
    }
}

fn init_logging(endpoint: Option<String>, level: &str) -> anyhow::Result<TelemetryGuard> {
    Ok(init_telemetry(TelemetryConfig {
        endpoint,
        service_name: "seqload".to_string(),
        log_level: level.to_string(),
    })?)
}

fn load_scenario(name_or_path: &str) -> anyhow::Result<Scenario> {
    if let Some(scenario) = Scenario::builtin(name_or_path)? {
        return Ok(scenario);
    }
    let path = Path::new(name_or_path);
    if !path.exists() {
        anyhow::bail!(
            "no scenario file {name_or_path}; built-ins are: {}",
            Scenario::builtin_names().join(", ")
        );
    }
    Ok(Scenario::load(path)?)
}

/// Build the engine, wire Ctrl-C to a graceful stop, and run it.
async fn execute(
    items: Vec<WorkItem>,
    scenario: Scenario,
    target: &HttpTarget,
    run: RunConfig,
) -> anyhow::Result<(seqload::engine::RunReport, String)> {
    let sequence = scenario.into_sequence(target)?;
    let name = sequence.name().to_string();
    let engine = Engine::new(items, sequence, run)?;

    let stop = engine.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, finishing in-flight items");
            stop.stop();
        }
    });

    Ok((engine.run().await?, name))
}

async fn cmd_run(
    csv: &Path,
    column: &str,
    scenario: &str,
    run: RunConfig,
    report_path: Option<&Path>,
) -> anyhow::Result<()> {
    let config = Config::from_env()?;
    let _guard = init_logging(config.otel_endpoint.clone(), &config.log_level)?;

    if !csv.exists() {
        println!("Creating sample {} file...", csv.display());
        source::write_sample_csv(csv, column, 10)?;
    }
    let items = source::read_items(csv, column)?;
    let scenario = load_scenario(scenario)?;
    let target = HttpTarget::from_config(&config)?;

    println!("=== Starting CSV-driven load test ===");
    println!("Target:      {}", target.base_url());
    println!("Scenario:    {}", scenario.scenario.name);
    println!("CSV records: {}", items.len());

    let (report, name) = execute(items, scenario, &target, run).await?;
    print!("{}", report::summary(&report, &name));

    if let Some(path) = report_path {
        report::write_json_report(path, &report)?;
    }
    Ok(())
}

async fn cmd_generate(
    total: usize,
    scenario: &str,
    run: RunConfig,
    out: &Path,
    format: OutputFormat,
    details: Option<&Path>,
) -> anyhow::Result<()> {
    let config = Config::from_env()?;
    let _guard = init_logging(config.otel_endpoint.clone(), &config.log_level)?;

    let scenario = load_scenario(scenario)?;
    let target = HttpTarget::from_config(&config)?;
    println!(
        "Creating {total} records with {} concurrent workers...",
        run.ceiling_workers
    );

    let (report, name) = execute(source::synthetic_items(total), scenario, &target, run).await?;
    print!("{}", report::summary(&report, &name));

    match format {
        OutputFormat::Csv => report::write_captured_csv(out, &report.captured)?,
        OutputFormat::Json => report::write_captured_json(out, &report.captured)?,
    }
    println!(
        "Saved {} captured IDs to {}",
        report.captured.len(),
        out.display()
    );

    if let Some(path) = details {
        if report.captured.is_empty() {
            println!("No captured IDs, skipping {}", path.display());
        } else {
            let batch_id = format!("BATCH_{}", chrono::Utc::now().timestamp());
            let rows = report::detail_rows(&report.captured, &batch_id);
            report::write_detailed_csv(path, &rows)?;
            println!("Saved detailed records to {}", path.display());
            println!("\nSample data (first 5 rows):");
            print!("{}", report::detail_preview(&rows, 5));
        }
    }
    Ok(())
}

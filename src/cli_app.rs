//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::thread;

use chrono::{DateTime, Utc};
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde_json::{Map, Value, json};
use thiserror::Error;

use ratelimit_verdict::core::config::Config;
use ratelimit_verdict::core::errors::RlvError;
use ratelimit_verdict::core::record::{RequestRecord, earliest_timestamp, read_records};
use ratelimit_verdict::core::tier::QUOTA_WINDOW_SECS;
use ratelimit_verdict::logger::jsonl::JsonlConfig;
use ratelimit_verdict::logger::run_log::{
    RunEvent, RunLoggerConfig, RunLoggerHandle, spawn_logger,
};
use ratelimit_verdict::profile::stages::format_duration;
use ratelimit_verdict::report::{ToFields, render_probe_summary, render_spike_summary};
use ratelimit_verdict::run::probe::{self, ProbeOptions, QuotaProbe};
use ratelimit_verdict::run::spike::{self, SpikeOptions, SpikeRun};
use ratelimit_verdict::threshold::evaluator::{MetricSet, evaluate};
use ratelimit_verdict::threshold::spec::ThresholdSpec;

/// Rate-limit verdict engine: scores quota probes and spike runs from request records.
#[derive(Debug, Parser)]
#[command(
    name = "rlv",
    author,
    version,
    about = "Rate-limit load-test verdicts",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Score a sequential quota saturation probe.
    Probe(ProbeArgs),
    /// Classify a staged spike run and evaluate its thresholds.
    Spike(SpikeArgs),
    /// Evaluate threshold expressions against a metrics file.
    Evaluate(EvaluateArgs),
    /// Inspect the configured spike load profile.
    Profile(ProfileArgs),
    /// List known tiers and their quotas.
    Tiers,
    /// View and validate configuration state.
    Config(ConfigArgs),
    /// Show version and optional build metadata.
    Version(VersionArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args)]
struct ProbeArgs {
    /// JSONL file with one request record per line.
    #[arg(long, value_name = "PATH")]
    records: PathBuf,
    /// Tier under test (overrides `probe.tier`).
    #[arg(long, value_name = "TIER")]
    tier: Option<String>,
    /// Requests issued past the quota (overrides `probe.extra_requests`).
    #[arg(long, value_name = "N")]
    extra: Option<u64>,
    /// Also write the JSON report to this file.
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,
    /// Do not append run events to the JSONL log.
    #[arg(long)]
    no_log: bool,
}

#[derive(Debug, Clone, Args)]
struct SpikeArgs {
    /// JSONL file with one request record per line.
    #[arg(long, value_name = "PATH")]
    records: PathBuf,
    /// Run start (RFC 3339). Defaults to the earliest record timestamp.
    #[arg(long, value_name = "TIMESTAMP")]
    start: Option<DateTime<Utc>>,
    /// Also write the JSON report to this file.
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,
    /// Do not append run events to the JSONL log.
    #[arg(long)]
    no_log: bool,
}

#[derive(Debug, Clone, Args)]
struct EvaluateArgs {
    /// JSON object of metrics: `{"errors.rate": 0.02}` or `{"errors": {"rate": 0.02}}`.
    #[arg(long, value_name = "PATH")]
    metrics: PathBuf,
    /// Threshold expression, e.g. `errors.rate<0.01`. Repeatable.
    #[arg(long = "threshold", value_name = "EXPR", required = true)]
    thresholds: Vec<String>,
}

#[derive(Debug, Clone, Args)]
struct ProfileArgs {
    #[command(subcommand)]
    command: Option<ProfileCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum ProfileCommand {
    /// Print stages with their phases.
    Show,
    /// Validate the profile and warn about no-op stages.
    Validate,
}

#[derive(Debug, Clone, Args)]
struct ConfigArgs {
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print the config file path.
    Path,
    /// Print the effective configuration.
    Show,
    /// Validate the configuration.
    Validate,
}

#[derive(Debug, Clone, Args)]
struct VersionArgs {
    /// Include build metadata.
    #[arg(long)]
    verbose: bool,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completions for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input or configuration.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// Internal bug or invariant violation.
    #[error("{0}")]
    Internal(String),
    /// The run was scored and did not pass.
    #[error("{0}")]
    Verdict(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Internal(_) | Self::Json(_) => 3,
            Self::Verdict(_) => 4,
        }
    }
}

impl From<RlvError> for CliError {
    fn from(error: RlvError) -> Self {
        match error {
            RlvError::Io { .. } | RlvError::Runtime { .. } => Self::Runtime(error.to_string()),
            RlvError::Serialization { .. } => Self::Internal(error.to_string()),
            _ => Self::User(error.to_string()),
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Probe(args) => run_probe(cli, args),
        Command::Spike(args) => run_spike(cli, args),
        Command::Evaluate(args) => run_evaluate(cli, args),
        Command::Profile(args) => run_profile(cli, args),
        Command::Tiers => run_tiers(cli),
        Command::Config(args) => run_config(cli, args),
        Command::Version(args) => emit_version(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Run commands
// ---------------------------------------------------------------------------

/// Logger thread for one run; `None` when logging is disabled.
struct RunLog {
    handle: RunLoggerHandle,
    join: thread::JoinHandle<()>,
}

impl RunLog {
    fn start(config: &Config, disabled: bool) -> Result<Option<Self>, CliError> {
        if disabled {
            return Ok(None);
        }
        let (handle, join) = spawn_logger(RunLoggerConfig::new(JsonlConfig::at(
            &config.paths.jsonl_log,
        )))?;
        Ok(Some(Self { handle, join }))
    }

    fn finish(self) {
        self.handle.shutdown();
        if self.join.join().is_err() {
            eprintln!("[RLV-LOG] logger thread panicked; run log may be incomplete");
        }
    }
}

fn run_probe(cli: &Cli, args: &ProbeArgs) -> Result<(), CliError> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(tier) = &args.tier {
        config.probe.tier.clone_from(tier);
    }
    if let Some(extra) = args.extra {
        config.probe.extra_requests = extra;
    }
    let tier = config.probe_tier()?;
    let options = ProbeOptions::from_config(&config)?;
    let records = read_records(&args.records)?;

    let log = RunLog::start(&config, args.no_log)?;
    let mut probe = QuotaProbe::new(tier, options)?;
    if let Some(log) = &log {
        log.handle.send(RunEvent::RunStarted {
            run: probe::RUN_NAME,
            tier: Some(probe.tier().id.to_string()),
            planned_requests: Some(probe.planned_requests()),
            config_hash: config.stable_hash()?,
        });
        probe = probe.with_logger(log.handle.clone());
    }
    for record in &records {
        probe.observe(record);
    }
    let result = probe.finish();
    if let Some(log) = log {
        log.finish();
    }
    let report = result?;

    let fields = report.to_fields();
    write_report_file(args.output.as_deref(), &fields, &report.metrics)?;
    match output_mode(cli) {
        OutputMode::Human => {
            print!(
                "{}",
                render_probe_summary(&report, config.probe.pass_accuracy_pct)
            );
            println!("Verdict: {}", verdict_label(report.passed));
        }
        OutputMode::Json => {
            write_json_line(&json!({
                "command": "probe",
                "report": fields,
                "metrics": report.metrics,
            }))?;
        }
    }

    if report.passed {
        Ok(())
    } else {
        Err(CliError::Verdict(format!(
            "probe failed: accuracy {:.2}% (needs > {}%), {} threshold(s) failed",
            report.accuracy.overall_accuracy,
            config.probe.pass_accuracy_pct,
            report.thresholds.failures().count()
        )))
    }
}

fn run_spike(cli: &Cli, args: &SpikeArgs) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    let profile = config.load_profile()?;
    let options = SpikeOptions::from_config(&config)?;
    let trend_stats = config.trend_stats()?;
    let records = read_records(&args.records)?;
    let start = args
        .start
        .or_else(|| earliest_timestamp(&records))
        .ok_or_else(|| {
            CliError::User(format!(
                "no request records in {}",
                args.records.display()
            ))
        })?;

    let log = RunLog::start(&config, args.no_log)?;
    let mut run = SpikeRun::new(profile, start, options);
    if let Some(log) = &log {
        log.handle.send(RunEvent::RunStarted {
            run: spike::RUN_NAME,
            tier: None,
            planned_requests: None,
            config_hash: config.stable_hash()?,
        });
        run = run.with_logger(log.handle.clone());
    }
    fold_concurrently(&run, &records);
    let result = run.finish();
    if let Some(log) = log {
        log.finish();
    }
    let report = result?;

    let fields = report.to_fields();
    write_report_file(args.output.as_deref(), &fields, &report.metrics)?;
    match output_mode(cli) {
        OutputMode::Human => {
            print!("{}", render_spike_summary(&report, &trend_stats));
            for stage in &report.no_op_stages {
                println!(
                    "{} stage {stage} repeats the previous target",
                    "warning:".yellow()
                );
            }
            println!("Verdict: {}", verdict_label(report.passed));
        }
        OutputMode::Json => {
            write_json_line(&json!({
                "command": "spike",
                "report": fields,
                "metrics": report.metrics,
            }))?;
        }
    }

    if report.passed {
        Ok(())
    } else {
        let failed: Vec<String> = report
            .thresholds
            .failures()
            .map(|e| e.spec.to_string())
            .collect();
        Err(CliError::Verdict(format!(
            "spike failed thresholds: {}",
            failed.join(", ")
        )))
    }
}

/// Fold records from one worker per available core.
fn fold_concurrently(run: &SpikeRun, records: &[RequestRecord]) {
    let workers = thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
    let chunk = records.len().div_ceil(workers).max(1);
    thread::scope(|scope| {
        for slice in records.chunks(chunk) {
            scope.spawn(move || {
                for record in slice {
                    run.observe(record);
                }
            });
        }
    });
}

fn run_evaluate(cli: &Cli, args: &EvaluateArgs) -> Result<(), CliError> {
    let raw = std::fs::read_to_string(&args.metrics)
        .map_err(|source| RlvError::io(&args.metrics, source))?;
    let value: Value = serde_json::from_str(&raw).map_err(|e| {
        CliError::User(format!("{}: not valid JSON: {e}", args.metrics.display()))
    })?;
    let metrics = flatten_metrics(&value)?;
    let specs = ThresholdSpec::parse_all(&args.thresholds)?;
    let outcome = evaluate(&metrics, &specs)?;

    match output_mode(cli) {
        OutputMode::Human => {
            for evaluation in &outcome.evaluations {
                let mark = if evaluation.ok {
                    "✓".green()
                } else {
                    "✗".red()
                };
                println!(
                    "{mark} {} (observed: {})",
                    evaluation.spec, evaluation.observed
                );
            }
            println!("Verdict: {}", verdict_label(outcome.overall_pass));
        }
        OutputMode::Json => {
            let evaluations: Vec<Value> = outcome
                .evaluations
                .iter()
                .map(|e| Value::Object(e.to_fields().into_iter().collect()))
                .collect();
            write_json_line(&json!({
                "command": "evaluate",
                "evaluations": evaluations,
                "passed": outcome.overall_pass,
            }))?;
        }
    }

    if outcome.overall_pass {
        Ok(())
    } else {
        Err(CliError::Verdict(format!(
            "{} of {} threshold(s) failed",
            outcome.failures().count(),
            outcome.evaluations.len()
        )))
    }
}

/// Accept flat `{"errors.rate": 0.02}` or one level of nesting
/// `{"errors": {"rate": 0.02}}`.
fn flatten_metrics(value: &Value) -> Result<MetricSet, CliError> {
    let object = value
        .as_object()
        .ok_or_else(|| CliError::User("metrics file must hold a JSON object".to_string()))?;
    let mut metrics = MetricSet::new();
    for (name, entry) in object {
        match entry {
            Value::Object(aggregates) => {
                for (aggregate, inner) in aggregates {
                    metrics.insert(format!("{name}.{aggregate}"), metric_number(name, inner)?);
                }
            }
            other => {
                metrics.insert(name.clone(), metric_number(name, other)?);
            }
        }
    }
    Ok(metrics)
}

fn metric_number(name: &str, value: &Value) -> Result<f64, CliError> {
    value
        .as_f64()
        .ok_or_else(|| CliError::User(format!("metric {name:?} is not a number: {value}")))
}

fn write_report_file(
    path: Option<&Path>,
    fields: &std::collections::BTreeMap<String, Value>,
    metrics: &MetricSet,
) -> Result<(), CliError> {
    let Some(path) = path else {
        return Ok(());
    };
    let mut body: Map<String, Value> = fields.clone().into_iter().collect();
    body.insert("metrics".to_string(), serde_json::to_value(metrics)?);
    let text = serde_json::to_string_pretty(&Value::Object(body))?;
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|source| RlvError::io(parent, source))?;
    }
    std::fs::write(path, text + "\n").map_err(|source| RlvError::io(path, source))?;
    Ok(())
}

fn verdict_label(passed: bool) -> colored::ColoredString {
    if passed {
        "PASS".green().bold()
    } else {
        "FAIL".red().bold()
    }
}

// ---------------------------------------------------------------------------
// Inspection commands
// ---------------------------------------------------------------------------

fn run_profile(cli: &Cli, args: &ProfileArgs) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    let profile = config.load_profile()?;
    let no_op: Vec<usize> = profile.no_op_stages().iter().map(|i| i + 1).collect();
    let window = profile
        .spike_window()
        .map(|(start, end)| (start.as_secs_f64(), end.as_secs_f64()));

    match (&args.command, output_mode(cli)) {
        (None | Some(ProfileCommand::Show), OutputMode::Human) => {
            println!("{:<6} {:<10} {:<8} PHASE", "STAGE", "DURATION", "TARGET");
            for (i, stage) in profile.stages().iter().enumerate() {
                let phase = profile
                    .phase_of(i)
                    .map_or_else(String::new, |p| p.to_string());
                println!(
                    "{:<6} {:<10} {:<8} {phase}",
                    i + 1,
                    format_duration(stage.duration),
                    stage.target
                );
            }
            println!(
                "Total: {}  Peak: {}",
                format_duration(profile.total_duration()),
                profile.peak_target()
            );
            match window {
                Some((start, end)) => println!("Spike window: {start:.1}s..{end:.1}s"),
                None => println!("Spike window: none"),
            }
        }
        (None | Some(ProfileCommand::Show), OutputMode::Json) => {
            let stages: Vec<Value> = profile
                .stages()
                .iter()
                .enumerate()
                .map(|(i, stage)| {
                    json!({
                        "stage": i + 1,
                        "duration_secs": stage.duration.as_secs_f64(),
                        "target": stage.target,
                        "phase": profile.phase_of(i).map(|p| p.to_string()),
                    })
                })
                .collect();
            write_json_line(&json!({
                "command": "profile show",
                "stages": stages,
                "total_secs": profile.total_duration().as_secs_f64(),
                "peak_target": profile.peak_target(),
                "spike_window_secs": window,
                "no_op_stages": no_op,
            }))?;
        }
        (Some(ProfileCommand::Validate), OutputMode::Human) => {
            println!("Profile is valid ({} stages).", profile.stages().len());
            for stage in &no_op {
                println!(
                    "{} stage {stage} repeats the previous target",
                    "warning:".yellow()
                );
            }
        }
        (Some(ProfileCommand::Validate), OutputMode::Json) => {
            write_json_line(&json!({
                "command": "profile validate",
                "valid": true,
                "stages": profile.stages().len(),
                "no_op_stages": no_op,
            }))?;
        }
    }
    Ok(())
}

fn run_tiers(cli: &Cli) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    match output_mode(cli) {
        OutputMode::Human => {
            println!("{:<12} {:>8}  WINDOW", "TIER", "QUOTA");
            for (name, quota) in config.tiers.iter() {
                println!("{name:<12} {quota:>8}  {QUOTA_WINDOW_SECS}s");
            }
        }
        OutputMode::Json => {
            let tiers: Vec<Value> = config
                .tiers
                .iter()
                .map(|(name, quota)| json!({ "tier": name, "quota": quota }))
                .collect();
            write_json_line(&json!({
                "command": "tiers",
                "window_secs": QUOTA_WINDOW_SECS,
                "tiers": tiers,
            }))?;
        }
    }
    Ok(())
}

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match &args.command {
        None | Some(ConfigCommand::Path) => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            let exists = path.exists();

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults will be used)");
                    }
                }
                OutputMode::Json => {
                    write_json_line(&json!({
                        "command": "config path",
                        "path": path.to_string_lossy(),
                        "exists": exists,
                    }))?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Show) => {
            let config = Config::load(cli.config.as_deref())?;

            match output_mode(cli) {
                OutputMode::Human => {
                    let toml_str = toml::to_string_pretty(&config)
                        .map_err(|e| CliError::Runtime(format!("serialize config: {e}")))?;
                    println!("{toml_str}");
                }
                OutputMode::Json => {
                    write_json_line(&json!({
                        "command": "config show",
                        "config": serde_json::to_value(&config)?,
                    }))?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => match Config::load(cli.config.as_deref()) {
            Ok(config) => {
                let hash = config.stable_hash()?;

                match output_mode(cli) {
                    OutputMode::Human => {
                        println!("Configuration is valid.");
                        println!("  Source: {}", config.paths.config_file.display());
                        println!("  Hash: {hash}");
                    }
                    OutputMode::Json => {
                        write_json_line(&json!({
                            "command": "config validate",
                            "valid": true,
                            "path": config.paths.config_file.to_string_lossy(),
                            "hash": hash,
                        }))?;
                    }
                }
                Ok(())
            }
            Err(e) => {
                match output_mode(cli) {
                    OutputMode::Human => {
                        eprintln!("Configuration is INVALID: {e}");
                    }
                    OutputMode::Json => {
                        write_json_line(&json!({
                            "command": "config validate",
                            "valid": false,
                            "code": e.code(),
                            "error": e.to_string(),
                        }))?;
                    }
                }
                Err(CliError::User(format!("invalid config: {e}")))
            }
        },
    }
}

fn emit_version(cli: &Cli, args: &VersionArgs) -> Result<(), CliError> {
    let version = env!("CARGO_PKG_VERSION");
    let package = env!("CARGO_PKG_NAME");
    let target = option_env!("TARGET").unwrap_or("unknown");
    let profile = option_env!("PROFILE").unwrap_or("unknown");

    match output_mode(cli) {
        OutputMode::Human => {
            println!("rlv {version}");
            if args.verbose {
                println!("package: {package}");
                println!("target: {target}");
                println!("profile: {profile}");
            }
        }
        OutputMode::Json => {
            write_json_line(&json!({
                "binary": "rlv",
                "version": version,
                "package": package,
                "build": {
                    "target": target,
                    "profile": profile,
                }
            }))?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Output helpers
// ---------------------------------------------------------------------------

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("RLV_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use flashload_core::runner::{RampMode, ScenarioKind, Stage};
use flashload_core::thresholds::ThresholdSet;

fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("duration cannot be empty (expected e.g. 10s, 250ms, 1m)".to_string());
    }

    let number_end = s
        .char_indices()
        .find(|(_, ch)| !ch.is_ascii_digit())
        .map_or(s.len(), |(idx, _)| idx);

    if number_end == 0 {
        return Err(format!(
            "invalid duration '{s}' (expected e.g. 10s, 250ms, 1m)"
        ));
    }

    let (number_str, unit_str) = s.split_at(number_end);
    let value: u64 = number_str
        .parse()
        .map_err(|_| format!("invalid duration '{s}' (expected e.g. 10s, 250ms, 1m)"))?;

    match unit_str.trim() {
        "" | "s" | "sec" | "secs" | "second" | "seconds" => Ok(Duration::from_secs(value)),
        "ms" | "msec" | "msecs" | "millisecond" | "milliseconds" => {
            Ok(Duration::from_millis(value))
        }
        "m" | "min" | "mins" | "minute" | "minutes" => {
            let secs = value
                .checked_mul(60)
                .ok_or_else(|| format!("duration '{s}' is too large"))?;
            Ok(Duration::from_secs(secs))
        }
        "h" | "hr" | "hrs" | "hour" | "hours" => {
            let secs = value
                .checked_mul(60)
                .and_then(|v| v.checked_mul(60))
                .ok_or_else(|| format!("duration '{s}' is too large"))?;
            Ok(Duration::from_secs(secs))
        }
        _ => Err(format!(
            "invalid duration '{s}' (expected e.g. 10s, 250ms, 1m)"
        )),
    }
}

/// `DURATION:TARGET`, e.g. `30s:1000`.
fn parse_stage(input: &str) -> Result<Stage, String> {
    let (duration, target) = input
        .trim()
        .rsplit_once(':')
        .ok_or_else(|| format!("invalid stage '{input}' (expected DURATION:TARGET, e.g. 30s:100)"))?;
    let duration = parse_duration(duration)?;
    let target = target
        .trim()
        .parse::<u64>()
        .map_err(|_| format!("invalid stage target '{target}' (expected a whole number)"))?;
    Ok(Stage::new(duration, target))
}

/// `METRIC:EXPR`. The metric may carry a `{tag:value}` selector, so the split happens at the
/// first `:` outside braces.
fn parse_threshold(input: &str) -> Result<ThresholdSet, String> {
    let s = input.trim();
    let mut depth = 0usize;
    let split = s.char_indices().find_map(|(idx, ch)| {
        match ch {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            ':' if depth == 0 => return Some(idx),
            _ => {}
        }
        None
    });

    let Some(idx) = split else {
        return Err(format!(
            "invalid threshold '{s}' (expected METRIC:EXPR, e.g. errors:rate<0.1)"
        ));
    };
    let (metric, expr) = (s[..idx].trim(), s[idx + 1..].trim());
    if metric.is_empty() || expr.is_empty() {
        return Err(format!(
            "invalid threshold '{s}' (expected METRIC:EXPR, e.g. errors:rate<0.1)"
        ));
    }

    let set = ThresholdSet::new(metric, [expr]);
    set.parse().map_err(|e| e.to_string())?;
    Ok(set)
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum OutputFormat {
    /// Progress bar on stderr and a text summary on stdout.
    HumanReadable,
    /// Emit JSON progress lines and a final summary line (NDJSON) to stdout.
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "flashload",
    author,
    version,
    about = "Flash-sale load generator",
    long_about = "flashload drives a population of simulated users against a shop backend.\n\nUsers ramp up and down along a list of stages. In the purchase-flow scenario every user orders, pays and confirms; the first out-of-stock answer stops the whole run.",
    after_help = "Examples:\n  flashload run\n  flashload run sale.yaml --base-url http://localhost:8080\n  flashload run --stage 10s:50 --stage 20s:0 --threshold 'errors:rate<0.1'\n  flashload run sale.yaml --scenario product-view --output json"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a load test
    #[command(
        long_about = "Run a load test against the target service.\n\nValues come from the built-in defaults, then the run file, then CLI flags."
    )]
    Run(RunArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Path to a YAML run file
    #[arg(value_name = "RUN_FILE")]
    pub config: Option<PathBuf>,

    /// Target service base URL
    #[arg(long, env = "BASE_URL")]
    pub base_url: Option<String>,

    /// Item under test
    #[arg(long, env = "ITEM_ID")]
    pub item_id: Option<u64>,

    /// Size of the simulated user-id space
    #[arg(long)]
    pub user_count: Option<u64>,

    /// Ramp stage (repeatable, DURATION:TARGET); replaces the configured stages
    #[arg(long = "stage", value_name = "DURATION:TARGET", value_parser = parse_stage)]
    pub stages: Vec<Stage>,

    /// Extra threshold (repeatable, METRIC:EXPR), e.g. `http_req_duration{step:create_order}:p(95)<500`
    #[arg(long = "threshold", value_name = "METRIC:EXPR", value_parser = parse_threshold)]
    pub thresholds: Vec<ThresholdSet>,

    /// How targets move within a stage (linear, step)
    #[arg(long)]
    pub ramp_mode: Option<RampMode>,

    /// Scenario to run (purchase-flow, product-view)
    #[arg(long)]
    pub scenario: Option<ScenarioKind>,

    /// Per-request timeout (e.g. 10s, 250ms)
    #[arg(long, value_parser = parse_duration)]
    pub request_timeout: Option<Duration>,

    /// Skip the item probe before the run
    #[arg(long)]
    pub no_setup_probe: bool,

    /// Log filter (overrides RUST_LOG), e.g. `debug` or `flashload_core=debug`
    #[arg(long, value_name = "FILTER")]
    pub log_level: Option<String>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::HumanReadable)]
    pub output: OutputFormat,
}

use anyhow::Context as _;
use std::sync::Arc;

use flashload_core::runner::RunConfig;
use flashload_core::{Coordinator, HttpClient};

use crate::cli::RunArgs;
use crate::config_yaml;
use crate::exit_codes::ExitCode;
use crate::output;
use crate::run_error::RunError;

pub async fn run(args: RunArgs) -> Result<ExitCode, RunError> {
    let out = output::formatter(args.output);

    let cfg = resolve_config(&args).await.map_err(RunError::InvalidInput)?;
    tracing::debug!(
        config = ?args.config,
        stages = cfg.stages.len(),
        thresholds = cfg.thresholds.len(),
        "resolved run configuration"
    );
    let coordinator = Coordinator::new(cfg, Arc::new(HttpClient::default()))
        .context("invalid run configuration")
        .map_err(RunError::InvalidInput)?;

    out.print_header(coordinator.config());

    let report = coordinator
        .run(out.progress())
        .await
        .context("run failed")
        .map_err(RunError::RuntimeError)?;

    out.print_summary(&report).map_err(RunError::RuntimeError)?;

    Ok(ExitCode::from_thresholds(report.passed))
}

/// Defaults, then the run file, then CLI flags. A run file without `thresholds` gets the
/// selected scenario's defaults; `--threshold` flags are appended either way.
async fn resolve_config(args: &RunArgs) -> anyhow::Result<RunConfig> {
    let mut cfg = RunConfig::default();
    let mut declared_thresholds = false;

    if let Some(path) = &args.config {
        let file = config_yaml::load_run_file(path).await?;
        declared_thresholds = file.thresholds.is_some();
        file.apply(&mut cfg)
            .with_context(|| format!("invalid run file: {}", path.display()))?;
    }

    apply_args(args, &mut cfg);
    if !declared_thresholds {
        cfg.thresholds = cfg.scenario.default_thresholds();
    }
    cfg.thresholds.extend(args.thresholds.iter().cloned());
    Ok(cfg)
}

fn apply_args(args: &RunArgs, cfg: &mut RunConfig) {
    if let Some(v) = &args.base_url {
        cfg.target.base_url = v.clone();
    }
    if let Some(v) = args.item_id {
        cfg.target.item_id = v;
    }
    if let Some(v) = args.user_count {
        cfg.target.user_count = v;
    }
    if let Some(v) = args.request_timeout {
        cfg.target.request_timeout = v;
    }
    if !args.stages.is_empty() {
        cfg.stages = args.stages.clone();
    }
    if let Some(v) = args.ramp_mode {
        cfg.ramp_mode = v;
    }
    if let Some(v) = args.scenario {
        cfg.scenario = v;
    }
    if args.no_setup_probe {
        cfg.setup_probe = false;
    }
}

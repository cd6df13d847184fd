use std::sync::Arc;

mod format;
mod progress;
mod summary;

use flashload_core::runner::{ProgressFn, ProgressUpdate, RunConfig, RunReport};

use format::{format_duration, format_rate};
use progress::HumanProgress;
use summary::render;

use super::OutputFormatter;

pub(crate) struct HumanReadableOutput {
    progress: Arc<HumanProgress>,
}

impl HumanReadableOutput {
    pub(crate) fn new() -> Self {
        Self {
            progress: Arc::new(HumanProgress::new()),
        }
    }
}

impl OutputFormatter for HumanReadableOutput {
    fn print_header(&self, config: &RunConfig) {
        println!(
            "scenario: {} target={} item={} ramp={} duration={}",
            config.scenario,
            config.target.base_url,
            config.target.item_id,
            config.ramp_mode,
            format_duration(config.total_duration())
        );
        let stages = config
            .stages
            .iter()
            .map(|s| format!("{}->{}", format_duration(s.duration), s.target))
            .collect::<Vec<_>>()
            .join(" ");
        println!("stages: {stages}");
        println!();
    }

    fn progress(&self) -> Option<ProgressFn> {
        let progress = self.progress.clone();
        Some(Arc::new(move |u: ProgressUpdate| {
            let message = progress_message(&u);
            progress.update("run", u.total_duration, u.elapsed, message);
        }))
    }

    fn print_summary(&self, report: &RunReport) -> anyhow::Result<()> {
        self.progress.finish();
        print!("{}", render(report));

        let failed = report.thresholds.iter().filter(|t| !t.passed).count();
        if failed > 0 {
            eprintln!("thresholds failed: {failed}");
            for t in report.thresholds.iter().filter(|t| !t.passed) {
                match t.observed {
                    Some(obs) => eprintln!("  {}: {} (observed {obs})", t.metric, t.expression),
                    None => eprintln!("  {}: {} (no observed value)", t.metric, t.expression),
                }
            }
        }

        Ok(())
    }
}

fn progress_message(u: &ProgressUpdate) -> String {
    let mut msg = match &u.stage {
        Some(stage) => format!(
            "stage={}/{} units={}/{} stage_remaining={}",
            stage.stage,
            stage.stages,
            u.live_units,
            u.target_units,
            format_duration(stage.stage_remaining)
        ),
        None => format!("units={}/{}", u.live_units, u.target_units),
    };
    msg.push_str(&format!(
        " elapsed={} iters/s={} rps={} iterations={} reqs={}",
        format_duration(u.elapsed),
        format_rate(u.iterations_per_sec_now),
        format_rate(u.rps_now),
        u.iterations_total,
        u.http_reqs_total
    ));
    if u.terminated {
        msg.push_str(" [stopping]");
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use flashload_core::runner::StageProgress;
    use std::time::Duration;

    #[test]
    fn progress_message_reports_stage_and_stop() {
        let u = ProgressUpdate {
            tick: 3,
            elapsed: Duration::from_secs(3),
            total_duration: Duration::from_secs(45),
            stage: Some(StageProgress {
                stage: 1,
                stages: 3,
                stage_elapsed: Duration::from_secs(3),
                stage_remaining: Duration::from_secs(2),
                start_target: 0,
                end_target: 1000,
                current_target: 600,
            }),
            live_units: 580,
            target_units: 600,
            iterations_total: 1200,
            iterations_per_sec_now: 410.2,
            http_reqs_total: 3600,
            rps_now: 1230.7,
            terminated: true,
        };

        let msg = progress_message(&u);
        assert!(msg.starts_with("stage=1/3 units=580/600"), "{msg}");
        assert!(msg.contains("rps=1231"), "{msg}");
        assert!(msg.ends_with("[stopping]"), "{msg}");
    }
}

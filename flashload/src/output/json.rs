use serde::Serialize;
use std::io::Write as _;
use std::sync::Arc;

use flashload_core::runner::{ProgressFn, ProgressUpdate, RunConfig, RunReport};
use flashload_metrics::MetricValue;

use super::OutputFormatter;

pub(crate) struct JsonOutput;

impl OutputFormatter for JsonOutput {
    fn print_header(&self, _config: &RunConfig) {}

    fn progress(&self) -> Option<ProgressFn> {
        Some(Arc::new(move |u| {
            let line = build_progress_line(&u);
            emit_json_line(&line);
        }))
    }

    fn print_summary(&self, report: &RunReport) -> anyhow::Result<()> {
        let line = build_summary_line(report);
        emit_json_line(&line);
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonProgressLine {
    pub kind: &'static str,
    pub tick: u64,
    pub elapsed_secs: f64,
    pub total_secs: f64,
    pub stage: Option<usize>,
    pub stages: Option<usize>,
    pub live_units: u64,
    pub target_units: u64,
    pub iterations_total: u64,
    pub iterations_per_sec: f64,
    pub http_reqs_total: u64,
    pub requests_per_sec: f64,
    pub terminated: bool,
}

fn build_progress_line(u: &ProgressUpdate) -> JsonProgressLine {
    JsonProgressLine {
        kind: "progress",
        tick: u.tick,
        elapsed_secs: u.elapsed.as_secs_f64(),
        total_secs: u.total_duration.as_secs_f64(),
        stage: u.stage.as_ref().map(|s| s.stage),
        stages: u.stage.as_ref().map(|s| s.stages),
        live_units: u.live_units,
        target_units: u.target_units,
        iterations_total: u.iterations_total,
        iterations_per_sec: u.iterations_per_sec_now,
        http_reqs_total: u.http_reqs_total,
        requests_per_sec: u.rps_now,
        terminated: u.terminated,
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonSummaryLine {
    pub kind: &'static str,
    pub scenario: String,
    pub stop_reason: String,
    pub elapsed_secs: f64,
    pub peak_units: u64,
    pub units_spawned: u64,
    pub units_aborted: u64,
    pub iterations: u64,
    pub http_reqs: u64,
    pub metrics: Vec<JsonMetric>,
    pub thresholds: Vec<JsonThreshold>,
    pub passed: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonMetric {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<(String, String)>,
    pub values: JsonValues,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub(crate) enum JsonValues {
    Counter {
        count: u64,
    },
    Rate {
        total: u64,
        trues: u64,
        rate: f64,
    },
    Trend {
        count: u64,
        min: Option<f64>,
        max: Option<f64>,
        avg: Option<f64>,
        med: Option<f64>,
        #[serde(rename = "p(90)")]
        p90: Option<f64>,
        #[serde(rename = "p(95)")]
        p95: Option<f64>,
        #[serde(rename = "p(99)")]
        p99: Option<f64>,
    },
}

impl From<&MetricValue> for JsonValues {
    fn from(v: &MetricValue) -> Self {
        match v {
            MetricValue::Counter(count) => Self::Counter { count: *count },
            MetricValue::Rate { total, trues, rate } => Self::Rate {
                total: *total,
                trues: *trues,
                rate: *rate,
            },
            MetricValue::Trend(t) => Self::Trend {
                count: t.count,
                min: t.min,
                max: t.max,
                avg: t.avg,
                med: t.med,
                p90: t.p90,
                p95: t.p95,
                p99: t.p99,
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonThreshold {
    pub metric: String,
    pub expression: String,
    pub observed: Option<f64>,
    pub passed: bool,
}

fn build_summary_line(report: &RunReport) -> JsonSummaryLine {
    let folded = report.metrics.iter().map(|m| JsonMetric {
        name: m.name.clone(),
        kind: m.kind.to_string(),
        tags: Vec::new(),
        values: JsonValues::from(&m.values),
    });
    let tagged = report
        .series
        .iter()
        .filter(|s| !s.tags.is_empty())
        .map(|s| JsonMetric {
            name: s.name.clone(),
            kind: s.kind.to_string(),
            tags: s.tags.clone(),
            values: JsonValues::from(&s.values),
        });

    JsonSummaryLine {
        kind: "summary",
        scenario: report.scenario.to_string(),
        stop_reason: report.stop_reason.to_string(),
        elapsed_secs: report.elapsed.as_secs_f64(),
        peak_units: report.peak_units,
        units_spawned: report.units_spawned,
        units_aborted: report.units_aborted,
        iterations: report.iterations,
        http_reqs: report.http_reqs,
        metrics: folded.chain(tagged).collect(),
        thresholds: report
            .thresholds
            .iter()
            .map(|t| JsonThreshold {
                metric: t.metric.clone(),
                expression: t.expression.clone(),
                observed: t.observed,
                passed: t.passed,
            })
            .collect(),
        passed: report.passed,
    }
}

fn emit_json_line<T: Serialize>(line: &T) {
    let mut out = std::io::stdout().lock();
    if serde_json::to_writer(&mut out, line).is_ok() {
        let _ = writeln!(out);
    }
}

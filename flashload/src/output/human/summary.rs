use std::fmt::Write as _;

use flashload_core::runner::RunReport;
use flashload_metrics::{MetricSeriesSummary, MetricValue};

use super::format::{format_duration, format_ms, format_rate, format_tags_inline};

pub(crate) fn render(report: &RunReport) -> String {
    let mut out = String::new();

    out.push_str("summary\n");
    writeln!(out, "  scenario: {}", report.scenario).ok();
    writeln!(
        out,
        "  stop_reason: {} after {}",
        report.stop_reason,
        format_duration(report.elapsed)
    )
    .ok();
    writeln!(
        out,
        "  units: peak={} spawned={} aborted={}",
        report.peak_units, report.units_spawned, report.units_aborted
    )
    .ok();
    writeln!(
        out,
        "  iterations: {} ({}/s)",
        report.iterations,
        format_rate(report.throughput())
    )
    .ok();
    writeln!(out, "  http_reqs: {}", report.http_reqs).ok();
    if let Some(item) = &report.setup {
        writeln!(
            out,
            "  item: {} \"{}\" price={} stock_at_start={}",
            item.id, item.name, item.price, item.stock
        )
        .ok();
    }

    if !report.metrics.is_empty() {
        out.push_str("\nmetrics\n");
        for m in &report.metrics {
            writeln!(out, "  {} = {}", m.name, render_value(&m.values)).ok();
        }
    }

    render_steps(&report.series, &mut out);

    if !report.thresholds.is_empty() {
        out.push_str("\nthresholds\n");
        for t in &report.thresholds {
            let observed = t
                .observed
                .map_or_else(|| "n/a".to_string(), |v| format!("{v:.3}"));
            let verdict = if t.passed { "OK" } else { "FAIL" };
            writeln!(
                out,
                "  {}: {} observed={observed} [{verdict}]",
                t.metric, t.expression
            )
            .ok();
        }
    }

    writeln!(
        out,
        "\nresult: {}",
        if report.passed { "PASSED" } else { "FAILED" }
    )
    .ok();

    out
}

fn render_value(v: &MetricValue) -> String {
    match v {
        MetricValue::Counter(n) => n.to_string(),
        MetricValue::Rate { total, trues, rate } => {
            format!("rate={rate:.3} ({trues}/{total})")
        }
        MetricValue::Trend(t) => format!(
            "avg={} min={} med={} max={} p(90)={} p(95)={} p(99)={} (n={})",
            format_ms(t.avg),
            format_ms(t.min),
            format_ms(t.med),
            format_ms(t.max),
            format_ms(t.p90),
            format_ms(t.p95),
            format_ms(t.p99),
            t.count
        ),
    }
}

/// Per-step request latency, one line per `http_req_duration` series.
fn render_steps(series: &[MetricSeriesSummary], out: &mut String) {
    let mut rows: Vec<&MetricSeriesSummary> = series
        .iter()
        .filter(|s| s.name == "http_req_duration" && !s.tags.is_empty())
        .collect();
    if rows.is_empty() {
        return;
    }
    rows.sort_by(|a, b| a.tags.cmp(&b.tags));

    out.push_str("\nsteps\n");
    for s in rows {
        let MetricValue::Trend(t) = &s.values else {
            continue;
        };
        writeln!(
            out,
            "  {}{} = p(95)={} avg={} (n={})",
            s.name,
            format_tags_inline(&s.tags, &[]),
            format_ms(t.p95),
            format_ms(t.avg),
            t.count
        )
        .ok();
    }
}

use flashload_metrics::{MetricKind, MetricSnapshot, Registry, TagSet};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid threshold expression `{expression}` for metric `{metric}`: {reason}")]
    InvalidExpr {
        metric: String,
        expression: String,
        reason: String,
    },

    #[error("invalid metric selector `{0}` (expected `name` or `name{{key:value,...}}`)")]
    InvalidSelector(String),
}

/// All expressions declared for one metric key, e.g. `http_req_duration{step:create_order}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThresholdSet {
    pub metric: String,
    pub expressions: Vec<String>,
}

impl ThresholdSet {
    pub fn new<I, S>(metric: impl Into<String>, expressions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            metric: metric.into(),
            expressions: expressions.into_iter().map(Into::into).collect(),
        }
    }

    pub fn parse(&self) -> Result<(MetricSelector, Vec<ThresholdExpr>)> {
        let selector = parse_metric_selector(&self.metric)?;
        let exprs = self
            .expressions
            .iter()
            .map(|raw| {
                parse_threshold_expr(raw).map_err(|reason| Error::InvalidExpr {
                    metric: self.metric.clone(),
                    expression: raw.clone(),
                    reason,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok((selector, exprs))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricSelector {
    pub name: String,
    pub tags: TagSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ThresholdOp {
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = "<=")]
    Lte,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = ">=")]
    Gte,
    #[strum(serialize = "==")]
    Eq,
}

impl ThresholdOp {
    pub fn compare(self, observed: f64, bound: f64) -> bool {
        match self {
            ThresholdOp::Lt => observed < bound,
            ThresholdOp::Lte => observed <= bound,
            ThresholdOp::Gt => observed > bound,
            ThresholdOp::Gte => observed >= bound,
            ThresholdOp::Eq => observed == bound,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThresholdAgg {
    Avg,
    Min,
    Max,
    Med,
    Count,
    Rate,
    P(f64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdExpr {
    pub agg: ThresholdAgg,
    pub op: ThresholdOp,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub observed: Option<f64>,
    pub passed: bool,
}

impl ThresholdExpr {
    /// Observed aggregate and verdict. A missing snapshot or an aggregation the metric kind
    /// does not support has no observed value and fails.
    pub fn evaluate(&self, snapshot: Option<&MetricSnapshot>) -> Evaluation {
        let observed = snapshot.and_then(|s| observed_value(s, self.agg));
        Evaluation {
            observed,
            passed: observed.is_some_and(|v| self.op.compare(v, self.value)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdResult {
    pub metric: String,
    pub expression: String,
    pub observed: Option<f64>,
    pub passed: bool,
}

pub fn parse_metric_selector(raw: &str) -> Result<MetricSelector> {
    let raw_trimmed = raw.trim();
    let Some(open) = raw_trimmed.find('{') else {
        if raw_trimmed.is_empty() || raw_trimmed.contains('}') {
            return Err(Error::InvalidSelector(raw.to_string()));
        }
        return Ok(MetricSelector {
            name: raw_trimmed.to_string(),
            tags: TagSet::default(),
        });
    };

    let name = raw_trimmed[..open].trim();
    let inner = raw_trimmed[open + 1..]
        .strip_suffix('}')
        .ok_or_else(|| Error::InvalidSelector(raw.to_string()))?;
    if name.is_empty() {
        return Err(Error::InvalidSelector(raw.to_string()));
    }

    let mut pairs: Vec<(&str, &str)> = Vec::new();
    for part in inner.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (k, v) = part
            .split_once(':')
            .ok_or_else(|| Error::InvalidSelector(raw.to_string()))?;
        let (k, v) = (k.trim(), v.trim());
        if k.is_empty() || v.is_empty() {
            return Err(Error::InvalidSelector(raw.to_string()));
        }
        pairs.push((k, v));
    }

    Ok(MetricSelector {
        name: name.to_string(),
        tags: TagSet::new(&pairs),
    })
}

pub fn parse_threshold_expr(raw: &str) -> std::result::Result<ThresholdExpr, String> {
    let s: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if s.is_empty() {
        return Err("empty threshold".to_string());
    }

    let ops = [
        ("<=", ThresholdOp::Lte),
        (">=", ThresholdOp::Gte),
        ("==", ThresholdOp::Eq),
        ("<", ThresholdOp::Lt),
        (">", ThresholdOp::Gt),
    ];
    let (op_pos, op_len, op) = ops
        .iter()
        .find_map(|(tok, op)| s.find(tok).map(|pos| (pos, tok.len(), *op)))
        .ok_or_else(|| "missing comparison operator".to_string())?;

    let (left, right_with_op) = s.split_at(op_pos);
    let right = &right_with_op[op_len..];
    if left.is_empty() || right.is_empty() {
        return Err("expected `<aggregation><operator><number>`".to_string());
    }

    let agg = match left.to_ascii_lowercase().as_str() {
        "avg" => ThresholdAgg::Avg,
        "min" => ThresholdAgg::Min,
        "max" => ThresholdAgg::Max,
        "med" => ThresholdAgg::Med,
        "count" => ThresholdAgg::Count,
        "rate" => ThresholdAgg::Rate,
        other => {
            let inner = other
                .strip_prefix("p(")
                .and_then(|v| v.strip_suffix(')'))
                .ok_or_else(|| format!("unknown aggregation `{left}`"))?;
            let p: f64 = inner
                .parse()
                .map_err(|_| format!("invalid percentile `{inner}`"))?;
            if !(0.0..=100.0).contains(&p) {
                return Err(format!("percentile `{inner}` out of range 0..=100"));
            }
            ThresholdAgg::P(p)
        }
    };

    let value: f64 = right
        .parse()
        .map_err(|_| format!("invalid numeric bound `{right}`"))?;
    if !value.is_finite() {
        return Err(format!("invalid numeric bound `{right}`"));
    }

    Ok(ThresholdExpr { agg, op, value })
}

fn observed_value(snapshot: &MetricSnapshot, agg: ThresholdAgg) -> Option<f64> {
    match (snapshot, agg) {
        (MetricSnapshot::Counter(v), ThresholdAgg::Count) => Some(*v as f64),
        (MetricSnapshot::Rate(r), ThresholdAgg::Rate) => Some(r.rate()),
        (MetricSnapshot::Rate(r), ThresholdAgg::Count) => Some(r.total as f64),
        (MetricSnapshot::Trend(t), ThresholdAgg::Count) => Some(t.count() as f64),
        (MetricSnapshot::Trend(t), ThresholdAgg::Avg) => t.avg(),
        (MetricSnapshot::Trend(t), ThresholdAgg::Min) => t.min(),
        (MetricSnapshot::Trend(t), ThresholdAgg::Max) => t.max(),
        (MetricSnapshot::Trend(t), ThresholdAgg::Med) => t.percentile(50.0),
        (MetricSnapshot::Trend(t), ThresholdAgg::P(p)) => t.percentile(p),
        _ => None,
    }
}

/// Evaluates every expression against the registry. Never mutates metrics.
pub fn evaluate_thresholds(
    metrics: &Registry,
    sets: &[ThresholdSet],
) -> Result<Vec<ThresholdResult>> {
    let mut out = Vec::new();

    for set in sets {
        let (selector, exprs) = set.parse()?;
        let snapshot = metrics.lookup(&selector.name).and_then(|(id, _)| {
            metrics
                .query(id)
                .matching(selector.tags.clone())
                .snapshot()
        });

        for (raw, expr) in set.expressions.iter().zip(exprs) {
            let eval = expr.evaluate(snapshot.as_ref());
            out.push(ThresholdResult {
                metric: set.metric.clone(),
                expression: raw.clone(),
                observed: eval.observed,
                passed: eval.passed,
            });
        }
    }

    Ok(out)
}

pub fn all_passed(results: &[ThresholdResult]) -> bool {
    results.iter().all(|r| r.passed)
}

/// Kinds each aggregation applies to, for diagnostics.
pub fn applicable_kinds(agg: ThresholdAgg) -> &'static [MetricKind] {
    match agg {
        ThresholdAgg::Count => &[MetricKind::Counter, MetricKind::Rate, MetricKind::Trend],
        ThresholdAgg::Rate => &[MetricKind::Rate],
        _ => &[MetricKind::Trend],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with_samples() -> Registry {
        let reg = Registry::default();
        let dur = reg
            .register("http_req_duration", MetricKind::Trend)
            .unwrap_or_else(|e| panic!("{e}"));
        let errors = reg
            .register("errors", MetricKind::Rate)
            .unwrap_or_else(|e| panic!("{e}"));
        let exhausted = reg
            .register("stock_exhausted", MetricKind::Counter)
            .unwrap_or_else(|e| panic!("{e}"));
        reg.register("complete_purchase_time", MetricKind::Trend)
            .unwrap_or_else(|e| panic!("{e}"));

        let order = TagSet::new(&[("step", "create_order")]);
        let payment = TagSet::new(&[("step", "create_payment")]);
        if let Some(h) = reg.get_handle(dur, order) {
            for v in [100.0, 200.0, 300.0] {
                h.add_trend(v);
            }
        }
        if let Some(h) = reg.get_handle(dur, payment) {
            h.add_trend(5000.0);
        }
        if let Some(h) = reg.get_handle(errors, TagSet::default()) {
            h.add_rate(true);
            h.add_rate(false);
            h.add_rate(false);
            h.add_rate(false);
        }
        if let Some(h) = reg.get_handle(exhausted, TagSet::default()) {
            h.add_counter(2);
        }
        reg
    }

    #[test]
    fn parse_threshold_expr_accepts_k6_forms() {
        let e = parse_threshold_expr("p(95) < 5000").unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(e.agg, ThresholdAgg::P(95.0));
        assert_eq!(e.op, ThresholdOp::Lt);
        assert_eq!(e.value, 5000.0);

        let e = parse_threshold_expr("p(99.9)<=1").unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(e.agg, ThresholdAgg::P(99.9));
        assert_eq!(e.op, ThresholdOp::Lte);

        let e = parse_threshold_expr("rate>0.005").unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(e.agg, ThresholdAgg::Rate);
        assert_eq!(e.op, ThresholdOp::Gt);

        let e = parse_threshold_expr("med>=10").unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(e.agg, ThresholdAgg::Med);
        assert_eq!(e.op, ThresholdOp::Gte);

        let e = parse_threshold_expr("count==0").unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(e.agg, ThresholdAgg::Count);
        assert_eq!(e.op, ThresholdOp::Eq);
    }

    #[test]
    fn parse_threshold_expr_rejects_garbage() {
        for raw in ["", "p95<1", "p(101)<1", "avg", "avg<", "<5", "avg<abc", "foo<1"] {
            assert!(parse_threshold_expr(raw).is_err(), "expected error for `{raw}`");
        }
    }

    #[test]
    fn parse_metric_selector_with_and_without_tags() {
        let s = parse_metric_selector("errors").unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(s.name, "errors");
        assert!(s.tags.is_empty());

        let s = parse_metric_selector("http_req_duration{step:create_order, status:200}")
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(s.name, "http_req_duration");
        assert_eq!(s.tags.get("step"), Some("create_order"));
        assert_eq!(s.tags.get("status"), Some("200"));

        for raw in ["", "{step:a}", "m{step}", "m{step:a", "m}"] {
            assert!(parse_metric_selector(raw).is_err(), "expected error for `{raw}`");
        }
    }

    #[test]
    fn evaluate_folds_series_and_honors_selectors() {
        let reg = registry_with_samples();
        let results = evaluate_thresholds(
            &reg,
            &[
                ThresholdSet::new("http_req_duration", ["max<5000", "avg<2000"]),
                ThresholdSet::new("http_req_duration{step:create_order}", ["max<5000"]),
            ],
        )
        .unwrap_or_else(|e| panic!("{e}"));

        assert_eq!(results.len(), 3);
        assert!(!results[0].passed);
        assert_eq!(results[0].observed, Some(5000.0));
        assert!(results[1].passed);
        assert_eq!(results[1].observed, Some(1400.0));
        assert!(results[2].passed);
        assert_eq!(results[2].observed, Some(300.0));
        assert!(!all_passed(&results));
    }

    #[test]
    fn evaluate_rate_and_counter() {
        let reg = registry_with_samples();
        let results = evaluate_thresholds(
            &reg,
            &[
                ThresholdSet::new("errors", ["rate<0.99", "count==4"]),
                ThresholdSet::new("stock_exhausted", ["count>=1", "rate>0"]),
            ],
        )
        .unwrap_or_else(|e| panic!("{e}"));

        assert!(results[0].passed);
        assert_eq!(results[0].observed, Some(0.25));
        assert!(results[1].passed);
        assert!(results[2].passed);
        assert_eq!(results[2].observed, Some(2.0));
        // `rate` does not apply to counters.
        assert!(!results[3].passed);
        assert_eq!(results[3].observed, None);
    }

    #[test]
    fn missing_metric_and_empty_trend_fail_without_observation() {
        let reg = registry_with_samples();
        let results = evaluate_thresholds(
            &reg,
            &[
                ThresholdSet::new("does_not_exist", ["count<1"]),
                ThresholdSet::new("complete_purchase_time", ["p(95)<8000"]),
            ],
        )
        .unwrap_or_else(|e| panic!("{e}"));

        assert!(results.iter().all(|r| !r.passed && r.observed.is_none()));
    }

    #[test]
    fn empty_rate_observes_zero() {
        let reg = Registry::default();
        reg.register("successful_purchases", MetricKind::Rate)
            .unwrap_or_else(|e| panic!("{e}"));
        let results = evaluate_thresholds(
            &reg,
            &[ThresholdSet::new("successful_purchases", ["rate>0.005", "rate<1"])],
        )
        .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(results[0].observed, Some(0.0));
        assert!(!results[0].passed);
        assert!(results[1].passed);
    }

    #[test]
    fn invalid_expression_is_reported_with_metric() {
        let reg = Registry::default();
        let err = evaluate_thresholds(&reg, &[ThresholdSet::new("errors", ["rate<<1"])]);
        match err {
            Err(Error::InvalidExpr { metric, .. }) => assert_eq!(metric, "errors"),
            other => panic!("expected InvalidExpr, got {other:?}"),
        }
    }

    #[test]
    fn applicable_kinds_match_evaluation() {
        assert_eq!(applicable_kinds(ThresholdAgg::Rate), &[MetricKind::Rate]);
        assert!(applicable_kinds(ThresholdAgg::Count).contains(&MetricKind::Counter));
        assert_eq!(applicable_kinds(ThresholdAgg::P(95.0)), &[MetricKind::Trend]);
    }
}

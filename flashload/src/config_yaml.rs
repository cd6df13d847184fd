use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;
use serde::Deserialize;

use flashload_core::runner::{RampMode, RunConfig, ScenarioKind, Stage, ThinkTime};
use flashload_core::thresholds::ThresholdSet;

/// Run file, shaped like a k6 `options` object. Every field is optional; missing fields keep
/// the built-in defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct RunFileYaml {
    #[serde(default)]
    pub stages: Option<Vec<StageYaml>>,

    #[serde(default)]
    pub thresholds: Option<BTreeMap<String, ThresholdExprYaml>>,

    pub scenario: Option<String>,
    pub base_url: Option<String>,
    pub item_id: Option<u64>,
    pub user_count: Option<u64>,
    pub quantity: Option<u64>,
    pub think_time: Option<ThinkTimeYaml>,
    pub request_timeout: Option<YamlDuration>,
    pub ramp_mode: Option<String>,
    pub termination_grace: Option<YamlDuration>,
    pub graceful_stop: Option<YamlDuration>,
    pub setup_probe: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct StageYaml {
    pub target: u64,
    pub duration: YamlDuration,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct ThinkTimeYaml {
    pub min: YamlDuration,
    pub max: YamlDuration,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum ThresholdExprYaml {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct YamlDuration(Duration);

impl YamlDuration {
    fn into_inner(self) -> Duration {
        self.0
    }
}

impl<'de> Deserialize<'de> for YamlDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl serde::de::Visitor<'_> for V {
            type Value = YamlDuration;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("duration as string (e.g. 10s), integer seconds, or float seconds")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(YamlDuration(Duration::from_secs(v)))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if v < 0 {
                    return Err(E::custom("duration must not be negative"));
                }
                Ok(YamlDuration(Duration::from_secs(v as u64)))
            }

            fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if !v.is_finite() || v < 0.0 {
                    return Err(E::custom("duration must be a non-negative, finite number"));
                }
                Ok(YamlDuration(Duration::from_secs_f64(v)))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                let d = humantime::parse_duration(v.trim()).map_err(E::custom)?;
                Ok(YamlDuration(d))
            }
        }

        deserializer.deserialize_any(V)
    }
}

pub(crate) fn parse_run_file(raw: &str, origin: &Path) -> anyhow::Result<RunFileYaml> {
    serde_yaml::from_str(raw).with_context(|| format!("failed to parse YAML: {}", origin.display()))
}

pub(crate) async fn load_run_file(path: &Path) -> anyhow::Result<RunFileYaml> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read run file: {}", path.display()))?;
    parse_run_file(&raw, path)
}

impl RunFileYaml {
    /// Overlays the file onto `cfg`.
    pub(crate) fn apply(self, cfg: &mut RunConfig) -> anyhow::Result<()> {
        if let Some(stages) = self.stages {
            cfg.stages = stages
                .into_iter()
                .map(|s| Stage::new(s.duration.into_inner(), s.target))
                .collect();
        }
        if let Some(thresholds) = self.thresholds {
            cfg.thresholds = thresholds_from_map(thresholds);
        }
        if let Some(raw) = self.scenario {
            cfg.scenario = raw.parse::<ScenarioKind>().map_err(|_| {
                anyhow::anyhow!("unknown scenario `{raw}` (expected purchase-flow or product-view)")
            })?;
        }
        if let Some(raw) = self.ramp_mode {
            cfg.ramp_mode = raw.parse::<RampMode>().map_err(|_| {
                anyhow::anyhow!("unknown rampMode `{raw}` (expected linear or step)")
            })?;
        }
        if let Some(v) = self.base_url {
            cfg.target.base_url = v;
        }
        if let Some(v) = self.item_id {
            cfg.target.item_id = v;
        }
        if let Some(v) = self.user_count {
            cfg.target.user_count = v;
        }
        if let Some(v) = self.quantity {
            cfg.target.quantity = v;
        }
        if let Some(t) = self.think_time {
            cfg.think_time = ThinkTime::new(t.min.into_inner(), t.max.into_inner());
        }
        if let Some(v) = self.request_timeout {
            cfg.target.request_timeout = v.into_inner();
        }
        if let Some(v) = self.termination_grace {
            cfg.termination_grace = v.into_inner();
        }
        if let Some(v) = self.graceful_stop {
            cfg.graceful_stop = v.into_inner();
        }
        if let Some(v) = self.setup_probe {
            cfg.setup_probe = v;
        }
        Ok(())
    }
}

fn thresholds_from_map(map: BTreeMap<String, ThresholdExprYaml>) -> Vec<ThresholdSet> {
    map.into_iter()
        .map(|(metric, exprs)| match exprs {
            ThresholdExprYaml::One(e) => ThresholdSet::new(metric, [e]),
            ThresholdExprYaml::Many(v) => ThresholdSet::new(metric, v),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> RunFileYaml {
        parse_run_file(raw, Path::new("test.yaml")).unwrap_or_else(|e| panic!("{e:#}"))
    }

    #[test]
    fn full_file_overrides_defaults() {
        let doc = parse(
            r#"
stages:
  - { duration: 10s, target: 30 }
  - { duration: 30s, target: 30 }
  - { duration: 10s, target: 0 }
thresholds:
  http_req_duration: "p(95)<5000"
  errors: ["rate<0.1", "count<100"]
scenario: product-view
baseUrl: http://shop.local:9000
itemId: 3
userCount: 100
quantity: 2
thinkTime: { min: 0s, max: 250ms }
requestTimeout: 5s
rampMode: step
terminationGrace: 2
gracefulStop: 1.5
setupProbe: false
"#,
        );

        let mut cfg = RunConfig::default();
        doc.apply(&mut cfg).unwrap_or_else(|e| panic!("{e:#}"));

        assert_eq!(cfg.stages.len(), 3);
        assert_eq!(cfg.stages[0], Stage::new(Duration::from_secs(10), 30));
        assert_eq!(cfg.scenario, ScenarioKind::ProductView);
        assert_eq!(cfg.ramp_mode, RampMode::Step);
        assert_eq!(cfg.target.base_url, "http://shop.local:9000");
        assert_eq!(cfg.target.item_id, 3);
        assert_eq!(cfg.target.user_count, 100);
        assert_eq!(cfg.target.quantity, 2);
        assert_eq!(cfg.think_time.max, Duration::from_millis(250));
        assert_eq!(cfg.target.request_timeout, Duration::from_secs(5));
        assert_eq!(cfg.termination_grace, Duration::from_secs(2));
        assert_eq!(cfg.graceful_stop, Duration::from_millis(1500));
        assert!(!cfg.setup_probe);

        // BTreeMap order.
        assert_eq!(
            cfg.thresholds,
            vec![
                ThresholdSet::new("errors", ["rate<0.1", "count<100"]),
                ThresholdSet::new("http_req_duration", ["p(95)<5000"]),
            ]
        );
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn empty_file_keeps_defaults() {
        let doc = parse("{}");
        let mut cfg = RunConfig::default();
        doc.apply(&mut cfg).unwrap_or_else(|e| panic!("{e:#}"));
        assert_eq!(cfg.stages, RunConfig::default().stages);
        assert_eq!(cfg.thresholds.len(), 4);
    }

    #[test]
    fn rejects_unknown_fields_and_values() {
        assert!(parse_run_file("vus: 10", Path::new("x.yaml")).is_err());
        assert!(
            parse_run_file("stages: [{ duration: -1, target: 1 }]", Path::new("x.yaml")).is_err()
        );

        let mut cfg = RunConfig::default();
        assert!(parse("scenario: checkout").apply(&mut cfg).is_err());
        assert!(parse("rampMode: cubic").apply(&mut cfg).is_err());
    }
}

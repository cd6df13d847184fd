use std::time::Duration;

/// Trend values are milliseconds; anything from one second up renders in seconds.
pub(crate) fn format_ms(v: Option<f64>) -> String {
    match v {
        Some(ms) if ms.is_finite() && ms >= 1000.0 => format!("{:.2}s", ms / 1000.0),
        Some(ms) if ms.is_finite() => format!("{ms:.2}ms"),
        _ => "n/a".to_string(),
    }
}

pub(crate) fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 60 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else {
        format!("{:.1}s", d.as_secs_f64())
    }
}

pub(crate) fn format_tags_inline(tags: &[(String, String)], exclude: &[&str]) -> String {
    let mut filtered: Vec<(String, String)> = tags
        .iter()
        .filter(|(k, _)| !exclude.iter().any(|e| e == &k.as_str()))
        .cloned()
        .collect();

    filtered.sort_by(|(ak, av), (bk, bv)| ak.cmp(bk).then_with(|| av.cmp(bv)));

    if filtered.is_empty() {
        return String::new();
    }

    let inner = filtered
        .into_iter()
        .map(|(k, v)| format!("{k}:{v}"))
        .collect::<Vec<_>>()
        .join(",");

    format!("{{{inner}}}")
}

pub(crate) fn format_rate(v: f64) -> String {
    if v.is_finite() {
        format!("{v:.0}")
    } else {
        "0".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ms_switches_to_seconds() {
        assert_eq!(format_ms(Some(12.5)), "12.50ms");
        assert_eq!(format_ms(Some(2500.0)), "2.50s");
        assert_eq!(format_ms(None), "n/a");
    }

    #[test]
    fn tags_render_as_selector() {
        let tags = vec![
            ("status".to_string(), "200".to_string()),
            ("step".to_string(), "create_order".to_string()),
        ];
        assert_eq!(format_tags_inline(&tags, &[]), "{status:200,step:create_order}");
        assert_eq!(format_tags_inline(&tags, &["status", "step"]), "");
    }

    #[test]
    fn durations_are_short() {
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.5s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m05s");
    }
}

use std::collections::BTreeMap;
use std::time::Duration;

/// Parse a Kubernetes CPU quantity ("250m", "1", "1500000n") into nanocores.
pub fn parse_cpu_to_nanocores(q: &str) -> Option<i64> {
    let q = q.trim();
    if q.is_empty() {
        return None;
    }
    if let Some(stripped) = q.strip_suffix('n') {
        return stripped.parse::<i64>().ok();
    }
    let (number, scale) = if let Some(stripped) = q.strip_suffix('u') {
        (stripped, 1_000.0)
    } else if let Some(stripped) = q.strip_suffix('m') {
        (stripped, 1_000_000.0)
    } else {
        (q, 1_000_000_000.0)
    };
    number
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(|v| (v * scale).round() as i64)
}

pub fn parse_cpu_to_millicores(q: &str) -> Option<i64> {
    parse_cpu_to_nanocores(q).map(|n| n / 1_000_000)
}

pub fn parse_memory_to_bytes(q: &str) -> Option<i64> {
    let q = q.trim();
    if q.is_empty() {
        return None;
    }

    // Binary suffixes first so "Ki" is never read as decimal "K" + "i".
    const BINARY_UNITS: &[(&str, i64)] = &[
        ("Ki", 1024),
        ("Mi", 1024 * 1024),
        ("Gi", 1024 * 1024 * 1024),
        ("Ti", 1024_i64.pow(4)),
        ("Pi", 1024_i64.pow(5)),
        ("Ei", 1024_i64.pow(6)),
    ];
    const DECIMAL_UNITS: &[(&str, i64)] = &[
        ("K", 1000),
        ("M", 1000 * 1000),
        ("G", 1000 * 1000 * 1000),
        ("T", 1000_i64.pow(4)),
        ("P", 1000_i64.pow(5)),
        ("E", 1000_i64.pow(6)),
        ("k", 1000),
        ("m", 1),
    ];

    for (suf, mul) in BINARY_UNITS {
        if let Some(stripped) = q.strip_suffix(suf) {
            if let Ok(v) = stripped.parse::<f64>() {
                return Some((v * (*mul as f64)).round() as i64);
            }
        }
    }
    for (suf, mul) in DECIMAL_UNITS {
        if let Some(stripped) = q.strip_suffix(suf) {
            if let Ok(v) = stripped.parse::<f64>() {
                // "m" is milli-bytes, which the metrics API emits for some sizes
                if *suf == "m" {
                    return Some((v / 1000.0).round() as i64);
                }
                return Some((v * (*mul as f64)).round() as i64);
            }
        }
    }
    if let Ok(v) = q.parse::<i64>() {
        return Some(v);
    }
    // scientific notation such as "1e9"
    q.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(|v| v.round() as i64)
}

/// Parse interval strings like "90s", "5m", "1h30m" or bare seconds ("300").
pub fn parse_interval(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(secs) = s.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let mut total = 0u64;
    let mut digits = String::new();
    for ch in s.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            continue;
        }
        let value: u64 = digits.parse().ok()?;
        digits.clear();
        let unit = match ch {
            's' => 1,
            'm' => 60,
            'h' => 3600,
            'd' => 86_400,
            _ => return None,
        };
        total = total.checked_add(value.checked_mul(unit)?)?;
    }
    if !digits.is_empty() {
        return None;
    }
    Some(Duration::from_secs(total))
}

/// Split a comma-separated list, trimming entries and dropping empties.
pub fn parse_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

/// Parse `k=v,k2=v2` into a map. Entries without `=` are rejected.
pub fn parse_key_value_list(s: &str) -> Option<BTreeMap<String, String>> {
    let mut map = BTreeMap::new();
    for entry in parse_list(s) {
        let (k, v) = entry.split_once('=')?;
        let k = k.trim();
        if k.is_empty() {
            return None;
        }
        map.insert(k.to_string(), v.trim().to_string());
    }
    Some(map)
}

pub fn parse_bool(v: &str) -> bool {
    matches!(v, "1" | "true" | "TRUE" | "True")
}

/// Render a duration the way `kubectl` users expect to read an age: "26h3m0s".
pub fn format_age(secs: i64) -> String {
    let secs = secs.max(0);
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;
    if hours > 0 {
        format!("{}h{}m{}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m{}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

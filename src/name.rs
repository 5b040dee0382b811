//! Metric naming conventions.
//!
//! Names are dot-segmented. The first segment routes a value into its
//! aggregation bucket, see [`MetricKind`].

pub const SEPARATOR: char = '.';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Counter,
    Meter,
    Gauge,
    Histogram,
    Timer,
}
impl MetricKind {
    pub const ALL: [MetricKind; 5] = [
        MetricKind::Counter,
        MetricKind::Meter,
        MetricKind::Gauge,
        MetricKind::Histogram,
        MetricKind::Timer,
    ];

    /// The prefix including the trailing separator, e.g. `"counter."`.
    pub fn prefix(self) -> &'static str {
        match self {
            MetricKind::Counter => "counter.",
            MetricKind::Meter => "meter.",
            MetricKind::Gauge => "gauge.",
            MetricKind::Histogram => "histogram.",
            MetricKind::Timer => "timer.",
        }
    }

    pub fn of(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| name.starts_with(kind.prefix()))
    }
}

/// Turns `foo`, `foo.` and `foo.*` into `foo.`.
///
/// Only a `*` after a separator is a wildcard: `foo*` becomes `foo*.`. An
/// empty prefix (or a bare `*`) stays empty and matches every name.
pub fn normalize_prefix(prefix: &str) -> String {
    let prefix = match prefix.strip_suffix(".*") {
        Some(stem) => &prefix[..=stem.len()],
        None if prefix == "*" => "",
        None => prefix,
    };
    if prefix.is_empty() || prefix.ends_with(SEPARATOR) {
        return prefix.to_string();
    }
    let mut normalized = String::with_capacity(prefix.len() + 1);
    normalized.push_str(prefix);
    normalized.push(SEPARATOR);
    normalized
}

/// Ensures `name` lives under `group`, prepending `group.` when missing.
pub fn qualify(group: &str, name: &str) -> String {
    let prefix = normalize_prefix(group);
    if name.starts_with(&prefix) {
        name.to_string()
    } else {
        format!("{prefix}{name}")
    }
}

/// Prefixes `name` with `kind` unless it already starts with one of `keep`.
pub fn wrap(name: &str, kind: MetricKind, keep: &[MetricKind]) -> String {
    if keep.iter().any(|k| name.starts_with(k.prefix())) {
        return name.to_string();
    }
    format!("{}{name}", kind.prefix())
}

/// Glob match supporting `*` as "any run of characters".
pub fn simple_match(pattern: &str, name: &str) -> bool {
    let Some(first) = pattern.find('*') else {
        return pattern == name;
    };
    let (head, rest) = pattern.split_at(first);
    if !name.starts_with(head) {
        return false;
    }
    let rest = &rest[1..];
    let name = &name[head.len()..];
    if rest.is_empty() {
        return true;
    }
    (0..=name.len())
        .filter(|&i| name.is_char_boundary(i))
        .any(|i| simple_match(rest, &name[i..]))
}

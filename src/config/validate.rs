//! Configuration validation with unknown field detection.

use serde_json::{Map, Value};

/// Known top-level config field names.
const KNOWN_TOP_LEVEL: &[&str] = &["server", "session", "pricing", "logging"];

/// Known fields for each section, keyed by section name.
const KNOWN_SECTIONS: &[(&str, &[&str])] = &[
    ("server", &["host", "port", "max_frame_bytes"]),
    (
        "session",
        &["turn_timeout_secs", "idle_timeout_secs", "buffer_size"],
    ),
    ("pricing", &["policy", "prices"]),
    ("logging", &["format", "level", "file"]),
];

const KNOWN_POLICIES: &[&str] = &["deliver_regardless", "withhold_until_paid"];
const KNOWN_LOG_FORMATS: &[&str] = &["pretty", "component", "json"];

/// A validation diagnostic.
#[derive(Debug)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub path: String,
    pub message: String,
}

#[derive(Debug, PartialEq)]
pub enum DiagnosticLevel {
    Ok,
    Warn,
    Error,
}

impl Diagnostic {
    fn ok(message: &str) -> Self {
        Self {
            level: DiagnosticLevel::Ok,
            path: String::new(),
            message: message.to_string(),
        }
    }

    fn warn(path: &str, message: String) -> Self {
        Self {
            level: DiagnosticLevel::Warn,
            path: path.to_string(),
            message,
        }
    }

    fn error(path: &str, message: String) -> Self {
        Self {
            level: DiagnosticLevel::Error,
            path: path.to_string(),
            message,
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.level {
            DiagnosticLevel::Ok => "[OK]",
            DiagnosticLevel::Warn => "[WARN]",
            DiagnosticLevel::Error => "[ERROR]",
        };
        if self.path.is_empty() {
            write!(f, "{} {}", prefix, self.message)
        } else {
            write!(f, "{} {}: {}", prefix, self.path, self.message)
        }
    }
}

/// Simple Levenshtein distance for "did you mean?" suggestions.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Suggest the closest known field name (if distance <= 3).
pub fn suggest_field(unknown: &str, known: &[&str]) -> Option<String> {
    known
        .iter()
        .map(|k| (k, levenshtein(unknown, k)))
        .filter(|(_, d)| *d <= 3)
        .min_by_key(|(_, d)| *d)
        .map(|(k, _)| format!("did you mean '{}'?", k))
}

fn unknown_field(path: &str, key: &str, known: &[&str]) -> Diagnostic {
    let message = match suggest_field(key, known) {
        Some(suggestion) => format!("Unknown field '{}' ({})", key, suggestion),
        None => format!("Unknown field '{}'", key),
    };
    Diagnostic::error(path, message)
}

/// Validate a raw JSON config value against known field names and value ranges.
pub fn validate_config(raw: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    let obj = match raw.as_object() {
        Some(o) => o,
        None => {
            diagnostics.push(Diagnostic::error(
                "",
                "Config must be a JSON object".to_string(),
            ));
            return diagnostics;
        }
    };

    diagnostics.push(Diagnostic::ok("Valid JSON"));

    let mut has_unknown = false;
    for key in obj.keys() {
        if !KNOWN_TOP_LEVEL.contains(&key.as_str()) {
            has_unknown = true;
            diagnostics.push(unknown_field(key, key, KNOWN_TOP_LEVEL));
        }
    }

    for (section, known) in KNOWN_SECTIONS {
        let Some(fields) = obj.get(*section).and_then(Value::as_object) else {
            continue;
        };
        for key in fields.keys() {
            if !known.contains(&key.as_str()) {
                has_unknown = true;
                let path = format!("{}.{}", section, key);
                diagnostics.push(unknown_field(&path, key, known));
            }
        }
    }

    if !has_unknown {
        diagnostics.push(Diagnostic::ok("All fields recognized"));
    }

    check_values(obj, &mut diagnostics);
    diagnostics
}

fn check_values(obj: &Map<String, Value>, diagnostics: &mut Vec<Diagnostic>) {
    let section = |name: &str| obj.get(name).and_then(Value::as_object);

    if let Some(server) = section("server") {
        if server.get("port").and_then(Value::as_u64) == Some(0) {
            diagnostics.push(Diagnostic::warn(
                "server.port",
                "port 0 binds an ephemeral port".to_string(),
            ));
        }
        if server.get("max_frame_bytes").and_then(Value::as_u64) == Some(0) {
            diagnostics.push(Diagnostic::error(
                "server.max_frame_bytes",
                "must be greater than zero".to_string(),
            ));
        }
    }

    if let Some(session) = section("session") {
        if session.get("buffer_size").and_then(Value::as_u64) == Some(0) {
            diagnostics.push(Diagnostic::error(
                "session.buffer_size",
                "must be greater than zero".to_string(),
            ));
        }
    }

    if let Some(pricing) = section("pricing") {
        if let Some(policy) = pricing.get("policy").and_then(Value::as_str) {
            if !KNOWN_POLICIES.contains(&policy) {
                diagnostics.push(unknown_field("pricing.policy", policy, KNOWN_POLICIES));
            }
        }
        if let Some(prices) = pricing.get("prices").and_then(Value::as_object) {
            for (key, qty) in prices {
                let path = format!("pricing.prices.{}", key);
                match qty.as_i64() {
                    Some(q) if q < 0 => diagnostics.push(Diagnostic::error(
                        &path,
                        format!("quantity must be >= 0, got {}", q),
                    )),
                    Some(0) => diagnostics.push(Diagnostic::warn(
                        &path,
                        "quantity 0 is informational only".to_string(),
                    )),
                    Some(_) => {}
                    None => diagnostics.push(Diagnostic::error(
                        &path,
                        "quantity must be an integer".to_string(),
                    )),
                }
            }
        }
    }

    if let Some(logging) = section("logging") {
        if let Some(format) = logging.get("format").and_then(Value::as_str) {
            if !KNOWN_LOG_FORMATS.contains(&format) {
                diagnostics.push(unknown_field("logging.format", format, KNOWN_LOG_FORMATS));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn errors(diags: &[Diagnostic]) -> Vec<&Diagnostic> {
        diags
            .iter()
            .filter(|d| d.level == DiagnosticLevel::Error)
            .collect()
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("", ""), 0);
        assert_eq!(levenshtein("abc", "abc"), 0);
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "port"), 4);
    }

    #[test]
    fn test_suggest_field() {
        assert_eq!(
            suggest_field("sever", KNOWN_TOP_LEVEL),
            Some("did you mean 'server'?".to_string())
        );
        assert_eq!(suggest_field("completely_off", KNOWN_TOP_LEVEL), None);
    }

    #[test]
    fn test_valid_config() {
        let diags = validate_config(&json!({
            "server": {"port": 50051},
            "pricing": {"policy": "deliver_regardless", "prices": {"text": 5}}
        }));
        assert!(errors(&diags).is_empty());
        assert!(diags.iter().any(|d| d.message == "All fields recognized"));
    }

    #[test]
    fn test_not_an_object() {
        let diags = validate_config(&json!([1, 2]));
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].level, DiagnosticLevel::Error);
    }

    #[test]
    fn test_unknown_nested_field_with_suggestion() {
        let diags = validate_config(&json!({"session": {"turn_timeout_sec": 5}}));
        let errs = errors(&diags);
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].path, "session.turn_timeout_sec");
        assert!(errs[0].message.contains("turn_timeout_secs"));
    }

    #[test]
    fn test_negative_price_rejected() {
        let diags = validate_config(&json!({"pricing": {"prices": {"image": -3}}}));
        let errs = errors(&diags);
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].path, "pricing.prices.image");
    }

    #[test]
    fn test_zero_price_warns() {
        let diags = validate_config(&json!({"pricing": {"prices": {"free": 0}}}));
        assert!(errors(&diags).is_empty());
        assert!(diags
            .iter()
            .any(|d| d.level == DiagnosticLevel::Warn && d.path == "pricing.prices.free"));
    }

    #[test]
    fn test_bad_policy_suggests() {
        let diags = validate_config(&json!({"pricing": {"policy": "withhold_until_payd"}}));
        let errs = errors(&diags);
        assert_eq!(errs.len(), 1);
        assert!(errs[0].message.contains("withhold_until_paid"));
    }

    #[test]
    fn test_display() {
        let d = Diagnostic::error("server.port", "bad".into());
        assert_eq!(d.to_string(), "[ERROR] server.port: bad");
        assert_eq!(Diagnostic::ok("fine").to_string(), "[OK] fine");
    }
}

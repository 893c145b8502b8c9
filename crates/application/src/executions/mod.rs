//! Invocation path: DTOs and the pure request/response shaping helpers.

pub mod invoke;

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use opr_executor_shared::runtime::RuntimeVersion;
use serde::{Deserialize, Serialize};

pub use invoke::ExecuteRuntimeUseCase;

/// Surfaced logs are capped at 1 MiB each.
pub const MAX_LOG_BYTES: usize = 1_048_576;
const TRUNCATION_NOTICE: &str = "\nLog file has been truncated to 1MB.";

/// Default per-call timeout in seconds.
pub const DEFAULT_EXECUTION_TIMEOUT_SECS: f64 = 15.0;

/// Execution request, as posted to `/v1/runtimes/{id}/executions`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutionRequest {
    pub body: Option<String>,
    pub path: Option<String>,
    pub method: Option<String>,
    pub headers: BTreeMap<String, String>,
    /// Seconds available for the whole call, cold start included.
    pub timeout: Option<f64>,
    /// Forward in-pod logs back to the caller (v5).
    pub logging: Option<bool>,

    // Creation parameters for on-the-fly runtime creation.
    pub image: Option<String>,
    pub source: Option<String>,
    pub entrypoint: Option<String>,
    pub variables: BTreeMap<String, serde_json::Value>,
    pub cpus: Option<f64>,
    pub memory: Option<i64>,
    pub version: Option<RuntimeVersion>,
}

/// Result of one proxied execution.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub status_code: u16,
    pub headers: serde_json::Map<String, serde_json::Value>,
    pub body: String,
    pub logs: String,
    pub errors: String,
    pub duration: f64,
    pub start_time: f64,
}

/// `"foo"` and `"/foo"` both address `/foo` on the in-pod server.
pub fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

/// Collect response headers into the surfaced map: keys lowercased, internal
/// `x-open-runtimes-*` headers dropped, and repeated names promoted to an
/// ordered list (oldest first).
pub fn collect_headers<I, K, V>(pairs: I) -> serde_json::Map<String, serde_json::Value>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut map = serde_json::Map::new();

    for (name, value) in pairs {
        let name = name.as_ref().to_ascii_lowercase();
        if name.starts_with("x-open-runtimes-") {
            continue;
        }
        let value = serde_json::Value::String(value.as_ref().to_string());

        match map.get_mut(&name) {
            None => {
                map.insert(name, value);
            }
            Some(serde_json::Value::Array(list)) => list.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = serde_json::Value::Array(vec![first, value]);
            }
        }
    }

    map
}

/// Collapse list-valued headers to their last value, for callers that
/// predate multi-value support.
pub fn collapse_header_lists(
    headers: serde_json::Map<String, serde_json::Value>,
) -> serde_json::Map<String, serde_json::Value> {
    headers
        .into_iter()
        .map(|(name, value)| match value {
            serde_json::Value::Array(mut list) => {
                let last = list.pop().unwrap_or(serde_json::Value::String(String::new()));
                (name, last)
            }
            other => (name, other),
        })
        .collect()
}

/// `x-executor-response-format` values preceding this baseline get collapsed
/// headers. Plain string comparison is the contract.
pub const RESPONSE_FORMAT_MULTI_VALUE: &str = "0.11.0";

pub fn wants_collapsed_headers(response_format: Option<&str>) -> bool {
    match response_format {
        Some(format) => format < RESPONSE_FORMAT_MULTI_VALUE,
        None => false,
    }
}

/// Cap a log at 1 MiB, appending a truncation notice when cut.
pub fn truncate_log(mut log: String) -> String {
    if log.len() <= MAX_LOG_BYTES {
        return log;
    }
    let mut cut = MAX_LOG_BYTES;
    while !log.is_char_boundary(cut) {
        cut -= 1;
    }
    log.truncate(cut);
    log.push_str(TRUNCATION_NOTICE);
    log
}

/// `Authorization` value the in-pod server expects for v4/v5.
pub fn basic_auth(secret: &str) -> String {
    format!("Basic {}", BASE64.encode(format!("opr:{secret}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_normalization() {
        assert_eq!(normalize_path("foo"), "/foo");
        assert_eq!(normalize_path("/foo"), "/foo");
        assert_eq!(normalize_path(""), "/");
    }

    #[test]
    fn internal_headers_are_dropped() {
        let headers = collect_headers([
            ("Content-Type", "text/plain"),
            ("x-open-runtimes-log-id", "abc"),
            ("X-Open-Runtimes-Secret", "s"),
        ]);
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("content-type").unwrap(), "text/plain");
    }

    #[test]
    fn repeated_headers_promote_to_ordered_list() {
        let headers = collect_headers([
            ("Set-Cookie", "a=1"),
            ("Set-Cookie", "b=2"),
            ("Set-Cookie", "c=3"),
        ]);
        assert_eq!(
            headers.get("set-cookie").unwrap(),
            &serde_json::json!(["a=1", "b=2", "c=3"])
        );
    }

    #[test]
    fn collapsing_keeps_the_last_value() {
        let headers = collect_headers([("Set-Cookie", "a=1"), ("Set-Cookie", "b=2")]);
        let collapsed = collapse_header_lists(headers);
        assert_eq!(collapsed.get("set-cookie").unwrap(), "b=2");
    }

    #[test]
    fn response_format_comparison() {
        assert!(wants_collapsed_headers(Some("0.10.0")));
        assert!(!wants_collapsed_headers(Some("0.11.0")));
        assert!(!wants_collapsed_headers(Some("0.12.0")));
        assert!(!wants_collapsed_headers(None));
    }

    #[test]
    fn log_truncation_triggers_exactly_past_the_cap() {
        let exact = "a".repeat(MAX_LOG_BYTES);
        assert_eq!(truncate_log(exact.clone()).len(), MAX_LOG_BYTES);

        let over = "a".repeat(MAX_LOG_BYTES + 1);
        let truncated = truncate_log(over);
        assert!(truncated.ends_with(TRUNCATION_NOTICE));
        assert_eq!(truncated.len(), MAX_LOG_BYTES + TRUNCATION_NOTICE.len());
    }

    #[test]
    fn basic_auth_encodes_opr_pair() {
        // base64("opr:sekret")
        assert_eq!(basic_auth("sekret"), "Basic b3ByOnNla3JldA==");
    }
}

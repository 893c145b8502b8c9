//! Execution result rendering: JSON for callers that accept it, WebKit-style
//! multipart/form-data otherwise.

use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use opr_executor_application::executions::{
    collapse_header_lists, wants_collapsed_headers, ExecutionResult,
};
use opr_executor_shared::runtime::now_millis;

/// Lowercase base36 of a number; used for multipart boundaries.
pub fn base36(mut n: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).expect("base36 digits are ascii")
}

pub fn multipart_boundary(now_ms: u64) -> String {
    format!("----WebKitFormBoundary{}", base36(now_ms))
}

fn part_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Render the result as multipart/form-data. Field names match the JSON
/// keys; non-primitive values are JSON-encoded; parts are CRLF-joined and
/// terminated by `--{boundary}--`.
pub fn render_multipart(result: &ExecutionResult, boundary: &str) -> String {
    let value = serde_json::to_value(result).expect("execution result serializes");
    let object = value.as_object().expect("execution result is an object");

    let mut parts = Vec::with_capacity(object.len() + 1);
    for (name, value) in object {
        parts.push(format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{}",
            part_value(value)
        ));
    }
    parts.push(format!("--{boundary}--"));
    parts.join("\r\n")
}

/// True when the caller accepts a JSON rendering.
pub fn accepts_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|accept| accept.contains("application/json") || accept.contains("application/*"))
        .unwrap_or(false)
}

/// Render an execution result per the caller's `Accept` and
/// `x-executor-response-format` headers.
pub fn render_execution(request_headers: &HeaderMap, mut result: ExecutionResult) -> Response {
    let response_format = request_headers
        .get("x-executor-response-format")
        .and_then(|v| v.to_str().ok());
    if wants_collapsed_headers(response_format) {
        result.headers = collapse_header_lists(result.headers);
    }

    if accepts_json(request_headers) {
        return (StatusCode::OK, axum::Json(result)).into_response();
    }

    let boundary = multipart_boundary(now_millis().max(0) as u64);
    let body = render_multipart(&result, &boundary);
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )],
        body,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_result() -> ExecutionResult {
        ExecutionResult {
            status_code: 200,
            headers: serde_json::Map::from_iter([(
                "content-type".to_string(),
                serde_json::json!("text/plain"),
            )]),
            body: "hello".to_string(),
            logs: String::new(),
            errors: String::new(),
            duration: 0.25,
            start_time: 1_700_000_000.5,
        }
    }

    #[test]
    fn base36_digits() {
        assert_eq!(base36(0), "0");
        assert_eq!(base36(35), "z");
        assert_eq!(base36(36), "10");
        assert_eq!(base36(1_700_000_000_000), "loyw3v28");
    }

    #[test]
    fn boundary_has_webkit_prefix() {
        let boundary = multipart_boundary(1_700_000_000_000);
        assert_eq!(boundary, "----WebKitFormBoundaryloyw3v28");
    }

    #[test]
    fn multipart_contains_every_field_and_terminator() {
        let rendered = render_multipart(&sample_result(), "----WebKitFormBoundaryx");

        for name in ["statusCode", "headers", "body", "logs", "errors", "duration", "startTime"] {
            assert!(
                rendered.contains(&format!("name=\"{name}\"")),
                "missing part {name}"
            );
        }
        assert!(rendered.ends_with("------WebKitFormBoundaryx--"));
        // Non-primitive values are JSON-encoded.
        assert!(rendered.contains("{\"content-type\":\"text/plain\"}"));
        // Primitive strings stay raw.
        assert!(rendered.contains("\r\n\r\nhello\r\n"));
    }

    #[test]
    fn accept_header_detection() {
        let mut headers = HeaderMap::new();
        assert!(!accepts_json(&headers));

        headers.insert(header::ACCEPT, "application/json".parse().unwrap());
        assert!(accepts_json(&headers));

        headers.insert(header::ACCEPT, "application/*".parse().unwrap());
        assert!(accepts_json(&headers));

        headers.insert(header::ACCEPT, "text/html".parse().unwrap());
        assert!(!accepts_json(&headers));
    }
}

//! Decoder for `script(1)` timing files.
//!
//! The in-pod builder runs under `script --log-out logs.txt --log-timing
//! timings.txt`. The timing file records one `(seconds, length)` pair per
//! output burst: `seconds` is the floating-point wall-clock delta since the
//! recording started, `length` a signed byte count. Replaying the pairs
//! against the log text yields timestamped log segments.

use chrono::{DateTime, Duration, Utc};

/// One parsed timing line.
#[derive(Debug, Clone, PartialEq)]
pub struct TimingEntry {
    /// ISO-8601 timestamp with a `+00:00` offset (never `Z`).
    pub timestamp: String,
    /// Signed byte count. Readers slice `|length|` bytes and advance the
    /// cursor by the signed value.
    pub length: i64,
}

/// A reconstructed log slice with its wall-clock timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct LogSegment {
    pub timestamp: String,
    pub content: String,
}

/// Byte offset of the log payload: the `Script started on …` banner line
/// plus its terminator.
pub fn log_offset(logs: &str) -> usize {
    match logs.find('\n') {
        Some(pos) => pos + 1,
        None => logs.len() + 1,
    }
}

/// Render the timestamp for a timing delta of `seconds` after `start`.
pub fn render_timestamp(start: DateTime<Utc>, seconds: f64) -> String {
    let at = start + Duration::microseconds((seconds * 1_000_000.0) as i64);
    at.format("%Y-%m-%dT%H:%M:%S%.6f+00:00").to_string()
}

/// Parse a timing file into entries. Malformed lines are skipped.
pub fn parse_timing(timings: &str, start: DateTime<Utc>) -> Vec<TimingEntry> {
    timings
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let seconds = parts.next()?.parse::<f64>().ok()?;
            let length = parts.next()?.parse::<i64>().ok()?;
            Some(TimingEntry {
                timestamp: render_timestamp(start, seconds),
                length,
            })
        })
        .collect()
}

/// Slice `|length|` bytes out of `logs` at `offset + cursor`, clamped to the
/// available range. Returns the slice lossily decoded.
pub fn slice_content(logs: &[u8], offset: usize, cursor: i64, length: i64) -> String {
    let begin = offset.saturating_add(cursor.max(0) as usize);
    let end = begin.saturating_add(length.unsigned_abs() as usize);
    let begin = begin.min(logs.len());
    let end = end.min(logs.len());
    String::from_utf8_lossy(&logs[begin..end]).into_owned()
}

/// Replay a complete timing file against its log text.
pub fn segments(logs: &str, timings: &str, start: DateTime<Utc>) -> Vec<LogSegment> {
    let offset = log_offset(logs);
    let bytes = logs.as_bytes();
    let mut cursor: i64 = 0;
    let mut out = Vec::new();

    for entry in parse_timing(timings, start) {
        out.push(LogSegment {
            timestamp: entry.timestamp,
            content: slice_content(bytes, offset, cursor, entry.length),
        });
        cursor += entry.length;
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn offset_skips_banner_line() {
        let logs = "Script started on 2024-06-01\nhello";
        assert_eq!(log_offset(logs), 29);
        assert_eq!(&logs[log_offset(logs)..], "hello");
    }

    #[test]
    fn offset_without_newline_is_past_end() {
        assert_eq!(log_offset("banner"), 7);
    }

    #[test]
    fn timestamps_use_offset_suffix() {
        let ts = render_timestamp(start(), 1.5);
        assert_eq!(ts, "2024-06-01T12:00:01.500000+00:00");
        assert!(!ts.ends_with('Z'));
    }

    #[test]
    fn parses_pairs_and_skips_garbage() {
        let entries = parse_timing("0.1 5\n\nnot a line\n2.0 -3\n", start());
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].length, 5);
        assert_eq!(entries[1].length, -3);
        assert_eq!(entries[1].timestamp, "2024-06-01T12:00:02.000000+00:00");
    }

    #[test]
    fn replays_segments_against_log_text() {
        let logs = "Script started\nhello world";
        let timings = "0.0 5\n0.5 6\n";
        let segs = segments(logs, timings, start());
        assert_eq!(segs.len(), 2);
        assert_eq!(segs[0].content, "hello");
        assert_eq!(segs[1].content, " world");
    }

    #[test]
    fn negative_length_rewinds_cursor() {
        let logs = "banner\nabcdef";
        // Read 4, adjust back 2, read 3: cursor path 0 -> 4 -> 2 -> 5.
        let timings = "0.0 4\n0.1 -2\n0.2 3\n";
        let segs = segments(logs, timings, start());
        assert_eq!(segs[0].content, "abcd");
        assert_eq!(segs[2].content, "cde");
    }

    #[test]
    fn slice_clamps_to_available_bytes() {
        let logs = b"banner\nab";
        assert_eq!(slice_content(logs, 7, 0, 100), "ab");
        assert_eq!(slice_content(logs, 7, 50, 10), "");
    }

    #[test]
    fn render_parse_round_trip() {
        let entries = vec![(0.25_f64, 12_i64), (1.75, -4), (3.5, 7)];
        let rendered: String = entries
            .iter()
            .map(|(s, l)| format!("{s} {l}\n"))
            .collect();
        let parsed = parse_timing(&rendered, start());
        assert_eq!(parsed.len(), entries.len());
        for (entry, (seconds, length)) in parsed.iter().zip(&entries) {
            assert_eq!(entry.length, *length);
            assert_eq!(entry.timestamp, render_timestamp(start(), *seconds));
        }
    }
}

//! Benchmark output classification.
//!
//! Decision order:
//!
//! 1. non-zero client exit ⇒ failed
//! 2. an error marker in either stream ⇒ failed
//! 3. `Test PASS` in both streams ⇒ success
//! 4. a throughput or latency line ⇒ success
//! 5. otherwise ⇒ failed
//!
//! Only `success` and `failed` come out of here; `timeout` and `error` are
//! decided by the supervisor before output is ever classified.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::{Measurement, Metrics, TestStatus};

/// Printed by the benchmark on each side when the run verified cleanly.
pub const PASS_MARKER: &str = "Test PASS";

static ANSI_ESCAPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b\[[0-9;]*[a-zA-Z]").expect("Invalid regex pattern"));

static ERROR_MARKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(error|failed|cannot|unable)").expect("Invalid regex pattern"));

static THROUGHPUT_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(bandwidth|bw)\b").expect("Invalid regex pattern"));

static LATENCY_LINE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\blatency\b").expect("Invalid regex pattern"));

static THROUGHPUT_VALUE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?P<value>\d+(?:\.\d+)?)\s*(?P<unit>[mg]b/sec|[mg]b/s|[mg]bps)(?:\s|$|[,;)])").expect("Invalid regex pattern")
});

static LATENCY_VALUE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?P<value>\d+(?:\.\d+)?)\s*(?P<unit>usec|us)(?:\s|$|[,;)])").expect("Invalid regex pattern")
});

/// Classifier verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    /// Either `Success` or `Failed`.
    pub status: TestStatus,
    /// Figures found in the output, if any.
    pub metrics: Option<Metrics>,
    /// Why the test failed.
    pub reason: Option<String>,
}

/// Removes terminal escape sequences and surrounding whitespace.
pub fn strip_ansi(line: &str) -> String {
    ANSI_ESCAPE_RE.replace_all(line, "").trim().to_string()
}

/// Classifies one finished test. `exit_code` is `None` when the client was
/// terminated by a signal.
pub fn classify(exit_code: Option<i32>, server_output: &[String], client_output: &[String]) -> Classification {
    let metrics = extract_metrics(client_output.iter().chain(server_output));

    if exit_code != Some(0) {
        let reason = match exit_code {
            Some(code) => format!("Client exited with code {}", code),
            None => "Client terminated by signal".to_string(),
        };
        return failed(reason, metrics);
    }

    if let Some(line) = client_output
        .iter()
        .chain(server_output)
        .find(|line| ERROR_MARKER_RE.is_match(line))
    {
        return failed(format!("Error reported: {}", line), metrics);
    }

    let passed = |lines: &[String]| lines.iter().any(|l| l.contains(PASS_MARKER));
    if passed(server_output) && passed(client_output) {
        return success(metrics);
    }

    let has_metric_line = client_output
        .iter()
        .chain(server_output)
        .any(|l| THROUGHPUT_LINE_RE.is_match(l) || LATENCY_LINE_RE.is_match(l));
    if has_metric_line {
        return success(metrics);
    }

    failed("No success or performance marker in output".to_string(), metrics)
}

fn success(metrics: Option<Metrics>) -> Classification {
    Classification {
        status: TestStatus::Success,
        metrics,
        reason: None,
    }
}

fn failed(reason: String, metrics: Option<Metrics>) -> Classification {
    Classification {
        status: TestStatus::Failed,
        metrics,
        reason: Some(reason),
    }
}

/// First throughput and first latency figure, client lines first.
pub fn extract_metrics<'a>(lines: impl Iterator<Item = &'a String>) -> Option<Metrics> {
    let mut metrics = Metrics::default();

    for line in lines {
        if metrics.throughput.is_none() && THROUGHPUT_LINE_RE.is_match(line) {
            metrics.throughput = measurement(&THROUGHPUT_VALUE_RE, line);
        }
        if metrics.latency.is_none() && LATENCY_LINE_RE.is_match(line) {
            metrics.latency = measurement(&LATENCY_VALUE_RE, line);
        }
        if metrics.throughput.is_some() && metrics.latency.is_some() {
            break;
        }
    }

    (!metrics.is_empty()).then_some(metrics)
}

fn measurement(re: &Regex, line: &str) -> Option<Measurement> {
    let caps = re.captures(line)?;
    let value = caps["value"].parse().ok()?;
    Some(Measurement::new(value, &caps["unit"]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn lines(text: &[&str]) -> Vec<String> {
        text.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_strip_ansi() {
        assert_eq!(strip_ansi("\x1b[1;32mTest PASS\x1b[0m  "), "Test PASS");
        assert_eq!(strip_ansi("plain"), "plain");
    }

    #[test]
    fn test_nonzero_exit_fails_first() {
        let c = classify(Some(1), &lines(&["Test PASS"]), &lines(&["Test PASS", "BW: 90.1 Gb/s"]));
        assert_eq!(c.status, TestStatus::Failed);
        assert_eq!(c.reason.as_deref(), Some("Client exited with code 1"));
        assert!(c.metrics.is_some());

        assert_eq!(classify(None, &[], &[]).status, TestStatus::Failed);
    }

    #[test]
    fn test_error_marker_beats_pass() {
        let c = classify(Some(0), &lines(&["Test PASS", "ERROR: QP timeout"]), &lines(&["Test PASS"]));
        assert_eq!(c.status, TestStatus::Failed);
        assert!(c.reason.unwrap().contains("QP timeout"));
    }

    #[test]
    fn test_markers_match_inside_words() {
        let c = classify(
            Some(0),
            &lines(&["Test PASS"]),
            &lines(&["ibv_post_send_failed", "BW: 1 Gbps", "Test PASS"]),
        );
        assert_eq!(c.status, TestStatus::Failed);
        assert!(c.reason.unwrap().contains("ibv_post_send_failed"));

        let c = classify(Some(0), &lines(&["Test PASS"]), &lines(&["3 errors detected", "Test PASS"]));
        assert_eq!(c.status, TestStatus::Failed);

        let c = classify(Some(0), &lines(&["QP_ERROR on hbl_0"]), &lines(&["Bandwidth: 90 Gb/s"]));
        assert_eq!(c.status, TestStatus::Failed);
    }

    #[test]
    fn test_pass_in_both_streams() {
        let c = classify(Some(0), &lines(&["Test PASS"]), &lines(&["Test PASS"]));
        assert_eq!(c.status, TestStatus::Success);
        assert_eq!(c.metrics, None);
    }

    #[test]
    fn test_pass_in_one_stream_only_fails() {
        let c = classify(Some(0), &lines(&["listening"]), &lines(&["Test PASS"]));
        assert_eq!(c.status, TestStatus::Failed);
    }

    #[test]
    fn test_metric_line_succeeds() {
        let c = classify(
            Some(0),
            &lines(&["waiting for client"]),
            &lines(&["Bandwidth: 94.25 Gb/s", "Latency: 3.1 usec"]),
        );
        assert_eq!(c.status, TestStatus::Success);
        let metrics = c.metrics.unwrap();
        assert_eq!(metrics.throughput, Some(Measurement::new(94.25, "Gb/s")));
        assert_eq!(metrics.latency, Some(Measurement::new(3.1, "usec")));
    }

    #[test]
    fn test_metric_line_without_value() {
        let c = classify(Some(0), &[], &lines(&["bw test finished"]));
        assert_eq!(c.status, TestStatus::Success);
        assert_eq!(c.metrics, None);
    }

    #[test]
    fn test_no_markers_fails() {
        let c = classify(Some(0), &lines(&["hello"]), &lines(&["done"]));
        assert_eq!(c.status, TestStatus::Failed);
    }

    #[test]
    fn test_unit_tokens_are_exact() {
        let m = extract_metrics(lines(&["bw 12 busy 800 MB/s"]).iter()).unwrap();
        assert_eq!(m.throughput, Some(Measurement::new(800.0, "MB/s")));

        let m = extract_metrics(lines(&["avg latency 2 usage 7.5 us"]).iter()).unwrap();
        assert_eq!(m.latency, Some(Measurement::new(7.5, "us")));
    }

    #[test]
    fn test_perftest_sec_units() {
        let m = extract_metrics(lines(&["BW average: 94.2 Gb/sec"]).iter()).unwrap();
        assert_eq!(m.throughput, Some(Measurement::new(94.2, "Gb/sec")));

        let m = extract_metrics(lines(&["bw peak 812.5 MB/sec, msg 4096"]).iter()).unwrap();
        assert_eq!(m.throughput, Some(Measurement::new(812.5, "MB/sec")));
    }

    #[test]
    fn test_client_figures_preferred() {
        let client = lines(&["BW 50 Gbps"]);
        let server = lines(&["BW 10 Gbps"]);
        let m = extract_metrics(client.iter().chain(&server)).unwrap();
        assert_eq!(m.throughput, Some(Measurement::new(50.0, "Gbps")));
    }
}

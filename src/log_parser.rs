//! Core output line cleanup and severity classification

use once_cell::sync::Lazy;
use regex::Regex;

use crate::data_structures::{LogEntry, LogSeverity};

static ANSI_ESCAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\x1B(?:[@-Z\\\-_]|\[[0-?]*[ -/]*[@-~])").expect("Invalid ANSI escape regex")
});

static BRACKET_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\[(ERROR|WARNING|WARN|INFO|DEBUG|SUCCESS|FATAL|FATA)\]")
        .expect("Invalid severity tag regex")
});

/// Remove terminal colour and cursor escape sequences
pub fn strip_ansi(line: &str) -> String {
    ANSI_ESCAPE.replace_all(line, "").into_owned()
}

/// Severity of an already cleaned line.
///
/// An explicit `[TAG]` wins; otherwise keywords are checked in a fixed order
/// and anything unmatched is informational.
pub fn classify(text: &str) -> LogSeverity {
    if let Some(tag) = BRACKET_TAG.captures(text).and_then(|c| c.get(1)) {
        return match tag.as_str().to_uppercase().as_str() {
            "ERROR" => LogSeverity::Error,
            "WARNING" | "WARN" => LogSeverity::Warning,
            "DEBUG" => LogSeverity::Debug,
            "SUCCESS" => LogSeverity::Success,
            "FATAL" | "FATA" => LogSeverity::Fatal,
            _ => LogSeverity::Info,
        };
    }

    let lower = text.to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| lower.contains(w));
    if has(&["fatal", "panic"]) {
        LogSeverity::Fatal
    } else if has(&["failed", "error", "exception"]) {
        LogSeverity::Error
    } else if has(&["warn"]) {
        LogSeverity::Warning
    } else if has(&["success", "done"]) {
        LogSeverity::Success
    } else if has(&["debug", "trace"]) {
        LogSeverity::Debug
    } else {
        LogSeverity::Info
    }
}

/// Turn one raw output line into a [`LogEntry`]
pub fn parse_line(raw: &str) -> LogEntry {
    let text = strip_ansi(raw.trim_end_matches(['\r', '\n']));
    let severity = classify(&text);
    LogEntry { text, severity }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_ansi() {
        assert_eq!(strip_ansi("\x1b[31mred\x1b[0m text"), "red text");
        assert_eq!(strip_ansi("\x1b[1;32m[INFO]\x1b[0m ready"), "[INFO] ready");
        assert_eq!(strip_ansi("plain"), "plain");
    }

    #[test]
    fn test_bracket_tags() {
        assert_eq!(parse_line("[ERROR] disk full").severity, LogSeverity::Error);
        assert_eq!(parse_line("[warn] slow mirror").severity, LogSeverity::Warning);
        assert_eq!(parse_line("[FATA] boom").severity, LogSeverity::Fatal);
        assert_eq!(parse_line("[Success] merged").severity, LogSeverity::Success);
        // the tag beats keywords
        assert_eq!(parse_line("[INFO] no error here").severity, LogSeverity::Info);
    }

    #[test]
    fn test_keyword_fallback() {
        assert_eq!(classify("download finished successfully"), LogSeverity::Success);
        assert_eq!(classify("goroutine panic: nil map"), LogSeverity::Fatal);
        assert_eq!(classify("request failed, retrying"), LogSeverity::Error);
        assert_eq!(classify("Warning: low disk"), LogSeverity::Warning);
        assert_eq!(classify("trace id 42"), LogSeverity::Debug);
        assert_eq!(classify("listening on :64001"), LogSeverity::Info);
    }

    #[test]
    fn test_parse_line_trims_line_endings() {
        let entry = parse_line("\x1b[33m[WARNING]\x1b[0m retry 2/3\r\n");
        assert_eq!(entry.text, "[WARNING] retry 2/3");
        assert_eq!(entry.severity, LogSeverity::Warning);
    }
}

use std::fs;
use std::path::Path;

use regex::Regex;

use crate::error::QimbaError;

/// USEARCH merge summary, e.g. `Merged (12345, 87.1%)`.
pub const MERGED_PATTERN: &str = r"Merged \((\d+), ([.\d]+)%\)";

/// Numeric capture groups of the last match of `pattern` in a log file.
///
/// Logs are appended to on every attempt, so the last match is the latest run.
///
/// Returns an empty vector when nothing matches.
pub fn extract_numbers(path: &Path, pattern: &str) -> Result<Vec<f64>, QimbaError> {
    let regex = Regex::new(pattern)
        .map_err(|err| QimbaError::InvalidArgument(format!("invalid log pattern: {err}")))?;
    let content = fs::read(path).map_err(|err| QimbaError::fs(path, err))?;
    let content = String::from_utf8_lossy(&content);
    Ok(numbers_in(&regex, &content))
}

fn numbers_in(regex: &Regex, text: &str) -> Vec<f64> {
    let Some(captures) = regex.captures_iter(text).last() else {
        return Vec::new();
    };
    captures
        .iter()
        .skip(1)
        .flatten()
        .filter_map(|group| group.as_str().parse::<f64>().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merged_summary() {
        let regex = Regex::new(MERGED_PATTERN).unwrap();
        let log = "00:01 Merging\n  Merged (12345, 87.1%)\n";
        assert_eq!(numbers_in(&regex, log), vec![12345.0, 87.1]);
    }

    #[test]
    fn latest_attempt_wins() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("S1.merge.err");
        fs::write(&log, "Merged (10, 50.0%)\nretry\nMerged (90, 99.0%)\n").unwrap();
        assert_eq!(extract_numbers(&log, MERGED_PATTERN).unwrap(), vec![90.0, 99.0]);
    }

    #[test]
    fn no_match_is_empty() {
        let regex = Regex::new(MERGED_PATTERN).unwrap();
        assert!(numbers_in(&regex, "nothing here").is_empty());
    }
}

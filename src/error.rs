use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum QimbaError {
    #[error("invalid sample sheet {}: {message}", path.display())]
    Schema { path: PathBuf, message: String },

    #[error("{}, line {line}: expected {expected} columns, got {found}", path.display())]
    RowShape {
        path: PathBuf,
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("sample {0} already exists in sample sheet")]
    DuplicateSample(String),

    #[error("sample not found: {0}")]
    SampleNotFound(String),

    #[error(
        "duplicate {direction} file found for sample {sample}: existing {}, new {}",
        existing.display(),
        new.display()
    )]
    DuplicateFile {
        sample: String,
        direction: &'static str,
        existing: PathBuf,
        new: PathBuf,
    },

    #[error("sample {0} missing forward read file")]
    MissingForward(String),

    #[error("{} problem(s) found while pairing read files", issues.len())]
    PairingIssues {
        #[related]
        issues: Vec<QimbaError>,
    },

    #[error("no valid samples found in {}", dir.display())]
    NoSamples {
        dir: PathBuf,
        #[help]
        hint: String,
    },

    #[error("sample {0} has no reverse read file")]
    MissingReverse(String),

    #[error("required input file not found: {}", .0.display())]
    InputMissing(PathBuf),

    #[error("required output file was not created: {}", .0.display())]
    OutputMissing(PathBuf),

    #[error("command `{command}` failed with {}", describe_exit(*code))]
    ProcessFailed {
        command: String,
        code: Option<i32>,
        #[help]
        detail: Option<String>,
    },

    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("output file already exists: {}", .0.display())]
    OutputExists(PathBuf),

    #[error("cannot write sample {sample}: column {column} contains a tab or line break")]
    UnencodableCell { sample: String, column: String },

    #[error("invalid sort criterion: {0} (valid options are: sample_id, forward_read)")]
    InvalidSortKey(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid table {}: {message}", path.display())]
    InvalidTable { path: PathBuf, message: String },

    #[error("failed to read config file at {}", .0.display())]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl QimbaError {
    pub(crate) fn fs(path: &std::path::Path, err: std::io::Error) -> Self {
        QimbaError::Filesystem(format!("{}: {err}", path.display()))
    }
}

fn describe_exit(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_failed_reports_code() {
        let err = QimbaError::ProcessFailed {
            command: "usearch -fastx_uniques in.fa".to_string(),
            code: Some(2),
            detail: None,
        };
        assert_eq!(
            err.to_string(),
            "command `usearch -fastx_uniques in.fa` failed with exit code 2"
        );
    }

    #[test]
    fn pairing_issues_expose_related() {
        let err = QimbaError::PairingIssues {
            issues: vec![
                QimbaError::MissingForward("B".to_string()),
                QimbaError::MissingForward("C".to_string()),
            ],
        };
        assert_eq!(err.to_string(), "2 problem(s) found while pairing read files");
        let related = err.related().map(|iter| iter.count()).unwrap_or(0);
        assert_eq!(related, 2);
    }
}

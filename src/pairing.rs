//! Pairs forward/reverse read files found in a directory by the sample
//! identifier embedded in their file names.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::QimbaError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingMode {
    /// Abort on the first problem.
    FailFast,
    /// Report every problem at once as [`QimbaError::PairingIssues`].
    CollectAll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Reverse,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Forward => "forward",
            Direction::Reverse => "reverse",
        }
    }
}

/// File-name conventions used to recognise read files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingRules {
    extension: String,
    strip: String,
    tag_forward: String,
    tag_reverse: String,
}

impl Default for PairingRules {
    fn default() -> Self {
        Self {
            extension: ".fastq.gz".to_string(),
            strip: String::new(),
            tag_forward: "_R1".to_string(),
            tag_reverse: "_R2".to_string(),
        }
    }
}

impl PairingRules {
    pub fn new(
        extension: impl Into<String>,
        strip: impl Into<String>,
        tag_forward: impl Into<String>,
        tag_reverse: impl Into<String>,
    ) -> Result<Self, QimbaError> {
        let rules = Self {
            extension: extension.into(),
            strip: strip.into(),
            tag_forward: tag_forward.into(),
            tag_reverse: tag_reverse.into(),
        };
        if rules.extension.is_empty() {
            return Err(QimbaError::InvalidArgument(
                "file extension must not be empty".to_string(),
            ));
        }
        if rules.tag_forward.is_empty() || rules.tag_reverse.is_empty() {
            return Err(QimbaError::InvalidArgument(
                "forward and reverse tags must not be empty".to_string(),
            ));
        }
        Ok(rules)
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn tag_forward(&self) -> &str {
        &self.tag_forward
    }

    pub fn tag_reverse(&self) -> &str {
        &self.tag_reverse
    }

    /// Sample identifier and direction encoded in `file_name`, if any.
    ///
    /// The forward tag wins when both tags occur.
    pub fn classify(&self, file_name: &str) -> Option<(String, Direction)> {
        let stem = file_name.strip_suffix(self.extension.as_str())?;
        let stem = if self.strip.is_empty() {
            stem.to_string()
        } else {
            stem.replacen(self.strip.as_str(), "", 1)
        };
        if let Some(pos) = stem.find(self.tag_forward.as_str()) {
            return Some((stem[..pos].to_string(), Direction::Forward));
        }
        if let Some(pos) = stem.find(self.tag_reverse.as_str()) {
            return Some((stem[..pos].to_string(), Direction::Reverse));
        }
        None
    }
}

/// A sample with its forward read and optional reverse read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairedSample {
    pub id: String,
    pub forward: PathBuf,
    pub reverse: Option<PathBuf>,
}

#[derive(Default)]
struct Slot {
    forward: Option<PathBuf>,
    reverse: Option<PathBuf>,
}

/// Groups `files` into samples, ordered by sample identifier.
pub fn pair_files<I>(
    files: I,
    rules: &PairingRules,
    mode: PairingMode,
) -> Result<Vec<PairedSample>, QimbaError>
where
    I: IntoIterator<Item = PathBuf>,
{
    let mut slots = BTreeMap::<String, Slot>::new();
    let mut issues = Vec::new();

    for path in files {
        let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if !file_name.ends_with(rules.extension.as_str()) {
            continue;
        }
        let Some((id, direction)) = rules.classify(file_name) else {
            warn!(
                "ignoring {}: no {} or {} tag",
                path.display(),
                rules.tag_forward,
                rules.tag_reverse
            );
            continue;
        };
        if id.is_empty() {
            warn!("ignoring {}: empty sample id", path.display());
            continue;
        }
        debug!(sample = %id, direction = direction.as_str(), "matched {}", path.display());

        let slot = slots.entry(id.clone()).or_default();
        let target = match direction {
            Direction::Forward => &mut slot.forward,
            Direction::Reverse => &mut slot.reverse,
        };
        if let Some(existing) = target.as_ref() {
            let issue = QimbaError::DuplicateFile {
                sample: id,
                direction: direction.as_str(),
                existing: existing.clone(),
                new: path,
            };
            match mode {
                PairingMode::FailFast => return Err(issue),
                PairingMode::CollectAll => issues.push(issue),
            }
        } else {
            *target = Some(path);
        }
    }

    let mut pairs = Vec::with_capacity(slots.len());
    for (id, slot) in slots {
        match slot.forward {
            Some(forward) => pairs.push(PairedSample {
                id,
                forward,
                reverse: slot.reverse,
            }),
            None => {
                let issue = QimbaError::MissingForward(id);
                match mode {
                    PairingMode::FailFast => return Err(issue),
                    PairingMode::CollectAll => issues.push(issue),
                }
            }
        }
    }

    if !issues.is_empty() {
        return Err(QimbaError::PairingIssues { issues });
    }
    Ok(pairs)
}

/// Every regular file below `root`, sorted by path.
pub fn list_files(root: &Path) -> Result<Vec<PathBuf>, QimbaError> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = fs::read_dir(&dir).map_err(|err| QimbaError::fs(&dir, err))?;
        for entry in entries {
            let entry = entry.map_err(|err| QimbaError::fs(&dir, err))?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.is_file() {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Scans `root` recursively and pairs the read files found there.
pub fn pair_directory(
    root: &Path,
    rules: &PairingRules,
    mode: PairingMode,
) -> Result<Vec<PairedSample>, QimbaError> {
    let files = list_files(root)?;
    pair_files(files, rules, mode)
}

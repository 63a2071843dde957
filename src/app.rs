use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info};

use crate::config::RuntimeConfig;
use crate::error::QimbaError;
use crate::fasta;
use crate::fs_util;
use crate::job::Launcher;
use crate::logscan::{self, MERGED_PATTERN};
use crate::pairing::{self, PairingMode, PairingRules};
use crate::sample::{SampleSheet, SortBy};
use crate::sanitize::{NameCounter, sanitize_id};
use crate::tabular::{self, Dada2Split, TableShape};
use crate::usearch::Usearch;

pub const TEMP_DIR_PREFIX: &str = "qimba_";

#[derive(Debug, Clone)]
pub struct MappingRequest {
    pub input_dir: PathBuf,
    pub rules: PairingRules,
    pub mode: PairingMode,
    /// Filler string used to sanitize identifiers, if requested.
    pub sanitize: Option<String>,
    pub absolute_paths: bool,
}

/// One sample with every column of its sheet resolved, keyed by column name.
#[derive(Debug, Clone, Serialize)]
pub struct SampleView {
    pub id: String,
    pub values: BTreeMap<String, Option<String>>,
}

impl SampleView {
    pub fn value(&self, column: &str) -> Option<&str> {
        self.values.get(column).and_then(|value| value.as_deref())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ShowResult {
    pub file: String,
    pub columns: Vec<String>,
    pub attribute: Option<String>,
    pub samples: Vec<SampleView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SortResult {
    pub output: String,
    pub sorted_by: String,
    pub renamed: bool,
    pub samples: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DerepResult {
    pub input: String,
    pub output: String,
    pub log_dir: String,
    pub input_records: Option<usize>,
    pub unique_records: Option<usize>,
}

impl DerepResult {
    /// Share of input records removed, in percent.
    pub fn reduction(&self) -> Option<f64> {
        match (self.input_records, self.unique_records) {
            (Some(input), Some(unique)) if input > 0 => {
                Some((1.0 - unique as f64 / input as f64) * 100.0)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MergedSample {
    pub id: String,
    pub output: String,
    pub merged_reads: Option<u64>,
    pub merged_percent: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MergeResult {
    pub output: String,
    pub temp_dir: String,
    pub log_dir: String,
    pub bytes_written: u64,
    pub samples: Vec<MergedSample>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckTabItem {
    pub file: String,
    pub shape: Option<TableShape>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckTabResult {
    pub strict: bool,
    pub files: Vec<CheckTabItem>,
}

impl CheckTabResult {
    pub fn has_errors(&self) -> bool {
        self.files.iter().any(|item| item.error.is_some())
    }
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Workflows composing sample sheets and external jobs.
#[derive(Clone)]
pub struct App<L: Launcher> {
    config: RuntimeConfig,
    launcher: L,
}

impl<L: Launcher> App<L> {
    pub fn new(config: RuntimeConfig, launcher: L) -> Self {
        Self { config, launcher }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// `path` joined onto the configured output directory; absolute paths
    /// are returned unchanged.
    pub fn resolve_output(&self, path: &Path) -> PathBuf {
        self.config.output_dir.join(path)
    }

    fn usearch(&self) -> Usearch {
        Usearch::with_program(&self.config.usearch, self.config.threads)
    }

    /// Builds a sample sheet from the read files found under a directory.
    pub fn make_mapping(
        &self,
        request: &MappingRequest,
        sink: &dyn ProgressSink,
    ) -> Result<SampleSheet, QimbaError> {
        sink.event(ProgressEvent {
            message: format!("phase=Scan; {}", request.input_dir.display()),
            elapsed: None,
        });
        let mut pairs = pairing::pair_directory(&request.input_dir, &request.rules, request.mode)?;
        if pairs.is_empty() {
            return Err(QimbaError::NoSamples {
                dir: request.input_dir.clone(),
                hint: format!(
                    "extension: {}, forward: {}, reverse: {}",
                    request.rules.extension(),
                    request.rules.tag_forward(),
                    request.rules.tag_reverse()
                ),
            });
        }

        if let Some(filler) = &request.sanitize {
            let mut counter = NameCounter::new();
            for pair in &mut pairs {
                pair.id = sanitize_id(&pair.id, filler, &mut counter);
            }
        }

        let sheet = if request.absolute_paths {
            for pair in &mut pairs {
                pair.forward = absolute(&pair.forward)?;
                if let Some(reverse) = &pair.reverse {
                    pair.reverse = Some(absolute(reverse)?);
                }
            }
            SampleSheet::from_pairs(&pairs, None)?
        } else {
            SampleSheet::from_pairs(&pairs, Some(&request.input_dir))?
        };
        info!(samples = sheet.len(), "built sample sheet");
        Ok(sheet)
    }

    pub fn show_samples(
        &self,
        sheet_path: &Path,
        attribute: Option<&str>,
    ) -> Result<ShowResult, QimbaError> {
        let sheet = SampleSheet::load_from_file(sheet_path)?;
        let mut samples = Vec::with_capacity(sheet.len());
        for id in sheet.ids() {
            let mut values = BTreeMap::new();
            for column in sheet.columns() {
                let value = sheet.get_sample_attr(id, column)?;
                values.insert(column.clone(), value.map(str::to_string));
            }
            samples.push(SampleView {
                id: id.to_string(),
                values,
            });
        }
        Ok(ShowResult {
            file: sheet_path.display().to_string(),
            columns: sheet.columns().to_vec(),
            attribute: attribute.map(str::to_string),
            samples,
        })
    }

    /// Loads a sheet, optionally renames its samples, sorts it and saves it.
    pub fn sort_samples(
        &self,
        input: &Path,
        output: &Path,
        by: SortBy,
        rename: Option<&str>,
        absolute_paths: bool,
    ) -> Result<SortResult, QimbaError> {
        let sheet = SampleSheet::load_from_file(input)?;
        let sheet = match rename {
            Some(filler) => sheet.rename(filler)?,
            None => sheet,
        };
        let sorted = sheet.sort(by);
        let output = self.resolve_output(output);
        sorted.save_to_file(&output, absolute_paths)?;
        Ok(SortResult {
            output: output.display().to_string(),
            sorted_by: by.to_string(),
            renamed: rename.is_some(),
            samples: sorted.len(),
        })
    }

    /// Dereplicates a FASTA file with USEARCH.
    pub fn derep(
        &self,
        input: &Path,
        output: &Path,
        sink: &dyn ProgressSink,
    ) -> Result<DerepResult, QimbaError> {
        let output = self.resolve_output(output);
        let log_dir = match &self.config.log_dir {
            Some(dir) => dir.clone(),
            None => parent_or_cwd(&output).join("logs"),
        };
        let job = self.usearch().derep_job(input, &output, &log_dir)?;
        sink.event(ProgressEvent {
            message: format!("phase=Run; {job}"),
            elapsed: None,
        });

        let start = Instant::now();
        job.run_with(&self.launcher)?;
        sink.event(ProgressEvent {
            message: "phase=Done; dereplication completed".to_string(),
            elapsed: Some(start.elapsed()),
        });

        let input_records = count_or_skip(input);
        let unique_records = count_or_skip(&output);
        Ok(DerepResult {
            input: input.display().to_string(),
            output: output.display().to_string(),
            log_dir: log_dir.display().to_string(),
            input_records,
            unique_records,
        })
    }

    /// Merges every sample's read pair and concatenates the results in sheet
    /// order. Stops at the first failing sample.
    pub fn merge(
        &self,
        sheet_path: &Path,
        output: &Path,
        sink: &dyn ProgressSink,
    ) -> Result<MergeResult, QimbaError> {
        let output = self.resolve_output(output);
        if output.exists() {
            return Err(QimbaError::OutputExists(output));
        }
        let sheet = SampleSheet::load_from_file(sheet_path)?;
        if let Some(single) = sheet.iter().find(|sample| !sample.is_paired()) {
            return Err(QimbaError::MissingReverse(single.id.clone()));
        }

        let temp_dir = fs_util::make_temp_dir(&self.config.tmp_dir, TEMP_DIR_PREFIX)?;
        let log_dir = match &self.config.log_dir {
            Some(dir) => dir.clone(),
            None => temp_dir.join("logs"),
        };
        fs::create_dir_all(&log_dir).map_err(|err| QimbaError::fs(&log_dir, err))?;
        sink.event(ProgressEvent {
            message: format!(
                "phase=Prepare; {} samples, temporary directory {}",
                sheet.len(),
                temp_dir.display()
            ),
            elapsed: None,
        });

        let usearch = self.usearch();
        let mut merged = Vec::with_capacity(sheet.len());
        let mut outputs = Vec::with_capacity(sheet.len());
        for sample in &sheet {
            let sample_output = temp_dir.join(format!("{}.fastq", sample.id));
            let job = usearch.merge_pairs_job(sample, &sample_output, &log_dir)?;
            sink.event(ProgressEvent {
                message: format!("phase=Run; merging {}", sample.id),
                elapsed: None,
            });
            let start = Instant::now();
            job.run_with(&self.launcher)?;

            let stats = job
                .stderr_log_path()
                .map(|log| logscan::extract_numbers(log, MERGED_PATTERN))
                .transpose()
                .unwrap_or_else(|err| {
                    debug!("no merge statistics for {}: {err}", sample.id);
                    None
                })
                .unwrap_or_default();
            sink.event(ProgressEvent {
                message: format!("phase=Done; merged {}", sample.id),
                elapsed: Some(start.elapsed()),
            });

            merged.push(MergedSample {
                id: sample.id.clone(),
                output: sample_output.display().to_string(),
                merged_reads: stats.first().map(|value| *value as u64),
                merged_percent: stats.get(1).copied(),
            });
            outputs.push(sample_output);
        }

        sink.event(ProgressEvent {
            message: format!("phase=Store; concatenating into {}", output.display()),
            elapsed: None,
        });
        let bytes_written = fs_util::concatenate(&outputs, &output)?;
        info!(samples = merged.len(), bytes = bytes_written, "merge finished");

        Ok(MergeResult {
            output: output.display().to_string(),
            temp_dir: temp_dir.display().to_string(),
            log_dir: log_dir.display().to_string(),
            bytes_written,
            samples: merged,
        })
    }

    /// Reports the shape of each TSV file; failures are collected per file.
    pub fn check_tab(&self, files: &[PathBuf], strict: Option<bool>) -> CheckTabResult {
        let strict = strict.unwrap_or(self.config.check_tab_strict);
        let files = files
            .iter()
            .map(|file| match tabular::check_tsv(file, strict) {
                Ok(shape) => CheckTabItem {
                    file: file.display().to_string(),
                    shape: Some(shape),
                    error: None,
                },
                Err(err) => CheckTabItem {
                    file: file.display().to_string(),
                    shape: None,
                    error: Some(err.to_string()),
                },
            })
            .collect();
        CheckTabResult { strict, files }
    }

    pub fn dada2_split(&self, input: &Path, output_base: &Path) -> Result<Dada2Split, QimbaError> {
        tabular::split_dada2(input, &self.resolve_output(output_base))
    }
}

fn count_or_skip(path: &Path) -> Option<usize> {
    match fasta::count_records(path) {
        Ok(count) => Some(count),
        Err(err) => {
            debug!("could not count records: {err}");
            None
        }
    }
}

fn parent_or_cwd(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn absolute(path: &Path) -> Result<PathBuf, QimbaError> {
    std::path::absolute(path).map_err(|err| QimbaError::fs(path, err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reduction_percent() {
        let result = DerepResult {
            input: "in.fa".to_string(),
            output: "out.fa".to_string(),
            log_dir: "logs".to_string(),
            input_records: Some(200),
            unique_records: Some(50),
        };
        assert_eq!(result.reduction(), Some(75.0));
    }

    #[test]
    fn parent_of_bare_file_is_cwd() {
        assert_eq!(parent_or_cwd(Path::new("uniq.fa")), PathBuf::from("."));
        assert_eq!(parent_or_cwd(Path::new("out/uniq.fa")), PathBuf::from("out"));
    }
}

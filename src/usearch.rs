//! Job builders for the USEARCH operations qimba drives.

use std::ffi::OsString;
use std::path::Path;

use crate::error::QimbaError;
use crate::job::Job;
use crate::sample::Sample;

pub const DEFAULT_PROGRAM: &str = "usearch";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Usearch {
    program: String,
    threads: usize,
}

impl Usearch {
    pub fn new(threads: usize) -> Self {
        Self::with_program(DEFAULT_PROGRAM, threads)
    }

    pub fn with_program(program: impl Into<String>, threads: usize) -> Self {
        Self {
            program: program.into(),
            threads: threads.max(1),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Collapse identical records of `input`, recording abundances in the
    /// output headers. Logs go to `<log_dir>/<output stem>.derep.{out,err}`.
    pub fn derep_job(&self, input: &Path, output: &Path, log_dir: &Path) -> Result<Job, QimbaError> {
        let stem = file_stem(output)?;
        let argv: Vec<OsString> = vec![
            OsString::from(&self.program),
            "-fastx_uniques".into(),
            input.into(),
            "-fastaout".into(),
            output.into(),
            "-sizeout".into(),
            "-threads".into(),
            self.threads.to_string().into(),
        ];
        let job = Job::new(argv)?
            .require_input(input)
            .require_output(output)
            .log_stderr(log_dir.join(format!("{stem}.derep.err")))
            .log_stdout(log_dir.join(format!("{stem}.derep.out")));
        Ok(job)
    }

    /// Merge the read pair of `sample` into `output`, relabelling records as
    /// `<id>.<n>`. Logs go to `<log_dir>/<id>.merge.{out,err}`.
    pub fn merge_pairs_job(
        &self,
        sample: &Sample,
        output: &Path,
        log_dir: &Path,
    ) -> Result<Job, QimbaError> {
        let reverse = sample
            .reverse
            .as_ref()
            .ok_or_else(|| QimbaError::MissingReverse(sample.id.clone()))?;
        let argv: Vec<OsString> = vec![
            OsString::from(&self.program),
            "-fastq_mergepairs".into(),
            sample.forward.as_std_path().into(),
            "-reverse".into(),
            reverse.as_std_path().into(),
            "-relabel".into(),
            format!("{}.", sample.id).into(),
            "-fastqout".into(),
            output.into(),
            "-threads".into(),
            self.threads.to_string().into(),
        ];
        let job = Job::new(argv)?
            .require_input(sample.forward.as_std_path())
            .require_input(reverse.as_std_path())
            .require_output(output)
            .log_stderr(log_dir.join(format!("{}.merge.err", sample.id)))
            .log_stdout(log_dir.join(format!("{}.merge.out", sample.id)));
        Ok(job)
    }
}

fn file_stem(path: &Path) -> Result<String, QimbaError> {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .ok_or_else(|| {
            QimbaError::InvalidArgument(format!("output path has no file name: {}", path.display()))
        })
}

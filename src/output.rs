use std::io::{self, Write};

use serde::Serialize;

use crate::app::{
    CheckTabResult, DerepResult, MergeResult, ProgressEvent, ProgressSink, ShowResult, SortResult,
};
use crate::tabular::Dada2Split;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Text,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Progress messages on stderr, shown only in verbose mode.
pub struct StderrProgress {
    pub verbose: bool,
}

impl ProgressSink for StderrProgress {
    fn event(&self, event: ProgressEvent) {
        if !self.verbose {
            return;
        }
        match event.elapsed {
            Some(elapsed) => eprintln!("{} ({:.1}s)", event.message, elapsed.as_secs_f64()),
            None => eprintln!("{}", event.message),
        }
    }
}

pub struct TextOutput;

impl TextOutput {
    pub fn render_show(result: &ShowResult) -> String {
        let mut out = String::new();
        out.push_str(&format!("\nFound {} samples\n", result.samples.len()));
        out.push_str(&format!(
            "Available attributes: {}\n\n",
            result.columns.join(", ")
        ));
        if let Some(attr) = &result.attribute {
            out.push_str(&format!("Values for attribute '{attr}':\n"));
            for sample in &result.samples {
                let value = sample.value(attr).unwrap_or("None");
                out.push_str(&format!("{}: {value}\n", sample.id));
            }
            return out;
        }

        for sample in &result.samples {
            out.push_str(&format!("\nSample: {}\n", sample.id));
            for col in result.columns.iter().skip(1) {
                let value = sample.value(col).unwrap_or("None");
                out.push_str(&format!("  {col}: {value}\n"));
            }
        }
        out
    }

    pub fn render_sort(result: &SortResult) -> String {
        format!(
            "Wrote {} samples sorted by {}{} to {}\n",
            result.samples,
            result.sorted_by,
            if result.renamed { " (renamed)" } else { "" },
            result.output
        )
    }

    pub fn render_derep(result: &DerepResult) -> String {
        let mut out = String::from("Dereplication completed successfully\n");
        if let (Some(input), Some(unique)) = (result.input_records, result.unique_records) {
            out.push_str(&format!("Input sequences: {input}\n"));
            out.push_str(&format!("Unique sequences: {unique}\n"));
            if let Some(reduction) = result.reduction() {
                out.push_str(&format!("Reduction: {reduction:.1}%\n"));
            }
        }
        out
    }

    pub fn render_merge(result: &MergeResult) -> String {
        let mut out = String::new();
        for sample in &result.samples {
            match (sample.merged_reads, sample.merged_percent) {
                (Some(reads), Some(percent)) => {
                    out.push_str(&format!("{}: merged {reads} ({percent:.1}%)\n", sample.id))
                }
                _ => out.push_str(&format!("{}: merged\n", sample.id)),
            }
        }
        out.push_str(&format!(
            "Wrote {} ({} bytes); logs in {}\n",
            result.output, result.bytes_written, result.log_dir
        ));
        out
    }

    pub fn render_check_tab(result: &CheckTabResult) -> String {
        let mut out = String::new();
        for item in &result.files {
            let name = std::path::Path::new(&item.file)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| item.file.clone());
            out.push_str(&format!("\nAnalyzing {name}:\n"));
            let Some(shape) = &item.shape else {
                continue;
            };
            out.push_str(&format!("Total rows: {}\n", shape.rows));
            if shape.is_consistent() {
                out.push_str(&format!("Columns: {} (consistent)\n", shape.columns));
            } else {
                out.push_str("Column count distribution:\n");
                for (columns, rows) in &shape.distribution {
                    let percent = *rows as f64 / shape.rows as f64 * 100.0;
                    out.push_str(&format!("  {columns} columns: {rows} rows ({percent:.1}%)\n"));
                }
            }
        }
        out
    }

    pub fn render_dada2(result: &Dada2Split) -> String {
        format!(
            "Split {} sequences across {} samples into {} and {}\n",
            result.sequences,
            result.samples,
            result.fasta.display(),
            result.table.display()
        )
    }
}

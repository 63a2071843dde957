//! Tab-separated table utilities: shape checks and DADA2 sequence-table
//! splitting.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::error::QimbaError;
use crate::fs_util;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableShape {
    pub rows: usize,
    pub columns: usize,
    /// Number of rows per field count.
    pub distribution: BTreeMap<usize, usize>,
}

impl TableShape {
    pub fn is_consistent(&self) -> bool {
        self.distribution.len() <= 1
    }
}

fn read_text(path: &Path) -> Result<String, QimbaError> {
    fs::read_to_string(path).map_err(|err| QimbaError::fs(path, err))
}

fn field_count(line: &str) -> usize {
    if line.is_empty() {
        0
    } else {
        line.split('\t').count()
    }
}

/// Counts rows and columns of a TSV file.
///
/// In strict mode the first row whose field count differs from the first
/// row is an error.
pub fn check_tsv(path: &Path, strict: bool) -> Result<TableShape, QimbaError> {
    let content = read_text(path)?;
    let mut shape = TableShape {
        rows: 0,
        columns: 0,
        distribution: BTreeMap::new(),
    };
    for (idx, line) in content.lines().enumerate() {
        let count = field_count(line);
        *shape.distribution.entry(count).or_insert(0) += 1;
        if shape.rows == 0 {
            shape.columns = count;
        } else if strict && count != shape.columns {
            return Err(QimbaError::InvalidTable {
                path: path.to_path_buf(),
                message: format!(
                    "inconsistent column count at row {}: expected {}, got {count}",
                    idx + 1,
                    shape.columns
                ),
            });
        }
        shape.rows += 1;
    }
    Ok(shape)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dada2Split {
    pub sequences: usize,
    pub samples: usize,
    pub fasta: PathBuf,
    pub table: PathBuf,
}

struct Dada2Row {
    sequence: String,
    counts: Vec<String>,
}

fn invalid(path: &Path, message: String) -> QimbaError {
    QimbaError::InvalidTable {
        path: path.to_path_buf(),
        message,
    }
}

fn parse_dada2(path: &Path, content: &str) -> Result<(Vec<String>, Vec<Dada2Row>), QimbaError> {
    let mut lines = content.lines();
    let headers = match lines.next() {
        Some(line) => line.split('\t').map(str::to_string).collect::<Vec<_>>(),
        None => return Err(invalid(path, "input file is empty".to_string())),
    };
    if headers.len() < 2 {
        return Err(invalid(
            path,
            "TSV must have at least 2 columns (sequence and at least one sample)".to_string(),
        ));
    }

    let mut rows = Vec::new();
    for (idx, line) in lines.enumerate() {
        let line_no = idx + 2;
        if line.is_empty() {
            continue;
        }
        let fields = line.split('\t').collect::<Vec<_>>();
        if fields.len() != headers.len() {
            return Err(invalid(
                path,
                format!(
                    "line {line_no} has {} fields, expected {}",
                    fields.len(),
                    headers.len()
                ),
            ));
        }
        let sequence = fields[0];
        let valid_sequence = !sequence.is_empty()
            && sequence
                .chars()
                .all(|ch| matches!(ch.to_ascii_uppercase(), 'A' | 'C' | 'G' | 'T' | 'N'));
        if !valid_sequence {
            let preview = sequence.chars().take(50).collect::<String>();
            return Err(invalid(
                path,
                format!("invalid sequence at line {line_no}: {preview}..."),
            ));
        }
        for (col, count) in fields.iter().enumerate().skip(1) {
            if !count.is_empty() && !count.chars().all(|ch| ch.is_ascii_digit()) {
                return Err(invalid(
                    path,
                    format!(
                        "invalid count '{count}' in column {} at line {line_no}",
                        headers[col]
                    ),
                ));
            }
        }
        rows.push(Dada2Row {
            sequence: sequence.to_string(),
            counts: fields[1..].iter().map(|count| count.to_string()).collect(),
        });
    }

    if rows.is_empty() {
        return Err(invalid(path, "no valid sequences found in input file".to_string()));
    }
    Ok((headers, rows))
}

/// Splits a DADA2 sequence table into `<base>.fasta` and `<base>.tsv`.
///
/// Sequences are renamed `ASV1`, `ASV2`, ... in row order; the FASTA header
/// carries the total count over all samples.
pub fn split_dada2(input: &Path, output_base: &Path) -> Result<Dada2Split, QimbaError> {
    let content = read_text(input)?;
    let (headers, rows) = parse_dada2(input, &content)?;

    let mut fasta = String::new();
    let mut table = headers.join("\t");
    table.push('\n');
    for (idx, row) in rows.iter().enumerate() {
        let asv = format!("ASV{}", idx + 1);
        let total = row
            .counts
            .iter()
            .filter(|count| !count.is_empty())
            .map(|count| {
                count
                    .parse::<u64>()
                    .map_err(|err| invalid(input, format!("count '{count}' out of range: {err}")))
            })
            .sum::<Result<u64, QimbaError>>()?;
        fasta.push_str(&format!(">{asv} counts={total}\n{}\n", row.sequence));
        table.push_str(&asv);
        for count in &row.counts {
            table.push('\t');
            table.push_str(count);
        }
        table.push('\n');
        if (idx + 1) % 1000 == 0 {
            debug!("processed {} sequences", idx + 1);
        }
    }

    let fasta_path = output_base.with_extension("fasta");
    let table_path = output_base.with_extension("tsv");
    fs_util::write_atomic(&fasta_path, fasta.as_bytes())?;
    fs_util::write_atomic(&table_path, table.as_bytes())?;

    Ok(Dada2Split {
        sequences: rows.len(),
        samples: headers.len() - 1,
        fasta: fasta_path,
        table: table_path,
    })
}

//! Minimal FASTA reading, enough to report record counts around
//! dereplication.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;

use flate2::read::MultiGzDecoder;

use crate::error::QimbaError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastaRecord {
    pub id: String,
    pub comment: String,
    pub sequence: String,
}

/// Streaming FASTA parser. Blank lines are ignored and sequence lines are
/// joined; a header splits at the first whitespace into id and comment.
pub struct FastaReader<R> {
    lines: io::Lines<R>,
    pending: Option<(String, String)>,
    done: bool,
}

impl<R: BufRead> FastaReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            pending: None,
            done: false,
        }
    }
}

impl<R: BufRead> Iterator for FastaReader<R> {
    type Item = io::Result<FastaRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut sequence = String::new();
        loop {
            let line = match self.lines.next() {
                Some(Ok(line)) => line,
                Some(Err(err)) => {
                    self.done = true;
                    return Some(Err(err));
                }
                None => {
                    self.done = true;
                    return self.pending.take().map(|(id, comment)| {
                        Ok(FastaRecord {
                            id,
                            comment,
                            sequence,
                        })
                    });
                }
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(header) = line.strip_prefix('>') {
                let mut parts = header.splitn(2, char::is_whitespace);
                let id = parts.next().unwrap_or_default().to_string();
                let comment = parts.next().unwrap_or_default().trim().to_string();
                if let Some((prev_id, prev_comment)) = self.pending.replace((id, comment)) {
                    return Some(Ok(FastaRecord {
                        id: prev_id,
                        comment: prev_comment,
                        sequence,
                    }));
                }
            } else if self.pending.is_some() {
                sequence.push_str(line);
            }
        }
    }
}

/// Opens a FASTA file, decompressing it when the name ends in `.gz`.
pub fn open(path: &Path) -> Result<FastaReader<Box<dyn BufRead>>, QimbaError> {
    let file = File::open(path).map_err(|err| QimbaError::fs(path, err))?;
    let is_gz = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("gz"))
        .unwrap_or(false);
    let inner: Box<dyn Read> = if is_gz {
        Box::new(MultiGzDecoder::new(file))
    } else {
        Box::new(file)
    };
    let reader: Box<dyn BufRead> = Box::new(BufReader::new(inner));
    Ok(FastaReader::new(reader))
}

pub fn count_records(path: &Path) -> Result<usize, QimbaError> {
    let mut count = 0;
    for record in open(path)? {
        record.map_err(|err| QimbaError::fs(path, err))?;
        count += 1;
    }
    Ok(count)
}

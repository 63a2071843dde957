//! Sample sheets: sample identifiers mapped to read files plus free-form
//! metadata columns, stored as tab-separated text.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use clap::ValueEnum;
use tracing::{debug, warn};

use crate::error::QimbaError;
use crate::fs_util;
use crate::pairing::PairedSample;
use crate::sanitize::{NameCounter, sanitize_id};

pub const DEFAULT_ID_COLUMN: &str = "Sample ID";
pub const FORWARD_COLUMN: &str = "Forward";
pub const REVERSE_COLUMN: &str = "Reverse";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SortBy {
    #[value(name = "id", alias = "sample_id")]
    SampleId,
    #[value(name = "forward", alias = "forward_read")]
    ForwardRead,
}

impl fmt::Display for SortBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortBy::SampleId => write!(f, "sample_id"),
            SortBy::ForwardRead => write!(f, "forward_read"),
        }
    }
}

impl FromStr for SortBy {
    type Err = QimbaError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "sample_id" | "id" => Ok(SortBy::SampleId),
            "forward_read" | "forward" => Ok(SortBy::ForwardRead),
            _ => Err(QimbaError::InvalidSortKey(value.to_string())),
        }
    }
}

/// One sequencing unit: an identifier, its read files and extra attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub id: String,
    pub forward: Utf8PathBuf,
    pub reverse: Option<Utf8PathBuf>,
    pub attributes: BTreeMap<String, String>,
}

impl Sample {
    pub fn get_attr(&self, attr: &str) -> Option<&str> {
        self.attributes.get(attr).map(String::as_str)
    }

    pub fn is_paired(&self) -> bool {
        self.reverse.is_some()
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reverse = self.reverse.as_ref().map(|p| p.as_str()).unwrap_or("");
        write!(f, "{}\t{}\t{}", self.id, self.forward, reverse)
    }
}

/// Ordered collection of samples sharing one column layout.
///
/// The first column names the identifier column; `Forward` and `Reverse`
/// may appear anywhere after it. All other columns are sample attributes.
/// Iteration follows insertion order.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleSheet {
    columns: Vec<String>,
    samples: Vec<Sample>,
    index: HashMap<String, usize>,
}

impl Default for SampleSheet {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleSheet {
    /// An empty sheet with the `Sample ID`, `Forward`, `Reverse` layout.
    pub fn new() -> Self {
        Self {
            columns: vec![
                DEFAULT_ID_COLUMN.to_string(),
                FORWARD_COLUMN.to_string(),
                REVERSE_COLUMN.to_string(),
            ],
            samples: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// An empty sheet with a custom column layout.
    pub fn with_columns<I, S>(columns: I) -> Result<Self, QimbaError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns = columns.into_iter().map(Into::into).collect::<Vec<_>>();
        validate_columns(&columns).map_err(QimbaError::InvalidArgument)?;
        Ok(Self {
            columns,
            samples: Vec::new(),
            index: HashMap::new(),
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn id_column(&self) -> &str {
        &self.columns[0]
    }

    /// Columns that become per-sample attributes, in sheet order.
    pub fn attribute_columns(&self) -> impl Iterator<Item = &str> {
        self.columns[1..]
            .iter()
            .map(String::as_str)
            .filter(|col| !is_reserved(col))
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Sample> {
        self.samples.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.samples.iter().map(|sample| sample.id.as_str())
    }

    pub fn contains(&self, sample_id: &str) -> bool {
        self.index.contains_key(sample_id)
    }

    /// Adds a sample at the end of the sheet.
    ///
    /// The id must be non-blank without surrounding whitespace and the
    /// forward path non-blank, so that a saved sheet loads back unchanged.
    /// Attribute keys must be attribute columns of this sheet; columns the
    /// caller leaves out are stored as empty values.
    pub fn add_sample(
        &mut self,
        sample_id: impl Into<String>,
        forward: impl Into<Utf8PathBuf>,
        reverse: Option<Utf8PathBuf>,
        attributes: Option<BTreeMap<String, String>>,
    ) -> Result<(), QimbaError> {
        let id = sample_id.into();
        if id.trim().is_empty() {
            return Err(QimbaError::InvalidArgument(
                "sample id must not be empty".to_string(),
            ));
        }
        if id.trim() != id {
            return Err(QimbaError::InvalidArgument(format!(
                "sample id {id:?} has leading or trailing whitespace"
            )));
        }
        let forward: Utf8PathBuf = forward.into();
        if forward.as_str().trim().is_empty() {
            return Err(QimbaError::MissingForward(id));
        }
        if self.index.contains_key(&id) {
            return Err(QimbaError::DuplicateSample(id));
        }

        let mut attributes = attributes.unwrap_or_default();
        if let Some(unknown) = attributes
            .keys()
            .find(|key| !self.attribute_columns().any(|col| col == key.as_str()))
        {
            return Err(QimbaError::InvalidArgument(format!(
                "unknown attribute column {unknown} for sample {id}"
            )));
        }
        for col in self.columns[1..].iter().filter(|col| !is_reserved(col)) {
            attributes.entry(col.clone()).or_default();
        }

        self.index.insert(id.clone(), self.samples.len());
        self.samples.push(Sample {
            id,
            forward,
            reverse: reverse.filter(|path| !path.as_str().trim().is_empty()),
            attributes,
        });
        Ok(())
    }

    /// Appends an attribute column, filling `default` into existing samples.
    pub fn add_column(&mut self, name: &str, default: &str) -> Result<(), QimbaError> {
        let mut columns = self.columns.clone();
        columns.push(name.trim().to_string());
        validate_columns(&columns).map_err(QimbaError::InvalidArgument)?;
        for sample in &mut self.samples {
            sample
                .attributes
                .insert(name.trim().to_string(), default.to_string());
        }
        self.columns = columns;
        Ok(())
    }

    pub fn get_sample(&self, sample_id: &str) -> Result<&Sample, QimbaError> {
        self.index
            .get(sample_id)
            .map(|&pos| &self.samples[pos])
            .ok_or_else(|| QimbaError::SampleNotFound(sample_id.to_string()))
    }

    pub fn remove_sample(&mut self, sample_id: &str) -> Result<Sample, QimbaError> {
        let pos = self
            .index
            .remove(sample_id)
            .ok_or_else(|| QimbaError::SampleNotFound(sample_id.to_string()))?;
        let removed = self.samples.remove(pos);
        for sample in &self.samples[pos..] {
            if let Some(slot) = self.index.get_mut(&sample.id) {
                *slot -= 1;
            }
        }
        Ok(removed)
    }

    /// Value of any column for a sample.
    ///
    /// Fails only for an unknown sample; an unknown column yields `None`.
    pub fn get_sample_attr(&self, sample_id: &str, attr: &str) -> Result<Option<&str>, QimbaError> {
        let sample = self.get_sample(sample_id)?;
        Ok(self.column_value(sample, attr))
    }

    /// Identifiers of every sample whose `attr` column equals `value`.
    pub fn samples_by_attr(&self, attr: &str, value: &str) -> Vec<&str> {
        self.samples
            .iter()
            .filter(|sample| self.column_value(sample, attr) == Some(value))
            .map(|sample| sample.id.as_str())
            .collect()
    }

    /// A new sheet with the same columns and samples in sorted order.
    pub fn sort(&self, by: SortBy) -> SampleSheet {
        let mut samples = self.samples.clone();
        match by {
            SortBy::SampleId => samples.sort_by(|a, b| a.id.cmp(&b.id)),
            SortBy::ForwardRead => {
                samples.sort_by(|a, b| a.forward.as_str().cmp(b.forward.as_str()))
            }
        }
        let index = samples
            .iter()
            .enumerate()
            .map(|(pos, sample)| (sample.id.clone(), pos))
            .collect();
        SampleSheet {
            columns: self.columns.clone(),
            samples,
            index,
        }
    }

    /// A new sheet with every identifier sanitized, in iteration order.
    pub fn rename(&self, filler: &str) -> Result<SampleSheet, QimbaError> {
        let mut counter = NameCounter::new();
        let mut renamed = SampleSheet {
            columns: self.columns.clone(),
            samples: Vec::with_capacity(self.samples.len()),
            index: HashMap::with_capacity(self.samples.len()),
        };
        for sample in &self.samples {
            let id = sanitize_id(&sample.id, filler, &mut counter);
            if id != sample.id {
                debug!(from = %sample.id, to = %id, "renamed sample");
            }
            renamed.add_sample(
                id,
                sample.forward.clone(),
                sample.reverse.clone(),
                Some(sample.attributes.clone()),
            )?;
        }
        Ok(renamed)
    }

    /// Builds a three-column sheet from paired read files.
    ///
    /// With `base`, file paths are written relative to it.
    pub fn from_pairs(pairs: &[PairedSample], base: Option<&Path>) -> Result<Self, QimbaError> {
        let mut sheet = SampleSheet::new();
        for pair in pairs {
            let forward = utf8_relative(&pair.forward, base)?;
            let reverse = pair
                .reverse
                .as_deref()
                .map(|path| utf8_relative(path, base))
                .transpose()?;
            sheet.add_sample(pair.id.clone(), forward, reverse, None)?;
        }
        Ok(sheet)
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, QimbaError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|err| QimbaError::fs(path, err))?;
        Self::parse(&content, path)
    }

    /// Parses sample-sheet text; `origin` is only used in error messages.
    pub fn parse(content: &str, origin: &Path) -> Result<Self, QimbaError> {
        let content = content.strip_prefix('\u{feff}').unwrap_or(content);
        let mut lines = content.lines().enumerate().map(|(idx, line)| (idx + 1, line));

        let header = loop {
            match lines.next() {
                Some((_, line)) if line.trim().is_empty() => continue,
                Some((_, line)) => break line,
                None => {
                    return Err(QimbaError::Schema {
                        path: origin.to_path_buf(),
                        message: "empty mapping file".to_string(),
                    });
                }
            }
        };

        let columns = header
            .split('\t')
            .map(|cell| cell.trim().to_string())
            .collect::<Vec<_>>();
        validate_columns(&columns).map_err(|message| QimbaError::Schema {
            path: origin.to_path_buf(),
            message,
        })?;

        let forward_idx = column_position(&columns, FORWARD_COLUMN);
        let reverse_idx = column_position(&columns, REVERSE_COLUMN);
        let attribute_idx = columns
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(_, col)| !is_reserved(col))
            .map(|(idx, col)| (idx, col.clone()))
            .collect::<Vec<_>>();

        let mut sheet = SampleSheet {
            columns,
            samples: Vec::new(),
            index: HashMap::new(),
        };
        let expected = sheet.columns.len();

        for (line_no, line) in lines {
            if line.trim().is_empty() {
                warn!(
                    "skipping blank line {line_no} in {}",
                    origin.display()
                );
                continue;
            }
            let fields = line.split('\t').collect::<Vec<_>>();
            if fields.len() != expected {
                return Err(QimbaError::RowShape {
                    path: origin.to_path_buf(),
                    line: line_no,
                    expected,
                    found: fields.len(),
                });
            }

            let id = fields[0].trim();
            if id.is_empty() {
                warn!("skipping line {line_no} in {}: empty sample id", origin.display());
                continue;
            }

            let forward = fields[forward_idx];
            if forward.trim().is_empty() {
                return Err(QimbaError::MissingForward(id.to_string()));
            }
            let reverse = fields[reverse_idx];
            let reverse = (!reverse.trim().is_empty()).then(|| Utf8PathBuf::from(reverse));
            let attributes = attribute_idx
                .iter()
                .map(|(idx, col)| (col.clone(), fields[*idx].to_string()))
                .collect();

            sheet.add_sample(id, forward, reverse, Some(attributes))?;
        }

        Ok(sheet)
    }

    /// Renders the sheet as TSV, one row per sample in iteration order.
    pub fn to_tsv(&self, absolute_paths: bool) -> Result<String, QimbaError> {
        let mut out = self.columns.join("\t");
        out.push('\n');
        for sample in &self.samples {
            let mut row = Vec::with_capacity(self.columns.len());
            row.push(sample.id.clone());
            for col in &self.columns[1..] {
                let value = match col.as_str() {
                    FORWARD_COLUMN => render_path(&sample.forward, absolute_paths)?,
                    REVERSE_COLUMN => match &sample.reverse {
                        Some(path) => render_path(path, absolute_paths)?,
                        None => String::new(),
                    },
                    other => sample.get_attr(other).unwrap_or_default().to_string(),
                };
                row.push(value);
            }
            for (col, value) in self.columns.iter().zip(&row) {
                if value.contains(['\t', '\n', '\r']) {
                    return Err(QimbaError::UnencodableCell {
                        sample: sample.id.clone(),
                        column: col.clone(),
                    });
                }
            }
            out.push_str(&row.join("\t"));
            out.push('\n');
        }
        Ok(out)
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>, absolute_paths: bool) -> Result<(), QimbaError> {
        let content = self.to_tsv(absolute_paths)?;
        fs_util::write_atomic(path.as_ref(), content.as_bytes())
    }

    fn column_value<'a>(&self, sample: &'a Sample, attr: &str) -> Option<&'a str> {
        if attr == self.id_column() {
            return Some(sample.id.as_str());
        }
        match attr {
            FORWARD_COLUMN => Some(sample.forward.as_str()),
            REVERSE_COLUMN => sample.reverse.as_ref().map(|path| path.as_str()),
            other => sample.get_attr(other),
        }
    }
}

impl<'a> IntoIterator for &'a SampleSheet {
    type Item = &'a Sample;
    type IntoIter = std::slice::Iter<'a, Sample>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.iter()
    }
}

fn is_reserved(column: &str) -> bool {
    column == FORWARD_COLUMN || column == REVERSE_COLUMN
}

fn column_position(columns: &[String], name: &str) -> usize {
    columns
        .iter()
        .skip(1)
        .position(|col| col == name)
        .map(|pos| pos + 1)
        .unwrap_or(0)
}

fn validate_columns(columns: &[String]) -> Result<(), String> {
    match columns.first() {
        Some(first) if !first.trim().is_empty() => {}
        _ => return Err("first column must contain sample IDs".to_string()),
    }
    let missing = [FORWARD_COLUMN, REVERSE_COLUMN]
        .into_iter()
        .filter(|required| !columns[1..].iter().any(|col| col == required))
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        return Err(format!(
            "missing required columns in mapping file: {}",
            missing.join(", ")
        ));
    }
    let mut seen = HashSet::new();
    for col in columns {
        if col.contains(['\t', '\n', '\r']) {
            return Err(format!("column name {col:?} contains a tab or line break"));
        }
        if !seen.insert(col.as_str()) {
            return Err(format!("duplicate column name: {col}"));
        }
    }
    Ok(())
}

fn render_path(path: &Utf8Path, absolute: bool) -> Result<String, QimbaError> {
    if !absolute {
        return Ok(path.to_string());
    }
    let abs = std::path::absolute(path.as_std_path())
        .map_err(|err| QimbaError::fs(path.as_std_path(), err))?;
    Utf8PathBuf::from_path_buf(abs)
        .map(|abs| abs.into_string())
        .map_err(|abs| QimbaError::Filesystem(format!("non-utf8 path: {}", abs.display())))
}

fn utf8_relative(path: &Path, base: Option<&Path>) -> Result<Utf8PathBuf, QimbaError> {
    let relative = match base {
        Some(base) => path.strip_prefix(base).unwrap_or(path),
        None => path,
    };
    Utf8PathBuf::from_path_buf(relative.to_path_buf())
        .map_err(|path| QimbaError::Filesystem(format!("non-utf8 path: {}", path.display())))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn parse(text: &str) -> Result<SampleSheet, QimbaError> {
        SampleSheet::parse(text, Path::new("mapping.tsv"))
    }

    #[test]
    fn attributes_follow_extra_columns() {
        let sheet = parse("ID\tForward\tReverse\tGroup\nA\ta1.fq\ta2.fq\tctrl\n").unwrap();
        assert_eq!(sheet.attribute_columns().collect::<Vec<_>>(), vec!["Group"]);
        assert_eq!(sheet.get_sample_attr("A", "Group").unwrap(), Some("ctrl"));
        assert_eq!(sheet.get_sample_attr("A", "ID").unwrap(), Some("A"));
        assert_eq!(sheet.get_sample_attr("A", "Nope").unwrap(), None);
    }

    #[test]
    fn reserved_columns_may_come_first() {
        let sheet = parse("name\tReverse\tForward\nA\t\ta1.fq\n").unwrap();
        let sample = sheet.get_sample("A").unwrap();
        assert_eq!(sample.forward, Utf8PathBuf::from("a1.fq"));
        assert_eq!(sample.reverse, None);
    }

    #[test]
    fn header_names_trimmed_values_verbatim() {
        let sheet = parse(" ID \t Forward\tReverse \tNote\nA\ta1.fq \t\t  padded \n").unwrap();
        assert_eq!(sheet.columns(), &["ID", "Forward", "Reverse", "Note"]);
        let sample = sheet.get_sample("A").unwrap();
        assert_eq!(sample.forward.as_str(), "a1.fq ");
        assert_eq!(sample.get_attr("Note"), Some("  padded "));
    }

    #[test]
    fn blank_id_rows_are_skipped() {
        let sheet = parse("ID\tForward\tReverse\n\tx.fq\t\nB\tb1.fq\t\n").unwrap();
        assert_eq!(sheet.ids().collect::<Vec<_>>(), vec!["B"]);
    }

    #[test]
    fn duplicate_header_is_schema_error() {
        let err = parse("ID\tForward\tReverse\tForward\n").unwrap_err();
        assert_matches!(err, QimbaError::Schema { .. });
    }

    #[test]
    fn blank_first_header_is_schema_error() {
        let err = parse(" \tForward\tReverse\n").unwrap_err();
        assert_matches!(err, QimbaError::Schema { .. });
    }

    #[test]
    fn remove_keeps_lookup_consistent() {
        let mut sheet = SampleSheet::new();
        for id in ["a", "b", "c"] {
            sheet
                .add_sample(id, format!("{id}_R1.fq"), None, None)
                .unwrap();
        }
        let removed = sheet.remove_sample("a").unwrap();
        assert_eq!(removed.id, "a");
        assert_eq!(sheet.get_sample("c").unwrap().id, "c");
        assert_matches!(sheet.remove_sample("a"), Err(QimbaError::SampleNotFound(_)));
    }

    #[test]
    fn unknown_attribute_rejected() {
        let mut sheet = SampleSheet::new();
        let attrs = BTreeMap::from([("Depth".to_string(), "5".to_string())]);
        let err = sheet
            .add_sample("a", "a.fq", None, Some(attrs))
            .unwrap_err();
        assert_matches!(err, QimbaError::InvalidArgument(_));
    }

    #[test]
    fn cell_with_tab_cannot_be_saved() {
        let mut sheet = SampleSheet::new();
        sheet.add_column("Note", "").unwrap();
        let attrs = BTreeMap::from([("Note".to_string(), "a\tb".to_string())]);
        sheet.add_sample("a", "a.fq", None, Some(attrs)).unwrap();
        assert_matches!(
            sheet.to_tsv(false),
            Err(QimbaError::UnencodableCell { column, .. }) if column == "Note"
        );
    }

    #[test]
    fn sort_by_parses_aliases() {
        assert_eq!("sample_id".parse::<SortBy>().unwrap(), SortBy::SampleId);
        assert_eq!("FORWARD_READ".parse::<SortBy>().unwrap(), SortBy::ForwardRead);
        assert_matches!("size".parse::<SortBy>(), Err(QimbaError::InvalidSortKey(_)));
    }
}

#![cfg(unix)]

use std::fs;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Output};
use std::sync::Mutex;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use qimba::app::{App, ProgressEvent, ProgressSink};
use qimba::config::RuntimeConfig;
use qimba::error::QimbaError;
use qimba::job::Launcher;
use qimba::sample::{SampleSheet, SortBy};

/// Stands in for USEARCH: copies inputs to the requested outputs and writes
/// a merge summary into the stderr log.
struct FakeUsearch {
    log_dir: PathBuf,
    fail_sample: Option<String>,
    merged_reads: Mutex<u64>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl FakeUsearch {
    fn new(log_dir: &Path) -> Self {
        Self {
            log_dir: log_dir.to_path_buf(),
            fail_sample: None,
            merged_reads: Mutex::new(10),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

fn exit(code: i32) -> Output {
    Output {
        status: ExitStatus::from_raw(code << 8),
        stdout: Vec::new(),
        stderr: Vec::new(),
    }
}

impl Launcher for FakeUsearch {
    fn launch(&self, command: &mut Command) -> io::Result<Output> {
        let args = command
            .get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        self.calls.lock().unwrap().push(args.clone());

        match args[0].as_str() {
            "-fastq_mergepairs" => {
                let id = args[5].trim_end_matches('.');
                if self.fail_sample.as_deref() == Some(id) {
                    return Ok(exit(1));
                }
                fs::copy(&args[1], &args[7])?;
                let log = self.log_dir.join(format!("{id}.merge.err"));
                let mut text = fs::read_to_string(&log).unwrap_or_default();
                let reads = *self.merged_reads.lock().unwrap();
                text.push_str(&format!("Merged ({reads}, 62.5%)\n"));
                fs::write(log, text)?;
            }
            "-fastx_uniques" => {
                fs::write(&args[3], ">s1;size=2\nACGT\n>s2;size=1\nGGCC\n")?;
            }
            other => panic!("unexpected usearch mode {other}"),
        }
        Ok(exit(0))
    }
}

impl Launcher for &FakeUsearch {
    fn launch(&self, command: &mut Command) -> io::Result<Output> {
        (**self).launch(command)
    }
}

struct Recorder(Mutex<Vec<String>>);

impl ProgressSink for Recorder {
    fn event(&self, event: ProgressEvent) {
        self.0.lock().unwrap().push(event.message);
    }
}

fn config(root: &Path) -> RuntimeConfig {
    RuntimeConfig {
        threads: 2,
        tmp_dir: root.join("tmp"),
        log_dir: Some(root.join("logs")),
        ..RuntimeConfig::default()
    }
}

fn utf8(path: PathBuf) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(path).unwrap()
}

/// Writes read files for `ids` and a sheet listing them with absolute paths.
fn write_sheet(root: &Path, ids: &[&str], paired: bool) -> PathBuf {
    let reads = root.join("reads");
    fs::create_dir_all(&reads).unwrap();
    let mut sheet = SampleSheet::new();
    for id in ids {
        let forward = reads.join(format!("{id}_R1.fq"));
        let reverse = reads.join(format!("{id}_R2.fq"));
        fs::write(&forward, format!("@{id}\nACGT\n+\nIIII\n")).unwrap();
        fs::write(&reverse, format!("@{id}\nACGT\n+\nIIII\n")).unwrap();
        let reverse = paired.then(|| utf8(reverse));
        sheet.add_sample(*id, utf8(forward), reverse, None).unwrap();
    }
    let path = root.join("samples.tsv");
    sheet.save_to_file(&path, false).unwrap();
    path
}

#[test]
fn merge_concatenates_in_sheet_order() {
    let dir = tempfile::tempdir().unwrap();
    let sheet = write_sheet(dir.path(), &["B", "A"], true);
    let output = dir.path().join("merged.fastq");
    let launcher = FakeUsearch::new(&dir.path().join("logs"));
    let progress = Recorder(Mutex::new(Vec::new()));
    let app = App::new(config(dir.path()), launcher);

    let result = app.merge(&sheet, &output, &progress).unwrap();

    assert_eq!(
        fs::read_to_string(&output).unwrap(),
        "@B\nACGT\n+\nIIII\n@A\nACGT\n+\nIIII\n"
    );
    assert_eq!(result.bytes_written, 30);
    assert_eq!(result.samples.len(), 2);
    assert_eq!(result.samples[0].id, "B");
    assert_eq!(result.samples[0].merged_reads, Some(10));
    assert_eq!(result.samples[0].merged_percent, Some(62.5));
    assert!(Path::new(&result.temp_dir).starts_with(dir.path().join("tmp")));

    let log = fs::read_to_string(dir.path().join("logs/A.merge.err")).unwrap();
    assert!(log.contains("Command: usearch -fastq_mergepairs"));
    assert!(log.contains("-relabel A. "));
    assert!(progress.0.lock().unwrap().iter().any(|m| m.starts_with("phase=Store")));
}

#[test]
fn merge_stops_at_first_failure() {
    let dir = tempfile::tempdir().unwrap();
    let sheet = write_sheet(dir.path(), &["A", "B", "C"], true);
    let output = dir.path().join("merged.fastq");
    let mut launcher = FakeUsearch::new(&dir.path().join("logs"));
    launcher.fail_sample = Some("B".to_string());
    let app = App::new(config(dir.path()), &launcher);

    let err = app
        .merge(&sheet, &output, &Recorder(Mutex::new(Vec::new())))
        .unwrap_err();

    assert_matches!(err, QimbaError::ProcessFailed { code: Some(1), command, .. } if command.contains("B_R1.fq"));
    assert_eq!(launcher.calls().len(), 2);
    assert!(!output.exists());
}

#[test]
fn merge_refuses_existing_output() {
    let dir = tempfile::tempdir().unwrap();
    let sheet = write_sheet(dir.path(), &["A"], true);
    let output = dir.path().join("merged.fastq");
    fs::write(&output, "keep me").unwrap();
    let launcher = FakeUsearch::new(&dir.path().join("logs"));
    let app = App::new(config(dir.path()), launcher);

    let err = app
        .merge(&sheet, &output, &Recorder(Mutex::new(Vec::new())))
        .unwrap_err();

    assert_matches!(err, QimbaError::OutputExists(path) if path == output);
    assert_eq!(fs::read_to_string(&output).unwrap(), "keep me");
}

#[test]
fn merge_requires_reverse_reads() {
    let dir = tempfile::tempdir().unwrap();
    let sheet = write_sheet(dir.path(), &["A"], false);
    let output = dir.path().join("merged.fastq");
    let launcher = FakeUsearch::new(&dir.path().join("logs"));
    let app = App::new(config(dir.path()), launcher);

    let err = app
        .merge(&sheet, &output, &Recorder(Mutex::new(Vec::new())))
        .unwrap_err();

    assert_matches!(err, QimbaError::MissingReverse(id) if id == "A");
    assert!(!dir.path().join("tmp").exists());
}

#[test]
fn derep_counts_records() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("reads.fa");
    fs::write(&input, ">r1\nACGT\n>r2\nACGT\n>r3\nGGCC\n").unwrap();
    let output = dir.path().join("out/uniques.fa");
    fs::create_dir_all(output.parent().unwrap()).unwrap();
    let launcher = FakeUsearch::new(&dir.path().join("logs"));
    let app = App::new(config(dir.path()), launcher);

    let result = app
        .derep(&input, &output, &Recorder(Mutex::new(Vec::new())))
        .unwrap();

    assert_eq!(result.input_records, Some(3));
    assert_eq!(result.unique_records, Some(2));
    assert!(dir.path().join("logs/uniques.derep.err").exists());
}

#[test]
fn derep_missing_input_launches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("absent.fa");
    let output = dir.path().join("uniques.fa");
    let launcher = FakeUsearch::new(&dir.path().join("logs"));
    let app = App::new(config(dir.path()), &launcher);

    let err = app
        .derep(&input, &output, &Recorder(Mutex::new(Vec::new())))
        .unwrap_err();

    assert_matches!(err, QimbaError::InputMissing(path) if path == input);
    assert!(launcher.calls().is_empty());
}

#[test]
fn derep_passes_thread_count() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("reads.fa");
    fs::write(&input, ">r1\nACGT\n").unwrap();
    let launcher = FakeUsearch::new(&dir.path().join("logs"));
    let app = App::new(config(dir.path()), &launcher);
    app.derep(&input, &dir.path().join("u.fa"), &Recorder(Mutex::new(Vec::new())))
        .unwrap();

    let calls = launcher.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(&calls[0][calls[0].len() - 2..], ["-threads", "2"]);
    assert!(calls[0].contains(&"-sizeout".to_string()));
}

#[test]
fn check_tab_collects_per_file_errors() {
    let dir = tempfile::tempdir().unwrap();
    let good = dir.path().join("good.tsv");
    let ragged = dir.path().join("ragged.tsv");
    fs::write(&good, "a\tb\n1\t2\n").unwrap();
    fs::write(&ragged, "a\tb\n1\t2\t3\n").unwrap();
    let app = App::new(config(dir.path()), FakeUsearch::new(dir.path()));

    let lenient = app.check_tab(&[good.clone(), ragged.clone()], None);
    assert!(!lenient.strict);
    assert!(!lenient.has_errors());
    assert!(!lenient.files[1].shape.as_ref().unwrap().is_consistent());

    let strict = app.check_tab(&[good, ragged], Some(true));
    assert!(strict.files[0].error.is_none());
    assert!(strict.files[1].error.is_some());
}

#[test]
fn dada2_split_writes_both_files() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("seqtab.tsv");
    fs::write(&input, "sequence\tS1\tS2\nACGT\t3\t4\nGGCC\t0\t1\n").unwrap();
    let app = App::new(config(dir.path()), FakeUsearch::new(dir.path()));

    let result = app.dada2_split(&input, &dir.path().join("asvs")).unwrap();

    assert_eq!(result.sequences, 2);
    assert_eq!(result.samples, 2);
    assert_eq!(
        fs::read_to_string(&result.fasta).unwrap(),
        ">ASV1 counts=7\nACGT\n>ASV2 counts=1\nGGCC\n"
    );
    assert_eq!(
        fs::read_to_string(&result.table).unwrap(),
        "sequence\tS1\tS2\nASV1\t3\t4\nASV2\t0\t1\n"
    );
}

#[test]
fn merge_reports_latest_run_when_logs_accumulate() {
    let dir = tempfile::tempdir().unwrap();
    let sheet = write_sheet(dir.path(), &["A"], true);
    let launcher = FakeUsearch::new(&dir.path().join("logs"));
    let app = App::new(config(dir.path()), &launcher);
    let progress = Recorder(Mutex::new(Vec::new()));

    let first = app
        .merge(&sheet, &dir.path().join("first.fastq"), &progress)
        .unwrap();
    *launcher.merged_reads.lock().unwrap() = 90;
    let second = app
        .merge(&sheet, &dir.path().join("second.fastq"), &progress)
        .unwrap();

    assert_eq!(first.samples[0].merged_reads, Some(10));
    assert_eq!(second.samples[0].merged_reads, Some(90));
    let log = fs::read_to_string(dir.path().join("logs/A.merge.err")).unwrap();
    assert_eq!(log.matches("Command: usearch").count(), 2);
}

#[test]
fn sort_samples_renames_then_sorts() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("mapping.tsv");
    fs::write(
        &input,
        "Sample ID\tForward\tReverse\tSite\n\
         z.1\tz_R1.fq\t\tgut\n\
         3a\tc_R1.fq\tc_R2.fq\tsoil\n\
         m-1\tm_R1.fq\t\tgut\n",
    )
    .unwrap();
    let app = App::new(config(dir.path()), FakeUsearch::new(dir.path()));
    let output = dir.path().join("sorted.tsv");

    let result = app
        .sort_samples(&input, &output, SortBy::SampleId, Some("_"), false)
        .unwrap();

    assert!(result.renamed);
    assert_eq!(result.samples, 3);
    assert_eq!(
        fs::read_to_string(&output).unwrap(),
        "Sample ID\tForward\tReverse\tSite\n\
         Sample_3a\tc_R1.fq\tc_R2.fq\tsoil\n\
         m_1\tm_R1.fq\t\tgut\n\
         z_1\tz_R1.fq\t\tgut\n"
    );
}

#[test]
fn relative_outputs_land_in_configured_output_dir() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("mapping.tsv");
    fs::write(&input, "ID\tForward\tReverse\nb\tb.fq\t\na\ta.fq\t\n").unwrap();
    let config = RuntimeConfig {
        output_dir: dir.path().join("results"),
        ..config(dir.path())
    };
    let app = App::new(config, FakeUsearch::new(dir.path()));

    let result = app
        .sort_samples(&input, Path::new("sorted.tsv"), SortBy::SampleId, None, false)
        .unwrap();

    let written = dir.path().join("results/sorted.tsv");
    assert_eq!(Path::new(&result.output), written);
    assert_eq!(
        fs::read_to_string(&written).unwrap(),
        "ID\tForward\tReverse\na\ta.fq\t\nb\tb.fq\t\n"
    );
    assert_eq!(app.resolve_output(&input), input);
}

#[test]
fn show_samples_resolves_every_column() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("mapping.tsv");
    fs::write(&input, "ID\tForward\tReverse\tSite\na\ta.fq\t\tgut\n").unwrap();
    let app = App::new(config(dir.path()), FakeUsearch::new(dir.path()));

    let result = app.show_samples(&input, None).unwrap();

    let sample = &result.samples[0];
    assert_eq!(sample.value("ID"), Some("a"));
    assert_eq!(sample.value("Forward"), Some("a.fq"));
    assert_eq!(sample.value("Reverse"), None);
    assert_eq!(sample.value("Site"), Some("gut"));
}

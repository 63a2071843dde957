use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use qimba::app::{App, MappingRequest, ProgressSink};
use qimba::config::ConfigLoader;
use qimba::error::QimbaError;
use qimba::job::SystemLauncher;
use qimba::output::{JsonOutput, OutputMode, StderrProgress, TextOutput};
use qimba::pairing::{PairingMode, PairingRules};
use qimba::sample::SortBy;

#[derive(Parser)]
#[command(name = "qimba")]
#[command(about = "Qimba - amplicon bioinformatics toolkit")]
#[command(version, author)]
struct Cli {
    /// Path to config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print progress information
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Generate a sample mapping file from a directory of sequence files")]
    MakeMapping(MakeMappingArgs),
    #[command(about = "Display sample information from a mapping file")]
    ShowSamples(ShowSamplesArgs),
    #[command(about = "Sort (and optionally rename) the samples of a mapping file")]
    SortSamples(SortSamplesArgs),
    #[command(about = "Dereplicate FASTA sequences using USEARCH")]
    Derep(DerepArgs),
    #[command(about = "Merge paired ends into a single file using USEARCH")]
    Merge(MergeArgs),
    #[command(about = "Check TSV files for their dimensions and consistency")]
    CheckTab(CheckTabArgs),
    #[command(about = "Split a DADA2 TSV file into FASTA and simplified TSV")]
    Dada2Split(Dada2SplitArgs),
    #[command(about = "Print the version of qimba")]
    Version,
}

#[derive(Args)]
struct MakeMappingArgs {
    input_dir: PathBuf,

    /// Output mapping file (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// File extension to look for
    #[arg(short, long, default_value = ".fastq.gz")]
    ext: String,

    /// Forward read tag
    #[arg(short = '1', long, default_value = "_R1")]
    tag_for: String,

    /// Reverse read tag
    #[arg(short = '2', long, default_value = "_R2")]
    tag_rev: String,

    /// Additional string to strip from filenames
    #[arg(short, long, default_value = "")]
    strip: String,

    /// Report every pairing problem instead of stopping at the first
    #[arg(long)]
    collect_errors: bool,

    /// Sanitize sample ids, replacing unsafe characters with FILLER
    #[arg(long, value_name = "FILLER", num_args = 0..=1, default_missing_value = "_")]
    sanitize: Option<String>,

    /// Write absolute read paths instead of paths relative to INPUT_DIR
    #[arg(long)]
    absolute: bool,
}

#[derive(Args)]
struct ShowSamplesArgs {
    mapping_file: PathBuf,

    /// Show specific attribute for all samples
    #[arg(long)]
    attr: Option<String>,
}

#[derive(Args)]
struct SortSamplesArgs {
    mapping_file: PathBuf,

    #[arg(short, long)]
    output: PathBuf,

    #[arg(long, value_enum, default_value = "id")]
    by: SortBy,

    /// Sanitize sample ids with FILLER before sorting
    #[arg(long, value_name = "FILLER")]
    rename: Option<String>,

    #[arg(long)]
    absolute: bool,
}

#[derive(Args)]
struct DerepArgs {
    /// Input FASTA file to dereplicate
    #[arg(short, long)]
    input_fasta: PathBuf,

    /// Output FASTA file with unique sequences
    #[arg(short, long)]
    output: PathBuf,

    /// Number of threads (overrides config value)
    #[arg(long)]
    threads: Option<usize>,
}

#[derive(Args)]
struct MergeArgs {
    /// Input samplesheet
    #[arg(short, long)]
    input_samplesheet: PathBuf,

    /// Output FASTQ file
    #[arg(short, long)]
    output: PathBuf,

    /// Temporary directory (overrides config value)
    #[arg(long)]
    tmp_dir: Option<PathBuf>,

    /// Number of threads (overrides config value)
    #[arg(long)]
    threads: Option<usize>,
}

#[derive(Args)]
struct CheckTabArgs {
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Strictly enforce consistent column counts
    #[arg(long, overrides_with = "no_strict")]
    strict: bool,

    #[arg(long, overrides_with = "strict")]
    no_strict: bool,
}

#[derive(Args)]
struct Dada2SplitArgs {
    input_file: PathBuf,

    /// Output basename (without extension)
    #[arg(short, long)]
    output: PathBuf,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(qimba) = report.downcast_ref::<QimbaError>() {
            return ExitCode::from(map_exit_code(qimba));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &QimbaError) -> u8 {
    match error {
        QimbaError::ProcessFailed { .. }
        | QimbaError::OutputMissing(_)
        | QimbaError::Spawn { .. } => 3,
        QimbaError::InputMissing(_)
        | QimbaError::SampleNotFound(_)
        | QimbaError::Schema { .. }
        | QimbaError::RowShape { .. }
        | QimbaError::DuplicateSample(_)
        | QimbaError::DuplicateFile { .. }
        | QimbaError::MissingForward(_)
        | QimbaError::MissingReverse(_)
        | QimbaError::PairingIssues { .. }
        | QimbaError::NoSamples { .. }
        | QimbaError::OutputExists(_) => 2,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if matches!(cli.command, Commands::Version) {
        println!("qimba version {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Text
    };
    let progress = StderrProgress {
        verbose: cli.verbose,
    };
    let sink: &dyn ProgressSink = match mode {
        OutputMode::Json => &JsonOutput,
        OutputMode::Text => &progress,
    };
    let config = ConfigLoader::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::MakeMapping(args) => {
            let app = App::new(config, SystemLauncher);
            let request = MappingRequest {
                rules: PairingRules::new(args.ext, args.strip, args.tag_for, args.tag_rev)?,
                input_dir: args.input_dir,
                mode: if args.collect_errors {
                    PairingMode::CollectAll
                } else {
                    PairingMode::FailFast
                },
                sanitize: args.sanitize,
                absolute_paths: args.absolute,
            };
            let sheet = app.make_mapping(&request, sink)?;
            match args.output {
                Some(path) => {
                    let path = app.resolve_output(&path);
                    sheet.save_to_file(&path, false)?;
                    eprintln!("Created mapping file: {}", path.display());
                }
                None => {
                    let tsv = sheet.to_tsv(false)?;
                    io::stdout().write_all(tsv.as_bytes()).into_diagnostic()?;
                }
            }
            Ok(())
        }
        Commands::ShowSamples(args) => {
            let app = App::new(config, SystemLauncher);
            let result = app.show_samples(&args.mapping_file, args.attr.as_deref())?;
            emit(mode, &result, TextOutput::render_show)
        }
        Commands::SortSamples(args) => {
            let app = App::new(config, SystemLauncher);
            let result = app.sort_samples(
                &args.mapping_file,
                &args.output,
                args.by,
                args.rename.as_deref(),
                args.absolute,
            )?;
            emit(mode, &result, TextOutput::render_sort)
        }
        Commands::Derep(args) => {
            let app = App::new(config.with_overrides(args.threads, None), SystemLauncher);
            let result = app.derep(&args.input_fasta, &args.output, sink)?;
            emit(mode, &result, TextOutput::render_derep)
        }
        Commands::Merge(args) => {
            let app = App::new(
                config.with_overrides(args.threads, args.tmp_dir),
                SystemLauncher,
            );
            let result = app.merge(&args.input_samplesheet, &args.output, sink)?;
            emit(mode, &result, TextOutput::render_merge)
        }
        Commands::CheckTab(args) => {
            let app = App::new(config, SystemLauncher);
            let strict = match (args.strict, args.no_strict) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            let result = app.check_tab(&args.files, strict);
            emit(mode, &result, TextOutput::render_check_tab)?;
            for item in &result.files {
                if let Some(error) = &item.error {
                    eprintln!("Error: {}: {error}", item.file);
                }
            }
            if result.has_errors() {
                return Err(miette::Report::msg("one or more files failed the check"));
            }
            Ok(())
        }
        Commands::Dada2Split(args) => {
            let app = App::new(config, SystemLauncher);
            let result = app.dada2_split(&args.input_file, &args.output)?;
            emit(mode, &result, TextOutput::render_dada2)
        }
        Commands::Version => Ok(()),
    }
}

fn emit<T: serde::Serialize>(
    mode: OutputMode,
    value: &T,
    render: fn(&T) -> String,
) -> miette::Result<()> {
    match mode {
        OutputMode::Json => JsonOutput::print(value).into_diagnostic(),
        OutputMode::Text => {
            let mut stdout = io::stdout();
            stdout
                .write_all(render(value).as_bytes())
                .into_diagnostic()
        }
    }
}

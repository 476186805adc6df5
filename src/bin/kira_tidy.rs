use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use kira_run_tidy::app::{App, ConfigOptions, TracingProgress};
use kira_run_tidy::domain::TidyPolicy;
use kira_run_tidy::error::TidyError;
use kira_run_tidy::output::{JsonOutput, OutputMode, TextOutput};
use kira_run_tidy::scanner::ScanRoots;

#[derive(Parser)]
#[command(name = "kira-tidy")]
#[command(about = "Archive, compress and reorganise nanopore run directories")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Scan a run directory and write a tidy manifest")]
    Config(ConfigArgs),
    #[command(about = "Tidy a run directory using a manifest written by `config`")]
    Tidy(TidyArgs),
}

#[derive(Args)]
struct ConfigArgs {
    #[arg(long, help = "Run directory; other roots default relative to it")]
    run_dir: Utf8PathBuf,

    #[arg(long, help = "Raw-signal root [default: <run-dir>/fast5]")]
    raw_dir: Option<Utf8PathBuf>,

    #[arg(long, help = "Sequence-file root [default: <run-dir>/fastq]")]
    fastq_dir: Option<Utf8PathBuf>,

    #[arg(long, help = "Summary-file root [default: <run-dir>]")]
    summary_dir: Option<Utf8PathBuf>,

    #[arg(long, help = "Where tidied artifacts go [default: <run-dir>]")]
    dest_dir: Option<Utf8PathBuf>,

    #[arg(long, help = "Manifest file to create")]
    output: Utf8PathBuf,

    #[arg(long, help = "Validate and repair fastq files before adding them")]
    sanitiser: bool,

    #[arg(long, help = "Run is still writing: leave the newest raw folder alone")]
    active: bool,

    #[arg(long, help = "Treat a newest raw folder containing this file as finished")]
    complete_marker: Option<String>,
}

#[derive(Args)]
struct TidyArgs {
    #[arg(long, help = "Manifest written by `config`")]
    config: Utf8PathBuf,

    #[arg(long, help = "Keep the original files")]
    keep: bool,

    #[arg(long, help = "Only report what would be done")]
    dry_run: bool,

    #[arg(long, help = "Replace artifacts that already exist")]
    overwrite: bool,

    #[arg(long, default_value_t = 1, help = "Entries processed simultaneously")]
    threads: usize,

    #[arg(long, help = "Do not append to the checksum ledgers")]
    no_checksums: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(tidy) = report.downcast_ref::<TidyError>() {
            return ExitCode::from(map_exit_code(tidy));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &TidyError) -> u8 {
    match error {
        TidyError::Scan { .. }
        | TidyError::Manifest(_)
        | TidyError::ConfigRead(_)
        | TidyError::ConfigParse(_) => 2,
        TidyError::Precondition(_) => 3,
        TidyError::NothingCompleted { .. } => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Text
    };

    match cli.command {
        Commands::Config(args) => run_config(args, output_mode),
        Commands::Tidy(args) => run_tidy(args, output_mode),
    }
}

fn run_config(args: ConfigArgs, output_mode: OutputMode) -> miette::Result<()> {
    let defaults = ScanRoots::from_run_dir(&args.run_dir);
    let roots = ScanRoots {
        raw_root: args.raw_dir.unwrap_or(defaults.raw_root),
        sequence_root: args.fastq_dir.unwrap_or(defaults.sequence_root),
        summary_root: args.summary_dir.unwrap_or(defaults.summary_root),
    };
    let options = ConfigOptions {
        destination: args.dest_dir.unwrap_or_else(|| args.run_dir.clone()),
        output: args.output,
        sanitiser: args.sanitiser,
        active: args.active,
        complete_marker: args.complete_marker,
    };

    let result = App::config(&roots, &options, &TracingProgress)?;
    match output_mode {
        OutputMode::Json => JsonOutput::print_config(&result).into_diagnostic(),
        OutputMode::Text => TextOutput::print_config(&result).into_diagnostic(),
    }
}

fn run_tidy(args: TidyArgs, output_mode: OutputMode) -> miette::Result<()> {
    let policy = TidyPolicy {
        keep: args.keep,
        dry_run: args.dry_run,
        overwrite: args.overwrite,
        concurrency: args.threads,
        checksums: !args.no_checksums,
    };

    let report = App::tidy(&args.config, policy, &TracingProgress)?;
    match output_mode {
        OutputMode::Json => JsonOutput::print_tidy(&report).into_diagnostic()?,
        OutputMode::Text => TextOutput::print_tidy(&report).into_diagnostic()?,
    }

    if report.nothing_completed() {
        return Err(TidyError::NothingCompleted {
            failed: report.failed,
        }
        .into());
    }
    Ok(())
}

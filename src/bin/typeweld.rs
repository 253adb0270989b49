//! Command-line entry point.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use typeweld::batch::{discover_files, dump_annotations, run_batch, BatchOptions};
use typeweld::plan::Style;
use typeweld::types::MergeOptions;
use typeweld::WeldError;

#[derive(Debug, Parser)]
#[command(
    name = "typeweld",
    version,
    about = "Weld runtime-observed types into Python sources as annotations"
)]
struct Cli {
    /// JSON file with runtime-collected type observations.
    #[arg(long = "type-info", value_name = "FILE", default_value = "type_info.json")]
    type_info: PathBuf,

    /// Python files or directories to annotate.
    #[arg(value_name = "FILE")]
    files: Vec<PathBuf>,

    /// Write changes in place instead of printing diffs.
    #[arg(short, long)]
    write: bool,

    /// Annotation style.
    #[arg(long, value_enum, default_value = "comment")]
    style: StyleArg,

    /// Print the merged signatures and exit without touching any file.
    #[arg(short, long)]
    dump: bool,

    /// Suppress diff output; only per-file summaries are printed.
    #[arg(short, long)]
    quiet: bool,

    /// Increase log verbosity (-v info, -vv debug).
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Widen unions with more than this many members to Any.
    #[arg(long, value_name = "N")]
    max_union_members: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StyleArg {
    /// `# type: (...) -> R` comment on the first suite line.
    Comment,
    /// Inline parameter and return annotations.
    Inline,
}

impl From<StyleArg> for Style {
    fn from(style: StyleArg) -> Style {
        match style {
            StyleArg::Comment => Style::Comment,
            StyleArg::Inline => Style::Inline,
        }
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("typeweld: {err}");
            ExitCode::from(err.exit_status().code())
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode, WeldError> {
    let merge = MergeOptions {
        max_union_members: cli.max_union_members,
    };

    if cli.dump {
        let dump = dump_annotations(&cli.type_info, &cli.files, &merge)?;
        print!("{dump}");
        return Ok(ExitCode::SUCCESS);
    }

    if cli.files.is_empty() {
        return Err(WeldError::invalid_args(
            "no files given; pass Python files or directories, or use --dump",
        ));
    }

    let files = discover_files(&cli.files);
    let options = BatchOptions {
        style: cli.style.into(),
        write: cli.write,
        merge,
    };
    let report = run_batch(&cli.type_info, &files, &options)?;

    let mut stdout = std::io::stdout().lock();
    for file in &report.files {
        if !cli.quiet && !file.diff.is_empty() {
            let _ = stdout.write_all(file.diff.as_bytes());
        }
        if let Some(error) = &file.error {
            let _ = writeln!(stdout, "{}: failed: {}", file.path, error);
        } else if !file.annotated.is_empty() {
            let _ = writeln!(
                stdout,
                "{}: {} function{} {}",
                file.path,
                file.annotated.len(),
                if file.annotated.len() == 1 { "" } else { "s" },
                if file.written { "annotated" } else { "to annotate" },
            );
        }
    }

    Ok(ExitCode::from(report.exit_status().code()))
}

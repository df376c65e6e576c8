// File Cipher - command-line front end
// =======================================================
// Encrypts or decrypts a set of files and directories as one batch. Each
// file becomes its own `.enc` container; directories are expanded
// recursively. Progress is drawn with a progress bar, log lines go through
// `tracing` (filter with RUST_LOG).

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::metadata::LevelFilter;
use tracing::warn;
use tracing_subscriber::{prelude::*, EnvFilter};
use walkdir::WalkDir;

use file_cipher::container;
use file_cipher::progress::format_duration;
use file_cipher::{
    BatchEvent, BatchJob, BatchReport, BatchRunner, Mode, OutputPolicy, StagingOptions,
    StructureOptions, TracingSink,
};

/// Per-file AES-256 encryption for files and folders
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encrypt files into .enc containers
    Encrypt(JobArgs),
    /// Decrypt .enc containers back to their original names
    Decrypt(JobArgs),
}

#[derive(Args)]
struct JobArgs {
    /// Files or directories to process (directories are walked recursively)
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Password the key is derived from
    #[arg(short, long, env = "FILE_CIPHER_PASSWORD", hide_env_values = true)]
    password: String,

    /// Write outputs into this directory instead of next to each source
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Mirror the inputs' folder structure under the output directory
    #[arg(long, requires = "output")]
    preserve_structure: bool,

    /// Give containers random names (the real name stays inside)
    #[arg(long)]
    obfuscate_names: bool,

    /// Encode folder names when preserving structure
    #[arg(long, requires = "preserve_structure")]
    obfuscate_dirs: bool,

    /// Stage outputs in this scratch directory, then move them into place
    #[arg(long, value_name = "DIR", requires = "output")]
    staging: Option<PathBuf>,

    /// Delete the originals of every file processed successfully
    #[arg(long)]
    delete_originals: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env()?,
        )
        .init();

    let cli = Cli::parse();
    let (mode, args) = match cli.command {
        Commands::Encrypt(args) => (Mode::Encrypt, args),
        Commands::Decrypt(args) => (Mode::Decrypt, args),
    };

    let files = expand_inputs(&args.paths, mode);
    if files.is_empty() {
        bail!("nothing to {}", mode.verb().to_lowercase());
    }

    let job = BatchJob {
        files,
        password: args.password,
        mode,
        output: args
            .output
            .map(OutputPolicy::Directory)
            .unwrap_or(OutputPolicy::InPlace),
        structure: StructureOptions {
            preserve: args.preserve_structure,
            obfuscate_dirs: args.obfuscate_dirs,
            obfuscate_names: args.obfuscate_names,
        },
        staging: args.staging.map(StagingOptions::at).unwrap_or_default(),
        chunk_size: None,
    };

    let started = Instant::now();
    let handle = BatchRunner::spawn(job, Arc::new(TracingSink)).context("Failed to start batch")?;

    let bar = progress_bar();
    for event in handle.events().iter() {
        match event {
            BatchEvent::Progress { status, percent } => {
                bar.set_position(percent.into());
                bar.set_message(status);
            }
            // Already written by the tracing sink.
            BatchEvent::Log { .. } => {}
            BatchEvent::Finished(_) => bar.finish_and_clear(),
        }
    }
    bar.finish_and_clear();

    let report = handle.wait().context("Batch failed")?;
    print_summary(mode, &report, started);

    if args.delete_originals {
        let removed = report.delete_sources(&TracingSink);
        println!("Deleted {removed} original file(s)");
    }

    if !report.fail.is_empty() {
        bail!("{} file(s) failed", report.fail.len());
    }
    Ok(())
}

/// Expand directories into the files below them.
///
/// For decryption only containers are picked up from directories; explicitly
/// named files are passed through untouched so missing ones are reported by
/// the batch.
fn expand_inputs(paths: &[PathBuf], mode: Mode) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for path in paths {
        if !path.is_dir() {
            files.push(path.clone());
            continue;
        }
        for entry in WalkDir::new(path).sort_by_file_name() {
            match entry {
                Ok(entry) if entry.file_type().is_file() => {
                    if mode == Mode::Encrypt || is_container(entry.path()) {
                        files.push(entry.into_path());
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable entry"),
            }
        }
    }
    files
}

fn is_container(path: &Path) -> bool {
    path.extension().map_or(false, |ext| ext == container::EXTENSION)
}

fn progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(100);
    let style = ProgressStyle::with_template("{spinner} [{bar:40}] {pos:>3}% {elapsed_precise} {msg}")
        .map(|style| style.progress_chars("=>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    bar.set_style(style);
    bar
}

fn print_summary(mode: Mode, report: &BatchReport, started: Instant) {
    println!(
        "{} complete in {}: {} succeeded, {} failed, {} skipped",
        mode.verb(),
        format_duration(started.elapsed()),
        report.success.len(),
        report.fail.len(),
        report.skipped
    );
    for (source, reason) in &report.fail {
        println!("  failed: {} ({reason})", source.display());
    }
    if report.stopped {
        println!("Batch was stopped before all files were processed");
    }
    if let Some(write_back) = report.write_back.as_ref().filter(|wb| !wb.is_complete()) {
        println!(
            "Write-back incomplete: {} entries remain in {}",
            write_back.unresolved.len(),
            write_back.staging_root.display()
        );
    }
}

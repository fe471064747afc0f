//! mpi_installer - Tale of Two Wastelands MPI package installer
//!
//! Command-line front-end: argument parsing, the progress printer thread,
//! and the interactive continue-on-failed-checks prompt. All installation
//! semantics live in the library.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use tracing_subscriber::EnvFilter;

use mpi_installer::installer::{InstallConfig, Installer, ProgressEvent};
use mpi_installer::manifest::{Manifest, MANIFEST_ENTRY};
use mpi_installer::{bsa, paths};

#[derive(Parser)]
#[command(name = "mpi_installer")]
#[command(version)]
#[command(about = "Installs Tale of Two Wastelands .mpi packages")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging (use RUST_LOG for finer control)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Install an MPI package
    Install {
        /// Path to the .mpi file or an extracted package directory
        #[arg(long)]
        mpi: PathBuf,

        /// Fallout 3 installation directory
        #[arg(long)]
        fo3: Option<PathBuf>,

        /// Fallout New Vegas installation directory
        #[arg(long)]
        fnv: Option<PathBuf>,

        /// Oblivion installation directory
        #[arg(long)]
        tes4: Option<PathBuf>,

        /// Destination directory for the installed files
        #[arg(long)]
        dest: PathBuf,

        /// Override the Fallout 3 data directory (defaults to <fo3>/Data)
        #[arg(long)]
        fo3_data: Option<PathBuf>,

        /// Override the Fallout New Vegas data directory
        #[arg(long)]
        fnv_data: Option<PathBuf>,

        /// Override the Oblivion data directory
        #[arg(long)]
        tes4_data: Option<PathBuf>,

        /// Continue past failed validation checks without prompting
        #[arg(short, long)]
        yes: bool,
    },

    /// Show information about an MPI package
    Info {
        /// Path to the .mpi file or an extracted package directory
        mpi: PathBuf,
    },

    /// List files inside a BSA archive
    ListBsa {
        /// Path to the BSA file
        bsa_file: PathBuf,
    },

    /// Extract a single file from a BSA archive
    ExtractBsa {
        /// Path to the BSA file
        bsa_file: PathBuf,
        /// Internal path of the file to extract
        file_path: String,
        /// Output file path
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose || std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env().add_directive(
                if cli.verbose {
                    "mpi_installer=debug".parse()?
                } else {
                    "mpi_installer=warn".parse()?
                },
            ))
            .init();
    }

    match cli.command {
        Commands::Install {
            mpi,
            fo3,
            fnv,
            tes4,
            dest,
            fo3_data,
            fnv_data,
            tes4_data,
            yes,
        } => {
            let config = InstallConfig {
                package_path: mpi,
                destination: dest,
                fo3_root: fo3,
                fnv_root: fnv,
                tes4_root: tes4,
                fo3_data,
                fnv_data,
                tes4_data,
                assume_yes: yes,
            };
            run_install(config)
        }
        Commands::Info { mpi } => show_info(&mpi),
        Commands::ListBsa { bsa_file } => list_bsa(&bsa_file),
        Commands::ExtractBsa {
            bsa_file,
            file_path,
            output,
        } => extract_bsa(&bsa_file, &file_path, &output),
    }
}

fn timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}

fn run_install(config: InstallConfig) -> Result<()> {
    let (tx, rx) = mpsc::channel::<ProgressEvent>();

    // The printer drains the channel on its own thread; producers never
    // block on the terminal
    let printer = std::thread::spawn(move || {
        for event in rx {
            println!("[{}] {} ({}%)", timestamp(), event.message, event.percent);
        }
    });

    let result = Installer::new(config).run(Some(tx), &prompt_continue);
    // Channel closed by run(); let the printer finish its backlog
    let _ = printer.join();

    let stats = result?;
    println!();
    println!(
        "Assets: {}/{} succeeded, {} failed, {} missing",
        stats.assets_succeeded, stats.assets_total, stats.assets_failed, stats.missing_files
    );
    if stats.collisions > 0 {
        println!(
            "{} entry collisions recorded (see {})",
            stats.collisions,
            bsa::COLLISION_REPORT_NAME
        );
    }
    if stats.post_commands_failed > 0 {
        println!("{} post-commands failed", stats.post_commands_failed);
    }

    if !stats.is_success() {
        bail!("Installation finished with errors; see the installation log");
    }
    println!("Installation complete");
    Ok(())
}

/// Ask whether to continue after failed validation checks.
fn prompt_continue(report: &str) -> bool {
    eprintln!("\nValidation failed:\n{report}\n");
    eprint!("Continue anyway? [y/N] ");
    let _ = std::io::stderr().flush();

    let mut answer = String::new();
    if std::io::stdin().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

/// Load a package's manifest without a full extraction.
fn load_manifest(package: &Path) -> Result<Manifest> {
    if package.is_dir() {
        return Manifest::load(&package.join(MANIFEST_ENTRY));
    }
    let handle = bsa::BsaReaderHandle::open(package)?;
    let data = handle
        .extract(MANIFEST_ENTRY)
        .with_context(|| format!("Package has no {MANIFEST_ENTRY}"))?;
    Manifest::parse(&String::from_utf8_lossy(&data))
}

fn show_info(package: &Path) -> Result<()> {
    let manifest = load_manifest(package)?;

    println!("Title:       {}", manifest.package.title);
    println!("Version:     {}", manifest.package.version);
    println!("Author:      {}", manifest.package.author);
    if !manifest.package.description.is_empty() {
        println!("Description: {}", manifest.package.description);
    }
    println!();
    println!("Profiles:    {}", manifest.profile_count());
    println!("Checks:      {}", manifest.checks.len());
    println!("Post-cmds:   {}", manifest.post_commands.len());

    let mut by_op: Vec<(&str, usize)> = Vec::new();
    for asset in &manifest.assets {
        match by_op.iter_mut().find(|(label, _)| *label == asset.op.label()) {
            Some((_, count)) => *count += 1,
            None => by_op.push((asset.op.label(), 1)),
        }
    }
    println!("Assets:      {}", manifest.assets.len());
    for (label, count) in by_op {
        println!("  {count:>8}  {label}");
    }
    if manifest.skipped_assets > 0 {
        println!("  {:>8}  (skipped as malformed)", manifest.skipped_assets);
    }
    Ok(())
}

fn list_bsa(bsa_file: &Path) -> Result<()> {
    let handle = bsa::BsaReaderHandle::open(bsa_file)?;
    let mut entries = handle.entries();
    entries.sort();
    for entry in &entries {
        println!("{entry}");
    }
    eprintln!("{} files", entries.len());
    Ok(())
}

fn extract_bsa(bsa_file: &Path, file_path: &str, output: &Path) -> Result<()> {
    let handle = bsa::BsaReaderHandle::open(bsa_file)?;
    let data = handle.extract(file_path)?;
    paths::ensure_parent_dirs(output)?;
    std::fs::write(output, &data)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!("Extracted {} ({} bytes)", output.display(), data.len());
    Ok(())
}

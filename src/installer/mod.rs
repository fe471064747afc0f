//! Installation orchestrator
//!
//! Fixed pipeline per run:
//! extract -> load -> validate -> dispatch (new, copy, patch, resample,
//! transcode) -> pack BSAs -> post-commands -> report -> cleanup.
//!
//! The driver thread is the only state advancer; workers report back
//! through counters and the installation log. Cleanup (scratch and staging
//! directories) runs on every exit path, success or failure.

pub mod config;
pub mod extract;
pub mod handlers;
pub mod log;
pub mod postcmd;
pub mod processor;
pub mod resolver;
pub mod scheduler;
pub mod verify;

pub use config::InstallConfig;
pub use scheduler::{ProgressEvent, ProgressReporter};

use anyhow::{bail, Context, Result};
use std::fs;
use std::sync::mpsc::Sender;
use tracing::{info, warn};

use crate::manifest::{Manifest, INSTALL_PROFILE};
use crate::scratch;
use extract::PackageSource;
use processor::{ProcessContext, Tools};

/// Installation statistics
#[derive(Debug, Default)]
pub struct InstallStats {
    pub assets_total: usize,
    pub assets_succeeded: usize,
    pub assets_failed: usize,
    pub missing_files: usize,
    pub bsa_failures: usize,
    pub post_commands_failed: usize,
    pub collisions: usize,
}

impl InstallStats {
    pub fn is_success(&self) -> bool {
        self.assets_failed == 0 && self.missing_files == 0 && self.bsa_failures == 0
    }
}

/// Main installer driver
pub struct Installer {
    config: InstallConfig,
}

impl Installer {
    pub fn new(config: InstallConfig) -> Self {
        Self { config }
    }

    /// Run the full installation.
    ///
    /// `progress` feeds the caller's printer thread; `confirm` is asked
    /// whether to continue when validation fails (unless `assume_yes`).
    pub fn run(
        &self,
        progress: Option<Sender<ProgressEvent>>,
        confirm: &dyn Fn(&str) -> bool,
    ) -> Result<InstallStats> {
        // Leftovers from crashed prior runs go first
        let swept = scratch::sweep_stale();
        if swept > 0 {
            info!("Swept {swept} stale scratch directories");
        }

        let result = self.run_pipeline(progress, confirm);

        // Cleanup runs on every terminal state
        scratch::cleanup_all();
        result
    }

    fn run_pipeline(
        &self,
        progress: Option<Sender<ProgressEvent>>,
        confirm: &dyn Fn(&str) -> bool,
    ) -> Result<InstallStats> {
        self.config.validate().context("Invalid configuration")?;
        fs::create_dir_all(&self.config.destination).with_context(|| {
            format!(
                "Failed to create destination: {}",
                self.config.destination.display()
            )
        })?;

        let startup = ProgressReporter::new(progress.clone(), 0);

        // Extract
        startup.emit(format!(
            "Extracting package {}",
            self.config.package_path.display()
        ));
        let package = PackageSource::open(&self.config.package_path)?;

        // Load
        let manifest = Manifest::load(&package.manifest_path())?;
        info!(
            "Package: {} {} by {}",
            manifest.package.title, manifest.package.version, manifest.package.author
        );
        let locations = manifest.locations(INSTALL_PROFILE)?;
        manifest.check_asset_locations(INSTALL_PROFILE)?;

        // Validate
        startup.emit(format!("Running {} checks", manifest.checks.len()));
        let validation = verify::run_checks(
            &manifest.checks,
            locations,
            &resolver::LocationResolver::new(&self.config),
        );
        if validation.passed {
            startup.emit(format!("{} checks passed", validation.checks_run));
        } else {
            warn!("Validation failed:\n{}", validation.report);
            if !self.config.assume_yes && !confirm(&validation.report) {
                bail!("Validation failed:\n{}", validation.report);
            }
            info!("Continuing past failed validation at caller's request");
        }

        // Dispatch
        let tools = Tools::locate_for(&manifest.assets)?;
        let ctx = ProcessContext::new(&self.config, locations, package.root(), tools)?;
        let reporter = ProgressReporter::new(progress, manifest.assets.len());

        let schedule = scheduler::run_assets(&ctx, &manifest.assets, &reporter)?;

        // Pack
        let bsa_failures = ctx
            .collector
            .write_all(|n, total, name| {
                reporter.emit(format!("Writing BSA {n}/{total}: {name}"));
            })
            .context("Failed to pack BSA archives")?;

        // Post-commands
        reporter.emit(format!(
            "Running {} post-commands",
            manifest.post_commands.len()
        ));
        let post = postcmd::run_post_commands(&manifest.post_commands, &self.config);

        // Report
        let stats = InstallStats {
            assets_total: manifest.assets.len(),
            assets_succeeded: schedule.succeeded,
            assets_failed: schedule.failed.saturating_sub(ctx.log.missing_count()),
            missing_files: ctx.log.missing_count(),
            bsa_failures,
            post_commands_failed: post.failed,
            collisions: ctx.collector.collision_count(),
        };

        let report_path = ctx.log.write_report(&self.config.destination)?;
        info!("Wrote {}", report_path.display());

        reporter.emit("Installation complete");
        Ok(stats)
    }
}

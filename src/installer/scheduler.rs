//! Asset scheduling.
//!
//! Assets run grouped by operation type, one bucket after another in a
//! fixed order. File-bound buckets (new, copy, patch) run on a small fixed
//! pool; the audio buckets use every hardware thread, since each worker is
//! mostly waiting on a CPU-saturating media-tool subprocess.
//!
//! Progress flows through a channel to a printer thread owned by the
//! caller; the producer side never blocks, and the percentage is monotonic
//! for the life of the run.

use anyhow::{bail, Context, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::Sender;

use super::processor::ProcessContext;
use crate::manifest::{Asset, OpType};

/// Worker-thread count for the file-bound buckets.
const FILE_POOL_THREADS: usize = 4;

/// Bucket execution order.
const BUCKET_ORDER: [OpType; 5] = [
    OpType::New,
    OpType::Copy,
    OpType::Patch,
    OpType::AudioResample,
    OpType::AudioTranscode,
];

/// One progress update for the consumer thread.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub percent: usize,
    pub message: String,
}

/// Tracks completion across the whole run and pushes throttled updates.
pub struct ProgressReporter {
    tx: Option<Sender<ProgressEvent>>,
    total: usize,
    done: AtomicUsize,
    high_water: AtomicUsize,
}

impl ProgressReporter {
    pub fn new(tx: Option<Sender<ProgressEvent>>, total_assets: usize) -> Self {
        Self {
            tx,
            total: total_assets,
            done: AtomicUsize::new(0),
            high_water: AtomicUsize::new(0),
        }
    }

    /// Record `n` more finished assets; returns the new total.
    pub fn add_done(&self, n: usize) -> usize {
        self.done.fetch_add(n, Ordering::Relaxed) + n
    }

    pub fn done(&self) -> usize {
        self.done.load(Ordering::Relaxed)
    }

    /// Emit a progress message. The percentage never decreases, whatever
    /// order worker updates land in.
    pub fn emit(&self, message: impl Into<String>) {
        let computed = if self.total == 0 {
            0
        } else {
            (self.done().min(self.total) * 100) / self.total
        };
        let percent = self
            .high_water
            .fetch_max(computed, Ordering::Relaxed)
            .max(computed);

        if let Some(tx) = &self.tx {
            let _ = tx.send(ProgressEvent {
                percent,
                message: message.into(),
            });
        }
    }
}

/// Per-bucket counters rolled up into run stats.
#[derive(Debug, Default)]
pub struct ScheduleStats {
    pub succeeded: usize,
    pub failed: usize,
}

/// Progress-report stride per bucket. Copy and resample buckets are large
/// (hundreds of thousands of voice files), so they report less often.
fn report_stride(op: OpType) -> usize {
    match op {
        OpType::Copy => 500,
        OpType::AudioResample => 1000,
        _ => 100,
    }
}

/// Run every asset, bucket by bucket. An op-type 3 asset anywhere in the
/// list is a fatal scheduling error: modern packages never carry one, so
/// its presence means the manifest is corrupt.
pub fn run_assets(
    ctx: &ProcessContext,
    assets: &[Asset],
    reporter: &ProgressReporter,
) -> Result<ScheduleStats> {
    if assets.iter().any(|a| a.op == OpType::XwmaFuz) {
        bail!("Package contains op-type 3 (XwmaFuz) assets, which are not supported");
    }

    let file_pool = rayon::ThreadPoolBuilder::new()
        .num_threads(FILE_POOL_THREADS)
        .build()
        .context("Failed to build worker pool")?;

    let succeeded = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);
    let total = assets.len();

    for op in BUCKET_ORDER {
        let bucket: Vec<&Asset> = assets.iter().filter(|a| a.op == op).collect();
        if bucket.is_empty() {
            continue;
        }

        reporter.emit(format!(
            "Processing {} {} assets",
            bucket.len(),
            op.label()
        ));

        let stride = report_stride(op);
        let bucket_len = bucket.len();
        let bucket_done = AtomicUsize::new(0);

        let work = || {
            use rayon::prelude::*;
            bucket.par_iter().for_each(|asset| {
                if ctx.process(asset) {
                    succeeded.fetch_add(1, Ordering::Relaxed);
                } else {
                    failed.fetch_add(1, Ordering::Relaxed);
                }

                let done = reporter.add_done(1);
                let in_bucket = bucket_done.fetch_add(1, Ordering::Relaxed) + 1;
                if in_bucket % stride == 0 || in_bucket == bucket_len {
                    reporter.emit(format!("Assets: {done}/{total} - {}", op.label()));
                }
            });
        };

        match op {
            // Audio buckets saturate every hardware thread; the media tool
            // is the bottleneck, not our I/O
            OpType::AudioResample | OpType::AudioTranscode => work(),
            _ => file_pool.install(work),
        }
    }

    Ok(ScheduleStats {
        succeeded: succeeded.load(Ordering::Relaxed),
        failed: failed.load(Ordering::Relaxed),
    })
}

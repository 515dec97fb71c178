//! Batched background task runner.
//!
//! Maintenance tasks (project blob copies, consistency verification)
//! walk ascending id ranges in fixed-size batches with a bounded worker
//! count.  Failed units within a batch are collected and retried as a
//! group up to a fixed ceiling with a fixed delay; exceeding the ceiling
//! is fatal for the whole task.  After each completed batch the last
//! processed id is checkpointed to disk, so a restarted task re-scans
//! forward from the recorded boundary instead of assuming completion.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::config::BatchConfig;

/// Tuning for a batched task run.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Number of ids per batch.
    pub batch_size: u32,
    /// Bounded worker count within a batch.
    pub concurrency: usize,
    /// Retry ceiling for a batch's failed units.
    pub retry_limit: u32,
    /// Fixed delay between retry rounds.
    pub retry_delay: Duration,
    /// Where to record the last completed batch boundary, if anywhere.
    pub checkpoint_path: Option<PathBuf>,
}

impl BatchOptions {
    pub fn from_config(config: &BatchConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            concurrency: config.concurrency,
            retry_limit: config.retry_limit,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            checkpoint_path: None,
        }
    }
}

/// Counters accumulated over a task run, printed as one JSON line at the
/// end of a CLI invocation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchStats {
    /// Units that completed successfully.
    pub processed: u64,
    /// Unit retries performed (a unit retried three times counts three).
    pub retries: u64,
    /// Batches completed.
    pub batches: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Checkpoint {
    last_completed: i64,
}

fn read_checkpoint(path: &Path) -> Option<i64> {
    let contents = std::fs::read_to_string(path).ok()?;
    let checkpoint: Checkpoint = serde_json::from_str(&contents).ok()?;
    Some(checkpoint.last_completed)
}

fn write_checkpoint(path: &Path, last_completed: i64) -> anyhow::Result<()> {
    let checkpoint = Checkpoint { last_completed };
    std::fs::write(path, serde_json::to_string(&checkpoint)?)?;
    Ok(())
}

/// Run `handler` over every id in `start..=end`, batched and bounded.
///
/// Resumes after the checkpointed boundary when one is recorded.
/// Returns the accumulated stats, or an error once a batch exhausts its
/// retry ceiling.
pub async fn run_batches<F, Fut>(
    start: i64,
    end: i64,
    opts: &BatchOptions,
    handler: F,
) -> anyhow::Result<BatchStats>
where
    F: Fn(i64) -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let mut stats = BatchStats::default();

    let mut next = start;
    if let Some(path) = &opts.checkpoint_path {
        if let Some(last_completed) = read_checkpoint(path) {
            info!(
                "resuming after checkpointed boundary {} from {}",
                last_completed,
                path.display()
            );
            next = next.max(last_completed + 1);
        }
    }

    while next <= end {
        let batch_end = (next + i64::from(opts.batch_size) - 1).min(end);
        let ids: Vec<i64> = (next..=batch_end).collect();

        let mut failed = run_units(&ids, opts, &handler, &mut stats).await?;
        let mut attempt = 0u32;
        while !failed.is_empty() {
            attempt += 1;
            if attempt > opts.retry_limit {
                anyhow::bail!(
                    "batch {next}..={batch_end}: {} units still failing after {} retries",
                    failed.len(),
                    opts.retry_limit
                );
            }
            stats.retries += failed.len() as u64;
            warn!(
                "batch {}..={}: retrying {} failed units (attempt {}/{})",
                next,
                batch_end,
                failed.len(),
                attempt,
                opts.retry_limit
            );
            tokio::time::sleep(opts.retry_delay).await;
            failed = run_units(&failed, opts, &handler, &mut stats).await?;
        }

        stats.batches += 1;
        if let Some(path) = &opts.checkpoint_path {
            write_checkpoint(path, batch_end)?;
        }
        info!(
            "batch {}..={} complete ({} processed so far)",
            next, batch_end, stats.processed
        );
        next = batch_end + 1;
    }

    Ok(stats)
}

/// Run one round of units with bounded concurrency, returning the ids
/// that failed.
async fn run_units<F, Fut>(
    ids: &[i64],
    opts: &BatchOptions,
    handler: &F,
    stats: &mut BatchStats,
) -> anyhow::Result<Vec<i64>>
where
    F: Fn(i64) -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let mut join_set: JoinSet<(i64, anyhow::Result<()>)> = JoinSet::new();
    let mut failed = Vec::new();

    for &id in ids {
        while join_set.len() >= opts.concurrency.max(1) {
            collect_unit(&mut join_set, stats, &mut failed).await?;
        }
        let handler = handler.clone();
        join_set.spawn(async move { (id, handler(id).await) });
    }
    while !join_set.is_empty() {
        collect_unit(&mut join_set, stats, &mut failed).await?;
    }

    failed.sort_unstable();
    Ok(failed)
}

async fn collect_unit(
    join_set: &mut JoinSet<(i64, anyhow::Result<()>)>,
    stats: &mut BatchStats,
    failed: &mut Vec<i64>,
) -> anyhow::Result<()> {
    if let Some(joined) = join_set.join_next().await {
        let (id, result) = joined?;
        match result {
            Ok(()) => stats.processed += 1,
            Err(err) => {
                warn!("unit {id} failed: {err:#}");
                failed.push(id);
            }
        }
    }
    Ok(())
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    fn options() -> BatchOptions {
        BatchOptions {
            batch_size: 4,
            concurrency: 3,
            retry_limit: 10,
            retry_delay: Duration::from_millis(1),
            checkpoint_path: None,
        }
    }

    #[tokio::test]
    async fn test_processes_every_id_once() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_handle = seen.clone();
        let stats = run_batches(1, 10, &options(), move |id| {
            let seen = seen_handle.clone();
            async move {
                seen.lock().unwrap().push(id);
                Ok(())
            }
        })
        .await
        .unwrap();

        assert_eq!(stats.processed, 10);
        assert_eq!(stats.batches, 3);
        let mut ids = seen.lock().unwrap().clone();
        ids.sort_unstable();
        assert_eq!(ids, (1..=10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_failed_units_are_retried_as_a_group() {
        // Unit 5 fails twice before succeeding.
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_handle = attempts.clone();
        let stats = run_batches(1, 8, &options(), move |id| {
            let attempts = attempts_handle.clone();
            async move {
                if id == 5 && attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    anyhow::bail!("transient failure");
                }
                Ok(())
            }
        })
        .await
        .unwrap();

        assert_eq!(stats.processed, 8);
        assert_eq!(stats.retries, 2);
    }

    #[tokio::test]
    async fn test_retry_ceiling_is_fatal() {
        let opts = BatchOptions {
            retry_limit: 2,
            ..options()
        };
        let err = run_batches(1, 4, &opts, |id| async move {
            if id == 2 {
                anyhow::bail!("permanent failure");
            }
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(err.to_string().contains("still failing"));
    }

    #[tokio::test]
    async fn test_checkpoint_resume_skips_completed_batches() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = dir.path().join("checkpoint.json");
        let opts = BatchOptions {
            checkpoint_path: Some(checkpoint.clone()),
            ..options()
        };

        let seen = Arc::new(Mutex::new(HashSet::new()));
        let seen_handle = seen.clone();
        run_batches(1, 8, &opts, move |id| {
            let seen = seen_handle.clone();
            async move {
                seen.lock().unwrap().insert(id);
                Ok(())
            }
        })
        .await
        .unwrap();
        assert!(checkpoint.exists());

        // A second run with the same checkpoint re-processes nothing.
        let seen2 = Arc::new(Mutex::new(HashSet::new()));
        let seen2_handle = seen2.clone();
        let stats = run_batches(1, 8, &opts, move |id| {
            let seen = seen2_handle.clone();
            async move {
                seen.lock().unwrap().insert(id);
                Ok(())
            }
        })
        .await
        .unwrap();
        assert_eq!(stats.processed, 0);
        assert!(seen2.lock().unwrap().is_empty());
    }
}

//! The checkpoint producer loop.
//!
//! Watches the chain tip through RPC polling and pub/sub notifications,
//! verifies that published checkpoints stay included in the canonical
//! chain, and adopts the header at the configured depth below the tip as
//! the next checkpoint.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{error, info};

use super::daemon::{BlockHeader, Daemon, MAX_INCLUSION_DEPTH};
use super::publish::PushTarget;
use super::{write_checkpoint_state, BlockHash, Checkpoint};
use crate::error::{HighwayError, Result};

/// Time between RPC tip polls when no notification arrives.
const FALLBACK_POLL: Duration = Duration::from_secs(30);
/// Deadline for each backend publication.
const PUSH_TIMEOUT: Duration = Duration::from_secs(30);

/// Chain tip update from the pub/sub feed.
#[derive(Clone, Copy, Debug)]
pub struct TipNotification {
    pub height: u64,
    pub id: BlockHash,
    pub previous_id: BlockHash,
}

#[derive(Clone, Debug, Default)]
pub struct ProducerOptions {
    /// Depth below the tip at which checkpoints are placed
    pub checkpoint_depth: u64,
    /// Minimum interval between checkpoints; zero/None checkpoints instantly
    pub checkpoint_interval: Option<Duration>,
    /// Where to mirror the current checkpoint
    pub state_path: Option<PathBuf>,
}

pub struct Producer {
    daemon: Daemon,
    targets: Vec<PushTarget>,
    options: ProducerOptions,
    push_client: reqwest::Client,
}

impl Producer {
    pub fn new(daemon: Daemon, targets: Vec<PushTarget>, options: ProducerOptions) -> Result<Self> {
        let push_client = reqwest::Client::builder()
            .timeout(PUSH_TIMEOUT)
            .build()
            .map_err(|e| HighwayError::Rpc(e.to_string()))?;

        Ok(Producer {
            daemon,
            targets,
            options,
            push_client,
        })
    }

    /// Run until a fatal condition. `loaded` is the checkpoint recovered
    /// from the state file, if any; `tips` carries pub/sub tip updates.
    pub async fn run(
        &self,
        loaded: Option<Checkpoint>,
        mut tips: mpsc::Receiver<TipNotification>,
    ) -> Result<()> {
        let mut tip = self.daemon.header_tip().await?;
        // prime the walk cache from the tip
        self.daemon.walk(&tip, MAX_INCLUSION_DEPTH, |_| true).await?;
        info!("Initial tip: height={} id={}", tip.height, tip.id);

        let mut checkpoint_header: Option<Arc<BlockHeader>> = None;
        if let Some(checkpoint) = loaded {
            if !checkpoint.id.is_zero() {
                let header = self.daemon.header_by_id(checkpoint.id).await?;
                self.daemon
                    .walk(&header, MAX_INCLUSION_DEPTH, |_| true)
                    .await?;

                if let Some(reason) = self.daemon.header_included(&tip, &header).await? {
                    // the chain no longer contains what we already published;
                    // keep failing until the chain recovers
                    error!("Tip does not include old checkpoint: {}", reason);
                    return Err(HighwayError::ChainReorgPastCheckpoint(reason));
                }
                checkpoint_header = Some(header);
            }
        }

        let mut fallback =
            tokio::time::interval_at(Instant::now() + FALLBACK_POLL, FALLBACK_POLL);
        fallback.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut interval_deadline = self.options.checkpoint_interval.map(|d| Instant::now() + d);
        let mut interval_elapsed = false;

        loop {
            let new_tip = self.daemon.header_tip().await?;

            if new_tip.id == tip.id && !interval_elapsed {
                tokio::select! {
                    _ = fallback.tick() => {}
                    _ = sleep_until_opt(interval_deadline) => {
                        interval_elapsed = true;
                        interval_deadline = self.next_deadline();
                    }
                    notification = tips.recv() => {
                        if let Some(n) = notification {
                            info!("Got tip notification: height={} id={}", n.height, n.id);
                        }
                    }
                }
                continue;
            }
            info!("Tip: height={} id={}", new_tip.height, new_tip.id);

            if new_tip.id != tip.id {
                if let Some(reason) = self.daemon.header_included(&new_tip, &tip).await? {
                    // a reorg of the unpublished tip is survivable
                    error!("New tip does not include old tip chain: {}", reason);
                }
            }

            if self.options.checkpoint_interval.is_some() && !interval_elapsed {
                if let Some(deadline) = interval_deadline {
                    if Instant::now() >= deadline {
                        interval_elapsed = true;
                        interval_deadline = self.next_deadline();
                    } else {
                        tip = new_tip;
                        info!("Checkpoint interval not reached, delaying");
                        continue;
                    }
                }
            }

            if let Some(header) = &checkpoint_header {
                if let Some(reason) = self.daemon.header_included(&new_tip, header).await? {
                    error!("New tip does not include old checkpoint: {}", reason);
                    return Err(HighwayError::ChainReorgPastCheckpoint(reason));
                }
            }

            let candidate = self
                .daemon
                .header_at_depth(&new_tip, self.options.checkpoint_depth)
                .await?;

            // sanity check again against the candidate itself
            if let Some(header) = &checkpoint_header {
                if let Some(reason) = self.daemon.header_included(&candidate, header).await? {
                    error!("New checkpoint does not include old checkpoint: {}", reason);
                    return Err(HighwayError::ChainReorgPastCheckpoint(reason));
                }
            }

            let advanced = checkpoint_header
                .as_ref()
                .map(|header| candidate.height > header.height)
                .unwrap_or(true);

            if advanced {
                let checkpoint = Checkpoint {
                    height: candidate.height,
                    id: candidate.id,
                };
                checkpoint_header = Some(candidate);

                info!(
                    "New checkpoint: height={} id={}",
                    checkpoint.height, checkpoint.id
                );

                // does the daemon still serve the block we are about to pin?
                self.daemon.fetch_header_by_id(checkpoint.id).await?;

                if let Some(path) = &self.options.state_path {
                    write_checkpoint_state(path, checkpoint)?;
                }

                self.publish(checkpoint).await;
            }

            tip = new_tip;
            interval_elapsed = false;
        }
    }

    async fn publish(&self, checkpoint: Checkpoint) {
        for (index, target) in self.targets.iter().enumerate() {
            let result = tokio::time::timeout(
                PUSH_TIMEOUT,
                target.send(&self.push_client, &[checkpoint]),
            )
            .await;

            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    // backend failures are retried implicitly on the next tick
                    error!("Error sending checkpoint: index={} error={}", index, e);
                }
                Err(_) => {
                    error!("Error sending checkpoint: index={} error=deadline", index);
                }
            }
        }
    }

    /// Next interval deadline with up to 5% fuzz so multiple producers do
    /// not align.
    fn next_deadline(&self) -> Option<Instant> {
        let interval = self.options.checkpoint_interval?;
        let fuzz_range = interval / 20;
        let fuzz = if fuzz_range > Duration::ZERO {
            let millis = fuzz_range.as_millis().max(1) as u64;
            Duration::from_millis(rand::thread_rng().gen_range(0..millis))
        } else {
            Duration::ZERO
        };
        Some(Instant::now() + interval + fuzz)
    }
}

/// Sleep until the deadline, or forever when none is configured.
async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

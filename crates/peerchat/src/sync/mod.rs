//! Anti-entropy history sync.
//!
//! Every tick the loop looks at the local history. When it holds fewer than
//! `download_threshold` messages, the distinct senders found in it are asked
//! for their history, one after another. Any peer whose history is strictly
//! longer than ours at the start of the cycle is a candidate; the last such
//! peer in iteration order replaces the local log wholesale.
//!
//! This is a length heuristic, not a merge. Two different conversations of
//! the same length never reconcile, and a longer history always wins even if
//! it shares nothing with ours.

mod config;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use peerchat_protocol::{HistoryLog, Message, PeerKey};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::fetch::PeerFetch;
use crate::history::{HistoryStore, StoreResult};
use crate::ledger::ContactLedger;

pub use config::SyncConfig;

/// What a single cycle ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Local history already meets the download threshold.
    Saturated,
    /// No valid peer could be derived from the local history.
    NoCandidates,
    /// Peers were considered but none offered a longer history.
    Unchanged,
    /// Local history was replaced by `peer`'s.
    Replaced {
        peer: PeerKey,
        previous_len: usize,
        new_len: usize,
    },
}

/// Summary of one sync cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Local history length at the start of the cycle.
    pub baseline_len: usize,
    pub outcome: CycleOutcome,
    /// Distinct valid peers found in the history.
    pub candidates: usize,
    /// Fetches issued.
    pub contacted: usize,
    /// Candidates skipped because they were contacted recently (or are us).
    pub skipped_recent: usize,
    /// Messages whose sender could not be turned into a peer.
    pub malformed: usize,
    /// Fetches that did not produce a history.
    pub failed: usize,
}

impl CycleReport {
    fn new(baseline_len: usize) -> Self {
        Self {
            baseline_len,
            outcome: CycleOutcome::Unchanged,
            candidates: 0,
            contacted: 0,
            skipped_recent: 0,
            malformed: 0,
            failed: 0,
        }
    }
}

/// Distinct sender identities in first-appearance order, plus the number of
/// messages whose sender was malformed.
pub fn candidate_peers(history: &[Message]) -> (Vec<PeerKey>, usize) {
    let mut seen = HashSet::new();
    let mut peers = Vec::new();
    let mut malformed = 0;

    for (index, message) in history.iter().enumerate() {
        match message.sender() {
            Ok(peer) => {
                if seen.insert(peer) {
                    peers.push(peer);
                }
            }
            Err(e) => {
                malformed += 1;
                warn!("Skipping message {} as sync candidate: {}", index, e);
            }
        }
    }

    (peers, malformed)
}

/// The anti-entropy driver. Owns the contact ledger.
pub struct SyncLoop {
    store: Arc<HistoryStore>,
    fetcher: Arc<dyn PeerFetch>,
    ledger: ContactLedger,
    clock: Arc<dyn Clock>,
    self_key: PeerKey,
    config: SyncConfig,
    tick: Duration,
}

impl SyncLoop {
    pub fn new(
        store: Arc<HistoryStore>,
        fetcher: Arc<dyn PeerFetch>,
        self_key: PeerKey,
        config: SyncConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            fetcher,
            ledger: ContactLedger::new(Arc::clone(&clock)),
            clock,
            self_key,
            tick: config.tick_interval(),
            config,
        }
    }

    /// Override the tick period from the config.
    pub fn with_tick_interval(mut self, tick: Duration) -> Self {
        if !tick.is_zero() {
            self.tick = tick;
        }
        self
    }

    /// Read-only view of outbound contact history.
    pub fn ledger(&self) -> &ContactLedger {
        &self.ledger
    }

    pub fn self_key(&self) -> PeerKey {
        self.self_key
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Run one Evaluate → Select → Contact → Merge pass.
    ///
    /// Only a failure to persist the winning history is an error.
    pub async fn run_cycle(&self) -> StoreResult<CycleReport> {
        let history = self.store.load_or_empty().await;
        let mut report = CycleReport::new(history.len());

        if report.baseline_len >= self.config.download_threshold {
            report.outcome = CycleOutcome::Saturated;
            return Ok(report);
        }

        let (candidates, malformed) = candidate_peers(&history);
        report.candidates = candidates.len();
        report.malformed = malformed;

        if candidates.is_empty() {
            report.outcome = CycleOutcome::NoCandidates;
            return Ok(report);
        }

        debug!(
            "History has {} messages (threshold {}), considering {} peers",
            report.baseline_len,
            self.config.download_threshold,
            candidates.len()
        );

        let refill = self.config.contact_refill();
        let timeout = self.config.fetch_timeout();
        let mut best: Option<(PeerKey, HistoryLog)> = None;

        for peer in candidates {
            if !self.ledger.should_contact(&peer, &self.self_key, refill) {
                report.skipped_recent += 1;
                continue;
            }

            let fetched = self.fetcher.fetch(&peer, timeout).await;
            self.ledger.record_contact(peer, self.clock.now());
            report.contacted += 1;

            match fetched {
                Ok(log) if log.len() > report.baseline_len => {
                    debug!("Peer {} offers {} messages", peer, log.len());
                    best = Some((peer, log));
                }
                Ok(log) => {
                    debug!(
                        "Peer {} offers {} messages, not more than our {}",
                        peer,
                        log.len(),
                        report.baseline_len
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    info!("Skipping peer {} this cycle: {}", peer, e);
                }
            }
        }

        report.outcome = match best {
            Some((peer, log)) => {
                self.store.save(&log).await?;
                info!(
                    "Replaced local history ({} messages) with {} messages from {}",
                    report.baseline_len,
                    log.len(),
                    peer
                );
                CycleOutcome::Replaced {
                    peer,
                    previous_len: report.baseline_len,
                    new_len: log.len(),
                }
            }
            None => CycleOutcome::Unchanged,
        };

        Ok(report)
    }

    /// Tick until `shutdown` fires. The first cycle runs one interval after start.
    pub async fn run(&self, shutdown: CancellationToken) {
        let period = self.tick;
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Sync loop started for {} (every {:?}, threshold {})",
            self.self_key, period, self.config.download_threshold
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            let cycle = tokio::select! {
                _ = shutdown.cancelled() => break,
                cycle = self.run_cycle() => cycle,
            };

            match cycle {
                Ok(report) => debug!("Sync cycle finished: {:?}", report),
                Err(e) => warn!("Sync cycle aborted: {}", e),
            }
        }

        info!("Sync loop stopped");
    }
}

//! Outbound courtesy tracking.
//!
//! Remembers when each peer was last contacted so the sync loop does not hit
//! the same peer more often than the configured refill interval. State is in
//! memory only; a restart forgets every record.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use peerchat_protocol::PeerKey;

use crate::clock::{Clock, elapsed_between};

/// Last-contact timestamps keyed by peer.
#[derive(Debug)]
pub struct ContactLedger {
    records: DashMap<PeerKey, DateTime<Utc>>,
    clock: Arc<dyn Clock>,
}

impl ContactLedger {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: DashMap::new(),
            clock,
        }
    }

    /// Whether `peer` may be contacted now.
    ///
    /// Never true for `self_key`. A peer with no record is always eligible;
    /// otherwise strictly more than `refill_interval` must have passed since
    /// the last contact.
    pub fn should_contact(
        &self,
        peer: &PeerKey,
        self_key: &PeerKey,
        refill_interval: Duration,
    ) -> bool {
        if peer == self_key {
            return false;
        }
        match self.records.get(peer) {
            None => true,
            Some(last) => elapsed_between(*last, self.clock.now()) > refill_interval,
        }
    }

    /// Record that a request to `peer` was issued at `at`. Overwrites any
    /// earlier record.
    pub fn record_contact(&self, peer: PeerKey, at: DateTime<Utc>) {
        self.records.insert(peer, at);
    }

    pub fn last_contact(&self, peer: &PeerKey) -> Option<DateTime<Utc>> {
        self.records.get(peer).map(|entry| *entry)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All records, sorted by peer.
    pub fn snapshot(&self) -> Vec<(PeerKey, DateTime<Utc>)> {
        let mut records: Vec<_> = self
            .records
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect();
        records.sort_by_key(|(peer, _)| *peer);
        records
    }
}

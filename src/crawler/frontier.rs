//! Crawl frontier: per-host FIFO queues served round-robin
//!
//! A host handed to a worker stays busy until the worker calls
//! [`Frontier::finish`], so no two workers ever fetch from the same host at
//! once. The frontier is drained when every queue is empty and no entry is
//! being worked on.

use crate::crawler::rate_limiter::HostRateLimiter;
use crate::storage::UrlRecord;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// A pending URL waiting for a worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontierEntry {
    pub canonical_url: String,
    pub host: String,
    pub depth: u32,
}

impl From<&UrlRecord> for FrontierEntry {
    fn from(record: &UrlRecord) -> Self {
        Self {
            canonical_url: record.canonical_url.clone(),
            host: record.host.clone(),
            depth: record.depth,
        }
    }
}

/// What a worker should do next
#[derive(Debug, PartialEq, Eq)]
pub enum Selection {
    /// Work on this entry, then call `finish` with its host
    Ready(FrontierEntry),
    /// Queued hosts exist but none is eligible for this long
    Wait(Duration),
    /// Nothing claimable now, but active work may add more
    Idle,
    /// No queued entries and no active work
    Drained,
}

#[derive(Debug, Default)]
struct Inner {
    queues: HashMap<String, VecDeque<FrontierEntry>>,
    rotation: VecDeque<String>,
    busy: HashSet<String>,
    queued: usize,
    active: usize,
}

#[derive(Debug, Default)]
pub struct Frontier {
    inner: Mutex<Inner>,
    changed: Notify,
}

impl Frontier {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Appends an entry to its host's queue
    pub fn push(&self, entry: FrontierEntry) {
        {
            let mut inner = self.lock();
            let host = entry.host.clone();
            let queue = inner.queues.entry(host.clone()).or_default();
            let was_empty = queue.is_empty();
            queue.push_back(entry);
            if was_empty && !inner.rotation.contains(&host) {
                inner.rotation.push_back(host);
            }
            inner.queued += 1;
        }
        self.changed.notify_waiters();
    }

    /// Picks the next entry from an idle, eligible host
    ///
    /// Hosts are visited in rotation; a served host moves to the back.
    pub fn next(&self, limiter: &HostRateLimiter) -> Selection {
        let now = Instant::now();
        let mut inner = self.lock();
        let mut soonest: Option<Duration> = None;

        for _ in 0..inner.rotation.len() {
            let Some(host) = inner.rotation.pop_front() else {
                break;
            };
            let queue_len = inner.queues.get(&host).map_or(0, VecDeque::len);
            if queue_len == 0 {
                inner.queues.remove(&host);
                continue;
            }
            if inner.busy.contains(&host) {
                inner.rotation.push_back(host);
                continue;
            }

            let eligible_at = limiter.next_eligible_at(&host, now);
            if eligible_at > now {
                let wait = eligible_at - now;
                soonest = Some(soonest.map_or(wait, |s| s.min(wait)));
                inner.rotation.push_back(host);
                continue;
            }

            let entry = inner
                .queues
                .get_mut(&host)
                .and_then(VecDeque::pop_front);
            if let Some(entry) = entry {
                inner.queued -= 1;
                inner.active += 1;
                inner.busy.insert(host.clone());
                inner.rotation.push_back(host);
                return Selection::Ready(entry);
            }
        }

        if let Some(wait) = soonest {
            Selection::Wait(wait)
        } else if inner.queued == 0 && inner.active == 0 {
            Selection::Drained
        } else {
            Selection::Idle
        }
    }

    /// Releases a host handed out by `next`
    pub fn finish(&self, host: &str) {
        {
            let mut inner = self.lock();
            if inner.busy.remove(host) {
                inner.active = inner.active.saturating_sub(1);
            }
        }
        self.changed.notify_waiters();
    }

    /// Resolves when an entry is pushed or a host is finished
    pub async fn changed(&self) {
        self.changed.notified().await
    }

    /// Entries waiting in queues
    pub fn len(&self) -> usize {
        self.lock().queued
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries handed out and not yet finished
    pub fn active(&self) -> usize {
        self.lock().active
    }
}

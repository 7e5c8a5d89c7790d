//! Per-host politeness
//!
//! Every host gets a burst allowance of `burst_threshold` back-to-back
//! requests; after that each request waits a delay drawn uniformly from the
//! politeness window, measured from the previous request to that host. At
//! most one claim per host is in flight at a time.

use crate::config::JobConfig;
use crate::storage::{HostState, JobId, JobStore};
use chrono::{DateTime, Utc};
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Upper bound applied to robots.txt `Crawl-delay`
pub const MAX_CRAWL_DELAY: Duration = Duration::from_secs(60);

/// How long `acquire` waits for a busy host before re-checking
const BUSY_POLL: Duration = Duration::from_millis(100);

/// Burst allowance and delay window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolitenessPolicy {
    pub burst_threshold: u32,
    pub window_min: Duration,
    pub window_max: Duration,
}

impl PolitenessPolicy {
    /// Random delay in `[window_min, window_max]`
    pub fn draw_delay(&self) -> Duration {
        let min = self.window_min.as_millis() as u64;
        let max = (self.window_max.as_millis() as u64).max(min);
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }
}

impl From<&JobConfig> for PolitenessPolicy {
    fn from(config: &JobConfig) -> Self {
        let (window_min, window_max) = config.politeness_window();
        Self {
            burst_threshold: config.burst_threshold,
            window_min,
            window_max,
        }
    }
}

#[derive(Debug)]
struct HostSlot {
    request_count: u32,
    last_request_at: Option<DateTime<Utc>>,
    next_eligible: Instant,
    in_flight: bool,
    /// Floor from robots.txt `Crawl-delay`
    min_delay: Duration,
}

impl HostSlot {
    fn new(now: Instant) -> Self {
        Self {
            request_count: 0,
            last_request_at: None,
            next_eligible: now,
            in_flight: false,
            min_delay: Duration::ZERO,
        }
    }
}

type SlotMap = Arc<Mutex<HashMap<String, HostSlot>>>;

fn lock_slots(slots: &Mutex<HashMap<String, HostSlot>>) -> MutexGuard<'_, HashMap<String, HostSlot>> {
    // slot bookkeeping stays consistent even if a holder panicked
    slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Outcome of a non-blocking claim
#[derive(Debug)]
pub enum ClaimAttempt {
    Granted(HostClaim),
    /// Host is idle but not eligible for this long
    Wait(Duration),
    /// Another claim on the host is in flight
    Busy,
}

/// Exclusive right to send one request to a host
///
/// Dropping the claim marks the host as no longer in flight.
#[derive(Debug)]
pub struct HostClaim {
    host: String,
    slots: SlotMap,
    released: Arc<Notify>,
}

impl HostClaim {
    pub fn host(&self) -> &str {
        &self.host
    }
}

impl Drop for HostClaim {
    fn drop(&mut self) {
        if let Some(slot) = lock_slots(&self.slots).get_mut(&self.host) {
            slot.in_flight = false;
        }
        self.released.notify_waiters();
    }
}

/// Host table shared by all workers of one job
pub struct HostRateLimiter {
    policy: PolitenessPolicy,
    slots: SlotMap,
    released: Arc<Notify>,
    persist: Option<(Arc<JobStore>, JobId)>,
}

impl HostRateLimiter {
    pub fn new(policy: PolitenessPolicy) -> Self {
        Self {
            policy,
            slots: Arc::new(Mutex::new(HashMap::new())),
            released: Arc::new(Notify::new()),
            persist: None,
        }
    }

    /// Saves every granted request's host state to the job store
    pub fn with_store(mut self, store: Arc<JobStore>, job_id: JobId) -> Self {
        self.persist = Some((store, job_id));
        self
    }

    pub fn policy(&self) -> &PolitenessPolicy {
        &self.policy
    }

    /// Restores persisted host states from an earlier run
    ///
    /// Request counts carry over, so a host past its burst gets no fresh
    /// allowance; its next request waits until `last_request_at + window_min`.
    pub fn restore(&self, states: &[HostState]) {
        let now = Instant::now();
        let wall_now = Utc::now();
        let mut slots = lock_slots(&self.slots);

        for state in states {
            let mut slot = HostSlot::new(now);
            slot.request_count = state.request_count;
            slot.last_request_at = state.last_request_at;

            if state.request_count >= self.policy.burst_threshold {
                if let Some(last) = state.last_request_at {
                    let elapsed = (wall_now - last).to_std().unwrap_or(Duration::ZERO);
                    slot.next_eligible = now + self.policy.window_min.saturating_sub(elapsed);
                }
            }
            debug!(host = %state.host, request_count = state.request_count, "Restored host state");
            slots.insert(state.host.clone(), slot);
        }
    }

    /// Applies a robots.txt crawl delay as a floor on every later delay
    pub fn set_min_delay(&self, host: &str, delay: Duration) {
        let delay = delay.min(MAX_CRAWL_DELAY);
        let mut slots = lock_slots(&self.slots);
        let slot = slots
            .entry(host.to_string())
            .or_insert_with(|| HostSlot::new(Instant::now()));
        if slot.min_delay != delay {
            debug!(host, delay_ms = delay.as_millis() as u64, "Applying robots crawl delay");
            slot.min_delay = delay;
        }
    }

    /// Earliest instant the next request to `host` may start
    pub fn next_eligible_time(&self, host: &str) -> Instant {
        self.next_eligible_at(host, Instant::now())
    }

    /// Like [`next_eligible_time`](Self::next_eligible_time), measured against
    /// the caller's clock reading
    ///
    /// # Arguments
    ///
    /// * `host` - Lowercased host name
    /// * `now` - The instant the caller compares the result against
    ///
    /// # Returns
    ///
    /// `now` for a host with no history, otherwise the host's scheduled instant
    pub fn next_eligible_at(&self, host: &str, now: Instant) -> Instant {
        lock_slots(&self.slots)
            .get(host)
            .map_or(now, |slot| slot.next_eligible)
    }

    pub fn request_count(&self, host: &str) -> u32 {
        lock_slots(&self.slots)
            .get(host)
            .map_or(0, |slot| slot.request_count)
    }

    /// Claims `host` if it is idle and eligible, recording the request
    pub fn try_claim(&self, host: &str) -> ClaimAttempt {
        let now = Instant::now();
        let state = {
            let mut slots = lock_slots(&self.slots);
            let slot = slots
                .entry(host.to_string())
                .or_insert_with(|| HostSlot::new(now));

            if slot.in_flight {
                return ClaimAttempt::Busy;
            }
            if slot.next_eligible > now {
                return ClaimAttempt::Wait(slot.next_eligible - now);
            }

            slot.in_flight = true;
            slot.request_count += 1;
            slot.last_request_at = Some(Utc::now());

            let delay = if slot.request_count < self.policy.burst_threshold {
                Duration::ZERO
            } else {
                self.policy.draw_delay()
            };
            slot.next_eligible = now + delay.max(slot.min_delay);

            HostState {
                host: host.to_string(),
                last_request_at: slot.last_request_at,
                request_count: slot.request_count,
            }
        };

        if let Some((store, job_id)) = &self.persist {
            if let Err(e) = store.save_host_state(*job_id, &state) {
                warn!(job_id = %job_id, host, error = %e, "Failed to persist host state");
            }
        }

        ClaimAttempt::Granted(HostClaim {
            host: host.to_string(),
            slots: Arc::clone(&self.slots),
            released: Arc::clone(&self.released),
        })
    }

    /// Waits until `host` can be claimed; `None` once `cancel` fires
    pub async fn acquire(&self, host: &str, cancel: &CancellationToken) -> Option<HostClaim> {
        loop {
            if cancel.is_cancelled() {
                return None;
            }
            match self.try_claim(host) {
                ClaimAttempt::Granted(claim) => return Some(claim),
                ClaimAttempt::Wait(delay) => {
                    tokio::select! {
                        _ = cancel.cancelled() => return None,
                        _ = sleep(delay) => {}
                    }
                }
                ClaimAttempt::Busy => {
                    tokio::select! {
                        _ = cancel.cancelled() => return None,
                        _ = timeout(BUSY_POLL, self.released.notified()) => {}
                    }
                }
            }
        }
    }
}

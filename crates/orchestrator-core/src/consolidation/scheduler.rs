//! Explicit consolidation scheduler.
//!
//! Reads the cron-like `consolidation.schedule`, computes the next fire
//! time, and blocks on a cancellable timer. On fire it takes the
//! consolidation lock and runs the pass; on startup it catches up when the
//! last pass is older than 24 hours. No ambient cron - one owned task.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use tokio::sync::watch;
use tracing::{error, info, warn};

use super::service::ConsolidationService;
use crate::error::{CoreError, Result};

/// Parsed `minute hour * * *` schedule. Day/month/weekday fields must be
/// `*` - the system is single-user and daily is the supported cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub minute: u32,
    pub hour: u32,
}

impl Schedule {
    pub fn parse(raw: &str) -> Result<Self> {
        let fields: Vec<&str> = raw.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CoreError::Init(format!(
                "schedule must have 5 cron fields, got '{}'",
                raw
            )));
        }
        let minute: u32 = fields[0]
            .parse()
            .map_err(|_| CoreError::Init(format!("bad schedule minute '{}'", fields[0])))?;
        let hour: u32 = fields[1]
            .parse()
            .map_err(|_| CoreError::Init(format!("bad schedule hour '{}'", fields[1])))?;
        if minute > 59 || hour > 23 {
            return Err(CoreError::Init(format!("schedule out of range '{}'", raw)));
        }
        for field in &fields[2..] {
            if *field != "*" {
                return Err(CoreError::Init(
                    "only daily schedules are supported (day/month/weekday must be '*')"
                        .to_string(),
                ));
            }
        }
        Ok(Self { minute, hour })
    }
}

/// Next fire time strictly after `now`.
pub fn next_fire(schedule: Schedule, now: DateTime<Utc>) -> DateTime<Utc> {
    let today = now
        .with_hour(schedule.hour)
        .and_then(|t| t.with_minute(schedule.minute))
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now);
    if today > now {
        today
    } else {
        today + ChronoDuration::days(1)
    }
}

/// Drives the consolidation service on its schedule.
pub struct ConsolidationScheduler {
    service: Arc<ConsolidationService>,
    schedule: Schedule,
    enabled: bool,
}

impl ConsolidationScheduler {
    pub fn new(service: Arc<ConsolidationService>, schedule: Schedule, enabled: bool) -> Self {
        Self {
            service,
            schedule,
            enabled,
        }
    }

    /// Spawn the scheduler task. Flip the returned sender to `true` to
    /// stop it; shutdown waits for any in-flight pass (the service lock
    /// guarantees step boundaries).
    pub fn spawn(self) -> (tokio::task::JoinHandle<()>, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(self.run_loop(rx));
        (handle, tx)
    }

    async fn run_loop(self, mut shutdown: watch::Receiver<bool>) {
        if !self.enabled {
            info!("consolidation disabled by config");
            return;
        }

        // Startup catch-up
        if self.service.needs_catch_up(Utc::now()) {
            info!("last consolidation older than 24h, running catch-up");
            if let Err(e) = self.service.run().await {
                error!(error = %e, "startup consolidation failed");
            }
        }

        loop {
            let now = Utc::now();
            let at = next_fire(self.schedule, now);
            let wait = (at - now)
                .to_std()
                .unwrap_or(std::time::Duration::from_secs(60));
            info!(next = %at, "consolidation scheduled");

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    if let Err(e) = self.service.run().await {
                        // Sentinel untouched; the next startup retries
                        warn!(error = %e, "scheduled consolidation failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("consolidation scheduler stopping");
                        return;
                    }
                }
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

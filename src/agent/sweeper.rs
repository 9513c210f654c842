//! Periodic eviction of idle sessions on a cron schedule.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::agent::service::AgentService;

/// Parse a cron expression (with seconds field, e.g. `0 */10 * * * *`).
pub fn parse_schedule(expr: &str) -> Result<Schedule, String> {
    Schedule::from_str(expr).map_err(|e| format!("Invalid cron: {}", e))
}

/// Time to wait after `now` until the next scheduled sweep.
pub fn next_sweep_delay(schedule: &Schedule, now: DateTime<Utc>) -> Option<Duration> {
    let next = schedule.after(&now).next()?;
    Some((next - now).to_std().unwrap_or(Duration::ZERO))
}

/// Spawn the background sweeper. It runs until the schedule has no further occurrences.
pub fn spawn_sweeper(service: Arc<AgentService>, schedule: Schedule, max_age: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let Some(delay) = next_sweep_delay(&schedule, Utc::now()) else {
                warn!("Sweep schedule has no future occurrence, stopping sweeper");
                return;
            };
            tokio::time::sleep(delay).await;

            let evicted = service.sweep(max_age);
            if evicted > 0 {
                info!("🧹 Evicted {} idle session(s), {} live", evicted, service.registry().len());
            }
        }
    })
}

use chrono::{DateTime, NaiveTime, Utc};
use std::future::Future;
use std::time::Duration;
use ticker_core::config::ScheduleConfig;
use ticker_core::{Error, Result};
use tokio::time::Instant;
use tracing::{info, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Interval,
    Daily,
}

/// Fires on a fixed interval and/or once a day at a UTC time of day.
///
/// Runs are awaited inline, so a trigger never starts while the previous run
/// is still in progress. Cadences that fall due together produce one run.
#[derive(Debug, Clone)]
pub struct Scheduler {
    interval: Option<Duration>,
    daily_at: Option<NaiveTime>,
}

impl Scheduler {
    pub fn new(interval: Option<Duration>, daily_at: Option<NaiveTime>) -> Result<Self> {
        if interval.is_none() && daily_at.is_none() {
            return Err(Error::Config(
                "schedule needs schedule.interval_secs or schedule.daily_at".into(),
            ));
        }
        Ok(Self { interval, daily_at })
    }

    pub fn from_config(config: &ScheduleConfig) -> Result<Self> {
        let daily_at = config
            .daily_time()
            .map_err(|e| Error::Config(e.to_string()))?;
        Self::new(config.interval(), daily_at)
    }

    /// Drive `job` until `shutdown` resolves. Returns the number of runs.
    pub async fn run<J, Fut, S>(&self, job: J, shutdown: S) -> usize
    where
        J: FnMut(Trigger) -> Fut,
        Fut: Future<Output = ()>,
        S: Future<Output = ()>,
    {
        self.run_from(Utc::now(), job, shutdown).await
    }

    /// Like [`Scheduler::run`], with the wall clock reading `wall_start` at
    /// entry. Later wall-clock times are derived from the monotonic clock.
    #[instrument(skip_all, fields(interval = ?self.interval, daily_at = ?self.daily_at))]
    pub async fn run_from<J, Fut, S>(
        &self,
        wall_start: DateTime<Utc>,
        mut job: J,
        shutdown: S,
    ) -> usize
    where
        J: FnMut(Trigger) -> Fut,
        Fut: Future<Output = ()>,
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let start = Instant::now();
        let wall_at = |instant: Instant| {
            let elapsed = chrono::Duration::from_std(instant - start)
                .unwrap_or_else(|_| chrono::Duration::zero());
            wall_start + elapsed
        };

        let mut next_interval = self.interval.map(|every| start + every);
        let mut next_daily = self
            .daily_at
            .map(|at| start + until(wall_start, next_daily_run(wall_start, at)));
        let mut runs = 0usize;

        info!("Scheduler started");

        loop {
            let deadline = match (next_interval, next_daily) {
                (Some(a), Some(b)) => a.min(b),
                (Some(a), None) | (None, Some(a)) => a,
                (None, None) => return runs,
            };

            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!(runs, "Scheduler stopping");
                    return runs;
                }
                _ = tokio::time::sleep_until(deadline) => {}
            }

            let now = Instant::now();
            let interval_due = next_interval.is_some_and(|due| due <= now);
            let mut fired = interval_due.then_some(Trigger::Interval);

            if let (Some(at), Some(due)) = (self.daily_at, next_daily) {
                if due <= now {
                    let wall = wall_at(now);
                    next_daily = Some(now + until(wall, next_daily_run(wall, at)));
                    fired = Some(Trigger::Daily);
                }
            }

            if let Some(trigger) = fired {
                info!(?trigger, "Triggering ingestion run");
                job(trigger).await;
                runs += 1;
            }

            // The interval counts from the end of the run
            if interval_due {
                next_interval = self.interval.map(|every| Instant::now() + every);
            }
        }
    }
}

/// Next occurrence of `at` strictly after `now`.
pub fn next_daily_run(now: DateTime<Utc>, at: NaiveTime) -> DateTime<Utc> {
    let today = now.date_naive().and_time(at).and_utc();
    if today > now {
        today
    } else {
        today + chrono::Duration::days(1)
    }
}

fn until(now: DateTime<Utc>, then: DateTime<Utc>) -> Duration {
    (then - now).to_std().unwrap_or(Duration::ZERO)
}

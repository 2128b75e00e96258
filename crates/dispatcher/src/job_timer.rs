use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, warn, Instrument};

use scheduler_core::traits::Clock;

use crate::cron_utils::CronExpression;

/// Called with the scheduled instant each time a timer fires. Must not block.
pub type FireCallback = Arc<dyn Fn(DateTime<Utc>) + Send + Sync>;

const NOT_ARMED: i64 = i64::MIN;

struct TimerHandle {
    task: JoinHandle<()>,
    next_fire_ms: Arc<AtomicI64>,
}

/// One single-shot timer per job, re-armed from the cron expression after every fire.
#[derive(Default)]
pub struct JobTimers {
    timers: Mutex<HashMap<String, TimerHandle>>,
}

impl JobTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms a timer for `job_id`. Returns `false` if one is already armed.
    pub fn arm(
        &self,
        job_id: &str,
        cron: CronExpression,
        clock: Arc<dyn Clock>,
        on_fire: FireCallback,
    ) -> bool {
        let mut timers = self.lock();
        if let Some(existing) = timers.get(job_id) {
            if !existing.task.is_finished() {
                return false;
            }
        }

        // 先同步算出首次触发时间，调用方立即可见
        let first = cron
            .next_after(clock.now())
            .map_or(NOT_ARMED, |next| next.timestamp_millis());
        let next_fire_ms = Arc::new(AtomicI64::new(first));
        let task = tokio::spawn(
            run_timer(cron, clock, on_fire, Arc::clone(&next_fire_ms))
                .instrument(tracing::debug_span!("job_timer", job.id = %job_id)),
        );
        timers.insert(job_id.to_string(), TimerHandle { task, next_fire_ms });
        true
    }

    /// Cancels the pending timer. An execution already dispatched keeps running.
    pub fn disarm(&self, job_id: &str) -> bool {
        match self.lock().remove(job_id) {
            Some(handle) => {
                handle.task.abort();
                true
            }
            None => false,
        }
    }

    pub fn disarm_all(&self) -> usize {
        let drained: Vec<TimerHandle> = self.lock().drain().map(|(_, h)| h).collect();
        for handle in &drained {
            handle.task.abort();
        }
        drained.len()
    }

    pub fn is_armed(&self, job_id: &str) -> bool {
        self.lock()
            .get(job_id)
            .is_some_and(|h| !h.task.is_finished())
    }

    pub fn next_fire(&self, job_id: &str) -> Option<DateTime<Utc>> {
        let millis = self.lock().get(job_id)?.next_fire_ms.load(Ordering::Acquire);
        if millis == NOT_ARMED {
            return None;
        }
        DateTime::from_timestamp_millis(millis)
    }

    pub fn armed_jobs(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, TimerHandle>> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for JobTimers {
    fn drop(&mut self) {
        self.disarm_all();
    }
}

async fn run_timer(
    cron: CronExpression,
    clock: Arc<dyn Clock>,
    on_fire: FireCallback,
    next_fire_ms: Arc<AtomicI64>,
) {
    let mut last_fire: Option<DateTime<Utc>> = None;
    loop {
        let now = clock.now();
        // 时钟可能略早于上次触发时间，避免重复触发
        let from = last_fire.map_or(now, |last| last.max(now));
        let next = match cron.next_after(from) {
            Ok(next) => next,
            Err(err) => {
                warn!(cron = %cron, error = %err, "timer stopped: no next fire time");
                next_fire_ms.store(NOT_ARMED, Ordering::Release);
                return;
            }
        };
        next_fire_ms.store(next.timestamp_millis(), Ordering::Release);

        let wait = (next - now).to_std().unwrap_or_default();
        debug!(next_fire = %next, wait_ms = wait.as_millis() as u64, "timer armed");
        tokio::time::sleep(wait).await;

        last_fire = Some(next);
        on_fire(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use scheduler_core::traits::MonotonicClock;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_on_cron_boundaries() {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 3).unwrap();
        let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::starting_at(start));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let timers = JobTimers::new();
        let armed = timers.arm(
            "tick",
            CronExpression::parse("*/5 * * * * *").unwrap(),
            clock,
            Arc::new(move |at| {
                let _ = tx.send(at);
            }),
        );
        assert!(armed);
        assert_eq!(
            timers.next_fire("tick"),
            Some(start + chrono::Duration::seconds(2))
        );

        assert_eq!(rx.recv().await.unwrap(), start + chrono::Duration::seconds(2));
        assert_eq!(rx.recv().await.unwrap(), start + chrono::Duration::seconds(7));
        assert_eq!(
            timers.next_fire("tick"),
            Some(start + chrono::Duration::seconds(12))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_arm_is_idempotent_and_disarm_stops_firing() {
        let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::default());
        let (tx, mut rx) = mpsc::unbounded_channel::<DateTime<Utc>>();
        let timers = JobTimers::new();
        let cron = CronExpression::parse("* * * * * *").unwrap();

        let callback: FireCallback = Arc::new(move |at| {
            let _ = tx.send(at);
        });
        assert!(timers.arm("job", cron.clone(), Arc::clone(&clock), Arc::clone(&callback)));
        assert!(!timers.arm("job", cron, clock, callback));
        assert_eq!(timers.len(), 1);

        rx.recv().await.unwrap();
        assert!(timers.disarm("job"));
        assert!(!timers.disarm("job"));
        assert!(!timers.is_armed("job"));

        tokio::time::sleep(Duration::from_secs(5)).await;
        while rx.try_recv().is_ok() {}
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
    }
}

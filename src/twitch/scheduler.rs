use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::connection::Chat;
use super::error::{HandlerResult, Result as TwitchResult, TwitchError};

pub type TaskFn = Arc<dyn Fn(Chat) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Wraps an async closure into a [`TaskFn`].
pub fn task<F, Fut>(f: F) -> TaskFn
where
    F: Fn(Chat) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(move |chat| f(chat).boxed())
}

/// How many times a scheduled task fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repeat {
    Forever,
    /// `Times(0)` registers a task that never fires.
    Times(u32),
}

impl Repeat {
    fn allows(self, fired: u32) -> bool {
        match self {
            Repeat::Forever => true,
            Repeat::Times(limit) => fired < limit,
        }
    }
}

impl From<i64> for Repeat {
    /// `-1` is unbounded; any other negative count never fires.
    fn from(count: i64) -> Self {
        match count {
            -1 => Repeat::Forever,
            n if n < 0 => Repeat::Times(0),
            n => Repeat::Times(u32::try_from(n).unwrap_or(u32::MAX)),
        }
    }
}

impl From<i32> for Repeat {
    fn from(count: i32) -> Self {
        Repeat::from(i64::from(count))
    }
}

struct ScheduledTask {
    id: Uuid,
    name: String,
    interval: Duration,
    repeat: Repeat,
    callback: TaskFn,
    fired: Arc<AtomicU32>,
}

/// Runs registered tasks on fixed intervals until they reach their repeat
/// bound or the scheduler is stopped.
///
/// Cancellation is cooperative: a stopped task ends at its next sleep, and a
/// callback that is already running completes.
pub struct Scheduler {
    tasks: Vec<ScheduledTask>,
    token: CancellationToken,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(CancellationToken::new())
    }
}

impl Scheduler {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            tasks: Vec::new(),
            token,
        }
    }

    pub fn schedule_task(
        &mut self,
        name: impl Into<String>,
        interval: Duration,
        repeat: impl Into<Repeat>,
        callback: TaskFn,
    ) -> TwitchResult<()> {
        let name = name.into();
        if interval.is_zero() {
            return Err(TwitchError::InvalidSchedule(format!(
                "task '{}' needs a positive interval",
                name
            )));
        }
        let repeat = repeat.into();
        let id = Uuid::new_v4();
        tracing::debug!(task = %name, task.id = %id, ?interval, ?repeat, "Scheduled task");
        self.tasks.push(ScheduledTask {
            id,
            name,
            interval,
            repeat,
            callback,
            fired: Arc::new(AtomicU32::new(0)),
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Successful invocations of the named task during the current run.
    pub fn fire_count(&self, name: &str) -> Option<u32> {
        self.tasks
            .iter()
            .find(|t| t.name == name)
            .map(|t| t.fired.load(Ordering::Relaxed))
    }

    /// Starts every task concurrently and returns once all of them ended.
    /// A scheduler that was stopped cannot be run again.
    pub async fn run(&self, chat: Chat) {
        if self.token.is_cancelled() {
            tracing::warn!("Scheduler already stopped. Not starting tasks");
            return;
        }
        tracing::info!(tasks = self.tasks.len(), "Starting scheduled tasks");

        let mut wrappers = JoinSet::new();
        for task in &self.tasks {
            task.fired.store(0, Ordering::Relaxed);
            wrappers.spawn(run_task_wrapper(
                task.id,
                task.name.clone(),
                task.interval,
                task.repeat,
                Arc::clone(&task.callback),
                Arc::clone(&task.fired),
                chat.clone(),
                self.token.clone(),
            ));
        }

        while let Some(result) = wrappers.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Scheduled task panicked or was cancelled");
            }
        }
        tracing::info!("All scheduled tasks finished");
    }

    pub fn stop(&self) {
        tracing::info!("Stopping all scheduled tasks...");
        self.token.cancel();
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_task_wrapper(
    id: Uuid,
    name: String,
    interval: Duration,
    repeat: Repeat,
    callback: TaskFn,
    fired: Arc<AtomicU32>,
    chat: Chat,
    token: CancellationToken,
) {
    let mut count = 0u32;
    while !token.is_cancelled() && repeat.allows(count) {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
        if token.is_cancelled() {
            break;
        }

        tracing::info!(task = %name, task.id = %id, "Task executed");
        match callback(chat.clone()).await {
            Ok(()) => {
                count += 1;
                fired.store(count, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!(task = %name, task.id = %id, error = %e, "Scheduled task failed");
            }
        }
    }
    tracing::debug!(task = %name, task.id = %id, fired = count, "Scheduled task ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::twitch::connection::{Connection, ConnectionSettings};
    use tokio::time::Instant;

    fn chat() -> Chat {
        Chat::new(Arc::new(Connection::new(ConnectionSettings::new("bot", None))))
    }

    fn counting(counter: Arc<AtomicU32>) -> TaskFn {
        task(move |_chat| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
    }

    #[test]
    fn test_repeat_from_count() {
        assert_eq!(Repeat::from(-1), Repeat::Forever);
        assert_eq!(Repeat::from(0), Repeat::Times(0));
        assert_eq!(Repeat::from(5), Repeat::Times(5));
        assert_eq!(Repeat::from(-7), Repeat::Times(0));
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let mut scheduler = Scheduler::default();
        let result = scheduler.schedule_task(
            "bad",
            Duration::ZERO,
            Repeat::Forever,
            counting(Arc::new(AtomicU32::new(0))),
        );
        assert!(matches!(result, Err(TwitchError::InvalidSchedule(_))));
        assert!(scheduler.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_task_fires_exactly_n_times() {
        let counter = Arc::new(AtomicU32::new(0));
        let mut scheduler = Scheduler::default();
        scheduler
            .schedule_task("five", Duration::from_secs(10), 5, counting(Arc::clone(&counter)))
            .unwrap();

        let start = Instant::now();
        scheduler.run(chat()).await;

        assert_eq!(counter.load(Ordering::SeqCst), 5);
        assert_eq!(scheduler.fire_count("five"), Some(5));
        // No sixth sleep after the last firing.
        assert!(start.elapsed() < Duration::from_secs(51));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_repeat_never_fires() {
        let counter = Arc::new(AtomicU32::new(0));
        let mut scheduler = Scheduler::default();
        scheduler
            .schedule_task("inert", Duration::from_secs(1), 0, counting(Arc::clone(&counter)))
            .unwrap();

        let start = Instant::now();
        scheduler.run(chat()).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_task_runs_until_stopped() {
        let counter = Arc::new(AtomicU32::new(0));
        let mut scheduler = Scheduler::default();
        scheduler
            .schedule_task(
                "forever",
                Duration::from_secs(10),
                Repeat::Forever,
                counting(Arc::clone(&counter)),
            )
            .unwrap();
        let scheduler = Arc::new(scheduler);

        let running = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move { scheduler.run(chat()).await })
        };

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);

        scheduler.stop();
        running.await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_callback_is_not_counted() {
        let attempts = Arc::new(AtomicU32::new(0));
        let callback = {
            let attempts = Arc::clone(&attempts);
            task(move |_chat| {
                let attempts = Arc::clone(&attempts);
                async move {
                    // Fails on the first attempt only.
                    if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err("not yet".into())
                    } else {
                        Ok(())
                    }
                }
            })
        };
        let mut scheduler = Scheduler::default();
        scheduler
            .schedule_task("flaky", Duration::from_secs(1), 2, callback)
            .unwrap();

        scheduler.run(chat()).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(scheduler.fire_count("flaky"), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tasks_run_concurrently() {
        let fast = Arc::new(AtomicU32::new(0));
        let slow = Arc::new(AtomicU32::new(0));
        let mut scheduler = Scheduler::default();
        scheduler
            .schedule_task("fast", Duration::from_secs(1), 4, counting(Arc::clone(&fast)))
            .unwrap();
        scheduler
            .schedule_task("slow", Duration::from_secs(4), 1, counting(Arc::clone(&slow)))
            .unwrap();

        let start = Instant::now();
        scheduler.run(chat()).await;
        assert_eq!(fast.load(Ordering::SeqCst), 4);
        assert_eq!(slow.load(Ordering::SeqCst), 1);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_stopped_scheduler_does_not_start() {
        let counter = Arc::new(AtomicU32::new(0));
        let mut scheduler = Scheduler::default();
        scheduler
            .schedule_task("never", Duration::from_millis(1), Repeat::Forever, counting(Arc::clone(&counter)))
            .unwrap();
        scheduler.stop();
        scheduler.run(chat()).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}

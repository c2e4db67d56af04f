// Cooperative scheduler - One task owning a min-heap of periodic jobs
use async_trait::async_trait;
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};

pub type ScheduleId = u64;

const IDLE_WAIT: Duration = Duration::from_secs(3600);
const MIN_INTERVAL: Duration = Duration::from_millis(1);

#[async_trait]
pub trait ScheduledJob: Send + Sync {
    async fn run(&self);
}

enum Command {
    Schedule {
        id: ScheduleId,
        job: Arc<dyn ScheduledJob>,
        interval: Duration,
        initial_delay: Duration,
    },
    Rearm {
        id: ScheduleId,
        due: Instant,
    },
    Cancel(ScheduleId),
    Shutdown,
}

struct Entry {
    job: Arc<dyn ScheduledJob>,
    interval: Duration,
}

/// Periodic job runner.
///
/// Each fired job runs on its own task and is re-armed only after the run
/// returns, so successive ticks of one job never overlap. Different jobs run
/// concurrently. Cancelling stops future ticks and leaves a running tick
/// alone.
pub struct Scheduler {
    commands: mpsc::UnboundedSender<Command>,
    next_id: AtomicU64,
    live: Arc<Mutex<HashSet<ScheduleId>>>,
}

impl Scheduler {
    /// Must be called from within a tokio runtime.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_loop(rx, tx.clone()));
        Self {
            commands: tx,
            next_id: AtomicU64::new(1),
            live: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// First tick fires immediately.
    pub fn schedule(&self, job: Arc<dyn ScheduledJob>, interval: Duration) -> ScheduleId {
        self.schedule_with_delay(job, interval, Duration::ZERO)
    }

    pub fn schedule_with_delay(
        &self,
        job: Arc<dyn ScheduledJob>,
        interval: Duration,
        initial_delay: Duration,
    ) -> ScheduleId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let interval = if interval < MIN_INTERVAL {
            tracing::warn!("Schedule {} requested interval {:?}; clamping to {:?}", id, interval, MIN_INTERVAL);
            MIN_INTERVAL
        } else {
            interval
        };

        self.live.lock().insert(id);
        if self
            .commands
            .send(Command::Schedule {
                id,
                job,
                interval,
                initial_delay,
            })
            .is_err()
        {
            tracing::error!("Scheduler loop has stopped; schedule {} will never fire", id);
            self.live.lock().remove(&id);
        }
        id
    }

    /// Idempotent. Returns true if the schedule was live.
    pub fn cancel(&self, id: ScheduleId) -> bool {
        let was_live = self.live.lock().remove(&id);
        if was_live {
            let _ = self.commands.send(Command::Cancel(id));
        }
        was_live
    }

    pub fn is_scheduled(&self, id: ScheduleId) -> bool {
        self.live.lock().contains(&id)
    }

    pub fn active_count(&self) -> usize {
        self.live.lock().len()
    }

    /// Cancel every schedule and stop the loop.
    pub fn shutdown(&self) {
        let cancelled = {
            let mut live = self.live.lock();
            let n = live.len();
            live.clear();
            n
        };
        let _ = self.commands.send(Command::Shutdown);
        tracing::info!("Scheduler shut down; cancelled {} schedules", cancelled);
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

async fn run_loop(mut rx: mpsc::UnboundedReceiver<Command>, tx: mpsc::UnboundedSender<Command>) {
    let mut queue: BinaryHeap<Reverse<(Instant, ScheduleId)>> = BinaryHeap::new();
    let mut jobs: HashMap<ScheduleId, Entry> = HashMap::new();

    loop {
        let next_due = queue.peek().map(|Reverse((due, _))| *due);
        let wake_at = next_due.unwrap_or_else(|| Instant::now() + IDLE_WAIT);

        tokio::select! {
            command = rx.recv() => match command {
                Some(Command::Schedule { id, job, interval, initial_delay }) => {
                    jobs.insert(id, Entry { job, interval });
                    queue.push(Reverse((Instant::now() + initial_delay, id)));
                }
                Some(Command::Rearm { id, due }) => {
                    if jobs.contains_key(&id) {
                        queue.push(Reverse((due.max(Instant::now()), id)));
                    }
                }
                Some(Command::Cancel(id)) => {
                    jobs.remove(&id);
                }
                Some(Command::Shutdown) | None => break,
            },
            _ = sleep_until(wake_at), if next_due.is_some() => {
                let Some(Reverse((due, id))) = queue.pop() else { continue };
                // Stale heap entries for cancelled jobs are skipped.
                let Some(entry) = jobs.get(&id) else { continue };

                let job = entry.job.clone();
                let interval = entry.interval;
                let tx = tx.clone();
                tokio::spawn(async move {
                    job.run().await;
                    let _ = tx.send(Command::Rearm { id, due: due + interval });
                });
            }
        }
    }

    tracing::debug!("Scheduler loop exited with {} jobs registered", jobs.len());
}

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};
use uuid::Uuid;

/// A sweep body; called once per tick and awaited to completion.
pub type Sweep = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

struct ScheduledJob {
    name: String,
    every: Duration,
    sweep: Sweep,
    stop: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

/// Fixed-interval sweeps keyed by id. Each sweep runs in its own loop, so
/// different sweeps overlap freely but a sweep never overlaps itself.
#[derive(Default)]
pub struct Scheduler {
    jobs: Mutex<HashMap<Uuid, ScheduledJob>>,
}

impl Scheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a sweep. It begins ticking on the next [`Scheduler::start`];
    /// the first run happens one full interval after that.
    pub async fn every(&self, name: impl Into<String>, every: Duration, sweep: Sweep) -> Uuid {
        let id = Uuid::new_v4();
        let (stop, _) = watch::channel(false);
        let job = ScheduledJob { name: name.into(), every, sweep, stop, handle: None };
        self.jobs.lock().await.insert(id, job);
        id
    }

    /// Spawns a loop for every registered sweep not running yet.
    pub async fn start(&self) -> usize {
        let mut jobs = self.jobs.lock().await;
        let mut started = 0;
        for (id, job) in jobs.iter_mut().filter(|(_, j)| j.handle.is_none()) {
            info!("starting sweep '{}' every {:?} ({})", job.name, job.every, id);
            job.handle = Some(tokio::spawn(run_loop(
                job.name.clone(),
                job.every,
                job.sweep.clone(),
                job.stop.subscribe(),
            )));
            started += 1;
        }
        started
    }

    /// Stops a single sweep after its current run and forgets it.
    pub async fn cancel(&self, id: Uuid) -> bool {
        let job = self.jobs.lock().await.remove(&id);
        match job {
            Some(job) => {
                shutdown(job).await;
                true
            }
            None => false,
        }
    }

    /// Signals every loop and waits until all of them have exited.
    pub async fn stop(&self) {
        let jobs: Vec<ScheduledJob> = self.jobs.lock().await.drain().map(|(_, j)| j).collect();
        for job in jobs {
            shutdown(job).await;
        }
    }

    pub async fn running(&self) -> usize {
        self.jobs.lock().await.values().filter(|j| j.handle.is_some()).count()
    }
}

async fn shutdown(job: ScheduledJob) {
    let _ = job.stop.send(true);
    if let Some(handle) = job.handle {
        let _ = handle.await;
    }
    debug!("sweep '{}' stopped", job.name);
}

async fn run_loop(name: String, every: Duration, sweep: Sweep, mut stop: watch::Receiver<bool>) {
    let mut tick = interval(every);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tick.tick().await;

    loop {
        tokio::select! {
            _ = tick.tick() => {
                debug!("sweep '{}' firing", name);
                (sweep)().await;
            }
            _ = stop.changed() => break,
        }
    }
}

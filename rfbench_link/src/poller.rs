//! Background status polling.
//!
//! The poller owns no socket. Each tick it locks the shared link, runs the
//! status queries for one axis plus one rotating source query, unlocks, and
//! publishes a [`StatusSample`] on a broadcast channel.
//!
//! ## Stopping
//!
//! A `watch` flag is raced against the link lock, the tick itself and the
//! inter-tick sleep, so [`StatusPoller::stop`] returns within one await
//! point. A tick cut off mid-request force-shuts the socket: the reply still
//! in flight would otherwise be read as the answer to the next request.

use crate::protocol;
use crate::transport::{RetryPolicy, Transport};
use rfbench_common::axis::Axis;
use rfbench_common::consts::REACH_SENTINEL;
use rfbench_common::sample::{AxisReadout, SourceParam, SourceReadout, StatusSample};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Transport shared between the poller and the command gate.
pub type SharedLink<T> = Arc<Mutex<T>>;

/// What the poller asks for and how often.
#[derive(Debug, Clone, PartialEq)]
pub struct PollSchedule {
    /// Axes visited round-robin. Never empty.
    pub axes: Vec<Axis>,
    /// Pause between ticks.
    pub interval: Duration,
    /// Retry budget of each status query.
    pub policy: RetryPolicy,
}

impl PollSchedule {
    /// An empty axis list falls back to every axis.
    pub fn new(axes: Vec<Axis>, interval: Duration, policy: RetryPolicy) -> Self {
        let axes = if axes.is_empty() { Axis::ALL.to_vec() } else { axes };
        Self { axes, interval, policy }
    }

    /// Axis visited on tick `tick`.
    pub fn axis_for_tick(&self, tick: u64) -> Axis {
        self.axes[(tick % self.axes.len() as u64) as usize]
    }
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self::new(Axis::ALL.to_vec(), Duration::from_millis(250), RetryPolicy::default())
    }
}

struct RunningPoll {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Suspendable background status loop.
pub struct StatusPoller<T: Transport> {
    link: SharedLink<T>,
    schedule: Arc<PollSchedule>,
    samples: broadcast::Sender<StatusSample>,
    /// Next tick index; survives stop/start so the round-robin resumes where it left off.
    cursor: Arc<AtomicU64>,
    running: Option<RunningPoll>,
}

impl<T: Transport> StatusPoller<T> {
    pub fn new(link: SharedLink<T>, schedule: PollSchedule, samples: broadcast::Sender<StatusSample>) -> Self {
        Self {
            link,
            schedule: Arc::new(schedule),
            samples,
            cursor: Arc::new(AtomicU64::new(0)),
            running: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.as_ref().is_some_and(|r| !r.task.is_finished())
    }

    /// Index of the next tick.
    pub fn next_tick(&self) -> u64 {
        self.cursor.load(Ordering::Acquire)
    }

    pub fn schedule(&self) -> &PollSchedule {
        &self.schedule
    }

    /// Spawn the poll loop. Returns `false` if it was already running or
    /// there is no tokio runtime to spawn on.
    pub fn start(&mut self) -> bool {
        if self.is_running() {
            return false;
        }
        let Ok(handle) = Handle::try_current() else {
            warn!("Status poller not started: no tokio runtime");
            return false;
        };

        let (stop_tx, stop_rx) = watch::channel(false);
        let task = handle.spawn(poll_loop(
            Arc::clone(&self.link),
            Arc::clone(&self.schedule),
            self.samples.clone(),
            Arc::clone(&self.cursor),
            stop_rx,
        ));
        self.running = Some(RunningPoll { stop_tx, task });
        true
    }

    /// Stop the loop and wait until it no longer touches the link.
    ///
    /// Returns whether a loop was stopped. Calling it on a stopped poller is a no-op.
    pub async fn stop(&mut self) -> bool {
        let Some(running) = self.running.take() else {
            return false;
        };
        let _ = running.stop_tx.send(true);
        if let Err(e) = running.task.await {
            if e.is_panic() {
                warn!("Status poller task panicked: {}", e);
            }
        }
        true
    }
}

async fn wait_for_stop(stop: &mut watch::Receiver<bool>) {
    // A dropped sender means the poller itself is gone.
    let _ = stop.wait_for(|stopped| *stopped).await;
}

async fn poll_loop<T: Transport>(
    link: SharedLink<T>,
    schedule: Arc<PollSchedule>,
    samples: broadcast::Sender<StatusSample>,
    cursor: Arc<AtomicU64>,
    mut stop: watch::Receiver<bool>,
) {
    debug!("Status poller started");
    loop {
        let tick = cursor.load(Ordering::Acquire);

        let mut guard = tokio::select! {
            biased;
            _ = wait_for_stop(&mut stop) => break,
            guard = link.lock() => guard,
        };

        let finished = tokio::select! {
            biased;
            _ = wait_for_stop(&mut stop) => None,
            sample = run_tick(&mut *guard, &schedule, tick) => Some(sample),
        };
        let Some(sample) = finished else {
            guard.shutdown();
            break;
        };
        drop(guard);

        cursor.store(tick.wrapping_add(1), Ordering::Release);
        // No subscribers is not an error.
        let _ = samples.send(sample);

        tokio::select! {
            biased;
            _ = wait_for_stop(&mut stop) => break,
            _ = sleep(schedule.interval) => {}
        }
    }
    debug!("Status poller stopped");
}

/// Run the queries of one tick. Failed queries leave their field empty.
async fn run_tick<T: Transport>(link: &mut T, schedule: &PollSchedule, tick: u64) -> StatusSample {
    let axis = schedule.axis_for_tick(tick);
    let policy = &schedule.policy;

    let (reach, home) = if axis.skips_reach_query() {
        let home = query(link, protocol::HOME_ALL_QUERY, policy).await;
        (Some(REACH_SENTINEL.to_string()), home)
    } else {
        let reach = query(link, &protocol::reach_query(axis), policy).await;
        let home = query(link, &protocol::home_query(axis), policy).await;
        (reach, home)
    };
    let speed = query(link, &protocol::speed_query(axis), policy).await;

    let param = SourceParam::for_tick(tick);
    let value = query(link, protocol::source_query(param), policy).await;

    StatusSample::new(
        tick,
        axis,
        AxisReadout { reach, home, speed },
        SourceReadout::single(param, value),
    )
}

async fn query<T: Transport>(link: &mut T, request: &str, policy: &RetryPolicy) -> Option<String> {
    let result = match link.send(request, policy).await {
        Ok(()) => link.receive(policy).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(reply) => Some(reply),
        Err(e) => {
            warn!("Status query {:?} failed: {}", request, e);
            if e.is_transport() {
                link.shutdown();
            }
            None
        }
    }
}

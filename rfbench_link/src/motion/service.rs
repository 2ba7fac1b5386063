//! Async driver for [`MotionCoordinator`].
//!
//! One task owns the coordinator. It waits on three sources at once: motion
//! requests from [`MotionHandle`]s, status samples from the poller, and the
//! deadline of the running operation. Whatever fires is fed to the
//! coordinator and the resulting actions are carried out before the next wait.

use super::{MotionAction, MotionCoordinator, MotionSnapshot, OperationCompleted};
use crate::error::MotionError;
use crate::gate::CommandGate;
use crate::transport::Transport;
use parking_lot::RwLock;
use rfbench_common::axis::Axis;
use rfbench_common::sample::StatusSample;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

/// Capacity of the completion event channel.
const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy)]
enum MotionRequest {
    Feed(Axis),
    Home(Axis),
}

/// Cloneable front end of a running [`MotionService`].
#[derive(Debug, Clone)]
pub struct MotionHandle {
    requests: mpsc::UnboundedSender<MotionRequest>,
    events: broadcast::Sender<OperationCompleted>,
    snapshot: Arc<RwLock<MotionSnapshot>>,
}

impl MotionHandle {
    pub fn request_feed(&self, axis: Axis) -> Result<(), MotionError> {
        self.requests
            .send(MotionRequest::Feed(axis))
            .map_err(|_| MotionError::ServiceStopped)
    }

    pub fn request_home(&self, axis: Axis) -> Result<(), MotionError> {
        self.requests
            .send(MotionRequest::Home(axis))
            .map_err(|_| MotionError::ServiceStopped)
    }

    /// Completion events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<OperationCompleted> {
        self.events.subscribe()
    }

    pub fn snapshot(&self) -> MotionSnapshot {
        self.snapshot.read().clone()
    }
}

/// Task state of the motion driver.
pub struct MotionService<T: Transport> {
    coordinator: MotionCoordinator,
    gate: Arc<CommandGate<T>>,
    samples: broadcast::Receiver<StatusSample>,
    requests: mpsc::UnboundedReceiver<MotionRequest>,
    events: broadcast::Sender<OperationCompleted>,
    snapshot: Arc<RwLock<MotionSnapshot>>,
}

impl<T: Transport> MotionService<T> {
    /// Spawn the driver on the current runtime.
    ///
    /// The task ends once every [`MotionHandle`] is dropped.
    pub fn spawn(
        coordinator: MotionCoordinator,
        gate: Arc<CommandGate<T>>,
        samples: broadcast::Receiver<StatusSample>,
    ) -> (MotionHandle, JoinHandle<()>) {
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let snapshot = Arc::new(RwLock::new(coordinator.snapshot()));

        let handle = MotionHandle {
            requests: requests_tx,
            events: events.clone(),
            snapshot: Arc::clone(&snapshot),
        };
        let service = Self {
            coordinator,
            gate,
            samples,
            requests: requests_rx,
            events,
            snapshot,
        };
        let task = tokio::spawn(service.run());
        (handle, task)
    }

    async fn run(mut self) {
        debug!("Motion service started");
        let mut samples_open = true;
        loop {
            let deadline = self.coordinator.deadline();
            let actions = tokio::select! {
                request = self.requests.recv() => match request {
                    Some(MotionRequest::Feed(axis)) => self.coordinator.request_feed(axis, Instant::now()),
                    Some(MotionRequest::Home(axis)) => self.coordinator.request_home(axis, Instant::now()),
                    None => break,
                },
                sample = self.samples.recv(), if samples_open => match sample {
                    Ok(sample) => self.coordinator.on_sample(&sample, Instant::now()),
                    Err(RecvError::Lagged(skipped)) => {
                        debug!("Motion service skipped {} samples", skipped);
                        Vec::new()
                    }
                    Err(RecvError::Closed) => {
                        samples_open = false;
                        Vec::new()
                    }
                },
                _ = wait_until(deadline) => self.coordinator.poll_timeout(Instant::now()),
            };
            self.apply(actions).await;
        }
        debug!("Motion service stopped");
    }

    /// Carry out actions in order. Dispatch failures feed back into the coordinator.
    async fn apply(&mut self, actions: Vec<MotionAction>) {
        let mut pending = VecDeque::from(actions);
        while let Some(action) = pending.pop_front() {
            match action {
                MotionAction::Dispatch { axis, kind, command } => {
                    if let Err(e) = self.gate.send_command(&command).await {
                        pending.extend(self.coordinator.on_dispatch_failed(axis, kind, e, Instant::now()));
                    }
                }
                MotionAction::Completed(event) => {
                    if event.success() {
                        info!("Operation completed: {} {}", event.kind, event.axis);
                    } else {
                        warn!("Operation failed: {} {} ({:?})", event.kind, event.axis, event.outcome);
                    }
                    // No subscribers is not an error.
                    let _ = self.events.send(event);
                }
            }
        }
        *self.snapshot.write() = self.coordinator.snapshot();
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

//! Pure feed/home state machine.

use super::{
    MotionAction, MotionSnapshot, OperationCompleted, OperationKind, OperationOutcome,
    OperationRequest,
};
use crate::error::{LinkError, MotionError};
use rfbench_common::axis::{Axis, AxisStates};
use rfbench_common::consts::{CONFIRMATIONS_REQUIRED, OPERATION_TIMEOUT};
use rfbench_common::sample::StatusSample;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
struct Active {
    request: OperationRequest,
    deadline: Instant,
}

/// Per-axis motion state, the operation queue and its supervision.
///
/// Methods take `now` and return the actions the caller must carry out in order.
#[derive(Debug, Clone)]
pub struct MotionCoordinator {
    states: AxisStates,
    current: Option<Active>,
    queue: VecDeque<OperationRequest>,
    confirmations_required: u32,
    timeout: Duration,
}

impl Default for MotionCoordinator {
    fn default() -> Self {
        Self::new(CONFIRMATIONS_REQUIRED, OPERATION_TIMEOUT)
    }
}

impl MotionCoordinator {
    /// `confirmations_required` below 1 is treated as 1.
    pub fn new(confirmations_required: u32, timeout: Duration) -> Self {
        Self {
            states: AxisStates::new(),
            current: None,
            queue: VecDeque::new(),
            confirmations_required: confirmations_required.max(1),
            timeout,
        }
    }

    pub fn states(&self) -> &AxisStates {
        &self.states
    }

    pub fn current(&self) -> Option<&OperationRequest> {
        self.current.as_ref().map(|active| &active.request)
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn is_idle(&self) -> bool {
        self.current.is_none()
    }

    /// Deadline of the running operation.
    pub fn deadline(&self) -> Option<Instant> {
        self.current.as_ref().map(|active| active.deadline)
    }

    /// Feed `axis`, homing every other reached axis first.
    pub fn request_feed(&mut self, axis: Axis, now: Instant) -> Vec<MotionAction> {
        for blocking in self.states.reached_except(axis) {
            info!("Feed {} requested while {} is reached; homing {} first", axis, blocking, blocking);
            self.queue.push_back(OperationRequest::home(blocking));
        }
        self.queue.push_back(OperationRequest::feed(axis));
        self.advance(now)
    }

    pub fn request_home(&mut self, axis: Axis, now: Instant) -> Vec<MotionAction> {
        self.queue.push_back(OperationRequest::home(axis));
        self.advance(now)
    }

    /// Count or reset confirmations from a status sample.
    pub fn on_sample(&mut self, sample: &StatusSample, now: Instant) -> Vec<MotionAction> {
        let Some(active) = self.current.as_mut() else {
            return Vec::new();
        };
        let request = &mut active.request;
        let Some(readout) = sample.readout(request.axis) else {
            return Vec::new();
        };

        if readout.confirms(request.kind.field()) {
            request.confirmations += 1;
            debug!(
                "{} {} confirmation {}/{}",
                request.kind, request.axis, request.confirmations, self.confirmations_required
            );
        } else {
            request.confirmations = 0;
        }

        if request.confirmations >= self.confirmations_required {
            self.complete(OperationOutcome::Confirmed, None, now)
        } else {
            Vec::new()
        }
    }

    /// The gate could not deliver the command for the running operation.
    pub fn on_dispatch_failed(
        &mut self,
        axis: Axis,
        kind: OperationKind,
        error: LinkError,
        now: Instant,
    ) -> Vec<MotionAction> {
        let running = self
            .current()
            .is_some_and(|request| request.axis == axis && request.kind == kind);
        if !running {
            return Vec::new();
        }
        let error = MotionError::Dispatch { axis, kind, source: error };
        self.complete(OperationOutcome::DispatchFailed, Some(error), now)
    }

    /// Fail the running operation if its deadline has passed.
    pub fn poll_timeout(&mut self, now: Instant) -> Vec<MotionAction> {
        let Some(active) = self.current.as_ref() else {
            return Vec::new();
        };
        if now < active.deadline {
            return Vec::new();
        }
        let OperationRequest { axis, kind, .. } = active.request;
        let error = MotionError::OperationTimeout {
            axis,
            kind,
            timeout_s: self.timeout.as_secs(),
        };
        self.complete(OperationOutcome::TimedOut, Some(error), now)
    }

    pub fn status_text(&self) -> String {
        match self.current() {
            None => "Ready".to_string(),
            Some(request) => match request.kind {
                OperationKind::Feed => format!("Feeding {}...", request.axis),
                OperationKind::Home => format!("Homing {}...", request.axis),
            },
        }
    }

    pub fn snapshot(&self) -> MotionSnapshot {
        MotionSnapshot {
            states: self.states,
            current: self.current().copied(),
            queued: self.queue.len(),
            status: self.status_text(),
        }
    }

    fn complete(
        &mut self,
        outcome: OperationOutcome,
        error: Option<MotionError>,
        now: Instant,
    ) -> Vec<MotionAction> {
        let Some(active) = self.current.take() else {
            return Vec::new();
        };
        let OperationRequest { axis, kind, .. } = active.request;

        let event = match error {
            None => {
                self.states.set(axis, kind.done_state());
                info!("{} {} confirmed", kind, axis);
                OperationCompleted::confirmed(axis, kind)
            }
            Some(error) => {
                // The axis keeps its in-progress state: its position is unknown.
                warn!("{}", error);
                OperationCompleted::failed(axis, kind, outcome, error)
            }
        };

        let mut actions = vec![MotionAction::Completed(event)];
        actions.extend(self.advance(now));
        actions
    }

    /// Start queued operations until one is running or the queue is empty.
    fn advance(&mut self, now: Instant) -> Vec<MotionAction> {
        let mut actions = Vec::new();
        while self.current.is_none() {
            let Some(request) = self.queue.pop_front() else {
                break;
            };
            let OperationRequest { axis, kind, .. } = request;

            if kind == OperationKind::Feed {
                let blocking = self.states.reached_except(axis);
                if !blocking.is_empty() {
                    // Failed homes leave the axis Homing, so this cannot repeat forever.
                    self.queue.push_front(request);
                    for &other in blocking.iter().rev() {
                        info!("Feed {} reached the queue head while {} is reached; homing {} first", axis, other, other);
                        self.queue.push_front(OperationRequest::home(other));
                    }
                    continue;
                }
            }

            info!("Starting {} {}", kind, axis);
            self.states.set(axis, kind.in_progress_state());
            self.current = Some(Active {
                request: OperationRequest::new(kind, axis),
                deadline: now + self.timeout,
            });
            actions.push(MotionAction::Dispatch {
                axis,
                kind,
                command: kind.command(axis),
            });
        }
        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportCause;
    use rfbench_common::axis::AxisState;
    use rfbench_common::sample::{AxisReadout, SourceReadout};

    fn sample(axis: Axis, reach: &str, home: &str) -> StatusSample {
        let readout = AxisReadout {
            reach: Some(reach.to_string()),
            home: Some(home.to_string()),
            speed: None,
        };
        StatusSample::new(0, axis, readout, SourceReadout::default())
    }

    fn dispatch(axis: Axis, kind: OperationKind) -> MotionAction {
        MotionAction::Dispatch {
            axis,
            kind,
            command: kind.command(axis),
        }
    }

    fn completions(actions: &[MotionAction]) -> Vec<(Axis, OperationKind, OperationOutcome)> {
        actions
            .iter()
            .filter_map(|action| match action {
                MotionAction::Completed(event) => Some((event.axis, event.kind, event.outcome)),
                MotionAction::Dispatch { .. } => None,
            })
            .collect()
    }

    /// Feed `axis` and confirm it twice.
    fn reach(coordinator: &mut MotionCoordinator, axis: Axis, now: Instant) {
        coordinator.request_feed(axis, now);
        coordinator.on_sample(&sample(axis, "OK", "NO"), now);
        coordinator.on_sample(&sample(axis, "OK", "NO"), now);
        assert_eq!(coordinator.states().get(axis), AxisState::Reached);
    }

    #[test]
    fn feed_from_idle_dispatches_at_once() {
        let now = Instant::now();
        let mut coordinator = MotionCoordinator::default();

        let actions = coordinator.request_feed(Axis::X, now);
        assert_eq!(actions, vec![dispatch(Axis::X, OperationKind::Feed)]);
        assert_eq!(coordinator.states().get(Axis::X), AxisState::Reaching);
        assert_eq!(coordinator.deadline(), Some(now + OPERATION_TIMEOUT));
        assert_eq!(coordinator.status_text(), "Feeding X...");
    }

    #[test]
    fn debounce_needs_consecutive_confirmations() {
        let now = Instant::now();
        let mut coordinator = MotionCoordinator::default();
        coordinator.request_home(Axis::Y, now);

        assert!(coordinator.on_sample(&sample(Axis::Y, "NO", "OK"), now).is_empty());
        assert!(coordinator.on_sample(&sample(Axis::Y, "NO", "NOK"), now).is_empty());
        assert!(coordinator.on_sample(&sample(Axis::Y, "NO", "OK"), now).is_empty());
        assert_eq!(coordinator.current().unwrap().confirmations, 1);

        let actions = coordinator.on_sample(&sample(Axis::Y, "NO", "OK"), now);
        assert_eq!(completions(&actions), vec![(Axis::Y, OperationKind::Home, OperationOutcome::Confirmed)]);
        assert_eq!(coordinator.states().get(Axis::Y), AxisState::Homed);
        assert!(coordinator.is_idle());
        assert_eq!(coordinator.status_text(), "Ready");
    }

    #[test]
    fn samples_for_other_axes_are_ignored() {
        let now = Instant::now();
        let mut coordinator = MotionCoordinator::default();
        coordinator.request_home(Axis::X, now);

        coordinator.on_sample(&sample(Axis::X, "NO", "OK"), now);
        coordinator.on_sample(&sample(Axis::Y, "NO", "NO"), now);
        let actions = coordinator.on_sample(&sample(Axis::X, "NO", "OK"), now);
        assert_eq!(completions(&actions).len(), 1);
    }

    #[test]
    fn feed_confirms_on_reach_field_only() {
        let now = Instant::now();
        let mut coordinator = MotionCoordinator::default();
        coordinator.request_feed(Axis::Theta, now);

        coordinator.on_sample(&sample(Axis::Theta, "NO", "OK"), now);
        coordinator.on_sample(&sample(Axis::Theta, "NO", "OK"), now);
        assert_eq!(coordinator.states().get(Axis::Theta), AxisState::Reaching);
    }

    #[test]
    fn conflicting_feed_homes_reached_axis_first() {
        let now = Instant::now();
        let mut coordinator = MotionCoordinator::default();
        reach(&mut coordinator, Axis::X, now);

        let actions = coordinator.request_feed(Axis::Y, now);
        assert_eq!(actions, vec![dispatch(Axis::X, OperationKind::Home)]);
        assert_eq!(coordinator.queued(), 1);

        coordinator.on_sample(&sample(Axis::X, "NO", "OK"), now);
        let actions = coordinator.on_sample(&sample(Axis::X, "NO", "OK"), now);
        assert_eq!(
            actions,
            vec![
                MotionAction::Completed(OperationCompleted::confirmed(Axis::X, OperationKind::Home)),
                dispatch(Axis::Y, OperationKind::Feed),
            ]
        );
        assert_eq!(coordinator.states().get(Axis::X), AxisState::Homed);
        assert_eq!(coordinator.states().get(Axis::Y), AxisState::Reaching);
    }

    #[test]
    fn feed_of_the_reached_axis_itself_has_no_conflict() {
        let now = Instant::now();
        let mut coordinator = MotionCoordinator::default();
        reach(&mut coordinator, Axis::Phi, now);

        let actions = coordinator.request_feed(Axis::Phi, now);
        assert_eq!(actions, vec![dispatch(Axis::Phi, OperationKind::Feed)]);
    }

    #[test]
    fn home_has_no_conflict_check() {
        let now = Instant::now();
        let mut coordinator = MotionCoordinator::default();
        reach(&mut coordinator, Axis::X, now);

        let actions = coordinator.request_home(Axis::Y, now);
        assert_eq!(actions, vec![dispatch(Axis::Y, OperationKind::Home)]);
        assert_eq!(coordinator.queued(), 0);
    }

    #[test]
    fn requests_queue_behind_the_running_operation() {
        let now = Instant::now();
        let mut coordinator = MotionCoordinator::default();
        coordinator.request_home(Axis::X, now);

        assert!(coordinator.request_home(Axis::Y, now).is_empty());
        assert_eq!(coordinator.queued(), 1);
        assert_eq!(coordinator.states().get(Axis::Y), AxisState::Unknown);
        assert_eq!(coordinator.snapshot().status, "Homing X...");
    }

    #[test]
    fn timeout_fails_and_keeps_state() {
        let start = Instant::now();
        let mut coordinator = MotionCoordinator::default();
        coordinator.request_home(Axis::X, start);

        assert!(coordinator.poll_timeout(start + Duration::from_secs(89)).is_empty());
        let actions = coordinator.poll_timeout(start + OPERATION_TIMEOUT);
        let [MotionAction::Completed(event)] = actions.as_slice() else {
            panic!("expected one completion, got {actions:?}");
        };
        assert_eq!(event.outcome, OperationOutcome::TimedOut);
        assert_eq!(
            event.error,
            Some(MotionError::OperationTimeout {
                axis: Axis::X,
                kind: OperationKind::Home,
                timeout_s: 90,
            })
        );
        assert_eq!(coordinator.states().get(Axis::X), AxisState::Homing);
        assert!(coordinator.poll_timeout(start + Duration::from_secs(200)).is_empty());
    }

    #[test]
    fn dispatch_failure_completes_and_starts_next() {
        let now = Instant::now();
        let mut coordinator = MotionCoordinator::default();
        coordinator.request_home(Axis::X, now);
        coordinator.request_home(Axis::Z, now);

        let error = LinkError::transport(TransportCause::Timeout, 3);
        let actions = coordinator.on_dispatch_failed(Axis::X, OperationKind::Home, error, now);
        assert_eq!(
            completions(&actions),
            vec![(Axis::X, OperationKind::Home, OperationOutcome::DispatchFailed)]
        );
        assert_eq!(actions.last(), Some(&dispatch(Axis::Z, OperationKind::Home)));
    }

    #[test]
    fn stale_dispatch_failure_is_ignored() {
        let now = Instant::now();
        let mut coordinator = MotionCoordinator::default();
        coordinator.request_home(Axis::X, now);

        let error = LinkError::Protocol("bad".to_string());
        assert!(coordinator.on_dispatch_failed(Axis::Y, OperationKind::Home, error, now).is_empty());
        assert!(!coordinator.is_idle());
    }

    #[test]
    fn feed_queued_behind_another_feed_homes_it_first() {
        let now = Instant::now();
        let mut coordinator = MotionCoordinator::default();
        coordinator.request_feed(Axis::X, now);
        // X is only reaching, so nothing to home yet.
        assert!(coordinator.request_feed(Axis::Y, now).is_empty());

        coordinator.on_sample(&sample(Axis::X, "OK", "NO"), now);
        let actions = coordinator.on_sample(&sample(Axis::X, "OK", "NO"), now);
        assert_eq!(
            actions,
            vec![
                MotionAction::Completed(OperationCompleted::confirmed(Axis::X, OperationKind::Feed)),
                dispatch(Axis::X, OperationKind::Home),
            ]
        );
        assert_eq!(coordinator.states().get(Axis::X), AxisState::Homing);
        assert_eq!(coordinator.queued(), 1);

        coordinator.on_sample(&sample(Axis::X, "NO", "OK"), now);
        let actions = coordinator.on_sample(&sample(Axis::X, "NO", "OK"), now);
        assert_eq!(
            actions,
            vec![
                MotionAction::Completed(OperationCompleted::confirmed(Axis::X, OperationKind::Home)),
                dispatch(Axis::Y, OperationKind::Feed),
            ]
        );
        assert_eq!(coordinator.states().get(Axis::Y), AxisState::Reaching);
    }

    #[test]
    fn queued_feed_still_runs_after_inserted_home_fails() {
        let start = Instant::now();
        let mut coordinator = MotionCoordinator::default();
        coordinator.request_feed(Axis::X, start);
        coordinator.request_feed(Axis::Y, start);
        coordinator.on_sample(&sample(Axis::X, "OK", "NO"), start);
        coordinator.on_sample(&sample(Axis::X, "OK", "NO"), start);

        let actions = coordinator.poll_timeout(start + OPERATION_TIMEOUT);
        assert_eq!(
            completions(&actions),
            vec![(Axis::X, OperationKind::Home, OperationOutcome::TimedOut)]
        );
        assert_eq!(actions.last(), Some(&dispatch(Axis::Y, OperationKind::Feed)));
        assert_eq!(coordinator.queued(), 0);
    }

    #[test]
    fn failed_home_leaves_axis_homing() {
        let start = Instant::now();
        let mut coordinator = MotionCoordinator::default();
        reach(&mut coordinator, Axis::X, start);

        coordinator.request_feed(Axis::Y, start);
        let actions = coordinator.poll_timeout(start + OPERATION_TIMEOUT);
        assert_eq!(
            completions(&actions),
            vec![(Axis::X, OperationKind::Home, OperationOutcome::TimedOut)]
        );
        assert_eq!(coordinator.states().get(Axis::X), AxisState::Homing);
        assert_eq!(actions.last(), Some(&dispatch(Axis::Y, OperationKind::Feed)));
    }

    #[test]
    fn z_feed_never_confirms_from_sentinel() {
        let now = Instant::now();
        let mut coordinator = MotionCoordinator::new(1, OPERATION_TIMEOUT);
        coordinator.request_feed(Axis::Z, now);

        assert!(coordinator.on_sample(&sample(Axis::Z, "N/A", "OK"), now).is_empty());
        assert_eq!(coordinator.states().get(Axis::Z), AxisState::Reaching);
    }
}

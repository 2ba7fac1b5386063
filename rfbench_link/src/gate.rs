//! Single-flight foreground commands.
//!
//! Every foreground command runs the same sequence:
//!
//! 1. stop the status poller (if installed) and wait until it is quiet
//! 2. lock the link
//! 3. send, then receive exactly one line unless the command is a
//!    configuration directive
//! 4. unlock
//! 5. restart the poller
//!
//! Steps 4 and 5 live in drop guards, so they happen on every exit path,
//! including a caller that drops the future halfway through.

use crate::error::LinkResult;
use crate::poller::{SharedLink, StatusPoller};
use crate::protocol;
use crate::transport::{RetryPolicy, Transport};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

/// Answer to a foreground command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Response line.
    Line(String),
    /// Configuration directive sent; instruments do not answer these.
    Acknowledged,
}

impl Reply {
    pub fn text(&self) -> Option<&str> {
        match self {
            Reply::Line(text) => Some(text),
            Reply::Acknowledged => None,
        }
    }
}

/// Serializes foreground commands against the status poller.
pub struct CommandGate<T: Transport> {
    link: SharedLink<T>,
    /// Also serializes gate callers: held for the whole command.
    poller: Mutex<Option<StatusPoller<T>>>,
    policy: RetryPolicy,
}

impl<T: Transport> CommandGate<T> {
    pub fn new(link: SharedLink<T>, policy: RetryPolicy) -> Self {
        Self {
            link,
            poller: Mutex::new(None),
            policy,
        }
    }

    pub fn link(&self) -> &SharedLink<T> {
        &self.link
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Install and start `poller`, stopping any previous one first.
    pub async fn install_poller(&self, mut poller: StatusPoller<T>) {
        let mut slot = self.poller.lock().await;
        if let Some(mut old) = slot.take() {
            old.stop().await;
        }
        poller.start();
        *slot = Some(poller);
    }

    /// Stop and detach the poller, if any.
    pub async fn remove_poller(&self) -> Option<StatusPoller<T>> {
        let mut slot = self.poller.lock().await;
        let mut poller = slot.take()?;
        poller.stop().await;
        Some(poller)
    }

    pub async fn poller_running(&self) -> bool {
        self.poller
            .lock()
            .await
            .as_ref()
            .is_some_and(StatusPoller::is_running)
    }

    /// Run one foreground command.
    ///
    /// Queries and plain commands get exactly one receive; configuration
    /// directives get none and return [`Reply::Acknowledged`].
    pub async fn send_command(&self, text: &str) -> LinkResult<Reply> {
        let mut slot = self.poller.lock().await;
        let mut resume = PollerResume { slot: &mut *slot };
        resume.pause().await;

        let result = self.exchange(text).await;
        drop(resume);

        if let Err(e) = &result {
            warn!("Command {:?} failed: {}", text.trim(), e);
        }
        result
    }

    async fn exchange(&self, text: &str) -> LinkResult<Reply> {
        let mut flight = InFlight {
            link: self.link.lock().await,
            complete: false,
        };

        flight.link.send(text, &self.policy).await?;
        if protocol::is_config_directive(text) {
            debug!("Configuration directive sent, no reply expected");
            flight.complete = true;
            return Ok(Reply::Acknowledged);
        }

        let reply = flight.link.receive(&self.policy).await;
        flight.complete = reply.is_ok();
        reply.map(Reply::Line)
    }
}

/// Restarts the installed poller when dropped.
struct PollerResume<'a, T: Transport> {
    slot: &'a mut Option<StatusPoller<T>>,
}

impl<T: Transport> PollerResume<'_, T> {
    async fn pause(&mut self) {
        if let Some(poller) = self.slot.as_mut() {
            if poller.stop().await {
                debug!("Status poller paused");
            }
        }
    }
}

impl<T: Transport> Drop for PollerResume<'_, T> {
    fn drop(&mut self) {
        if let Some(poller) = self.slot.as_mut() {
            poller.start();
        }
    }
}

/// Link lock held for one request.
///
/// Unless the exchange completed cleanly the socket is shut on release, so a
/// late reply can never pair with the next request.
struct InFlight<'a, T: Transport> {
    link: MutexGuard<'a, T>,
    complete: bool,
}

impl<T: Transport> Drop for InFlight<'_, T> {
    fn drop(&mut self) {
        if !self.complete {
            self.link.shutdown();
        }
    }
}

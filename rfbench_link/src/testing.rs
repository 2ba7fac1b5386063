//! In-memory [`Transport`] for unit tests.

use crate::error::{LinkError, LinkResult, TransportCause};
use crate::protocol;
use crate::transport::{RetryPolicy, Transport};
use async_trait::async_trait;
use std::collections::VecDeque;

/// Maps the last request to a reply.
pub type Responder = fn(&str) -> LinkResult<String>;

/// Scripted transport recording every call made through it.
#[derive(Debug)]
pub struct MockTransport {
    /// Payloads passed to `send`, in order.
    pub sent: Vec<String>,
    /// Number of `receive` calls.
    pub receives: usize,
    /// Number of `shutdown` calls.
    pub shutdowns: usize,
    /// Fail every `send` with this error.
    pub send_error: Option<LinkError>,
    /// Never complete `receive`.
    pub hang_receive: bool,
    /// Replies consumed before falling back to the responder.
    pub replies: VecDeque<LinkResult<String>>,
    pub responder: Responder,
    pub connected: bool,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::with_responder(default_responder)
    }
}

impl MockTransport {
    pub fn with_responder(responder: Responder) -> Self {
        Self {
            sent: Vec::new(),
            receives: 0,
            shutdowns: 0,
            send_error: None,
            hang_receive: false,
            replies: VecDeque::new(),
            responder,
            connected: true,
        }
    }

    /// Requests other than the status queries.
    pub fn commands(&self) -> Vec<&str> {
        self.sent
            .iter()
            .map(String::as_str)
            .filter(|s| !protocol::is_query(s))
            .collect()
    }
}

fn default_responder(request: &str) -> LinkResult<String> {
    if protocol::is_query(request) {
        Ok("NO".to_string())
    } else {
        Ok("ACK".to_string())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, payload: &str, _policy: &RetryPolicy) -> LinkResult<()> {
        if let Some(err) = &self.send_error {
            return Err(err.clone());
        }
        self.sent.push(payload.to_string());
        tokio::task::yield_now().await;
        Ok(())
    }

    async fn receive(&mut self, _policy: &RetryPolicy) -> LinkResult<String> {
        self.receives += 1;
        if self.hang_receive {
            std::future::pending::<()>().await;
        }
        tokio::task::yield_now().await;
        if let Some(reply) = self.replies.pop_front() {
            return reply;
        }
        match self.sent.last() {
            Some(request) => (self.responder)(request),
            None => Err(LinkError::transport(TransportCause::EmptyResponse, 1)),
        }
    }

    fn shutdown(&mut self) {
        self.shutdowns += 1;
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

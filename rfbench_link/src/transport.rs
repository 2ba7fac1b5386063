//! TCP transport with per-attempt timeouts and capped exponential backoff.
//!
//! # Retry schedule
//!
//! Attempt `i` (0-indexed) gets `min(base * 2^i, 5 s)`. After attempt `i`
//! fails, the link sleeps `0.2 s * (i + 1)` before trying again.
//!
//! # Failure handling
//!
//! - Connection-class failures (refused, reset, peer closed) drop the socket;
//!   the next attempt reconnects to the last known peer first.
//! - Any failed or timed-out send drops the socket too: a half-written frame
//!   must not be followed by a full one on the same stream.
//! - Encode/decode faults abort at once with [`LinkError::Protocol`].
//! - A receive that sees the peer close after some bytes returns the partial
//!   data instead of discarding it.

use crate::error::{LinkError, LinkResult, TransportCause};
use crate::protocol;
use async_trait::async_trait;
use rfbench_common::consts::{DEFAULT_BUFFER_SIZE, MAX_ATTEMPT_TIMEOUT, RETRY_DELAY_STEP};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// Timeout for attempt `attempt`: `min(base * 2^attempt, 5 s)`.
pub fn attempt_timeout(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt);
    base.saturating_mul(factor).min(MAX_ATTEMPT_TIMEOUT)
}

/// Pause after failed attempt `attempt`: `0.2 s * (attempt + 1)`.
pub fn retry_delay(attempt: u32) -> Duration {
    RETRY_DELAY_STEP.saturating_mul(attempt.saturating_add(1))
}

/// Retry budget for one send or receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts; values below 1 are treated as 1.
    pub max_retries: u32,
    /// Timeout of the first attempt.
    pub base_timeout: Duration,
    /// Receive chunk size.
    pub buffer_size: usize,
}

impl RetryPolicy {
    pub const fn new(max_retries: u32, base_timeout: Duration) -> Self {
        Self {
            max_retries,
            base_timeout,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    #[inline]
    pub fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    #[inline]
    pub fn attempt_timeout(&self, attempt: u32) -> Duration {
        attempt_timeout(self.base_timeout, attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(500))
    }
}

/// Connection bookkeeping shown to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEndpoint {
    pub host: String,
    pub port: u16,
    pub connected: bool,
    pub last_error: Option<String>,
}

impl LinkEndpoint {
    fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            connected: false,
            last_error: None,
        }
    }
}

/// Request/response byte pipe shared by the poller and the command gate.
///
/// [`TransportLink`] is the TCP implementation; tests substitute in-memory ones.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Write one request line.
    async fn send(&mut self, payload: &str, policy: &RetryPolicy) -> LinkResult<()>;

    /// Read one response line.
    async fn receive(&mut self, policy: &RetryPolicy) -> LinkResult<String>;

    /// Force the socket closed, keeping the peer for a later reconnect.
    ///
    /// Called when a request was abandoned mid-flight: a late reply would
    /// otherwise be read as the answer to the next request.
    fn shutdown(&mut self);

    fn is_connected(&self) -> bool;
}

/// How a read loop ended.
enum FrameRead {
    /// A terminated line is buffered.
    Line,
    /// Peer closed after sending some bytes.
    ClosedWithPartial,
    /// Peer closed without sending anything.
    ClosedEmpty,
}

/// TCP transport to one instrument.
#[derive(Debug)]
pub struct TransportLink {
    stream: Option<TcpStream>,
    /// Last peer successfully connected to
    peer: Option<(String, u16)>,
    connect_timeout: Duration,
    endpoint: Option<LinkEndpoint>,
    /// Bytes received past the end of the last returned line
    pending: Vec<u8>,
}

impl Default for TransportLink {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportLink {
    pub fn new() -> Self {
        Self {
            stream: None,
            peer: None,
            connect_timeout: MAX_ATTEMPT_TIMEOUT,
            endpoint: None,
            pending: Vec::new(),
        }
    }

    /// Connect to `host:port`, replacing any previous connection.
    ///
    /// The peer is remembered for automatic reconnects only if this succeeds.
    pub async fn connect(&mut self, host: &str, port: u16, connect_timeout: Duration) -> LinkResult<()> {
        self.stream = None;
        self.peer = None;
        self.pending.clear();
        self.connect_timeout = connect_timeout;

        let mut endpoint = LinkEndpoint::new(host, port);
        let result = open_stream(host, port, connect_timeout).await;
        match result {
            Ok(stream) => {
                info!("Connected to instrument at {}:{}", host, port);
                endpoint.connected = true;
                self.stream = Some(stream);
                self.peer = Some((host.to_string(), port));
                self.endpoint = Some(endpoint);
                Ok(())
            }
            Err(cause) => {
                warn!("Connect to {}:{} failed: {}", host, port, cause);
                endpoint.last_error = Some(cause.to_string());
                self.endpoint = Some(endpoint);
                Err(LinkError::transport(cause, 1))
            }
        }
    }

    /// Close the connection and forget the peer.
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            info!("Instrument link closed");
        }
        self.peer = None;
        self.endpoint = None;
        self.pending.clear();
    }

    pub fn endpoint(&self) -> Option<&LinkEndpoint> {
        self.endpoint.as_ref()
    }

    fn mark_broken(&mut self, cause: &TransportCause) {
        self.stream = None;
        self.pending.clear();
        if let Some(endpoint) = self.endpoint.as_mut() {
            endpoint.connected = false;
            endpoint.last_error = Some(cause.to_string());
        }
    }

    fn note_error(&mut self, cause: &TransportCause) {
        if let Some(endpoint) = self.endpoint.as_mut() {
            endpoint.last_error = Some(cause.to_string());
        }
    }

    /// Make sure a socket is open, reconnecting to the last peer if needed.
    ///
    /// `Ok(false)` means there is no peer to reconnect to.
    async fn ensure_stream(&mut self) -> Result<bool, TransportCause> {
        if self.stream.is_some() {
            return Ok(true);
        }
        let Some((host, port)) = self.peer.clone() else {
            return Ok(false);
        };
        debug!("Reconnecting to {}:{}", host, port);
        let stream = open_stream(&host, port, self.connect_timeout).await?;
        info!("Reconnected to instrument at {}:{}", host, port);
        self.stream = Some(stream);
        if let Some(endpoint) = self.endpoint.as_mut() {
            endpoint.connected = true;
        }
        Ok(true)
    }
}

#[async_trait]
impl Transport for TransportLink {
    async fn send(&mut self, payload: &str, policy: &RetryPolicy) -> LinkResult<()> {
        let frame = protocol::encode_request(payload)?;
        let attempts = policy.attempts();
        let mut last = TransportCause::NotConnected;

        for attempt in 0..attempts {
            if attempt > 0 {
                sleep(retry_delay(attempt - 1)).await;
            }
            match self.ensure_stream().await {
                Ok(true) => {}
                Ok(false) => return Err(LinkError::transport(TransportCause::NotConnected, attempt)),
                Err(cause) => {
                    debug!("Send attempt {} could not reconnect: {}", attempt + 1, cause);
                    self.note_error(&cause);
                    last = cause;
                    continue;
                }
            }
            let Some(stream) = self.stream.as_mut() else {
                continue;
            };

            let limit = policy.attempt_timeout(attempt);
            match timeout(limit, stream.write_all(&frame)).await {
                Ok(Ok(())) => {
                    debug!("-> {}", payload.trim_end());
                    return Ok(());
                }
                // A failed write may have left part of the frame on the wire,
                // so the next attempt always starts on a fresh connection.
                Ok(Err(e)) => {
                    let cause = TransportCause::from_io(&e);
                    warn!("Send attempt {}/{} failed: {}", attempt + 1, attempts, cause);
                    self.mark_broken(&cause);
                    last = cause;
                }
                Err(_) => {
                    warn!("Send attempt {}/{} timed out after {:?}", attempt + 1, attempts, limit);
                    self.mark_broken(&TransportCause::Timeout);
                    last = TransportCause::Timeout;
                }
            }
        }

        Err(LinkError::transport(last, attempts))
    }

    async fn receive(&mut self, policy: &RetryPolicy) -> LinkResult<String> {
        let attempts = policy.attempts();
        let chunk = policy.buffer_size.max(1);
        let mut last = TransportCause::EmptyResponse;

        for attempt in 0..attempts {
            if attempt > 0 {
                sleep(retry_delay(attempt - 1)).await;
            }
            if let Some(line) = protocol::take_line(&mut self.pending) {
                return protocol::decode_line(line);
            }
            match self.ensure_stream().await {
                Ok(true) => {}
                Ok(false) => return Err(LinkError::transport(TransportCause::NotConnected, attempt)),
                Err(cause) => {
                    self.note_error(&cause);
                    last = cause;
                    continue;
                }
            }
            let Some(stream) = self.stream.as_mut() else {
                continue;
            };

            let limit = policy.attempt_timeout(attempt);
            match timeout(limit, read_frame(stream, &mut self.pending, chunk)).await {
                Ok(Ok(FrameRead::Line)) => {
                    if let Some(line) = protocol::take_line(&mut self.pending) {
                        let text = protocol::decode_line(line)?;
                        debug!("<- {}", text);
                        return Ok(text);
                    }
                }
                Ok(Ok(FrameRead::ClosedWithPartial)) => {
                    let partial = protocol::take_partial(&mut self.pending);
                    self.mark_broken(&TransportCause::Closed);
                    if let Some(data) = partial {
                        let text = protocol::decode_line(data)?;
                        debug!("<- {} (peer closed)", text);
                        return Ok(text);
                    }
                    last = TransportCause::Closed;
                }
                Ok(Ok(FrameRead::ClosedEmpty)) => {
                    warn!("Receive attempt {}/{}: peer closed the connection", attempt + 1, attempts);
                    self.mark_broken(&TransportCause::Closed);
                    last = TransportCause::Closed;
                }
                Ok(Err(e)) => {
                    let cause = TransportCause::from_io(&e);
                    warn!("Receive attempt {}/{} failed: {}", attempt + 1, attempts, cause);
                    if cause.is_connection_class() {
                        self.mark_broken(&cause);
                    } else {
                        self.note_error(&cause);
                    }
                    last = cause;
                }
                Err(_) => {
                    warn!("Receive attempt {}/{} timed out after {:?}", attempt + 1, attempts, limit);
                    self.note_error(&TransportCause::Timeout);
                    last = TransportCause::Timeout;
                }
            }
        }

        Err(LinkError::transport(last, attempts))
    }

    fn shutdown(&mut self) {
        if self.stream.take().is_some() {
            debug!("Socket force-closed; next request reconnects");
        }
        self.pending.clear();
        if let Some(endpoint) = self.endpoint.as_mut() {
            endpoint.connected = false;
        }
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}

async fn open_stream(host: &str, port: u16, limit: Duration) -> Result<TcpStream, TransportCause> {
    match timeout(limit, TcpStream::connect((host, port))).await {
        Ok(Ok(stream)) => {
            if let Err(e) = stream.set_nodelay(true) {
                debug!("set_nodelay failed: {}", e);
            }
            Ok(stream)
        }
        Ok(Err(e)) => Err(TransportCause::from_io(&e)),
        Err(_) => Err(TransportCause::Timeout),
    }
}

/// Read until `pending` holds a line or the peer closes.
///
/// Only completed reads touch `pending`, so dropping this future on timeout
/// loses nothing.
async fn read_frame(stream: &mut TcpStream, pending: &mut Vec<u8>, chunk: usize) -> io::Result<FrameRead> {
    let mut buf = vec![0u8; chunk];
    loop {
        if protocol::has_line(pending) {
            return Ok(FrameRead::Line);
        }
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            protocol::skip_terminators(pending);
            return Ok(if pending.is_empty() {
                FrameRead::ClosedEmpty
            } else {
                FrameRead::ClosedWithPartial
            });
        }
        pending.extend_from_slice(&buf[..n]);
    }
}

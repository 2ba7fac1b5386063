//! One instrument session: link, gate, poller and motion service wired together.
//!
//! ```rust,no_run
//! use rfbench_link::config::LinkConfig;
//! use rfbench_link::session::Session;
//! use rfbench_common::axis::Axis;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let session = Session::new(LinkConfig::default());
//! session.connect().await?;
//! let mut events = session.subscribe_operations();
//! session.request_feed(Axis::X)?;
//! let done = events.recv().await?;
//! println!("{} {}: {}", done.kind, done.axis, done.success());
//! session.shutdown().await;
//! # Ok(())
//! # }
//! ```

use crate::config::LinkConfig;
use crate::error::{LinkResult, MotionError};
use crate::gate::{CommandGate, Reply};
use crate::motion::{MotionHandle, MotionService, MotionSnapshot, OperationCompleted};
use crate::poller::{SharedLink, StatusPoller};
use crate::protocol;
use crate::transport::{LinkEndpoint, TransportLink};
use rfbench_common::axis::Axis;
use rfbench_common::compensation::{
    Compensation, NoCompensation, displayed_power_dbm, format_power, parse_power_dbm,
};
use rfbench_common::sample::StatusSample;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tracing::info;

/// Capacity of the sample channel.
const SAMPLE_CAPACITY: usize = 256;

/// Front door for UIs and the CLI.
pub struct Session {
    config: LinkConfig,
    link: SharedLink<TransportLink>,
    gate: Arc<CommandGate<TransportLink>>,
    samples: broadcast::Sender<StatusSample>,
    motion: MotionHandle,
    motion_task: JoinHandle<()>,
    compensation: Arc<dyn Compensation>,
}

impl Session {
    /// Build the session and start its motion service. Must run inside a tokio runtime.
    pub fn new(config: LinkConfig) -> Self {
        let link: SharedLink<TransportLink> = Arc::new(Mutex::new(TransportLink::new()));
        let gate = Arc::new(CommandGate::new(Arc::clone(&link), config.command_policy()));
        let (samples, samples_rx) = broadcast::channel(SAMPLE_CAPACITY);
        let (motion, motion_task) = MotionService::spawn(config.coordinator(), Arc::clone(&gate), samples_rx);

        Self {
            config,
            link,
            gate,
            samples,
            motion,
            motion_task,
            compensation: Arc::new(NoCompensation),
        }
    }

    /// Use `compensation` for commanded and displayed power.
    pub fn with_compensation(mut self, compensation: Arc<dyn Compensation>) -> Self {
        self.compensation = compensation;
        self
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Connect to the configured instrument.
    pub async fn connect(&self) -> LinkResult<()> {
        let host = self.config.link.host.clone();
        self.connect_to(&host, self.config.link.port).await
    }

    /// Connect to `host:port` and start status polling.
    ///
    /// On failure no poller is installed.
    pub async fn connect_to(&self, host: &str, port: u16) -> LinkResult<()> {
        self.gate.remove_poller().await;
        self.link
            .lock()
            .await
            .connect(host, port, self.config.connect_timeout())
            .await?;

        let poller = StatusPoller::new(Arc::clone(&self.link), self.config.poll_schedule(), self.samples.clone());
        self.gate.install_poller(poller).await;
        info!("Session connected to {}:{}", host, port);
        Ok(())
    }

    /// Stop polling, close the socket and forget the peer.
    pub async fn close(&self) {
        self.gate.remove_poller().await;
        self.link.lock().await.close();
    }

    /// Close and stop the motion service.
    pub async fn shutdown(self) {
        self.close().await;
        self.motion_task.abort();
        info!("Session shut down");
    }

    pub async fn endpoint(&self) -> Option<LinkEndpoint> {
        self.link.lock().await.endpoint().cloned()
    }

    pub async fn is_polling(&self) -> bool {
        self.gate.poller_running().await
    }

    /// Foreground command through the gate.
    pub async fn send_command(&self, text: &str) -> LinkResult<Reply> {
        self.gate.send_command(text).await
    }

    pub fn request_feed(&self, axis: Axis) -> Result<(), MotionError> {
        self.motion.request_feed(axis)
    }

    pub fn request_home(&self, axis: Axis) -> Result<(), MotionError> {
        self.motion.request_home(axis)
    }

    pub fn subscribe_samples(&self) -> broadcast::Receiver<StatusSample> {
        self.samples.subscribe()
    }

    pub fn subscribe_operations(&self) -> broadcast::Receiver<OperationCompleted> {
        self.motion.subscribe()
    }

    pub fn motion_snapshot(&self) -> MotionSnapshot {
        self.motion.snapshot()
    }

    /// Route the RF path. Never answered by the instrument.
    pub async fn configure_link(&self, route: &str) -> LinkResult<Reply> {
        self.send_command(&protocol::link_command(route)).await
    }

    pub async fn set_frequency(&self, freq_ghz: f64) -> LinkResult<Reply> {
        self.send_command(&protocol::frequency_command(freq_ghz)).await
    }

    /// Set the power delivered to the device under test at `freq_ghz`.
    pub async fn set_power(&self, target_dbm: f64, freq_ghz: f64) -> LinkResult<Reply> {
        let command = protocol::power_command(target_dbm, freq_ghz, self.compensation.as_ref());
        self.send_command(&command).await
    }

    pub async fn set_rf_output(&self, on: bool) -> LinkResult<Reply> {
        self.send_command(&protocol::rf_output_command(on)).await
    }

    /// Format a source power reply as seen at the device under test.
    pub fn display_power(&self, power_reply: &str, freq_ghz: f64) -> Option<String> {
        let source_dbm = parse_power_dbm(power_reply)?;
        Some(format_power(displayed_power_dbm(source_dbm, freq_ghz, self.compensation.as_ref())))
    }
}

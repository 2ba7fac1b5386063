//! Simulated instrument.
//!
//! A TCP server speaking the bench vocabulary with `\r\n`-terminated replies:
//!
//! - queries answer with one line (`OK`/`NO` for motion fields)
//! - motion and source commands answer `ACK`
//! - configuration directives are recorded and never answered
//!
//! A feed or home settles after `settle_reads` queries of the confirming
//! field, so the confirmation debounce sees `NO` before it sees `OK`. `Z` has
//! no reach sensor: its feed never settles, and the all-axes home query
//! reports the state of `Z`.

use crate::motion::OperationKind;
use crate::protocol;
use parking_lot::Mutex;
use rfbench_common::axis::Axis;
use rfbench_common::compensation::{parse_frequency_ghz, parse_power_dbm};
use rfbench_common::consts::AXIS_COUNT;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Position {
    #[default]
    Unknown,
    Home,
    Fed,
}

#[derive(Debug, Clone, Copy, Default)]
struct SimAxis {
    position: Position,
    /// Move in progress and the reads left before it settles.
    moving: Option<(OperationKind, u32)>,
}

impl SimAxis {
    fn start(&mut self, kind: OperationKind, settle_reads: u32) {
        self.position = Position::Unknown;
        self.moving = Some((kind, settle_reads));
    }

    /// Count one read of the field confirming `kind`.
    fn observe(&mut self, kind: OperationKind) {
        let Some((moving, left)) = self.moving else {
            return;
        };
        if moving != kind {
            return;
        }
        if left <= 1 {
            self.moving = None;
            self.position = match kind {
                OperationKind::Feed => Position::Fed,
                OperationKind::Home => Position::Home,
            };
        } else {
            self.moving = Some((moving, left - 1));
        }
    }
}

#[derive(Debug)]
struct SimState {
    axes: [SimAxis; AXIS_COUNT],
    frequency_ghz: f64,
    power_dbm: f64,
    rf_output: bool,
    route: Option<String>,
    settle_reads: u32,
    silent: bool,
    received: Vec<String>,
}

impl SimState {
    fn new(settle_reads: u32) -> Self {
        Self {
            axes: [SimAxis::default(); AXIS_COUNT],
            frequency_ghz: 10.0,
            power_dbm: -20.0,
            rf_output: false,
            route: None,
            settle_reads,
            silent: false,
            received: Vec::new(),
        }
    }

    fn axis(&mut self, axis: Axis) -> &mut SimAxis {
        &mut self.axes[axis.index()]
    }

    /// Reply to one request line, if any.
    fn handle(&mut self, request: &str) -> Option<String> {
        self.received.push(request.to_string());
        if protocol::is_config_directive(request) {
            let route = request.split_whitespace().nth(1).unwrap_or_default();
            info!("Simulator routed link to {:?}", route);
            self.route = Some(route.to_string());
            return None;
        }
        if self.silent {
            return None;
        }

        let mut parts = request.split_whitespace();
        let mnemonic = parts.next().unwrap_or_default().to_ascii_uppercase();
        let argument = parts.next().unwrap_or_default();
        let axis = argument.parse::<Axis>().ok();

        let reply = match (mnemonic.as_str(), axis) {
            ("READ:MOTION:REACH?", Some(axis)) => {
                let state = self.axis(axis);
                state.observe(OperationKind::Feed);
                confirmation(state.position == Position::Fed)
            }
            ("READ:MOTION:HOME?", Some(axis)) => self.home_reply(axis),
            ("READ:MOTION:HOME?", None) if argument.eq_ignore_ascii_case("ALL") => self.home_reply(Axis::Z),
            ("READ:MOTION:SPEED?", Some(axis)) => {
                let speed = if self.axis(axis).moving.is_some() { 10.0 } else { 0.0 };
                format!("{speed:.1}")
            }
            ("MOTION:FEED", Some(axis)) => {
                let settle = self.settle_reads;
                self.axis(axis).start(OperationKind::Feed, settle);
                "ACK".to_string()
            }
            ("MOTION:HOME", Some(axis)) => {
                let settle = self.settle_reads;
                self.axis(axis).start(OperationKind::Home, settle);
                "ACK".to_string()
            }
            ("SOURCE:FREQUENCY?", None) => format!("{:.0}", self.frequency_ghz * 1e9),
            ("SOURCE:POWER?", None) => format!("{:.2}", self.power_dbm),
            ("OUTPUT:STATE?", None) => {
                let state = if self.rf_output { "ON" } else { "OFF" };
                state.to_string()
            }
            ("SOURCE:FREQUENCY", None) => match parse_frequency_ghz(argument) {
                Some(ghz) => {
                    self.frequency_ghz = ghz;
                    "ACK".to_string()
                }
                None => "ERR".to_string(),
            },
            ("SOURCE:POWER", None) => match parse_power_dbm(argument) {
                Some(dbm) => {
                    self.power_dbm = dbm;
                    "ACK".to_string()
                }
                None => "ERR".to_string(),
            },
            ("OUTPUT:STATE", None) => {
                self.rf_output = argument.eq_ignore_ascii_case("ON");
                "ACK".to_string()
            }
            _ => {
                warn!("Simulator does not understand {:?}", request);
                "ERR".to_string()
            }
        };
        Some(reply)
    }

    fn home_reply(&mut self, axis: Axis) -> String {
        let state = self.axis(axis);
        state.observe(OperationKind::Home);
        confirmation(state.position == Position::Home)
    }
}

fn confirmation(settled: bool) -> String {
    let reply = if settled { "OK" } else { "NO" };
    reply.to_string()
}

/// Running simulated instrument. Stops when dropped.
pub struct SimInstrument {
    addr: SocketAddr,
    state: Arc<Mutex<SimState>>,
    task: JoinHandle<()>,
}

impl SimInstrument {
    /// Listen on `addr` (use port 0 for an ephemeral port).
    pub async fn bind(addr: &str, settle_reads: u32) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(Mutex::new(SimState::new(settle_reads)));
        let task = tokio::spawn(accept_loop(listener, Arc::clone(&state)));
        info!("Simulated instrument listening on {}", addr);
        Ok(Self { addr, state, task })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Every request line received so far.
    pub fn received(&self) -> Vec<String> {
        self.state.lock().received.clone()
    }

    /// Route set by the last configuration directive.
    pub fn route(&self) -> Option<String> {
        self.state.lock().route.clone()
    }

    /// Stop answering anything.
    pub fn set_silent(&self, silent: bool) {
        self.state.lock().silent = silent;
    }
}

impl Drop for SimInstrument {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn accept_loop(listener: TcpListener, state: Arc<Mutex<SimState>>) {
    let mut connections = JoinSet::new();
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!("Simulator accepted {}", peer);
                connections.spawn(serve(stream, Arc::clone(&state)));
            }
            Err(e) => {
                warn!("Simulator accept failed: {}", e);
                return;
            }
        }
        // Reap finished connections.
        while connections.try_join_next().is_some() {}
    }
}

async fn serve(stream: TcpStream, state: Arc<Mutex<SimState>>) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                debug!("Simulator connection error: {}", e);
                break;
            }
        };
        let request = line.trim();
        if request.is_empty() {
            continue;
        }
        let reply = state.lock().handle(request);
        if let Some(reply) = reply {
            if writer.write_all(format!("{reply}\r\n").as_bytes()).await.is_err() {
                break;
            }
        }
    }
    debug!("Simulator connection closed");
}

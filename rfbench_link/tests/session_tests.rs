//! End-to-end session tests against the simulated instrument.
//!
//! Covers the connect-refused scenario, single-flight commands with the
//! poller running, configuration directives, and feed/home confirmation
//! through real status polling.

use rfbench_common::axis::{Axis, AxisState};
use rfbench_common::compensation::TableCompensation;
use rfbench_common::consts::REACH_SENTINEL;
use rfbench_link::config::LinkConfig;
use rfbench_link::motion::{OperationCompleted, OperationKind};
use rfbench_link::sim::SimInstrument;
use rfbench_link::{LinkError, Reply, Session, TransportCause};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn fast_config(port: u16, axes: Vec<Axis>) -> LinkConfig {
    let mut config = LinkConfig::default();
    config.link.host = "127.0.0.1".to_string();
    config.link.port = port;
    config.link.connect_timeout_ms = 500;
    config.link.max_retries = 2;
    config.link.base_timeout_ms = 200;
    config.poll.interval_ms = 5;
    config.poll.axes = axes;
    config
}

async fn connected(settle_reads: u32, axes: Vec<Axis>) -> (SimInstrument, Session) {
    let sim = SimInstrument::bind("127.0.0.1:0", settle_reads).await.unwrap();
    let session = Session::new(fast_config(sim.port(), axes));
    session.connect().await.unwrap();
    (sim, session)
}

/// Wait for the completion event of `kind axis`, collecting everything before it.
async fn wait_for(
    events: &mut broadcast::Receiver<OperationCompleted>,
    kind: OperationKind,
    axis: Axis,
) -> Vec<OperationCompleted> {
    let mut seen = Vec::new();
    loop {
        let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
        let last = event.kind == kind && event.axis == axis;
        seen.push(event);
        if last {
            return seen;
        }
    }
}

fn motion_commands(sim: &SimInstrument) -> Vec<String> {
    sim.received()
        .into_iter()
        .filter(|r| r.starts_with("MOTion:"))
        .collect()
}

#[tokio::test]
async fn connect_refused_leaves_no_poller() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let session = Session::new(fast_config(port, vec![Axis::X]));
    let err = session.connect().await.unwrap_err();
    assert_eq!(err, LinkError::transport(TransportCause::Refused, 1));
    assert!(!session.is_polling().await);

    let endpoint = session.endpoint().await.unwrap();
    assert!(!endpoint.connected);
    assert!(endpoint.last_error.is_some());

    let err = session.send_command("SOURce:POWer?").await.unwrap_err();
    assert!(err.is_transport());
    assert_eq!(err.cause(), Some(&TransportCause::NotConnected));
    assert!(!session.is_polling().await);
    session.shutdown().await;
}

#[tokio::test]
async fn query_through_gate_while_polling() {
    let (_sim, session) = connected(1, vec![Axis::X, Axis::Y]).await;
    assert!(session.is_polling().await);

    let reply = session.send_command("SOURce:FREQuency?").await.unwrap();
    assert_eq!(reply, Reply::Line("10000000000".to_string()));
    assert!(session.is_polling().await);

    let endpoint = session.endpoint().await.unwrap();
    assert!(endpoint.connected);
    session.shutdown().await;
}

#[tokio::test]
async fn config_directive_does_not_desync_replies() {
    let (sim, session) = connected(1, vec![Axis::X]).await;

    let reply = session.configure_link("FEED_X_THETA").await.unwrap();
    assert_eq!(reply, Reply::Acknowledged);

    assert_eq!(session.set_rf_output(true).await.unwrap(), Reply::Line("ACK".to_string()));
    let reply = session.send_command("OUTPut:STATe?").await.unwrap();
    assert_eq!(reply.text(), Some("ON"));
    assert!(session.is_polling().await);

    timeout(WAIT, async {
        while sim.route().is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(sim.route().as_deref(), Some("FEED_X_THETA"));
    session.shutdown().await;
}

#[tokio::test]
async fn set_power_applies_compensation() {
    let sim = SimInstrument::bind("127.0.0.1:0", 1).await.unwrap();
    let session = Session::new(fast_config(sim.port(), vec![Axis::X]))
        .with_compensation(Arc::new(TableCompensation::flat(2.5)));
    session.connect().await.unwrap();

    session.set_power(-10.0, 10.0).await.unwrap();
    assert!(sim.received().iter().any(|r| r == "SOURce:POWer -7.50dBm"));
    assert_eq!(session.display_power("-7.50", 10.0).as_deref(), Some("-10.00 dBm"));
    session.shutdown().await;
}

#[tokio::test]
async fn samples_cover_axes_and_z_sentinel() {
    let (_sim, session) = connected(1, vec![Axis::X, Axis::Z]).await;
    let mut samples = session.subscribe_samples();

    let mut z_seen = false;
    let mut x_seen = false;
    while !(z_seen && x_seen) {
        let sample = timeout(WAIT, samples.recv()).await.unwrap().unwrap();
        match sample.axis() {
            Axis::Z => {
                let readout = sample.readout(Axis::Z).unwrap();
                assert_eq!(readout.reach.as_deref(), Some(REACH_SENTINEL));
                assert!(readout.home.is_some());
                z_seen = true;
            }
            Axis::X => {
                assert_eq!(sample.readout(Axis::X).unwrap().reach.as_deref(), Some("NO"));
                x_seen = true;
            }
            other => panic!("unexpected axis {other}"),
        }
    }
    session.shutdown().await;
}

#[tokio::test]
async fn feed_confirms_through_polling() {
    let (sim, session) = connected(2, vec![Axis::X, Axis::Y]).await;
    let mut events = session.subscribe_operations();

    session.request_feed(Axis::X).unwrap();
    let seen = wait_for(&mut events, OperationKind::Feed, Axis::X).await;
    assert_eq!(seen.len(), 1);
    assert!(seen[0].success());

    assert_eq!(session.motion_snapshot().states.get(Axis::X), AxisState::Reached);
    assert_eq!(session.motion_snapshot().status, "Ready");
    assert_eq!(motion_commands(&sim), vec!["MOTion:FEED X"]);
    session.shutdown().await;
}

#[tokio::test]
async fn conflicting_feed_homes_first() {
    let (sim, session) = connected(1, vec![Axis::X, Axis::Y]).await;
    let mut events = session.subscribe_operations();

    session.request_feed(Axis::X).unwrap();
    wait_for(&mut events, OperationKind::Feed, Axis::X).await;

    session.request_feed(Axis::Y).unwrap();
    let seen = wait_for(&mut events, OperationKind::Feed, Axis::Y).await;
    let order: Vec<_> = seen.iter().map(|e| (e.kind, e.axis, e.success())).collect();
    assert_eq!(
        order,
        vec![
            (OperationKind::Home, Axis::X, true),
            (OperationKind::Feed, Axis::Y, true),
        ]
    );

    assert_eq!(
        motion_commands(&sim),
        vec!["MOTion:FEED X", "MOTion:HOME X", "MOTion:FEED Y"]
    );
    let snapshot = session.motion_snapshot();
    assert_eq!(snapshot.states.get(Axis::X), AxisState::Homed);
    assert_eq!(snapshot.states.get(Axis::Y), AxisState::Reached);
    session.shutdown().await;
}

#[tokio::test]
async fn back_to_back_feeds_home_the_first_axis_in_between() {
    let (sim, session) = connected(1, vec![Axis::X, Axis::Y]).await;
    let mut events = session.subscribe_operations();

    session.request_feed(Axis::X).unwrap();
    session.request_feed(Axis::Y).unwrap();
    let seen = wait_for(&mut events, OperationKind::Feed, Axis::Y).await;
    let order: Vec<_> = seen.iter().map(|e| (e.kind, e.axis, e.success())).collect();
    assert_eq!(
        order,
        vec![
            (OperationKind::Feed, Axis::X, true),
            (OperationKind::Home, Axis::X, true),
            (OperationKind::Feed, Axis::Y, true),
        ]
    );
    assert_eq!(
        motion_commands(&sim),
        vec!["MOTion:FEED X", "MOTion:HOME X", "MOTion:FEED Y"]
    );
    session.shutdown().await;
}

#[tokio::test]
async fn close_stops_polling_and_forgets_peer() {
    let (_sim, session) = connected(1, vec![Axis::X]).await;
    session.close().await;

    assert!(!session.is_polling().await);
    assert!(session.endpoint().await.is_none());
    let err = session.send_command("SOURce:POWer?").await.unwrap_err();
    assert_eq!(err, LinkError::transport(TransportCause::NotConnected, 0));
    session.shutdown().await;
}

#[tokio::test]
async fn silent_instrument_times_out_and_polling_resumes() {
    let (sim, session) = connected(1, vec![Axis::X]).await;
    sim.set_silent(true);

    let err = session.send_command("SOURce:POWer?").await.unwrap_err();
    assert_eq!(err.cause(), Some(&TransportCause::Timeout));
    assert!(session.is_polling().await);

    sim.set_silent(false);
    let reply = session.send_command("SOURce:POWer?").await.unwrap();
    assert_eq!(reply.text(), Some("-20.00"));
    session.shutdown().await;
}

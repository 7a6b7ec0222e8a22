//! ControllerClient behaviour against the simulated controller

use autopolish_communication::{
    ClientConfig, ControllerClient, JogLimits, SimulatedTransport, Transport,
};
use autopolish_core::{ClientEvent, ControllerError, Error, MachineState};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

fn fast_config() -> ClientConfig {
    ClientConfig {
        read_timeout: Duration::from_millis(5),
        banner_timeout: Duration::from_millis(500),
        ack_timeout: Duration::from_secs(1),
        reset_settle: Duration::from_millis(20),
        ..Default::default()
    }
}

async fn connect(sim: SimulatedTransport) -> (Arc<SimulatedTransport>, ControllerClient) {
    let sim = Arc::new(sim);
    let client = ControllerClient::new(sim.clone(), fast_config());
    client.connect().await.unwrap();
    (sim, client)
}

async fn wait_for_event<F>(rx: &mut broadcast::Receiver<ClientEvent>, pred: F) -> ClientEvent
where
    F: Fn(&ClientEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("event channel closed: {}", e),
            }
        }
    })
    .await
    .expect("event not received in time")
}

#[tokio::test]
async fn test_connect_waits_for_first_status() {
    let (sim, client) = connect(SimulatedTransport::new()).await;

    assert!(client.is_connected());
    let status = client.last_status().expect("status after connect");
    assert_eq!(status.state, MachineState::Idle);
    assert!(sim.sent_lines().is_empty());
    assert_eq!(sim.realtime_bytes(), b"?".to_vec());

    client.close().await.unwrap();
    assert!(!client.is_connected());
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_send_command_waits_for_ok() {
    let (sim, client) = connect(SimulatedTransport::new()).await;

    client
        .send_command("G21 G90", true, Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(client.in_flight(), 0);
    assert_eq!(sim.sent_lines(), vec!["G21 G90"]);

    client.unlock().await.unwrap();
    client.home().await.unwrap();
    assert_eq!(sim.sent_lines(), vec!["G21 G90", "$X", "$H"]);
}

#[tokio::test]
async fn test_send_command_times_out_without_ack() {
    let (sim, client) = connect(SimulatedTransport::new()).await;
    sim.set_acknowledge(false);

    let err = client
        .send_command("G1 X1 F100", true, Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(client.in_flight(), 1);

    client.soft_reset().await.unwrap();
    assert_eq!(client.in_flight(), 0);
    assert!(sim.realtime_bytes().contains(&0x18));
}

#[tokio::test]
async fn test_stream_never_exceeds_window() {
    let (sim, client) = connect(SimulatedTransport::new()).await;
    let lines: Vec<String> = (0..20).map(|i| format!("G1 X{} F600", i)).collect();

    let mut max_seen = 0;
    client
        .stream_commands_with_progress(&lines, 3, Duration::from_secs(1), |_| {
            max_seen = max_seen.max(client.in_flight());
        })
        .await
        .unwrap();

    assert!(max_seen <= 3, "window exceeded: {}", max_seen);
    assert_eq!(client.in_flight(), 0);
    assert_eq!(sim.sent_lines(), lines);
}

#[tokio::test]
async fn test_stream_blocks_at_window_when_acks_stop() {
    let (sim, client) = connect(SimulatedTransport::new()).await;
    sim.set_acknowledge(false);
    let lines: Vec<String> = (0..5).map(|i| format!("G1 Z-{}.000 F60", i)).collect();

    let err = client
        .stream_commands(&lines, 2, Duration::from_millis(100))
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    assert_eq!(sim.sent_lines().len(), 2);
    assert_eq!(client.in_flight(), 2);
}

#[tokio::test]
async fn test_empty_stream_is_noop() {
    let (sim, client) = connect(SimulatedTransport::new()).await;
    client
        .stream_commands(&[], 12, Duration::from_millis(50))
        .await
        .unwrap();
    assert!(sim.sent_lines().is_empty());
}

#[tokio::test]
async fn test_wait_until_idle_after_motion() {
    let (_sim, client) = connect(SimulatedTransport::new().with_busy_polls(3)).await;
    client
        .send_command("G0 X5 Y-2", true, Duration::from_secs(1))
        .await
        .unwrap();

    let status = client.wait_until_idle(200.0, Duration::from_secs(2)).await;
    assert_eq!(status.state, MachineState::Idle);
    assert_eq!(status.machine_position, Some(vec![5.0, -2.0, 0.0]));
}

#[tokio::test]
async fn test_wait_until_idle_returns_last_status_on_timeout() {
    let (_sim, client) = connect(SimulatedTransport::new().with_busy_polls(u32::MAX)).await;
    client
        .send_command("G1 Z-3 F60", true, Duration::from_secs(1))
        .await
        .unwrap();

    let status = client
        .wait_until_idle(100.0, Duration::from_millis(100))
        .await;
    assert_eq!(status.state, MachineState::Run);
}

#[tokio::test]
async fn test_jog_out_of_range_sends_nothing() {
    let (sim, client) = connect(SimulatedTransport::new()).await;
    let limits = JogLimits {
        x: Some((-10.0, 10.0)),
        ..Default::default()
    };

    let err = client
        .jog(2000.0, 0.0, 0.0, 600.0, Some(&limits))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Controller(ControllerError::OutOfRange { axis: 'X', .. })
    ));
    assert!(sim.sent_lines().is_empty());
    assert_eq!(client.in_flight(), 0);
}

#[tokio::test]
async fn test_jog_command_format() {
    let (sim, client) = connect(SimulatedTransport::new()).await;
    let mut rx = client.subscribe();

    client.jog(1.0, 0.0, -0.25, 600.0, None).await.unwrap();
    wait_for_event(&mut rx, |e| *e == ClientEvent::Ack).await;

    assert_eq!(sim.sent_lines(), vec!["$J=G91 G21 X1.0000 Z-0.2500 F600.00"]);
    assert_eq!(sim.position(), [1.0, 0.0, -0.25]);

    client.jog(0.0, 0.0, 0.0, 600.0, None).await.unwrap();
    assert_eq!(sim.sent_lines().len(), 1);
    assert!(client.jog(1.0, 0.0, 0.0, 0.0, None).await.is_err());
}

#[tokio::test]
async fn test_malformed_status_keeps_previous() {
    let (sim, client) = connect(SimulatedTransport::new()).await;
    let mut rx = client.subscribe();

    sim.inject_line("<Run|MPos:1.000,2.000,3.000|FS:100,0>");
    wait_for_event(&mut rx, |e| matches!(e, ClientEvent::Status(_))).await;
    sim.inject_line("<Idle|garbage>");
    wait_for_event(&mut rx, |e| {
        *e == ClientEvent::Line("<Idle|garbage>".to_string())
    })
    .await;

    let status = client.last_status().unwrap();
    assert_eq!(status.state, MachineState::Run);
    assert_eq!(status.machine_position, Some(vec![1.0, 2.0, 3.0]));
}

#[tokio::test]
async fn test_error_response_releases_in_flight_slot() {
    let (sim, client) = connect(SimulatedTransport::new()).await;
    sim.set_acknowledge(false);
    let mut rx = client.subscribe();

    client
        .send_command("G1 X1", false, Duration::from_millis(10))
        .await
        .unwrap();
    assert_eq!(client.in_flight(), 1);

    sim.inject_line("error:22");
    let event = wait_for_event(&mut rx, |e| matches!(e, ClientEvent::Error(_))).await;
    assert_eq!(event, ClientEvent::Error("error:22".to_string()));
    assert_eq!(client.in_flight(), 0);
}

#[tokio::test]
async fn test_parser_state_discards_stale_replies() {
    let (sim, client) = connect(SimulatedTransport::new()).await;
    let mut rx = client.subscribe();

    sim.inject_line("[GC:G1 G54 G17 G21 G91 G94 M5 M9 T0 F100 S0]");
    sim.inject_line("[MSG:marker]");
    wait_for_event(&mut rx, |e| {
        *e == ClientEvent::Line("[MSG:marker]".to_string())
    })
    .await;

    let state = client
        .parser_state(Duration::from_secs(1))
        .await
        .unwrap()
        .expect("parser state reply");
    assert_eq!(state, "[GC:G0 G54 G17 G21 G90 G94 M5 M9 T0 F0 S0]");
    assert_eq!(sim.sent_lines(), vec!["$G"]);
}

#[tokio::test]
async fn test_close_releases_blocked_sender() {
    let (sim, client) = connect(SimulatedTransport::new()).await;
    sim.set_acknowledge(false);
    let client = Arc::new(client);

    let waiter = client.clone();
    let blocked = tokio::spawn(async move {
        waiter
            .send_command("G1 X1", true, Duration::from_secs(10))
            .await
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    client.close().await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(2), blocked)
        .await
        .expect("waiter released")
        .unwrap();
    assert!(result.unwrap_err().is_connection_error());
}

#[tokio::test]
async fn test_feed_hold_and_cycle_start() {
    let (sim, client) = connect(SimulatedTransport::new()).await;
    let mut rx = client.subscribe();

    client.feed_hold().unwrap();
    client.status_query().unwrap();
    let event = wait_for_event(&mut rx, |e| matches!(e, ClientEvent::Status(_))).await;
    match event {
        ClientEvent::Status(status) => assert_eq!(status.state, MachineState::Hold),
        other => panic!("unexpected event {:?}", other),
    }

    client.cycle_start().unwrap();
    assert_eq!(sim.realtime_bytes(), b"?!?~".to_vec());
}

#[tokio::test]
async fn test_soft_reset_zeroes_in_flight() {
    let (sim, client) = connect(SimulatedTransport::new()).await;
    sim.set_acknowledge(false);
    client
        .send_command("G1 X1", false, Duration::from_millis(50))
        .await
        .unwrap();
    client
        .send_command("G1 X2", false, Duration::from_millis(50))
        .await
        .unwrap();
    assert_eq!(client.in_flight(), 2);

    client.soft_reset().await.unwrap();
    assert_eq!(client.in_flight(), 0);
    assert!(sim.realtime_bytes().contains(&0x18));

    sim.set_acknowledge(true);
    client
        .send_command("G90", true, Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(client.in_flight(), 0);
}

/// Transport driven entirely by the test: inbound lines and read failures
/// are queued explicitly, and every command line is answered with `ok`
/// unless acknowledgements are muted.
#[derive(Default)]
struct ScriptedTransport {
    open: AtomicBool,
    paused: AtomicBool,
    mute_acks: AtomicBool,
    inbound: Mutex<VecDeque<io::Result<Vec<u8>>>>,
}

impl ScriptedTransport {
    fn push_line(&self, line: &str) {
        self.inbound.lock().push_back(Ok(line.as_bytes().to_vec()));
    }

    fn push_error(&self, kind: io::ErrorKind, message: &str) {
        self.inbound
            .lock()
            .push_back(Err(io::Error::new(kind, message.to_string())));
    }
}

impl Transport for ScriptedTransport {
    fn name(&self) -> String {
        "scripted".to_string()
    }

    fn open(&self) -> io::Result<()> {
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) -> io::Result<()> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn write(&self, data: &[u8]) -> io::Result<()> {
        let text = String::from_utf8_lossy(data);
        let Some(line) = text.strip_suffix('\n') else {
            return Ok(());
        };
        if line == "$G" {
            self.push_line("[GC:G0 G54 G17 G21 G90 G94 M5 M9 T0 F0 S0]");
            self.paused.store(false, Ordering::SeqCst);
        }
        if !self.mute_acks.load(Ordering::SeqCst) {
            self.push_line("ok");
        }
        Ok(())
    }

    fn read_line(&self, timeout: Duration) -> io::Result<Option<Vec<u8>>> {
        if !self.is_open() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "closed"));
        }
        let next = if self.paused.load(Ordering::SeqCst) {
            None
        } else {
            self.inbound.lock().pop_front()
        };
        match next {
            Some(result) => result.map(Some),
            None => {
                std::thread::sleep(timeout);
                Ok(None)
            }
        }
    }

    fn discard_input(&self) -> io::Result<()> {
        self.inbound.lock().clear();
        Ok(())
    }
}

async fn connect_scripted(transport: Arc<ScriptedTransport>) -> ControllerClient {
    let client = ControllerClient::new(
        transport,
        ClientConfig {
            wait_for_banner: false,
            ..fast_config()
        },
    );
    client.connect().await.unwrap();
    client
}

#[tokio::test]
async fn test_transient_read_error_reported_and_reader_continues() {
    let transport = Arc::new(ScriptedTransport::default());
    let client = connect_scripted(transport.clone()).await;
    let mut rx = client.subscribe();

    transport.push_error(io::ErrorKind::Other, "line noise");
    let event = wait_for_event(&mut rx, |e| matches!(e, ClientEvent::Error(_))).await;
    assert_eq!(event, ClientEvent::Error("Reader error: line noise".to_string()));

    assert!(client.is_connected());
    client
        .send_command("G90", true, Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(client.in_flight(), 0);
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_broken_pipe_stops_reader_and_releases_waiters() {
    let transport = Arc::new(ScriptedTransport::default());
    transport.mute_acks.store(true, Ordering::SeqCst);
    let client = Arc::new(connect_scripted(transport.clone()).await);
    let mut rx = client.subscribe();

    let waiter = client.clone();
    let blocked = tokio::spawn(async move {
        waiter
            .send_command("G1 X1", true, Duration::from_secs(10))
            .await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    transport.push_error(io::ErrorKind::BrokenPipe, "cable pulled");
    let event = wait_for_event(&mut rx, |e| matches!(e, ClientEvent::Error(_))).await;
    assert_eq!(event, ClientEvent::Error("Reader stopped: cable pulled".to_string()));

    let result = tokio::time::timeout(Duration::from_secs(2), blocked)
        .await
        .expect("waiter released")
        .unwrap();
    assert!(matches!(
        result.unwrap_err(),
        Error::Controller(ControllerError::Disconnected { .. })
    ));
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_parser_state_ignores_unread_input() {
    let transport = Arc::new(ScriptedTransport::default());
    let client = connect_scripted(transport.clone()).await;

    transport.paused.store(true, Ordering::SeqCst);
    transport.push_line("[GC:G1 G54 G17 G21 G91 G94 M5 M9 T0 F100 S0]");

    let state = client
        .parser_state(Duration::from_secs(1))
        .await
        .unwrap()
        .expect("parser state reply");
    assert_eq!(state, "[GC:G0 G54 G17 G21 G90 G94 M5 M9 T0 F0 S0]");
    client.close().await.unwrap();
}

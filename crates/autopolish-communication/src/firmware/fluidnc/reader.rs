//! Background line reader
//!
//! Runs on a blocking task, draining the transport one line at a time and
//! dispatching each line. Events go out on a broadcast channel; a lagging
//! subscriber loses events but can never stall the reader.

use super::response_parser::{classify, describe_failure, ControllerResponse};
use super::status_cache::StatusCache;
use super::tracker::ResponseTracker;
use crate::communication::Transport;
use autopolish_core::ClientEvent;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

const ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Applies received lines to the shared client state
#[derive(Clone)]
pub struct LineDispatcher {
    tracker: Arc<ResponseTracker>,
    status: Arc<StatusCache>,
    events: broadcast::Sender<ClientEvent>,
}

impl LineDispatcher {
    /// Create a dispatcher over the given shared state
    pub fn new(
        tracker: Arc<ResponseTracker>,
        status: Arc<StatusCache>,
        events: broadcast::Sender<ClientEvent>,
    ) -> Self {
        Self {
            tracker,
            status,
            events,
        }
    }

    /// Classify one line and apply it.
    ///
    /// The raw line is always published first, whatever its class.
    pub fn handle_line(&self, line: &str) -> ControllerResponse {
        let _ = self.events.send(ClientEvent::Line(line.to_string()));

        let response = classify(line);
        match &response {
            ControllerResponse::Ok => {
                self.tracker.acknowledge();
                let _ = self.events.send(ClientEvent::Ack);
            }
            ControllerResponse::Error(_) | ControllerResponse::Alarm(_) => {
                self.tracker.acknowledge();
                tracing::error!("Controller reported {}", describe_failure(line));
                let _ = self.events.send(ClientEvent::Error(line.to_string()));
            }
            ControllerResponse::Status(status) => {
                self.status.update(status.clone());
                let _ = self.events.send(ClientEvent::Status(status.clone()));
            }
            ControllerResponse::MalformedStatus => {
                tracing::debug!("Dropping malformed status frame: {}", line);
            }
            ControllerResponse::ParserState(state) => {
                self.tracker.push_parser_state(state.clone());
            }
            ControllerResponse::Message(message) => {
                tracing::debug!("< {}", message);
            }
        }
        response
    }

    /// Publish a reader-side failure
    pub fn report_error(&self, message: String) {
        let _ = self.events.send(ClientEvent::Error(message));
    }
}

pub(crate) struct ReaderHandle {
    pub(crate) shutdown: mpsc::Sender<()>,
    pub(crate) task: JoinHandle<()>,
}

fn is_permanent(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
    )
}

/// Start the reader loop. Must be called from within a tokio runtime.
pub(crate) fn spawn_reader(
    transport: Arc<dyn Transport>,
    dispatcher: LineDispatcher,
    read_timeout: Duration,
) -> ReaderHandle {
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

    let task = tokio::task::spawn_blocking(move || {
        tracing::debug!("Line reader started on {}", transport.name());
        loop {
            match shutdown_rx.try_recv() {
                Ok(()) | Err(mpsc::error::TryRecvError::Disconnected) => break,
                Err(mpsc::error::TryRecvError::Empty) => {}
            }

            match transport.read_line(read_timeout) {
                Ok(Some(bytes)) => {
                    let text = String::from_utf8_lossy(&bytes);
                    let line = text.trim();
                    if !line.is_empty() {
                        dispatcher.handle_line(line);
                    }
                }
                Ok(None) => {}
                Err(e) if is_permanent(&e) => {
                    tracing::warn!("Line reader stopping: {}", e);
                    dispatcher.report_error(format!("Reader stopped: {}", e));
                    break;
                }
                Err(e) => {
                    tracing::warn!("Line reader error: {}", e);
                    dispatcher.report_error(format!("Reader error: {}", e));
                    std::thread::sleep(ERROR_BACKOFF);
                }
            }
        }
        dispatcher.tracker.mark_stopped();
        tracing::debug!("Line reader stopped on {}", transport.name());
    });

    ReaderHandle {
        shutdown: shutdown_tx,
        task,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autopolish_core::MachineState;

    fn dispatcher() -> (LineDispatcher, broadcast::Receiver<ClientEvent>) {
        let (tx, rx) = broadcast::channel(16);
        let dispatcher = LineDispatcher::new(
            Arc::new(ResponseTracker::new()),
            Arc::new(StatusCache::new()),
            tx,
        );
        (dispatcher, rx)
    }

    #[test]
    fn test_raw_line_published_before_classification() {
        let (dispatcher, mut rx) = dispatcher();
        dispatcher.tracker.register_send();
        dispatcher.handle_line("ok");

        assert_eq!(rx.try_recv().unwrap(), ClientEvent::Line("ok".to_string()));
        assert_eq!(rx.try_recv().unwrap(), ClientEvent::Ack);
        assert_eq!(dispatcher.tracker.in_flight(), 0);
    }

    #[test]
    fn test_error_consumes_in_flight_slot() {
        let (dispatcher, mut rx) = dispatcher();
        dispatcher.tracker.register_send();
        dispatcher.tracker.register_send();
        dispatcher.handle_line("error:22");

        assert_eq!(dispatcher.tracker.in_flight(), 1);
        let _line = rx.try_recv().unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            ClientEvent::Error("error:22".to_string())
        );
    }

    #[test]
    fn test_malformed_status_keeps_previous() {
        let (dispatcher, mut rx) = dispatcher();
        dispatcher.handle_line("<Run|MPos:1.000,2.000,3.000>");
        dispatcher.handle_line("<Idle|garbage>");

        let status = dispatcher.status.latest().unwrap();
        assert_eq!(status.state, MachineState::Run);
        assert_eq!(status.machine_position, Some(vec![1.0, 2.0, 3.0]));

        let events: Vec<ClientEvent> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(events.len(), 3);
        assert_eq!(events[2], ClientEvent::Line("<Idle|garbage>".to_string()));
    }

    #[test]
    fn test_parser_state_queued_and_still_published() {
        let (dispatcher, mut rx) = dispatcher();
        dispatcher.handle_line("[GC:G0 G54 G17 G21 G90 G94 M5 M9 T0 F0 S0]");
        assert_eq!(dispatcher.tracker.pending_parser_states(), 1);
        assert!(matches!(rx.try_recv().unwrap(), ClientEvent::Line(_)));
    }
}

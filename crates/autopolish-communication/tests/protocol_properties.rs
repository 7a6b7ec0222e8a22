//! Property tests for line classification and in-flight accounting

use autopolish_communication::firmware::fluidnc::reader::LineDispatcher;
use autopolish_communication::{classify, ControllerResponse, ResponseTracker, StatusCache};
use proptest::prelude::*;
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Debug, Clone)]
enum Step {
    Send,
    Ok,
    Error,
    Alarm,
    Status,
    Message,
    SoftReset,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        4 => Just(Step::Send),
        3 => Just(Step::Ok),
        1 => Just(Step::Error),
        1 => Just(Step::Alarm),
        1 => Just(Step::Status),
        1 => Just(Step::Message),
        1 => Just(Step::SoftReset),
    ]
}

proptest! {
    #[test]
    fn in_flight_tracks_sent_minus_acked(steps in prop::collection::vec(step(), 0..200)) {
        let tracker = Arc::new(ResponseTracker::new());
        let (events, _rx) = broadcast::channel(8);
        let dispatcher = LineDispatcher::new(tracker.clone(), Arc::new(StatusCache::new()), events);

        let mut sent: usize = 0;
        let mut acked: usize = 0;
        for step in steps {
            match step {
                Step::Send => {
                    tracker.register_send();
                    sent += 1;
                }
                Step::Ok | Step::Error | Step::Alarm => {
                    let line = match step {
                        Step::Ok => "ok",
                        Step::Error => "error:20",
                        _ => "ALARM:2",
                    };
                    dispatcher.handle_line(line);
                    if acked < sent {
                        acked += 1;
                    }
                }
                Step::Status => {
                    dispatcher.handle_line("<Idle|MPos:0.000,0.000,0.000|FS:0,0>");
                }
                Step::Message => {
                    dispatcher.handle_line("[MSG:INFO: FluidNC]");
                }
                Step::SoftReset => {
                    tracker.reset();
                    sent = 0;
                    acked = 0;
                }
            }
            prop_assert_eq!(tracker.in_flight(), sent - acked);
        }
    }

    #[test]
    fn classify_never_panics(line in ".{0,80}") {
        let _ = classify(&line);
    }

    #[test]
    fn fields_without_keys_reject_status_frame(body in "[a-z|,.]{1,40}") {
        let line = format!("<Idle|{}>", body);
        prop_assert_eq!(classify(&line), ControllerResponse::MalformedStatus);
    }

    #[test]
    fn angle_status_positions_parse(
        x in -1000.0f64..1000.0,
        y in -1000.0f64..1000.0,
        z in -100.0f64..100.0,
        feed in 0u32..5000,
    ) {
        let line = format!("<Run|MPos:{:.3},{:.3},{:.3}|FS:{},0>", x, y, z, feed);
        match classify(&line) {
            ControllerResponse::Status(status) => {
                let mpos = status.machine_position.unwrap();
                prop_assert!((mpos[0] - x).abs() < 1e-3);
                prop_assert!((mpos[1] - y).abs() < 1e-3);
                prop_assert!((mpos[2] - z).abs() < 1e-3);
                prop_assert_eq!(status.feed, Some(feed as f64));
            }
            other => prop_assert!(false, "unexpected {:?}", other),
        }
    }
}

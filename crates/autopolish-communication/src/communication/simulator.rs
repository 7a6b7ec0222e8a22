//! In-process simulated controller
//!
//! Behaves like a GRBL/FluidNC controller that executes moves instantly but
//! reports `Run` for a configurable number of status polls after each
//! motion command. Every command line written is recorded so tests can
//! assert on the exact wire traffic.

use super::{not_connected, Transport};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::io;
use std::time::{Duration, Instant};

/// Reply sent for `$G`
pub const PARSER_STATE_REPLY: &str = "[GC:G0 G54 G17 G21 G90 G94 M5 M9 T0 F0 S0]";

const BANNER: &str = "Grbl 3.7 [FluidNC v3.7 (simulated) '$' for help]";

#[derive(Debug)]
struct SimState {
    open: bool,
    outbound: VecDeque<String>,
    sent: Vec<String>,
    realtime: Vec<u8>,
    acknowledge: bool,
    absolute: bool,
    position: [f64; 3],
    feed: f64,
    busy_polls: u32,
    busy_remaining: u32,
    held: bool,
}

impl SimState {
    fn reply(&mut self, line: impl Into<String>) {
        self.outbound.push_back(line.into());
    }

    fn status_frame(&mut self) -> String {
        let state = if self.held {
            "Hold:0"
        } else if self.busy_remaining > 0 {
            self.busy_remaining -= 1;
            "Run"
        } else {
            "Idle"
        };
        let feed = if state == "Run" { self.feed } else { 0.0 };
        format!(
            "<{}|MPos:{:.3},{:.3},{:.3}|FS:{},0|Ov:100,100,100>",
            state, self.position[0], self.position[1], self.position[2], feed
        )
    }

    fn execute(&mut self, line: &str) {
        self.sent.push(line.to_string());

        if line.eq_ignore_ascii_case("$G") {
            self.reply(PARSER_STATE_REPLY);
        } else if let Some(jog) = line.strip_prefix("$J=") {
            self.apply_motion(jog, true);
        } else if !line.starts_with('$') {
            self.apply_motion(line, false);
        }

        if self.acknowledge {
            self.reply("ok");
        }
    }

    fn apply_motion(&mut self, line: &str, force_relative: bool) {
        let mut target = self.position;
        let mut relative = !self.absolute || force_relative;
        let mut moved = false;

        for word in line.split_whitespace() {
            let mut chars = word.chars();
            let Some(letter) = chars.next() else { continue };
            let Ok(value) = chars.as_str().parse::<f64>() else {
                continue;
            };
            match letter.to_ascii_uppercase() {
                'G' if value == 90.0 => {
                    relative = force_relative;
                    if !force_relative {
                        self.absolute = true;
                    }
                }
                'G' if value == 91.0 => {
                    relative = true;
                    if !force_relative {
                        self.absolute = false;
                    }
                }
                'F' => self.feed = value,
                axis @ ('X' | 'Y' | 'Z') => {
                    let index = (axis as u8 - b'X') as usize;
                    target[index] = if relative {
                        self.position[index] + value
                    } else {
                        value
                    };
                    moved = true;
                }
                _ => {}
            }
        }

        if moved {
            self.position = target;
            self.busy_remaining = self.busy_polls;
        }
    }

    fn handle_realtime(&mut self, byte: u8) {
        self.realtime.push(byte);
        match byte {
            b'?' => {
                let frame = self.status_frame();
                self.reply(frame);
            }
            b'!' => self.held = true,
            b'~' => self.held = false,
            0x18 => {
                self.held = false;
                self.busy_remaining = 0;
                self.outbound.clear();
                self.reply(BANNER);
            }
            _ => {}
        }
    }
}

/// Simulated GRBL/FluidNC controller transport
pub struct SimulatedTransport {
    state: Mutex<SimState>,
    readable: Condvar,
}

impl Default for SimulatedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedTransport {
    /// Create a simulator at the origin, acknowledging every line and
    /// reporting `Run` for one status poll after each motion
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                open: false,
                outbound: VecDeque::new(),
                sent: Vec::new(),
                realtime: Vec::new(),
                acknowledge: true,
                absolute: true,
                position: [0.0; 3],
                feed: 0.0,
                busy_polls: 1,
                busy_remaining: 0,
                held: false,
            }),
            readable: Condvar::new(),
        }
    }

    /// Number of status polls answered with `Run` after each motion
    pub fn with_busy_polls(self, polls: u32) -> Self {
        self.state.lock().busy_polls = polls;
        self
    }

    /// Enable or mute `ok` acknowledgements
    pub fn set_acknowledge(&self, acknowledge: bool) {
        self.state.lock().acknowledge = acknowledge;
    }

    /// Queue an arbitrary line for the client to receive
    pub fn inject_line(&self, line: &str) {
        self.state.lock().reply(line);
        self.readable.notify_all();
    }

    /// Every command line received, in order, without terminators
    pub fn sent_lines(&self) -> Vec<String> {
        self.state.lock().sent.clone()
    }

    /// Forget recorded command lines and real-time bytes
    pub fn clear_sent(&self) {
        let mut state = self.state.lock();
        state.sent.clear();
        state.realtime.clear();
    }

    /// Every real-time byte received, in order
    pub fn realtime_bytes(&self) -> Vec<u8> {
        self.state.lock().realtime.clone()
    }

    /// Current simulated machine position
    pub fn position(&self) -> [f64; 3] {
        self.state.lock().position
    }
}

impl Transport for SimulatedTransport {
    fn name(&self) -> String {
        "simulator".to_string()
    }

    fn open(&self) -> io::Result<()> {
        let mut state = self.state.lock();
        if !state.open {
            state.open = true;
            state.reply(BANNER);
            self.readable.notify_all();
        }
        Ok(())
    }

    fn close(&self) -> io::Result<()> {
        self.state.lock().open = false;
        self.readable.notify_all();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state.lock().open
    }

    fn write(&self, data: &[u8]) -> io::Result<()> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(not_connected("simulator"));
        }

        if let [byte] = *data {
            if matches!(byte, b'?' | b'!' | b'~' | 0x18) {
                state.handle_realtime(byte);
                self.readable.notify_all();
                return Ok(());
            }
        }

        let text = String::from_utf8_lossy(data);
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            state.execute(line);
        }
        self.readable.notify_all();
        Ok(())
    }

    fn read_line(&self, timeout: Duration) -> io::Result<Option<Vec<u8>>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if !state.open {
                return Err(not_connected("simulator"));
            }
            if let Some(line) = state.outbound.pop_front() {
                return Ok(Some(line.into_bytes()));
            }
            if self.readable.wait_until(&mut state, deadline).timed_out() {
                return Ok(state.outbound.pop_front().map(String::into_bytes));
            }
        }
    }

    fn discard_input(&self) -> io::Result<()> {
        self.state.lock().outbound.clear();
        Ok(())
    }
}

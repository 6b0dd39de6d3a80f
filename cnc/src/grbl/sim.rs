//! In-process stand-in for a GRBL controller.
//!
//! [`SimulatedMill`] understands the subset of G-code the driver uses (`G0`,
//! `G1`, `G92` and the `?` status query) and answers every other line with
//! `ok`. It implements both [`Connect`] and [`Transport`], and all clones share
//! one device state, so a test can hand a clone to a [`MotionEngine`] and keep
//! another to inspect what was sent.
//!
//! Faults can be injected to exercise the failure paths:
//!
//! - [`with_settle_polls`](SimulatedMill::with_settle_polls) - moves only show
//!   up in the status report after a number of queries
//! - [`with_unreachable`](SimulatedMill::with_unreachable) - moves to a given
//!   coordinate on one axis never happen
//! - [`set_garbled_status`](SimulatedMill::set_garbled_status) - status reports
//!   without a position field
//! - [`disconnect`](SimulatedMill::disconnect) - every further I/O fails
//!
//! [`MotionEngine`]: super::MotionEngine

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;

use tracing::trace;

use super::codec::{round_tenths, Position};
use super::error::{CncError, CncResult};
use super::transport::{Connect, Transport};

const OK: &str = "ok\r\n";

#[derive(Debug, Default)]
struct State {
    position: [f64; 3],
    target: [f64; 3],
    settle_polls: u32,
    polls_until_settled: u32,
    unreachable: Vec<(usize, f64)>,
    garbled_status: bool,
    connected: bool,
    broken: bool,
    connect_count: usize,
    query_count: usize,
    writes: Vec<String>,
    responses: VecDeque<String>,
}

impl State {
    fn status_report(&mut self) -> String {
        self.query_count += 1;
        if self.polls_until_settled > 0 {
            self.polls_until_settled -= 1;
            if self.polls_until_settled == 0 {
                self.position = self.target;
            }
        }

        let state = if self.polls_until_settled > 0 {
            "Run"
        } else {
            "Idle"
        };
        if self.garbled_status {
            return format!("<{state}|FS:0,0>\r\n");
        }
        let [x, y, z] = self.position;
        format!("<{state}|MPos:{x:.3},{y:.3},{z:.3}|FS:0,0>\r\n")
    }

    fn execute(&mut self, line: &str) -> String {
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            return OK.to_string();
        };

        let mut axes = [None; 3];
        for word in words {
            let (letter, value) = word.split_at(word.chars().next().map_or(0, char::len_utf8));
            let index = match letter.to_ascii_uppercase().as_str() {
                "X" => 0,
                "Y" => 1,
                "Z" => 2,
                _ => continue,
            };
            match value.parse::<f64>() {
                Ok(value) => axes[index] = Some(value),
                Err(_) => return "error:2\r\n".to_string(),
            }
        }

        match command.to_ascii_uppercase().as_str() {
            "G92" => {
                for (index, value) in axes.iter().enumerate() {
                    if let Some(value) = value {
                        self.position[index] = *value;
                    }
                }
                self.target = self.position;
                self.polls_until_settled = 0;
            }
            "G0" | "G00" | "G1" | "G01" => {
                for (index, value) in axes.iter().enumerate() {
                    let Some(value) = *value else { continue };
                    let blocked = self.unreachable.iter().any(|&(axis, stuck)| {
                        axis == index && round_tenths(stuck) == round_tenths(value)
                    });
                    if !blocked {
                        self.target[index] = value;
                    }
                }
                if self.settle_polls == 0 {
                    self.position = self.target;
                } else {
                    self.polls_until_settled = self.settle_polls;
                }
            }
            _ => {}
        }
        OK.to_string()
    }
}

/// Simulated GRBL controller. See the [module docs](self).
#[derive(Debug, Clone, Default)]
pub struct SimulatedMill {
    state: Rc<RefCell<State>>,
}

impl SimulatedMill {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make moves appear in the status report only on the `polls`-th query
    /// after the move command.
    pub fn with_settle_polls(self, polls: u32) -> Self {
        self.state.borrow_mut().settle_polls = polls;
        self
    }

    /// Ignore moves that would bring `axis` (`'X'`, `'Y'` or `'Z'`) to `value`.
    pub fn with_unreachable(self, axis: char, value: f64) -> Self {
        let index = match axis.to_ascii_uppercase() {
            'X' => 0,
            'Y' => 1,
            _ => 2,
        };
        self.state.borrow_mut().unreachable.push((index, value));
        self
    }

    pub fn with_unreachable_z(self, value: f64) -> Self {
        self.with_unreachable('Z', value)
    }

    /// Answer status queries without the `MPos:` field.
    pub fn set_garbled_status(&self, garbled: bool) {
        self.state.borrow_mut().garbled_status = garbled;
    }

    /// Break the link: all further connects, writes and reads fail.
    pub fn disconnect(&self) {
        let mut state = self.state.borrow_mut();
        state.broken = true;
        state.connected = false;
        state.responses.clear();
    }

    /// Current position, bypassing the protocol.
    pub fn position(&self) -> Position {
        let [x, y, z] = self.state.borrow().position;
        Position::new(x, y, z)
    }

    pub fn is_connected(&self) -> bool {
        self.state.borrow().connected
    }

    pub fn connect_count(&self) -> usize {
        self.state.borrow().connect_count
    }

    pub fn query_count(&self) -> usize {
        self.state.borrow().query_count
    }

    /// Every write exactly as received, queries included.
    pub fn writes(&self) -> Vec<String> {
        self.state.borrow().writes.clone()
    }

    /// Command lines received, without queries or line terminators.
    pub fn commands(&self) -> Vec<String> {
        self.state
            .borrow()
            .writes
            .iter()
            .filter(|write| !write.starts_with('?'))
            .map(|write| write.trim_end().to_string())
            .collect()
    }
}

impl Connect for SimulatedMill {
    type Transport = SimulatedMill;

    fn connect(&self) -> CncResult<SimulatedMill> {
        let mut state = self.state.borrow_mut();
        if state.broken {
            return Err(CncError::Transport(io::Error::new(
                io::ErrorKind::NotFound,
                "simulated mill is disconnected",
            )));
        }
        state.connected = true;
        state.connect_count += 1;
        Ok(self.clone())
    }
}

impl Transport for SimulatedMill {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        if state.broken {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "link lost"));
        }
        if !state.connected {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "port closed"));
        }

        let text = String::from_utf8_lossy(bytes).into_owned();
        trace!("Simulated mill got {:?}", text);
        let response = if text.starts_with('?') {
            state.status_report()
        } else {
            state.execute(text.trim())
        };
        state.writes.push(text);
        state.responses.push_back(response);
        Ok(())
    }

    fn read_line(&mut self) -> io::Result<String> {
        let mut state = self.state.borrow_mut();
        if state.broken {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "link lost"));
        }
        state
            .responses
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::TimedOut, "no response pending"))
    }

    fn close(&mut self) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        state.connected = false;
        state.responses.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange(sim: &mut SimulatedMill, line: &str) -> String {
        sim.write_all(line.as_bytes()).unwrap();
        sim.read_line().unwrap()
    }

    #[test]
    fn test_set_origin_and_move() {
        let mut sim = SimulatedMill::new().connect().unwrap();
        assert_eq!(exchange(&mut sim, "G92 X0 Y0 Z0\n"), OK);
        exchange(&mut sim, "G01 F800 Z14\n");
        exchange(&mut sim, "G01 F10000 X1.5 Y2\n");
        assert_eq!(sim.position(), Position::new(1.5, 2.0, 14.0));
        assert_eq!(
            exchange(&mut sim, "?"),
            "<Idle|MPos:1.500,2.000,14.000|FS:0,0>\r\n"
        );
    }

    #[test]
    fn test_unknown_commands_answer_ok() {
        let mut sim = SimulatedMill::new().connect().unwrap();
        assert_eq!(exchange(&mut sim, "G02 F1000 X1 Y1 Z3\n"), OK);
        assert_eq!(exchange(&mut sim, "$H\n"), OK);
        assert_eq!(sim.position(), Position::default());
    }

    #[test]
    fn test_settle_polls_delay_position() {
        let mut sim = SimulatedMill::new()
            .with_settle_polls(2)
            .connect()
            .unwrap();
        exchange(&mut sim, "G01 F800 Z3\n");
        assert!(exchange(&mut sim, "?").starts_with("<Run|MPos:0.000,0.000,0.000"));
        assert!(exchange(&mut sim, "?").starts_with("<Idle|MPos:0.000,0.000,3.000"));
    }

    #[test]
    fn test_unreachable_axis_holds() {
        let mut sim = SimulatedMill::new()
            .with_unreachable('x', 7.0)
            .connect()
            .unwrap();
        exchange(&mut sim, "G01 F100 X7 Y2 Z1\n");
        assert_eq!(sim.position(), Position::new(0.0, 2.0, 1.0));
    }

    #[test]
    fn test_write_before_connect_fails() {
        let mut sim = SimulatedMill::new();
        let err = sim.write_all(b"?").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    #[test]
    fn test_disconnect_breaks_link() {
        let sim = SimulatedMill::new();
        let mut link = sim.connect().unwrap();
        sim.disconnect();
        assert!(link.write_all(b"?").is_err());
        assert!(sim.connect().is_err());
    }

    #[test]
    fn test_commands_skip_queries() {
        let mut sim = SimulatedMill::new().connect().unwrap();
        exchange(&mut sim, "G92 X0 Y0 Z0\n");
        exchange(&mut sim, "?");
        exchange(&mut sim, "G01 F800 Z14\n");
        assert_eq!(sim.commands(), vec!["G92 X0 Y0 Z0", "G01 F800 Z14"]);
        assert_eq!(sim.writes().len(), 3);
    }
}

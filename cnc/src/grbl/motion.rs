//! Command round trips and converge-or-timeout motion.
//!
//! GRBL gives no "motion complete" event, so the only evidence that a move
//! finished is the reported position. [`MotionEngine::move_and_confirm`] sends
//! a move and then polls the position until the goal's axes match or the
//! timeout expires:
//!
//! ```text
//! command sent -> polling -> converged
//!                         -> timed out (MotionTimeout)
//! ```
//!
//! Polling is not cancellable; it runs until one of the two outcomes.

use std::fmt;
use std::time::Duration;

use tracing::{debug, trace};

use super::clock::{Clock, SystemClock};
use super::codec::{self, round_tenths, Position};
use super::error::{CncError, CncResult};
use super::transport::{Connect, Transport};

/// Default time a move may take before it is considered failed.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default delay between position queries.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Which axes a goal constrains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axes {
    Xy,
    Z,
    Xyz,
}

/// Target of a single move.
///
/// The variant decides both which axes are written into the move command and
/// which axes are compared while waiting for convergence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MotionGoal {
    Xy { x: f64, y: f64 },
    Z(f64),
    Xyz { x: f64, y: f64, z: f64 },
}

impl MotionGoal {
    pub fn axes(&self) -> Axes {
        match self {
            MotionGoal::Xy { .. } => Axes::Xy,
            MotionGoal::Z(_) => Axes::Z,
            MotionGoal::Xyz { .. } => Axes::Xyz,
        }
    }

    /// Move command for this goal at the given feed rate.
    pub fn encode(&self, feed_rate: f64) -> String {
        match *self {
            MotionGoal::Xy { x, y } => codec::encode_move(feed_rate, Some(x), Some(y), None),
            MotionGoal::Z(z) => codec::encode_move(feed_rate, None, None, Some(z)),
            MotionGoal::Xyz { x, y, z } => codec::encode_move(feed_rate, Some(x), Some(y), Some(z)),
        }
    }

    /// True if `position` matches the goal on the constrained axes.
    ///
    /// Both sides are rounded to tenths and compared exactly.
    pub fn is_reached(&self, position: &Position) -> bool {
        let eq = |goal: f64, actual: f64| round_tenths(goal) == round_tenths(actual);
        match *self {
            MotionGoal::Xy { x, y } => eq(x, position.x) && eq(y, position.y),
            MotionGoal::Z(z) => eq(z, position.z),
            MotionGoal::Xyz { x, y, z } => {
                eq(x, position.x) && eq(y, position.y) && eq(z, position.z)
            }
        }
    }
}

impl fmt::Display for MotionGoal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MotionGoal::Xy { x, y } => write!(f, "(x={x:.1}, y={y:.1})"),
            MotionGoal::Z(z) => write!(f, "(z={z:.1})"),
            MotionGoal::Xyz { x, y, z } => write!(f, "(x={x:.1}, y={y:.1}, z={z:.1})"),
        }
    }
}

/// Owns the connection to one controller and executes single round trips.
///
/// The transport is opened on first use and stays open until
/// [`close`](Self::close). Every write is followed by exactly one read.
pub struct MotionEngine<C: Connect, K: Clock = SystemClock> {
    connector: C,
    transport: Option<C::Transport>,
    clock: K,
    timeout: Duration,
    poll_interval: Duration,
}

impl<C: Connect> MotionEngine<C, SystemClock> {
    pub fn new(connector: C) -> Self {
        Self::with_clock(connector, SystemClock::new())
    }
}

impl<C: Connect, K: Clock> MotionEngine<C, K> {
    pub fn with_clock(connector: C, clock: K) -> Self {
        Self {
            connector,
            transport: None,
            clock,
            timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn set_poll_interval(&mut self, interval: Duration) {
        self.poll_interval = interval;
    }

    pub fn clock(&self) -> &K {
        &self.clock
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    fn transport(&mut self) -> CncResult<&mut C::Transport> {
        let transport = match self.transport.take() {
            Some(transport) => transport,
            None => self.connector.connect()?,
        };
        Ok(self.transport.insert(transport))
    }

    /// Write `bytes`, then block for one response line.
    fn round_trip(&mut self, bytes: &[u8]) -> CncResult<String> {
        let transport = self.transport()?;
        transport.write_all(bytes)?;
        let response = transport.read_line()?;
        trace!("Recv: {:?}", response.trim_end());
        Ok(response)
    }

    /// Send one command line and return the controller's response line.
    ///
    /// No retry: a response is assumed to follow every successful write.
    pub fn send(&mut self, line: &str) -> CncResult<String> {
        let line = line.trim_end_matches(['\r', '\n']);
        debug!("Sending: {}", line);
        let response = self.round_trip(format!("{line}\n").as_bytes())?;
        debug!(" : {}", response.trim());
        Ok(response)
    }

    /// Query the controller's current position.
    ///
    /// `?` is a real-time command in GRBL and is written without a line
    /// terminator; a terminator would produce a second, unread `ok`.
    pub fn query_position(&mut self) -> CncResult<Position> {
        let response = self.round_trip(codec::encode_query().as_bytes())?;
        codec::parse_position(&response)
    }

    /// Define the current point as `(x, y, z)`.
    pub fn set_origin(&mut self, x: f64, y: f64, z: f64) -> CncResult<()> {
        self.send(&codec::encode_set_origin(x, y, z))?;
        Ok(())
    }

    /// Send a move and wait until the controller reports the goal.
    pub fn move_and_confirm(&mut self, feed_rate: f64, goal: MotionGoal) -> CncResult<Position> {
        self.send(&goal.encode(feed_rate))?;
        self.wait_for(goal)
    }

    /// Poll the position until `goal` is reached or the timeout elapses.
    ///
    /// The timeout is measured from the first poll. An error is returned no
    /// earlier than the timeout and no later than one poll interval after it.
    ///
    /// # Errors
    ///
    /// [`CncError::MotionTimeout`] carrying the goal and the last reported
    /// position; transport and protocol errors from the queries propagate
    /// immediately.
    pub fn wait_for(&mut self, goal: MotionGoal) -> CncResult<Position> {
        let start = self.clock.now();
        loop {
            let position = self.query_position()?;
            if goal.is_reached(&position) {
                trace!("Reached {} at {}", goal, position);
                return Ok(position);
            }

            let elapsed = self.clock.now().saturating_sub(start);
            if elapsed >= self.timeout {
                return Err(CncError::MotionTimeout {
                    goal,
                    last: position,
                    timeout: self.timeout,
                });
            }

            trace!("At {}, waiting for {}", position, goal);
            self.clock.sleep(self.poll_interval);
        }
    }

    /// Close the transport if it is open.
    pub fn close(&mut self) -> CncResult<()> {
        if let Some(mut transport) = self.transport.take() {
            transport.close()?;
        }
        Ok(())
    }
}

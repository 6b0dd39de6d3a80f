//! Session settings for a mill.
//!
//! [`MillConfig`] collects the serial device, feed rates and timing used by
//! [`Mill`](super::Mill). Defaults match a stock GRBL controller; a config is
//! checked with [`MillConfig::validate`] before the mill is built.

use std::time::Duration;

use super::error::{CncError, CncResult};
use super::motion::{DEFAULT_POLL_INTERVAL, DEFAULT_TIMEOUT};
use super::transport::{SerialConnector, DEFAULT_READ_TIMEOUT, DEFAULT_WAKE_DELAY};

/// GRBL's factory baud rate.
pub const DEFAULT_BAUD: u32 = 115_200;

/// Default feed rate for xy travel (mm/min).
pub const DEFAULT_XY_SPEED: f64 = 10_000.0;

/// Default feed rate for raising and lowering the tool (mm/min).
pub const DEFAULT_Z_SPEED: f64 = 800.0;

/// Session settings for a [`Mill`](super::Mill).
///
/// Fixed once the mill is constructed, except the convergence timeout which
/// can be changed through [`Mill::set_timeout`](super::Mill::set_timeout).
#[derive(Debug, Clone, PartialEq)]
pub struct MillConfig {
    /// Serial device path
    pub device: String,
    /// Serial baud rate
    pub baud: u32,
    /// Feed rate for xy moves
    pub xy_speed: f64,
    /// Feed rate for z moves
    pub z_speed: f64,
    /// How long a move may take to converge
    pub timeout: Duration,
    /// Delay between position queries while waiting for convergence
    pub poll_interval: Duration,
    /// Blocking read timeout for one response line
    pub read_timeout: Duration,
    /// Wait after opening the port before the first command
    pub wake_delay: Duration,
}

impl MillConfig {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            baud: DEFAULT_BAUD,
            xy_speed: DEFAULT_XY_SPEED,
            z_speed: DEFAULT_Z_SPEED,
            timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            read_timeout: DEFAULT_READ_TIMEOUT,
            wake_delay: DEFAULT_WAKE_DELAY,
        }
    }

    /// Check that the settings can describe a working session.
    pub fn validate(&self) -> CncResult<()> {
        if self.device.trim().is_empty() || self.baud == 0 {
            return Err(CncError::Configuration(
                "Device and baud rate must be set".to_string(),
            ));
        }
        if !(self.xy_speed > 0.0 && self.z_speed > 0.0) {
            return Err(CncError::Configuration(format!(
                "Feed rates must be positive (xy={}, z={})",
                self.xy_speed, self.z_speed
            )));
        }
        Ok(())
    }

    /// Serial connector for this session's device.
    pub fn serial_connector(&self) -> SerialConnector {
        SerialConnector::new(&self.device, self.baud)
            .with_read_timeout(self.read_timeout)
            .with_wake_delay(self.wake_delay)
    }
}

//! Driver for a GRBL-controlled CNC mill used as a button-pressing fixture.
//!
//! The mill carries a tool tip that is moved over a device under test, lowered
//! onto a button and raised again. Every motion is verified by polling the
//! controller's position report until it matches the commanded goal or a
//! timeout expires.
//!
//! # Modules
//!
//! - [`grbl`] - protocol codec, serial transport, motion engine and the
//!   [`Mill`](grbl::Mill) operation sequencer
//! - [`locations`] - named, calibrated coordinates loaded from a JSON file
//!
//! # Example
//!
//! ```no_run
//! use cnc::grbl::{Mill, MillConfig};
//!
//! let mut mill = Mill::open(MillConfig::new("/dev/ttyACM0"))?;
//! mill.load_locations("device.json")?;
//! mill.set_home()?;
//! mill.press(&["power", "volume_up"])?;
//! mill.go_to_home()?;
//! # Ok::<(), cnc::grbl::CncError>(())
//! ```

pub mod grbl;
pub mod locations;

pub use grbl::{CncError, CncResult};

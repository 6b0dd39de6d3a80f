mod clock;
mod codec;
mod config;
mod error;
mod mill;
mod motion;
pub mod sim;
mod transport;

pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{
    encode_move, encode_query, encode_set_origin, parse_position, round_tenths, Position,
    POSITION_MARKER,
};
pub use config::{MillConfig, DEFAULT_BAUD, DEFAULT_XY_SPEED, DEFAULT_Z_SPEED};
pub use error::{CncError, CncResult};
pub use mill::Mill;
pub use motion::{Axes, MotionEngine, MotionGoal, DEFAULT_POLL_INTERVAL, DEFAULT_TIMEOUT};
pub use transport::{Connect, SerialConnector, SerialTransport, Transport};

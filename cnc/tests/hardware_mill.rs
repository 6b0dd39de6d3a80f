//! Smoke test against a real mill.
//!
//! Run with `--features hardware-tests` and `CNC_DEVICE` pointing at the
//! controller's serial port. The tool must be clear of obstacles at its
//! current position and for 5 units above it.

#![cfg(feature = "hardware-tests")]

use std::time::Duration;

use cnc::grbl::{Mill, MillConfig, MotionGoal, Position};

#[test]
fn test_small_square_on_real_mill() {
    let device = std::env::var("CNC_DEVICE").unwrap_or_else(|_| "/dev/ttyACM0".to_string());
    let mut config = MillConfig::new(device);
    config.timeout = Duration::from_secs(20);
    let mut mill = Mill::open(config).unwrap();

    mill.set_home().unwrap();
    let engine = mill.engine_mut();
    engine.move_and_confirm(500.0, MotionGoal::Z(5.0)).unwrap();
    for (x, y) in [(5.0, 0.0), (5.0, 5.0), (0.0, 5.0), (0.0, 0.0)] {
        engine
            .move_and_confirm(1000.0, MotionGoal::Xy { x, y })
            .unwrap();
    }
    engine.move_and_confirm(500.0, MotionGoal::Z(0.0)).unwrap();

    assert_eq!(engine.query_position().unwrap(), Position::new(0.0, 0.0, 0.0));
    mill.close_connection().unwrap();
}

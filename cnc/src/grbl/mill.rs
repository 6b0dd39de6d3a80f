//! User-facing mill operations.
//!
//! [`Mill`] composes [`MotionEngine`] moves into the steps of physically
//! pressing a button:
//!
//! ```text
//! idle -> raised -> xy positioned -> lowered -> raised again -> idle
//! ```
//!
//! The tool only travels in xy at the safe height taken from the
//! `device_location` entry of the location table. Once it has been lowered
//! onto a button it is always raised again, even if the press timed out.

use std::path::Path;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::clock::{Clock, SystemClock};
use super::codec::Position;
use super::config::MillConfig;
use super::error::{CncError, CncResult};
use super::motion::{MotionEngine, MotionGoal};
use super::transport::{Connect, SerialConnector};
use crate::locations::LocationTable;

/// High-level driver for a button-pressing mill.
///
/// # Example
///
/// ```no_run
/// use cnc::grbl::{Mill, MillConfig};
///
/// let mut mill = Mill::open(MillConfig::new("/dev/ttyACM0"))?;
/// mill.load_locations("device.json")?;
/// mill.set_home()?;
/// mill.go_to("camera")?;
/// mill.press(&["1", "2", "3"])?;
/// # Ok::<(), cnc::grbl::CncError>(())
/// ```
pub struct Mill<C: Connect, K: Clock = SystemClock> {
    engine: MotionEngine<C, K>,
    locations: Option<LocationTable>,
    xy_speed: f64,
    z_speed: f64,
}

impl Mill<SerialConnector> {
    /// Create a mill on the serial port named in `config`.
    ///
    /// The port is not opened until the first command.
    pub fn open(config: MillConfig) -> CncResult<Self> {
        let connector = config.serial_connector();
        Self::new(connector, &config)
    }
}

impl<C: Connect> Mill<C> {
    pub fn new(connector: C, config: &MillConfig) -> CncResult<Self> {
        Self::with_clock(connector, SystemClock::new(), config)
    }
}

impl<C: Connect, K: Clock> Mill<C, K> {
    pub fn with_clock(connector: C, clock: K, config: &MillConfig) -> CncResult<Self> {
        config.validate()?;
        let mut engine = MotionEngine::with_clock(connector, clock);
        engine.set_timeout(config.timeout);
        engine.set_poll_interval(config.poll_interval);
        Ok(Self {
            engine,
            locations: None,
            xy_speed: config.xy_speed,
            z_speed: config.z_speed,
        })
    }

    pub fn engine(&self) -> &MotionEngine<C, K> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut MotionEngine<C, K> {
        &mut self.engine
    }

    /// Change how long each move may take to converge.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.engine.set_timeout(timeout);
    }

    // ==================== Locations ====================

    /// Load named locations from a JSON file. See [`crate::locations`].
    pub fn load_locations(&mut self, path: impl AsRef<Path>) -> CncResult<()> {
        self.locations = Some(LocationTable::load(path)?);
        Ok(())
    }

    pub fn set_locations(&mut self, locations: LocationTable) {
        self.locations = Some(locations);
    }

    /// The loaded location table.
    ///
    /// # Errors
    ///
    /// [`CncError::Configuration`] if no table has been loaded.
    pub fn locations(&self) -> CncResult<&LocationTable> {
        self.locations.as_ref().ok_or_else(|| {
            CncError::Configuration("No device locations loaded".to_string())
        })
    }

    // ==================== Connection ====================

    /// Query and log the current tool position.
    pub fn request_position(&mut self) -> CncResult<Position> {
        let position = self.engine.query_position()?;
        info!("Position: {}", position);
        Ok(position)
    }

    pub fn close_connection(&mut self) -> CncResult<()> {
        self.engine.close()
    }

    // ==================== Calibration ====================

    /// Treat the current tool position as `(0, 0, 0)`.
    ///
    /// Redefining the origin is not a motion, so nothing is confirmed.
    pub fn set_home(&mut self) -> CncResult<()> {
        info!("Setting home");
        self.engine.set_origin(0.0, 0.0, 0.0)
    }

    // ==================== Motion ====================

    /// Raise the tool to the safe height.
    pub fn raise_tool(&mut self) -> CncResult<()> {
        let safe_height = self.locations()?.safe_height();
        debug!("Raising tool to z={}", safe_height);
        self.engine
            .move_and_confirm(self.z_speed, MotionGoal::Z(safe_height))?;
        Ok(())
    }

    /// Raise the tool, then travel to xy home.
    pub fn go_to_home(&mut self) -> CncResult<()> {
        info!("Going home");
        self.raise_tool()?;
        self.engine
            .move_and_confirm(self.xy_speed, MotionGoal::Xy { x: 0.0, y: 0.0 })?;
        Ok(())
    }

    /// Lower the tool to z=0.
    ///
    /// Does not travel home first; call [`go_to_home`](Self::go_to_home) before.
    pub fn lower_tool(&mut self) -> CncResult<()> {
        info!("Lowering tool");
        self.engine
            .move_and_confirm(self.z_speed, MotionGoal::Z(0.0))?;
        Ok(())
    }

    /// Raise the tool and travel to the named location, relative to
    /// `device_location`.
    pub fn go_to(&mut self, name: &str) -> CncResult<()> {
        info!("Going to '{}'", name);
        self.raise_tool()?;

        let locations = self.locations()?;
        let target = locations.get(name)?;
        let device = locations.device_location();
        let goal = MotionGoal::Xy {
            x: target.x + device.x,
            y: target.y + device.y,
        };
        self.engine.move_and_confirm(self.xy_speed, goal)?;
        Ok(())
    }

    /// Move straight to the named location's absolute coordinates in one
    /// combined xyz move.
    ///
    /// The coordinates are relative to home, not `device_location`, and the
    /// tool is NOT raised first: it may hit anything on its way. Meant for
    /// moving across a flat surface such as a touch screen, or to a known
    /// clear position such as a camera mount.
    pub fn direct_go_to(&mut self, name: &str) -> CncResult<()> {
        let target = self.locations()?.get(name)?;
        warn!("Direct move to '{}' without raising the tool", name);
        let goal = MotionGoal::Xyz {
            x: target.x,
            y: target.y,
            z: target.z,
        };
        self.engine.move_and_confirm(self.z_speed, goal)?;
        Ok(())
    }

    /// Lower the tool to `z` and raise it back to the safe height.
    ///
    /// The raise is attempted whether or not the lowering converged. If
    /// lowering failed, that error is returned; otherwise the result of the
    /// raise is.
    pub fn press_button(&mut self, z: f64) -> CncResult<()> {
        let safe_height = self.locations()?.safe_height();
        debug!("Pressing at z={}", z);

        let mut tool = LoweredTool {
            engine: &mut self.engine,
            safe_height,
            z_speed: self.z_speed,
            armed: true,
        };
        let pressed = tool.lower(z);
        let raised = tool.retract();

        match (pressed, raised) {
            (Err(press_err), Err(raise_err)) => {
                warn!("Raising tool after failed press also failed: {}", raise_err);
                Err(press_err)
            }
            (Err(press_err), Ok(_)) => Err(press_err),
            (Ok(_), raised) => raised.map(|_| ()),
        }
    }

    /// Press each named location in order.
    ///
    /// For every name: raise, travel to the location, lower to its z and raise
    /// again. The first failure aborts the remaining presses.
    pub fn press(&mut self, names: &[impl AsRef<str>]) -> CncResult<()> {
        for name in names {
            let name = name.as_ref();
            info!("Pressing '{}'", name);
            self.go_to(name)?;
            let z = self.locations()?.get(name)?.z;
            self.press_button(z)?;
        }
        Ok(())
    }

    /// Send every line of a G-code file as-is.
    ///
    /// Nothing is parsed or confirmed; the lines go straight to the
    /// controller. Blank lines are skipped since each send waits for exactly
    /// one response.
    pub fn execute_gcode_file(&mut self, path: impl AsRef<Path>) -> CncResult<()> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            CncError::Configuration(format!("Failed to read {}: {e}", path.display()))
        })?;

        info!("Executing G-code from {}", path.display());
        for line in contents.lines().filter(|line| !line.trim().is_empty()) {
            self.engine.send(line)?;
        }
        Ok(())
    }
}

/// Tool that has been sent below the safe height.
///
/// Raises the tool when dropped unless [`retract`](Self::retract) already did.
struct LoweredTool<'a, C: Connect, K: Clock> {
    engine: &'a mut MotionEngine<C, K>,
    safe_height: f64,
    z_speed: f64,
    armed: bool,
}

impl<C: Connect, K: Clock> LoweredTool<'_, C, K> {
    fn lower(&mut self, z: f64) -> CncResult<Position> {
        self.engine.move_and_confirm(self.z_speed, MotionGoal::Z(z))
    }

    fn raise(&mut self) -> CncResult<Position> {
        self.engine
            .move_and_confirm(self.z_speed, MotionGoal::Z(self.safe_height))
    }

    fn retract(mut self) -> CncResult<Position> {
        self.armed = false;
        self.raise()
    }
}

impl<C: Connect, K: Clock> Drop for LoweredTool<'_, C, K> {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = self.raise() {
                warn!("Failed to raise tool: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grbl::clock::ManualClock;
    use crate::grbl::sim::SimulatedMill;

    const LOCATIONS: &str = r#"{
        "device_location": {"x": 10, "y": 20, "z": 14},
        "1": {"x": 1, "y": 2, "z": 5},
        "2": {"x": 3, "y": 4, "z": 6},
        "Camera": {"x": 50, "y": 60, "z": 14}
    }"#;

    fn mill(sim: &SimulatedMill) -> Mill<SimulatedMill, ManualClock> {
        let mut config = MillConfig::new("sim");
        config.timeout = Duration::from_secs(1);
        let mut mill = Mill::with_clock(sim.clone(), ManualClock::new(), &config).unwrap();
        mill.set_locations(LocationTable::from_json(LOCATIONS).unwrap());
        mill
    }

    #[test]
    fn test_set_home_sends_origin_only() {
        let sim = SimulatedMill::new();
        let mut mill = mill(&sim);
        mill.set_home().unwrap();
        assert_eq!(sim.commands(), vec!["G92 X0 Y0 Z0"]);
        assert_eq!(sim.query_count(), 0);
    }

    #[test]
    fn test_raise_and_lower() {
        let sim = SimulatedMill::new();
        let mut mill = mill(&sim);
        mill.set_home().unwrap();
        mill.raise_tool().unwrap();
        assert_eq!(sim.position(), Position::new(0.0, 0.0, 14.0));
        mill.lower_tool().unwrap();
        assert_eq!(sim.position(), Position::new(0.0, 0.0, 0.0));
        assert_eq!(
            sim.commands(),
            vec!["G92 X0 Y0 Z0", "G01 F800 Z14", "G01 F800 Z0"]
        );
    }

    #[test]
    fn test_go_to_raises_before_xy_move() {
        let sim = SimulatedMill::new();
        let mut mill = mill(&sim);
        mill.set_home().unwrap();
        mill.go_to("1").unwrap();

        assert_eq!(
            sim.commands(),
            vec!["G92 X0 Y0 Z0", "G01 F800 Z14", "G01 F10000 X11 Y22"]
        );
        assert_eq!(sim.position(), Position::new(11.0, 22.0, 14.0));
    }

    #[test]
    fn test_go_to_home() {
        let sim = SimulatedMill::new();
        let mut mill = mill(&sim);
        mill.set_home().unwrap();
        mill.go_to("2").unwrap();
        mill.go_to_home().unwrap();
        assert_eq!(sim.position(), Position::new(0.0, 0.0, 14.0));
        assert_eq!(sim.commands().last().unwrap(), "G01 F10000 X0 Y0");
    }

    #[test]
    fn test_direct_go_to_uses_absolute_coordinates() {
        let sim = SimulatedMill::new();
        let mut mill = mill(&sim);
        mill.set_home().unwrap();
        mill.direct_go_to("Camera").unwrap();
        assert_eq!(sim.commands(), vec!["G92 X0 Y0 Z0", "G01 F800 X50 Y60 Z14"]);
        assert_eq!(sim.position(), Position::new(50.0, 60.0, 14.0));
    }

    #[test]
    fn test_press_ends_at_safe_height() {
        let sim = SimulatedMill::new();
        let mut mill = mill(&sim);
        mill.set_home().unwrap();
        mill.press(&["1"]).unwrap();

        assert_eq!(
            sim.commands(),
            vec![
                "G92 X0 Y0 Z0",
                "G01 F800 Z14",
                "G01 F10000 X11 Y22",
                "G01 F800 Z5",
                "G01 F800 Z14",
            ]
        );
        assert_eq!(sim.position(), Position::new(11.0, 22.0, 14.0));
    }

    #[test]
    fn test_press_button_raises_after_timeout() {
        let sim = SimulatedMill::new().with_unreachable_z(5.0);
        let mut mill = mill(&sim);
        mill.set_home().unwrap();
        mill.raise_tool().unwrap();

        let err = mill.press_button(5.0).unwrap_err();
        assert!(matches!(
            err,
            CncError::MotionTimeout {
                goal: MotionGoal::Z(_),
                ..
            }
        ));
        assert_eq!(sim.commands().last().unwrap(), "G01 F800 Z14");
        assert_eq!(sim.position().z, 14.0);
    }

    #[test]
    fn test_press_button_reports_press_error_when_raise_also_fails() {
        let sim = SimulatedMill::new()
            .with_unreachable_z(5.0)
            .with_unreachable_z(14.0);
        let mut mill = mill(&sim);
        mill.set_home().unwrap();

        let err = mill.press_button(5.0).unwrap_err();
        match err {
            CncError::MotionTimeout { goal, .. } => assert_eq!(goal, MotionGoal::Z(5.0)),
            other => panic!("unexpected error: {other}"),
        }
        // Raise was still attempted
        assert_eq!(
            sim.commands(),
            vec!["G92 X0 Y0 Z0", "G01 F800 Z5", "G01 F800 Z14"]
        );
    }

    #[test]
    fn test_press_aborts_remaining_sequence() {
        let sim = SimulatedMill::new().with_unreachable_z(5.0);
        let mut mill = mill(&sim);
        mill.set_home().unwrap();

        let err = mill.press(&["1", "2"]).unwrap_err();
        assert!(matches!(err, CncError::MotionTimeout { .. }));
        // Nothing for "2" was sent
        assert!(!sim.commands().iter().any(|c| c.contains("X13")));
        assert_eq!(sim.position(), Position::new(11.0, 22.0, 14.0));
    }

    #[test]
    fn test_press_unknown_location() {
        let sim = SimulatedMill::new();
        let mut mill = mill(&sim);
        mill.set_home().unwrap();

        let err = mill.press(&["missing"]).unwrap_err();
        assert!(matches!(err, CncError::Configuration(_)));
        assert_eq!(sim.commands(), vec!["G92 X0 Y0 Z0", "G01 F800 Z14"]);
    }

    #[test]
    fn test_operations_require_locations() {
        let sim = SimulatedMill::new();
        let mut mill =
            Mill::with_clock(sim.clone(), ManualClock::new(), &MillConfig::new("sim")).unwrap();

        assert!(matches!(mill.raise_tool(), Err(CncError::Configuration(_))));
        assert!(matches!(mill.go_to("1"), Err(CncError::Configuration(_))));
        assert!(matches!(
            mill.press_button(1.0),
            Err(CncError::Configuration(_))
        ));
        assert_eq!(sim.connect_count(), 0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = MillConfig::new("sim");
        config.z_speed = 0.0;
        assert!(matches!(
            Mill::with_clock(SimulatedMill::new(), ManualClock::new(), &config),
            Err(CncError::Configuration(_))
        ));
    }

    #[test]
    fn test_dropped_guard_raises_tool() {
        let sim = SimulatedMill::new();
        let mut mill = mill(&sim);
        mill.set_home().unwrap();
        {
            let mut tool = LoweredTool {
                engine: &mut mill.engine,
                safe_height: 14.0,
                z_speed: 800.0,
                armed: true,
            };
            tool.lower(3.0).unwrap();
        }
        assert_eq!(sim.commands().last().unwrap(), "G01 F800 Z14");
        assert_eq!(sim.position().z, 14.0);
    }

    #[test]
    fn test_close_connection() {
        let sim = SimulatedMill::new();
        let mut mill = mill(&sim);
        mill.request_position().unwrap();
        assert!(sim.is_connected());
        mill.close_connection().unwrap();
        assert!(!sim.is_connected());
    }
}

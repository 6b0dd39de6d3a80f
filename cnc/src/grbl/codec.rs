//! GRBL command encoding and status report parsing.
//!
//! Commands are plain G-code text lines. Only three are used by the driver:
//!
//! | Command | Meaning |
//! |---------|---------|
//! | `G01 F<feed> [X<x>] [Y<y>] [Z<z>]` | Linear move at feed rate, unspecified axes hold |
//! | `G92 X<x> Y<y> Z<z>` | Define the current point as the given coordinates |
//! | `?` | Real-time status query |
//!
//! The status report looks like `<Idle|MPos:1.000,2.000,14.000|FS:0,0>`.
//! Older firmware uses `<Idle,MPos:1.000,2.000,14.000,WPos:...>`. Both are
//! handled by taking the first three comma-separated fields after `MPos:`.

use std::fmt;

use super::error::{CncError, CncResult};

/// Marker preceding the coordinates in a status report.
pub const POSITION_MARKER: &str = "MPos:";

const QUERY: &str = "?";

/// Tool position as reported by the controller, rounded to 0.1 units.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn as_tuple(&self) -> (f64, f64, f64) {
        (self.x, self.y, self.z)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.1}, {:.1}, {:.1})", self.x, self.y, self.z)
    }
}

/// Round to one decimal place, the controller's reporting resolution.
pub fn round_tenths(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Build a linear move including only the supplied axes.
///
/// ```
/// use cnc::grbl::encode_move;
///
/// assert_eq!(encode_move(800.0, None, None, Some(14.0)), "G01 F800 Z14");
/// assert_eq!(encode_move(10000.0, Some(1.5), Some(0.0), None), "G01 F10000 X1.5 Y0");
/// ```
pub fn encode_move(feed_rate: f64, x: Option<f64>, y: Option<f64>, z: Option<f64>) -> String {
    let mut line = format!("G01 F{feed_rate}");
    for (letter, value) in [('X', x), ('Y', y), ('Z', z)] {
        if let Some(value) = value {
            line.push_str(&format!(" {letter}{value}"));
        }
    }
    line
}

/// Build a command that defines the current point as `(x, y, z)`.
pub fn encode_set_origin(x: f64, y: f64, z: f64) -> String {
    format!("G92 X{x} Y{y} Z{z}")
}

/// The real-time position query.
pub fn encode_query() -> &'static str {
    QUERY
}

/// Parse the coordinates out of a status report.
///
/// # Errors
///
/// Returns [`CncError::Protocol`] if the `MPos:` marker is missing, fewer
/// than three fields follow it, or a field is not a finite number.
///
/// ```
/// use cnc::grbl::{parse_position, Position};
///
/// let pos = parse_position("<Idle|MPos:1.04,2.00,13.96|FS:0,0>").unwrap();
/// assert_eq!(pos, Position::new(1.0, 2.0, 14.0));
/// ```
pub fn parse_position(response: &str) -> CncResult<Position> {
    let (_, fields) = response.split_once(POSITION_MARKER).ok_or_else(|| {
        CncError::Protocol(format!(
            "No {POSITION_MARKER} in status report: {:?}",
            response.trim()
        ))
    })?;

    let fields: Vec<&str> = fields.splitn(4, ',').collect();
    if fields.len() < 3 {
        return Err(CncError::Protocol(format!(
            "Expected 3 coordinates after {POSITION_MARKER}, got {}: {:?}",
            fields.len(),
            response.trim()
        )));
    }

    let mut coords = [0.0; 3];
    for (coord, field) in coords.iter_mut().zip(&fields[..3]) {
        // Third field may run into the next report segment ("14.000|FS:0,0>")
        let field = field
            .split(|c: char| c == '|' || c == '>')
            .next()
            .unwrap_or_default()
            .trim();
        let value: f64 = field
            .parse()
            .map_err(|_| CncError::Protocol(format!("Invalid coordinate: {field:?}")))?;
        if !value.is_finite() {
            return Err(CncError::Protocol(format!("Non-finite coordinate: {field:?}")));
        }
        *coord = round_tenths(value);
    }

    Ok(Position::new(coords[0], coords[1], coords[2]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_move_axis_subsets() {
        assert_eq!(encode_move(800.0, None, None, Some(0.0)), "G01 F800 Z0");
        assert_eq!(
            encode_move(10000.0, Some(12.5), Some(-3.0), None),
            "G01 F10000 X12.5 Y-3"
        );
        assert_eq!(
            encode_move(800.0, Some(50.0), Some(60.0), Some(14.0)),
            "G01 F800 X50 Y60 Z14"
        );
        assert_eq!(encode_move(500.0, None, None, None), "G01 F500");
    }

    #[test]
    fn test_encode_set_origin_and_query() {
        assert_eq!(encode_set_origin(0.0, 0.0, 0.0), "G92 X0 Y0 Z0");
        assert_eq!(encode_query(), "?");
    }

    #[test]
    fn test_parse_modern_status_report() {
        let pos = parse_position("<Idle|MPos:3.000,4.000,5.000|FS:0,0>\r\n").unwrap();
        assert_eq!(pos.as_tuple(), (3.0, 4.0, 5.0));
    }

    #[test]
    fn test_parse_legacy_status_report() {
        let pos =
            parse_position("<Run,MPos:1.250,-2.040,14.000,WPos:0.000,0.000,0.000>").unwrap();
        assert_eq!(pos.as_tuple(), (1.3, -2.0, 14.0));
    }

    #[test]
    fn test_parse_bare_marker() {
        let pos = parse_position("MPos:1.0,1.0,14.0").unwrap();
        assert_eq!(pos, Position::new(1.0, 1.0, 14.0));
    }

    #[test]
    fn test_parse_missing_marker() {
        let err = parse_position("ok\r\n").unwrap_err();
        assert!(matches!(err, CncError::Protocol(_)));
    }

    #[test]
    fn test_parse_too_few_fields() {
        let err = parse_position("<Idle|MPos:1.0,2.0>").unwrap_err();
        assert!(matches!(err, CncError::Protocol(_)));
    }

    #[test]
    fn test_parse_non_numeric_field() {
        let err = parse_position("<Idle|MPos:1.0,abc,3.0>").unwrap_err();
        assert!(matches!(err, CncError::Protocol(_)));
    }

    #[test]
    fn test_parse_non_finite_field() {
        for report in [
            "<Idle|MPos:NaN,inf,1.0|FS:0,0>",
            "<Idle|MPos:1.0,2.0,-infinity|FS:0,0>",
        ] {
            let err = parse_position(report).unwrap_err();
            assert!(matches!(err, CncError::Protocol(_)), "{report}");
        }
    }

    #[test]
    fn test_round_tenths() {
        assert_eq!(round_tenths(13.96), 14.0);
        assert_eq!(round_tenths(-0.04), -0.0);
        assert_eq!(round_tenths(2.449), 2.4);
    }
}

//! Named tool coordinates for the device under test.
//!
//! Locations are loaded from a JSON object mapping names to `{x, y, z}`:
//!
//! ```json
//! {
//!     "device_location": {"x": 10.0, "y": 20.0, "z": 14.0},
//!     "power":           {"x": 5.0,  "y": 3.5,  "z": 2.0},
//!     "camera":          {"x": 50,   "y": "60", "z": 14}
//! }
//! ```
//!
//! `device_location` is mandatory. Its `z` is the safe travel height and its
//! `x`/`y` are added to every other location when moving to it by name. Values
//! may be numbers or numeric strings.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Deserializer};
use tracing::debug;

use crate::grbl::{CncError, CncResult};

/// Name of the mandatory reference entry.
pub const DEVICE_LOCATION: &str = "device_location";

/// Raw entry as written in the file. Any axis may be missing.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
pub struct Location {
    #[serde(default, deserialize_with = "number_or_string")]
    pub x: Option<f64>,
    #[serde(default, deserialize_with = "number_or_string")]
    pub y: Option<f64>,
    #[serde(default, deserialize_with = "number_or_string")]
    pub z: Option<f64>,
}

/// Location with all three coordinates present.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

fn number_or_string<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Number(value)) => Ok(Some(value)),
        Some(Raw::Text(text)) => text
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid coordinate {text:?}"))),
    }
}

/// Read-only table of named locations.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationTable {
    entries: BTreeMap<String, Location>,
    device: Point,
}

impl LocationTable {
    /// Build a table, checking that a complete `device_location` is present.
    pub fn new(entries: BTreeMap<String, Location>) -> CncResult<Self> {
        let device = entries
            .get(DEVICE_LOCATION)
            .ok_or_else(|| {
                CncError::Configuration(format!(
                    "'{DEVICE_LOCATION}' is mandatory; it should be the highest point of the device"
                ))
            })
            .and_then(|location| complete(DEVICE_LOCATION, location))?;
        Ok(Self { entries, device })
    }

    /// Parse a table from JSON text.
    pub fn from_json(json: &str) -> CncResult<Self> {
        let entries: BTreeMap<String, Location> = serde_json::from_str(json)
            .map_err(|e| CncError::Configuration(format!("Invalid location file: {e}")))?;
        Self::new(entries)
    }

    /// Load a table from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> CncResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            CncError::Configuration(format!("Failed to read {}: {e}", path.display()))
        })?;
        let table = Self::from_json(&json)?;
        debug!(
            "Loaded {} locations from {}",
            table.entries.len(),
            path.display()
        );
        Ok(table)
    }

    /// The reference point of the device under test.
    pub fn device_location(&self) -> Point {
        self.device
    }

    /// Height at which the tool may travel in xy.
    pub fn safe_height(&self) -> f64 {
        self.device.z
    }

    /// Look up a location, requiring all three coordinates.
    pub fn get(&self, name: &str) -> CncResult<Point> {
        let location = self
            .entries
            .get(name)
            .ok_or_else(|| CncError::Configuration(format!("Unknown location '{name}'")))?;
        complete(name, location)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

fn complete(name: &str, location: &Location) -> CncResult<Point> {
    let axis = |value: Option<f64>, letter: char| {
        value.ok_or_else(|| {
            CncError::Configuration(format!("Location '{name}' has no {letter} coordinate"))
        })
    };
    Ok(Point {
        x: axis(location.x, 'x')?,
        y: axis(location.y, 'y')?,
        z: axis(location.z, 'z')?,
    })
}

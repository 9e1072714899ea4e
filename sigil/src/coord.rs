//! Coordinate pair shared by position fixes and recommendations.
//!
//! The backend exchanges positions as two-element JSON arrays (`[x, y]`), so
//! [`Coordinate`] serializes to and from that shape rather than an object.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// An ordered (latitude, longitude) pair.
///
/// Recommendations reuse the same pair as planar (x, y) grid positions, where
/// `latitude` is the horizontal axis and `longitude` the vertical one.
/// Defaults to `(0, 0)` until a real fix is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Coordinate {
    /// Latitude in degrees (or x on the recommendation grid).
    pub latitude: f64,
    /// Longitude in degrees (or y on the recommendation grid).
    pub longitude: f64,
}

impl Coordinate {
    /// The origin, used before any fix or recommendation arrives.
    pub const ORIGIN: Coordinate = Coordinate {
        latitude: 0.0,
        longitude: 0.0,
    };

    /// Create a new coordinate.
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Horizontal component when used as a grid position.
    #[inline]
    pub fn x(&self) -> f64 {
        self.latitude
    }

    /// Vertical component when used as a grid position.
    #[inline]
    pub fn y(&self) -> f64 {
        self.longitude
    }
}

impl From<(f64, f64)> for Coordinate {
    fn from((latitude, longitude): (f64, f64)) -> Self {
        Self::new(latitude, longitude)
    }
}

impl From<Coordinate> for (f64, f64) {
    fn from(coord: Coordinate) -> Self {
        (coord.latitude, coord.longitude)
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}", self.latitude, self.longitude)
    }
}

impl Serialize for Coordinate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (self.latitude, self.longitude).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Coordinate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let pair = <(f64, f64)>::deserialize(deserializer)?;
        Ok(pair.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_origin() {
        assert_eq!(Coordinate::default(), Coordinate::ORIGIN);
    }

    #[test]
    fn test_serializes_as_pair() {
        let coord = Coordinate::new(52.5, 13.25);
        let json = serde_json::to_string(&coord).unwrap();
        assert_eq!(json, "[52.5,13.25]");
    }

    #[test]
    fn test_deserializes_integer_pair() {
        let coord: Coordinate = serde_json::from_str("[3, -4]").unwrap();
        assert_eq!(coord, Coordinate::new(3.0, -4.0));
    }

    #[test]
    fn test_rejects_wrong_arity() {
        assert!(serde_json::from_str::<Coordinate>("[1, 2, 3]").is_err());
        assert!(serde_json::from_str::<Coordinate>("[1]").is_err());
    }

    #[test]
    fn test_display_matches_joined_pair() {
        assert_eq!(Coordinate::new(1.0, 2.5).to_string(), "1, 2.5");
    }
}

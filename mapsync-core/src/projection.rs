//! Reprojection between the snapshot reference system and storage targets.
//!
//! Snapshot coordinates are always WGS84 (EPSG:4326). Persisted geometry uses
//! a single configured target, currently WGS84 itself or spherical Mercator
//! (EPSG:3857).

use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};
use std::fmt;

use geo::{Coord, Geometry, MapCoords};
use thiserror::Error;

use crate::tile::MAX_LATITUDE;

const EARTH_RADIUS: f64 = 6_378_137.0;

/// Errors raised by [`Srid`] parsing and [`Projection::transform`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProjectionError {
    /// The reference system is not supported.
    #[error("unsupported spatial reference system EPSG:{code}")]
    UnsupportedSrid {
        /// EPSG code requested.
        code: u32,
    },
    /// A coordinate could not be represented in the target system.
    #[error("coordinate ({x}, {y}) cannot be reprojected")]
    NonFinite {
        /// Source abscissa.
        x: f64,
        /// Source ordinate.
        y: f64,
    },
}

/// Supported spatial reference systems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Srid {
    /// Geographic WGS84 longitude/latitude (EPSG:4326).
    Wgs84,
    /// Spherical Mercator metres (EPSG:3857).
    #[default]
    WebMercator,
}

impl Srid {
    /// EPSG code.
    #[must_use]
    pub const fn code(self) -> u32 {
        match self {
            Self::Wgs84 => 4326,
            Self::WebMercator => 3857,
        }
    }
}

impl TryFrom<u32> for Srid {
    type Error = ProjectionError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        match code {
            4326 => Ok(Self::Wgs84),
            3857 | 900_913 => Ok(Self::WebMercator),
            _ => Err(ProjectionError::UnsupportedSrid { code }),
        }
    }
}

impl fmt::Display for Srid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.code())
    }
}

/// A coordinate transform from one [`Srid`] to another.
///
/// # Examples
/// ```
/// use geo::{Geometry, Point};
/// use mapsync_core::{Projection, Srid};
///
/// let forward = Projection::new(Srid::Wgs84, Srid::WebMercator);
/// let projected = forward.transform(&Geometry::Point(Point::new(180.0, 0.0)))?;
/// let Geometry::Point(point) = projected else { unreachable!() };
/// assert!((point.x() - 20_037_508.342_789).abs() < 1.0e-3);
/// assert!(point.y().abs() < 1.0e-6);
/// # Ok::<(), mapsync_core::ProjectionError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Projection {
    source: Srid,
    target: Srid,
}

impl Projection {
    /// Construct a transform from `source` to `target`.
    #[must_use]
    pub const fn new(source: Srid, target: Srid) -> Self {
        Self { source, target }
    }

    /// Transform from WGS84 into `target`.
    #[must_use]
    pub const fn from_wgs84(target: Srid) -> Self {
        Self::new(Srid::Wgs84, target)
    }

    /// Transform from `source` back into WGS84.
    #[must_use]
    pub const fn to_wgs84(source: Srid) -> Self {
        Self::new(source, Srid::Wgs84)
    }

    /// Source reference system.
    #[must_use]
    pub const fn source(&self) -> Srid {
        self.source
    }

    /// Target reference system.
    #[must_use]
    pub const fn target(&self) -> Srid {
        self.target
    }

    /// Whether the transform leaves coordinates untouched.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.source == self.target
    }

    /// Transform a single coordinate.
    pub fn transform_coord(&self, coord: Coord<f64>) -> Result<Coord<f64>, ProjectionError> {
        if !coord.x.is_finite() || !coord.y.is_finite() {
            return Err(ProjectionError::NonFinite {
                x: coord.x,
                y: coord.y,
            });
        }
        if self.is_identity() {
            return Ok(coord);
        }
        let geographic = match self.source {
            Srid::Wgs84 => coord,
            Srid::WebMercator => mercator_to_wgs84(coord),
        };
        let projected = match self.target {
            Srid::Wgs84 => geographic,
            Srid::WebMercator => wgs84_to_mercator(geographic),
        };
        if projected.x.is_finite() && projected.y.is_finite() {
            Ok(projected)
        } else {
            Err(ProjectionError::NonFinite {
                x: coord.x,
                y: coord.y,
            })
        }
    }

    /// Transform every coordinate of `geometry`.
    ///
    /// Fails on the first coordinate that cannot be represented.
    pub fn transform(&self, geometry: &Geometry<f64>) -> Result<Geometry<f64>, ProjectionError> {
        let projection = *self;
        geometry.try_map_coords(move |coord| projection.transform_coord(coord))
    }
}

fn wgs84_to_mercator(coord: Coord<f64>) -> Coord<f64> {
    let lon = coord.x.clamp(-180.0, 180.0);
    let lat = coord.y.clamp(-MAX_LATITUDE, MAX_LATITUDE);
    Coord {
        x: EARTH_RADIUS * lon.to_radians(),
        y: EARTH_RADIUS * (FRAC_PI_4 + lat.to_radians() / 2.0).tan().ln(),
    }
}

fn mercator_to_wgs84(coord: Coord<f64>) -> Coord<f64> {
    Coord {
        x: (coord.x / EARTH_RADIUS).to_degrees(),
        y: (2.0 * (coord.y / EARTH_RADIUS).exp().atan() - FRAC_PI_2).to_degrees(),
    }
}

//! Tile pyramid addressing.
//!
//! Responsibilities:
//! - map `(x, y, z)` onto a single linear index ordered by zoom, then row,
//!   then column, and back again;
//! - convert WGS84 envelopes into inclusive tile ranges and tiles back into
//!   envelopes using spherical Mercator.
//!
//! Invariants: `0 <= x, y < 2^z` and `z <= MAX_ZOOM`, enforced by every
//! constructor.

use std::cmp::Ordering;
use std::f64::consts::PI;
use std::fmt;

use geo::{Coord, Rect};
use thiserror::Error;

#[cfg(feature = "serde")]
use serde::Serialize;

/// Deepest supported zoom level; keeps every index within `u64`.
pub const MAX_ZOOM: u8 = 30;

/// Shrinks the south-east corner so an edge lying exactly on a tile border
/// does not spill into the next tile.
const EPSILON: f64 = 0.000_000_1;

/// Latitude limit of the square spherical Mercator world.
pub const MAX_LATITUDE: f64 = 85.051_128_779_806_59;

/// Errors raised when constructing tiles.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TileError {
    /// The zoom level is deeper than [`MAX_ZOOM`].
    #[error("zoom {z} exceeds the maximum of {MAX_ZOOM}")]
    ZoomOutOfRange {
        /// Offending zoom.
        z: u8,
    },
    /// The column or row does not exist at the given zoom.
    #[error("tile ({x}, {y}) lies outside zoom {z}")]
    OutOfBounds {
        /// Column.
        x: u32,
        /// Row.
        y: u32,
        /// Zoom.
        z: u8,
    },
    /// The linear index is beyond the deepest zoom band.
    #[error("index {index} lies beyond zoom {MAX_ZOOM}")]
    IndexOutOfRange {
        /// Offending index.
        index: u64,
    },
    /// The coordinate is NaN or infinite.
    #[error("coordinate ({lon}, {lat}) is not finite")]
    NonFinite {
        /// Longitude.
        lon: f64,
        /// Latitude.
        lat: f64,
    },
}

/// A tile in the pyramid.
///
/// # Examples
/// ```
/// use mapsync_core::TileCoord;
///
/// let tile = TileCoord::new(3, 2, 2)?;
/// assert_eq!(tile.index(), 1 + 4 + 2 * 4 + 3);
/// assert_eq!(TileCoord::from_index(tile.index())?, tile);
/// # Ok::<(), mapsync_core::TileError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct TileCoord {
    x: u32,
    y: u32,
    z: u8,
}

impl TileCoord {
    /// Validate and construct a tile.
    pub fn new(x: u32, y: u32, z: u8) -> Result<Self, TileError> {
        if z > MAX_ZOOM {
            return Err(TileError::ZoomOutOfRange { z });
        }
        let side = side(z);
        if u64::from(x) >= side || u64::from(y) >= side {
            return Err(TileError::OutOfBounds { x, y, z });
        }
        Ok(Self { x, y, z })
    }

    /// Column.
    #[must_use]
    pub const fn x(&self) -> u32 {
        self.x
    }

    /// Row, counted from the north.
    #[must_use]
    pub const fn y(&self) -> u32 {
        self.y
    }

    /// Zoom level.
    #[must_use]
    pub const fn z(&self) -> u8 {
        self.z
    }

    /// Linear address: `offset(z) + y * 2^z + x`.
    #[must_use]
    pub fn index(&self) -> u64 {
        zoom_offset(self.z) + (u64::from(self.y) << self.z) + u64::from(self.x)
    }

    /// Recover a tile from its linear address by locating its zoom band.
    pub fn from_index(index: u64) -> Result<Self, TileError> {
        let mut offset = 0_u64;
        for z in 0..=MAX_ZOOM {
            let band = side(z) * side(z);
            if index - offset < band {
                let local = index - offset;
                let y = local >> z;
                let x = local & (side(z) - 1);
                return Ok(Self {
                    x: u32::try_from(x).map_err(|_| TileError::IndexOutOfRange { index })?,
                    y: u32::try_from(y).map_err(|_| TileError::IndexOutOfRange { index })?,
                    z,
                });
            }
            offset += band;
        }
        Err(TileError::IndexOutOfRange { index })
    }

    /// Tile containing a WGS84 coordinate at zoom `z`.
    ///
    /// Latitudes beyond the Mercator limit are clamped to the outermost row.
    pub fn from_lon_lat(lon: f64, lat: f64, z: u8) -> Result<Self, TileError> {
        if z > MAX_ZOOM {
            return Err(TileError::ZoomOutOfRange { z });
        }
        if !lon.is_finite() || !lat.is_finite() {
            return Err(TileError::NonFinite { lon, lat });
        }
        let n = tiles_per_side(z);
        let lon = lon.clamp(-180.0, 180.0);
        let lat = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians();
        let x = (lon + 180.0) / 360.0 * n;
        let y = (1.0 - (lat.tan() + 1.0 / lat.cos()).ln() / PI) / 2.0 * n;
        Ok(Self {
            x: ordinal(x, n),
            y: ordinal(y, n),
            z,
        })
    }

    /// Inclusive tile range covering `envelope` at zoom `z`.
    ///
    /// The envelope uses `x = longitude` and `y = latitude`.
    pub fn range(envelope: Rect<f64>, z: u8) -> Result<TileRange, TileError> {
        let north_west = Self::from_lon_lat(envelope.min().x, envelope.max().y, z)?;
        let south_east =
            Self::from_lon_lat(envelope.max().x - EPSILON, envelope.min().y + EPSILON, z)?;
        Ok(TileRange {
            z,
            min_x: north_west.x,
            min_y: north_west.y,
            max_x: south_east.x.max(north_west.x),
            max_y: south_east.y.max(north_west.y),
        })
    }

    /// Every tile covering `envelope` from `min_zoom` to `max_zoom`
    /// inclusive, zoom by zoom.
    ///
    /// # Examples
    /// ```
    /// use geo::{Coord, Rect};
    /// use mapsync_core::TileCoord;
    ///
    /// let world = Rect::new(Coord { x: -180.0, y: -85.0 }, Coord { x: 180.0, y: 85.0 });
    /// let tiles: Vec<_> = TileCoord::covering(world, 0, 1)?.collect();
    /// assert_eq!(tiles.len(), 5);
    /// # Ok::<(), mapsync_core::TileError>(())
    /// ```
    pub fn covering(
        envelope: Rect<f64>,
        min_zoom: u8,
        max_zoom: u8,
    ) -> Result<impl Iterator<Item = Self>, TileError> {
        let ranges = (min_zoom..=max_zoom)
            .map(|z| Self::range(envelope, z))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ranges.into_iter().flatten())
    }

    /// Number of tiles [`TileCoord::covering`] yields for the same input.
    pub fn count(envelope: Rect<f64>, min_zoom: u8, max_zoom: u8) -> Result<u64, TileError> {
        (min_zoom..=max_zoom).try_fold(0_u64, |total, z| {
            Self::range(envelope, z).map(|range| total + range.count())
        })
    }

    /// WGS84 envelope of this tile.
    #[must_use]
    pub fn envelope(&self) -> Rect<f64> {
        let n = tiles_per_side(self.z);
        let west = tile_to_lon(f64::from(self.x), n);
        let east = tile_to_lon(f64::from(self.x) + 1.0, n);
        let north = tile_to_lat(f64::from(self.y), n);
        let south = tile_to_lat(f64::from(self.y) + 1.0, n);
        Rect::new(Coord { x: west, y: south }, Coord { x: east, y: north })
    }

    /// Enclosing tile one zoom level up, or `None` at zoom 0.
    #[must_use]
    pub const fn parent(&self) -> Option<Self> {
        if self.z == 0 {
            return None;
        }
        Some(Self {
            x: self.x >> 1,
            y: self.y >> 1,
            z: self.z - 1,
        })
    }
}

impl Ord for TileCoord {
    fn cmp(&self, other: &Self) -> Ordering {
        self.index().cmp(&other.index())
    }
}

impl PartialOrd for TileCoord {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

/// Inclusive rectangle of tiles at a single zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRange {
    /// Zoom level.
    pub z: u8,
    /// Western column.
    pub min_x: u32,
    /// Northern row.
    pub min_y: u32,
    /// Eastern column.
    pub max_x: u32,
    /// Southern row.
    pub max_y: u32,
}

impl TileRange {
    /// `(max_x - min_x + 1) * (max_y - min_y + 1)`.
    #[must_use]
    pub fn count(&self) -> u64 {
        (u64::from(self.max_x) - u64::from(self.min_x) + 1)
            * (u64::from(self.max_y) - u64::from(self.min_y) + 1)
    }
}

impl IntoIterator for TileRange {
    type Item = TileCoord;
    type IntoIter = Box<dyn Iterator<Item = TileCoord>>;

    fn into_iter(self) -> Self::IntoIter {
        let Self {
            z,
            min_x,
            min_y,
            max_x,
            max_y,
        } = self;
        Box::new(
            (min_x..=max_x)
                .flat_map(move |x| (min_y..=max_y).map(move |y| TileCoord { x, y, z })),
        )
    }
}

/// Number of tiles in all zoom levels shallower than `z`.
const fn zoom_offset(z: u8) -> u64 {
    let mut offset = 0;
    let mut level = 0;
    while level < z {
        offset += 1 << (2 * level);
        level += 1;
    }
    offset
}

const fn side(z: u8) -> u64 {
    1 << z
}

fn tiles_per_side(z: u8) -> f64 {
    2_f64.powi(i32::from(z))
}

#[expect(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "the value is clamped to [0, n - 1] and n is at most 2^MAX_ZOOM"
)]
fn ordinal(value: f64, n: f64) -> u32 {
    value.floor().clamp(0.0, n - 1.0) as u32
}

fn tile_to_lon(x: f64, n: f64) -> f64 {
    x / n * 360.0 - 180.0
}

fn tile_to_lat(y: f64, n: f64) -> f64 {
    (PI - 2.0 * PI * y / n).sinh().atan().to_degrees()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn point(lon: f64, lat: f64) -> Rect<f64> {
        Rect::new(Coord { x: lon, y: lat }, Coord { x: lon, y: lat })
    }

    #[rstest]
    #[case(0, 0, 0, 0)]
    #[case(0, 0, 1, 1)]
    #[case(1, 1, 1, 4)]
    #[case(0, 0, 2, 5)]
    #[case(3, 3, 2, 20)]
    fn index_orders_by_zoom_then_row(
        #[case] x: u32,
        #[case] y: u32,
        #[case] z: u8,
        #[case] expected: u64,
    ) {
        let tile = TileCoord::new(x, y, z).expect("valid tile");
        assert_eq!(tile.index(), expected);
    }

    #[rstest]
    fn new_rejects_out_of_bounds_columns() {
        let err = TileCoord::new(4, 0, 2).expect_err("x beyond 2^z");
        assert_eq!(err, TileError::OutOfBounds { x: 4, y: 0, z: 2 });
    }

    #[rstest]
    fn from_index_rejects_indices_past_the_last_band() {
        let last = TileCoord::new(
            u32::try_from(side(MAX_ZOOM) - 1).expect("fits"),
            u32::try_from(side(MAX_ZOOM) - 1).expect("fits"),
            MAX_ZOOM,
        )
        .expect("valid tile");
        assert!(TileCoord::from_index(last.index()).is_ok());
        assert!(matches!(
            TileCoord::from_index(last.index() + 1),
            Err(TileError::IndexOutOfRange { .. })
        ));
    }

    #[rstest]
    #[case(0.0, 0.0, 4, 8, 8)]
    #[case(10.0, 10.0, 4, 8, 7)]
    #[case(-180.0, 85.0, 1, 0, 0)]
    #[case(179.9, -85.0, 1, 1, 1)]
    fn from_lon_lat_finds_the_containing_tile(
        #[case] lon: f64,
        #[case] lat: f64,
        #[case] z: u8,
        #[case] x: u32,
        #[case] y: u32,
    ) {
        let tile = TileCoord::from_lon_lat(lon, lat, z).expect("finite input");
        assert_eq!((tile.x(), tile.y()), (x, y));
    }

    #[rstest]
    fn from_lon_lat_rejects_nan() {
        assert!(matches!(
            TileCoord::from_lon_lat(f64::NAN, 0.0, 3),
            Err(TileError::NonFinite { .. })
        ));
    }

    #[rstest]
    fn point_on_tile_corner_yields_a_single_tile() {
        let range = TileCoord::range(point(0.0, 0.0), 4).expect("range");
        assert_eq!(range.count(), 1);
        let tiles: Vec<_> = range.into_iter().collect();
        assert_eq!(tiles, vec![TileCoord::new(8, 8, 4).expect("valid tile")]);
    }

    #[rstest]
    fn envelope_on_tile_meridians_does_not_spill() {
        // -67.5 and -45.0 are the exact western edges of columns 5 and 6.
        let envelope = Rect::new(Coord { x: -67.5, y: 10.0 }, Coord { x: -45.0, y: 11.0 });
        let range = TileCoord::range(envelope, 4).expect("range");
        assert_eq!(range.count(), 1);
        assert_eq!(
            range.into_iter().next(),
            Some(TileCoord::new(5, 7, 4).expect("valid tile"))
        );
    }

    #[rstest]
    fn tile_envelope_contains_its_centre() {
        let tile = TileCoord::new(5, 9, 4).expect("valid tile");
        let centre = tile.envelope().center();
        let found = TileCoord::from_lon_lat(centre.x, centre.y, 4).expect("finite");
        assert_eq!(found, tile);
    }

    #[rstest]
    fn count_matches_enumeration_across_zooms() {
        let envelope = Rect::new(Coord { x: -10.0, y: 40.0 }, Coord { x: 20.0, y: 60.0 });
        let listed = TileCoord::covering(envelope, 0, 6).expect("covering").count();
        let counted = TileCoord::count(envelope, 0, 6).expect("count");
        assert_eq!(u64::try_from(listed).expect("fits"), counted);
    }

    #[rstest]
    fn parent_halves_coordinates() {
        let tile = TileCoord::new(5, 3, 3).expect("valid tile");
        assert_eq!(tile.parent(), Some(TileCoord::new(2, 1, 2).expect("valid")));
        assert_eq!(TileCoord::new(0, 0, 0).expect("root").parent(), None);
    }

    #[rstest]
    fn ordering_follows_index() {
        let shallow = TileCoord::new(1, 1, 1).expect("valid");
        let deep = TileCoord::new(0, 0, 2).expect("valid");
        assert!(shallow < deep);
    }
}

//! Binary codecs for cached values.
//!
//! Fixed-size codecs have a constant width and reserve one bit pattern as the
//! "absent" sentinel. Variable-size codecs report their encoded length up
//! front so the append-only log can place values without splitting them.
//! All multi-byte values are big-endian.

use byteorder::{BigEndian, ByteOrder, ReadBytesExt};
use geo::{
    Coord, Geometry, GeometryCollection, LineString, MultiLineString, MultiPoint, MultiPolygon,
    Point, Polygon,
};
use thiserror::Error;

/// A stored value could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum CodecError {
    /// The buffer ended before the value did.
    #[error("encoded value is truncated")]
    Truncated,
    /// The geometry type tag is unknown.
    #[error("unknown geometry tag {tag}")]
    GeometryTag {
        /// Tag found.
        tag: u8,
    },
}

impl From<std::io::Error> for CodecError {
    fn from(_: std::io::Error) -> Self {
        Self::Truncated
    }
}

/// Values encoded into slots of constant width.
pub trait FixedSizeCodec {
    /// Decoded value.
    type Value;
    /// Width of one slot in bytes; a power of two.
    const SIZE: usize;
    /// Whether an all-zero slot decodes as absent, so freshly allocated
    /// memory needs no sentinel writes.
    const ZEROED_IS_ABSENT: bool = false;

    /// Write `value` into a slot of exactly [`Self::SIZE`] bytes.
    fn encode(&self, value: &Self::Value, slot: &mut [u8]);

    /// Mark a slot as holding no value.
    fn encode_absent(&self, slot: &mut [u8]);

    /// Read a slot, or `None` for the absent sentinel.
    fn decode(&self, slot: &[u8]) -> Option<Self::Value>;
}

/// Values encoded with a content-dependent width.
pub trait VariableSizeCodec {
    /// Decoded value.
    type Value;

    /// Number of bytes [`Self::encode`] appends for `value`.
    fn encoded_len(&self, value: &Self::Value) -> usize;

    /// Append the encoding of `value` to `out`.
    fn encode(&self, value: &Self::Value, out: &mut Vec<u8>);

    /// Decode a value from exactly the bytes produced by [`Self::encode`].
    fn decode(&self, bytes: &[u8]) -> Result<Self::Value, CodecError>;
}

/// WGS84 coordinates as two `f64`; `NaN` marks an absent slot.
///
/// Each float is stored with its bits inverted, so an all-zero slot reads
/// back as `NaN` and zero-filled memory is already absent.
#[derive(Debug, Clone, Copy, Default)]
pub struct CoordinateCodec;

impl FixedSizeCodec for CoordinateCodec {
    type Value = Coord<f64>;
    const SIZE: usize = 16;
    const ZEROED_IS_ABSENT: bool = true;

    fn encode(&self, value: &Coord<f64>, slot: &mut [u8]) {
        let (x, y) = slot.split_at_mut(8);
        BigEndian::write_u64(x, !value.x.to_bits());
        BigEndian::write_u64(y, !value.y.to_bits());
    }

    fn encode_absent(&self, slot: &mut [u8]) {
        slot.fill(0);
    }

    fn decode(&self, slot: &[u8]) -> Option<Coord<f64>> {
        let (x, y) = slot.split_at(8);
        let coord = Coord {
            x: f64::from_bits(!BigEndian::read_u64(x)),
            y: f64::from_bits(!BigEndian::read_u64(y)),
        };
        (!coord.x.is_nan() && !coord.y.is_nan()).then_some(coord)
    }
}

/// Sorted map keys as `i64`; `i64::MIN` marks an absent slot.
#[derive(Debug, Clone, Copy, Default)]
pub struct LongCodec;

impl FixedSizeCodec for LongCodec {
    type Value = i64;
    const SIZE: usize = 8;

    fn encode(&self, value: &i64, slot: &mut [u8]) {
        BigEndian::write_i64(slot, *value);
    }

    fn encode_absent(&self, slot: &mut [u8]) {
        self.encode(&i64::MIN, slot);
    }

    fn decode(&self, slot: &[u8]) -> Option<i64> {
        let value = BigEndian::read_i64(slot);
        (value != i64::MIN).then_some(value)
    }
}

/// Entry of a paired map index: a key and the log position of its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// Map key.
    pub key: i64,
    /// Position of the framed value in the log.
    pub position: u64,
}

/// Index entries as `(i64, u64)`; a `u64::MAX` position marks absence.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexEntryCodec;

impl FixedSizeCodec for IndexEntryCodec {
    type Value = IndexEntry;
    const SIZE: usize = 16;

    fn encode(&self, value: &IndexEntry, slot: &mut [u8]) {
        let (key, position) = slot.split_at_mut(8);
        BigEndian::write_i64(key, value.key);
        BigEndian::write_u64(position, value.position);
    }

    fn encode_absent(&self, slot: &mut [u8]) {
        self.encode(
            &IndexEntry {
                key: i64::MIN,
                position: u64::MAX,
            },
            slot,
        );
    }

    fn decode(&self, slot: &[u8]) -> Option<IndexEntry> {
        let (key, position) = slot.split_at(8);
        let position = BigEndian::read_u64(position);
        (position != u64::MAX).then(|| IndexEntry {
            key: BigEndian::read_i64(key),
            position,
        })
    }
}

/// Lists of ids: a `u32` count followed by `i64` values.
#[derive(Debug, Clone, Copy, Default)]
pub struct LongListCodec;

impl VariableSizeCodec for LongListCodec {
    type Value = Vec<i64>;

    fn encoded_len(&self, value: &Vec<i64>) -> usize {
        4 + 8 * value.len()
    }

    fn encode(&self, value: &Vec<i64>, out: &mut Vec<u8>) {
        write_len(out, value.len());
        for id in value {
            out.extend_from_slice(&id.to_be_bytes());
        }
    }

    fn decode(&self, mut bytes: &[u8]) -> Result<Vec<i64>, CodecError> {
        let count = read_len(&mut bytes, 8)?;
        (0..count)
            .map(|_| bytes.read_i64::<BigEndian>().map_err(CodecError::from))
            .collect()
    }
}

const POINT: u8 = 1;
const LINE_STRING: u8 = 2;
const POLYGON: u8 = 3;
const MULTI_POINT: u8 = 4;
const MULTI_LINE_STRING: u8 = 5;
const MULTI_POLYGON: u8 = 6;
const GEOMETRY_COLLECTION: u8 = 7;

/// Geometries as a type tag followed by counted coordinate sequences.
///
/// `Line`, `Rect` and `Triangle` are stored as the line string or polygon
/// they describe.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeometryCodec;

impl VariableSizeCodec for GeometryCodec {
    type Value = Geometry<f64>;

    fn encoded_len(&self, value: &Geometry<f64>) -> usize {
        1 + match value {
            Geometry::Point(_) => 16,
            Geometry::Line(_) => 4 + 32,
            Geometry::LineString(line) => coords_len(&line.0),
            Geometry::Polygon(polygon) => polygon_len(polygon),
            Geometry::MultiPoint(points) => 4 + 16 * points.0.len(),
            Geometry::MultiLineString(lines) => {
                4 + lines.0.iter().map(|line| coords_len(&line.0)).sum::<usize>()
            }
            Geometry::MultiPolygon(polygons) => {
                4 + polygons.0.iter().map(polygon_len).sum::<usize>()
            }
            Geometry::GeometryCollection(collection) => {
                4 + collection
                    .0
                    .iter()
                    .map(|member| self.encoded_len(member))
                    .sum::<usize>()
            }
            Geometry::Rect(rect) => polygon_len(&rect.to_polygon()),
            Geometry::Triangle(triangle) => polygon_len(&triangle.to_polygon()),
        }
    }

    fn encode(&self, value: &Geometry<f64>, out: &mut Vec<u8>) {
        match value {
            Geometry::Point(point) => {
                out.push(POINT);
                write_coord(out, point.0);
            }
            Geometry::Line(line) => {
                out.push(LINE_STRING);
                write_coords(out, &[line.start, line.end]);
            }
            Geometry::LineString(line) => {
                out.push(LINE_STRING);
                write_coords(out, &line.0);
            }
            Geometry::Polygon(polygon) => {
                out.push(POLYGON);
                write_polygon(out, polygon);
            }
            Geometry::MultiPoint(points) => {
                out.push(MULTI_POINT);
                write_len(out, points.0.len());
                for point in &points.0 {
                    write_coord(out, point.0);
                }
            }
            Geometry::MultiLineString(lines) => {
                out.push(MULTI_LINE_STRING);
                write_len(out, lines.0.len());
                for line in &lines.0 {
                    write_coords(out, &line.0);
                }
            }
            Geometry::MultiPolygon(polygons) => {
                out.push(MULTI_POLYGON);
                write_len(out, polygons.0.len());
                for polygon in &polygons.0 {
                    write_polygon(out, polygon);
                }
            }
            Geometry::GeometryCollection(collection) => {
                out.push(GEOMETRY_COLLECTION);
                write_len(out, collection.0.len());
                for member in &collection.0 {
                    self.encode(member, out);
                }
            }
            Geometry::Rect(rect) => {
                out.push(POLYGON);
                write_polygon(out, &rect.to_polygon());
            }
            Geometry::Triangle(triangle) => {
                out.push(POLYGON);
                write_polygon(out, &triangle.to_polygon());
            }
        }
    }

    fn decode(&self, mut bytes: &[u8]) -> Result<Geometry<f64>, CodecError> {
        read_geometry(&mut bytes)
    }
}

fn coords_len(coords: &[Coord<f64>]) -> usize {
    4 + 16 * coords.len()
}

fn polygon_len(polygon: &Polygon<f64>) -> usize {
    4 + coords_len(&polygon.exterior().0)
        + polygon
            .interiors()
            .iter()
            .map(|ring| coords_len(&ring.0))
            .sum::<usize>()
}

fn write_len(out: &mut Vec<u8>, len: usize) {
    out.extend_from_slice(&u32::try_from(len).unwrap_or(u32::MAX).to_be_bytes());
}

fn write_coord(out: &mut Vec<u8>, coord: Coord<f64>) {
    out.extend_from_slice(&coord.x.to_be_bytes());
    out.extend_from_slice(&coord.y.to_be_bytes());
}

fn write_coords(out: &mut Vec<u8>, coords: &[Coord<f64>]) {
    write_len(out, coords.len());
    for coord in coords {
        write_coord(out, *coord);
    }
}

fn write_polygon(out: &mut Vec<u8>, polygon: &Polygon<f64>) {
    write_len(out, 1 + polygon.interiors().len());
    write_coords(out, &polygon.exterior().0);
    for ring in polygon.interiors() {
        write_coords(out, &ring.0);
    }
}

/// Read a count, rejecting counts the remaining bytes cannot hold.
fn read_len(bytes: &mut &[u8], min_item: usize) -> Result<usize, CodecError> {
    let count =
        usize::try_from(bytes.read_u32::<BigEndian>()?).map_err(|_| CodecError::Truncated)?;
    if count.saturating_mul(min_item) > bytes.len() {
        return Err(CodecError::Truncated);
    }
    Ok(count)
}

fn read_coord(bytes: &mut &[u8]) -> Result<Coord<f64>, CodecError> {
    Ok(Coord {
        x: bytes.read_f64::<BigEndian>()?,
        y: bytes.read_f64::<BigEndian>()?,
    })
}

fn read_coords(bytes: &mut &[u8]) -> Result<Vec<Coord<f64>>, CodecError> {
    let count = read_len(bytes, 16)?;
    (0..count).map(|_| read_coord(bytes)).collect()
}

fn read_polygon(bytes: &mut &[u8]) -> Result<Polygon<f64>, CodecError> {
    let rings = read_len(bytes, 4)?;
    if rings == 0 {
        return Ok(Polygon::new(LineString::new(Vec::new()), Vec::new()));
    }
    let exterior = LineString::new(read_coords(bytes)?);
    let interiors = (1..rings)
        .map(|_| read_coords(bytes).map(LineString::new))
        .collect::<Result<_, _>>()?;
    Ok(Polygon::new(exterior, interiors))
}

fn read_geometry(bytes: &mut &[u8]) -> Result<Geometry<f64>, CodecError> {
    let tag = bytes.read_u8()?;
    Ok(match tag {
        POINT => Geometry::Point(Point(read_coord(bytes)?)),
        LINE_STRING => Geometry::LineString(LineString::new(read_coords(bytes)?)),
        POLYGON => Geometry::Polygon(read_polygon(bytes)?),
        MULTI_POINT => Geometry::MultiPoint(MultiPoint::new(
            read_coords(bytes)?.into_iter().map(Point).collect(),
        )),
        MULTI_LINE_STRING => {
            let count = read_len(bytes, 4)?;
            Geometry::MultiLineString(MultiLineString::new(
                (0..count)
                    .map(|_| read_coords(bytes).map(LineString::new))
                    .collect::<Result<_, _>>()?,
            ))
        }
        MULTI_POLYGON => {
            let count = read_len(bytes, 4)?;
            Geometry::MultiPolygon(MultiPolygon::new(
                (0..count)
                    .map(|_| read_polygon(bytes))
                    .collect::<Result<_, _>>()?,
            ))
        }
        GEOMETRY_COLLECTION => {
            let count = read_len(bytes, 1)?;
            Geometry::GeometryCollection(GeometryCollection::new_from(
                (0..count)
                    .map(|_| read_geometry(bytes))
                    .collect::<Result<_, _>>()?,
            ))
        }
        tag => return Err(CodecError::GeometryTag { tag }),
    })
}

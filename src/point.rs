use std::io;

use crate::decoder::{DecodeError, Decoder};
use crate::encoder::Encoder;

/// A single time-series observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    /// Seconds since the Unix epoch. The unsigned 32-bit range runs
    /// through 2106-02-07 06:28:15 UTC.
    pub timestamp: u32,
    /// Observation value. The codec operates on the raw IEEE-754 bit
    /// pattern, so any `f64` round-trips, including NaN and the
    /// infinities.
    pub value: f64,
}

impl Point {
    /// Creates a new `Point`.
    pub fn new(timestamp: u32, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Encodes a whole block — base timestamp plus points — into bytes.
///
/// Convenience façade over [`Encoder`] for the common buffer-in/buffer-out
/// case: header, every point in order, end-of-block marker, zero-padded
/// flush.
///
/// # Example
/// ```
/// use tsblock::{marshal, Point};
///
/// let bytes = marshal(1427162400, &[Point::new(1427162462, 12.0)]).unwrap();
/// assert_eq!(bytes.len(), 19);
/// ```
pub fn marshal(t0: u32, points: &[Point]) -> io::Result<Vec<u8>> {
    let mut enc = Encoder::new(Vec::new());
    enc.encode_header(t0)?;
    enc.encode_points(points)?;
    enc.finish()?;
    Ok(enc.into_inner())
}

/// Decodes a block of bytes back into its base timestamp and points.
///
/// The inverse of [`marshal`]: reads the header, then points until the
/// end-of-block marker. A block with no points yields an empty vector.
pub fn unmarshal(data: &[u8]) -> Result<(u32, Vec<Point>), DecodeError> {
    let mut dec = Decoder::new(data);
    let t0 = dec.decode_header()?;
    let points = dec.points().collect::<Result<Vec<_>, _>>()?;
    Ok((t0, points))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 2015-03-24 02:00:00 UTC, the reference block's base timestamp.
    const T0: u32 = 1_427_162_400;

    /// Reference blocks with their known byte-exact encodings.
    fn wire_vectors() -> Vec<(Vec<Point>, &'static str)> {
        vec![
            (
                vec![
                    Point::new(T0 + 62, 12.0),
                    Point::new(T0 + 122, 12.0),
                    Point::new(T0 + 182, 24.0),
                ],
                "5510c52000f900a0000000000002fc6b07ffffffffe0",
            ),
            (vec![], "5510c520fffc0000000000000000"),
            (
                vec![Point::new(T0 + 62, 12.0)],
                "5510c52000f900a0000000000003ffffffffc0",
            ),
            (
                vec![
                    Point::new(T0 + 62, 12.0),
                    Point::new(T0 + 122, 12.5),
                    Point::new(T0 + 182, -24.2),
                ],
                "5510c52000f900a0000000000002fdbc1b0010022666666666667ffffffffe",
            ),
        ]
    }

    #[test]
    fn test_marshal_wire_vectors() {
        for (points, want) in wire_vectors() {
            let bytes = marshal(T0, &points).unwrap();
            assert_eq!(hex::encode(&bytes), want, "points={points:?}");
        }
    }

    #[test]
    fn test_unmarshal_wire_vectors() {
        for (want_points, input) in wire_vectors() {
            let bytes = hex::decode(input).unwrap();
            let (t0, points) = unmarshal(&bytes).unwrap();
            assert_eq!(t0, T0, "input={input}");
            assert_eq!(points, want_points, "input={input}");
        }
    }

    #[test]
    fn test_empty_block_roundtrip() {
        let bytes = marshal(T0, &[]).unwrap();
        let (t0, points) = unmarshal(&bytes).unwrap();
        assert_eq!(t0, T0);
        assert!(points.is_empty());
    }
}

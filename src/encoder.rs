use std::io::{self, Write};

use tracing::trace;

use crate::bitstream::BitWriter;
use crate::point::Point;

/// Width of the first point's timestamp delta field.
pub(crate) const FIRST_DELTA_BITS: u8 = 14;

/// Reserved all-ones first delta marking a block with no points.
pub(crate) const FIRST_DELTA_SENTINEL: u64 = (1 << FIRST_DELTA_BITS) - 1;

/// Reserved 32-bit delta-of-delta payload marking the end of a non-empty block.
pub(crate) const END_OF_BLOCK: u64 = 0xFFFF_FFFF;

/// Largest leading-zero count representable in the 5-bit window field.
/// Longer zero runs are announced as 31 and the excess carried inside the
/// significant bits, which decodes to the same XOR.
const MAX_LEADING_ZEROS: u8 = 31;

/// Streaming compressor for one block of time-series points.
///
/// Implements the compression scheme from Facebook's Gorilla paper:
/// timestamps as delta-of-delta with variable-length prefixes, values as
/// XOR against the previous value with a reusable leading/trailing zero
/// window. All fields are bit-packed with no byte alignment until
/// [`finish`](Encoder::finish) pads the final byte.
///
/// The caller must drive the encoder in order: [`encode_header`] once,
/// [`encode_point`] for each point in timestamp order, then [`finish`]
/// exactly once. Calls out of order are programming errors and panic.
///
/// [`encode_header`]: Encoder::encode_header
/// [`encode_point`]: Encoder::encode_point
/// [`finish`]: Encoder::finish
///
/// # Example
/// ```
/// use tsblock::{Encoder, Point};
///
/// let mut enc = Encoder::new(Vec::new());
/// enc.encode_header(1609459200).unwrap();
/// enc.encode_point(Point::new(1609459260, 12.0)).unwrap();
/// enc.encode_point(Point::new(1609459320, 12.5)).unwrap();
/// enc.finish().unwrap();
/// let bytes = enc.into_inner();
/// ```
pub struct Encoder<W: Write> {
    writer: BitWriter<W>,
    /// Block base timestamp, written once by `encode_header`.
    header_timestamp: u32,
    header_written: bool,
    /// Timestamp of the most recent point. Zero doubles as the "no point
    /// yet" sentinel, a documented limitation of the format: a genuine
    /// first timestamp of 0 is indistinguishable from the empty state.
    stored_timestamp: u32,
    /// Delta between the two most recent timestamps.
    stored_delta: u32,
    /// Leading-zero count of the last announced XOR window.
    stored_leading_zeros: u8,
    /// Trailing-zero count of the last announced XOR window.
    stored_trailing_zeros: u8,
    /// Raw bits of the most recent value.
    stored_value_bits: u64,
    finished: bool,
}

impl<W: Write> Encoder<W> {
    /// Creates an encoder writing to the given sink.
    pub fn new(sink: W) -> Self {
        Self {
            writer: BitWriter::new(sink),
            header_timestamp: 0,
            header_written: false,
            stored_timestamp: 0,
            stored_delta: 0,
            // Wider than any real zero run, so the first changed value
            // always announces a fresh window.
            stored_leading_zeros: u8::MAX,
            stored_trailing_zeros: 0,
            stored_value_bits: 0,
            finished: false,
        }
    }

    /// Writes the block's base timestamp as a full 32-bit field.
    ///
    /// Must be called exactly once, before any point.
    pub fn encode_header(&mut self, t0: u32) -> io::Result<()> {
        assert!(!self.header_written, "header already written");
        self.writer.write_bits(u64::from(t0), 32)?;
        self.header_timestamp = t0;
        self.header_written = true;
        trace!(t0, "wrote block header");
        Ok(())
    }

    /// Appends one point to the compressed stream.
    ///
    /// Points must be appended in the order they appear in the block; every
    /// encoding decision depends on the previous point's state.
    pub fn encode_point(&mut self, p: Point) -> io::Result<()> {
        assert!(self.header_written, "encode_header must precede encode_point");
        assert!(!self.finished, "cannot encode after finish()");
        if self.stored_timestamp == 0 {
            self.write_first(p)
        } else {
            self.write_timestamp_delta_delta(p.timestamp)?;
            self.write_value_xor(p.value)
        }
    }

    /// Appends a slice of points in order.
    pub fn encode_points(&mut self, points: &[Point]) -> io::Result<()> {
        for p in points {
            self.encode_point(*p)?;
        }
        Ok(())
    }

    /// Writes the end-of-block marker and flushes, padding the final byte
    /// with zero bits.
    ///
    /// Must be called exactly once after the last point, even when no
    /// points were written.
    pub fn finish(&mut self) -> io::Result<()> {
        assert!(self.header_written, "encode_header must precede finish");
        assert!(!self.finished, "finish() already called");
        if self.stored_timestamp == 0 {
            // No points: the reserved all-ones first delta plus a zeroed
            // value slot. A real first point always carries a live value
            // after its delta, so this pattern is unambiguous.
            self.writer.write_bits(FIRST_DELTA_SENTINEL, FIRST_DELTA_BITS)?;
            self.writer.write_bits(0, 64)?;
        } else {
            self.writer.write_bits(0b1111, 4)?;
            self.writer.write_bits(END_OF_BLOCK, 32)?;
            // One "value unchanged" bit keeps the stream shaped like a
            // regular point record.
            self.writer.write_bit(false)?;
        }
        self.finished = true;
        trace!("wrote end-of-block marker");
        self.writer.flush()
    }

    /// Consumes the encoder and returns the underlying sink.
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }

    fn write_first(&mut self, p: Point) -> io::Result<()> {
        let delta = p.timestamp.wrapping_sub(self.header_timestamp);
        self.stored_timestamp = p.timestamp;
        self.stored_delta = delta;
        self.stored_value_bits = p.value.to_bits();

        // The 14-bit field truncates deltas of 16384 seconds or more, and a
        // delta of exactly 16383 collides with the empty-block sentinel.
        // Neither is validated; both are format constraints.
        self.writer.write_bits(u64::from(delta), FIRST_DELTA_BITS)?;
        self.writer.write_bits(self.stored_value_bits, 64)?;
        trace!(delta, "wrote first point");
        Ok(())
    }

    fn write_timestamp_delta_delta(&mut self, timestamp: u32) -> io::Result<()> {
        let delta = timestamp.wrapping_sub(self.stored_timestamp);
        let dod = i64::from(delta) - i64::from(self.stored_delta);
        self.stored_timestamp = timestamp;
        self.stored_delta = delta;

        trace!(delta, dod, "wrote timestamp delta-of-delta");
        match dod {
            0 => self.writer.write_bit(false),
            -63..=64 => {
                self.writer.write_bits(0b10, 2)?;
                self.write_signed(dod, 7)
            }
            -255..=256 => {
                self.writer.write_bits(0b110, 3)?;
                self.write_signed(dod, 9)
            }
            -2047..=2048 => {
                self.writer.write_bits(0b1110, 4)?;
                self.write_signed(dod, 12)
            }
            _ => {
                self.writer.write_bits(0b1111, 4)?;
                self.write_signed(dod, 32)
            }
        }
    }

    /// Writes a signed value in `n` bits: non-negative values as-is,
    /// negative values biased by `2^n` into the n-bit two's-complement
    /// pattern.
    fn write_signed(&mut self, value: i64, n: u8) -> io::Result<()> {
        let biased = if value >= 0 {
            value as u64
        } else {
            ((1i64 << n) + value) as u64
        };
        self.writer.write_bits(biased, n)
    }

    fn write_value_xor(&mut self, value: f64) -> io::Result<()> {
        let value_bits = value.to_bits();
        let xor = self.stored_value_bits ^ value_bits;
        self.stored_value_bits = value_bits;

        if xor == 0 {
            // Value unchanged.
            return self.writer.write_bit(false);
        }
        self.writer.write_bit(true)?;

        let leading = (xor.leading_zeros() as u8).min(MAX_LEADING_ZEROS);
        let trailing = xor.trailing_zeros() as u8;

        if leading >= self.stored_leading_zeros && trailing >= self.stored_trailing_zeros {
            // The new zero runs cover the announced window; reuse it.
            self.writer.write_bit(false)?;
            let significant = 64 - self.stored_leading_zeros - self.stored_trailing_zeros;
            self.writer
                .write_bits(xor >> self.stored_trailing_zeros, significant)?;
            trace!(significant, "wrote value XOR, reused window");
        } else {
            self.stored_leading_zeros = leading;
            self.stored_trailing_zeros = trailing;
            let significant = 64 - leading - trailing;

            self.writer.write_bit(true)?;
            self.writer.write_bits(u64::from(leading), 5)?;
            // 64 does not fit the 6-bit field; it truncates to 0, which the
            // decoder reads back as 64.
            self.writer.write_bits(u64::from(significant), 6)?;
            self.writer.write_bits(xor >> trailing, significant)?;
            trace!(leading, trailing, significant, "wrote value XOR, new window");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finished_bytes(t0: u32, points: &[Point]) -> Vec<u8> {
        let mut enc = Encoder::new(Vec::new());
        enc.encode_header(t0).unwrap();
        enc.encode_points(points).unwrap();
        enc.finish().unwrap();
        enc.into_inner()
    }

    #[test]
    fn test_empty_block_is_header_plus_sentinel() {
        // 32-bit header + 14 all-ones bits + 64 zero bits = 110 bits,
        // padded to 14 bytes.
        let bytes = finished_bytes(0x5510_C520, &[]);
        assert_eq!(bytes.len(), 14);
        assert_eq!(&bytes[..4], &[0x55, 0x10, 0xC5, 0x20]);
        assert_eq!(&bytes[4..6], &[0xFF, 0xFC]);
        assert!(bytes[6..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_constant_series_costs_two_bits_per_point() {
        // Same delta and same value: one 0 bit for the timestamp, one for
        // the value. 110 bits after the header for the first point, then
        // 2 bits each, then the 37-bit marker.
        let t0 = 1000;
        let points: Vec<Point> = (1..=100).map(|i| Point::new(t0 + 60 * i, 42.0)).collect();
        let bytes = finished_bytes(t0, &points);
        let expected_bits = 32 + 14 + 64 + 2 * (points.len() - 1) + 37;
        assert_eq!(bytes.len(), expected_bits.div_ceil(8));
    }

    #[test]
    fn test_streaming_matches_marshal() {
        use crate::point::marshal;

        let t0 = 1_427_162_400;
        let points = [
            Point::new(t0 + 62, 12.0),
            Point::new(t0 + 122, 12.5),
            Point::new(t0 + 182, -24.2),
        ];

        let mut enc = Encoder::new(Vec::new());
        enc.encode_header(t0).unwrap();
        for p in &points {
            enc.encode_point(*p).unwrap();
        }
        enc.finish().unwrap();

        assert_eq!(enc.into_inner(), marshal(t0, &points).unwrap());
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let t0 = 1_427_162_400;
        let points: Vec<Point> = (0..100)
            .map(|i| Point::new(t0 + 60 * i, f64::from(i) * 0.1))
            .collect();
        assert_eq!(finished_bytes(t0, &points), finished_bytes(t0, &points));
    }

    #[test]
    fn test_first_delta_sentinel_collision() {
        // A first delta of exactly 16383 encodes as the empty-block
        // sentinel; the decoder reads the block back as empty. Documented
        // format limitation, not validated at encode time.
        let t0 = 1000;
        let bytes = finished_bytes(t0, &[Point::new(t0 + 16383, 1.0)]);
        let (got_t0, points) = crate::point::unmarshal(&bytes).unwrap();
        assert_eq!(got_t0, t0);
        assert!(points.is_empty());
    }

    #[test]
    #[should_panic(expected = "encode_header must precede encode_point")]
    fn test_point_before_header_panics() {
        let mut enc = Encoder::new(Vec::new());
        let _ = enc.encode_point(Point::new(100, 1.0));
    }

    #[test]
    #[should_panic(expected = "header already written")]
    fn test_double_header_panics() {
        let mut enc = Encoder::new(Vec::new());
        enc.encode_header(100).unwrap();
        let _ = enc.encode_header(100);
    }

    #[test]
    #[should_panic(expected = "finish() already called")]
    fn test_double_finish_panics() {
        let mut enc = Encoder::new(Vec::new());
        enc.encode_header(100).unwrap();
        enc.finish().unwrap();
        let _ = enc.finish();
    }

    #[test]
    #[should_panic(expected = "cannot encode after finish()")]
    fn test_encode_after_finish_panics() {
        let mut enc = Encoder::new(Vec::new());
        enc.encode_header(100).unwrap();
        enc.finish().unwrap();
        let _ = enc.encode_point(Point::new(160, 1.0));
    }
}
